//! AST-to-bytecode compilation.
//!
//! One [`FunctionCompiler`] per function body (the module body included).
//! Name resolution happens entirely here, in priority order: cell slot,
//! local slot, upvalue, builtin. A name that resolves to none of these is
//! an `UnresolvedName` error at compile time, never a runtime lookup.
//!
//! Struct and contract types live in a module-wide registry. Construction
//! with named arguments is reordered to declared field order during
//! compilation, and field access on a receiver whose struct type is
//! statically known compiles to a fixed slot index. Receivers with no
//! statically known type (parameters, map-backed records) fall back to a
//! name-carrying field instruction resolved by the runtime.

use crate::builder::{CodeBuilder, Label};
use crate::scope::{Scope, ScopeAnalyzer};
use rustc_hash::{FxHashMap, FxHashSet};
use sable_core::bytecode::{Capture, CellParam, CodeObject, Constant, Opcode};
use sable_core::error::{CompileError, CompileErrorKind, CompileResult, SableError};
use sable_core::value::{EventType, StructType};
use sable_core::{Builtin, Span};
use sable_parser::ast::{
    AssignOp, BinaryOp, CallArg, Expr, ExprKind, FunctionDef, LogicalOp, Program, Stmt, StmtKind,
    UnaryOp,
};
use std::rc::Rc;

/// Compiler entry points.
pub struct Compiler;

impl Compiler {
    /// Compile a parsed program into a root code object.
    pub fn compile_program(program: &Program) -> CompileResult<Rc<CodeObject>> {
        let scope = ScopeAnalyzer::analyze(program);
        let registry = TypeRegistry::build(program)?;

        let mut module = FunctionCompiler::new(&scope, &registry, true, "<module>");
        module.compile_module_body(&program.body)?;
        debug_assert!(
            module.freevars.is_empty(),
            "module scope cannot capture: {:?}",
            module.freevars
        );

        let code = module.into_code(
            0,
            Vec::new(),
            scope.is_async,
            registry.structs.clone(),
            registry.events.clone(),
            Span::default(),
        )?;
        Ok(Rc::new(code))
    }

    /// Parse and compile source text.
    pub fn compile_source(source: &str) -> Result<Rc<CodeObject>, SableError> {
        let program = sable_parser::parse(source)?;
        Ok(Self::compile_program(&program)?)
    }
}

// =============================================================================
// Type Registry
// =============================================================================

/// Module-wide struct/contract and event tables, collected in a pre-scan so
/// declarations and uses may appear in any top-level order.
struct TypeRegistry {
    structs: Vec<Rc<StructType>>,
    struct_map: FxHashMap<Rc<str>, u16>,
    events: Vec<Rc<EventType>>,
    event_map: FxHashMap<Rc<str>, u16>,
}

impl TypeRegistry {
    fn build(program: &Program) -> CompileResult<Self> {
        let mut registry = Self {
            structs: Vec::new(),
            struct_map: FxHashMap::default(),
            events: Vec::new(),
            event_map: FxHashMap::default(),
        };

        for stmt in &program.body {
            match &stmt.kind {
                StmtKind::StructDef(def) => {
                    if registry.struct_map.contains_key(&def.name) {
                        return Err(CompileError::new(
                            CompileErrorKind::DuplicateDeclaration,
                            format!("type '{}' is already declared", def.name),
                            def.span,
                        ));
                    }
                    let mut seen = FxHashSet::default();
                    for (field, _) in &def.fields {
                        if !seen.insert(field.clone()) {
                            return Err(CompileError::new(
                                CompileErrorKind::DuplicateDeclaration,
                                format!("duplicate field '{field}' on '{}'", def.name),
                                def.span,
                            ));
                        }
                    }
                    let index = registry.structs.len() as u16;
                    registry.structs.push(Rc::new(StructType {
                        name: def.name.clone(),
                        fields: def.fields.iter().map(|(n, _)| n.clone()).collect(),
                        field_types: def.fields.iter().map(|(_, t)| t.clone()).collect(),
                        is_contract: def.is_contract,
                    }));
                    registry.struct_map.insert(def.name.clone(), index);
                }
                StmtKind::EventDef(def) => {
                    if registry.event_map.contains_key(&def.name) {
                        return Err(CompileError::new(
                            CompileErrorKind::DuplicateDeclaration,
                            format!("event '{}' is already declared", def.name),
                            def.span,
                        ));
                    }
                    let index = registry.events.len() as u16;
                    registry.events.push(Rc::new(EventType {
                        name: def.name.clone(),
                        fields: def.fields.iter().map(|(n, _)| n.clone()).collect(),
                    }));
                    registry.event_map.insert(def.name.clone(), index);
                }
                _ => {}
            }
        }
        Ok(registry)
    }
}

// =============================================================================
// Function Compiler
// =============================================================================

/// Break/continue patch targets for one enclosing loop.
struct LoopFrame {
    break_label: Label,
    continue_label: Label,
}

/// Compiles one function body.
struct FunctionCompiler<'a> {
    scope: &'a Scope,
    registry: &'a TypeRegistry,
    builder: CodeBuilder,
    is_module: bool,

    /// Names actually declared so far (duplicate detection).
    declared: FxHashSet<Rc<str>>,
    /// `const` bindings.
    consts: FxHashSet<Rc<str>>,
    /// Plain locals: name to slot.
    locals: FxHashMap<Rc<str>, u16>,
    next_local: u16,
    /// Cell-resident locals: name to cell slot. Pre-allocated (sorted by
    /// name) so forward references from earlier closures resolve.
    cells: FxHashMap<Rc<str>, u16>,
    /// Free variables in first-use order; index is the upvalue index.
    freevars: Vec<Rc<str>>,
    free_map: FxHashMap<Rc<str>, u16>,

    functions: Vec<Rc<CodeObject>>,
    cell_params: Vec<CellParam>,
    loops: Vec<LoopFrame>,
    /// Next child scope to consume; mirrors the analyzer's visit order.
    child_index: usize,

    /// Statically known arities of functions declared in this scope.
    fn_sigs: FxHashMap<Rc<str>, u16>,
    /// Locals with a statically known struct type (never reassigned).
    tracked: FxHashMap<Rc<str>, u16>,
    /// Names that are the target of any assignment in this body.
    reassigned: FxHashSet<Rc<str>>,

    for_counter: u32,
}

impl<'a> FunctionCompiler<'a> {
    fn new(
        scope: &'a Scope,
        registry: &'a TypeRegistry,
        is_module: bool,
        name: &str,
    ) -> Self {
        // Cell slots are assigned up front, in sorted-name order, so that a
        // closure created before the declaring statement still captures the
        // right cell (forward references between functions).
        let mut cell_names: Vec<Rc<str>> = scope
            .symbols
            .values()
            .filter(|s| s.is_cell() && s.is_defined())
            .map(|s| s.name.clone())
            .collect();
        cell_names.sort();
        let cells: FxHashMap<Rc<str>, u16> = cell_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i as u16))
            .collect();

        Self {
            scope,
            registry,
            builder: CodeBuilder::new(name),
            is_module,
            declared: FxHashSet::default(),
            consts: FxHashSet::default(),
            locals: FxHashMap::default(),
            next_local: 0,
            cells,
            freevars: Vec::new(),
            free_map: FxHashMap::default(),
            functions: Vec::new(),
            cell_params: Vec::new(),
            loops: Vec::new(),
            child_index: 0,
            fn_sigs: FxHashMap::default(),
            tracked: FxHashMap::default(),
            reassigned: FxHashSet::default(),
            for_counter: 0,
        }
    }

    // =========================================================================
    // Entry Points
    // =========================================================================

    /// Compile the module body. The value of the last statement (void for
    /// declarations) is left on the stack for `Halt`.
    fn compile_module_body(&mut self, body: &[Stmt]) -> CompileResult<()> {
        collect_assigned_names(body, &mut self.reassigned);

        match body.split_last() {
            None => self.builder.emit(Opcode::LoadVoid),
            Some((last, rest)) => {
                for stmt in rest {
                    self.compile_stmt(stmt)?;
                }
                if let StmtKind::Expr(expr) = &last.kind {
                    self.builder.set_line(last.span.line);
                    self.compile_expr(expr)?;
                } else {
                    self.compile_stmt(last)?;
                    self.builder.emit(Opcode::LoadVoid);
                }
            }
        }
        self.builder.emit(Opcode::Halt);
        Ok(())
    }

    /// Compile a function body: bind parameters, compile statements, and
    /// append an implicit `return void`.
    fn compile_function_body(&mut self, def: &FunctionDef) -> CompileResult<()> {
        collect_assigned_names(&def.body, &mut self.reassigned);

        for (i, param) in def.params.iter().enumerate() {
            if !self.declared.insert(param.name.clone()) {
                return Err(CompileError::new(
                    CompileErrorKind::DuplicateDeclaration,
                    format!("duplicate parameter '{}'", param.name),
                    def.span,
                ));
            }
            let slot = i as u16;
            if let Some(&cell_slot) = self.cells.get(&param.name) {
                // Captured parameter: argument value moves into its cell.
                self.cell_params.push(CellParam {
                    param_slot: slot,
                    cell_slot,
                });
            } else {
                self.locals.insert(param.name.clone(), slot);
            }
        }
        self.next_local = def.params.len() as u16;

        for stmt in &def.body {
            self.compile_stmt(stmt)?;
        }
        self.builder.emit(Opcode::LoadVoid);
        self.builder.emit(Opcode::Return);
        Ok(())
    }

    /// Seal this compiler into a code object.
    fn into_code(
        self,
        arity: u16,
        captures: Vec<Capture>,
        is_async: bool,
        structs: Vec<Rc<StructType>>,
        events: Vec<Rc<EventType>>,
        span: Span,
    ) -> CompileResult<CodeObject> {
        self.builder.finish(
            arity,
            self.next_local,
            self.cells.len() as u16,
            is_async,
            captures,
            self.cell_params,
            self.functions,
            structs,
            events,
            span,
        )
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        self.builder.set_line(stmt.span.line);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.compile_expr(expr)?;
                self.builder.emit(Opcode::Pop);
            }
            StmtKind::Let {
                name,
                value,
                is_const,
                ..
            } => {
                let static_struct = value.as_ref().and_then(|v| self.static_struct_of(v));
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.builder.emit(Opcode::LoadVoid),
                }
                self.declare_and_store(name, stmt.span, *is_const)?;
                if let Some(idx) = static_struct {
                    if !self.reassigned.contains(name) && !self.cells.contains_key(name) {
                        self.tracked.insert(name.clone(), idx);
                    }
                }
            }
            StmtKind::Assign { target, op, value } => {
                self.compile_assign(target, *op, value, stmt.span)?;
            }
            StmtKind::Function(def) => self.compile_function_decl(def, stmt.span)?,
            StmtKind::StructDef(def) => {
                if !self.is_module {
                    return Err(CompileError::new(
                        CompileErrorKind::NotAtModuleScope,
                        format!("type '{}' must be declared at module scope", def.name),
                        def.span,
                    ));
                }
                // Registered in the pre-scan; no code.
            }
            StmtKind::EventDef(def) => {
                if !self.is_module {
                    return Err(CompileError::new(
                        CompileErrorKind::NotAtModuleScope,
                        format!("event '{}' must be declared at module scope", def.name),
                        def.span,
                    ));
                }
            }
            StmtKind::Emit { name, args } => {
                let Some(&event_idx) = self.registry.event_map.get(name) else {
                    return Err(CompileError::new(
                        CompileErrorKind::UnresolvedName,
                        format!("unknown event '{name}'"),
                        stmt.span,
                    ));
                };
                let event = &self.registry.events[event_idx as usize];
                if event.fields.len() != args.len() {
                    return Err(CompileError::new(
                        CompileErrorKind::ArityMismatch,
                        format!(
                            "event '{name}' declares {} field(s), got {}",
                            event.fields.len(),
                            args.len()
                        ),
                        stmt.span,
                    ));
                }
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.builder
                    .emit_ab(Opcode::EmitEvent, event_idx, args.len() as u16);
            }
            StmtKind::If {
                test,
                body,
                elifs,
                orelse,
            } => {
                let end = self.builder.new_label();
                let mut next = self.builder.new_label();

                self.compile_expr(test)?;
                self.builder.emit_jump(Opcode::JumpIfFalse, next);
                self.compile_block(body)?;
                self.builder.emit_jump(Opcode::Jump, end);

                for (elif_test, elif_body) in elifs {
                    self.builder.bind_label(next);
                    next = self.builder.new_label();
                    self.compile_expr(elif_test)?;
                    self.builder.emit_jump(Opcode::JumpIfFalse, next);
                    self.compile_block(elif_body)?;
                    self.builder.emit_jump(Opcode::Jump, end);
                }

                self.builder.bind_label(next);
                if let Some(orelse) = orelse {
                    self.compile_block(orelse)?;
                }
                self.builder.bind_label(end);
            }
            StmtKind::While { test, body } => {
                let start = self.builder.new_label();
                let end = self.builder.new_label();

                self.builder.bind_label(start);
                self.compile_expr(test)?;
                self.builder.emit_jump(Opcode::JumpIfFalse, end);

                self.loops.push(LoopFrame {
                    break_label: end,
                    continue_label: start,
                });
                self.compile_block(body)?;
                self.loops.pop();

                self.builder.emit_jump(Opcode::Jump, start);
                self.builder.bind_label(end);
            }
            StmtKind::For {
                var,
                iterable,
                body,
            } => self.compile_for(var, iterable, body, stmt.span)?,
            StmtKind::Break => {
                let Some(frame) = self.loops.last() else {
                    return Err(CompileError::new(
                        CompileErrorKind::OutsideLoop,
                        "'break' outside loop",
                        stmt.span,
                    ));
                };
                let label = frame.break_label;
                self.builder.emit_jump(Opcode::Jump, label);
            }
            StmtKind::Continue => {
                let Some(frame) = self.loops.last() else {
                    return Err(CompileError::new(
                        CompileErrorKind::OutsideLoop,
                        "'continue' outside loop",
                        stmt.span,
                    ));
                };
                let label = frame.continue_label;
                self.builder.emit_jump(Opcode::Jump, label);
            }
            StmtKind::Return(value) => {
                if self.is_module {
                    return Err(CompileError::new(
                        CompileErrorKind::ReturnOutsideFunction,
                        "'return' outside function",
                        stmt.span,
                    ));
                }
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.builder.emit(Opcode::LoadVoid),
                }
                self.builder.emit(Opcode::Return);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, body: &[Stmt]) -> CompileResult<()> {
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    /// Iteration lowers to index stepping over the iterable: hidden locals
    /// hold the sequence and a cursor, and `len` gates the back edge.
    fn compile_for(
        &mut self,
        var: &Rc<str>,
        iterable: &Expr,
        body: &[Stmt],
        span: Span,
    ) -> CompileResult<()> {
        let n = self.for_counter;
        self.for_counter += 1;
        let iter_slot = self.alloc_local(format!("<for:{n}:seq>").into(), span)?;
        let idx_slot = self.alloc_local(format!("<for:{n}:idx>").into(), span)?;

        self.compile_expr(iterable)?;
        self.builder.emit_a(Opcode::StoreLocal, iter_slot);
        let zero = self.builder.add_constant(Constant::Int(0), span)?;
        self.builder.emit_a(Opcode::LoadConst, zero);
        self.builder.emit_a(Opcode::StoreLocal, idx_slot);

        let start = self.builder.new_label();
        let cont = self.builder.new_label();
        let end = self.builder.new_label();

        // while idx < len(seq)
        self.builder.bind_label(start);
        self.builder.emit_a(Opcode::LoadLocal, idx_slot);
        self.builder
            .emit_a(Opcode::LoadBuiltin, Builtin::Len.index());
        self.builder.emit_a(Opcode::LoadLocal, iter_slot);
        self.builder.emit_a(Opcode::Call, 1);
        self.builder.emit(Opcode::Lt);
        self.builder.emit_jump(Opcode::JumpIfFalse, end);

        // var = seq[idx]
        self.builder.emit_a(Opcode::LoadLocal, iter_slot);
        self.builder.emit_a(Opcode::LoadLocal, idx_slot);
        self.builder.emit(Opcode::Index);
        if self.declared.contains(var) {
            self.store_to_binding(var, span)?;
        } else {
            self.declare_and_store(var, span, false)?;
        }

        self.loops.push(LoopFrame {
            break_label: end,
            continue_label: cont,
        });
        self.compile_block(body)?;
        self.loops.pop();

        // idx = idx + 1
        self.builder.bind_label(cont);
        self.builder.emit_a(Opcode::LoadLocal, idx_slot);
        let one = self.builder.add_constant(Constant::Int(1), span)?;
        self.builder.emit_a(Opcode::LoadConst, one);
        self.builder.emit(Opcode::Add);
        self.builder.emit_a(Opcode::StoreLocal, idx_slot);
        self.builder.emit_jump(Opcode::Jump, start);

        self.builder.bind_label(end);
        Ok(())
    }

    fn compile_function_decl(&mut self, def: &Rc<FunctionDef>, span: Span) -> CompileResult<()> {
        let child_scope = &self.scope.children[self.child_index];
        self.child_index += 1;

        let mut child = FunctionCompiler::new(child_scope, self.registry, false, &def.name);
        child.compile_function_body(def)?;

        // The child's free variables become captures resolved against this
        // frame: a cell we own, or an upvalue we in turn request.
        let child_freevars = child.freevars.clone();
        let mut captures = Vec::with_capacity(child_freevars.len());
        for name in &child_freevars {
            captures.push(self.resolve_capture(name));
        }

        let code = child.into_code(
            def.params.len() as u16,
            captures,
            def.is_async,
            Vec::new(),
            Vec::new(),
            def.span,
        )?;

        let func_idx = u16::try_from(self.functions.len()).map_err(|_| {
            CompileError::new(
                CompileErrorKind::LimitExceeded,
                "too many nested functions",
                def.span,
            )
        })?;
        self.functions.push(Rc::new(code));
        self.builder.emit_a(Opcode::MakeClosure, func_idx);

        self.declare_and_store(&def.name, span, false)?;
        self.fn_sigs
            .insert(def.name.clone(), def.params.len() as u16);
        Ok(())
    }

    fn compile_assign(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        span: Span,
    ) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if self.consts.contains(name) || self.is_const_capture(name) {
                    return Err(CompileError::new(
                        CompileErrorKind::ConstReassignment,
                        format!("cannot reassign const '{name}'"),
                        span,
                    ));
                }
                if op != AssignOp::Assign {
                    self.compile_name_load(name, target.span)?;
                    self.compile_expr(value)?;
                    self.builder.emit(compound_opcode(op));
                } else {
                    self.compile_expr(value)?;
                }
                self.store_to_binding(name, span)?;
                self.fn_sigs.remove(name);
                self.tracked.remove(name);
            }
            ExprKind::Index { obj, index } => {
                self.compile_expr(obj)?;
                self.compile_expr(index)?;
                if op != AssignOp::Assign {
                    self.builder.emit(Opcode::Dup2);
                    self.builder.emit(Opcode::Index);
                    self.compile_expr(value)?;
                    self.builder.emit(compound_opcode(op));
                } else {
                    self.compile_expr(value)?;
                }
                self.builder.emit(Opcode::StoreIndex);
            }
            ExprKind::Field { obj, name } => {
                let static_ty = self.static_struct_of(obj);
                self.compile_expr(obj)?;
                let slot = match static_ty {
                    Some(idx) => Some(self.resolve_field_slot(idx, name, span)?),
                    None => None,
                };
                if op != AssignOp::Assign {
                    self.builder.emit(Opcode::Dup);
                    self.emit_field_get(slot, name, span)?;
                    self.compile_expr(value)?;
                    self.builder.emit(compound_opcode(op));
                } else {
                    self.compile_expr(value)?;
                }
                match slot {
                    Some(slot) => self.builder.emit_a(Opcode::SetField, slot),
                    None => {
                        let idx = self
                            .builder
                            .add_constant(Constant::Str(name.clone()), span)?;
                        self.builder.emit_a(Opcode::SetFieldNamed, idx);
                    }
                }
            }
            _ => {
                // The parser already rejects these.
                return Err(CompileError::new(
                    CompileErrorKind::UnresolvedName,
                    "invalid assignment target",
                    span,
                ));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Int(value) => {
                let idx = self
                    .builder
                    .add_constant(Constant::Int(*value), expr.span)?;
                self.builder.emit_a(Opcode::LoadConst, idx);
            }
            ExprKind::Float(value) => {
                let idx = self
                    .builder
                    .add_constant(Constant::Float(*value), expr.span)?;
                self.builder.emit_a(Opcode::LoadConst, idx);
            }
            ExprKind::Str(value) => {
                let idx = self
                    .builder
                    .add_constant(Constant::Str(value.clone()), expr.span)?;
                self.builder.emit_a(Opcode::LoadConst, idx);
            }
            ExprKind::Bool(true) => self.builder.emit(Opcode::LoadTrue),
            ExprKind::Bool(false) => self.builder.emit(Opcode::LoadFalse),
            ExprKind::Void => self.builder.emit(Opcode::LoadVoid),
            ExprKind::List(elements) => {
                let count = fit_u16(elements.len(), expr.span)?;
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.builder.emit_a(Opcode::BuildList, count);
            }
            ExprKind::Map(pairs) => {
                let count = fit_u16(pairs.len(), expr.span)?;
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.builder.emit_a(Opcode::BuildMap, count);
            }
            ExprKind::Name(name) => self.compile_name_load(name, expr.span)?,
            ExprKind::Field { obj, name } => {
                let static_ty = self.static_struct_of(obj);
                self.compile_expr(obj)?;
                let slot = match static_ty {
                    Some(idx) => Some(self.resolve_field_slot(idx, name, expr.span)?),
                    None => None,
                };
                self.emit_field_get(slot, name, expr.span)?;
            }
            ExprKind::Index { obj, index } => {
                self.compile_expr(obj)?;
                self.compile_expr(index)?;
                self.builder.emit(Opcode::Index);
            }
            ExprKind::Call { callee, args } => self.compile_call(callee, args, expr.span)?,
            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.builder.emit(match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::BitNot => Opcode::BitNot,
                });
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.builder.emit(binary_opcode(*op));
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let end = self.builder.new_label();
                self.compile_expr(lhs)?;
                self.builder.emit_jump(
                    match op {
                        LogicalOp::And => Opcode::JumpIfFalseOrPop,
                        LogicalOp::Or => Opcode::JumpIfTrueOrPop,
                    },
                    end,
                );
                self.compile_expr(rhs)?;
                self.builder.bind_label(end);
            }
            ExprKind::Await(operand) => {
                if !self.is_module && !self.scope.is_async {
                    return Err(CompileError::new(
                        CompileErrorKind::AwaitOutsideAsync,
                        "'await' is only allowed in async functions",
                        expr.span,
                    ));
                }
                self.compile_expr(operand)?;
                self.builder.emit(Opcode::Await);
            }
        }
        Ok(())
    }

    fn compile_call(
        &mut self,
        callee: &Expr,
        args: &[CallArg],
        span: Span,
    ) -> CompileResult<()> {
        // A callee naming a declared struct/contract type (and not shadowed
        // by a value binding) is a construction, compiled specially.
        if let ExprKind::Name(name) = &callee.kind {
            if !self.is_value_binding(name) {
                if let Some(&struct_idx) = self.registry.struct_map.get(name) {
                    return self.compile_construction(struct_idx, args, span);
                }
            }
        }

        if let Some(named) = args.iter().find(|a| a.name.is_some()) {
            return Err(CompileError::new(
                CompileErrorKind::NamedArguments,
                "named arguments are only allowed when constructing a struct or contract",
                named.value.span,
            ));
        }

        // Best-effort static arity check for direct calls of functions
        // declared (and never reassigned) in this same scope.
        if let ExprKind::Name(name) = &callee.kind {
            if let Some(&arity) = self.fn_sigs.get(name) {
                if arity as usize != args.len() {
                    return Err(CompileError::new(
                        CompileErrorKind::ArityMismatch,
                        format!(
                            "'{name}' takes {arity} argument(s), got {}",
                            args.len()
                        ),
                        span,
                    ));
                }
            }
        }

        let argc = fit_u16(args.len(), span)?;
        self.compile_expr(callee)?;
        for arg in args {
            self.compile_expr(&arg.value)?;
        }
        self.builder.emit_a(Opcode::Call, argc);
        Ok(())
    }

    /// Struct/contract construction. Named arguments bind to declared
    /// fields here, at compile time; the emitted code always pushes field
    /// values in declaration order.
    fn compile_construction(
        &mut self,
        struct_idx: u16,
        args: &[CallArg],
        span: Span,
    ) -> CompileResult<()> {
        let ty = self.registry.structs[struct_idx as usize].clone();
        let any_named = args.iter().any(|a| a.name.is_some());

        if any_named {
            if args.iter().any(|a| a.name.is_none()) {
                return Err(CompileError::new(
                    CompileErrorKind::NamedArguments,
                    format!("cannot mix named and positional values for '{}'", ty.name),
                    span,
                ));
            }
            let mut provided: FxHashMap<&str, &Expr> = FxHashMap::default();
            for arg in args {
                let name = arg.name.as_deref().expect("named argument");
                if ty.field_slot(name).is_none() {
                    return Err(CompileError::new(
                        CompileErrorKind::UnknownField,
                        format!("'{}' has no field '{name}'", ty.name),
                        arg.value.span,
                    ));
                }
                if provided.insert(name, &arg.value).is_some() {
                    return Err(CompileError::new(
                        CompileErrorKind::DuplicateDeclaration,
                        format!("field '{name}' given twice"),
                        arg.value.span,
                    ));
                }
            }
            for field in ty.fields.iter() {
                let Some(value) = provided.get(&**field) else {
                    return Err(CompileError::new(
                        CompileErrorKind::ArityMismatch,
                        format!("missing value for field '{field}' of '{}'", ty.name),
                        span,
                    ));
                };
                self.compile_expr(value)?;
            }
        } else {
            if args.len() != ty.fields.len() {
                return Err(CompileError::new(
                    CompileErrorKind::ArityMismatch,
                    format!(
                        "'{}' declares {} field(s), got {}",
                        ty.name,
                        ty.fields.len(),
                        args.len()
                    ),
                    span,
                ));
            }
            for arg in args {
                self.compile_expr(&arg.value)?;
            }
        }

        self.builder
            .emit_ab(Opcode::NewStruct, struct_idx, ty.fields.len() as u16);
        Ok(())
    }

    // =========================================================================
    // Name Resolution
    // =========================================================================

    /// Load a name: cell, local, upvalue, builtin - in that order.
    fn compile_name_load(&mut self, name: &Rc<str>, span: Span) -> CompileResult<()> {
        if let Some(&slot) = self.cells.get(name) {
            self.builder.emit_a(Opcode::LoadCell, slot);
        } else if let Some(&slot) = self.locals.get(name) {
            self.builder.emit_a(Opcode::LoadLocal, slot);
        } else if self.is_free(name) {
            let idx = self.free_idx(name);
            self.builder.emit_a(Opcode::LoadUpvalue, idx);
        } else if let Some(builtin) = Builtin::lookup(name) {
            self.builder.emit_a(Opcode::LoadBuiltin, builtin.index());
        } else if self.registry.struct_map.contains_key(name) {
            return Err(CompileError::new(
                CompileErrorKind::UnresolvedName,
                format!("type '{name}' can only be constructed, not used as a value"),
                span,
            ));
        } else {
            return Err(CompileError::new(
                CompileErrorKind::UnresolvedName,
                format!("name '{name}' is not declared"),
                span,
            ));
        }
        Ok(())
    }

    /// Store the top of stack into an existing binding.
    fn store_to_binding(&mut self, name: &Rc<str>, span: Span) -> CompileResult<()> {
        if let Some(&slot) = self.cells.get(name) {
            self.builder.emit_a(Opcode::StoreCell, slot);
        } else if let Some(&slot) = self.locals.get(name) {
            self.builder.emit_a(Opcode::StoreLocal, slot);
        } else if self.is_free(name) {
            let idx = self.free_idx(name);
            self.builder.emit_a(Opcode::StoreUpvalue, idx);
        } else {
            return Err(CompileError::new(
                CompileErrorKind::UnresolvedName,
                format!("cannot assign to undeclared name '{name}'"),
                span,
            ));
        }
        Ok(())
    }

    /// Declare a new binding and store the top of stack into it.
    fn declare_and_store(
        &mut self,
        name: &Rc<str>,
        span: Span,
        is_const: bool,
    ) -> CompileResult<()> {
        if !self.declared.insert(name.clone()) {
            return Err(CompileError::new(
                CompileErrorKind::DuplicateDeclaration,
                format!("'{name}' is already declared in this scope"),
                span,
            ));
        }
        if is_const {
            self.consts.insert(name.clone());
        }
        if let Some(&slot) = self.cells.get(name) {
            self.builder.emit_a(Opcode::StoreCell, slot);
        } else {
            let slot = self.alloc_local(name.clone(), span)?;
            self.builder.emit_a(Opcode::StoreLocal, slot);
        }
        Ok(())
    }

    fn alloc_local(&mut self, name: Rc<str>, span: Span) -> CompileResult<u16> {
        let slot = self.next_local;
        self.next_local = self.next_local.checked_add(1).ok_or_else(|| {
            CompileError::new(
                CompileErrorKind::LimitExceeded,
                "too many local variables",
                span,
            )
        })?;
        self.locals.insert(name, slot);
        Ok(slot)
    }

    fn is_free(&self, name: &str) -> bool {
        self.scope
            .lookup(name)
            .is_some_and(|sym| sym.is_free())
    }

    /// Captured `const` bindings carry the CONST flag through analysis.
    fn is_const_capture(&self, name: &str) -> bool {
        self.scope
            .lookup(name)
            .is_some_and(|sym| sym.is_free() && sym.is_const())
    }

    fn free_idx(&mut self, name: &Rc<str>) -> u16 {
        if let Some(&idx) = self.free_map.get(name) {
            return idx;
        }
        let idx = self.freevars.len() as u16;
        self.freevars.push(name.clone());
        self.free_map.insert(name.clone(), idx);
        idx
    }

    /// How this frame supplies one of a child's free variables.
    fn resolve_capture(&mut self, name: &Rc<str>) -> Capture {
        if let Some(&slot) = self.cells.get(name) {
            Capture::Cell(slot)
        } else {
            Capture::Upvalue(self.free_idx(name))
        }
    }

    fn is_value_binding(&self, name: &str) -> bool {
        self.cells.contains_key(name) || self.locals.contains_key(name) || self.is_free(name)
    }

    // =========================================================================
    // Static Struct Typing
    // =========================================================================

    /// Statically known struct type of an expression, if any: a direct
    /// construction, or a never-reassigned local initialized from one.
    fn static_struct_of(&self, expr: &Expr) -> Option<u16> {
        match &expr.kind {
            ExprKind::Name(name) => self.tracked.get(name).copied(),
            ExprKind::Call { callee, args: _ } => match &callee.kind {
                ExprKind::Name(name) if !self.is_value_binding(name) => {
                    self.registry.struct_map.get(name).copied()
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn resolve_field_slot(
        &self,
        struct_idx: u16,
        field: &str,
        span: Span,
    ) -> CompileResult<u16> {
        let ty = &self.registry.structs[struct_idx as usize];
        match ty.field_slot(field) {
            Some(slot) => Ok(slot as u16),
            None => Err(CompileError::new(
                CompileErrorKind::UnknownField,
                format!("'{}' has no field '{field}'", ty.name),
                span,
            )),
        }
    }

    fn emit_field_get(
        &mut self,
        slot: Option<u16>,
        name: &Rc<str>,
        span: Span,
    ) -> CompileResult<()> {
        match slot {
            Some(slot) => self.builder.emit_a(Opcode::GetField, slot),
            None => {
                let idx = self
                    .builder
                    .add_constant(Constant::Str(name.clone()), span)?;
                self.builder.emit_a(Opcode::GetFieldNamed, idx);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Pow => Opcode::Pow,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
    }
}

fn compound_opcode(op: AssignOp) -> Opcode {
    match op {
        AssignOp::Assign => unreachable!("plain assignment has no operator"),
        AssignOp::Add => Opcode::Add,
        AssignOp::Sub => Opcode::Sub,
        AssignOp::Mul => Opcode::Mul,
        AssignOp::Div => Opcode::Div,
    }
}

fn fit_u16(len: usize, span: Span) -> CompileResult<u16> {
    u16::try_from(len).map_err(|_| {
        CompileError::new(
            CompileErrorKind::LimitExceeded,
            "too many elements in one expression",
            span,
        )
    })
}

/// Names assigned (not declared) anywhere in a body, loop and branch bodies
/// included. Nested functions are excluded: they can only touch cells, and
/// cell-resident locals are never statically typed.
fn collect_assigned_names(body: &[Stmt], out: &mut FxHashSet<Rc<str>>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { target, .. } => {
                if let ExprKind::Name(name) = &target.kind {
                    out.insert(name.clone());
                }
            }
            StmtKind::If {
                body,
                elifs,
                orelse,
                ..
            } => {
                collect_assigned_names(body, out);
                for (_, elif_body) in elifs {
                    collect_assigned_names(elif_body, out);
                }
                if let Some(orelse) = orelse {
                    collect_assigned_names(orelse, out);
                }
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                collect_assigned_names(body, out);
            }
            _ => {}
        }
    }
}
