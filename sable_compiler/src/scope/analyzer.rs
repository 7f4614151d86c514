//! AST walk that builds the scope tree and classifies captures.
//!
//! Two stages: a tree-building walk records raw DEF/USE flags per scope,
//! then a classification pass resolves every unbound use against the
//! enclosing scopes. A name used in an inner function and declared in an
//! outer one becomes FREE where it is used and CELL where it is declared;
//! the capture chain between them is built mechanically by the compiler.
//! Classification runs after the whole tree exists, so a function body may
//! reference bindings declared later in the source (mutual recursion).

use super::symbol::{Scope, ScopeKind, SymbolFlags};
use rustc_hash::FxHashMap;
use sable_parser::ast::{Expr, ExprKind, Program, Stmt, StmtKind};
use std::rc::Rc;

/// Scope analyzer.
pub struct ScopeAnalyzer {
    stack: Vec<Scope>,
}

impl ScopeAnalyzer {
    /// Analyze a program, producing the module scope tree.
    pub fn analyze(program: &Program) -> Scope {
        let mut analyzer = Self {
            stack: vec![Scope::new(ScopeKind::Module, "<module>")],
        };
        for stmt in &program.body {
            analyzer.visit_stmt(stmt);
        }
        let mut root = analyzer.stack.pop().expect("module scope present");
        classify(&mut root);
        root
    }

    fn current(&mut self) -> &mut Scope {
        self.stack.last_mut().expect("scope stack non-empty")
    }

    // =========================================================================
    // Tree Building
    // =========================================================================

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.visit_expr(expr),
            StmtKind::Let {
                name,
                value,
                is_const,
                ..
            } => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
                let mut flags = SymbolFlags::NONE;
                if *is_const {
                    flags |= SymbolFlags::CONST;
                }
                self.current().define(name.clone(), flags);
            }
            StmtKind::Assign { target, value, .. } => {
                self.visit_expr(value);
                self.visit_assign_target(target);
            }
            StmtKind::Function(def) => {
                self.current().define(def.name.clone(), SymbolFlags::NONE);

                let mut scope = Scope::new(ScopeKind::Function, def.name.clone());
                scope.is_async = def.is_async;
                for param in &def.params {
                    scope.define(param.name.clone(), SymbolFlags::PARAM);
                }
                self.stack.push(scope);
                for inner in &def.body {
                    self.visit_stmt(inner);
                }
                let scope = self.stack.pop().expect("function scope present");
                self.current().children.push(scope);
            }
            // Type declarations bind no runtime name; the compiler resolves
            // them through its type registry.
            StmtKind::StructDef(_) | StmtKind::EventDef(_) => {}
            StmtKind::Emit { args, .. } => {
                for arg in args {
                    self.visit_expr(arg);
                }
            }
            StmtKind::If {
                test,
                body,
                elifs,
                orelse,
            } => {
                self.visit_expr(test);
                self.visit_block(body);
                for (elif_test, elif_body) in elifs {
                    self.visit_expr(elif_test);
                    self.visit_block(elif_body);
                }
                if let Some(orelse) = orelse {
                    self.visit_block(orelse);
                }
            }
            StmtKind::While { test, body } => {
                self.visit_expr(test);
                self.visit_block(body);
            }
            StmtKind::For {
                var,
                iterable,
                body,
            } => {
                self.visit_expr(iterable);
                self.current().define(var.clone(), SymbolFlags::NONE);
                self.visit_block(body);
            }
            StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
        }
    }

    fn visit_block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_assign_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => self.current().mark_use(name.clone()),
            ExprKind::Index { obj, index } => {
                self.visit_expr(obj);
                self.visit_expr(index);
            }
            ExprKind::Field { obj, .. } => self.visit_expr(obj),
            // The parser rejects other targets.
            _ => {}
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::Void => {}
            ExprKind::List(elements) => {
                for element in elements {
                    self.visit_expr(element);
                }
            }
            ExprKind::Map(pairs) => {
                for (key, value) in pairs {
                    self.visit_expr(key);
                    self.visit_expr(value);
                }
            }
            ExprKind::Name(name) => self.current().mark_use(name.clone()),
            ExprKind::Field { obj, .. } => self.visit_expr(obj),
            ExprKind::Index { obj, index } => {
                self.visit_expr(obj);
                self.visit_expr(index);
            }
            ExprKind::Call { callee, args } => {
                self.visit_expr(callee);
                for arg in args {
                    self.visit_expr(&arg.value);
                }
            }
            ExprKind::Unary { operand, .. } => self.visit_expr(operand),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                self.visit_expr(lhs);
                self.visit_expr(rhs);
            }
            ExprKind::Await(operand) => {
                self.visit_expr(operand);
                // A top-level await makes the module body itself async.
                let current = self.current();
                if current.kind == ScopeKind::Module {
                    current.is_async = true;
                }
            }
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Deferred flag application: `(path from root, name, flags)`.
type Action = (Vec<usize>, Rc<str>, SymbolFlags);

fn classify(root: &mut Scope) {
    let mut actions: Vec<Action> = Vec::new();
    let mut ancestors: Vec<(Vec<usize>, FxHashMap<Rc<str>, bool>)> = Vec::new();
    collect(root, &mut Vec::new(), &mut ancestors, &mut actions);
    for (path, name, flags) in actions {
        scope_at(root, &path).mark(name, flags);
    }
}

fn collect(
    scope: &Scope,
    path: &mut Vec<usize>,
    ancestors: &mut Vec<(Vec<usize>, FxHashMap<Rc<str>, bool>)>,
    actions: &mut Vec<Action>,
) {
    for symbol in scope.symbols.values() {
        if !symbol.flags.contains(SymbolFlags::USE) || symbol.is_defined() {
            continue;
        }
        // Innermost enclosing scope that declares the name wins. A name
        // defined nowhere is left for the compiler: builtin, struct type,
        // or an UnresolvedName error with a source position.
        if let Some((ancestor_path, is_const)) = ancestors
            .iter()
            .rev()
            .find_map(|(p, defs)| defs.get(&symbol.name).map(|c| (p, *c)))
        {
            actions.push((ancestor_path.clone(), symbol.name.clone(), SymbolFlags::CELL));
            // Const-ness travels with the capture so reassignment through
            // a closure is still rejected at compile time.
            let mut flags = SymbolFlags::FREE;
            if is_const {
                flags |= SymbolFlags::CONST;
            }
            actions.push((path.clone(), symbol.name.clone(), flags));
        }
    }

    let defs: FxHashMap<Rc<str>, bool> = scope
        .symbols
        .values()
        .filter(|s| s.is_defined())
        .map(|s| (s.name.clone(), s.is_const()))
        .collect();
    ancestors.push((path.clone(), defs));
    for (i, child) in scope.children.iter().enumerate() {
        path.push(i);
        collect(child, path, ancestors, actions);
        path.pop();
    }
    ancestors.pop();
}

fn scope_at<'a>(root: &'a mut Scope, path: &[usize]) -> &'a mut Scope {
    let mut scope = root;
    for &index in path {
        scope = &mut scope.children[index];
    }
    scope
}
