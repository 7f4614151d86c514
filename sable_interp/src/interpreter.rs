//! The tree walker.

use crate::env::{Env, EnvRef};
use rustc_hash::FxHashMap;
use sable_core::error::{Failure, FailureKind, SableError};
use sable_core::value::{
    Callable, EventType, MapKey, StructInstance, StructType, TaskHandle, TaskStatus, Value,
};
use sable_core::{ops, Builtin};
use sable_parser::ast::{
    AssignOp, BinaryOp, CallArg, Expr, ExprKind, FunctionDef, LogicalOp, Program, Stmt, StmtKind,
    UnaryOp,
};
use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

/// Maximum call depth, matching the VM's limit.
const MAX_CALL_DEPTH: usize = 1000;

/// One `emit` record.
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    /// Event name.
    pub name: Rc<str>,
    /// Field values in declaration order.
    pub values: Vec<Value>,
}

/// An AST function closed over its defining environment.
struct ScriptFunction {
    def: Rc<FunctionDef>,
    env: EnvRef,
}

impl Callable for ScriptFunction {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn arity(&self) -> usize {
        self.def.params.len()
    }

    fn is_async(&self) -> bool {
        self.def.is_async
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("name", &self.def.name)
            .field("arity", &self.def.params.len())
            .finish()
    }
}

/// Statement-level control flow.
enum Flow {
    Normal(Value),
    Break,
    Continue,
    Return(Value),
}

/// The interpreter. Holds the global environment, so a REPL can feed it
/// one program fragment at a time.
pub struct Interpreter {
    globals: EnvRef,
    types: FxHashMap<Rc<str>, Rc<StructType>>,
    events: FxHashMap<Rc<str>, Rc<EventType>>,
    event_log: Vec<EmittedEvent>,
    out: Box<dyn Write>,
    depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Interpreter writing builtin output to stdout.
    pub fn new() -> Self {
        Self::with_output(std::io::stdout())
    }

    /// Interpreter writing builtin output to `out`.
    pub fn with_output<W: Write + 'static>(out: W) -> Self {
        Self {
            globals: Env::root(),
            types: FxHashMap::default(),
            events: FxHashMap::default(),
            event_log: Vec::new(),
            out: Box::new(out),
            depth: 0,
        }
    }

    /// Events emitted so far, in emission order.
    pub fn events(&self) -> &[EmittedEvent] {
        &self.event_log
    }

    /// Execute a program; the result is the last statement's value.
    pub fn run(&mut self, program: &Program) -> Result<Value, SableError> {
        // Pre-register types and events so declaration order is free, as
        // it is under the compiler's pre-scan.
        for stmt in &program.body {
            match &stmt.kind {
                StmtKind::StructDef(def) => {
                    self.types.insert(
                        def.name.clone(),
                        Rc::new(StructType {
                            name: def.name.clone(),
                            fields: def.fields.iter().map(|(n, _)| n.clone()).collect(),
                            field_types: def.fields.iter().map(|(_, t)| t.clone()).collect(),
                            is_contract: def.is_contract,
                        }),
                    );
                }
                StmtKind::EventDef(def) => {
                    self.events.insert(
                        def.name.clone(),
                        Rc::new(EventType {
                            name: def.name.clone(),
                            fields: def.fields.iter().map(|(n, _)| n.clone()).collect(),
                        }),
                    );
                }
                _ => {}
            }
        }

        let globals = self.globals.clone();
        let mut result = Value::Void;
        for stmt in &program.body {
            match self.exec_stmt(&globals, stmt).map_err(at_stmt(stmt))? {
                Flow::Normal(value) => result = value,
                Flow::Break | Flow::Continue => {
                    return Err(SableError::Runtime(Failure::new(
                        FailureKind::TypeMismatch,
                        "'break' or 'continue' outside loop",
                    )));
                }
                Flow::Return(_) => {
                    return Err(SableError::Runtime(Failure::new(
                        FailureKind::TypeMismatch,
                        "'return' outside function",
                    )));
                }
            }
        }
        Ok(result)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn exec_block(&mut self, env: &EnvRef, body: &[Stmt]) -> Result<Flow, Failure> {
        for stmt in body {
            match self.exec_stmt(env, stmt)? {
                Flow::Normal(_) => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal(Value::Void))
    }

    fn exec_stmt(&mut self, env: &EnvRef, stmt: &Stmt) -> Result<Flow, Failure> {
        match &stmt.kind {
            StmtKind::Expr(expr) => Ok(Flow::Normal(self.eval(env, expr)?)),
            StmtKind::Let {
                name,
                value,
                is_const,
                ..
            } => {
                let value = match value {
                    Some(value) => self.eval(env, value)?,
                    None => Value::Void,
                };
                env.borrow_mut().define(name.clone(), value, *is_const);
                Ok(Flow::Normal(Value::Void))
            }
            StmtKind::Assign { target, op, value } => {
                self.exec_assign(env, target, *op, value)?;
                Ok(Flow::Normal(Value::Void))
            }
            StmtKind::Function(def) => {
                let function = Value::Closure(Rc::new(ScriptFunction {
                    def: def.clone(),
                    env: env.clone(),
                }));
                env.borrow_mut().define(def.name.clone(), function, false);
                Ok(Flow::Normal(Value::Void))
            }
            // Registered in the pre-scan.
            StmtKind::StructDef(_) | StmtKind::EventDef(_) => Ok(Flow::Normal(Value::Void)),
            StmtKind::Emit { name, args } => {
                let Some(event) = self.events.get(name).cloned() else {
                    return Err(Failure::new(
                        FailureKind::UnknownName,
                        format!("unknown event '{name}'"),
                    ));
                };
                if event.fields.len() != args.len() {
                    return Err(Failure::new(
                        FailureKind::ArityMismatch,
                        format!(
                            "event '{name}' declares {} field(s), got {}",
                            event.fields.len(),
                            args.len()
                        ),
                    ));
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(env, arg)?);
                }
                self.event_log.push(EmittedEvent {
                    name: event.name.clone(),
                    values,
                });
                Ok(Flow::Normal(Value::Void))
            }
            StmtKind::If {
                test,
                body,
                elifs,
                orelse,
            } => {
                if ops::truthy(&self.eval(env, test)?) {
                    return self.exec_block(env, body);
                }
                for (elif_test, elif_body) in elifs {
                    if ops::truthy(&self.eval(env, elif_test)?) {
                        return self.exec_block(env, elif_body);
                    }
                }
                match orelse {
                    Some(orelse) => self.exec_block(env, orelse),
                    None => Ok(Flow::Normal(Value::Void)),
                }
            }
            StmtKind::While { test, body } => {
                while ops::truthy(&self.eval(env, test)?) {
                    match self.exec_block(env, body)? {
                        Flow::Normal(_) | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(Value::Void))
            }
            StmtKind::For {
                var,
                iterable,
                body,
            } => {
                // Index-stepped to match the VM's lowering exactly: the
                // length is re-read each iteration, so mutation of the
                // sequence during the loop is observable.
                let sequence = self.eval(env, iterable)?;
                let mut index: i64 = 0;
                loop {
                    let len = Builtin::Len.invoke(
                        std::slice::from_ref(&sequence),
                        &mut std::io::sink(),
                    )?;
                    if !ops::truthy(&ops::lt(&Value::Int(index), &len)?) {
                        break;
                    }
                    let item = ops::index_get(&sequence, &Value::Int(index))?;
                    env.borrow_mut().define(var.clone(), item, false);
                    match self.exec_block(env, body)? {
                        Flow::Normal(_) | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                    index += 1;
                }
                Ok(Flow::Normal(Value::Void))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(env, value)?,
                    None => Value::Void,
                };
                Ok(Flow::Return(value))
            }
        }
    }

    fn exec_assign(
        &mut self,
        env: &EnvRef,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
    ) -> Result<(), Failure> {
        match &target.kind {
            ExprKind::Name(name) => {
                let new_value = if op == AssignOp::Assign {
                    self.eval(env, value)?
                } else {
                    let current = Env::get(env, name).ok_or_else(|| {
                        Failure::new(
                            FailureKind::UnknownName,
                            format!("name '{name}' is not declared"),
                        )
                    })?;
                    let rhs = self.eval(env, value)?;
                    apply_compound(op, &current, &rhs)?
                };
                Env::assign(env, name, new_value)
            }
            ExprKind::Index { obj, index } => {
                let obj = self.eval(env, obj)?;
                let index = self.eval(env, index)?;
                let new_value = if op == AssignOp::Assign {
                    self.eval(env, value)?
                } else {
                    let current = ops::index_get(&obj, &index)?;
                    let rhs = self.eval(env, value)?;
                    apply_compound(op, &current, &rhs)?
                };
                ops::index_set(&obj, &index, new_value)
            }
            ExprKind::Field { obj, name } => {
                let obj = self.eval(env, obj)?;
                let new_value = if op == AssignOp::Assign {
                    self.eval(env, value)?
                } else {
                    let current = ops::field_get(&obj, name)?;
                    let rhs = self.eval(env, value)?;
                    apply_compound(op, &current, &rhs)?
                };
                ops::field_set(&obj, name, new_value)
            }
            _ => Err(Failure::new(
                FailureKind::TypeMismatch,
                "invalid assignment target",
            )),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn eval(&mut self, env: &EnvRef, expr: &Expr) -> Result<Value, Failure> {
        match &expr.kind {
            ExprKind::Int(value) => Ok(Value::Int(*value)),
            ExprKind::Float(value) => Ok(Value::Float(*value)),
            ExprKind::Str(value) => Ok(Value::Str(value.clone())),
            ExprKind::Bool(value) => Ok(Value::Bool(*value)),
            ExprKind::Void => Ok(Value::Void),
            ExprKind::List(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(env, element)?);
                }
                Ok(Value::list(items))
            }
            ExprKind::Map(pairs) => {
                let mut entries = FxHashMap::default();
                for (key, value) in pairs {
                    let key = MapKey::from_value(&self.eval(env, key)?)?;
                    let value = self.eval(env, value)?;
                    entries.insert(key, value);
                }
                Ok(Value::Map(Rc::new(RefCell::new(entries))))
            }
            ExprKind::Name(name) => self.lookup(env, name),
            ExprKind::Field { obj, name } => {
                let obj = self.eval(env, obj)?;
                ops::field_get(&obj, name)
            }
            ExprKind::Index { obj, index } => {
                let obj = self.eval(env, obj)?;
                let index = self.eval(env, index)?;
                ops::index_get(&obj, &index)
            }
            ExprKind::Call { callee, args } => self.eval_call(env, callee, args),
            ExprKind::Unary { op, operand } => {
                let operand = self.eval(env, operand)?;
                match op {
                    UnaryOp::Neg => ops::neg(&operand),
                    UnaryOp::Not => Ok(ops::not(&operand)),
                    UnaryOp::BitNot => ops::bit_not(&operand),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval(env, lhs)?;
                let rhs = self.eval(env, rhs)?;
                apply_binary(*op, &lhs, &rhs)
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let lhs = self.eval(env, lhs)?;
                // The short-circuited operand is the expression's value.
                match op {
                    LogicalOp::And if !ops::truthy(&lhs) => Ok(lhs),
                    LogicalOp::Or if ops::truthy(&lhs) => Ok(lhs),
                    _ => self.eval(env, rhs),
                }
            }
            ExprKind::Await(operand) => {
                let value = self.eval(env, operand)?;
                match value {
                    Value::Task(handle) => {
                        let status = (*handle.status()).clone();
                        match status {
                            TaskStatus::Completed(result) => Ok(result),
                            TaskStatus::Failed(failure) => Err(failure),
                            // Eager execution resolves every task before its
                            // handle escapes.
                            TaskStatus::Pending(_) => Err(Failure::new(
                                FailureKind::Deadlock,
                                "await on a pending task in the reference backend",
                            )),
                        }
                    }
                    other => Ok(other),
                }
            }
        }
    }

    fn lookup(&mut self, env: &EnvRef, name: &Rc<str>) -> Result<Value, Failure> {
        if let Some(value) = Env::get(env, name) {
            return Ok(value);
        }
        if let Some(builtin) = Builtin::lookup(name) {
            return Ok(Value::Builtin(builtin));
        }
        if self.types.contains_key(name) {
            return Err(Failure::new(
                FailureKind::UnknownName,
                format!("type '{name}' can only be constructed, not used as a value"),
            ));
        }
        Err(Failure::new(
            FailureKind::UnknownName,
            format!("name '{name}' is not declared"),
        ))
    }

    fn eval_call(
        &mut self,
        env: &EnvRef,
        callee: &Expr,
        args: &[CallArg],
    ) -> Result<Value, Failure> {
        // Construction: a callee naming a declared type, not shadowed by a
        // value binding.
        if let ExprKind::Name(name) = &callee.kind {
            if Env::get(env, name).is_none() {
                if let Some(ty) = self.types.get(name).cloned() {
                    return self.construct(env, &ty, args);
                }
            }
        }

        if args.iter().any(|a| a.name.is_some()) {
            return Err(Failure::new(
                FailureKind::TypeMismatch,
                "named arguments are only allowed when constructing a struct or contract",
            ));
        }

        let callee = self.eval(env, callee)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(env, &arg.value)?);
        }

        match callee {
            Value::Builtin(builtin) => builtin.invoke(&values, &mut *self.out),
            Value::Closure(callable) => {
                let Some(function) = callable.as_any().downcast_ref::<ScriptFunction>() else {
                    return Err(Failure::new(
                        FailureKind::NotCallable,
                        "cannot call a foreign function value",
                    ));
                };
                // The downcast borrows `callable`; clone the pieces the
                // call needs so `self` is free again.
                let def = function.def.clone();
                let closure_env = function.env.clone();
                self.call_function(&def, &closure_env, values)
            }
            other => Err(Failure::new(
                FailureKind::NotCallable,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    fn call_function(
        &mut self,
        def: &Rc<FunctionDef>,
        closure_env: &EnvRef,
        args: Vec<Value>,
    ) -> Result<Value, Failure> {
        if args.len() != def.params.len() {
            return Err(Failure::new(
                FailureKind::ArityMismatch,
                format!(
                    "{}() takes {} argument(s), got {}",
                    def.name,
                    def.params.len(),
                    args.len()
                ),
            ));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Failure::new(
                FailureKind::StackOverflow,
                format!("call depth exceeds {MAX_CALL_DEPTH}"),
            ));
        }

        let call_env = Env::child(closure_env);
        for (param, arg) in def.params.iter().zip(args) {
            call_env.borrow_mut().define(param.name.clone(), arg, false);
        }

        if def.is_async {
            // Eager task completion: run the body now, hand back a resolved
            // handle. `await` on it takes the zero-yield path.
            let result = self.run_body(def, &call_env);
            return Ok(Value::Task(match result {
                Ok(value) => TaskHandle::completed(value),
                Err(failure) => TaskHandle::failed(failure),
            }));
        }

        self.run_body(def, &call_env)
    }

    fn run_body(&mut self, def: &Rc<FunctionDef>, call_env: &EnvRef) -> Result<Value, Failure> {
        self.depth += 1;
        let flow = self.exec_block(call_env, &def.body);
        self.depth -= 1;
        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal(_) => Ok(Value::Void),
            Flow::Break | Flow::Continue => Err(Failure::new(
                FailureKind::TypeMismatch,
                "'break' or 'continue' outside loop",
            )),
        }
    }

    fn construct(
        &mut self,
        env: &EnvRef,
        ty: &Rc<StructType>,
        args: &[CallArg],
    ) -> Result<Value, Failure> {
        let any_named = args.iter().any(|a| a.name.is_some());
        let mut slots = Vec::with_capacity(ty.fields.len());

        if any_named {
            if args.iter().any(|a| a.name.is_none()) {
                return Err(Failure::new(
                    FailureKind::TypeMismatch,
                    format!("cannot mix named and positional values for '{}'", ty.name),
                ));
            }
            let mut provided: FxHashMap<&str, &Expr> = FxHashMap::default();
            for arg in args {
                let name = arg.name.as_deref().expect("named argument");
                if ty.field_slot(name).is_none() {
                    return Err(Failure::new(
                        FailureKind::UnknownField,
                        format!("'{}' has no field '{name}'", ty.name),
                    ));
                }
                if provided.insert(name, &arg.value).is_some() {
                    return Err(Failure::new(
                        FailureKind::TypeMismatch,
                        format!("field '{name}' given twice"),
                    ));
                }
            }
            // Declared order, matching the compiled form.
            for field in ty.fields.iter() {
                let Some(value) = provided.get(&**field) else {
                    return Err(Failure::new(
                        FailureKind::ArityMismatch,
                        format!("missing value for field '{field}' of '{}'", ty.name),
                    ));
                };
                slots.push(self.eval(env, value)?);
            }
        } else {
            if args.len() != ty.fields.len() {
                return Err(Failure::new(
                    FailureKind::ArityMismatch,
                    format!(
                        "'{}' declares {} field(s), got {}",
                        ty.name,
                        ty.fields.len(),
                        args.len()
                    ),
                ));
            }
            for arg in args {
                slots.push(self.eval(env, &arg.value)?);
            }
        }

        Ok(Value::Struct(Rc::new(StructInstance::new(
            ty.clone(),
            slots,
        ))))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Failure> {
    match op {
        BinaryOp::Add => ops::add(lhs, rhs),
        BinaryOp::Sub => ops::sub(lhs, rhs),
        BinaryOp::Mul => ops::mul(lhs, rhs),
        BinaryOp::Div => ops::div(lhs, rhs),
        BinaryOp::Mod => ops::rem(lhs, rhs),
        BinaryOp::Pow => ops::pow(lhs, rhs),
        BinaryOp::BitAnd => ops::bit_and(lhs, rhs),
        BinaryOp::BitOr => ops::bit_or(lhs, rhs),
        BinaryOp::BitXor => ops::bit_xor(lhs, rhs),
        BinaryOp::Shl => ops::shl(lhs, rhs),
        BinaryOp::Shr => ops::shr(lhs, rhs),
        BinaryOp::Eq => ops::eq(lhs, rhs),
        BinaryOp::Ne => ops::ne(lhs, rhs),
        BinaryOp::Lt => ops::lt(lhs, rhs),
        BinaryOp::Le => ops::le(lhs, rhs),
        BinaryOp::Gt => ops::gt(lhs, rhs),
        BinaryOp::Ge => ops::ge(lhs, rhs),
    }
}

fn apply_compound(op: AssignOp, current: &Value, rhs: &Value) -> Result<Value, Failure> {
    match op {
        AssignOp::Assign => unreachable!("plain assignment has no operator"),
        AssignOp::Add => ops::add(current, rhs),
        AssignOp::Sub => ops::sub(current, rhs),
        AssignOp::Mul => ops::mul(current, rhs),
        AssignOp::Div => ops::div(current, rhs),
    }
}

/// Attach the statement's source line to a failure that lacks one.
fn at_stmt(stmt: &Stmt) -> impl FnOnce(Failure) -> SableError + '_ {
    move |failure| SableError::Runtime(failure.at_line(stmt.span.line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_parser::parse;

    fn run(source: &str) -> Result<Value, SableError> {
        Interpreter::with_output(Vec::new()).run(&parse(source).unwrap())
    }

    fn run_ok(source: &str) -> Value {
        run(source).unwrap()
    }

    fn run_failure(source: &str) -> Failure {
        match run(source) {
            Err(SableError::Runtime(f)) => f,
            other => panic!("expected runtime failure, got {other:?}"),
        }
    }

    #[test]
    fn test_let_and_arithmetic() {
        assert!(matches!(run_ok("let x = 5; let y = x + 3; y"), Value::Int(8)));
    }

    #[test]
    fn test_recursive_factorial() {
        let source = "fn f(n) { if n == 0 { return 1 } return n * f(n - 1) }\nf(5)";
        assert!(matches!(run_ok(source), Value::Int(120)));
    }

    #[test]
    fn test_closure_shared_mutation() {
        let source = "fn counter() {\n let n = 0\n fn bump() { n = n + 1; return n }\n return bump\n}\nlet c = counter()\nc()\nc()\nc()";
        assert!(matches!(run_ok(source), Value::Int(3)));
    }

    #[test]
    fn test_overflow_failure() {
        let failure = run_failure(&format!("{} + 1", i64::MAX));
        assert_eq!(failure.kind, FailureKind::Overflow);
    }

    #[test]
    fn test_struct_roundtrip() {
        let source = "struct Point { x: int, y: int }\nlet p = Point(y: 2, x: 1)\np.y";
        assert!(matches!(run_ok(source), Value::Int(2)));
    }

    #[test]
    fn test_async_eager_completion() {
        let source = "async fn fetch() { return 7 }\nlet t = fetch()\nawait t";
        assert!(matches!(run_ok(source), Value::Int(7)));
    }

    #[test]
    fn test_await_failed_task_propagates() {
        let source = "async fn boom() { return 1 / 0 }\nawait boom()";
        let failure = run_failure(source);
        assert_eq!(failure.kind, FailureKind::DivisionByZero);
    }

    #[test]
    fn test_events_logged() {
        let mut interp = Interpreter::with_output(Vec::new());
        let program =
            parse("event Ping(n: int)\nemit Ping(1)\nemit Ping(2)").unwrap();
        interp.run(&program).unwrap();
        assert_eq!(interp.events().len(), 2);
        assert_eq!(&*interp.events()[1].name, "Ping");
        assert!(matches!(interp.events()[1].values[0], Value::Int(2)));
    }

    #[test]
    fn test_loop_mutating_its_sequence() {
        // The length is re-read per iteration, so appending extends it.
        let source = "let xs = [1, 2]\nlet n = 0\nfor x in xs {\n n += 1\n if n == 2 { push(xs, 9) }\n if n > 5 { break }\n}\nn";
        assert!(matches!(run_ok(source), Value::Int(3)));
    }

    #[test]
    fn test_failure_carries_line() {
        let failure = run_failure("let a = 1\nlet b = a / 0\nb");
        assert_eq!(failure.line, Some(2));
    }
}
