//! Abstract syntax tree.
//!
//! Nodes are kind + span pairs. Function and type declarations are wrapped
//! in `Rc` so the tree-walking backend can hold onto them from closure
//! values without cloning bodies.

use sable_core::Span;
use std::rc::Rc;

/// A parsed compilation unit.
#[derive(Debug, Clone)]
pub struct Program {
    /// Top-level statements.
    pub body: Vec<Stmt>,
}

// =============================================================================
// Statements
// =============================================================================

/// A statement node.
#[derive(Debug, Clone)]
pub struct Stmt {
    /// The statement kind.
    pub kind: StmtKind,
    /// Source span.
    pub span: Span,
}

/// Statement kinds.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Expression statement.
    Expr(Expr),
    /// `let name = value` / `const name = value`.
    Let {
        /// Bound name.
        name: Rc<str>,
        /// Optional type annotation (informational).
        ty: Option<Rc<str>>,
        /// Initializer; `void` when absent.
        value: Option<Expr>,
        /// True for `const`.
        is_const: bool,
    },
    /// Assignment to a name, index or field target.
    Assign {
        /// Target expression (`Name`, `Index` or `Field`).
        target: Expr,
        /// `=` or a compound operator.
        op: AssignOp,
        /// Right-hand side.
        value: Expr,
    },
    /// `fn` / `async fn` declaration.
    Function(Rc<FunctionDef>),
    /// `struct` / `contract` declaration.
    StructDef(Rc<StructDef>),
    /// `event` declaration.
    EventDef(Rc<EventDef>),
    /// `emit Name(args)`.
    Emit {
        /// Event name.
        name: Rc<str>,
        /// Field values, positional in declaration order.
        args: Vec<Expr>,
    },
    /// `if` / `elif` / `else`.
    If {
        /// Condition.
        test: Expr,
        /// `if` body.
        body: Vec<Stmt>,
        /// `elif` arms in order.
        elifs: Vec<(Expr, Vec<Stmt>)>,
        /// `else` body.
        orelse: Option<Vec<Stmt>>,
    },
    /// `while` loop.
    While {
        /// Condition.
        test: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// `for var in iterable` loop.
    For {
        /// Loop variable.
        var: Rc<str>,
        /// Iterated expression.
        iterable: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// `break`.
    Break,
    /// `continue`.
    Continue,
    /// `return` with optional value.
    Return(Option<Expr>),
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
}

/// A function declaration.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    /// Function name.
    pub name: Rc<str>,
    /// Parameters in order.
    pub params: Vec<Param>,
    /// Optional return type annotation (informational).
    pub return_ty: Option<Rc<str>>,
    /// Body statements.
    pub body: Vec<Stmt>,
    /// True for `async fn`.
    pub is_async: bool,
    /// Span of the declaration header.
    pub span: Span,
}

/// A function parameter.
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name.
    pub name: Rc<str>,
    /// Optional type annotation (informational).
    pub ty: Option<Rc<str>>,
}

/// A `struct` or `contract` declaration.
#[derive(Debug, Clone)]
pub struct StructDef {
    /// Type name.
    pub name: Rc<str>,
    /// `(field name, type annotation)` pairs in declaration order.
    pub fields: Vec<(Rc<str>, Rc<str>)>,
    /// True for `contract`.
    pub is_contract: bool,
    /// Span of the declaration header.
    pub span: Span,
}

/// An `event` declaration.
#[derive(Debug, Clone)]
pub struct EventDef {
    /// Event name.
    pub name: Rc<str>,
    /// `(field name, type annotation)` pairs in declaration order.
    pub fields: Vec<(Rc<str>, Rc<str>)>,
    /// Span of the declaration header.
    pub span: Span,
}

// =============================================================================
// Expressions
// =============================================================================

/// An expression node.
#[derive(Debug, Clone)]
pub struct Expr {
    /// The expression kind.
    pub kind: ExprKind,
    /// Source span.
    pub span: Span,
}

/// Expression kinds.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    Str(Rc<str>),
    /// Boolean literal.
    Bool(bool),
    /// `void` literal.
    Void,
    /// List literal.
    List(Vec<Expr>),
    /// Map literal; bare identifier keys become string keys.
    Map(Vec<(Expr, Expr)>),
    /// Name reference.
    Name(Rc<str>),
    /// `obj.field`.
    Field {
        /// Receiver.
        obj: Box<Expr>,
        /// Field name.
        name: Rc<str>,
    },
    /// `obj[index]`.
    Index {
        /// Receiver.
        obj: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// Call with positional and/or named arguments.
    Call {
        /// Callee expression.
        callee: Box<Expr>,
        /// Arguments.
        args: Vec<CallArg>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Binary operation (arithmetic, bitwise, comparison).
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Short-circuit `and` / `or`.
    Logical {
        /// Operator.
        op: LogicalOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `await operand`.
    Await(Box<Expr>),
}

/// One call argument, optionally named (struct construction only).
#[derive(Debug, Clone)]
pub struct CallArg {
    /// Field name for `name: value` arguments.
    pub name: Option<Rc<str>>,
    /// Argument value.
    pub value: Expr,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `not`
    Not,
    /// `~`
    BitNot,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Short-circuit operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `and`
    And,
    /// `or`
    Or,
}
