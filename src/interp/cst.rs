//! The typed tree the evaluator walks.
//!
//! Produced by the typechecker from the AST. Every expression carries its
//! resolved type; calls carry the chosen declaration. Nothing in here is
//! reference counted: the CST lives exactly as long as one interpreter
//! run.

use crate::error::Location;
use crate::interp::ast::{BinaryOp, ComparisonOp, LogicalOp, ProcessingPhase, TreeBlockKind};
use crate::interp::ty::TypeId;
use crate::interp::value::Value;

/// A declaration id into the typechecker's arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DeclId(pub u32);

/// A builtin's native implementation.
pub type BuiltinFn = fn(
    &mut crate::interp::eval::Evaluator<'_>,
    Vec<Value>,
) -> Result<Value, crate::error::ErrorMessage>;

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: TypeId,
    pub default: Option<Expr>,
}

#[derive(Debug)]
pub struct Declaration {
    pub name: String,
    pub qualified_name: String,
    pub loc: Location,
    /// The declared entity's type: the variable type, or the function
    /// type for functions.
    pub ty: TypeId,
    pub kind: DeclKind,
}

#[derive(Debug)]
pub enum DeclKind {
    Var {
        mutable: bool,
        global: bool,
    },
    Func {
        params: Vec<Param>,
        ret: TypeId,
        /// The local declarations the parameters were bound to; set when
        /// the body is checked.
        param_decls: Vec<DeclId>,
        /// Checked after the signature is declared; absent for builtins.
        body: Option<Block>,
        builtin: Option<BuiltinFn>,
    },
    Struct {
        ty: TypeId,
        /// Parallel to the struct type's fields; carries the defaults.
        fields: Vec<Param>,
    },
    Union {
        ty: TypeId,
        cases: Vec<(String, Vec<Param>)>,
    },
    Enum {
        ty: TypeId,
        enumerators: Vec<(String, Value)>,
    },
}

impl Declaration {
    pub fn is_function(&self) -> bool {
        matches!(self.kind, DeclKind::Func { .. })
    }
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub ty: TypeId,
    pub loc: Location,
    pub kind: ExprKind,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    CharLit(char),
    StringLit(String),
    LengthLit(f64),
    NullLit,
    ArrayLit(Vec<Expr>),
    /// Fields arranged into declaration order, defaults already filled.
    StructLit(Vec<Expr>),
    /// `base // { … }`: a copy of `base` with some fields replaced.
    StructUpdate {
        base: Box<Expr>,
        updates: Vec<(usize, Expr)>,
    },
    UnionLit {
        case: usize,
        args: Vec<Expr>,
    },
    EnumeratorLit(usize),
    FString(Vec<Expr>),

    VarRef(DeclId),
    FuncRef(DeclId),

    Call {
        callee: DeclId,
        args: Vec<Expr>,
    },
    CallIndirect {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },

    Unary {
        op: crate::interp::ast::UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Comparison {
        first: Box<Expr>,
        rest: Vec<(ComparisonOp, Expr)>,
    },
    NullCoalesce {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },

    Field {
        base: Box<Expr>,
        index: usize,
        /// `?.`: the base is optional and the access short-circuits.
        through_optional: bool,
    },
    Subscript {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Deref(Box<Expr>),
    AddressOf {
        operand: Box<Expr>,
        mutable: bool,
    },
    Move(Box<Expr>),
    OptionalCheck(Box<Expr>),
    ForceUnwrap(Box<Expr>),
    /// Wraps a value into `?T`.
    MakeOptional(Box<Expr>),
    Cast {
        operand: Box<Expr>,
        to: TypeId,
    },
    TypeValue(TypeId),

    TreeInline(Vec<InlinePiece>),
    TreeBlock {
        kind: TreeBlockKind,
        children: Vec<InlinePiece>,
    },
    ScriptBlock {
        phase: ProcessingPhase,
        body: Block,
    },
}

#[derive(Clone, Debug)]
pub enum InlinePiece {
    Text(String),
    Script(Box<Expr>),
}

#[derive(Clone, Debug)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub loc: Location,
    pub kind: StmtKind,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Expr(Expr),
    Block(Block),
    Let {
        decl: DeclId,
        init: Option<Expr>,
    },
    If {
        cond: Expr,
        then_body: Block,
        else_body: Block,
    },
    While {
        cond: Expr,
        body: Block,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Expr>,
        body: Block,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    /// Scheduled for a later processing phase; carried through so the
    /// driver can run it at the right time.
    Hook {
        phase: ProcessingPhase,
        body: Box<Stmt>,
    },
}
