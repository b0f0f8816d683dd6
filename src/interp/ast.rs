//! The abstract syntax tree produced by the parser.
//!
//! Nodes carry their source location; name resolution happens later, when
//! the typechecker lowers this tree into the typed CST.

use crate::error::Location;

/// A `::`-separated, possibly absolute name.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct QualifiedId {
    pub absolute: bool,
    pub parents: Vec<String>,
    pub name: String,
}

impl QualifiedId {
    pub fn plain(name: impl Into<String>) -> Self {
        QualifiedId {
            absolute: false,
            parents: Vec::new(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.absolute {
            write!(f, "::")?;
        }
        for parent in &self.parents {
            write!(f, "{}::", parent)?;
        }
        write!(f, "{}", self.name)
    }
}

/// A type as written in the source.
#[derive(Clone, Debug)]
pub enum TypeExpr {
    Named(QualifiedId),
    Array(Box<TypeExpr>, /* variadic */ bool),
    Pointer(Box<TypeExpr>, /* mutable */ bool),
    Optional(Box<TypeExpr>),
    Function(Vec<TypeExpr>, Box<TypeExpr>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Negate,
    Not,
}

/// Units accepted on length literals.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LengthUnit {
    Millimetres,
    Centimetres,
    Points,
    Picas,
    Inches,
    Em,
    Ex,
}

impl LengthUnit {
    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "mm" => LengthUnit::Millimetres,
            "cm" => LengthUnit::Centimetres,
            "pt" => LengthUnit::Points,
            "pc" => LengthUnit::Picas,
            "in" => LengthUnit::Inches,
            "em" => LengthUnit::Em,
            "ex" => LengthUnit::Ex,
            _ => return None,
        })
    }

    /// The factor to points; em/ex are resolved against the font size at
    /// evaluation time and stay symbolic until then.
    pub fn to_points(self) -> Option<f64> {
        Some(match self {
            LengthUnit::Millimetres => 72.0 / 25.4,
            LengthUnit::Centimetres => 72.0 / 2.54,
            LengthUnit::Points => 1.0,
            LengthUnit::Picas => 12.0,
            LengthUnit::Inches => 72.0,
            LengthUnit::Em | LengthUnit::Ex => return None,
        })
    }
}

/// One piece of an f-string.
#[derive(Clone, Debug)]
pub enum FStringPart {
    Text(String),
    Interpolation(Box<Expr>),
}

/// A function-call argument, possibly named.
#[derive(Clone, Debug)]
pub struct CallArg {
    pub name: Option<String>,
    pub value: Expr,
}

/// A struct-literal field initializer, possibly positional.
#[derive(Clone, Debug)]
pub struct StructLitField {
    pub name: Option<String>,
    pub value: Expr,
}

/// The inline/block tree-expression forms.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TreeBlockKind {
    Line,
    Paragraph,
    Box,
    VBox,
    HBox,
    ZBox,
}

impl TreeBlockKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "line" => TreeBlockKind::Line,
            "para" => TreeBlockKind::Paragraph,
            "box" => TreeBlockKind::Box,
            "vbox" => TreeBlockKind::VBox,
            "hbox" => TreeBlockKind::HBox,
            "zbox" => TreeBlockKind::ZBox,
            _ => return None,
        })
    }
}

/// The phases a `\script` block can be scheduled in.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ProcessingPhase {
    #[default]
    Layout,
    Position,
    Finalise,
}

#[derive(Clone, Debug)]
pub struct Expr {
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
    NullLit,
    LengthLit(f64, LengthUnit),
    ArrayLit(Vec<Expr>),
    FString(Vec<FStringPart>),

    Ident(QualifiedId),
    /// `.name`: resolved against the contextual type.
    ContextIdent(String),
    /// `.Case(args…)`: a union-variant literal.
    UnionLit {
        case: String,
        args: Vec<CallArg>,
    },
    StructLit {
        /// Empty for the anonymous form `{ … }`.
        name: Option<QualifiedId>,
        fields: Vec<StructLitField>,
    },
    /// `lhs // { … }`: struct update.
    StructUpdate {
        base: Box<Expr>,
        updates: Vec<StructLitField>,
    },

    Call {
        callee: Box<Expr>,
        args: Vec<CallArg>,
        /// Set when rewritten from `a.f(x)`; the first argument then
        /// receives an implicit pointer.
        rewritten_ufcs: bool,
    },
    DotOp {
        base: Box<Expr>,
        field: String,
        optional: bool,
    },
    Subscript {
        base: Box<Expr>,
        index: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
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
    /// Chained n-ary comparison: `a < b <= c`.
    Comparison {
        first: Box<Expr>,
        rest: Vec<(ComparisonOp, Expr)>,
    },
    NullCoalesce {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Postfix `?`.
    OptionalCheck(Box<Expr>),
    /// Postfix `!`.
    ForceUnwrap(Box<Expr>),

    Deref(Box<Expr>),
    AddressOf {
        operand: Box<Expr>,
        mutable: bool,
    },
    /// Prefix `*`: an explicit move out of an lvalue.
    Move(Box<Expr>),
    /// `...expr` in an argument list.
    ArraySpread(Box<Expr>),

    /// `target = value` and the compound forms.
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },

    Cast {
        operand: Box<Expr>,
        target: CastTarget,
    },
    /// `$Type`.
    TypeExpr(TypeExpr),

    /// `\script{…}`: statements evaluated at a given processing phase.
    ScriptBlock {
        phase: ProcessingPhase,
        body: Vec<Stmt>,
    },

    /// `\{…}`: a sequence of inline objects.
    TreeInline(Vec<InlineObjectNode>),
    /// `\line{…}`, `\box{…}` and friends.
    TreeBlock {
        kind: TreeBlockKind,
        children: Vec<InlineObjectNode>,
    },
}

#[derive(Clone, Debug)]
pub enum CastTarget {
    Type(TypeExpr),
    /// `cast(x, .Variant)`.
    Variant(String),
}

/// The content inside a tree expression: words or nested script.
#[derive(Clone, Debug)]
pub enum InlineObjectNode {
    Text(String),
    /// `\script{…}` or an interpolated call.
    Script {
        phase: ProcessingPhase,
        body: Box<Expr>,
    },
}

#[derive(Clone, Debug)]
pub struct Param {
    pub loc: Location,
    pub name: String,
    pub ty: TypeExpr,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub loc: Location,
    pub kind: StmtKind,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Expr(Expr),
    Block(Vec<Stmt>),
    VarDecl {
        name: String,
        mutable: bool,
        ty: Option<TypeExpr>,
        init: Option<Expr>,
    },
    FuncDecl {
        name: String,
        params: Vec<Param>,
        return_ty: Option<TypeExpr>,
        body: Vec<Stmt>,
    },
    StructDecl {
        name: String,
        fields: Vec<Param>,
    },
    UnionDecl {
        name: String,
        cases: Vec<(String, Vec<Param>)>,
    },
    EnumDecl {
        name: String,
        elem_ty: Option<TypeExpr>,
        enumerators: Vec<(String, Option<Expr>)>,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Expr>,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Import(String),
    Using {
        target: QualifiedId,
        alias: Option<String>,
    },
    Namespace {
        name: String,
        body: Vec<Stmt>,
    },
    /// A document-mutation hook; only its scheduling phase matters here.
    Hook {
        phase: ProcessingPhase,
        body: Box<Stmt>,
    },
}

/// The top level of a source file: preamble statements, then (when
/// `\start_document` appeared) the document body.
#[derive(Clone, Debug)]
pub struct Document {
    pub preamble: Vec<Stmt>,
    pub has_document: bool,
    pub body: Vec<DocumentPiece>,
}

/// One piece of document top-level content.
#[derive(Clone, Debug)]
pub enum DocumentPiece {
    Text(String),
    ParagraphBreak,
    Raw(String),
    /// An inline `\…` call or `\script{…}` block.
    Script(Expr),
}
