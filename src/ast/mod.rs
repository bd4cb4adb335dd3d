pub mod printer;

use serde::Serialize;

use crate::scanner::token::Span;

/// Identity of an expression node. The resolver keys its scope-distance
/// annotations on this, so ids must be unique within one program.
pub type ExprId = usize;

/// A parsed program: top-level statements in source order.
#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// A statement node: the source span plus the variant payload.
#[derive(Debug, Clone, Serialize)]
pub struct Stmt {
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, Serialize)]
pub enum StmtKind {
    Block {
        body: Vec<Stmt>,
    },
    Class {
        name: String,
        superclass: Option<String>,
        methods: Vec<Function>,
    },
    Expression {
        expr: Expr,
    },
    Function(Function),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    Print {
        expr: Expr,
    },
    Return {
        value: Option<Expr>,
    },
    Var {
        name: String,
        initializer: Option<Expr>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
}

/// A named function with its parameter list and body, shared between `fun`
/// statements and class method tables.
#[derive(Debug, Clone, Serialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// An expression node: identity, source span, and the variant payload.
#[derive(Debug, Clone, Serialize)]
pub struct Expr {
    pub id: ExprId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, Serialize)]
pub enum ExprKind {
    Assign {
        name: String,
        value: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Get {
        object: Box<Expr>,
        name: String,
    },
    Grouping {
        inner: Box<Expr>,
    },
    Literal {
        value: Lit,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Set {
        object: Box<Expr>,
        name: String,
        value: Box<Expr>,
    },
    Super {
        method: String,
    },
    This,
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Variable {
        name: String,
    },
}

/// A literal value as it appears in source.
#[derive(Debug, Clone, Serialize)]
pub enum Lit {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Negate,
    #[strum(serialize = "!")]
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
}
