//! AST node types for the Flux language.

use crate::types::Type;

/// A complete Flux program: an ordered sequence of statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `let name: anno = value`; the annotation is optional.
    Let {
        name: String,
        anno: Option<Type>,
        value: Expr,
    },
    Expr(Expr),
}

/// Expressions.
///
/// A bare primary is represented as a `Binary` with no operator tail, which
/// is how the grammar produces it (`Binary := Primary (op Expr)?`).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `if cond then a else b`; both arms are required.
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    /// `fn(a: int, b) : int => body`
    Func {
        params: Vec<Param>,
        return_anno: Option<Type>,
        body: Box<Expr>,
    },
    /// A primary with at most one infix operator. The right operand is a
    /// full expression, so chains like `a - b - c` group to the right.
    Binary {
        left: Primary,
        tail: Option<(BinOp, Box<Expr>)>,
    },
    /// `{ e1 e2 ... }`; value is the last expression's value.
    Block(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub anno: Option<Type>,
}

/// A base atom followed by call/index postfixes applied left-to-right.
#[derive(Debug, Clone, PartialEq)]
pub struct Primary {
    pub base: Base,
    pub postfix: Vec<Postfix>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Base {
    Term(Term),
    /// `[e1, e2, …]`
    List(Vec<Expr>),
    /// `{k1: v1, k2: v2, …}`
    Dict(Vec<(Expr, Expr)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Postfix {
    /// `(arg1, arg2, …)`
    Call(Vec<Expr>),
    /// `[index]`
    Index(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Int(i64),
    Str(String),
    Bool(bool),
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Eq,
    Lt,
    Gt,
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Eq => "==",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
        };
        write!(f, "{s}")
    }
}

impl Expr {
    /// Convenience constructor for a postfix-free primary expression.
    pub fn primary(base: Base) -> Expr {
        Expr::Binary {
            left: Primary {
                base,
                postfix: Vec::new(),
            },
            tail: None,
        }
    }

    pub fn term(term: Term) -> Expr {
        Expr::primary(Base::Term(term))
    }
}
