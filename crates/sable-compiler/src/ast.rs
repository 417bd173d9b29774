//! Input syntax tree.
//!
//! The compiler consumes an already-parsed tree in the shape produced by
//! JavaScript-style parsers: expression statements, C-like control flow,
//! `var`/`static` declarations and function declarations. Every node carries
//! a source line so errors and debug line info can point back at the script.

use serde::{Deserialize, Serialize};

/// A whole parsed script: the top-level statement list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub body: Vec<Stmt>,
}

/// Declared storage type of a `var`/`static` declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    Int,
    Fixed,
    Str,
    Array,
}

/// One `name = init` declarator inside a declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// One `case`/`default` arm; `test` is `None` for the default arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// `for` loop initializer: either a declaration or a plain expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ForInit {
    VarDecl {
        kind: VarKind,
        declarators: Vec<Declarator>,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    Expression(Expr),
    Block(Vec<Stmt>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    FunctionDecl(FunctionDecl),
    VarDecl {
        kind: VarKind,
        declarators: Vec<Declarator>,
    },
    StaticDecl {
        kind: VarKind,
        declarators: Vec<Declarator>,
    },
    /// Marker emitted by source concatenation; switches the file recorded
    /// in debug line info.
    SourceFile(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub line: u32,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    Identifier(String),
    Literal(Literal),
    /// Array literal; only valid as a declarator initializer.
    Array(Vec<Expr>),
    Unary {
        op: UnaryOp,
        argument: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        argument: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assignment {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        access: MemberAccess,
    },
}

/// The three member-access shapes: `a[i]`, `a.b` and `A::b`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MemberAccess {
    Computed(Box<Expr>),
    Attribute(String),
    Namespace(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i32),
    Fixed(f32),
    Str(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Minus,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    LShift,
    RShift,
    BitAnd,
    BitOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LShift,
    RShift,
    BitOr,
    BitAnd,
}

impl Expr {
    pub fn identifier(line: u32, name: impl Into<String>) -> Self {
        Self {
            line,
            kind: ExprKind::Identifier(name.into()),
        }
    }

    pub fn int(line: u32, value: i32) -> Self {
        Self {
            line,
            kind: ExprKind::Literal(Literal::Int(value)),
        }
    }

    pub fn fixed(line: u32, value: f32) -> Self {
        Self {
            line,
            kind: ExprKind::Literal(Literal::Fixed(value)),
        }
    }

    pub fn string(line: u32, value: impl Into<String>) -> Self {
        Self {
            line,
            kind: ExprKind::Literal(Literal::Str(value.into())),
        }
    }

    pub fn array(line: u32, elements: Vec<Expr>) -> Self {
        Self {
            line,
            kind: ExprKind::Array(elements),
        }
    }

    pub fn binary(line: u32, op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self {
            line,
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }

    pub fn assign(line: u32, target: Expr, value: Expr) -> Self {
        Self {
            line,
            kind: ExprKind::Assignment {
                op: AssignOp::Assign,
                target: Box::new(target),
                value: Box::new(value),
            },
        }
    }

    pub fn call(line: u32, callee: Expr, arguments: Vec<Expr>) -> Self {
        Self {
            line,
            kind: ExprKind::Call {
                callee: Box::new(callee),
                arguments,
            },
        }
    }
}

impl Stmt {
    pub fn expression(line: u32, expr: Expr) -> Self {
        Self {
            line,
            kind: StmtKind::Expression(expr),
        }
    }

    pub fn var(line: u32, kind: VarKind, name: impl Into<String>, init: Option<Expr>) -> Self {
        Self {
            line,
            kind: StmtKind::VarDecl {
                kind,
                declarators: vec![Declarator {
                    name: name.into(),
                    init,
                }],
            },
        }
    }

    pub fn function(
        line: u32,
        name: impl Into<String>,
        params: Vec<String>,
        body: Vec<Stmt>,
    ) -> Self {
        Self {
            line,
            kind: StmtKind::FunctionDecl(FunctionDecl {
                name: name.into(),
                params,
                body,
            }),
        }
    }

    pub fn ret(line: u32, argument: Option<Expr>) -> Self {
        Self {
            line,
            kind: StmtKind::Return(argument),
        }
    }
}
