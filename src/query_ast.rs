use std::fmt;

/// Query language AST. Produced by the parser, consumed by the evaluator;
/// `Display` renders a canonical form that re-parses to the same tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Binary {
        op: BinaryOp,
        left: Box<AstNode>,
        right: Box<AstNode>,
    },
    Compare {
        op: CompareOp,
        field: String,
        value: LiteralValue,
    },
    Call {
        func: FunctionOp,
        field: String,
        arg: FunctionArg,
    },
    Not {
        inner: Box<AstNode>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionOp {
    Contains,
    StartsWith,
    EndsWith,
    Matches,
}

impl FunctionOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionOp::Contains => "contains",
            FunctionOp::StartsWith => "startsWith",
            FunctionOp::EndsWith => "endsWith",
            FunctionOp::Matches => "matches",
        }
    }

    pub fn from_ident(ident: &str) -> Option<FunctionOp> {
        match ident.to_lowercase().as_str() {
            "contains" => Some(FunctionOp::Contains),
            "startswith" => Some(FunctionOp::StartsWith),
            "endswith" => Some(FunctionOp::EndsWith),
            "matches" => Some(FunctionOp::Matches),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegexLiteral {
    pub pattern: String,
    pub flags: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArg {
    Literal(LiteralValue),
    Regex(RegexLiteral),
}

/// Resolve field aliases so the evaluator only ever sees canonical names.
pub fn canonical_field(field: &str) -> String {
    match field {
        "msg" | "line" | "log" => "message".to_string(),
        "time" | "ts" => "timestamp".to_string(),
        other => other.to_string(),
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstNode::Binary { op, left, right } => {
                let word = match op {
                    BinaryOp::And => "AND",
                    BinaryOp::Or => "OR",
                };
                write!(f, "({left} {word} {right})")
            }
            AstNode::Compare { op, field, value } => {
                write!(f, "{field} {} {value}", op.as_str())
            }
            AstNode::Call { func, field, arg } => {
                write!(f, "{}({field}, {arg})", func.as_str())
            }
            AstNode::Not { inner } => write!(f, "NOT {inner}"),
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Str(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            LiteralValue::Num(n) => write!(f, "{n}"),
            LiteralValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl fmt::Display for FunctionArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionArg::Literal(v) => v.fmt(f),
            FunctionArg::Regex(r) => write!(f, "/{}/{}", r.pattern, r.flags),
        }
    }
}
