//! Allow-list of everything an expression may name
//!
//! Each list is a closed enum. The parser resolves names into these while
//! building the tree, so a tree that exists contains only allowed
//! operations. Anything else fails with `DisallowedOperation`.

use crate::error::EvalError;

/// Methods callable on columns, frames, rows and strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Sum,
    Mean,
    Count,
    Min,
    Max,
    Unique,
    Nunique,
    Tolist,
    Isin,
    Iterrows,
    Head,
    Join,
    Upper,
    Lower,
    Strip,
    Get,
}

impl Method {
    pub fn from_name(name: &str) -> Result<Self, EvalError> {
        Ok(match name {
            "sum" => Method::Sum,
            "mean" => Method::Mean,
            "count" => Method::Count,
            "min" => Method::Min,
            "max" => Method::Max,
            "unique" => Method::Unique,
            "nunique" => Method::Nunique,
            "tolist" => Method::Tolist,
            "isin" => Method::Isin,
            "iterrows" => Method::Iterrows,
            "head" => Method::Head,
            "join" => Method::Join,
            "upper" => Method::Upper,
            "lower" => Method::Lower,
            "strip" => Method::Strip,
            "get" => Method::Get,
            other => return Err(EvalError::disallowed(other)),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Sum => "sum",
            Method::Mean => "mean",
            Method::Count => "count",
            Method::Min => "min",
            Method::Max => "max",
            Method::Unique => "unique",
            Method::Nunique => "nunique",
            Method::Tolist => "tolist",
            Method::Isin => "isin",
            Method::Iterrows => "iterrows",
            Method::Head => "head",
            Method::Join => "join",
            Method::Upper => "upper",
            Method::Lower => "lower",
            Method::Strip => "strip",
            Method::Get => "get",
        }
    }
}

/// Free functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Sum,
    Min,
    Max,
    Round,
    Abs,
    Int,
    Float,
    Str,
    Sorted,
    List,
}

impl Builtin {
    pub fn from_name(name: &str) -> Result<Self, EvalError> {
        Ok(match name {
            "len" => Builtin::Len,
            "sum" => Builtin::Sum,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "round" => Builtin::Round,
            "abs" => Builtin::Abs,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "str" => Builtin::Str,
            "sorted" => Builtin::Sorted,
            "list" => Builtin::List,
            other => return Err(EvalError::disallowed(other)),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Sum => "sum",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Round => "round",
            Builtin::Abs => "abs",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Sorted => "sorted",
            Builtin::List => "list",
        }
    }
}

/// Non-call attribute accesses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// Positional row indexer: `df.iloc[0]`
    Iloc,
    /// Whether a frame or column has no rows
    Empty,
}

impl Attribute {
    pub fn from_name(name: &str) -> Result<Self, EvalError> {
        match name {
            "iloc" => Ok(Attribute::Iloc),
            "empty" => Ok(Attribute::Empty),
            other => Err(EvalError::disallowed(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Iloc => "iloc",
            Attribute::Empty => "empty",
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    /// `and`, short-circuit on truthiness
    And,
    /// `or`, short-circuit on truthiness
    Or,
    /// `&`, elementwise on masks
    BitAnd,
    /// `|`, elementwise on masks
    BitOr,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Pos,
    /// `not x`
    Not,
    /// `~mask`, elementwise
    Invert,
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Pos => write!(f, "+"),
            UnaryOp::Not => write!(f, "not"),
            UnaryOp::Invert => write!(f, "~"),
        }
    }
}

/// Operator spellings that are recognized but never allowed
pub const DISALLOWED_OPERATORS: &[&str] = &["**", "//", "%", "<<", ">>", "^", "@", ":=", "=", ";"];

/// Keywords that would step outside expression evaluation
pub const DISALLOWED_KEYWORDS: &[&str] = &[
    "lambda", "import", "from", "def", "class", "del", "global", "nonlocal", "exec", "eval",
    "yield", "await", "async", "assert", "with", "is", "while", "return", "raise", "try",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_round_trip_names() {
        for name in ["sum", "mean", "unique", "iterrows", "join", "isin"] {
            assert_eq!(Method::from_name(name).unwrap().name(), name);
        }
    }

    #[test]
    fn test_dunder_and_unknown_names_are_rejected() {
        assert_eq!(
            Method::from_name("__class__"),
            Err(EvalError::DisallowedOperation("__class__".to_string()))
        );
        assert!(Method::from_name("to_csv").is_err());
        assert!(Method::from_name("drop").is_err());
        assert!(Builtin::from_name("open").is_err());
        assert!(Builtin::from_name("__import__").is_err());
        assert!(Attribute::from_name("__dict__").is_err());
    }

    #[test]
    fn test_builtins() {
        assert_eq!(Builtin::from_name("len"), Ok(Builtin::Len));
        assert_eq!(Builtin::Sorted.name(), "sorted");
    }
}
