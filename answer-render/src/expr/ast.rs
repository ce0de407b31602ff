//! Parse tree for rich directive expressions

use rust_decimal::Decimal;

use super::allow::{Attribute, BinaryOp, Builtin, Method, UnaryOp};
use crate::directive::SimpleDirective;
use crate::render::format::FormatSpec;

/// Literal constants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Str(String),
    Num(Decimal),
    Bool(bool),
    None,
}

/// One piece of an f-string literal
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    /// Text copied as-is (escapes already resolved)
    Literal(String),
    /// An interpolated expression with its optional format specifier
    Expr { expr: Expr, spec: Option<FormatSpec> },
    /// A `function(column)` interpolation, resolved like a top-level directive
    Simple {
        directive: SimpleDirective,
        spec: Option<FormatSpec>,
    },
}

/// Expression node
///
/// Every method, builtin and attribute is an allow-list variant, so the
/// walker matches exhaustively over a closed set.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),

    /// `f"...{expr}..."`
    FString(Vec<FStringPart>),

    /// A name bound in scope: `df` or a comprehension target
    Name(String),

    /// `[a, b, c]`
    List(Vec<Expr>),

    /// `(a, b)`
    Tuple(Vec<Expr>),

    /// `[element for targets in iter if condition]`, also generator form
    Comprehension {
        element: Box<Expr>,
        targets: Vec<String>,
        iter: Box<Expr>,
        condition: Option<Box<Expr>>,
    },

    /// `target[index]`
    Subscript { target: Box<Expr>, index: Box<Expr> },

    /// `target.attr`
    Attribute { target: Box<Expr>, attr: Attribute },

    /// `target.method(args)`
    MethodCall {
        target: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },

    /// `builtin(args)`
    Call { function: Builtin, args: Vec<Expr> },

    Unary { op: UnaryOp, operand: Box<Expr> },

    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// `then_expr if condition else else_expr`
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
}

impl Expr {
    /// Create a string literal
    pub fn string(s: impl Into<String>) -> Self {
        Expr::Literal(Literal::Str(s.into()))
    }

    /// Create a numeric literal
    pub fn number(n: impl Into<Decimal>) -> Self {
        Expr::Literal(Literal::Num(n.into()))
    }

    /// Create a name reference
    pub fn name(s: impl Into<String>) -> Self {
        Expr::Name(s.into())
    }

    /// Create a subscript
    pub fn subscript(target: Expr, index: Expr) -> Self {
        Expr::Subscript {
            target: Box::new(target),
            index: Box::new(index),
        }
    }

    /// Create a method call
    pub fn method(target: Expr, method: Method, args: Vec<Expr>) -> Self {
        Expr::MethodCall {
            target: Box::new(target),
            method,
            args,
        }
    }

    /// Create a binary operation
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Column names this expression selects with a string subscript
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        collect_columns(self, &mut columns);
        columns
    }
}

/// Collect string subscripts recursively
fn collect_columns<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Literal(_) | Expr::Name(_) => {}
        Expr::FString(parts) => {
            for part in parts {
                match part {
                    FStringPart::Literal(_) => {}
                    FStringPart::Expr { expr, .. } => collect_columns(expr, out),
                    FStringPart::Simple { directive, .. } => {
                        let column = directive.column.as_str();
                        if !out.contains(&column) {
                            out.push(column);
                        }
                    }
                }
            }
        }
        Expr::List(items) | Expr::Tuple(items) | Expr::Call { args: items, .. } => {
            for item in items {
                collect_columns(item, out);
            }
        }
        Expr::Comprehension {
            element,
            iter,
            condition,
            ..
        } => {
            collect_columns(element, out);
            collect_columns(iter, out);
            if let Some(cond) = condition {
                collect_columns(cond, out);
            }
        }
        Expr::Subscript { target, index } => {
            collect_columns(target, out);
            match index.as_ref() {
                Expr::Literal(Literal::Str(column)) => {
                    let column = column.as_str();
                    if !out.contains(&column) {
                        out.push(column);
                    }
                }
                other => collect_columns(other, out),
            }
        }
        Expr::Attribute { target, .. } => collect_columns(target, out),
        Expr::MethodCall { target, args, .. } => {
            collect_columns(target, out);
            for arg in args {
                collect_columns(arg, out);
            }
        }
        Expr::Unary { operand, .. } => collect_columns(operand, out),
        Expr::Binary { left, right, .. } => {
            collect_columns(left, out);
            collect_columns(right, out);
        }
        Expr::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            collect_columns(condition, out);
            collect_columns(then_expr, out);
            collect_columns(else_expr, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referenced_columns() {
        // df[df['curr_cd'] == 'KRW']['bal'].sum()
        let mask = Expr::binary(
            Expr::subscript(Expr::name("df"), Expr::string("curr_cd")),
            BinaryOp::Eq,
            Expr::string("KRW"),
        );
        let expr = Expr::method(
            Expr::subscript(Expr::subscript(Expr::name("df"), mask), Expr::string("bal")),
            Method::Sum,
            vec![],
        );
        assert_eq!(expr.referenced_columns(), vec!["curr_cd", "bal"]);
    }
}
