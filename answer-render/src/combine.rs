//! Combining already-computed results into a derived metric
//!
//! `combine("inflow - outflow", &operands)` folds named decimal results
//! strictly left to right. There is no operator precedence here:
//! `A + B * C` is `(A + B) * C`. Parenthesized text is not evaluated; it is
//! looked up verbatim so a caller can resolve it first and pass it back in.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::EvalError;

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(ArithOp::Add),
            '-' => Some(ArithOp::Sub),
            '*' => Some(ArithOp::Mul),
            '/' => Some(ArithOp::Div),
            _ => None,
        }
    }

    /// Apply the operator to the running total
    pub fn apply(self, left: Decimal, right: Decimal) -> Result<Decimal, EvalError> {
        let result = match self {
            ArithOp::Add => left.checked_add(right),
            ArithOp::Sub => left.checked_sub(right),
            ArithOp::Mul => left.checked_mul(right),
            ArithOp::Div => {
                if right.is_zero() {
                    return Err(EvalError::arithmetic("division by zero"));
                }
                left.checked_div(right)
            }
        };
        result.ok_or_else(|| EvalError::arithmetic(format!("overflow in {} {} {}", left, self, right)))
    }
}

impl std::fmt::Display for ArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArithOp::Add => write!(f, "+"),
            ArithOp::Sub => write!(f, "-"),
            ArithOp::Mul => write!(f, "*"),
            ArithOp::Div => write!(f, "/"),
        }
    }
}

/// One operand and the operator that precedes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArithToken {
    /// Trimmed operand text (parenthesized groups kept verbatim)
    pub operand: String,
    /// `None` for the first operand
    pub op: Option<ArithOp>,
}

/// Characters that look like operators but are not supported
const UNSUPPORTED_OPERATORS: &[char] = &['%', '^', '=', '<', '>', '&', '|', '!', '@'];

/// Split a flat expression into operands at parenthesis depth 0
pub fn split_operands(expression: &str) -> Result<Vec<ArithToken>, EvalError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut pending: Option<ArithOp> = None;
    let mut depth: usize = 0;

    for c in expression.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                if depth == 0 {
                    return Err(EvalError::malformed(format!(
                        "unbalanced ')' in '{}'",
                        expression
                    )));
                }
                depth -= 1;
                current.push(c);
            }
            _ if depth == 0 => {
                if let Some(op) = ArithOp::from_char(c) {
                    tokens.push(ArithToken {
                        operand: current.trim().to_string(),
                        op: pending,
                    });
                    current.clear();
                    pending = Some(op);
                } else if UNSUPPORTED_OPERATORS.contains(&c) {
                    return Err(EvalError::UnknownOperator(c.to_string()));
                } else {
                    current.push(c);
                }
            }
            _ => current.push(c),
        }
    }

    if depth != 0 {
        return Err(EvalError::malformed(format!(
            "unbalanced '(' in '{}'",
            expression
        )));
    }

    tokens.push(ArithToken {
        operand: current.trim().to_string(),
        op: pending,
    });

    validate_tokens(&tokens, expression)?;
    Ok(tokens)
}

/// Only a leading `+`/`-` may have an empty operand before it
fn validate_tokens(tokens: &[ArithToken], expression: &str) -> Result<(), EvalError> {
    for (i, token) in tokens.iter().enumerate() {
        if !token.operand.is_empty() {
            continue;
        }
        let leading_sign = i == 0
            && tokens.len() > 1
            && matches!(tokens[1].op, Some(ArithOp::Add | ArithOp::Sub));
        if !leading_sign {
            return Err(EvalError::malformed(format!(
                "missing operand in '{}'",
                expression
            )));
        }
    }
    Ok(())
}

/// Combine named results with `+ - * /`, left to right
pub fn combine(expression: &str, operands: &HashMap<String, Decimal>) -> Result<Decimal, EvalError> {
    let tokens = split_operands(expression)?;
    log::debug!("Combining {} operands: {}", tokens.len(), expression);

    let mut total = Decimal::ZERO;
    for token in &tokens {
        if token.operand.is_empty() {
            // Leading sign, total stays zero
            continue;
        }
        let value = resolve_operand(&token.operand, operands)?;
        total = match token.op {
            None => value,
            Some(op) => op.apply(total, value)?,
        };
    }

    Ok(total)
}

fn resolve_operand(name: &str, operands: &HashMap<String, Decimal>) -> Result<Decimal, EvalError> {
    if let Some(value) = operands.get(name) {
        return Ok(*value);
    }
    Decimal::from_str(name).map_err(|_| EvalError::UnknownOperand(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operands(pairs: &[(&str, i64)]) -> HashMap<String, Decimal> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Decimal::from(*v)))
            .collect()
    }

    #[test]
    fn test_net_flow() {
        let ops = operands(&[("A", 1_000_000), ("B", 500_000)]);
        assert_eq!(combine("A - B", &ops), Ok(Decimal::from(500_000)));
    }

    #[test]
    fn test_division_by_zero() {
        let ops = operands(&[("A", 1_000_000), ("B", 0)]);
        assert!(matches!(
            combine("A / B", &ops),
            Err(EvalError::ArithmeticError(_))
        ));
    }

    #[test]
    fn test_strict_left_to_right() {
        let ops = operands(&[("A", 2), ("B", 3), ("C", 4)]);
        // (2 + 3) * 4, not 2 + (3 * 4)
        assert_eq!(combine("A + B * C", &ops), Ok(Decimal::from(20)));
    }

    #[test]
    fn test_split_keeps_parenthesized_groups() {
        let tokens = split_operands("total - (fee + tax) / 2").unwrap();
        assert_eq!(
            tokens,
            vec![
                ArithToken {
                    operand: "total".to_string(),
                    op: None
                },
                ArithToken {
                    operand: "(fee + tax)".to_string(),
                    op: Some(ArithOp::Sub)
                },
                ArithToken {
                    operand: "2".to_string(),
                    op: Some(ArithOp::Div)
                },
            ]
        );
    }

    #[test]
    fn test_parenthesized_operand_resolved_by_caller() {
        let mut ops = operands(&[("total", 100)]);
        ops.insert("(fee + tax)".to_string(), Decimal::from(30));
        assert_eq!(combine("total - (fee + tax)", &ops), Ok(Decimal::from(70)));
    }

    #[test]
    fn test_literals_and_leading_sign() {
        let ops = operands(&[("A", 10)]);
        assert_eq!(combine("A * 1.5", &ops), Ok(Decimal::new(150, 1)));
        assert_eq!(combine("-A + 4", &ops), Ok(Decimal::from(-6)));
    }

    #[test]
    fn test_unknown_operator_and_operand() {
        let ops = operands(&[("A", 10), ("B", 3)]);
        assert_eq!(
            combine("A % B", &ops),
            Err(EvalError::UnknownOperator("%".to_string()))
        );
        assert_eq!(
            combine("A + C", &ops),
            Err(EvalError::UnknownOperand("C".to_string()))
        );
    }

    #[test]
    fn test_malformed_expressions() {
        let ops = operands(&[("A", 1), ("B", 2)]);
        assert!(matches!(combine("A + * B", &ops), Err(EvalError::MalformedTemplate(_))));
        assert!(matches!(combine("(A + B", &ops), Err(EvalError::MalformedTemplate(_))));
        assert!(matches!(combine("A + B)", &ops), Err(EvalError::MalformedTemplate(_))));
        assert!(matches!(combine("", &ops), Err(EvalError::MalformedTemplate(_))));
    }
}
