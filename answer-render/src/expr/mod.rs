//! Rich directive expressions
//!
//! A restricted dataframe-style expression language: the dataset is bound
//! to `df`, and every name, method, builtin and attribute must be on the
//! allow-list in [`allow`]. Anything else is rejected while parsing, before
//! any evaluation happens.

pub mod allow;
pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::Expr;
pub use eval::{Evaluator, Value};
pub use parser::parse_expression;

use crate::classify::ColumnPolicy;
use crate::dataset::Dataset;
use crate::error::EvalError;
use crate::render::format::FormatSpec;

/// Parse, evaluate and display one directive body
pub fn render_expression(
    body: &str,
    spec: Option<&FormatSpec>,
    dataset: &Dataset,
    policy: &ColumnPolicy,
) -> Result<String, EvalError> {
    let expr = parse_expression(body)?;
    log::trace!("Parsed expression referencing {:?}", expr.referenced_columns());

    let mut evaluator = Evaluator::new(dataset, policy);
    let value = evaluator.evaluate(&expr)?;
    evaluator.display(&value, spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_expression() {
        let data = Dataset::from_json(&json!([
            {"curr_cd": "USD", "bal": 1234.5},
            {"curr_cd": "USD", "bal": 10}
        ]))
        .unwrap();
        let policy = ColumnPolicy::default();

        assert_eq!(
            render_expression("df['bal'].sum()", None, &data, &policy).unwrap(),
            "1,244.50"
        );
        let spec = FormatSpec::parse(",.0f").unwrap();
        assert_eq!(
            render_expression("df['bal'].sum()", Some(&spec), &data, &policy).unwrap(),
            "1,244"
        );
    }

    #[test]
    fn test_disallowed_before_evaluation() {
        let data = Dataset::new();
        let policy = ColumnPolicy::default();
        assert_eq!(
            render_expression("__import__('os')", None, &data, &policy),
            Err(EvalError::DisallowedOperation("__import__".to_string()))
        );
    }
}
