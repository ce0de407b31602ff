//! Reduced directive grammar: `{function(column)}`
//!
//! Four whole-dataset aggregates with fixed output formats:
//!
//! | function  | output                                          |
//! |-----------|-------------------------------------------------|
//! | `sum`     | thousands-grouped, natural decimals             |
//! | `average` | thousands-grouped, exactly two decimals         |
//! | `count`   | thousands-grouped non-null count                |
//! | `unique`  | distinct values, ascending, joined with `", "`  |

use std::collections::BTreeSet;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::dataset::Dataset;
use crate::error::EvalError;
use crate::render::format::FormatSpec;

/// Name the rich grammar uses for the dataset itself
pub const DATASET_NAME: &str = "df";

static SIMPLE_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)\s*$")
        .expect("valid simple directive pattern")
});

/// Reduced-grammar aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleFunction {
    Sum,
    Average,
    Count,
    Unique,
}

impl FromStr for SimpleFunction {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(SimpleFunction::Sum),
            "average" => Ok(SimpleFunction::Average),
            "count" => Ok(SimpleFunction::Count),
            "unique" => Ok(SimpleFunction::Unique),
            other => Err(EvalError::UnknownFunction(other.to_string())),
        }
    }
}

impl std::fmt::Display for SimpleFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimpleFunction::Sum => write!(f, "sum"),
            SimpleFunction::Average => write!(f, "average"),
            SimpleFunction::Count => write!(f, "count"),
            SimpleFunction::Unique => write!(f, "unique"),
        }
    }
}

/// A directive in `function(column)` shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleDirective {
    pub function: String,
    pub column: String,
}

impl SimpleDirective {
    /// Match the reduced shape: `ident(ident)` over a bare column name
    ///
    /// `len(df)` and friends take the dataset itself and belong to the rich
    /// grammar, so they do not match.
    pub fn match_shape(body: &str) -> Option<Self> {
        let caps = SIMPLE_SHAPE.captures(body)?;
        let column = &caps[2];
        if column == DATASET_NAME {
            return None;
        }
        Some(Self {
            function: caps[1].to_string(),
            column: column.to_string(),
        })
    }

    /// Evaluate over the whole dataset
    pub fn evaluate(&self, dataset: &Dataset) -> Result<Resolved, EvalError> {
        let function: SimpleFunction = self.function.parse()?;
        evaluate(function, &self.column, dataset)
    }
}

/// Result of a reduced-grammar function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Numeric result and the format it uses when no specifier is given
    Number { value: Decimal, default_spec: FormatSpec },
    /// Already-joined text (`unique`)
    Text(String),
}

impl Resolved {
    /// Format the result; an explicit specifier replaces the default
    pub fn render(&self, explicit: Option<&FormatSpec>) -> String {
        match self {
            Resolved::Number {
                value,
                default_spec,
            } => explicit.unwrap_or(default_spec).apply(*value),
            Resolved::Text(text) => text.clone(),
        }
    }
}

/// Evaluate a reduced-grammar function over a column
pub fn evaluate(
    function: SimpleFunction,
    column: &str,
    dataset: &Dataset,
) -> Result<Resolved, EvalError> {
    let values = dataset.column_values(column)?;
    let present: Vec<_> = values.into_iter().filter(|v| !v.is_null()).collect();

    match function {
        SimpleFunction::Sum => {
            let total = sum_numeric(column, present.iter().filter_map(|v| v.as_decimal()))?;
            let skipped = present.iter().filter(|v| !v.is_numeric()).count();
            if skipped > 0 {
                log::warn!("sum({}) skipped {} non-numeric values", column, skipped);
            }
            Ok(Resolved::Number {
                value: total,
                default_spec: FormatSpec::grouped(),
            })
        }
        SimpleFunction::Average => {
            let numbers: Vec<Decimal> = present.iter().filter_map(|v| v.as_decimal()).collect();
            if numbers.is_empty() {
                return Err(EvalError::arithmetic(format!(
                    "average({}) over no numeric values",
                    column
                )));
            }
            let total = sum_numeric(column, numbers.iter().copied())?;
            let mean = total
                .checked_div(Decimal::from(numbers.len()))
                .ok_or_else(|| EvalError::arithmetic(format!("overflow in average({})", column)))?;
            Ok(Resolved::Number {
                value: mean,
                default_spec: FormatSpec::grouped_fixed(2),
            })
        }
        SimpleFunction::Count => Ok(Resolved::Number {
            value: Decimal::from(present.len()),
            default_spec: FormatSpec::grouped_fixed(0),
        }),
        SimpleFunction::Unique => {
            let distinct: BTreeSet<String> = present.iter().map(|v| v.to_string()).collect();
            Ok(Resolved::Text(
                distinct.into_iter().collect::<Vec<_>>().join(", "),
            ))
        }
    }
}

fn sum_numeric(column: &str, mut values: impl Iterator<Item = Decimal>) -> Result<Decimal, EvalError> {
    values.try_fold(Decimal::ZERO, |acc, v| {
        acc.checked_add(v)
            .ok_or_else(|| EvalError::arithmetic(format!("overflow in sum({})", column)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accounts() -> Dataset {
        Dataset::from_json(&json!([
            {"acct_no": "A001", "curr_cd": "KRW", "bal": 1000000},
            {"acct_no": "A002", "curr_cd": "USD", "bal": 1000},
            {"acct_no": "A003", "curr_cd": "JPY", "bal": 100000},
            {"acct_no": "A004", "curr_cd": "KRW", "bal": 2000000}
        ]))
        .unwrap()
    }

    fn run(body: &str, dataset: &Dataset) -> Result<String, EvalError> {
        SimpleDirective::match_shape(body)
            .expect("simple shape")
            .evaluate(dataset)
            .map(|resolved| resolved.render(None))
    }

    #[test]
    fn test_match_shape() {
        assert_eq!(
            SimpleDirective::match_shape(" count( acct_no ) "),
            Some(SimpleDirective {
                function: "count".to_string(),
                column: "acct_no".to_string()
            })
        );
        assert_eq!(SimpleDirective::match_shape("len(df)"), None);
        assert_eq!(SimpleDirective::match_shape("df['bal'].sum()"), None);
        assert_eq!(SimpleDirective::match_shape("sum(bal) + 1"), None);
    }

    #[test]
    fn test_sum_count_average_unique() {
        let data = accounts();
        assert_eq!(run("sum(bal)", &data).unwrap(), "3,101,000");
        assert_eq!(run("count(acct_no)", &data).unwrap(), "4");
        assert_eq!(run("average(bal)", &data).unwrap(), "775,250.00");
        assert_eq!(run("unique(curr_cd)", &data).unwrap(), "JPY, KRW, USD");
    }

    #[test]
    fn test_nulls_are_skipped() {
        let data = Dataset::from_json(&json!([
            {"bal": 10, "memo": null},
            {"bal": null, "memo": "x"},
            {"bal": 20, "memo": "x"}
        ]))
        .unwrap();
        assert_eq!(run("count(bal)", &data).unwrap(), "2");
        assert_eq!(run("average(bal)", &data).unwrap(), "15.00");
        assert_eq!(run("unique(memo)", &data).unwrap(), "x");
    }

    #[test]
    fn test_empty_dataset_defaults() {
        let data = Dataset::with_columns(["acct_no", "bal"]);
        assert_eq!(run("sum(bal)", &data).unwrap(), "0");
        assert_eq!(run("count(acct_no)", &data).unwrap(), "0");
        assert_eq!(run("unique(acct_no)", &data).unwrap(), "");
        assert!(matches!(
            run("average(bal)", &data),
            Err(EvalError::ArithmeticError(_))
        ));
    }

    #[test]
    fn test_unknown_column_and_function() {
        let data = accounts();
        assert_eq!(
            run("sum(nonexistent)", &data),
            Err(EvalError::UnknownColumn("nonexistent".to_string()))
        );
        assert_eq!(
            run("median(bal)", &data),
            Err(EvalError::UnknownFunction("median".to_string()))
        );
    }

    #[test]
    fn test_explicit_spec_overrides_default() {
        let data = accounts();
        let resolved = SimpleDirective::match_shape("sum(bal)")
            .unwrap()
            .evaluate(&data)
            .unwrap();
        let spec = FormatSpec::parse(",.2f").unwrap();
        assert_eq!(resolved.render(Some(&spec)), "3,101,000.00");
        assert_eq!(resolved.render(None), "3,101,000");
    }

    #[test]
    fn test_count_groups_thousands() {
        let rows: Vec<_> = (0..1234).map(|i| json!({"n": i})).collect();
        let data = Dataset::from_json(&serde_json::Value::Array(rows)).unwrap();
        assert_eq!(run("count(n)", &data).unwrap(), "1,234");
    }

    #[test]
    fn test_out_of_range_number_is_counted_as_text() {
        let data = Dataset::from_json(&json!([{"x": 1e300}, {"x": 5}])).unwrap();
        assert_eq!(run("count(x)", &data).unwrap(), "2");
        assert_eq!(run("sum(x)", &data).unwrap(), "5");
    }
}
