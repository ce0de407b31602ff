//! Scalar cell values held by a dataset

use std::str::FromStr;

use rust_decimal::Decimal;

/// A single cell in a result set
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scalar {
    /// Null/missing value
    #[default]
    Null,
    /// Text value
    String(String),
    /// Whole number
    Int(i64),
    /// Exact decimal (money, rates, anything fractional)
    Decimal(Decimal),
    /// Boolean flag
    Bool(bool),
}

impl Scalar {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Try to get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as a decimal number (integers widen losslessly)
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Scalar::Int(i) => Some(Decimal::from(*i)),
            Scalar::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Whether the value is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Int(_) | Scalar::Decimal(_))
    }

    /// Parse from a JSON value
    ///
    /// Numbers go through their textual form so `0.1` stays `0.1`
    /// instead of the nearest binary float. A number outside the decimal
    /// range stays text, so arithmetic on it fails instead of skipping it.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Scalar::Null,
            serde_json::Value::Bool(b) => Scalar::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Scalar::Int(i)
                } else {
                    let text = n.to_string();
                    match Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)) {
                        Ok(d) => Scalar::Decimal(d),
                        Err(_) => {
                            log::warn!("Number {} does not fit a decimal, keeping it as text", text);
                            Scalar::String(text)
                        }
                    }
                }
            }
            serde_json::Value::String(s) => Scalar::String(s.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                // Nested values are not tabular, keep them as text
                Scalar::String(json.to_string())
            }
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::String(s) => write!(f, "{}", s),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Decimal(d) => write!(f, "{}", d.normalize()),
            Scalar::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<Decimal> for Scalar {
    fn from(d: Decimal) -> Self {
        Scalar::Decimal(d)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_decimal_text() {
        assert_eq!(
            Scalar::from_json(&json!(0.1)),
            Scalar::Decimal(Decimal::from_str("0.1").unwrap())
        );
        assert_eq!(Scalar::from_json(&json!(42)), Scalar::Int(42));
        assert_eq!(Scalar::from_json(&json!(null)), Scalar::Null);
        assert_eq!(Scalar::from_json(&json!("KRW")), Scalar::from("KRW"));
    }

    #[test]
    fn test_from_json_out_of_range_number_stays_text() {
        assert_eq!(Scalar::from_json(&json!(1e300)), Scalar::from("1e300"));
        assert!(!Scalar::from_json(&json!(-1e300)).is_null());
    }

    #[test]
    fn test_display_is_natural() {
        assert_eq!(Scalar::Decimal(Decimal::from_str("1000.50").unwrap()).to_string(), "1000.5");
        assert_eq!(Scalar::Int(-7).to_string(), "-7");
        assert_eq!(Scalar::Null.to_string(), "");
        assert_eq!(Scalar::Bool(true).to_string(), "true");
    }

    #[test]
    fn test_as_decimal_widens_ints() {
        assert_eq!(Scalar::Int(3).as_decimal(), Some(Decimal::from(3)));
        assert_eq!(Scalar::from("3").as_decimal(), None);
    }
}
