//! Format specifiers: `,` / `.2f` / `,.0f` / `.1%` / `,d`
//!
//! Numbers are rounded half-to-even on the exact decimal value, so
//! `2.675:.2f` gives `2.68` (no binary float surprise).

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::EvalError;

/// Largest scale a `Decimal` can carry
const MAX_PRECISION: u8 = 28;

/// Default decimals for `f` without an explicit precision
const DEFAULT_FLOAT_PRECISION: u8 = 2;

/// Format specifier for controlling numeric output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatSpec {
    /// Use thousands separator (`,`)
    pub thousands_sep: bool,
    /// Decimal precision (`.2` means 2 decimal places)
    pub precision: Option<u8>,
    /// Format type
    pub format_type: FormatType,
}

/// Format type specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatType {
    /// Infer from the value: natural form, or fixed when a precision is given
    #[default]
    Auto,
    /// Fixed-point decimal
    Float,
    /// Integer (rounded)
    Integer,
    /// Percentage (multiply by 100, add %)
    Percent,
}

impl FormatSpec {
    /// Thousands grouping with a fixed number of decimals
    pub fn grouped_fixed(precision: u8) -> Self {
        Self {
            thousands_sep: true,
            precision: Some(precision),
            format_type: FormatType::Float,
        }
    }

    /// Thousands grouping, natural decimals
    pub fn grouped() -> Self {
        Self {
            thousands_sep: true,
            ..Self::default()
        }
    }

    /// Parse a specifier: `[","]? ["." digits]? [type_char]?`
    pub fn parse(input: &str) -> Result<Self, EvalError> {
        let mut spec = FormatSpec::default();
        let mut rest = input.trim();

        if let Some(after) = rest.strip_prefix(',') {
            spec.thousands_sep = true;
            rest = after;
        }

        if let Some(after) = rest.strip_prefix('.') {
            let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                return Err(EvalError::malformed(format!(
                    "format specifier '{}' has no precision digits after '.'",
                    input
                )));
            }
            let precision: u8 = digits.parse().map_err(|_| {
                EvalError::malformed(format!("precision too large in '{}'", input))
            })?;
            if precision > MAX_PRECISION {
                return Err(EvalError::malformed(format!(
                    "precision {} exceeds {}",
                    precision, MAX_PRECISION
                )));
            }
            spec.precision = Some(precision);
            rest = &after[digits.len()..];
        }

        spec.format_type = match rest {
            "" => FormatType::Auto,
            "f" | "F" => FormatType::Float,
            "d" => FormatType::Integer,
            "%" => FormatType::Percent,
            other => {
                return Err(EvalError::malformed(format!(
                    "unsupported format specifier '{}' (type '{}')",
                    input, other
                )));
            }
        };

        Ok(spec)
    }

    /// Format a number according to this spec
    pub fn apply(&self, value: Decimal) -> String {
        let formatted = match self.format_type {
            FormatType::Auto => match self.precision {
                Some(p) => fixed(value, p),
                None => value.normalize().to_string(),
            },
            FormatType::Float => fixed(value, self.precision.unwrap_or(DEFAULT_FLOAT_PRECISION)),
            FormatType::Integer => fixed(value, 0),
            FormatType::Percent => {
                let pct = value * Decimal::ONE_HUNDRED;
                let formatted = fixed(pct, self.precision.unwrap_or(0));
                return if self.thousands_sep {
                    add_thousands_sep(&formatted) + "%"
                } else {
                    formatted + "%"
                };
            }
        };

        if self.thousands_sep {
            add_thousands_sep(&formatted)
        } else {
            formatted
        }
    }
}

impl FromStr for FormatSpec {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.thousands_sep {
            write!(f, ",")?;
        }
        if let Some(prec) = self.precision {
            write!(f, ".{}", prec)?;
        }
        match self.format_type {
            FormatType::Auto => {}
            FormatType::Float => write!(f, "f")?,
            FormatType::Integer => write!(f, "d")?,
            FormatType::Percent => write!(f, "%")?,
        }
        Ok(())
    }
}

/// Round half-to-even and pad to exactly `precision` decimals
fn fixed(value: Decimal, precision: u8) -> String {
    let dp = u32::from(precision.min(MAX_PRECISION));
    let mut rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(dp);
    rounded.to_string()
}

/// Add thousands separator to a number string
pub fn add_thousands_sep(s: &str) -> String {
    // Split on decimal point
    let (int_part, dec_part) = match s.find('.') {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, ""),
    };

    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    // Add commas every 3 digits from the right
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}{}{}", sign, grouped, dec_part)
}
