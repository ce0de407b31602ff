//! Column classification and display rules
//!
//! Decides how a numeric result is shown when the directive carries no
//! explicit format specifier. An explicit specifier always wins.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::render::format::FormatSpec;

/// Process-wide default policy, built once on first use
pub static DEFAULT_POLICY: Lazy<ColumnPolicy> = Lazy::new(ColumnPolicy::default);

/// Semantic class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    /// Identifiers, codes, names: never numerically formatted
    String,
    /// Monetary amount whose precision depends on the row's currency
    Currency,
    /// Rate-like value, always two decimals
    Decimal,
    /// Any other number, shown as an integer
    DefaultNumeric,
}

/// What kind of function produced a number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionOutput {
    /// A column value or a value-preserving aggregate (sum, min, max)
    #[default]
    Value,
    /// Decimal-producing aggregate (mean/average)
    Mean,
    /// Counting function whose output never has decimals
    Count,
}

/// Where a number came from, used to pick its display rule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Provenance {
    /// Source column, if the number derives from one
    pub column: Option<String>,
    /// Producing function
    pub function: FunctionOutput,
    /// Currency code of the contributing rows, when they agree on one
    pub currency: Option<String>,
}

impl Provenance {
    /// Provenance of a plain column value
    pub fn column(column: impl Into<String>, currency: Option<String>) -> Self {
        Self {
            column: Some(column.into()),
            function: FunctionOutput::Value,
            currency,
        }
    }

    /// Provenance of a function result with no column behind it
    pub fn function(function: FunctionOutput) -> Self {
        Self {
            column: None,
            function,
            currency: None,
        }
    }

    /// Same provenance with a different producing function
    pub fn with_function(mut self, function: FunctionOutput) -> Self {
        self.function = function;
        self
    }
}

/// How a number is displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayRule {
    /// Natural representation, no grouping or rounding
    Verbatim,
    /// Thousands grouping, no decimals
    Integer,
    /// Thousands grouping, exactly two decimals
    TwoDecimals,
}

impl DisplayRule {
    /// Format spec implementing this rule (`None` for verbatim)
    pub fn spec(self) -> Option<FormatSpec> {
        match self {
            DisplayRule::Verbatim => None,
            DisplayRule::Integer => Some(FormatSpec::grouped_fixed(0)),
            DisplayRule::TwoDecimals => Some(FormatSpec::grouped_fixed(2)),
        }
    }
}

/// Classification policy: which columns are strings, rates, or money
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnPolicy {
    /// Columns never formatted as numbers
    pub string_columns: BTreeSet<String>,
    /// Rate-like columns shown with two decimals
    pub decimal_columns: BTreeSet<String>,
    /// Monetary columns whose precision follows the row currency
    pub currency_columns: BTreeSet<String>,
    /// Column holding each row's currency code
    pub currency_code_column: String,
    /// Currency shown without decimals
    pub local_currency: String,
    /// Recognized currency codes
    pub currency_codes: BTreeSet<String>,
    /// Classify unlisted columns by name suffix (`_rate`, `_amt`, `_cd`, ...)
    pub suffix_rules: bool,
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnPolicy {
    fn default() -> Self {
        Self {
            string_columns: set(&[
                "acct_no", "curr_cd", "cust_no", "cust_nm", "acct_nm", "bank_nm", "br_cd",
                "br_nm", "prod_cd", "prod_nm", "acct_stat_cd", "acct_dv", "com_nm", "note",
            ]),
            decimal_columns: set(&["intr_rate", "int_rt", "exch_rate", "fx_rate", "rate"]),
            currency_columns: set(&[
                "bal", "acct_bal", "avail_bal", "amt", "trsc_amt", "in_amt", "out_amt",
                "real_amt", "deposit_amt", "withdraw_amt",
            ]),
            currency_code_column: "curr_cd".to_string(),
            local_currency: "KRW".to_string(),
            currency_codes: set(&[
                "KRW", "USD", "JPY", "EUR", "CNY", "GBP", "HKD", "AUD", "CAD", "CHF", "SGD",
            ]),
            suffix_rules: true,
        }
    }
}

impl ColumnPolicy {
    /// Classify a column by name
    pub fn classify(&self, column: &str) -> ColumnClass {
        if self.string_columns.contains(column) {
            return ColumnClass::String;
        }
        if self.decimal_columns.contains(column) {
            return ColumnClass::Decimal;
        }
        if self.currency_columns.contains(column) {
            return ColumnClass::Currency;
        }
        if self.suffix_rules {
            return classify_by_suffix(column);
        }
        ColumnClass::DefaultNumeric
    }

    /// Whether a code is the local currency
    pub fn is_local_currency(&self, code: &str) -> bool {
        code == self.local_currency
    }

    /// Pick the display rule for a number of the given provenance
    pub fn display_rule(&self, provenance: &Provenance) -> DisplayRule {
        let class = provenance
            .column
            .as_deref()
            .map(|c| self.classify(c));

        match (provenance.function, class) {
            (FunctionOutput::Count, _) => DisplayRule::Integer,
            (FunctionOutput::Mean, _) => DisplayRule::TwoDecimals,
            (_, None) => DisplayRule::Verbatim,
            (_, Some(ColumnClass::String)) => DisplayRule::Verbatim,
            (_, Some(ColumnClass::Decimal)) => DisplayRule::TwoDecimals,
            (_, Some(ColumnClass::Currency)) => self.currency_rule(provenance.currency.as_deref()),
            (_, Some(ColumnClass::DefaultNumeric)) => DisplayRule::Integer,
        }
    }

    fn currency_rule(&self, code: Option<&str>) -> DisplayRule {
        match code {
            Some(code) if self.is_local_currency(code) => DisplayRule::Integer,
            Some(code) if self.currency_codes.contains(code) => DisplayRule::TwoDecimals,
            Some(code) => {
                log::warn!("Unrecognized currency code '{}', using default format", code);
                DisplayRule::Integer
            }
            None => DisplayRule::Integer,
        }
    }
}

fn classify_by_suffix(column: &str) -> ColumnClass {
    const STRING_SUFFIXES: &[&str] = &["_no", "_cd", "_nm", "_id", "_dt", "_ymd", "_name", "_code"];
    const DECIMAL_SUFFIXES: &[&str] = &["_rate", "_rt", "_ratio"];
    const CURRENCY_SUFFIXES: &[&str] = &["_bal", "_amt", "_amount", "_balance"];

    let lower = column.to_lowercase();
    if STRING_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        ColumnClass::String
    } else if DECIMAL_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        ColumnClass::Decimal
    } else if CURRENCY_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        ColumnClass::Currency
    } else {
        ColumnClass::DefaultNumeric
    }
}
