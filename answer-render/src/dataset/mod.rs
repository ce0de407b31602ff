//! Tabular result sets that directives are evaluated against
//!
//! A dataset is read-only for the whole render. Filtering produces row-index
//! views, never a modified copy of the rows.

mod value;

pub use value::Scalar;

use thiserror::Error;

use crate::error::EvalError;

static NULL: Scalar = Scalar::Null;

/// Error while building a dataset from JSON
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetError {
    #[error("expected an array of rows or grouped entries, found {0}")]
    NotTabular(&'static str),
    #[error("row {0} is not an object")]
    RowNotObject(usize),
}

/// One row, positionally aligned with the dataset's columns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Scalar>,
}

impl Row {
    /// Value at a column position (null when the row is shorter)
    pub fn get(&self, index: usize) -> &Scalar {
        self.values.get(index).unwrap_or(&NULL)
    }
}

/// An ordered set of rows sharing one column set
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Dataset {
    /// Create an empty dataset with no known columns
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty dataset that still knows its columns
    ///
    /// Lets "no data found" results keep rejecting misspelled columns.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row given as `(column, value)` pairs
    pub fn push_row<K: Into<String>>(&mut self, row: impl IntoIterator<Item = (K, Scalar)>) {
        let mut values = vec![Scalar::Null; self.columns.len()];
        for (key, value) in row {
            let key = key.into();
            let index = match self.columns.iter().position(|c| *c == key) {
                Some(index) => index,
                None => {
                    self.columns.push(key);
                    values.push(Scalar::Null);
                    self.columns.len() - 1
                }
            };
            values[index] = value;
        }
        self.rows.push(Row { values });
    }

    /// Build a dataset from JSON
    ///
    /// Accepts an array of row objects, an array of grouped entries
    /// (`{"key": {...}, "data": [...]}`), or a single grouped object. Grouped
    /// input is flattened to the concatenation of its `data` rows.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, DatasetError> {
        let entries = match json {
            serde_json::Value::Array(entries) => entries.as_slice(),
            serde_json::Value::Object(obj) => match obj.get("data") {
                Some(serde_json::Value::Array(rows)) => return Self::from_json_rows(rows),
                _ => return Err(DatasetError::NotTabular("object without a data array")),
            },
            serde_json::Value::Null => return Ok(Self::new()),
            serde_json::Value::Bool(_) => return Err(DatasetError::NotTabular("boolean")),
            serde_json::Value::Number(_) => return Err(DatasetError::NotTabular("number")),
            serde_json::Value::String(_) => return Err(DatasetError::NotTabular("string")),
        };

        let grouped = !entries.is_empty()
            && entries
                .iter()
                .all(|e| matches!(e.get("data"), Some(serde_json::Value::Array(_))));

        if !grouped {
            return Self::from_json_rows(entries);
        }

        log::debug!("Flattening {} grouped entries", entries.len());
        let mut dataset = Self::new();
        let mut offset = 0;
        for entry in entries {
            if let Some(serde_json::Value::Array(rows)) = entry.get("data") {
                dataset.extend_json_rows(rows, offset)?;
                offset += rows.len();
            }
        }
        Ok(dataset)
    }

    fn from_json_rows(rows: &[serde_json::Value]) -> Result<Self, DatasetError> {
        let mut dataset = Self::new();
        dataset.extend_json_rows(rows, 0)?;
        Ok(dataset)
    }

    fn extend_json_rows(
        &mut self,
        rows: &[serde_json::Value],
        offset: usize,
    ) -> Result<(), DatasetError> {
        for (i, row) in rows.iter().enumerate() {
            let obj = row
                .as_object()
                .ok_or(DatasetError::RowNotObject(offset + i))?;
            self.push_row(obj.iter().map(|(k, v)| (k.as_str(), Scalar::from_json(v))));
        }
        Ok(())
    }

    /// Column names in display order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolve a column name to its position
    ///
    /// Returns `Ok(None)` for a dataset that knows no columns at all, so
    /// empty results stay renderable.
    pub fn lookup_column(&self, name: &str) -> Result<Option<usize>, EvalError> {
        if self.columns.is_empty() {
            return Ok(None);
        }
        self.columns
            .iter()
            .position(|c| c == name)
            .map(Some)
            .ok_or_else(|| EvalError::UnknownColumn(name.to_string()))
    }

    /// Cell at `row` for a column resolved by [`Dataset::lookup_column`]
    pub fn cell(&self, row: usize, column: Option<usize>) -> &Scalar {
        match (self.rows.get(row), column) {
            (Some(r), Some(c)) => r.get(c),
            _ => &NULL,
        }
    }

    /// Cell by column name, null for unknown names
    pub fn get(&self, row: usize, column: &str) -> &Scalar {
        let index = self.columns.iter().position(|c| c == column);
        self.cell(row, index)
    }

    /// All values of one column, in row order
    pub fn column_values(&self, name: &str) -> Result<Vec<&Scalar>, EvalError> {
        let index = self.lookup_column(name)?;
        Ok((0..self.rows.len()).map(|r| self.cell(r, index)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_rows_keeps_first_row_order() {
        let data = Dataset::from_json(&json!([
            {"acct_no": "A001", "curr_cd": "KRW", "bal": 1000000},
            {"acct_no": "A002", "curr_cd": "USD", "bal": 1000}
        ]))
        .unwrap();

        assert_eq!(data.columns(), ["acct_no", "curr_cd", "bal"]);
        assert_eq!(data.len(), 2);
        assert_eq!(data.get(1, "curr_cd"), &Scalar::from("USD"));
    }

    #[test]
    fn test_from_json_grouped_entries_flatten_data() {
        let data = Dataset::from_json(&json!([
            {"key": {"curr_cd": "KRW"}, "data": [{"bal": 1}, {"bal": 2}]},
            {"key": {"curr_cd": "USD"}, "data": [{"bal": 3}]}
        ]))
        .unwrap();

        assert_eq!(data.columns(), ["bal"]);
        assert_eq!(data.len(), 3);
        assert_eq!(data.get(2, "bal"), &Scalar::Int(3));
    }

    #[test]
    fn test_from_json_single_grouped_object() {
        let data = Dataset::from_json(&json!({"key": {}, "data": [{"a": 1}]})).unwrap();
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_late_column_reads_null_in_earlier_rows() {
        let data = Dataset::from_json(&json!([{"a": 1}, {"a": 2, "b": "x"}])).unwrap();
        assert_eq!(data.columns(), ["a", "b"]);
        assert_eq!(data.get(0, "b"), &Scalar::Null);
    }

    #[test]
    fn test_from_json_rejects_scalars() {
        assert_eq!(
            Dataset::from_json(&json!(3)),
            Err(DatasetError::NotTabular("number"))
        );
        assert_eq!(
            Dataset::from_json(&json!([{"a": 1}, 2])),
            Err(DatasetError::RowNotObject(1))
        );
    }

    #[test]
    fn test_lookup_column() {
        let data = Dataset::with_columns(["acct_no"]);
        assert_eq!(data.lookup_column("acct_no"), Ok(Some(0)));
        assert_eq!(
            data.lookup_column("nonexistent"),
            Err(EvalError::UnknownColumn("nonexistent".to_string()))
        );
        // Nothing known, nothing to contradict
        assert_eq!(Dataset::new().lookup_column("anything"), Ok(None));
    }
}
