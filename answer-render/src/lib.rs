//! Answer template rendering over tabular query results
//!
//! A template is free text with embedded `{...}` directives evaluated
//! against a dataset:
//!
//! ```
//! use answer_render::{Dataset, render_template};
//! use serde_json::json;
//!
//! let data = Dataset::from_json(&json!([
//!     {"acct_no": "A001", "curr_cd": "KRW", "bal": 1000000},
//!     {"acct_no": "A002", "curr_cd": "KRW", "bal": 2000000}
//! ])).unwrap();
//!
//! let out = render_template(
//!     "{count(acct_no)} accounts, {df['bal'].sum():,.0f} won",
//!     &data,
//! ).unwrap();
//! assert_eq!(out, "2 accounts, 3,000,000 won");
//! ```
//!
//! Directives of the shape `function(column)` use the reduced grammar
//! (`sum`, `average`, `count`, `unique`). Everything else is a sandboxed
//! dataframe-style expression over `df`.

pub mod classify;
pub mod cli;
pub mod combine;
pub mod config;
pub mod dataset;
pub mod directive;
pub mod error;
pub mod expr;
pub mod render;

pub use classify::{ColumnClass, ColumnPolicy, DEFAULT_POLICY};
pub use combine::combine;
pub use dataset::{Dataset, Scalar};
pub use error::{EvalError, RenderError};
pub use render::{Renderer, TemplateSegment, render_template, scan_template};
