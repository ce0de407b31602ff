//! Configuration file for the renderer
//!
//! ```toml
//! [classification]
//! local_currency = "KRW"
//! currency_code_column = "curr_cd"
//! decimal_columns = ["intr_rate"]
//! ```
//!
//! Missing keys keep their built-in defaults. The file is read once at
//! startup and never changes afterwards.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classify::ColumnPolicy;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Column classification policy
    pub classification: ColumnPolicy,
}

impl Config {
    /// Default config file location (~/.config/answer-render/config.toml)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("answer-render")
            .join("config.toml")
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse configuration")
    }

    /// Load configuration from a file
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load from an explicit path, or the default path when it exists
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        let path = Self::default_path();
        if path.exists() {
            log::debug!("Loading config from {}", path.display());
            Self::load_from(&path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [classification]
            local_currency = "JPY"
            decimal_columns = ["yield"]
            "#,
        )
        .unwrap();

        assert_eq!(config.classification.local_currency, "JPY");
        assert!(config.classification.decimal_columns.contains("yield"));
        assert!(!config.classification.decimal_columns.contains("intr_rate"));
        // Untouched keys fall back to built-ins
        assert_eq!(config.classification.currency_code_column, "curr_cd");
        assert!(config.classification.currency_codes.contains("USD"));
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[classification]\nsuffix_rules = false").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert!(!config.classification.suffix_rules);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/answer-render.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml("[classification]\nsuffix_rules = \"yes\"").is_err());
    }
}
