use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// What to do with a tracked record that fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaPolicy {
    /// Abort the analysis on the first malformed record.
    #[default]
    Strict,
    /// Log the record and leave it out.
    Skip,
}

/// Options for folded lines and leaf records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Keep only module-layer frames in folded lines.
    pub module_only: bool,
    /// Weight appended to every folded line; `None` means 1.
    pub weight: Option<u64>,
    /// Add the per-leaf memory change history to leaf records.
    pub include_memory_history: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            module_only: true,
            weight: None,
            include_memory_history: false,
        }
    }
}

/// Settings for one trace analysis.
///
/// ```toml
/// schema_policy = "skip"
///
/// [export]
/// module_only = false
/// include_memory_history = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub schema_policy: SchemaPolicy,
    pub export: ExportOptions,
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.schema_policy, SchemaPolicy::Strict);
        assert!(config.export.module_only);
        assert!(!config.export.include_memory_history);
        assert_eq!(config.export.weight, None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            schema_policy = "skip"

            [export]
            include_memory_history = true
            weight = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.schema_policy, SchemaPolicy::Skip);
        assert!(config.export.include_memory_history);
        assert!(config.export.module_only);
        assert_eq!(config.export.weight, Some(3));
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(AnalysisConfig::from_toml_str("").unwrap(), AnalysisConfig::default());
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(AnalysisConfig::from_toml_str(r#"schema_policy = "lenient""#).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = AnalysisConfig::load("/nonexistent/torchstack.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/torchstack.toml"));
    }
}
