/*!
 * Configuration types for Conduit
 */

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::error::{ConduitError, Result};

/// Top-level configuration, usually loaded from a TOML file
///
/// ```toml
/// [adapter]
/// identity = "local"
/// config = { root = "/var/data" }
///
/// [[middleware]]
/// identity = "checksum"
/// options = { algorithm = "sha256" }
///
/// [logging]
/// level = "info"
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConduitConfig {
    /// Storage adapter to build
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Transforms to apply, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middleware: Vec<MiddlewareConfig>,

    /// Diagnostic output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Adapter selection: a registered identity plus its construction config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub identity: String,

    #[serde(default = "empty_object")]
    pub config: Value,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            identity: "local".to_string(),
            config: json!({ "root": "." }),
        }
    }
}

/// One pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    pub identity: String,

    /// Registration options handed to the transform
    #[serde(default = "empty_object")]
    pub options: Value,
}

impl MiddlewareConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            options: empty_object(),
        }
    }

    pub fn with_options(identity: impl Into<String>, options: Value) -> Self {
        Self {
            identity: identity.into(),
            options,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default)]
    pub level: LogLevel,

    /// Write JSON lines here instead of compact stdout output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Force debug level
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl ConduitConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConduitError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ConduitConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConduitError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ConduitConfig::default();
        assert_eq!(config.adapter.identity, "local");
        assert_eq!(config.adapter.config["root"], ".");
        assert!(config.middleware.is_empty());
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_full_example() {
        let toml_str = r#"
[adapter]
identity = "local"
config = { root = "/var/data" }

[[middleware]]
identity = "checksum"
options = { algorithm = "sha256" }

[[middleware]]
identity = "compress"

[logging]
level = "debug"
file = "conduit.log"
verbose = false
"#;

        let config = ConduitConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.adapter.config["root"], "/var/data");
        assert_eq!(config.middleware.len(), 2);
        assert_eq!(config.middleware[0].options["algorithm"], "sha256");
        assert_eq!(config.middleware[1], MiddlewareConfig::new("compress"));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.file, Some(PathBuf::from("conduit.log")));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ConduitConfig::from_toml_str("").unwrap();
        assert_eq!(config, ConduitConfig::default());
    }

    #[test]
    fn test_invalid_level() {
        let err = ConduitConfig::from_toml_str("[logging]\nlevel = \"loud\"").unwrap_err();
        assert!(matches!(err, ConduitError::Toml(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conduit.toml");

        let mut config = ConduitConfig::default();
        config.middleware.push(MiddlewareConfig::with_options(
            "checksum",
            json!({ "algorithm": "sha1" }),
        ));
        config.to_file(&path).unwrap();

        assert_eq!(ConduitConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = ConduitConfig::from_file("/nonexistent/conduit.toml").unwrap_err();
        assert!(matches!(err, ConduitError::Config(_)));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
