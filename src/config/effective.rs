//! Effective configuration with provenance
//!
//! Records the merged configuration together with every contributing
//! source, including the SHA-256 digest of each config file read.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::Settings;

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "slotq/effective_config@1";

/// Environment variable naming the user config file
pub const CONFIG_ENV: &str = "SLOTQ_CONFIG";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged configuration plus where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

/// Find the user config file.
///
/// An explicit path or `$SLOTQ_CONFIG` must exist; the default location
/// `~/.config/slotq/config.toml` is used only if present.
pub fn locate_config(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    let named = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from));
    if let Some(path) = named {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path));
        }
        return Ok(Some(path));
    }

    let default = std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config/slotq/config.toml"))
        .filter(|p| p.is_file());
    Ok(default)
}

impl EffectiveConfig {
    /// Build effective config from layers
    pub fn build(
        user_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = user_config_path {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::User,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        Self::validate_config(&merged)?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
        })
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;
        let table: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        Ok((toml_to_json(table), digest))
    }

    /// Range checks on the merged values
    fn validate_config(config: &Value) -> Result<(), ConfigError> {
        let positive = |key: &str| -> Result<(), ConfigError> {
            match config.get(key) {
                None | Some(Value::Null) => Ok(()),
                Some(v) if v.as_u64().map_or(false, |n| n >= 1) => Ok(()),
                Some(_) => Err(ConfigError::ValidationError(format!(
                    "{} must be a positive integer",
                    key
                ))),
            }
        };

        positive("max_slots")?;
        positive("workers")?;
        positive("refresh_interval_secs")?;

        if let Some(max_slots) = config.get("max_slots").and_then(Value::as_u64) {
            if max_slots > u64::from(u32::MAX) {
                return Err(ConfigError::ValidationError(
                    "max_slots is too large".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Deserialize into typed settings
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let settings: Settings = serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        settings
            .stages
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(settings)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a config value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }
}

/// Convert TOML Value to JSON Value
fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_build_with_defaults_only() {
        let config = EffectiveConfig::build(None, None).unwrap();

        assert_eq!(config.schema_id, SCHEMA_ID);
        assert_eq!(config.get_u64("max_slots"), Some(2));
        assert_eq!(config.get_str("abort_sentinel"), Some("aborted at input"));
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_cli_override_wins() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_slots = 6").unwrap();
        writeln!(file, "workers = 3").unwrap();

        let cli = serde_json::json!({"max_slots": 4});
        let config = EffectiveConfig::build(Some(file.path()), Some(cli)).unwrap();

        assert_eq!(config.get_u64("max_slots"), Some(4));
        assert_eq!(config.get_u64("workers"), Some(3));
        let origins: Vec<_> = config.sources.iter().map(|s| s.origin.clone()).collect();
        assert_eq!(
            origins,
            vec![ConfigOrigin::Builtin, ConfigOrigin::User, ConfigOrigin::Cli]
        );
    }

    #[test]
    fn test_file_digest_recorded() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "max_slots = 3\n").unwrap();

        let config = EffectiveConfig::build(Some(file.path()), None).unwrap();
        let digest = config.sources[1].digest.as_deref().unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"max_slots = 3\n");
        assert_eq!(digest, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_nested_stage_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[stages.first]").unwrap();
        writeln!(file, "weight = 3").unwrap();
        writeln!(file, "[adapter]").unwrap();
        writeln!(file, "program = \"encx\"").unwrap();

        let config = EffectiveConfig::build(Some(file.path()), None).unwrap();
        let settings = config.settings().unwrap();

        assert_eq!(settings.stages.first.weight, 3);
        assert_eq!(settings.stages.first.extra_args, vec!["--1pass-only"]);
        assert_eq!(settings.adapter.program.as_deref(), Some("encx"));
    }

    #[test]
    fn test_validation_rejects_zero_slots() {
        let cli = serde_json::json!({"max_slots": 0});
        let err = EffectiveConfig::build(None, Some(cli)).unwrap_err();
        assert!(err.to_string().contains("max_slots"));
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let cli = serde_json::json!({"workers": 0});
        assert!(EffectiveConfig::build(None, Some(cli)).is_err());
    }

    #[test]
    fn test_zero_stage_weight_rejected_by_settings() {
        let cli = serde_json::json!({"stages": {"second": {"weight": 0}}});
        let config = EffectiveConfig::build(None, Some(cli)).unwrap();
        assert!(matches!(
            config.settings(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_slots = [").unwrap();
        assert!(matches!(
            EffectiveConfig::build(Some(file.path()), None),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_locate_explicit_missing() {
        let err = locate_config(Some(Path::new("/nonexistent/slotq.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_locate_explicit_present() {
        let file = NamedTempFile::new().unwrap();
        let found = locate_config(Some(file.path())).unwrap();
        assert_eq!(found.as_deref(), Some(file.path()));
    }
}
