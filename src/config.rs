//! Configuration file parser for `podsync.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted, though we log a warning for each since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file, or `:memory:`.
    pub database_path: PathBuf,

    /// Tag cloud size above which only the viewer's own tags are shown.
    pub max_tags_on_page: usize,

    /// Attempts for a read-modify-write cycle before reporting a write conflict.
    pub conflict_retries: u32,

    /// Device used by the legacy upload/getlist endpoints.
    pub legacy_device_uid: String,
    pub legacy_device_name: String,

    /// Maximum rows returned by history queries.
    pub history_limit: u32,

    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("podsync.db"),
            max_tags_on_page: 50,
            conflict_retries: 3,
            legacy_device_uid: "legacy".to_string(),
            legacy_device_name: "Legacy Device".to_string(),
            history_limit: 100,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "database_path",
        "max_tags_on_page",
        "conflict_retries",
        "legacy_device_uid",
        "legacy_device_name",
        "history_limit",
        "log_filter",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.conflict_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "conflict_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.legacy_device_uid.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "legacy_device_uid",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, PathBuf::from("podsync.db"));
        assert_eq!(config.max_tags_on_page, 50);
        assert_eq!(config.conflict_retries, 3);
        assert_eq!(config.legacy_device_uid, "legacy");
        assert_eq!(config.legacy_device_name, "Legacy Device");
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/podsync_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("podsync_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::from_toml("max_tags_on_page = 10\n").unwrap();
        assert_eq!(config.max_tags_on_page, 10);
        assert_eq!(config.conflict_retries, 3);
        assert_eq!(config.legacy_device_uid, "legacy");
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/podsync/podsync.db"
max_tags_on_page = 20
conflict_retries = 5
legacy_device_uid = "old-client"
legacy_device_name = "Old Client"
history_limit = 25
log_filter = "podsync=debug"
"#;
        let config = Config::from_toml(content).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/podsync/podsync.db"));
        assert_eq!(config.max_tags_on_page, 20);
        assert_eq!(config.conflict_retries, 5);
        assert_eq!(config.legacy_device_uid, "old-client");
        assert_eq!(config.legacy_device_name, "Old Client");
        assert_eq!(config.history_limit, 25);
        assert_eq!(config.log_filter, "podsync=debug");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::from_toml("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
history_limit = 7
totally_fake_key = "should not fail"
"#;
        let config = Config::from_toml(content).unwrap();
        assert_eq!(config.history_limit, 7);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::from_toml("max_tags_on_page = \"many\"\n").is_err());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let err = Config::from_toml("conflict_retries = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "conflict_retries",
                ..
            }
        ));
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("podsync_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = "a".repeat(1_048_577);
        std::fs::write(&path, content).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
