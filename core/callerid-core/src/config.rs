//! Tunables loading and saving.
//!
//! Every field has a default, so a missing or partial `config.json` still
//! yields a usable configuration. A corrupt file is logged and ignored.

use std::time::Duration;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{CallerIdError, Result};
use crate::storage::{write_atomic, StorageConfig};

pub const DEFAULT_COUNTRY_CODE: &str = "81";
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_MIN_VISIBLE_MS: u64 = 1200;
pub const DEFAULT_LOOKUP_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_LOOKUP_RETRY_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(default)]
pub struct CallerIdConfig {
    /// Country code prepended to domestic numbers during normalization.
    pub default_country_code: String,
    /// Delay between the first RINGING signal and the overlay, letting late numbers arrive.
    pub debounce_ms: u64,
    /// IDLE signals earlier than this after the overlay appeared are treated as spurious.
    pub min_visible_ms: u64,
    pub lookup_max_attempts: u32,
    pub lookup_retry_interval_ms: u64,
}

impl Default for CallerIdConfig {
    fn default() -> Self {
        Self {
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            min_visible_ms: DEFAULT_MIN_VISIBLE_MS,
            lookup_max_attempts: DEFAULT_LOOKUP_MAX_ATTEMPTS,
            lookup_retry_interval_ms: DEFAULT_LOOKUP_RETRY_INTERVAL_MS,
        }
    }
}

impl CallerIdConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn min_visible(&self) -> Duration {
        Duration::from_millis(self.min_visible_ms)
    }

    pub fn lookup_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lookup_retry_interval_ms)
    }
}

/// Loads the configuration, returning defaults if the file is missing or unreadable.
pub fn load_config_with_storage(storage: &StorageConfig) -> CallerIdConfig {
    let path = storage.config_file();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return CallerIdConfig::default()
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read config; using defaults");
            return CallerIdConfig::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                error = %err,
                path = %path.display(),
                "Failed to parse config; using defaults"
            );
            CallerIdConfig::default()
        }
    }
}

pub fn save_config_with_storage(storage: &StorageConfig, config: &CallerIdConfig) -> Result<()> {
    let content = serde_json::to_vec_pretty(config).map_err(|source| CallerIdError::Json {
        context: "Failed to serialize config".to_string(),
        source,
    })?;
    write_atomic(&storage.config_file(), &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        assert_eq!(load_config_with_storage(&storage), CallerIdConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        std::fs::write(storage.config_file(), r#"{"default_country_code":"82"}"#).unwrap();

        let config = load_config_with_storage(&storage);
        assert_eq!(config.default_country_code, "82");
        assert_eq!(config.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.lookup_max_attempts, DEFAULT_LOOKUP_MAX_ATTEMPTS);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        std::fs::write(storage.config_file(), "{ nope").unwrap();
        assert_eq!(load_config_with_storage(&storage), CallerIdConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let config = CallerIdConfig {
            min_visible_ms: 2000,
            ..CallerIdConfig::default()
        };
        save_config_with_storage(&storage, &config).unwrap();
        assert_eq!(load_config_with_storage(&storage), config);
    }

    #[test]
    fn test_durations() {
        let config = CallerIdConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.min_visible(), Duration::from_millis(1200));
        assert_eq!(config.lookup_retry_interval(), Duration::from_millis(100));
    }
}
