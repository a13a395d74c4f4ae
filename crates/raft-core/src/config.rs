//! # config
//!
//! why: tune durability and disk usage of the file-backed log
//! relations: consumed by raft-log's FileLog::open
//! what: LogConfig with json loading and validation

use crate::error::{LogError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration of the file-backed log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// fsync entry and index files after every commit batch
    pub sync_on_commit: bool,
    /// Number of newest generation directories kept after compaction
    pub retained_generations: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            retained_generations: 2,
        }
    }
}

impl LogConfig {
    /// Parse a configuration from json, missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LogConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a json configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retained_generations == 0 {
            return Err(LogError::InvalidArgument(
                "retained_generations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = LogConfig::default();
        assert!(config.sync_on_commit);
        assert_eq!(config.retained_generations, 2);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config = LogConfig::from_json_str(r#"{"sync_on_commit": false}"#).unwrap();
        assert!(!config.sync_on_commit);
        assert_eq!(config.retained_generations, 2);
    }

    #[test]
    fn zero_retained_generations_is_rejected() {
        let err = LogConfig::from_json_str(r#"{"retained_generations": 0}"#).unwrap_err();
        assert!(matches!(err, LogError::InvalidArgument(_)));
    }
}
