//! Remembered inputs for the control surface (`config.json`).
//!
//! The search itself never touches this file; the CLI loads it to prefill the
//! prefix and thread count and saves it on request.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `{ "matchString": "...", "threadCount": N }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlConfig {
    pub match_string: String,
    pub thread_count: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            match_string: String::new(),
            thread_count: num_cpus::get(),
        }
    }
}

impl ControlConfig {
    /// Load the config, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ControlConfig::load(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(config, ControlConfig::default());
        assert!(config.thread_count >= 1);
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        let config = ControlConfig {
            match_string: "tor".into(),
            thread_count: 6,
        };
        config.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"matchString\": \"tor\""));
        assert!(raw.contains("\"threadCount\": 6"));
        assert_eq!(ControlConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("partial.json");
        fs::write(&path, r#"{ "matchString": "abc" }"#).unwrap();

        let config = ControlConfig::load(&path).unwrap();
        assert_eq!(config.match_string, "abc");
        assert_eq!(config.thread_count, num_cpus::get());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ControlConfig::load(&path),
            Err(ConfigError::Json { .. })
        ));
    }
}
