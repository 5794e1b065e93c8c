use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

pub const DEFAULT_FONT_SIZE: u32 = 18;

/// Tunables read from `config.toml`; every key is optional.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub default_font_size: u32,
    pub font_step: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "flush_interval_ms")]
    pub flush_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "search_debounce_ms")]
    pub search_debounce: Duration,
    pub history_limit: Option<usize>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            default_font_size: DEFAULT_FONT_SIZE,
            font_step: 2,
            flush_interval: Duration::from_secs(30),
            search_debounce: Duration::from_millis(150),
            history_limit: None,
        }
    }
}

impl ReaderConfig {
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid reader configuration")
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml(&source).with_context(|| format!("in {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_keys_use_defaults() {
        let config = ReaderConfig::from_toml("font_step = 4\n").unwrap();
        assert_eq!(config.font_step, 4);
        assert_eq!(config.default_font_size, DEFAULT_FONT_SIZE);
        assert_eq!(config.flush_interval, Duration::from_secs(30));
        assert!(config.history_limit.is_none());
    }

    #[test]
    fn durations_are_read_as_milliseconds() {
        let config =
            ReaderConfig::from_toml("flush_interval_ms = 5000\nsearch_debounce_ms = 300\nhistory_limit = 64\n")
                .unwrap();
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.search_debounce, Duration::from_millis(300));
        assert_eq!(config.history_limit, Some(64));
    }

    #[test]
    fn absent_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ReaderConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, ReaderConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "font_step = \"large\"").unwrap();
        assert!(ReaderConfig::load(&path).is_err());
    }
}
