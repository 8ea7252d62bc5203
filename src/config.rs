//! Server-wide configuration.
//!
//! One `Config` is parsed once at startup and threaded into the registry
//! and every `Index` it opens. Values can come from a JSON config file
//! (loaded with `serde_json`, already part of the wire-protocol stack)
//! and are overridable via environment variables for container deploys.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables named throughout the component design (§4 of the design doc).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory under which each index gets its own subdirectory.
    pub data_dir: PathBuf,

    /// Address the HTTP surface binds to.
    pub http_bind_addr: String,

    /// Stage size (bytes, estimated) that triggers a checkpoint.
    pub checkpoint_bytes_threshold: usize,

    /// Merge policy size ratio `R` between adjacent tiers.
    pub merge_ratio: u32,

    /// Merge policy fan-in `K`: segments sharing a tier needed to trigger a merge.
    pub merge_fan_in: usize,

    /// Oplog file size (bytes) that triggers rotation to a new file.
    pub oplog_file_bytes_threshold: u64,

    /// Whether to fsync the oplog file after every appended record.
    pub fsync_on_append: bool,

    /// Default `limit` for `_search` when the request omits it.
    pub search_default_limit: u32,

    /// Default `timeout` (milliseconds) for `_search` when the request omits it.
    pub search_default_timeout_ms: u64,

    /// Minimum segment count at open before segment validation is parallelized.
    pub parallel_load_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            http_bind_addr: "0.0.0.0:8080".to_string(),
            checkpoint_bytes_threshold: 8 * 1024 * 1024,
            merge_ratio: 4,
            merge_fan_in: 4,
            oplog_file_bytes_threshold: 64 * 1024 * 1024,
            fsync_on_append: true,
            search_default_limit: 40,
            search_default_timeout_ms: 500,
            parallel_load_threshold: 2,
        }
    }
}

impl Config {
    /// Load from a JSON file, falling back to defaults for any field the
    /// file omits (via `#[serde(default)]`).
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: Config = serde_json::from_slice(&bytes)?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of a base config.
    /// Recognized variables: `AINDEX_DATA_DIR`, `AINDEX_HTTP_BIND_ADDR`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("AINDEX_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("AINDEX_HTTP_BIND_ADDR") {
            self.http_bind_addr = addr;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_match_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.merge_ratio, 4);
        assert_eq!(config.merge_fan_in, 4);
        assert_eq!(config.search_default_limit, 40);
        assert_eq!(config.search_default_timeout_ms, 500);
        assert_eq!(config.parallel_load_threshold, 2);
    }

    #[test]
    fn from_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"merge_fan_in": 8}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.merge_fan_in, 8);
        assert_eq!(config.merge_ratio, 4); // default
    }

    #[test]
    fn env_override_applies() {
        std::env::set_var("AINDEX_HTTP_BIND_ADDR", "127.0.0.1:9999");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.http_bind_addr, "127.0.0.1:9999");
        std::env::remove_var("AINDEX_HTTP_BIND_ADDR");
    }
}
