// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage configuration.
//
// Loaded from a JSON file, then overridden field by field from `GATEWAY_*`
// environment variables. Every field has a default, so an empty document
// (or no document at all) yields a local-cache-only deployment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::distributed::DistributedConfig;
use crate::error::{StorageError, StorageResult};

pub const DEFAULT_RPC_CALL_TIMEOUT_SECS: u64 = 30;

/// Backend selection and key handling for every logical store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Hash token keys before they reach the backend.
    pub hash_keys: bool,
    /// Use the embedded distributed store instead of the local cache.
    pub enable_embedded_kv: bool,
    pub slave_options: SlaveOptions,
    pub distributed: DistributedConfig,
}

/// Settings for running as an RPC slave of an upstream storage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaveOptions {
    pub use_rpc: bool,
    pub connection_string: String,
    pub api_key: String,
    pub call_timeout_secs: u64,
}

impl Default for SlaveOptions {
    fn default() -> Self {
        Self {
            use_rpc: false,
            connection_string: String::new(),
            api_key: String::new(),
            call_timeout_secs: DEFAULT_RPC_CALL_TIMEOUT_SECS,
        }
    }
}

impl SlaveOptions {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

impl StorageConfig {
    /// Read a JSON configuration document.
    pub fn from_json_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            StorageError::Configuration(format!("invalid config {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded storage configuration");
        Ok(config)
    }

    /// Apply `GATEWAY_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| -> Option<bool> {
            let raw = lookup(name)?;
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" | "" => Some(false),
                _ => {
                    warn!(variable = name, value = %raw, "ignoring non-boolean override");
                    None
                }
            }
        };

        if let Some(v) = flag("GATEWAY_HASH_KEYS") {
            self.hash_keys = v;
        }
        if let Some(v) = flag("GATEWAY_ENABLE_EMBEDDED_KV") {
            self.enable_embedded_kv = v;
        }
        if let Some(v) = flag("GATEWAY_RPC_ENABLED") {
            self.slave_options.use_rpc = v;
        }
        if let Some(v) = lookup("GATEWAY_RPC_ADDRESS") {
            self.slave_options.connection_string = v;
        }
        if let Some(v) = lookup("GATEWAY_RPC_KEY") {
            self.slave_options.api_key = v;
        }
        if let Some(v) = lookup("GATEWAY_KV_DATA_DIR") {
            self.distributed.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = flag("GATEWAY_KV_SINGLE_NODE") {
            self.distributed.single_node = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert!(!config.hash_keys);
        assert!(!config.enable_embedded_kv);
        assert!(!config.slave_options.use_rpc);
        assert_eq!(config.slave_options.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"hash_keys": true, "slave_options": {{"use_rpc": true, "connection_string": "rpc:9091"}},
                "distributed": {{"single_node": true}}}}"#
        )
        .unwrap();

        let config = StorageConfig::from_json_file(file.path()).unwrap();
        assert!(config.hash_keys);
        assert!(config.slave_options.use_rpc);
        assert_eq!(config.slave_options.connection_string, "rpc:9091");
        assert_eq!(config.slave_options.call_timeout_secs, 30);
        assert!(config.distributed.single_node);
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            StorageConfig::from_json_file(file.path()),
            Err(StorageError::Configuration(_))
        ));
        assert!(matches!(
            StorageConfig::from_json_file("/nonexistent/gateway.json"),
            Err(StorageError::Io(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GATEWAY_HASH_KEYS", "true"),
            ("GATEWAY_ENABLE_EMBEDDED_KV", "1"),
            ("GATEWAY_RPC_ENABLED", "maybe"),
            ("GATEWAY_RPC_ADDRESS", "upstream:9091"),
            ("GATEWAY_KV_DATA_DIR", "/tmp/kv"),
            ("GATEWAY_KV_SINGLE_NODE", "yes"),
        ]
        .into_iter()
        .collect();

        let mut config = StorageConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert!(config.hash_keys);
        assert!(config.enable_embedded_kv);
        assert!(!config.slave_options.use_rpc);
        assert_eq!(config.slave_options.connection_string, "upstream:9091");
        assert_eq!(config.slave_options.api_key, "");
        assert_eq!(config.distributed.data_dir, Some(PathBuf::from("/tmp/kv")));
        assert!(config.distributed.single_node);
    }
}
