// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Configuration for the embedded distributed store.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_DATA_DIR: &str = "./data/kv";
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:11000";
pub const DEFAULT_RAFT_ADDR: &str = "127.0.0.1:12000";
pub const DEFAULT_BEACON_BIND: &str = "0.0.0.0:9999";
pub const DEFAULT_BEACON_ANNOUNCE: &str = "255.255.255.255:9999";
pub const DEFAULT_BEACON_INTERVAL_MS: u64 = 1_000;

/// Engine tuning. Unset fields are filled by [`apply_defaults`](Self::apply_defaults)
/// when the store first starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedConfig {
    /// Identity announced on the beacon and used by the engine.
    pub node_id: Option<String>,
    /// How long a fresh node waits for the beacon to find peers before
    /// bootstrapping its own cluster.
    pub join_timeout_ms: Option<u64>,
    /// Where engine state is kept.
    pub data_dir: Option<PathBuf>,
    /// Local HTTP listener of the engine.
    pub http_addr: Option<SocketAddr>,
    /// Local consensus listener of the engine.
    pub raft_addr: Option<SocketAddr>,
    /// Forget remembered peers when state is loaded.
    pub reset_peers_on_load: Option<bool>,
    /// Skip discovery entirely and run a one-node cluster.
    pub single_node: bool,
    pub beacon: BeaconConfig,
    /// TLS material for the consensus transport. Absent means plaintext.
    pub tls: Option<TransportTlsConfig>,
}

impl DistributedConfig {
    /// Fill every unset field with its documented default.
    pub fn apply_defaults(&mut self) {
        self.node_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        self.join_timeout_ms.get_or_insert(DEFAULT_JOIN_TIMEOUT_MS);
        self.data_dir
            .get_or_insert_with(|| PathBuf::from(DEFAULT_DATA_DIR));
        self.http_addr
            .get_or_insert_with(|| parse_default(DEFAULT_HTTP_ADDR));
        self.raft_addr
            .get_or_insert_with(|| parse_default(DEFAULT_RAFT_ADDR));
        self.reset_peers_on_load.get_or_insert(true);
        self.beacon.apply_defaults();
    }

    /// The configured node id, or an empty string before defaults apply.
    pub fn node_id(&self) -> &str {
        self.node_id.as_deref().unwrap_or_default()
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms.unwrap_or(DEFAULT_JOIN_TIMEOUT_MS))
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_DATA_DIR))
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
            .unwrap_or_else(|| parse_default(DEFAULT_HTTP_ADDR))
    }

    pub fn raft_addr(&self) -> SocketAddr {
        self.raft_addr
            .unwrap_or_else(|| parse_default(DEFAULT_RAFT_ADDR))
    }

    pub fn reset_peers_on_load(&self) -> bool {
        self.reset_peers_on_load.unwrap_or(true)
    }
}

/// Discovery heartbeat settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub bind_addr: Option<SocketAddr>,
    pub announce_addr: Option<SocketAddr>,
    pub interval_ms: Option<u64>,
}

impl BeaconConfig {
    pub fn apply_defaults(&mut self) {
        self.bind_addr
            .get_or_insert_with(|| parse_default(DEFAULT_BEACON_BIND));
        self.announce_addr
            .get_or_insert_with(|| parse_default(DEFAULT_BEACON_ANNOUNCE));
        self.interval_ms.get_or_insert(DEFAULT_BEACON_INTERVAL_MS);
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
            .unwrap_or_else(|| parse_default(DEFAULT_BEACON_BIND))
    }

    pub fn announce_addr(&self) -> SocketAddr {
        self.announce_addr
            .unwrap_or_else(|| parse_default(DEFAULT_BEACON_ANNOUNCE))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.unwrap_or(DEFAULT_BEACON_INTERVAL_MS).max(1))
    }
}

/// Certificate and key for the consensus transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportTlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

// The constants above are valid socket addresses.
fn parse_default(addr: &str) -> SocketAddr {
    addr.parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_unset_fields() {
        let mut config = DistributedConfig::default();
        config.apply_defaults();
        assert!(!config.node_id().is_empty());
        assert_eq!(config.join_timeout(), Duration::from_secs(5));
        assert_eq!(config.data_dir(), Path::new("./data/kv"));
        assert_eq!(config.http_addr().port(), 11000);
        assert_eq!(config.raft_addr().port(), 12000);
        assert!(config.reset_peers_on_load());
        assert_eq!(config.beacon.bind_addr().port(), 9999);
        assert_eq!(config.beacon.interval(), Duration::from_secs(1));
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_defaults_keep_explicit_values() {
        let mut config = DistributedConfig {
            join_timeout_ms: Some(0),
            data_dir: Some(PathBuf::from("/var/lib/kv")),
            reset_peers_on_load: Some(false),
            ..Default::default()
        };
        config.apply_defaults();
        assert_eq!(config.join_timeout(), Duration::ZERO);
        assert_eq!(config.data_dir(), Path::new("/var/lib/kv"));
        assert!(!config.reset_peers_on_load());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: DistributedConfig =
            serde_json::from_str(r#"{"single_node": true, "beacon": {"interval_ms": 250}}"#).unwrap();
        assert!(config.single_node);
        assert_eq!(config.beacon.interval(), Duration::from_millis(250));
        assert_eq!(config.join_timeout_ms, None);
    }
}
