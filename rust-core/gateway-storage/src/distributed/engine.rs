// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Consensus engine seam and the embedded default engine.
//
// The store treats the replicated-log engine as a black box: it starts it
// with a discovery beacon, stops it, and issues CRUD against it. Unlike a
// plain map, `update` refuses missing keys and `create` refuses present ones,
// which is why the store layers create-or-update on top.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::beacon::Beacon;
use super::config::DistributedConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::memory::{MemoryEngine, WriteOutcome};

#[cfg(feature = "redb-backend")]
use super::persist::{PersistedEntry, StateFile};

const PEERS_FILE: &str = "peers.json";
const PEER_POLL: Duration = Duration::from_millis(50);

/// Wall-clock expiry stored alongside persisted values. A TTL too large to
/// represent is stored as no expiry.
#[cfg_attr(not(feature = "redb-backend"), allow(dead_code))]
fn persisted_deadline(now_unix_ms: i64, ttl_seconds: i64) -> Option<i64> {
    if ttl_seconds <= 0 {
        return None;
    }
    ttl_seconds
        .checked_mul(1000)
        .and_then(|span| now_unix_ms.checked_add(span))
}

/// Errors reported by a consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine is not running")]
    Stopped,
}

impl From<EngineError> for StorageError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(key) => StorageError::NotFound(key),
            other => StorageError::BackendUnavailable(other.to_string()),
        }
    }
}

/// A replicated key/value engine the distributed store drives.
#[async_trait]
pub trait ConsensusEngine: Send + Sync + fmt::Debug {
    /// Start the engine, using `beacon` (if any) to find or seed peers.
    async fn start(&self, beacon: Option<Arc<Beacon>>) -> Result<(), EngineError>;

    /// Stop serving. Later calls fail with [`EngineError::Stopped`].
    async fn stop(&self);

    async fn get(&self, key: &str) -> Result<String, EngineError>;

    /// Create a key that must not exist yet.
    async fn create(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), EngineError>;

    /// Update a key that must already exist.
    async fn update(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), EngineError>;

    async fn delete(&self, key: &str) -> Result<(), EngineError>;

    /// Node ids of the current cluster members, this node included.
    async fn members(&self) -> Vec<String>;
}

/// Builds the engine for a store when it first connects.
pub type EngineBuilder =
    Arc<dyn Fn(&DistributedConfig) -> Result<Arc<dyn ConsensusEngine>, EngineError> + Send + Sync>;

/// The builder used unless one is injected: an [`EmbeddedEngine`].
pub fn embedded_engine_builder() -> EngineBuilder {
    Arc::new(
        |config: &DistributedConfig| -> Result<Arc<dyn ConsensusEngine>, EngineError> {
            Ok(Arc::new(EmbeddedEngine::new(config.clone())))
        },
    )
}

/// In-process engine: commands are applied in order to a TTL-aware state
/// machine on this node. Membership comes from the beacon and is remembered
/// in `data_dir/peers.json`. With the `redb-backend` feature the state itself
/// survives restarts in `data_dir/store.redb`.
#[derive(Debug)]
pub struct EmbeddedEngine {
    config: DistributedConfig,
    node_id: String,
    state: MemoryEngine,
    running: AtomicBool,
    /// node id -> consensus address
    peers: RwLock<BTreeMap<String, String>>,
    beacon: Mutex<Option<Arc<Beacon>>>,
    #[cfg(feature = "redb-backend")]
    state_file: Mutex<Option<Arc<StateFile>>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PeerList {
    peers: BTreeMap<String, String>,
}

impl EmbeddedEngine {
    pub fn new(config: DistributedConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(mut config: DistributedConfig, clock: Arc<dyn Clock>) -> Self {
        config.apply_defaults();
        Self {
            node_id: config.node_id().to_string(),
            config,
            state: MemoryEngine::with_clock(clock),
            running: AtomicBool::new(false),
            peers: RwLock::new(BTreeMap::new()),
            beacon: Mutex::new(None),
            #[cfg(feature = "redb-backend")]
            state_file: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EngineError::Stopped)
        }
    }

    fn peers_path(&self) -> PathBuf {
        self.config.data_dir().join(PEERS_FILE)
    }

    /// Refuse to start with unreadable TLS material; warn when there is none.
    async fn check_transport_security(&self) -> Result<(), EngineError> {
        match &self.config.tls {
            Some(tls) => {
                for path in [&tls.cert_path, &tls.key_path] {
                    tokio::fs::metadata(path).await.map_err(|e| {
                        EngineError::Unavailable(format!(
                            "TLS material {} is not readable: {e}",
                            path.display()
                        ))
                    })?;
                }
                debug!(cert = %tls.cert_path.display(), "consensus transport TLS enabled");
            }
            None if !self.config.single_node => {
                warn!("consensus transport is running without TLS; configure distributed.tls");
            }
            None => {}
        }
        Ok(())
    }

    async fn load_peers(&self) -> Result<(), EngineError> {
        let path = self.peers_path();
        if self.config.reset_peers_on_load() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "remembered peers reset"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(error = %e, "failed to reset remembered peers"),
            }
            self.peers.write().await.clear();
            return Ok(());
        }

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(EngineError::Unavailable(format!("read peers: {e}"))),
        };
        match serde_json::from_slice::<PeerList>(&raw) {
            Ok(list) => {
                debug!(count = list.peers.len(), "loaded remembered peers");
                *self.peers.write().await = list.peers;
            }
            Err(e) => warn!(error = %e, "ignoring unreadable peers file"),
        }
        Ok(())
    }

    async fn save_peers(&self) {
        let list = PeerList {
            peers: self.peers.read().await.clone(),
        };
        let result = match serde_json::to_vec_pretty(&list) {
            Ok(raw) => tokio::fs::write(self.peers_path(), raw).await,
            Err(e) => Err(std::io::Error::other(e)),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to remember peers");
        }
    }

    async fn absorb_beacon_peers(&self, beacon: &Beacon) -> usize {
        let heard = beacon.peers().await;
        let mut peers = self.peers.write().await;
        for peer in heard {
            peers.insert(peer.node_id, peer.raft_addr);
        }
        peers.len()
    }

    /// Wait up to the join timeout for the beacon to hear someone.
    async fn discover(&self, beacon: &Beacon) -> usize {
        let deadline = tokio::time::Instant::now() + self.config.join_timeout();
        loop {
            let found = self.absorb_beacon_peers(beacon).await;
            if found > 0 || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(PEER_POLL).await;
        }
    }

    #[cfg(feature = "redb-backend")]
    async fn open_state_file(&self) -> Result<(), EngineError> {
        let file = Arc::new(StateFile::open(self.config.data_dir().join("store.redb"))?);
        let now = chrono::Utc::now().timestamp_millis();
        let mut restored = 0usize;
        let mut expired = Vec::new();
        for (key, entry) in file.load().await? {
            let ttl = match entry.expires_at_unix_ms {
                None => 0,
                Some(at) if at > now => (at - now + 999) / 1000,
                Some(_) => {
                    expired.push(key);
                    continue;
                }
            };
            self.state.set(&key, &entry.value, ttl).await;
            restored += 1;
        }
        for key in &expired {
            file.remove(key).await?;
        }
        info!(restored, pruned = expired.len(), "engine state loaded");
        *self.state_file.lock().unwrap_or_else(|p| p.into_inner()) = Some(file);
        Ok(())
    }

    #[cfg(feature = "redb-backend")]
    fn state_file(&self) -> Option<Arc<StateFile>> {
        self.state_file
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    #[cfg(feature = "redb-backend")]
    async fn persist_write(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), EngineError> {
        if let Some(file) = self.state_file() {
            let entry = PersistedEntry {
                value: value.to_string(),
                expires_at_unix_ms: persisted_deadline(chrono::Utc::now().timestamp_millis(), ttl_seconds),
            };
            file.put(key, &entry).await?;
        }
        Ok(())
    }

    #[cfg(not(feature = "redb-backend"))]
    async fn persist_write(&self, _key: &str, _value: &str, _ttl_seconds: i64) -> Result<(), EngineError> {
        Ok(())
    }

    #[cfg(feature = "redb-backend")]
    async fn persist_delete(&self, key: &str) -> Result<(), EngineError> {
        if let Some(file) = self.state_file() {
            file.remove(key).await?;
        }
        Ok(())
    }

    #[cfg(not(feature = "redb-backend"))]
    async fn persist_delete(&self, _key: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

#[async_trait]
impl ConsensusEngine for EmbeddedEngine {
    async fn start(&self, beacon: Option<Arc<Beacon>>) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }
        self.check_transport_security().await?;
        tokio::fs::create_dir_all(self.config.data_dir())
            .await
            .map_err(|e| {
                EngineError::Unavailable(format!(
                    "cannot create data dir {}: {e}",
                    self.config.data_dir().display()
                ))
            })?;
        self.load_peers().await?;

        #[cfg(feature = "redb-backend")]
        self.open_state_file().await?;

        match &beacon {
            Some(beacon) => {
                let found = self.discover(beacon).await;
                if found == 0 {
                    info!(node_id = %self.node_id, "no peers answered, bootstrapping a new cluster");
                } else {
                    info!(node_id = %self.node_id, peers = found, "joining existing cluster");
                }
            }
            None => info!(node_id = %self.node_id, "starting single-node cluster"),
        }
        *self.beacon.lock().unwrap_or_else(|p| p.into_inner()) = beacon;
        self.save_peers().await;

        self.running.store(true, Ordering::SeqCst);
        info!(
            raft_addr = %self.config.raft_addr(),
            http_addr = %self.config.http_addr(),
            "embedded engine running"
        );
        Ok(())
    }

    async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.beacon
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .take();
            #[cfg(feature = "redb-backend")]
            self.state_file
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .take();
            info!(node_id = %self.node_id, "embedded engine stopped");
        }
    }

    async fn get(&self, key: &str) -> Result<String, EngineError> {
        self.ensure_running()?;
        self.state
            .get(key)
            .await
            .ok_or_else(|| EngineError::NotFound(key.to_string()))
    }

    async fn create(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), EngineError> {
        self.ensure_running()?;
        match self.state.insert_new(key, value, ttl_seconds).await {
            WriteOutcome::Exists => Err(EngineError::KeyExists(key.to_string())),
            _ => self.persist_write(key, value, ttl_seconds).await,
        }
    }

    async fn update(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), EngineError> {
        self.ensure_running()?;
        match self.state.update_existing(key, value, ttl_seconds).await {
            WriteOutcome::Missing => Err(EngineError::NotFound(key.to_string())),
            _ => self.persist_write(key, value, ttl_seconds).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        self.ensure_running()?;
        if !self.state.delete(key).await {
            // Absent or expired in memory; an expired row may still be on disk.
            if let Err(e) = self.persist_delete(key).await {
                warn!(key, error = %e, "failed to prune persisted key");
            }
            return Err(EngineError::NotFound(key.to_string()));
        }
        self.persist_delete(key).await
    }

    async fn members(&self) -> Vec<String> {
        let beacon = self
            .beacon
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(beacon) = beacon {
            self.absorb_beacon_peers(&beacon).await;
        }
        let mut members = vec![self.node_id.clone()];
        members.extend(self.peers.read().await.keys().cloned());
        members
    }
}
