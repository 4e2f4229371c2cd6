// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Embedded distributed store.
//
// Adapts a consensus-replicated engine to `StorageHandler`.
//
// # Lifecycle
//
// - The process-wide handle lives in a `DistributedRuntime` owned by the
//   application's `StorageContext`. The first `connect()` (or first
//   operation) applies config defaults, starts the discovery beacon unless
//   running single-node, and starts the engine. Concurrent first callers are
//   serialised by a `OnceCell`; later calls are no-ops.
// - A failed startup is returned as `StorageError::Fatal`; the application
//   is expected to stop rather than run with half-initialised storage.
// - Scoped stores (`DistributedStore::scoped`) own their handle instead, and
//   `connect()` on them tears down and restarts beacon and engine.

pub mod beacon;
pub mod config;
pub mod engine;
#[cfg(feature = "redb-backend")]
pub mod persist;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info};

use crate::error::{StorageError, StorageResult};
use crate::handler::{RollingWindow, StorageHandler};
use crate::keys::KeyCodec;
use crate::sets::SetEmulation;

pub use beacon::{Beacon, BeaconMessage, PeerInfo};
pub use config::{BeaconConfig, DistributedConfig, TransportTlsConfig};
pub use engine::{embedded_engine_builder, ConsensusEngine, EmbeddedEngine, EngineBuilder, EngineError};

const RATE_LIMITER_ONLY: &str =
    "the distributed store can only be used with the distributed rate limiter";

/// A started engine and the beacon it was started with.
#[derive(Debug)]
pub struct DistributedHandle {
    engine: Arc<dyn ConsensusEngine>,
    beacon: Option<Arc<Beacon>>,
}

impl DistributedHandle {
    /// Apply defaults, start discovery (unless single-node), then the engine.
    pub async fn start(config: &DistributedConfig, builder: &EngineBuilder) -> StorageResult<Self> {
        let mut config = config.clone();
        config.apply_defaults();

        let beacon = if config.single_node {
            None
        } else {
            let announce = BeaconMessage {
                node_id: config.node_id().to_string(),
                raft_addr: config.raft_addr().to_string(),
                http_addr: config.http_addr().to_string(),
                sent_at: 0,
            };
            let beacon = Beacon::start(&config.beacon, announce)
                .await
                .map_err(|e| StorageError::Fatal(format!("could not create a beacon: {e}")))?;
            Some(Arc::new(beacon))
        };

        let engine = builder(&config).map_err(|e| {
            StorageError::Fatal(format!("failed to create a new distributed store: {e}"))
        })?;
        if let Err(e) = engine.start(beacon.clone()).await {
            if let Some(beacon) = &beacon {
                beacon.stop();
            }
            return Err(StorageError::Fatal(format!(
                "failed to start the distributed store: {e}"
            )));
        }

        Ok(Self { engine, beacon })
    }

    pub fn engine(&self) -> &Arc<dyn ConsensusEngine> {
        &self.engine
    }

    pub fn beacon(&self) -> Option<&Arc<Beacon>> {
        self.beacon.as_ref()
    }

    pub async fn stop(&self) {
        self.engine.stop().await;
        if let Some(beacon) = &self.beacon {
            beacon.stop();
        }
    }
}

/// The process-wide distributed handle, created at most once.
pub struct DistributedRuntime {
    config: DistributedConfig,
    builder: EngineBuilder,
    handle: OnceCell<Arc<DistributedHandle>>,
}

impl DistributedRuntime {
    pub fn new(config: DistributedConfig) -> Self {
        Self::with_builder(config, embedded_engine_builder())
    }

    pub fn with_builder(config: DistributedConfig, builder: EngineBuilder) -> Self {
        Self {
            config,
            builder,
            handle: OnceCell::new(),
        }
    }

    /// The running handle, starting it on first use.
    pub async fn handle(&self) -> StorageResult<Arc<DistributedHandle>> {
        self.handle
            .get_or_try_init(|| async {
                info!("starting embedded distributed store");
                DistributedHandle::start(&self.config, &self.builder)
                    .await
                    .map(Arc::new)
            })
            .await
            .cloned()
    }

    pub fn is_started(&self) -> bool {
        self.handle.initialized()
    }
}

impl std::fmt::Debug for DistributedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedRuntime")
            .field("config", &self.config)
            .field("started", &self.is_started())
            .finish()
    }
}

enum Slot {
    Shared(Arc<DistributedRuntime>),
    Scoped {
        config: DistributedConfig,
        builder: EngineBuilder,
        current: Mutex<Option<Arc<DistributedHandle>>>,
    },
}

/// A [`StorageHandler`] over the consensus-replicated engine.
pub struct DistributedStore {
    codec: KeyCodec,
    sets: SetEmulation,
    slot: Slot,
}

impl DistributedStore {
    /// A store sharing the process-wide handle in `runtime`.
    pub fn shared(runtime: Arc<DistributedRuntime>, key_prefix: &str, hash_keys: bool) -> Self {
        Self {
            codec: KeyCodec::new(key_prefix, hash_keys),
            sets: SetEmulation::new(),
            slot: Slot::Shared(runtime),
        }
    }

    /// A store owning its own engine; `connect()` restarts it.
    pub fn scoped(
        config: DistributedConfig,
        builder: EngineBuilder,
        key_prefix: &str,
        hash_keys: bool,
    ) -> Self {
        Self {
            codec: KeyCodec::new(key_prefix, hash_keys),
            sets: SetEmulation::new(),
            slot: Slot::Scoped {
                config,
                builder,
                current: Mutex::new(None),
            },
        }
    }

    /// Serialise set mutations with every other handler holding `sets`.
    pub fn with_set_emulation(mut self, sets: SetEmulation) -> Self {
        self.sets = sets;
        self
    }

    async fn handle(&self) -> StorageResult<Arc<DistributedHandle>> {
        match &self.slot {
            Slot::Shared(runtime) => runtime.handle().await,
            Slot::Scoped {
                config,
                builder,
                current,
            } => {
                let mut current = current.lock().await;
                if let Some(handle) = current.as_ref() {
                    return Ok(Arc::clone(handle));
                }
                let handle = Arc::new(DistributedHandle::start(config, builder).await?);
                *current = Some(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    async fn engine(&self) -> StorageResult<Arc<dyn ConsensusEngine>> {
        Ok(Arc::clone(self.handle().await?.engine()))
    }

    /// Cluster members as seen by the engine.
    pub async fn members(&self) -> StorageResult<Vec<String>> {
        Ok(self.engine().await?.members().await)
    }
}

impl std::fmt::Debug for DistributedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scope = match self.slot {
            Slot::Shared(_) => "shared",
            Slot::Scoped { .. } => "scoped",
        };
        f.debug_struct("DistributedStore")
            .field("codec", &self.codec)
            .field("scope", &scope)
            .finish()
    }
}

#[async_trait]
impl StorageHandler for DistributedStore {
    fn name(&self) -> &str {
        "distributed"
    }

    fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    fn set_emulation(&self) -> &SetEmulation {
        &self.sets
    }

    async fn connect(&self) -> StorageResult<()> {
        match &self.slot {
            Slot::Shared(runtime) => runtime.handle().await.map(|_| ()),
            Slot::Scoped {
                config,
                builder,
                current,
            } => {
                let mut current = current.lock().await;
                if let Some(old) = current.take() {
                    debug!("reconnecting scoped distributed store");
                    old.stop().await;
                }
                let handle = DistributedHandle::start(config, builder).await?;
                *current = Some(Arc::new(handle));
                Ok(())
            }
        }
    }

    async fn get_raw_key(&self, key: &str) -> StorageResult<String> {
        Ok(self.engine().await?.get(key).await?)
    }

    /// Create-or-update: the engine's update refuses missing keys, so probe
    /// first and fall back across the two paths if a concurrent writer or an
    /// expiry changes the answer in between.
    async fn set_raw_key(&self, key: &str, value: &str, ttl_seconds: i64) -> StorageResult<()> {
        let engine = self.engine().await?;
        match engine.get(key).await {
            Ok(_) => match engine.update(key, value, ttl_seconds).await {
                Err(EngineError::NotFound(_)) => engine.create(key, value, ttl_seconds).await?,
                other => other?,
            },
            Err(EngineError::NotFound(_)) => match engine.create(key, value, ttl_seconds).await {
                Err(EngineError::KeyExists(_)) => engine.update(key, value, ttl_seconds).await?,
                other => other?,
            },
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn delete_raw_key(&self, key: &str) -> bool {
        let engine = match self.engine().await {
            Ok(engine) => engine,
            Err(e) => {
                error!(key, error = %e, "delete failed");
                return false;
            }
        };
        match engine.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                error!(key, error = %e, "delete failed");
                false
            }
        }
    }

    async fn set_rolling_window(
        &self,
        _key: &str,
        _per_seconds: i64,
        _value_override: &str,
    ) -> StorageResult<RollingWindow> {
        error!("{RATE_LIMITER_ONLY}");
        Err(StorageError::Fatal(RATE_LIMITER_ONLY.to_string()))
    }

    async fn set_rolling_window_pipeline(
        &self,
        _key: &str,
        _per_seconds: i64,
        _value_override: &str,
    ) -> StorageResult<RollingWindow> {
        error!("{RATE_LIMITER_ONLY}");
        Err(StorageError::Fatal(RATE_LIMITER_ONLY.to_string()))
    }
}
