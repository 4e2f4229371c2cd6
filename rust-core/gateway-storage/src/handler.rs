// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core storage contract for the gateway.
//
// Defines the `StorageHandler` trait that every backend adapter (local cache,
// embedded distributed store, remote RPC node) implements. Adapters provide
// the raw scalar operations; key transformation and set emulation are shared
// default methods layered on top, so every backend presents the same surface.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::StorageResult;
use crate::keys::KeyCodec;
use crate::sets::SetEmulation;

/// Members of an emulated set, stored as a `member -> member` mapping.
pub type SetRecord = BTreeMap<String, String>;

/// Result of a rolling-window counter update.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RollingWindow {
    /// Number of entries inside the window before this call added its own.
    pub count: usize,
    /// The entries inside the window before this call.
    pub entries: Vec<String>,
}

/// The uniform key/value contract every gateway feature stores data through.
///
/// Values are opaque strings owned by the caller. TTLs are whole seconds from
/// write time; zero or negative means "no expiry".
///
/// Implementations must be safe to share across threads and tokio tasks.
#[async_trait]
pub trait StorageHandler: Send + Sync {
    /// A human-readable backend name, used in logging and metrics.
    fn name(&self) -> &str;

    /// The key transform this handler applies to logical keys.
    fn codec(&self) -> &KeyCodec;

    /// The set-emulation component shared by all adapters.
    fn set_emulation(&self) -> &SetEmulation;

    /// Prepare the backend for use. Safe to call more than once.
    async fn connect(&self) -> StorageResult<()>;

    /// Read the value stored under an already-qualified storage key.
    ///
    /// Absent and expired keys surface as [`StorageError::NotFound`](crate::StorageError::NotFound).
    async fn get_raw_key(&self, key: &str) -> StorageResult<String>;

    /// Create or update the value under an already-qualified storage key.
    async fn set_raw_key(&self, key: &str, value: &str, ttl_seconds: i64) -> StorageResult<()>;

    /// Delete an already-qualified storage key. Best effort: failures are
    /// logged and reported as `false`.
    async fn delete_raw_key(&self, key: &str) -> bool;

    /// Rolling-window rate counter. Backends without atomic counters return
    /// [`StorageError::Fatal`](crate::StorageError::Fatal).
    async fn set_rolling_window(
        &self,
        key: &str,
        per_seconds: i64,
        value_override: &str,
    ) -> StorageResult<RollingWindow>;

    /// Pipelined variant of [`set_rolling_window`](Self::set_rolling_window).
    async fn set_rolling_window_pipeline(
        &self,
        key: &str,
        per_seconds: i64,
        value_override: &str,
    ) -> StorageResult<RollingWindow>;

    async fn get_key(&self, key: &str) -> StorageResult<String> {
        self.get_raw_key(&self.codec().encode(key)).await
    }

    async fn set_key(&self, key: &str, value: &str, ttl_seconds: i64) -> StorageResult<()> {
        self.set_raw_key(&self.codec().encode(key), value, ttl_seconds)
            .await
    }

    async fn delete_key(&self, key: &str) -> bool {
        self.delete_raw_key(&self.codec().encode(key)).await
    }

    /// Read the set stored under `key`. An absent key is an empty set.
    async fn get_set(&self, key: &str) -> StorageResult<SetRecord> {
        let storage_key = self.codec().encode(key);
        self.set_emulation().read(self, &storage_key).await
    }

    /// Add `member` to the set under `key`. Failures are logged, not returned.
    async fn add_to_set(&self, key: &str, member: &str) {
        let storage_key = self.codec().encode(key);
        if let Err(e) = self.set_emulation().add(self, &storage_key, member).await {
            error!(key = %storage_key, error = %e, "failed to add to set");
        }
    }

    /// Remove `member` from the set under `key`. Failures are logged, not returned.
    async fn remove_from_set(&self, key: &str, member: &str) {
        let storage_key = self.codec().encode(key);
        if let Err(e) = self
            .set_emulation()
            .remove(self, &storage_key, member)
            .await
        {
            error!(key = %storage_key, error = %e, "failed to remove from set");
        }
    }

    /// List logical keys matching a glob pattern.
    async fn get_keys(&self, _pattern: &str) -> Vec<String> {
        warn!(backend = self.name(), "key lists are not supported");
        Vec::new()
    }

    /// List logical keys and their values matching a glob pattern.
    async fn get_keys_and_values_with_filter(&self, _pattern: &str) -> HashMap<String, String> {
        warn!(backend = self.name(), "key/value lists are not supported");
        HashMap::new()
    }

    /// Atomically increment a counter, setting its expiry on creation.
    async fn increment_with_expire(&self, _key: &str, _ttl_seconds: i64) -> i64 {
        warn!(
            backend = self.name(),
            "increment with expire is not supported, use a backend with atomic counters"
        );
        0
    }

    /// Delete every key matching a glob pattern.
    async fn delete_scan_match(&self, _pattern: &str) -> bool {
        warn!(
            backend = self.name(),
            "scan matched deletes are not supported, use an explicit cache backend"
        );
        false
    }
}
