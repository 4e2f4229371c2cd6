// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local cluster cache adapter.
//
// Adapts the shared `MemoryEngine` to `StorageHandler`. Unlike the
// distributed store, the cache engine natively offers key listing, atomic
// counters and rolling windows, so nothing here is refused.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::handler::{RollingWindow, StorageHandler};
use crate::keys::KeyCodec;
use crate::memory::MemoryEngine;
use crate::sets::SetEmulation;

/// A [`StorageHandler`] over the process-local cache engine.
#[derive(Debug)]
pub struct LocalCacheStore {
    engine: Arc<MemoryEngine>,
    codec: KeyCodec,
    sets: SetEmulation,
    is_cache: bool,
}

impl LocalCacheStore {
    pub fn new(engine: Arc<MemoryEngine>, key_prefix: &str, hash_keys: bool) -> Self {
        Self {
            engine,
            codec: KeyCodec::new(key_prefix, hash_keys),
            sets: SetEmulation::new(),
            is_cache: false,
        }
    }

    /// Serialise set mutations with every other handler holding `sets`.
    pub fn with_set_emulation(mut self, sets: SetEmulation) -> Self {
        self.sets = sets;
        self
    }

    /// Mark this handler as holding derived, cache-only data.
    pub fn as_cache(mut self) -> Self {
        self.is_cache = true;
        self
    }

    pub fn is_cache(&self) -> bool {
        self.is_cache
    }

    pub fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }
}

#[async_trait]
impl StorageHandler for LocalCacheStore {
    fn name(&self) -> &str {
        "local-cache"
    }

    fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    fn set_emulation(&self) -> &SetEmulation {
        &self.sets
    }

    async fn connect(&self) -> StorageResult<()> {
        debug!(prefix = self.codec.prefix(), cache = self.is_cache, "local cache ready");
        Ok(())
    }

    async fn get_raw_key(&self, key: &str) -> StorageResult<String> {
        self.engine
            .get(key)
            .await
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn set_raw_key(&self, key: &str, value: &str, ttl_seconds: i64) -> StorageResult<()> {
        self.engine.set(key, value, ttl_seconds).await;
        Ok(())
    }

    async fn delete_raw_key(&self, key: &str) -> bool {
        self.engine.delete(key).await
    }

    async fn set_rolling_window(
        &self,
        key: &str,
        per_seconds: i64,
        value_override: &str,
    ) -> StorageResult<RollingWindow> {
        Ok(self
            .engine
            .rolling_window(&self.codec.encode(key), per_seconds, value_override)
            .await)
    }

    async fn set_rolling_window_pipeline(
        &self,
        key: &str,
        per_seconds: i64,
        value_override: &str,
    ) -> StorageResult<RollingWindow> {
        self.set_rolling_window(key, per_seconds, value_override)
            .await
    }

    async fn get_keys(&self, pattern: &str) -> Vec<String> {
        let search = format!("{}{}", self.codec.prefix(), pattern);
        self.engine
            .keys(&search)
            .await
            .iter()
            .map(|k| self.codec.decode(k))
            .collect()
    }

    async fn get_keys_and_values_with_filter(&self, pattern: &str) -> HashMap<String, String> {
        let search = format!("{}{}", self.codec.prefix(), pattern);
        self.engine
            .entries(&search)
            .await
            .into_iter()
            .map(|(k, v)| (self.codec.decode(&k), v))
            .collect()
    }

    async fn increment_with_expire(&self, key: &str, ttl_seconds: i64) -> i64 {
        self.engine
            .increment_with_expire(&self.codec.encode(key), ttl_seconds)
            .await
    }

    async fn delete_scan_match(&self, pattern: &str) -> bool {
        let removed = self.engine.delete_matching(pattern).await;
        debug!(pattern, removed, "scan delete");
        removed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(prefix: &str, hash: bool) -> LocalCacheStore {
        LocalCacheStore::new(Arc::new(MemoryEngine::new()), prefix, hash)
    }

    #[tokio::test]
    async fn test_set_get_update() {
        let store = store("apikey-", false);
        store.set_key("k", "v1", 60).await.unwrap();
        assert_eq!(store.get_key("k").await.unwrap(), "v1");
        store.set_key("k", "v2", 60).await.unwrap();
        assert_eq!(store.get_key("k").await.unwrap(), "v2");
        assert_eq!(store.get_raw_key("apikey-k").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = store("apikey-", false);
        assert!(store.get_key("never").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_and_raw_delete() {
        let store = store("orgkey.", false);
        store.set_key("a", "1", 0).await.unwrap();
        store.set_key("b", "2", 0).await.unwrap();
        assert!(store.delete_key("a").await);
        assert!(store.delete_raw_key("orgkey.b").await);
        assert!(!store.delete_key("a").await);
    }

    #[tokio::test]
    async fn test_prefixes_isolate_stores_on_one_engine() {
        let engine = Arc::new(MemoryEngine::new());
        let tokens = LocalCacheStore::new(Arc::clone(&engine), "apikey-", false);
        let orgs = LocalCacheStore::new(engine, "orgkey.", false);
        tokens.set_key("1", "token", 0).await.unwrap();
        orgs.set_key("1", "org", 0).await.unwrap();
        assert_eq!(tokens.get_key("1").await.unwrap(), "token");
        assert_eq!(orgs.get_key("1").await.unwrap(), "org");
    }

    #[tokio::test]
    async fn test_hashed_keys_hide_logical_key() {
        let store = store("apikey-", true);
        store.set_key("secret-token", "v", 0).await.unwrap();
        assert!(store.get_keys("*").await.iter().all(|k| k != "secret-token"));
        assert_eq!(store.get_key("secret-token").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_listing_and_counters() {
        let store = store("health.", false);
        store.set_key("api1.a", "1", 0).await.unwrap();
        store.set_key("api1.b", "2", 0).await.unwrap();
        store.set_key("api2.a", "3", 0).await.unwrap();

        let mut keys = store.get_keys("api1.*").await;
        keys.sort();
        assert_eq!(keys, vec!["api1.a", "api1.b"]);

        let values = store.get_keys_and_values_with_filter("api2*").await;
        assert_eq!(values.get("api2.a").map(String::as_str), Some("3"));

        assert_eq!(store.increment_with_expire("hits", 60).await, 1);
        assert_eq!(store.increment_with_expire("hits", 60).await, 2);

        assert!(store.delete_scan_match("health.api1.*").await);
        assert!(store.get_key("api1.a").await.is_err());
    }

    #[tokio::test]
    async fn test_rolling_window_is_served() {
        let store = store("rl.", false);
        let first = store.set_rolling_window("client", 60, "-1").await.unwrap();
        let second = store
            .set_rolling_window_pipeline("client", 60, "-1")
            .await
            .unwrap();
        assert_eq!(first.count, 0);
        assert_eq!(second.count, 1);
    }

    #[test]
    fn test_cache_flag() {
        assert!(store("c.", false).as_cache().is_cache());
        assert!(!store("c.", false).is_cache());
    }
}
