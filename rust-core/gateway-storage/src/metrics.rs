// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metrics-collecting wrapper for storage handlers.
//
// Wraps any `StorageHandler` and transparently collects operation counts,
// latency sums, and byte transfer totals. Set operations route through the
// wrapper's own raw get/set, so they are counted as the scalar calls they
// really are. Optionally exports the same counts to a Prometheus registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use prometheus::{CounterVec, IntCounterVec, Opts, Registry};
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::handler::{RollingWindow, StorageHandler};
use crate::keys::KeyCodec;
use crate::sets::SetEmulation;

/// Accumulated statistics for a storage handler.
///
/// All counters are monotonically increasing for the lifetime of the
/// [`MetricsHandler`] that owns them, until [`MetricsHandler::reset_stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerStats {
    /// Number of raw `get` operations performed.
    pub get_count: u64,
    /// Number of raw `get` operations that found nothing.
    pub miss_count: u64,
    /// Number of raw `set` operations performed.
    pub set_count: u64,
    /// Number of raw `delete` operations performed.
    pub delete_count: u64,
    /// Cumulative wall-clock latency of all `get` calls, in milliseconds.
    pub get_latency_sum_ms: f64,
    /// Cumulative wall-clock latency of all `set` calls, in milliseconds.
    pub set_latency_sum_ms: f64,
    /// Total value bytes returned by `get`.
    pub total_bytes_read: u64,
    /// Total value bytes accepted by `set`.
    pub total_bytes_written: u64,
}

#[derive(Clone)]
struct PrometheusMetrics {
    operations: IntCounterVec,
    latency_seconds: CounterVec,
}

/// A storage handler wrapper that collects operation metrics.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use gateway_storage::cache::LocalCacheStore;
/// use gateway_storage::memory::MemoryEngine;
/// use gateway_storage::metrics::MetricsHandler;
/// use gateway_storage::StorageHandler;
///
/// # tokio_test::block_on(async {
/// let inner = LocalCacheStore::new(Arc::new(MemoryEngine::new()), "apikey-", false);
/// let metered = MetricsHandler::new(inner);
///
/// metered.set_key("key", "value", 0).await.unwrap();
/// metered.get_key("key").await.unwrap();
///
/// let stats = metered.stats().await;
/// assert_eq!(stats.set_count, 1);
/// assert_eq!(stats.get_count, 1);
/// # });
/// ```
pub struct MetricsHandler<H: StorageHandler> {
    inner: H,
    stats: Arc<RwLock<HandlerStats>>,
    prometheus: Option<PrometheusMetrics>,
}

impl<H: StorageHandler> MetricsHandler<H> {
    /// Wrap `inner` with metrics collection.
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            stats: Arc::new(RwLock::new(HandlerStats::default())),
            prometheus: None,
        }
    }

    /// Also export operation counts and latencies to `registry`, labelled
    /// by backend name and operation.
    pub fn with_prometheus(mut self, registry: Registry) -> StorageResult<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "gateway_storage_operations_total",
                "Storage operations by backend and operation",
            ),
            &["backend", "op"],
        )
        .map_err(|e| StorageError::Configuration(e.to_string()))?;
        registry
            .register(Box::new(operations.clone()))
            .map_err(|e| StorageError::Configuration(e.to_string()))?;

        let latency_seconds = CounterVec::new(
            Opts::new(
                "gateway_storage_latency_seconds_total",
                "Cumulative storage latency by backend and operation",
            ),
            &["backend", "op"],
        )
        .map_err(|e| StorageError::Configuration(e.to_string()))?;
        registry
            .register(Box::new(latency_seconds.clone()))
            .map_err(|e| StorageError::Configuration(e.to_string()))?;

        self.prometheus = Some(PrometheusMetrics {
            operations,
            latency_seconds,
        });
        Ok(self)
    }

    /// Return a snapshot of the current statistics.
    pub async fn stats(&self) -> HandlerStats {
        self.stats.read().await.clone()
    }

    /// Reset all statistics to zero.
    pub async fn reset_stats(&self) {
        let mut s = self.stats.write().await;
        *s = HandlerStats::default();
    }

    /// Return a reference to the inner handler.
    pub fn inner(&self) -> &H {
        &self.inner
    }

    fn export(&self, op: &str, started: Instant) {
        if let Some(ref prom) = self.prometheus {
            let labels = [self.inner.name(), op];
            prom.operations.with_label_values(&labels).inc();
            prom.latency_seconds
                .with_label_values(&labels)
                .inc_by(started.elapsed().as_secs_f64());
        }
    }
}

#[async_trait]
impl<H: StorageHandler> StorageHandler for MetricsHandler<H> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn codec(&self) -> &KeyCodec {
        self.inner.codec()
    }

    fn set_emulation(&self) -> &SetEmulation {
        self.inner.set_emulation()
    }

    async fn connect(&self) -> StorageResult<()> {
        self.inner.connect().await
    }

    async fn get_raw_key(&self, key: &str) -> StorageResult<String> {
        let start = Instant::now();
        let result = self.inner.get_raw_key(key).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut s = self.stats.write().await;
        s.get_count += 1;
        s.get_latency_sum_ms += elapsed_ms;
        match result {
            Ok(ref val) => s.total_bytes_read += val.len() as u64,
            Err(ref e) if e.is_not_found() => s.miss_count += 1,
            Err(_) => {}
        }
        drop(s);
        self.export("get", start);

        result
    }

    async fn set_raw_key(&self, key: &str, value: &str, ttl_seconds: i64) -> StorageResult<()> {
        let start = Instant::now();
        let result = self.inner.set_raw_key(key, value, ttl_seconds).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut s = self.stats.write().await;
        s.set_count += 1;
        s.set_latency_sum_ms += elapsed_ms;
        if result.is_ok() {
            s.total_bytes_written += value.len() as u64;
        }
        drop(s);
        self.export("set", start);

        result
    }

    async fn delete_raw_key(&self, key: &str) -> bool {
        let start = Instant::now();
        let mut s = self.stats.write().await;
        s.delete_count += 1;
        drop(s); // Release lock before the potentially slow operation.
        let deleted = self.inner.delete_raw_key(key).await;
        self.export("delete", start);
        deleted
    }

    async fn set_rolling_window(
        &self,
        key: &str,
        per_seconds: i64,
        value_override: &str,
    ) -> StorageResult<RollingWindow> {
        let start = Instant::now();
        let result = self
            .inner
            .set_rolling_window(key, per_seconds, value_override)
            .await;
        self.export("rolling_window", start);
        result
    }

    async fn set_rolling_window_pipeline(
        &self,
        key: &str,
        per_seconds: i64,
        value_override: &str,
    ) -> StorageResult<RollingWindow> {
        let start = Instant::now();
        let result = self
            .inner
            .set_rolling_window_pipeline(key, per_seconds, value_override)
            .await;
        self.export("rolling_window", start);
        result
    }

    async fn get_keys(&self, pattern: &str) -> Vec<String> {
        self.inner.get_keys(pattern).await
    }

    async fn get_keys_and_values_with_filter(&self, pattern: &str) -> HashMap<String, String> {
        self.inner.get_keys_and_values_with_filter(pattern).await
    }

    async fn increment_with_expire(&self, key: &str, ttl_seconds: i64) -> i64 {
        self.inner.increment_with_expire(key, ttl_seconds).await
    }

    async fn delete_scan_match(&self, pattern: &str) -> bool {
        self.inner.delete_scan_match(pattern).await
    }
}

impl<H: StorageHandler + std::fmt::Debug> std::fmt::Debug for MetricsHandler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHandler")
            .field("inner", &self.inner)
            .field("prometheus", &self.prometheus.is_some())
            .finish()
    }
}
