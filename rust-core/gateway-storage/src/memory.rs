// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory key/value engine with per-key expiry.
//
// Uses a `BTreeMap` wrapped in a tokio `RwLock` for thread-safe, ordered
// storage. Expired entries are evicted lazily on access and in bulk by
// `purge_expired`. Backs the local cache adapter and serves as the state
// machine of the embedded distributed engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::handler::RollingWindow;

/// A stored value and its expiry deadline on the engine clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: String,
    /// Deadline in clock milliseconds; `None` never expires.
    pub expires_at: Option<u64>,
}

impl Entry {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// `insert_new` found a live key.
    Exists,
    /// `update_existing` found no live key.
    Missing,
}

#[derive(Debug, Default)]
struct State {
    data: BTreeMap<String, Entry>,
    windows: BTreeMap<String, Window>,
}

#[derive(Debug, Default)]
struct Window {
    hits: Vec<(u64, String)>,
    expires_at: u64,
}

/// An ordered, TTL-aware in-memory engine.
///
/// Clones share state, making it suitable for handing one engine to several
/// adapters and tokio tasks.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    state: Arc<RwLock<State>>,
    clock: Arc<dyn Clock>,
}

impl MemoryEngine {
    /// Create an empty engine reading time from the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty engine reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            clock,
        }
    }

    /// Deadline for a TTL. A TTL too large to represent never expires.
    fn deadline(&self, ttl_seconds: i64) -> Option<u64> {
        if ttl_seconds <= 0 {
            return None;
        }
        (ttl_seconds as u64)
            .checked_mul(1000)
            .and_then(|span| self.clock.now_millis().checked_add(span))
    }

    /// Return the live value under `key`.
    pub async fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        {
            let state = self.state.read().await;
            match state.data.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: evict under the write lock.
        let mut state = self.state.write().await;
        if state.data.get(key).is_some_and(|e| !e.is_live(now)) {
            state.data.remove(key);
        }
        None
    }

    /// Create or overwrite `key`. A non-positive TTL clears any expiry.
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: i64) {
        let entry = Entry {
            value: value.to_string(),
            expires_at: self.deadline(ttl_seconds),
        };
        self.state.write().await.data.insert(key.to_string(), entry);
    }

    /// Write `key` only if it holds no live value.
    pub async fn insert_new(&self, key: &str, value: &str, ttl_seconds: i64) -> WriteOutcome {
        let now = self.clock.now_millis();
        let expires_at = self.deadline(ttl_seconds);
        let mut state = self.state.write().await;
        if state.data.get(key).is_some_and(|e| e.is_live(now)) {
            return WriteOutcome::Exists;
        }
        state.data.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        WriteOutcome::Written
    }

    /// Overwrite `key` only if it holds a live value.
    pub async fn update_existing(&self, key: &str, value: &str, ttl_seconds: i64) -> WriteOutcome {
        let now = self.clock.now_millis();
        let expires_at = self.deadline(ttl_seconds);
        let mut state = self.state.write().await;
        match state.data.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.value = value.to_string();
                entry.expires_at = expires_at;
                WriteOutcome::Written
            }
            _ => WriteOutcome::Missing,
        }
    }

    /// Remove `key`. Returns true if a live value was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let mut state = self.state.write().await;
        state.windows.remove(key);
        state.data.remove(key).is_some_and(|e| e.is_live(now))
    }

    /// Live keys matching a glob pattern, in lexicographic order.
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        let now = self.clock.now_millis();
        let state = self.state.read().await;
        state
            .data
            .iter()
            .filter(|(k, e)| e.is_live(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Live key/value pairs matching a glob pattern.
    pub async fn entries(&self, pattern: &str) -> Vec<(String, String)> {
        let now = self.clock.now_millis();
        let state = self.state.read().await;
        state
            .data
            .iter()
            .filter(|(k, e)| e.is_live(now) && glob_match(pattern, k))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Increment an integer counter. The expiry is set only when the
    /// counter is created. Non-numeric values restart the count at 1.
    pub async fn increment_with_expire(&self, key: &str, ttl_seconds: i64) -> i64 {
        let now = self.clock.now_millis();
        let expires_at = self.deadline(ttl_seconds);
        let mut state = self.state.write().await;
        let live = state.data.get(key).filter(|e| e.is_live(now)).cloned();
        let (count, expires_at) = match live {
            Some(entry) => {
                let count = entry.value.parse::<i64>().unwrap_or(0).saturating_add(1);
                (count, entry.expires_at)
            }
            None => (1, expires_at),
        };
        state.data.insert(
            key.to_string(),
            Entry {
                value: count.to_string(),
                expires_at,
            },
        );
        count
    }

    /// Remove every key matching a glob pattern; returns how many went.
    pub async fn delete_matching(&self, pattern: &str) -> usize {
        let mut state = self.state.write().await;
        let doomed: Vec<String> = state
            .data
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        for key in &doomed {
            state.data.remove(key);
        }
        doomed.len()
    }

    /// Sliding-log rate counter: drop hits older than `per_seconds`, report
    /// what is left, then record this hit and push the key's expiry out.
    pub async fn rolling_window(&self, key: &str, per_seconds: i64, value_override: &str) -> RollingWindow {
        let now = self.clock.now_millis();
        let span = (per_seconds.max(0) as u64).saturating_mul(1000);
        let floor = now.saturating_sub(span);
        let mut state = self.state.write().await;
        let window = state.windows.entry(key.to_string()).or_default();
        if window.expires_at <= now {
            window.hits.clear();
        }
        window.hits.retain(|(at, _)| *at > floor);

        let result = RollingWindow {
            count: window.hits.len(),
            entries: window.hits.iter().map(|(_, v)| v.clone()).collect(),
        };

        let value = if value_override.is_empty() || value_override == "-1" {
            now.to_string()
        } else {
            value_override.to_string()
        };
        window.hits.push((now, value));
        window.expires_at = now.saturating_add(span);
        result
    }

    /// Drop every expired entry and window. Returns the number of entries removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut state = self.state.write().await;
        let before = state.data.len();
        state.data.retain(|_, e| e.is_live(now));
        state.windows.retain(|_, w| w.expires_at > now);
        before - state.data.len()
    }

    /// Live entries with their remaining TTL in seconds (0 = no expiry).
    pub async fn snapshot(&self) -> Vec<(String, String, i64)> {
        let now = self.clock.now_millis();
        let state = self.state.read().await;
        state
            .data
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| {
                let ttl = e
                    .expires_at
                    .map_or(0, |deadline| (deadline - now).div_ceil(1000) as i64);
                (k.clone(), e.value.clone(), ttl)
            })
            .collect()
    }

    /// Return the number of live keys.
    pub async fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.state
            .read()
            .await
            .data
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Return true if the engine holds no live keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Glob matching with `*` (any run) and `?` (any single character).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn engine() -> (MemoryEngine, ManualClock) {
        let clock = ManualClock::new();
        (MemoryEngine::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_basic_crud() {
        let (engine, _) = engine();

        assert!(engine.is_empty().await);
        assert_eq!(engine.get("key1").await, None);

        engine.set("key1", "value1", 0).await;
        assert_eq!(engine.get("key1").await.as_deref(), Some("value1"));
        assert_eq!(engine.len().await, 1);

        engine.set("key1", "updated", 0).await;
        assert_eq!(engine.get("key1").await.as_deref(), Some("updated"));
        assert_eq!(engine.len().await, 1);

        assert!(engine.delete("key1").await);
        assert_eq!(engine.get("key1").await, None);
        assert!(!engine.delete("nonexistent").await);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (engine, clock) = engine();
        engine.set("temp", "v", 5).await;
        clock.advance(Duration::from_millis(4_999));
        assert_eq!(engine.get("temp").await.as_deref(), Some("v"));
        clock.advance(Duration::from_millis(1));
        assert_eq!(engine.get("temp").await, None);
        assert!(engine.is_empty().await);
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_expire() {
        let (engine, clock) = engine();
        engine.set("k", "v", i64::MAX).await;
        assert_eq!(engine.insert_new("n", "v", i64::MAX).await, WriteOutcome::Written);
        assert_eq!(engine.increment_with_expire("c", i64::MAX).await, 1);
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(engine.get("k").await.as_deref(), Some("v"));
        assert_eq!(engine.get("n").await.as_deref(), Some("v"));
        assert_eq!(engine.increment_with_expire("c", 1).await, 2);

        let window = engine.rolling_window("rl", i64::MAX, "a").await;
        assert_eq!(window.count, 0);
        assert_eq!(engine.rolling_window("rl", i64::MAX, "b").await.entries, vec!["a"]);
    }

    #[tokio::test]
    async fn test_overwrite_clears_ttl() {
        let (engine, clock) = engine();
        engine.set("key", "temp", 1).await;
        engine.set("key", "forever", 0).await;
        clock.advance(Duration::from_secs(10));
        assert_eq!(engine.get("key").await.as_deref(), Some("forever"));
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let (engine, clock) = engine();
        assert_eq!(engine.update_existing("k", "v", 0).await, WriteOutcome::Missing);
        assert_eq!(engine.insert_new("k", "v", 1).await, WriteOutcome::Written);
        assert_eq!(engine.insert_new("k", "w", 0).await, WriteOutcome::Exists);
        assert_eq!(engine.update_existing("k", "w", 0).await, WriteOutcome::Written);
        assert_eq!(engine.get("k").await.as_deref(), Some("w"));

        engine.set("gone", "x", 1).await;
        clock.advance(Duration::from_secs(2));
        assert_eq!(engine.update_existing("gone", "y", 0).await, WriteOutcome::Missing);
        assert_eq!(engine.insert_new("gone", "y", 0).await, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn test_keys_and_entries_by_pattern() {
        let (engine, _) = engine();
        engine.set("apikey-1", "a", 0).await;
        engine.set("apikey-2", "b", 0).await;
        engine.set("orgkey.1", "c", 0).await;

        assert_eq!(engine.keys("apikey-*").await, vec!["apikey-1", "apikey-2"]);
        assert_eq!(engine.keys("*.?").await, vec!["orgkey.1"]);
        assert_eq!(
            engine.entries("org*").await,
            vec![("orgkey.1".to_string(), "c".to_string())]
        );
        assert_eq!(engine.delete_matching("apikey-*").await, 2);
        assert_eq!(engine.len().await, 1);
    }

    #[tokio::test]
    async fn test_increment_keeps_first_expiry() {
        let (engine, clock) = engine();
        assert_eq!(engine.increment_with_expire("hits", 10).await, 1);
        clock.advance(Duration::from_secs(6));
        assert_eq!(engine.increment_with_expire("hits", 10).await, 2);
        clock.advance(Duration::from_secs(5));
        assert_eq!(engine.increment_with_expire("hits", 10).await, 1);
    }

    #[tokio::test]
    async fn test_rolling_window_counts_previous_hits() {
        let (engine, clock) = engine();
        let first = engine.rolling_window("rl", 10, "a").await;
        assert_eq!(first.count, 0);

        clock.advance(Duration::from_secs(3));
        let second = engine.rolling_window("rl", 10, "b").await;
        assert_eq!(second.count, 1);
        assert_eq!(second.entries, vec!["a"]);

        clock.advance(Duration::from_secs(8));
        let third = engine.rolling_window("rl", 10, "c").await;
        assert_eq!(third.entries, vec!["b"]);
    }

    #[tokio::test]
    async fn test_purge_and_snapshot() {
        let (engine, clock) = engine();
        engine.set("short", "1", 1).await;
        engine.set("long", "2", 100).await;
        engine.set("forever", "3", 0).await;
        clock.advance(Duration::from_millis(1_500));

        assert_eq!(engine.purge_expired().await, 1);
        let snapshot = engine.snapshot().await;
        assert_eq!(
            snapshot,
            vec![
                ("forever".to_string(), "3".to_string(), 0),
                ("long".to_string(), "2".to_string(), 99),
            ]
        );
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let engine = MemoryEngine::new();
        let clone = engine.clone();
        engine.set("shared", "data", 0).await;
        assert_eq!(clone.get("shared").await.as_deref(), Some("data"));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*key*", "apikey-1"));
        assert!(!glob_match("org*", "apikey-1"));
    }
}
