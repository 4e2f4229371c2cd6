// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Set emulation over scalar key/value backends.
//
// A set is persisted as one JSON object mapping each member to itself, so any
// backend able to store a single string can host it. Mutations are
// read-modify-write cycles through the handler's raw get/set.
//
// # Concurrency
//
// The cycle is NOT atomic against the backend. Two writers mutating the same
// set can race and one update is silently lost. Writers inside one process
// are serialised by a per-key async lock, provided their handlers share one
// `SetEmulation`; every handler a `StorageFactory` builds shares the one
// owned by its `StorageContext`. Writers in different processes are not
// serialised, since none of the backends expose a compare-and-swap token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::handler::{SetRecord, StorageHandler};

/// Decode a stored set record. Empty values decode as the empty set.
pub fn decode_set(raw: &str) -> StorageResult<SetRecord> {
    if raw.trim().is_empty() {
        return Ok(SetRecord::new());
    }
    serde_json::from_str(raw).map_err(|e| {
        StorageError::SerializationError(format!("set record is not a string mapping: {e}"))
    })
}

/// Encode a set record as a JSON string mapping.
pub fn encode_set(set: &SetRecord) -> StorageResult<String> {
    Ok(serde_json::to_string(set)?)
}

type LockTable = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Read-modify-write set operations, composed into every storage adapter.
///
/// Clones share one lock table.
#[derive(Debug, Clone, Default)]
pub struct SetEmulation {
    /// In-process writers per storage key.
    locks: LockTable,
}

impl SetEmulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the set under `storage_key`; an absent key yields an empty set.
    pub async fn read<H>(&self, handler: &H, storage_key: &str) -> StorageResult<SetRecord>
    where
        H: StorageHandler + ?Sized,
    {
        match handler.get_raw_key(storage_key).await {
            Ok(raw) => decode_set(&raw),
            Err(e) if e.is_not_found() => Ok(SetRecord::new()),
            Err(e) => Err(e),
        }
    }

    /// Insert `member`. Adding a present member writes nothing.
    pub async fn add<H>(&self, handler: &H, storage_key: &str, member: &str) -> StorageResult<()>
    where
        H: StorageHandler + ?Sized,
    {
        let entry = self.key_lock(storage_key);
        let _guard = entry.lock.lock().await;
        let mut set = self.read(handler, storage_key).await?;
        if set.contains_key(member) {
            debug!(key = %storage_key, "member already present");
            return Ok(());
        }
        set.insert(member.to_string(), member.to_string());
        let encoded = encode_set(&set)?;
        handler.set_raw_key(storage_key, &encoded, 0).await
    }

    /// Remove `member`. Removing an absent member writes nothing.
    pub async fn remove<H>(&self, handler: &H, storage_key: &str, member: &str) -> StorageResult<()>
    where
        H: StorageHandler + ?Sized,
    {
        let entry = self.key_lock(storage_key);
        let _guard = entry.lock.lock().await;
        let mut set = self.read(handler, storage_key).await?;
        if set.remove(member).is_none() {
            return Ok(());
        }
        let encoded = encode_set(&set)?;
        handler.set_raw_key(storage_key, &encoded, 0).await
    }

    fn key_lock(&self, storage_key: &str) -> KeyLock {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        KeyLock {
            table: Arc::clone(&self.locks),
            key: storage_key.to_string(),
            lock: Arc::clone(locks.entry(storage_key.to_string()).or_default()),
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

/// A reference to one key's writer lock. Dropping the last reference removes
/// the key from the table, on every exit path.
struct KeyLock {
    table: LockTable,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        let mut locks = self.table.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the table, one held here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}
