// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// redb-backed state file for the embedded engine.
//
// Uses redb (pure Rust, B-tree, ACID, single-file database) so the embedded
// engine's key/value state survives restarts.
//
// # Design
//
// - One table mapping storage key -> JSON `PersistedEntry`.
// - Expiry is stored as absolute Unix milliseconds, since the engine clock
//   restarts with the process. Expired rows are skipped on load.
// - Every call runs inside `spawn_blocking`; redb serialises writers itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::EngineError;

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// A persisted value with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub value: String,
    pub expires_at_unix_ms: Option<i64>,
}

/// A single redb file holding engine state.
pub struct StateFile {
    db: Arc<Database>,
    path: PathBuf,
}

impl StateFile {
    /// Open or create the state file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }

        let db = Database::create(&path).map_err(|e| {
            EngineError::Unavailable(format!("failed to open redb at {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), "opened engine state file");

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn put(&self, key: &str, entry: &PersistedEntry) -> Result<(), EngineError> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| EngineError::Unavailable(format!("encode entry: {e}")))?;

        tokio::task::spawn_blocking(move || -> Result<(), EngineError> {
            let txn = db
                .begin_write()
                .map_err(|e| EngineError::Unavailable(format!("write txn: {e}")))?;
            {
                let mut table = txn
                    .open_table(ENTRIES)
                    .map_err(|e| EngineError::Unavailable(format!("open table: {e}")))?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| EngineError::Unavailable(format!("insert: {e}")))?;
            }
            txn.commit()
                .map_err(|e| EngineError::Unavailable(format!("commit: {e}")))
        })
        .await
        .map_err(|e| EngineError::Unavailable(format!("task join: {e}")))?
    }

    pub async fn remove(&self, key: &str) -> Result<(), EngineError> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<(), EngineError> {
            let txn = db
                .begin_write()
                .map_err(|e| EngineError::Unavailable(format!("write txn: {e}")))?;
            {
                let mut table = txn
                    .open_table(ENTRIES)
                    .map_err(|e| EngineError::Unavailable(format!("open table: {e}")))?;
                table
                    .remove(key.as_str())
                    .map_err(|e| EngineError::Unavailable(format!("remove: {e}")))?;
            }
            txn.commit()
                .map_err(|e| EngineError::Unavailable(format!("commit: {e}")))
        })
        .await
        .map_err(|e| EngineError::Unavailable(format!("task join: {e}")))?
    }

    /// Every stored row. Rows that fail to decode are skipped.
    pub async fn load(&self) -> Result<Vec<(String, PersistedEntry)>, EngineError> {
        let db = Arc::clone(&self.db);

        tokio::task::spawn_blocking(move || -> Result<Vec<(String, PersistedEntry)>, EngineError> {
            let txn = db
                .begin_read()
                .map_err(|e| EngineError::Unavailable(format!("read txn: {e}")))?;
            let table = match txn.open_table(ENTRIES) {
                Ok(t) => t,
                // Table doesn't exist yet: nothing was ever written
                Err(_) => return Ok(Vec::new()),
            };

            let mut rows = Vec::new();
            let iter = table
                .iter()
                .map_err(|e| EngineError::Unavailable(format!("scan: {e}")))?;
            for row in iter {
                let (k, v) = row.map_err(|e| EngineError::Unavailable(format!("scan entry: {e}")))?;
                match serde_json::from_slice::<PersistedEntry>(v.value()) {
                    Ok(entry) => rows.push((k.value().to_string(), entry)),
                    Err(e) => debug!(key = k.value(), error = %e, "skipping undecodable row"),
                }
            }
            Ok(rows)
        })
        .await
        .map_err(|e| EngineError::Unavailable(format!("task join: {e}")))?
    }
}

impl std::fmt::Debug for StateFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateFile").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::open(dir.path().join("nested").join("store.redb")).unwrap();
        assert!(file.load().await.unwrap().is_empty());

        let entry = PersistedEntry {
            value: "v".to_string(),
            expires_at_unix_ms: Some(42),
        };
        file.put("apikey-1", &entry).await.unwrap();
        assert_eq!(file.load().await.unwrap(), vec![("apikey-1".to_string(), entry)]);

        file.remove("apikey-1").await.unwrap();
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");
        {
            let file = StateFile::open(&path).unwrap();
            let entry = PersistedEntry {
                value: "kept".to_string(),
                expires_at_unix_ms: None,
            };
            file.put("k", &entry).await.unwrap();
        }
        let file = StateFile::open(&path).unwrap();
        assert_eq!(file.load().await.unwrap()[0].1.value, "kept");
    }
}
