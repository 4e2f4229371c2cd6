// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fallback key session manager.
//
// Reads and writes per-token session state through whichever token store the
// factory selected. The store is injected at construction; there is no
// global lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::handler::StorageHandler;

/// Rate limit and quota state attached to an API token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    /// Requests allowed per `per` seconds.
    pub rate: f64,
    pub per: f64,
    pub quota_max: i64,
    pub quota_remaining: i64,
    /// Unix seconds after which the token is no longer valid; 0 never expires.
    pub expires: i64,
    pub org_id: String,
    pub tags: Vec<String>,
}

/// Session storage over an injected token store.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn StorageHandler>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn StorageHandler>) -> Self {
        Self { store }
    }

    /// The token store this manager was initialised with.
    pub fn store(&self) -> &Arc<dyn StorageHandler> {
        &self.store
    }

    /// Load the session for `key`. `None` if absent; decode and backend
    /// failures are returned.
    pub async fn session_detail(&self, key: &str) -> StorageResult<Option<SessionState>> {
        match self.store.get_key(key).await {
            Ok(raw) => {
                let session = serde_json::from_str(&raw)?;
                Ok(Some(session))
            }
            Err(StorageError::NotFound(_)) => {
                debug!("no session for key");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn update_session(
        &self,
        key: &str,
        session: &SessionState,
        ttl_seconds: i64,
    ) -> StorageResult<()> {
        let raw = serde_json::to_string(session)?;
        self.store.set_key(key, &raw, ttl_seconds).await
    }

    pub async fn remove_session(&self, key: &str) -> bool {
        let removed = self.store.delete_key(key).await;
        if !removed {
            warn!(backend = self.store.name(), "session removal had no effect");
        }
        removed
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.store.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCacheStore;
    use crate::memory::MemoryEngine;

    fn manager() -> SessionManager {
        let store = LocalCacheStore::new(Arc::new(MemoryEngine::new()), "apikey-", true);
        SessionManager::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let sessions = manager();
        assert_eq!(sessions.session_detail("tok").await.unwrap(), None);

        let state = SessionState {
            rate: 100.0,
            per: 60.0,
            quota_max: 1000,
            quota_remaining: 999,
            org_id: "org-1".to_string(),
            tags: vec!["beta".to_string()],
            ..Default::default()
        };
        sessions.update_session("tok", &state, 0).await.unwrap();
        assert_eq!(sessions.session_detail("tok").await.unwrap(), Some(state));

        assert!(sessions.remove_session("tok").await);
        assert!(!sessions.remove_session("tok").await);
        assert_eq!(sessions.session_detail("tok").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_session_is_serialization_error() {
        let sessions = manager();
        sessions.store().set_key("tok", "{broken", 0).await.unwrap();
        assert!(matches!(
            sessions.session_detail("tok").await,
            Err(StorageError::SerializationError(_))
        ));
    }
}
