// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Backend selection.
//
// Decides, from the deployment configuration, which handler backs each
// logical store:
//
// | store                | RPC slave mode  | embedded KV     | otherwise   |
// |----------------------|-----------------|-----------------|-------------|
// | token / org          | (not consulted) | distributed     | local cache |
// | global               | RPC             | distributed     | local cache |
// | global local         | (not consulted) | distributed     | local cache |
// | global local cache   | local cache     | local cache     | local cache |
//
// The health store is always the local cache and the RPC auth/org stores are
// always remote, whatever the mode.

use std::sync::Arc;

use tracing::info;

use crate::cache::LocalCacheStore;
use crate::context::StorageContext;
use crate::distributed::DistributedStore;
use crate::error::StorageResult;
use crate::handler::StorageHandler;
use crate::rpc::RemoteRpcStore;
use crate::session::SessionManager;

pub const TOKEN_PREFIX: &str = "apikey-";
pub const ORG_PREFIX: &str = "orgkey.";
pub const HEALTH_PREFIX: &str = "apihealth.";
pub const WEBHOOK_CACHE_PREFIX: &str = "webhook.cache.";

/// The handles produced at startup.
#[derive(Clone)]
pub struct PreparedStores {
    pub token_store: Arc<dyn StorageHandler>,
    pub org_store: Arc<dyn StorageHandler>,
    pub health_store: Arc<dyn StorageHandler>,
    pub rpc_auth_store: Arc<dyn StorageHandler>,
    pub rpc_org_store: Arc<dyn StorageHandler>,
    /// Session manager initialised with `token_store`.
    pub session_manager: SessionManager,
}

impl std::fmt::Debug for PreparedStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStores")
            .field("token_store", &self.token_store.name())
            .field("org_store", &self.org_store.name())
            .field("health_store", &self.health_store.name())
            .field("rpc_auth_store", &self.rpc_auth_store.name())
            .field("rpc_org_store", &self.rpc_org_store.name())
            .finish()
    }
}

/// Hands out storage handlers over a shared [`StorageContext`].
#[derive(Debug, Clone)]
pub struct StorageFactory {
    context: Arc<StorageContext>,
}

impl StorageFactory {
    pub fn new(context: Arc<StorageContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<StorageContext> {
        &self.context
    }

    /// Build the token, org and health stores plus the RPC auth and org
    /// stores, and wire the session manager to the token store.
    pub async fn prepare_storage(&self) -> StorageResult<PreparedStores> {
        let hash_keys = self.context.config().hash_keys;

        let (token_store, org_store) = if self.context.config().enable_embedded_kv {
            (self.distributed(TOKEN_PREFIX, hash_keys), self.distributed(ORG_PREFIX, false))
        } else {
            (self.cache(TOKEN_PREFIX, hash_keys), self.cache(ORG_PREFIX, false))
        };
        let health_store = self.cache(HEALTH_PREFIX, false);
        // Resolved lazily: a bad RPC address only matters when RPC is used.
        let rpc_auth_store = self.rpc(TOKEN_PREFIX, hash_keys);
        let rpc_org_store = self.rpc(ORG_PREFIX, false);

        let session_manager = SessionManager::new(Arc::clone(&token_store));

        info!(
            token_store = token_store.name(),
            org_store = org_store.name(),
            "storage prepared"
        );

        Ok(PreparedStores {
            token_store,
            org_store,
            health_store,
            rpc_auth_store,
            rpc_org_store,
            session_manager,
        })
    }

    /// The distributed store in embedded mode, otherwise the local cache.
    pub fn global_local(&self, key_prefix: &str, hash_keys: bool) -> Arc<dyn StorageHandler> {
        if self.context.config().enable_embedded_kv {
            self.distributed(key_prefix, hash_keys)
        } else {
            self.cache(key_prefix, hash_keys)
        }
    }

    /// Always the local cache: derived data is never replicated or proxied.
    pub fn global_local_cache(&self, key_prefix: &str, hash_keys: bool) -> Arc<dyn StorageHandler> {
        Arc::new(
            LocalCacheStore::new(Arc::clone(self.context.cache_engine()), key_prefix, hash_keys)
                .with_set_emulation(self.context.set_emulation().clone())
                .as_cache(),
        )
    }

    /// RPC in slave mode, else the distributed store in embedded mode, else
    /// the local cache. In slave mode the RPC address is validated here.
    pub async fn global(&self, key_prefix: &str, hash_keys: bool) -> StorageResult<Arc<dyn StorageHandler>> {
        if self.context.config().slave_options.use_rpc {
            self.context.rpc_transport().await?;
            return Ok(self.rpc(key_prefix, hash_keys));
        }
        Ok(self.global_local(key_prefix, hash_keys))
    }

    /// The single store shared by every webhook handler, connected on first use.
    pub async fn webhook_store(&self) -> StorageResult<Arc<dyn StorageHandler>> {
        self.context
            .webhook_slot()
            .get_or_try_init(|| async {
                let store: Arc<dyn StorageHandler> = self.cache(WEBHOOK_CACHE_PREFIX, false);
                store.connect().await?;
                Ok::<_, crate::StorageError>(store)
            })
            .await
            .cloned()
    }

    fn cache(&self, key_prefix: &str, hash_keys: bool) -> Arc<dyn StorageHandler> {
        Arc::new(
            LocalCacheStore::new(Arc::clone(self.context.cache_engine()), key_prefix, hash_keys)
                .with_set_emulation(self.context.set_emulation().clone()),
        )
    }

    fn distributed(&self, key_prefix: &str, hash_keys: bool) -> Arc<dyn StorageHandler> {
        Arc::new(
            DistributedStore::shared(Arc::clone(self.context.distributed()), key_prefix, hash_keys)
                .with_set_emulation(self.context.set_emulation().clone()),
        )
    }

    fn rpc(&self, key_prefix: &str, hash_keys: bool) -> Arc<dyn StorageHandler> {
        Arc::new(
            RemoteRpcStore::new(
                self.context.rpc_link(),
                &self.context.config().slave_options.api_key,
                key_prefix,
                hash_keys,
            )
            .with_set_emulation(self.context.set_emulation().clone()),
        )
    }
}
