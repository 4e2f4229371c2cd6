// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application-lifetime storage context.
//
// Owns everything that must exist at most once per process: the distributed
// runtime (and with it the consensus engine and beacon), the local cache
// engine shared by every cache-backed store, the RPC transport, the set
// writer locks and the memoised webhook dedup store. Callers hold an
// `Arc<StorageContext>` instead of reading globals.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::StorageConfig;
use crate::distributed::{embedded_engine_builder, DistributedRuntime, EngineBuilder};
use crate::error::StorageResult;
use crate::handler::StorageHandler;
use crate::memory::MemoryEngine;
use crate::rpc::{LazyRpcTransport, RpcTransport};
use crate::sets::SetEmulation;

pub struct StorageContext {
    config: StorageConfig,
    distributed: Arc<DistributedRuntime>,
    cache_engine: Arc<MemoryEngine>,
    rpc_transport: Arc<LazyRpcTransport>,
    set_emulation: SetEmulation,
    webhook_store: OnceCell<Arc<dyn StorageHandler>>,
}

impl StorageContext {
    pub fn new(config: StorageConfig) -> Self {
        Self::with_parts(config, embedded_engine_builder(), Arc::new(MemoryEngine::new()))
    }

    /// Build a context with an explicit consensus engine builder and cache engine.
    pub fn with_parts(
        config: StorageConfig,
        engine_builder: EngineBuilder,
        cache_engine: Arc<MemoryEngine>,
    ) -> Self {
        let distributed = Arc::new(DistributedRuntime::with_builder(
            config.distributed.clone(),
            engine_builder,
        ));
        let rpc_transport = Arc::new(LazyRpcTransport::new(config.slave_options.clone()));
        Self {
            config,
            distributed,
            cache_engine,
            rpc_transport,
            set_emulation: SetEmulation::new(),
            webhook_store: OnceCell::new(),
        }
    }

    /// Use `transport` for every RPC-backed store instead of HTTP.
    pub fn with_rpc_transport(self, transport: Arc<dyn RpcTransport>) -> Self {
        self.rpc_transport.install(transport);
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn distributed(&self) -> &Arc<DistributedRuntime> {
        &self.distributed
    }

    pub fn cache_engine(&self) -> &Arc<MemoryEngine> {
        &self.cache_engine
    }

    /// The shared RPC transport, built from `slave_options` on first use.
    pub async fn rpc_transport(&self) -> StorageResult<Arc<dyn RpcTransport>> {
        self.rpc_transport.resolve().await
    }

    /// The shared RPC transport without resolving it; configuration errors
    /// surface on the first call made through it.
    pub fn rpc_link(&self) -> Arc<dyn RpcTransport> {
        Arc::clone(&self.rpc_transport) as Arc<dyn RpcTransport>
    }

    /// Writer locks shared by every set-emulating handler of this context.
    pub fn set_emulation(&self) -> &SetEmulation {
        &self.set_emulation
    }

    pub(crate) fn webhook_slot(&self) -> &OnceCell<Arc<dyn StorageHandler>> {
        &self.webhook_store
    }
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("config", &self.config)
            .field("distributed", &self.distributed)
            .field("webhook_store", &self.webhook_store.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rpc_transport_is_memoised() {
        let mut config = StorageConfig::default();
        config.slave_options.connection_string = "127.0.0.1:9091".to_string();
        let context = StorageContext::new(config);
        let a = context.rpc_transport().await.unwrap();
        let b = context.rpc_transport().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_bad_rpc_address_is_configuration_error() {
        let mut config = StorageConfig::default();
        config.slave_options.connection_string = "http://[bad".to_string();
        let context = StorageContext::new(config);
        assert!(matches!(
            context.rpc_transport().await,
            Err(crate::StorageError::Configuration(_))
        ));
    }

    #[test]
    fn test_distributed_runtime_not_started_eagerly() {
        let context = StorageContext::new(StorageConfig::default());
        assert!(!context.distributed().is_started());
    }
}
