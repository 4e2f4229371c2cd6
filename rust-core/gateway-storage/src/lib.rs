// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gateway Storage
//
// The key/value layer every gateway feature reads and writes through. The
// `StorageHandler` trait is one contract implemented by three structurally
// different backends: a process-local cluster cache, an embedded
// consensus-replicated store, and a remote storage node reached over RPC.
//
// # Modules
//
// - [`keys`] -- `KeyCodec`: prefix plus optional one-way hash.
// - [`handler`] -- The `StorageHandler` trait and its default key and set methods.
// - [`sets`] -- Set emulation by read-modify-write over scalar values.
// - [`memory`] / [`cache`] -- The local cache engine and its adapter.
// - [`distributed`] -- Embedded distributed store: engine seam, beacon, lifecycle.
// - [`rpc`] -- Remote RPC backend, HTTP transport and upstream dispatcher.
// - [`context`] / [`factory`] -- Process-lifetime state and backend selection.
// - [`session`] -- Session manager wired to the chosen token store.
// - [`metrics`] -- A transparent wrapper that collects operation statistics.
// - [`config`] -- Storage configuration, file and environment loading.
//
// # Example
//
// ```rust
// use std::sync::Arc;
// use gateway_storage::{StorageConfig, StorageContext, StorageFactory, StorageHandler};
//
// # tokio_test::block_on(async {
// let context = Arc::new(StorageContext::new(StorageConfig::default()));
// let factory = StorageFactory::new(context);
// let stores = factory.prepare_storage().await.unwrap();
//
// stores.org_store.set_key("org-1", r#"{"name":"acme"}"#, 0).await.unwrap();
// stores.org_store.add_to_set("org-1.members", "alice").await;
// assert!(stores.org_store.get_set("org-1.members").await.unwrap().contains_key("alice"));
// # });
// ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod distributed;
pub mod error;
pub mod factory;
pub mod handler;
pub mod keys;
pub mod memory;
pub mod metrics;
pub mod rpc;
pub mod session;
pub mod sets;

// Re-export the most commonly used types at the crate root for convenience.
pub use cache::LocalCacheStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SlaveOptions, StorageConfig};
pub use context::StorageContext;
pub use distributed::{DistributedConfig, DistributedRuntime, DistributedStore};
pub use error::{StorageError, StorageResult};
pub use factory::{PreparedStores, StorageFactory};
pub use handler::{RollingWindow, SetRecord, StorageHandler};
pub use keys::KeyCodec;
pub use memory::MemoryEngine;
pub use metrics::{HandlerStats, MetricsHandler};
pub use rpc::{HttpRpcTransport, LazyRpcTransport, RemoteRpcStore, RpcRequest, RpcResponse, RpcServer, RpcTransport};
pub use session::{SessionManager, SessionState};
