// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gateway node startup.
//
// The storage crates never stop the process themselves; they return
// `StorageError::Fatal`. This crate is the application layer that checks for
// it and exits, via `terminate_on_fatal`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use gateway_storage::{
    PreparedStores, StorageConfig, StorageContext, StorageFactory, StorageHandler, StorageResult,
};
use tracing::{error, info};

/// Process exit status for fatal storage errors (EX_SOFTWARE).
pub const EXIT_FATAL: i32 = 70;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV: &str = "GATEWAY_CONFIG";

/// Exit the process if `result` carries a fatal storage error; otherwise
/// hand it back unchanged.
pub fn terminate_on_fatal<T>(result: StorageResult<T>) -> StorageResult<T> {
    match result {
        Err(e) if e.is_fatal() => {
            error!(error = %e, "fatal storage error, terminating");
            std::process::exit(EXIT_FATAL);
        }
        other => other,
    }
}

/// Load configuration from `GATEWAY_CONFIG` (defaults when unset), then apply
/// `GATEWAY_*` overrides.
pub fn load_config() -> anyhow::Result<StorageConfig> {
    let mut config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            StorageConfig::from_json_file(&path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => {
            info!("{CONFIG_ENV} not set, using default storage configuration");
            StorageConfig::default()
        }
    };
    config.apply_env_overrides();
    Ok(config)
}

/// A started node: the factory and the stores it prepared.
#[derive(Debug, Clone)]
pub struct Node {
    pub factory: StorageFactory,
    pub stores: PreparedStores,
}

/// Build the storage context, prepare every store and connect the token and
/// org stores. Fatal errors terminate the process.
pub async fn start(config: StorageConfig) -> anyhow::Result<Node> {
    let context = Arc::new(StorageContext::new(config));
    let factory = StorageFactory::new(Arc::clone(&context));

    let stores = factory
        .prepare_storage()
        .await
        .context("preparing storage")?;

    for store in [&stores.token_store, &stores.org_store, &stores.health_store] {
        terminate_on_fatal(store.connect().await)
            .with_context(|| format!("connecting {} store", store.name()))?;
    }

    info!(
        token_store = stores.token_store.name(),
        org_store = stores.org_store.name(),
        health_store = stores.health_store.name(),
        rpc = context.config().slave_options.use_rpc,
        "storage backends ready"
    );

    Ok(Node { factory, stores })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_storage::StorageError;

    #[test]
    fn test_non_fatal_results_pass_through() {
        assert_eq!(terminate_on_fatal(Ok(3)).unwrap(), 3);
        let err = terminate_on_fatal::<()>(Err(StorageError::NotFound("k".into()))).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_start_with_defaults() {
        let node = start(StorageConfig::default()).await.unwrap();
        assert_eq!(node.stores.token_store.name(), "local-cache");
        node.stores.token_store.set_key("k", "v", 0).await.unwrap();
        let detail = node.stores.session_manager.session_detail("k").await;
        // "v" is not a session document.
        assert!(detail.is_err());
    }
}
