// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Remote RPC storage backend.
//
// `RemoteRpcStore` forwards every storage operation to an upstream storage
// node. Keys are transformed locally, so the upstream only ever sees
// fully-qualified storage keys. The transport is a narrow trait;
// `HttpRpcTransport` carries JSON requests over HTTP with reqwest.
// `RpcServer` is the matching upstream side, dispatching requests onto any
// local `StorageHandler`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::SlaveOptions;
use crate::error::{StorageError, StorageResult};
use crate::handler::{RollingWindow, StorageHandler};
use crate::keys::KeyCodec;
use crate::sets::SetEmulation;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One storage call, as sent to the upstream node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RpcRequest {
    Login { api_key: String },
    GetKey { key: String },
    SetKey { key: String, value: String, ttl: i64 },
    DeleteKey { key: String },
    GetKeys { pattern: String },
    GetKeysAndValuesWithFilter { pattern: String },
    IncrementWithExpire { key: String, ttl: i64 },
    DeleteScanMatch { pattern: String },
    SetRollingWindow {
        key: String,
        per: i64,
        value_override: String,
        pipeline: bool,
    },
}

/// The upstream node's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RpcResponse {
    Ok,
    Value(String),
    Bool(bool),
    Int(i64),
    Keys(Vec<String>),
    Map(HashMap<String, String>),
    Window(RollingWindow),
    NotFound(String),
    Error(String),
}

impl RpcResponse {
    fn unexpected(self, call: &str) -> StorageError {
        match self {
            RpcResponse::NotFound(key) => StorageError::NotFound(key),
            RpcResponse::Error(message) => StorageError::BackendUnavailable(message),
            other => StorageError::SerializationError(format!(
                "unexpected response to {call}: {other:?}"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Carries one request to the upstream node and returns its response.
#[async_trait]
pub trait RpcTransport: Send + Sync + fmt::Debug {
    async fn call(&self, request: RpcRequest) -> StorageResult<RpcResponse>;
}

/// JSON-over-HTTP transport: every request is POSTed to `{address}/rpc`.
#[derive(Debug, Clone)]
pub struct HttpRpcTransport {
    endpoint: reqwest::Url,
    http: reqwest::Client,
    auth: HeaderValue,
}

impl HttpRpcTransport {
    /// Build a transport for `address` (scheme optional, `http` assumed).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] if the address cannot be parsed
    /// or the API key is not a valid header value.
    pub fn new(address: &str, api_key: &str, timeout: Duration) -> StorageResult<Self> {
        let base = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let endpoint = reqwest::Url::parse(&format!("{}/rpc", base.trim_end_matches('/')))
            .map_err(|e| StorageError::Configuration(format!("invalid RPC address {address}: {e}")))?;
        let auth = HeaderValue::from_str(api_key)
            .map_err(|e| StorageError::Configuration(format!("invalid RPC API key: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Configuration(format!("RPC client: {e}")))?;

        Ok(Self {
            endpoint,
            http,
            auth,
        })
    }

    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn call(&self, request: RpcRequest) -> StorageResult<RpcResponse> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, self.auth.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| StorageError::Network(format!("RPC call to {} failed: {e}", self.endpoint)))?;

        if !resp.status().is_success() {
            return Err(StorageError::Network(format!(
                "RPC node {} returned status {}",
                self.endpoint,
                resp.status()
            )));
        }

        resp.json::<RpcResponse>()
            .await
            .map_err(|e| StorageError::SerializationError(format!("RPC response: {e}")))
    }
}

/// Builds its [`HttpRpcTransport`] from [`SlaveOptions`] on the first call.
///
/// Stores over it can be created while RPC is disabled or misconfigured; a
/// bad address only surfaces once one of them is actually used.
#[derive(Debug)]
pub struct LazyRpcTransport {
    options: SlaveOptions,
    inner: OnceCell<Arc<dyn RpcTransport>>,
}

impl LazyRpcTransport {
    pub fn new(options: SlaveOptions) -> Self {
        Self {
            options,
            inner: OnceCell::new(),
        }
    }

    /// Use `transport` instead of building one. Ignored once resolved.
    pub fn install(&self, transport: Arc<dyn RpcTransport>) {
        if self.inner.set(transport).is_err() {
            warn!("RPC transport already resolved, keeping the existing one");
        }
    }

    /// The underlying transport, built on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] when the slave options do not
    /// describe a usable upstream.
    pub async fn resolve(&self) -> StorageResult<Arc<dyn RpcTransport>> {
        self.inner
            .get_or_try_init(|| async {
                let opts = &self.options;
                let transport = HttpRpcTransport::new(
                    &opts.connection_string,
                    &opts.api_key,
                    opts.call_timeout(),
                )?;
                debug!(endpoint = %transport.endpoint(), "RPC transport ready");
                Ok::<Arc<dyn RpcTransport>, StorageError>(Arc::new(transport))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl RpcTransport for LazyRpcTransport {
    async fn call(&self, request: RpcRequest) -> StorageResult<RpcResponse> {
        self.resolve().await?.call(request).await
    }
}

// ---------------------------------------------------------------------------
// Client-side handler
// ---------------------------------------------------------------------------

/// A [`StorageHandler`] that proxies every operation to an upstream node.
#[derive(Debug)]
pub struct RemoteRpcStore {
    codec: KeyCodec,
    sets: SetEmulation,
    transport: Arc<dyn RpcTransport>,
    api_key: String,
    logged_in: OnceCell<()>,
}

impl RemoteRpcStore {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        api_key: &str,
        key_prefix: &str,
        hash_keys: bool,
    ) -> Self {
        Self {
            codec: KeyCodec::new(key_prefix, hash_keys),
            sets: SetEmulation::new(),
            transport,
            api_key: api_key.to_string(),
            logged_in: OnceCell::new(),
        }
    }

    /// Serialise set mutations with every other handler holding `sets`.
    pub fn with_set_emulation(mut self, sets: SetEmulation) -> Self {
        self.sets = sets;
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn search_pattern(&self, pattern: &str) -> String {
        format!("{}{}", self.codec.prefix(), pattern)
    }
}

#[async_trait]
impl StorageHandler for RemoteRpcStore {
    fn name(&self) -> &str {
        "rpc"
    }

    fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    fn set_emulation(&self) -> &SetEmulation {
        &self.sets
    }

    /// Log in to the upstream node once; later calls are no-ops.
    async fn connect(&self) -> StorageResult<()> {
        self.logged_in
            .get_or_try_init(|| async {
                let login = RpcRequest::Login {
                    api_key: self.api_key.clone(),
                };
                match self.transport.call(login).await {
                    Ok(RpcResponse::Bool(true)) | Ok(RpcResponse::Ok) => {
                        info!("RPC storage login succeeded");
                        Ok(())
                    }
                    Ok(other) => Err(StorageError::BackendUnavailable(format!(
                        "RPC login rejected: {other:?}"
                    ))),
                    Err(e) => Err(StorageError::BackendUnavailable(format!("RPC login failed: {e}"))),
                }
            })
            .await
            .map(|_| ())
    }

    async fn get_raw_key(&self, key: &str) -> StorageResult<String> {
        let request = RpcRequest::GetKey {
            key: key.to_string(),
        };
        match self.transport.call(request).await? {
            RpcResponse::Value(value) => Ok(value),
            other => Err(other.unexpected("GetKey")),
        }
    }

    async fn set_raw_key(&self, key: &str, value: &str, ttl_seconds: i64) -> StorageResult<()> {
        let request = RpcRequest::SetKey {
            key: key.to_string(),
            value: value.to_string(),
            ttl: ttl_seconds,
        };
        match self.transport.call(request).await? {
            RpcResponse::Ok => Ok(()),
            other => Err(other.unexpected("SetKey")),
        }
    }

    async fn delete_raw_key(&self, key: &str) -> bool {
        let request = RpcRequest::DeleteKey {
            key: key.to_string(),
        };
        match self.transport.call(request).await {
            Ok(RpcResponse::Bool(deleted)) => deleted,
            Ok(other) => {
                error!(key, error = %other.unexpected("DeleteKey"), "delete failed");
                false
            }
            Err(e) => {
                error!(key, error = %e, "delete failed");
                false
            }
        }
    }

    async fn set_rolling_window(
        &self,
        key: &str,
        per_seconds: i64,
        value_override: &str,
    ) -> StorageResult<RollingWindow> {
        let request = RpcRequest::SetRollingWindow {
            key: self.codec.encode(key),
            per: per_seconds,
            value_override: value_override.to_string(),
            pipeline: false,
        };
        match self.transport.call(request).await? {
            RpcResponse::Window(window) => Ok(window),
            other => Err(other.unexpected("SetRollingWindow")),
        }
    }

    async fn set_rolling_window_pipeline(
        &self,
        key: &str,
        per_seconds: i64,
        value_override: &str,
    ) -> StorageResult<RollingWindow> {
        let request = RpcRequest::SetRollingWindow {
            key: self.codec.encode(key),
            per: per_seconds,
            value_override: value_override.to_string(),
            pipeline: true,
        };
        match self.transport.call(request).await? {
            RpcResponse::Window(window) => Ok(window),
            other => Err(other.unexpected("SetRollingWindow")),
        }
    }

    async fn get_keys(&self, pattern: &str) -> Vec<String> {
        let request = RpcRequest::GetKeys {
            pattern: self.search_pattern(pattern),
        };
        match self.transport.call(request).await {
            Ok(RpcResponse::Keys(keys)) => keys.iter().map(|k| self.codec.decode(k)).collect(),
            Ok(other) => {
                warn!(error = %other.unexpected("GetKeys"), "key listing failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "key listing failed");
                Vec::new()
            }
        }
    }

    async fn get_keys_and_values_with_filter(&self, pattern: &str) -> HashMap<String, String> {
        let request = RpcRequest::GetKeysAndValuesWithFilter {
            pattern: self.search_pattern(pattern),
        };
        match self.transport.call(request).await {
            Ok(RpcResponse::Map(map)) => map
                .into_iter()
                .map(|(k, v)| (self.codec.decode(&k), v))
                .collect(),
            Ok(other) => {
                warn!(error = %other.unexpected("GetKeysAndValuesWithFilter"), "key/value listing failed");
                HashMap::new()
            }
            Err(e) => {
                warn!(error = %e, "key/value listing failed");
                HashMap::new()
            }
        }
    }

    async fn increment_with_expire(&self, key: &str, ttl_seconds: i64) -> i64 {
        let request = RpcRequest::IncrementWithExpire {
            key: self.codec.encode(key),
            ttl: ttl_seconds,
        };
        match self.transport.call(request).await {
            Ok(RpcResponse::Int(n)) => n,
            Ok(other) => {
                warn!(error = %other.unexpected("IncrementWithExpire"), "increment failed");
                0
            }
            Err(e) => {
                warn!(error = %e, "increment failed");
                0
            }
        }
    }

    async fn delete_scan_match(&self, pattern: &str) -> bool {
        let request = RpcRequest::DeleteScanMatch {
            pattern: pattern.to_string(),
        };
        match self.transport.call(request).await {
            Ok(RpcResponse::Bool(deleted)) => deleted,
            Ok(other) => {
                warn!(error = %other.unexpected("DeleteScanMatch"), "scan delete failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "scan delete failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream side
// ---------------------------------------------------------------------------

/// Serves [`RpcRequest`]s from a local handler, as an upstream node does.
///
/// Requests carry fully-qualified storage keys, so the handler is driven
/// through its raw operations and its own key transform is not applied.
#[derive(Clone)]
pub struct RpcServer {
    handler: Arc<dyn StorageHandler>,
    api_key: String,
}

impl RpcServer {
    pub fn new(handler: Arc<dyn StorageHandler>, api_key: &str) -> Self {
        Self {
            handler,
            api_key: api_key.to_string(),
        }
    }

    /// True if `presented` matches the node's API key.
    pub fn authorised(&self, presented: &str) -> bool {
        presented == self.api_key
    }

    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        debug!(?request, "rpc dispatch");
        match request {
            RpcRequest::Login { api_key } => RpcResponse::Bool(self.authorised(&api_key)),
            RpcRequest::GetKey { key } => match self.handler.get_raw_key(&key).await {
                Ok(value) => RpcResponse::Value(value),
                Err(StorageError::NotFound(key)) => RpcResponse::NotFound(key),
                Err(e) => RpcResponse::Error(e.to_string()),
            },
            RpcRequest::SetKey { key, value, ttl } => {
                match self.handler.set_raw_key(&key, &value, ttl).await {
                    Ok(()) => RpcResponse::Ok,
                    Err(e) => RpcResponse::Error(e.to_string()),
                }
            }
            RpcRequest::DeleteKey { key } => {
                RpcResponse::Bool(self.handler.delete_raw_key(&key).await)
            }
            RpcRequest::GetKeys { pattern } => {
                let keys = self.handler.get_keys(&self.strip(&pattern)).await;
                RpcResponse::Keys(keys.iter().map(|k| self.qualify(k)).collect())
            }
            RpcRequest::GetKeysAndValuesWithFilter { pattern } => {
                let map = self
                    .handler
                    .get_keys_and_values_with_filter(&self.strip(&pattern))
                    .await;
                RpcResponse::Map(map.into_iter().map(|(k, v)| (self.qualify(&k), v)).collect())
            }
            RpcRequest::IncrementWithExpire { key, ttl } => {
                RpcResponse::Int(self.handler.increment_with_expire(&self.strip(&key), ttl).await)
            }
            RpcRequest::DeleteScanMatch { pattern } => {
                RpcResponse::Bool(self.handler.delete_scan_match(&pattern).await)
            }
            RpcRequest::SetRollingWindow {
                key,
                per,
                value_override,
                pipeline,
            } => {
                let key = self.strip(&key);
                let result = if pipeline {
                    self.handler
                        .set_rolling_window_pipeline(&key, per, &value_override)
                        .await
                } else {
                    self.handler
                        .set_rolling_window(&key, per, &value_override)
                        .await
                };
                match result {
                    Ok(window) => RpcResponse::Window(window),
                    Err(e) => RpcResponse::Error(e.to_string()),
                }
            }
        }
    }

    // The handler's pattern and counter operations re-apply its prefix.
    fn strip(&self, qualified: &str) -> String {
        self.handler.codec().decode(qualified)
    }

    fn qualify(&self, logical: &str) -> String {
        format!("{}{}", self.handler.codec().prefix(), logical)
    }
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("handler", &self.handler.name())
            .finish()
    }
}
