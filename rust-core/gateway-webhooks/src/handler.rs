// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Webhook event handler with delivery deduplication.
//
// Each event is rendered into a request body, turned into a full outbound
// request, and fingerprinted by a checksum over the request's wire form. The
// checksum doubles as a dedup ticket key in the shared webhook store: while a
// ticket is alive the same request is not sent again. After an attempt the
// ticket is written whether or not delivery succeeded, so a failing endpoint
// is tried at most once per window.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gateway_storage::{StorageFactory, StorageHandler};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::{check_url, WebhookConfig, WebhookMethod};
use crate::error::WebhookError;
use crate::template::Template;

/// Registered name of this event handler.
pub const HANDLER_NAME: &str = "eh_web_hook_handler";

/// User-Agent sent with every delivery.
pub const USER_AGENT: &str = "Gateway-Hookshot";

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// A gateway event, as seen by templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl EventMessage {
    pub fn new(event_type: impl Into<String>, meta: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            meta,
        }
    }
}

/// A fully-built outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub method: WebhookMethod,
    pub url: Url,
    /// Lower-cased header names, sorted.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl WebhookRequest {
    /// HTTP/1.1 rendering of the request, used for fingerprinting.
    pub fn wire_form(&self) -> String {
        let mut target = self.url.path().to_string();
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }
        let host = match (self.url.host_str(), self.url.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => String::new(),
        };

        let mut wire = format!("{} {target} HTTP/1.1\r\nhost: {host}\r\n", self.method);
        for (name, value) in &self.headers {
            wire.push_str(&format!("{name}: {value}\r\n"));
        }
        wire.push_str(&format!("content-length: {}\r\n\r\n", self.body.len()));
        wire.push_str(&self.body);
        wire
    }

    /// Hex SHA-256 of [`wire_form`](Self::wire_form).
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.wire_form().as_bytes()))
    }

    fn header_map(&self) -> Result<HeaderMap, WebhookError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WebhookError::Request(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| WebhookError::Request(format!("header {name} value: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// What [`WebhookHandler::handle_event`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Sent; the endpoint answered with this status.
    Delivered(u16),
    /// Attempted but the request failed. The dedup ticket was still written.
    DeliveryFailed,
    /// An identical request fired within the dedup window.
    Suppressed,
    /// The handler is misconfigured or its store is unavailable.
    Skipped,
}

/// Delivers events to one configured endpoint, at most once per window per
/// distinct request.
pub struct WebhookHandler {
    config: WebhookConfig,
    method: WebhookMethod,
    target: Option<Url>,
    template: Template,
    storage: StorageFactory,
    http: reqwest::Client,
}

impl WebhookHandler {
    /// Build a handler from its generic configuration value.
    ///
    /// Only a malformed configuration is an error. A bad template falls back
    /// to the default; a bad URL leaves the handler inert.
    pub fn new(conf: serde_json::Value, storage: StorageFactory) -> Result<Self, WebhookError> {
        let config = WebhookConfig::from_value(conf)?;

        let template = if config.template_path.is_empty() {
            Template::default_template()
        } else {
            Template::load_or_default(&config.template_path)
        };

        let target = check_url(&config.target_path);
        if target.is_none() {
            error!(
                url = %config.target_path,
                "init failed for this webhook, invalid URL, URL must be absolute"
            );
        }

        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| WebhookError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            method: WebhookMethod::parse(&config.method),
            config,
            target,
            template,
            storage,
            http,
        })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    pub fn method(&self) -> WebhookMethod {
        self.method
    }

    /// False when the target URL was rejected at construction.
    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn create_body(&self, em: &EventMessage) -> Result<String, WebhookError> {
        let data = serde_json::to_value(em)
            .map_err(|e| WebhookError::Template(format!("event not serialisable: {e}")))?;
        Ok(self.template.render(&data))
    }

    pub fn build_request(&self, body: String) -> Result<WebhookRequest, WebhookError> {
        let url = self
            .target
            .clone()
            .ok_or_else(|| WebhookError::Configuration(format!("invalid target {}", self.config.target_path)))?;

        let mut headers = BTreeMap::new();
        headers.insert("user-agent".to_string(), USER_AGENT.to_string());
        for (name, value) in &self.config.header_map {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        let request = WebhookRequest {
            method: self.method,
            url,
            headers,
            body,
        };
        request.header_map()?;
        Ok(request)
    }

    async fn store(&self) -> Result<Arc<dyn StorageHandler>, WebhookError> {
        Ok(self.storage.webhook_store().await?)
    }

    /// True if a live dedup ticket exists for `checksum`.
    pub async fn was_hook_fired(&self, checksum: &str) -> Result<bool, WebhookError> {
        let store = self.store().await?;
        match store.get_key(checksum).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                info!("event can fire, no duplicates found");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "dedup lookup failed, treating event as new");
                Ok(false)
            }
        }
    }

    /// Record that `checksum` fired, expiring after the event timeout.
    pub async fn set_hook_fired(&self, checksum: &str) -> Result<(), WebhookError> {
        debug!(checksum, ttl = self.config.event_timeout, "setting webhook checksum");
        let store = self.store().await?;
        store
            .set_key(checksum, "1", self.config.event_timeout)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, em), fields(event = %em.event_type, url = %self.config.target_path))]
    pub async fn handle_event(&self, em: &EventMessage) -> HookOutcome {
        let request = match self.create_body(em).and_then(|body| self.build_request(body)) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "webhook not sent");
                return HookOutcome::Skipped;
            }
        };
        let checksum = request.checksum();

        match self.was_hook_fired(&checksum).await {
            Ok(true) => {
                debug!(checksum, "duplicate event suppressed");
                return HookOutcome::Suppressed;
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "webhook store unavailable");
                return HookOutcome::Skipped;
            }
        }

        let outcome = self.deliver(&request).await;

        if let Err(e) = self.set_hook_fired(&checksum).await {
            error!(error = %e, "failed to record webhook checksum");
        }
        outcome
    }

    async fn deliver(&self, request: &WebhookRequest) -> HookOutcome {
        let headers = match request.header_map() {
            Ok(headers) => headers,
            Err(e) => {
                error!(error = %e, "webhook request failed");
                return HookOutcome::DeliveryFailed;
            }
        };

        let sent = self
            .http
            .request(request.method.to_reqwest(), request.url.clone())
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await;

        match sent {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match resp.text().await {
                    Ok(content) => debug!(status, body = %content, "webhook response"),
                    Err(e) => error!(status, error = %e, "failed to read webhook response"),
                }
                HookOutcome::Delivered(status)
            }
            Err(e) => {
                error!(error = %e, "webhook request failed");
                HookOutcome::DeliveryFailed
            }
        }
    }
}

impl fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookHandler")
            .field("method", &self.method)
            .field("target", &self.target.as_ref().map(Url::as_str))
            .field("event_timeout", &self.config.event_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_storage::{StorageConfig, StorageContext};
    use serde_json::json;

    fn factory() -> StorageFactory {
        StorageFactory::new(Arc::new(StorageContext::new(StorageConfig::default())))
    }

    fn handler(conf: serde_json::Value) -> WebhookHandler {
        WebhookHandler::new(conf, factory()).unwrap()
    }

    fn event() -> EventMessage {
        EventMessage::new("QuotaExceeded", json!({"message": "quota", "key": "k1"}))
    }

    #[test]
    fn test_invalid_url_leaves_handler_inert() {
        let h = handler(json!({"method": "POST", "target_path": "not a url"}));
        assert!(!h.is_active());
        assert!(matches!(
            h.build_request(String::new()),
            Err(WebhookError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_inert_handler_skips_events() {
        let h = handler(json!({"target_path": "/relative"}));
        assert_eq!(h.handle_event(&event()).await, HookOutcome::Skipped);
    }

    #[test]
    fn test_malformed_config_is_rejected() {
        assert!(WebhookHandler::new(json!({"header_map": 7}), factory()).is_err());
    }

    #[test]
    fn test_request_carries_user_agent_and_headers() {
        let h = handler(json!({
            "method": "patch",
            "target_path": "http://hooks.example.com/in?x=1",
            "header_map": {"X-Token": "abc"}
        }));
        let req = h.build_request("{}".to_string()).unwrap();
        assert_eq!(req.method, WebhookMethod::Patch);
        assert_eq!(req.headers.get("user-agent").map(String::as_str), Some(USER_AGENT));
        assert_eq!(req.headers.get("x-token").map(String::as_str), Some("abc"));
        assert!(req.wire_form().starts_with("PATCH /in?x=1 HTTP/1.1\r\nhost: hooks.example.com\r\n"));
    }

    #[test]
    fn test_invalid_header_is_request_error() {
        let h = handler(json!({
            "target_path": "http://hooks.example.com/in",
            "header_map": {"Bad Header": "x"}
        }));
        assert!(matches!(h.build_request(String::new()), Err(WebhookError::Request(_))));
    }

    #[test]
    fn test_checksum_covers_whole_request() {
        let base = json!({"method": "POST", "target_path": "http://hooks.example.com/a"});
        let h = handler(base);
        let a = h.build_request("{\"id\":1}".to_string()).unwrap();
        let b = h.build_request("{\"id\":1}".to_string()).unwrap();
        let c = h.build_request("{\"id\":2}".to_string()).unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
        assert_eq!(a.checksum().len(), 64);

        let other_method = handler(json!({"method": "PUT", "target_path": "http://hooks.example.com/a"}));
        let other_header = handler(json!({
            "method": "POST",
            "target_path": "http://hooks.example.com/a",
            "header_map": {"X-Env": "prod"}
        }));
        let other_target = handler(json!({"method": "POST", "target_path": "http://hooks.example.com/b"}));
        for other in [other_method, other_header, other_target] {
            let d = other.build_request("{\"id\":1}".to_string()).unwrap();
            assert_ne!(a.checksum(), d.checksum());
        }
    }

    #[tokio::test]
    async fn test_ticket_lifecycle() {
        let h = handler(json!({"target_path": "http://hooks.example.com/", "event_timeout": 60}));
        assert!(!h.was_hook_fired("abc").await.unwrap());
        h.set_hook_fired("abc").await.unwrap();
        assert!(h.was_hook_fired("abc").await.unwrap());
    }

    #[test]
    fn test_create_body_uses_default_template() {
        let h = handler(json!({"target_path": "http://hooks.example.com/"}));
        let body: serde_json::Value = serde_json::from_str(&h.create_body(&event()).unwrap()).unwrap();
        assert_eq!(body["event"], "QuotaExceeded");
        assert_eq!(body["key"], "k1");
    }
}
