// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Webhook handler configuration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use crate::error::WebhookError;

/// Per-handler settings, as found in an API definition's event handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub method: String,
    /// Absolute URL the hook is delivered to.
    pub target_path: String,
    /// Body template file; the built-in template is used when unreadable.
    pub template_path: String,
    pub header_map: BTreeMap<String, String>,
    /// Dedup window in seconds.
    pub event_timeout: i64,
}

impl WebhookConfig {
    /// Convert a generic handler configuration value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, WebhookError> {
        serde_json::from_value(value).map_err(|e| {
            error!(error = %e, "format of webhook configuration is incorrect");
            WebhookError::Configuration(e.to_string())
        })
    }
}

/// Outbound HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookMethod {
    Get,
    Put,
    Post,
    Delete,
    Patch,
}

impl WebhookMethod {
    /// Case-insensitive; anything unrecognised falls back to GET.
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => WebhookMethod::Get,
            "PUT" => WebhookMethod::Put,
            "POST" => WebhookMethod::Post,
            "DELETE" => WebhookMethod::Delete,
            "PATCH" => WebhookMethod::Patch,
            _ => {
                warn!(
                    method,
                    "method must be one of GET, PUT, POST, DELETE or PATCH, defaulting to GET"
                );
                WebhookMethod::Get
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WebhookMethod::Get => "GET",
            WebhookMethod::Put => "PUT",
            WebhookMethod::Post => "POST",
            WebhookMethod::Delete => "DELETE",
            WebhookMethod::Patch => "PATCH",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            WebhookMethod::Get => reqwest::Method::GET,
            WebhookMethod::Put => reqwest::Method::PUT,
            WebhookMethod::Post => reqwest::Method::POST,
            WebhookMethod::Delete => reqwest::Method::DELETE,
            WebhookMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

impl fmt::Display for WebhookMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse `target` as an absolute http(s) URL. Failures are logged and `None`
/// is returned; the caller keeps an inert handler.
pub fn check_url(target: &str) -> Option<Url> {
    debug!(url = target, "checking webhook URL");
    match Url::parse(target) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Some(url),
        Ok(url) => {
            error!(url = target, scheme = url.scheme(), "webhook URL must be absolute http(s)");
            None
        }
        Err(e) => {
            error!(url = target, error = %e, "failed to parse webhook URL");
            None
        }
    }
}
