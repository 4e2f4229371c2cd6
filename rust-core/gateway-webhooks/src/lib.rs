// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gateway Webhooks
//
// Outbound webhook delivery for gateway events, deduplicated per request
// shape through the shared webhook store (`StorageFactory::webhook_store`).
//
// # Modules
//
// - [`config`] -- Handler configuration, method mapping, URL checks.
// - [`template`] -- Body templates with `{{ .field }}` placeholders.
// - [`handler`] -- `WebhookHandler`: render, build, fingerprint, dedup, deliver.
// - [`error`] -- `WebhookError`.

pub mod config;
pub mod error;
pub mod handler;
pub mod template;

pub use config::{WebhookConfig, WebhookMethod};
pub use error::WebhookError;
pub use handler::{EventMessage, HookOutcome, WebhookHandler, WebhookRequest, HANDLER_NAME, USER_AGENT};
pub use template::Template;
