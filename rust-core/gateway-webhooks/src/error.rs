// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Webhook error types.

use gateway_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// The handler configuration is malformed or unusable.
    #[error("webhook configuration error: {0}")]
    Configuration(String),

    /// A template could not be read or parsed.
    #[error("webhook template error: {0}")]
    Template(String),

    /// The outbound request could not be built.
    #[error("webhook request error: {0}")]
    Request(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
