// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error type shared by every Tank driver.
//
// Configuration errors are fatal at setup time. Not-found is a distinct
// variant so the Store layer can normalise it without backend knowledge.
// Backend and availability errors carry the driver's own message.

use thiserror::Error;

/// Errors returned by Tank terminal operations and driver setup.
#[derive(Debug, Error)]
pub enum TankError {
    /// Missing driver registration, duplicate listener name, missing option.
    #[error("configuration error: {0}")]
    Config(String),

    /// Nothing matched where a match was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// A builder chain or operation argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A write violated a unique index.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The backend cannot perform this operation at all.
    #[error("operation '{operation}' is not supported by the {backend} backend")]
    Unsupported {
        /// Backend name, as reported by [`crate::Tank::backend`].
        backend: String,
        /// Operation name.
        operation: String,
    },

    /// The backend rejected or failed the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend connection is lost or was never established.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The driver or subscription was already closed.
    #[error("closed")]
    Closed,
}

impl TankError {
    pub fn unsupported(backend: &str, operation: &str) -> Self {
        Self::Unsupported {
            backend: backend.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
