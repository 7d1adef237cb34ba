// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Errors reported by a document-database connection.

use tank_core::TankError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentDbError {
    #[error("duplicate key in {ns}: {key}")]
    DuplicateKey { ns: String, key: String },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A read failed but may succeed if retried.
    #[error("transient read failure: {0}")]
    Transient(String),

    #[error("connection lost")]
    Disconnected,

    #[error("connection closed")]
    Closed,
}

impl From<DocumentDbError> for TankError {
    fn from(e: DocumentDbError) -> Self {
        match e {
            DocumentDbError::DuplicateKey { ns, key } => {
                TankError::DuplicateKey(format!("{ns}: {key}"))
            }
            DocumentDbError::InvalidFilter(msg) | DocumentDbError::InvalidDocument(msg) => {
                TankError::InvalidArgument(msg)
            }
            DocumentDbError::Transient(msg) => TankError::Backend(msg),
            DocumentDbError::Disconnected => TankError::Unavailable("document database".to_string()),
            DocumentDbError::Closed => TankError::Closed,
        }
    }
}
