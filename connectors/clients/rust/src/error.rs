// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>

//! Error types for the watch client.
//!
//! Only establishing a watch can fail with an error. Once streaming, every
//! failure the client cannot recover from is reported as a Break event.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchClientError {
    /// An underlying HTTP / network transport error from `reqwest`.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The watch request could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A watch URL could not be parsed.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// No URL in the list accepted the watch request.
    #[error("No watch URL available")]
    NoUrlAvailable,

    #[error("Watch client closed")]
    Closed,
}

/// Crate-level result alias using [`WatchClientError`].
pub type Result<T> = std::result::Result<T, WatchClientError>;
