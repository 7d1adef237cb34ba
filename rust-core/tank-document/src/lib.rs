// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tank document-store driver.
//!
//! Translates conditions into the backend's native filter language, escapes
//! reserved characters in field keys, and turns the backend's operation log
//! into per-resource change feeds:
//!
//! ```text
//! DocumentClient ──oplog──▶ OplogListener ──ChangeRecord──▶ WatchRouter ──▶ Subscription
//! ```
//!
//! [`InMemoryDocumentDb`] is a complete in-process backend used by tests and
//! single-process deployments. With the `mongodb` feature,
//! [`MongoDocumentClient`] talks to a MongoDB replica set and tails
//! `local.oplog.rs`.

pub mod client;
pub mod driver;
pub mod error;
pub mod escape;
pub mod filter;
pub mod listener;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod router;
pub mod tank;

pub use client::{DocumentClient, FindOptions, OplogEntry, OplogOp, UpdateOutcome, ID_FIELD};
pub use driver::DocumentDriver;
pub use error::DocumentDbError;
pub use escape::{escape_document, escape_key, escape_path, unescape_document, unescape_key};
pub use filter::to_native;
pub use listener::{ListenerConfig, ListenerRegistry, OplogListener};
pub use memory::InMemoryDocumentDb;
#[cfg(feature = "mongodb")]
pub use mongo::MongoDocumentClient;
pub use router::WatchRouter;
pub use tank::DocumentTank;
