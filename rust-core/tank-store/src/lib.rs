// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tank store: the application-facing facade.
//!
//! [`Store`] wraps one registered driver and adds what callers of the raw
//! [`tank_core::Tank`] contract would otherwise repeat: a bounded default
//! page size, create/update timestamps on upsert, optional soft deletion
//! and watches that deliver already-filtered [`tank_core::Event`]s ending
//! with a Break.

pub mod config;
pub mod error;
pub mod options;
pub mod store;
mod watch;

pub use config::StoreConfig;
pub use error::StoreError;
pub use options::{GetOption, PutOption, RemoveOption, WatchOption};
pub use store::{Store, StoreResult};
