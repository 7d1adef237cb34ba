// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>

//! # Tank Watch Client
//!
//! Consumes a Tank watch endpoint over HTTP and keeps the watch alive across
//! dropped connections.
//!
//! ```rust,no_run
//! use tank_core::WatchOptions;
//! use tank_watch_client::WatchClient;
//!
//! # async fn run() -> tank_watch_client::error::Result<()> {
//! let opts = WatchOptions::default().with_must_diff("status");
//! let mut client =
//!     WatchClient::connect(&["http://localhost:8080/api/v1/watch/nodes"], opts.into()).await?;
//! loop {
//!     let event = client.next().await;
//!     if event.is_break() {
//!         break;
//!     }
//!     println!("{} {:?}", event.event_type, event.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;

pub use client::{ClientState, WatchClient, WatchCloser};
pub use error::{Result, WatchClientError};
