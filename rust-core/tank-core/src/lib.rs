// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tank core: the uniform storage contract.
//!
//! A [`Tank`] is an immutable, chainable query builder bound to one backend
//! connection. Builder calls accumulate a [`TankSpec`]; terminal calls
//! (`query`, `insert`, `watch`, ...) run against the backend and return a
//! [`TankResult`] or a raw change [`Subscription`].
//!
//! Drivers register in a [`DriverRegistry`] under a configuration name.

pub mod error;
pub mod event;
pub mod namespace;
pub mod registry;
pub mod spec;
pub mod tank;
pub mod watch_options;

pub use error::TankError;
pub use event::{ChangeKind, ChangeRecord, Event, EventType, Subscription};
pub use namespace::Namespace;
pub use registry::{Driver, DriverKind, DriverRegistry};
pub use spec::{SortKey, TankSpec};
pub use tank::{ChangeInfo, Tank, TankResult, TankValue};
pub use watch_options::{
    format_duration, parse_duration, DurationError, WatchOptions, WatchRequest,
};

pub use tank_condition::{Condition, OpType};

/// A stored document: field name → JSON value.
pub type Document = tank_condition::FieldMap;

/// Identifier field of documents on backends that keep one.
pub const ID_FIELD: &str = "_id";
