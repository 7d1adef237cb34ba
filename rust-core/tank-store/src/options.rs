// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Per-call options of the store operations. An absent condition is the
// always-true condition.

use std::time::Duration;

use tank_condition::Condition;
use tank_core::WatchOptions;

/// Options of [`crate::Store::get`].
#[derive(Debug, Clone, Default)]
pub struct GetOption {
    /// Fields to project; empty returns whole documents.
    pub fields: Vec<String>,
    /// Sort keys; a `-` prefix sorts descending.
    pub sort: Vec<String>,
    pub cond: Condition,
    pub offset: u64,
    /// `0` applies the configured page size.
    pub limit: u64,
    /// Lift the default page size when no limit is given.
    pub is_all_documents: bool,
}

impl GetOption {
    pub fn with_cond(cond: Condition) -> Self {
        Self {
            cond,
            ..Self::default()
        }
    }
}

/// Options of [`crate::Store::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOption {
    /// Fields identifying the document; also declared as a unique index.
    pub unique_key: Vec<String>,
    /// Match condition; when absent, equality on `unique_key` is used.
    pub cond: Condition,
    /// Field stamped with the creation time of new documents.
    pub create_time_key: Option<String>,
    /// Field stamped on every write.
    pub update_time_key: Option<String>,
}

impl PutOption {
    pub fn unique(keys: &[&str]) -> Self {
        Self {
            unique_key: keys.iter().map(|k| k.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_times(mut self, create_time_key: &str, update_time_key: &str) -> Self {
        self.create_time_key = Some(create_time_key.to_string());
        self.update_time_key = Some(update_time_key.to_string());
        self
    }
}

/// Options of [`crate::Store::remove`].
#[derive(Debug, Clone, Default)]
pub struct RemoveOption {
    pub cond: Condition,
    /// Succeed even when nothing matched.
    pub ignore_not_found: bool,
}

/// Options of [`crate::Store::watch`].
#[derive(Debug, Clone, Default)]
pub struct WatchOption {
    /// Only documents matching this condition are reported.
    pub cond: Condition,
    pub self_only: bool,
    /// `0` is unbounded.
    pub max_events: u64,
    /// Zero is unbounded.
    pub timeout: Duration,
    /// Suppress updates that do not touch this path; empty disables.
    pub must_diff: String,
}

impl WatchOption {
    /// Combine wire-level options with a compiled selector.
    pub fn from_options(opts: WatchOptions, cond: Condition) -> Self {
        Self {
            cond,
            self_only: opts.self_only,
            max_events: opts.max_events,
            timeout: opts.timeout,
            must_diff: opts.must_diff,
        }
    }

    pub fn options(&self) -> WatchOptions {
        WatchOptions {
            self_only: self.self_only,
            max_events: self.max_events,
            timeout: self.timeout,
            must_diff: self.must_diff.clone(),
        }
    }
}
