// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The uniform storage contract.
//
// A Tank is an immutable builder over a `TankSpec` plus a set of async
// terminal operations. Builder calls never do I/O and never fail; the first
// terminal call surfaces any deferred builder error.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use tank_condition::Condition;

use crate::error::TankError;
use crate::event::Subscription;
use crate::spec::TankSpec;
use crate::watch_options::WatchOptions;
use crate::Document;

/// Counters reported by mutating operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeInfo {
    pub matched: u64,
    pub updated: u64,
    pub removed: u64,
    pub inserted: u64,
    /// Identifier of a document created by an upsert.
    pub upserted_id: Option<String>,
}

/// Payload of a terminal operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TankValue {
    #[default]
    Empty,
    Documents(Vec<Document>),
    /// Distinct values.
    Values(Vec<Value>),
    /// Table or database names.
    Names(Vec<String>),
    Count(u64),
}

/// Result of a terminal operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TankResult {
    value: TankValue,
    change_info: ChangeInfo,
}

impl TankResult {
    pub fn new(value: TankValue) -> Self {
        Self {
            value,
            change_info: ChangeInfo::default(),
        }
    }

    pub fn changed(change_info: ChangeInfo) -> Self {
        Self {
            value: TankValue::Empty,
            change_info,
        }
    }

    pub fn documents(docs: Vec<Document>) -> Self {
        Self::new(TankValue::Documents(docs))
    }

    pub fn count(count: u64) -> Self {
        Self::new(TankValue::Count(count))
    }

    pub fn value(&self) -> &TankValue {
        &self.value
    }

    pub fn change_info(&self) -> &ChangeInfo {
        &self.change_info
    }

    /// Number of items in the value; a count reports itself.
    pub fn len(&self) -> u64 {
        match &self.value {
            TankValue::Empty => 0,
            TankValue::Documents(docs) => docs.len() as u64,
            TankValue::Values(values) => values.len() as u64,
            TankValue::Names(names) => names.len() as u64,
            TankValue::Count(count) => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_documents(self) -> Vec<Document> {
        match self.value {
            TankValue::Documents(docs) => docs,
            _ => Vec::new(),
        }
    }

    pub fn into_names(self) -> Vec<String> {
        match self.value {
            TankValue::Names(names) => names,
            _ => Vec::new(),
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self.value {
            TankValue::Values(values) => values,
            _ => Vec::new(),
        }
    }
}

/// Backend-neutral storage handle.
///
/// Implementations only provide [`Tank::spec`] and [`Tank::with_spec`]; the
/// builder methods are derived from them.
#[async_trait]
pub trait Tank: Send + Sync {
    /// Short backend name, used in errors and logs.
    fn backend(&self) -> &str;

    /// Current builder state.
    fn spec(&self) -> &TankSpec;

    /// A new tank over the same connection with a different builder state.
    fn with_spec(&self, spec: TankSpec) -> Box<dyn Tank>;

    fn using(&self, database: &str) -> Box<dyn Tank> {
        self.with_spec(self.spec().using(database))
    }

    fn from(&self, resource: &str) -> Box<dyn Tank> {
        self.with_spec(self.spec().from(resource))
    }

    fn filter(&self, cond: &Condition) -> Box<dyn Tank> {
        self.with_spec(self.spec().filter(cond))
    }

    fn order_by(&self, keys: &[&str]) -> Box<dyn Tank> {
        self.with_spec(self.spec().order_by(keys))
    }

    fn select(&self, fields: &[&str]) -> Box<dyn Tank> {
        self.with_spec(self.spec().select(fields))
    }

    fn offset(&self, offset: u64) -> Box<dyn Tank> {
        self.with_spec(self.spec().offset(offset))
    }

    fn limit(&self, limit: u64) -> Box<dyn Tank> {
        self.with_spec(self.spec().limit(limit))
    }

    fn distinct(&self, key: &str) -> Box<dyn Tank> {
        self.with_spec(self.spec().distinct(key))
    }

    fn index(&self, keys: &[&str]) -> Box<dyn Tank> {
        self.with_spec(self.spec().index(keys))
    }

    /// Matching documents, or distinct values when a distinct key is set.
    async fn query(&self) -> Result<TankResult, TankError>;

    async fn count(&self) -> Result<TankResult, TankError>;

    async fn insert(&self, docs: Vec<Document>) -> Result<TankResult, TankError>;

    /// Merge `doc` into the first match, creating it when nothing matches.
    async fn upsert(&self, doc: Document) -> Result<TankResult, TankError>;

    /// Merge `doc` into the first match.
    async fn update(&self, doc: Document) -> Result<TankResult, TankError>;

    /// Merge `doc` into every match.
    async fn update_all(&self, doc: Document) -> Result<TankResult, TankError>;

    async fn remove(&self) -> Result<TankResult, TankError>;

    async fn remove_all(&self) -> Result<TankResult, TankError>;

    /// Resource names in the current database.
    async fn tables(&self) -> Result<TankResult, TankError>;

    async fn databases(&self) -> Result<TankResult, TankError>;

    /// Subscribe to raw changes of the current resource.
    async fn watch(&self, opts: &WatchOptions) -> Result<Subscription, TankError>;

    async fn close(&self) -> Result<(), TankError>;
}
