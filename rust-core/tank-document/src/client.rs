// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Connection surface of a document database.
//
// `DocumentTank` and `OplogListener` only ever talk to the backend through
// this trait. Filters are native filter documents produced by
// `filter::to_native`; document keys are already escaped.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tank_core::{Document, Namespace, SortKey};

use crate::error::DocumentDbError;

pub type DbResult<T> = Result<T, DocumentDbError>;

/// Identifier field every stored document carries.
pub use tank_core::ID_FIELD;

/// Cursor shaping for [`DocumentClient::find`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub skip: u64,
    /// `0` means unlimited.
    pub limit: u64,
    /// Top-level fields to return; empty returns everything. `_id` is
    /// always included.
    pub projection: Vec<String>,
}

/// Outcome of [`DocumentClient::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Operation log
// ---------------------------------------------------------------------------

/// Kind of an operation-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OplogOp {
    #[serde(rename = "i")]
    Insert,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    /// Administrative command (collection or index creation).
    #[serde(rename = "c")]
    Command,
    #[serde(rename = "n")]
    Noop,
}

impl OplogOp {
    pub fn code(self) -> char {
        match self {
            OplogOp::Insert => 'i',
            OplogOp::Update => 'u',
            OplogOp::Delete => 'd',
            OplogOp::Command => 'c',
            OplogOp::Noop => 'n',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'i' => Some(OplogOp::Insert),
            'u' => Some(OplogOp::Update),
            'd' => Some(OplogOp::Delete),
            'c' => Some(OplogOp::Command),
            'n' => Some(OplogOp::Noop),
            _ => None,
        }
    }
}

/// One operation-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Strictly increasing log position.
    pub position: u64,
    pub timestamp: DateTime<Utc>,
    pub op: OplogOp,
    pub ns: Namespace,
    /// Document identifier; absent for commands and no-ops.
    pub id: Option<String>,
    /// Full document, for inserts.
    pub document: Option<Document>,
    /// Fields set by an update.
    #[serde(default)]
    pub updated_fields: Document,
    /// Fields removed by an update.
    #[serde(default)]
    pub removed_fields: Vec<String>,
}

// ---------------------------------------------------------------------------
// DocumentClient
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn find(&self, ns: &Namespace, filter: &Value, opts: &FindOptions)
        -> DbResult<Vec<Document>>;

    async fn find_by_id(&self, ns: &Namespace, id: &str) -> DbResult<Option<Document>>;

    async fn count(&self, ns: &Namespace, filter: &Value) -> DbResult<u64>;

    async fn distinct(&self, ns: &Namespace, key: &str, filter: &Value) -> DbResult<Vec<Value>>;

    /// Insert documents, assigning identifiers where missing. Returns the
    /// identifiers in input order.
    async fn insert_many(&self, ns: &Namespace, docs: Vec<Document>) -> DbResult<Vec<String>>;

    /// Apply `set` (`$set` semantics) to the first match, or every match
    /// when `multi`. With `upsert`, a miss inserts the filter's equality
    /// fields merged with `set`. Zero matches is not an error.
    async fn update(
        &self,
        ns: &Namespace,
        filter: &Value,
        set: &Document,
        multi: bool,
        upsert: bool,
    ) -> DbResult<UpdateOutcome>;

    /// Delete the first match, or every match when `multi`. Returns the
    /// number deleted.
    async fn delete(&self, ns: &Namespace, filter: &Value, multi: bool) -> DbResult<u64>;

    async fn ensure_collection(&self, ns: &Namespace) -> DbResult<()>;

    /// Ensure a unique index over `keys`.
    async fn ensure_index(&self, ns: &Namespace, keys: &[String]) -> DbResult<()>;

    async fn collection_names(&self, database: &str) -> DbResult<Vec<String>>;

    async fn database_names(&self) -> DbResult<Vec<String>>;

    /// Position of the newest log entry (`0` for an empty log).
    async fn oplog_latest(&self) -> DbResult<u64>;

    /// Up to `limit` entries strictly after `position`, waiting at most
    /// `wait` for the first one to appear.
    async fn oplog_after(&self, position: u64, limit: usize, wait: Duration)
        -> DbResult<Vec<OplogEntry>>;

    async fn close(&self) -> DbResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oplog_op_codes() {
        for op in [
            OplogOp::Insert,
            OplogOp::Update,
            OplogOp::Delete,
            OplogOp::Command,
            OplogOp::Noop,
        ] {
            assert_eq!(OplogOp::from_code(op.code()), Some(op));
        }
        assert_eq!(OplogOp::from_code('x'), None);
        assert_eq!(serde_json::to_string(&OplogOp::Update).unwrap(), "\"u\"");
    }
}
