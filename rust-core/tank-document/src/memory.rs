// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process document database.
//
// Implements `DocumentClient` over `tokio::sync::RwLock`-guarded collections
// with the native filter language, unique indexes, `$set` upserts and a
// capped operation log. Waiters on the log are woken through a `Notify`.
//
// Test hooks simulate the failure modes the listener has to survive:
// transient log read failures, administrative no-op entries and a lost
// connection.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, trace};

use tank_condition::{compare_values, lookup_path, sort_order, values_equal, RegexCache};
use tank_core::{Document, Namespace, SortKey};

use crate::client::{
    DbResult, DocumentClient, FindOptions, OplogEntry, OplogOp, UpdateOutcome, ID_FIELD,
};
use crate::error::DocumentDbError;

/// Entries kept in the capped operation log.
pub const OPLOG_CAPACITY: usize = 65_536;

// ---------------------------------------------------------------------------
// Native filter evaluation
// ---------------------------------------------------------------------------

fn sub_filters<'a>(op: &str, value: &'a Value) -> DbResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| DocumentDbError::InvalidFilter(format!("{op} expects an array")))
}

/// Evaluate a native filter document against a stored document.
pub fn filter_matches(doc: &Document, filter: &Value) -> DbResult<bool> {
    let clauses = filter
        .as_object()
        .ok_or_else(|| DocumentDbError::InvalidFilter(format!("filter must be an object: {filter}")))?;

    for (key, expected) in clauses {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, expected)? {
                    all &= filter_matches(doc, sub)?;
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, expected)? {
                    any |= filter_matches(doc, sub)?;
                }
                any
            }
            "$nor" => {
                let mut any = false;
                for sub in sub_filters(key, expected)? {
                    any |= filter_matches(doc, sub)?;
                }
                !any
            }
            other if other.starts_with('$') => {
                return Err(DocumentDbError::InvalidFilter(format!("unknown operator {other}")));
            }
            field => field_matches(lookup_path(doc, field), expected)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|ops| !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')))
}

fn field_matches(actual: Option<&Value>, expected: &Value) -> DbResult<bool> {
    if !is_operator_object(expected) {
        return Ok(equals(actual, expected));
    }
    let ops = expected.as_object().map(|ops| ops.iter()).into_iter().flatten();
    for (op, operand) in ops {
        if !operator_matches(actual, op, operand)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with array-element matching; `null` also matches a missing field.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(value) if values_equal(value, expected) => true,
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, expected)),
        Some(_) => false,
    }
}

fn operator_matches(actual: Option<&Value>, op: &str, operand: &Value) -> DbResult<bool> {
    let ordered = |accept: fn(Ordering) -> bool| {
        actual
            .and_then(|a| compare_values(a, operand))
            .is_some_and(accept)
    };
    Ok(match op {
        "$eq" => equals(actual, operand),
        "$ne" => !equals(actual, operand),
        "$lt" => ordered(|o| o == Ordering::Less),
        "$lte" => ordered(|o| o != Ordering::Greater),
        "$gt" => ordered(|o| o == Ordering::Greater),
        "$gte" => ordered(|o| o != Ordering::Less),
        "$in" => sub_filters(op, operand)?.iter().any(|c| equals(actual, c)),
        "$nin" => !sub_filters(op, operand)?.iter().any(|c| equals(actual, c)),
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        "$regex" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| DocumentDbError::InvalidFilter("$regex expects a string".into()))?;
            let regex = RegexCache::global()
                .get(pattern)
                .map_err(|e| DocumentDbError::InvalidFilter(e.to_string()))?;
            match actual {
                Some(Value::String(text)) => regex.is_match(text),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str().is_some_and(|text| regex.is_match(text))),
                _ => false,
            }
        }
        "$options" => true,
        other => {
            return Err(DocumentDbError::InvalidFilter(format!("unknown operator {other}")));
        }
    })
}

/// Plain equality fields of a filter, used to seed an upserted document.
fn equality_fields(filter: &Value, out: &mut Document) {
    let Some(clauses) = filter.as_object() else {
        return;
    };
    for (key, value) in clauses {
        if key == "$and" {
            for sub in value.as_array().into_iter().flatten() {
                equality_fields(sub, out);
            }
        } else if !key.starts_with('$') && !is_operator_object(value) {
            set_path(out, key, value.clone());
        } else if let Some(eq) = value.get("$eq") {
            set_path(out, key, eq.clone());
        }
    }
}

/// Set a dotted path, creating intermediate objects.
fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(inner) = child {
                set_path(inner, rest, value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Collection {
    /// Insertion sequence → document. Iteration order is insertion order.
    docs: BTreeMap<u64, Document>,
    ids: HashMap<String, u64>,
    unique_indexes: Vec<Vec<String>>,
}

fn doc_id(doc: &Document) -> Option<String> {
    match doc.get(ID_FIELD)? {
        Value::String(id) => Some(id.clone()),
        other => Some(other.to_string()),
    }
}

static NULL: Value = Value::Null;

fn index_tuple<'a>(doc: &'a Document, keys: &[String]) -> Option<Vec<&'a Value>> {
    let tuple: Vec<Option<&Value>> = keys.iter().map(|k| lookup_path(doc, k)).collect();
    // Documents missing every indexed field are not indexed.
    if tuple.iter().all(Option::is_none) {
        return None;
    }
    Some(tuple.into_iter().map(|v| v.unwrap_or(&NULL)).collect())
}

impl Collection {
    fn matching(&self, filter: &Value) -> DbResult<Vec<u64>> {
        let mut out = Vec::new();
        for (seq, doc) in &self.docs {
            if filter_matches(doc, filter)? {
                out.push(*seq);
            }
        }
        Ok(out)
    }

    /// Check `candidate` (stored at `seq`, or new when `None`) against every
    /// unique index.
    fn check_unique(&self, ns: &Namespace, candidate: &Document, seq: Option<u64>) -> DbResult<()> {
        if let Some(id) = doc_id(candidate) {
            if let Some(existing) = self.ids.get(&id) {
                if Some(*existing) != seq {
                    return Err(DocumentDbError::DuplicateKey {
                        ns: ns.to_string(),
                        key: format!("{ID_FIELD}={id}"),
                    });
                }
            }
        }
        for keys in &self.unique_indexes {
            let Some(tuple) = index_tuple(candidate, keys) else {
                continue;
            };
            let clash = self.docs.iter().any(|(other_seq, other)| {
                Some(*other_seq) != seq
                    && index_tuple(other, keys).is_some_and(|other_tuple| {
                        other_tuple
                            .iter()
                            .zip(tuple.iter())
                            .all(|(a, b)| values_equal(a, b))
                    })
            });
            if clash {
                return Err(DocumentDbError::DuplicateKey {
                    ns: ns.to_string(),
                    key: keys.join(","),
                });
            }
        }
        Ok(())
    }
}

fn compare_docs(a: &(u64, &Document), b: &(u64, &Document), sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ordering = if key.field == ID_FIELD {
            a.0.cmp(&b.0)
        } else {
            sort_order(lookup_path(a.1, &key.field), lookup_path(b.1, &key.field))
        };
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.0.cmp(&b.0)
}

fn project(doc: &Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return doc.clone();
    }
    doc.iter()
        .filter(|(key, _)| {
            key.as_str() == ID_FIELD
                || fields
                    .iter()
                    .any(|f| f.split('.').next() == Some(key.as_str()))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// InMemoryDocumentDb
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<Namespace, Collection>,
    next_seq: u64,
    oplog: VecDeque<OplogEntry>,
    last_position: u64,
}

impl State {
    fn log(&mut self, op: OplogOp, ns: &Namespace, id: Option<String>) -> &mut OplogEntry {
        if self.oplog.len() >= OPLOG_CAPACITY {
            self.oplog.pop_front();
        }
        self.last_position += 1;
        self.oplog.push_back(OplogEntry {
            position: self.last_position,
            timestamp: Utc::now(),
            op,
            ns: ns.clone(),
            id,
            document: None,
            updated_fields: Map::new(),
            removed_fields: Vec::new(),
        });
        let last = self.oplog.len() - 1;
        &mut self.oplog[last]
    }

    fn collection(&mut self, ns: &Namespace) -> &mut Collection {
        if !self.collections.contains_key(ns) {
            self.log(OplogOp::Command, &Namespace::new(ns.database.clone(), "$cmd"), None)
                .document = Some(Map::from_iter([(
                "create".to_string(),
                Value::String(ns.resource.clone()),
            )]));
        }
        self.collections.entry(ns.clone()).or_default()
    }

    fn insert(&mut self, ns: &Namespace, mut doc: Document) -> DbResult<String> {
        let id = match doc_id(&doc) {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };
        self.collection(ns).check_unique(ns, &doc, None)?;

        self.next_seq += 1;
        let seq = self.next_seq;
        let collection = self.collection(ns);
        collection.ids.insert(id.clone(), seq);
        collection.docs.insert(seq, doc.clone());
        self.log(OplogOp::Insert, ns, Some(id.clone())).document = Some(doc);
        Ok(id)
    }
}

/// Process-local [`DocumentClient`].
#[derive(Debug, Default)]
pub struct InMemoryDocumentDb {
    state: RwLock<State>,
    oplog_notify: Notify,
    failing_reads: AtomicU32,
    disconnected: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryDocumentDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operation-log reads fail with a transient error.
    pub fn fail_oplog_reads(&self, count: u32) {
        self.failing_reads.store(count, AtomicOrdering::SeqCst);
    }

    /// Append an administrative no-op entry to the operation log.
    pub async fn append_noop(&self) {
        let mut state = self.state.write().await;
        state.log(OplogOp::Noop, &Namespace::new("admin", "$cmd"), None);
        drop(state);
        self.oplog_notify.notify_waiters();
    }

    /// Fail every call with [`DocumentDbError::Disconnected`] until
    /// [`InMemoryDocumentDb::reconnect`].
    pub fn disconnect(&self) {
        self.disconnected.store(true, AtomicOrdering::SeqCst);
        self.oplog_notify.notify_waiters();
    }

    pub fn reconnect(&self) {
        self.disconnected.store(false, AtomicOrdering::SeqCst);
    }

    fn check(&self) -> DbResult<()> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(DocumentDbError::Closed);
        }
        if self.disconnected.load(AtomicOrdering::SeqCst) {
            return Err(DocumentDbError::Disconnected);
        }
        Ok(())
    }

    fn check_oplog_read(&self) -> DbResult<()> {
        self.check()?;
        let injected = self
            .failing_reads
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(DocumentDbError::Transient("injected oplog read failure".to_string()));
        }
        Ok(())
    }

    async fn entries_after(&self, position: u64, limit: usize) -> Vec<OplogEntry> {
        let state = self.state.read().await;
        let start = state.oplog.partition_point(|entry| entry.position <= position);
        state.oplog.iter().skip(start).take(limit.max(1)).cloned().collect()
    }
}

#[async_trait]
impl DocumentClient for InMemoryDocumentDb {
    async fn find(
        &self,
        ns: &Namespace,
        filter: &Value,
        opts: &FindOptions,
    ) -> DbResult<Vec<Document>> {
        self.check()?;
        let state = self.state.read().await;
        let Some(collection) = state.collections.get(ns) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(u64, &Document)> = Vec::new();
        for (seq, doc) in &collection.docs {
            if filter_matches(doc, filter)? {
                hits.push((*seq, doc));
            }
        }
        hits.sort_by(|a, b| compare_docs(a, b, &opts.sort));

        let skip = usize::try_from(opts.skip).unwrap_or(usize::MAX);
        let limit = match opts.limit {
            0 => usize::MAX,
            n => usize::try_from(n).unwrap_or(usize::MAX),
        };
        Ok(hits
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|(_, doc)| project(doc, &opts.projection))
            .collect())
    }

    async fn find_by_id(&self, ns: &Namespace, id: &str) -> DbResult<Option<Document>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.collections.get(ns).and_then(|collection| {
            let seq = collection.ids.get(id)?;
            collection.docs.get(seq).cloned()
        }))
    }

    async fn count(&self, ns: &Namespace, filter: &Value) -> DbResult<u64> {
        self.check()?;
        let state = self.state.read().await;
        match state.collections.get(ns) {
            Some(collection) => Ok(collection.matching(filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn distinct(&self, ns: &Namespace, key: &str, filter: &Value) -> DbResult<Vec<Value>> {
        self.check()?;
        let state = self.state.read().await;
        let Some(collection) = state.collections.get(ns) else {
            return Ok(Vec::new());
        };
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for seq in collection.matching(filter)? {
            let Some(value) = collection.docs.get(&seq).and_then(|doc| lookup_path(doc, key)) else {
                continue;
            };
            if seen.insert(value.to_string()) {
                out.push(value.clone());
            }
        }
        Ok(out)
    }

    async fn insert_many(&self, ns: &Namespace, docs: Vec<Document>) -> DbResult<Vec<String>> {
        self.check()?;
        let mut state = self.state.write().await;
        let mut ids = Vec::with_capacity(docs.len());
        let mut result = Ok(());
        for doc in docs {
            match state.insert(ns, doc) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        drop(state);
        if !ids.is_empty() {
            self.oplog_notify.notify_waiters();
        }
        debug!(ns = %ns, inserted = ids.len(), "Inserted documents");
        result.map(|()| ids)
    }

    async fn update(
        &self,
        ns: &Namespace,
        filter: &Value,
        set: &Document,
        multi: bool,
        upsert: bool,
    ) -> DbResult<UpdateOutcome> {
        self.check()?;
        let mut state = self.state.write().await;
        let mut outcome = UpdateOutcome::default();

        let matched = match state.collections.get(ns) {
            Some(collection) => collection.matching(filter)?,
            None => Vec::new(),
        };
        let targets: Vec<u64> = if multi {
            matched
        } else {
            matched.into_iter().take(1).collect()
        };

        if targets.is_empty() {
            if upsert {
                let mut doc = Map::new();
                equality_fields(filter, &mut doc);
                for (key, value) in set {
                    doc.insert(key.clone(), value.clone());
                }
                let id = state.insert(ns, doc)?;
                outcome.upserted_id = Some(id);
                drop(state);
                self.oplog_notify.notify_waiters();
            }
            return Ok(outcome);
        }

        let mut logged = false;
        for seq in targets {
            outcome.matched += 1;
            let collection = state.collection(ns);
            let Some(current) = collection.docs.get(&seq) else {
                continue;
            };
            let mut next = current.clone();
            let mut changed = Map::new();
            for (key, value) in set {
                if key == ID_FIELD {
                    continue;
                }
                if next.get(key) != Some(value) {
                    next.insert(key.clone(), value.clone());
                    changed.insert(key.clone(), value.clone());
                }
            }
            if changed.is_empty() {
                continue;
            }
            collection.check_unique(ns, &next, Some(seq))?;
            let id = doc_id(&next);
            collection.docs.insert(seq, next);
            outcome.modified += 1;
            state.log(OplogOp::Update, ns, id).updated_fields = changed;
            logged = true;
        }
        drop(state);
        if logged {
            self.oplog_notify.notify_waiters();
        }
        trace!(ns = %ns, matched = outcome.matched, modified = outcome.modified, "Updated documents");
        Ok(outcome)
    }

    async fn delete(&self, ns: &Namespace, filter: &Value, multi: bool) -> DbResult<u64> {
        self.check()?;
        let mut state = self.state.write().await;
        let matched = match state.collections.get(ns) {
            Some(collection) => collection.matching(filter)?,
            None => return Ok(0),
        };
        let targets: Vec<u64> = if multi {
            matched
        } else {
            matched.into_iter().take(1).collect()
        };

        let mut removed = 0;
        for seq in targets {
            let collection = state.collection(ns);
            let Some(doc) = collection.docs.remove(&seq) else {
                continue;
            };
            let id = doc_id(&doc);
            if let Some(id) = &id {
                collection.ids.remove(id);
            }
            state.log(OplogOp::Delete, ns, id);
            removed += 1;
        }
        drop(state);
        if removed > 0 {
            self.oplog_notify.notify_waiters();
        }
        Ok(removed)
    }

    async fn ensure_collection(&self, ns: &Namespace) -> DbResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        state.collection(ns);
        Ok(())
    }

    async fn ensure_index(&self, ns: &Namespace, keys: &[String]) -> DbResult<()> {
        self.check()?;
        if keys.is_empty() {
            return Err(DocumentDbError::InvalidFilter("index needs at least one key".into()));
        }
        let mut state = self.state.write().await;
        let collection = state.collection(ns);
        if collection.unique_indexes.iter().any(|existing| existing == keys) {
            return Ok(());
        }

        let mut seen: Vec<Vec<&Value>> = Vec::new();
        for doc in collection.docs.values() {
            if let Some(tuple) = index_tuple(doc, keys) {
                let duplicate = seen
                    .iter()
                    .any(|other| other.iter().zip(tuple.iter()).all(|(a, b)| values_equal(a, b)));
                if duplicate {
                    return Err(DocumentDbError::DuplicateKey {
                        ns: ns.to_string(),
                        key: keys.join(","),
                    });
                }
                seen.push(tuple);
            }
        }
        collection.unique_indexes.push(keys.to_vec());
        debug!(ns = %ns, keys = ?keys, "Created unique index");
        Ok(())
    }

    async fn collection_names(&self, database: &str) -> DbResult<Vec<String>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .collections
            .keys()
            .filter(|ns| ns.database == database)
            .map(|ns| ns.resource.clone())
            .collect())
    }

    async fn database_names(&self) -> DbResult<Vec<String>> {
        self.check()?;
        let state = self.state.read().await;
        let names: BTreeSet<String> =
            state.collections.keys().map(|ns| ns.database.clone()).collect();
        Ok(names.into_iter().collect())
    }

    async fn oplog_latest(&self) -> DbResult<u64> {
        self.check_oplog_read()?;
        Ok(self.state.read().await.last_position)
    }

    async fn oplog_after(
        &self,
        position: u64,
        limit: usize,
        wait: Duration,
    ) -> DbResult<Vec<OplogEntry>> {
        self.check_oplog_read()?;

        let notified = self.oplog_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let entries = self.entries_after(position, limit).await;
        if !entries.is_empty() || wait.is_zero() {
            return Ok(entries);
        }
        let _ = tokio::time::timeout(wait, notified).await;
        self.check()?;
        Ok(self.entries_after(position, limit).await)
    }

    async fn close(&self) -> DbResult<()> {
        self.closed.store(true, AtomicOrdering::SeqCst);
        self.oplog_notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn ns() -> Namespace {
        Namespace::new("db", "nodes")
    }

    #[test]
    fn test_filter_operators() {
        let d = doc(json!({"ip": "10.0.0.1", "cpu": 4, "tags": ["a", "b"]}));
        assert!(filter_matches(&d, &json!({})).unwrap());
        assert!(filter_matches(&d, &json!({"ip": "10.0.0.1"})).unwrap());
        assert!(filter_matches(&d, &json!({"tags": "a"})).unwrap());
        assert!(filter_matches(&d, &json!({"cpu": {"$gte": 4, "$lt": 5}})).unwrap());
        assert!(filter_matches(&d, &json!({"cpu": {"$in": [1, 4]}})).unwrap());
        assert!(filter_matches(&d, &json!({"gone": {"$exists": false}})).unwrap());
        assert!(filter_matches(&d, &json!({"ip": {"$regex": "0\\.0"}})).unwrap());
        assert!(filter_matches(&d, &json!({"$nor": [{"cpu": 5}]})).unwrap());
        assert!(filter_matches(&d, &json!({"$or": [{"cpu": 5}, {"ip": "10.0.0.1"}]})).unwrap());
        assert!(!filter_matches(&d, &json!({"$and": [{"cpu": 4}, {"ip": "x"}]})).unwrap());
        assert!(filter_matches(&d, &json!({"deleted": {"$ne": true}})).unwrap());
    }

    #[test]
    fn test_filter_rejects_unknown_operator() {
        let d = doc(json!({"a": 1}));
        assert!(matches!(
            filter_matches(&d, &json!({"a": {"$near": 1}})),
            Err(DocumentDbError::InvalidFilter(_))
        ));
        assert!(filter_matches(&d, &json!([1])).is_err());
    }

    #[tokio::test]
    async fn test_insert_find_sort_page() {
        let db = InMemoryDocumentDb::new();
        let docs = (0..5).map(|i| doc(json!({"n": i % 2, "i": i}))).collect();
        db.insert_many(&ns(), docs).await.unwrap();

        let opts = FindOptions {
            sort: vec![SortKey::desc("n"), SortKey::asc(ID_FIELD)],
            skip: 1,
            limit: 2,
            projection: vec!["i".to_string()],
        };
        let page = db.find(&ns(), &json!({}), &opts).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["i"], json!(3));
        assert_eq!(page[1]["i"], json!(0));
        assert!(page[0].contains_key(ID_FIELD));
        assert!(!page[0].contains_key("n"));
    }

    #[tokio::test]
    async fn test_unique_index() {
        let db = InMemoryDocumentDb::new();
        db.ensure_index(&ns(), &["ip".to_string()]).await.unwrap();
        db.insert_many(&ns(), vec![doc(json!({"ip": "a"}))]).await.unwrap();
        let err = db
            .insert_many(&ns(), vec![doc(json!({"ip": "a"}))])
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentDbError::DuplicateKey { .. }));
        // Documents without the indexed field are not indexed.
        db.insert_many(&ns(), vec![doc(json!({"x": 1})), doc(json!({"x": 2}))])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_and_noop_update() {
        let db = InMemoryDocumentDb::new();
        let outcome = db
            .update(&ns(), &json!({"ip": "a"}), &doc(json!({"cpu": 2})), false, true)
            .await
            .unwrap();
        assert!(outcome.upserted_id.is_some());
        let found = db.find(&ns(), &json!({"ip": "a"}), &FindOptions::default()).await.unwrap();
        assert_eq!(found[0]["cpu"], json!(2));

        let latest = db.oplog_latest().await.unwrap();
        let outcome = db
            .update(&ns(), &json!({"ip": "a"}), &doc(json!({"cpu": 2})), false, false)
            .await
            .unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.modified, 0);
        assert_eq!(db.oplog_latest().await.unwrap(), latest);

        let outcome = db
            .update(&ns(), &json!({"ip": "zz"}), &doc(json!({"cpu": 3})), true, false)
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::default());
    }

    #[tokio::test]
    async fn test_nested_paths() {
        let db = InMemoryDocumentDb::new();
        let outcome = db
            .update(&ns(), &json!({"spec.zone": "z1"}), &doc(json!({"ip": "a"})), false, true)
            .await
            .unwrap();
        assert!(outcome.upserted_id.is_some());
        let opts = FindOptions {
            projection: vec!["spec.zone".to_string()],
            ..FindOptions::default()
        };
        let found = db.find(&ns(), &json!({"spec.zone": "z1"}), &opts).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["spec"], json!({"zone": "z1"}));
        assert!(!found[0].contains_key("ip"));
    }

    #[tokio::test]
    async fn test_oplog_records_mutations() {
        let db = InMemoryDocumentDb::new();
        let ids = db.insert_many(&ns(), vec![doc(json!({"a": 1}))]).await.unwrap();
        db.update(&ns(), &json!({"a": 1}), &doc(json!({"b": 2})), false, false)
            .await
            .unwrap();
        db.delete(&ns(), &json!({}), true).await.unwrap();

        let entries = db.oplog_after(0, 100, Duration::ZERO).await.unwrap();
        let ops: Vec<OplogOp> = entries.iter().map(|e| e.op).collect();
        assert_eq!(
            ops,
            vec![OplogOp::Command, OplogOp::Insert, OplogOp::Update, OplogOp::Delete]
        );
        assert_eq!(entries[2].updated_fields, doc(json!({"b": 2})));
        assert_eq!(entries[3].id.as_deref(), Some(ids[0].as_str()));
    }

    #[tokio::test]
    async fn test_oplog_after_waits_for_new_entries() {
        let db = std::sync::Arc::new(InMemoryDocumentDb::new());
        let latest = db.oplog_latest().await.unwrap();
        let writer = db.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append_noop().await;
        });
        let entries = db.oplog_after(latest, 10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].op, OplogOp::Noop);
    }

    #[tokio::test]
    async fn test_failure_hooks() {
        let db = InMemoryDocumentDb::new();
        db.fail_oplog_reads(2);
        assert!(matches!(db.oplog_latest().await, Err(DocumentDbError::Transient(_))));
        assert!(db.oplog_after(0, 1, Duration::ZERO).await.is_err());
        assert!(db.oplog_latest().await.is_ok());

        db.disconnect();
        assert_eq!(db.count(&ns(), &json!({})).await, Err(DocumentDbError::Disconnected));
        db.reconnect();
        assert_eq!(db.count(&ns(), &json!({})).await, Ok(0));
    }
}
