// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MongoDB-backed `DocumentClient`.
//
// Requires a replica set: change feeds tail `local.oplog.rs` with a
// tailable-await cursor. A log position packs the entry's `ts` timestamp
// as `seconds << 32 | increment`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{FutureExt, TryStreamExt};
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document as BsonDocument, Timestamp};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{CursorType, FindOptions as MongoFindOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use serde_json::{Map, Value};
use tracing::{debug, info};

use tank_core::{Document, Namespace};

use crate::client::{
    DbResult, DocumentClient, FindOptions, OplogEntry, OplogOp, UpdateOutcome, ID_FIELD,
};
use crate::error::DocumentDbError;

const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_EXISTS: i32 = 48;

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn map_error(e: MongoError) -> DocumentDbError {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(w)) if w.code == DUPLICATE_KEY => {
            DocumentDbError::DuplicateKey {
                ns: String::new(),
                key: w.message.clone(),
            }
        }
        ErrorKind::InsertMany(failure)
            if failure
                .write_errors
                .iter()
                .flatten()
                .any(|w| w.code == DUPLICATE_KEY) =>
        {
            DocumentDbError::DuplicateKey {
                ns: String::new(),
                key: e.to_string(),
            }
        }
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => {
            DocumentDbError::Disconnected
        }
        ErrorKind::Shutdown => DocumentDbError::Closed,
        _ => DocumentDbError::Transient(e.to_string()),
    }
}

fn with_ns(e: MongoError, ns: &Namespace) -> DocumentDbError {
    match map_error(e) {
        DocumentDbError::DuplicateKey { key, .. } => DocumentDbError::DuplicateKey {
            ns: ns.to_string(),
            key,
        },
        other => other,
    }
}

fn to_bson_doc(value: &impl serde::Serialize) -> DbResult<BsonDocument> {
    bson::to_document(value).map_err(|e| DocumentDbError::InvalidDocument(e.to_string()))
}

fn filter_doc(filter: &Value) -> DbResult<BsonDocument> {
    bson::to_document(filter).map_err(|e| DocumentDbError::InvalidFilter(e.to_string()))
}

fn from_bson_doc(doc: BsonDocument) -> Document {
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn id_string(id: &Bson) -> String {
    match id {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}

/// Match an identifier stored either as a string or as an ObjectId.
fn id_filter(id: &str) -> BsonDocument {
    match ObjectId::parse_str(id) {
        Ok(oid) => doc! { ID_FIELD: { "$in": [id, oid] } },
        Err(_) => doc! { ID_FIELD: id },
    }
}

pub(crate) fn position_of(ts: Timestamp) -> u64 {
    (u64::from(ts.time) << 32) | u64::from(ts.increment)
}

pub(crate) fn timestamp_of(position: u64) -> Timestamp {
    Timestamp {
        time: (position >> 32) as u32,
        increment: (position & u64::from(u32::MAX)) as u32,
    }
}

/// Collect changed and removed paths from a `$v: 2` update diff.
fn flatten_diff(prefix: &str, diff: &BsonDocument, updated: &mut Document, removed: &mut Vec<String>) {
    let path = |field: &str| {
        if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        }
    };
    for (key, value) in diff {
        match (key.as_str(), value) {
            ("u" | "i", Bson::Document(fields)) => {
                for (field, v) in fields {
                    updated.insert(path(field), v.clone().into_relaxed_extjson());
                }
            }
            ("d", Bson::Document(fields)) => removed.extend(fields.keys().map(|f| path(f))),
            (nested, Bson::Document(sub)) if nested.len() > 1 && nested.starts_with('s') => {
                flatten_diff(&path(&nested[1..]), sub, updated, removed);
            }
            _ => {}
        }
    }
}

/// Changed and removed fields of an update entry's `o` document.
fn update_fields(o: &BsonDocument) -> (Document, Vec<String>) {
    let mut updated = Map::new();
    let mut removed = Vec::new();
    if let Ok(diff) = o.get_document("diff") {
        flatten_diff("", diff, &mut updated, &mut removed);
    } else {
        if let Ok(set) = o.get_document("$set") {
            for (field, v) in set {
                updated.insert(field.clone(), v.clone().into_relaxed_extjson());
            }
        }
        if let Ok(unset) = o.get_document("$unset") {
            removed.extend(unset.keys().cloned());
        }
    }
    (updated, removed)
}

/// Decode one raw `local.oplog.rs` document.
pub(crate) fn parse_entry(raw: &BsonDocument) -> Option<OplogEntry> {
    let ts = raw.get_timestamp("ts").ok()?;
    let op = OplogOp::from_code(raw.get_str("op").ok()?.chars().next()?)?;
    let ns = raw.get_str("ns").unwrap_or_default();
    let ns = Namespace::parse(ns).unwrap_or_else(|| Namespace::new(ns, ""));
    let o = raw.get_document("o").ok();

    let id_source = match op {
        OplogOp::Update => raw.get_document("o2").ok(),
        _ => o,
    };
    let id = id_source.and_then(|doc| doc.get(ID_FIELD)).map(id_string);

    let mut entry = OplogEntry {
        position: position_of(ts),
        timestamp: DateTime::<Utc>::from_timestamp(i64::from(ts.time), 0).unwrap_or_default(),
        op,
        ns,
        id,
        document: None,
        updated_fields: Map::new(),
        removed_fields: Vec::new(),
    };
    match op {
        OplogOp::Insert | OplogOp::Command => entry.document = o.cloned().map(from_bson_doc),
        OplogOp::Update => {
            if let Some(o) = o {
                (entry.updated_fields, entry.removed_fields) = update_fields(o);
            }
        }
        OplogOp::Delete | OplogOp::Noop => {}
    }
    Some(entry)
}

// ---------------------------------------------------------------------------
// MongoDocumentClient
// ---------------------------------------------------------------------------

/// [`DocumentClient`] over a MongoDB replica set.
pub struct MongoDocumentClient {
    client: Client,
    closed: AtomicBool,
}

impl MongoDocumentClient {
    /// Connect with a `mongodb://` connection string.
    pub async fn connect(uri: &str) -> DbResult<Self> {
        let client = Client::with_uri_str(uri).await.map_err(map_error)?;
        info!("Connected to MongoDB");
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    fn check(&self) -> DbResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DocumentDbError::Closed);
        }
        Ok(())
    }

    fn collection(&self, ns: &Namespace) -> Collection<BsonDocument> {
        self.client.database(&ns.database).collection(&ns.resource)
    }

    fn oplog(&self) -> Collection<BsonDocument> {
        self.client.database("local").collection("oplog.rs")
    }

    fn decode_entries(raw: Vec<BsonDocument>) -> Vec<OplogEntry> {
        raw.iter()
            .filter_map(|doc| {
                let entry = parse_entry(doc);
                if entry.is_none() {
                    debug!("Skipping unreadable oplog entry");
                }
                entry
            })
            .collect()
    }
}

#[async_trait]
impl DocumentClient for MongoDocumentClient {
    async fn find(
        &self,
        ns: &Namespace,
        filter: &Value,
        opts: &FindOptions,
    ) -> DbResult<Vec<Document>> {
        self.check()?;
        let mut options = MongoFindOptions::default();
        if !opts.sort.is_empty() {
            let mut sort = BsonDocument::new();
            for key in &opts.sort {
                sort.insert(key.field.clone(), if key.descending { -1 } else { 1 });
            }
            options.sort = Some(sort);
        }
        if opts.skip > 0 {
            options.skip = Some(opts.skip);
        }
        if opts.limit > 0 {
            options.limit = Some(i64::try_from(opts.limit).unwrap_or(i64::MAX));
        }
        if !opts.projection.is_empty() {
            let mut projection = BsonDocument::new();
            for field in &opts.projection {
                projection.insert(field.clone(), 1);
            }
            options.projection = Some(projection);
        }

        let cursor = self
            .collection(ns)
            .find(filter_doc(filter)?)
            .with_options(options)
            .await
            .map_err(map_error)?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await.map_err(map_error)?;
        Ok(docs.into_iter().map(from_bson_doc).collect())
    }

    async fn find_by_id(&self, ns: &Namespace, id: &str) -> DbResult<Option<Document>> {
        self.check()?;
        let found = self
            .collection(ns)
            .find_one(id_filter(id))
            .await
            .map_err(map_error)?;
        Ok(found.map(from_bson_doc))
    }

    async fn count(&self, ns: &Namespace, filter: &Value) -> DbResult<u64> {
        self.check()?;
        self.collection(ns)
            .count_documents(filter_doc(filter)?)
            .await
            .map_err(map_error)
    }

    async fn distinct(&self, ns: &Namespace, key: &str, filter: &Value) -> DbResult<Vec<Value>> {
        self.check()?;
        let values = self
            .collection(ns)
            .distinct(key, filter_doc(filter)?)
            .await
            .map_err(map_error)?;
        Ok(values.into_iter().map(Bson::into_relaxed_extjson).collect())
    }

    async fn insert_many(&self, ns: &Namespace, docs: Vec<Document>) -> DbResult<Vec<String>> {
        self.check()?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::with_capacity(docs.len());
        let mut batch = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = match doc.get(ID_FIELD) {
                Some(Value::String(id)) => id.clone(),
                Some(other) => other.to_string(),
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                    id
                }
            };
            ids.push(id);
            batch.push(to_bson_doc(&doc)?);
        }
        self.collection(ns)
            .insert_many(batch)
            .await
            .map_err(|e| with_ns(e, ns))?;
        debug!(ns = %ns, inserted = ids.len(), "Inserted documents");
        Ok(ids)
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
        let filter = filter_doc(filter)?;
        let collection = self.collection(ns);
        let mut fields = set.clone();
        let id = fields.remove(ID_FIELD);

        if fields.is_empty() && !upsert {
            // `$set` must not be empty; report the matches without writing.
            let matched = collection
                .count_documents(filter)
                .await
                .map_err(map_error)?;
            return Ok(UpdateOutcome {
                matched: if multi { matched } else { matched.min(1) },
                ..UpdateOutcome::default()
            });
        }

        let mut update = BsonDocument::new();
        if !fields.is_empty() {
            update.insert("$set", to_bson_doc(&fields)?);
        }
        let new_id = match id {
            Some(Value::String(id)) => id,
            Some(other) => other.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        if upsert {
            update.insert("$setOnInsert", doc! { ID_FIELD: new_id });
        }

        let result = if multi {
            collection.update_many(filter, update).upsert(upsert).await
        } else {
            collection.update_one(filter, update).upsert(upsert).await
        }
        .map_err(|e| with_ns(e, ns))?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id.as_ref().map(id_string),
        })
    }

    async fn delete(&self, ns: &Namespace, filter: &Value, multi: bool) -> DbResult<u64> {
        self.check()?;
        let collection = self.collection(ns);
        let filter = filter_doc(filter)?;
        let result = if multi {
            collection.delete_many(filter).await
        } else {
            collection.delete_one(filter).await
        }
        .map_err(map_error)?;
        Ok(result.deleted_count)
    }

    async fn ensure_collection(&self, ns: &Namespace) -> DbResult<()> {
        self.check()?;
        match self
            .client
            .database(&ns.database)
            .create_collection(&ns.resource)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.kind.as_ref(), ErrorKind::Command(c) if c.code == NAMESPACE_EXISTS) => {
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    async fn ensure_index(&self, ns: &Namespace, keys: &[String]) -> DbResult<()> {
        self.check()?;
        if keys.is_empty() {
            return Err(DocumentDbError::InvalidFilter("index needs at least one key".into()));
        }
        let mut spec = BsonDocument::new();
        for key in keys {
            spec.insert(key.clone(), 1);
        }
        // Sparse: documents missing every indexed field do not collide.
        let mut options = IndexOptions::default();
        options.unique = Some(true);
        options.sparse = Some(true);
        let model = IndexModel::builder().keys(spec).options(options).build();
        self.collection(ns)
            .create_index(model)
            .await
            .map_err(|e| with_ns(e, ns))?;
        debug!(ns = %ns, keys = ?keys, "Ensured unique index");
        Ok(())
    }

    async fn collection_names(&self, database: &str) -> DbResult<Vec<String>> {
        self.check()?;
        self.client
            .database(database)
            .list_collection_names()
            .await
            .map_err(map_error)
    }

    async fn database_names(&self) -> DbResult<Vec<String>> {
        self.check()?;
        self.client.list_database_names().await.map_err(map_error)
    }

    async fn oplog_latest(&self) -> DbResult<u64> {
        self.check()?;
        let newest = self
            .oplog()
            .find_one(doc! {})
            .sort(doc! { "$natural": -1 })
            .await
            .map_err(map_error)?;
        Ok(newest
            .and_then(|raw| raw.get_timestamp("ts").ok())
            .map(position_of)
            .unwrap_or(0))
    }

    async fn oplog_after(
        &self,
        position: u64,
        limit: usize,
        wait: Duration,
    ) -> DbResult<Vec<OplogEntry>> {
        self.check()?;
        let limit = limit.max(1);
        let filter = doc! { "ts": { "$gt": timestamp_of(position) } };
        let mut options = MongoFindOptions::default();
        options.sort = Some(doc! { "$natural": 1 });
        if wait.is_zero() {
            options.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));
            let cursor = self
                .oplog()
                .find(filter)
                .with_options(options)
                .await
                .map_err(map_error)?;
            let raw: Vec<BsonDocument> = cursor.try_collect().await.map_err(map_error)?;
            return Ok(Self::decode_entries(raw));
        }

        options.cursor_type = Some(CursorType::TailableAwait);
        options.max_await_time = Some(wait);
        let mut cursor = self
            .oplog()
            .find(filter)
            .with_options(options)
            .await
            .map_err(map_error)?;

        let mut raw = Vec::new();
        // Wait for the first entry, then take whatever is already buffered.
        match tokio::time::timeout(wait, cursor.try_next()).await {
            Ok(Ok(Some(doc))) => raw.push(doc),
            Ok(Ok(None)) | Err(_) => return Ok(Vec::new()),
            Ok(Err(e)) => return Err(map_error(e)),
        }
        while raw.len() < limit {
            match cursor.try_next().now_or_never() {
                Some(Ok(Some(doc))) => raw.push(doc),
                Some(Err(e)) => return Err(map_error(e)),
                Some(Ok(None)) | None => break,
            }
        }
        Ok(Self::decode_entries(raw))
    }

    async fn close(&self) -> DbResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.client.clone().shutdown().await;
        Ok(())
    }
}
