// SPDX-License-Identifier: PMPL-1.0-or-later
//
// `Tank` over a document database.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use tank_core::{
    ChangeInfo, Document, Namespace, SortKey, Subscription, Tank, TankError, TankResult,
    TankSpec, TankValue, WatchOptions,
};

use crate::client::{DocumentClient, FindOptions, ID_FIELD};
use crate::escape::{escape_document, escape_path, unescape_document};
use crate::filter::to_native;
use crate::router::WatchRouter;

pub const BACKEND: &str = "document";

pub struct DocumentTank {
    client: Arc<dyn DocumentClient>,
    router: Arc<WatchRouter>,
    subscriber_capacity: usize,
    spec: TankSpec,
    native_filter: OnceLock<Value>,
}

impl DocumentTank {
    pub fn new(
        client: Arc<dyn DocumentClient>,
        router: Arc<WatchRouter>,
        subscriber_capacity: usize,
        spec: TankSpec,
    ) -> Self {
        Self {
            client,
            router,
            subscriber_capacity,
            spec,
            native_filter: OnceLock::new(),
        }
    }

    /// The translated condition, computed once per tank.
    pub fn native_filter(&self) -> &Value {
        self.native_filter
            .get_or_init(|| to_native(self.spec.condition()))
    }

    fn find_options(&self) -> FindOptions {
        let mut sort: Vec<SortKey> = self
            .spec
            .sort_keys()
            .iter()
            .map(|key| SortKey {
                field: escape_path(&key.field).into_owned(),
                descending: key.descending,
            })
            .collect();
        // Stable paging needs a total order.
        if !sort.iter().any(|key| key.field == ID_FIELD) {
            sort.push(SortKey::asc(ID_FIELD));
        }
        FindOptions {
            sort,
            skip: self.spec.get_offset(),
            limit: self.spec.get_limit(),
            projection: self
                .spec
                .fields()
                .iter()
                .map(|field| escape_path(field).into_owned())
                .collect(),
        }
    }

    /// Resolve the namespace and create the collection and declared unique
    /// index before a write.
    async fn prepare_write(&self) -> Result<Namespace, TankError> {
        let ns = self.spec.require_resource()?;
        self.client.ensure_collection(&ns).await?;
        let keys: Vec<String> = self
            .spec
            .index_keys()
            .iter()
            .map(|key| escape_path(key).into_owned())
            .collect();
        if !keys.is_empty() {
            self.client.ensure_index(&ns, &keys).await?;
        }
        Ok(ns)
    }

    async fn set(&self, doc: Document, multi: bool, upsert: bool) -> Result<TankResult, TankError> {
        let ns = self.prepare_write().await?;
        let outcome = self
            .client
            .update(&ns, self.native_filter(), &escape_document(&doc), multi, upsert)
            .await?;
        debug!(ns = %ns, matched = outcome.matched, modified = outcome.modified, upserted = outcome.upserted_id.is_some(), "Set fields");
        Ok(TankResult::changed(ChangeInfo {
            matched: outcome.matched,
            updated: outcome.modified,
            upserted_id: outcome.upserted_id,
            ..ChangeInfo::default()
        }))
    }

    async fn delete(&self, multi: bool) -> Result<TankResult, TankError> {
        let ns = self.spec.require_resource()?;
        let removed = self.client.delete(&ns, self.native_filter(), multi).await?;
        Ok(TankResult::changed(ChangeInfo {
            matched: removed,
            removed,
            ..ChangeInfo::default()
        }))
    }
}

#[async_trait]
impl Tank for DocumentTank {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn spec(&self) -> &TankSpec {
        &self.spec
    }

    fn with_spec(&self, spec: TankSpec) -> Box<dyn Tank> {
        Box::new(DocumentTank::new(
            self.client.clone(),
            self.router.clone(),
            self.subscriber_capacity,
            spec,
        ))
    }

    #[instrument(skip(self), fields(ns = %self.spec.namespace()))]
    async fn query(&self) -> Result<TankResult, TankError> {
        let ns = self.spec.require_resource()?;
        if let Some(key) = self.spec.distinct_key() {
            let values = self
                .client
                .distinct(&ns, &escape_path(key), self.native_filter())
                .await?;
            return Ok(TankResult::new(TankValue::Values(values)));
        }
        let docs = self
            .client
            .find(&ns, self.native_filter(), &self.find_options())
            .await?;
        Ok(TankResult::documents(docs.iter().map(unescape_document).collect()))
    }

    #[instrument(skip(self), fields(ns = %self.spec.namespace()))]
    async fn count(&self) -> Result<TankResult, TankError> {
        let ns = self.spec.require_resource()?;
        let count = self.client.count(&ns, self.native_filter()).await?;
        Ok(TankResult::count(count))
    }

    #[instrument(skip(self, docs), fields(ns = %self.spec.namespace(), docs = docs.len()))]
    async fn insert(&self, docs: Vec<Document>) -> Result<TankResult, TankError> {
        let ns = self.prepare_write().await?;
        let escaped = docs.iter().map(escape_document).collect();
        let ids = self.client.insert_many(&ns, escaped).await?;
        Ok(TankResult::changed(ChangeInfo {
            inserted: ids.len() as u64,
            ..ChangeInfo::default()
        }))
    }

    #[instrument(skip(self, doc), fields(ns = %self.spec.namespace()))]
    async fn upsert(&self, doc: Document) -> Result<TankResult, TankError> {
        self.set(doc, false, true).await
    }

    #[instrument(skip(self, doc), fields(ns = %self.spec.namespace()))]
    async fn update(&self, doc: Document) -> Result<TankResult, TankError> {
        self.set(doc, false, false).await
    }

    #[instrument(skip(self, doc), fields(ns = %self.spec.namespace()))]
    async fn update_all(&self, doc: Document) -> Result<TankResult, TankError> {
        self.set(doc, true, false).await
    }

    #[instrument(skip(self), fields(ns = %self.spec.namespace()))]
    async fn remove(&self) -> Result<TankResult, TankError> {
        self.delete(false).await
    }

    #[instrument(skip(self), fields(ns = %self.spec.namespace()))]
    async fn remove_all(&self) -> Result<TankResult, TankError> {
        self.delete(true).await
    }

    async fn tables(&self) -> Result<TankResult, TankError> {
        self.spec.check()?;
        let names = self.client.collection_names(self.spec.database()).await?;
        Ok(TankResult::new(TankValue::Names(names)))
    }

    async fn databases(&self) -> Result<TankResult, TankError> {
        self.spec.check()?;
        let names = self.client.database_names().await?;
        Ok(TankResult::new(TankValue::Names(names)))
    }

    async fn watch(&self, opts: &WatchOptions) -> Result<Subscription, TankError> {
        let ns = self.spec.require_resource()?;
        debug!(ns = %ns, self_only = opts.self_only, "Opening watch");
        Ok(self.router.subscribe(&ns, self.subscriber_capacity))
    }

    async fn close(&self) -> Result<(), TankError> {
        self.client.close().await?;
        Ok(())
    }
}
