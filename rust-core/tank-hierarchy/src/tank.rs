// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `Tank` over a hierarchical node store.
//
// A resource lives at `/{root}/{database}/{resource}`. Each document is one
// child node, named by the value of the first declared unique-index key,
// whose data is the JSON document. A query fuses every matching child into
// a single document keyed by child name, so a resource reads back as at most
// one result. The store has no change channel, so `watch` is unsupported.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use tank_core::{
    ChangeInfo, Document, Subscription, Tank, TankError, TankResult, TankSpec, TankValue,
    WatchOptions,
};

use crate::client::{NodeClient, NodeError};

pub const BACKEND: &str = "hierarchy";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Top-level node under which all databases live.
    pub root: String,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            root: "tank".to_string(),
        }
    }
}

pub struct HierarchyTank {
    client: Arc<dyn NodeClient>,
    config: Arc<HierarchyConfig>,
    spec: TankSpec,
}

struct Child {
    name: String,
    doc: Document,
}

impl HierarchyTank {
    pub fn new(client: Arc<dyn NodeClient>, config: Arc<HierarchyConfig>, spec: TankSpec) -> Self {
        Self {
            client,
            config,
            spec,
        }
    }

    fn root_path(&self) -> String {
        format!("/{}", self.config.root)
    }

    fn database_path(&self) -> String {
        format!("{}/{}", self.root_path(), self.spec.database())
    }

    fn resource_path(&self) -> Result<String, TankError> {
        let ns = self.spec.require_resource()?;
        Ok(format!("/{}/{}/{}", self.config.root, ns.database, ns.resource))
    }

    /// Child node name for `doc`: the value of the first unique-index key.
    fn child_name(&self, doc: &Document) -> Result<String, TankError> {
        let key = self
            .spec
            .index_keys()
            .first()
            .ok_or_else(|| TankError::InvalidArgument("unique index key required".to_string()))?;
        let name = match doc.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Err(TankError::InvalidArgument(format!(
                    "document has no value for unique key '{key}'"
                )))
            }
            Some(other) => other.to_string(),
        };
        if name.is_empty() || name.contains('/') {
            return Err(TankError::InvalidArgument(format!("invalid node name '{name}'")));
        }
        Ok(name)
    }

    async fn children(&self, path: &str) -> Result<Vec<Child>, TankError> {
        let names = match self.client.get_children(path).await {
            Ok(names) => names,
            Err(NodeError::NoNode(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let data = match self.client.get_data(&format!("{path}/{name}")).await {
                Ok(data) => data,
                // Deleted between listing and reading.
                Err(NodeError::NoNode(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let doc = if data.is_empty() {
                Document::new()
            } else {
                serde_json::from_slice(&data)?
            };
            out.push(Child { name, doc });
        }
        Ok(out)
    }

    async fn matching(&self, path: &str) -> Result<Vec<Child>, TankError> {
        let cond = self.spec.condition();
        Ok(self
            .children(path)
            .await?
            .into_iter()
            .filter(|child| cond.matches(&child.doc))
            .collect())
    }

    async fn merge(&self, doc: Document, multi: bool, upsert: bool) -> Result<TankResult, TankError> {
        let path = self.resource_path()?;
        let mut info = ChangeInfo::default();
        let mut targets = self.matching(&path).await?;
        if !multi {
            targets.truncate(1);
        }

        if targets.is_empty() {
            if upsert {
                let name = self.child_name(&doc)?;
                self.client
                    .create(&format!("{path}/{name}"), serde_json::to_vec(&doc)?)
                    .await?;
                info.upserted_id = Some(name);
            }
            return Ok(TankResult::changed(info));
        }

        for mut child in targets {
            info.matched += 1;
            let mut changed = false;
            for (key, value) in &doc {
                if child.doc.get(key) != Some(value) {
                    child.doc.insert(key.clone(), value.clone());
                    changed = true;
                }
            }
            if changed {
                self.client
                    .set_data(&format!("{path}/{}", child.name), serde_json::to_vec(&child.doc)?)
                    .await?;
                info.updated += 1;
            }
        }
        Ok(TankResult::changed(info))
    }

    async fn delete(&self, multi: bool) -> Result<TankResult, TankError> {
        let path = self.resource_path()?;
        let mut targets = self.matching(&path).await?;
        if !multi {
            targets.truncate(1);
        }
        let mut info = ChangeInfo::default();
        for child in targets {
            match self.client.delete(&format!("{path}/{}", child.name)).await {
                Ok(()) => info.removed += 1,
                Err(NodeError::NoNode(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        info.matched = info.removed;
        Ok(TankResult::changed(info))
    }

    async fn names(&self, path: &str) -> Result<TankResult, TankError> {
        self.spec.check()?;
        let names = match self.client.get_children(path).await {
            Ok(names) => names,
            Err(NodeError::NoNode(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(TankResult::new(TankValue::Names(names)))
    }
}

#[async_trait]
impl Tank for HierarchyTank {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn spec(&self) -> &TankSpec {
        &self.spec
    }

    fn with_spec(&self, spec: TankSpec) -> Box<dyn Tank> {
        Box::new(HierarchyTank::new(self.client.clone(), self.config.clone(), spec))
    }

    #[instrument(skip(self), fields(ns = %self.spec.namespace()))]
    async fn query(&self) -> Result<TankResult, TankError> {
        let path = self.resource_path()?;
        let children = self.matching(&path).await?;

        if let Some(key) = self.spec.distinct_key() {
            let mut seen = BTreeSet::new();
            let values = children
                .iter()
                .filter_map(|child| child.doc.get(key))
                .filter(|value| seen.insert(value.to_string()))
                .cloned()
                .collect();
            return Ok(TankResult::new(TankValue::Values(values)));
        }

        if children.is_empty() {
            return Ok(TankResult::documents(Vec::new()));
        }
        let fused: Document = children
            .into_iter()
            .map(|child| (child.name, Value::Object(child.doc)))
            .collect();
        debug!(path = %path, children = fused.len(), "Fused children");
        Ok(TankResult::documents(vec![fused]))
    }

    async fn count(&self) -> Result<TankResult, TankError> {
        let path = self.resource_path()?;
        let any = !self.matching(&path).await?.is_empty();
        Ok(TankResult::count(u64::from(any)))
    }

    #[instrument(skip(self, docs), fields(ns = %self.spec.namespace(), docs = docs.len()))]
    async fn insert(&self, docs: Vec<Document>) -> Result<TankResult, TankError> {
        let path = self.resource_path()?;
        let mut info = ChangeInfo::default();
        for doc in docs {
            let name = self.child_name(&doc)?;
            self.client
                .create(&format!("{path}/{name}"), serde_json::to_vec(&doc)?)
                .await?;
            info.inserted += 1;
        }
        Ok(TankResult::changed(info))
    }

    async fn upsert(&self, doc: Document) -> Result<TankResult, TankError> {
        self.merge(doc, false, true).await
    }

    async fn update(&self, doc: Document) -> Result<TankResult, TankError> {
        self.merge(doc, false, false).await
    }

    async fn update_all(&self, doc: Document) -> Result<TankResult, TankError> {
        self.merge(doc, true, false).await
    }

    async fn remove(&self) -> Result<TankResult, TankError> {
        self.delete(false).await
    }

    async fn remove_all(&self) -> Result<TankResult, TankError> {
        self.delete(true).await
    }

    async fn tables(&self) -> Result<TankResult, TankError> {
        self.names(&self.database_path()).await
    }

    async fn databases(&self) -> Result<TankResult, TankError> {
        self.names(&self.root_path()).await
    }

    async fn watch(&self, _opts: &WatchOptions) -> Result<Subscription, TankError> {
        Err(TankError::unsupported(BACKEND, "watch"))
    }

    async fn close(&self) -> Result<(), TankError> {
        self.client.close().await?;
        Ok(())
    }
}
