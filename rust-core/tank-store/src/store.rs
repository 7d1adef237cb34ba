// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Store facade over one driver.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use tank_condition::Condition;
use tank_core::{Document, Driver, DriverRegistry, Event, Tank, ID_FIELD};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::options::{GetOption, PutOption, RemoveOption, WatchOption};
use crate::watch::{spawn_pump, PumpLimits, WatchFilter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Typed access to one driver's resources, adding paging defaults, write
/// timestamps, optional soft deletion and filtered watches.
#[derive(Clone)]
pub struct Store {
    driver: Arc<dyn Driver>,
    config: Arc<StoreConfig>,
}

impl Store {
    /// A store over the driver registered as `driver_name`.
    pub fn new(registry: &DriverRegistry, driver_name: &str, config: StoreConfig) -> StoreResult<Self> {
        let driver = registry.get(driver_name)?;
        Ok(Self::with_driver(driver, config))
    }

    pub fn with_driver(driver: Arc<dyn Driver>, config: StoreConfig) -> Self {
        info!(
            driver = %driver.name(),
            database = %config.database,
            soft_delete = config.soft_delete,
            "Store ready"
        );
        Self {
            driver,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Raw tank over `resource`, without the store's visibility rules.
    pub fn tank(&self, resource: &str) -> Box<dyn Tank> {
        let tank = self.driver.tank();
        let tank = if self.config.database.is_empty() {
            tank
        } else {
            tank.using(&self.config.database)
        };
        tank.from(resource)
    }

    fn visible(&self, cond: &Condition) -> Condition {
        if self.config.soft_delete {
            cond.ne(&self.config.deleted_key, true)
        } else {
            cond.clone()
        }
    }

    fn deleted_key(&self) -> Option<String> {
        self.config
            .soft_delete
            .then(|| self.config.deleted_key.clone())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[instrument(skip(self, opt))]
    pub async fn get(&self, resource: &str, opt: GetOption) -> StoreResult<Vec<Document>> {
        let mut tank = self.tank(resource).filter(&self.visible(&opt.cond));
        if !opt.fields.is_empty() {
            let fields: Vec<&str> = opt.fields.iter().map(String::as_str).collect();
            tank = tank.select(&fields);
        }
        if !opt.sort.is_empty() {
            let keys: Vec<&str> = opt.sort.iter().map(String::as_str).collect();
            tank = tank.order_by(&keys);
        }
        let limit = match (opt.limit, opt.is_all_documents) {
            (0, true) => 0,
            (0, false) => self.config.default_page_size,
            (limit, _) => limit,
        };
        let mut docs = tank.offset(opt.offset).limit(limit).query().await?.into_documents();
        if self.config.soft_delete {
            for doc in &mut docs {
                doc.remove(&self.config.deleted_key);
            }
        }
        debug!(resource, found = docs.len(), "Get");
        Ok(docs)
    }

    #[instrument(skip(self, cond))]
    pub async fn count(&self, resource: &str, cond: &Condition) -> StoreResult<u64> {
        let result = self.tank(resource).filter(&self.visible(cond)).count().await?;
        Ok(result.len())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Create or merge `doc` into the document matching the put condition.
    #[instrument(skip(self, doc, opt))]
    pub async fn put(&self, resource: &str, mut doc: Document, opt: PutOption) -> StoreResult<()> {
        let cond = if opt.cond.is_true() {
            unique_condition(&doc, &opt.unique_key)?
        } else {
            opt.cond.clone()
        };

        let mut tank = self.tank(resource);
        if !opt.unique_key.is_empty() {
            let keys: Vec<&str> = opt.unique_key.iter().map(String::as_str).collect();
            tank = tank.index(&keys);
        }
        let tank = tank.filter(&cond);

        let exists = !tank.count().await?.is_empty();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Some(key) = opt.create_time_key.as_deref() {
            if !exists && !doc.contains_key(key) {
                doc.insert(key.to_string(), Value::String(now.clone()));
            }
        }
        if let Some(key) = opt.update_time_key.as_deref() {
            doc.insert(key.to_string(), Value::String(now));
        }
        if self.config.soft_delete {
            doc.insert(self.config.deleted_key.clone(), Value::Bool(false));
        }

        let result = tank.upsert(doc).await?;
        let info = result.change_info();
        debug!(
            resource,
            existed = exists,
            matched = info.matched,
            upserted = info.upserted_id.is_some(),
            "Put"
        );
        Ok(())
    }

    /// Delete matching documents, or flag them when soft deletion is on.
    #[instrument(skip(self, opt))]
    pub async fn remove(&self, resource: &str, opt: RemoveOption) -> StoreResult<()> {
        let affected = if self.config.soft_delete {
            let mut flag = Document::new();
            flag.insert(self.config.deleted_key.clone(), Value::Bool(true));
            let result = self
                .tank(resource)
                .filter(&self.visible(&opt.cond))
                .update_all(flag)
                .await?;
            result.change_info().matched
        } else {
            let result = self.tank(resource).filter(&opt.cond).remove_all().await?;
            result.change_info().removed
        };
        debug!(resource, affected, soft = self.config.soft_delete, "Remove");
        if affected == 0 && !opt.ignore_not_found {
            return Err(StoreError::NotFound(format!(
                "no document in '{resource}' matches {}",
                opt.cond
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Watch
    // -----------------------------------------------------------------------

    /// Subscribe to changes of `resource`.
    ///
    /// The receiver yields translated events and then exactly one Break,
    /// after which it is closed. Dropping the receiver ends the watch.
    #[instrument(skip(self, opt))]
    pub async fn watch(&self, resource: &str, opt: WatchOption) -> StoreResult<mpsc::Receiver<Event>> {
        let tank = self.tank(resource);
        let subscription = tank.watch(&opt.options()).await?;

        let mut filter = WatchFilter::new(&opt, self.deleted_key());
        if filter.tracks_ids() {
            let docs = tank
                .filter(&self.visible(&opt.cond))
                .limit(0)
                .query()
                .await?
                .into_documents();
            filter.seed(docs.iter().filter_map(|doc| doc.get(ID_FIELD)).map(id_string));
        }

        let limits = PumpLimits {
            max_events: opt.max_events,
            deadline: (!opt.timeout.is_zero())
                .then(|| Instant::now().checked_add(opt.timeout))
                .flatten(),
        };
        let (tx, rx) = mpsc::channel(self.config.watch_buffer.max(1));
        spawn_pump(resource.to_string(), subscription, filter, limits, tx);
        debug!(resource, max_events = opt.max_events, timeout = ?opt.timeout, "Watch started");
        Ok(rx)
    }

    pub async fn close(&self) -> StoreResult<()> {
        self.driver.close().await?;
        Ok(())
    }
}

/// Equality on every unique key, read from `doc`.
fn unique_condition(doc: &Document, keys: &[String]) -> StoreResult<Condition> {
    if keys.is_empty() {
        return Err(StoreError::InvalidArgument(
            "put requires a condition or a unique key".to_string(),
        ));
    }
    keys.iter().try_fold(Condition::truth(), |cond, key| match doc.get(key) {
        Some(value) => Ok(cond.eq(key, value.clone())),
        None => Err(StoreError::InvalidArgument(format!(
            "document is missing unique key '{key}'"
        ))),
    })
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tank_core::{EventType, TankError};
    use tank_document::{DocumentDriver, InMemoryDocumentDb, ListenerConfig, ListenerRegistry};
    use tank_hierarchy::{HierarchyConfig, HierarchyDriver, InMemoryNodeTree};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn document_store(config: StoreConfig) -> (Store, Arc<DocumentDriver>) {
        let db = Arc::new(InMemoryDocumentDb::new());
        let driver = DocumentDriver::connect(
            "cluster",
            db,
            ListenerConfig::named("store-test"),
            Arc::new(ListenerRegistry::new()),
        )
        .unwrap();
        driver.listener().wait_ready().await.unwrap();
        (Store::with_driver(driver.clone(), config), driver)
    }

    fn soft_config() -> StoreConfig {
        StoreConfig {
            soft_delete: true,
            ..StoreConfig::default()
        }
    }

    async fn next(rx: &mut mpsc::Receiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _driver) = document_store(StoreConfig::default()).await;
        let opt = PutOption::unique(&["ip"]).with_times("createTime", "updateTime");
        store
            .put("nodes", doc(json!({"ip": "10.0.0.1", "role": "db"})), opt.clone())
            .await
            .unwrap();
        store
            .put("nodes", doc(json!({"ip": "10.0.0.1", "role": "web"})), opt)
            .await
            .unwrap();

        let docs = store.get("nodes", GetOption::default()).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["role"], json!("web"));
        let created = docs[0]["createTime"].as_str().unwrap();
        let updated = docs[0]["updateTime"].as_str().unwrap();
        assert!(created <= updated);
    }

    #[tokio::test]
    async fn test_put_without_key_or_condition_is_rejected() {
        let (store, _driver) = document_store(StoreConfig::default()).await;
        let err = store
            .put("nodes", doc(json!({"ip": "a"})), PutOption::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        let err = store
            .put("nodes", doc(json!({"role": "db"})), PutOption::unique(&["ip"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_get_paging() {
        let config = StoreConfig {
            default_page_size: 2,
            ..StoreConfig::default()
        };
        let (store, _driver) = document_store(config).await;
        for n in 0..5 {
            store
                .put("items", doc(json!({"n": n})), PutOption::unique(&["n"]))
                .await
                .unwrap();
        }
        assert_eq!(store.get("items", GetOption::default()).await.unwrap().len(), 2);
        let all = GetOption {
            is_all_documents: true,
            sort: vec!["-n".to_string()],
            ..GetOption::default()
        };
        let docs = store.get("items", all).await.unwrap();
        assert_eq!(docs.len(), 5);
        assert_eq!(docs[0]["n"], json!(4));
        let page = GetOption {
            offset: 1,
            limit: 3,
            sort: vec!["n".to_string()],
            fields: vec!["n".to_string()],
            ..GetOption::default()
        };
        let docs = store.get("items", page).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["n"], json!(1));
    }

    #[tokio::test]
    async fn test_remove_hard() {
        let (store, _driver) = document_store(StoreConfig::default()).await;
        store
            .put("nodes", doc(json!({"ip": "a"})), PutOption::unique(&["ip"]))
            .await
            .unwrap();
        let opt = RemoveOption {
            cond: Condition::truth().eq("ip", "a"),
            ignore_not_found: false,
        };
        store.remove("nodes", opt.clone()).await.unwrap();
        assert_eq!(store.count("nodes", &Condition::truth()).await.unwrap(), 0);

        let err = store.remove("nodes", opt.clone()).await.unwrap_err();
        assert!(err.is_not_found());
        store
            .remove(
                "nodes",
                RemoveOption {
                    ignore_not_found: true,
                    ..opt
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_soft_delete_semantics() {
        let (store, _driver) = document_store(soft_config()).await;
        let put = PutOption::unique(&["ip"]);
        store
            .put("nodes", doc(json!({"ip": "a"})), put.clone())
            .await
            .unwrap();
        let docs = store.get("nodes", GetOption::default()).await.unwrap();
        assert!(!docs[0].contains_key("deleted"));

        let cond = Condition::truth().eq("ip", "a");
        store
            .remove(
                "nodes",
                RemoveOption {
                    cond: cond.clone(),
                    ignore_not_found: false,
                },
            )
            .await
            .unwrap();

        assert!(store.get("nodes", GetOption::default()).await.unwrap().is_empty());
        assert_eq!(store.count("nodes", &cond).await.unwrap(), 0);
        let raw = store.tank("nodes").filter(&cond).count().await.unwrap();
        assert_eq!(raw.len(), 1);

        // Removing again finds nothing visible.
        let err = store
            .remove(
                "nodes",
                RemoveOption {
                    cond: cond.clone(),
                    ignore_not_found: false,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        store.put("nodes", doc(json!({"ip": "a"})), put).await.unwrap();
        let docs = store.get("nodes", GetOption::with_cond(cond)).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_watch_max_events_then_break() {
        let (store, _driver) = document_store(StoreConfig::default()).await;
        let mut rx = store
            .watch(
                "nodes",
                WatchOption {
                    max_events: 3,
                    ..WatchOption::default()
                },
            )
            .await
            .unwrap();
        for ip in ["a", "b", "c", "d"] {
            store
                .put("nodes", doc(json!({"ip": ip})), PutOption::unique(&["ip"]))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            assert_eq!(next(&mut rx).await.event_type, EventType::Add);
        }
        assert!(next(&mut rx).await.is_break());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_timeout_breaks() {
        let (store, _driver) = document_store(StoreConfig::default()).await;
        let mut rx = store
            .watch(
                "nodes",
                WatchOption {
                    timeout: Duration::from_millis(50),
                    ..WatchOption::default()
                },
            )
            .await
            .unwrap();
        assert!(next(&mut rx).await.is_break());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_timeout_with_unread_queue() {
        let config = StoreConfig {
            watch_buffer: 1,
            ..StoreConfig::default()
        };
        let (store, driver) = document_store(config).await;
        let mut rx = store
            .watch(
                "nodes",
                WatchOption {
                    timeout: Duration::from_millis(100),
                    ..WatchOption::default()
                },
            )
            .await
            .unwrap();
        for ip in ["a", "b", "c"] {
            store
                .put("nodes", doc(json!({ "ip": ip })), PutOption::unique(&["ip"]))
                .await
                .unwrap();
        }

        // Nobody reads; the watch still ends at its deadline.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let ns = tank_core::Namespace::new("cluster", "nodes");
        assert_eq!(driver.router().subscriber_count(&ns), 0);

        let mut adds = 0;
        while let Some(event) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("watch ended")
        {
            match event.event_type {
                EventType::Add => adds += 1,
                EventType::Break => {}
                other => panic!("unexpected event {other}"),
            }
        }
        assert!(adds <= 1);
    }

    #[tokio::test]
    async fn test_soft_delete_watch_emits_single_delete() {
        let (store, _driver) = document_store(soft_config()).await;
        let mut rx = store.watch("nodes", WatchOption::default()).await.unwrap();
        let put = PutOption::unique(&["ip"]);
        store
            .put("nodes", doc(json!({"ip": "a"})), put.clone())
            .await
            .unwrap();
        store
            .remove(
                "nodes",
                RemoveOption {
                    cond: Condition::truth().eq("ip", "a"),
                    ignore_not_found: false,
                },
            )
            .await
            .unwrap();
        store
            .put("nodes", doc(json!({"ip": "b"})), put)
            .await
            .unwrap();

        let add = next(&mut rx).await;
        assert_eq!(add.event_type, EventType::Add);
        assert!(!add.value.unwrap().contains_key("deleted"));

        let delete = next(&mut rx).await;
        assert_eq!(delete.event_type, EventType::Delete);
        let value = delete.value.unwrap();
        assert_eq!(value["ip"], json!("a"));
        assert!(!value.contains_key("deleted"));

        // No Change for "a" in between.
        let add = next(&mut rx).await;
        assert_eq!(add.event_type, EventType::Add);
        assert_eq!(add.value.unwrap()["ip"], json!("b"));
    }

    #[tokio::test]
    async fn test_watch_with_condition() {
        let (store, _driver) = document_store(StoreConfig::default()).await;
        let put = PutOption::unique(&["ip"]);
        store
            .put("nodes", doc(json!({"ip": "a", "role": "db"})), put.clone())
            .await
            .unwrap();
        let mut rx = store
            .watch(
                "nodes",
                WatchOption {
                    cond: Condition::truth().eq("role", "db"),
                    ..WatchOption::default()
                },
            )
            .await
            .unwrap();
        store
            .put("nodes", doc(json!({"ip": "b", "role": "web"})), put)
            .await
            .unwrap();
        for ip in ["b", "a"] {
            store
                .remove(
                    "nodes",
                    RemoveOption {
                        cond: Condition::truth().eq("ip", ip),
                        ignore_not_found: false,
                    },
                )
                .await
                .unwrap();
        }

        // The listener may still deliver the insert of "a" after the
        // subscription started; nothing about "b" may show up.
        loop {
            let event = next(&mut rx).await;
            let value = event.value.unwrap();
            match event.event_type {
                EventType::Add => assert_eq!(value["ip"], json!("a")),
                EventType::Delete => {
                    assert!(value.get("ip").is_none());
                    break;
                }
                other => panic!("unexpected event {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_nested_field_condition() {
        let (store, _driver) = document_store(StoreConfig::default()).await;
        let put = PutOption::unique(&["ip"]);
        let nested = doc(json!({"ip": "a", "spec": {"zone": "z1"}}));
        store.put("nodes", nested.clone(), put.clone()).await.unwrap();
        store
            .put("nodes", doc(json!({"ip": "b", "spec": {"zone": "z2"}})), put)
            .await
            .unwrap();

        let cond = Condition::truth().eq("spec.zone", "z1");
        assert!(cond.matches(&nested));
        let found = store
            .get("nodes", GetOption::with_cond(cond.clone()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["ip"], json!("a"));
        assert_eq!(store.count("nodes", &cond).await.unwrap(), 1);

        // The seed query must find "a" for its delete to be delivered.
        let mut rx = store
            .watch(
                "nodes",
                WatchOption {
                    cond: cond.clone(),
                    ..WatchOption::default()
                },
            )
            .await
            .unwrap();
        store
            .remove(
                "nodes",
                RemoveOption {
                    cond,
                    ignore_not_found: false,
                },
            )
            .await
            .unwrap();
        loop {
            let event = next(&mut rx).await;
            match event.event_type {
                EventType::Add => {}
                EventType::Delete => break,
                other => panic!("unexpected event {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_dropping_receiver_unsubscribes() {
        let (store, driver) = document_store(StoreConfig::default()).await;
        let rx = store.watch("nodes", WatchOption::default()).await.unwrap();
        let ns = tank_core::Namespace::new("cluster", "nodes");
        assert_eq!(driver.router().subscriber_count(&ns), 1);
        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), async {
            while driver.router().subscriber_count(&ns) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_hierarchy_store() {
        let driver = HierarchyDriver::new(
            "zk",
            "cluster",
            Arc::new(InMemoryNodeTree::new()),
            HierarchyConfig::default(),
        );
        let registry = DriverRegistry::new();
        registry.register(driver).unwrap();
        let store = Store::new(&registry, "zk", StoreConfig::default()).unwrap();

        store
            .put("nodes", doc(json!({"ip": "a", "up": true})), PutOption::unique(&["ip"]))
            .await
            .unwrap();
        assert_eq!(store.count("nodes", &Condition::truth()).await.unwrap(), 1);

        let err = store.watch("nodes", WatchOption::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::Tank(TankError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_unknown_driver() {
        let registry = DriverRegistry::new();
        let err = Store::new(&registry, "missing", StoreConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Tank(TankError::Config(_))));
    }
}
