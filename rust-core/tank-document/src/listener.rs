// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operation-log listener.
//
// One background task per backend connection tails the operation log,
// classifies each entry into a `ChangeRecord` and publishes it to the watch
// router. Every backend failure is treated as transient: the task logs a
// warning, sleeps a fixed backoff and retries from the last position it
// processed. Shutdown closes every router subscriber so open watches end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use tank_core::{ChangeKind, ChangeRecord, Document, TankError};

use crate::client::{DocumentClient, OplogEntry, OplogOp, ID_FIELD};
use crate::escape::{unescape_document, unescape_key};
use crate::router::WatchRouter;

/// Listener tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Unique listener name, normally the driver's configuration name.
    pub name: String,
    /// Pause between retries after a failed log read.
    pub retry_backoff: Duration,
    /// Maximum entries fetched per log read.
    pub batch_size: usize,
    /// How long one log read waits for new entries.
    pub poll_wait: Duration,
    /// Queue capacity of each watch subscriber.
    pub subscriber_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            retry_backoff: Duration::from_secs(1),
            batch_size: 256,
            poll_wait: Duration::from_millis(500),
            subscriber_capacity: 1024,
        }
    }
}

impl ListenerConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// OplogListener
// ---------------------------------------------------------------------------

/// Handle to a running listener task.
pub struct OplogListener {
    name: String,
    shutdown: watch::Sender<bool>,
    ready: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OplogListener {
    /// Spawn the tailing task.
    pub fn spawn(
        config: ListenerConfig,
        client: Arc<dyn DocumentClient>,
        router: Arc<WatchRouter>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready) = watch::channel(false);
        let name = config.name.clone();
        let task = tokio::spawn(run(config, client, router, shutdown_rx, ready_tx));
        Self {
            name,
            shutdown,
            ready,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the starting log position has been read.
    pub async fn wait_ready(&self) -> Result<(), TankError> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| TankError::Closed)
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(listener = %self.name, error = %e, "Listener task ended abnormally");
            }
        }
    }
}

impl Drop for OplogListener {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Sleep for `backoff`; true when shutdown was requested meanwhile.
async fn stopped(shutdown: &mut watch::Receiver<bool>, backoff: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(backoff) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn run(
    config: ListenerConfig,
    client: Arc<dyn DocumentClient>,
    router: Arc<WatchRouter>,
    mut shutdown: watch::Receiver<bool>,
    ready: watch::Sender<bool>,
) {
    let name = config.name.as_str();

    let mut position = loop {
        match client.oplog_latest().await {
            Ok(position) => break position,
            Err(e) => {
                warn!(listener = %name, error = %e, "Failed to read oplog position; retrying");
                if stopped(&mut shutdown, config.retry_backoff).await {
                    router.close_all();
                    return;
                }
            }
        }
    };
    let _ = ready.send(true);
    info!(listener = %name, position, "Oplog listener started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let batch = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            batch = client.oplog_after(position, config.batch_size, config.poll_wait) => batch,
        };

        match batch {
            Ok(entries) => {
                for entry in entries {
                    position = entry.position;
                    if let Some(record) = classify(client.as_ref(), entry).await {
                        let delivered = router.publish(record);
                        trace!(listener = %name, position, delivered, "Published change");
                    }
                }
            }
            Err(e) => {
                warn!(listener = %name, position, error = %e, "Oplog read failed; retrying");
                if stopped(&mut shutdown, config.retry_backoff).await {
                    break;
                }
            }
        }
    }

    router.close_all();
    info!(listener = %name, position, "Oplog listener stopped");
}

/// Turn one log entry into a routable change, or `None` when it carries
/// nothing a watcher cares about.
async fn classify(client: &dyn DocumentClient, entry: OplogEntry) -> Option<ChangeRecord> {
    let kind = match entry.op {
        OplogOp::Insert => ChangeKind::Insert,
        OplogOp::Update => ChangeKind::Update,
        OplogOp::Delete => ChangeKind::Delete,
        OplogOp::Command | OplogOp::Noop => {
            trace!(position = entry.position, op = ?entry.op, "Skipping administrative entry");
            return None;
        }
    };
    let Some(id) = entry.id else {
        debug!(position = entry.position, "Skipping entry without a document id");
        return None;
    };

    let document = match kind {
        ChangeKind::Insert => entry.document.as_ref().map(unescape_document),
        // The log only carries the changed fields; watchers need the full
        // current document.
        ChangeKind::Update => match client.find_by_id(&entry.ns, &id).await {
            Ok(Some(doc)) => Some(unescape_document(&doc)),
            Ok(None) => {
                debug!(ns = %entry.ns, id = %id, "Updated document is gone; dropping change");
                return None;
            }
            Err(e) => {
                warn!(ns = %entry.ns, id = %id, error = %e, "Point lookup failed; dropping change");
                return None;
            }
        },
        ChangeKind::Delete => {
            let mut doc = Document::new();
            doc.insert(ID_FIELD.to_string(), serde_json::Value::String(id.clone()));
            Some(doc)
        }
    };

    Some(ChangeRecord {
        namespace: entry.ns,
        id,
        kind,
        document,
        updated_fields: unescape_document(&entry.updated_fields),
        removed_fields: entry
            .removed_fields
            .iter()
            .map(|field| unescape_key(field).into_owned())
            .collect(),
    })
}

// ---------------------------------------------------------------------------
// ListenerRegistry
// ---------------------------------------------------------------------------

/// Running listeners by name. A name can only be started once.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Arc<OplogListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &self,
        config: ListenerConfig,
        client: Arc<dyn DocumentClient>,
        router: Arc<WatchRouter>,
    ) -> Result<Arc<OplogListener>, TankError> {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if listeners.contains_key(&config.name) {
            return Err(TankError::Config(format!(
                "duplicate listener '{}'",
                config.name
            )));
        }
        let name = config.name.clone();
        let listener = Arc::new(OplogListener::spawn(config, client, router));
        listeners.insert(name, listener.clone());
        Ok(listener)
    }

    pub fn get(&self, name: &str) -> Option<Arc<OplogListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Shut a listener down and free its name.
    pub async fn stop(&self, name: &str) -> bool {
        let listener = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match listener {
            Some(listener) => {
                listener.shutdown().await;
                true
            }
            None => false,
        }
    }
}
