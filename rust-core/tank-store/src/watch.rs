// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Store-level watch: turns raw change records into delivered events.
//
// A pump task per watch drains the tank subscription, applies the
// condition, diff, self-only and soft-delete rules, and forwards events to
// a bounded channel. The pump always sends exactly one Break before it
// drops the sender, unless the consumer is already gone.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use tank_condition::Condition;
use tank_core::{ChangeKind, ChangeRecord, Document, Event, EventType, Subscription, ID_FIELD};

use crate::options::WatchOption;

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Per-watch translation state.
pub(crate) struct WatchFilter {
    cond: Condition,
    self_only: bool,
    must_diff: String,
    /// Flag field, when soft deletion is enabled.
    deleted_key: Option<String>,
    /// Identifiers currently matching `cond`; `None` when every document
    /// matches.
    known: Option<HashSet<String>>,
}

impl WatchFilter {
    pub(crate) fn new(opt: &WatchOption, deleted_key: Option<String>) -> Self {
        let known = (!opt.cond.is_true()).then(HashSet::new);
        Self {
            cond: opt.cond.clone(),
            self_only: opt.self_only,
            must_diff: opt.must_diff.clone(),
            deleted_key,
            known,
        }
    }

    /// Record identifiers that matched before the subscription started.
    pub(crate) fn seed(&mut self, ids: impl IntoIterator<Item = String>) {
        if let Some(known) = self.known.as_mut() {
            known.extend(ids);
        }
    }

    pub(crate) fn tracks_ids(&self) -> bool {
        self.known.is_some()
    }

    /// The event to deliver for `record`, if any.
    pub(crate) fn translate(&mut self, record: &ChangeRecord) -> Option<Event> {
        match record.kind {
            ChangeKind::Insert => self.inserted(record),
            ChangeKind::Update => self.updated(record),
            ChangeKind::Delete => self.deleted(record),
        }
    }

    fn inserted(&mut self, record: &ChangeRecord) -> Option<Event> {
        let doc = record.document.as_ref()?;
        if self.is_flagged(doc) || !self.cond.matches(doc) {
            return None;
        }
        self.remember(&record.id);
        if self.self_only {
            return None;
        }
        Some(Event::new(EventType::Add, self.strip(doc)))
    }

    fn updated(&mut self, record: &ChangeRecord) -> Option<Event> {
        let doc = record.document.as_ref()?;

        if let Some(key) = self.deleted_key.as_deref() {
            if record.sets(key, &Value::Bool(true)) {
                let was_known = self.forget(&record.id);
                if !was_known && !self.cond.matches(doc) {
                    return None;
                }
                return Some(Event::new(EventType::Delete, self.strip(doc)));
            }
            if record.sets(key, &Value::Bool(false)) {
                if !self.cond.matches(doc) {
                    return None;
                }
                self.remember(&record.id);
                if self.self_only {
                    return None;
                }
                return Some(Event::new(EventType::Add, self.strip(doc)));
            }
            if self.is_flagged(doc) {
                trace!(id = %record.id, "Update on a deleted document; suppressed");
                return None;
            }
        }

        if !self.cond.matches(doc) {
            self.forget(&record.id);
            return None;
        }
        self.remember(&record.id);

        if !self.must_diff.is_empty() && !record.touches(&self.must_diff) {
            trace!(id = %record.id, path = %self.must_diff, "Update does not touch watched path");
            return None;
        }
        let event_type = if self.self_only {
            EventType::SelfChange
        } else {
            EventType::Change
        };
        Some(Event::new(event_type, self.strip(doc)))
    }

    fn deleted(&mut self, record: &ChangeRecord) -> Option<Event> {
        if self.known.is_some() && !self.forget(&record.id) {
            return None;
        }
        let doc = match &record.document {
            Some(doc) => doc.clone(),
            None => {
                let mut doc = Document::new();
                doc.insert(ID_FIELD.to_string(), Value::String(record.id.clone()));
                doc
            }
        };
        Some(Event::new(EventType::Delete, doc))
    }

    fn is_flagged(&self, doc: &Document) -> bool {
        self.deleted_key
            .as_deref()
            .is_some_and(|key| doc.get(key) == Some(&Value::Bool(true)))
    }

    fn strip(&self, doc: &Document) -> Document {
        let mut doc = doc.clone();
        if let Some(key) = self.deleted_key.as_deref() {
            doc.remove(key);
        }
        doc
    }

    fn remember(&mut self, id: &str) {
        if let Some(known) = self.known.as_mut() {
            known.insert(id.to_string());
        }
    }

    /// Drop `id` from the known set; whether it was there.
    fn forget(&mut self, id: &str) -> bool {
        self.known.as_mut().is_some_and(|known| known.remove(id))
    }
}

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

/// Limits of one watch.
pub(crate) struct PumpLimits {
    pub max_events: u64,
    pub deadline: Option<Instant>,
}

pub(crate) fn spawn_pump(
    resource: String,
    mut subscription: Subscription,
    mut filter: WatchFilter,
    limits: PumpLimits,
    tx: mpsc::Sender<Event>,
) {
    tokio::spawn(async move {
        let mut delivered = 0u64;
        loop {
            let record: Arc<ChangeRecord> = tokio::select! {
                _ = tx.closed() => {
                    debug!(resource = %resource, delivered, "Watch consumer gone");
                    return;
                }
                _ = wait_deadline(limits.deadline) => {
                    debug!(resource = %resource, delivered, "Watch timed out");
                    break;
                }
                record = subscription.recv() => match record {
                    Some(record) => record,
                    None => {
                        debug!(resource = %resource, delivered, "Change feed closed");
                        break;
                    }
                },
            };
            let Some(event) = filter.translate(&record) else {
                continue;
            };
            match send_before(&tx, event, limits.deadline).await {
                Sent::Delivered => {}
                Sent::Closed => return,
                Sent::TimedOut => {
                    debug!(resource = %resource, delivered, "Watch timed out on a full queue");
                    break;
                }
            }
            delivered += 1;
            if limits.max_events > 0 && delivered >= limits.max_events {
                debug!(resource = %resource, delivered, "Watch reached max events");
                break;
            }
        }
        subscription.cancel();
        // A consumer that stopped reading past the deadline gets a closed
        // channel instead of the Break.
        let _ = send_before(&tx, Event::brk(), limits.deadline).await;
    });
}

enum Sent {
    Delivered,
    Closed,
    TimedOut,
}

/// Queue `event`, giving up once `deadline` passes. Free capacity wins
/// over an elapsed deadline.
async fn send_before(tx: &mpsc::Sender<Event>, event: Event, deadline: Option<Instant>) -> Sent {
    tokio::select! {
        biased;
        sent = tx.send(event) => match sent {
            Ok(()) => Sent::Delivered,
            Err(_) => Sent::Closed,
        },
        _ = wait_deadline(deadline) => Sent::TimedOut,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
