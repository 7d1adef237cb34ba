// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Change-feed types.
//
// `ChangeRecord` is what a backend listener publishes for one classified
// operation-log entry. `Event` is what subscribers and remote clients see:
// `{"type": <code>, "value": {...}}`, where a Break (`-1`) ends the feed.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::mpsc;

use crate::namespace::Namespace;
use crate::Document;

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Kind of a delivered change event. Serialized as its integer wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// No-op marker; a server sending it ends the stream normally.
    Nop,
    /// A document appeared.
    Add,
    /// A document disappeared (physically or through the soft-delete flag).
    Delete,
    /// A document changed.
    Change,
    /// The watched document itself changed (self-only subscriptions).
    SelfChange,
    /// Terminal sentinel: nothing follows on this subscription.
    Break,
}

impl EventType {
    /// Wire code: Nop=0, Add=1, Delete=2, Change=3, SelfChange=4, Break=-1.
    pub fn code(self) -> i64 {
        match self {
            EventType::Nop => 0,
            EventType::Add => 1,
            EventType::Delete => 2,
            EventType::Change => 3,
            EventType::SelfChange => 4,
            EventType::Break => -1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(EventType::Nop),
            1 => Some(EventType::Add),
            2 => Some(EventType::Delete),
            3 => Some(EventType::Change),
            4 => Some(EventType::SelfChange),
            -1 => Some(EventType::Break),
            _ => None,
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        EventType::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown event type code {code}")))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Nop => "nop",
            EventType::Add => "add",
            EventType::Delete => "delete",
            EventType::Change => "change",
            EventType::SelfChange => "self-change",
            EventType::Break => "break",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One delivered change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub value: Option<Document>,
}

impl Event {
    pub fn new(event_type: EventType, value: Document) -> Self {
        Self {
            event_type,
            value: Some(value),
        }
    }

    /// The terminal Break event (`{"type": -1, "value": null}`).
    pub fn brk() -> Self {
        Self {
            event_type: EventType::Break,
            value: None,
        }
    }

    pub fn nop() -> Self {
        Self {
            event_type: EventType::Nop,
            value: None,
        }
    }

    pub fn is_break(&self) -> bool {
        self.event_type == EventType::Break
    }
}

// ---------------------------------------------------------------------------
// ChangeRecord
// ---------------------------------------------------------------------------

/// Classification of one operation-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A classified backend change, routed to every subscriber of its namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub namespace: Namespace,
    /// Backend document identifier.
    pub id: String,
    pub kind: ChangeKind,
    /// Current full document; for deletes only the identifier is known.
    pub document: Option<Document>,
    /// Fields set by an update, with their new values.
    pub updated_fields: Document,
    /// Fields removed by an update.
    pub removed_fields: Vec<String>,
}

impl ChangeRecord {
    /// Whether an update touched `path`: the path itself, a field below
    /// it, or a field above it.
    pub fn touches(&self, path: &str) -> bool {
        self.updated_fields
            .keys()
            .chain(self.removed_fields.iter())
            .any(|field| path_overlaps(field, path))
    }

    /// Whether this update set `field` (exactly) to `value`.
    pub fn sets(&self, field: &str, value: &serde_json::Value) -> bool {
        self.updated_fields.get(field) == Some(value)
    }
}

fn path_overlaps(field: &str, path: &str) -> bool {
    fn below(child: &str, parent: &str) -> bool {
        child.len() > parent.len()
            && child.starts_with(parent)
            && child.as_bytes()[parent.len()] == b'.'
    }
    field == path || below(field, path) || below(path, field)
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving half of one change-feed subscription.
///
/// The registration is removed exactly once: on [`Subscription::cancel`] or
/// when the value is dropped. The receiver yields `None` once the feed is
/// closed by the backend side.
pub struct Subscription {
    receiver: mpsc::Receiver<Arc<ChangeRecord>>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        receiver: mpsc::Receiver<Arc<ChangeRecord>>,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Wait for the next record; `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<Arc<ChangeRecord>> {
        self.receiver.recv().await
    }

    /// A record if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<ChangeRecord>> {
        self.receiver.try_recv().ok()
    }

    /// Unregister now instead of on drop.
    pub fn cancel(mut self) {
        self.unregister();
    }

    fn unregister(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.on_cancel.is_some())
            .finish()
    }
}
