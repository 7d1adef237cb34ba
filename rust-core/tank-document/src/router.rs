// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Watch router: fans change records out to per-namespace subscribers.
//
// Topics are created on first subscription and dropped with their last
// subscriber. Each topic guards its own subscriber list, so fan-out on one
// namespace never blocks fan-out on another. Publishing never waits: a subscriber
// whose queue is full or whose receiver is gone is dropped from the list,
// which closes its channel and ends that watch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use tank_core::{ChangeRecord, Namespace, Subscription};

type Sender = mpsc::Sender<Arc<ChangeRecord>>;

// ---------------------------------------------------------------------------
// SubscriberList
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Node {
    prev: Option<u64>,
    next: Option<u64>,
    tx: Sender,
}

/// Arena-backed doubly-linked list of subscribers.
///
/// Nodes live in a map keyed by subscription id, so removal by id is O(1)
/// while iteration keeps subscription order.
#[derive(Debug, Default)]
struct SubscriberList {
    nodes: HashMap<u64, Node>,
    head: Option<u64>,
    tail: Option<u64>,
}

impl SubscriberList {
    fn push_back(&mut self, id: u64, tx: Sender) {
        let node = Node {
            prev: self.tail,
            next: None,
            tx,
        };
        match self.tail.and_then(|tail| self.nodes.get_mut(&tail)) {
            Some(tail) => tail.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.nodes.insert(id, node);
    }

    fn remove(&mut self, id: u64) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };
        match node.prev.and_then(|prev| self.nodes.get_mut(&prev)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|next| self.nodes.get_mut(&next)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }
        true
    }

    fn iter(&self) -> impl Iterator<Item = (u64, &Sender)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let id = cursor?;
            let node = self.nodes.get(&id)?;
            cursor = node.next;
            Some((id, &node.tx))
        })
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.tail = None;
    }
}

// ---------------------------------------------------------------------------
// WatchRouter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Topic {
    subscribers: RwLock<SubscriberList>,
}

type Topics = RwLock<HashMap<Namespace, Arc<Topic>>>;

/// Remove `ids` from the topic of `ns`, dropping the topic once it has no
/// subscribers left. Returns how many were removed.
///
/// Lock order is map, then topic; `subscribe` takes them the same way, so
/// a topic is never emptied and dropped while a new subscriber joins it.
fn remove_subscribers(topics: &Topics, ns: &Namespace, ids: &[u64]) -> usize {
    let mut map = topics.write().unwrap_or_else(PoisonError::into_inner);
    let Some(topic) = map.get(ns) else {
        return 0;
    };
    let mut subscribers = topic.subscribers.write().unwrap_or_else(PoisonError::into_inner);
    let removed = ids.iter().filter(|id| subscribers.remove(**id)).count();
    let empty = subscribers.len() == 0;
    drop(subscribers);
    if empty {
        map.remove(ns);
        debug!(ns = %ns, "Dropped idle topic");
    }
    removed
}

/// Namespace-keyed fan-out of [`ChangeRecord`]s.
#[derive(Debug, Default)]
pub struct WatchRouter {
    topics: Arc<Topics>,
    next_id: AtomicU64,
}

impl WatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, ns: &Namespace) -> Option<Arc<Topic>> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ns)
            .cloned()
    }

    /// Register a subscriber with a queue of `capacity` records.
    pub fn subscribe(&self, ns: &Namespace, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut map = self.topics.write().unwrap_or_else(PoisonError::into_inner);
            map.entry(ns.clone())
                .or_default()
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(id, tx);
        }
        debug!(ns = %ns, subscriber = id, "Subscribed");

        let weak: Weak<Topics> = Arc::downgrade(&self.topics);
        let ns = ns.clone();
        Subscription::new(rx, move || {
            if let Some(topics) = weak.upgrade() {
                if remove_subscribers(&topics, &ns, &[id]) > 0 {
                    debug!(ns = %ns, subscriber = id, "Unsubscribed");
                }
            }
        })
    }

    /// Deliver `record` to every subscriber of its namespace. Returns the
    /// number of subscribers that received it.
    pub fn publish(&self, record: ChangeRecord) -> usize {
        let Some(topic) = self.topic(&record.namespace) else {
            return 0;
        };
        let record = Arc::new(record);
        let mut delivered = 0;
        let mut dropped = Vec::new();
        {
            let subscribers = topic.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in subscribers.iter() {
                match tx.try_send(record.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(ns = %record.namespace, subscriber = id, "Subscriber lagged; dropping");
                        dropped.push(id);
                    }
                    Err(TrySendError::Closed(_)) => dropped.push(id),
                }
            }
        }
        if !dropped.is_empty() {
            remove_subscribers(&self.topics, &record.namespace, &dropped);
        }
        delivered
    }

    /// Drop every subscriber of every namespace.
    pub fn close_all(&self) {
        let mut map = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        for (ns, topic) in map.iter() {
            let mut subscribers = topic.subscribers.write().unwrap_or_else(PoisonError::into_inner);
            if !subscribers.nodes.is_empty() {
                debug!(ns = %ns, closed = subscribers.len(), "Closing subscribers");
            }
            subscribers.clear();
        }
        map.clear();
    }

    pub fn subscriber_count(&self, ns: &Namespace) -> usize {
        self.topic(ns)
            .map(|topic| {
                topic
                    .subscribers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .unwrap_or(0)
    }

    /// Namespaces with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
