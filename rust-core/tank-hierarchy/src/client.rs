// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Connection surface of a hierarchical coordination store, plus an
// in-process node tree implementing it.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tank_core::TankError;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("no node at {0}")]
    NoNode(String),

    #[error("node already exists at {0}")]
    NodeExists(String),

    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error("session closed")]
    Closed,
}

impl From<NodeError> for TankError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::NoNode(path) => TankError::NotFound(path),
            NodeError::NodeExists(path) => TankError::DuplicateKey(path),
            NodeError::InvalidPath(path) => TankError::InvalidArgument(format!("invalid path '{path}'")),
            NodeError::Closed => TankError::Closed,
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;

#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn exists(&self, path: &str) -> NodeResult<bool>;

    async fn get_data(&self, path: &str) -> NodeResult<Vec<u8>>;

    /// Child names (not full paths), sorted.
    async fn get_children(&self, path: &str) -> NodeResult<Vec<String>>;

    /// Create a node, creating missing parents with empty data.
    async fn create(&self, path: &str, data: Vec<u8>) -> NodeResult<()>;

    async fn set_data(&self, path: &str, data: Vec<u8>) -> NodeResult<()>;

    /// Delete a node and everything below it.
    async fn delete(&self, path: &str) -> NodeResult<()>;

    async fn close(&self) -> NodeResult<()>;
}

/// Check an absolute `/a/b` path.
pub fn validate_path(path: &str) -> NodeResult<()> {
    let valid = path == "/"
        || (path.starts_with('/')
            && !path.ends_with('/')
            && path[1..].split('/').all(|segment| !segment.is_empty()));
    if valid {
        Ok(())
    } else {
        Err(NodeError::InvalidPath(path.to_string()))
    }
}

fn parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

/// In-process node tree keyed by absolute path.
#[derive(Debug)]
pub struct InMemoryNodeTree {
    nodes: RwLock<BTreeMap<String, Vec<u8>>>,
    closed: AtomicBool,
}

impl Default for InMemoryNodeTree {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Vec::new());
        Self {
            nodes: RwLock::new(nodes),
            closed: AtomicBool::new(false),
        }
    }
}

impl InMemoryNodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, path: &str) -> NodeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NodeError::Closed);
        }
        validate_path(path)
    }
}

/// Paths strictly below `path`, in order.
fn descendants<'a>(
    nodes: &'a BTreeMap<String, Vec<u8>>,
    path: &str,
) -> impl Iterator<Item = &'a String> + 'a {
    let prefix = child_prefix(path);
    nodes
        .range::<String, _>((Bound::Excluded(prefix.clone()), Bound::Unbounded))
        .map(|(key, _)| key)
        .take_while(move |key| key.starts_with(&prefix))
}

#[async_trait]
impl NodeClient for InMemoryNodeTree {
    async fn exists(&self, path: &str) -> NodeResult<bool> {
        self.check(path)?;
        Ok(self.nodes.read().await.contains_key(path))
    }

    async fn get_data(&self, path: &str) -> NodeResult<Vec<u8>> {
        self.check(path)?;
        self.nodes
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| NodeError::NoNode(path.to_string()))
    }

    async fn get_children(&self, path: &str) -> NodeResult<Vec<String>> {
        self.check(path)?;
        let nodes = self.nodes.read().await;
        if !nodes.contains_key(path) {
            return Err(NodeError::NoNode(path.to_string()));
        }
        let prefix = child_prefix(path);
        Ok(descendants(&nodes, path)
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn create(&self, path: &str, data: Vec<u8>) -> NodeResult<()> {
        self.check(path)?;
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(path) {
            return Err(NodeError::NodeExists(path.to_string()));
        }
        let mut ancestor = parent(path);
        while let Some(dir) = ancestor {
            nodes.entry(dir.to_string()).or_default();
            ancestor = parent(dir);
        }
        nodes.insert(path.to_string(), data);
        trace!(path, "Created node");
        Ok(())
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> NodeResult<()> {
        self.check(path)?;
        match self.nodes.write().await.get_mut(path) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(NodeError::NoNode(path.to_string())),
        }
    }

    async fn delete(&self, path: &str) -> NodeResult<()> {
        self.check(path)?;
        if path == "/" {
            return Err(NodeError::InvalidPath(path.to_string()));
        }
        let mut nodes = self.nodes.write().await;
        if nodes.remove(path).is_none() {
            return Err(NodeError::NoNode(path.to_string()));
        }
        let below: Vec<String> = descendants(&nodes, path).cloned().collect();
        for key in below {
            nodes.remove(&key);
        }
        Ok(())
    }

    async fn close(&self) -> NodeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/a/b").is_ok());
        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a/").is_err());
        assert!(validate_path("/a//b").is_err());
    }

    #[tokio::test]
    async fn test_create_makes_parents() {
        let tree = InMemoryNodeTree::new();
        tree.create("/tank/db/nodes/a", b"{}".to_vec()).await.unwrap();
        assert!(tree.exists("/tank/db").await.unwrap());
        assert_eq!(tree.get_children("/tank").await.unwrap(), vec!["db"]);
        assert_eq!(
            tree.create("/tank/db/nodes/a", Vec::new()).await,
            Err(NodeError::NodeExists("/tank/db/nodes/a".to_string()))
        );
    }

    #[tokio::test]
    async fn test_children_are_direct_only() {
        let tree = InMemoryNodeTree::new();
        tree.create("/r/a", Vec::new()).await.unwrap();
        tree.create("/r/a/deep", Vec::new()).await.unwrap();
        tree.create("/r/b", Vec::new()).await.unwrap();
        tree.create("/rx", Vec::new()).await.unwrap();
        assert_eq!(tree.get_children("/r").await.unwrap(), vec!["a", "b"]);
        assert_eq!(tree.get_children("/").await.unwrap(), vec!["r", "rx"]);
    }

    #[tokio::test]
    async fn test_delete_is_recursive() {
        let tree = InMemoryNodeTree::new();
        tree.create("/r/a/b", Vec::new()).await.unwrap();
        tree.create("/r/ab", Vec::new()).await.unwrap();
        tree.delete("/r/a").await.unwrap();
        assert!(!tree.exists("/r/a/b").await.unwrap());
        assert!(tree.exists("/r/ab").await.unwrap());
        assert_eq!(tree.delete("/r/a").await, Err(NodeError::NoNode("/r/a".to_string())));
    }

    #[tokio::test]
    async fn test_closed_session() {
        let tree = InMemoryNodeTree::new();
        tree.close().await.unwrap();
        assert_eq!(tree.exists("/").await, Err(NodeError::Closed));
    }
}
