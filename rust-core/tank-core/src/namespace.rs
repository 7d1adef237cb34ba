// SPDX-License-Identifier: PMPL-1.0-or-later
//
// `database.resource` pair identifying one collection and one change-feed
// topic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `database.resource` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    pub resource: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            resource: resource.into(),
        }
    }

    /// Split `db.resource` at the first dot. Resource names may contain dots.
    pub fn parse(full: &str) -> Option<Self> {
        let (database, resource) = full.split_once('.')?;
        if database.is_empty() || resource.is_empty() {
            return None;
        }
        Some(Self::new(database, resource))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let ns = Namespace::new("platform", "nodes.v1");
        assert_eq!(ns.to_string(), "platform.nodes.v1");
        assert_eq!(Namespace::parse("platform.nodes.v1"), Some(ns));
        assert_eq!(Namespace::parse("nodots"), None);
        assert_eq!(Namespace::parse(".x"), None);
    }
}
