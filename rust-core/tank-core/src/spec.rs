// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Immutable builder state of a Tank.
//
// Every setter clones the receiver and replaces one field, so a partially
// built query can be branched safely. Invalid arguments do not fail the
// setter; they are recorded and surface at the first terminal call.

use std::sync::Arc;

use tank_condition::Condition;

use crate::error::TankError;
use crate::namespace::Namespace;

/// One sort key. A `-` prefix in [`SortKey::parse`] means descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(raw.strip_prefix('+').unwrap_or(raw)),
        }
    }
}

/// Accumulated query/mutation configuration.
#[derive(Debug, Clone, Default)]
pub struct TankSpec {
    database: String,
    resource: String,
    offset: u64,
    limit: u64,
    sort: Vec<SortKey>,
    fields: Vec<String>,
    distinct: Option<String>,
    index: Vec<String>,
    filter: Condition,
    error: Option<Arc<str>>,
}

impl TankSpec {
    /// An empty spec bound to `database`.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    fn with(&self, change: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        change(&mut next);
        next
    }

    /// Record a deferred error; the first one wins.
    pub fn with_error(&self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.with(|spec| {
            if spec.error.is_none() {
                spec.error = Some(message.into());
            }
        })
    }

    pub fn using(&self, database: &str) -> Self {
        if database.trim().is_empty() {
            return self.with_error("database name must not be empty");
        }
        self.with(|spec| spec.database = database.to_string())
    }

    pub fn from(&self, resource: &str) -> Self {
        if resource.trim().is_empty() {
            return self.with_error("resource name must not be empty");
        }
        self.with(|spec| spec.resource = resource.to_string())
    }

    /// AND `cond` into the accumulated filter.
    pub fn filter(&self, cond: &Condition) -> Self {
        self.with(|spec| spec.filter = spec.filter.and(cond))
    }

    pub fn order_by(&self, keys: &[&str]) -> Self {
        self.with(|spec| {
            spec.sort = keys
                .iter()
                .filter(|k| !k.is_empty())
                .map(|k| SortKey::parse(k))
                .collect()
        })
    }

    pub fn select(&self, fields: &[&str]) -> Self {
        self.with(|spec| spec.fields = fields.iter().map(|f| f.to_string()).collect())
    }

    pub fn offset(&self, offset: u64) -> Self {
        self.with(|spec| spec.offset = offset)
    }

    /// `0` means unlimited.
    pub fn limit(&self, limit: u64) -> Self {
        self.with(|spec| spec.limit = limit)
    }

    pub fn distinct(&self, key: &str) -> Self {
        if key.is_empty() {
            return self.with_error("distinct key must not be empty");
        }
        self.with(|spec| spec.distinct = Some(key.to_string()))
    }

    /// Declare a unique index to ensure before the next write.
    pub fn index(&self, keys: &[&str]) -> Self {
        if keys.iter().any(|k| k.is_empty()) {
            return self.with_error("index keys must not be empty");
        }
        self.with(|spec| spec.index = keys.iter().map(|k| k.to_string()).collect())
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn get_offset(&self) -> u64 {
        self.offset
    }

    pub fn get_limit(&self) -> u64 {
        self.limit
    }

    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn distinct_key(&self) -> Option<&str> {
        self.distinct.as_deref()
    }

    pub fn index_keys(&self) -> &[String] {
        &self.index
    }

    pub fn condition(&self) -> &Condition {
        &self.filter
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.database.clone(), self.resource.clone())
    }

    /// Surface a deferred builder error.
    pub fn check(&self) -> Result<(), TankError> {
        match &self.error {
            Some(message) => Err(TankError::InvalidArgument(message.to_string())),
            None => Ok(()),
        }
    }

    /// [`TankSpec::check`] plus a bound database and resource.
    pub fn require_resource(&self) -> Result<Namespace, TankError> {
        self.check()?;
        if self.database.is_empty() {
            return Err(TankError::InvalidArgument("no database selected".to_string()));
        }
        if self.resource.is_empty() {
            return Err(TankError::InvalidArgument("no resource selected".to_string()));
        }
        Ok(self.namespace())
    }
}
