// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Compiled-regex cache keyed by source pattern.
//
// Lookups take the read lock; a miss rechecks under the write lock before
// compiling, so concurrent callers never compile the same pattern twice.

use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

use regex::Regex;
use tracing::debug;

static GLOBAL: LazyLock<RegexCache> = LazyLock::new(RegexCache::new);

/// A thread-safe pattern → `Regex` cache.
#[derive(Debug, Default)]
pub struct RegexCache {
    patterns: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache shared by the selector parser and the
    /// in-memory document backend.
    pub fn global() -> &'static RegexCache {
        &GLOBAL
    }

    /// Return the compiled form of `pattern`, compiling it on first use.
    pub fn get(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let patterns = self.patterns.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(compiled) = patterns.get(pattern) {
                return Ok(compiled.clone());
            }
        }

        let mut patterns = self.patterns.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(compiled) = patterns.get(pattern) {
            return Ok(compiled.clone());
        }
        let compiled = Regex::new(pattern)?;
        patterns.insert(pattern.to_string(), compiled.clone());
        debug!(pattern, cached = patterns.len(), "Compiled regex");
        Ok(compiled)
    }

    /// Number of cached patterns.
    pub fn len(&self) -> usize {
        self.patterns.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiles_once() {
        let cache = RegexCache::new();
        assert!(cache.is_empty());

        let first = cache.get("^a+$").unwrap();
        let second = cache.get("^a+$").unwrap();
        assert!(first.is_match("aaa"));
        assert_eq!(first.as_str(), second.as_str());
        assert_eq!(cache.len(), 1);

        cache.get("b").unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalid_pattern_not_cached() {
        let cache = RegexCache::new();
        assert!(cache.get("(unclosed").is_err());
        assert!(cache.is_empty());
    }
}
