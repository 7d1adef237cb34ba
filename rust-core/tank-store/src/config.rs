// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Store configuration, with environment overrides.

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENV_DATABASE: &str = "TANK_DATABASE";
pub const ENV_SOFT_DELETE: &str = "TANK_SOFT_DELETE";
pub const ENV_DELETED_KEY: &str = "TANK_DELETED_KEY";
pub const ENV_PAGE_SIZE: &str = "TANK_PAGE_SIZE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database to use; empty keeps the driver's default.
    pub database: String,
    /// Mark documents deleted instead of removing them.
    pub soft_delete: bool,
    /// Flag field used by soft deletion.
    pub deleted_key: String,
    /// Page size applied by `get` when the caller sets no limit.
    pub default_page_size: u64,
    /// Events buffered between a watch pump and its consumer.
    pub watch_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            soft_delete: false,
            deleted_key: "deleted".to_string(),
            default_page_size: 3000,
            watch_buffer: 256,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `TANK_*` environment variables. Unparsable
    /// values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(database) = lookup(ENV_DATABASE) {
            config.database = database.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_SOFT_DELETE) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.soft_delete = true,
                "0" | "false" | "no" | "off" | "" => config.soft_delete = false,
                _ => warn!(var = ENV_SOFT_DELETE, value = %raw, "Invalid boolean; ignoring"),
            }
        }
        if let Some(key) = lookup(ENV_DELETED_KEY) {
            let key = key.trim();
            if key.is_empty() {
                warn!(var = ENV_DELETED_KEY, "Empty deleted key; ignoring");
            } else {
                config.deleted_key = key.to_string();
            }
        }
        if let Some(raw) = lookup(ENV_PAGE_SIZE) {
            match raw.trim().parse::<u64>() {
                Ok(size) if size > 0 => config.default_page_size = size,
                _ => warn!(var = ENV_PAGE_SIZE, value = %raw, "Invalid page size; ignoring"),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> StoreConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StoreConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.default_page_size, 3000);
        assert_eq!(config.deleted_key, "deleted");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (ENV_DATABASE, "cluster"),
            (ENV_SOFT_DELETE, "true"),
            (ENV_DELETED_KEY, "gone"),
            (ENV_PAGE_SIZE, "50"),
        ]);
        assert_eq!(config.database, "cluster");
        assert!(config.soft_delete);
        assert_eq!(config.deleted_key, "gone");
        assert_eq!(config.default_page_size, 50);
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let config = config_from(&[(ENV_SOFT_DELETE, "maybe"), (ENV_PAGE_SIZE, "-3")]);
        assert!(!config.soft_delete);
        assert_eq!(config.default_page_size, 3000);
    }
}
