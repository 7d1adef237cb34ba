// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tank Condition Expressions
//
// One boolean filter language for every storage backend. Callers build a
// `Condition` with chainable operators; each driver translates it into its
// native predicate form by supplying a `Combiner` to `Condition::combine_with`.
//
// # Modules
//
// - [`condition`] -- The immutable `Condition` chain, `OpType` and `Combiner`.
// - [`selector`] -- Compact `key=value,key+in+a|b` selector grammar.
// - [`regex_cache`] -- Shared compiled-pattern cache.
// - [`value`] -- Dotted-path lookup and JSON value ordering.
//
// # Example
//
// ```rust
// use serde_json::json;
// use tank_condition::Condition;
//
// let ready_workers = Condition::truth().eq("role", "worker").eq("ready", true);
// let doc = json!({"role": "worker", "ready": true});
// assert!(ready_workers.matches(doc.as_object().unwrap()));
// ```

pub mod condition;
pub mod regex_cache;
pub mod selector;
pub mod value;

pub use condition::{Combiner, Condition, FieldMap, OpType};
pub use regex_cache::RegexCache;
pub use selector::{parse_selector, SelectorError};
pub use value::{compare_values, lookup_path, sort_order, values_equal};
