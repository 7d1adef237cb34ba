// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for key escaping and filter translation

use proptest::prelude::*;
use serde_json::{json, Value};
use tank_condition::Condition;
use tank_core::Document;
use tank_document::escape::{DOLLAR_SUBSTITUTE, DOT_SUBSTITUTE};
use tank_document::memory::filter_matches;
use tank_document::{escape_document, escape_key, to_native, unescape_document, unescape_key};

/// Keys built from plain characters and the reserved ones
fn arb_key() -> impl Strategy<Value = String> {
    "[a-c.$]{1,6}"
}

/// Small scalar values
fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..4).prop_map(|n| json!(n)),
        "[xy]{1,2}".prop_map(Value::String),
        any::<bool>().prop_map(Value::Bool),
    ]
}

/// Documents with one level of nesting
fn arb_document() -> impl Strategy<Value = Document> {
    let leaf = prop::collection::btree_map(arb_key(), arb_scalar(), 0..3)
        .prop_map(|m| Value::Object(m.into_iter().collect()));
    prop::collection::btree_map(arb_key(), prop_oneof![arb_scalar(), leaf], 0..4)
        .prop_map(|m| m.into_iter().collect())
}

/// Flat conditions over plain field names
fn arb_condition() -> impl Strategy<Value = Condition> {
    let field = "[a-c]";
    prop::collection::vec((field, arb_scalar(), 0u8..5), 1..4).prop_map(|links| {
        links
            .into_iter()
            .fold(Condition::truth(), |cond, (key, value, op)| match op {
                0 => cond.eq(&key, value),
                1 => cond.ne(&key, value),
                2 => cond.lt(&key, value),
                3 => cond.gte(&key, value),
                _ => cond.exists(&key, value.as_bool().unwrap_or(true)),
            })
    })
}

fn plain_document() -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-c]", arb_scalar(), 0..3).prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn test_key_round_trip(key in arb_key()) {
        let escaped = escape_key(&key);
        prop_assert!(!escaped.contains('.'));
        prop_assert!(!escaped.contains('$'));
        prop_assert_eq!(unescape_key(&escaped), key.as_str());
    }

    #[test]
    fn test_document_round_trip(doc in arb_document()) {
        let escaped = escape_document(&doc);
        for key in escaped.keys() {
            prop_assert!(!key.contains(['.', '$']));
        }
        prop_assert_eq!(unescape_document(&escaped), doc);
    }

    #[test]
    fn test_substitute_keys_pass_through(prefix in "[a-c]{0,3}") {
        for sub in [DOT_SUBSTITUTE, DOLLAR_SUBSTITUTE] {
            let key = format!("{prefix}{sub}.x");
            prop_assert_eq!(escape_key(&key), key.as_str());
        }
    }

    #[test]
    fn test_native_filter_agrees_with_evaluation(cond in arb_condition(), doc in plain_document()) {
        let native = to_native(&cond);
        prop_assert_eq!(filter_matches(&doc, &native).unwrap(), cond.matches(&doc));
    }
}
