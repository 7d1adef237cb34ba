// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON value helpers shared by condition evaluation and the in-memory
// backends: dotted-path lookup, partial comparison, and a total sort order.

use std::cmp::Ordering;

use serde_json::Value;

use crate::condition::FieldMap;

/// Resolve `path` inside `doc`.
///
/// A literal key wins over a dotted path, so `"a.b"` first looks for a field
/// named `a.b` and only then descends into `a` → `b`. Numeric segments index
/// into arrays.
pub fn lookup_path<'a>(doc: &'a FieldMap, path: &str) -> Option<&'a Value> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Compare two values of the same JSON kind.
///
/// Returns `None` for mismatched kinds (a number is not "less than" a
/// string), which callers treat as "does not match".
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Equality with numeric normalisation (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn kind_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting query results.
///
/// Missing and null sort first, then numbers, strings, objects, arrays and
/// booleans. Values of the same kind compare naturally; objects and arrays
/// of the same kind are considered equal.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (rank_a, rank_b) = (kind_rank(a), kind_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> FieldMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_lookup_literal_and_nested() {
        let d = doc(json!({"a.b": 1, "a": {"b": 2, "list": [10, 20]}}));
        assert_eq!(lookup_path(&d, "a.b"), Some(&json!(1)));
        assert_eq!(lookup_path(&d, "a.list.1"), Some(&json!(20)));
        assert_eq!(lookup_path(&d, "a.missing"), None);
        assert_eq!(lookup_path(&d, "a.list.9"), None);
    }

    #[test]
    fn test_compare_mismatched_kinds() {
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
        assert_eq!(compare_values(&json!(1), &json!(2.5)), Some(Ordering::Less));
        assert!(values_equal(&json!(3), &json!(3.0)));
    }

    #[test]
    fn test_sort_order_ranks_missing_first() {
        assert_eq!(sort_order(None, Some(&json!(0))), Ordering::Less);
        assert_eq!(sort_order(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(sort_order(Some(&json!(5)), Some(&json!("a"))), Ordering::Less);
    }
}
