// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Condition → native (Mongo-style) filter translation.

use std::convert::Infallible;

use serde_json::{json, Map, Value};

use tank_condition::{Combiner, Condition, FieldMap, OpType};

use crate::escape::escape_path;

struct NativeFilter;

fn operator(op: OpType) -> Option<&'static str> {
    Some(match op {
        OpType::Ne => "$ne",
        OpType::Lt => "$lt",
        OpType::Lte => "$lte",
        OpType::Gt => "$gt",
        OpType::Gte => "$gte",
        OpType::In => "$in",
        OpType::NotIn => "$nin",
        OpType::Exists => "$exists",
        _ => return None,
    })
}

fn as_list(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        other => Value::Array(vec![other.clone()]),
    }
}

fn is_empty_filter(value: &Value) -> bool {
    value.as_object().is_some_and(Map::is_empty)
}

impl Combiner for NativeFilter {
    type Output = Value;
    type Error = Infallible;

    fn leaf(&mut self, op: OpType, fields: &FieldMap) -> Result<Value, Infallible> {
        let mut out = Map::new();
        for (key, value) in fields {
            let key = escape_path(key).into_owned();
            let rendered = match op {
                OpType::True => continue,
                OpType::Eq => value.clone(),
                OpType::In | OpType::NotIn => {
                    json!({ operator(op).unwrap_or("$in"): as_list(value) })
                }
                OpType::Exists => json!({ "$exists": value.as_bool().unwrap_or(true) }),
                // A string needle is a substring match; anything else matches
                // array elements by equality.
                OpType::Contains => match value {
                    Value::String(needle) => json!({ "$regex": regex::escape(needle) }),
                    other => other.clone(),
                },
                other => match operator(other) {
                    Some(name) => json!({ name: value }),
                    None => continue,
                },
            };
            out.insert(key, rendered);
        }
        Ok(Value::Object(out))
    }

    fn branch(&mut self, op: OpType, children: Vec<Value>) -> Result<Value, Infallible> {
        Ok(match op {
            OpType::Not => json!({ "$nor": children }),
            OpType::Or => {
                if children.iter().any(is_empty_filter) {
                    json!({})
                } else {
                    json!({ "$or": children })
                }
            }
            _ => {
                let mut kept: Vec<Value> = children
                    .into_iter()
                    .filter(|child| !is_empty_filter(child))
                    .collect();
                match kept.len() {
                    0 => json!({}),
                    1 => kept.remove(0),
                    _ => json!({ "$and": kept }),
                }
            }
        })
    }
}

/// Translate `cond` into the backend's filter document.
pub fn to_native(cond: &Condition) -> Value {
    match cond.combine_with(&mut NativeFilter) {
        Ok(filter) => filter,
        Err(never) => match never {},
    }
}
