// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Compact textual selector grammar used by query-string parsers:
//
//   key=value,key!=value,key+in+v1|v2,key+notin+v1,v2
//
// Each clause compiles to one leaf and the clauses are ANDed together as a
// flat chain. A comma-separated token without an operator continues the
// value list of a preceding `+in+`/`+notin+` clause.

use serde_json::Value;
use thiserror::Error;

use crate::condition::{Condition, OpType};
use crate::regex_cache::RegexCache;

const CLAUSE_PATTERN: &str = r"^([^=!+]*)(=|!=|\+in\+|\+notin\+)(.*)$";

/// Errors produced while parsing a selector string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("missing operator in clause '{0}'")]
    MissingOperator(String),

    #[error("empty key in clause '{0}'")]
    EmptyKey(String),

    #[error("invalid clause pattern: {0}")]
    Pattern(String),
}

struct Clause {
    key: String,
    op: OpType,
    values: Vec<Value>,
}

impl Clause {
    fn operand(self) -> Value {
        match self.op {
            OpType::In | OpType::NotIn => Value::Array(self.values),
            _ => self.values.into_iter().next().unwrap_or(Value::Null),
        }
    }
}

/// Numbers and booleans keep their JSON type; everything else is a string.
fn parse_scalar(raw: &str) -> Value {
    let raw = raw.trim();
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

/// Parse a selector string into a condition.
pub fn parse_selector(input: &str) -> Result<Condition, SelectorError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SelectorError::Empty);
    }

    let clause_re = RegexCache::global()
        .get(CLAUSE_PATTERN)
        .map_err(|e| SelectorError::Pattern(e.to_string()))?;

    let mut clauses: Vec<Clause> = Vec::new();
    for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match clause_re.captures(token) {
            Some(caps) => {
                let key = caps[1].trim();
                if key.is_empty() {
                    return Err(SelectorError::EmptyKey(token.to_string()));
                }
                let op = match &caps[2] {
                    "=" => OpType::Eq,
                    "!=" => OpType::Ne,
                    "+in+" => OpType::In,
                    _ => OpType::NotIn,
                };
                let values = match op {
                    OpType::In | OpType::NotIn => caps[3]
                        .split('|')
                        .filter(|v| !v.trim().is_empty())
                        .map(parse_scalar)
                        .collect(),
                    _ => vec![parse_scalar(&caps[3])],
                };
                clauses.push(Clause {
                    key: key.to_string(),
                    op,
                    values,
                });
            }
            None => match clauses.last_mut() {
                Some(clause) if matches!(clause.op, OpType::In | OpType::NotIn) => {
                    clause.values.extend(token.split('|').map(parse_scalar));
                }
                _ => return Err(SelectorError::MissingOperator(token.to_string())),
            },
        }
    }

    Ok(clauses.into_iter().fold(Condition::truth(), |cond, clause| {
        let (key, op) = (clause.key.clone(), clause.op);
        cond.add_op(op, &key, clause.operand())
    }))
}
