// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Backend-neutral condition expressions.
//
// A `Condition` is an immutable chain of links. Each link is either a leaf
// (an operator plus a field map) or a branch wrapping whole child chains
// (And/Or over two, Not over one). Appending an operator extends the chain,
// so repeated `add_op` calls build a flat AND-chain. Drivers translate a
// condition into their native filter language through `combine`, which owns
// the tree walk and leaves only the per-node rendering to the caller.

use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::value::{compare_values, lookup_path, values_equal};

/// Field name → operand mapping carried by a leaf link.
pub type FieldMap = Map<String, Value>;

// ---------------------------------------------------------------------------
// OpType
// ---------------------------------------------------------------------------

/// Operator tag of a condition link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// Always true; renders as an empty filter.
    True,
    /// Field equals value.
    Eq,
    /// Field differs from value (a missing field differs from everything).
    Ne,
    /// Field strictly less than value.
    Lt,
    /// Field less than or equal to value.
    Lte,
    /// Field strictly greater than value.
    Gt,
    /// Field greater than or equal to value.
    Gte,
    /// Field is one of a set of values.
    In,
    /// Field is none of a set of values.
    NotIn,
    /// String field contains a substring, or array field contains an element.
    Contains,
    /// Field presence matches the boolean operand.
    Exists,
    /// Conjunction of child results.
    And,
    /// Disjunction of child results.
    Or,
    /// Negation of a single child result.
    Not,
}

impl OpType {
    /// Whether this tag combines child conditions rather than fields.
    pub fn is_branch(self) -> bool {
        matches!(self, OpType::And | OpType::Or | OpType::Not)
    }

    /// Short lowercase name, used in rendering and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            OpType::True => "true",
            OpType::Eq => "eq",
            OpType::Ne => "ne",
            OpType::Lt => "lt",
            OpType::Lte => "lte",
            OpType::Gt => "gt",
            OpType::Gte => "gte",
            OpType::In => "in",
            OpType::NotIn => "notin",
            OpType::Contains => "contains",
            OpType::Exists => "exists",
            OpType::And => "and",
            OpType::Or => "or",
            OpType::Not => "not",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Operand {
    Fields(FieldMap),
    Unary(Condition),
    Binary(Condition, Condition),
}

#[derive(Debug)]
struct Link {
    op: OpType,
    operand: Operand,
}

static TRUE: LazyLock<Condition> = LazyLock::new(|| {
    Condition::from_links(vec![Arc::new(Link {
        op: OpType::True,
        operand: Operand::Fields(Map::new()),
    })])
});

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// An immutable boolean filter expression.
///
/// Cloning is cheap: links are shared, and every combinator returns a new
/// chain without touching its inputs.
#[derive(Clone)]
pub struct Condition {
    chain: Arc<[Arc<Link>]>,
}

impl Condition {
    fn from_links(links: Vec<Arc<Link>>) -> Self {
        Self {
            chain: links.into(),
        }
    }

    /// The distinguished always-true condition.
    ///
    /// Every call returns a handle to the same sentinel, so
    /// [`Condition::is_true`] holds for all of them.
    pub fn truth() -> Self {
        TRUE.clone()
    }

    /// Whether this is the always-true sentinel (reference identity).
    pub fn is_true(&self) -> bool {
        Arc::ptr_eq(&self.chain, &TRUE.chain)
    }

    /// Build a single-link leaf condition.
    ///
    /// `op` must be a leaf operator; branch tags are built with
    /// [`Condition::and`], [`Condition::or`] and [`Condition::not`].
    pub fn new(op: OpType, fields: FieldMap) -> Self {
        debug_assert!(!op.is_branch(), "branch operators take child conditions");
        Self::from_links(vec![Arc::new(Link {
            op,
            operand: Operand::Fields(fields),
        })])
    }

    /// Number of links in the top-level chain.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// A chain always has at least one link.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Conjunction. `TRUE` is the identity on either side.
    pub fn and(&self, other: &Condition) -> Condition {
        self.binary(OpType::And, other)
    }

    /// Disjunction. `TRUE` is treated as the identity on either side.
    pub fn or(&self, other: &Condition) -> Condition {
        self.binary(OpType::Or, other)
    }

    fn binary(&self, op: OpType, other: &Condition) -> Condition {
        if other.is_true() {
            return self.clone();
        }
        if self.is_true() {
            return other.clone();
        }
        Self::from_links(vec![Arc::new(Link {
            op,
            operand: Operand::Binary(self.clone(), other.clone()),
        })])
    }

    /// Negation. `TRUE.not()` is `TRUE`.
    pub fn not(&self) -> Condition {
        if self.is_true() {
            return self.clone();
        }
        Self::from_links(vec![Arc::new(Link {
            op: OpType::Not,
            operand: Operand::Unary(self.clone()),
        })])
    }

    /// Append one operator link to the chain.
    ///
    /// The receiver is never modified. Applied to `TRUE`, the result is a
    /// fresh chain that no longer shares the sentinel's identity.
    pub fn add_op(&self, op: OpType, key: &str, value: impl Into<Value>) -> Condition {
        let mut fields = Map::new();
        fields.insert(key.to_string(), value.into());
        self.add_fields(op, fields)
    }

    /// Append one operator link carrying several fields.
    pub fn add_fields(&self, op: OpType, fields: FieldMap) -> Condition {
        let mut links: Vec<Arc<Link>> = Vec::with_capacity(self.chain.len() + 1);
        links.extend(self.chain.iter().cloned());
        links.push(Arc::new(Link {
            op,
            operand: Operand::Fields(fields),
        }));
        Self::from_links(links)
    }

    pub fn eq(&self, key: &str, value: impl Into<Value>) -> Condition {
        self.add_op(OpType::Eq, key, value)
    }

    pub fn ne(&self, key: &str, value: impl Into<Value>) -> Condition {
        self.add_op(OpType::Ne, key, value)
    }

    pub fn lt(&self, key: &str, value: impl Into<Value>) -> Condition {
        self.add_op(OpType::Lt, key, value)
    }

    pub fn lte(&self, key: &str, value: impl Into<Value>) -> Condition {
        self.add_op(OpType::Lte, key, value)
    }

    pub fn gt(&self, key: &str, value: impl Into<Value>) -> Condition {
        self.add_op(OpType::Gt, key, value)
    }

    pub fn gte(&self, key: &str, value: impl Into<Value>) -> Condition {
        self.add_op(OpType::Gte, key, value)
    }

    pub fn is_in(&self, key: &str, values: Vec<Value>) -> Condition {
        self.add_op(OpType::In, key, Value::Array(values))
    }

    pub fn not_in(&self, key: &str, values: Vec<Value>) -> Condition {
        self.add_op(OpType::NotIn, key, Value::Array(values))
    }

    pub fn contains(&self, key: &str, value: impl Into<Value>) -> Condition {
        self.add_op(OpType::Contains, key, value)
    }

    pub fn exists(&self, key: &str, present: bool) -> Condition {
        self.add_op(OpType::Exists, key, present)
    }

    /// Walk the chain with a [`Combiner`].
    ///
    /// Links are visited front to back. Field links go to `leaf`; a Not link
    /// combines its child and passes `[child]` to `branch(Not, ..)`; And/Or
    /// links combine both sides and pass `[left, right]`. The per-link
    /// results are finally folded with `branch(And, results)`.
    pub fn combine_with<C: Combiner>(&self, combiner: &mut C) -> Result<C::Output, C::Error> {
        let mut results = Vec::with_capacity(self.chain.len());
        for link in self.chain.iter() {
            let result = match &link.operand {
                Operand::Fields(fields) => combiner.leaf(link.op, fields)?,
                Operand::Unary(child) => {
                    let inner = child.combine_with(combiner)?;
                    combiner.branch(OpType::Not, vec![inner])?
                }
                Operand::Binary(left, right) => {
                    let left = left.combine_with(combiner)?;
                    let right = right.combine_with(combiner)?;
                    combiner.branch(link.op, vec![left, right])?
                }
            };
            results.push(result);
        }
        combiner.branch(OpType::And, results)
    }

    /// Closure form of [`Condition::combine_with`].
    pub fn combine<T, E, L, B>(&self, leaf: L, branch: B) -> Result<T, E>
    where
        L: FnMut(OpType, &FieldMap) -> Result<T, E>,
        B: FnMut(OpType, Vec<T>) -> Result<T, E>,
    {
        let mut combiner = FnCombiner {
            leaf,
            branch,
            _marker: PhantomData,
        };
        self.combine_with(&mut combiner)
    }

    /// Evaluate the condition against an in-memory document.
    pub fn matches(&self, doc: &FieldMap) -> bool {
        match self.combine_with(&mut Matcher { doc }) {
            Ok(matched) => matched,
            Err(never) => match never {},
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::truth()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Condition({self})")
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Result<String, Infallible> = self.combine(
            |op, fields| {
                if op == OpType::True {
                    return Ok("true".to_string());
                }
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(key, value)| format!("{key} {op} {value}"))
                    .collect();
                Ok(parts.join(" and "))
            },
            |op, children| {
                Ok(match op {
                    OpType::Not => format!("not ({})", children.join("")),
                    _ if children.len() == 1 => children.join(""),
                    _ => format!("({})", children.join(&format!(" {op} "))),
                })
            },
        );
        match rendered {
            Ok(text) => f.write_str(&text),
            Err(never) => match never {},
        }
    }
}

// ---------------------------------------------------------------------------
// Combiner
// ---------------------------------------------------------------------------

/// Per-node rendering used by [`Condition::combine_with`].
///
/// Each backend supplies one of these to translate the same tree into its
/// own filter representation.
pub trait Combiner {
    type Output;
    type Error;

    /// Render a leaf link.
    fn leaf(&mut self, op: OpType, fields: &FieldMap) -> Result<Self::Output, Self::Error>;

    /// Render a branch over already-rendered children.
    fn branch(&mut self, op: OpType, children: Vec<Self::Output>)
        -> Result<Self::Output, Self::Error>;
}

struct FnCombiner<L, B, T, E> {
    leaf: L,
    branch: B,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<L, B, T, E> Combiner for FnCombiner<L, B, T, E>
where
    L: FnMut(OpType, &FieldMap) -> Result<T, E>,
    B: FnMut(OpType, Vec<T>) -> Result<T, E>,
{
    type Output = T;
    type Error = E;

    fn leaf(&mut self, op: OpType, fields: &FieldMap) -> Result<T, E> {
        (self.leaf)(op, fields)
    }

    fn branch(&mut self, op: OpType, children: Vec<T>) -> Result<T, E> {
        (self.branch)(op, children)
    }
}

struct Matcher<'a> {
    doc: &'a FieldMap,
}

impl Combiner for Matcher<'_> {
    type Output = bool;
    type Error = Infallible;

    fn leaf(&mut self, op: OpType, fields: &FieldMap) -> Result<bool, Infallible> {
        Ok(fields
            .iter()
            .all(|(key, expected)| leaf_matches(op, lookup_path(self.doc, key), expected)))
    }

    fn branch(&mut self, op: OpType, children: Vec<bool>) -> Result<bool, Infallible> {
        Ok(match op {
            OpType::Or => children.iter().any(|matched| *matched),
            OpType::Not => !children.first().copied().unwrap_or(true),
            _ => children.iter().all(|matched| *matched),
        })
    }
}

fn element_matches(actual: &Value, expected: &Value) -> bool {
    if values_equal(actual, expected) {
        return true;
    }
    match actual {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

fn candidates(expected: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match expected {
        Value::Array(items) => Box::new(items.iter()),
        other => Box::new(std::iter::once(other)),
    }
}

fn leaf_matches(op: OpType, actual: Option<&Value>, expected: &Value) -> bool {
    use std::cmp::Ordering::*;

    let ordered = |accept: fn(std::cmp::Ordering) -> bool| {
        actual
            .and_then(|a| compare_values(a, expected))
            .is_some_and(accept)
    };

    match op {
        OpType::True => true,
        OpType::Eq => actual.is_some_and(|a| element_matches(a, expected)),
        OpType::Ne => !actual.is_some_and(|a| element_matches(a, expected)),
        OpType::Lt => ordered(|o| o == Less),
        OpType::Lte => ordered(|o| o != Greater),
        OpType::Gt => ordered(|o| o == Greater),
        OpType::Gte => ordered(|o| o != Less),
        OpType::In => actual.is_some_and(|a| candidates(expected).any(|c| element_matches(a, c))),
        OpType::NotIn => {
            !actual.is_some_and(|a| candidates(expected).any(|c| element_matches(a, c)))
        }
        OpType::Contains => match (actual, expected) {
            (Some(Value::String(haystack)), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Some(Value::Array(items)), needle) => items.iter().any(|item| values_equal(item, needle)),
            _ => false,
        },
        OpType::Exists => actual.is_some() == expected.as_bool().unwrap_or(true),
        OpType::And | OpType::Or | OpType::Not => false,
    }
}
