// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Field-key escaping.
//
// The document backend reserves `.` (path separator) and a leading `$`
// (operators) in field names. Keys are stored with full-width substitutes
// instead and decoded on the way out. A key that already contains a
// substitute cannot round-trip, so it is stored as given.

use std::borrow::Cow;

use serde_json::{Map, Value};
use tracing::debug;

use tank_core::Document;

/// Stored in place of `.`.
pub const DOT_SUBSTITUTE: char = '\u{FF0E}';
/// Stored in place of `$`.
pub const DOLLAR_SUBSTITUTE: char = '\u{FF04}';

fn is_substitute(c: char) -> bool {
    c == DOT_SUBSTITUTE || c == DOLLAR_SUBSTITUTE
}

/// Escape one key. Keys that already contain a substitute are returned
/// unchanged.
pub fn escape_key(key: &str) -> Cow<'_, str> {
    if !key.contains(['.', '$']) {
        return Cow::Borrowed(key);
    }
    if key.contains(is_substitute) {
        debug!(key, "Key contains a reserved substitute; storing unescaped");
        return Cow::Borrowed(key);
    }
    Cow::Owned(
        key.chars()
            .map(|c| match c {
                '.' => DOT_SUBSTITUTE,
                '$' => DOLLAR_SUBSTITUTE,
                other => other,
            })
            .collect(),
    )
}

pub fn unescape_key(key: &str) -> Cow<'_, str> {
    if !key.contains(is_substitute) {
        return Cow::Borrowed(key);
    }
    Cow::Owned(
        key.chars()
            .map(|c| match c {
                DOT_SUBSTITUTE => '.',
                DOLLAR_SUBSTITUTE => '$',
                other => other,
            })
            .collect(),
    )
}

/// Escape a dotted field path used in filters, sorts, projections and
/// indexes. Dots stay path separators; each segment is escaped like a
/// stored key, so it names the same field the document was written with.
pub fn escape_path(path: &str) -> Cow<'_, str> {
    if !path.contains('$') {
        return Cow::Borrowed(path);
    }
    Cow::Owned(
        path.split('.')
            .map(escape_key)
            .collect::<Vec<_>>()
            .join("."),
    )
}

fn map_keys(doc: &Map<String, Value>, rename: fn(&str) -> Cow<'_, str>) -> Map<String, Value> {
    doc.iter()
        .map(|(key, value)| (rename(key).into_owned(), map_value(value, rename)))
        .collect()
}

fn map_value(value: &Value, rename: fn(&str) -> Cow<'_, str>) -> Value {
    match value {
        Value::Object(inner) => Value::Object(map_keys(inner, rename)),
        Value::Array(items) => Value::Array(items.iter().map(|v| map_value(v, rename)).collect()),
        other => other.clone(),
    }
}

/// Escape every key, recursively through nested objects and arrays.
pub fn escape_document(doc: &Document) -> Document {
    map_keys(doc, escape_key)
}

pub fn unescape_document(doc: &Document) -> Document {
    map_keys(doc, unescape_key)
}
