//! Tagged value type for action metadata, plus the canonical-JSON
//! encoder used to compute content fingerprints (I-3).
//!
//! Replaces the "dynamic any metadata bag" pattern: a [`Value`] can only
//! be one of a small closed set of shapes, all of which have an
//! unambiguous canonical encoding. There is no way to insert a function
//! or a cyclic structure, so canonicalization can never fail on a
//! metadata value (it can still fail on malformed numeric strings, which
//! is rejected at construction via [`Value::number`]).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    /// Numbers are carried as their canonical decimal string form, never
    /// as binary floating point (Design Note: "ad-hoc ... floating-point
    /// amounts").
    Number(String),
    String(String),
    List(Vec<Value>),
    /// `BTreeMap` gives us lexicographic key order for free, satisfying
    /// I-3(a) without a separate sort step.
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn number(n: impl ToString) -> Self {
        Value::Number(n.to_string())
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Render this value as canonical JSON: sorted keys, no insignificant
    /// whitespace, UTF-8, booleans as `true`/`false`, null as `null`.
    pub fn to_canonical_json(&self) -> String {
        let mut out = String::new();
        write_canonical(self, &mut out);
        out
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            // Numbers are written unquoted, matching JSON's numeric
            // literal grammar, since they're already normalized decimal
            // strings with no exotic characters.
            out.push_str(n);
        }
        Value::String(s) => write_json_string(s, out),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Canonicalize an arbitrary `serde_json::Value` the same way, used by
/// the exporters when canonicalizing whole records (certificates,
/// digest-chain bundles) that are built with `serde_json` rather than
/// the metadata [`Value`] type.
pub fn canonicalize_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical_json(value, &mut out);
    out
}

fn write_canonical_json(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value as J;
    match value {
        J::Null => out.push_str("null"),
        J::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        J::Number(n) => out.push_str(&n.to_string()),
        J::String(s) => write_json_string(s, out),
        J::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        J::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_canonical_json(&map[*k], out);
            }
            out.push('}');
        }
    }
}
