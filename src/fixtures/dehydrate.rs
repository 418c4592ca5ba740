//! Dehydration/rehydration contract (spec §4.8, §9): a tagged-marker
//! serialization that survives a round trip through plain JSON for types
//! JSON itself can't carry losslessly — big integers, raw bytes, and
//! canonical timestamps. Shares the `__tgcli_type` marker convention with
//! [`crate::wire`], which reads these same tags out of already-parsed
//! `serde_json::Value`s on the read path.

use crate::wire::{BIGINT_TAG, BYTES_TAG, DATE_TAG, TYPE_KEY, VALUE_KEY};
use serde_json::{Map, Value};

/// A value as seen on the record/replay boundary, before it collapses into
/// plain JSON. Distinct from `serde_json::Value` only in the types JSON
/// can't represent natively; everything else passes through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum DehydratedValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    BigInt(i128),
    Bytes(Vec<u8>),
    /// Milliseconds since the epoch.
    Date(i64),
    Array(Vec<DehydratedValue>),
    /// Preserves field order — a plain `serde_json::Map` with the
    /// `preserve_order` feature off would not.
    Map(Vec<(String, DehydratedValue)>),
}

/// Lower a [`DehydratedValue`] into plain JSON, tagging the types JSON
/// cannot represent. Arrays preserve order; map keys preserve insertion
/// order via an explicit `Vec` rather than relying on a JSON object.
pub fn dehydrate(value: &DehydratedValue) -> Value {
    match value {
        DehydratedValue::Null => Value::Null,
        DehydratedValue::Bool(b) => Value::Bool(*b),
        DehydratedValue::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        DehydratedValue::String(s) => Value::String(s.clone()),
        DehydratedValue::BigInt(n) => tagged(BIGINT_TAG, Value::String(n.to_string())),
        DehydratedValue::Bytes(bytes) => tagged(BYTES_TAG, Value::String(hex::encode(bytes))),
        DehydratedValue::Date(millis) => tagged(DATE_TAG, Value::Number((*millis).into())),
        DehydratedValue::Array(items) => Value::Array(items.iter().map(dehydrate).collect()),
        DehydratedValue::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), dehydrate(value));
            }
            Value::Object(map)
        }
    }
}

fn tagged(tag: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(TYPE_KEY.to_string(), Value::String(tag.to_string()));
    map.insert(VALUE_KEY.to_string(), value);
    Value::Object(map)
}

/// Raise plain JSON back into a [`DehydratedValue`], recognizing the
/// tagged markers `dehydrate` produces. Field order on objects is whatever
/// `serde_json` handed back (insertion order, with the `preserve_order`
/// feature `serde_json` carries transitively via `indexmap` in this crate's
/// dependency tree is not assumed — order is only load-bearing for values
/// this module itself dehydrated).
pub fn rehydrate(value: &Value) -> DehydratedValue {
    match value {
        Value::Null => DehydratedValue::Null,
        Value::Bool(b) => DehydratedValue::Bool(*b),
        Value::Number(n) => DehydratedValue::Number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => DehydratedValue::String(s.clone()),
        Value::Array(items) => DehydratedValue::Array(items.iter().map(rehydrate).collect()),
        Value::Object(map) => {
            if let Some(tag) = map.get(TYPE_KEY).and_then(|t| t.as_str()) {
                if let Some(inner) = map.get(VALUE_KEY) {
                    match tag {
                        BIGINT_TAG => {
                            if let Some(parsed) = inner.as_str().and_then(|s| s.parse::<i128>().ok()) {
                                return DehydratedValue::BigInt(parsed);
                            }
                        }
                        BYTES_TAG => {
                            if let Some(parsed) = inner.as_str().and_then(|s| hex::decode(s).ok()) {
                                return DehydratedValue::Bytes(parsed);
                            }
                        }
                        DATE_TAG => {
                            if let Some(millis) = inner.as_i64() {
                                return DehydratedValue::Date(millis);
                            }
                        }
                        _ => {}
                    }
                }
            }
            DehydratedValue::Map(map.iter().map(|(k, v)| (k.clone(), rehydrate(v))).collect())
        }
    }
}

/// Canonical JSON encoding used for fixture keys: object keys sorted
/// recursively so the same logical request always hashes the same way
/// regardless of field-insertion order (spec §4.8).
pub fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).unwrap_or_default());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&serde_json::to_string(other).unwrap_or_default()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}
