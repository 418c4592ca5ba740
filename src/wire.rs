//! Tagged-marker wire values shared by the message parser and the
//! record/replay harness (spec §4.2, §4.8): `{__tgcli_type:'bigint'|'bytes'
//! |'date', value:...}`. Plain JSON cannot carry ids beyond 53-bit
//! precision, raw bytes, or a canonical date without loss; every field that
//! might need one is read through these helpers instead of `as_i64`/`as_str`
//! directly.

use serde_json::Value;

pub const TYPE_KEY: &str = "__tgcli_type";
pub const VALUE_KEY: &str = "value";

pub const BIGINT_TAG: &str = "bigint";
pub const BYTES_TAG: &str = "bytes";
pub const DATE_TAG: &str = "date";

/// Wire-tag discriminator used by dynamic-typed records like `Peer`
/// (`{_: 'peerUser', user_id: N}`), distinct from the dehydration markers
/// above which key on `__tgcli_type`.
pub fn tag_of(value: &Value) -> Option<&str> {
    value.get("_").and_then(|t| t.as_str())
}

/// Channel/supergroup ids are marked with this offset to form the signed
/// `chat_id` this crate uses as a cache key, distinguishing them from basic
/// group ids in the same negative-id space (GLOSSARY "Peer / InputPeer").
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// A basic group's bare `chat.id` becomes the negative `chat_id` this crate
/// keys caches by.
pub fn chat_id_for_group(raw_group_id: i64) -> i64 {
    -raw_group_id
}

/// A channel/supergroup's bare `channel.id` becomes the negative, offset
/// `chat_id` this crate keys caches by — distinct from a basic group's
/// negation so the two id spaces never collide.
pub fn chat_id_for_channel(raw_channel_id: i64) -> i64 {
    -(CHANNEL_ID_OFFSET + raw_channel_id)
}

pub fn is_tag(value: &Value, tag: &str) -> bool {
    tag_of(value) == Some(tag)
}

/// Read an integer field that may arrive as a plain JSON number, a numeric
/// string, or a tagged bigint marker, without losing precision.
pub fn read_i64(value: &Value, key: &str) -> Option<i64> {
    read_i64_value(value.get(key)?)
}

pub fn read_i64_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Object(obj) => {
            if obj.get(TYPE_KEY).and_then(|t| t.as_str()) == Some(BIGINT_TAG) {
                obj.get(VALUE_KEY)?.as_str()?.parse::<i64>().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_plain_number() {
        let v = json!({"id": 42});
        assert_eq!(read_i64(&v, "id"), Some(42));
    }

    #[test]
    fn reads_tagged_bigint_beyond_f64_precision() {
        let v = json!({"access_hash": {"__tgcli_type": "bigint", "value": "9223372036854775807"}});
        assert_eq!(read_i64(&v, "access_hash"), Some(i64::MAX));
    }

    #[test]
    fn missing_field_is_none() {
        let v = json!({});
        assert_eq!(read_i64(&v, "id"), None);
    }
}
