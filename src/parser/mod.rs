//! Message Parser (spec §4.2): normalizes one raw wire message into a
//! `messages_cache` row. Wire records are dynamic-typed JSON tagged by a
//! `_` discriminator (spec §9 re-architecture note); this module maps each
//! tag to a typed row builder rather than threading `match`es through the
//! caller.

use crate::error::{ParseError, ParseResult};
use crate::store::{ChatType, MessageRow, MessageType};
use crate::wire::{chat_id_for_channel, chat_id_for_group, is_tag, read_i64, tag_of};
use serde_json::Value;

/// Normalize one raw wire message. Returns `None` for `messageEmpty`
/// (dropped per spec §4.2); returns `Err` only when the payload lacks a
/// message id, since everything else degrades gracefully to `unknown`.
pub fn parse_raw_message(raw: &Value, chat_id: i64, fetched_at: i64) -> ParseResult<Option<MessageRow>> {
    if tag_of(raw) == Some("messageEmpty") {
        return Ok(None);
    }

    let message_id = read_i64(raw, "id").ok_or_else(|| ParseError::Malformed("missing message id".into()))?;

    let from_id = resolve_peer_id(raw.get("from_id"));
    let forward_from_id = raw.get("fwd_from").and_then(resolve_forward_origin);
    let reply_to_id = raw.get("reply_to").and_then(|r| read_i64(r, "reply_to_msg_id"));
    let date = read_i64(raw, "date").unwrap_or(fetched_at);
    let text = raw.get("message").and_then(|v| v.as_str()).map(str::to_string);
    let (message_type, has_media) = classify(tag_of(raw).unwrap_or(""), raw.get("media"));

    let is_outgoing = raw.get("out").and_then(|v| v.as_bool()).unwrap_or(false);
    let is_pinned = raw.get("pinned").and_then(|v| v.as_bool()).unwrap_or(false);

    let raw_json = serde_json::to_string(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;

    Ok(Some(MessageRow {
        chat_id,
        message_id,
        from_id,
        reply_to_id,
        forward_from_id,
        text,
        message_type,
        has_media,
        is_outgoing,
        is_edited: false,
        is_pinned,
        is_deleted: false,
        edit_date: None,
        date,
        fetched_at,
        raw_json,
        created_at: fetched_at,
        updated_at: fetched_at,
    }))
}

/// Resolve a `Peer` union to its id. Covering all three kinds matters:
/// omitting `peerChat` drops forwards originating from basic groups
/// (spec §4.2, the fix this module carries forward).
pub fn resolve_peer_id(peer: Option<&Value>) -> Option<i64> {
    let peer = peer?;
    if is_tag(peer, "peerUser") {
        read_i64(peer, "user_id")
    } else if is_tag(peer, "peerChat") {
        read_i64(peer, "chat_id")
    } else if is_tag(peer, "peerChannel") {
        read_i64(peer, "channel_id")
    } else {
        None
    }
}

fn resolve_forward_origin(fwd: &Value) -> Option<i64> {
    resolve_peer_id(fwd.get("from_id"))
}

/// A `user` entity as returned alongside a history page's `users` array
/// (spec §3 `users_cache`; SPEC_FULL.md supplemental feature).
pub struct RawUser {
    pub user_id: i64,
    pub access_hash: Option<i64>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Parse one `user`/`userEmpty` entity. Returns `None` for `userEmpty` and
/// for anything lacking an id, mirroring `parse_raw_message`'s treatment of
/// `messageEmpty`.
pub fn parse_raw_user(raw: &Value) -> Option<RawUser> {
    if tag_of(raw) == Some("userEmpty") {
        return None;
    }
    let user_id = read_i64(raw, "id")?;
    Some(RawUser {
        user_id,
        access_hash: read_i64(raw, "access_hash"),
        username: raw.get("username").and_then(|v| v.as_str()).map(str::to_string),
        phone: raw.get("phone").and_then(|v| v.as_str()).map(str::to_string),
        first_name: raw.get("first_name").and_then(|v| v.as_str()).map(str::to_string),
        last_name: raw.get("last_name").and_then(|v| v.as_str()).map(str::to_string),
    })
}

/// A `chat`/`channel` entity as returned alongside a history page's `chats`
/// array (spec §3 `chats_cache`). `chat_id` is already the signed,
/// offset-marked id this crate uses as a cache key (`wire::chat_id_for_*`),
/// not the entity's bare positive `id` field.
pub struct RawChat {
    pub chat_id: i64,
    pub chat_type: ChatType,
    pub access_hash: Option<i64>,
    pub title: Option<String>,
}

/// Parse one `chat`/`channel`/`chatEmpty`/`chatForbidden` entity. The wire
/// tag alone distinguishes `group` (`chat`) from `supergroup`/`channel`
/// (`channel`, disambiguated by the `megagroup` flag) per the `ChatType`
/// enum (spec §3); the bare `id` is converted to this crate's signed
/// `chat_id` convention so it matches the key `messages_cache` rows use.
pub fn parse_raw_chat(raw: &Value) -> Option<RawChat> {
    let tag = tag_of(raw).unwrap_or("");
    if tag == "chatEmpty" {
        return None;
    }
    let raw_id = read_i64(raw, "id")?;
    let title = raw.get("title").and_then(|v| v.as_str()).map(str::to_string);
    let (chat_id, chat_type) = match tag {
        "chat" | "chatForbidden" => (chat_id_for_group(raw_id), ChatType::Group),
        "channel" | "channelForbidden" => {
            if raw.get("megagroup").and_then(|v| v.as_bool()).unwrap_or(false) {
                (chat_id_for_channel(raw_id), ChatType::Supergroup)
            } else {
                (chat_id_for_channel(raw_id), ChatType::Channel)
            }
        }
        _ => return None,
    };
    Some(RawChat { chat_id, chat_type, access_hash: read_i64(raw, "access_hash"), title })
}

/// Map the media union (and `messageService`) onto `(MessageType, has_media)`.
fn classify(tag: &str, media: Option<&Value>) -> (MessageType, bool) {
    if tag == "messageService" {
        return (MessageType::Service, false);
    }

    let Some(media) = media else {
        return (MessageType::Text, false);
    };
    match tag_of(media).unwrap_or("") {
        "" | "messageMediaEmpty" => (MessageType::Text, false),
        "messageMediaPhoto" => (MessageType::Photo, true),
        "messageMediaDocument" => (classify_document(media.get("document")), true),
        "messageMediaWebPage" => (MessageType::Webpage, true),
        "messageMediaContact" => (MessageType::Contact, true),
        "messageMediaGeo" | "messageMediaGeoLive" | "messageMediaVenue" => (MessageType::Location, true),
        "messageMediaPoll" => (MessageType::Poll, true),
        _ => (MessageType::Unknown, true),
    }
}

fn classify_document(document: Option<&Value>) -> MessageType {
    let Some(attributes) = document.and_then(|d| d.get("attributes")).and_then(|a| a.as_array()) else {
        return MessageType::Document;
    };

    let mut is_sticker = false;
    let mut is_video = false;
    let mut is_voice = false;
    let mut is_audio = false;

    for attr in attributes {
        match tag_of(attr).unwrap_or("") {
            "documentAttributeSticker" => is_sticker = true,
            "documentAttributeVideo" => is_video = true,
            "documentAttributeAudio" => {
                if attr.get("voice").and_then(|v| v.as_bool()).unwrap_or(false) {
                    is_voice = true;
                } else {
                    is_audio = true;
                }
            }
            _ => {}
        }
    }

    if is_sticker {
        MessageType::Sticker
    } else if is_voice {
        MessageType::Voice
    } else if is_video {
        MessageType::Video
    } else if is_audio {
        MessageType::Audio
    } else {
        MessageType::Document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_empty_is_dropped() {
        let raw = json!({"_": "messageEmpty", "id": 5});
        assert!(parse_raw_message(&raw, 100, 1000).unwrap().is_none());
    }

    #[test]
    fn missing_id_is_an_error() {
        let raw = json!({"_": "message"});
        assert!(parse_raw_message(&raw, 100, 1000).is_err());
    }

    #[test]
    fn basic_text_message() {
        let raw = json!({
            "_": "message",
            "id": 7,
            "from_id": {"_": "peerUser", "user_id": 42},
            "message": "hello",
            "date": 1700000000,
        });
        let row = parse_raw_message(&raw, 100, 1700000100).unwrap().unwrap();
        assert_eq!(row.from_id, Some(42));
        assert_eq!(row.text.as_deref(), Some("hello"));
        assert_eq!(row.message_type, MessageType::Text);
        assert!(!row.has_media);
        assert_eq!(row.created_at, 1700000100);
    }

    #[test]
    fn forward_from_peer_chat_is_resolved() {
        // Prior bug: omitting peerChat dropped forwards from basic groups.
        let raw = json!({
            "_": "message",
            "id": 9,
            "fwd_from": {"from_id": {"_": "peerChat", "chat_id": 555}},
        });
        let row = parse_raw_message(&raw, 100, 1000).unwrap().unwrap();
        assert_eq!(row.forward_from_id, Some(555));
    }

    #[test]
    fn bigint_access_hash_round_trips_without_precision_loss() {
        let raw = json!({
            "_": "message",
            "id": 11,
            "from_id": {"_": "peerUser", "user_id": {"__tgcli_type": "bigint", "value": "9223372036854775807"}},
        });
        let row = parse_raw_message(&raw, 100, 1000).unwrap().unwrap();
        assert_eq!(row.from_id, Some(i64::MAX));
    }

    #[test]
    fn sticker_document_is_classified() {
        let raw = json!({
            "_": "message",
            "id": 13,
            "media": {
                "_": "messageMediaDocument",
                "document": {"attributes": [{"_": "documentAttributeSticker"}]},
            },
        });
        let row = parse_raw_message(&raw, 100, 1000).unwrap().unwrap();
        assert_eq!(row.message_type, MessageType::Sticker);
        assert!(row.has_media);
    }

    #[test]
    fn voice_note_is_distinguished_from_audio() {
        let raw = json!({
            "_": "message",
            "id": 14,
            "media": {
                "_": "messageMediaDocument",
                "document": {"attributes": [{"_": "documentAttributeAudio", "voice": true}]},
            },
        });
        let row = parse_raw_message(&raw, 100, 1000).unwrap().unwrap();
        assert_eq!(row.message_type, MessageType::Voice);
    }

    #[test]
    fn service_message_has_no_media() {
        let raw = json!({"_": "messageService", "id": 15});
        let row = parse_raw_message(&raw, 100, 1000).unwrap().unwrap();
        assert_eq!(row.message_type, MessageType::Service);
        assert!(!row.has_media);
    }

    #[test]
    fn user_empty_is_dropped() {
        let raw = json!({"_": "userEmpty", "id": 1});
        assert!(parse_raw_user(&raw).is_none());
    }

    #[test]
    fn user_entity_is_parsed() {
        let raw = json!({"_": "user", "id": 42, "access_hash": 111, "username": "alice", "phone": "15551234"});
        let user = parse_raw_user(&raw).unwrap();
        assert_eq!(user.user_id, 42);
        assert_eq!(user.access_hash, Some(111));
        assert_eq!(user.username.as_deref(), Some("alice"));
    }

    #[test]
    fn basic_group_chat_id_is_negated() {
        let raw = json!({"_": "chat", "id": 555, "title": "friends"});
        let chat = parse_raw_chat(&raw).unwrap();
        assert_eq!(chat.chat_id, -555);
        assert_eq!(chat.chat_type, ChatType::Group);
    }

    #[test]
    fn channel_chat_id_uses_marked_offset_and_megagroup_flag() {
        let channel = json!({"_": "channel", "id": 777, "access_hash": 99, "megagroup": true, "title": "chat"});
        let parsed = parse_raw_chat(&channel).unwrap();
        assert_eq!(parsed.chat_id, -(1_000_000_000_000 + 777));
        assert_eq!(parsed.chat_type, ChatType::Supergroup);

        let broadcast = json!({"_": "channel", "id": 778, "title": "news"});
        let parsed = parse_raw_chat(&broadcast).unwrap();
        assert_eq!(parsed.chat_type, ChatType::Channel);
    }

    #[test]
    fn chat_empty_is_dropped() {
        let raw = json!({"_": "chatEmpty", "id": 1});
        assert!(parse_raw_chat(&raw).is_none());
    }
}
