//! The opaque `RemoteClient` boundary (spec §1): a generic typed
//! `call(request) -> response` method plus a push stream of realtime
//! updates. The MTProto wire library itself is out of scope — this module
//! only defines the trait the sync engine programs against, grounded on
//! the teacher's `MemoryStore` trait shape (`#[async_trait] pub trait ... :
//! Send + Sync`).

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;

/// The three-kind discriminated peer identifier the upstream API requires
/// (spec §4.5 step 3, GLOSSARY "Peer / InputPeer").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPeer {
    User { user_id: i64, access_hash: i64 },
    Chat { chat_id: i64 },
    Channel { channel_id: i64, access_hash: i64 },
}

pub fn peer_to_json(peer: &InputPeer) -> Value {
    match peer {
        InputPeer::User { user_id, access_hash } => {
            json!({"_": "inputPeerUser", "user_id": user_id, "access_hash": access_hash})
        }
        InputPeer::Chat { chat_id } => json!({"_": "inputPeerChat", "chat_id": chat_id}),
        InputPeer::Channel { channel_id, access_hash } => {
            json!({"_": "inputPeerChannel", "channel_id": channel_id, "access_hash": access_hash})
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub value: Value,
}

/// Parameters for a bounded history fetch (spec §4.5 step 5).
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryRequest {
    pub min_id: Option<i64>,
    pub offset_id: Option<i64>,
    pub limit: u32,
}

pub fn build_history_request(peer: &InputPeer, req: &HistoryRequest) -> RawRequest {
    RawRequest {
        method: "messages.getHistory".to_string(),
        params: json!({
            "peer": peer_to_json(peer),
            "min_id": req.min_id,
            "offset_id": req.offset_id,
            "limit": req.limit,
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<Value>,
    pub has_more: bool,
    /// Accompanying `users`/`chats` entity arrays (spec §3 `users_cache`/
    /// `chats_cache`; SPEC_FULL.md supplemental feature) — the upstream API
    /// returns these alongside a history page rather than inline on each
    /// message, since a `Peer` embedded in a message carries only an id.
    pub users: Vec<Value>,
    pub chats: Vec<Value>,
}

/// Parse the envelope a `RemoteClient` returns from `messages.getHistory`:
/// `{"messages": [...], "users": [...], "chats": [...], "has_more": bool}`.
pub fn parse_history_response(response: &RawResponse) -> HistoryPage {
    let array_field = |key: &str| response.value.get(key).and_then(|m| m.as_array()).cloned().unwrap_or_default();
    HistoryPage {
        messages: array_field("messages"),
        users: array_field("users"),
        chats: array_field("chats"),
        has_more: response.value.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false),
    }
}

/// A realtime event pushed by the account's update stream (spec §4.6).
#[derive(Debug, Clone)]
pub enum RemoteUpdate {
    NewMessage(NewMessageUpdate),
    EditMessage { chat_id: i64, message_id: i64, text: Option<String>, edit_date: i64 },
    DeleteMessages { channel_id: Option<i64>, message_ids: Vec<i64> },
}

#[derive(Debug, Clone)]
pub struct NewMessageUpdate {
    pub chat_id: i64,
    pub message_id: i64,
    pub raw: Value,
    /// Entity data accompanying the update, when the client surfaces it —
    /// used to seed chat policy for chats never seen before (spec §4.6
    /// "newly observed chats seed with sync_enabled per policy").
    pub chat_type_hint: Option<crate::store::ChatType>,
    pub member_count_hint: Option<i64>,
}

/// Errors a `RemoteClient` call can raise. `flood_wait_seconds` extracts
/// the server-imposed cooldown regardless of whether it arrived as a
/// `FLOOD_WAIT_<N>` pattern or a structured field (spec §4.1, GLOSSARY).
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    #[error("flood wait: {seconds}s")]
    FloodWait { seconds: u64 },
    #[error("rate limited: {method} blocked for {wait_seconds}s")]
    RateLimited { method: String, wait_seconds: u64 },
    #[error("network error: {0}")]
    Network(String),
    #[error("remote rejected request: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            RemoteError::FloodWait { seconds } => Some(*seconds),
            RemoteError::Protocol(message) => parse_flood_wait_pattern(message),
            _ => None,
        }
    }
}

/// Recognize the upstream's `FLOOD_WAIT_<N>` error-string convention.
fn parse_flood_wait_pattern(message: &str) -> Option<u64> {
    let idx = message.find("FLOOD_WAIT_")?;
    let rest = &message[idx + "FLOOD_WAIT_".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u64>().ok()
}

/// The opaque transport boundary. A concrete implementation wraps whatever
/// MTProto client library is linked in; this crate only ever talks to the
/// trait.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn connect(&self) -> Result<(), RemoteError>;

    /// Resolve the currently authenticated user's id.
    async fn resolve_self(&self) -> Result<i64, RemoteError>;

    async fn call(&self, request: RawRequest) -> Result<RawResponse, RemoteError>;

    /// Subscribe to this account's realtime update stream. Implementations
    /// may only support a single live subscriber.
    fn subscribe_updates(&self) -> mpsc::Receiver<RemoteUpdate>;

    /// Overridden by `RateLimitedClient` so wrapping an already-wrapped
    /// client is a no-op (spec §8 testable property, §4.1).
    fn is_rate_limited(&self) -> bool {
        false
    }
}
