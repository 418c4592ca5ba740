//! `messages_cache` store (spec §3 Message, §8 upsert/created_at invariants).

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Photo,
    Document,
    Video,
    Audio,
    Sticker,
    Voice,
    Poll,
    Contact,
    Location,
    Webpage,
    Service,
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Photo => "photo",
            MessageType::Document => "document",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::Sticker => "sticker",
            MessageType::Voice => "voice",
            MessageType::Poll => "poll",
            MessageType::Contact => "contact",
            MessageType::Location => "location",
            MessageType::Webpage => "webpage",
            MessageType::Service => "service",
            MessageType::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "text" => MessageType::Text,
            "photo" => MessageType::Photo,
            "document" => MessageType::Document,
            "video" => MessageType::Video,
            "audio" => MessageType::Audio,
            "sticker" => MessageType::Sticker,
            "voice" => MessageType::Voice,
            "poll" => MessageType::Poll,
            "contact" => MessageType::Contact,
            "location" => MessageType::Location,
            "webpage" => MessageType::Webpage,
            "service" => MessageType::Service,
            _ => MessageType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub chat_id: i64,
    pub message_id: i64,
    pub from_id: Option<i64>,
    pub reply_to_id: Option<i64>,
    pub forward_from_id: Option<i64>,
    pub text: Option<String>,
    pub message_type: MessageType,
    pub has_media: bool,
    pub is_outgoing: bool,
    pub is_edited: bool,
    pub is_pinned: bool,
    pub is_deleted: bool,
    pub edit_date: Option<i64>,
    pub date: i64,
    pub fetched_at: i64,
    pub raw_json: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a message. `created_at` is preserved on re-upsert;
    /// `is_deleted` is sticky — an ordinary upsert never clears it back to
    /// false once set (spec §3 invariants).
    pub async fn upsert(&self, row: &MessageRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages_cache
                (chat_id, message_id, from_id, reply_to_id, forward_from_id, text,
                 message_type, has_media, is_outgoing, is_edited, is_pinned, is_deleted,
                 edit_date, date, fetched_at, raw_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id, message_id) DO UPDATE SET
                from_id = excluded.from_id,
                reply_to_id = excluded.reply_to_id,
                forward_from_id = excluded.forward_from_id,
                text = excluded.text,
                message_type = excluded.message_type,
                has_media = excluded.has_media,
                is_outgoing = excluded.is_outgoing,
                is_edited = excluded.is_edited,
                is_pinned = excluded.is_pinned,
                is_deleted = (is_deleted OR excluded.is_deleted),
                edit_date = excluded.edit_date,
                date = excluded.date,
                fetched_at = excluded.fetched_at,
                raw_json = excluded.raw_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(row.chat_id)
        .bind(row.message_id)
        .bind(row.from_id)
        .bind(row.reply_to_id)
        .bind(row.forward_from_id)
        .bind(&row.text)
        .bind(row.message_type.as_str())
        .bind(row.has_media)
        .bind(row.is_outgoing)
        .bind(row.is_edited)
        .bind(row.is_pinned)
        .bind(row.is_deleted)
        .bind(row.edit_date)
        .bind(row.date)
        .bind(row.fetched_at)
        .bind(&row.raw_json)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    pub async fn upsert_batch(&self, rows: &[MessageRow]) -> StoreResult<()> {
        for row in rows {
            self.upsert(row).await?;
        }
        Ok(())
    }

    pub async fn get(&self, chat_id: i64, message_id: i64) -> StoreResult<Option<MessageRow>> {
        let row = sqlx::query(
            r#"SELECT chat_id, message_id, from_id, reply_to_id, forward_from_id, text,
               message_type, has_media, is_outgoing, is_edited, is_pinned, is_deleted,
               edit_date, date, fetched_at, raw_json, created_at, updated_at
               FROM messages_cache WHERE chat_id = ? AND message_id = ?"#,
        )
        .bind(chat_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.map(|r| row_to_message(&r)))
    }

    pub async fn count_for_chat(&self, chat_id: i64) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM messages_cache WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.get("c"))
    }

    /// Total row count across all chats, published as `messages_synced`
    /// (spec §6 `daemon_status`).
    pub async fn count_all(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM messages_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.get("c"))
    }

    /// Mark deleted by ids within a single chat (channel-flavored delete,
    /// spec §4.6). Returns the count of rows actually flipped from 0 to 1.
    pub async fn mark_deleted_by_ids(&self, chat_id: i64, ids: &[i64]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE messages_cache SET is_deleted = 1 \
             WHERE chat_id = ? AND message_id IN ({placeholders}) AND is_deleted = 0"
        );
        let mut query = sqlx::query(&sql).bind(chat_id);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await.map_err(StoreError::from)?;
        Ok(result.rows_affected())
    }

    /// Mark deleted by message id across all chats (DM/basic-group flavored
    /// delete with no channel_id, spec §4.6) — looks up each id via an
    /// index scan rather than requiring the caller to know the chat.
    pub async fn mark_deleted_by_ids_any_chat(&self, ids: &[i64]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE messages_cache SET is_deleted = 1 \
             WHERE message_id IN ({placeholders}) AND is_deleted = 0"
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await.map_err(StoreError::from)?;
        Ok(result.rows_affected())
    }

    pub async fn mark_edited(
        &self,
        chat_id: i64,
        message_id: i64,
        text: Option<&str>,
        edit_date: i64,
        updated_at: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE messages_cache SET text = ?, is_edited = 1, edit_date = ?, updated_at = ? \
             WHERE chat_id = ? AND message_id = ?",
        )
        .bind(text)
        .bind(edit_date)
        .bind(updated_at)
        .bind(chat_id)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }
}

fn row_to_message(r: &sqlx::sqlite::SqliteRow) -> MessageRow {
    MessageRow {
        chat_id: r.get("chat_id"),
        message_id: r.get("message_id"),
        from_id: r.get("from_id"),
        reply_to_id: r.get("reply_to_id"),
        forward_from_id: r.get("forward_from_id"),
        text: r.get("text"),
        message_type: MessageType::from_str(r.get::<String, _>("message_type").as_str()),
        has_media: r.get("has_media"),
        is_outgoing: r.get("is_outgoing"),
        is_edited: r.get("is_edited"),
        is_pinned: r.get("is_pinned"),
        is_deleted: r.get("is_deleted"),
        edit_date: r.get("edit_date"),
        date: r.get("date"),
        fetched_at: r.get("fetched_at"),
        raw_json: r.get("raw_json"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}
