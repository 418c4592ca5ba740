//! `chat_sync_state` store (spec §3 ChatSyncState).

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Private => "private",
            ChatType::Group => "group",
            ChatType::Supergroup => "supergroup",
            ChatType::Channel => "channel",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "private" => ChatType::Private,
            "group" => ChatType::Group,
            "supergroup" => ChatType::Supergroup,
            _ => ChatType::Channel,
        }
    }
}

/// Sync priority scale shared by chats and jobs — lower integer is more
/// urgent (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum SyncPriority {
    Realtime = 0,
    High = 1,
    Medium = 2,
    Low = 3,
    Background = 4,
}

impl SyncPriority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => SyncPriority::Realtime,
            1 => SyncPriority::High,
            2 => SyncPriority::Medium,
            3 => SyncPriority::Low,
            _ => SyncPriority::Background,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSyncState {
    pub chat_id: i64,
    pub chat_type: ChatType,
    pub member_count: Option<i64>,
    pub forward_cursor: Option<i64>,
    pub backward_cursor: Option<i64>,
    pub sync_priority: SyncPriority,
    pub sync_enabled: bool,
    pub history_complete: bool,
    pub synced_messages: i64,
    pub last_forward_sync: Option<i64>,
    pub last_backward_sync: Option<i64>,
}

#[derive(Clone)]
pub struct ChatSyncStateStore {
    pool: SqlitePool,
}

impl ChatSyncStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Seed a chat's sync state row if it doesn't exist yet; a no-op upsert
    /// otherwise (used both by the scheduler and by realtime handlers that
    /// observe a brand-new chat).
    pub async fn seed(
        &self,
        chat_id: i64,
        chat_type: ChatType,
        member_count: Option<i64>,
        priority: SyncPriority,
        sync_enabled: bool,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_sync_state
                (chat_id, chat_type, member_count, sync_priority, sync_enabled,
                 history_complete, synced_messages)
            VALUES (?, ?, ?, ?, ?, 0, 0)
            ON CONFLICT(chat_id) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(chat_type.as_str())
        .bind(member_count)
        .bind(priority.as_i32())
        .bind(sync_enabled)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    pub async fn get(&self, chat_id: i64) -> StoreResult<Option<ChatSyncState>> {
        let row = sqlx::query(
            r#"SELECT chat_id, chat_type, member_count, forward_cursor, backward_cursor,
               sync_priority, sync_enabled, history_complete, synced_messages,
               last_forward_sync, last_backward_sync
               FROM chat_sync_state WHERE chat_id = ?"#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.map(|r| row_to_state(&r)))
    }

    pub async fn list_enabled(&self) -> StoreResult<Vec<ChatSyncState>> {
        let rows = sqlx::query(
            r#"SELECT chat_id, chat_type, member_count, forward_cursor, backward_cursor,
               sync_priority, sync_enabled, history_complete, synced_messages,
               last_forward_sync, last_backward_sync
               FROM chat_sync_state WHERE sync_enabled = 1
               ORDER BY sync_priority ASC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(rows.iter().map(row_to_state).collect())
    }

    /// Advance the forward cursor, never regressing it (spec §3/§8:
    /// monotonic non-decreasing). Returns the resulting cursor value.
    pub async fn advance_forward_cursor(&self, chat_id: i64, candidate: i64) -> StoreResult<i64> {
        sqlx::query(
            r#"UPDATE chat_sync_state
               SET forward_cursor = CASE
                   WHEN forward_cursor IS NULL OR forward_cursor < ? THEN ?
                   ELSE forward_cursor
               END
               WHERE chat_id = ?"#,
        )
        .bind(candidate)
        .bind(candidate)
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let state = self
            .get(chat_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("chat_sync_state {chat_id}")))?;
        Ok(state.forward_cursor.unwrap_or(candidate))
    }

    /// Advance the backward cursor, never regressing it outward from 1
    /// (spec §3: cursors only move outward on successful fetches).
    pub async fn advance_backward_cursor(&self, chat_id: i64, candidate: i64) -> StoreResult<i64> {
        sqlx::query(
            r#"UPDATE chat_sync_state
               SET backward_cursor = CASE
                   WHEN backward_cursor IS NULL OR backward_cursor > ? THEN ?
                   ELSE backward_cursor
               END
               WHERE chat_id = ?"#,
        )
        .bind(candidate)
        .bind(candidate)
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let state = self
            .get(chat_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("chat_sync_state {chat_id}")))?;
        Ok(state.backward_cursor.unwrap_or(candidate))
    }

    pub async fn set_history_complete(&self, chat_id: i64, complete: bool) -> StoreResult<()> {
        sqlx::query("UPDATE chat_sync_state SET history_complete = ? WHERE chat_id = ?")
            .bind(complete)
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    pub async fn set_cursors(
        &self,
        chat_id: i64,
        forward: Option<i64>,
        backward: Option<i64>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE chat_sync_state SET forward_cursor = ?, backward_cursor = ? WHERE chat_id = ?",
        )
        .bind(forward)
        .bind(backward)
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    pub async fn increment_synced_messages(&self, chat_id: i64, by: i64) -> StoreResult<()> {
        sqlx::query("UPDATE chat_sync_state SET synced_messages = synced_messages + ? WHERE chat_id = ?")
            .bind(by)
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    pub async fn update_last_sync(&self, chat_id: i64, direction: SyncDirection, ts: i64) -> StoreResult<()> {
        let column = match direction {
            SyncDirection::Forward => "last_forward_sync",
            SyncDirection::Backward => "last_backward_sync",
        };
        let sql = format!("UPDATE chat_sync_state SET {column} = ? WHERE chat_id = ?");
        sqlx::query(&sql)
            .bind(ts)
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Forward,
    Backward,
}

fn row_to_state(r: &sqlx::sqlite::SqliteRow) -> ChatSyncState {
    ChatSyncState {
        chat_id: r.get("chat_id"),
        chat_type: ChatType::from_str(r.get::<String, _>("chat_type").as_str()),
        member_count: r.get("member_count"),
        forward_cursor: r.get("forward_cursor"),
        backward_cursor: r.get("backward_cursor"),
        sync_priority: SyncPriority::from_i32(r.get("sync_priority")),
        sync_enabled: r.get("sync_enabled"),
        history_complete: r.get("history_complete"),
        synced_messages: r.get("synced_messages"),
        last_forward_sync: r.get("last_forward_sync"),
        last_backward_sync: r.get("last_backward_sync"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::init_cache_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_cache_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn forward_cursor_is_monotonic() {
        let pool = setup().await;
        let store = ChatSyncStateStore::new(pool);
        store
            .seed(100, ChatType::Private, None, SyncPriority::High, true)
            .await
            .unwrap();
        store.set_cursors(100, Some(5), None).await.unwrap();

        assert_eq!(store.advance_forward_cursor(100, 10).await.unwrap(), 10);
        // A regression attempt must not move the cursor backwards.
        assert_eq!(store.advance_forward_cursor(100, 7).await.unwrap(), 10);
        assert_eq!(store.advance_forward_cursor(100, 42).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn backward_history_completion() {
        let pool = setup().await;
        let store = ChatSyncStateStore::new(pool);
        store
            .seed(100, ChatType::Group, Some(5), SyncPriority::High, true)
            .await
            .unwrap();

        store.advance_backward_cursor(100, 13).await.unwrap();
        store.set_history_complete(100, true).await.unwrap();

        let state = store.get(100).await.unwrap().unwrap();
        assert_eq!(state.backward_cursor, Some(13));
        assert!(state.history_complete);
    }
}
