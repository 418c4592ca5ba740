//! `users_cache` / `chats_cache` (spec §3, §6) — populated from the message
//! parser's resolved peers (SPEC_FULL.md supplemental feature) and consumed
//! by the worker's InputPeer construction (spec §4.5 step 3).

use crate::error::{StoreError, StoreResult};
use crate::store::chats::ChatType;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct CachedUser {
    pub user_id: i64,
    pub access_hash: Option<i64>,
    pub username: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CachedChat {
    pub chat_id: i64,
    pub chat_type: ChatType,
    pub access_hash: Option<i64>,
    pub title: Option<String>,
}

#[derive(Clone)]
pub struct PeerCacheStore {
    pool: SqlitePool,
}

impl PeerCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_user(
        &self,
        user_id: i64,
        access_hash: Option<i64>,
        username: Option<&str>,
        phone: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
        now: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users_cache
                (user_id, access_hash, username, phone, first_name, last_name, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                access_hash = COALESCE(excluded.access_hash, users_cache.access_hash),
                username = COALESCE(excluded.username, users_cache.username),
                phone = COALESCE(excluded.phone, users_cache.phone),
                first_name = COALESCE(excluded.first_name, users_cache.first_name),
                last_name = COALESCE(excluded.last_name, users_cache.last_name),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(access_hash)
        .bind(username)
        .bind(phone)
        .bind(first_name)
        .bind(last_name)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    pub async fn get_user(&self, user_id: i64) -> StoreResult<Option<CachedUser>> {
        let row = sqlx::query(
            "SELECT user_id, access_hash, username, phone FROM users_cache WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.map(|r| CachedUser {
            user_id: r.get("user_id"),
            access_hash: r.get("access_hash"),
            username: r.get("username"),
            phone: r.get("phone"),
        }))
    }

    pub async fn upsert_chat(
        &self,
        chat_id: i64,
        chat_type: ChatType,
        access_hash: Option<i64>,
        title: Option<&str>,
        now: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chats_cache (chat_id, chat_type, access_hash, title, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                chat_type = excluded.chat_type,
                access_hash = COALESCE(excluded.access_hash, chats_cache.access_hash),
                title = COALESCE(excluded.title, chats_cache.title),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chat_id)
        .bind(chat_type.as_str())
        .bind(access_hash)
        .bind(title)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    pub async fn get_chat(&self, chat_id: i64) -> StoreResult<Option<CachedChat>> {
        let row = sqlx::query(
            "SELECT chat_id, chat_type, access_hash, title FROM chats_cache WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.map(|r| CachedChat {
            chat_id: r.get("chat_id"),
            chat_type: ChatType::from_str(r.get::<String, _>("chat_type").as_str()),
            access_hash: r.get("access_hash"),
            title: r.get("title"),
        }))
    }
}
