//! Schema DDL, grouped by the two on-disk databases (spec §6).
//!
//! Multi-statement `sqlx::query` strings with `CREATE TABLE IF NOT EXISTS`
//! and indexes declared alongside their tables — the teacher's
//! `cli/session/store.rs::init_schema` shape, extended to cover every table
//! in spec §3.

use crate::error::{StoreError, StoreResult};
use sqlx::SqlitePool;

/// `data.db` — the account registry.
pub async fn init_data_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            phone TEXT,
            user_id INTEGER,
            name TEXT,
            username TEXT,
            label TEXT,
            session_data BLOB,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_accounts_user_id
        ON accounts(user_id) WHERE user_id IS NOT NULL;
        "#,
    )
    .execute(pool)
    .await
    .map_err(StoreError::from)?;

    Ok(())
}

/// `cache.db` — everything else: messages, chat sync state, jobs, rate
/// limits, activity log, daemon status, users/chats caches.
pub async fn init_cache_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        r#"
        PRAGMA journal_mode = WAL;

        CREATE TABLE IF NOT EXISTS messages_cache (
            chat_id INTEGER NOT NULL,
            message_id INTEGER NOT NULL,
            from_id INTEGER,
            reply_to_id INTEGER,
            forward_from_id INTEGER,
            text TEXT,
            message_type TEXT NOT NULL,
            has_media INTEGER NOT NULL DEFAULT 0,
            is_outgoing INTEGER NOT NULL DEFAULT 0,
            is_edited INTEGER NOT NULL DEFAULT 0,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            edit_date INTEGER,
            date INTEGER NOT NULL,
            fetched_at INTEGER NOT NULL,
            raw_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (chat_id, message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat_date
        ON messages_cache(chat_id, date DESC);

        CREATE INDEX IF NOT EXISTS idx_messages_fetched_at
        ON messages_cache(fetched_at);

        CREATE TABLE IF NOT EXISTS chat_sync_state (
            chat_id INTEGER PRIMARY KEY,
            chat_type TEXT NOT NULL,
            member_count INTEGER,
            forward_cursor INTEGER,
            backward_cursor INTEGER,
            sync_priority INTEGER NOT NULL,
            sync_enabled INTEGER NOT NULL DEFAULT 0,
            history_complete INTEGER NOT NULL DEFAULT 0,
            synced_messages INTEGER NOT NULL DEFAULT 0,
            last_forward_sync INTEGER,
            last_backward_sync INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_chat_sync_enabled_priority
        ON chat_sync_state(sync_enabled, sync_priority) WHERE sync_enabled = 1;

        CREATE TABLE IF NOT EXISTS sync_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id INTEGER NOT NULL,
            job_type TEXT NOT NULL,
            priority INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            cursor_start INTEGER,
            cursor_end INTEGER,
            messages_fetched INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_sync_jobs_pending
        ON sync_jobs(priority, created_at) WHERE status = 'pending';

        CREATE TABLE IF NOT EXISTS daemon_status (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rate_limits (
            method TEXT NOT NULL,
            window_start INTEGER NOT NULL,
            call_count INTEGER NOT NULL DEFAULT 0,
            last_call_at INTEGER,
            flood_wait_until INTEGER,
            PRIMARY KEY (method, window_start)
        );

        CREATE TABLE IF NOT EXISTS api_activity (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            method TEXT NOT NULL,
            success INTEGER NOT NULL,
            error_code TEXT,
            response_ms INTEGER,
            context TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_api_activity_ts ON api_activity(ts);

        CREATE TABLE IF NOT EXISTS users_cache (
            user_id INTEGER PRIMARY KEY,
            access_hash INTEGER,
            username TEXT,
            phone TEXT,
            first_name TEXT,
            last_name TEXT,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_username ON users_cache(username);
        CREATE INDEX IF NOT EXISTS idx_users_phone ON users_cache(phone);

        CREATE TABLE IF NOT EXISTS chats_cache (
            chat_id INTEGER PRIMARY KEY,
            chat_type TEXT NOT NULL,
            access_hash INTEGER,
            title TEXT,
            updated_at INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .map_err(StoreError::from)?;

    Ok(())
}
