//! Account Supervisor (spec §4.6): connects each configured account, wires
//! realtime-update handlers, performs health checks and exponential-backoff
//! reconnection, and reconciles duplicate accounts. Grounded on the
//! teacher's `TaskManager` spawn/health-check shape in `tasks/mod.rs`.

use crate::config::ReconnectConfig;
use crate::parser::parse_raw_message;
use crate::remote::{RemoteClient, RemoteUpdate};
use crate::scheduler::policy_for;
use crate::store::{AccountStore, ChatSyncStateStore, ChatType, MessageStore, SyncDirection};
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// `connectAccount`'s tri-state outcome (spec §9 open question): a plain
/// boolean collapses "connected but this row was merged away" into
/// "failed", which is misleading since the surviving account is healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { account_id: i64 },
    MergedAway { surviving_account_id: i64 },
    Failed { account_id: i64, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Connected,
    Reconnecting,
    Error,
}

pub struct AccountHandle {
    pub account_id: i64,
    pub client: Arc<dyn RemoteClient>,
    status: Mutex<AccountStatus>,
    reconnect_attempts: AtomicU32,
}

impl AccountHandle {
    pub async fn status(&self) -> AccountStatus {
        *self.status.lock().await
    }

    async fn set_status(&self, status: AccountStatus) {
        *self.status.lock().await = status;
    }
}

#[derive(Clone)]
pub struct AccountSupervisor {
    accounts: AccountStore,
    messages: MessageStore,
    chats: ChatSyncStateStore,
    reconnect: ReconnectConfig,
}

impl AccountSupervisor {
    pub fn new(accounts: AccountStore, messages: MessageStore, chats: ChatSyncStateStore, reconnect: ReconnectConfig) -> Self {
        Self { accounts, messages, chats, reconnect }
    }

    /// Connect one account: resolve the authenticated user, persist it,
    /// reconcile duplicate rows sharing that `user_id` (spec §4.6).
    pub async fn connect_account(&self, account_id: i64, client: Arc<dyn RemoteClient>) -> ConnectOutcome {
        if let Err(error) = client.connect().await {
            return ConnectOutcome::Failed { account_id, reason: error.to_string() };
        }

        let user_id = match client.resolve_self().await {
            Ok(user_id) => user_id,
            Err(error) => return ConnectOutcome::Failed { account_id, reason: error.to_string() },
        };

        if let Err(error) = self.accounts.set_user_id(account_id, user_id).await {
            return ConnectOutcome::Failed { account_id, reason: error.to_string() };
        }

        match self.accounts.reconcile_by_user_id(user_id).await {
            Ok(deactivated) if deactivated.contains(&account_id) => {
                let surviving_account_id = self
                    .accounts
                    .list_active()
                    .await
                    .ok()
                    .and_then(|rows| rows.into_iter().find(|a| a.user_id == Some(user_id)).map(|a| a.id))
                    .unwrap_or(account_id);
                ConnectOutcome::MergedAway { surviving_account_id }
            }
            Ok(_) => ConnectOutcome::Connected { account_id },
            Err(error) => ConnectOutcome::Failed { account_id, reason: error.to_string() },
        }
    }

    /// Connect every active account in parallel and reconcile across the
    /// whole set (spec §4.7 startup step, SPEC_FULL.md supplemental
    /// "duplicate-account merge via reconcile_accounts in connect_all").
    pub async fn connect_all(
        &self,
        make_client: impl Fn(i64) -> Arc<dyn RemoteClient>,
    ) -> Vec<(i64, ConnectOutcome, Option<Arc<AccountHandle>>)> {
        let accounts = self.accounts.list_active().await.unwrap_or_default();
        let mut set = tokio::task::JoinSet::new();

        for account in accounts {
            let client = make_client(account.id);
            let supervisor = self.clone();
            set.spawn(async move {
                let outcome = supervisor.connect_account(account.id, client.clone()).await;
                (account.id, outcome, client)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            let Ok((account_id, outcome, client)) = joined else { continue };
            let handle = matches!(outcome, ConnectOutcome::Connected { .. }).then(|| {
                Arc::new(AccountHandle {
                    account_id,
                    client,
                    status: Mutex::new(AccountStatus::Connected),
                    reconnect_attempts: AtomicU32::new(0),
                })
            });
            results.push((account_id, outcome, handle));
        }

        results
    }

    /// Dispatch one realtime update onto the store. Errors are logged, not
    /// propagated — one bad update must not kill the daemon (spec §4.6).
    pub async fn handle_update(&self, update: RemoteUpdate) {
        if let Err(error) = self.handle_update_inner(update).await {
            error!(%error, "realtime update handler failed");
        }
    }

    async fn handle_update_inner(&self, update: RemoteUpdate) -> Result<(), String> {
        match update {
            RemoteUpdate::NewMessage(new_message) => {
                let chat_id = new_message.chat_id;
                if self.chats.get(chat_id).await.map_err(|e| e.to_string())?.is_none() {
                    let chat_type = new_message.chat_type_hint.unwrap_or_else(|| infer_chat_type(chat_id));
                    let policy = policy_for(chat_type, new_message.member_count_hint);
                    self.chats
                        .seed(chat_id, chat_type, new_message.member_count_hint, policy.priority, policy.sync_enabled)
                        .await
                        .map_err(|e| e.to_string())?;
                }

                let now = Utc::now().timestamp();
                if let Some(row) = parse_raw_message(&new_message.raw, chat_id, now).map_err(|e| e.to_string())? {
                    let message_id = row.message_id;
                    self.messages.upsert(&row).await.map_err(|e| e.to_string())?;
                    self.chats.advance_forward_cursor(chat_id, message_id).await.map_err(|e| e.to_string())?;
                    self.chats.increment_synced_messages(chat_id, 1).await.map_err(|e| e.to_string())?;
                    self.chats.update_last_sync(chat_id, SyncDirection::Forward, now).await.map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            RemoteUpdate::EditMessage { chat_id, message_id, text, edit_date } => {
                let now = Utc::now().timestamp();
                self.messages
                    .mark_edited(chat_id, message_id, text.as_deref(), edit_date, now)
                    .await
                    .map_err(|e| e.to_string())
            }
            RemoteUpdate::DeleteMessages { channel_id, message_ids } => {
                match channel_id {
                    Some(chat_id) => self.messages.mark_deleted_by_ids(chat_id, &message_ids).await,
                    None => self.messages.mark_deleted_by_ids_any_chat(&message_ids).await,
                }
                .map_err(|e| e.to_string())?;
                Ok(())
            }
        }
    }

    /// Cheap identity RPC health check; on failure schedule a background
    /// reconnect with exponential backoff so the tick loop is never blocked
    /// (spec §4.6, §5 "daemon loop is single-threaded").
    pub async fn health_check(&self, handle: Arc<AccountHandle>, make_client: impl FnOnce() -> Arc<dyn RemoteClient> + Send + 'static) {
        if handle.client.resolve_self().await.is_ok() {
            handle.reconnect_attempts.store(0, Ordering::SeqCst);
            handle.set_status(AccountStatus::Connected).await;
            return;
        }

        warn!(account_id = handle.account_id, "health check failed, scheduling reconnect");
        handle.set_status(AccountStatus::Reconnecting).await;

        let reconnect = self.reconnect.clone();
        let account_id = handle.account_id;
        tokio::spawn(async move {
            let attempt = handle.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > reconnect.max_attempts {
                handle.set_status(AccountStatus::Error).await;
                error!(account_id, "giving up reconnecting after {attempt} attempts");
                return;
            }

            let delay = reconnect.delay_for_attempt(attempt);
            tokio::time::sleep(delay).await;

            let client = make_client();
            match client.connect().await {
                Ok(()) => {
                    handle.reconnect_attempts.store(0, Ordering::SeqCst);
                    handle.set_status(AccountStatus::Connected).await;
                    info!(account_id, attempt, "reconnected");
                }
                Err(error) => {
                    handle.set_status(AccountStatus::Error).await;
                    warn!(account_id, attempt, %error, "reconnect attempt failed");
                }
            }
        });
    }
}

/// Fallback chat-type heuristic when the client's accompanying entity data
/// doesn't carry one: positive ids are users/private chats, negative ids
/// are groups/channels (MTProto id-sign convention).
fn infer_chat_type(chat_id: i64) -> ChatType {
    if chat_id > 0 {
        ChatType::Private
    } else {
        ChatType::Group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{NewMessageUpdate, RawRequest, RawResponse, RemoteError};
    use crate::store::schema::{init_cache_schema, init_data_schema};
    use async_trait::async_trait;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use tokio::sync::mpsc;

    struct NoopClient;

    #[async_trait]
    impl RemoteClient for NoopClient {
        async fn connect(&self) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn resolve_self(&self) -> Result<i64, RemoteError> {
            Ok(1)
        }
        async fn call(&self, _request: RawRequest) -> Result<RawResponse, RemoteError> {
            Ok(RawResponse { value: json!({}) })
        }
        fn subscribe_updates(&self) -> mpsc::Receiver<RemoteUpdate> {
            mpsc::channel(1).1
        }
    }

    async fn cache_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        init_cache_schema(&pool).await.unwrap();
        pool
    }

    async fn data_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        init_data_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn new_message_seeds_chat_and_advances_cursor() {
        let cache = cache_pool().await;
        let data = data_pool().await;
        let supervisor = AccountSupervisor::new(
            AccountStore::new(data),
            MessageStore::new(cache.clone()),
            ChatSyncStateStore::new(cache.clone()),
            ReconnectConfig::from_env(),
        );

        let update = RemoteUpdate::NewMessage(NewMessageUpdate {
            chat_id: 100,
            message_id: 7,
            raw: json!({"_": "message", "id": 7, "message": "hi"}),
            chat_type_hint: Some(ChatType::Private),
            member_count_hint: None,
        });
        supervisor.handle_update(update).await;

        let chats = ChatSyncStateStore::new(cache.clone());
        let state = chats.get(100).await.unwrap().unwrap();
        assert_eq!(state.forward_cursor, Some(7));
        assert!(state.sync_enabled);
    }

    #[tokio::test]
    async fn delete_without_channel_id_looks_up_across_chats() {
        let cache = cache_pool().await;
        let messages = MessageStore::new(cache.clone());
        messages
            .upsert(&crate::store::MessageRow {
                chat_id: 100,
                message_id: 1,
                from_id: None,
                reply_to_id: None,
                forward_from_id: None,
                text: Some("x".into()),
                message_type: crate::store::MessageType::Text,
                has_media: false,
                is_outgoing: false,
                is_edited: false,
                is_pinned: false,
                is_deleted: false,
                edit_date: None,
                date: 1,
                fetched_at: 1,
                raw_json: "{}".into(),
                created_at: 1,
                updated_at: 1,
            })
            .await
            .unwrap();

        let supervisor = AccountSupervisor::new(
            AccountStore::new(data_pool().await),
            messages.clone(),
            ChatSyncStateStore::new(cache.clone()),
            ReconnectConfig::from_env(),
        );
        supervisor
            .handle_update(RemoteUpdate::DeleteMessages { channel_id: None, message_ids: vec![1] })
            .await;

        let fetched = messages.get(100, 1).await.unwrap().unwrap();
        assert!(fetched.is_deleted);
    }

    #[tokio::test]
    async fn connect_account_connects_a_fresh_account() {
        let data = data_pool().await;
        let account_id = sqlx::query("INSERT INTO accounts (phone, is_active) VALUES ('+1', 1)")
            .execute(&data)
            .await
            .unwrap()
            .last_insert_rowid();

        let supervisor = AccountSupervisor::new(
            AccountStore::new(data),
            MessageStore::new(cache_pool().await),
            ChatSyncStateStore::new(cache_pool().await),
            ReconnectConfig::from_env(),
        );
        let client: Arc<dyn RemoteClient> = Arc::new(NoopClient);
        let outcome = supervisor.connect_account(account_id, client).await;
        assert_eq!(outcome, ConnectOutcome::Connected { account_id });
    }
}
