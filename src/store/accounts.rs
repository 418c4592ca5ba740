//! Account registry store (`data.db`) and duplicate-account reconciliation
//! (spec §4.6, SPEC_FULL.md supplemental feature list).

use crate::error::{StoreError, StoreResult};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub phone: Option<String>,
    pub user_id: Option<i64>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub label: Option<String>,
    pub is_active: bool,
}

#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

impl AccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_active(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, phone, user_id, name, username, label, is_active \
             FROM accounts WHERE is_active = 1",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(rows.iter().map(row_to_account).collect())
    }

    pub async fn get(&self, id: i64) -> StoreResult<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, phone, user_id, name, username, label, is_active \
             FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.map(|r| row_to_account(&r)))
    }

    pub async fn set_user_id(&self, id: i64, user_id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE accounts SET user_id = ? WHERE id = ?")
            .bind(user_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    pub async fn deactivate(&self, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE accounts SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Collapse duplicate rows sharing a `user_id`: keep the one with a
    /// real phone number, deactivate the placeholder `user:<id>` row.
    /// Returns the ids of accounts that were deactivated as a result.
    pub async fn reconcile_by_user_id(&self, user_id: i64) -> StoreResult<Vec<i64>> {
        let accounts = sqlx::query(
            "SELECT id, phone, user_id, name, username, label, is_active \
             FROM accounts WHERE user_id = ? AND is_active = 1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if accounts.len() < 2 {
            return Ok(Vec::new());
        }

        let mut rows: Vec<Account> = accounts.iter().map(row_to_account).collect();
        // Prefer a row with a real, non-placeholder phone number; fall back
        // to the lowest id (oldest) as a stable tiebreaker.
        rows.sort_by(|a, b| {
            let a_real = has_real_phone(a);
            let b_real = has_real_phone(b);
            b_real.cmp(&a_real).then(a.id.cmp(&b.id))
        });

        let mut deactivated = Vec::new();
        for duplicate in rows.into_iter().skip(1) {
            self.deactivate(duplicate.id).await?;
            deactivated.push(duplicate.id);
        }

        Ok(deactivated)
    }
}

fn has_real_phone(account: &Account) -> bool {
    account
        .phone
        .as_deref()
        .map(|p| !p.is_empty())
        .unwrap_or(false)
}

fn row_to_account(r: &sqlx::sqlite::SqliteRow) -> Account {
    Account {
        id: r.get("id"),
        phone: r.get("phone"),
        user_id: r.get("user_id"),
        name: r.get("name"),
        username: r.get("username"),
        label: r.get("label"),
        is_active: r.get("is_active"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::init_data_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_data_schema(&pool).await.unwrap();
        pool
    }

    async fn insert(pool: &SqlitePool, phone: Option<&str>, user_id: i64) -> i64 {
        sqlx::query("INSERT INTO accounts (phone, user_id, is_active) VALUES (?, ?, 1)")
            .bind(phone)
            .bind(user_id)
            .execute(pool)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    #[tokio::test]
    async fn reconcile_keeps_real_phone_account() {
        let pool = setup().await;
        let placeholder_id = insert(&pool, None, 777).await;
        let real_id = insert(&pool, Some("+15551234567"), 777).await;

        let store = AccountStore::new(pool);
        let deactivated = store.reconcile_by_user_id(777).await.unwrap();

        assert_eq!(deactivated, vec![placeholder_id]);
        let survivor = store.get(real_id).await.unwrap().unwrap();
        assert!(survivor.is_active);
    }

    #[tokio::test]
    async fn reconcile_is_noop_for_single_account() {
        let pool = setup().await;
        insert(&pool, Some("+1"), 42).await;
        let store = AccountStore::new(pool);
        assert!(store.reconcile_by_user_id(42).await.unwrap().is_empty());
    }
}
