//! Account (API key) lookups

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;

use super::{db_now, from_db_time, to_db_time};
use crate::error::Result;

/// An account, owner of one library and its devices
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    #[serde(skip_serializing)]
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    key: String,
    name: String,
    created_at: String,
}

impl AccountRow {
    fn into_account(self) -> Result<Account> {
        Ok(Account {
            key: self.key,
            name: self.name,
            created_at: from_db_time(&self.created_at)?,
        })
    }
}

/// Repository for API key accounts
pub struct AccountRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> AccountRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Look up an account by its API key
    pub async fn get(&mut self, key: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT key, name, created_at FROM api_keys WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(AccountRow::into_account).transpose()
    }

    /// Insert an account, or rename it if the key already exists
    pub async fn store(&mut self, name: &str, key: &str) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO api_keys (key, name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET name = excluded.name
            RETURNING key, name, created_at
            "#,
        )
        .bind(key)
        .bind(name)
        .bind(to_db_time(db_now()))
        .fetch_one(&mut *self.conn)
        .await?;

        row.into_account()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_store_and_get() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = AccountRepository::new(&mut conn);

        assert!(repo.get("key-1").await.unwrap().is_none());

        repo.store("phone", "key-1").await.unwrap();
        let account = repo.get("key-1").await.unwrap().unwrap();
        assert_eq!(account.name, "phone");

        let renamed = repo.store("reader", "key-1").await.unwrap();
        assert_eq!(renamed.name, "reader");
        assert_eq!(renamed.created_at, account.created_at);
    }
}
