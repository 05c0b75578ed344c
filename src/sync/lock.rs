//! Sync lock manager
//!
//! One advisory lock row per account guards a sync attempt. The unique
//! key on `api_key` makes `create` fail for a second holder; expiry is
//! only reported, never enforced here.

use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::types::{LockPatch, SyncLock, SyncStatus};
use crate::db::{db_now, from_db_time, to_db_time};
use crate::error::{AppError, Result};

const LOCK_COLUMNS: &str =
    "api_key, acquired_by, status, retry_count, last_synced, acquired_at, expires_at, updated_at";

#[derive(sqlx::FromRow)]
struct LockRow {
    api_key: String,
    acquired_by: String,
    status: String,
    retry_count: i64,
    last_synced: Option<String>,
    acquired_at: String,
    expires_at: String,
    updated_at: String,
}

impl LockRow {
    fn into_lock(self) -> Result<SyncLock> {
        Ok(SyncLock {
            api_key: self.api_key,
            acquired_by: self.acquired_by,
            status: self.status.parse().map_err(AppError::Internal)?,
            retry_count: self.retry_count,
            last_synced: self.last_synced.as_deref().map(from_db_time).transpose()?,
            acquired_at: from_db_time(&self.acquired_at)?,
            expires_at: from_db_time(&self.expires_at)?,
            updated_at: from_db_time(&self.updated_at)?,
        })
    }
}

/// Outcome of trying to take the lock for a sync attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LockAcquisition {
    /// The caller now holds the lock
    Acquired(SyncLock),
    /// Another holder has a live lock
    Held(SyncLock),
}

/// Repository for sync locks
pub struct LockRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> LockRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Get the lock of an account
    pub async fn get(&mut self, api_key: &str) -> Result<Option<SyncLock>> {
        let row = sqlx::query_as::<_, LockRow>(&format!(
            "SELECT {} FROM sync_locks WHERE api_key = ?",
            LOCK_COLUMNS
        ))
        .bind(api_key)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(LockRow::into_lock).transpose()
    }

    /// Create a pending lock, failing with `Conflict` if one exists
    pub async fn create(&mut self, api_key: &str, acquired_by: &str, ttl: Duration) -> Result<SyncLock> {
        let now = db_now();

        let result = sqlx::query_as::<_, LockRow>(&format!(
            r#"
            INSERT INTO sync_locks
                (api_key, acquired_by, status, retry_count, acquired_at, expires_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?, ?)
            RETURNING {}
            "#,
            LOCK_COLUMNS
        ))
        .bind(api_key)
        .bind(acquired_by)
        .bind(SyncStatus::Pending.as_str())
        .bind(to_db_time(now))
        .bind(to_db_time(now + ttl))
        .bind(to_db_time(now))
        .fetch_one(&mut *self.conn)
        .await;

        match result {
            Ok(row) => row.into_lock(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AppError::Conflict(
                format!("Sync lock already exists for account {}", api_key),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a sparse patch; fields left `None` keep their stored value.
    ///
    /// Returns `None` if the account has no lock.
    pub async fn update(&mut self, api_key: &str, patch: &LockPatch) -> Result<Option<SyncLock>> {
        if patch.is_empty() {
            return self.get(api_key).await;
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE sync_locks SET updated_at = ");
        builder.push_bind(to_db_time(db_now()));

        if let Some(acquired_by) = &patch.acquired_by {
            builder.push(", acquired_by = ").push_bind(acquired_by.clone());
        }
        if let Some(status) = patch.status {
            builder.push(", status = ").push_bind(status.as_str());
        }
        if let Some(retry_count) = patch.retry_count {
            builder.push(", retry_count = ").push_bind(retry_count);
        }
        if let Some(last_synced) = patch.last_synced {
            builder.push(", last_synced = ").push_bind(to_db_time(last_synced));
        }
        if let Some(acquired_at) = patch.acquired_at {
            builder.push(", acquired_at = ").push_bind(to_db_time(acquired_at));
        }
        if let Some(expires_at) = patch.expires_at {
            builder.push(", expires_at = ").push_bind(to_db_time(expires_at));
        }

        builder.push(" WHERE api_key = ").push_bind(api_key.to_string());
        builder.push(" RETURNING ").push(LOCK_COLUMNS);

        let row = builder
            .build_query_as::<LockRow>()
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(LockRow::into_lock).transpose()
    }

    /// Record a failed attempt: status `error`, one more retry
    pub async fn mark_failed(&mut self, api_key: &str) -> Result<Option<SyncLock>> {
        let row = sqlx::query_as::<_, LockRow>(&format!(
            r#"
            UPDATE sync_locks
            SET status = ?, retry_count = retry_count + 1, updated_at = ?
            WHERE api_key = ?
            RETURNING {}
            "#,
            LOCK_COLUMNS
        ))
        .bind(SyncStatus::Error.as_str())
        .bind(to_db_time(db_now()))
        .bind(api_key)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(LockRow::into_lock).transpose()
    }

    /// Delete the lock of an account, returning whether one existed
    pub async fn delete(&mut self, api_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_locks WHERE api_key = ?")
            .bind(api_key)
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Hand an existing lock to a new holder.
    ///
    /// Only succeeds if the lock still carries `observed_acquired_at`, so
    /// two callers racing for the same stale lock cannot both win.
    pub async fn take_over(
        &mut self,
        api_key: &str,
        observed_acquired_at: DateTime<Utc>,
        acquired_by: &str,
        ttl: Duration,
    ) -> Result<Option<SyncLock>> {
        let now = db_now();

        let row = sqlx::query_as::<_, LockRow>(&format!(
            r#"
            UPDATE sync_locks
            SET acquired_by = ?, status = ?, acquired_at = ?, expires_at = ?, updated_at = ?
            WHERE api_key = ? AND acquired_at = ?
            RETURNING {}
            "#,
            LOCK_COLUMNS
        ))
        .bind(acquired_by)
        .bind(SyncStatus::Pending.as_str())
        .bind(to_db_time(now))
        .bind(to_db_time(now + ttl))
        .bind(to_db_time(now))
        .bind(api_key)
        .bind(to_db_time(observed_acquired_at))
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(LockRow::into_lock).transpose()
    }

    /// Take the lock for `holder`, unless another holder's lock is live.
    ///
    /// A missing lock is created; a finished, failed or expired one is
    /// taken over.
    pub async fn acquire(&mut self, api_key: &str, holder: &str, ttl: Duration) -> Result<LockAcquisition> {
        let existing = match self.get(api_key).await? {
            None => match self.create(api_key, holder, ttl).await {
                Ok(lock) => return Ok(LockAcquisition::Acquired(lock)),
                Err(AppError::Conflict(_)) => self.get(api_key).await?,
                Err(e) => return Err(e),
            },
            found => found,
        };

        let Some(existing) = existing else {
            return Err(AppError::Conflict(format!(
                "Sync lock for account {} changed concurrently",
                api_key
            )));
        };

        if existing.blocks(holder, Utc::now()) {
            return Ok(LockAcquisition::Held(existing));
        }

        if existing.is_expired(Utc::now()) && existing.status.is_active() {
            tracing::warn!(
                acquired_by = %existing.acquired_by,
                expires_at = %existing.expires_at,
                "Taking over expired sync lock"
            );
        }

        match self
            .take_over(api_key, existing.acquired_at, holder, ttl)
            .await?
        {
            Some(lock) => Ok(LockAcquisition::Acquired(lock)),
            None => match self.get(api_key).await? {
                Some(current) => Ok(LockAcquisition::Held(current)),
                None => Err(AppError::Conflict(format!(
                    "Sync lock for account {} changed concurrently",
                    api_key
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, AccountRepository};

    async fn seeded_pool() -> sqlx::SqlitePool {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        AccountRepository::new(&mut conn).store("user", "key-1").await.unwrap();
        drop(conn);
        pool
    }

    #[tokio::test]
    async fn test_create_is_unique_per_account() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = LockRepository::new(&mut conn);

        assert!(repo.get("key-1").await.unwrap().is_none());

        let lock = repo.create("key-1", "phone", Duration::minutes(5)).await.unwrap();
        assert_eq!(lock.status, SyncStatus::Pending);
        assert_eq!(lock.retry_count, 0);
        assert_eq!(lock.expires_at - lock.acquired_at, Duration::minutes(5));

        let second = repo.create("key-1", "tablet", Duration::minutes(5)).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));
        assert_eq!(repo.get("key-1").await.unwrap().unwrap().acquired_by, "phone");
    }

    #[tokio::test]
    async fn test_update_only_touches_present_fields() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = LockRepository::new(&mut conn);

        let created = repo.create("key-1", "phone", Duration::minutes(5)).await.unwrap();
        repo.update(
            "key-1",
            &LockPatch {
                retry_count: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let updated = repo
            .update("key-1", &LockPatch::status(SyncStatus::Syncing))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, SyncStatus::Syncing);
        assert_eq!(updated.retry_count, 3);
        assert_eq!(updated.acquired_by, "phone");
        assert_eq!(updated.expires_at, created.expires_at);

        // An explicit zero is a value, not "unset"
        let reset = repo
            .update(
                "key-1",
                &LockPatch {
                    retry_count: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reset.retry_count, 0);
        assert_eq!(reset.status, SyncStatus::Syncing);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_lock() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = LockRepository::new(&mut conn);

        let patch = LockPatch::status(SyncStatus::Success);
        assert!(repo.update("key-1", &patch).await.unwrap().is_none());
        assert!(!repo.delete("key-1").await.unwrap());

        repo.create("key-1", "phone", Duration::minutes(5)).await.unwrap();
        assert!(repo.delete("key-1").await.unwrap());
        assert!(repo.get("key-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_take_over_is_compare_and_swap() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = LockRepository::new(&mut conn);

        let stale = repo.create("key-1", "phone", Duration::minutes(-1)).await.unwrap();

        let first = repo
            .take_over("key-1", stale.acquired_at, "tablet", Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(first.unwrap().acquired_by, "tablet");

        // A second caller that observed the same stale lock loses
        let second = repo
            .take_over("key-1", stale.acquired_at, "laptop", Duration::minutes(5))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_acquire_respects_live_locks() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = LockRepository::new(&mut conn);
        let ttl = Duration::minutes(5);

        let first = repo.acquire("key-1", "phone", ttl).await.unwrap();
        assert!(matches!(first, LockAcquisition::Acquired(_)));

        let blocked = repo.acquire("key-1", "tablet", ttl).await.unwrap();
        match blocked {
            LockAcquisition::Held(lock) => assert_eq!(lock.acquired_by, "phone"),
            other => panic!("expected held lock, got {:?}", other),
        }

        repo.update("key-1", &LockPatch::status(SyncStatus::Success))
            .await
            .unwrap();
        let after = repo.acquire("key-1", "tablet", ttl).await.unwrap();
        match after {
            LockAcquisition::Acquired(lock) => {
                assert_eq!(lock.acquired_by, "tablet");
                assert_eq!(lock.status, SyncStatus::Pending);
            }
            other => panic!("expected acquired lock, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mark_failed_counts_retries() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = LockRepository::new(&mut conn);

        repo.create("key-1", "phone", Duration::minutes(5)).await.unwrap();
        repo.mark_failed("key-1").await.unwrap();
        let failed = repo.mark_failed("key-1").await.unwrap().unwrap();

        assert_eq!(failed.status, SyncStatus::Error);
        assert_eq!(failed.retry_count, 2);
    }
}
