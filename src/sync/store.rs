//! Sync state persistence
//!
//! SQLite storage for per-account sync records and library snapshots.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::types::{SyncRecord, SyncStatus};
use crate::db::{db_now, from_db_time, to_db_time};
use crate::error::{AppError, Result};
use crate::library::LibrarySnapshot;

#[derive(sqlx::FromRow)]
struct RecordRow {
    api_key: String,
    last_synced: String,
    status: String,
    device_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn into_record(self) -> Result<SyncRecord> {
        let last_synced = from_db_time(&self.last_synced)?;

        Ok(SyncRecord {
            api_key: self.api_key,
            last_synced,
            last_synced_epoch: last_synced.timestamp(),
            status: self.status.parse().map_err(AppError::Internal)?,
            device_id: self.device_id,
            created_at: from_db_time(&self.created_at)?,
            updated_at: from_db_time(&self.updated_at)?,
        })
    }
}

/// Repository for per-account sync records
pub struct SyncRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SyncRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Get the sync record of an account
    pub async fn get(&mut self, api_key: &str) -> Result<Option<SyncRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT api_key, last_synced, status, device_id, created_at, updated_at
            FROM sync_records
            WHERE api_key = ?
            "#,
        )
        .bind(api_key)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(RecordRow::into_record).transpose()
    }

    /// Create the sync record of an account
    pub async fn create(
        &mut self,
        api_key: &str,
        last_synced: DateTime<Utc>,
        device_id: &str,
    ) -> Result<SyncRecord> {
        let now = to_db_time(db_now());

        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            INSERT INTO sync_records (api_key, last_synced, status, device_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING api_key, last_synced, status, device_id, created_at, updated_at
            "#,
        )
        .bind(api_key)
        .bind(to_db_time(last_synced))
        .bind(SyncStatus::Pending.as_str())
        .bind(device_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *self.conn)
        .await?;

        row.into_record()
    }

    /// Record a finished sync.
    ///
    /// `last_synced` is only written when `Some`; a bookkeeping-only sync
    /// leaves it where it was.
    pub async fn update(
        &mut self,
        api_key: &str,
        status: SyncStatus,
        device_id: &str,
        last_synced: Option<DateTime<Utc>>,
    ) -> Result<SyncRecord> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            UPDATE sync_records
            SET status = ?, device_id = ?, last_synced = COALESCE(?, last_synced), updated_at = ?
            WHERE api_key = ?
            RETURNING api_key, last_synced, status, device_id, created_at, updated_at
            "#,
        )
        .bind(status.as_str())
        .bind(device_id)
        .bind(last_synced.map(to_db_time))
        .bind(to_db_time(db_now()))
        .bind(api_key)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.ok_or_else(|| AppError::NotFound(format!("Sync record for account {}", api_key)))?
            .into_record()
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    data: String,
    created_at: String,
    updated_at: String,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<LibrarySnapshot> {
        let mut snapshot: LibrarySnapshot = serde_json::from_str(&self.data)?;
        snapshot.created_at = Some(from_db_time(&self.created_at)?);
        snapshot.updated_at = Some(from_db_time(&self.updated_at)?);
        Ok(snapshot)
    }
}

/// Repository for stored library snapshots
pub struct SnapshotRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SnapshotRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Get the stored library of an account
    pub async fn get(&mut self, api_key: &str) -> Result<Option<LibrarySnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT data, created_at, updated_at FROM library_snapshots WHERE api_key = ?",
        )
        .bind(api_key)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(SnapshotRow::into_snapshot).transpose()
    }

    /// Store the first library of an account
    pub async fn create(&mut self, api_key: &str, snapshot: &LibrarySnapshot) -> Result<LibrarySnapshot> {
        let data = serde_json::to_string(&Self::strip_times(snapshot))?;
        let now = to_db_time(db_now());

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            INSERT INTO library_snapshots (api_key, data, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING data, created_at, updated_at
            "#,
        )
        .bind(api_key)
        .bind(&data)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *self.conn)
        .await?;

        row.into_snapshot()
    }

    /// Replace the stored library of an account
    pub async fn update(&mut self, api_key: &str, snapshot: &LibrarySnapshot) -> Result<LibrarySnapshot> {
        let data = serde_json::to_string(&Self::strip_times(snapshot))?;

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            UPDATE library_snapshots
            SET data = ?, updated_at = ?
            WHERE api_key = ?
            RETURNING data, created_at, updated_at
            "#,
        )
        .bind(&data)
        .bind(to_db_time(db_now()))
        .bind(api_key)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.ok_or_else(|| AppError::NotFound(format!("Library for account {}", api_key)))?
            .into_snapshot()
    }

    // Row columns own the timestamps
    fn strip_times(snapshot: &LibrarySnapshot) -> LibrarySnapshot {
        LibrarySnapshot {
            created_at: None,
            updated_at: None,
            ..snapshot.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, AccountRepository};
    use crate::library::MangaEntry;

    fn library(url: &str) -> LibrarySnapshot {
        LibrarySnapshot {
            manga: vec![MangaEntry {
                url: url.to_string(),
                title: "Title".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_record_update_keeps_last_synced_when_absent() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        AccountRepository::new(&mut conn).store("user", "key-1").await.unwrap();

        let mut repo = SyncRepository::new(&mut conn);
        assert!(repo.get("key-1").await.unwrap().is_none());

        let seeded = db_now() - chrono::Duration::hours(1);
        let created = repo.create("key-1", seeded, "device-a").await.unwrap();
        assert_eq!(created.last_synced, seeded);
        assert_eq!(created.status, SyncStatus::Pending);

        let bookkeeping = repo
            .update("key-1", SyncStatus::Success, "device-b", None)
            .await
            .unwrap();
        assert_eq!(bookkeeping.last_synced, seeded);
        assert_eq!(bookkeeping.device_id.as_deref(), Some("device-b"));

        let advanced = db_now();
        let synced = repo
            .update("key-1", SyncStatus::Success, "device-b", Some(advanced))
            .await
            .unwrap();
        assert_eq!(synced.last_synced, advanced);
        assert_eq!(synced.last_synced_epoch, advanced.timestamp());
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let result = SyncRepository::new(&mut conn)
            .update("missing", SyncStatus::Success, "device-a", None)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_snapshot_create_and_replace() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        AccountRepository::new(&mut conn).store("user", "key-1").await.unwrap();

        let mut repo = SnapshotRepository::new(&mut conn);
        assert!(repo.get("key-1").await.unwrap().is_none());

        let created = repo.create("key-1", &library("/a")).await.unwrap();
        assert!(created.find_manga("/a").is_some());
        assert!(created.created_at.is_some());

        let replaced = repo.update("key-1", &library("/b")).await.unwrap();
        assert!(replaced.find_manga("/a").is_none());
        assert_eq!(replaced.created_at, created.created_at);

        let stored = repo.get("key-1").await.unwrap().unwrap();
        assert_eq!(stored, replaced);
    }
}
