//! Opaque library blob storage with ETag preconditions
//!
//! Every accepted write stores a fresh random token; reads never change it.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::{db_now, to_db_time};
use crate::error::Result;

/// Generate a new opaque version token
pub fn new_etag() -> String {
    format!("uuid={}", Uuid::new_v4())
}

/// Repository for raw library blobs
pub struct BlobRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> BlobRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Current ETag of an account's blob
    pub async fn get_etag(&mut self, api_key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT etag FROM sync_blobs WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(row.map(|(etag,)| etag))
    }

    /// Blob bytes together with their ETag
    pub async fn get_blob_and_etag(&mut self, api_key: &str) -> Result<Option<(Vec<u8>, String)>> {
        let row: Option<(Vec<u8>, String)> =
            sqlx::query_as("SELECT data, etag FROM sync_blobs WHERE api_key = ?")
                .bind(api_key)
                .fetch_optional(&mut *self.conn)
                .await?;

        Ok(row)
    }

    /// Create or replace the blob unconditionally
    pub async fn set_blob(&mut self, api_key: &str, data: &[u8]) -> Result<String> {
        let etag = new_etag();

        sqlx::query(
            r#"
            INSERT INTO sync_blobs (api_key, data, etag, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(api_key) DO UPDATE SET
                data = excluded.data,
                etag = excluded.etag,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(api_key)
        .bind(data)
        .bind(&etag)
        .bind(to_db_time(db_now()))
        .execute(&mut *self.conn)
        .await?;

        Ok(etag)
    }

    /// Replace the blob only if its ETag still equals `etag`.
    ///
    /// Returns `None` on mismatch (including when no blob exists). The
    /// compare and the write are one statement.
    pub async fn set_blob_if_match(
        &mut self,
        api_key: &str,
        etag: &str,
        data: &[u8],
    ) -> Result<Option<String>> {
        let new_etag = new_etag();

        let result = sqlx::query(
            r#"
            UPDATE sync_blobs
            SET data = ?, etag = ?, updated_at = ?
            WHERE api_key = ? AND etag = ?
            "#,
        )
        .bind(data)
        .bind(&new_etag)
        .bind(to_db_time(db_now()))
        .bind(api_key)
        .bind(etag)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(etag = %etag, "Blob precondition failed");
            return Ok(None);
        }

        Ok(Some(new_etag))
    }
}
