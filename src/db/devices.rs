//! Device registry
//!
//! A device is keyed by the id the client reports for itself, scoped by
//! account. The integer row id stays internal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use super::{db_now, from_db_time, to_db_time};
use crate::error::Result;

/// A registered client device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    #[serde(skip_serializing)]
    pub row_id: i64,
    /// Client-assigned device id
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Device identity as sent by a client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientDevice {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: i64,
    device_id: String,
    name: String,
    created_at: String,
    updated_at: String,
}

impl DeviceRow {
    fn into_device(self) -> Result<Device> {
        Ok(Device {
            row_id: self.id,
            id: self.device_id,
            name: self.name,
            created_at: from_db_time(&self.created_at)?,
            updated_at: from_db_time(&self.updated_at)?,
        })
    }
}

/// Device repository
pub struct DeviceRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> DeviceRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Find a device by its client-assigned id
    pub async fn find(&mut self, api_key: &str, device_id: &str) -> Result<Option<Device>> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, device_id, name, created_at, updated_at
            FROM devices
            WHERE api_key = ? AND device_id = ?
            "#,
        )
        .bind(api_key)
        .bind(device_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(DeviceRow::into_device).transpose()
    }

    /// Register a device
    pub async fn create(&mut self, api_key: &str, device: &ClientDevice) -> Result<Device> {
        let now = to_db_time(db_now());

        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            INSERT INTO devices (api_key, device_id, name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, device_id, name, created_at, updated_at
            "#,
        )
        .bind(api_key)
        .bind(&device.id)
        .bind(device.name.as_deref().unwrap_or_default())
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *self.conn)
        .await?;

        row.into_device()
    }

    /// Refresh a device's name and last-seen time
    pub async fn touch(&mut self, api_key: &str, device: &ClientDevice) -> Result<Option<Device>> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            UPDATE devices
            SET name = COALESCE(?, name), updated_at = ?
            WHERE api_key = ? AND device_id = ?
            RETURNING id, device_id, name, created_at, updated_at
            "#,
        )
        .bind(device.name.as_deref())
        .bind(to_db_time(db_now()))
        .bind(api_key)
        .bind(&device.id)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(DeviceRow::into_device).transpose()
    }

    /// Resolve a device, registering it on first sight
    pub async fn resolve(&mut self, api_key: &str, device: &ClientDevice) -> Result<Device> {
        match self.touch(api_key, device).await? {
            Some(existing) => Ok(existing),
            None => {
                tracing::info!(device_id = %device.id, "Registering new device");
                self.create(api_key, device).await
            }
        }
    }

    /// List an account's devices, most recently seen first
    pub async fn list(&mut self, api_key: &str) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, device_id, name, created_at, updated_at
            FROM devices
            WHERE api_key = ?
            ORDER BY updated_at DESC
            "#,
        )
        .bind(api_key)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(DeviceRow::into_device).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, AccountRepository};

    fn phone(name: Option<&str>) -> ClientDevice {
        ClientDevice {
            id: "device-a".to_string(),
            name: name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_resolve_creates_then_reuses() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        AccountRepository::new(&mut conn).store("user", "key-1").await.unwrap();

        let mut repo = DeviceRepository::new(&mut conn);
        assert!(repo.find("key-1", "device-a").await.unwrap().is_none());

        let created = repo.resolve("key-1", &phone(Some("Phone"))).await.unwrap();
        assert_eq!(created.id, "device-a");
        assert_eq!(created.name, "Phone");

        // No name on a later sync keeps the stored one
        let again = repo.resolve("key-1", &phone(None)).await.unwrap();
        assert_eq!(again.row_id, created.row_id);
        assert_eq!(again.name, "Phone");

        assert_eq!(repo.list("key-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_device_ids_are_scoped_by_account() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        AccountRepository::new(&mut conn).store("one", "key-1").await.unwrap();
        AccountRepository::new(&mut conn).store("two", "key-2").await.unwrap();

        let mut repo = DeviceRepository::new(&mut conn);
        let first = repo.resolve("key-1", &phone(None)).await.unwrap();
        let second = repo.resolve("key-2", &phone(None)).await.unwrap();

        assert_ne!(first.row_id, second.row_id);
        assert_eq!(repo.list("key-1").await.unwrap().len(), 1);
    }
}
