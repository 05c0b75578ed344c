//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Accounts, one per API key
CREATE TABLE IF NOT EXISTS api_keys (
    key TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Devices, identified by the id the client reports for itself
CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    api_key TEXT NOT NULL REFERENCES api_keys(key) ON DELETE CASCADE,
    device_id TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE(api_key, device_id)
);

-- Merged library snapshot per account (JSON)
CREATE TABLE IF NOT EXISTS library_snapshots (
    api_key TEXT PRIMARY KEY REFERENCES api_keys(key) ON DELETE CASCADE,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Last sync bookkeeping per account
CREATE TABLE IF NOT EXISTS sync_records (
    api_key TEXT PRIMARY KEY REFERENCES api_keys(key) ON DELETE CASCADE,
    last_synced TEXT NOT NULL,
    status TEXT NOT NULL,
    device_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Advisory sync lock, at most one per account
CREATE TABLE IF NOT EXISTS sync_locks (
    api_key TEXT PRIMARY KEY REFERENCES api_keys(key) ON DELETE CASCADE,
    acquired_by TEXT NOT NULL,
    status TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_synced TEXT,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Opaque library blob with its version token
CREATE TABLE IF NOT EXISTS sync_blobs (
    api_key TEXT PRIMARY KEY REFERENCES api_keys(key) ON DELETE CASCADE,
    data BLOB NOT NULL,
    etag TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_devices_api_key ON devices(api_key);
"#;
