//! Database module for SQLite persistence
//!
//! Holds accounts and devices; sync state lives in `crate::sync`.
//! Repositories borrow a `SqliteConnection`, so the same code runs on a
//! pooled connection or inside a transaction.

mod accounts;
mod devices;
mod schema;

pub use accounts::*;
pub use devices::*;
pub use schema::*;

use chrono::{DateTime, Datelike, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::{AppError, Result};

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    initialize_schema(&pool).await?;

    Ok(pool)
}

/// Format a timestamp the way every table stores it.
///
/// Fixed microsecond precision keeps the text stable across a
/// parse/format round trip, which compare-and-swap updates rely on.
pub fn to_db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Whether `time` survives a `to_db_time` / `from_db_time` round trip.
///
/// RFC 3339 only has room for four-digit years.
pub fn is_db_time(time: DateTime<Utc>) -> bool {
    (0..=9999).contains(&time.year())
}

/// Parse a stored timestamp
pub fn from_db_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(format!("Corrupt timestamp {:?}: {}", value, e)))
}

/// Current time truncated to the stored precision
pub fn db_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    initialize_schema(&pool).await.unwrap();
    pool
}
