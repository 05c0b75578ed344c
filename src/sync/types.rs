//! Sync data types
//!
//! Defines types for multi-device synchronization including:
//! - Per-account sync records
//! - Advisory sync locks and their sparse patches
//! - Request/response bodies of the sync endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::ClientDevice;
use crate::library::LibrarySnapshot;

/// Status of a sync record or lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Success,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
        }
    }

    /// An attempt in this state may still be running
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Syncing)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "success" => Ok(SyncStatus::Success),
            "error" => Ok(SyncStatus::Error),
            other => Err(format!("unknown sync status: {}", other)),
        }
    }
}

/// Last sync bookkeeping for one account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRecord {
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Time the stored library last took a client's changes
    pub last_synced: DateTime<Utc>,
    pub last_synced_epoch: i64,
    pub status: SyncStatus,
    /// Client id of the device that synced last
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Advisory per-account lock around a sync attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncLock {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub acquired_by: String,
    pub status: SyncStatus,
    pub retry_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether another holder must stay away from this lock right now
    pub fn blocks(&self, holder: &str, now: DateTime<Utc>) -> bool {
        self.acquired_by != holder && self.status.is_active() && !self.is_expired(now)
    }
}

/// Sparse update of a lock: only fields that are `Some` are written
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LockPatch {
    #[serde(default)]
    pub acquired_by: Option<String>,
    #[serde(default)]
    pub status: Option<SyncStatus>,
    #[serde(default)]
    pub retry_count: Option<i64>,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acquired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockPatch {
    pub fn status(status: SyncStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == LockPatch::default()
    }
}

/// Request to create a lock
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLockRequest {
    pub acquired_by: String,
}

/// Client-side sync metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSyncMeta {
    /// Time of the client's last local change, seconds since the epoch
    #[serde(default)]
    pub last_synced_epoch: Option<i64>,
}

/// Request to sync a library snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct SyncDataRequest {
    #[serde(default)]
    pub sync: ClientSyncMeta,
    #[serde(default)]
    pub backup: LibrarySnapshot,
    pub device: ClientDevice,
}

/// Result of a sync transaction
#[derive(Debug, Clone, Serialize)]
pub struct SyncDataResponse {
    pub sync: SyncRecord,
    /// The merged library, present only when the client must reconcile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<LibrarySnapshot>,
    pub update_required: bool,
}

/// A lifecycle event reported by a device
#[derive(Debug, Clone, Deserialize)]
pub struct EventReport {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
