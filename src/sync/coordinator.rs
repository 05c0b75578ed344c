//! Sync coordinator
//!
//! Runs one sync attempt for an account:
//! take the lock, resolve device, record and library, merge, persist, then
//! release the lock and report the outcome. Resolve and persist share one
//! transaction, so a failure or an elapsed deadline commits nothing.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Sqlite, SqlitePool};
use std::sync::Arc;

use super::lock::{LockAcquisition, LockRepository};
use super::store::{SnapshotRepository, SyncRepository};
use super::types::{LockPatch, SyncDataRequest, SyncDataResponse, SyncLock, SyncStatus};
use crate::db::{db_now, is_db_time, Account, DeviceRepository};
use crate::error::{AppError, Result};
use crate::library::merge_with_stats;
use crate::notify::{NotificationEvent, Notifier};

/// Outcome of a sync call that did not fail
#[derive(Debug, Clone)]
pub enum SyncAttempt {
    Synced(SyncDataResponse),
    /// Another device holds a live lock; nothing was read or written
    LockHeld(SyncLock),
}

/// Orchestrates granular library syncs
#[derive(Clone)]
pub struct SyncCoordinator {
    pool: SqlitePool,
    notifier: Arc<Notifier>,
    lock_ttl: Duration,
    timeout: std::time::Duration,
}

impl SyncCoordinator {
    pub fn new(
        pool: SqlitePool,
        notifier: Arc<Notifier>,
        lock_ttl: Duration,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            pool,
            notifier,
            lock_ttl,
            timeout,
        }
    }

    /// Sync a device's library snapshot into the account's stored one
    pub async fn sync_data(&self, account: &Account, mut request: SyncDataRequest) -> Result<SyncAttempt> {
        if request.device.id.trim().is_empty() {
            return Err(AppError::Validation("device.id is required".to_string()));
        }

        // A claim that cannot be stored counts as the oldest possible one
        if let Some(epoch) = request.sync.last_synced_epoch {
            if claim_time(epoch).is_none() {
                tracing::warn!(
                    account = %account.name,
                    device_id = %request.device.id,
                    epoch,
                    "Ignoring out-of-range sync claim"
                );
                request.sync.last_synced_epoch = None;
            }
        }

        let device_name = request.device.name.clone();
        let mut conn = self.pool.acquire().await?;

        match LockRepository::new(&mut conn)
            .acquire(&account.key, &request.device.id, self.lock_ttl)
            .await?
        {
            LockAcquisition::Acquired(_) => {}
            LockAcquisition::Held(lock) => {
                tracing::info!(
                    account = %account.name,
                    device_id = %request.device.id,
                    held_by = %lock.acquired_by,
                    "Sync rejected, lock held by another device"
                );
                return Ok(SyncAttempt::LockHeld(lock));
            }
        }

        self.notify(NotificationEvent::Started, account, device_name.as_deref(), None);

        let outcome = match LockRepository::new(&mut conn)
            .update(&account.key, &LockPatch::status(SyncStatus::Syncing))
            .await
        {
            Ok(_) => tokio::time::timeout(self.timeout, run_sync(&mut conn, account, &request)).await,
            Err(e) => Ok(Err(e)),
        };

        match outcome {
            Ok(Ok(response)) => {
                let patch = LockPatch {
                    status: Some(SyncStatus::Success),
                    retry_count: Some(0),
                    last_synced: Some(response.sync.last_synced),
                    ..Default::default()
                };
                if let Err(e) = LockRepository::new(&mut conn).update(&account.key, &patch).await {
                    tracing::warn!(account = %account.name, "Failed to release sync lock: {}", e);
                }

                tracing::info!(
                    account = %account.name,
                    device_id = %request.device.id,
                    update_required = response.update_required,
                    "Sync completed"
                );
                self.notify(NotificationEvent::Success, account, device_name.as_deref(), None);

                Ok(SyncAttempt::Synced(response))
            }
            Ok(Err(e)) => {
                self.mark_failed(&mut conn, account).await;

                let event = if e.is_persistence() {
                    NotificationEvent::Failed
                } else {
                    NotificationEvent::Error
                };
                tracing::error!(account = %account.name, "Sync failed: {}", e);
                self.notify(event, account, device_name.as_deref(), Some(&e.to_string()));

                Err(e)
            }
            Err(_) => {
                // The cancelled transaction may still be open on this connection
                if let Err(e) = conn.close().await {
                    tracing::warn!("Failed to close cancelled sync connection: {}", e);
                }
                match self.pool.acquire().await {
                    Ok(mut fresh) => self.mark_failed(&mut fresh, account).await,
                    Err(e) => tracing::warn!(
                        account = %account.name,
                        "Failed to record cancelled sync: {}",
                        e
                    ),
                }

                let message = format!("sync did not finish within {:?}", self.timeout);
                self.notify(
                    NotificationEvent::Cancelled,
                    account,
                    device_name.as_deref(),
                    Some(&message),
                );

                Err(AppError::Timeout(message))
            }
        }
    }

    async fn mark_failed(&self, conn: &mut PoolConnection<Sqlite>, account: &Account) {
        match LockRepository::new(conn).mark_failed(&account.key).await {
            Ok(Some(lock)) => tracing::debug!(
                account = %account.name,
                retry_count = lock.retry_count,
                "Sync lock left in error state"
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(account = %account.name, "Failed to mark sync lock: {}", e),
        }
    }

    fn notify(
        &self,
        event: NotificationEvent,
        account: &Account,
        device: Option<&str>,
        detail: Option<&str>,
    ) {
        self.notifier.sync_event(event, &account.name, device, detail);
    }
}

/// The stored time of a client claim, if it fits the timestamp columns
fn claim_time(epoch: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(epoch, 0).single().filter(|time| is_db_time(*time))
}

async fn run_sync(
    conn: &mut PoolConnection<Sqlite>,
    account: &Account,
    request: &SyncDataRequest,
) -> Result<SyncDataResponse> {
    let mut tx = conn.begin().await?;
    let now = db_now();

    let device = DeviceRepository::new(&mut tx)
        .resolve(&account.key, &request.device)
        .await?;

    let claim = request.sync.last_synced_epoch;

    let mut records = SyncRepository::new(&mut tx);
    let record = match records.get(&account.key).await? {
        Some(record) => record,
        None => {
            let seed = claim.and_then(claim_time).unwrap_or(now);
            records.create(&account.key, seed, &device.id).await?
        }
    };

    let mut snapshots = SnapshotRepository::new(&mut tx);
    let stored = match snapshots.get(&account.key).await? {
        Some(stored) => stored,
        None => {
            tracing::info!(account = %account.name, "Storing first library snapshot");
            snapshots.create(&account.key, &request.backup).await?
        }
    };

    let update_required = claim.map_or(false, |epoch| epoch > record.last_synced_epoch);

    let response = if update_required {
        let (merged, stats) = merge_with_stats(&request.backup, &stored);
        tracing::debug!(
            account = %account.name,
            manga_added = stats.manga_added,
            manga_updated = stats.manga_updated,
            chapters_updated = stats.chapters_updated,
            duplicates_collapsed = stats.duplicates_collapsed,
            "Merged client library"
        );

        let saved = SnapshotRepository::new(&mut tx)
            .update(&account.key, &merged)
            .await?;
        let record = SyncRepository::new(&mut tx)
            .update(&account.key, SyncStatus::Success, &device.id, Some(now))
            .await?;

        SyncDataResponse {
            sync: record,
            backup: Some(saved),
            update_required: true,
        }
    } else {
        let record = SyncRepository::new(&mut tx)
            .update(&account.key, SyncStatus::Success, &device.id, None)
            .await?;

        SyncDataResponse {
            sync: record,
            backup: None,
            update_required: false,
        }
    };

    tx.commit().await?;

    Ok(response)
}
