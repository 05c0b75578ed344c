//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::notify::Notifier;
use crate::sync::SyncCoordinator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    notifier: Arc<Notifier>,
    coordinator: SyncCoordinator,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config, db: SqlitePool, notifier: Arc<Notifier>) -> Self {
        let coordinator = SyncCoordinator::new(
            db.clone(),
            notifier.clone(),
            config.sync.lock_ttl(),
            config.sync.timeout(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                notifier,
                coordinator,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the notification emitter
    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Get the sync coordinator
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.inner.coordinator
    }
}
