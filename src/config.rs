//! Configuration management for the manga sync server

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::notify::NotificationEvent;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub notifications: NotificationConfig,
    /// API keys seeded into the database at startup
    pub api_keys: Vec<ApiKeySeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub strategy: SyncStrategy,
    /// How long an acquired sync lock stays valid
    pub lock_ttl_secs: i64,
    /// Deadline for one granular sync transaction
    pub timeout_secs: u64,
}

impl SyncConfig {
    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which synchronization path a deployment serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Per-entity merge with device tracking (`/api/sync/data`)
    Merge,
    /// Opaque blob exchange under ETag preconditions (`/api/sync/content`)
    Blob,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationConfig {
    pub events: Vec<NotificationEvent>,
    pub discord_webhook: Option<String>,
    pub telegram: Option<TelegramConfig>,
    pub notifiarr_api_key: Option<String>,
    pub ntfy_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiKeySeed {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("REQUEST_TIMEOUT_SECS ({request}) must be longer than SYNC_TIMEOUT_SECS ({sync})")]
    TimeoutOrder { request: u64, sync: u64 },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8282,
                request_timeout_secs: 120,
            },
            database: DatabaseConfig {
                url: "sqlite:./mangasync.db".to_string(),
            },
            sync: SyncConfig {
                strategy: SyncStrategy::Merge,
                lock_ttl_secs: 300,
                timeout_secs: 60,
            },
            notifications: NotificationConfig {
                events: NotificationEvent::SYNC_EVENTS.to_vec(),
                ..Default::default()
            },
            api_keys: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let strategy = match env::var("SYNC_STRATEGY") {
            Ok(value) => match value.to_lowercase().as_str() {
                "merge" => SyncStrategy::Merge,
                "blob" => SyncStrategy::Blob,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "SYNC_STRATEGY",
                        value,
                    })
                }
            },
            Err(_) => defaults.sync.strategy,
        };

        let events = match env::var("NOTIFY_EVENTS") {
            Ok(value) => parse_events(&value)?,
            Err(_) => defaults.notifications.events,
        };

        let telegram = match (env::var("TELEGRAM_BOT_TOKEN"), env::var("TELEGRAM_CHAT_ID")) {
            (Ok(bot_token), Ok(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => None,
        };

        let api_keys = match env::var("SYNC_API_KEYS") {
            Ok(value) => parse_api_keys(&value)?,
            Err(_) => Vec::new(),
        };

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
                request_timeout_secs: parse_var(
                    "REQUEST_TIMEOUT_SECS",
                    defaults.server.request_timeout_secs,
                )?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            sync: SyncConfig {
                strategy,
                lock_ttl_secs: parse_var("SYNC_LOCK_TTL_SECS", defaults.sync.lock_ttl_secs)?,
                timeout_secs: parse_var("SYNC_TIMEOUT_SECS", defaults.sync.timeout_secs)?,
            },
            notifications: NotificationConfig {
                events,
                discord_webhook: env::var("DISCORD_WEBHOOK_URL").ok(),
                telegram,
                notifiarr_api_key: env::var("NOTIFIARR_API_KEY").ok().filter(|key| !key.is_empty()),
                ntfy_url: env::var("NTFY_URL").ok(),
            },
            api_keys,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check settings that depend on each other.
    ///
    /// The HTTP timeout drops the handler outright, so it has to outlast the
    /// sync deadline or a sync is cut off before it can record its outcome.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.request_timeout_secs <= self.sync.timeout_secs {
            return Err(ConfigError::TimeoutOrder {
                request: self.server.request_timeout_secs,
                sync: self.sync.timeout_secs,
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

/// Parse `name:key,name:key`
fn parse_api_keys(value: &str) -> Result<Vec<ApiKeySeed>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((name, key)) if !name.is_empty() && !key.is_empty() => Ok(ApiKeySeed {
                name: name.to_string(),
                key: key.to_string(),
            }),
            _ => Err(ConfigError::InvalidValue {
                name: "SYNC_API_KEYS",
                value: entry.to_string(),
            }),
        })
        .collect()
}

fn parse_events(value: &str) -> Result<Vec<NotificationEvent>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry.parse().map_err(|_| ConfigError::InvalidValue {
                name: "NOTIFY_EVENTS",
                value: entry.to_string(),
            })
        })
        .collect()
}
