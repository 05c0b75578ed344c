//! Notification events and payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sync lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEvent {
    Started,
    Success,
    Failed,
    Error,
    Cancelled,
    /// Manual check that senders are reachable
    Test,
}

impl NotificationEvent {
    /// Events a sync attempt can emit
    pub const SYNC_EVENTS: [NotificationEvent; 5] = [
        NotificationEvent::Started,
        NotificationEvent::Success,
        NotificationEvent::Failed,
        NotificationEvent::Error,
        NotificationEvent::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::Started => "started",
            NotificationEvent::Success => "success",
            NotificationEvent::Failed => "failed",
            NotificationEvent::Error => "error",
            NotificationEvent::Cancelled => "cancelled",
            NotificationEvent::Test => "test",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationEvent {
    type Err = String;

    /// Accepts `started`, `STARTED` and `SYNC_STARTED` alike
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let name = lower.strip_prefix("sync_").unwrap_or(lower.as_str());

        match name {
            "started" => Ok(NotificationEvent::Started),
            "success" => Ok(NotificationEvent::Success),
            "failed" => Ok(NotificationEvent::Failed),
            "error" => Ok(NotificationEvent::Error),
            "cancelled" => Ok(NotificationEvent::Cancelled),
            "test" => Ok(NotificationEvent::Test),
            _ => Err(format!("unknown notification event: {}", s)),
        }
    }
}

impl<'de> Deserialize<'de> for NotificationEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// What a sender delivers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPayload {
    pub event: NotificationEvent,
    pub subject: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    /// Build the payload for a sync event of `account`
    pub fn for_sync(
        event: NotificationEvent,
        account: &str,
        device: Option<&str>,
        detail: Option<&str>,
    ) -> Self {
        let device_part = device
            .filter(|name| !name.is_empty())
            .map(|name| format!(" from device **{}**", name))
            .unwrap_or_default();
        let detail = detail.filter(|d| !d.is_empty());

        let (subject, mut message) = match event {
            NotificationEvent::Started => (
                "Sync Started",
                format!(
                    "A library sync for **{}** has started{}. Please wait for it to complete.",
                    account, device_part
                ),
            ),
            NotificationEvent::Success => (
                "Sync Successful",
                format!(
                    "The library of **{}** was synced successfully{}.",
                    account, device_part
                ),
            ),
            NotificationEvent::Failed => (
                "Sync Failed",
                format!("Syncing the library of **{}** failed{}.", account, device_part),
            ),
            NotificationEvent::Error => (
                "Sync Error",
                format!(
                    "An error occurred while syncing the library of **{}**{}.",
                    account, device_part
                ),
            ),
            NotificationEvent::Cancelled => (
                "Sync Cancelled",
                format!(
                    "The library sync for **{}** was cancelled{}.",
                    account, device_part
                ),
            ),
            NotificationEvent::Test => (
                "Test Notification",
                "Notifications are set up correctly.".to_string(),
            ),
        };

        if let Some(detail) = detail {
            message.push_str(" Error: ");
            message.push_str(detail);
        }

        Self {
            event,
            subject: subject.to_string(),
            message,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing_is_lenient() {
        assert_eq!("started".parse::<NotificationEvent>().unwrap(), NotificationEvent::Started);
        assert_eq!("SYNC_FAILED".parse::<NotificationEvent>().unwrap(), NotificationEvent::Failed);
        assert_eq!(" Cancelled ".parse::<NotificationEvent>().unwrap(), NotificationEvent::Cancelled);
        assert!("finished".parse::<NotificationEvent>().is_err());

        let event: NotificationEvent = serde_json::from_str(r#""sync_success""#).unwrap();
        assert_eq!(event, NotificationEvent::Success);
        assert_eq!(serde_json::to_string(&event).unwrap(), r#""success""#);
    }

    #[test]
    fn test_payload_mentions_account_and_device() {
        let payload = NotificationPayload::for_sync(
            NotificationEvent::Failed,
            "reader",
            Some("Pixel"),
            Some("disk full"),
        );
        assert_eq!(payload.subject, "Sync Failed");
        assert!(payload.message.contains("**reader**"));
        assert!(payload.message.contains("**Pixel**"));
        assert!(payload.message.ends_with("Error: disk full"));

        let bare = NotificationPayload::for_sync(NotificationEvent::Success, "reader", None, None);
        assert!(!bare.message.contains("device"));
    }
}
