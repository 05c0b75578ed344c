//! Notification senders
//!
//! Defines the sender trait and implementations for the supported services.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::types::{NotificationEvent, NotificationPayload};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery failure of a single sender
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{sender} returned {status}: {body}")]
    Status {
        sender: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Notification sender trait
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Whether this sender wants `event`
    fn can_send(&self, event: NotificationEvent) -> bool;

    /// Deliver one notification
    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

async fn check_status(sender: &'static str, response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Status { sender, status, body })
}

/// Discord webhook sender
pub struct DiscordSender {
    client: reqwest::Client,
    webhook_url: String,
    events: Vec<NotificationEvent>,
}

impl DiscordSender {
    pub fn new(client: reqwest::Client, webhook_url: &str, events: &[NotificationEvent]) -> Self {
        Self {
            client,
            webhook_url: webhook_url.to_string(),
            events: events.to_vec(),
        }
    }

    fn color(event: NotificationEvent) -> u32 {
        match event {
            NotificationEvent::Success => 0x57F287,
            NotificationEvent::Failed | NotificationEvent::Error => 0xED4245,
            NotificationEvent::Cancelled => 0xFEE75C,
            NotificationEvent::Started | NotificationEvent::Test => 0x5865F2,
        }
    }
}

#[async_trait]
impl NotificationSender for DiscordSender {
    fn kind(&self) -> &'static str {
        "discord"
    }

    fn can_send(&self, event: NotificationEvent) -> bool {
        event == NotificationEvent::Test || self.events.contains(&event)
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "embeds": [{
                "title": payload.subject,
                "description": payload.message,
                "color": Self::color(payload.event),
                "timestamp": payload.timestamp.to_rfc3339(),
            }]
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .timeout(SEND_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        check_status(self.kind(), response).await
    }
}

/// Telegram bot sender
pub struct TelegramSender {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
    events: Vec<NotificationEvent>,
}

impl TelegramSender {
    pub fn new(
        client: reqwest::Client,
        bot_token: &str,
        chat_id: &str,
        events: &[NotificationEvent],
    ) -> Self {
        Self {
            client,
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            events: events.to_vec(),
        }
    }

    fn build_message(payload: &NotificationPayload) -> String {
        format!(
            "<b>{}</b>\n{}",
            escape_html(&payload.subject),
            escape_html(&payload.message)
        )
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl NotificationSender for TelegramSender {
    fn kind(&self) -> &'static str {
        "telegram"
    }

    fn can_send(&self, event: NotificationEvent) -> bool {
        event == NotificationEvent::Test || self.events.contains(&event)
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": Self::build_message(payload),
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(&url)
            .timeout(SEND_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        check_status(self.kind(), response).await
    }
}

/// ntfy topic sender
pub struct NtfySender {
    client: reqwest::Client,
    topic_url: String,
    events: Vec<NotificationEvent>,
}

impl NtfySender {
    pub fn new(client: reqwest::Client, topic_url: &str, events: &[NotificationEvent]) -> Self {
        Self {
            client,
            topic_url: topic_url.to_string(),
            events: events.to_vec(),
        }
    }
}

#[async_trait]
impl NotificationSender for NtfySender {
    fn kind(&self) -> &'static str {
        "ntfy"
    }

    fn can_send(&self, event: NotificationEvent) -> bool {
        event == NotificationEvent::Test || self.events.contains(&event)
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.topic_url)
            .timeout(SEND_TIMEOUT)
            .header("X-Title", payload.subject.as_str())
            .body(payload.message.clone())
            .send()
            .await?;

        check_status(self.kind(), response).await
    }
}

const NOTIFIARR_URL: &str = "https://notifiarr.com/api/v1/notification/tachi-sync-server";

/// Notifiarr sender, posting to the integration registered for Tachiyomi sync servers
pub struct NotifiarrSender {
    client: reqwest::Client,
    api_key: String,
    events: Vec<NotificationEvent>,
}

impl NotifiarrSender {
    pub fn new(client: reqwest::Client, api_key: &str, events: &[NotificationEvent]) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            events: events.to_vec(),
        }
    }

    /// Notifiarr expects the `SYNC_*` event names
    fn event_name(event: NotificationEvent) -> String {
        match event {
            NotificationEvent::Test => "TEST".to_string(),
            other => format!("SYNC_{}", other.as_str().to_uppercase()),
        }
    }

    fn build_message(payload: &NotificationPayload) -> serde_json::Value {
        let event = Self::event_name(payload.event);
        serde_json::json!({
            "event": event,
            "data": {
                "subject": payload.subject,
                "message": payload.message,
                "event": event,
                "timestamp": payload.timestamp.to_rfc3339(),
            }
        })
    }
}

#[async_trait]
impl NotificationSender for NotifiarrSender {
    fn kind(&self) -> &'static str {
        "notifiarr"
    }

    fn can_send(&self, event: NotificationEvent) -> bool {
        event == NotificationEvent::Test || self.events.contains(&event)
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(NOTIFIARR_URL)
            .timeout(SEND_TIMEOUT)
            .header("X-API-Key", self.api_key.as_str())
            .header(reqwest::header::USER_AGENT, "manga-sync-server")
            .json(&Self::build_message(payload))
            .send()
            .await?;

        check_status(self.kind(), response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telegram_message_is_escaped() {
        let payload = NotificationPayload {
            event: NotificationEvent::Error,
            subject: "Sync Error".to_string(),
            message: "a <b> & c".to_string(),
            timestamp: chrono::Utc::now(),
        };

        assert_eq!(
            TelegramSender::build_message(&payload),
            "<b>Sync Error</b>\na &lt;b&gt; &amp; c"
        );
    }

    #[test]
    fn test_notifiarr_message_shape() {
        let payload = NotificationPayload {
            event: NotificationEvent::Cancelled,
            subject: "Sync Cancelled".to_string(),
            message: "reader on Pixel".to_string(),
            timestamp: chrono::Utc::now(),
        };

        let message = NotifiarrSender::build_message(&payload);
        assert_eq!(message["event"], "SYNC_CANCELLED");
        assert_eq!(message["data"]["event"], "SYNC_CANCELLED");
        assert_eq!(message["data"]["subject"], "Sync Cancelled");
        assert_eq!(message["data"]["message"], "reader on Pixel");
        assert!(message["data"]["timestamp"].is_string());

        assert_eq!(NotifiarrSender::event_name(NotificationEvent::Test), "TEST");
    }

    #[test]
    fn test_senders_filter_events() {
        let sender = NtfySender::new(
            reqwest::Client::new(),
            "https://ntfy.example/topic",
            &[NotificationEvent::Failed],
        );

        assert!(sender.can_send(NotificationEvent::Failed));
        assert!(!sender.can_send(NotificationEvent::Started));
        assert!(sender.can_send(NotificationEvent::Test));
    }
}
