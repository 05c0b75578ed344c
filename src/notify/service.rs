//! Notification service
//!
//! Fans a payload out to every configured sender on a background task.
//! The sender list is an immutable snapshot; reconfiguring swaps the whole
//! list at once and in-flight deliveries keep the list they started with.

use parking_lot::RwLock;
use std::sync::Arc;

use super::sender::{DiscordSender, NotifiarrSender, NotificationSender, NtfySender, TelegramSender};
use super::types::{NotificationEvent, NotificationPayload};
use crate::config::NotificationConfig;

type SenderList = Arc<[Arc<dyn NotificationSender>]>;

/// Fire-and-forget notification emitter
pub struct Notifier {
    senders: RwLock<SenderList>,
}

impl Notifier {
    pub fn new(senders: Vec<Arc<dyn NotificationSender>>) -> Self {
        Self {
            senders: RwLock::new(senders.into()),
        }
    }

    /// A notifier that drops every event
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    /// Build the senders configured in the environment
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self::new(build_senders(config))
    }

    /// Atomically replace the sender list
    pub fn replace_senders(&self, senders: Vec<Arc<dyn NotificationSender>>) {
        let next: SenderList = senders.into();
        *self.senders.write() = next;
    }

    /// Rebuild the senders from a new configuration
    pub fn reload(&self, config: &NotificationConfig) {
        self.replace_senders(build_senders(config));
    }

    pub fn sender_count(&self) -> usize {
        self.senders.read().len()
    }

    /// Deliver `payload` in the background.
    ///
    /// Never blocks the caller; failures are logged and dropped.
    pub fn send(&self, payload: NotificationPayload) {
        let senders = self.senders.read().clone();
        if senders.is_empty() {
            return;
        }

        tokio::spawn(deliver(senders, payload));
    }

    /// Build and send the payload of a sync event
    pub fn sync_event(
        &self,
        event: NotificationEvent,
        account: &str,
        device: Option<&str>,
        detail: Option<&str>,
    ) {
        self.send(NotificationPayload::for_sync(event, account, device, detail));
    }
}

async fn deliver(senders: SenderList, payload: NotificationPayload) {
    for sender in senders.iter() {
        if !sender.can_send(payload.event) {
            continue;
        }

        match sender.send(&payload).await {
            Ok(()) => tracing::debug!(
                sender = sender.kind(),
                event = %payload.event,
                "Notification sent"
            ),
            Err(e) => tracing::warn!(
                sender = sender.kind(),
                event = %payload.event,
                "Failed to send notification: {}",
                e
            ),
        }
    }
}

fn build_senders(config: &NotificationConfig) -> Vec<Arc<dyn NotificationSender>> {
    let client = reqwest::Client::new();
    let mut senders: Vec<Arc<dyn NotificationSender>> = Vec::new();

    if let Some(url) = &config.discord_webhook {
        senders.push(Arc::new(DiscordSender::new(client.clone(), url, &config.events)));
    }

    if let Some(api_key) = &config.notifiarr_api_key {
        senders.push(Arc::new(NotifiarrSender::new(client.clone(), api_key, &config.events)));
    }

    if let Some(telegram) = &config.telegram {
        senders.push(Arc::new(TelegramSender::new(
            client.clone(),
            &telegram.bot_token,
            &telegram.chat_id,
            &config.events,
        )));
    }

    if let Some(url) = &config.ntfy_url {
        senders.push(Arc::new(NtfySender::new(client, url, &config.events)));
    }

    senders
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::notify::NotifyError;

    /// Sender that forwards every payload into a channel
    pub(crate) struct RecordingSender {
        tx: mpsc::UnboundedSender<NotificationPayload>,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        fn kind(&self) -> &'static str {
            "recording"
        }

        fn can_send(&self, _event: NotificationEvent) -> bool {
            true
        }

        async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
            let _ = self.tx.send(payload.clone());
            Ok(())
        }
    }

    pub(crate) struct Recorded {
        rx: mpsc::UnboundedReceiver<NotificationPayload>,
    }

    impl Recorded {
        /// Wait for the next `count` events
        pub(crate) async fn next(&mut self, count: usize) -> Vec<NotificationEvent> {
            let mut events = Vec::with_capacity(count);
            for _ in 0..count {
                let payload = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                    .await
                    .expect("timed out waiting for notification")
                    .expect("notifier dropped");
                events.push(payload.event);
            }
            events
        }

        /// Assert nothing else arrives shortly
        pub(crate) async fn assert_quiet(&mut self) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(self.rx.try_recv().is_err(), "unexpected notification");
        }
    }

    pub(crate) fn recording_notifier() -> (Arc<Notifier>, Recorded) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(vec![Arc::new(RecordingSender { tx })]);
        (Arc::new(notifier), Recorded { rx })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::recording_notifier;
    use super::*;
    use crate::config::TelegramConfig;

    #[tokio::test]
    async fn test_send_reaches_senders() {
        let (notifier, mut recorded) = recording_notifier();

        notifier.sync_event(NotificationEvent::Started, "reader", None, None);
        notifier.sync_event(NotificationEvent::Success, "reader", None, None);

        assert_eq!(recorded.next(2).await.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_senders_swaps_whole_list() {
        let (notifier, mut recorded) = recording_notifier();
        assert_eq!(notifier.sender_count(), 1);

        notifier.replace_senders(Vec::new());
        assert_eq!(notifier.sender_count(), 0);

        notifier.sync_event(NotificationEvent::Failed, "reader", None, None);
        recorded.assert_quiet().await;
    }

    #[test]
    fn test_from_config_builds_configured_senders() {
        let config = NotificationConfig {
            events: NotificationEvent::SYNC_EVENTS.to_vec(),
            discord_webhook: Some("https://discord.example/webhook".to_string()),
            telegram: Some(TelegramConfig {
                bot_token: "token".to_string(),
                chat_id: "42".to_string(),
            }),
            notifiarr_api_key: Some("notifiarr-key".to_string()),
            ntfy_url: None,
        };

        assert_eq!(Notifier::from_config(&config).sender_count(), 3);
        assert_eq!(Notifier::disabled().sender_count(), 0);
    }

    #[tokio::test]
    async fn test_reload_replaces_running_senders() {
        let (notifier, mut recorded) = recording_notifier();

        let config = NotificationConfig {
            events: vec![NotificationEvent::Failed],
            ntfy_url: Some("https://ntfy.example/topic".to_string()),
            ..Default::default()
        };
        notifier.reload(&config);
        assert_eq!(notifier.sender_count(), 1);

        // The recording sender is gone; nothing reaches it anymore
        notifier.sync_event(NotificationEvent::Started, "reader", None, None);
        recorded.assert_quiet().await;

        notifier.reload(&NotificationConfig::default());
        assert_eq!(notifier.sender_count(), 0);
    }
}
