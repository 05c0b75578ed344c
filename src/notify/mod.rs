//! Sync lifecycle notifications
//!
//! Delivery is best-effort: senders run on background tasks and their
//! failures never reach the sync that triggered them.
//!
//! Supported services:
//! - Discord webhooks
//! - Notifiarr
//! - Telegram bots
//! - ntfy topics

mod sender;
mod service;
mod types;

pub use sender::{
    DiscordSender, NotifiarrSender, NotificationSender, NotifyError, NtfySender, TelegramSender,
};
pub use service::Notifier;
pub use types::{NotificationEvent, NotificationPayload};

#[cfg(test)]
pub(crate) use service::testing;
