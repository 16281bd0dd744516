//! Channel sender trait definition and shared error types.

use std::time::Duration;

use adcrm_core::{Category, Channel, Keyboard, Level, Notification, NotificationId, Recipient};

/// Errors that can occur during channel delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Recipient has no {channel} target")]
    NoTarget { channel: Channel },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Rejected by provider: {0}")]
    Rejected(String),

    #[error("Provider error: {0}")]
    Api(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
}

impl NotifyError {
    /// Conditions that will not change by sending again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotifyError::NoTarget { .. }
                | NotifyError::InvalidAddress(_)
                | NotifyError::Rejected(_)
                | NotifyError::Template(_)
                | NotifyError::Config(_)
        )
    }
}

/// A notification rendered down to what a channel needs to send it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OutgoingMessage {
    pub notification_id: NotificationId,
    pub level: Level,
    pub category: Category,
    pub message: String,
    pub keyboard: Option<Keyboard>,
    /// Additional payload keys supplied by the triggering code.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OutgoingMessage {
    pub fn from_notification(notification: &Notification) -> Self {
        Self {
            notification_id: notification.id,
            level: notification.level,
            category: notification.category,
            message: notification.payload.message.clone(),
            keyboard: notification.payload.keyboard.clone(),
            extra: notification.payload.extra.clone(),
        }
    }
}

/// What a sender did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendReport {
    /// Handed to the provider.
    Sent,
    /// Nothing to send for this recipient; not an error.
    Skipped,
}

/// Trait for delivery channel implementations.
#[async_trait::async_trait]
pub trait ChannelSender: Send + Sync {
    /// The channel whose timestamp a successful send stamps.
    fn channel(&self) -> Channel;

    /// Deliver one message to one recipient.
    async fn send(
        &self,
        recipient: &Recipient,
        message: &OutgoingMessage,
    ) -> Result<SendReport, NotifyError>;
}
