//! Notification record and its enumerations.
//!
//! A [`Notification`] is created once per business event and carries one
//! nullable delivery timestamp per [`Channel`]. Dispatch tasks are the only
//! writers after creation, and each of them stamps exactly one field.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

pub type NotificationId = i64;
pub type UserId = i64;

// ── Category ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Account,
    AdAccount,
    Request,
    Ad,
    Finance,
    System,
    Proxy,
    Page,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Account,
        Category::AdAccount,
        Category::Request,
        Category::Ad,
        Category::Finance,
        Category::System,
        Category::Proxy,
        Category::Page,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Account => "account",
            Category::AdAccount => "ad_account",
            Category::Request => "request",
            Category::Ad => "ad",
            Category::Finance => "finance",
            Category::System => "system",
            Category::Proxy => "proxy",
            Category::Page => "page",
        }
    }

    /// Human-readable heading used in chat and email subjects.
    pub fn title(&self) -> &'static str {
        match self {
            Category::Account => "Account",
            Category::AdAccount => "Ad account",
            Category::Request => "Request",
            Category::Ad => "Ad",
            Category::Finance => "Finance",
            Category::System => "System",
            Category::Proxy => "Proxy",
            Category::Page => "Page",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ModelError::UnknownVariant {
                kind: "category",
                value: s.to_string(),
            })
    }
}

// ── Level ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Info,
        Level::Success,
        Level::Warning,
        Level::Error,
        Level::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Success => "success",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
        }
    }

    /// Emoji prefix for chat messages.
    pub fn icon(&self) -> &'static str {
        match self {
            Level::Info => "ℹ️",
            Level::Success => "✅",
            Level::Warning => "⚠️",
            Level::Error => "❌",
            Level::Critical => "🚨",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| ModelError::UnknownVariant {
                kind: "level",
                value: s.to_string(),
            })
    }
}

// ── Channel ───────────────────────────────────────────────────

/// A delivery medium. Each channel owns one timestamp on the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Chat,
    Email,
    Socket,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Chat, Channel::Email, Channel::Socket];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Chat => "chat",
            Channel::Email => "email",
            Channel::Socket => "socket",
        }
    }

    /// Stable small integer, used to derive per-channel lock keys.
    pub fn index(&self) -> i64 {
        match self {
            Channel::Chat => 0,
            Channel::Email => 1,
            Channel::Socket => 2,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ModelError::UnknownVariant {
                kind: "channel",
                value: s.to_string(),
            })
    }
}

// ── Payload ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

impl KeyboardButton {
    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: Some(url.into()),
            callback_data: None,
        }
    }

    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: None,
            callback_data: Some(data.into()),
        }
    }
}

/// Rows of action buttons attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keyboard(pub Vec<Vec<KeyboardButton>>);

impl Keyboard {
    pub fn rows(&self) -> &[Vec<KeyboardButton>] {
        &self.0
    }

    /// Every button needs a label and exactly one action.
    pub fn validate(&self) -> Result<(), ModelError> {
        for button in self.0.iter().flatten() {
            if button.text.trim().is_empty() {
                return Err(ModelError::InvalidKeyboard(
                    "button text must not be empty".to_string(),
                ));
            }
            if button.url.is_some() == button.callback_data.is_some() {
                return Err(ModelError::InvalidKeyboard(format!(
                    "button '{}' needs exactly one of url or callback_data",
                    button.text
                )));
            }
        }
        Ok(())
    }
}

/// Structured notification content.
///
/// Serialized as a flat JSON object: `message`, optional `keyboard`, and any
/// additional keys the triggering code attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Payload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            keyboard: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.message.trim().is_empty() {
            return Err(ModelError::EmptyMessage);
        }
        if let Some(ref keyboard) = self.keyboard {
            keyboard.validate()?;
        }
        Ok(())
    }

    /// Parse and validate a raw JSON payload.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ModelError> {
        if !value.is_object() {
            return Err(ModelError::PayloadNotObject);
        }
        let has_message = value
            .get("message")
            .and_then(|m| m.as_str())
            .is_some();
        if !has_message {
            return Err(ModelError::EmptyMessage);
        }
        let payload: Payload = serde_json::from_value(value)
            .map_err(|e| ModelError::InvalidKeyboard(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "message": self.message }))
    }
}

// ── Notification ──────────────────────────────────────────────

/// Input for creating a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient: UserId,
    pub level: Level,
    pub category: Category,
    pub payload: Payload,
}

impl NewNotification {
    pub fn new(recipient: UserId, level: Level, category: Category, payload: Payload) -> Self {
        Self {
            recipient,
            level,
            category,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub category: Category,
    pub level: Level,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub chat_sent_at: Option<DateTime<Utc>>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub socket_sent_at: Option<DateTime<Utc>>,
    /// Bumped on every stamp; used for optimistic concurrency checks.
    pub version: i64,
}

impl Notification {
    pub fn from_new(id: NotificationId, new: NewNotification, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            recipient: new.recipient,
            category: new.category,
            level: new.level,
            payload: new.payload,
            created_at,
            chat_sent_at: None,
            email_sent_at: None,
            socket_sent_at: None,
            version: 0,
        }
    }

    pub fn delivered_at(&self, channel: Channel) -> Option<DateTime<Utc>> {
        match channel {
            Channel::Chat => self.chat_sent_at,
            Channel::Email => self.email_sent_at,
            Channel::Socket => self.socket_sent_at,
        }
    }

    pub fn is_delivered(&self, channel: Channel) -> bool {
        self.delivered_at(channel).is_some()
    }

    /// Set the channel timestamp. Returns `false` and leaves the record
    /// untouched if the channel was already stamped.
    pub fn stamp(&mut self, channel: Channel, at: DateTime<Utc>) -> bool {
        let slot = match channel {
            Channel::Chat => &mut self.chat_sent_at,
            Channel::Email => &mut self.email_sent_at,
            Channel::Socket => &mut self.socket_sent_at,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        self.version += 1;
        true
    }

    pub fn message(&self) -> &str {
        &self.payload.message
    }
}

// ── Delivery state ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Retryable,
    Terminal,
}

/// Lifecycle of one channel delivery for one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Attempting,
    Delivered,
    Failed(FailureKind),
}

impl DeliveryState {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            DeliveryState::Delivered | DeliveryState::Failed(FailureKind::Terminal)
        )
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryState::Pending => write!(f, "pending"),
            DeliveryState::Attempting => write!(f, "attempting"),
            DeliveryState::Delivered => write!(f, "delivered"),
            DeliveryState::Failed(FailureKind::Retryable) => write!(f, "failed(retryable)"),
            DeliveryState::Failed(FailureKind::Terminal) => write!(f, "failed(terminal)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Notification {
        Notification::from_new(
            1,
            NewNotification::new(7, Level::Critical, Category::Finance, Payload::new("balance low")),
            Utc::now(),
        )
    }

    #[test]
    fn stamp_sets_once() {
        let mut n = sample();
        let at = Utc::now();
        assert!(n.stamp(Channel::Chat, at));
        assert_eq!(n.chat_sent_at, Some(at));
        assert_eq!(n.version, 1);

        assert!(!n.stamp(Channel::Chat, Utc::now()));
        assert_eq!(n.chat_sent_at, Some(at));
        assert_eq!(n.version, 1);
    }

    #[test]
    fn channels_are_independent() {
        let mut n = sample();
        assert!(n.stamp(Channel::Email, Utc::now()));
        assert!(!n.is_delivered(Channel::Chat));
        assert!(!n.is_delivered(Channel::Socket));
        assert!(n.is_delivered(Channel::Email));
    }

    #[test]
    fn payload_requires_message() {
        assert_eq!(Payload::new("   ").validate(), Err(ModelError::EmptyMessage));
        assert_eq!(
            Payload::from_value(serde_json::json!({ "other": 1 })),
            Err(ModelError::EmptyMessage)
        );
        assert_eq!(
            Payload::from_value(serde_json::json!("text")),
            Err(ModelError::PayloadNotObject)
        );
    }

    #[test]
    fn payload_keeps_extra_keys_flat() {
        let raw = serde_json::json!({
            "message": "Ad account banned",
            "keyboard": [[{ "text": "Open", "url": "https://crm.local/ad-accounts/5" }]],
            "ad_account_id": 5
        });
        let payload = Payload::from_value(raw.clone()).unwrap();
        assert_eq!(payload.message, "Ad account banned");
        assert_eq!(payload.keyboard.as_ref().unwrap().rows().len(), 1);
        assert_eq!(payload.extra.get("ad_account_id"), Some(&serde_json::json!(5)));
        assert_eq!(payload.to_value(), raw);
    }

    #[test]
    fn keyboard_button_needs_one_action() {
        let kb = Keyboard(vec![vec![KeyboardButton {
            text: "Both".to_string(),
            url: Some("https://x".to_string()),
            callback_data: Some("x".to_string()),
        }]]);
        assert!(kb.validate().is_err());

        let kb = Keyboard(vec![vec![
            KeyboardButton::url("Open", "https://x"),
            KeyboardButton::callback("Ack", "ack:1"),
        ]]);
        assert!(kb.validate().is_ok());
    }

    #[test]
    fn enums_parse_from_wire_names() {
        assert_eq!("ad_account".parse::<Category>().unwrap(), Category::AdAccount);
        assert_eq!("critical".parse::<Level>().unwrap(), Level::Critical);
        assert_eq!("socket".parse::<Channel>().unwrap(), Channel::Socket);
        assert!("sms".parse::<Channel>().is_err());
        assert_eq!(
            serde_json::to_value(Category::AdAccount).unwrap(),
            serde_json::json!("ad_account")
        );
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(DeliveryState::Delivered.is_final());
        assert!(DeliveryState::Failed(FailureKind::Terminal).is_final());
        assert!(!DeliveryState::Failed(FailureKind::Retryable).is_final());
        assert!(!DeliveryState::Attempting.is_final());
    }
}
