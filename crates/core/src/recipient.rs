use serde::{Deserialize, Serialize};

use crate::notification::UserId;

/// Delivery targets of a CRM user, as known to the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: UserId,
    pub username: Option<String>,
    /// Telegram chat identifier.
    pub chat_id: Option<String>,
    pub email: Option<String>,
}

impl Recipient {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            username: None,
            chat_id: None,
            email: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Chat id, treating blank values as absent.
    pub fn chat_target(&self) -> Option<&str> {
        self.chat_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Email address, treating blank values as absent.
    pub fn email_target(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Name for greetings; falls back to `user <id>`.
    pub fn display_name(&self) -> String {
        match self.username.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("user {}", self.id),
        }
    }
}
