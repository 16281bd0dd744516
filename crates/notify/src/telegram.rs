//! Telegram Bot API chat sender.
//!
//! Delivers notifications via the Telegram Bot API `sendMessage` endpoint
//! to the recipient's chat id. Messages are rendered with the chat template
//! in HTML parse mode; a payload keyboard becomes an inline keyboard.

use std::sync::Arc;
use std::time::Duration;

use adcrm_core::{Channel, Keyboard, Recipient};

use crate::templating::{TemplateContext, TemplateRenderer};
use crate::traits::{ChannelSender, NotifyError, OutgoingMessage, SendReport};

/// Resolve a `${VAR}` reference to the environment variable's value.
/// Anything else is returned unchanged.
pub fn resolve_env_ref(value: &str) -> Result<String, NotifyError> {
    if !value.starts_with("${") {
        return Ok(value.to_string());
    }
    let var_name = value
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| NotifyError::Config(format!("Malformed env var reference: {value}")))?;
    std::env::var(var_name)
        .map_err(|_| NotifyError::Config(format!("Environment variable '{var_name}' is not set")))
}

/// Build the `reply_markup` object for an inline keyboard.
pub fn inline_keyboard(keyboard: &Keyboard) -> serde_json::Value {
    let rows: Vec<Vec<serde_json::Value>> = keyboard
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| {
                    let mut b = serde_json::json!({ "text": button.text });
                    if let Some(ref url) = button.url {
                        b["url"] = serde_json::Value::String(url.clone());
                    }
                    if let Some(ref data) = button.callback_data {
                        b["callback_data"] = serde_json::Value::String(data.clone());
                    }
                    b
                })
                .collect()
        })
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

/// Sends notifications to a recipient's Telegram chat.
#[derive(Debug)]
pub struct TelegramSender {
    bot_token: String,
    api_base: String,
    parse_mode: Option<String>,
    template: String,
    renderer: Arc<TemplateRenderer>,
    client: reqwest::Client,
}

impl TelegramSender {
    /// Creates a new `TelegramSender` from configuration values.
    ///
    /// `bot_token` may be a `${VAR}` reference. Returns
    /// [`NotifyError::Config`] if the token is empty, the env var is
    /// missing or the template does not parse.
    pub fn from_config(
        bot_token: &str,
        api_base: &str,
        parse_mode: Option<String>,
        template: String,
        renderer: Arc<TemplateRenderer>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let resolved_token = resolve_env_ref(bot_token)?;
        if resolved_token.is_empty() {
            return Err(NotifyError::Config(
                "Telegram bot token must not be empty".to_string(),
            ));
        }

        renderer
            .validate(&template)
            .map_err(|e| NotifyError::Config(format!("invalid chat template: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;

        Ok(Self {
            bot_token: resolved_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            parse_mode: parse_mode.filter(|m| !m.is_empty()),
            template,
            renderer,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    fn request_body(&self, chat_id: &str, text: String, message: &OutgoingMessage) -> serde_json::Value {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(ref mode) = self.parse_mode {
            body["parse_mode"] = serde_json::Value::String(mode.clone());
        }
        if let Some(ref keyboard) = message.keyboard {
            body["reply_markup"] = inline_keyboard(keyboard);
        }
        body
    }
}

/// Map a failed Bot API response to a delivery error.
fn classify_response(status: reqwest::StatusCode, body: &serde_json::Value) -> NotifyError {
    let description = body
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown Telegram API error")
        .to_string();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = body
            .get("parameters")
            .and_then(|p| p.get("retry_after"))
            .and_then(|v| v.as_u64())
            .unwrap_or(30);
        return NotifyError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    // Unknown chat, blocked bot, malformed request: sending again won't help.
    if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::FORBIDDEN {
        return NotifyError::Rejected(description);
    }

    NotifyError::Api(format!("{status}: {description}"))
}

#[async_trait::async_trait]
impl ChannelSender for TelegramSender {
    fn channel(&self) -> Channel {
        Channel::Chat
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &OutgoingMessage,
    ) -> Result<SendReport, NotifyError> {
        let chat_id = recipient.chat_target().ok_or(NotifyError::NoTarget {
            channel: Channel::Chat,
        })?;

        let ctx = TemplateContext::new(recipient, message);
        let text = self.renderer.render(&self.template, &ctx)?;
        let body = self.request_body(chat_id, text, message);

        tracing::debug!(
            chat_id,
            notification_id = message.notification_id,
            parse_mode = ?self.parse_mode,
            "Sending Telegram notification"
        );

        let response = self.client.post(self.endpoint()).json(&body).send().await?;
        let status = response.status();
        let resp_body: serde_json::Value = response.json().await?;

        if resp_body.get("ok") == Some(&serde_json::Value::Bool(true)) {
            tracing::info!(chat_id, notification_id = message.notification_id, "Telegram notification sent");
            return Ok(SendReport::Sent);
        }

        Err(classify_response(status, &resp_body))
    }
}
