//! Minijinja template rendering for notification messages.
//!
//! Chat text, email subject and email body are each rendered from a template
//! string with access to the notification level, category, message and the
//! recipient's display name.
//!
//! Templates are arbitrary strings (not pre-registered), so a fresh
//! [`minijinja::Environment`] is created per render call.

use adcrm_core::Recipient;

use crate::traits::{NotifyError, OutgoingMessage};

pub const DEFAULT_CHAT_TEMPLATE: &str =
    "{{ level_icon }} <b>{{ category_title }}</b>\n\n{{ message | html_escape }}";

pub const DEFAULT_EMAIL_SUBJECT_TEMPLATE: &str = "[{{ level | upper }}] {{ category_title }}";

pub const DEFAULT_EMAIL_BODY_TEMPLATE: &str =
    "Hello {{ recipient_name }},\n\n{{ message }}\n\n-- \nCRM notifications";

/// Context data available to notification templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateContext {
    pub notification_id: i64,
    /// Level wire name, e.g. `"critical"`.
    pub level: String,
    pub level_icon: String,
    /// Category wire name, e.g. `"ad_account"`.
    pub category: String,
    pub category_title: String,
    pub message: String,
    pub recipient_name: String,
    /// Current timestamp in ISO 8601 format.
    pub now: String,
}

impl TemplateContext {
    pub fn new(recipient: &Recipient, message: &OutgoingMessage) -> Self {
        Self {
            notification_id: message.notification_id,
            level: message.level.as_str().to_string(),
            level_icon: message.level.icon().to_string(),
            category: message.category.as_str().to_string(),
            category_title: message.category.title().to_string(),
            message: message.message.clone(),
            recipient_name: recipient.display_name(),
            now: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Template strings used by the chat and email senders.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    pub chat: String,
    pub email_subject: String,
    pub email_body: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            chat: DEFAULT_CHAT_TEMPLATE.to_string(),
            email_subject: DEFAULT_EMAIL_SUBJECT_TEMPLATE.to_string(),
            email_body: DEFAULT_EMAIL_BODY_TEMPLATE.to_string(),
        }
    }
}

/// Renders notification templates using minijinja.
#[derive(Debug)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    /// Create a new template renderer.
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Build a configured minijinja environment with custom filters.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();

        env.add_filter("html_escape", html_escape_filter);

        // `lower` and `upper` are built-in with the "builtins" feature,
        // but we register explicit versions to guarantee availability.
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);

        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &TemplateContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Validate that a template string parses without errors.
    ///
    /// This does not evaluate the template, it only checks syntax.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }

    /// Validate every template of a set, naming the failing one.
    pub fn validate_all(&self, templates: &MessageTemplates) -> Result<(), NotifyError> {
        for (name, tmpl) in [
            ("chat", &templates.chat),
            ("email_subject", &templates.email_subject),
            ("email_body", &templates.email_body),
        ] {
            self.validate(tmpl)
                .map_err(|e| NotifyError::Config(format!("invalid {name} template: {e}")))?;
        }
        Ok(())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn html_escape_filter(value: String) -> String {
    escape_html(&value)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}
