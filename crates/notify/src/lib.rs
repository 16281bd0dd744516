//! Delivery channel adapters for CRM notifications.
//!
//! This crate provides:
//! - `ChannelSender` trait for pluggable delivery channels
//! - Telegram chat, SMTP email and socket-group implementations
//! - Minijinja template rendering for chat text and emails
//! - `SenderRegistry` mapping each channel to its configured sender

pub mod email;
pub mod registry;
pub mod socket;
pub mod telegram;
pub mod templating;
pub mod traits;

pub use email::{EmailSender, SmtpSettings};
pub use registry::SenderRegistry;
pub use socket::{GroupHub, SocketBroadcaster};
pub use telegram::TelegramSender;
pub use templating::{MessageTemplates, TemplateRenderer};
pub use traits::{ChannelSender, NotifyError, OutgoingMessage, SendReport};
