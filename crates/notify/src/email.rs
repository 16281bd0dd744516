//! SMTP email sender via `lettre` with TLS support.
//!
//! Sends the notification to the recipient's registered address.
//! Recipients without an address are skipped, which is not an error.

use std::sync::Arc;
use std::time::Duration;

use adcrm_core::{Channel, Recipient};
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use crate::templating::{TemplateContext, TemplateRenderer};
use crate::traits::{ChannelSender, NotifyError, OutgoingMessage, SendReport};

/// Sends notifications as emails via SMTP.
#[derive(Debug)]
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    subject_template: String,
    body_template: String,
    renderer: Arc<TemplateRenderer>,
}

/// SMTP connection settings for [`EmailSender::from_config`].
#[derive(Debug, Clone)]
pub struct SmtpSettings<'a> {
    pub host: &'a str,
    /// Defaults to 587, or implicit TLS on 465.
    pub port: Option<u16>,
    pub tls: bool,
    /// e.g. `"alerts@example.com"` or `"CRM <alerts@example.com>"`.
    pub from: &'a str,
    /// SMTP login; the connection is unauthenticated without one.
    pub credentials: Option<(&'a str, &'a str)>,
    pub timeout: Duration,
}

impl EmailSender {
    /// Build an `EmailSender` from SMTP settings and message templates.
    pub fn from_config(
        settings: SmtpSettings<'_>,
        subject_template: String,
        body_template: String,
        renderer: Arc<TemplateRenderer>,
    ) -> Result<Self, NotifyError> {
        let from_mailbox: Mailbox = settings
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        for (name, tmpl) in [("subject", &subject_template), ("body", &body_template)] {
            renderer
                .validate(tmpl)
                .map_err(|e| NotifyError::Config(format!("invalid email {name} template: {e}")))?;
        }

        let port = settings.port.unwrap_or(587);
        let host = settings.host;

        // Port 465 uses implicit TLS; everything else uses STARTTLS when TLS is enabled.
        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else if settings.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port)
        };

        if let Some((username, password)) = settings.credentials {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                password.to_string(),
            ));
        }

        let transport = builder.timeout(Some(settings.timeout)).build();

        Ok(Self {
            transport,
            from: from_mailbox,
            subject_template,
            body_template,
            renderer,
        })
    }

    fn build_email(&self, to: Mailbox, ctx: &TemplateContext) -> Result<Message, NotifyError> {
        let subject = self.renderer.render(&self.subject_template, ctx)?;
        let body = self.renderer.render(&self.body_template, ctx)?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body)
            .map_err(|e| NotifyError::Smtp(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &OutgoingMessage,
    ) -> Result<SendReport, NotifyError> {
        let Some(address) = recipient.email_target() else {
            tracing::debug!(
                recipient = recipient.id,
                notification_id = message.notification_id,
                "no email address, skipping"
            );
            return Ok(SendReport::Skipped);
        };

        let to: Mailbox = address
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                NotifyError::InvalidAddress(format!("{address}: {e}"))
            })?;

        let ctx = TemplateContext::new(recipient, message);
        let email = self.build_email(to, &ctx)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        tracing::info!(
            channel = "email",
            recipient = recipient.id,
            notification_id = message.notification_id,
            "notification delivered"
        );

        Ok(SendReport::Sent)
    }
}
