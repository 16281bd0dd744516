//! Channel sender assembly from worker configuration.

use std::sync::Arc;

use tracing::{info, warn};

use adcrm_core::Config;
use adcrm_notify::{
    EmailSender, GroupHub, MessageTemplates, NotifyError, SenderRegistry, SmtpSettings,
    SocketBroadcaster, TelegramSender, TemplateRenderer,
};

/// Build a sender for every channel the configuration enables.
///
/// The socket channel is always available. Chat needs a bot token and email
/// needs an SMTP host; a channel without its settings is left out and its
/// tasks fail as unregistered.
pub fn build_senders(
    config: &Config,
    templates: &MessageTemplates,
    hub: Arc<GroupHub>,
) -> Result<SenderRegistry, NotifyError> {
    let renderer = Arc::new(TemplateRenderer::new());
    renderer.validate_all(templates)?;
    let timeout = config.dispatch.send_timeout();

    let mut registry = SenderRegistry::new();
    registry.register(Arc::new(SocketBroadcaster::new(hub)));

    match config.telegram.bot_token.as_deref() {
        Some(token) => {
            let sender = TelegramSender::from_config(
                token,
                &config.telegram.api_base,
                Some(config.telegram.parse_mode.clone()),
                templates.chat.clone(),
                renderer.clone(),
                timeout,
            )?;
            registry.register(Arc::new(sender));
            info!(api_base = %config.telegram.api_base, "chat channel enabled");
        }
        None => warn!("TELEGRAM_BOT_TOKEN not set, chat channel disabled"),
    }

    match config.smtp.host.as_deref() {
        Some(host) => {
            let settings = SmtpSettings {
                host,
                port: config.smtp.port,
                tls: config.smtp.tls,
                from: &config.smtp.from,
                credentials: config.smtp.credentials(),
                timeout,
            };
            let sender = EmailSender::from_config(
                settings,
                templates.email_subject.clone(),
                templates.email_body.clone(),
                renderer,
            )?;
            registry.register(Arc::new(sender));
            info!(host, "email channel enabled");
        }
        None => warn!("SMTP_HOST not set, email channel disabled"),
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcrm_core::Channel;

    fn bare_config() -> Config {
        let mut config = Config::for_profile("ADCRM_SENDERS_TEST_UNSET");
        config.telegram.bot_token = None;
        config.smtp.host = None;
        config
    }

    #[test]
    fn socket_is_always_enabled() {
        let registry =
            build_senders(&bare_config(), &MessageTemplates::default(), Arc::new(GroupHub::default()))
                .unwrap();
        assert_eq!(registry.channels(), vec![Channel::Socket]);
    }

    #[tokio::test]
    async fn configured_channels_are_registered() {
        let mut config = bare_config();
        config.telegram.bot_token = Some("123:abc".to_string());
        config.smtp.host = Some("localhost".to_string());
        config.smtp.port = Some(2525);
        config.smtp.tls = false;

        let registry =
            build_senders(&config, &MessageTemplates::default(), Arc::new(GroupHub::default()))
                .unwrap();
        assert_eq!(registry.channels(), Channel::ALL.to_vec());
    }

    #[test]
    fn broken_template_is_a_config_error() {
        let templates = MessageTemplates {
            chat: "{{ message ".to_string(),
            ..MessageTemplates::default()
        };
        let err = build_senders(&bare_config(), &templates, Arc::new(GroupHub::default()))
            .unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));
    }
}
