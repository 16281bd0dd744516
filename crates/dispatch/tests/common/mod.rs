//! Shared fixtures for dispatch integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use adcrm_core::{Category, Channel, Level, NewNotification, Notification, Payload, Recipient};
use adcrm_notify::{ChannelSender, NotifyError, OutgoingMessage, SendReport};
use adcrm_store::{MemoryDirectory, MemoryStore, NotificationStore};

/// Scripted sender: fails the first `fail_first` calls, then succeeds.
pub struct ScriptedSender {
    pub channel: Channel,
    pub calls: AtomicU32,
    pub fail_first: u32,
    pub delay: Duration,
}

impl ScriptedSender {
    pub fn ok(channel: Channel) -> Arc<Self> {
        Self::failing(channel, 0)
    }

    pub fn failing(channel: Channel, fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            channel,
            calls: AtomicU32::new(0),
            fail_first,
            delay: Duration::ZERO,
        })
    }

    pub fn slow(channel: Channel, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            channel,
            calls: AtomicU32::new(0),
            fail_first: 0,
            delay,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        _recipient: &Recipient,
        _message: &OutgoingMessage,
    ) -> Result<SendReport, NotifyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n <= self.fail_first {
            return Err(NotifyError::Api("502: Bad Gateway".into()));
        }
        Ok(SendReport::Sent)
    }
}

pub const RECIPIENT: i64 = 42;

pub fn directory(recipient: Recipient) -> Arc<MemoryDirectory> {
    Arc::new(MemoryDirectory::with_recipients([recipient]))
}

pub fn full_recipient() -> Recipient {
    Recipient::new(RECIPIENT)
        .with_username("media_buyer")
        .with_chat_id("100200300")
        .with_email("buyer@example.com")
}

pub async fn seed(store: &MemoryStore) -> Notification {
    store
        .create(NewNotification::new(
            RECIPIENT,
            Level::Critical,
            Category::AdAccount,
            Payload::new("Ad account 1234 was disabled"),
        ))
        .await
        .unwrap()
}
