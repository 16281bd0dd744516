//! Per-channel delivery tasks.
//!
//! One [`DeliveryTask`] exists per channel. An attempt resolves the
//! recipient, leases the channel of the notification, skips the send when
//! the timestamp is already set, and otherwise sends through the channel
//! adapter and stamps on success. The
//! lease is held across the send, so two attempts racing on the same
//! notification and channel send at most once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use adcrm_core::{Channel, DeliveryState, NotificationId};
use adcrm_notify::{ChannelSender, NotifyError, OutgoingMessage, SendReport, SenderRegistry};
use adcrm_queue::{TaskEnvelope, TaskError, TaskHandler, TaskRegistry};
use adcrm_store::{NotificationStore, RecipientDirectory, StoreError};

use crate::error::DeliveryError;

pub const SEND_CHAT: &str = "notifications.send_chat";
pub const SEND_EMAIL: &str = "notifications.send_email";
pub const SEND_SOCKET: &str = "notifications.send_socket";

/// Argument key carrying the notification id.
pub const NOTIFICATION_ID_ARG: &str = "notification_id";

pub fn task_name(channel: Channel) -> &'static str {
    match channel {
        Channel::Chat => SEND_CHAT,
        Channel::Email => SEND_EMAIL,
        Channel::Socket => SEND_SOCKET,
    }
}

pub fn channel_for_task(name: &str) -> Option<Channel> {
    Channel::ALL.into_iter().find(|c| task_name(*c) == name)
}

pub fn task_args(id: NotificationId) -> serde_json::Value {
    serde_json::json!({ "notification_id": id })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Sent and stamped at the given time.
    Delivered(DateTime<Utc>),
    /// The channel was already stamped; nothing was sent.
    AlreadyDelivered,
    /// The adapter had nothing to send for this recipient; left unstamped.
    NothingToDo,
}

impl DeliveryOutcome {
    pub fn state(&self) -> DeliveryState {
        match self {
            DeliveryOutcome::Delivered(_) | DeliveryOutcome::AlreadyDelivered => {
                DeliveryState::Delivered
            }
            DeliveryOutcome::NothingToDo => DeliveryState::Pending,
        }
    }
}

pub struct DeliveryTask {
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn RecipientDirectory>,
    sender: Arc<dyn ChannelSender>,
    send_timeout: Duration,
}

impl DeliveryTask {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn RecipientDirectory>,
        sender: Arc<dyn ChannelSender>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            sender,
            send_timeout,
        }
    }

    pub fn channel(&self) -> Channel {
        self.sender.channel()
    }

    /// Run one delivery attempt for notification `id`.
    ///
    /// The recipient is resolved before the lease is taken. A PostgreSQL
    /// lease pins a pooled connection, and a lookup made while holding it
    /// would need a second one.
    pub async fn deliver(&self, id: NotificationId) -> Result<DeliveryOutcome, DeliveryError> {
        let channel = self.channel();
        let current = self.store.get(id).await?;
        if current.is_delivered(channel) {
            debug!(notification_id = id, %channel, "already delivered, skipping send");
            return Ok(DeliveryOutcome::AlreadyDelivered);
        }

        let recipient_id = current.recipient;
        let recipient = self
            .directory
            .lookup(recipient_id)
            .await?
            .ok_or(StoreError::RecipientNotFound(recipient_id))?;

        let lease = self.store.lease(id, channel).await?;
        if lease.notification().is_delivered(channel) {
            debug!(notification_id = id, %channel, "delivered by a concurrent attempt, skipping send");
            lease.release().await?;
            return Ok(DeliveryOutcome::AlreadyDelivered);
        }

        let message = OutgoingMessage::from_notification(lease.notification());
        debug!(notification_id = id, %channel, state = %DeliveryState::Attempting, "sending");
        let report = tokio::time::timeout(self.send_timeout, self.sender.send(&recipient, &message))
            .await
            .map_err(|_| NotifyError::Timeout(self.send_timeout))??;

        match report {
            SendReport::Sent => {
                let at = Utc::now();
                match lease.mark_delivered(at).await {
                    Ok(_) => Ok(DeliveryOutcome::Delivered(at)),
                    Err(StoreError::AlreadyDelivered { .. }) => {
                        warn!(notification_id = id, %channel, "stamp found already set after send");
                        Ok(DeliveryOutcome::AlreadyDelivered)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            SendReport::Skipped => {
                lease.release().await?;
                Ok(DeliveryOutcome::NothingToDo)
            }
        }
    }
}

#[async_trait]
impl TaskHandler for DeliveryTask {
    async fn handle(&self, task: &TaskEnvelope) -> Result<(), TaskError> {
        let id = task
            .arg_i64(NOTIFICATION_ID_ARG)
            .map_err(|e| TaskError::Terminal(e.to_string()))?;
        let channel = self.channel();

        match self.deliver(id).await {
            Ok(outcome) => {
                info!(
                    notification_id = id,
                    %channel,
                    attempt = task.attempt,
                    state = %outcome.state(),
                    ?outcome,
                    "delivery finished"
                );
                Ok(())
            }
            Err(e) => {
                debug!(
                    notification_id = id,
                    %channel,
                    attempt = task.attempt,
                    state = %e.state(),
                    error = %e,
                    "delivery attempt failed"
                );
                Err(e.into())
            }
        }
    }
}

/// Register one delivery task per configured channel sender.
pub fn delivery_registry(
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn RecipientDirectory>,
    senders: &SenderRegistry,
    send_timeout: Duration,
) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    for channel in senders.channels() {
        if let Some(sender) = senders.get(channel) {
            let task = DeliveryTask::new(store.clone(), directory.clone(), sender, send_timeout);
            registry.register(task_name(channel), Arc::new(task));
        }
    }
    registry
}
