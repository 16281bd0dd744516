//! Entry point for business code that raises notifications.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use adcrm_core::{Category, Channel, Level, NewNotification, Notification, Payload, UserId};
use adcrm_queue::TaskBroker;
use adcrm_store::{NotificationStore, StoreError};

use crate::tasks::{task_args, task_name};

/// Channels a notification should be dispatched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Channel>", into = "Vec<Channel>")]
pub struct ChannelSet {
    chat: bool,
    email: bool,
    socket: bool,
}

impl ChannelSet {
    pub fn all() -> Self {
        Self {
            chat: true,
            email: true,
            socket: true,
        }
    }

    pub fn none() -> Self {
        Self {
            chat: false,
            email: false,
            socket: false,
        }
    }

    pub fn only(channel: Channel) -> Self {
        Self::none().with(channel)
    }

    pub fn with(mut self, channel: Channel) -> Self {
        *self.slot(channel) = true;
        self
    }

    pub fn without(mut self, channel: Channel) -> Self {
        *self.slot(channel) = false;
        self
    }

    pub fn contains(&self, channel: Channel) -> bool {
        match channel {
            Channel::Chat => self.chat,
            Channel::Email => self.email,
            Channel::Socket => self.socket,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.chat || self.email || self.socket)
    }

    /// Members in [`Channel::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL.into_iter().filter(|c| self.contains(*c))
    }

    fn slot(&mut self, channel: Channel) -> &mut bool {
        match channel {
            Channel::Chat => &mut self.chat,
            Channel::Email => &mut self.email,
            Channel::Socket => &mut self.socket,
        }
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), ChannelSet::with)
    }
}

impl From<Vec<Channel>> for ChannelSet {
    fn from(channels: Vec<Channel>) -> Self {
        channels.into_iter().collect()
    }
}

impl From<ChannelSet> for Vec<Channel> {
    fn from(set: ChannelSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|c| c.as_str()).collect();
        write!(f, "[{}]", names.join(","))
    }
}

/// Creates notification records and requests their delivery.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    broker: TaskBroker,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, broker: TaskBroker) -> Self {
        Self { store, broker }
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    /// Persist a notification and enqueue one delivery task per channel.
    ///
    /// Only creation errors are returned. A failed enqueue is logged and the
    /// affected channel stays unstamped; the caller learns that dispatch was
    /// requested, never how it went.
    pub async fn notify(
        &self,
        recipient: UserId,
        level: Level,
        category: Category,
        payload: Payload,
        channels: ChannelSet,
    ) -> Result<Notification, StoreError> {
        let notification = self
            .store
            .create(NewNotification::new(recipient, level, category, payload))
            .await?;

        for channel in channels.iter() {
            let name = task_name(channel);
            if let Err(e) = self.broker.enqueue(name, task_args(notification.id)).await {
                error!(
                    notification_id = notification.id,
                    %channel,
                    task = name,
                    error = %e,
                    "failed to enqueue delivery task"
                );
            }
        }

        info!(
            notification_id = notification.id,
            recipient,
            %level,
            %category,
            %channels,
            "notification created"
        );
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcrm_queue::{MemoryQueue, QueueBackend, RoutingTable};
    use adcrm_store::MemoryStore;

    #[test]
    fn channel_set_membership() {
        let set = ChannelSet::all().without(Channel::Email);
        assert!(set.contains(Channel::Chat));
        assert!(!set.contains(Channel::Email));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Channel::Chat, Channel::Socket]);
        assert!(ChannelSet::none().is_empty());
        assert_eq!(ChannelSet::only(Channel::Socket).to_string(), "[socket]");
    }

    #[test]
    fn channel_set_serializes_as_list() {
        let set: ChannelSet = serde_json::from_str(r#"["email","chat"]"#).unwrap();
        assert_eq!(set, ChannelSet::none().with(Channel::Chat).with(Channel::Email));
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["chat","email"]"#);
    }

    #[tokio::test]
    async fn notify_enqueues_one_task_per_channel() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(MemoryQueue::new());
        let service = NotificationService::new(
            store.clone(),
            TaskBroker::new(backend.clone(), RoutingTable::default()),
        );

        let n = service
            .notify(
                5,
                Level::Warning,
                Category::AdAccount,
                Payload::new("Ad account banned"),
                ChannelSet::all().without(Channel::Email),
            )
            .await
            .unwrap();

        assert_eq!(store.get(n.id).await.unwrap().recipient, 5);
        assert_eq!(backend.depth("telegram").await.unwrap(), 1);
        assert_eq!(backend.depth("socket").await.unwrap(), 1);
        assert_eq!(backend.depth("email").await.unwrap(), 0);

        let task = backend.pop("telegram").await.unwrap().unwrap();
        assert_eq!(task.name, "notifications.send_chat");
        assert_eq!(task.args["notification_id"], n.id);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_enqueue() {
        let backend = Arc::new(MemoryQueue::new());
        let service = NotificationService::new(
            Arc::new(MemoryStore::new()),
            TaskBroker::new(backend.clone(), RoutingTable::default()),
        );

        let err = service
            .notify(5, Level::Info, Category::System, Payload::new(""), ChannelSet::all())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert_eq!(backend.depth("telegram").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn enqueue_failure_still_returns_record() {
        let backend = Arc::new(MemoryQueue::new());
        backend.close().await;
        let service = NotificationService::new(
            Arc::new(MemoryStore::new()),
            TaskBroker::new(backend, RoutingTable::default()),
        );

        let n = service
            .notify(9, Level::Error, Category::Finance, Payload::new("Top-up failed"), ChannelSet::all())
            .await
            .unwrap();
        assert!(n.chat_sent_at.is_none());
    }
}
