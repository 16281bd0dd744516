//! Real-time socket group broadcaster.
//!
//! Each recipient has a subscription group (`notifications_<user id>`)
//! backed by a `tokio` broadcast channel. Publishing is fire-and-forget:
//! a group without subscribers simply drops the event.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use adcrm_core::{Channel, Recipient, UserId};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::traits::{ChannelSender, NotifyError, OutgoingMessage, SendReport};

#[derive(Serialize)]
struct SocketEvent<'a, T: Serialize> {
    #[serde(rename = "type")]
    msg_type: &'a str,
    data: T,
}

fn socket_json<T: Serialize>(msg_type: &str, data: T) -> Result<String, NotifyError> {
    serde_json::to_string(&SocketEvent { msg_type, data })
        .map_err(|e| NotifyError::Template(format!("failed to serialize socket event: {e}")))
}

/// Registry of per-recipient broadcast groups.
pub struct GroupHub {
    groups: RwLock<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl GroupHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn group_name(user: UserId) -> String {
        format!("notifications_{user}")
    }

    /// Join a group, creating it on first use.
    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<String> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to a group. Returns how many subscribers received the event.
    pub fn publish(&self, group: &str, event: String) -> usize {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        match groups.get(group) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, group: &str) -> usize {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups.get(group).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Drop groups nobody listens to anymore.
    pub fn prune(&self) -> usize {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let before = groups.len();
        groups.retain(|_, tx| tx.receiver_count() > 0);
        before - groups.len()
    }
}

impl Default for GroupHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[derive(Serialize)]
struct NotificationEvent<'a> {
    id: i64,
    message: &'a str,
    level: adcrm_core::Level,
    category: adcrm_core::Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    keyboard: Option<&'a adcrm_core::Keyboard>,
    extra: &'a serde_json::Map<String, serde_json::Value>,
}

/// Broadcasts notifications to the recipient's socket group.
pub struct SocketBroadcaster {
    hub: Arc<GroupHub>,
}

impl SocketBroadcaster {
    pub fn new(hub: Arc<GroupHub>) -> Self {
        Self { hub }
    }

    pub fn event_for(message: &OutgoingMessage) -> Result<String, NotifyError> {
        socket_json(
            "notification",
            NotificationEvent {
                id: message.notification_id,
                message: &message.message,
                level: message.level,
                category: message.category,
                keyboard: message.keyboard.as_ref(),
                extra: &message.extra,
            },
        )
    }
}

#[async_trait::async_trait]
impl ChannelSender for SocketBroadcaster {
    fn channel(&self) -> Channel {
        Channel::Socket
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &OutgoingMessage,
    ) -> Result<SendReport, NotifyError> {
        let group = GroupHub::group_name(recipient.id);
        let event = Self::event_for(message)?;
        let receivers = self.hub.publish(&group, event);
        tracing::debug!(
            group = %group,
            receivers,
            notification_id = message.notification_id,
            "socket event published"
        );
        Ok(SendReport::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcrm_core::{Category, Level};

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            notification_id: 21,
            level: Level::Error,
            category: Category::Page,
            message: "Page unpublished".to_string(),
            keyboard: None,
            extra: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_event() {
        let hub = Arc::new(GroupHub::default());
        let mut rx = hub.subscribe(&GroupHub::group_name(5));
        let sender = SocketBroadcaster::new(hub.clone());

        let report = sender.send(&Recipient::new(5), &message()).await.unwrap();
        assert_eq!(report, SendReport::Sent);

        let raw = rx.recv().await.unwrap();
        let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(event["type"], "notification");
        assert_eq!(event["data"]["id"], 21);
        assert_eq!(event["data"]["level"], "error");
        assert_eq!(event["data"]["category"], "page");
        assert_eq!(event["data"]["message"], "Page unpublished");
    }

    #[tokio::test]
    async fn no_subscribers_still_succeeds() {
        let sender = SocketBroadcaster::new(Arc::new(GroupHub::default()));
        let report = sender.send(&Recipient::new(5), &message()).await.unwrap();
        assert_eq!(report, SendReport::Sent);
    }

    #[tokio::test]
    async fn groups_are_recipient_scoped() {
        let hub = Arc::new(GroupHub::default());
        let mut other = hub.subscribe(&GroupHub::group_name(6));
        SocketBroadcaster::new(hub.clone())
            .send(&Recipient::new(5), &message())
            .await
            .unwrap();
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn prune_drops_abandoned_groups() {
        let hub = GroupHub::default();
        let rx = hub.subscribe("notifications_1");
        let _keep = hub.subscribe("notifications_2");
        drop(rx);
        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.subscriber_count("notifications_2"), 1);
    }
}
