//! Lookup of the configured sender for each channel.
//!
//! Workers build one registry at startup from configuration and hand it to
//! the dispatch tasks; nothing in this crate keeps a process-wide client.

use std::collections::HashMap;
use std::sync::Arc;

use adcrm_core::Channel;

use crate::traits::ChannelSender;

#[derive(Default, Clone)]
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl std::fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderRegistry")
            .field("channels", &self.senders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender under its own channel, replacing any previous one.
    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) -> &mut Self {
        let channel = sender.channel();
        if self.senders.insert(channel, sender).is_some() {
            tracing::debug!(%channel, "replaced channel sender");
        }
        self
    }

    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.register(sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }

    /// Configured channels in [`Channel::ALL`] order.
    pub fn channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.senders.contains_key(c))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
