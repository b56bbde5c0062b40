//! Identifier to channel lookup for asynchronous notifications
//!
//! The registry never owns a channel. Entries are weak so that a stale
//! lookup racing with teardown simply resolves to nothing.

use crate::domain::channel::{Channel, ChannelId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    entries: HashMap<ChannelId, Weak<Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: &Arc<Channel>) {
        self.entries.insert(channel.id(), Arc::downgrade(channel));
    }

    /// Resolve an id to its channel, if both the entry and the channel still exist
    pub fn find(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.entries.get(&id).and_then(Weak::upgrade)
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drop the entry for `id`, returning whether one existed
    pub fn remove(&mut self, id: ChannelId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(raw: u32) -> Arc<Channel> {
        Arc::new(Channel::new(ChannelId::new(raw).unwrap(), Weak::new()))
    }

    #[test]
    fn test_register_and_find() {
        let mut registry = ChannelRegistry::new();
        let ch = channel(4);
        registry.register(&ch);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(ch.id()));
        assert!(Arc::ptr_eq(&registry.find(ch.id()).unwrap(), &ch));
        assert!(registry.find(ChannelId::new(5).unwrap()).is_none());
    }

    #[test]
    fn test_registry_does_not_extend_lifetime() {
        let mut registry = ChannelRegistry::new();
        let ch = channel(1);
        let id = ch.id();
        registry.register(&ch);

        drop(ch);
        assert!(registry.find(id).is_none());
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }
}
