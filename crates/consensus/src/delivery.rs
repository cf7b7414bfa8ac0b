//! Delivery log - message keys this peer has finalized

use crate::types::MessageKey;
use std::collections::HashSet;

/// Set of delivered `(origin, sequence)` keys. Entries are never removed.
#[derive(Debug, Default)]
pub struct DeliveryLog {
    delivered: HashSet<MessageKey>,
}

impl DeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_delivered(&self, key: &MessageKey) -> bool {
        self.delivered.contains(key)
    }

    /// Returns `true` only the first time a key is marked
    pub fn mark_delivered(&mut self, key: MessageKey) -> bool {
        self.delivered.insert(key)
    }

    /// Delivered keys in ascending order
    pub fn keys(&self) -> Vec<MessageKey> {
        let mut keys: Vec<MessageKey> = self.delivered.iter().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
    }
}
