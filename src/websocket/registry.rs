use indexmap::IndexSet;

use crate::types::Topic;

/// Topics the application wants to receive, independent of the connection
///
/// Records the last-requested membership only. Server acknowledgements are
/// not tracked, so a topic stays desired across any number of reconnects
/// until it is removed.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    desired: IndexSet<Topic>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a topic as desired. Returns `true` if it was not already.
    pub fn add(&mut self, topic: Topic) -> bool {
        self.desired.insert(topic)
    }

    /// Drop a topic. Returns `true` if it was desired. Unknown topics are
    /// ignored.
    pub fn remove(&mut self, topic: &Topic) -> bool {
        // shift_remove keeps the remaining topics in insertion order
        self.desired.shift_remove(topic)
    }

    pub fn contains(&self, topic: &Topic) -> bool {
        self.desired.contains(topic)
    }

    /// Stable copy of the desired topics in insertion order
    pub fn snapshot(&self) -> Vec<Topic> {
        self.desired.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.desired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }
}
