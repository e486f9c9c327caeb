//! Monitor fan-out.
//!
//! Committed table updates are broadcast to monitor subscribers through a
//! per-database hub. Subscribers that fall behind miss updates rather than
//! blocking commits.

use std::sync::Arc;

use tokio::sync::broadcast;

use switchboard::TableUpdates;

/// The capacity of the broadcast channel.
/// Subscribers that fall behind by more than this many updates will miss
/// them.
const CHANNEL_CAPACITY: usize = 256;

/// Fan-out hub for the committed updates of one database.
///
/// Held by the server; transact publishes each committed diff and monitor
/// sessions consume their own receivers.
#[derive(Clone)]
pub struct UpdateHub {
    sender: broadcast::Sender<Arc<TableUpdates>>,
}

impl UpdateHub {
    /// Create a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish a committed diff.
    pub fn publish(&self, updates: Arc<TableUpdates>) {
        // Send errors just mean there are no subscribers.
        let _ = self.sender.send(updates);
    }

    /// Subscribe to committed diffs.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TableUpdates>> {
        self.sender.subscribe()
    }

    /// The number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for UpdateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UpdateHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateHub")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
