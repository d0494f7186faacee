//! Cross-instance invalidation bus.
//!
//! Grounded on the publish/subscribe invalidation broadcaster used
//! elsewhere in this codebase's cache module, trimmed to two message
//! shapes: a single-key invalidation and a clear-everything broadcast.
//! This component only does anything useful once a shared tier is
//! attached; until then it is exercised through a caller-supplied
//! `broadcast::Sender` handle.

use tokio::sync::broadcast;

/// A message carried on the invalidation bus. `origin_id` identifies the
/// engine instance that published it so a receiver can ignore its own
/// echoes.
#[derive(Debug, Clone)]
pub struct InvalidationMessage {
    /// Id of the publishing engine instance.
    pub origin_id: u64,
    /// The invalidation kind.
    pub kind: InvalidationKind,
}

/// What to invalidate.
#[derive(Debug, Clone)]
pub enum InvalidationKind {
    /// Invalidate a single key.
    Key(String),
    /// Invalidate everything (mirrors `clear()`).
    Clear,
}

/// A broadcast-backed invalidation bus. Cloning shares the same
/// underlying channel.
#[derive(Clone)]
pub struct InvalidationBus {
    origin_id: u64,
    sender: broadcast::Sender<InvalidationMessage>,
}

impl InvalidationBus {
    /// Build a new bus with the given channel capacity and an id this
    /// engine instance will stamp on every message it publishes.
    pub fn new(origin_id: u64, capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        InvalidationBus { origin_id, sender }
    }

    /// This engine instance's id, used by receivers to filter out their
    /// own published messages.
    pub fn origin_id(&self) -> u64 {
        self.origin_id
    }

    /// Subscribe to receive every message published on this bus,
    /// including this instance's own (callers must filter by
    /// `origin_id` themselves).
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationMessage> {
        self.sender.subscribe()
    }

    /// Publish a single-key invalidation.
    pub fn publish_key(&self, key: &str) {
        let _ = self.sender.send(InvalidationMessage {
            origin_id: self.origin_id,
            kind: InvalidationKind::Key(key.to_string()),
        });
    }

    /// Publish a clear-everything invalidation.
    pub fn publish_clear(&self) {
        let _ = self.sender.send(InvalidationMessage {
            origin_id: self.origin_id,
            kind: InvalidationKind::Clear,
        });
    }

    /// Current subscriber count, useful for diagnostics.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_key_invalidation() {
        let bus = InvalidationBus::new(1, 16);
        let mut rx = bus.subscribe();
        bus.publish_key("u:1");
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.origin_id, 1);
        assert!(matches!(msg.kind, InvalidationKind::Key(k) if k == "u:1"));
    }

    #[tokio::test]
    async fn subscriber_receives_clear() {
        let bus = InvalidationBus::new(1, 16);
        let mut rx = bus.subscribe();
        bus.publish_clear();
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg.kind, InvalidationKind::Clear));
    }

    #[tokio::test]
    async fn receiver_can_filter_out_its_own_origin() {
        let bus = InvalidationBus::new(42, 16);
        let mut rx = bus.subscribe();
        bus.publish_key("k");
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.origin_id, bus.origin_id());
    }
}
