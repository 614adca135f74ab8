//! Fan-out of one message to every registered connection except its sender

use crate::registry::{ConnectionId, Outbox, SharedRegistry};
use log::{debug, error, warn};
use shared::{encode, Message};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

/// Outcome of a single broadcast
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers `message` to every connection in a registry snapshot except
/// `sender`
///
/// Each recipient is an independent, non-blocking enqueue onto its outbox.
/// A recipient whose outbox is full or closed is logged and skipped; the
/// remaining recipients are unaffected. There is no retry and no
/// acknowledgement.
pub async fn broadcast(
    registry: &SharedRegistry,
    message: &Message,
    sender: ConnectionId,
) -> Delivery {
    let frame: Arc<str> = match encode(message) {
        Ok(frame) => frame.into(),
        Err(e) => {
            error!("Error encoding {} message: {}", message.kind, e);
            return Delivery::default();
        }
    };

    let recipients = {
        let registry = registry.lock().await;
        registry.snapshot()
    };

    let mut delivery = Delivery::default();

    for (id, peer) in recipients {
        if id == sender {
            continue;
        }

        match enqueue(&peer.outbox, &frame) {
            Ok(()) => {
                delivery.delivered += 1;
                debug!("Message sent to {} ({})", peer.identity, id);
            }
            Err(reason) => {
                delivery.failed += 1;
                warn!(
                    "Delivery failed to {} ({}): {}, dropping {} message",
                    peer.identity, id, reason, message.kind
                );
            }
        }
    }

    delivery
}

/// Queues a frame for one connection without waiting
pub(crate) fn enqueue(outbox: &Outbox, frame: &Arc<str>) -> Result<(), &'static str> {
    outbox.try_send(Arc::clone(frame)).map_err(|e| match e {
        TrySendError::Full(_) => "outbox full",
        TrySendError::Closed(_) => "connection gone",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClientRegistry, OUTBOX_CAPACITY};
    use shared::{decode, MessageType};
    use tokio::sync::mpsc;

    async fn register(
        registry: &SharedRegistry,
        raw: u64,
        identity: &str,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<str>> {
        let (tx, rx) = mpsc::channel(capacity);
        registry
            .lock()
            .await
            .register(ConnectionId::new(raw), identity, tx);
        rx
    }

    fn received(rx: &mut mpsc::Receiver<Arc<str>>) -> Option<Message> {
        rx.try_recv()
            .ok()
            .map(|frame| decode(frame.as_bytes()).unwrap())
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = ClientRegistry::shared();
        let mut alice = register(&registry, 1, "alice", OUTBOX_CAPACITY).await;
        let mut bob = register(&registry, 2, "bob", OUTBOX_CAPACITY).await;
        let mut carol = register(&registry, 3, "carol", OUTBOX_CAPACITY).await;

        let message = Message::chat("alice", "hi");
        let delivery = broadcast(&registry, &message, ConnectionId::new(1)).await;

        assert_eq!(delivery, Delivery { delivered: 2, failed: 0 });
        assert_eq!(received(&mut alice), None);
        assert_eq!(received(&mut bob), Some(message.clone()));
        assert_eq!(received(&mut carol), Some(message));
    }

    #[tokio::test]
    async fn test_broadcast_from_unregistered_sender_reaches_everyone() {
        let registry = ClientRegistry::shared();
        let mut bob = register(&registry, 2, "bob", OUTBOX_CAPACITY).await;

        let delivery = broadcast(&registry, &Message::left("alice"), ConnectionId::new(1)).await;

        assert_eq!(delivery.delivered, 1);
        let message = received(&mut bob).unwrap();
        assert_eq!(message.kind, MessageType::Left);
        assert_eq!(message.from, "alice");
    }

    #[tokio::test]
    async fn test_dead_recipient_does_not_block_others() {
        let registry = ClientRegistry::shared();
        let mut bob = register(&registry, 2, "bob", OUTBOX_CAPACITY).await;
        let dead = register(&registry, 3, "dead", OUTBOX_CAPACITY).await;
        let mut dave = register(&registry, 4, "dave", OUTBOX_CAPACITY).await;
        drop(dead);

        let message = Message::chat("alice", "still there?");
        let delivery = broadcast(&registry, &message, ConnectionId::new(1)).await;

        assert_eq!(delivery, Delivery { delivered: 2, failed: 1 });
        assert_eq!(received(&mut bob), Some(message.clone()));
        assert_eq!(received(&mut dave), Some(message));
    }

    #[tokio::test]
    async fn test_stalled_recipient_is_skipped() {
        let registry = ClientRegistry::shared();
        let mut slow = register(&registry, 2, "slow", 1).await;
        let mut bob = register(&registry, 3, "bob", OUTBOX_CAPACITY).await;

        let first = Message::chat("alice", "one");
        let second = Message::chat("alice", "two");
        broadcast(&registry, &first, ConnectionId::new(1)).await;
        let delivery = broadcast(&registry, &second, ConnectionId::new(1)).await;

        assert_eq!(delivery, Delivery { delivered: 1, failed: 1 });
        assert_eq!(received(&mut slow), Some(first.clone()));
        assert_eq!(received(&mut slow), None);
        assert_eq!(received(&mut bob), Some(first));
        assert_eq!(received(&mut bob), Some(second));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let registry = ClientRegistry::shared();
        let delivery = broadcast(&registry, &Message::system("anyone?"), ConnectionId::new(1)).await;
        assert_eq!(delivery, Delivery::default());
    }

    #[tokio::test]
    async fn test_frame_is_encoded_once_and_shared() {
        let registry = ClientRegistry::shared();
        let mut bob = register(&registry, 2, "bob", OUTBOX_CAPACITY).await;
        let mut carol = register(&registry, 3, "carol", OUTBOX_CAPACITY).await;

        broadcast(&registry, &Message::chat("alice", "x"), ConnectionId::new(1)).await;

        let to_bob = bob.try_recv().unwrap();
        let to_carol = carol.try_recv().unwrap();
        assert!(Arc::ptr_eq(&to_bob, &to_carol));
        assert!(to_bob.ends_with('\n'));
    }
}
