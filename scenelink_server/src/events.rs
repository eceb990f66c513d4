//! Outbound event queue.
//!
//! Events waiting to be published. Registry callbacks and per-tick sampling
//! push through cloneable [`EventSender`]s; the tick loop drains the queue in
//! FIFO order and publishes each event. No deduplication or coalescing.

use scenelink_shared::wire::PubMessage;
use tokio::sync::mpsc;

use crate::identity::IdentityCallbacks;

/// An event bound for the publish channel.
pub type OutboundEvent = PubMessage;

/// Producer side of the [`OutboundEventQueue`].
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

impl EventSender {
    pub fn push(&self, event: OutboundEvent) {
        // Only fails once the queue itself is gone, i.e. during teardown.
        let _ = self.tx.send(event);
    }

    /// Callbacks that turn registry renames/deletions into queued events.
    pub fn identity_callbacks(&self) -> IdentityCallbacks {
        let renames = self.clone();
        let deletes = self.clone();
        IdentityCallbacks::new(
            move |id, new_name| {
                renames.push(OutboundEvent::Renamed {
                    id,
                    new_name: new_name.to_string(),
                })
            },
            move |id| deletes.push(OutboundEvent::Deleted { id }),
        )
    }
}

/// FIFO of pending publish messages.
#[derive(Debug)]
pub struct OutboundEventQueue {
    tx: EventSender,
    rx: mpsc::UnboundedReceiver<OutboundEvent>,
}

impl Default for OutboundEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundEventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: EventSender { tx },
            rx,
        }
    }

    pub fn sender(&self) -> EventSender {
        self.tx.clone()
    }

    pub fn push(&self, event: OutboundEvent) {
        self.tx.push(event);
    }

    /// Takes every queued event, oldest first. The queue is empty afterwards.
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use scenelink_shared::math::Vec3;

    use super::*;

    #[test]
    fn drain_preserves_push_order() {
        let mut queue = OutboundEventQueue::new();
        let sender = queue.sender();
        queue.push(OutboundEvent::PositionUpdated {
            id: 1,
            position: Vec3::new(1.0, 0.0, 0.0),
        });
        sender.push(OutboundEvent::Renamed {
            id: 2,
            new_name: "Lamp".into(),
        });
        queue.push(OutboundEvent::Deleted { id: 1 });

        let ids: Vec<_> = queue.drain().iter().map(|e| (e.id(), e.msg_type())).collect();
        assert_eq!(
            ids,
            vec![
                (1, scenelink_shared::wire::PubMsgType::PositionUpdated),
                (2, scenelink_shared::wire::PubMsgType::Renamed),
                (1, scenelink_shared::wire::PubMsgType::Deleted),
            ]
        );
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn identity_callbacks_enqueue_events() {
        let mut queue = OutboundEventQueue::new();
        let mut cbs = queue.sender().identity_callbacks();
        cbs.renamed(4, "Sun");
        cbs.deleted(4);
        assert_eq!(
            queue.drain(),
            vec![
                OutboundEvent::Renamed {
                    id: 4,
                    new_name: "Sun".into()
                },
                OutboundEvent::Deleted { id: 4 },
            ]
        );
    }

    #[test]
    fn duplicates_are_kept() {
        let mut queue = OutboundEventQueue::new();
        queue.push(OutboundEvent::Deleted { id: 0 });
        queue.push(OutboundEvent::Deleted { id: 0 });
        assert_eq!(queue.drain().len(), 2);
    }
}
