//! Per-entity serial executors.
//!
//! Every broker entity (queue manager, queue, connection) owns one work
//! queue and one task draining it, so entity state is only ever touched by
//! that task. Entities never call each other, they post work items, which
//! replaces locking with per-entity serialization. Items posted from a
//! single task run in FIFO order; items from different tasks interleave but
//! never run concurrently for the same entity.

use tokio::sync::mpsc;

/// Sending half of an entity's work queue, carrying the entity's command
/// enum.
#[derive(Debug)]
pub struct WorkQueue<C> {
    tx: mpsc::UnboundedSender<C>,
}

impl<C> Clone for WorkQueue<C> {
    fn clone(&self) -> Self {
        WorkQueue {
            tx: self.tx.clone(),
        }
    }
}

impl<C> WorkQueue<C> {
    /// Enqueues a work item for the entity. Returns false when the entity's
    /// task has exited, which is what posting after a container stop looks
    /// like.
    pub fn add(&self, work: C) -> bool {
        self.tx.send(work).is_ok()
    }
}

/// Creates a work queue and the receiving stream its entity task drains.
pub fn channel<C>() -> (WorkQueue<C>, mpsc::UnboundedReceiver<C>) {
    let (tx, rx) = mpsc::unbounded_channel();

    (WorkQueue { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_delivers_in_fifo_order() {
        let (wq, mut rx) = channel();

        assert!(wq.add(1));
        assert!(wq.add(2));
        assert!(wq.add(3));

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn add_fails_after_the_entity_is_gone() {
        let (wq, rx) = channel();

        drop(rx);

        assert!(!wq.add(1));
    }
}
