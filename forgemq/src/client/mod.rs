//! Server side handling of one client connection: the socket loop, the
//! connection handler gluing endpoint events to the broker entities, and
//! the identities other entities use to reach back into a connection.

pub mod conn;
pub mod handler;

use std::sync::atomic::{AtomicU64, Ordering};

use forgemq_codec::frame::Message;

use crate::queue::QueueCommandSink;
use crate::workqueue::WorkQueue;

/// Work queue of a connection task. Queue managers and queues post their
/// replies and deliveries here; senders and receivers share their
/// connection's work queue.
pub type ConnectionSink = WorkQueue<ConnectionCommand>;

static NEXT_SENDER_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_RECEIVER_ID: AtomicU64 = AtomicU64::new(0);

/// Stable opaque identity of a broker side sender, unique across the
/// process so a queue can tell subscribers from different connections
/// apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SenderId(u64);

impl SenderId {
    pub(crate) fn next() -> SenderId {
        SenderId(NEXT_SENDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Stable opaque identity of a broker side receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReceiverId(u64);

impl ReceiverId {
    pub(crate) fn next() -> ReceiverId {
        ReceiverId(NEXT_RECEIVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle a queue holds to reach a subscribed sender.
#[derive(Clone, Debug)]
pub struct SenderRef {
    pub id: SenderId,
    pub conn: ConnectionSink,
}

/// Handle the queue manager uses to answer a receiver's queue lookup.
#[derive(Clone, Debug)]
pub struct ReceiverRef {
    pub id: ReceiverId,
    pub conn: ConnectionSink,
}

/// Work items a connection task executes for its senders and receivers.
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Queue lookup finished for a sender; subscribe and open the link.
    BoundSender {
        id: SenderId,
        queue: QueueCommandSink,
        name: String,
    },
    /// Queue lookup finished for a receiver; open the link and drain the
    /// locally buffered messages.
    BoundReceiver {
        id: ReceiverId,
        queue: QueueCommandSink,
        name: String,
    },
    /// A queue dispatched a message to one of this connection's senders.
    DeliverMessage { id: SenderId, message: Message },
    /// The queue removed the sender from its subscriptions; the sender
    /// state can go away.
    SenderUnsubscribed { id: SenderId },
}
