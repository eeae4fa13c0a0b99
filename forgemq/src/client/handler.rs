use std::collections::{HashMap, VecDeque};

use forgemq_codec::frame::{ErrorCondition, Message};
use forgemq_engine::{Connection, Handler, LinkId, Transport};
use log::{info, trace, warn};
use uuid::Uuid;

use crate::client::{
    ConnectionCommand, ConnectionSink, ReceiverId, ReceiverRef, SenderId, SenderRef,
};
use crate::container::Context;
use crate::logerr;
use crate::queue::handler::QueueCommand;
use crate::queue::manager::QueueManagerCommand;
use crate::queue::QueueCommandSink;

// Broker side of one connection.
//
// Senders bridge outgoing links to queue subscriptions, receivers bridge
// incoming links to queue publishes. Both share the connection's work
// queue: every cross-entity effect lands here as a ConnectionCommand and
// runs on the connection's task.

struct SenderState {
    id: SenderId,
    queue: Option<QueueCommandSink>,
    queue_name: String,
    /// Credit reported before the queue binding completed, drained once at
    /// binding time.
    pending_credit: u32,
    /// The link closed before the binding completed; the binding drops the
    /// sender instead of subscribing it.
    closed: bool,
}

/// Messages buffered before the binding completes are dropped if the
/// connection closes first.
struct ReceiverState {
    id: ReceiverId,
    queue: Option<QueueCommandSink>,
    messages: VecDeque<Message>,
}

pub struct ConnectionHandler {
    id: String,
    context: Context,
    work: ConnectionSink,
    senders: HashMap<LinkId, SenderState>,
    receivers: HashMap<LinkId, ReceiverState>,
}

impl ConnectionHandler {
    pub fn new(context: Context, work: ConnectionSink) -> Self {
        let id = Uuid::new_v4().as_hyphenated().to_string();

        info!("Client connected id = {id}");

        ConnectionHandler {
            id,
            context,
            work,
            senders: HashMap::new(),
            receivers: HashMap::new(),
        }
    }

    /// Executes a work item posted by the queue manager or a queue.
    pub fn handle_command(&mut self, conn: &mut Connection, command: ConnectionCommand) {
        match command {
            ConnectionCommand::BoundSender { id, queue, name } => {
                self.sender_bound(conn, id, queue, name);
            }
            ConnectionCommand::BoundReceiver { id, queue, name } => {
                self.receiver_bound(conn, id, queue, name);
            }
            ConnectionCommand::DeliverMessage { id, message } => match self.sender_link(id) {
                Some(link) => {
                    trace!("Sender {id:?} sending");

                    logerr!(conn.send(link, message));
                }
                None => trace!("Delivery for gone sender {id:?}"),
            },
            ConnectionCommand::SenderUnsubscribed { id } => {
                trace!("Sender {id:?} deleting");

                if let Some(link) = self.sender_link(id) {
                    self.senders.remove(&link);
                }
            }
        }
    }

    fn sender_link(&self, id: SenderId) -> Option<LinkId> {
        self.senders
            .iter()
            .find(|(_, s)| s.id == id)
            .map(|(link, _)| *link)
    }

    fn receiver_link(&self, id: ReceiverId) -> Option<LinkId> {
        self.receivers
            .iter()
            .find(|(_, r)| r.id == id)
            .map(|(link, _)| *link)
    }

    fn sender_bound(
        &mut self,
        conn: &mut Connection,
        id: SenderId,
        queue: QueueCommandSink,
        name: String,
    ) {
        let Some(link) = self.sender_link(id) else {
            trace!("Binding for gone sender {id:?}");

            return;
        };

        let state = self.senders.get_mut(&link).unwrap();

        if state.closed {
            // The link went away while the queue lookup was in flight.
            self.senders.remove(&link);

            return;
        }

        state.queue = Some(queue.clone());
        state.queue_name = name.clone();
        let pending_credit = std::mem::take(&mut state.pending_credit);

        trace!("Sender {id:?} bound to queue {name}");

        queue.add(QueueCommand::Subscribe(SenderRef {
            id,
            conn: self.work.clone(),
        }));

        logerr!(conn.accept_sender(link, &name));

        if pending_credit > 0 {
            queue.add(QueueCommand::Flow {
                id,
                credit: pending_credit,
            });
        }

        info!("sending from {name}");
    }

    fn receiver_bound(
        &mut self,
        conn: &mut Connection,
        id: ReceiverId,
        queue: QueueCommandSink,
        name: String,
    ) {
        let Some(link) = self.receiver_link(id) else {
            trace!("Binding for gone receiver {id:?}");

            return;
        };

        let state = self.receivers.get_mut(&link).unwrap();
        state.queue = Some(queue.clone());

        logerr!(conn.accept_receiver(link, &name));

        info!("receiving to {name}");

        while let Some(message) = state.messages.pop_front() {
            if !queue.add(QueueCommand::QueueMsg(message)) {
                break;
            }
        }
    }
}

impl Handler for ConnectionHandler {
    fn on_connection_open(&mut self, conn: &mut Connection) {
        // Accept the connection.
        conn.open();
    }

    // A sender sends messages from a queue to a subscriber.
    fn on_sender_open(&mut self, conn: &mut Connection, link: LinkId) {
        let Some(l) = conn.link(link) else { return };
        let name = if l.source_dynamic() {
            String::new()
        } else {
            l.source_address().to_string()
        };

        let id = SenderId::next();
        self.senders.insert(
            link,
            SenderState {
                id,
                queue: None,
                queue_name: String::new(),
                pending_credit: 0,
                closed: false,
            },
        );

        if !self
            .context
            .queue_manager
            .add(QueueManagerCommand::FindQueueSender {
                sender: SenderRef {
                    id,
                    conn: self.work.clone(),
                },
                name,
            })
        {
            warn!("Queue manager is gone, cannot bind sender {id:?}");
        }
    }

    // We have credit to send a message.
    fn on_sendable(&mut self, conn: &mut Connection, link: LinkId) {
        let credit = match conn.link(link) {
            Some(l) => l.credit(),
            None => return,
        };

        if let Some(state) = self.senders.get_mut(&link) {
            match &state.queue {
                Some(queue) => {
                    queue.add(QueueCommand::Flow {
                        id: state.id,
                        credit,
                    });
                }
                None => state.pending_credit = credit,
            }
        }
    }

    // A receiver receives messages from a publisher to a queue.
    fn on_receiver_open(&mut self, conn: &mut Connection, link: LinkId) {
        let Some(l) = conn.link(link) else { return };
        let name = l.target_address().to_string();

        if name == "shutdown" {
            info!("broker shutting down");

            // Sending to the special "shutdown" queue stops the broker.
            self.context
                .container
                .stop(ErrorCondition::new("shutdown", "stop broker"));

            return;
        }

        if name.is_empty() {
            warn!("Receiver attaching to an empty address");
        }

        let id = ReceiverId::next();
        self.receivers.insert(
            link,
            ReceiverState {
                id,
                queue: None,
                messages: VecDeque::new(),
            },
        );

        if !self
            .context
            .queue_manager
            .add(QueueManagerCommand::FindQueueReceiver {
                receiver: ReceiverRef {
                    id,
                    conn: self.work.clone(),
                },
                name,
            })
        {
            warn!("Queue manager is gone, cannot bind receiver {id:?}");
        }
    }

    // A message is received.
    fn on_message(&mut self, _conn: &mut Connection, link: LinkId, message: Message) {
        let Some(state) = self.receivers.get_mut(&link) else {
            return;
        };

        state.messages.push_back(message);

        if let Some(queue) = &state.queue {
            while let Some(message) = state.messages.pop_front() {
                if !queue.add(QueueCommand::QueueMsg(message)) {
                    break;
                }
            }
        }
    }

    fn on_session_close(&mut self, _conn: &mut Connection, channel: u16) {
        // Unsubscribe all senders that belong to the session.
        self.senders.retain(|link, state| {
            if link.channel != channel {
                return true;
            }

            if let Some(queue) = &state.queue {
                queue.add(QueueCommand::Unsubscribe { id: state.id });
            }

            false
        });
    }

    fn on_sender_close(&mut self, _conn: &mut Connection, link: LinkId) {
        let Some(state) = self.senders.get_mut(&link) else {
            return;
        };

        if let Some(queue) = state.queue.clone() {
            queue.add(QueueCommand::Unsubscribe { id: state.id });
            self.senders.remove(&link);
        } else {
            // Not bound yet; mark it so the binding drops it.
            state.closed = true;
        }
    }

    // The connection task sees this last.
    fn on_transport_close(&mut self, _transport: &Transport) {
        // Unsubscribe all senders.
        for state in self.senders.values() {
            if let Some(queue) = &state.queue {
                trace!(
                    "Unsubscribing sender {:?} from queue {}",
                    state.id,
                    state.queue_name
                );

                queue.add(QueueCommand::Unsubscribe { id: state.id });
            }
        }

        self.senders.clear();
        self.receivers.clear();

        info!("Client disconnected id = {}", self.id);
    }
}
