
use std::collections::VecDeque;

use forgemq_codec::frame::Message;
use log::{trace, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{ConnectionCommand, SenderId, SenderRef};

/// Work items of a queue entity. All queue state is touched only by the
/// queue's own task.
#[derive(Debug)]
pub enum QueueCommand {
    /// Append a message to the FIFO, then try to dispatch.
    QueueMsg(Message),
    /// Register a subscriber, starting with zero credit.
    Subscribe(SenderRef),
    /// Set a subscriber's credit. The value overwrites, flow frames carry
    /// the peer's current credit rather than an increment.
    Flow { id: SenderId, credit: u32 },
    /// Remove a subscriber and post `SenderUnsubscribed` back to it.
    Unsubscribe { id: SenderId },
}

struct Subscription {
    sender: SenderRef,
    credit: u32,
}

/// State of one queue: the message FIFO, the subscribers with their credit
/// and the round robin cursor.
pub(crate) struct QueueState {
    name: String,
    messages: VecDeque<Message>,
    subscriptions: Vec<Subscription>,
    /// Next subscription to serve. Either an index into `subscriptions` or
    /// its length, meaning wrap around on the next dispatch. Persists
    /// across dispatch rounds so bursts are spread over subscribers.
    current: usize,
}

pub async fn start(
    name: String,
    shutdown: CancellationToken,
    commands: &mut mpsc::UnboundedReceiver<QueueCommand>,
) {
    QueueState::new(name).queue_loop(shutdown, commands).await;
}

impl QueueState {
    fn new(name: String) -> Self {
        QueueState {
            name,
            messages: VecDeque::new(),
            subscriptions: Vec::new(),
            current: 0,
        }
    }

    async fn queue_loop(
        &mut self,
        shutdown: CancellationToken,
        commands: &mut mpsc::UnboundedReceiver<QueueCommand>,
    ) {
        loop {
            tokio::select! {
                maybe_command = commands.recv() => match maybe_command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }

        trace!("Queue {} exiting", self.name);
    }

    fn handle_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::QueueMsg(message) => {
                trace!("Queue {} queueing message", self.name);

                self.messages.push_back(message);
                self.try_to_send();
            }
            QueueCommand::Subscribe(sender) => {
                trace!("Queue {} subscribing sender {:?}", self.name, sender.id);

                if self.subscription_position(sender.id).is_none() {
                    self.subscriptions.push(Subscription { sender, credit: 0 });
                }
            }
            QueueCommand::Flow { id, credit } => {
                trace!("Queue {} flow of {} to sender {:?}", self.name, credit, id);

                match self.subscription_position(id) {
                    Some(p) => {
                        self.subscriptions[p].credit = credit;
                        self.try_to_send();
                    }
                    None => warn!("Queue {} flow for unknown sender {:?}", self.name, id),
                }
            }
            QueueCommand::Unsubscribe { id } => {
                trace!("Queue {} unsubscribing sender {:?}", self.name, id);

                if let Some(p) = self.subscription_position(id) {
                    // Removing below the cursor shifts the element the
                    // cursor points at; removing at the cursor makes it
                    // point at the next subscription by itself.
                    if p < self.current {
                        self.current -= 1;
                    }

                    let subscription = self.subscriptions.remove(p);

                    if !subscription
                        .sender
                        .conn
                        .add(ConnectionCommand::SenderUnsubscribed { id })
                    {
                        trace!("Queue {} sender {:?} connection is gone", self.name, id);
                    }
                }
            }
        }
    }

    fn subscription_position(&self, id: SenderId) -> Option<usize> {
        self.subscriptions.iter().position(|s| s.sender.id == id)
    }

    /// Round robin dispatch. Starting at the cursor, sends queued messages
    /// to subscriptions with credit, wrapping around, until it runs out of
    /// messages or every subscription is out of credit.
    fn try_to_send(&mut self) {
        let mut out_of_credit = 0;

        while !self.messages.is_empty() && out_of_credit < self.subscriptions.len() {
            if self.current >= self.subscriptions.len() {
                self.current = 0;
            }

            let subscription = &mut self.subscriptions[self.current];

            if subscription.credit > 0 {
                let message = self.messages.pop_front().unwrap();

                subscription.credit -= 1;

                if !subscription.sender.conn.add(ConnectionCommand::DeliverMessage {
                    id: subscription.sender.id,
                    message,
                }) {
                    trace!(
                        "Queue {} dropping message for gone sender {:?}",
                        self.name,
                        subscription.sender.id
                    );
                }
            } else {
                out_of_credit += 1;
            }

            self.current += 1;
        }
    }
}
