use std::collections::HashMap;

use log::{info, trace};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{ConnectionCommand, ReceiverRef, SenderRef};
use crate::queue::handler;
use crate::queue::QueueCommandSink;
use crate::workqueue::{self, WorkQueue};

// QueueManager task
//   handles:
//     - look up a queue by name, creating it on first use
//     - assign _dynamic_<n> names for empty lookups
//     - answer the requesting connection with a bound-queue work item
//
// The reply goes through the connection's work queue, so the requester sees
// the binding before any queue originated traffic for it.

/// Work items of the queue manager.
#[derive(Debug)]
pub enum QueueManagerCommand {
    FindQueueSender { sender: SenderRef, name: String },
    FindQueueReceiver { receiver: ReceiverRef, name: String },
}

pub type QueueManagerSink = WorkQueue<QueueManagerCommand>;

pub fn start(shutdown: CancellationToken) -> QueueManagerSink {
    let (sink, mut stream) = workqueue::channel();

    tokio::spawn(async move {
        let mut manager = QueueManagerState {
            queues: HashMap::new(),
            next_id: 0,
            shutdown,
        };

        manager.command_loop(&mut stream).await;
    });

    sink
}

struct QueueManagerState {
    queues: HashMap<String, QueueCommandSink>,
    /// Used to generate unique queue names.
    next_id: u64,
    shutdown: CancellationToken,
}

impl QueueManagerState {
    async fn command_loop(&mut self, commands: &mut mpsc::UnboundedReceiver<QueueManagerCommand>) {
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                maybe_command = commands.recv() => match maybe_command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }

        trace!("Queue manager exiting");
    }

    fn handle_command(&mut self, command: QueueManagerCommand) {
        match command {
            QueueManagerCommand::FindQueueSender { sender, name } => {
                let (queue, name) = self.find_queue(name);

                if !sender.conn.add(ConnectionCommand::BoundSender {
                    id: sender.id,
                    queue,
                    name,
                }) {
                    trace!("Requesting connection of sender {:?} is gone", sender.id);
                }
            }
            QueueManagerCommand::FindQueueReceiver { receiver, name } => {
                let (queue, name) = self.find_queue(name);

                if !receiver.conn.add(ConnectionCommand::BoundReceiver {
                    id: receiver.id,
                    queue,
                    name,
                }) {
                    trace!("Requesting connection of receiver {:?} is gone", receiver.id);
                }
            }
        }
    }

    /// Looks up the queue, creating it on first use. An empty name asks for
    /// a dynamic queue and gets a server assigned one.
    fn find_queue(&mut self, mut name: String) -> (QueueCommandSink, String) {
        if name.is_empty() {
            name = format!("_dynamic_{}", self.next_id);
            self.next_id += 1;
        }

        let shutdown = self.shutdown.clone();
        let queue = self.queues.entry(name.clone()).or_insert_with(|| {
            info!("Creating queue {}", name);

            let (sink, mut stream) = workqueue::channel();
            let queue_name = name.clone();

            tokio::spawn(async move {
                handler::start(queue_name, shutdown, &mut stream).await;
            });

            sink
        });

        (queue.clone(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_queue_manager() -> QueueManagerState {
        QueueManagerState {
            queues: HashMap::new(),
            next_id: 0,
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn find_queue_creates_on_first_lookup() {
        let mut qm = new_queue_manager();

        let (_, name) = qm.find_queue("orders".to_string());

        assert_eq!(name, "orders");
        assert_eq!(qm.queues.len(), 1);
        assert!(qm.queues.contains_key("orders"));
    }

    #[tokio::test]
    async fn find_queue_reuses_existing_queues() {
        let mut qm = new_queue_manager();

        qm.find_queue("orders".to_string());
        qm.find_queue("orders".to_string());

        assert_eq!(qm.queues.len(), 1);
    }

    #[tokio::test]
    async fn dynamic_names_are_unique_and_increasing() {
        let mut qm = new_queue_manager();

        let (_, first) = qm.find_queue(String::new());
        let (_, second) = qm.find_queue(String::new());
        let (_, third) = qm.find_queue(String::new());

        assert_eq!(first, "_dynamic_0");
        assert_eq!(second, "_dynamic_1");
        assert_eq!(third, "_dynamic_2");
        assert_eq!(qm.queues.len(), 3);
    }

    #[tokio::test]
    async fn bound_queue_reaches_the_requesting_connection() {
        let mut qm = new_queue_manager();
        let (conn, mut rx) = workqueue::channel();
        let id = crate::client::SenderId::next();

        qm.handle_command(QueueManagerCommand::FindQueueSender {
            sender: SenderRef { id, conn },
            name: "orders".to_string(),
        });

        match rx.try_recv() {
            Ok(ConnectionCommand::BoundSender {
                id: bound, name, ..
            }) => {
                assert_eq!(bound, id);
                assert_eq!(name, "orders");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
