pub mod handler;
pub mod manager;

use crate::workqueue::WorkQueue;

/// Work queue of a queue entity.
pub type QueueCommandSink = WorkQueue<handler::QueueCommand>;
