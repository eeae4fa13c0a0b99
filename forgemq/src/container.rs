//! The container owns the broker's lifecycle: it hosts the queue manager,
//! listens for transports and spawns one connection task per accepted
//! transport. Stopping cancels every entity task; work queue posts return
//! false from then on, running work items complete, and `run` returns the
//! stop condition as an error when one was given.

use std::sync::{Arc, Mutex};

use forgemq_codec::frame::ErrorCondition;
use log::{error, info};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::client::conn;
use crate::error::{runtime_error, Result};
use crate::queue::manager::{self, QueueManagerSink};
use crate::url::Url;

/// Handles every connection task needs to reach the shared entities.
#[derive(Clone)]
pub struct Context {
    pub queue_manager: QueueManagerSink,
    pub container: Container,
}

#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

struct ContainerInner {
    id: String,
    shutdown: CancellationToken,
    stop_condition: Mutex<Option<ErrorCondition>>,
}

impl Container {
    pub fn new(id: &str) -> Self {
        Container {
            inner: Arc::new(ContainerInner {
                id: id.to_string(),
                shutdown: CancellationToken::new(),
                stop_condition: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Stops the container. The first condition given wins; an empty one
    /// makes `run` return cleanly.
    pub fn stop(&self, condition: ErrorCondition) {
        info!("Stopping container {}: {}", self.inner.id, condition.what());

        let mut guard = self.inner.stop_condition.lock().unwrap();
        if guard.is_none() {
            *guard = Some(condition);
        }
        drop(guard);

        self.inner.shutdown.cancel();
    }

    pub fn stop_condition(&self) -> Option<ErrorCondition> {
        self.inner.stop_condition.lock().unwrap().clone()
    }

    /// Spawns the queue manager and hands out the context connection tasks
    /// run with. Kept apart from [`run`](Container::run) so tests can drive
    /// connections over in-memory transports.
    pub fn start(&self) -> Context {
        Context {
            queue_manager: manager::start(self.shutdown_token()),
            container: self.clone(),
        }
    }

    /// Listens on the given address and serves connections until stopped.
    pub async fn run(&self, url: &Url) -> Result<()> {
        let context = self.start();

        let port = url
            .port_number()
            .ok_or_else(|| format!("invalid port in listen address: {}", url.port()))?;
        let addr = format!("{}:{}", url.host(), port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            error!("listen error: {e}");

            e
        })?;

        info!("broker listening on {addr}");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, _)) => {
                        let ctx = context.clone();

                        tokio::spawn(async move {
                            if let Err(e) = conn::handle_client(socket, ctx).await {
                                error!("Error handling client {e:?}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("listen error: {e}");

                        return Err(e.into());
                    }
                },
                _ = self.inner.shutdown.cancelled() => break,
            }
        }

        match self.stop_condition() {
            Some(condition) if !condition.is_empty() => runtime_error(condition),
            _ => Ok(()),
        }
    }
}
