
use std::time::Duration;

use forgemq_codec::frame::Message;
use forgemq_engine::{Connection, ConnectionDriver, ConnectionOptions, Handler, LinkId};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::client::conn;
use crate::container::{Container, Context};

/// System under test: a started container plus helpers to connect driver
/// backed clients over in-memory transports.
pub struct TestCase {
    pub container: Container,
    pub context: Context,
}

impl TestCase {
    pub fn new() -> Self {
        let container = Container::new("forgemq-test");
        let context = container.start();

        TestCase { container, context }
    }

    /// Connects a test client, spawning the broker side connection task
    /// over an in-memory transport.
    pub fn connect(&self) -> TestClient {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let ctx = self.context.clone();

        tokio::spawn(async move {
            let _ = conn::handle_client(server_io, ctx).await;
        });

        let mut driver = ConnectionDriver::new();
        driver.connect(ConnectionOptions {
            container_id: Some("test-client".to_string()),
        });

        TestClient {
            driver,
            events: ClientEvents::default(),
            io: client_io,
        }
    }
}

/// Endpoint events recorded on the client side.
#[derive(Default)]
pub struct ClientEvents {
    pub senders: Vec<LinkId>,
    pub receivers: Vec<LinkId>,
    pub messages: Vec<(LinkId, Message)>,
}

impl Handler for ClientEvents {
    fn on_sender_open(&mut self, _conn: &mut Connection, link: LinkId) {
        self.senders.push(link);
    }

    fn on_receiver_open(&mut self, _conn: &mut Connection, link: LinkId) {
        self.receivers.push(link);
    }

    fn on_message(&mut self, _conn: &mut Connection, link: LinkId, message: Message) {
        self.messages.push((link, message));
    }
}

pub struct TestClient {
    pub driver: ConnectionDriver,
    pub events: ClientEvents,
    io: DuplexStream,
}

impl TestClient {
    /// One exchange round: dispatch, flush, read whatever arrives within a
    /// short window, dispatch again.
    pub async fn process(&mut self) {
        self.driver.dispatch(&mut self.events);

        while !self.driver.write_buffer().is_empty() {
            let n = self.io.write(self.driver.write_buffer()).await.unwrap();
            self.driver.write_done(n);
        }

        if let Ok(Ok(n)) = tokio::time::timeout(
            Duration::from_millis(20),
            self.io.read(self.driver.read_buffer()),
        )
        .await
        {
            self.driver.read_done(n);
        }

        self.driver.dispatch(&mut self.events);
    }

    pub async fn process_until(&mut self, pred: impl Fn(&ClientEvents) -> bool) {
        for _ in 0..50 {
            if pred(&self.events) {
                return;
            }

            self.process().await;
        }

        panic!("test client condition not reached");
    }

    /// Opens a sender towards `address` and waits for the broker to accept
    /// it, which happens once the queue binding completed.
    pub async fn open_sender(&mut self, address: &str) -> LinkId {
        let link = self.driver.connection_mut().open_sender(address);
        self.process_until(|e| e.senders.contains(&link)).await;

        link
    }

    pub async fn send(&mut self, link: LinkId, body: &str) {
        self.driver
            .connection_mut()
            .send(link, Message::from(body))
            .unwrap();
        self.process().await;
    }

    /// Subscribes to `address`, granting credit only after the broker
    /// bound and accepted the link.
    pub async fn subscribe(&mut self, address: &str, credit: u32) -> LinkId {
        let link = self.driver.connection_mut().open_receiver(address);
        self.process_until(|e| e.receivers.contains(&link)).await;

        self.driver.connection_mut().flow(link, credit).unwrap();
        self.process().await;

        link
    }

    /// Subscribes granting credit in the same write as the attach, so the
    /// broker sees the credit before the queue binding completes.
    pub async fn subscribe_eagerly(&mut self, address: &str, credit: u32) -> LinkId {
        let link = self.driver.connection_mut().open_receiver(address);
        self.driver.connection_mut().flow(link, credit).unwrap();
        self.process_until(|e| e.receivers.contains(&link)).await;

        link
    }

    /// Subscribes with a dynamic source, returning the queue address the
    /// broker assigned.
    pub async fn subscribe_dynamic(&mut self, credit: u32) -> (LinkId, String) {
        let link = self.driver.connection_mut().open_receiver_dynamic();
        self.process_until(|e| e.receivers.contains(&link)).await;

        let address = self
            .driver
            .connection()
            .link(link)
            .unwrap()
            .source_address()
            .to_string();

        self.driver.connection_mut().flow(link, credit).unwrap();
        self.process().await;

        (link, address)
    }

    pub async fn close_link(&mut self, link: LinkId) {
        self.driver
            .connection_mut()
            .close_link(link, Default::default())
            .unwrap();
        self.process().await;
    }

    pub async fn expect_messages(&mut self, count: usize) {
        self.process_until(|e| e.messages.len() >= count).await;
    }

    pub fn bodies(&self) -> Vec<String> {
        self.events
            .messages
            .iter()
            .map(|(_, m)| m.body_str().into_owned())
            .collect()
    }

    pub fn bodies_on(&self, link: LinkId) -> Vec<String> {
        self.events
            .messages
            .iter()
            .filter(|(l, _)| *l == link)
            .map(|(_, m)| m.body_str().into_owned())
            .collect()
    }
}
