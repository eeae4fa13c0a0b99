use std::collections::VecDeque;

use forgemq_codec::frame::{ErrorCondition, Message};
use forgemq_engine::{
    Connection, ConnectionDriver, ConnectionOptions, EngineError, Handler, LinkId, LinkNamer,
    Transport,
};

/// Handler that records incoming endpoints, errors and messages. With
/// `auto_accept` it completes peer initiated links immediately, which is
/// what a plain test peer wants.
#[derive(Default)]
struct RecordHandler {
    auto_accept: bool,
    senders: VecDeque<LinkId>,
    receivers: VecDeque<LinkId>,
    messages: VecDeque<Message>,
    transport_errors: Vec<String>,
    connection_errors: Vec<String>,
}

impl RecordHandler {
    fn auto_accepting() -> Self {
        RecordHandler {
            auto_accept: true,
            ..Default::default()
        }
    }
}

impl Handler for RecordHandler {
    fn on_sender_open(&mut self, conn: &mut Connection, link: LinkId) {
        if self.auto_accept {
            let source = conn.link(link).unwrap().source_address().to_string();
            let _ = conn.accept_sender(link, &source);
        }
        self.senders.push_back(link);
    }

    fn on_receiver_open(&mut self, conn: &mut Connection, link: LinkId) {
        if self.auto_accept {
            let target = conn.link(link).unwrap().target_address().to_string();
            let _ = conn.accept_receiver(link, &target);
        }
        self.receivers.push_back(link);
    }

    fn on_message(&mut self, _conn: &mut Connection, _link: LinkId, message: Message) {
        self.messages.push_back(message);
    }

    fn on_transport_error(&mut self, transport: &Transport) {
        self.transport_errors.push(transport.error().what());
    }

    fn on_connection_error(&mut self, conn: &mut Connection) {
        self.connection_errors.push(conn.error().what());
    }
}

/// A pair of drivers that talk to each other in memory, simulating a
/// connection without a socket.
struct DriverPair {
    a: ConnectionDriver,
    b: ConnectionDriver,
}

impl DriverPair {
    fn new() -> Self {
        let mut a = ConnectionDriver::new();
        let mut b = ConnectionDriver::new();

        a.connect(ConnectionOptions {
            container_id: Some("container-a".to_string()),
        });
        b.accept(ConnectionOptions {
            container_id: Some("container-b".to_string()),
        });

        DriverPair { a, b }
    }

    fn process(&mut self, ha: &mut RecordHandler, hb: &mut RecordHandler) {
        self.a.dispatch(ha);
        self.b.dispatch(hb);
        shovel(&mut self.a, &mut self.b);
        shovel(&mut self.b, &mut self.a);
        self.a.dispatch(ha);
        self.b.dispatch(hb);
    }

    /// Runs enough rounds for any in-flight handshake to settle.
    fn settle(&mut self, ha: &mut RecordHandler, hb: &mut RecordHandler) {
        for _ in 0..4 {
            self.process(ha, hb);
        }
    }
}

fn shovel(from: &mut ConnectionDriver, to: &mut ConnectionDriver) {
    while !from.write_buffer().is_empty() {
        let n = from.write_buffer().len().min(to.read_buffer().len());
        to.read_buffer()[..n].copy_from_slice(&from.write_buffer()[..n]);
        from.write_done(n);
        to.read_done(n);
    }
}

/// Namer handing out successive single character names.
struct SeqNamer {
    next: u8,
}

impl SeqNamer {
    fn new(start: char) -> Self {
        SeqNamer { next: start as u8 }
    }
}

impl LinkNamer for SeqNamer {
    fn link_name(&mut self) -> String {
        let name = (self.next as char).to_string();
        self.next += 1;

        name
    }
}

#[test]
fn driver_link_naming() {
    let mut ha = RecordHandler::auto_accepting();
    let mut hb = RecordHandler::auto_accepting();
    let mut pair = DriverPair::new();

    pair.a
        .connection_mut()
        .set_link_namer(Box::new(SeqNamer::new('x')));
    pair.b
        .connection_mut()
        .set_link_namer(Box::new(SeqNamer::new('b')));

    pair.b.connection_mut().open();

    pair.a.connection_mut().open_sender("foo");
    pair.settle(&mut ha, &mut hb);

    let s = ha.senders.pop_front().unwrap();
    assert_eq!(pair.a.connection().link(s).unwrap().name(), "x");

    let r = hb.receivers.pop_front().unwrap();
    assert_eq!(pair.b.connection().link(r).unwrap().name(), "x");

    pair.a.connection_mut().open_receiver("bar");
    pair.settle(&mut ha, &mut hb);

    let r = ha.receivers.pop_front().unwrap();
    assert_eq!(pair.a.connection().link(r).unwrap().name(), "y");

    let s = hb.senders.pop_front().unwrap();
    assert_eq!(pair.b.connection().link(s).unwrap().name(), "y");

    pair.b.connection_mut().open_receiver("");
    pair.settle(&mut ha, &mut hb);

    let s = ha.senders.pop_front().unwrap();
    assert_eq!(pair.a.connection().link(s).unwrap().name(), "b");

    let r = hb.receivers.pop_front().unwrap();
    assert_eq!(pair.b.connection().link(r).unwrap().name(), "b");
}

#[test]
fn endpoint_close_propagates_conditions() {
    let mut ha = RecordHandler::auto_accepting();
    let mut hb = RecordHandler::auto_accepting();
    let mut pair = DriverPair::new();

    pair.b.connection_mut().open();

    let ax = pair.a.connection_mut().open_sender("x");
    let ay = pair.a.connection_mut().open_receiver("y");
    pair.settle(&mut ha, &mut hb);

    let bx = hb.receivers.pop_front().unwrap();
    let by = hb.senders.pop_front().unwrap();

    // Close a link with an error condition.
    pair.a
        .connection_mut()
        .close_link(ax, ErrorCondition::new("err", "foo bar"))
        .unwrap();
    pair.settle(&mut ha, &mut hb);

    let bx = pair.b.connection().link(bx).unwrap();
    assert!(bx.closed());
    assert_eq!(bx.error().name(), "err");
    assert_eq!(bx.error().description(), "foo bar");
    assert_eq!(bx.error().what(), "err: foo bar");

    // Close a link with an empty condition.
    pair.a
        .connection_mut()
        .close_link(ay, ErrorCondition::default())
        .unwrap();
    pair.settle(&mut ha, &mut hb);

    let by = pair.b.connection().link(by).unwrap();
    assert!(by.closed());
    assert!(by.error().is_empty());

    // Close the connection.
    pair.a
        .connection_mut()
        .close(ErrorCondition::new("conn", "bad connection"));
    pair.settle(&mut ha, &mut hb);

    assert!(pair.b.connection().closed());
    assert_eq!(pair.b.connection().error().what(), "conn: bad connection");
    assert_eq!(hb.connection_errors, vec!["conn: bad connection".to_string()]);
}

#[test]
fn driver_disconnected_aborts_the_transport() {
    let mut ha = RecordHandler::default();
    let mut hb = RecordHandler::default();
    let mut pair = DriverPair::new();

    pair.b.connection_mut().open();
    pair.settle(&mut ha, &mut hb);

    assert!(pair.a.connection().active());
    assert!(pair.b.connection().active());

    // Abort a with an error condition. The AMQP connection is still open.
    pair.a
        .disconnected(ErrorCondition::new("oops", "driver failure"));

    assert!(!pair.a.dispatch(&mut ha));
    assert!(!pair.a.connection().closed());
    assert!(pair.a.connection().error().is_empty());
    assert_eq!(ha.connection_errors.len(), 0);
    assert_eq!(pair.a.transport().error().what(), "oops: driver failure");
    assert_eq!(ha.transport_errors, vec!["oops: driver failure".to_string()]);

    // Repeated dispatches stay terminal and do not renotify.
    assert!(!pair.a.dispatch(&mut ha));
    assert_eq!(ha.transport_errors.len(), 1);

    // The peer's I/O detects the abort as end of input, then reports it.
    pair.b.read_close();
    pair.b.disconnected(ErrorCondition::new("broken", "it broke"));

    assert!(!pair.b.dispatch(&mut hb));
    assert!(!pair.b.connection().closed());
    assert!(pair.b.connection().error().is_empty());
    assert_eq!(hb.connection_errors.len(), 0);
    assert_eq!(
        pair.b.transport().error().what(),
        "broken: it broke (connection aborted)"
    );
    assert_eq!(
        hb.transport_errors,
        vec!["broken: it broke (connection aborted)".to_string()]
    );
}

#[test]
fn disconnected_with_empty_condition_gets_a_default() {
    let mut ha = RecordHandler::default();
    let mut hb = RecordHandler::default();
    let mut pair = DriverPair::new();

    pair.b.connection_mut().open();
    pair.settle(&mut ha, &mut hb);

    pair.a.disconnected(ErrorCondition::default());

    assert!(!pair.a.dispatch(&mut ha));
    assert_eq!(
        pair.a.transport().error().what(),
        "amqp:connection:framing-error: connection aborted"
    );
}

#[test]
fn connection_without_container_is_an_error() {
    let driver = ConnectionDriver::new();

    assert_eq!(
        driver.connection().container(),
        Err(EngineError::NoContainer)
    );
}

#[test]
fn transfers_flow_between_the_pair() {
    let mut ha = RecordHandler::auto_accepting();
    let mut hb = RecordHandler::auto_accepting();
    let mut pair = DriverPair::new();

    pair.b.connection_mut().open();

    let sender = pair.a.connection_mut().open_sender("inbox");
    pair.settle(&mut ha, &mut hb);

    pair.a
        .connection_mut()
        .send(sender, Message::from("first"))
        .unwrap();
    pair.a
        .connection_mut()
        .send(sender, Message::from("second"))
        .unwrap();
    pair.settle(&mut ha, &mut hb);

    assert_eq!(hb.messages.len(), 2);
    assert_eq!(hb.messages.pop_front().unwrap().body, b"first".to_vec());
    assert_eq!(hb.messages.pop_front().unwrap().body, b"second".to_vec());
}
