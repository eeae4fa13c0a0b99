use bytes::{Buf, BytesMut};
use forgemq_codec::codec::{FrameCodec, PROTOCOL_HEADER};
use forgemq_codec::frame::{ErrorCondition, Frame};
use log::trace;
use tokio_util::codec::{Decoder, Encoder};

use crate::endpoint::{Connection, ConnectionOptions};
use crate::handler::Handler;

const READ_CHUNK: usize = 8 * 1024;

/// Byte stream side of a driver. Carries the transport error once the
/// stream has failed.
#[derive(Default)]
pub struct Transport {
    error: ErrorCondition,
}

impl Transport {
    /// The error that took the transport down, empty while the transport is
    /// healthy or was shut down cleanly.
    pub fn error(&self) -> &ErrorCondition {
        &self.error
    }
}

/// Pure byte-buffer AMQP endpoint.
///
/// The owning I/O code copies incoming bytes into [`read_buffer`] and
/// acknowledges them with [`read_done`], transmits from [`write_buffer`]
/// acknowledging with [`write_done`], and calls [`dispatch`] in between to
/// run the state machine. No I/O happens here, which is what makes driver
/// pairs testable over in-memory byte streams.
///
/// [`read_buffer`]: ConnectionDriver::read_buffer
/// [`read_done`]: ConnectionDriver::read_done
/// [`write_buffer`]: ConnectionDriver::write_buffer
/// [`write_done`]: ConnectionDriver::write_done
/// [`dispatch`]: ConnectionDriver::dispatch
pub struct ConnectionDriver {
    conn: Connection,
    codec: FrameCodec,
    read_stage: Vec<u8>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    transport: Transport,
    read_closed: bool,
    notified_error: bool,
    notified_close: bool,
}

impl Default for ConnectionDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionDriver {
    pub fn new() -> Self {
        ConnectionDriver {
            conn: Connection::new(None),
            codec: FrameCodec::default(),
            read_stage: vec![0u8; READ_CHUNK],
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            transport: Transport::default(),
            read_closed: false,
            notified_error: false,
            notified_close: false,
        }
    }

    /// Starts client side negotiation: protocol header plus the open frame.
    pub fn connect(&mut self, opts: ConnectionOptions) {
        self.conn = Connection::new(opts.container_id);
        self.write_buf.extend_from_slice(&PROTOCOL_HEADER);
        self.conn.open();
    }

    /// Starts server side negotiation. The connection is accepted by the
    /// handler calling [`Connection::open`] from `on_connection_open`.
    pub fn accept(&mut self, opts: ConnectionOptions) {
        self.conn = Connection::new(opts.container_id);
        self.write_buf.extend_from_slice(&PROTOCOL_HEADER);
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Region into which the I/O code writes incoming bytes.
    pub fn read_buffer(&mut self) -> &mut [u8] {
        &mut self.read_stage[..]
    }

    /// Declares the first `n` bytes of the read buffer valid input.
    pub fn read_done(&mut self, n: usize) {
        self.read_buf.extend_from_slice(&self.read_stage[..n]);
    }

    /// Marks end of input: the peer is gone without a close frame unless
    /// one was already received.
    pub fn read_close(&mut self) {
        self.read_closed = true;
    }

    /// Bytes the driver wants transmitted.
    pub fn write_buffer(&self) -> &[u8] {
        &self.write_buf
    }

    /// Declares the first `n` bytes of the write buffer transmitted.
    pub fn write_done(&mut self, n: usize) {
        self.write_buf.advance(n);
    }

    /// Advances the state machine, firing handler callbacks for every event
    /// decoded from the input and encoding queued endpoint frames into the
    /// write buffer. Returns false once the connection has reached a
    /// terminal state and no further dispatches are required.
    pub fn dispatch(&mut self, handler: &mut dyn Handler) -> bool {
        if !self.transport.error.is_empty() {
            self.notify_terminal(handler);

            return false;
        }

        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.conn.handle_frame(frame, handler),
                Ok(None) => break,
                Err(e) => {
                    self.abort(ErrorCondition::new(
                        "amqp:connection:framing-error",
                        e.to_string(),
                    ));
                    self.notify_terminal(handler);

                    return false;
                }
            }
        }

        while let Some(frame) = self.conn.take_pending() {
            trace!("outgoing {frame:?}");

            if self.codec.encode(frame, &mut self.write_buf).is_err() {
                unreachable!("frame encoding is infallible");
            }
        }

        if self.conn.closed() && self.write_buf.is_empty() {
            if !self.notified_close {
                self.notified_close = true;
                handler.on_transport_close(&self.transport);
            }

            return false;
        }

        true
    }

    /// Aborts the transport with the given condition.
    ///
    /// The AMQP connection stays readable but inactive: it is not closed
    /// and its error stays empty, because no peer close frame was
    /// exchanged. When the abort follows a peer abort observed through
    /// [`read_close`], `" (connection aborted)"` is appended to the
    /// condition; an empty condition is replaced by a default one.
    ///
    /// [`read_close`]: ConnectionDriver::read_close
    pub fn disconnected(&mut self, mut condition: ErrorCondition) {
        let condition = if condition.is_empty() {
            ErrorCondition::new("amqp:connection:framing-error", "connection aborted")
        } else {
            if self.read_closed && !self.conn.remote_close_received() {
                condition.amend_description(" (connection aborted)");
            }

            condition
        };

        self.write_buf.clear();
        self.transport.error = condition;
    }

    fn abort(&mut self, condition: ErrorCondition) {
        self.write_buf.clear();
        self.transport.error = condition;
    }

    fn notify_terminal(&mut self, handler: &mut dyn Handler) {
        if !self.notified_error {
            self.notified_error = true;
            handler.on_transport_error(&self.transport);
        }
        if !self.notified_close {
            self.notified_close = true;
            handler.on_transport_close(&self.transport);
        }
    }
}
