use crate::driver::Transport;
use crate::endpoint::{Connection, LinkId};
use forgemq_codec::frame::{ErrorCondition, Message};
use log::error;

/// Callback surface for endpoint lifecycle events.
///
/// The driver invokes these synchronously from [`dispatch`] as it decodes
/// frames. Callbacks receive the mutable [`Connection`] so they can respond
/// on the endpoint (accept, open links, send) without reaching back into the
/// driver.
///
/// [`dispatch`]: crate::driver::ConnectionDriver::dispatch
#[allow(unused_variables)]
pub trait Handler {
    /// The peer asked to open the connection. Accept with [`Connection::open`].
    fn on_connection_open(&mut self, conn: &mut Connection) {}

    /// The peer closed the connection without an error condition.
    fn on_connection_close(&mut self, conn: &mut Connection) {}

    /// The peer closed the connection with an error condition, available via
    /// [`Connection::error`].
    fn on_connection_error(&mut self, conn: &mut Connection) {}

    fn on_session_open(&mut self, conn: &mut Connection, channel: u16) {}

    fn on_session_close(&mut self, conn: &mut Connection, channel: u16) {}

    /// A sender link is open, either because the peer attached a receiving
    /// link or because a locally opened sender completed its attach.
    fn on_sender_open(&mut self, conn: &mut Connection, link: LinkId) {}

    fn on_sender_close(&mut self, conn: &mut Connection, link: LinkId) {}

    fn on_receiver_open(&mut self, conn: &mut Connection, link: LinkId) {}

    fn on_receiver_close(&mut self, conn: &mut Connection, link: LinkId) {}

    /// The peer granted credit on a sender link; the current credit is on
    /// the link.
    fn on_sendable(&mut self, conn: &mut Connection, link: LinkId) {}

    /// A message arrived on a receiver link.
    fn on_message(&mut self, conn: &mut Connection, link: LinkId, message: Message) {}

    /// The byte stream is gone. Terminal, the transport error describes why.
    fn on_transport_error(&mut self, transport: &Transport) {}

    /// The transport has reached its end, orderly or not. Always the last
    /// callback a handler sees.
    fn on_transport_close(&mut self, transport: &Transport) {}

    /// Catch-all for conditions no specific callback consumed.
    fn on_error(&mut self, condition: &ErrorCondition) {
        error!("error: {}", condition.what());
    }
}
