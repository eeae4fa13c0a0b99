//! Buffer driven, I/O agnostic connection engine.
//!
//! The engine knows nothing about sockets. An I/O layer feeds incoming bytes
//! through [`ConnectionDriver::read_buffer`] / [`ConnectionDriver::read_done`]
//! and ships outgoing bytes from [`ConnectionDriver::write_buffer`] /
//! [`ConnectionDriver::write_done`]. Each [`ConnectionDriver::dispatch`] call
//! advances the protocol state machine and fires [`Handler`] callbacks for
//! the endpoint events decoded from the input.
//!
//! Endpoint operations (opening links, granting credit, sending messages)
//! queue frames on the [`Connection`] which the driver encodes on the next
//! dispatch, so entity code never touches byte buffers directly.
pub mod driver;
pub mod endpoint;
pub mod handler;
pub mod namer;

pub use driver::{ConnectionDriver, Transport};
pub use endpoint::{Connection, ConnectionOptions, Link, LinkId};
pub use handler::Handler;
pub use namer::{LinkNamer, UuidLinkNamer};

use std::fmt;

/// Synchronous misuse errors raised directly to the caller.
///
/// Asynchronous failures (transport loss, peer closes) are never returned
/// from endpoint calls, they arrive as [`Handler`] callbacks.
#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    /// The connection has no owning container.
    NoContainer,
    /// The link id does not name a link on this connection.
    UnknownLink,
    /// The link has been closed, no further transfers are possible.
    LinkClosed,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NoContainer => write!(f, "connection has no container"),
            EngineError::UnknownLink => write!(f, "unknown link"),
            EngineError::LinkClosed => write!(f, "link is closed"),
        }
    }
}

impl std::error::Error for EngineError {}
