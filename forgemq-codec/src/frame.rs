//! Frame types exchanged between two endpoints.
//!
//! The layout follows the AMQP 1.0 performative set reduced to what the
//! broker speaks: connection open/close, session begin/end, link
//! attach/detach, flow and transfer.

use std::fmt;

/// Protocol error condition attached to close and detach frames.
///
/// A condition is a symbolic name plus a free-text description. Both parts
/// may be empty, in which case the close is a plain one without an error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorCondition {
    name: String,
    description: String,
}

impl ErrorCondition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ErrorCondition {
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.description.is_empty()
    }

    /// Human readable form, `"<name>: <description>"` when both parts are
    /// present, empty when both are absent.
    pub fn what(&self) -> String {
        match (self.name.is_empty(), self.description.is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.name.clone(),
            (true, false) => self.description.clone(),
            (false, false) => format!("{}: {}", self.name, self.description),
        }
    }

    /// Appends extra text to the description, used by the transport when a
    /// connection is aborted before the close handshake.
    pub fn amend_description(&mut self, suffix: &str) {
        if self.description.is_empty() {
            self.description = suffix.trim_start().to_string();
        } else {
            self.description.push_str(suffix);
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.what())
    }
}

/// An application message carried by a transfer frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Message { body: body.into() }
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::new(s.as_bytes().to_vec())
    }
}

/// Role of the endpoint sending an attach frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachArgs {
    pub channel: u16,
    pub handle: u32,
    pub name: String,
    pub role: Role,
    /// Source address of the link, the queue a sender reads from.
    pub source_address: String,
    /// The peer asks the other side to pick the source address.
    pub source_dynamic: bool,
    /// Target address of the link, the queue a receiver feeds.
    pub target_address: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Protocol header, the first 8 bytes on the wire.
    Header,
    Open {
        container_id: String,
    },
    Begin {
        channel: u16,
    },
    Attach(AttachArgs),
    Flow {
        channel: u16,
        handle: u32,
        credit: u32,
    },
    Transfer {
        channel: u16,
        handle: u32,
        message: Message,
    },
    Detach {
        channel: u16,
        handle: u32,
        error: ErrorCondition,
    },
    End {
        channel: u16,
        error: ErrorCondition,
    },
    Close {
        error: ErrorCondition,
    },
}

impl Frame {
    /// Channel the frame belongs to, 0 for connection level frames.
    pub fn channel(&self) -> u16 {
        match self {
            Frame::Header | Frame::Open { .. } | Frame::Close { .. } => 0,
            Frame::Begin { channel } => *channel,
            Frame::Attach(args) => args.channel,
            Frame::Flow { channel, .. } => *channel,
            Frame::Transfer { channel, .. } => *channel,
            Frame::Detach { channel, .. } => *channel,
            Frame::End { channel, .. } => *channel,
        }
    }
}
