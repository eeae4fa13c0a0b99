use std::collections::{HashMap, VecDeque};

use forgemq_codec::frame::{AttachArgs, ErrorCondition, Frame, Message, Role};
use log::trace;

use crate::handler::Handler;
use crate::namer::{LinkNamer, UuidLinkNamer};
use crate::EngineError;

/// Identity of a link on its connection.
///
/// Both endpoints address the link by the channel of its session and the
/// handle picked by the side that attached first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId {
    pub channel: u16,
    pub handle: u32,
}

#[derive(Default)]
pub struct ConnectionOptions {
    pub container_id: Option<String>,
}

#[derive(Debug)]
struct Session {
    local_closed: bool,
}

/// One unidirectional message flow attached to a session.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    name: String,
    local_role: Role,
    source_address: String,
    source_dynamic: bool,
    target_address: String,
    credit: u32,
    local_attached: bool,
    remote_attached: bool,
    local_closed: bool,
    remote_closed: bool,
    error: ErrorCondition,
}

impl Link {
    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role of this side of the link.
    pub fn role(&self) -> Role {
        self.local_role
    }

    pub fn source_address(&self) -> &str {
        &self.source_address
    }

    pub fn source_dynamic(&self) -> bool {
        self.source_dynamic
    }

    pub fn target_address(&self) -> &str {
        &self.target_address
    }

    /// Credit granted by the peer, overwritten by every flow frame.
    pub fn credit(&self) -> u32 {
        self.credit
    }

    /// Both sides have attached.
    pub fn attached(&self) -> bool {
        self.local_attached && self.remote_attached
    }

    pub fn closed(&self) -> bool {
        self.local_closed && self.remote_closed
    }

    /// Condition the peer closed the link with, empty for a plain close.
    pub fn error(&self) -> &ErrorCondition {
        &self.error
    }
}

/// Endpoint state of one AMQP connection.
///
/// Operations queue frames which the owning driver encodes on its next
/// dispatch; nothing here touches byte buffers or sockets.
pub struct Connection {
    container_id: Option<String>,
    remote_container_id: String,
    local_open: bool,
    remote_open: bool,
    local_closed: bool,
    remote_closed: bool,
    error: ErrorCondition,
    sessions: HashMap<u16, Session>,
    links: HashMap<LinkId, Link>,
    namer: Box<dyn LinkNamer>,
    pending: VecDeque<Frame>,
    default_channel: Option<u16>,
    next_channel: u16,
    next_handle: u32,
}

impl Connection {
    pub(crate) fn new(container_id: Option<String>) -> Self {
        Connection {
            container_id,
            remote_container_id: String::new(),
            local_open: false,
            remote_open: false,
            local_closed: false,
            remote_closed: false,
            error: ErrorCondition::default(),
            sessions: HashMap::new(),
            links: HashMap::new(),
            namer: Box::new(UuidLinkNamer),
            pending: VecDeque::new(),
            default_channel: None,
            next_channel: 0,
            next_handle: 0,
        }
    }

    /// Id of the container owning this connection. A connection driven
    /// outside a container has none, which is a usage error.
    pub fn container(&self) -> Result<&str, EngineError> {
        self.container_id.as_deref().ok_or(EngineError::NoContainer)
    }

    pub fn remote_container(&self) -> &str {
        &self.remote_container_id
    }

    /// Installs a custom link namer for links opened without a name.
    pub fn set_link_namer(&mut self, namer: Box<dyn LinkNamer>) {
        self.namer = namer;
    }

    /// Sends the open frame. Idempotent; on the accepting side this is how a
    /// handler accepts the connection.
    pub fn open(&mut self) {
        if !self.local_open {
            self.local_open = true;
            self.pending.push_back(Frame::Open {
                container_id: self.container_id.clone().unwrap_or_default(),
            });
        }
    }

    /// Closes the connection, with an error condition or a plain close when
    /// the condition is empty.
    pub fn close(&mut self, error: ErrorCondition) {
        if !self.local_closed {
            self.local_closed = true;
            self.pending.push_back(Frame::Close { error });
        }
    }

    /// Both sides have exchanged close frames.
    pub fn closed(&self) -> bool {
        self.local_closed && self.remote_closed
    }

    /// Open in both directions and not closing.
    pub fn active(&self) -> bool {
        self.local_open && self.remote_open && !self.local_closed && !self.remote_closed
    }

    /// Condition the peer closed the connection with. Empty unless a close
    /// frame carrying an error was received.
    pub fn error(&self) -> &ErrorCondition {
        &self.error
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    /// Opens a sending link towards the queue at `address`.
    pub fn open_sender(&mut self, address: &str) -> LinkId {
        self.open_link(Role::Sender, "", false, address)
    }

    /// Opens a receiving link subscribed to the queue at `address`.
    pub fn open_receiver(&mut self, address: &str) -> LinkId {
        self.open_link(Role::Receiver, address, false, "")
    }

    /// Opens a receiving link asking the peer to assign the source queue.
    pub fn open_receiver_dynamic(&mut self) -> LinkId {
        self.open_link(Role::Receiver, "", true, "")
    }

    fn open_link(&mut self, role: Role, source: &str, dynamic: bool, target: &str) -> LinkId {
        self.open();

        let channel = self.ensure_session();
        let handle = self.next_handle;
        self.next_handle += 1;

        let id = LinkId { channel, handle };
        let name = self.namer.link_name();

        self.links.insert(
            id,
            Link {
                id,
                name: name.clone(),
                local_role: role,
                source_address: source.to_string(),
                source_dynamic: dynamic,
                target_address: target.to_string(),
                credit: 0,
                local_attached: true,
                remote_attached: false,
                local_closed: false,
                remote_closed: false,
                error: ErrorCondition::default(),
            },
        );

        self.pending.push_back(Frame::Attach(AttachArgs {
            channel,
            handle,
            name,
            role,
            source_address: source.to_string(),
            source_dynamic: dynamic,
            target_address: target.to_string(),
        }));

        id
    }

    fn ensure_session(&mut self) -> u16 {
        if let Some(channel) = self.default_channel {
            return channel;
        }

        let channel = self.next_channel;
        self.next_channel += 1;
        self.default_channel = Some(channel);
        self.sessions
            .insert(channel, Session { local_closed: false });
        self.pending.push_back(Frame::Begin { channel });

        channel
    }

    /// Completes a peer initiated sender link, advertising `source_address`
    /// as the queue it sends from. Idempotent, an already attached link is
    /// left alone.
    pub fn accept_sender(&mut self, id: LinkId, source_address: &str) -> Result<(), EngineError> {
        let link = self.links.get_mut(&id).ok_or(EngineError::UnknownLink)?;
        if link.local_attached {
            return Ok(());
        }

        link.local_attached = true;
        link.source_address = source_address.to_string();
        link.source_dynamic = false;

        let frame = Frame::Attach(AttachArgs {
            channel: id.channel,
            handle: id.handle,
            name: link.name.clone(),
            role: link.local_role,
            source_address: link.source_address.clone(),
            source_dynamic: false,
            target_address: link.target_address.clone(),
        });
        self.pending.push_back(frame);

        Ok(())
    }

    /// Completes a peer initiated receiver link. Idempotent like
    /// [`accept_sender`](Connection::accept_sender).
    pub fn accept_receiver(&mut self, id: LinkId, target_address: &str) -> Result<(), EngineError> {
        let link = self.links.get_mut(&id).ok_or(EngineError::UnknownLink)?;
        if link.local_attached {
            return Ok(());
        }

        link.local_attached = true;
        link.target_address = target_address.to_string();

        let frame = Frame::Attach(AttachArgs {
            channel: id.channel,
            handle: id.handle,
            name: link.name.clone(),
            role: link.local_role,
            source_address: link.source_address.clone(),
            source_dynamic: link.source_dynamic,
            target_address: link.target_address.clone(),
        });
        self.pending.push_back(frame);

        Ok(())
    }

    /// Grants `credit` transfers to the peer's sending side of the link.
    pub fn flow(&mut self, id: LinkId, credit: u32) -> Result<(), EngineError> {
        let link = self.links.get(&id).ok_or(EngineError::UnknownLink)?;
        if link.local_closed || link.remote_closed {
            return Err(EngineError::LinkClosed);
        }

        self.pending.push_back(Frame::Flow {
            channel: id.channel,
            handle: id.handle,
            credit,
        });

        Ok(())
    }

    /// Transfers a message on a sending link.
    pub fn send(&mut self, id: LinkId, message: Message) -> Result<(), EngineError> {
        let link = self.links.get_mut(&id).ok_or(EngineError::UnknownLink)?;
        if link.local_closed || link.remote_closed {
            return Err(EngineError::LinkClosed);
        }

        link.credit = link.credit.saturating_sub(1);
        self.pending.push_back(Frame::Transfer {
            channel: id.channel,
            handle: id.handle,
            message,
        });

        Ok(())
    }

    /// Closes a link, with an error condition or plainly when empty.
    pub fn close_link(&mut self, id: LinkId, error: ErrorCondition) -> Result<(), EngineError> {
        let link = self.links.get_mut(&id).ok_or(EngineError::UnknownLink)?;
        if !link.local_closed {
            link.local_closed = true;
            self.pending.push_back(Frame::Detach {
                channel: id.channel,
                handle: id.handle,
                error,
            });
        }

        Ok(())
    }

    pub(crate) fn remote_close_received(&self) -> bool {
        self.remote_closed
    }

    pub(crate) fn take_pending(&mut self) -> Option<Frame> {
        self.pending.pop_front()
    }

    /// Applies one decoded frame to the endpoint state and fires the
    /// matching handler callbacks.
    pub(crate) fn handle_frame(&mut self, frame: Frame, handler: &mut dyn Handler) {
        trace!("incoming {frame:?}");

        match frame {
            Frame::Header => (),
            Frame::Open { container_id } => {
                self.remote_open = true;
                self.remote_container_id = container_id;
                handler.on_connection_open(self);
            }
            Frame::Close { error } => {
                self.remote_closed = true;
                if !self.local_closed {
                    self.local_closed = true;
                    self.pending.push_back(Frame::Close {
                        error: ErrorCondition::default(),
                    });
                }

                if error.is_empty() {
                    handler.on_connection_close(self);
                } else {
                    self.error = error;
                    handler.on_connection_error(self);
                }
            }
            Frame::Begin { channel } => {
                // Keep locally picked channels clear of the peer's.
                self.next_channel = self.next_channel.max(channel + 1);
                self.sessions
                    .insert(channel, Session { local_closed: false });
                handler.on_session_open(self, channel);
            }
            Frame::End { channel, error } => {
                if !error.is_empty() {
                    handler.on_error(&error);
                }
                handler.on_session_close(self, channel);

                let locally_closed = self
                    .sessions
                    .get(&channel)
                    .map(|s| s.local_closed)
                    .unwrap_or(true);
                if !locally_closed {
                    if let Some(session) = self.sessions.get_mut(&channel) {
                        session.local_closed = true;
                    }
                    self.pending.push_back(Frame::End {
                        channel,
                        error: ErrorCondition::default(),
                    });
                }

                for link in self.links.values_mut().filter(|l| l.id.channel == channel) {
                    link.remote_closed = true;
                    link.local_closed = true;
                }
            }
            Frame::Attach(args) => self.handle_attach(args, handler),
            Frame::Flow {
                channel,
                handle,
                credit,
            } => {
                let id = LinkId { channel, handle };
                match self.links.get_mut(&id) {
                    Some(link) if link.local_role == Role::Sender => link.credit = credit,
                    Some(_) => return,
                    None => {
                        handler.on_error(&ErrorCondition::new(
                            "amqp:not-found",
                            format!("flow for unknown link {handle} on channel {channel}"),
                        ));

                        return;
                    }
                }

                handler.on_sendable(self, id);
            }
            Frame::Transfer {
                channel,
                handle,
                message,
            } => {
                let id = LinkId { channel, handle };
                let deliverable =
                    matches!(self.links.get(&id), Some(link) if link.local_role == Role::Receiver);

                if deliverable {
                    handler.on_message(self, id, message);
                } else {
                    handler.on_error(&ErrorCondition::new(
                        "amqp:not-found",
                        format!("transfer for unknown link {handle} on channel {channel}"),
                    ));
                }
            }
            Frame::Detach {
                channel,
                handle,
                error,
            } => {
                let id = LinkId { channel, handle };
                let Some(link) = self.links.get_mut(&id) else {
                    return;
                };

                link.remote_closed = true;
                link.error = error;
                let role = link.local_role;
                let locally_closed = link.local_closed;

                if !locally_closed {
                    link.local_closed = true;
                    self.pending.push_back(Frame::Detach {
                        channel,
                        handle,
                        error: ErrorCondition::default(),
                    });
                }

                match role {
                    Role::Sender => handler.on_sender_close(self, id),
                    Role::Receiver => handler.on_receiver_close(self, id),
                }
            }
        }
    }

    fn handle_attach(&mut self, args: AttachArgs, handler: &mut dyn Handler) {
        let id = LinkId {
            channel: args.channel,
            handle: args.handle,
        };

        if let Some(link) = self.links.get_mut(&id) {
            // Completion of a locally opened link. A dynamic source comes
            // back with the address the peer assigned.
            link.remote_attached = true;
            link.source_address = args.source_address;
            let role = link.local_role;

            match role {
                Role::Sender => handler.on_sender_open(self, id),
                Role::Receiver => handler.on_receiver_open(self, id),
            }

            return;
        }

        // Keep locally picked handles clear of the peer's.
        self.next_handle = self.next_handle.max(args.handle + 1);

        let local_role = args.role.opposite();
        self.links.insert(
            id,
            Link {
                id,
                name: args.name,
                local_role,
                source_address: args.source_address,
                source_dynamic: args.source_dynamic,
                target_address: args.target_address,
                credit: 0,
                local_attached: false,
                remote_attached: true,
                local_closed: false,
                remote_closed: false,
                error: ErrorCondition::default(),
            },
        );

        match local_role {
            Role::Sender => handler.on_sender_open(self, id),
            Role::Receiver => handler.on_receiver_open(self, id),
        }
    }
}
