use crate::transport::{ConnId, Transport};
use signage_core::wire::{parse_inbound, FrameError, Handshake, InboundFrame};
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] FrameError),
    #[error("register handshake without a name")]
    MissingName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Unregistered,
    Registered { name: String },
}

/// Result of feeding one frame to a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStep {
    /// Handshake accepted; bind `name` and replay cached zones.
    Register { name: String, handshake: Handshake },
    /// Valid JSON this handler has no use for.
    Ignored { kind: Option<String> },
}

/// Per-connection handshake state: Unregistered -> Registered, then closed
/// by consuming the link. A registered display may send the handshake again
/// to rename itself.
#[derive(Debug)]
pub struct DisplayLink {
    transport: Transport,
    remote: Option<SocketAddr>,
    state: LinkState,
    max_frame_bytes: usize,
}

impl DisplayLink {
    pub fn new(transport: Transport, remote: Option<SocketAddr>, max_frame_bytes: usize) -> Self {
        Self {
            transport,
            remote,
            state: LinkState::Unregistered,
            max_frame_bytes,
        }
    }

    pub fn conn_id(&self) -> ConnId {
        self.transport.conn_id()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn name(&self) -> Option<&str> {
        match &self.state {
            LinkState::Registered { name } => Some(name),
            _ => None,
        }
    }

    /// Errors leave the state untouched; the connection stays open.
    pub fn accept(&mut self, text: &str) -> Result<LinkStep, ProtocolError> {
        match parse_inbound(text, self.max_frame_bytes)? {
            InboundFrame::Register(handshake) => {
                let name = handshake
                    .display_name()
                    .ok_or(ProtocolError::MissingName)?
                    .to_string();
                self.state = LinkState::Registered { name: name.clone() };
                Ok(LinkStep::Register { name, handshake })
            }
            InboundFrame::Other { kind } => Ok(LinkStep::Ignored { kind }),
        }
    }

    /// Returns the name held at close time, if any.
    pub fn close(self) -> Option<String> {
        match self.state {
            LinkState::Registered { name } => Some(name),
            LinkState::Unregistered => None,
        }
    }
}
