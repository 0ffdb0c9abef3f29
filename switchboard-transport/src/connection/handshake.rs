//! Identify handshake state and frame-id allocation.
//!
//! Each connection starts with an init exchange: the dialing side sends an
//! init request announcing its canonical host/port, the accepting side
//! answers with an init response announcing its own. Call traffic before
//! the exchange completes is a protocol violation.

use switchboard_core::HostPort;

use crate::error::CallError;
use crate::wire::{Frame, FrameBody, InitBody};

use super::ConnectionDirection;

/// Handshake progress on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeState {
    /// Init exchange not yet complete.
    Pending,
    /// The peer has announced its identity.
    Identified,
}

/// The per-connection identify state machine.
pub(crate) struct Handshake {
    direction: ConnectionDirection,
    state: HandshakeState,
}

impl Handshake {
    pub(crate) fn new(direction: ConnectionDirection) -> Self {
        Self {
            direction,
            state: HandshakeState::Pending,
        }
    }

    pub(crate) fn is_identified(&self) -> bool {
        self.state == HandshakeState::Identified
    }

    /// Build the init body announcing our identity.
    pub(crate) fn init_body(local: &HostPort, process_name: &str) -> InitBody {
        InitBody {
            host_port: local.to_string(),
            process_name: process_name.to_string(),
        }
    }

    /// Handle an init request from the peer.
    ///
    /// Only the accepting side of a connection receives init requests; the
    /// dialing side sent one and expects a response.
    pub(crate) fn on_init_request(&mut self, init: &InitBody) -> Result<HostPort, CallError> {
        if self.direction != ConnectionDirection::Inbound {
            return Err(CallError::Protocol {
                message: "init request on an outbound connection".to_string(),
            });
        }
        self.identify(init)
    }

    /// Handle an init response from the peer.
    pub(crate) fn on_init_response(&mut self, init: &InitBody) -> Result<HostPort, CallError> {
        if self.direction != ConnectionDirection::Outbound {
            return Err(CallError::Protocol {
                message: "init response on an inbound connection".to_string(),
            });
        }
        self.identify(init)
    }

    /// Reject call traffic until the peer has identified.
    pub(crate) fn require_identified(&self) -> Result<(), CallError> {
        match self.state {
            HandshakeState::Identified => Ok(()),
            HandshakeState::Pending => Err(CallError::Protocol {
                message: "call frame before identify".to_string(),
            }),
        }
    }

    fn identify(&mut self, init: &InitBody) -> Result<HostPort, CallError> {
        if self.state == HandshakeState::Identified {
            return Err(CallError::Protocol {
                message: "duplicate init frame".to_string(),
            });
        }
        let host_port = HostPort::parse(&init.host_port).map_err(|e| CallError::Protocol {
            message: format!("peer announced invalid host/port: {e}"),
        })?;
        self.state = HandshakeState::Identified;
        Ok(host_port)
    }
}

/// Frame-id allocator: a wrapping 32-bit sequence.
///
/// Id 0 is reserved for connection-scope error frames and never issued. An
/// id still present in the outbound table is refused rather than reused;
/// hitting that means four billion operations are in flight at once.
pub(crate) struct IdSequence {
    next: u32,
}

impl IdSequence {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn next_id(&mut self, in_flight: impl Fn(u32) -> bool) -> Result<u32, CallError> {
        let id = self.next;
        self.next = match self.next.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        if in_flight(id) {
            return Err(CallError::TooManyPending);
        }
        Ok(id)
    }
}

/// Build an init-request frame with the given id.
pub(crate) fn init_request(id: u32, local: &HostPort, process_name: &str) -> Frame {
    Frame {
        id,
        body: FrameBody::InitRequest(Handshake::init_body(local, process_name)),
    }
}

/// Build an init-response frame echoing the request id.
pub(crate) fn init_response(id: u32, local: &HostPort, process_name: &str) -> Frame {
    Frame {
        id,
        body: FrameBody::InitResponse(Handshake::init_body(local, process_name)),
    }
}
