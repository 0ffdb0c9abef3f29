//! Channel observability events.
//!
//! Cross-component notifications are a small fixed set delivered over
//! channels; there is deliberately no string-keyed event bus.

use std::cell::RefCell;

use switchboard_core::HostPort;
use tokio::sync::mpsc;

use crate::error::CallError;

/// Events a channel announces to its subscribers.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The listener is bound and accepting.
    Listening {
        /// The canonical identity being listened on.
        host_port: HostPort,
    },

    /// A connection completed its identify handshake.
    Identified {
        /// The identity the peer announced.
        host_port: HostPort,
    },

    /// A connection reached its terminal state.
    SocketClosed {
        /// Transport address of the remote end.
        remote_addr: String,
        /// The error that tore the connection down.
        error: CallError,
    },

    /// An inbound call hit a registered endpoint.
    Endpoint {
        /// The endpoint name (lossily decoded).
        name: String,
    },

    /// An inbound call addressed a name with no registration.
    EndpointMissing {
        /// The endpoint name (lossily decoded).
        name: String,
    },
}

/// Fan-out of channel events to any number of subscribers.
///
/// Subscribers that drop their receiver are pruned on the next emit.
pub(crate) struct EventSubscribers {
    senders: RefCell<Vec<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl EventSubscribers {
    pub(crate) fn new() -> Self {
        Self {
            senders: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.borrow_mut().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: ChannelEvent) {
        self.senders
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
