//! Error types for the channel runtime.

use crate::wire::WireError;
use switchboard_core::HostPortParseError;

/// Errors surfaced to callers of the channel.
///
/// Transport and parse failures are local to one connection: pending
/// outbound callers receive the error and the connection resets, but the
/// channel itself survives. Only [`CallError::Shutdown`] comes from
/// tearing the whole channel down.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// A caller-supplied argument was missing or malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the argument.
        message: String,
    },

    /// The channel has been shut down; no further operations are accepted.
    #[error("channel destroyed")]
    ChannelDestroyed,

    /// The peer has no handler registered under the requested name.
    #[error("no such endpoint: {name}")]
    UnknownEndpoint {
        /// The endpoint name that was requested (lossily decoded).
        name: String,
    },

    /// The peer refused the call.
    #[error("call declined by peer: {message}")]
    Declined {
        /// The peer's refusal message.
        message: String,
    },

    /// The peer reported itself too busy to take the call.
    #[error("peer busy: {message}")]
    Busy {
        /// The peer's message.
        message: String,
    },

    /// Every 32-bit frame id is currently in flight; the call was refused
    /// rather than reusing a live id.
    #[error("too many pending operations")]
    TooManyPending,

    /// The per-operation deadline passed before a response arrived.
    #[error("operation timed out")]
    Timeout,

    /// The transport reported an error.
    #[error("socket error: {message}")]
    Socket {
        /// The underlying transport error.
        message: String,
    },

    /// The transport closed.
    #[error("socket closed")]
    SocketClosed,

    /// The peer sent bytes that do not parse as a frame.
    #[error("frame parse error: {0}")]
    Parse(#[from] WireError),

    /// The peer violated the protocol (e.g. a call before identify).
    #[error("protocol error: {message}")]
    Protocol {
        /// What the peer did wrong.
        message: String,
    },

    /// The channel was shut down while the operation was pending.
    #[error("channel shut down")]
    Shutdown,

    /// The typed-call layer failed to encode or decode a payload.
    #[error("codec error: {message}")]
    Codec {
        /// Details from the codec.
        message: String,
    },
}

impl From<HostPortParseError> for CallError {
    fn from(err: HostPortParseError) -> Self {
        CallError::InvalidArgument {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CallError {
    fn from(err: std::io::Error) -> Self {
        CallError::Socket {
            message: err.to_string(),
        }
    }
}
