//! # switchboard-transport
//!
//! A client/server runtime for a bidirectional, multiplexed binary RPC
//! transport. Every endpoint is simultaneously a client and a server: it
//! listens on a host/port, accepts inbound connections, dials peers on
//! demand, negotiates identity on each connection, and multiplexes
//! request/response operations over single byte streams with per-operation
//! timeouts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              Application Code                   │
//! │      register(name, handler) / send(...)       │
//! ├─────────────────────────────────────────────────┤
//! │     Channel (endpoint surface)                  │
//! │     • Endpoint-handler table                    │
//! │     • Peer registry: host:port → connections    │
//! │     • Listener + outbound allocation            │
//! ├─────────────────────────────────────────────────┤
//! │     Connection (lifecycle + op tables)          │
//! │     • Identify handshake                        │
//! │     • In/out operation tables by frame id       │
//! │     • Fuzzed timeout sweep, reset on failure    │
//! ├─────────────────────────────────────────────────┤
//! │     Wire Format (framing)                       │
//! │     • Length-prefixed frames                    │
//! │     • CRC32C checksums                          │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`Channel`] | Endpoint surface: listen, register, send, quit |
//! | [`Connection`] | One link carrying many multiplexed operations |
//! | [`wire`] | Binary framing with CRC32C checksums |
//! | [`EndpointHandler`] | Server side of one endpoint name |
//!
//! ## Quick Start
//!
//! ```ignore
//! use switchboard_transport::{Channel, SendOptions, TokioProviders};
//!
//! let channel = Channel::builder(TokioProviders::new())
//!     .host_port("127.0.0.1:4040")
//!     .build_listening()
//!     .await?;
//!
//! channel.register_fn("echo", |call, response| {
//!     response.send(call.arg2.clone(), call.arg3.clone());
//! });
//!
//! let reply = channel
//!     .send(SendOptions::to_host("127.0.0.1:4041"), b"echo".to_vec(), a2, a3)
//!     .await?;
//! ```
//!
//! ## Concurrency model
//!
//! The runtime is a single-threaded cooperative reactor: one channel and
//! all of its connections run as local tasks on one thread, with state in
//! `Rc<RefCell<_>>` and no locks. Responses complete in any order relative
//! to requests; callers must not assume FIFO. Identify precedes any call
//! frame on a connection, and the socket-closed event fires exactly once
//! per connection, after its reset.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use switchboard_core::{
    HostPort, HostPortParseError, JsonCodec, ManualTimeProvider, NetworkProvider, PayloadCodec,
    Providers, RandomProvider, SeededRandomProvider, SeededTokioProviders, TaskProvider,
    TcpListenerTrait, TimeProvider, TokioNetworkProvider, TokioProviders, TokioRandomProvider,
    TokioTaskProvider, TokioTimeProvider,
};

// =============================================================================
// Modules
// =============================================================================

/// Channel surface: builder, configuration, events.
pub mod channel;

/// Connection lifecycle, operation tables, timeout sweep.
pub mod connection;

/// Error types for channel operations.
pub mod error;

pub(crate) mod peer;

/// Call surface: options, handlers, response promises.
pub mod rpc;

/// Binary wire format.
pub mod wire;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use channel::{Channel, ChannelBuilder, ChannelConfig, ChannelEvent};
pub use connection::{Connection, ConnectionDirection};
pub use error::CallError;
pub use rpc::{
    CallResponseArgs, EndpointHandler, InboundCall, ResponsePromise, SendOptions, json_endpoint,
};
pub use wire::{Frame, FrameBody, WireError};
