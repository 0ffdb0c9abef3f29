//! # switchboard-core
//!
//! Core abstractions for the switchboard RPC runtime.
//!
//! This crate provides the foundational traits and types that the transport
//! layer builds on. Application code depends on these abstractions rather
//! than concrete implementations, which keeps every interaction with the
//! outside world injectable and therefore testable.
//!
//! ## The Provider Pattern
//!
//! A channel endpoint touches the outside world through a small set of
//! operations: time, networking, task spawning, and randomness. Each is
//! abstracted behind a trait with a production Tokio implementation, so
//! tests can substitute deterministic providers (a seeded RNG, a manual
//! clock) without changing transport code.
//!
//! | Trait | Production | Deterministic | Purpose |
//! |-------|------------|---------------|---------|
//! | [`TimeProvider`] | [`TokioTimeProvider`] | [`ManualTimeProvider`] | Deadlines, sweep cadence |
//! | [`TaskProvider`] | [`TokioTaskProvider`] | — | Local task spawning |
//! | [`RandomProvider`] | [`TokioRandomProvider`] | [`SeededRandomProvider`] | Sweep jitter |
//! | [`NetworkProvider`] | [`TokioNetworkProvider`] | — | Connect, listen, accept |
//!
//! **Important**: transport code never calls tokio directly.
//! - ❌ `tokio::time::sleep()`
//! - ✅ `time_provider.sleep()`
//!
//! ## Core Types
//!
//! - [`HostPort`]: a validated `"host:port"` pair, the canonical identity a
//!   channel announces to its peers.
//! - [`PayloadCodec`] / [`JsonCodec`]: named argument schemes for the typed
//!   call layer.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod network;
mod providers;
mod random;
mod task;
mod time;
mod types;

// Codec exports
pub use codec::{CodecError, JSON_SCHEME, JsonCodec, PayloadCodec};

// Provider trait exports
pub use network::{NetworkProvider, TcpListenerTrait, TokioNetworkProvider, TokioTcpListener};
pub use providers::{Providers, SeededTokioProviders, TokioProviders};
pub use random::{RandomProvider, SeededRandomProvider, TokioRandomProvider};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{ManualTimeProvider, TimeError, TimeProvider, TokioTimeProvider};

// Core type exports
pub use types::{HostPort, HostPortParseError};
