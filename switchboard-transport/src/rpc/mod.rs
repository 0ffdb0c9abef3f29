//! Call surface types: options, results, handlers, and response promises.
//!
//! The server side of the channel hands every inbound operation to an
//! [`EndpointHandler`] together with a [`ResponsePromise`] that must be
//! fulfilled exactly once. The client side gets back [`CallResponseArgs`]
//! or a [`CallError`](crate::CallError).

mod handler;
mod json;
mod response;

pub use handler::{EndpointHandler, InboundCall};
pub(crate) use handler::{FnHandler, NotFoundHandler};
pub use json::json_endpoint;
pub use response::ResponsePromise;

use std::time::Duration;

/// Options for an outbound call.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Destination `"host:port"`. Required.
    pub host: Option<String>,
    /// Logical service name carried on the request frame. May be empty.
    pub service: String,
    /// Per-operation deadline; the channel default applies when `None`.
    pub timeout: Option<Duration>,
}

impl SendOptions {
    /// Options targeting the given host with channel-default timeout.
    pub fn to_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    /// Set the per-operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the service name.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }
}

/// The two response argument byte strings of a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallResponseArgs {
    /// First response argument, opaque.
    pub arg1: Vec<u8>,
    /// Second response argument, opaque.
    pub arg2: Vec<u8>,
}
