//! Endpoint handler trait and built-in handlers.

use std::rc::Rc;

use crate::error::CallError;

use super::response::ResponsePromise;

/// One inbound operation as delivered to a handler.
#[derive(Debug, Clone)]
pub struct InboundCall {
    /// Logical service name from the request frame; may be empty.
    pub service: String,
    /// The endpoint name the caller addressed (arg1).
    pub name: Vec<u8>,
    /// Second argument, opaque.
    pub arg2: Vec<u8>,
    /// Third argument, opaque.
    pub arg3: Vec<u8>,
}

impl InboundCall {
    /// The endpoint name decoded for display; non-UTF-8 bytes are replaced.
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Handler for inbound operations on a registered endpoint name.
///
/// Handlers run as their own local task, one scheduling step removed from
/// the receive path, so a slow or panicking handler cannot stall frame
/// dispatch. The promise must be fulfilled exactly once; it may be stored
/// and fulfilled after the handler returns.
pub trait EndpointHandler {
    /// Process one inbound call.
    fn handle(&self, call: InboundCall, response: ResponsePromise);
}

/// Adapter turning a plain closure into an [`EndpointHandler`].
pub(crate) struct FnHandler<F>(pub F);

impl<F> EndpointHandler for FnHandler<F>
where
    F: Fn(InboundCall, ResponsePromise),
{
    fn handle(&self, call: InboundCall, response: ResponsePromise) {
        (self.0)(call, response);
    }
}

/// Synthesized handler for names with no registration: fails the caller
/// with an unknown-endpoint response.
pub(crate) struct NotFoundHandler;

impl NotFoundHandler {
    pub(crate) fn shared() -> Rc<dyn EndpointHandler> {
        Rc::new(NotFoundHandler)
    }
}

impl EndpointHandler for NotFoundHandler {
    fn handle(&self, call: InboundCall, response: ResponsePromise) {
        response.send_error(&CallError::UnknownEndpoint {
            name: call.name_lossy(),
        });
    }
}
