//! ResponsePromise: server-side promise for answering an inbound operation.
//!
//! Every inbound call is delivered with a promise that must be fulfilled
//! with either response args or an error. If the promise is dropped without
//! being fulfilled, a declined response is sent automatically so the caller
//! is not left waiting for its deadline.
//!
//! A promise may outlive the handler invocation: store it and fulfill it
//! later for long-running operations.

use crate::error::CallError;
use crate::wire::ResponseCode;

/// Sender function delivering the (code, arg1, arg2) triple back to the
/// connection. Injected to decouple the promise from connection internals.
pub(crate) type ResponseSender = Box<dyn FnOnce(ResponseCode, Vec<u8>, Vec<u8>)>;

/// Promise for sending the response to one inbound operation.
///
/// Consuming `send`/`send_error` make double-completion impossible at the
/// type level; the connection additionally drops completions whose
/// operation has already expired or been reset.
pub struct ResponsePromise {
    sender: Option<ResponseSender>,
}

impl ResponsePromise {
    pub(crate) fn new<F>(sender: F) -> Self
    where
        F: FnOnce(ResponseCode, Vec<u8>, Vec<u8>) + 'static,
    {
        Self {
            sender: Some(Box::new(sender)),
        }
    }

    /// Send a successful response.
    pub fn send(mut self, arg1: Vec<u8>, arg2: Vec<u8>) {
        if let Some(sender) = self.sender.take() {
            sender(ResponseCode::Ok, arg1, arg2);
        }
    }

    /// Fail the caller with the given error.
    ///
    /// The error kind picks the wire response code; the rendered message
    /// travels as the first response argument.
    pub fn send_error(mut self, error: &CallError) {
        if let Some(sender) = self.sender.take() {
            let arg1 = match error {
                CallError::UnknownEndpoint { name } => name.clone().into_bytes(),
                other => other.to_string().into_bytes(),
            };
            sender(ResponseCode::from(error), arg1, Vec::new());
        }
    }

    /// Whether the promise has already been fulfilled.
    pub fn is_fulfilled(&self) -> bool {
        self.sender.is_none()
    }
}

impl Drop for ResponsePromise {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            tracing::warn!("response promise dropped without fulfillment - declining call");
            sender(
                ResponseCode::Declined,
                b"handler dropped the response".to_vec(),
                Vec::new(),
            );
        }
    }
}
