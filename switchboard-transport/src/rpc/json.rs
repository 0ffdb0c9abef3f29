//! The `json` argument scheme: typed handlers over the opaque-bytes
//! protocol.
//!
//! The request payload travels in `arg3` and the scheme name in `arg2`;
//! a call tagged with a different scheme is declined before any decoding
//! is attempted. Responses mirror the layout: scheme name first, payload
//! second.

use std::marker::PhantomData;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use switchboard_core::{JsonCodec, PayloadCodec};

use crate::error::CallError;

use super::handler::{EndpointHandler, InboundCall};
use super::response::ResponsePromise;

/// Wrap a typed function as an [`EndpointHandler`] speaking the `json`
/// scheme.
///
/// The function's `Err` string is sent to the caller as a declined
/// response; scheme mismatches and undecodable request payloads are
/// declined too. A call with an empty `arg2` is treated as unspecified
/// and accepted.
///
/// # Example
///
/// ```ignore
/// channel.register("add", json_endpoint(|req: AddRequest| {
///     Ok::<_, String>(AddResponse { sum: req.a + req.b })
/// }));
/// ```
pub fn json_endpoint<Req, Resp, F>(func: F) -> Rc<dyn EndpointHandler>
where
    Req: DeserializeOwned + 'static,
    Resp: Serialize + 'static,
    F: Fn(Req) -> Result<Resp, String> + 'static,
{
    Rc::new(JsonEndpoint {
        func,
        _marker: PhantomData,
    })
}

struct JsonEndpoint<Req, Resp, F> {
    func: F,
    _marker: PhantomData<(Req, Resp)>,
}

impl<Req, Resp, F> EndpointHandler for JsonEndpoint<Req, Resp, F>
where
    Req: DeserializeOwned + 'static,
    Resp: Serialize + 'static,
    F: Fn(Req) -> Result<Resp, String> + 'static,
{
    fn handle(&self, call: InboundCall, response: ResponsePromise) {
        let codec = JsonCodec;
        if !call.arg2.is_empty() && call.arg2 != codec.scheme().as_bytes() {
            response.send_error(&CallError::Declined {
                message: format!(
                    "unsupported argument scheme {:?} (handler speaks {:?})",
                    String::from_utf8_lossy(&call.arg2),
                    codec.scheme(),
                ),
            });
            return;
        }

        let request: Req = match codec.decode(&call.arg3) {
            Ok(request) => request,
            Err(e) => {
                response.send_error(&CallError::Codec {
                    message: e.to_string(),
                });
                return;
            }
        };

        match (self.func)(request) {
            Ok(resp) => match codec.encode(&resp) {
                Ok(payload) => {
                    response.send(codec.scheme().as_bytes().to_vec(), payload);
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode json response");
                    response.send_error(&CallError::Codec {
                        message: e.to_string(),
                    });
                }
            },
            Err(message) => {
                response.send_error(&CallError::Declined { message });
            }
        }
    }
}
