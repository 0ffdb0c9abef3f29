//! Connection: one transport-level link carrying multiplexed operations.
//!
//! A connection wraps a stream plus the framing, the identify handshake,
//! and the two operation tables. Two background tasks drive it:
//!
//! - the I/O task owns the stream exclusively and selects over a shutdown
//!   signal, the write queue, and the socket read; incoming bytes are
//!   framed incrementally and dispatched,
//! - the sweep task periodically expires operations past their deadline,
//!   with a fuzzed period so many connections do not sweep in lock-step.
//!
//! Lifecycle: `pre-identify → identified → closing → closed`. The closing
//! transition (`reset_all`) is idempotent, drains both op tables exactly
//! once, removes the connection from the peer registry, and announces the
//! socket close on the channel.

mod handshake;
mod ops;

pub(crate) use ops::{CallResult, InboundOp, OutboundOp};

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use switchboard_core::{HostPort, Providers, RandomProvider, TaskProvider, TimeProvider};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::channel::{ChannelConfig, ChannelEvent, ChannelInner};
use crate::error::CallError;
use crate::rpc::{CallResponseArgs, InboundCall, ResponsePromise, SendOptions};
use crate::wire::{
    self, CONNECTION_SCOPE_ID, CallRequestBody, CallResponseBody, ErrorBody, ErrorCode, Frame,
    FrameBody, ResponseCode,
};

use handshake::{Handshake, IdSequence};

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    /// Accepted from the listener.
    Inbound,
    /// Dialed by this endpoint.
    Outbound,
}

impl std::fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionDirection::Inbound => write!(f, "in"),
            ConnectionDirection::Outbound => write!(f, "out"),
        }
    }
}

struct ConnectionState {
    /// The identity the peer announced; None until identified.
    remote_name: Option<HostPort>,
    handshake: Handshake,
    ids: IdSequence,
    ops: ops::OpTables,
    closing: bool,
}

/// One connection between this endpoint and a peer.
pub struct Connection<P: Providers> {
    direction: ConnectionDirection,
    /// Transport address of the remote (not authoritative identity).
    remote_addr: String,
    providers: P,
    config: ChannelConfig,
    channel: Weak<ChannelInner<P>>,
    state: RefCell<ConnectionState>,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    shutdown_tx: mpsc::UnboundedSender<CallError>,
}

impl<P: Providers> Connection<P> {
    /// Wrap a stream in a connection and start its background tasks.
    ///
    /// Outbound connections immediately queue their init request, so it is
    /// the first frame on the wire ahead of any call traffic.
    pub(crate) fn spawn<S>(
        channel: &Rc<ChannelInner<P>>,
        stream: S,
        direction: ConnectionDirection,
        remote_addr: String,
    ) -> Result<Rc<Self>, CallError>
    where
        S: AsyncRead + AsyncWrite + Unpin + 'static,
    {
        let local = channel.local_host_port();
        if remote_addr == local.to_string() {
            return Err(CallError::InvalidArgument {
                message: format!("refusing connection to self at {remote_addr}"),
            });
        }

        let providers = channel.providers().clone();
        let config = channel.config().clone();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        let conn = Rc::new(Self {
            direction,
            remote_addr,
            providers: providers.clone(),
            config: config.clone(),
            channel: Rc::downgrade(channel),
            state: RefCell::new(ConnectionState {
                remote_name: None,
                handshake: Handshake::new(direction),
                ids: IdSequence::new(),
                ops: ops::OpTables::new(),
                closing: false,
            }),
            write_tx,
            shutdown_tx,
        });

        channel.socket_opened();
        providers.task().spawn_task(
            "connection-io",
            io_task(conn.clone(), stream, write_rx, shutdown_rx),
        );
        providers.task().spawn_task(
            "timeout-sweep",
            sweep_task(
                Rc::downgrade(&conn),
                providers.time().clone(),
                providers.random().clone(),
                config,
            ),
        );

        if direction == ConnectionDirection::Outbound
            && let Err(e) = conn.send_init_request(&local, channel.process_name())
        {
            Connection::reset_all(&conn, &e);
            return Err(e);
        }

        tracing::debug!(direction = %direction, remote = %conn.remote_addr, "connection started");
        Ok(conn)
    }

    /// Which side opened this connection.
    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    /// The transport address of the remote end.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// The identity the peer announced, once identified.
    pub fn remote_name(&self) -> Option<HostPort> {
        self.state.borrow().remote_name.clone()
    }

    /// Number of in-flight outbound operations.
    pub fn out_pending(&self) -> usize {
        self.state.borrow().ops.out_pending()
    }

    /// Number of in-flight inbound operations.
    pub fn in_pending(&self) -> usize {
        self.state.borrow().ops.in_pending()
    }

    /// Time of the most recent operation timeout, or zero when a frame has
    /// arrived since.
    pub fn last_timeout_time(&self) -> Duration {
        self.state.borrow().ops.last_timeout_time()
    }

    /// Whether the connection has entered its terminal state.
    pub fn is_closing(&self) -> bool {
        self.state.borrow().closing
    }

    /// The registry key this connection lives under.
    ///
    /// Outbound connections are registered under their dialed destination;
    /// inbound connections under the identity they announced.
    pub(crate) fn registry_key(&self) -> Option<HostPort> {
        match self.direction {
            ConnectionDirection::Outbound => HostPort::parse(&self.remote_addr).ok(),
            ConnectionDirection::Inbound => self.state.borrow().remote_name.clone(),
        }
    }

    fn send_init_request(&self, local: &HostPort, process_name: &str) -> Result<(), CallError> {
        let id = {
            let mut st = self.state.borrow_mut();
            let ConnectionState { ids, ops, .. } = &mut *st;
            ids.next_id(|id| ops.contains_out(id))?
        };
        self.queue_frame(&handshake::init_request(id, local, process_name))
    }

    fn queue_frame(&self, frame: &Frame) -> Result<(), CallError> {
        let bytes = wire::serialize_frame(frame)?;
        self.write_tx
            .send(bytes)
            .map_err(|_| CallError::SocketClosed)
    }

    /// Issue an outbound call on this connection.
    ///
    /// Returns the receiver for the caller's continuation; it fires exactly
    /// once with the response, a timeout, or the reset error. The write
    /// itself only fails here when the connection is already down -
    /// completion is driven by the response or the sweep.
    pub(crate) fn send_call(
        &self,
        options: &SendOptions,
        arg1: Vec<u8>,
        arg2: Vec<u8>,
        arg3: Vec<u8>,
    ) -> Result<oneshot::Receiver<CallResult>, CallError> {
        let mut st = self.state.borrow_mut();
        if st.closing {
            return Err(CallError::SocketClosed);
        }

        let ConnectionState { ids, ops, .. } = &mut *st;
        let id = ids.next_id(|id| ops.contains_out(id))?;
        let frame = Frame {
            id,
            body: FrameBody::CallRequest(CallRequestBody {
                service: options.service.clone(),
                arg1,
                arg2,
                arg3,
            }),
        };
        let bytes = wire::serialize_frame(&frame)?;

        let (tx, rx) = oneshot::channel();
        ops.insert_out(
            id,
            OutboundOp {
                start: self.providers.time().now(),
                timeout: options.timeout,
                complete: Some(tx),
                timed_out: false,
            },
        );

        if self.write_tx.send(bytes).is_err() {
            ops.remove_out(id);
            return Err(CallError::SocketClosed);
        }
        Ok(rx)
    }

    /// Complete an outbound operation with the peer's result.
    ///
    /// Unknown ids are dropped with a warning; a late response after the
    /// sweep already expired the operation lands here.
    pub(crate) fn complete_out_op(&self, id: u32, result: CallResult) {
        let mut st = self.state.borrow_mut();
        match st.ops.remove_out(id) {
            None => {
                tracing::warn!(id, remote = %self.remote_addr, "response for unknown operation id; dropping (late after timeout?)");
            }
            Some(mut op) => op.fire(result),
        }
    }

    /// Write the response for an inbound operation.
    ///
    /// Silently drops completions whose operation is gone (expired or
    /// reset) and logs duplicates.
    pub(crate) fn complete_in_op(&self, id: u32, code: ResponseCode, arg1: Vec<u8>, arg2: Vec<u8>) {
        {
            let mut st = self.state.borrow_mut();
            if st.closing {
                tracing::debug!(id, "response after reset; dropping");
                return;
            }
            match st.ops.get_in_mut(id) {
                None => {
                    tracing::warn!(id, remote = %self.remote_addr, "response for an inbound op no longer in the table; dropping");
                    return;
                }
                Some(op) if op.response_sent => {
                    tracing::warn!(id, "duplicate response for inbound op; ignoring");
                    return;
                }
                Some(op) => op.response_sent = true,
            }
        }

        let frame = Frame {
            id,
            body: FrameBody::CallResponse(CallResponseBody { code, arg1, arg2 }),
        };
        match self.queue_frame(&frame) {
            Ok(()) => {
                self.state.borrow_mut().ops.remove_in(id);
            }
            Err(e) => {
                tracing::debug!(id, error = %e, "failed to queue response frame");
            }
        }
    }

    /// One sweep pass. Returns false when the sweeper should stop.
    fn sweep(&self, now: Duration) -> bool {
        let report = {
            let mut st = self.state.borrow_mut();
            if st.closing {
                return false;
            }
            st.ops.sweep_at(
                now,
                self.config.req_timeout_default,
                self.config.server_timeout_default,
            )
        };

        match report.verdict {
            ops::SweepVerdict::DestroySocket => {
                tracing::warn!(remote = %self.remote_addr, "no frames since last timeout; destroying socket");
                let _ = self.shutdown_tx.send(CallError::SocketClosed);
                false
            }
            ops::SweepVerdict::Swept => {
                if report.expired_out > 0 || report.expired_in > 0 || report.stale_out > 0 {
                    tracing::debug!(
                        remote = %self.remote_addr,
                        expired_out = report.expired_out,
                        expired_in = report.expired_in,
                        stale_out = report.stale_out,
                        "sweep expired operations"
                    );
                }
                true
            }
        }
    }

    /// Terminal transition: drain both tables exactly once, fail every
    /// outbound caller with the triggering error, leave the registry, and
    /// announce the close. Idempotent.
    pub(crate) fn reset_all(conn: &Rc<Self>, error: &CallError) {
        {
            let mut st = conn.state.borrow_mut();
            if st.closing {
                return;
            }
            st.closing = true;
            let fired = st.ops.drain_all(error);
            tracing::debug!(
                remote = %conn.remote_addr,
                direction = %conn.direction,
                %error,
                fired,
                "connection reset"
            );
        }

        // Stop the I/O task; harmless when the reset originated there.
        let _ = conn.shutdown_tx.send(error.clone());

        if let Some(channel) = conn.channel.upgrade() {
            // Drop the registry reference before announcing the close.
            channel.remove_connection(conn);
            channel.emit(ChannelEvent::SocketClosed {
                remote_addr: conn.remote_addr.clone(),
                error: error.clone(),
            });
        }
    }
}

/// Compute the next sweep delay: the base interval plus uniform fuzz in
/// `[-fuzz/2, +fuzz/2)`, so sweeps across many connections stay spread out.
pub(crate) fn sweep_delay<R: RandomProvider>(
    interval: Duration,
    fuzz: Duration,
    random: &R,
) -> Duration {
    if fuzz.is_zero() {
        return interval;
    }
    interval.saturating_sub(fuzz / 2) + fuzz.mul_f64(random.random_ratio())
}

async fn sweep_task<P: Providers>(
    conn: Weak<Connection<P>>,
    time: P::Time,
    random: P::Random,
    config: ChannelConfig,
) {
    loop {
        let delay = sweep_delay(config.timeout_check_interval, config.timeout_fuzz, &random);
        if time.sleep(delay).await.is_err() {
            break;
        }
        let Some(conn) = conn.upgrade() else {
            break;
        };
        if !conn.sweep(time.now()) {
            break;
        }
    }
}

/// The connection's I/O loop: owns the stream exclusively.
async fn io_task<P, S>(
    conn: Rc<Connection<P>>,
    mut stream: S,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown_rx: mpsc::UnboundedReceiver<CallError>,
) where
    P: Providers,
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    let mut read_buf: Vec<u8> = Vec::with_capacity(4096);
    let error: CallError;

    loop {
        tokio::select! {
            reason = shutdown_rx.recv() => {
                error = reason.unwrap_or(CallError::SocketClosed);
                // Half-close: flush what we owe the peer, then stop.
                let _ = stream.shutdown().await;
                break;
            }

            queued = write_rx.recv() => {
                match queued {
                    Some(bytes) => {
                        if let Err(e) = stream.write_all(&bytes).await {
                            error = CallError::Socket { message: e.to_string() };
                            break;
                        }
                        // Drain whatever else is queued before flushing once.
                        let mut failed = None;
                        while let Ok(more) = write_rx.try_recv() {
                            if let Err(e) = stream.write_all(&more).await {
                                failed = Some(e);
                                break;
                            }
                        }
                        if let Some(e) = failed {
                            error = CallError::Socket { message: e.to_string() };
                            break;
                        }
                        if let Err(e) = stream.flush().await {
                            error = CallError::Socket { message: e.to_string() };
                            break;
                        }
                    }
                    None => {
                        error = CallError::SocketClosed;
                        break;
                    }
                }
            }

            read = async {
                let mut chunk = [0u8; 4096];
                stream.read(&mut chunk).await.map(|n| (chunk, n))
            } => {
                match read {
                    Ok((_chunk, 0)) => {
                        error = CallError::SocketClosed;
                        break;
                    }
                    Ok((chunk, n)) => {
                        read_buf.extend_from_slice(&chunk[..n]);
                        if let Err(e) = process_read_buffer(&conn, &mut read_buf) {
                            error = e;
                            break;
                        }
                    }
                    Err(e) => {
                        error = CallError::Socket { message: e.to_string() };
                        break;
                    }
                }
            }
        }
    }

    Connection::reset_all(&conn, &error);
    if let Some(channel) = conn.channel.upgrade() {
        channel.socket_task_finished();
    }
}

/// Parse and dispatch every whole frame in the buffer.
///
/// Parse errors reset the connection: a stream that has lost framing has
/// no recoverable position.
fn process_read_buffer<P: Providers>(
    conn: &Rc<Connection<P>>,
    buf: &mut Vec<u8>,
) -> Result<(), CallError> {
    loop {
        match wire::try_deserialize_frame(buf) {
            Ok(Some((frame, consumed))) => {
                buf.drain(..consumed);
                on_frame(conn, frame)?;
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(remote = %conn.remote_addr, error = %e, "frame parse error; resetting connection");
                return Err(CallError::Parse(e));
            }
        }
    }
}

fn on_frame<P: Providers>(conn: &Rc<Connection<P>>, frame: Frame) -> Result<(), CallError> {
    // Any whole frame proves the peer alive.
    conn.state.borrow_mut().ops.mark_frame_received();

    match frame.body {
        FrameBody::InitRequest(init) => {
            let remote = {
                let mut st = conn.state.borrow_mut();
                let remote = st.handshake.on_init_request(&init)?;
                st.remote_name = Some(remote.clone());
                remote
            };
            tracing::debug!(remote = %remote, process = %init.process_name, "peer identified");

            let channel = conn.channel.upgrade().ok_or(CallError::ChannelDestroyed)?;
            // The response must precede anything else we write.
            conn.queue_frame(&handshake::init_response(
                frame.id,
                &channel.local_host_port(),
                channel.process_name(),
            ))?;
            channel.adopt_inbound(remote, conn)
        }
        FrameBody::InitResponse(init) => {
            let remote = {
                let mut st = conn.state.borrow_mut();
                let remote = st.handshake.on_init_response(&init)?;
                st.remote_name = Some(remote.clone());
                remote
            };
            tracing::debug!(remote = %remote, process = %init.process_name, "peer identified");

            let channel = conn.channel.upgrade().ok_or(CallError::ChannelDestroyed)?;
            channel.note_identified(&remote);
            Ok(())
        }
        FrameBody::CallRequest(body) => on_call_request(conn, frame.id, body),
        FrameBody::CallResponse(body) => {
            conn.state.borrow().handshake.require_identified()?;
            conn.complete_out_op(frame.id, response_to_result(body));
            Ok(())
        }
        FrameBody::Error(body) => {
            if frame.id == CONNECTION_SCOPE_ID {
                tracing::warn!(remote = %conn.remote_addr, code = ?body.code, message = %body.message, "peer reported connection-scope error");
                Err(CallError::Protocol {
                    message: format!("peer error: {}", body.message),
                })
            } else {
                conn.complete_out_op(frame.id, Err(error_body_to_call_error(body)));
                Ok(())
            }
        }
    }
}

/// Register an inbound operation and hand it to the endpoint handler.
///
/// The handler runs on its own task, one scheduling step removed from the
/// receive path, so its failures cannot corrupt frame dispatch.
fn on_call_request<P: Providers>(
    conn: &Rc<Connection<P>>,
    id: u32,
    body: CallRequestBody,
) -> Result<(), CallError> {
    let channel = conn.channel.upgrade().ok_or(CallError::ChannelDestroyed)?;

    let replaced = {
        let mut st = conn.state.borrow_mut();
        st.handshake.require_identified()?;
        let start = conn.providers.time().now();
        st.ops.insert_in(
            id,
            InboundOp {
                start,
                response_sent: false,
            },
        )
    };
    if replaced {
        tracing::warn!(id, remote = %conn.remote_addr, "peer reused a live operation id; replacing the inbound op");
    }

    let handler = channel.endpoint_handler(&body.arg1);
    let call = InboundCall {
        service: body.service,
        name: body.arg1,
        arg2: body.arg2,
        arg3: body.arg3,
    };

    let weak = Rc::downgrade(conn);
    let promise = ResponsePromise::new(move |code, arg1, arg2| {
        if let Some(conn) = weak.upgrade() {
            conn.complete_in_op(id, code, arg1, arg2);
        }
    });

    conn.providers.task().spawn_task("inbound-op", async move {
        handler.handle(call, promise);
    });
    Ok(())
}

fn response_to_result(body: CallResponseBody) -> CallResult {
    match body.code {
        ResponseCode::Ok => Ok(CallResponseArgs {
            arg1: body.arg1,
            arg2: body.arg2,
        }),
        ResponseCode::Declined => Err(CallError::Declined {
            message: String::from_utf8_lossy(&body.arg1).into_owned(),
        }),
        ResponseCode::UnknownEndpoint => Err(CallError::UnknownEndpoint {
            name: String::from_utf8_lossy(&body.arg1).into_owned(),
        }),
        ResponseCode::Busy => Err(CallError::Busy {
            message: String::from_utf8_lossy(&body.arg1).into_owned(),
        }),
    }
}

fn error_body_to_call_error(body: ErrorBody) -> CallError {
    match body.code {
        ErrorCode::Protocol => CallError::Protocol {
            message: body.message,
        },
        ErrorCode::BadRequest => CallError::Declined {
            message: body.message,
        },
        ErrorCode::Busy => CallError::Busy {
            message: body.message,
        },
    }
}
