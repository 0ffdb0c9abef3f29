//! Channel: the endpoint surface.
//!
//! A channel is a listening, dialing node. It owns the endpoint-handler
//! table, the peer registry, and the listener; outbound connections are
//! allocated on demand when a call targets an unknown peer, and inbound
//! connections are adopted into the registry once their peer identifies.

mod config;
mod events;

pub use config::ChannelConfig;
pub use events::ChannelEvent;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use switchboard_core::{
    HostPort, JsonCodec, NetworkProvider, PayloadCodec, Providers, TaskProvider, TcpListenerTrait,
};
use tokio::sync::{Notify, mpsc};

use crate::connection::{Connection, ConnectionDirection};
use crate::error::CallError;
use crate::peer::PeerTable;
use crate::rpc::{
    CallResponseArgs, EndpointHandler, FnHandler, InboundCall, NotFoundHandler, ResponsePromise,
    SendOptions,
};

use events::EventSubscribers;

/// Shared channel internals, referenced weakly by connections.
pub(crate) struct ChannelInner<P: Providers> {
    providers: P,
    config: ChannelConfig,
    process_name: String,
    host_port: RefCell<HostPort>,
    endpoints: RefCell<HashMap<Vec<u8>, Rc<dyn EndpointHandler>>>,
    peers: RefCell<PeerTable<Connection<P>>>,
    subscribers: EventSubscribers,
    destroyed: Cell<bool>,
    listening: Cell<bool>,
    listener_shutdown: RefCell<Option<mpsc::UnboundedSender<()>>>,
    /// Live socket tasks: one per connection plus one for the listener.
    /// `quit` completes when this reaches zero.
    open_sockets: Cell<usize>,
    sockets_closed: Notify,
}

impl<P: Providers> ChannelInner<P> {
    pub(crate) fn providers(&self) -> &P {
        &self.providers
    }

    pub(crate) fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub(crate) fn local_host_port(&self) -> HostPort {
        self.host_port.borrow().clone()
    }

    pub(crate) fn process_name(&self) -> &str {
        &self.process_name
    }

    pub(crate) fn emit(&self, event: ChannelEvent) {
        self.subscribers.emit(event);
    }

    /// Resolve the handler for an endpoint name, falling back to the
    /// synthesized not-found handler that fails the caller.
    pub(crate) fn endpoint_handler(&self, name: &[u8]) -> Rc<dyn EndpointHandler> {
        let endpoint_name = String::from_utf8_lossy(name).into_owned();
        match self.endpoints.borrow().get(name) {
            Some(handler) => {
                self.emit(ChannelEvent::Endpoint { name: endpoint_name });
                handler.clone()
            }
            None => {
                tracing::warn!(name = %endpoint_name, "inbound call for unregistered endpoint");
                self.emit(ChannelEvent::EndpointMissing { name: endpoint_name });
                NotFoundHandler::shared()
            }
        }
    }

    /// Adopt an identified inbound connection into the registry.
    pub(crate) fn adopt_inbound(
        &self,
        host_port: HostPort,
        conn: &Rc<Connection<P>>,
    ) -> Result<(), CallError> {
        if host_port == self.local_host_port() {
            return Err(CallError::InvalidArgument {
                message: format!("refusing to adopt self ({host_port}) as a peer"),
            });
        }
        {
            let mut peers = self.peers.borrow_mut();
            if peers.has_peer(&host_port) {
                tracing::warn!(peer = %host_port, "another connection already registered for peer; inserting anyway");
            }
            peers.set_peer(host_port.clone(), conn.clone(), ConnectionDirection::Inbound);
        }
        self.emit(ChannelEvent::Identified { host_port });
        Ok(())
    }

    /// An outbound connection learned its peer's identity.
    ///
    /// The registry entry stays under the dialed destination; the
    /// announced identity only feeds the event.
    pub(crate) fn note_identified(&self, host_port: &HostPort) {
        self.emit(ChannelEvent::Identified {
            host_port: host_port.clone(),
        });
    }

    pub(crate) fn remove_connection(&self, conn: &Rc<Connection<P>>) {
        if let Some(key) = conn.registry_key() {
            self.peers.borrow_mut().remove_peer(&key, conn);
        }
    }

    pub(crate) fn socket_opened(&self) {
        self.open_sockets.set(self.open_sockets.get() + 1);
    }

    pub(crate) fn socket_task_finished(&self) {
        let count = self.open_sockets.get();
        if count == 0 {
            tracing::error!("socket close accounting overshoot");
            return;
        }
        self.open_sockets.set(count - 1);
        self.sockets_closed.notify_waiters();
    }
}

/// A channel endpoint: listens, dials, and multiplexes operations.
pub struct Channel<P: Providers> {
    inner: Rc<ChannelInner<P>>,
}

impl<P: Providers> Clone for Channel<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Providers> Channel<P> {
    /// Start building a channel with the given providers bundle.
    pub fn builder(providers: P) -> ChannelBuilder<P> {
        ChannelBuilder::new(providers)
    }

    /// The canonical identity this channel announces.
    ///
    /// Fixed to the bound port once `listen()` succeeds when built with a
    /// wildcard port.
    pub fn host_port(&self) -> HostPort {
        self.inner.local_host_port()
    }

    /// Whether `quit()` has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Subscribe to channel events.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        self.inner.subscribers.subscribe()
    }

    /// Install a server handler under an endpoint name.
    ///
    /// Later registrations under the same name overwrite.
    pub fn register(&self, name: impl Into<Vec<u8>>, handler: Rc<dyn EndpointHandler>) {
        let name = name.into();
        if self
            .inner
            .endpoints
            .borrow_mut()
            .insert(name.clone(), handler)
            .is_some()
        {
            tracing::debug!(name = %String::from_utf8_lossy(&name), "endpoint handler replaced");
        }
    }

    /// Install a closure as a server handler.
    pub fn register_fn<F>(&self, name: impl Into<Vec<u8>>, handler: F)
    where
        F: Fn(InboundCall, ResponsePromise) + 'static,
    {
        self.register(name, Rc::new(FnHandler(handler)));
    }

    /// Bind the listener and start accepting inbound connections.
    pub async fn listen(&self) -> Result<(), CallError> {
        if self.inner.destroyed.get() {
            return Err(CallError::ChannelDestroyed);
        }
        if self.inner.listening.get() {
            return Err(CallError::InvalidArgument {
                message: "channel is already listening".to_string(),
            });
        }

        let bind_addr = self.inner.local_host_port().to_string();
        let listener = self.inner.providers.network().bind(&bind_addr).await?;

        // A wildcard port is fixed to whatever the bind produced; the
        // canonical identity must be dialable by peers.
        if self.inner.local_host_port().is_wildcard_port() {
            let actual = HostPort::parse(&listener.local_addr()?)?;
            let canonical = self.inner.host_port.borrow().with_port(actual.port());
            *self.inner.host_port.borrow_mut() = canonical;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        *self.inner.listener_shutdown.borrow_mut() = Some(shutdown_tx);
        self.inner.listening.set(true);
        self.inner.socket_opened();

        let inner = self.inner.clone();
        self.inner
            .providers
            .task()
            .spawn_task("listener-accept", accept_loop(inner, listener, shutdown_rx));

        let host_port = self.inner.local_host_port();
        tracing::info!(%host_port, "listening");
        self.inner.emit(ChannelEvent::Listening { host_port });
        Ok(())
    }

    /// Issue a call: resolve or create the outbound connection for
    /// `options.host`, send the request, and await the response.
    ///
    /// Fails with `ChannelDestroyed` after `quit()` and `InvalidArgument`
    /// when the host is missing or unparsable, before any I/O happens.
    pub async fn send(
        &self,
        options: SendOptions,
        arg1: Vec<u8>,
        arg2: Vec<u8>,
        arg3: Vec<u8>,
    ) -> Result<CallResponseArgs, CallError> {
        if self.inner.destroyed.get() {
            return Err(CallError::ChannelDestroyed);
        }
        let host = options.host.clone().ok_or_else(|| CallError::InvalidArgument {
            message: "options.host is required".to_string(),
        })?;
        let host_port = HostPort::parse(&host)?;

        let conn = self.connection_to(&host_port).await?;
        let rx = conn.send_call(&options, arg1, arg2, arg3)?;
        match rx.await {
            Ok(result) => result,
            // The continuation is fired on every path (response, timeout,
            // reset); a dropped sender means the connection vanished.
            Err(_) => Err(CallError::SocketClosed),
        }
    }

    /// Typed call over the `json` argument scheme: the request travels in
    /// `arg3`, the scheme name in `arg2`, and the response payload in the
    /// second response argument.
    pub async fn call_json<Req, Resp>(
        &self,
        options: SendOptions,
        name: impl Into<Vec<u8>>,
        request: &Req,
    ) -> Result<Resp, CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let codec = JsonCodec;
        let body = codec.encode(request).map_err(|e| CallError::Codec {
            message: e.to_string(),
        })?;
        let scheme = codec.scheme().as_bytes().to_vec();
        let response = self.send(options, name.into(), scheme, body).await?;
        codec.decode(&response.arg2).map_err(|e| CallError::Codec {
            message: e.to_string(),
        })
    }

    /// The preferred connection for a peer, dialing one if none exists.
    async fn connection_to(&self, host_port: &HostPort) -> Result<Rc<Connection<P>>, CallError> {
        if let Some(conn) = self.inner.peers.borrow().get_peer(host_port) {
            return Ok(conn);
        }
        self.add_peer(host_port).await
    }

    /// Dial a peer and register the outbound connection under its
    /// destination. Refuses the channel's own identity.
    pub async fn add_peer(&self, host_port: &HostPort) -> Result<Rc<Connection<P>>, CallError> {
        if self.inner.destroyed.get() {
            return Err(CallError::ChannelDestroyed);
        }
        if *host_port == self.inner.local_host_port() {
            return Err(CallError::InvalidArgument {
                message: format!("refusing to add self ({host_port}) as a peer"),
            });
        }

        let stream = self
            .inner
            .providers
            .network()
            .connect(&host_port.to_string())
            .await?;
        let conn = Connection::spawn(
            &self.inner,
            stream,
            ConnectionDirection::Outbound,
            host_port.to_string(),
        )?;

        let mut peers = self.inner.peers.borrow_mut();
        if peers.has_peer(host_port) {
            tracing::warn!(peer = %host_port, "another connection already registered for peer; inserting anyway");
        }
        peers.set_peer(host_port.clone(), conn.clone(), ConnectionDirection::Outbound);
        Ok(conn)
    }

    /// Every live connection, flattened in registry order.
    pub fn peers(&self) -> Vec<Rc<Connection<P>>> {
        self.inner.peers.borrow().all()
    }

    /// All connections registered under one peer, in preference order.
    pub fn peer_connections(&self, host_port: &HostPort) -> Vec<Rc<Connection<P>>> {
        self.inner.peers.borrow().peer_list(host_port)
    }

    /// Tear the channel down: fail every pending outbound operation with a
    /// shutdown error, close every connection and the listener, and return
    /// once all of their sockets have closed. A second call is a no-op.
    pub async fn quit(&self) {
        if self.inner.destroyed.replace(true) {
            tracing::debug!("quit called twice; second call is a no-op");
            return;
        }

        let conns = self.inner.peers.borrow().all();
        tracing::info!(connections = conns.len(), "channel shutting down");
        for conn in &conns {
            Connection::reset_all(conn, &CallError::Shutdown);
        }
        if let Some(tx) = self.inner.listener_shutdown.borrow_mut().take() {
            let _ = tx.send(());
        }

        // Completion is driven by socket-task termination, not by the
        // synthetic close events reset emits.
        loop {
            let notified = self.inner.sockets_closed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.open_sockets.get() == 0 {
                break;
            }
            notified.await;
        }
        tracing::info!("channel shut down");
    }
}

/// Build a channel from providers, identity, and configuration.
pub struct ChannelBuilder<P: Providers> {
    providers: P,
    host_port: Option<String>,
    process_name: String,
    config: ChannelConfig,
}

impl<P: Providers> ChannelBuilder<P> {
    /// Start a builder with the given providers bundle.
    pub fn new(providers: P) -> Self {
        Self {
            providers,
            host_port: None,
            process_name: "switchboard".to_string(),
            config: ChannelConfig::default(),
        }
    }

    /// The `"host:port"` identity to announce and listen on. Required.
    /// Port 0 is allowed and replaced by the bound port on `listen()`.
    pub fn host_port(mut self, host_port: impl Into<String>) -> Self {
        self.host_port = Some(host_port.into());
        self
    }

    /// The process name announced in init frames, for diagnostics.
    pub fn process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    /// Timeout and sweep configuration.
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the channel without binding the listener.
    pub fn build(self) -> Result<Channel<P>, CallError> {
        let host_port = self.host_port.ok_or_else(|| CallError::InvalidArgument {
            message: "host/port is required".to_string(),
        })?;
        let host_port = HostPort::parse(&host_port)?;

        let inner = Rc::new(ChannelInner {
            providers: self.providers,
            config: self.config,
            process_name: self.process_name,
            host_port: RefCell::new(host_port),
            endpoints: RefCell::new(HashMap::new()),
            peers: RefCell::new(PeerTable::new()),
            subscribers: EventSubscribers::new(),
            destroyed: Cell::new(false),
            listening: Cell::new(false),
            listener_shutdown: RefCell::new(None),
            open_sockets: Cell::new(0),
            sockets_closed: Notify::new(),
        });
        Ok(Channel { inner })
    }

    /// Build the channel and bind its listener.
    pub async fn build_listening(self) -> Result<Channel<P>, CallError> {
        let channel = self.build()?;
        channel.listen().await?;
        Ok(channel)
    }
}

async fn accept_loop<P: Providers>(
    inner: Rc<ChannelInner<P>>,
    listener: <P::Network as NetworkProvider>::TcpListener,
    mut shutdown_rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    // The connection joins the registry only after its
                    // peer identifies.
                    match Connection::spawn(&inner, stream, ConnectionDirection::Inbound, remote_addr) {
                        Ok(_conn) => {}
                        Err(e) => tracing::warn!(error = %e, "failed to start inbound connection"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed; stopping listener");
                    break;
                }
            }
        }
    }
    inner.socket_task_finished();
}
