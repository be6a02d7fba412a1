//! Accepts connections of the configured transport, mints a `Service`-role
//! `Commander` per accepted socket, and dispatches connect/ready/disconnect
//! notifications to the user's `ServiceHandler` and any registered
//! `Extension`s.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use conduit_core::{
    connection_id, Commander, CommanderEvent, CommanderHandle, DefaultJsonSerializer,
    DefaultValidator, DisconnectReason, HandlerTable, Protocol, Role, RpcError, Serializer,
    Transport, Validator,
};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::config::{Config, TransportKind};

/// User-supplied callbacks for server-side connection lifecycle events.
/// All methods have empty default bodies so implementors only override
/// what they need.
pub trait ServiceHandler<S>: Send + Sync + 'static {
    fn on_connect(&self, _commander: &CommanderHandle<S>) {}
    fn on_ready(&self, _commander: &CommanderHandle<S>) {}
    fn on_disconnect(&self, _commander: &CommanderHandle<S>, _reason: DisconnectReason) {}
}

/// An ordered adapter around connection lifecycle events, run before
/// (`on_connect`/`on_ready`) or after (`on_disconnect`) the `ServiceHandler`
/// callbacks. Mirrors middleware-style extension chains; most servers need
/// none.
pub trait Extension<S>: Send + Sync + 'static {
    fn on_connect(&self, _commander: &CommanderHandle<S>) {}
    fn on_ready(&self, _commander: &CommanderHandle<S>) {}
    fn on_disconnect(&self, _commander: &CommanderHandle<S>, _reason: DisconnectReason) {}
}

struct LiveConnection<S> {
    handle: CommanderHandle<S>,
}

/// Accepts connections of the transport selected by `Config::transport`,
/// running each accepted connection's `Commander` as `Role::Service`.
pub struct Server<S> {
    config: Config,
    handler_table: Arc<HandlerTable<S>>,
    service: Arc<S>,
    service_handler: Arc<dyn ServiceHandler<S>>,
    extensions: Vec<Arc<dyn Extension<S>>>,
    validator: Arc<dyn Validator>,
    serializer: Arc<dyn Serializer>,
    live: Arc<RwLock<HashMap<String, LiveConnection<S>>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    bound_addr_tx: watch::Sender<Option<SocketAddr>>,
    bound_addr_rx: watch::Receiver<Option<SocketAddr>>,
}

impl<S: Send + Sync + 'static> Server<S> {
    pub fn new(
        config: Config,
        handler_table: HandlerTable<S>,
        service: S,
        service_handler: impl ServiceHandler<S>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (bound_addr_tx, bound_addr_rx) = watch::channel(None);
        Self {
            config,
            handler_table: Arc::new(handler_table),
            service: Arc::new(service),
            service_handler: Arc::new(service_handler),
            extensions: Vec::new(),
            validator: Arc::new(DefaultValidator),
            serializer: Arc::new(DefaultJsonSerializer),
            live: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            shutdown_rx,
            bound_addr_tx,
            bound_addr_rx,
        }
    }

    pub fn with_extension(mut self, extension: impl Extension<S>) -> Self {
        self.extensions.push(Arc::new(extension));
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn live_connection_count(&self) -> usize {
        self.live.read().len()
    }

    /// The address the listener bound to, once [`Server::serve`] has started
    /// and completed its bind. Mainly useful in tests that bind port 0 and
    /// need the OS-assigned port back.
    pub async fn local_addr(&self) -> SocketAddr {
        let mut rx = self.bound_addr_rx.clone();
        loop {
            if let Some(addr) = *rx.borrow() {
                return addr;
            }
            rx.changed().await.expect("server dropped before binding");
        }
    }

    /// Broadcast `Kick(ServerDown)` to every live connection, drain the live
    /// set, and signal the accept loop started by [`Server::serve`] to stop
    /// and close its listener.
    pub fn stop(&self) {
        let mut live = self.live.write();
        for (_, conn) in live.drain() {
            conn.handle.kick(DisconnectReason::ServerDown);
        }
        let _ = self.shutdown_tx.send(true);
    }

    #[cfg(feature = "stream")]
    pub async fn serve(self: Arc<Self>) -> Result<(), RpcError> {
        match self.config.transport {
            TransportKind::Stream => self.serve_stream().await,
            TransportKind::WebSocket => self.serve_websocket().await,
        }
    }

    #[cfg(feature = "stream")]
    async fn serve_stream(self: Arc<Self>) -> Result<(), RpcError> {
        use conduit_core::TransportError;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind(self.config.addr())
            .await
            .map_err(|err| RpcError::Transport(TransportError::Io(err)))?;
        let addr = listener.local_addr().map_err(|err| RpcError::Transport(TransportError::Io(err)))?;
        tracing::info!(%addr, "listening");
        let _ = self.bound_addr_tx.send(Some(addr));

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    changed.ok();
                    if *shutdown_rx.borrow() {
                        tracing::info!(%addr, "listener stopping");
                        return Ok(());
                    }
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let (reader, writer) = stream.into_split();
                    let transport = Transport::Stream(conduit_core::transport::StreamTransport::new(
                        reader, writer,
                    ));
                    tracing::info!(%peer, "accepted connection");
                    self.clone().spawn_connection(transport);
                }
            }
        }
    }

    #[cfg(feature = "websocket")]
    async fn serve_websocket(self: Arc<Self>) -> Result<(), RpcError> {
        use conduit_core::TransportError;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind(self.config.addr())
            .await
            .map_err(|err| RpcError::Transport(TransportError::Io(err)))?;
        let addr = listener.local_addr().map_err(|err| RpcError::Transport(TransportError::Io(err)))?;
        tracing::info!(%addr, "listening (websocket)");
        let _ = self.bound_addr_tx.send(Some(addr));

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    changed.ok();
                    if *shutdown_rx.borrow() {
                        tracing::info!(%addr, "listener stopping");
                        return Ok(());
                    }
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let server = self.clone();
                    tokio::spawn(async move {
                        let ws = match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws) => ws,
                            Err(err) => {
                                tracing::warn!(error = %err, "websocket upgrade failed");
                                return;
                            }
                        };
                        tracing::info!(%peer, "accepted websocket connection");
                        let transport = Transport::WebSocket(conduit_core::transport::WebSocketTransport::new(ws));
                        server.spawn_connection(transport);
                    });
                }
            }
        }
    }

    #[cfg(not(feature = "websocket"))]
    async fn serve_websocket(self: Arc<Self>) -> Result<(), RpcError> {
        unreachable!("websocket feature disabled")
    }

    fn spawn_connection(self: Arc<Self>, transport: Transport) {
        let connection_id = connection_id();
        let span = tracing::info_span!("conduit_connection", connection_id = %connection_id);
        let _enter = span.enter();

        let protocol = Protocol::new(transport);
        let commander = Commander::new(
            Role::Service,
            protocol,
            self.config.pulse_interval,
            Some(self.config.pulse_limit),
            self.config.request_timeout,
            self.validator.clone(),
            self.serializer.clone(),
            Some(self.handler_table.clone()),
            Some(self.service.clone()),
        );
        let (handle, mut events) = commander.run();

        self.live.write().insert(
            connection_id.clone(),
            LiveConnection {
                handle: handle.clone(),
            },
        );

        for extension in &self.extensions {
            extension.on_connect(&handle);
        }
        self.service_handler.on_connect(&handle);

        let server = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    CommanderEvent::Ready => {
                        for extension in &server.extensions {
                            extension.on_ready(&handle);
                        }
                        server.service_handler.on_ready(&handle);
                    }
                    CommanderEvent::Disconnected(reason) => {
                        server.service_handler.on_disconnect(&handle, reason);
                        for extension in &server.extensions {
                            extension.on_disconnect(&handle, reason);
                        }
                        server.live.write().remove(&connection_id);
                        break;
                    }
                }
            }
        });
    }
}
