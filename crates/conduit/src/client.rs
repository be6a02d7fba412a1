//! A thin wrapper around one `(Transport, Protocol, Commander)` stack: the
//! outbound, `Bot`-role side of a connection.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::{
    connection_id, Commander, CommanderEvent, CommanderHandle, DefaultJsonSerializer,
    DefaultValidator, Protocol, Role, RpcError, Serializer, Transport, Validator,
};
use tokio::sync::mpsc;

use crate::config::{Config, TransportKind};

/// The dialing side of a connection. Exposes the `Commander`'s outbound API
/// directly (via `Deref`) plus connection lifecycle events.
pub struct Client<S = ()> {
    handle: CommanderHandle<S>,
    events: mpsc::UnboundedReceiver<CommanderEvent>,
    span: tracing::Span,
}

impl<S: Send + Sync + 'static> Client<S> {
    /// Dial out using the transport selected by `config`, run the
    /// handshake, and return once the connection is constructed. The
    /// handshake itself completes asynchronously; await
    /// [`Client::ready`] to block until it does.
    pub async fn connect(config: &Config) -> Result<Self, RpcError> {
        Self::connect_with(config, Arc::new(DefaultValidator), Arc::new(DefaultJsonSerializer)).await
    }

    pub async fn connect_with(
        config: &Config,
        validator: Arc<dyn Validator>,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self, RpcError> {
        let transport = match config.transport {
            TransportKind::Stream => connect_stream(&config.addr()).await?,
            TransportKind::WebSocket => connect_websocket(&config.addr()).await?,
        };

        let connection_id = connection_id();
        let span = tracing::info_span!("conduit_client", connection_id = %connection_id);

        let protocol = Protocol::new(transport);
        let commander = Commander::new(
            Role::Bot,
            protocol,
            config.pulse_interval,
            None,
            config.request_timeout,
            validator,
            serializer,
            None,
            None,
        );
        let (handle, events) = commander.run();

        Ok(Self { handle, events, span })
    }

    /// Build a `Client` directly from an existing transport, for tests and
    /// in-process composition (`conduit-testkit`).
    pub fn from_transport(
        transport: Transport,
        pulse_interval: Duration,
        request_timeout: Duration,
        validator: Arc<dyn Validator>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        let connection_id = connection_id();
        let span = tracing::info_span!("conduit_client", connection_id = %connection_id);
        let protocol = Protocol::new(transport);
        let commander = Commander::new(
            Role::Bot,
            protocol,
            pulse_interval,
            None,
            request_timeout,
            validator,
            serializer,
            None,
            None,
        );
        let (handle, events) = commander.run();
        Self { handle, events, span }
    }

    /// Wait for the handshake to complete (`CommanderEvent::Ready`), or for
    /// the connection to be dropped before it did.
    pub async fn ready(&mut self) -> bool {
        matches!(self.events.recv().await, Some(CommanderEvent::Ready))
    }

    /// Wait for the next lifecycle event (after the initial `Ready`,
    /// typically `Disconnected`).
    pub async fn next_event(&mut self) -> Option<CommanderEvent> {
        self.events.recv().await
    }

    pub fn handle(&self) -> &CommanderHandle<S> {
        &self.handle
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

impl<S> std::ops::Deref for Client<S> {
    type Target = CommanderHandle<S>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

#[cfg(feature = "stream")]
async fn connect_stream(addr: &str) -> Result<Transport, RpcError> {
    use conduit_core::TransportError;
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .map_err(|err| RpcError::Transport(TransportError::Io(err)))?;
    let (reader, writer) = stream.into_split();
    Ok(Transport::Stream(conduit_core::transport::StreamTransport::new(
        reader, writer,
    )))
}

#[cfg(not(feature = "stream"))]
async fn connect_stream(_addr: &str) -> Result<Transport, RpcError> {
    unreachable!("stream feature disabled")
}

#[cfg(feature = "websocket")]
async fn connect_websocket(addr: &str) -> Result<Transport, RpcError> {
    use conduit_core::TransportError;

    let url = format!("ws://{addr}");
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|err| RpcError::Transport(TransportError::WebSocket(err)))?;
    Ok(Transport::WebSocket(
        conduit_core::transport::WebSocketTransport::new(ws),
    ))
}

#[cfg(not(feature = "websocket"))]
async fn connect_websocket(_addr: &str) -> Result<Transport, RpcError> {
    unreachable!("websocket feature disabled")
}
