//! In-memory two-peer harness for end-to-end `conduit` connection tests:
//! a `Service`-role and a `Bot`-role `Commander` wired together over
//! [`conduit_core::Transport::mem_pair`], with no sockets involved.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::{
    Commander, CommanderEvent, CommanderHandle, DefaultJsonSerializer, DefaultValidator,
    HandlerTable, Protocol, Role, Serializer, Transport, Validator,
};
use tokio::sync::mpsc;

/// Tuned low for fast tests: a real deployment's `Config` defaults are much
/// larger.
pub const TEST_PULSE_INTERVAL: Duration = Duration::from_millis(20);
pub const TEST_PULSE_LIMIT: u32 = 2;
pub const TEST_REQUEST_TIMEOUT: Duration = Duration::from_millis(150);

/// One side of a [`Harness`] pair: a running `Commander` plus its lifecycle
/// event stream.
pub struct Peer<S> {
    pub handle: CommanderHandle<S>,
    pub events: mpsc::UnboundedReceiver<CommanderEvent>,
}

impl<S> Peer<S> {
    /// Wait for the next lifecycle event.
    pub async fn next_event(&mut self) -> Option<CommanderEvent> {
        self.events.recv().await
    }

    /// Wait specifically for `Ready`, panicking (in test code) on anything
    /// else or on channel closure.
    pub async fn wait_ready(&mut self) {
        match self.events.recv().await {
            Some(CommanderEvent::Ready) => {}
            other => panic!("expected Ready, got {other:?}"),
        }
    }
}

/// A connected `Service`/`Bot` pair over an in-memory transport.
pub struct Harness<S> {
    pub service: Peer<S>,
    pub bot: Peer<S>,
}

/// Builds a [`Harness`] with the default validator and serializer and no
/// registered handlers; most tests start here and call `.on`/`.on_request`
/// or register a [`HandlerTable`] via [`build_with_handlers`].
pub fn build<S: Send + Sync + 'static>(service: S) -> Harness<S> {
    build_with_handlers(HandlerTable::new(), service)
}

/// Builds a [`Harness`] with an explicit, pre-populated `HandlerTable` for
/// the service side.
pub fn build_with_handlers<S: Send + Sync + 'static>(
    handler_table: HandlerTable<S>,
    service: S,
) -> Harness<S> {
    build_with(
        handler_table,
        service,
        Arc::new(DefaultValidator),
        Arc::new(DefaultJsonSerializer),
    )
}

/// Builds a [`Harness`] with an explicit validator and serializer, for
/// tests that exercise a custom pair of either.
pub fn build_with<S: Send + Sync + 'static>(
    handler_table: HandlerTable<S>,
    service: S,
    validator: Arc<dyn Validator>,
    serializer: Arc<dyn Serializer>,
) -> Harness<S> {
    let (service_transport, bot_transport) = Transport::mem_pair();

    let service_commander = Commander::new(
        Role::Service,
        Protocol::new(service_transport),
        TEST_PULSE_INTERVAL,
        Some(TEST_PULSE_LIMIT),
        TEST_REQUEST_TIMEOUT,
        validator.clone(),
        serializer.clone(),
        Some(Arc::new(handler_table)),
        Some(Arc::new(service)),
    );
    let bot_commander = Commander::<S>::new(
        Role::Bot,
        Protocol::new(bot_transport),
        TEST_PULSE_INTERVAL,
        None,
        TEST_REQUEST_TIMEOUT,
        validator,
        serializer,
        None,
        None,
    );

    let (service_handle, service_events) = service_commander.run();
    let (bot_handle, bot_events) = bot_commander.run();

    Harness {
        service: Peer {
            handle: service_handle,
            events: service_events,
        },
        bot: Peer {
            handle: bot_handle,
            events: bot_events,
        },
    }
}

/// Brings a freshly built [`Harness`] through the handshake, waiting for
/// both sides to report `Ready`.
pub async fn handshaken<S: Send + Sync + 'static>(mut harness: Harness<S>) -> Harness<S> {
    harness.service.wait_ready().await;
    harness.bot.wait_ready().await;
    harness
}
