//! The top of the protocol engine: handshake drive, request/response
//! correlation, command and subscription dispatch, and heartbeat/liveness
//! policy, all serialized on one actor task per connection.
//!
//! Mirrors the teacher's `MethodDispatcher`/`Handler` split (register-time
//! conflict detection, O(1) lookup by name) for the service-side
//! [`HandlerTable`], adapted from a single request/response RPC call into
//! this protocol's three envelope kinds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::block::BlockType;
use crate::payload::{self, EnvelopeKind, PayloadEnvelope, Serializer};
use crate::protocol::{Admitted, Protocol};
use crate::pulse::{Pulse, PulseLimit};
use crate::validator::{Validator, VerifyOutcome};

/// Whether this end accepted the connection (`Service`) or dialed out
/// (`Bot`). Parameterizes handshake initiation, heartbeat reciprocity,
/// pulse behavior, and inbound dispatch target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Service,
    Bot,
}

/// Why a connection ended, reported once upward via [`CommanderEvent::Disconnected`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    Normal,
    Timeout,
    Handshake,
    ServerDown,
    Unknown,
}

impl DisconnectReason {
    fn code(self) -> u8 {
        match self {
            DisconnectReason::Normal => 0,
            DisconnectReason::Timeout => 1,
            DisconnectReason::Handshake => 2,
            DisconnectReason::ServerDown => 3,
            DisconnectReason::Unknown => 4,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => DisconnectReason::Normal,
            1 => DisconnectReason::Timeout,
            2 => DisconnectReason::Handshake,
            3 => DisconnectReason::ServerDown,
            _ => DisconnectReason::Unknown,
        }
    }
}

/// Error registering a handler against a [`HandlerTable`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("method `{0}` already registered")]
    MethodAlreadyRegistered(String),
}

type Handler<S> = Arc<dyn Fn(CommanderHandle<S>, PayloadEnvelope, Arc<S>) + Send + Sync>;
type SubCallback<S> = Arc<dyn Fn(CommanderHandle<S>, PayloadEnvelope) + Send + Sync>;

/// Service-side, name-keyed command/request handler table. Built once
/// before `Server::serve` starts accepting connections, then shared
/// read-only (via `Arc`) across every accepted connection without
/// per-connection copying — the one piece of state the per-connection
/// ownership model explicitly permits to be shared.
pub struct HandlerTable<S> {
    commands: HashMap<String, Handler<S>>,
    requests: HashMap<String, Handler<S>>,
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self {
            commands: HashMap::new(),
            requests: HashMap::new(),
        }
    }
}

impl<S> HandlerTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command<F>(&mut self, name: impl Into<String>, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(CommanderHandle<S>, PayloadEnvelope, Arc<S>) + Send + Sync + 'static,
    {
        let name = name.into();
        if self.commands.contains_key(&name) {
            return Err(DispatchError::MethodAlreadyRegistered(name));
        }
        self.commands.insert(name, Arc::new(handler));
        Ok(())
    }

    pub fn register_request<F>(&mut self, name: impl Into<String>, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(CommanderHandle<S>, PayloadEnvelope, Arc<S>) + Send + Sync + 'static,
    {
        let name = name.into();
        if self.requests.contains_key(&name) {
            return Err(DispatchError::MethodAlreadyRegistered(name));
        }
        self.requests.insert(name, Arc::new(handler));
        Ok(())
    }

    fn command(&self, name: &str) -> Option<Handler<S>> {
        self.commands.get(name).cloned()
    }

    fn request(&self, name: &str) -> Option<Handler<S>> {
        self.requests.get(name).cloned()
    }
}

/// Opaque token returned from [`CommanderHandle::on`]/[`CommanderHandle::on_request`],
/// used to remove one specific callback later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct PendingRequest {
    name: String,
    sent_at: Instant,
    callback: Box<dyn FnOnce(PayloadEnvelope) + Send + Sync>,
}

enum ActorMessage<S> {
    Command {
        name: String,
        data: Option<Vec<u8>>,
    },
    Request {
        name: String,
        data: Option<Vec<u8>>,
        id: u64,
        callback: Box<dyn FnOnce(PayloadEnvelope) + Send + Sync>,
    },
    Response {
        name: String,
        id: u64,
        data: Option<Vec<u8>>,
        error: Option<String>,
    },
    Cancel {
        id: u64,
    },
    On {
        name: String,
        id: SubscriptionId,
        callback: SubCallback<S>,
    },
    Off {
        name: String,
        id: Option<SubscriptionId>,
    },
    OnRequest {
        name: String,
        callback: SubCallback<S>,
    },
    OffRequest {
        name: String,
    },
    Kick {
        reason: DisconnectReason,
    },
}

/// Cheaply cloned front door to a running [`Commander`]'s actor task. This
/// is what user code and handler callbacks hold; the `Commander` itself is
/// moved into the actor task by [`Commander::run`].
pub struct CommanderHandle<S> {
    tx: mpsc::UnboundedSender<ActorMessage<S>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    next_sub_id: Arc<std::sync::atomic::AtomicU64>,
}

impl<S> Clone for CommanderHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            next_id: self.next_id.clone(),
            next_sub_id: self.next_sub_id.clone(),
        }
    }
}

impl<S> CommanderHandle<S> {
    fn send(&self, msg: ActorMessage<S>) {
        // The actor task only stops after Closed; a send failing past that
        // point is a no-op by design (§4.7: all outbound operations no-op
        // on Closed).
        let _ = self.tx.send(msg);
    }

    pub fn command(&self, name: impl Into<String>, data: Option<Vec<u8>>) {
        self.send(ActorMessage::Command {
            name: name.into(),
            data,
        });
    }

    /// Sends a Request and registers `callback` to run with the eventual
    /// Response (or a synthesized timeout). Returns the assigned id, usable
    /// with [`CommanderHandle::cancel`].
    pub fn request<F>(&self, name: impl Into<String>, data: Option<Vec<u8>>, callback: F) -> u64
    where
        F: FnOnce(PayloadEnvelope) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.send(ActorMessage::Request {
            name: name.into(),
            data,
            id,
            callback: Box::new(callback),
        });
        id
    }

    /// `request` whose callback completes a one-shot future.
    pub fn fetch(
        &self,
        name: impl Into<String>,
        data: Option<Vec<u8>>,
    ) -> (u64, tokio::sync::oneshot::Receiver<PayloadEnvelope>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let id = self.request(name, data, move |envelope| {
            let _ = tx.send(envelope);
        });
        (id, rx)
    }

    pub fn response(&self, originating: &PayloadEnvelope, data: Option<Vec<u8>>) {
        self.send(ActorMessage::Response {
            name: originating.name.clone(),
            id: originating.id,
            data,
            error: None,
        });
    }

    pub fn error(&self, originating: &PayloadEnvelope, error: impl Into<String>, data: Option<Vec<u8>>) {
        self.send(ActorMessage::Response {
            name: originating.name.clone(),
            id: originating.id,
            data,
            error: Some(error.into()),
        });
    }

    pub fn cancel(&self, id: u64) {
        self.send(ActorMessage::Cancel { id });
    }

    pub fn on<F>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(CommanderHandle<S>, PayloadEnvelope) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_sub_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
        self.send(ActorMessage::On {
            name: name.into(),
            id,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn off(&self, name: impl Into<String>, id: Option<SubscriptionId>) {
        self.send(ActorMessage::Off {
            name: name.into(),
            id,
        });
    }

    pub fn on_request<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(CommanderHandle<S>, PayloadEnvelope) + Send + Sync + 'static,
    {
        self.send(ActorMessage::OnRequest {
            name: name.into(),
            callback: Arc::new(callback),
        });
    }

    pub fn off_request(&self, name: impl Into<String>) {
        self.send(ActorMessage::OffRequest { name: name.into() });
    }

    pub fn kick(&self, reason: DisconnectReason) {
        self.send(ActorMessage::Kick { reason });
    }
}

/// Observable lifecycle events a [`Commander`]'s actor task emits upward to
/// the owning `Client`/`Server`.
#[derive(Clone, Debug)]
pub enum CommanderEvent {
    Ready,
    Disconnected(DisconnectReason),
}

const TIMEOUT_SCAN_PERIOD: Duration = Duration::from_secs(1);

/// Per-connection RPC engine. Constructed, then consumed by [`Commander::run`]
/// which drives it to completion as a spawned actor task.
pub struct Commander<S> {
    role: Role,
    protocol: Protocol,
    pulse: Pulse,
    validator: Arc<dyn Validator>,
    serializer: Arc<dyn Serializer>,
    request_timeout: Duration,
    handler_table: Option<Arc<HandlerTable<S>>>,
    service: Option<Arc<S>>,
    subscriptions: HashMap<String, Vec<(SubscriptionId, SubCallback<S>)>>,
    request_handlers: HashMap<String, SubCallback<S>>,
    pending: HashMap<u64, PendingRequest>,
    disconnect_reason: DisconnectReason,
}

impl<S: Send + Sync + 'static> Commander<S> {
    pub fn new(
        role: Role,
        protocol: Protocol,
        pulse_period: Duration,
        pulse_limit: Option<u32>,
        request_timeout: Duration,
        validator: Arc<dyn Validator>,
        serializer: Arc<dyn Serializer>,
        handler_table: Option<Arc<HandlerTable<S>>>,
        service: Option<Arc<S>>,
    ) -> Self {
        let limit = match role {
            Role::Bot => PulseLimit::Bot,
            Role::Service => PulseLimit::Service(pulse_limit.unwrap_or(3)),
        };
        Self {
            role,
            protocol,
            pulse: Pulse::new(pulse_period, limit),
            validator,
            serializer,
            request_timeout,
            handler_table,
            service,
            subscriptions: HashMap::new(),
            request_handlers: HashMap::new(),
            pending: HashMap::new(),
            disconnect_reason: DisconnectReason::Normal,
        }
    }

    /// Drive this commander to completion, returning the handle bound to
    /// its inbox and a receiver for lifecycle events. Spawns the actor
    /// task; the caller does not need to poll anything further.
    pub fn run(mut self) -> (CommanderHandle<S>, mpsc::UnboundedReceiver<CommanderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = CommanderHandle {
            tx,
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            next_sub_id: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        };

        let actor_handle = handle.clone();
        tokio::spawn(async move {
            if self.role == Role::Bot {
                let body = self.validator.handshake(None);
                if self.protocol.handshake(body).await.is_err() {
                    let _ = event_tx.send(CommanderEvent::Disconnected(DisconnectReason::Unknown));
                    return;
                }
            }

            let mut actor_rx = rx;
            let mut timeout_timer = tokio::time::interval(TIMEOUT_SCAN_PERIOD);
            timeout_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    inbound = self.protocol.recv() => {
                        match inbound {
                            Ok(Some(admitted)) => {
                                self.handle_inbound(admitted, &actor_handle, &event_tx).await;
                            }
                            Ok(None) => {}
                            Err(_) => {
                                self.protocol.disconnect().await;
                                let _ = event_tx.send(CommanderEvent::Disconnected(self.disconnect_reason));
                                break;
                            }
                        }
                    }

                    fired = self.pulse.tick() => {
                        if fired {
                            self.handle_pulse_fire().await;
                            if self.role == Role::Service {
                                let _ = event_tx.send(CommanderEvent::Disconnected(self.disconnect_reason));
                                break;
                            }
                        }
                    }

                    _ = timeout_timer.tick() => {
                        self.scan_timeouts(&actor_handle).await;
                    }

                    msg = actor_rx.recv() => {
                        match msg {
                            Some(msg) => {
                                if self.handle_outbound(msg, &actor_handle).await {
                                    let _ = event_tx.send(CommanderEvent::Disconnected(self.disconnect_reason));
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }

            self.pending.clear();
            self.subscriptions.clear();
            self.request_handlers.clear();
        });

        (handle, event_rx)
    }

    async fn handle_pulse_fire(&mut self) {
        match self.role {
            Role::Service => {
                self.disconnect_reason = DisconnectReason::Timeout;
                let _ = self.protocol.kick(DisconnectReason::Timeout.code()).await;
                self.protocol.disconnect().await;
            }
            Role::Bot => {
                let _ = self.protocol.heartbeat().await;
            }
        }
    }

    async fn scan_timeouts(&mut self, handle: &CommanderHandle<S>) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, req)| now.duration_since(req.sent_at) > self.request_timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(req) = self.pending.remove(&id) {
                let timeout_envelope = payload::create(
                    EnvelopeKind::Response,
                    req.name,
                    id,
                    None,
                    Some("timeout".to_string()),
                );
                (req.callback)(timeout_envelope);
            }
        }
        let _ = handle;
    }

    async fn handle_outbound(&mut self, msg: ActorMessage<S>, handle: &CommanderHandle<S>) -> bool {
        if self.protocol.state() == crate::protocol::State::Closed {
            return false;
        }

        match msg {
            ActorMessage::Command { name, data } => {
                self.send_envelope(EnvelopeKind::Command, name, 0, data, None).await;
            }
            ActorMessage::Request { name, data, id, callback } => {
                self.pending.insert(
                    id,
                    PendingRequest {
                        name: name.clone(),
                        sent_at: Instant::now(),
                        callback,
                    },
                );
                self.send_envelope(EnvelopeKind::Request, name, id, data, None).await;
            }
            ActorMessage::Response { name, id, data, error } => {
                self.send_envelope(EnvelopeKind::Response, name, id, data, error).await;
            }
            ActorMessage::Cancel { id } => {
                self.pending.remove(&id);
            }
            ActorMessage::On { name, id, callback } => {
                self.subscriptions.entry(name).or_default().push((id, callback));
            }
            ActorMessage::Off { name, id } => {
                if let Some(list) = self.subscriptions.get_mut(&name) {
                    match id {
                        Some(id) => list.retain(|(existing, _)| *existing != id),
                        None => list.clear(),
                    }
                }
            }
            ActorMessage::OnRequest { name, callback } => {
                if self.request_handlers.contains_key(&name) {
                    tracing::warn!(name, "duplicate request handler registration ignored");
                } else {
                    self.request_handlers.insert(name, callback);
                }
            }
            ActorMessage::OffRequest { name } => {
                self.request_handlers.remove(&name);
            }
            ActorMessage::Kick { reason } => {
                self.disconnect_reason = reason;
                let _ = self.protocol.kick(reason.code()).await;
                self.protocol.disconnect().await;
                return true;
            }
        }
        let _ = handle;
        false
    }

    async fn send_envelope(
        &self,
        kind: EnvelopeKind,
        name: String,
        id: u64,
        data: Option<Vec<u8>>,
        error: Option<String>,
    ) {
        match payload::encode(self.serializer.as_ref(), kind, name, id, data, error) {
            Ok(bytes) => {
                if let Err(err) = self.protocol.send(bytes).await {
                    tracing::debug!(error = %err, "failed to send envelope");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode outbound envelope"),
        }
    }

    async fn handle_inbound(
        &mut self,
        admitted: Admitted,
        handle: &CommanderHandle<S>,
        event_tx: &mpsc::UnboundedSender<CommanderEvent>,
    ) {
        self.pulse.reset();

        match admitted.block_type {
            BlockType::Handshake => {
                match self.validator.verify_handshake(&admitted.body) {
                    VerifyOutcome::Success => {
                        let ack_body = self.validator.acknowledgement(&admitted.body);
                        let _ = self.protocol.acknowledge(ack_body).await;
                    }
                    VerifyOutcome::Failed => {
                        self.disconnect_reason = DisconnectReason::Handshake;
                        let _ = self.protocol.kick(DisconnectReason::Handshake.code()).await;
                        self.protocol.disconnect().await;
                    }
                }
            }
            BlockType::HandshakeAcknowledgement => {
                if self.role == Role::Bot {
                    match self.validator.verify_acknowledgement(&admitted.body) {
                        VerifyOutcome::Failed => {
                            self.disconnect_reason = DisconnectReason::Handshake;
                            self.protocol.disconnect().await;
                            return;
                        }
                        VerifyOutcome::Success => {
                            let ack_body = self.validator.acknowledgement(&admitted.body);
                            let _ = self.protocol.acknowledge(ack_body).await;
                        }
                    }
                }
                let _ = event_tx.send(CommanderEvent::Ready);
            }
            BlockType::Heartbeat => {
                if self.role == Role::Service {
                    let _ = self.protocol.heartbeat().await;
                }
            }
            BlockType::Kick => {
                let reason = std::str::from_utf8(&admitted.body)
                    .ok()
                    .and_then(|s| s.parse::<u8>().ok())
                    .map(DisconnectReason::from_code)
                    .unwrap_or(DisconnectReason::Unknown);
                self.disconnect_reason = reason;
            }
            BlockType::Data => {
                self.handle_data(&admitted.body, handle).await;
            }
        }
    }

    async fn handle_data(&mut self, body: &[u8], handle: &CommanderHandle<S>) {
        let envelope = match payload::decode(self.serializer.as_ref(), body) {
            Ok(envelope) if envelope.check() => envelope,
            Ok(_) => {
                tracing::warn!("dropping envelope with invalid kind");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping envelope that failed to decode");
                return;
            }
        };

        if self.role == Role::Bot {
            let _ = self.protocol.heartbeat().await;
        }

        match envelope.kind {
            EnvelopeKind::Command => self.dispatch_command(envelope, handle).await,
            EnvelopeKind::Request => self.dispatch_request(envelope, handle).await,
            EnvelopeKind::Response => self.dispatch_response(envelope),
        }
    }

    async fn dispatch_command(&mut self, envelope: PayloadEnvelope, handle: &CommanderHandle<S>) {
        match self.role {
            Role::Service => {
                let handler = self.handler_table.as_ref().and_then(|t| t.command(&envelope.name));
                match (handler, &self.service) {
                    (Some(handler), Some(service)) => {
                        run_handler_catching_panics(std::panic::AssertUnwindSafe(|| handler(handle.clone(), envelope, service.clone())));
                    }
                    _ => tracing::warn!(name = %envelope.name, "unknown command"),
                }
            }
            Role::Bot => {
                if let Some(subscribers) = self.subscriptions.get(&envelope.name) {
                    for (_, callback) in subscribers {
                        let callback = callback.clone();
                        let handle = handle.clone();
                        let envelope = envelope.clone();
                        run_handler_catching_panics(std::panic::AssertUnwindSafe(move || callback(handle, envelope)));
                    }
                } else {
                    tracing::warn!(name = %envelope.name, "unknown command subscription");
                }
            }
        }
    }

    async fn dispatch_request(&mut self, envelope: PayloadEnvelope, handle: &CommanderHandle<S>) {
        match self.role {
            Role::Service => {
                let handler = self.handler_table.as_ref().and_then(|t| t.request(&envelope.name));
                match (handler, &self.service) {
                    (Some(handler), Some(service)) => {
                        run_handler_catching_panics(std::panic::AssertUnwindSafe(|| handler(handle.clone(), envelope, service.clone())));
                    }
                    _ => tracing::warn!(name = %envelope.name, "unknown request"),
                }
            }
            Role::Bot => {
                if let Some(callback) = self.request_handlers.get(&envelope.name).cloned() {
                    run_handler_catching_panics(std::panic::AssertUnwindSafe(move || callback(handle.clone(), envelope)));
                } else {
                    tracing::warn!(name = %envelope.name, "no request handler registered");
                }
            }
        }
    }

    fn dispatch_response(&mut self, envelope: PayloadEnvelope) {
        match self.pending.remove(&envelope.id) {
            Some(req) => (req.callback)(envelope),
            None => tracing::warn!(id = envelope.id, "response for unknown request id"),
        }
    }
}

/// Invokes a user-supplied handler, catching panics so one misbehaving
/// handler cannot tear down the connection's actor task.
fn run_handler_catching_panics<F: FnOnce() + std::panic::UnwindSafe>(f: F) {
    if std::panic::catch_unwind(f).is_err() {
        tracing::error!("handler panicked; treating as a dropped invocation");
    }
}
