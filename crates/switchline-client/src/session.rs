//! The client session engine.
//!
//! One engine owns one transport and one registered address. All engine
//! state (connection state, call table, pending-dial FIFO, stream map,
//! heartbeat and reconnect bookkeeping) is owned by a single actor task;
//! caller operations, inbound transport events, and timers are serialised
//! through its select loop, so state transitions are single-threaded by
//! construction.
//!
//! The public [`Session`] handle is a cheap clone wrapping the actor's
//! command channel. When the actor stops (explicit [`Session::close`]),
//! outstanding handles and call controllers become inert and fail with an
//! illegal-state error.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use switchline_core::Backoff;
use switchline_protocol::{
    Address, ClientFrame, HEARTBEAT_TIMEOUT_CLOSE_CODE, HEARTBEAT_TIMEOUT_REASON, MessagePayload,
    ServerFrame,
};

use crate::call::{Call, CallDirection, CallId, CallState};
use crate::error::{SessionError, SessionResult};
use crate::listeners::{ListenerSet, Subscription};
use crate::options::{DialOptions, RegisterOptions, RegistrationRequest, SessionOptions};
use crate::stream::{PushOutcome, StreamEntry, TunnelStream};
use crate::transport::{
    Transport, TransportEvent, TransportPayload, default_transport_factory,
};

/// Connection state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live transport.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Registered operations and calls can use the wire.
    Connected,
}

/// Details of a disconnect, as delivered to `on_disconnected` listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Close code, when one was observed or synthesized.
    pub code: Option<u16>,
    /// Close reason, when one was observed or synthesized.
    pub reason: Option<String>,
}

pub(crate) struct SessionEvents {
    connected: ListenerSet<()>,
    disconnected: ListenerSet<Disconnect>,
    registered: ListenerSet<Address>,
    registration_failed: ListenerSet<String>,
    ring: ListenerSet<Call>,
    error: ListenerSet<SessionError>,
    heartbeat_ack: ListenerSet<u64>,
}

impl SessionEvents {
    fn new() -> Self {
        Self {
            connected: ListenerSet::new(),
            disconnected: ListenerSet::new(),
            registered: ListenerSet::new(),
            registration_failed: ListenerSet::new(),
            ring: ListenerSet::new(),
            error: ListenerSet::new(),
            heartbeat_ack: ListenerSet::new(),
        }
    }
}

/// Commands flowing from handles (session, calls, tunnel writers) to the
/// actor.
#[derive(Debug)]
pub(crate) enum Command {
    Register {
        request: RegistrationRequest,
        reply: oneshot::Sender<SessionResult<Address>>,
    },
    Unregister {
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Dial {
        to: Address,
        metadata: Option<Value>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<SessionResult<Call>>,
    },
    Answer {
        call_id: CallId,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Send {
        call_id: CallId,
        payload: MessagePayload,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Hangup {
        call_id: CallId,
        reason: Option<String>,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    OpenStream {
        call_id: CallId,
        reply: oneshot::Sender<SessionResult<TunnelStream>>,
    },
    StreamWrite {
        call_id: CallId,
        bytes: Vec<u8>,
        permit: tokio::sync::OwnedSemaphorePermit,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Heartbeat,
    Reconnect,
    Close {
        code: Option<u16>,
        reason: Option<String>,
        reply: oneshot::Sender<()>,
    },
}

struct PendingDial {
    to: Address,
    metadata: Option<Value>,
    reply: Option<oneshot::Sender<SessionResult<Call>>>,
    deadline: Option<Instant>,
}

impl PendingDial {
    fn resolve(&mut self, result: SessionResult<Call>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

/// Handle to a running session engine.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<SessionEvents>,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    /// Creates an engine for the given exchange URLs.
    ///
    /// No I/O happens until the first operation needs the wire. Each
    /// connection attempt uses the first URL; the list form is accepted so
    /// multi-URL failover can reuse the reconnect loop later.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(urls: Vec<String>, options: SessionOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let events = Arc::new(SessionEvents::new());
        let state = Arc::new(Mutex::new(SessionState::Disconnected));

        let actor = SessionActor {
            urls,
            backoff: Backoff::new(
                options.reconnect_backoff,
                options.max_reconnect_backoff,
            ),
            options,
            events: events.clone(),
            shared_state: state.clone(),
            commands: commands_tx.downgrade(),
            state: SessionState::Disconnected,
            transport: None,
            pinned_registration: None,
            pending_registration: Vec::new(),
            registration_inflight: false,
            pending_dials: VecDeque::new(),
            calls: HashMap::new(),
            streams: HashMap::new(),
            reconnect_at: None,
            heartbeat_next: None,
            heartbeat_deadline: None,
            last_ack: None,
            user_closed: false,
            shutdown: false,
        };
        tokio::spawn(actor.run(commands_rx));

        Self {
            commands: commands_tx,
            events,
            state,
        }
    }

    /// Snapshot of the engine state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state poisoned")
    }

    /// Registers this endpoint at `address`.
    ///
    /// The request is pinned on the engine and re-asserted after
    /// reconnects until [`unregister`](Self::unregister) or
    /// [`close`](Self::close). Concurrent registrations chain onto one
    /// in-flight `REGISTER`; all callers observe the same outcome.
    ///
    /// # Errors
    ///
    /// Fails synchronously on an invalid address, and asynchronously with
    /// registration-failed, disconnected, or transport errors.
    pub async fn register(
        &self,
        address: &str,
        options: RegisterOptions,
    ) -> SessionResult<Address> {
        let address = Address::parse(address)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Register {
            request: RegistrationRequest { address, options },
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| SessionError::illegal_state("session closed"))?
    }

    /// Drops the pinned registration, sending `UNREGISTER` if connected.
    ///
    /// # Errors
    ///
    /// Fails if the engine has been torn down.
    pub async fn unregister(&self) -> SessionResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Unregister { reply: reply_tx })?;
        reply_rx
            .await
            .map_err(|_| SessionError::illegal_state("session closed"))?
    }

    /// Places an outbound call to `to`.
    ///
    /// Resolves with an active [`Call`] on `CONNECTED`, fails with a
    /// call-failed error on `BUSY`, a timeout error when
    /// [`DialOptions::timeout`] elapses, or a disconnected error if the
    /// connection drops first.
    ///
    /// # Errors
    ///
    /// Fails synchronously on an invalid address; see above for
    /// asynchronous failures.
    pub async fn dial(&self, to: &str, options: DialOptions) -> SessionResult<Call> {
        let to = Address::parse(to)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Dial {
            to,
            metadata: options.metadata,
            timeout: options.timeout,
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| SessionError::illegal_state("session closed"))?
    }

    /// Sends a manual heartbeat if connected.
    ///
    /// # Errors
    ///
    /// Fails if the engine has been torn down.
    pub fn heartbeat(&self) -> SessionResult<()> {
        self.command(Command::Heartbeat)
    }

    /// Forces a reconnect: tears down the current transport (if any) and
    /// immediately attempts a fresh connection.
    ///
    /// # Errors
    ///
    /// Fails if the engine has been torn down.
    pub fn reconnect(&self) -> SessionResult<()> {
        self.command(Command::Reconnect)
    }

    /// Tears the engine down: disables reconnect, clears timers, closes
    /// the transport, and stops the actor. Idempotent and safe from any
    /// engine state.
    pub async fn close(&self) {
        self.close_with(None, None).await;
    }

    /// [`close`](Self::close) with an explicit code and reason.
    pub async fn close_with(&self, code: Option<u16>, reason: Option<&str>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command(Command::Close {
                code,
                reason: reason.map(str::to_string),
                reply: reply_tx,
            })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Registers a listener for the transport opening.
    pub fn on_connected(&self, listener: impl Fn(&()) + Send + Sync + 'static) -> Subscription {
        self.events.connected.subscribe(listener)
    }

    /// Registers a listener for disconnects.
    pub fn on_disconnected(
        &self,
        listener: impl Fn(&Disconnect) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.disconnected.subscribe(listener)
    }

    /// Registers a listener for successful registrations.
    pub fn on_registered(
        &self,
        listener: impl Fn(&Address) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.registered.subscribe(listener)
    }

    /// Registers a listener for rejected registrations.
    pub fn on_registration_failed(
        &self,
        listener: impl Fn(&String) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.registration_failed.subscribe(listener)
    }

    /// Registers a listener for inbound calls.
    pub fn on_ring(&self, listener: impl Fn(&Call) + Send + Sync + 'static) -> Subscription {
        self.events.ring.subscribe(listener)
    }

    /// Registers a listener for background errors.
    pub fn on_error(
        &self,
        listener: impl Fn(&SessionError) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.error.subscribe(listener)
    }

    /// Registers a listener for heartbeat acks (timestamp in ms).
    pub fn on_heartbeat_ack(
        &self,
        listener: impl Fn(&u64) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.heartbeat_ack.subscribe(listener)
    }

    fn command(&self, command: Command) -> SessionResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::illegal_state("session closed"))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

enum Step {
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
    Timer,
}

struct SessionActor {
    urls: Vec<String>,
    options: SessionOptions,
    events: Arc<SessionEvents>,
    shared_state: Arc<Mutex<SessionState>>,
    commands: mpsc::WeakUnboundedSender<Command>,

    state: SessionState,
    transport: Option<Box<dyn Transport>>,
    pinned_registration: Option<RegistrationRequest>,
    pending_registration: Vec<oneshot::Sender<SessionResult<Address>>>,
    registration_inflight: bool,
    pending_dials: VecDeque<PendingDial>,
    calls: HashMap<CallId, Call>,
    streams: HashMap<CallId, StreamEntry>,

    backoff: Backoff,
    reconnect_at: Option<Instant>,
    heartbeat_next: Option<Instant>,
    heartbeat_deadline: Option<Instant>,
    last_ack: Option<Instant>,

    user_closed: bool,
    shutdown: bool,
}

async fn recv_transport_event(
    rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(mut self, mut commands_rx: mpsc::UnboundedReceiver<Command>) {
        let mut transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>> = None;
        loop {
            let deadline = self.next_deadline();
            let step = tokio::select! {
                command = commands_rx.recv() => Step::Command(command),
                event = recv_transport_event(&mut transport_events),
                    if transport_events.is_some() => Step::Transport(event),
                () = sleep_until_deadline(deadline), if deadline.is_some() => Step::Timer,
            };
            match step {
                Step::Command(Some(command)) => {
                    self.handle_command(command, &mut transport_events).await;
                }
                Step::Command(None) => break,
                Step::Transport(event) => {
                    self.handle_transport_event(event, &mut transport_events);
                }
                Step::Timer => self.handle_deadlines(&mut transport_events).await,
            }
            if self.shutdown {
                break;
            }
        }
        debug!("session actor stopped");
    }

    fn controller(&self) -> mpsc::UnboundedSender<Command> {
        // If every handle is gone the actor is about to stop; a dead
        // sender gives new calls the inert-controller behavior.
        self.commands.upgrade().unwrap_or_else(|| {
            let (tx, _rx) = mpsc::unbounded_channel();
            tx
        })
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        *self.shared_state.lock().expect("session state poisoned") = state;
    }

    // ----- commands -------------------------------------------------------

    async fn handle_command(
        &mut self,
        command: Command,
        transport_events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) {
        match command {
            Command::Register { request, reply } => {
                self.pinned_registration = Some(request);
                if let Err(e) = self.ensure_connected(transport_events).await {
                    let _ = reply.send(Err(e));
                    return;
                }
                self.pending_registration.push(reply);
                if !self.registration_inflight
                    && let Err(e) = self.send_register()
                {
                    self.fail_registration(&e.to_string());
                }
            }
            Command::Unregister { reply } => {
                let result = match self.pinned_registration.take() {
                    Some(request) if self.state == SessionState::Connected => {
                        self.send_frame(&ClientFrame::Unregister {
                            address: request.address.to_string(),
                        })
                    }
                    _ => Ok(()),
                };
                let _ = reply.send(result);
            }
            Command::Dial {
                to,
                metadata,
                timeout,
                reply,
            } => {
                if let Err(e) = self.ensure_connected(transport_events).await {
                    let _ = reply.send(Err(e));
                    return;
                }
                let frame = ClientFrame::Dial {
                    to: to.to_string(),
                    metadata: metadata.clone(),
                };
                if let Err(e) = self.send_frame(&frame) {
                    let _ = reply.send(Err(e));
                    return;
                }
                self.pending_dials.push_back(PendingDial {
                    to,
                    metadata,
                    reply: Some(reply),
                    deadline: timeout.map(|t| Instant::now() + t),
                });
            }
            Command::Answer { call_id, reply } => {
                let result = self.do_answer(&call_id);
                let _ = reply.send(result);
            }
            Command::Send {
                call_id,
                payload,
                reply,
            } => {
                let result = self.do_send(&call_id, &payload);
                let _ = reply.send(result);
            }
            Command::Hangup {
                call_id,
                reason,
                reply,
            } => {
                // Idempotent: unknown or already-ended calls are a no-op.
                if let Some(call) = self.calls.remove(&call_id) {
                    if self.state == SessionState::Connected {
                        let _ = self.send_frame(&ClientFrame::Hangup {
                            call_id: call_id.as_str().to_string(),
                            reason: reason.clone(),
                        });
                    }
                    call.end(reason);
                    if let Some(mut entry) = self.streams.remove(&call_id) {
                        entry.destroy();
                    }
                }
                let _ = reply.send(Ok(()));
            }
            Command::OpenStream { call_id, reply } => {
                let result = self.do_open_stream(&call_id);
                let _ = reply.send(result);
            }
            Command::StreamWrite {
                call_id,
                bytes,
                permit,
                reply,
            } => {
                let result = self.do_stream_write(&call_id, bytes);
                // The chunk is in the transport queue (or failed); release
                // the writer's window either way.
                drop(permit);
                let _ = reply.send(result);
            }
            Command::Heartbeat => {
                if self.state == SessionState::Connected {
                    self.send_heartbeat();
                }
            }
            Command::Reconnect => {
                debug!("forced reconnect");
                if self.state != SessionState::Disconnected {
                    self.disconnect(
                        None,
                        Some("reconnect".to_string()),
                        true,
                        transport_events,
                    );
                }
                self.reconnect_at = Some(Instant::now());
            }
            Command::Close {
                code,
                reason,
                reply,
            } => {
                self.user_closed = true;
                self.reconnect_at = None;
                self.disconnect(code, reason, true, transport_events);
                self.shutdown = true;
                let _ = reply.send(());
            }
        }
    }

    fn do_answer(&mut self, call_id: &CallId) -> SessionResult<()> {
        if self.state != SessionState::Connected {
            return Err(SessionError::illegal_state("session is not connected"));
        }
        let call = self
            .calls
            .get(call_id)
            .cloned()
            .ok_or_else(|| SessionError::illegal_state("unknown call"))?;
        if call.direction() != CallDirection::Inbound {
            return Err(SessionError::illegal_state(
                "only inbound calls can be answered",
            ));
        }
        if call.state() != CallState::Ringing {
            return Err(SessionError::illegal_state("call is not ringing"));
        }
        self.send_frame(&ClientFrame::Answer {
            call_id: call_id.as_str().to_string(),
        })?;
        call.set_active();
        Ok(())
    }

    fn do_send(&mut self, call_id: &CallId, payload: &MessagePayload) -> SessionResult<()> {
        if self.state != SessionState::Connected {
            return Err(SessionError::illegal_state("session is not connected"));
        }
        let call = self
            .calls
            .get(call_id)
            .cloned()
            .ok_or_else(|| SessionError::illegal_state("unknown call"))?;
        if call.state() != CallState::Active {
            return Err(SessionError::illegal_state("call is not active"));
        }
        let data = payload.encode()?;
        self.send_frame(&ClientFrame::Msg {
            call_id: call_id.as_str().to_string(),
            data,
            content_type: payload.content_type(),
        })
    }

    fn do_open_stream(&mut self, call_id: &CallId) -> SessionResult<TunnelStream> {
        let call = self
            .calls
            .get(call_id)
            .cloned()
            .ok_or_else(|| SessionError::illegal_state("unknown call"))?;
        if call.state() != CallState::Active {
            return Err(SessionError::illegal_state("call is not active"));
        }
        let controller = self.controller();
        let entry = self
            .streams
            .entry(call_id.clone())
            .or_insert_with(|| StreamEntry::new(call_id.clone(), controller));
        entry
            .take_stream()
            .ok_or_else(|| SessionError::illegal_state("tunnel stream already taken"))
    }

    fn do_stream_write(&mut self, call_id: &CallId, bytes: Vec<u8>) -> SessionResult<()> {
        if self.state != SessionState::Connected {
            return Err(SessionError::Disconnected);
        }
        let call = self
            .calls
            .get(call_id)
            .cloned()
            .ok_or_else(|| SessionError::illegal_state("call has ended"))?;
        if call.state() != CallState::Active {
            return Err(SessionError::illegal_state("call is not active"));
        }
        let payload = MessagePayload::Binary(bytes);
        let data = payload.encode()?;
        self.send_frame(&ClientFrame::Msg {
            call_id: call_id.as_str().to_string(),
            data,
            content_type: payload.content_type(),
        })
    }

    // ----- connection lifecycle ------------------------------------------

    async fn ensure_connected(
        &mut self,
        transport_events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) -> SessionResult<()> {
        if self.state == SessionState::Connected {
            return Ok(());
        }
        // A caller-initiated attempt supersedes a scheduled reconnect.
        self.reconnect_at = None;
        self.connect_attempt(transport_events).await
    }

    async fn connect_attempt(
        &mut self,
        transport_events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) -> SessionResult<()> {
        let factory = self
            .options
            .transport_factory
            .clone()
            .unwrap_or_else(default_transport_factory);
        let url = self
            .urls
            .first()
            .cloned()
            .ok_or_else(|| SessionError::illegal_state("no exchange urls configured"))?;

        self.set_state(SessionState::Connecting);
        let mut transport = factory();
        debug!(url = %url, "connecting to exchange");
        match transport.connect(&url).await {
            Ok(()) => {
                *transport_events = transport.take_events();
                self.transport = Some(transport);
                self.set_state(SessionState::Connected);
                self.backoff.reset();
                self.last_ack = Some(Instant::now());
                self.heartbeat_deadline = None;
                info!(url = %url, "connected to exchange");
                self.events.connected.emit(&());
                if self.options.heartbeat_interval > Duration::ZERO {
                    self.send_heartbeat();
                }
                if self.options.register_on_connect
                    && self.pinned_registration.is_some()
                    && !self.registration_inflight
                    && let Err(e) = self.send_register()
                {
                    warn!(error = %e, "re-registration failed");
                }
                Ok(())
            }
            Err(e) => {
                debug!(url = %url, error = %e, "connect attempt failed");
                self.set_state(SessionState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Tears down the live transport and cascades cancellations. The
    /// single exit path for every kind of close: remote close, heartbeat
    /// timeout, forced reconnect, and user teardown.
    fn disconnect(
        &mut self,
        code: Option<u16>,
        reason: Option<String>,
        user_initiated: bool,
        transport_events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) {
        self.heartbeat_next = None;
        self.heartbeat_deadline = None;
        *transport_events = None;
        if let Some(mut transport) = self.transport.take() {
            transport.close(code, reason.clone());
        }

        let was_live = self.state != SessionState::Disconnected;
        self.set_state(SessionState::Disconnected);
        self.registration_inflight = false;

        for reply in self.pending_registration.drain(..) {
            let _ = reply.send(Err(SessionError::Disconnected));
        }
        while let Some(mut dial) = self.pending_dials.pop_front() {
            dial.resolve(Err(SessionError::Disconnected));
        }
        for (_, call) in self.calls.drain() {
            call.end(Some("disconnected".to_string()));
        }
        for (_, mut entry) in self.streams.drain() {
            entry.end_from_remote();
        }

        if was_live {
            info!(code = ?code, reason = ?reason, "disconnected");
            self.events.disconnected.emit(&Disconnect { code, reason });
        }

        if !user_initiated && !self.user_closed && self.options.auto_reconnect {
            let delay = self.backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            self.reconnect_at = Some(Instant::now() + delay);
        }
    }

    // ----- frames ---------------------------------------------------------

    fn send_frame(&mut self, frame: &ClientFrame) -> SessionResult<()> {
        if self.options.debug {
            debug!(frame = ?frame, "sending frame");
        } else {
            trace!(frame = ?frame, "sending frame");
        }
        let json = frame.to_json()?;
        let transport = self
            .transport
            .as_mut()
            .ok_or(SessionError::Disconnected)?;
        transport
            .send(TransportPayload::Text(json))
            .map_err(SessionError::from)
    }

    fn send_register(&mut self) -> SessionResult<()> {
        let Some(request) = self.pinned_registration.clone() else {
            return Ok(());
        };
        self.send_frame(&ClientFrame::Register {
            address: request.address.to_string(),
            metadata: request.options.metadata.clone(),
            concurrency_mode: request
                .options
                .concurrency_mode
                .map(|mode| mode.as_str().to_string()),
            max_listeners: request.options.max_listeners,
            max_sessions: request.options.max_sessions,
            pool_size: request.options.pool_size,
        })?;
        self.registration_inflight = true;
        Ok(())
    }

    fn fail_registration(&mut self, reason: &str) {
        self.registration_inflight = false;
        for reply in self.pending_registration.drain(..) {
            let _ = reply.send(Err(SessionError::RegistrationFailed(reason.to_string())));
        }
        self.events
            .registration_failed
            .emit(&reason.to_string());
    }

    fn handle_transport_event(
        &mut self,
        event: Option<TransportEvent>,
        transport_events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) {
        match event {
            Some(TransportEvent::Message(payload)) => {
                let text = match payload {
                    TransportPayload::Text(text) => text,
                    TransportPayload::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            let err = SessionError::Decode(e.into());
                            warn!(error = %err, "dropping non-UTF-8 frame");
                            self.events.error.emit(&err);
                            return;
                        }
                    },
                };
                match ServerFrame::from_json(&text) {
                    Ok(frame) => self.handle_frame(frame),
                    Err(e) => {
                        let err = SessionError::Decode(e);
                        warn!(error = %err, "dropping malformed frame");
                        self.events.error.emit(&err);
                    }
                }
            }
            Some(TransportEvent::Closed { code, reason }) => {
                self.disconnect(code, reason, false, transport_events);
            }
            Some(TransportEvent::Error(e)) => {
                let err = SessionError::Transport(e);
                warn!(error = %err, "transport error");
                self.events.error.emit(&err);
            }
            // Event channel gone without a close: treat as a close.
            None => self.disconnect(None, None, false, transport_events),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        if self.options.debug {
            debug!(frame = ?frame, "received frame");
        } else {
            trace!(frame = ?frame, "received frame");
        }
        match frame {
            ServerFrame::Registered { address } => {
                self.registration_inflight = false;
                let registered = address
                    .and_then(|a| Address::parse(&a).ok())
                    .or_else(|| self.pinned_registration.as_ref().map(|r| r.address.clone()));
                let Some(registered) = registered else {
                    warn!("REGISTERED with no usable address");
                    return;
                };
                for reply in self.pending_registration.drain(..) {
                    let _ = reply.send(Ok(registered.clone()));
                }
                info!(address = %registered, "registered");
                self.events.registered.emit(&registered);
            }
            ServerFrame::RegisterFailed { reason } => {
                let reason = reason.unwrap_or_else(|| "registration rejected".to_string());
                warn!(reason = %reason, "registration failed");
                self.fail_registration(&reason);
            }
            ServerFrame::Ring {
                call_id,
                from,
                metadata,
            } => self.on_ring(call_id, &from, metadata),
            ServerFrame::Connected { call_id, to } => self.on_connected_frame(call_id, to),
            ServerFrame::Busy { to, reason } => self.on_busy(to.as_deref(), reason),
            ServerFrame::Msg {
                call_id,
                data,
                content_type,
            } => self.on_msg(call_id, data, content_type.as_deref()),
            ServerFrame::Hangup { call_id, reason } => {
                let id = CallId::new(call_id);
                if let Some(call) = self.calls.remove(&id) {
                    call.end(reason);
                }
                // Readable side ends; in-flight writes drain and fail
                // through the now-ended call.
                if let Some(mut entry) = self.streams.remove(&id) {
                    entry.end_from_remote();
                }
            }
            ServerFrame::HeartbeatAck { timestamp } => {
                self.last_ack = Some(Instant::now());
                self.heartbeat_deadline = None;
                let timestamp = timestamp.unwrap_or_else(|| {
                    SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis() as u64
                });
                self.events.heartbeat_ack.emit(&timestamp);
            }
            ServerFrame::Unknown => trace!("ignoring unknown frame type"),
        }
    }

    fn on_ring(&mut self, call_id: String, from: &str, metadata: Option<Value>) {
        let id = CallId::new(call_id);
        if self.calls.contains_key(&id) {
            warn!(call_id = %id, "RING for an existing call, ignoring");
            return;
        }
        let peer = match Address::parse(from) {
            Ok(address) => address,
            Err(e) => {
                let err = SessionError::InvalidAddress(e);
                warn!(error = %err, "RING with invalid caller address");
                self.events.error.emit(&err);
                return;
            }
        };
        let call = Call::new(
            id.clone(),
            CallDirection::Inbound,
            peer,
            metadata,
            self.controller(),
        );
        self.calls.insert(id, call.clone());
        self.events.ring.emit(&call);
    }

    fn on_connected_frame(&mut self, call_id: String, to: Option<String>) {
        let id = CallId::new(call_id);
        if let Some(call) = self.calls.get(&id) {
            // Inbound path: the exchange confirmed an answered call.
            call.set_active();
            return;
        }

        // First pending dial with a matching destination, else the oldest.
        let index = to
            .as_deref()
            .and_then(|to| {
                self.pending_dials
                    .iter()
                    .position(|dial| dial.to.as_str() == to)
            })
            .or_else(|| (!self.pending_dials.is_empty()).then_some(0));
        let Some(index) = index else {
            debug!(call_id = %id, "CONNECTED with no pending dial, ignoring");
            return;
        };
        let mut dial = self
            .pending_dials
            .remove(index)
            .expect("index in bounds");

        let call = Call::new(
            id.clone(),
            CallDirection::Outbound,
            dial.to.clone(),
            dial.metadata.take(),
            self.controller(),
        );
        self.calls.insert(id, call.clone());
        dial.resolve(Ok(call.clone()));
        call.set_active();
    }

    fn on_busy(&mut self, to: Option<&str>, reason: Option<String>) {
        let index = to
            .and_then(|to| {
                self.pending_dials
                    .iter()
                    .position(|dial| dial.to.as_str() == to)
            })
            .or_else(|| (!self.pending_dials.is_empty()).then_some(0));
        let Some(index) = index else {
            debug!("BUSY with no pending dial, ignoring");
            return;
        };
        let mut dial = self
            .pending_dials
            .remove(index)
            .expect("index in bounds");
        let reason = reason.unwrap_or_else(|| "busy".to_string());
        debug!(to = %dial.to, reason = %reason, "dial rejected");
        dial.resolve(Err(SessionError::CallFailed(reason)));
    }

    fn on_msg(&mut self, call_id: String, data: Value, content_type: Option<&str>) {
        let id = CallId::new(call_id);
        let Some(call) = self.calls.get(&id).cloned() else {
            // Unknown ids are dropped silently; no user-visible event.
            trace!(call_id = %id, "MSG for unknown call, dropping");
            return;
        };
        match MessagePayload::decode(data, content_type) {
            Ok(payload) => {
                if let MessagePayload::Binary(bytes) = &payload {
                    let controller = self.controller();
                    let entry = self
                        .streams
                        .entry(id.clone())
                        .or_insert_with(|| StreamEntry::new(id.clone(), controller));
                    if let PushOutcome::Delivered { overrun: true } =
                        entry.push_inbound(bytes.clone())
                    {
                        call.report_error(&SessionError::Backpressure(
                            crate::stream::INBOUND_WATERMARK,
                        ));
                    }
                }
                call.deliver(payload);
            }
            Err(e) => {
                let err = SessionError::Decode(e);
                warn!(call_id = %id, error = %err, "undecodable MSG payload");
                call.report_error(&err);
                self.events.error.emit(&err);
            }
        }
    }

    // ----- heartbeat & timers --------------------------------------------

    fn send_heartbeat(&mut self) {
        if self.send_frame(&ClientFrame::Heartbeat).is_ok() {
            let now = Instant::now();
            if self.options.heartbeat_interval > Duration::ZERO {
                self.heartbeat_next = Some(now + self.options.heartbeat_interval);
            }
            if self.heartbeat_deadline.is_none() {
                self.heartbeat_deadline = Some(now + self.options.heartbeat_timeout);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut earliest: Option<Instant> = None;
        let mut consider = |candidate: Option<Instant>| {
            if let Some(at) = candidate {
                earliest = Some(earliest.map_or(at, |current| current.min(at)));
            }
        };
        consider(self.reconnect_at);
        if self.state == SessionState::Connected {
            consider(self.heartbeat_next);
            consider(self.heartbeat_deadline);
        }
        for dial in &self.pending_dials {
            consider(dial.deadline);
        }
        earliest
    }

    async fn handle_deadlines(
        &mut self,
        transport_events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) {
        let now = Instant::now();

        // Dial timeouts.
        let mut index = 0;
        while index < self.pending_dials.len() {
            if self.pending_dials[index]
                .deadline
                .is_some_and(|deadline| deadline <= now)
            {
                let mut dial = self
                    .pending_dials
                    .remove(index)
                    .expect("index in bounds");
                debug!(to = %dial.to, "dial timed out");
                dial.resolve(Err(SessionError::Timeout));
            } else {
                index += 1;
            }
        }

        // Heartbeat cadence.
        if self.state == SessionState::Connected
            && self.heartbeat_next.is_some_and(|at| at <= now)
        {
            self.send_heartbeat();
        }

        // Heartbeat liveness.
        if self.state == SessionState::Connected
            && let Some(deadline) = self.heartbeat_deadline
            && deadline <= now
        {
            let dead = self
                .last_ack
                .is_none_or(|ack| now.duration_since(ack) >= self.options.heartbeat_timeout);
            if dead {
                warn!("heartbeat timed out, closing transport");
                self.disconnect(
                    Some(HEARTBEAT_TIMEOUT_CLOSE_CODE),
                    Some(HEARTBEAT_TIMEOUT_REASON.to_string()),
                    false,
                    transport_events,
                );
            } else {
                self.heartbeat_deadline = None;
            }
        }

        // Reconnect.
        if self.state == SessionState::Disconnected
            && self.reconnect_at.is_some_and(|at| at <= now)
        {
            self.reconnect_at = None;
            if let Err(e) = self.connect_attempt(transport_events).await {
                self.events.error.emit(&e);
                if self.options.auto_reconnect && !self.user_closed {
                    let delay = self.backoff.next_delay();
                    debug!(
                        delay_ms = delay.as_millis() as u64,
                        "reconnect failed, backing off"
                    );
                    self.reconnect_at = Some(Instant::now() + delay);
                }
            }
        }
    }
}
