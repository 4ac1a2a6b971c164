//! Per-call state machine and user-facing call handle.
//!
//! The engine owns calls and synthesizes their state transitions from wire
//! events; a [`Call`] handle publishes those transitions to its listeners
//! and delegates operations (answer / send / hangup) back to the engine
//! through a command channel. When the engine shuts down the channel
//! closes and the handle becomes inert: operations fail with an
//! illegal-state error.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use switchline_protocol::{Address, MessagePayload};

use crate::error::{SessionError, SessionResult};
use crate::listeners::{ListenerSet, Subscription};
use crate::session::Command;
use crate::stream::TunnelStream;

/// Server-assigned call identifier, unique within an engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who initiated the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    /// The peer dialled us; the call starts in `Ringing`.
    Inbound,
    /// We dialled the peer; the call starts in `Pending`.
    Outbound,
}

/// Call lifecycle state. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Outbound call awaiting `CONNECTED`.
    Pending,
    /// Inbound call awaiting a local `answer`.
    Ringing,
    /// Messages and tunnels flow.
    Active,
    /// Hung up, rejected, or lost to a disconnect.
    Ended,
}

pub(crate) struct CallEvents {
    pub connected: ListenerSet<()>,
    pub message: ListenerSet<MessagePayload>,
    pub hangup: ListenerSet<Option<String>>,
    pub error: ListenerSet<SessionError>,
}

impl CallEvents {
    fn new() -> Self {
        Self {
            connected: ListenerSet::new(),
            message: ListenerSet::new(),
            hangup: ListenerSet::new(),
            error: ListenerSet::new(),
        }
    }
}

struct CallInner {
    id: CallId,
    direction: CallDirection,
    peer: Address,
    metadata: Option<Value>,
    state: Mutex<CallState>,
    commands: mpsc::UnboundedSender<Command>,
    events: CallEvents,
}

/// A bidirectional session with a peer endpoint.
///
/// Handles are cheap to clone; all clones refer to the same call.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

impl Call {
    pub(crate) fn new(
        id: CallId,
        direction: CallDirection,
        peer: Address,
        metadata: Option<Value>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let initial = match direction {
            CallDirection::Inbound => CallState::Ringing,
            CallDirection::Outbound => CallState::Pending,
        };
        Self {
            inner: Arc::new(CallInner {
                id,
                direction,
                peer,
                metadata,
                state: Mutex::new(initial),
                commands,
                events: CallEvents::new(),
            }),
        }
    }

    /// The server-assigned call id.
    #[must_use]
    pub fn id(&self) -> &CallId {
        &self.inner.id
    }

    /// Who initiated the call.
    #[must_use]
    pub fn direction(&self) -> CallDirection {
        self.inner.direction
    }

    /// The peer endpoint's address.
    #[must_use]
    pub fn peer(&self) -> &Address {
        &self.inner.peer
    }

    /// Metadata carried on the `RING` or `DIAL`, if any.
    #[must_use]
    pub fn metadata(&self) -> Option<&Value> {
        self.inner.metadata.as_ref()
    }

    /// Snapshot of the call state.
    #[must_use]
    pub fn state(&self) -> CallState {
        *self.inner.state.lock().expect("call state poisoned")
    }

    /// Accepts an inbound call.
    ///
    /// Valid only for inbound calls in `Ringing`; sends `ANSWER` and
    /// transitions the call to `Active`.
    ///
    /// # Errors
    ///
    /// Fails with an illegal-state error for outbound calls, calls not in
    /// `Ringing`, or a torn-down engine.
    pub async fn answer(&self) -> SessionResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Answer {
            call_id: self.inner.id.clone(),
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| SessionError::illegal_state("session closed"))?
    }

    /// Sends an in-call message. Valid only in `Active`.
    ///
    /// The payload kind is carried by the [`MessagePayload`] conversion:
    /// strings become text, JSON values structured, byte vectors binary.
    ///
    /// # Errors
    ///
    /// Fails with an illegal-state error when the call is not active or
    /// the engine is disconnected or torn down.
    pub async fn send(&self, payload: impl Into<MessagePayload>) -> SessionResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Send {
            call_id: self.inner.id.clone(),
            payload: payload.into(),
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| SessionError::illegal_state("session closed"))?
    }

    /// Ends the call. Idempotent: a no-op once the call is `Ended`.
    ///
    /// # Errors
    ///
    /// Fails only if the engine has been torn down mid-operation.
    pub async fn hangup(&self, reason: Option<&str>) -> SessionResult<()> {
        if self.state() == CallState::Ended {
            return Ok(());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Hangup {
            call_id: self.inner.id.clone(),
            reason: reason.map(str::to_string),
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| SessionError::illegal_state("session closed"))?
    }

    /// Opens the call's byte tunnel. Valid only in `Active`.
    ///
    /// A call owns at most one tunnel stream; the second request fails
    /// with an illegal-state error.
    ///
    /// # Errors
    ///
    /// Fails when the call is not active, the stream was already taken,
    /// or the engine is torn down.
    pub async fn stream(&self) -> SessionResult<TunnelStream> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::OpenStream {
            call_id: self.inner.id.clone(),
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| SessionError::illegal_state("session closed"))?
    }

    /// Registers a listener for the call becoming active.
    pub fn on_connected(&self, listener: impl Fn(&()) + Send + Sync + 'static) -> Subscription {
        self.inner.events.connected.subscribe(listener)
    }

    /// Registers a listener for inbound messages.
    pub fn on_message(
        &self,
        listener: impl Fn(&MessagePayload) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.message.subscribe(listener)
    }

    /// Registers a listener for the call ending (local or remote).
    pub fn on_hangup(
        &self,
        listener: impl Fn(&Option<String>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.hangup.subscribe(listener)
    }

    /// Registers a listener for call-scoped errors.
    pub fn on_error(
        &self,
        listener: impl Fn(&SessionError) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.error.subscribe(listener)
    }

    fn command(&self, command: Command) -> SessionResult<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| SessionError::illegal_state("session closed"))
    }

    // Engine-side transitions. Only the session actor calls these, so call
    // state changes are serialised with the rest of the engine state.

    pub(crate) fn set_active(&self) {
        let became_active = {
            let mut state = self.inner.state.lock().expect("call state poisoned");
            match *state {
                CallState::Pending | CallState::Ringing => {
                    *state = CallState::Active;
                    true
                }
                CallState::Active | CallState::Ended => false,
            }
        };
        if became_active {
            self.inner.events.connected.emit(&());
        }
    }

    pub(crate) fn end(&self, reason: Option<String>) {
        let ended = {
            let mut state = self.inner.state.lock().expect("call state poisoned");
            if *state == CallState::Ended {
                false
            } else {
                *state = CallState::Ended;
                true
            }
        };
        if ended {
            self.inner.events.hangup.emit(&reason);
        }
    }

    pub(crate) fn deliver(&self, payload: MessagePayload) {
        self.inner.events.message.emit(&payload);
    }

    pub(crate) fn report_error(&self, error: &SessionError) {
        self.inner.events.error.emit(error);
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("peer", &self.inner.peer)
            .field("state", &self.state())
            .finish()
    }
}
