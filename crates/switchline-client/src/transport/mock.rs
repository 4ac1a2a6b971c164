//! Scripted in-memory transport for engine unit tests.
//!
//! Each connection attempt registers a [`MockWire`] on the shared
//! [`MockHub`], giving tests access to the frames the engine sent and a
//! handle to inject server frames or a close.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use switchline_protocol::{ClientFrame, ServerFrame};

use super::{Transport, TransportError, TransportEvent, TransportPayload, TransportState};

/// One scripted connection, visible to the test after the engine connects.
pub(crate) struct MockWire {
    sent: Mutex<Vec<ClientFrame>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: Mutex<Option<(Option<u16>, Option<String>)>>,
}

impl MockWire {
    /// Frames the engine has sent so far.
    pub fn sent(&self) -> Vec<ClientFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// Injects a server frame into the engine.
    pub fn push(&self, frame: ServerFrame) {
        let json = frame.to_json().expect("encode server frame");
        let _ = self
            .events
            .send(TransportEvent::Message(TransportPayload::Text(json)));
    }

    /// Injects raw inbound text.
    pub fn push_text(&self, text: &str) {
        let _ = self
            .events
            .send(TransportEvent::Message(TransportPayload::Text(
                text.to_string(),
            )));
    }

    /// Simulates a remote close.
    pub fn drop_connection(&self, code: Option<u16>, reason: Option<&str>) {
        let _ = self.events.send(TransportEvent::Closed {
            code,
            reason: reason.map(str::to_string),
        });
    }

    /// The close code/reason the engine passed to `close`, if any.
    pub fn close_observed(&self) -> Option<(Option<u16>, Option<String>)> {
        self.closed.lock().unwrap().clone()
    }

    /// Waits until a sent frame satisfies `pred`, returning it.
    pub async fn wait_for_frame(
        &self,
        pred: impl Fn(&ClientFrame) -> bool,
        timeout: Duration,
    ) -> ClientFrame {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(frame) = self.sent.lock().unwrap().iter().find(|f| pred(f)) {
                return frame.clone();
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("no matching frame within {timeout:?}; sent: {:?}", self.sent());
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

/// Shared registry of scripted connections.
#[derive(Clone)]
pub(crate) struct MockHub {
    wires: Arc<Mutex<Vec<Arc<MockWire>>>>,
    refuse_connects: Arc<Mutex<usize>>,
}

impl MockHub {
    pub fn new() -> Self {
        Self {
            wires: Arc::new(Mutex::new(Vec::new())),
            refuse_connects: Arc::new(Mutex::new(0)),
        }
    }

    /// Makes the next `n` connection attempts fail.
    pub fn refuse_next_connects(&self, n: usize) {
        *self.refuse_connects.lock().unwrap() = n;
    }

    pub fn factory(&self) -> super::TransportFactory {
        let hub = self.clone();
        Arc::new(move || {
            Box::new(MockTransport {
                hub: hub.clone(),
                wire: None,
                events: None,
                state: TransportState::Idle,
            })
        })
    }

    pub fn wire_count(&self) -> usize {
        self.wires.lock().unwrap().len()
    }

    pub fn wire(&self, index: usize) -> Arc<MockWire> {
        self.wires.lock().unwrap()[index].clone()
    }

    /// Waits until at least `count` connections have been made.
    pub async fn wait_for_wires(&self, count: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.wire_count() < count {
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "expected {count} connections within {timeout:?}, got {}",
                    self.wire_count()
                );
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

struct MockTransport {
    hub: MockHub,
    wire: Option<Arc<MockWire>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    state: TransportState,
}

impl Transport for MockTransport {
    fn connect(&mut self, _url: &str) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            {
                let mut refuse = self.hub.refuse_connects.lock().unwrap();
                if *refuse > 0 {
                    *refuse -= 1;
                    self.state = TransportState::Closed;
                    return Err(TransportError::Connect(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "scripted refusal",
                    )));
                }
            }

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let wire = Arc::new(MockWire {
                sent: Mutex::new(Vec::new()),
                events: events_tx,
                closed: Mutex::new(None),
            });
            self.hub.wires.lock().unwrap().push(wire.clone());
            self.wire = Some(wire);
            self.events = Some(events_rx);
            self.state = TransportState::Open;
            Ok(())
        }
        .boxed()
    }

    fn send(&mut self, payload: TransportPayload) -> Result<(), TransportError> {
        if self.state != TransportState::Open {
            return Err(TransportError::NotOpen);
        }
        let text = match payload {
            TransportPayload::Text(text) => text,
            TransportPayload::Binary(bytes) => {
                String::from_utf8(bytes).expect("mock transport expects UTF-8 frames")
            }
        };
        let frame = ClientFrame::from_json(&text).map_err(TransportError::Frame)?;
        self.wire
            .as_ref()
            .ok_or(TransportError::NotOpen)?
            .sent
            .lock()
            .unwrap()
            .push(frame);
        Ok(())
    }

    fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        if let Some(wire) = &self.wire {
            *wire.closed.lock().unwrap() = Some((code, reason));
        }
        self.state = TransportState::Closed;
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}
