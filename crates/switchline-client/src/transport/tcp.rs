//! TCP transport: length-prefixed JSON frames over a `TcpStream`.
//!
//! URLs are `tcp://host:port`; a bare `host:port` is accepted. Reader and
//! writer run as independent tasks so the transport stays full-duplex;
//! inbound frames surface on the event channel, outbound messages are
//! enqueued without suspending the caller.

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use switchline_protocol::{decode_frame, encode_frame};

use super::{Transport, TransportError, TransportEvent, TransportPayload, TransportState};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// TCP implementation of the [`Transport`] seam.
pub struct TcpTransport {
    state: TransportState,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Creates an idle transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: TransportState::Idle,
            outbound: None,
            events: None,
            reader: None,
            writer: None,
        }
    }

    fn parse_addr(url: &str) -> Result<&str, TransportError> {
        let rest = url.strip_prefix("tcp://").unwrap_or(url);
        if rest.is_empty() || rest.contains("://") {
            return Err(TransportError::InvalidUrl {
                url: url.to_string(),
                reason: "expected tcp://host:port".to_string(),
            });
        }
        if !rest.contains(':') {
            return Err(TransportError::InvalidUrl {
                url: url.to_string(),
                reason: "missing port".to_string(),
            });
        }
        Ok(rest)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, url: &str) -> BoxFuture<'_, Result<(), TransportError>> {
        let url = url.to_string();
        async move {
            if !matches!(self.state, TransportState::Idle) {
                return Err(TransportError::NotOpen);
            }
            self.state = TransportState::Connecting;

            let addr = match Self::parse_addr(&url) {
                Ok(addr) => addr,
                Err(e) => {
                    self.state = TransportState::Closed;
                    return Err(e);
                }
            };

            debug!(addr = %addr, "connecting");
            let stream = match TcpStream::connect(addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.state = TransportState::Closed;
                    return Err(TransportError::Connect(e));
                }
            };
            let _ = stream.set_nodelay(true);
            let (mut read_half, mut write_half) = stream.into_split();

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

            let writer_events = events_tx.clone();
            let writer = tokio::spawn(async move {
                while let Some(frame) = outbound_rx.recv().await {
                    if let Err(e) = write_half.write_all(&frame).await {
                        warn!(error = %e, "write failed");
                        let _ = writer_events.send(TransportEvent::Error(e.into()));
                        break;
                    }
                }
                // Dropping the write half sends FIN.
            });

            let reader = tokio::spawn(async move {
                let mut pending = Vec::new();
                let mut chunk = [0u8; READ_BUFFER_SIZE];
                'read: loop {
                    match read_half.read(&mut chunk).await {
                        Ok(0) => {
                            trace!("remote closed the connection");
                            let _ = events_tx.send(TransportEvent::Closed {
                                code: None,
                                reason: None,
                            });
                            break;
                        }
                        Ok(n) => {
                            pending.extend_from_slice(&chunk[..n]);
                            loop {
                                match decode_frame(&pending) {
                                    Ok(Some((payload, consumed))) => {
                                        pending.drain(..consumed);
                                        let _ = events_tx.send(TransportEvent::Message(
                                            TransportPayload::Binary(payload),
                                        ));
                                    }
                                    Ok(None) => break,
                                    Err(e) => {
                                        // Stream can no longer be re-synchronized.
                                        let _ = events_tx.send(TransportEvent::Error(e.into()));
                                        let _ = events_tx.send(TransportEvent::Closed {
                                            code: None,
                                            reason: Some("framing violation".to_string()),
                                        });
                                        break 'read;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            let _ = events_tx.send(TransportEvent::Error(e.into()));
                            let _ = events_tx.send(TransportEvent::Closed {
                                code: None,
                                reason: None,
                            });
                            break;
                        }
                    }
                }
            });

            self.outbound = Some(outbound_tx);
            self.events = Some(events_rx);
            self.reader = Some(reader);
            self.writer = Some(writer);
            self.state = TransportState::Open;
            debug!(addr = %addr, "transport open");
            Ok(())
        }
        .boxed()
    }

    fn send(&mut self, payload: TransportPayload) -> Result<(), TransportError> {
        if self.state != TransportState::Open {
            return Err(TransportError::NotOpen);
        }
        let bytes = match payload {
            TransportPayload::Text(text) => encode_frame(text.as_bytes())?,
            TransportPayload::Binary(bytes) => encode_frame(&bytes)?,
        };
        self.outbound
            .as_ref()
            .ok_or(TransportError::NotOpen)?
            .send(bytes)
            .map_err(|_| TransportError::NotOpen)
    }

    fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        if matches!(self.state, TransportState::Closing | TransportState::Closed) {
            return;
        }
        debug!(code = ?code, reason = ?reason, "closing transport");
        self.state = TransportState::Closing;
        // Dropping the outbound sender stops the writer, which drops the
        // write half and sends FIN.
        self.outbound = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
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

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close(None, None);
    }
}
