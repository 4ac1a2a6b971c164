//! Byte tunnel over a call.
//!
//! A [`TunnelStream`] is a duplex byte pipe anchored to one call id.
//! Outbound bytes are chunked, base64-framed into binary `MSG` frames by
//! the engine, and paced by a byte-window semaphore: once the outstanding
//! outbound bytes exceed the window, writers stall until the engine's
//! send path drains them. Inbound binary frames are pushed into the
//! readable side in arrival order; the transport is not per-call
//! flow-controlled, so the inbound high-watermark is advisory and a
//! sustained overrun is reported once through the call's error listeners.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{Semaphore, mpsc, oneshot};

use crate::call::CallId;
use crate::error::{SessionError, SessionResult};
use crate::session::Command;

/// Bytes per binary `MSG` frame. Base64 expansion keeps the framed size
/// well under the 1 MiB frame cap.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// Outstanding outbound bytes before writers stall.
pub(crate) const OUTBOUND_WINDOW: usize = 256 * 1024;

/// Inbound buffered bytes before the overrun is reported.
pub(crate) const INBOUND_WATERMARK: usize = 1024 * 1024;

/// Outcome of pushing inbound bytes into a stream entry.
pub(crate) enum PushOutcome {
    /// Bytes enqueued; `true` if this push crossed the high-watermark for
    /// the first time.
    Delivered { overrun: bool },
    /// The readable side already saw end-of-stream; bytes dropped.
    Ended,
}

/// Engine-side half of a call's tunnel: the push buffer and the handout.
pub(crate) struct StreamEntry {
    data_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    buffered: Arc<AtomicUsize>,
    window: Arc<Semaphore>,
    handout: Option<TunnelStream>,
    overrun_reported: bool,
}

impl StreamEntry {
    pub fn new(call_id: CallId, commands: mpsc::UnboundedSender<Command>) -> Self {
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));
        let window = Arc::new(Semaphore::new(OUTBOUND_WINDOW));
        let destroyed = Arc::new(AtomicBool::new(false));

        let reader = TunnelReader {
            rx: data_rx,
            buffered: buffered.clone(),
            leftover: None,
        };
        let writer = TunnelWriter {
            call_id,
            commands,
            window: window.clone(),
            destroyed,
        };

        Self {
            data_tx: Some(data_tx),
            buffered,
            window,
            handout: Some(TunnelStream { reader, writer }),
            overrun_reported: false,
        }
    }

    /// Hands out the user-facing stream; a call owns at most one.
    pub fn take_stream(&mut self) -> Option<TunnelStream> {
        self.handout.take()
    }

    /// Enqueues inbound bytes for the readable side.
    pub fn push_inbound(&mut self, bytes: Vec<u8>) -> PushOutcome {
        let Some(tx) = &self.data_tx else {
            return PushOutcome::Ended;
        };
        let len = bytes.len();
        if tx.send(bytes).is_err() {
            // Reader (and any handout) dropped; nobody will consume.
            self.data_tx = None;
            return PushOutcome::Ended;
        }
        let total = self.buffered.fetch_add(len, Ordering::SeqCst) + len;
        if total > INBOUND_WATERMARK && !self.overrun_reported {
            self.overrun_reported = true;
            return PushOutcome::Delivered { overrun: true };
        }
        PushOutcome::Delivered { overrun: false }
    }

    /// Signals end-of-stream on the readable side exactly once.
    pub fn end_from_remote(&mut self) {
        self.data_tx = None;
    }

    /// Terminates both halves: the readable side sees end-of-stream,
    /// pending and future writes fail.
    pub fn destroy(&mut self) {
        self.data_tx = None;
        self.window.close();
    }
}

/// Readable half of a tunnel. Implements [`AsyncRead`]; end-of-stream is
/// signalled by a zero-byte read.
pub struct TunnelReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buffered: Arc<AtomicUsize>,
    leftover: Option<(Vec<u8>, usize)>,
}

impl TunnelReader {
    /// Receives the next inbound chunk, or `None` at end-of-stream.
    ///
    /// Chunks arrive in the order the engine received the corresponding
    /// frames.
    pub async fn read_chunk(&mut self) -> Option<Vec<u8>> {
        if let Some((chunk, offset)) = self.leftover.take() {
            if offset < chunk.len() {
                return Some(chunk[offset..].to_vec());
            }
        }
        let chunk = self.rx.recv().await?;
        self.buffered.fetch_sub(chunk.len(), Ordering::SeqCst);
        Some(chunk)
    }

    /// Stops consuming; subsequent inbound bytes are dropped by the
    /// engine.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl AsyncRead for TunnelReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some((chunk, offset)) = &mut this.leftover {
                let n = buf.remaining().min(chunk.len() - *offset);
                buf.put_slice(&chunk[*offset..*offset + n]);
                *offset += n;
                if *offset == chunk.len() {
                    this.leftover = None;
                }
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.buffered.fetch_sub(chunk.len(), Ordering::SeqCst);
                    this.leftover = Some((chunk, 0));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl std::fmt::Debug for TunnelReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelReader")
            .field("buffered", &self.buffered.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Writable half of a tunnel.
#[derive(Clone)]
pub struct TunnelWriter {
    call_id: CallId,
    commands: mpsc::UnboundedSender<Command>,
    window: Arc<Semaphore>,
    destroyed: Arc<AtomicBool>,
}

impl TunnelWriter {
    /// Writes bytes through the tunnel, chunking as needed.
    ///
    /// Resolves once every chunk has been accepted by the engine's send
    /// path; suspends while the outbound byte window is exhausted.
    ///
    /// # Errors
    ///
    /// Fails with a disconnected error if the engine loses the connection
    /// or the stream is torn down, and with an illegal-state error when
    /// the call is no longer active.
    pub async fn write(&self, bytes: &[u8]) -> SessionResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SessionError::Disconnected);
        }
        for chunk in bytes.chunks(CHUNK_SIZE) {
            let permit = self
                .window
                .clone()
                .acquire_many_owned(chunk.len() as u32)
                .await
                .map_err(|_| SessionError::Disconnected)?;

            let (reply_tx, reply_rx) = oneshot::channel();
            self.commands
                .send(Command::StreamWrite {
                    call_id: self.call_id.clone(),
                    bytes: chunk.to_vec(),
                    permit,
                    reply: reply_tx,
                })
                .map_err(|_| SessionError::illegal_state("session closed"))?;
            reply_rx.await.map_err(|_| SessionError::Disconnected)??;
        }
        Ok(())
    }

    /// Marks the writer destroyed; subsequent writes fail.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for TunnelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelWriter")
            .field("call_id", &self.call_id)
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

/// A duplex byte pipe anchored to one call.
#[derive(Debug)]
pub struct TunnelStream {
    reader: TunnelReader,
    writer: TunnelWriter,
}

impl TunnelStream {
    /// Splits the stream into its readable and writable halves.
    #[must_use]
    pub fn split(self) -> (TunnelReader, TunnelWriter) {
        (self.reader, self.writer)
    }

    /// Writes bytes through the tunnel. See [`TunnelWriter::write`].
    ///
    /// # Errors
    ///
    /// See [`TunnelWriter::write`].
    pub async fn write(&self, bytes: &[u8]) -> SessionResult<()> {
        self.writer.write(bytes).await
    }

    /// Receives the next inbound chunk. See [`TunnelReader::read_chunk`].
    pub async fn read_chunk(&mut self) -> Option<Vec<u8>> {
        self.reader.read_chunk().await
    }

    /// Terminates both halves locally.
    pub fn destroy(mut self) {
        self.reader.close();
        self.writer.destroy();
    }
}
