//! Process tunnel adapter.
//!
//! Bridges a call's byte tunnel to a "process-like" endpoint exposing
//! `stdin`/`stdout`/optional `stderr`. Pipes are wired without
//! propagating close in either direction: an endpoint finishing does not
//! close the call's stream, and a quiet stream does not stop the
//! endpoint. Teardown happens only through [`TunnelHandle::close`] —
//! directly, or via the call's hangup when
//! [`TunnelOptions::close_on_hangup`] is set.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::debug;

pub use switchline_core::TunnelEndpoint;

use crate::call::Call;
use crate::error::{SessionError, SessionResult};
use crate::listeners::Subscription;
use crate::stream::TunnelWriter;

/// Observer invoked with every stderr chunk.
pub type StderrObserver = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Options for [`Call::tunnel`].
#[derive(Clone)]
pub struct TunnelOptions {
    /// Close the tunnel handle when the call hangs up.
    pub close_on_hangup: bool,
    /// Forward endpoint stderr over the tunnel alongside stdout.
    pub forward_stderr: bool,
    /// Observer for stderr chunks, independent of forwarding.
    pub on_stderr_chunk: Option<StderrObserver>,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            close_on_hangup: true,
            forward_stderr: true,
            on_stderr_chunk: None,
        }
    }
}

impl TunnelOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: control close-on-hangup.
    #[must_use]
    pub fn with_close_on_hangup(mut self, close_on_hangup: bool) -> Self {
        self.close_on_hangup = close_on_hangup;
        self
    }

    /// Builder: control stderr forwarding.
    #[must_use]
    pub fn with_forward_stderr(mut self, forward_stderr: bool) -> Self {
        self.forward_stderr = forward_stderr;
        self
    }

    /// Builder: observe stderr chunks.
    #[must_use]
    pub fn with_stderr_observer(
        mut self,
        observer: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.on_stderr_chunk = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for TunnelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelOptions")
            .field("close_on_hangup", &self.close_on_hangup)
            .field("forward_stderr", &self.forward_stderr)
            .field("on_stderr_chunk", &self.on_stderr_chunk.is_some())
            .finish()
    }
}

struct HandleInner {
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stdin: Arc<tokio::sync::Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>>,
    endpoint: tokio::sync::Mutex<Option<Box<dyn TunnelEndpoint>>>,
    hangup_sub: Mutex<Option<Subscription>>,
}

/// Handle to a running process tunnel.
#[derive(Clone)]
pub struct TunnelHandle {
    inner: Arc<HandleInner>,
}

impl TunnelHandle {
    /// Closes the tunnel: detaches the pipes, closes the endpoint's
    /// stdin, and awaits the endpoint's `stop`. Idempotent.
    pub async fn close(&self, reason: Option<String>) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(reason = ?reason, "closing tunnel");
        if let Some(sub) = self
            .inner
            .hangup_sub
            .lock()
            .expect("tunnel handle poisoned")
            .take()
        {
            sub.dispose();
        }

        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .tasks
            .lock()
            .expect("tunnel handle poisoned")
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        if let Some(mut sink) = self.inner.stdin.lock().await.take() {
            let _ = sink.shutdown().await;
        }
        if let Some(mut endpoint) = self.inner.endpoint.lock().await.take() {
            endpoint.stop(reason).await;
        }
    }

    /// Whether the handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Call {
    /// Bridges this call's tunnel to a process-like endpoint.
    ///
    /// Starts the endpoint, then pipes endpoint stdout into the tunnel,
    /// tunnel bytes into endpoint stdin, and (per the options) endpoint
    /// stderr over the tunnel and/or into an observer. Valid only while
    /// the call is active; the call's single tunnel stream is consumed.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint does not start, the call is not active, or
    /// the tunnel stream was already taken.
    pub async fn tunnel(
        &self,
        endpoint: impl TunnelEndpoint,
        options: TunnelOptions,
    ) -> SessionResult<TunnelHandle> {
        let mut endpoint: Box<dyn TunnelEndpoint> = Box::new(endpoint);
        endpoint.start().await.map_err(SessionError::Endpoint)?;

        let stream = self.stream().await?;
        let (mut tunnel_reader, tunnel_writer) = stream.split();

        let stdin = Arc::new(tokio::sync::Mutex::new(endpoint.take_stdin()));
        let stdout = endpoint.take_stdout();
        let stderr = endpoint.take_stderr();

        let mut tasks = Vec::new();

        if let Some(mut out) = stdout {
            let writer = tunnel_writer.clone();
            tasks.push(tokio::spawn(async move {
                pump_to_tunnel(&mut out, &writer).await;
            }));
        }

        {
            let stdin = stdin.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(chunk) = tunnel_reader.read_chunk().await {
                    let mut guard = stdin.lock().await;
                    let Some(sink) = guard.as_mut() else { break };
                    if sink.write_all(&chunk).await.is_err() {
                        break;
                    }
                    let _ = sink.flush().await;
                }
                // Stream end does not stop the endpoint; the handle does.
            }));
        }

        if let Some(mut err_pipe) = stderr {
            let forward = options.forward_stderr.then(|| tunnel_writer.clone());
            let observer = options.on_stderr_chunk.clone();
            if forward.is_some() || observer.is_some() {
                tasks.push(tokio::spawn(async move {
                    let mut buf = [0u8; 8192];
                    loop {
                        match err_pipe.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if let Some(observer) = &observer {
                                    observer(&buf[..n]);
                                }
                                if let Some(writer) = &forward
                                    && writer.write(&buf[..n]).await.is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                }));
            }
        }

        let handle = TunnelHandle {
            inner: Arc::new(HandleInner {
                closed: AtomicBool::new(false),
                tasks: Mutex::new(tasks),
                stdin,
                endpoint: tokio::sync::Mutex::new(Some(endpoint)),
                hangup_sub: Mutex::new(None),
            }),
        };

        if options.close_on_hangup {
            let hook = handle.clone();
            let sub = self.on_hangup(move |_| {
                let hook = hook.clone();
                tokio::spawn(async move {
                    hook.close(Some("hangup".to_string())).await;
                });
            });
            *handle
                .inner
                .hangup_sub
                .lock()
                .expect("tunnel handle poisoned") = Some(sub);
        }

        Ok(handle)
    }
}

async fn pump_to_tunnel(source: &mut Box<dyn AsyncRead + Send + Unpin>, writer: &TunnelWriter) {
    let mut buf = [0u8; 8192];
    loop {
        match source.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if writer.write(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
    // An endpoint finishing does not close the call's stream.
}
