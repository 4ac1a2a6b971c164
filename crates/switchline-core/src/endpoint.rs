//! The tunnel-endpoint abstraction.
//!
//! A "process-like" unit that can sit at the far end of a call tunnel:
//! byte-oriented readable stdout, writable stdin, optional readable
//! stderr, and optional start/stop hooks. The session engine consumes
//! this trait; component crates implement it for in-process transforms
//! and external commands.

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte-oriented unit that can sit at the far end of a tunnel.
///
/// The pipes are taken once; [`start`](Self::start) runs before any pipe
/// is taken and [`stop`](Self::stop) after the pipes are torn down.
pub trait TunnelEndpoint: Send + 'static {
    /// Starts the endpoint. Defaults to a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot start (e.g. spawning an
    /// external process fails).
    fn start(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(std::future::ready(Ok(())))
    }

    /// Takes the endpoint's writable input.
    fn take_stdin(&mut self) -> Option<Box<dyn AsyncWrite + Send + Unpin>>;

    /// Takes the endpoint's readable output.
    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>>;

    /// Takes the endpoint's readable error output, if it has one.
    fn take_stderr(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        None
    }

    /// Stops the endpoint. Defaults to a no-op.
    fn stop(&mut self, reason: Option<String>) -> BoxFuture<'_, ()> {
        let _ = reason;
        Box::pin(std::future::ready(()))
    }
}

impl TunnelEndpoint for Box<dyn TunnelEndpoint> {
    fn start(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        (**self).start()
    }

    fn take_stdin(&mut self) -> Option<Box<dyn AsyncWrite + Send + Unpin>> {
        (**self).take_stdin()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        (**self).take_stdout()
    }

    fn take_stderr(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        (**self).take_stderr()
    }

    fn stop(&mut self, reason: Option<String>) -> BoxFuture<'_, ()> {
        (**self).stop(reason)
    }
}
