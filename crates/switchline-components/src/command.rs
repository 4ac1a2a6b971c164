//! External-process endpoint.

use std::process::Stdio;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use switchline_core::TunnelEndpoint;

/// An endpoint backed by an external process with piped stdio.
///
/// `start` spawns the child; `stop` kills and reaps it. The child is
/// also killed if the endpoint is dropped without a `stop`.
pub struct CommandEndpoint {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl CommandEndpoint {
    /// Creates an endpoint for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            child: None,
        }
    }

    /// Builder: append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Builder: append arguments.
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }
}

impl TunnelEndpoint for CommandEndpoint {
    fn start(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            debug!(program = %self.program, args = ?self.args, "spawning");
            let child = Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;
            self.child = Some(child);
            Ok(())
        })
    }

    fn take_stdin(&mut self) -> Option<Box<dyn AsyncWrite + Send + Unpin>> {
        self.child
            .as_mut()
            .and_then(|child| child.stdin.take())
            .map(|pipe| Box::new(pipe) as _)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.child
            .as_mut()
            .and_then(|child| child.stdout.take())
            .map(|pipe| Box::new(pipe) as _)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.child
            .as_mut()
            .and_then(|child| child.stderr.take())
            .map(|pipe| Box::new(pipe) as _)
    }

    fn stop(&mut self, reason: Option<String>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut child) = self.child.take() {
                debug!(program = %self.program, reason = ?reason, "stopping");
                if let Err(e) = child.start_kill() {
                    warn!(program = %self.program, error = %e, "kill failed");
                }
                let _ = child.wait().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[cfg(unix)]
    #[tokio::test]
    async fn cat_round_trips_bytes() {
        let mut endpoint = CommandEndpoint::new("cat");
        endpoint.start().await.unwrap();

        let mut stdin = endpoint.take_stdin().unwrap();
        let mut stdout = endpoint.take_stdout().unwrap();

        stdin.write_all(b"through the pipe\n").await.unwrap();
        stdin.flush().await.unwrap();

        let mut out = vec![0u8; 17];
        stdout.read_exact(&mut out).await.unwrap();
        assert_eq!(out, b"through the pipe\n");

        endpoint.stop(Some("test done".to_string())).await;
        assert!(endpoint.child.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let mut endpoint = CommandEndpoint::new("definitely-not-a-real-program-7f3a");
        assert!(endpoint.start().await.is_err());
    }

    #[tokio::test]
    async fn pipes_are_absent_before_start() {
        let mut endpoint = CommandEndpoint::new("cat");
        assert!(endpoint.take_stdin().is_none());
        assert!(endpoint.take_stdout().is_none());
        assert!(endpoint.take_stderr().is_none());
    }
}
