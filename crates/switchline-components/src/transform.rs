//! In-process text transforms behind duplex pipes.

use std::str::FromStr;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use switchline_core::TunnelEndpoint;

use crate::error::ComponentError;

const PIPE_CAPACITY: usize = 16 * 1024;

/// A byte transform applied between a tunnel and its consumer.
///
/// `Echo` and `Uppercase` work on raw chunks; `Prefix` and `Suffix` are
/// line-oriented and buffer until a newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// Pass bytes through unchanged.
    Echo,
    /// ASCII-uppercase every byte.
    Uppercase,
    /// Prepend a string to every line.
    Prefix(String),
    /// Append a string to every line.
    Suffix(String),
}

impl FromStr for Transform {
    type Err = ComponentError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        if let Some(prefix) = spec.strip_prefix("prefix:") {
            return Ok(Self::Prefix(prefix.to_string()));
        }
        if let Some(suffix) = spec.strip_prefix("suffix:") {
            return Ok(Self::Suffix(suffix.to_string()));
        }
        match spec {
            "echo" => Ok(Self::Echo),
            "uppercase" => Ok(Self::Uppercase),
            other => Err(ComponentError::UnknownComponent(other.to_string())),
        }
    }
}

impl Transform {
    fn is_line_oriented(&self) -> bool {
        matches!(self, Self::Prefix(_) | Self::Suffix(_))
    }

    fn apply_chunk(&self, chunk: &[u8]) -> Vec<u8> {
        match self {
            Self::Echo => chunk.to_vec(),
            Self::Uppercase => chunk.iter().map(u8::to_ascii_uppercase).collect(),
            Self::Prefix(_) | Self::Suffix(_) => unreachable!("line-oriented"),
        }
    }

    fn decorate_line(&self, line: &[u8]) -> Vec<u8> {
        match self {
            Self::Prefix(prefix) => {
                let mut out = prefix.as_bytes().to_vec();
                out.extend_from_slice(line);
                out
            }
            Self::Suffix(suffix) => {
                let mut out = line.to_vec();
                out.extend_from_slice(suffix.as_bytes());
                out
            }
            Self::Echo | Self::Uppercase => line.to_vec(),
        }
    }

    /// Drains complete lines out of `pending`, decorating each.
    fn drain_lines(&self, pending: &mut Vec<u8>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            out.extend(self.decorate_line(&line[..line.len() - 1]));
            out.push(b'\n');
        }
        out
    }
}

/// An in-process endpoint: stdout is the transform of stdin.
pub struct TransformEndpoint {
    transform: Transform,
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    task: Option<JoinHandle<()>>,
}

impl TransformEndpoint {
    /// Creates an endpoint for the given transform. The transform task
    /// starts when the endpoint starts.
    #[must_use]
    pub fn new(transform: Transform) -> Self {
        Self {
            transform,
            stdin: None,
            stdout: None,
            task: None,
        }
    }
}

impl TunnelEndpoint for TransformEndpoint {
    fn start(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            let (stdin_host, stdin_task) = tokio::io::duplex(PIPE_CAPACITY);
            let (stdout_task, stdout_host) = tokio::io::duplex(PIPE_CAPACITY);
            let transform = self.transform.clone();
            self.task = Some(tokio::spawn(run_transform(
                transform,
                stdin_task,
                stdout_task,
            )));
            self.stdin = Some(stdin_host);
            self.stdout = Some(stdout_host);
            Ok(())
        })
    }

    fn take_stdin(&mut self) -> Option<Box<dyn AsyncWrite + Send + Unpin>> {
        self.stdin.take().map(|pipe| Box::new(pipe) as _)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.stdout.take().map(|pipe| Box::new(pipe) as _)
    }

    fn stop(&mut self, _reason: Option<String>) -> BoxFuture<'_, ()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Box::pin(std::future::ready(()))
    }
}

async fn run_transform(transform: Transform, mut input: DuplexStream, mut output: DuplexStream) {
    let mut buf = [0u8; 8192];
    let mut pending = Vec::new();
    loop {
        match input.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let out = if transform.is_line_oriented() {
                    pending.extend_from_slice(&buf[..n]);
                    transform.drain_lines(&mut pending)
                } else {
                    transform.apply_chunk(&buf[..n])
                };
                if !out.is_empty() && output.write_all(&out).await.is_err() {
                    return;
                }
            }
        }
    }
    // Input ended mid-line: flush the decorated tail.
    if !pending.is_empty() {
        let tail = transform.decorate_line(&pending);
        let _ = output.write_all(&tail).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_pipes(
        transform: Transform,
    ) -> (
        TransformEndpoint,
        Box<dyn AsyncWrite + Send + Unpin>,
        Box<dyn AsyncRead + Send + Unpin>,
    ) {
        let mut endpoint = TransformEndpoint::new(transform);
        endpoint.start().await.unwrap();
        let stdin = endpoint.take_stdin().unwrap();
        let stdout = endpoint.take_stdout().unwrap();
        (endpoint, stdin, stdout)
    }

    #[tokio::test]
    async fn uppercase_transforms_chunks() {
        let (_endpoint, mut stdin, mut stdout) = start_pipes(Transform::Uppercase).await;

        stdin.write_all(b"hello shells\n").await.unwrap();
        let mut out = vec![0u8; 13];
        stdout.read_exact(&mut out).await.unwrap();
        assert_eq!(out, b"HELLO SHELLS\n");
    }

    #[tokio::test]
    async fn echo_passes_binary_through() {
        let (_endpoint, mut stdin, mut stdout) = start_pipes(Transform::Echo).await;

        let bytes = [0x00, 0xFF, 0x68, 0x65, 0x6C];
        stdin.write_all(&bytes).await.unwrap();
        let mut out = vec![0u8; bytes.len()];
        stdout.read_exact(&mut out).await.unwrap();
        assert_eq!(out, bytes);
    }

    #[tokio::test]
    async fn prefix_decorates_lines_across_chunk_boundaries() {
        let (_endpoint, mut stdin, mut stdout) =
            start_pipes(Transform::Prefix(">> ".to_string())).await;

        stdin.write_all(b"first li").await.unwrap();
        stdin.write_all(b"ne\nsecond\n").await.unwrap();

        let expected = b">> first line\n>> second\n";
        let mut out = vec![0u8; expected.len()];
        stdout.read_exact(&mut out).await.unwrap();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn suffix_flushes_partial_tail_on_eof() {
        let (endpoint, mut stdin, mut stdout) =
            start_pipes(Transform::Suffix("!".to_string())).await;
        drop(endpoint);

        stdin.write_all(b"done\nno newline").await.unwrap();
        stdin.shutdown().await.unwrap();
        drop(stdin);

        let mut out = Vec::new();
        stdout.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"done!\nno newline!");
    }

    #[test]
    fn parses_transform_specs() {
        assert_eq!("echo".parse::<Transform>().unwrap(), Transform::Echo);
        assert_eq!(
            "uppercase".parse::<Transform>().unwrap(),
            Transform::Uppercase
        );
        assert_eq!(
            "prefix:# ".parse::<Transform>().unwrap(),
            Transform::Prefix("# ".to_string())
        );
        assert_eq!(
            "suffix:?".parse::<Transform>().unwrap(),
            Transform::Suffix("?".to_string())
        );
        assert!("rot13".parse::<Transform>().is_err());
    }
}
