//! Standard I/O transport
//!
//! Talks newline-delimited JSON over the pipes of a process owned by the
//! [`ProcessSupervisor`]. The transport never owns the child: closing it only
//! drops stdin, and process lifetime stays with the supervisor.

use super::{OpenError, Transport, TransportError};
use crate::config::TransportKind;
use crate::protocol::Envelope;
use crate::supervisor::{CommandSpec, ProcessSupervisor, RestartPolicy};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Ceiling on a single inbound line
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Inbound half: the framed stream plus whether its last item was an error
///
/// `FramedRead` yields one `None` right after a decode error before it resumes
/// reading, which must not be mistaken for end of stream.
struct LineReader {
    frames: FramedRead<BoxedReader, LinesCodec>,
    after_error: bool,
}

/// Stdio transport
///
/// Receiving is cancel-safe: the line codec keeps a partial line buffered
/// when a receive times out, and the next receive resumes it.
pub struct StdioTransport {
    writer: Mutex<Option<BoxedWriter>>,
    reader: Mutex<LineReader>,
    connected: AtomicBool,
    closed: CancellationToken,
}

impl StdioTransport {
    /// Create from an arbitrary reader/writer pair (pipes, duplex streams)
    pub fn from_parts<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_max_line(reader, writer, DEFAULT_MAX_LINE_BYTES)
    }

    /// Like [`Self::from_parts`], with an explicit inbound line ceiling
    pub fn with_max_line<R, W>(reader: R, writer: W, max_line_bytes: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        Self {
            writer: Mutex::new(Some(Box::new(writer))),
            reader: Mutex::new(LineReader {
                frames: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_bytes)),
                after_error: false,
            }),
            connected: AtomicBool::new(true),
            closed: CancellationToken::new(),
        }
    }

    /// Attach to the supervised process `name`, starting it if needed
    ///
    /// A running process whose pipes are already held by an earlier transport
    /// cannot be reattached, so it is stopped and started fresh.
    pub async fn launch(
        name: &str,
        command: &CommandSpec,
        restart: &RestartPolicy,
        processes: &ProcessSupervisor,
    ) -> Result<Self, OpenError> {
        if processes.is_running(name) {
            if let Some(pipes) = processes.claim_stdio(name) {
                debug!("Attaching to running process for '{}'", name);
                return Ok(Self::from_parts(pipes.stdout, pipes.stdin));
            }
            info!("Process for '{}' has no free pipes, restarting it", name);
            processes.stop(name).await?;
        }

        processes
            .start_with_policy(name, command.clone(), restart.clone())
            .await?;
        let pipes = processes.claim_stdio(name).ok_or_else(|| {
            TransportError::connect(format!("process '{}' exited before its pipes were claimed", name))
        })?;
        Ok(Self::from_parts(pipes.stdout, pipes.stdin))
    }

    fn decode(line: &str) -> Result<Envelope, TransportError> {
        serde_json::from_str(line).map_err(|e| {
            let preview: String = line.chars().take(120).collect();
            TransportError::decode(format!("{} (line: {})", e, preview))
        })
    }

    async fn read_envelope(&self) -> Result<Envelope, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            let frame = tokio::select! {
                _ = self.closed.cancelled() => {
                    return Err(TransportError::closed("transport closed"));
                }
                frame = reader.frames.next() => frame,
            };
            let after_error = std::mem::replace(&mut reader.after_error, false);

            match frame {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => return Self::decode(&line),
                // The codec skips the rest of the line and stays usable
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    reader.after_error = true;
                    return Err(TransportError::decode(format!(
                        "line exceeds {} bytes, discarded",
                        reader.frames.decoder().max_length()
                    )));
                }
                Some(Err(LinesCodecError::Io(e))) if e.kind() == std::io::ErrorKind::InvalidData => {
                    reader.after_error = true;
                    return Err(TransportError::decode(format!("line is not valid UTF-8: {}", e)));
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
                None if after_error => continue,
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::closed("child closed stdout"));
                }
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut json = serde_json::to_vec(envelope)?;
        json.push(b'\n');

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| TransportError::closed("stdin already closed"))?;

        let result = async {
            writer.write_all(&json).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            self.connected.store(false, Ordering::SeqCst);
            guard.take();
            return Err(e.into());
        }
        Ok(())
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Envelope, TransportError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_envelope())
                .await
                .map_err(|_| TransportError::timeout(limit))?,
            None => self.read_envelope().await,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                warn!("Failed to close child stdin: {}", e);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RpcNotification, RpcRequest};
    use crate::transport::TransportErrorKind;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_send_writes_one_line() {
        let (client_out, server_in) = tokio::io::duplex(1024);
        let (_server_out, client_in) = tokio::io::duplex(1024);
        let transport = StdioTransport::from_parts(client_in, client_out);

        transport
            .send(&RpcRequest::new(1i64, "ping").into())
            .await
            .unwrap();

        let mut line = String::new();
        BufReader::new(server_in).read_line(&mut line).await.unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"method\":\"ping\""));
    }

    #[tokio::test]
    async fn test_malformed_line_then_valid_envelope() {
        let (client_out, _server_in) = tokio::io::duplex(1024);
        let (mut server_out, client_in) = tokio::io::duplex(1024);
        let transport = StdioTransport::from_parts(client_in, client_out);

        server_out.write_all(b"not json\n\n").await.unwrap();
        let notif = serde_json::to_vec(&RpcNotification::new("notifications/progress")).unwrap();
        server_out.write_all(&notif).await.unwrap();
        server_out.write_all(b"\n").await.unwrap();

        let err = transport.receive(None).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Decode);

        let msg = transport.receive(None).await.unwrap();
        assert_eq!(msg.method(), Some("notifications/progress"));
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_eof_marks_disconnected() {
        let (client_out, _server_in) = tokio::io::duplex(64);
        let (server_out, client_in) = tokio::io::duplex(64);
        let transport = StdioTransport::from_parts(client_in, client_out);
        drop(server_out);

        let err = transport.receive(None).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Closed);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_receive_timeout_and_close() {
        let (client_out, _server_in) = tokio::io::duplex(64);
        let (_server_out, client_in) = tokio::io::duplex(64);
        let transport = StdioTransport::from_parts(client_in, client_out);

        let err = transport
            .receive(Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Timeout);

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let err = transport.send(&RpcRequest::new(2i64, "ping").into()).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Closed);
    }

    #[tokio::test]
    async fn test_partial_line_survives_receive_timeout() {
        let (client_out, _server_in) = tokio::io::duplex(1024);
        let (mut server_out, client_in) = tokio::io::duplex(1024);
        let transport = StdioTransport::from_parts(client_in, client_out);

        server_out.write_all(b"{\"jsonrpc\":\"2.0\",").await.unwrap();
        let err = transport
            .receive(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Timeout);

        server_out
            .write_all(b"\"method\":\"notifications/progress\"}\r\n")
            .await
            .unwrap();
        let msg = transport.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(msg.method(), Some("notifications/progress"));
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let (client_out, _server_in) = tokio::io::duplex(1024);
        let (mut server_out, client_in) = tokio::io::duplex(1024);
        let transport = StdioTransport::with_max_line(client_in, client_out, 64);

        server_out.write_all(&[b'x'; 100]).await.unwrap();
        server_out.write_all(b"\n").await.unwrap();
        let notif = serde_json::to_vec(&RpcNotification::new("notifications/progress")).unwrap();
        server_out.write_all(&notif).await.unwrap();
        server_out.write_all(b"\n").await.unwrap();

        let err = transport.receive(None).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Decode);
        let msg = transport.receive(None).await.unwrap();
        assert_eq!(msg.method(), Some("notifications/progress"));
        assert!(transport.is_connected());
    }
}
