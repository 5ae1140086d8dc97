// Channel transport - one duplex, message-oriented connection to the worker
//
// Messages are framed the native-messaging way: a 4-byte little-endian length
// followed by that many bytes of UTF-8 JSON. The orchestrator never sees
// frames; it holds a `Connection` made of a `MessageSender` and a stream of
// `TransportEvent`s.

use crate::error::BridgeError;
use crate::models::BridgeSettings;
use crate::services::manifest::HostManifest;
use camino::Utf8PathBuf;
use serde_json::Value;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Largest frame accepted from the worker (the browser's host-to-client limit)
pub const MAX_INBOUND_FRAME: usize = 1024 * 1024;

/// Largest frame written to the worker
pub const MAX_OUTBOUND_FRAME: usize = 64 * 1024 * 1024;

/// Errors from the frame codec
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,
}

impl FrameError {
    /// Whether the stream is still aligned on a frame boundary after this error.
    ///
    /// A bad body was fully consumed, so reading can go on. I/O errors and
    /// oversized frames leave the stream in an unknown position.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Json(_) | Self::NotAnObject)
    }
}

/// Encode one message as a length-prefixed frame.
pub fn encode_frame(message: &Value) -> Result<Vec<u8>, FrameError> {
    if !message.is_object() {
        return Err(FrameError::NotAnObject);
    }

    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_OUTBOUND_FRAME {
        return Err(FrameError::TooLarge {
            size: body.len(),
            limit: MAX_OUTBOUND_FRAME,
        });
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode the body of a frame whose length prefix has already been consumed.
pub fn decode_frame(body: &[u8]) -> Result<Value, FrameError> {
    let value: Value = serde_json::from_slice(body)?;
    if !value.is_object() {
        return Err(FrameError::NotAnObject);
    }
    Ok(value)
}

/// Write one frame. Header and body go out in a single write so frames never interleave.
pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Value>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_le_bytes(header) as usize;
    if size > limit {
        return Err(FrameError::TooLarge { size, limit });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    decode_frame(&body).map(Some)
}

/// Events delivered from the transport to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(Value),

    /// A complete frame that could not be decoded; the connection is still usable
    Malformed(String),

    /// The connection is gone; carries a diagnostic reason when one is known
    Disconnected(Option<String>),
}

/// Sending half of a connection.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<Value>,
}

impl MessageSender {
    /// Queue one message for the worker.
    pub fn send(&self, message: Value) -> Result<(), BridgeError> {
        self.tx.send(message).map_err(|_| BridgeError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The orchestrator's side of a live connection.
pub struct Connection {
    pub sender: MessageSender,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The worker-facing side of a connection, driven by a [`Connector`] implementation.
///
/// Dropping `events` ends the orchestrator's dispatch loop; dropping the
/// [`MessageSender`] held by the orchestrator closes `outbound`.
pub struct Endpoint {
    pub outbound: mpsc::UnboundedReceiver<Value>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl Endpoint {
    pub fn deliver(&self, message: Value) -> bool {
        self.events.send(TransportEvent::Message(message)).is_ok()
    }

    pub fn disconnect(&self, reason: Option<String>) {
        let _ = self.events.send(TransportEvent::Disconnected(reason));
    }
}

impl Connection {
    /// Create a connected pair of channels.
    pub fn pair() -> (Connection, Endpoint) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        (
            Connection {
                sender: MessageSender { tx: out_tx },
                events: ev_rx,
            },
            Endpoint {
                outbound: out_rx,
                events: ev_tx,
            },
        )
    }
}

/// Establishes connections to a worker by name.
///
/// Called with the orchestrator's state lock held and inside its runtime, so
/// implementations must return promptly (spawning tasks is fine, awaiting is not).
#[cfg_attr(test, mockall::automock)]
pub trait Connector: Send + Sync {
    fn connect(&self, host_name: &str) -> Result<Connection, BridgeError>;
}

/// Launches the worker named by a native messaging host manifest and speaks
/// framed JSON over its stdin/stdout.
pub struct NativeHostConnector {
    manifest_dirs: Vec<Utf8PathBuf>,
    allowed_origin: Option<String>,
}

impl NativeHostConnector {
    pub fn new(manifest_dirs: Vec<Utf8PathBuf>, allowed_origin: Option<String>) -> Self {
        Self {
            manifest_dirs,
            allowed_origin,
        }
    }

    /// Search configured directories first, then the platform defaults.
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        let mut dirs: Vec<Utf8PathBuf> = settings
            .manifest_dirs
            .iter()
            .map(|d| crate::config::expand_home(d))
            .collect();
        dirs.extend(HostManifest::default_dirs());
        Self::new(dirs, settings.allowed_origin.clone())
    }

    pub fn manifest_dirs(&self) -> &[Utf8PathBuf] {
        &self.manifest_dirs
    }
}

impl Connector for NativeHostConnector {
    fn connect(&self, host_name: &str) -> Result<Connection, BridgeError> {
        let manifest = HostManifest::locate(host_name, &self.manifest_dirs)?;

        let mut command = Command::new(manifest.path.as_std_path());
        if let Some(origin) = &self.allowed_origin {
            command.arg(origin);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            BridgeError::Connection(format!("Failed to launch {}: {}", manifest.path, e))
        })?;

        let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BridgeError::Connection(
                "Worker stdio was not captured".to_string(),
            ));
        };

        tracing::info!(
            "Launched worker {} (pid {:?}) for host {}",
            manifest.path,
            child.id(),
            host_name
        );

        let (connection, endpoint) = Connection::pair();
        let Endpoint {
            mut outbound,
            events,
        } = endpoint;

        // Writer owns the child: when the orchestrator drops its sender the
        // loop ends and kill_on_drop reaps the worker.
        let writer_events = events.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(e) = write_frame(&mut stdin, &message).await {
                    tracing::warn!("Failed to write to worker: {}", e);
                    let _ = writer_events
                        .send(TransportEvent::Disconnected(Some(format!("write failed: {}", e))));
                    break;
                }
            }
            drop(stdin);
            match child.try_wait() {
                Ok(Some(status)) => tracing::debug!("Worker exited with {}", status),
                _ => tracing::debug!("Stopping worker"),
            }
        });

        tokio::spawn(async move {
            let reason = loop {
                match read_frame(&mut stdout, MAX_INBOUND_FRAME).await {
                    Ok(Some(message)) => {
                        if events.send(TransportEvent::Message(message)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break "worker closed its output".to_string(),
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!("Skipping malformed frame from worker: {}", e);
                        if events.send(TransportEvent::Malformed(e.to_string())).is_err() {
                            return;
                        }
                    }
                    Err(e) => break format!("read failed: {}", e),
                }
            };
            tracing::info!("Worker channel ended: {}", reason);
            let _ = events.send(TransportEvent::Disconnected(Some(reason)));
        });

        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_frame_little_endian_prefix() {
        let frame = encode_frame(&json!({"id": 1})).unwrap();
        let body = br#"{"id":1}"#;
        assert_eq!(&frame[..4], &(body.len() as u32).to_le_bytes());
        assert_eq!(&frame[4..], body);
    }

    #[test]
    fn test_encode_rejects_non_objects() {
        assert!(matches!(encode_frame(&json!([1])), Err(FrameError::NotAnObject)));
    }

    #[tokio::test]
    async fn test_read_write_frames_over_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, &json!({"id": 1, "action": "test"})).await.unwrap();
        write_frame(&mut a, &json!({"type": "progress", "downloadId": "J1"})).await.unwrap();
        drop(a);

        let first = read_frame(&mut b, MAX_INBOUND_FRAME).await.unwrap();
        assert_eq!(first, Some(json!({"id": 1, "action": "test"})));
        let second = read_frame(&mut b, MAX_INBOUND_FRAME).await.unwrap();
        assert_eq!(second.unwrap()["downloadId"], "J1");
        assert!(read_frame(&mut b, MAX_INBOUND_FRAME).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_body_leaves_stream_in_sync() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&(4u32).to_le_bytes()).await.unwrap();
        a.write_all(b"{bad").await.unwrap();
        a.write_all(&(3u32).to_le_bytes()).await.unwrap();
        a.write_all(b"[1]").await.unwrap();
        write_frame(&mut a, &json!({"id": 2})).await.unwrap();

        let err = read_frame(&mut b, MAX_INBOUND_FRAME).await.unwrap_err();
        assert!(matches!(err, FrameError::Json(_)));
        assert!(err.is_recoverable());

        let err = read_frame(&mut b, MAX_INBOUND_FRAME).await.unwrap_err();
        assert!(matches!(err, FrameError::NotAnObject));
        assert!(err.is_recoverable());

        let next = read_frame(&mut b, MAX_INBOUND_FRAME).await.unwrap();
        assert_eq!(next, Some(json!({"id": 2})));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(2048u32).to_le_bytes()).await.unwrap();

        let err = read_frame(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { size: 2048, limit: 1024 }));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(10u32).to_le_bytes()).await.unwrap();
        a.write_all(b"{\"a\"").await.unwrap();
        drop(a);

        assert!(matches!(
            read_frame(&mut b, MAX_INBOUND_FRAME).await,
            Err(FrameError::Io(_))
        ));
    }

    #[test]
    fn test_sender_reports_closed_channel() {
        let (connection, endpoint) = Connection::pair();
        drop(endpoint);
        assert!(connection.sender.is_closed());
        assert_eq!(
            connection.sender.send(json!({"id": 1})),
            Err(BridgeError::ChannelClosed)
        );
    }
}
