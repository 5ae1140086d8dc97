use crate::models::JobId;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the bridge to its callers.
///
/// Call-based operations return these directly; job-based failures are
/// delivered through the [`EventSink`](crate::events::EventSink) instead and
/// never reach the caller of [`start_job`](crate::services::Orchestrator::start_job).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The channel is absent and could not be established, or it dropped
    /// while the operation was outstanding.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A send was attempted on a channel that is no longer connected.
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// The worker reported failure; the text is passed through verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Discriminant of a [`BridgeError`], for callers that only need to branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    ChannelClosed,
    Timeout,
    Remote,
    UnknownJob,
    InvalidRequest,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::ChannelClosed => ErrorKind::ChannelClosed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Remote(_) => ErrorKind::Remote,
            Self::UnknownJob(_) => ErrorKind::UnknownJob,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Connection-level failures (as opposed to a worker or caller mistake).
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_message_passes_through_verbatim() {
        let err = BridgeError::Remote("Folder selection cancelled".to_string());
        assert_eq!(err.to_string(), "Folder selection cancelled");
        assert_eq!(err.kind(), ErrorKind::Remote);
    }

    #[test]
    fn test_connection_kinds() {
        assert!(BridgeError::ChannelClosed.is_connection());
        assert!(BridgeError::Connection("gone".into()).is_connection());
        assert!(!BridgeError::Timeout(Duration::from_secs(1)).is_connection());
        assert!(!BridgeError::UnknownJob(JobId::from("J1")).is_connection());
    }
}
