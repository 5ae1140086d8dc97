// Event sink - fans job notifications out to observers
//
// Delivery is best-effort: a missing broadcast subscriber or a failing observer
// is logged and swallowed, never reported back to the orchestrator.

use crate::models::{JobId, ProgressSnapshot};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Notifications emitted for a job over its lifetime.
///
/// For a single job the order is `Started`, zero or more `Progress`, then
/// exactly one of `Completed`, `Failed` or `Cancelled`.
#[derive(Clone, Debug, PartialEq)]
pub enum JobNotification {
    Started {
        job_id: JobId,
        label: String,
    },

    Progress {
        job_id: JobId,
        label: String,
        progress: ProgressSnapshot,
    },

    Completed {
        job_id: JobId,
        label: String,
        filename: Option<String>,
    },

    Failed {
        job_id: JobId,
        label: String,
        error: String,
    },

    Cancelled {
        job_id: JobId,
        label: String,
    },
}

/// Coarse kind of a [`JobNotification`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
}

impl JobNotification {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Started { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id, .. } => job_id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Started { label, .. }
            | Self::Progress { label, .. }
            | Self::Completed { label, .. }
            | Self::Failed { label, .. }
            | Self::Cancelled { label, .. } => label,
        }
    }

    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Started { .. } => NotificationKind::Started,
            Self::Progress { .. } => NotificationKind::Progress,
            Self::Completed { .. } => NotificationKind::Completed,
            Self::Failed { .. } => NotificationKind::Failed,
            Self::Cancelled { .. } => NotificationKind::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            NotificationKind::Completed | NotificationKind::Failed | NotificationKind::Cancelled
        )
    }
}

/// Receiver of job notifications.
///
/// Implementations must not block; they run on the notification delivery task.
pub trait Observer: Send + Sync {
    fn on_notification(&self, notification: &JobNotification) -> anyhow::Result<()>;
}

/// Short desktop-style notice derived from a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesktopNotice {
    pub title: String,
    pub message: String,
}

impl DesktopNotice {
    /// Notices exist only for start, completion and failure.
    pub fn from_notification(notification: &JobNotification) -> Option<Self> {
        match notification {
            JobNotification::Started { label, .. } => Some(Self {
                title: "Download Started".to_string(),
                message: label.clone(),
            }),
            JobNotification::Completed {
                label, filename, ..
            } => Some(Self {
                title: "Download Complete".to_string(),
                message: filename.clone().unwrap_or_else(|| label.clone()),
            }),
            JobNotification::Failed { label, error, .. } => Some(Self {
                title: "Download Failed".to_string(),
                message: format!("{}: {}", label, error),
            }),
            JobNotification::Progress { .. } | JobNotification::Cancelled { .. } => None,
        }
    }
}

/// Passive notification surface that hands [`DesktopNotice`]s to a display function.
pub struct NoticeObserver<F> {
    display: F,
}

impl<F> NoticeObserver<F>
where
    F: Fn(DesktopNotice) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(display: F) -> Self {
        Self { display }
    }
}

impl<F> Observer for NoticeObserver<F>
where
    F: Fn(DesktopNotice) -> anyhow::Result<()> + Send + Sync,
{
    fn on_notification(&self, notification: &JobNotification) -> anyhow::Result<()> {
        match DesktopNotice::from_notification(notification) {
            Some(notice) => (self.display)(notice),
            None => Ok(()),
        }
    }
}

/// Notice surface that writes notices to the log.
pub fn log_notices() -> NoticeObserver<impl Fn(DesktopNotice) -> anyhow::Result<()> + Send + Sync> {
    NoticeObserver::new(|notice: DesktopNotice| {
        tracing::info!("{}: {}", notice.title, notice.message);
        Ok(())
    })
}

/// Fan-out point for job notifications.
///
/// Combines a tokio broadcast channel (for async consumers such as a UI task)
/// with a list of synchronous [`Observer`]s. Cloning shares both.
pub struct EventSink {
    tx: broadcast::Sender<JobNotification>,
    observers: Arc<RwLock<Vec<Arc<dyn Observer>>>>,
}

impl EventSink {
    /// Create a sink with a broadcast buffer of 256 notifications
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe to all future notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.tx.subscribe()
    }

    pub fn register(&self, observer: Arc<dyn Observer>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver a notification to every subscriber and observer.
    pub fn notify(&self, notification: JobNotification) {
        tracing::debug!(
            "Notify {:?} for job {}",
            notification.kind(),
            notification.job_id()
        );

        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for observer in &observers {
            if let Err(e) = observer.on_notification(&notification) {
                tracing::warn!(
                    "Observer failed for job {}: {:#}",
                    notification.job_id(),
                    e
                );
            }
        }

        // No subscribers is fine
        let _ = self.tx.send(notification);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventSink {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            observers: Arc::clone(&self.observers),
        }
    }
}
