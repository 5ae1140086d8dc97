// Bridge metrics
//
// Lightweight counters for calls, jobs and channel lifecycle

use crate::events::{JobNotification, NotificationKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters collected by an [`Orchestrator`](crate::services::Orchestrator).
///
/// Uses atomic operations so any clone of the orchestrator can record without
/// taking the state lock. Logged on shutdown for diagnostics.
#[derive(Debug)]
pub struct Metrics {
    /// Calls written to the channel
    pub calls_sent: AtomicU64,

    /// Responses matched to a pending call
    pub calls_resolved: AtomicU64,

    /// Calls that ended in any error (including timeouts)
    pub calls_failed: AtomicU64,

    pub calls_timed_out: AtomicU64,

    pub jobs_started: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_cancelled: AtomicU64,

    /// Progress notifications delivered
    pub progress_events: AtomicU64,

    /// Inbound messages with no live call or job to go to
    pub events_dropped: AtomicU64,

    pub connects: AtomicU64,
    pub connect_failures: AtomicU64,
    pub disconnects: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            calls_sent: AtomicU64::new(0),
            calls_resolved: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            calls_timed_out: AtomicU64::new(0),
            jobs_started: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            progress_events: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_call_sent(&self) {
        self.calls_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_resolved(&self) {
        self.calls_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_failed(&self) {
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A timeout also counts as a failed call
    pub fn record_call_timed_out(&self) {
        self.calls_timed_out.fetch_add(1, Ordering::Relaxed);
        self.record_call_failed();
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connected(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a job notification by kind
    pub fn record_notification(&self, notification: &JobNotification) {
        let counter = match notification.kind() {
            NotificationKind::Started => &self.jobs_started,
            NotificationKind::Progress => &self.progress_events,
            NotificationKind::Completed => &self.jobs_completed,
            NotificationKind::Failed => &self.jobs_failed,
            NotificationKind::Cancelled => &self.jobs_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Jobs that reached any terminal state
    pub fn jobs_finished(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
            + self.jobs_failed.load(Ordering::Relaxed)
            + self.jobs_cancelled.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Bridge Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Calls: {} sent, {} resolved, {} failed ({} timed out)",
            self.calls_sent.load(Ordering::Relaxed),
            self.calls_resolved.load(Ordering::Relaxed),
            self.calls_failed.load(Ordering::Relaxed),
            self.calls_timed_out.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Jobs: {} started, {} completed, {} failed, {} cancelled, {} progress events",
            self.jobs_started.load(Ordering::Relaxed),
            self.jobs_completed.load(Ordering::Relaxed),
            self.jobs_failed.load(Ordering::Relaxed),
            self.jobs_cancelled.load(Ordering::Relaxed),
            self.progress_events.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Channel: {} connects, {} connect failures, {} disconnects, {} dropped messages",
            self.connects.load(Ordering::Relaxed),
            self.connect_failures.load(Ordering::Relaxed),
            self.disconnects.load(Ordering::Relaxed),
            self.events_dropped.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobId;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.calls_sent.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.jobs_finished(), 0);
    }

    #[test]
    fn test_timeout_counts_as_failure() {
        let metrics = Metrics::new();
        metrics.record_call_sent();
        metrics.record_call_timed_out();

        assert_eq!(metrics.calls_timed_out.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.calls_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_record_notification_by_kind() {
        let metrics = Metrics::new();
        let job_id = JobId::from("J1");

        metrics.record_notification(&JobNotification::Started {
            job_id: job_id.clone(),
            label: "Video".into(),
        });
        metrics.record_notification(&JobNotification::Cancelled {
            job_id: job_id.clone(),
            label: "Video".into(),
        });
        metrics.record_notification(&JobNotification::Failed {
            job_id,
            label: "Video".into(),
            error: "connection lost".into(),
        });

        assert_eq!(metrics.jobs_started.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.jobs_finished(), 2);
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime().as_millis() >= 10);
    }
}
