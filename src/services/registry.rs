// Job registry - tracks active download jobs and turns worker events into notifications
//
// A job is active from registration until its terminal event, cancellation or
// a disconnect. Events for inactive ids are dropped; retired ids never come back.

use crate::events::JobNotification;
use crate::models::{JobEventKind, JobId, ProgressSnapshot};
use std::collections::HashMap;
use std::time::Instant;

/// Non-terminal phase of an active job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Registered, no worker event yet
    Started,

    /// At least one progress event received
    Downloading,
}

/// Bookkeeping for one active job
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub label: String,
    pub phase: JobPhase,
    pub started_at: Instant,
    pub last_progress: Option<ProgressSnapshot>,
}

/// Active jobs keyed by id.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `job_id` as active.
    ///
    /// Ids must be unique. A duplicate registration leaves the existing entry
    /// untouched and returns false.
    pub fn register(&mut self, job_id: JobId, label: impl Into<String>) -> bool {
        if self.jobs.contains_key(&job_id) {
            tracing::warn!("Job {} is already registered", job_id);
            return false;
        }

        self.jobs.insert(
            job_id,
            JobEntry {
                label: label.into(),
                phase: JobPhase::Started,
                started_at: Instant::now(),
                last_progress: None,
            },
        );
        true
    }

    /// Apply a worker event to an active job.
    ///
    /// Returns the notification to deliver, or `None` when the job is not
    /// active and the event is dropped. Terminal events retire the job.
    pub fn route(&mut self, job_id: &JobId, event: JobEventKind) -> Option<JobNotification> {
        let Some(entry) = self.jobs.get_mut(job_id) else {
            tracing::debug!("Dropping event for inactive job {}", job_id);
            return None;
        };

        match event {
            JobEventKind::Progress(progress) => {
                entry.phase = JobPhase::Downloading;
                entry.last_progress = Some(progress.clone());
                Some(JobNotification::Progress {
                    job_id: job_id.clone(),
                    label: entry.label.clone(),
                    progress,
                })
            }
            JobEventKind::Complete { filename } => {
                let entry = self.jobs.remove(job_id)?;
                tracing::info!(
                    "Job {} completed in {:.1}s",
                    job_id,
                    entry.started_at.elapsed().as_secs_f64()
                );
                Some(JobNotification::Completed {
                    job_id: job_id.clone(),
                    label: entry.label,
                    filename,
                })
            }
            JobEventKind::Error { message } => {
                let entry = self.jobs.remove(job_id)?;
                tracing::warn!("Job {} failed: {}", job_id, message);
                Some(JobNotification::Failed {
                    job_id: job_id.clone(),
                    label: entry.label,
                    error: message,
                })
            }
        }
    }

    /// Retire a job without a worker event. Returns its entry if it was active.
    pub fn retire(&mut self, job_id: &JobId) -> Option<JobEntry> {
        self.jobs.remove(job_id)
    }

    /// Retire every active job, producing one failure notification each.
    pub fn fail_all(&mut self, reason: &str) -> Vec<JobNotification> {
        self.jobs
            .drain()
            .map(|(job_id, entry)| JobNotification::Failed {
                job_id,
                label: entry.label,
                error: reason.to_string(),
            })
            .collect()
    }

    pub fn is_active(&self, job_id: &JobId) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn get(&self, job_id: &JobId) -> Option<&JobEntry> {
        self.jobs.get(job_id)
    }

    pub fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
