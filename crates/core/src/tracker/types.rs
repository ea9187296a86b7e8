//! Job state machine types and the event reducer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::dispatch::DispatchedJob;

use super::channel::ChannelError;

/// Server-side status of a conversion job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting for a worker.
    Queued,
    /// Being converted.
    Processing,
    /// Output is being produced incrementally.
    Streaming,
    /// Artifact is being staged for download.
    Downloading,
    /// Finished; a download locator is available.
    Completed,
    /// Failed server-side.
    Error,
    /// Cancelled client-side.
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses receive no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// One tracked job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Opaque id assigned by the server.
    pub job_id: String,
    /// Items this job covers (lookup references, not ownership).
    pub item_ids: Vec<String>,
    /// Current status.
    pub status: JobStatus,
    /// 0-100, monotonic non-decreasing while active.
    pub progress_percent: f32,
    /// Last human-readable status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Download locator, populated on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Declared artifact content type, populated on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Job {
    /// A freshly accepted job, not yet started.
    pub fn new(dispatched: &DispatchedJob) -> Self {
        Self {
            job_id: dispatched.job_id.clone(),
            item_ids: dispatched.item_ids.clone(),
            status: JobStatus::Queued,
            progress_percent: 0.0,
            message: None,
            download_url: None,
            content_type: None,
        }
    }
}

/// An inbound event on a job's real-time stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Non-terminal state/message update.
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<JobStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Progress update; regressive values are ignored by the reducer.
    Progress { percent: f32 },
    /// Terminal success, carrying the download locator.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_url: Option<String>,
        /// Documented alternate locator field, inspected when
        /// `download_url` is absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
    /// Terminal failure.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl JobEvent {
    /// Whether this event ends the job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Errors raised while tracking a job.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The completion event carried no recognizable download locator.
    #[error("Completion event carried no download locator")]
    MissingLocator,

    /// The located artifact could not be retrieved.
    #[error("Artifact fetch failed: {0}")]
    Fetch(String),

    /// The underlying channel failed.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Apply one event to a job, producing the next job state.
///
/// Pure function: terminal states absorb every later event, regressive or
/// duplicate progress is dropped, and status events never carry a job into
/// a terminal state (that is what complete/error events are for).
pub fn apply_event(job: &Job, event: &JobEvent) -> Job {
    let mut next = job.clone();
    if job.status.is_terminal() {
        return next;
    }

    match event {
        JobEvent::Status { state, message } => {
            if let Some(state) = state {
                if !state.is_terminal() {
                    next.status = *state;
                }
            }
            if message.is_some() {
                next.message = message.clone();
            }
        }
        JobEvent::Progress { percent } => {
            let percent = percent.clamp(0.0, 100.0);
            if percent > next.progress_percent {
                next.progress_percent = percent;
            }
            if next.status == JobStatus::Queued {
                next.status = JobStatus::Processing;
            }
        }
        JobEvent::Complete {
            download_url,
            result_url,
            content_type,
        } => {
            next.status = JobStatus::Completed;
            next.progress_percent = 100.0;
            next.download_url = download_url.clone().or_else(|| result_url.clone());
            next.content_type = content_type.clone();
        }
        JobEvent::Error { message, .. } => {
            next.status = JobStatus::Error;
            next.message = Some(message.clone());
        }
    }

    next
}

/// Mean progress across all tracked jobs; un-started jobs contribute 0.
pub fn aggregate_progress(jobs: &HashMap<String, Job>) -> f32 {
    if jobs.is_empty() {
        return 0.0;
    }
    let sum: f32 = jobs.values().map(|j| j.progress_percent).sum();
    sum / jobs.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(&DispatchedJob::single("j-1", "i-1"))
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress_percent, 0.0);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let j0 = job();
        let j1 = apply_event(&j0, &JobEvent::Progress { percent: 40.0 });
        assert_eq!(j1.progress_percent, 40.0);

        // Regressive update is ignored
        let j2 = apply_event(&j1, &JobEvent::Progress { percent: 25.0 });
        assert_eq!(j2.progress_percent, 40.0);

        // Duplicate is a no-op
        let j3 = apply_event(&j2, &JobEvent::Progress { percent: 40.0 });
        assert_eq!(j3.progress_percent, 40.0);
    }

    #[test]
    fn test_progress_clamps_out_of_range() {
        let j = apply_event(&job(), &JobEvent::Progress { percent: 180.0 });
        assert_eq!(j.progress_percent, 100.0);
        let j = apply_event(&job(), &JobEvent::Progress { percent: -5.0 });
        assert_eq!(j.progress_percent, 0.0);
    }

    #[test]
    fn test_first_progress_moves_to_processing() {
        let j = apply_event(&job(), &JobEvent::Progress { percent: 1.0 });
        assert_eq!(j.status, JobStatus::Processing);
    }

    #[test]
    fn test_status_event_updates_state_and_message() {
        let j = apply_event(
            &job(),
            &JobEvent::Status {
                state: Some(JobStatus::Streaming),
                message: Some("rendering".to_string()),
            },
        );
        assert_eq!(j.status, JobStatus::Streaming);
        assert_eq!(j.message.as_deref(), Some("rendering"));
    }

    #[test]
    fn test_status_event_cannot_terminate() {
        let j = apply_event(
            &job(),
            &JobEvent::Status {
                state: Some(JobStatus::Completed),
                message: None,
            },
        );
        assert_eq!(j.status, JobStatus::Queued);
    }

    #[test]
    fn test_complete_sets_locator_and_full_progress() {
        let j = apply_event(
            &job(),
            &JobEvent::Complete {
                download_url: Some("/artifacts/j-1".to_string()),
                result_url: None,
                content_type: Some("text/markdown".to_string()),
            },
        );
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.progress_percent, 100.0);
        assert_eq!(j.download_url.as_deref(), Some("/artifacts/j-1"));
    }

    #[test]
    fn test_complete_falls_back_to_result_url() {
        let j = apply_event(
            &job(),
            &JobEvent::Complete {
                download_url: None,
                result_url: Some("/results/j-1".to_string()),
                content_type: None,
            },
        );
        assert_eq!(j.download_url.as_deref(), Some("/results/j-1"));
    }

    #[test]
    fn test_terminal_absorbs_later_events() {
        let done = apply_event(
            &job(),
            &JobEvent::Error {
                message: "boom".to_string(),
                code: None,
            },
        );
        assert_eq!(done.status, JobStatus::Error);

        let after = apply_event(&done, &JobEvent::Progress { percent: 90.0 });
        assert_eq!(after, done);
    }

    #[test]
    fn test_aggregate_progress_mean() {
        let mut jobs = HashMap::new();
        assert_eq!(aggregate_progress(&jobs), 0.0);

        let mut a = job();
        a.job_id = "a".to_string();
        a.progress_percent = 80.0;
        let mut b = job();
        b.job_id = "b".to_string();
        // b not started, contributes 0
        jobs.insert(a.job_id.clone(), a);
        jobs.insert(b.job_id.clone(), b);

        assert_eq!(aggregate_progress(&jobs), 40.0);
    }

    #[test]
    fn test_event_serialization_tags() {
        let event: JobEvent =
            serde_json::from_str(r#"{"type": "progress", "percent": 12.5}"#).unwrap();
        assert_eq!(event, JobEvent::Progress { percent: 12.5 });

        let event: JobEvent = serde_json::from_str(
            r#"{"type": "complete", "download_url": "/a/b", "content_type": "application/zip"}"#,
        )
        .unwrap();
        assert!(event.is_terminal());
    }
}
