//! Types for the conversion orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Item validation failed; nothing was dispatched.
    #[error("validation error: {0}")]
    Validation(#[from] crate::item::ValidationError),

    /// The dispatch call failed as a whole.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    /// The real-time channel failed.
    #[error("channel error: {0}")]
    Channel(#[from] crate::tracker::ChannelError),

    /// `start_conversion` was called while a run is still active.
    #[error("a conversion is already running")]
    AlreadyRunning,

    /// `trigger_download` was called with an empty result store.
    #[error("no result available to download")]
    NoResult,
}

/// Overall status of the current conversion run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// No conversion running.
    Ready,
    /// Items are being validated and dispatched.
    Converting,
    /// Dispatch succeeded; jobs are running server-side.
    Processing,
    /// Every job reached a terminal state.
    Completed,
    /// The run could not begin.
    Error,
    /// The run was cancelled.
    Cancelled,
}

/// Read-only projection of the conversion run, published via `watch`.
///
/// Per-item failures do not flip `status` to `Error`; they show up in
/// `error_count` while the batch keeps going.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AggregateState {
    pub status: OverallStatus,
    /// Mean progress across all jobs of the run (0-100).
    pub progress_percent: f32,
    /// Fatal error, set only when the run could not begin.
    pub error: Option<String>,
    /// Jobs that completed successfully.
    pub completed_count: usize,
    /// Jobs that failed (including artifact retrieval failures).
    pub error_count: usize,
    /// Jobs accepted at dispatch time.
    pub total_jobs: usize,
}

impl Default for AggregateState {
    fn default() -> Self {
        Self {
            status: OverallStatus::Ready,
            progress_percent: 0.0,
            error: None,
            completed_count: 0,
            error_count: 0,
            total_jobs: 0,
        }
    }
}

impl AggregateState {
    /// Whether every accepted job reached a terminal state.
    pub fn all_jobs_finished(&self) -> bool {
        self.total_jobs > 0 && self.completed_count + self.error_count >= self.total_jobs
    }
}
