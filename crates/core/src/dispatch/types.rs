//! Dispatch data types and wire DTOs.

use serde::{Deserialize, Serialize};

use crate::item::ConversionOptions;

use super::error::DispatchError;

/// A job accepted by the backend.
///
/// Usually references exactly one item; a batch accepted under a single
/// collective job id references every submitted item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchedJob {
    /// Opaque job identifier assigned by the server.
    pub job_id: String,
    /// Ids of the items this job covers.
    pub item_ids: Vec<String>,
}

impl DispatchedJob {
    /// A job covering a single item.
    pub fn single(job_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            item_ids: vec![item_id.into()],
        }
    }
}

/// Per-item result of a dispatch call.
///
/// Rejections are isolated to their item; the rest of the batch proceeds.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The request was accepted and a job id assigned.
    Accepted(DispatchedJob),
    /// The request for this item failed.
    Rejected {
        item_id: String,
        error: DispatchError,
    },
}

impl DispatchOutcome {
    /// The accepted job, if any.
    pub fn job(&self) -> Option<&DispatchedJob> {
        match self {
            Self::Accepted(job) => Some(job),
            Self::Rejected { .. } => None,
        }
    }
}

/// JSON body for per-item URL conversions.
#[derive(Debug, Serialize)]
pub struct UrlConversionRequest<'a> {
    pub url: &'a str,
    pub name: &'a str,
    pub options: &'a ConversionOptions,
}

/// One entry of the `items` JSON field in a batch request.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BatchUrlItem {
    pub url: String,
    pub name: String,
    pub options: ConversionOptions,
}

// Wire shapes returned by the conversion endpoints.

/// Success envelope: `{"success": true, "job_id": ...}` for single
/// requests, `{"success": true, "jobs": [{"job_id": ...}, ...]}` for
/// batches (the legacy collective shape uses `job_id` there too).
#[derive(Debug, Deserialize)]
pub(crate) struct SuccessEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub jobs: Option<Vec<JobRef>>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobRef {
    pub job_id: String,
}

/// Error body: either `{"error": {"message", "code", ...}}` or a flat
/// `{"message", "code"}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(default)]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorEnvelope {
    /// Collapse both documented error shapes into (code, message).
    pub fn into_parts(self) -> (Option<String>, Option<String>) {
        match self.error {
            Some(body) => (body.code, body.message),
            None => (self.code, self.message),
        }
    }
}
