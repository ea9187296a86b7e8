//! Error types for request dispatch.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while dispatching conversion requests.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Transport-level failure (DNS, connect, reset).
    #[error("Network error: {reason}")]
    Network { reason: String },

    /// The request exceeded the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a non-2xx status or a success envelope
    /// that reports failure.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// An accepted response carried no job identifier.
    #[error("Accepted response carried no job id")]
    MissingJobId,

    /// A success-shaped payload did not match the documented contract.
    #[error("Unexpected response shape: {0}")]
    ResponseFormat(String),

    /// The source file vanished or became unreadable between normalization
    /// and dispatch.
    #[error("Cannot read file {path}: {reason}")]
    File { path: PathBuf, reason: String },

    /// The conversion was cancelled while the request was in flight.
    #[error("Dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "NETWORK",
            Self::Timeout => "TIMEOUT",
            Self::Api { .. } => "API_ERROR",
            Self::MissingJobId => "NO_JOB_ID",
            Self::ResponseFormat(_) => "RESPONSE_FORMAT",
            Self::File { .. } => "FILE_UNREADABLE",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether re-dispatching the affected items may succeed.
    ///
    /// Server-side validation rejections (4xx) are final; transport
    /// failures and 5xx responses are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout => true,
            Self::Api { status, .. } => !(400..500).contains(status),
            _ => false,
        }
    }

    /// Map a reqwest error onto the dispatch taxonomy.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Network {
                reason: e.to_string(),
            }
        } else if e.is_decode() {
            Self::ResponseFormat(e.to_string())
        } else {
            Self::Network {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(DispatchError::Timeout.is_retryable());
        assert!(DispatchError::Network {
            reason: "reset".into()
        }
        .is_retryable());
        assert!(DispatchError::Api {
            status: 503,
            code: None,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(!DispatchError::Api {
            status: 422,
            code: Some("BAD_INPUT".into()),
            message: "bad input".into()
        }
        .is_retryable());
        assert!(!DispatchError::MissingJobId.is_retryable());
        assert!(!DispatchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_codes() {
        assert_eq!(DispatchError::MissingJobId.code(), "NO_JOB_ID");
        assert_eq!(DispatchError::Timeout.code(), "TIMEOUT");
    }
}
