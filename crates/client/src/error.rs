//! Client error types

use std::time::Duration;

use thiserror::Error;

use comfyrun_domain::{DomainError, ExecutionFailure, FileDescriptor, PromptId};

/// Failure of a single HTTP call to the ComfyUI API
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure (connect, reset, timeout)
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be built or a local file could not be read
    #[error("client error: {0}")]
    Client(String),
}

impl ApiError {
    /// Whether retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::InvalidUrl(_) | Self::Client(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if e.is_builder() {
            Self::Client(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Download failure for one file descriptor
#[derive(Debug, Error)]
#[error("failed to fetch {descriptor} after {attempts} attempt(s): {reason}")]
pub struct FetchError {
    pub descriptor: FileDescriptor,
    pub attempts: u32,
    pub reason: String,
}

/// Errors that end a job or a session
#[derive(Debug, Error)]
pub enum ComfyError {
    /// `/prompt` refused or failed
    #[error("submission rejected: {0}")]
    Submission(String),

    #[error("could not open event stream: {0}")]
    ConnectionFailed(String),

    #[error("event stream lost: {0}")]
    ConnectionLost(String),

    #[error("prompt {prompt_id} did not finish within {timeout:?}")]
    ExecutionTimeout {
        prompt_id: PromptId,
        timeout: Duration,
    },

    #[error("prompt {prompt_id} failed on the server: {failure}")]
    RemoteExecution {
        prompt_id: PromptId,
        failure: ExecutionFailure,
    },

    #[error("prompt {0} was interrupted")]
    Interrupted(PromptId),

    #[error("prompt {0} is already pending on this session")]
    DuplicateJob(PromptId),

    #[error("no history recorded for prompt {0}")]
    SnapshotUnavailable(PromptId),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Workflow(#[from] DomainError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
