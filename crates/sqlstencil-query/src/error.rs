//! Execution errors

use std::time::Duration;

use sqlstencil_core::StencilError;
use thiserror::Error;

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors surfaced to callers of the streaming client
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("An execution is already running")]
    AlreadyRunning,

    #[error("Missing required variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("Template failed to render: {0}")]
    Render(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Execution failed: {0}")]
    Failed(String),
}

/// Failures while opening or consuming a result stream
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No response from backend within {0:?}")]
    Timeout(Duration),

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Backend error: {0}")]
    Remote(String),

    #[error("Arrow decode failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid batch: {0}")]
    Batch(#[from] StencilError),
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
