//! Error types for sqlstencil

use thiserror::Error;

/// Core error type for sqlstencil operations
#[derive(Error, Debug)]
pub enum StencilError {
    #[error("Result shape error: {0}")]
    Shape(String),
}

/// Result type alias for sqlstencil core operations
pub type Result<T> = std::result::Result<T, StencilError>;
