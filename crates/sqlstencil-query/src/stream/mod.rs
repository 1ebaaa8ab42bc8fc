//! Streaming query execution
//!
//! This module submits a rendered query to a backend and consumes the
//! batch-framed response incrementally, with cooperative cancellation.

mod backend;
mod client;
pub mod frames;

pub use backend::{ByteStream, ExecutionBackend, ExecutionRequest, FrameSource, HttpBackend, STREAM_PATH};
pub use client::{
    ClientOptions, ExecutionReport, ExecutionState, QueryDefinition, StreamUpdate, StreamingClient,
};
pub use frames::{ARROW_STREAM_CONTENT_TYPE, Frame, FrameDecoder, FrameEncoding};
