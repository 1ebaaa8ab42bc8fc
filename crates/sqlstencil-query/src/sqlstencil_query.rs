//! sqlstencil query - variables and streaming execution for SQL templates
//!
//! This crate sits between the template engine and a query backend:
//! it discovers the variables a template uses, keeps the stored variable
//! list in step, resolves values into a render context and streams the
//! executed result back.

mod error;
pub mod stream;
pub mod variables;

pub use error::{ExecutionError, ExecutionResult, StreamError};
pub use stream::{
    ClientOptions, ExecutionBackend, ExecutionReport, ExecutionRequest, ExecutionState, HttpBackend,
    QueryDefinition, StreamUpdate, StreamingClient,
};
pub use variables::{
    Criteria, ReconcileChange, Resolution, ResolvedVariable, VariableResolver, reconcile,
    reconcile_detailed, scan, scan_missing,
};
