//! sqlstencil core - shared data model for templated SQL execution
//!
//! This crate defines the types every other sqlstencil crate depends on:
//!
//! - `Variable` - a named, typed, UI-editable template parameter
//! - `Value`, `Batch`, `ResultSet` - streamed result data
//! - `StencilError` - the common error type

mod error;
mod types;
mod variable;

pub use error::*;
pub use types::*;
pub use variable::*;
