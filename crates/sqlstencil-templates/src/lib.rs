//! sqlstencil templates - MiniJinja-based SQL templating
//!
//! This crate turns a SQL template plus a variable context into an
//! executable statement.
//!
//! ## Features
//!
//! - **SQL Filters**: `eq`, `ne`, `gt`/`lt`/`gte`/`lte`, `like`, `between`,
//!   `sql`, `quote`, `begin`/`end`, `add_days`
//! - **Dual-mode variables**: `{{ VAR }}` splices a ready literal,
//!   `{{ VAR('col') | eq }}` builds a predicate against a field
//! - **Fail-soft rendering**: errors annotate the original template instead
//!   of discarding it
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlstencil_templates::{ResolvedValue, SqlRenderer, TemplateContext, TemplateValue};
//!
//! let mut ctx = TemplateContext::new();
//! ctx.insert(TemplateValue::new("REGION", ResolvedValue::Multi(vec!["eu".into()])));
//!
//! let renderer = SqlRenderer::default();
//! let out = renderer.render("SELECT * FROM t WHERE {{ REGION('t.region') | eq }}", &ctx);
//! assert_eq!(out.sql, "SELECT * FROM t WHERE t.region IN ('eu')");
//! ```

mod context;
pub mod dates;
mod engine;
pub mod filters;

pub use context::{FilterInput, ResolvedValue, TemplateContext, TemplateValue};
pub use engine::{RENDER_ERROR_PREFIX, RenderOutput, SqlRenderer, TemplateError};
pub use filters::{FilterCall, FilterFn, FilterTable};
