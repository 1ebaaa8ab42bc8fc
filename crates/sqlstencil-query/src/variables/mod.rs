//! Template variables: discovery, reconciliation and resolution
//!
//! - [`scan`] finds the names a template references
//! - [`reconcile`] keeps a stored variable list in step with those names
//! - [`VariableResolver`] turns definitions plus criteria into a render context
//! - [`scan_missing`] reports required variables that cannot be resolved
//!
//! # Example
//!
//! ```
//! use sqlstencil_query::variables::{Criteria, VariableResolver, reconcile, scan};
//!
//! let template = "SELECT * FROM orders WHERE {{ REGION('o.region') | eq }}";
//! let variables = reconcile(&scan(template), &[]);
//!
//! let mut criteria = Criteria::new();
//! criteria.insert("REGION".into(), serde_json::json!("eu"));
//!
//! let resolver = VariableResolver::default();
//! let resolution = resolver.resolve_all(&variables, &criteria);
//! let out = resolver.renderer().render(template, &resolution.context);
//! assert_eq!(out.sql, "SELECT * FROM orders WHERE o.region = 'eu'");
//! ```

mod reconciler;
mod resolver;
mod scanner;
mod validation;

pub use reconciler::{ReconcileChange, Reconciliation, reconcile, reconcile_detailed};
pub use resolver::{Criteria, ResolvedVariable, Resolution, VariableResolver};
pub use scanner::scan;
pub use validation::scan_missing;

#[cfg(test)]
mod tests;
