//! Pre-execution validation

use std::collections::HashSet;

use sqlstencil_core::{MissingVariable, Variable};

use super::resolver::{Criteria, VariableResolver, is_missing};
use super::scanner::scan;

/// Required variables the template references but that cannot be resolved.
///
/// Only variables the template actually mentions are considered, so stale
/// entries kept around by reconciliation never block execution. Switch
/// variables absent from `criteria` are always reported.
pub fn scan_missing(template: &str, variables: &[Variable], criteria: &Criteria) -> Vec<MissingVariable> {
    VariableResolver::default().scan_missing(template, variables, criteria)
}

impl VariableResolver {
    /// See [`scan_missing`]
    pub fn scan_missing(
        &self,
        template: &str,
        variables: &[Variable],
        criteria: &Criteria,
    ) -> Vec<MissingVariable> {
        let referenced: HashSet<String> = scan(template).into_iter().collect();

        variables
            .iter()
            .filter(|variable| referenced.contains(&variable.name))
            .filter(|variable| {
                let resolved = self.resolve(variable, criteria);
                is_missing(variable, &resolved, criteria)
            })
            .map(MissingVariable::from_variable)
            .collect()
    }
}
