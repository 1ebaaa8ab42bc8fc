//! Variable list reconciliation
//!
//! Brings a stored variable list in line with the names a template scan
//! found. Variables are never removed: a name disappearing from the text
//! keeps its configuration. The single exception is a one-for-one swap,
//! which is treated as a rename of the stale variable.

use std::collections::HashSet;

use sqlstencil_core::Variable;

/// What a reconciliation changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileChange {
    Unchanged,
    Renamed { from: String, to: String },
    Added(Vec<String>),
}

/// Reconciled variable list plus the applied change
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub variables: Vec<Variable>,
    pub change: ReconcileChange,
}

/// Reconcile scanned names against the existing variables.
///
/// See [`reconcile_detailed`] for the policy.
pub fn reconcile(scanned: &[String], existing: &[Variable]) -> Vec<Variable> {
    reconcile_detailed(scanned, existing).variables
}

/// Reconcile scanned names against the existing variables, reporting the change.
///
/// - exactly one new name and exactly one stale variable: the stale variable
///   is renamed, keeping its id and settings; its label follows the rename
///   only if it still equals the old name
/// - otherwise every new name is appended as a fresh variable and stale
///   variables are kept
pub fn reconcile_detailed(scanned: &[String], existing: &[Variable]) -> Reconciliation {
    let scanned_set: HashSet<&str> = scanned.iter().map(String::as_str).collect();
    let existing_set: HashSet<&str> = existing.iter().map(|v| v.name.as_str()).collect();

    let mut added: Vec<&str> = Vec::new();
    for name in scanned {
        if !existing_set.contains(name.as_str()) && !added.contains(&name.as_str()) {
            added.push(name);
        }
    }
    let stale: Vec<usize> = existing
        .iter()
        .enumerate()
        .filter(|(_, v)| !scanned_set.contains(v.name.as_str()))
        .map(|(idx, _)| idx)
        .collect();

    let mut variables = existing.to_vec();

    if added.len() == 1 && stale.len() == 1 {
        let variable = &mut variables[stale[0]];
        let from = std::mem::replace(&mut variable.name, added[0].to_string());
        if variable.label == from {
            variable.label = variable.name.clone();
        }
        tracing::debug!(from = %from, to = %variable.name, "variable renamed");
        return Reconciliation {
            change: ReconcileChange::Renamed {
                from,
                to: variable.name.clone(),
            },
            variables,
        };
    }

    if added.is_empty() {
        return Reconciliation {
            variables,
            change: ReconcileChange::Unchanged,
        };
    }

    variables.extend(added.iter().map(|name| Variable::new(*name)));
    tracing::debug!(added = ?added, kept_stale = stale.len(), "variables added");
    Reconciliation {
        variables,
        change: ReconcileChange::Added(added.into_iter().map(str::to_string).collect()),
    }
}
