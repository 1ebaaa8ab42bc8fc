//! Variable value resolution
//!
//! Turns a [`Variable`] definition plus the incoming criteria into a typed
//! [`ResolvedValue`] and the template context entry that exposes it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use regex::Regex;
use serde_json::Value as Json;
use sqlstencil_core::{FilterType, MissingVariable, ValidationWarning, ValueShape, Variable, VariableType};
use sqlstencil_templates::dates::apply_relative_offset;
use sqlstencil_templates::filters::range_bounds;
use sqlstencil_templates::{ResolvedValue, SqlRenderer, TemplateContext, TemplateValue};

/// Incoming criteria: variable name to user-supplied JSON value
pub type Criteria = BTreeMap<String, Json>;

/// One variable after resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVariable {
    pub name: String,
    pub value: ResolvedValue,
    /// Ready-to-splice SQL for bare interpolation
    pub literal: String,
    pub empty_value: Option<String>,
    pub warning: Option<ValidationWarning>,
}

impl ResolvedVariable {
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn to_template_value(&self) -> TemplateValue {
        TemplateValue::new(self.name.clone(), self.value.clone())
            .with_literal(self.literal.clone())
            .with_empty_value(self.empty_value.clone())
    }
}

/// Everything an execution needs from a variable list
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub context: TemplateContext,
    /// Resolved values keyed by name, sent alongside the query
    pub criteria: Criteria,
    pub missing: Vec<MissingVariable>,
    pub warnings: Vec<ValidationWarning>,
}

impl Resolution {
    pub fn is_ready(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Resolves variable definitions against incoming criteria
#[derive(Clone)]
pub struct VariableResolver {
    renderer: Arc<SqlRenderer>,
    today: NaiveDate,
}

impl VariableResolver {
    pub fn new(renderer: Arc<SqlRenderer>) -> Self {
        Self {
            renderer,
            today: Local::now().date_naive(),
        }
    }

    /// Pin the date used for `today`, `now` and `yesterday`
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn renderer(&self) -> &SqlRenderer {
        &self.renderer
    }

    /// Resolve one variable.
    ///
    /// Criteria win over `value`, which wins over `defaultValue`. A criteria
    /// entry that is `null` or an empty string counts as absent.
    pub fn resolve(&self, variable: &Variable, criteria: &Criteria) -> ResolvedVariable {
        let incoming = criteria.get(&variable.name).filter(|v| !is_blank(v));

        let value = if variable.filter_type == FilterType::Switch {
            self.resolve_switch(variable, incoming)
        } else {
            match variable.shape() {
                ValueShape::Range => self.resolve_range(variable, incoming),
                ValueShape::Multi => self.resolve_multi(variable, incoming),
                ValueShape::Single => self.resolve_single(variable, incoming),
            }
        };

        let warning = self.check_pattern(variable, &value);
        let literal = value.literal();
        ResolvedVariable {
            name: variable.name.clone(),
            value,
            literal,
            empty_value: variable.empty_value.clone(),
            warning,
        }
    }

    /// Resolve a whole variable list into a render context, the criteria
    /// payload and the validation outcome.
    pub fn resolve_all(&self, variables: &[Variable], criteria: &Criteria) -> Resolution {
        let mut resolution = Resolution {
            context: TemplateContext::with_date_globals(self.today),
            ..Resolution::default()
        };

        for variable in variables {
            let resolved = self.resolve(variable, criteria);

            if is_missing(variable, &resolved, criteria) {
                resolution.missing.push(MissingVariable::from_variable(variable));
            }
            if let Some(warning) = resolved.warning.clone() {
                tracing::warn!(variable = %warning.name, message = %warning.message, "variable validation warning");
                resolution.warnings.push(warning);
            }

            resolution
                .criteria
                .insert(resolved.name.clone(), resolved.value.to_json());
            resolution.context.insert(resolved.to_template_value());
        }

        tracing::debug!(
            variables = variables.len(),
            missing = resolution.missing.len(),
            warnings = resolution.warnings.len(),
            "variables resolved"
        );
        resolution
    }

    /// Expand a raw value: template re-expansion with the date globals, then
    /// relative date offsets such as `20240110-7d`.
    pub fn evaluate(&self, raw: &str) -> String {
        let expanded = if SqlRenderer::is_template(raw) {
            let context = TemplateContext::with_date_globals(self.today);
            match self.renderer.try_render(raw, &context) {
                Ok(text) => text,
                Err(err) => {
                    tracing::debug!(error = %err, "value expansion failed, keeping raw text");
                    raw.to_string()
                }
            }
        } else {
            raw.to_string()
        };

        apply_relative_offset(&expanded).unwrap_or(expanded)
    }

    fn resolve_switch(&self, variable: &Variable, incoming: Option<&Json>) -> ResolvedValue {
        let on = match incoming {
            Some(value) => is_switch_on(value),
            None => variable
                .configured_value()
                .is_some_and(|raw| is_switch_on(&Json::String(raw.to_string()))),
        };
        let chosen = if on {
            &variable.switch_true_value
        } else {
            &variable.switch_false_value
        };
        if chosen.is_empty() {
            ResolvedValue::Empty
        } else {
            ResolvedValue::Single(Json::String(chosen.clone()))
        }
    }

    fn resolve_single(&self, variable: &Variable, incoming: Option<&Json>) -> ResolvedValue {
        let value = match incoming {
            // a list sent for a single-select keeps its first entry
            Some(Json::Array(items)) => items.first().cloned().unwrap_or(Json::Null),
            Some(value) => value.clone(),
            None => match variable.configured_value() {
                Some(raw) => Json::String(raw.to_string()),
                None => return ResolvedValue::Empty,
            },
        };

        match self.evaluate_item(variable, value) {
            Some(value) => ResolvedValue::Single(value),
            None => ResolvedValue::Empty,
        }
    }

    fn resolve_multi(&self, variable: &Variable, incoming: Option<&Json>) -> ResolvedValue {
        let items = match incoming {
            Some(value) => list_items(value),
            None => match variable.configured_value() {
                Some(raw) => list_items(&Json::String(raw.to_string())),
                None => return ResolvedValue::Empty,
            },
        };

        ResolvedValue::Multi(
            items
                .into_iter()
                .filter_map(|item| self.evaluate_item(variable, item))
                .collect(),
        )
    }

    /// Range sources in priority order: explicit JSON (criteria or `value`),
    /// JSON `defaultValue`, then `betweenStart`/`betweenEnd`. Anything that
    /// does not parse into a non-empty range falls through silently.
    fn resolve_range(&self, variable: &Variable, incoming: Option<&Json>) -> ResolvedValue {
        let explicit = match incoming {
            Some(value) => parse_range(value),
            None => parse_range(&Json::String(variable.value.clone())),
        };

        let (start, end) = explicit
            .or_else(|| parse_range(&Json::String(variable.default_value.clone())))
            .unwrap_or_else(|| {
                let side = |raw: &String| (!raw.is_empty()).then(|| Json::String(raw.clone()));
                (side(&variable.between_start), side(&variable.between_end))
            });

        let start = start.and_then(|v| self.evaluate_item(variable, v));
        let end = end.and_then(|v| self.evaluate_item(variable, v));
        if start.is_none() && end.is_none() {
            ResolvedValue::Empty
        } else {
            ResolvedValue::Range { start, end }
        }
    }

    /// Evaluate one scalar: strings are expanded and, for number variables,
    /// parsed. Empty results become `None`.
    fn evaluate_item(&self, variable: &Variable, value: Json) -> Option<Json> {
        match value {
            Json::Null => None,
            Json::String(raw) => {
                let text = self.evaluate(&raw);
                if text.is_empty() {
                    return None;
                }
                if variable.variable_type == VariableType::Number {
                    Some(parse_number(&text).unwrap_or(Json::String(text)))
                } else {
                    Some(Json::String(text))
                }
            }
            other => Some(other),
        }
    }

    fn check_pattern(&self, variable: &Variable, value: &ResolvedValue) -> Option<ValidationWarning> {
        if variable.variable_type != VariableType::Text {
            return None;
        }
        let pattern = variable.regex_pattern.as_deref().filter(|p| !p.is_empty())?;
        let ResolvedValue::Single(Json::String(text)) = value else {
            return None;
        };

        let message = match Regex::new(pattern) {
            Ok(regex) if regex.is_match(text) => return None,
            Ok(_) => variable
                .regex_error_message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("value does not match pattern {}", pattern)),
            Err(err) => format!("invalid pattern {}: {}", pattern, err),
        };

        Some(ValidationWarning {
            name: variable.name.clone(),
            message,
        })
    }
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new(Arc::new(SqlRenderer::with_standard_filters()))
    }
}

/// A switch is reported missing whenever the criteria do not carry it
/// (blank entries count as absent); anything else is missing when required
/// and empty.
pub(crate) fn is_missing(variable: &Variable, resolved: &ResolvedVariable, criteria: &Criteria) -> bool {
    if variable.filter_type == FilterType::Switch {
        return criteria.get(&variable.name).is_none_or(is_blank);
    }
    variable.required && resolved.is_empty()
}

fn is_blank(value: &Json) -> bool {
    match value {
        Json::Null => true,
        Json::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn is_switch_on(value: &Json) -> bool {
    match value {
        Json::Bool(on) => *on,
        Json::Number(n) => n.as_f64() == Some(1.0),
        Json::String(s) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}

fn parse_number(text: &str) -> Option<Json> {
    let text = text.trim();
    if let Ok(int) = text.parse::<i64>() {
        return Some(Json::from(int));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Json::Number)
}

/// Items of a multi-select value.
///
/// JSON arrays are taken as-is; a JSON-encoded array string is decoded; any
/// other string is split on commas; a bare scalar becomes a single item.
fn list_items(value: &Json) -> Vec<Json> {
    match value {
        Json::Null => Vec::new(),
        Json::Array(items) => items.clone(),
        Json::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.starts_with('[') {
                if let Ok(Json::Array(items)) = serde_json::from_str::<Json>(trimmed) {
                    return items;
                }
            }
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Json::String(item.to_string()))
                .collect()
        }
        other => vec![other.clone()],
    }
}

/// A non-empty `(start, end)` pair from an object, a two-element array, or a
/// string holding either as JSON.
fn parse_range(value: &Json) -> Option<(Option<Json>, Option<Json>)> {
    let parsed;
    let value = match value {
        Json::String(raw) => {
            parsed = serde_json::from_str::<Json>(raw.trim()).ok()?;
            &parsed
        }
        other => other,
    };

    match range_bounds(value) {
        (None, None) => None,
        bounds => Some(bounds),
    }
}
