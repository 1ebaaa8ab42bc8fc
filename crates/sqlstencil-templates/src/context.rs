//! Dual-mode template values
//!
//! A variable may appear bare (`{{ REGION }}`), needing ready-to-splice SQL,
//! or called and piped into a comparison filter (`{{ REGION('r.code') | eq }}`),
//! needing the raw value plus a target field. [`TemplateValue`] serves both
//! through two explicit accessors and is exposed to MiniJinja as an object
//! that renders as its literal and is callable to produce a [`FilterInput`].

use chrono::{Days, NaiveDate};
use minijinja::value::{Enumerator, Object, ObjectRepr};
use minijinja::{Error, ErrorKind, State, Value};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::dates::format_compact_date;
use crate::filters::{is_empty_value, quoted_list, sql_literal};

/// A resolved variable value; exactly one shape is active
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    /// No value could be resolved
    Empty,
    /// A scalar (string, number or boolean)
    Single(Json),
    /// A `{start, end}` pair; either side may be absent
    Range {
        start: Option<Json>,
        end: Option<Json>,
    },
    /// A multi-select list
    Multi(Vec<Json>),
}

impl ResolvedValue {
    pub fn is_empty(&self) -> bool {
        match self {
            ResolvedValue::Empty => true,
            ResolvedValue::Single(value) => is_empty_value(value),
            ResolvedValue::Range { start, end } => start.is_none() && end.is_none(),
            ResolvedValue::Multi(items) => items.is_empty(),
        }
    }

    /// JSON form used for filter input and the criteria payload
    pub fn to_json(&self) -> Json {
        match self {
            ResolvedValue::Empty => Json::Null,
            ResolvedValue::Single(value) => value.clone(),
            ResolvedValue::Range { start, end } => serde_json::json!({
                "start": start.clone().unwrap_or(Json::Null),
                "end": end.clone().unwrap_or(Json::Null),
            }),
            ResolvedValue::Multi(items) => Json::Array(items.clone()),
        }
    }

    /// Ready-to-splice SQL text for bare interpolation.
    ///
    /// Scalars are spliced verbatim, lists become a quoted comma list and
    /// ranges become `start AND end` literals.
    pub fn literal(&self) -> String {
        match self {
            ResolvedValue::Empty => String::new(),
            ResolvedValue::Single(Json::String(s)) => s.clone(),
            ResolvedValue::Single(Json::Null) => String::new(),
            ResolvedValue::Single(value) => value.to_string(),
            ResolvedValue::Multi(items) => quoted_list(items),
            ResolvedValue::Range { start, end } => match (start, end) {
                (Some(s), Some(e)) => format!("{} AND {}", sql_literal(s), sql_literal(e)),
                (Some(side), None) | (None, Some(side)) => sql_literal(side),
                (None, None) => String::new(),
            },
        }
    }
}

/// Filter-ready wrapper: raw value, target field and empty-value template
#[derive(Debug, Clone, PartialEq)]
pub struct FilterInput {
    pub value: Json,
    pub field_name: String,
    pub empty_value: Option<String>,
}

/// A variable as seen by templates
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateValue {
    name: String,
    value: ResolvedValue,
    literal: String,
    empty_value: Option<String>,
}

impl TemplateValue {
    pub fn new(name: impl Into<String>, value: ResolvedValue) -> Self {
        let literal = value.literal();
        Self {
            name: name.into(),
            value,
            literal,
            empty_value: None,
        }
    }

    /// Override the pre-rendered literal (switch variables splice SQL fragments)
    pub fn with_literal(mut self, literal: impl Into<String>) -> Self {
        self.literal = literal.into();
        self
    }

    pub fn with_empty_value(mut self, empty_value: Option<String>) -> Self {
        self.empty_value = empty_value;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ResolvedValue {
        &self.value
    }

    pub fn as_literal(&self) -> &str {
        &self.literal
    }

    /// Wrap for filter consumption; the field defaults to the variable name
    pub fn as_filter_input(&self, field_name: Option<&str>) -> FilterInput {
        FilterInput {
            value: self.value.to_json(),
            field_name: field_name.unwrap_or(&self.name).to_string(),
            empty_value: self.empty_value.clone(),
        }
    }
}

impl Object for TemplateValue {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let json = self.value.to_json();
        match key.as_str()? {
            "value" => Some(json_to_value(&json)),
            "literal" => Some(Value::from(self.literal.clone())),
            "name" => Some(Value::from(self.name.clone())),
            "start" | "begin" => json.get("start").map(json_to_value),
            "end" | "finish" => json.get("end").map(json_to_value),
            _ => None,
        }
    }

    fn is_true(self: &Arc<Self>) -> bool {
        !self.value.is_empty()
    }

    fn call(self: &Arc<Self>, _state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        let mut field = None;
        let mut empty = None;
        for arg in args {
            if arg.is_kwargs() {
                let value = arg.get_attr("empty")?;
                if let Some(template) = value.as_str() {
                    empty = Some(template.to_string());
                }
            } else if field.is_none() {
                field = Some(arg.as_str().map(str::to_string).ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        format!("{}() expects a field name string", self.name),
                    )
                })?);
            }
        }

        let mut input = self.as_filter_input(field.as_deref());
        if empty.is_some() {
            input.empty_value = empty;
        }
        Ok(Value::from_object(input))
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

impl Object for FilterInput {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "value" => Some(json_to_value(&self.value)),
            "fieldName" => Some(Value::from(self.field_name.clone())),
            "emptyValue" => Some(
                self.empty_value
                    .clone()
                    .map(Value::from)
                    .unwrap_or(Value::from(())),
            ),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["value", "fieldName", "emptyValue"])
    }

    fn is_true(self: &Arc<Self>) -> bool {
        !is_empty_value(&self.value)
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&sql_literal(&self.value))
    }
}

pub(crate) fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::from(()),
        other => Value::from_serialize(other),
    }
}

/// Unwrap a template value into JSON, looking through sqlstencil objects
pub(crate) fn value_to_json(value: &Value) -> Json {
    if value.is_undefined() || value.is_none() {
        return Json::Null;
    }
    if let Some(input) = value.downcast_object_ref::<FilterInput>() {
        return input.value.clone();
    }
    if let Some(variable) = value.downcast_object_ref::<TemplateValue>() {
        return variable.value.to_json();
    }
    serde_json::to_value(value).unwrap_or(Json::Null)
}

/// The variable context for one render
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context pre-populated with `today`, `now` and `yesterday` as
    /// 8-digit dates
    pub fn with_date_globals(today: NaiveDate) -> Self {
        let mut ctx = Self::new();
        let today_text = format_compact_date(today);
        ctx.insert_raw("today", Json::String(today_text.clone()));
        ctx.insert_raw("now", Json::String(today_text));
        if let Some(yesterday) = today.checked_sub_days(Days::new(1)) {
            ctx.insert_raw("yesterday", Json::String(format_compact_date(yesterday)));
        }
        ctx
    }

    /// Insert a variable under its own name
    pub fn insert(&mut self, value: TemplateValue) {
        self.values
            .insert(value.name.clone(), Value::from_object(value));
    }

    /// Insert a plain JSON value
    pub fn insert_raw(&mut self, name: impl Into<String>, value: Json) {
        self.values.insert(name.into(), json_to_value(&value));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Look up a variable inserted with [`TemplateContext::insert`]
    pub fn variable(&self, name: &str) -> Option<&TemplateValue> {
        self.values
            .get(name)
            .and_then(|value| value.downcast_object_ref::<TemplateValue>())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::from_iter(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_per_shape() {
        assert_eq!(ResolvedValue::Empty.literal(), "");
        assert_eq!(ResolvedValue::Single(json!("abc")).literal(), "abc");
        assert_eq!(ResolvedValue::Single(json!(42)).literal(), "42");
        assert_eq!(
            ResolvedValue::Multi(vec![json!("a"), json!(2)]).literal(),
            "'a', 2"
        );
        assert_eq!(
            ResolvedValue::Range {
                start: Some(json!("20240101")),
                end: Some(json!("20240131")),
            }
            .literal(),
            "'20240101' AND '20240131'"
        );
    }

    #[test]
    fn test_emptiness() {
        assert!(ResolvedValue::Empty.is_empty());
        assert!(ResolvedValue::Single(json!("")).is_empty());
        assert!(ResolvedValue::Multi(vec![]).is_empty());
        assert!(ResolvedValue::Range { start: None, end: None }.is_empty());
        assert!(!ResolvedValue::Single(json!(0)).is_empty());
    }

    #[test]
    fn test_filter_input_defaults_field_to_name() {
        let value = TemplateValue::new("REGION", ResolvedValue::Single(json!("eu")))
            .with_empty_value(Some("1=1".into()));

        let input = value.as_filter_input(None);
        assert_eq!(input.field_name, "REGION");
        assert_eq!(input.value, json!("eu"));
        assert_eq!(input.empty_value.as_deref(), Some("1=1"));

        assert_eq!(value.as_filter_input(Some("r.code")).field_name, "r.code");
    }

    #[test]
    fn test_context_lookup() {
        let mut ctx = TemplateContext::with_date_globals(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );
        ctx.insert(TemplateValue::new("X", ResolvedValue::Single(json!(1))));

        assert!(ctx.contains("today"));
        assert!(ctx.contains("yesterday"));
        assert_eq!(ctx.variable("X").unwrap().as_literal(), "1");
        assert!(ctx.variable("today").is_none());
    }
}
