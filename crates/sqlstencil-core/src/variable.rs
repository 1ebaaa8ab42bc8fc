//! Template variable model
//!
//! Variables are created and edited by the UI layer and persist across
//! renders. Their JSON form is camelCase.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    Text,
    Number,
    Date,
    Select,
}

/// Input widget of a variable; governs the shape of its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Dropdown,
    #[default]
    Input,
    Switch,
    Between,
}

/// The value shape a variable resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Single,
    Range,
    Multi,
}

/// A named, typed, UI-editable template parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Stable identifier, survives renames
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Template context key; unique within a query
    pub name: String,
    /// Display label
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub variable_type: VariableType,
    #[serde(default)]
    pub filter_type: FilterType,
    #[serde(default)]
    pub multi_select: bool,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub default_value: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub between_start: String,
    #[serde(default)]
    pub between_end: String,
    #[serde(default)]
    pub switch_true_value: String,
    #[serde(default)]
    pub switch_false_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_error_message: Option<String>,
    /// Replacement emitted by comparison filters when the value is empty.
    /// `{field}` is substituted with the target field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_value: Option<String>,
    /// Selectable options for dropdowns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Variable {
    /// Create a freshly-initialized text input variable
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            label: name.clone(),
            name,
            variable_type: VariableType::Text,
            filter_type: FilterType::Input,
            multi_select: false,
            value: String::new(),
            default_value: String::new(),
            required: false,
            between_start: String::new(),
            between_end: String::new(),
            switch_true_value: String::new(),
            switch_false_value: String::new(),
            regex_pattern: None,
            regex_error_message: None,
            empty_value: None,
            options: Vec::new(),
        }
    }

    pub fn with_type(mut self, variable_type: VariableType) -> Self {
        self.variable_type = variable_type;
        self
    }

    pub fn with_filter_type(mut self, filter_type: FilterType) -> Self {
        self.filter_type = filter_type;
        self
    }

    pub fn with_multi_select(mut self, multi_select: bool) -> Self {
        self.multi_select = multi_select;
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = value.into();
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_between(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.between_start = start.into();
        self.between_end = end.into();
        self
    }

    pub fn with_switch(mut self, on: impl Into<String>, off: impl Into<String>) -> Self {
        self.switch_true_value = on.into();
        self.switch_false_value = off.into();
        self
    }

    pub fn with_regex(mut self, pattern: impl Into<String>, message: Option<String>) -> Self {
        self.regex_pattern = Some(pattern.into());
        self.regex_error_message = message;
        self
    }

    pub fn with_empty_value(mut self, template: impl Into<String>) -> Self {
        self.empty_value = Some(template.into());
        self
    }

    /// The shape this variable's value takes
    pub fn shape(&self) -> ValueShape {
        match self.filter_type {
            FilterType::Between => ValueShape::Range,
            FilterType::Dropdown if self.multi_select => ValueShape::Multi,
            _ => ValueShape::Single,
        }
    }

    /// Label for display, falling back to the name
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }

    /// The configured raw value: `value` if non-empty, else `defaultValue`
    pub fn configured_value(&self) -> Option<&str> {
        if !self.value.is_empty() {
            Some(&self.value)
        } else if !self.default_value.is_empty() {
            Some(&self.default_value)
        } else {
            None
        }
    }
}

/// A required variable without a resolvable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingVariable {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    pub required: bool,
}

impl MissingVariable {
    pub fn from_variable(variable: &Variable) -> Self {
        Self {
            name: variable.name.clone(),
            label: variable.display_label().to_string(),
            variable_type: variable.variable_type,
            required: variable.required,
        }
    }
}

/// Informational validation message; never blocks execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub name: String,
    pub message: String,
}
