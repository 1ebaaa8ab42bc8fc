//! SQL template renderer using MiniJinja

use minijinja::{Environment, Error, UndefinedBehavior, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::context::{FilterInput, TemplateContext, TemplateValue, json_to_value, value_to_json};
use crate::filters::{FilterCall, FilterFn, FilterTable};

/// Prefix of the comment prepended to a template that failed to render
pub const RENDER_ERROR_PREFIX: &str = "-- render error: ";

/// Template errors
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("{0}")]
    Render(#[from] minijinja::Error),
}

/// Result of a fail-soft render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    /// Rendered SQL, or the annotated original template on error
    pub sql: String,
    /// Error message if rendering failed
    pub error: Option<String>,
    /// Referenced names missing from the context
    pub unresolved: Vec<String>,
}

impl RenderOutput {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// SQL template renderer
///
/// Filters come from the injected [`FilterTable`]; the renderer never
/// registers anything globally, so independent renderers can run side by
/// side with different tables.
pub struct SqlRenderer {
    env: Environment<'static>,
    filters: Arc<FilterTable>,
}

impl SqlRenderer {
    /// Create a renderer using the given filter table
    pub fn new(filters: Arc<FilterTable>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);
        env.set_keep_trailing_newline(true);

        for (name, filter) in filters.iter() {
            env.add_filter(name.to_string(), move |value: Value, args: &[Value]| {
                apply_filter(filter, &value, args)
            });
        }

        Self { env, filters }
    }

    /// Create a renderer with the standard SQL filters
    pub fn with_standard_filters() -> Self {
        Self::new(Arc::new(FilterTable::standard()))
    }

    pub fn filters(&self) -> &FilterTable {
        &self.filters
    }

    /// Render a SQL template, propagating any error
    pub fn try_render(&self, template: &str, context: &TemplateContext) -> Result<String, TemplateError> {
        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(context.to_value())?)
    }

    /// Render a SQL template without ever failing.
    ///
    /// On a syntax or evaluation error the original template is returned
    /// unchanged behind a comment carrying the error message.
    pub fn render(&self, template: &str, context: &TemplateContext) -> RenderOutput {
        let unresolved = self.unresolved_variables(template, context);

        match self.try_render(template, context) {
            Ok(sql) => {
                tracing::trace!(unresolved = unresolved.len(), "template rendered");
                RenderOutput {
                    sql,
                    error: None,
                    unresolved,
                }
            }
            Err(err) => {
                let message = error_message(&err);
                tracing::debug!(error = %message, "template render failed");
                RenderOutput {
                    sql: format!("{}{}\n{}", RENDER_ERROR_PREFIX, message, template),
                    error: Some(message),
                    unresolved,
                }
            }
        }
    }

    /// Names the template reads that the context does not provide.
    ///
    /// Empty when the template does not parse.
    pub fn unresolved_variables(&self, template: &str, context: &TemplateContext) -> Vec<String> {
        let Ok(tmpl) = self.env.template_from_str(template) else {
            return Vec::new();
        };
        let mut names: Vec<String> = tmpl
            .undeclared_variables(false)
            .into_iter()
            .filter(|name| !context.contains(name))
            .collect();
        names.sort();
        names
    }

    /// Check if text contains template syntax
    pub fn is_template(text: &str) -> bool {
        text.contains("{{") || text.contains("{%") || text.contains("{#")
    }
}

impl Default for SqlRenderer {
    fn default() -> Self {
        Self::with_standard_filters()
    }
}

fn error_message(err: &TemplateError) -> String {
    err.to_string().replace(['\r', '\n'], " ")
}

/// Bridge a MiniJinja filter invocation to a table filter
fn apply_filter(filter: FilterFn, value: &Value, args: &[Value]) -> Result<Value, Error> {
    let mut call = match value.downcast_object_ref::<FilterInput>() {
        Some(input) => bound_call(input.clone()),
        None => match value.downcast_object_ref::<TemplateValue>() {
            Some(variable) => bound_call(variable.as_filter_input(None)),
            None => FilterCall::new(value_to_json(value)),
        },
    };

    for arg in args {
        if arg.is_kwargs() {
            for key in arg.try_iter()? {
                let Some(name) = key.as_str() else {
                    continue;
                };
                let item = arg.get_item(&key)?;
                call.kwargs.insert(name.to_string(), value_to_json(&item));
            }
        } else {
            call.args.push(value_to_json(arg));
        }
    }

    Ok(json_to_value(&filter(&call)))
}

fn bound_call(input: FilterInput) -> FilterCall {
    FilterCall {
        value: input.value,
        bound_field: Some(input.field_name),
        bound_empty: input.empty_value,
        ..FilterCall::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResolvedValue;
    use chrono::NaiveDate;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context() -> TemplateContext {
        let mut ctx = TemplateContext::with_date_globals(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        ctx.insert(TemplateValue::new("REGION", ResolvedValue::Multi(vec![json!("eu"), json!("us")])));
        ctx.insert(TemplateValue::new("LIMIT", ResolvedValue::Single(json!(10))));
        ctx.insert(TemplateValue::new("NAME", ResolvedValue::Single(json!("o'hara"))));
        ctx.insert(TemplateValue::new("EMPTY", ResolvedValue::Multi(vec![])).with_empty_value(Some("{field} IS NOT NULL".into())));
        ctx.insert(TemplateValue::new(
            "PERIOD",
            ResolvedValue::Range {
                start: Some(json!("20240101")),
                end: Some(json!("20240105")),
            },
        ));
        ctx
    }

    #[test]
    fn test_bare_substitution_uses_literal() {
        let renderer = SqlRenderer::default();
        let out = renderer.render("SELECT * FROM t WHERE r IN ({{ REGION }}) LIMIT {{ LIMIT }}", &context());

        assert!(out.is_ok());
        assert_eq!(out.sql, "SELECT * FROM t WHERE r IN ('eu', 'us') LIMIT 10");
    }

    #[test]
    fn test_called_variable_piped_into_filter() {
        let renderer = SqlRenderer::default();
        let out = renderer.render("WHERE {{ REGION('t.region') | eq }}", &context());
        assert_eq!(out.sql, "WHERE t.region IN ('eu', 'us')");

        let out = renderer.render("WHERE {{ NAME | eq('t.name') }}", &context());
        assert_eq!(out.sql, "WHERE t.name = 'o''hara'");

        let out = renderer.render("WHERE {{ LIMIT | gt }}", &context());
        assert_eq!(out.sql, "WHERE LIMIT > 10");
    }

    #[test]
    fn test_between_with_end_offset_keyword() {
        let renderer = SqlRenderer::default();
        let out = renderer.render("WHERE {{ PERIOD('dt') | between(end_offset=1) }}", &context());
        assert_eq!(out.sql, "WHERE dt>='20240101' AND dt<'20240106'");
    }

    #[test]
    fn test_empty_value_template_substitutes_field() {
        let renderer = SqlRenderer::default();
        let out = renderer.render("WHERE {{ EMPTY('c.id') | eq }}", &context());
        assert_eq!(out.sql, "WHERE c.id IS NOT NULL");

        let out = renderer.render("WHERE 1=1 {{ LIMIT('x', empty='1=1') | ne }}", &context());
        assert_eq!(out.sql, "WHERE 1=1 x <> 10");
    }

    #[test]
    fn test_subpath_and_range_extractors() {
        let renderer = SqlRenderer::default();
        let out = renderer.render("{{ PERIOD.start }}|{{ PERIOD | end | sql }}|{{ PERIOD | begin | add_days(-1) }}", &context());
        assert_eq!(out.sql, "20240101|'20240105'|20231231");
    }

    #[test]
    fn test_control_tags_see_emptiness() {
        let renderer = SqlRenderer::default();
        let template = indoc! {"
            SELECT 1
            {% if EMPTY %}AND a{% endif %}
            {% if REGION %}AND {{ REGION('r') | eq }}{% endif %}
        "};
        let out = renderer.render(template, &context());
        assert_eq!(out.sql, "SELECT 1\n\nAND r IN ('eu', 'us')\n");
    }

    #[test]
    fn test_date_globals() {
        let renderer = SqlRenderer::default();
        let out = renderer.render("{{ today }} {{ yesterday }} {{ today | add_days(7) }}", &context());
        assert_eq!(out.sql, "20240110 20240109 20240117");
    }

    #[test]
    fn test_syntax_error_returns_annotated_original() {
        let renderer = SqlRenderer::default();
        let template = "SELECT * FROM t WHERE {{ REGION | eq(";
        let out = renderer.render(template, &context());

        assert!(!out.is_ok());
        assert!(out.sql.starts_with(RENDER_ERROR_PREFIX));
        assert!(out.sql.ends_with(template));
        assert_eq!(out.sql.lines().count(), 2);
    }

    #[test]
    fn test_unresolved_variables_reported() {
        let renderer = SqlRenderer::default();
        let out = renderer.render("{{ MISSING }} {{ REGION }} {{ OTHER | sql }}", &context());

        assert!(out.is_ok());
        assert_eq!(out.unresolved, vec!["MISSING".to_string(), "OTHER".to_string()]);
        assert_eq!(out.sql, " 'eu', 'us' NULL");
    }

    #[test]
    fn test_injected_table_isolated() {
        fn shout(call: &FilterCall) -> serde_json::Value {
            json!(call.value.as_str().unwrap_or_default().to_uppercase())
        }
        let custom = SqlRenderer::new(Arc::new(FilterTable::empty().with_filter("shout", shout)));
        let standard = SqlRenderer::default();
        let mut ctx = TemplateContext::new();
        ctx.insert_raw("x", json!("hi"));

        assert_eq!(custom.render("{{ x | shout }}", &ctx).sql, "HI");
        assert!(!standard.render("{{ x | shout }}", &ctx).is_ok());
        assert!(!custom.render("{{ x | sql }}", &ctx).is_ok());
    }
}
