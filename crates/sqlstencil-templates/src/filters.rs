//! SQL fragment filters
//!
//! Filters are plain functions over JSON values collected into an immutable
//! [`FilterTable`]. The table is handed to each renderer, so renders never
//! share mutable registration state.

use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

use crate::dates;

/// Placeholder inside an empty-value template replaced by the target field
pub const FIELD_PLACEHOLDER: &str = "{field}";

/// Arguments of a single filter invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCall {
    /// The piped value (unwrapped from a variable or filter input)
    pub value: Json,
    /// Field name carried by a filter input wrapper
    pub bound_field: Option<String>,
    /// Empty-value template carried by a filter input wrapper
    pub bound_empty: Option<String>,
    /// Positional filter arguments
    pub args: Vec<Json>,
    /// Keyword filter arguments
    pub kwargs: BTreeMap<String, Json>,
}

impl FilterCall {
    pub fn new(value: Json) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.bound_field = Some(field.into());
        self
    }

    pub fn with_empty(mut self, template: impl Into<String>) -> Self {
        self.bound_empty = Some(template.into());
        self
    }

    pub fn with_arg(mut self, arg: Json) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Json) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Target field: `field=` keyword, then first positional string, then
    /// the field bound by the wrapper.
    pub fn field_name(&self) -> &str {
        self.kwargs
            .get("field")
            .and_then(Json::as_str)
            .or_else(|| self.args.first().and_then(Json::as_str))
            .or(self.bound_field.as_deref())
            .unwrap_or_default()
    }

    fn empty_template(&self) -> Option<&str> {
        self.kwargs
            .get("empty")
            .and_then(Json::as_str)
            .or(self.bound_empty.as_deref())
    }

    /// The fragment emitted in place of a predicate whose value is empty
    pub fn empty_fallback(&self) -> String {
        match self.empty_template() {
            Some(template) => template.replace(FIELD_PLACEHOLDER, self.field_name()),
            None => String::new(),
        }
    }

    fn end_offset(&self) -> Option<&Json> {
        self.kwargs
            .get("end_offset")
            .or_else(|| self.args.get(1))
            .filter(|v| !v.is_null())
    }
}

/// Signature shared by every SQL filter
pub type FilterFn = fn(&FilterCall) -> Json;

/// Immutable table of named filters
#[derive(Debug, Clone, Default)]
pub struct FilterTable {
    filters: BTreeMap<String, FilterFn>,
}

impl FilterTable {
    /// A table without any filters
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard SQL filter set
    pub fn standard() -> Self {
        Self::empty()
            .with_filter("eq", eq)
            .with_filter("ne", ne)
            .with_filter("gt", gt)
            .with_filter("lt", lt)
            .with_filter("gte", gte)
            .with_filter("ge", gte)
            .with_filter("lte", lte)
            .with_filter("le", lte)
            .with_filter("like", like)
            .with_filter("between", between)
            .with_filter("sql", sql)
            .with_filter("quote", quote)
            .with_filter("begin", begin)
            .with_filter("start", begin)
            .with_filter("end", end)
            .with_filter("finish", end)
            .with_filter("add_days", add_days)
    }

    /// Return a new table with `filter` registered under `name`
    pub fn with_filter(mut self, name: impl Into<String>, filter: FilterFn) -> Self {
        self.filters.insert(name.into(), filter);
        self
    }

    pub fn get(&self, name: &str) -> Option<FilterFn> {
        self.filters.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FilterFn)> {
        self.filters.iter().map(|(name, f)| (name.as_str(), *f))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Quote a string for SQL, doubling embedded single quotes
pub fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Whether a value counts as absent for predicate generation
pub fn is_empty_value(value: &Json) -> bool {
    match value {
        Json::Null => true,
        Json::String(s) => s.is_empty(),
        Json::Array(items) => items.is_empty(),
        Json::Object(_) => {
            let (start, end) = range_bounds(value);
            start.is_none() && end.is_none()
        }
        Json::Bool(_) | Json::Number(_) => false,
    }
}

/// Type-aware SQL literal
pub fn sql_literal(value: &Json) -> String {
    match value {
        Json::Null => "NULL".to_string(),
        Json::String(s) if s.is_empty() => "NULL".to_string(),
        Json::String(s) => quote_str(s),
        Json::Number(n) => n.to_string(),
        Json::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Json::Array(items) => format!(
            "({})",
            items.iter().map(sql_literal).collect::<Vec<_>>().join(", ")
        ),
        Json::Object(_) => quote_str(&value.to_string()),
    }
}

/// Comma-joined list: strings quoted, numbers bare
pub fn quoted_list(items: &[Json]) -> String {
    items
        .iter()
        .map(|item| match item {
            Json::Number(n) => n.to_string(),
            other => quote_str(&scalar_text(other)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn scalar_text(value: &Json) -> String {
    match value {
        Json::Null => String::new(),
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn bound(map: &Map<String, Json>, keys: [&str; 2]) -> Option<Json> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|v| !is_empty_value(v))
        .cloned()
}

/// Extract `(start, end)` from a range-shaped value.
///
/// Objects use `start`/`begin` and `end`/`finish`; two-element arrays are
/// accepted positionally. Empty sides are reported as `None`.
pub fn range_bounds(value: &Json) -> (Option<Json>, Option<Json>) {
    match value {
        Json::Object(map) => (bound(map, ["start", "begin"]), bound(map, ["end", "finish"])),
        Json::Array(items) if items.len() == 2 => {
            let side = |v: &Json| (!is_empty_value(v)).then(|| v.clone());
            (side(&items[0]), side(&items[1]))
        }
        _ => (None, None),
    }
}

fn fragment(text: String) -> Json {
    Json::String(text)
}

fn membership(call: &FilterCall, scalar_op: &str, list_op: &str) -> Json {
    if is_empty_value(&call.value) {
        return fragment(call.empty_fallback());
    }
    let field = call.field_name();
    match &call.value {
        Json::Array(items) => fragment(format!(
            "{} {} ({})",
            field,
            list_op,
            items.iter().map(sql_literal).collect::<Vec<_>>().join(", ")
        )),
        value => fragment(format!("{} {} {}", field, scalar_op, sql_literal(value))),
    }
}

fn comparison(call: &FilterCall, op: &str) -> Json {
    if is_empty_value(&call.value) {
        return fragment(call.empty_fallback());
    }
    fragment(format!("{} {} {}", call.field_name(), op, sql_literal(&call.value)))
}

/// `field = v` / `field IN (...)`
pub fn eq(call: &FilterCall) -> Json {
    membership(call, "=", "IN")
}

/// `field <> v` / `field NOT IN (...)`
pub fn ne(call: &FilterCall) -> Json {
    membership(call, "<>", "NOT IN")
}

pub fn gt(call: &FilterCall) -> Json {
    comparison(call, ">")
}

pub fn lt(call: &FilterCall) -> Json {
    comparison(call, "<")
}

pub fn gte(call: &FilterCall) -> Json {
    comparison(call, ">=")
}

pub fn lte(call: &FilterCall) -> Json {
    comparison(call, "<=")
}

/// `field LIKE '%v%'`; arrays become an OR group
pub fn like(call: &FilterCall) -> Json {
    if is_empty_value(&call.value) {
        return fragment(call.empty_fallback());
    }
    let field = call.field_name();
    let pattern = |v: &Json| format!("{} LIKE {}", field, quote_str(&format!("%{}%", scalar_text(v))));
    match &call.value {
        Json::Array(items) => fragment(format!(
            "({})",
            items.iter().map(pattern).collect::<Vec<_>>().join(" OR ")
        )),
        value => fragment(pattern(value)),
    }
}

fn shift_end(end: &Json, offset: &Json) -> Json {
    let offset_num = match offset {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(offset_num) = offset_num else {
        return end.clone();
    };

    match end {
        Json::Number(n) => add_numbers(n.as_i64(), n.as_f64(), offset_num),
        Json::String(s) => {
            if let Some(shifted) = dates::add_days(s, offset_num as i64) {
                Json::String(shifted)
            } else if let Ok(parsed) = s.trim().parse::<f64>() {
                add_numbers(s.trim().parse::<i64>().ok(), Some(parsed), offset_num)
            } else {
                end.clone()
            }
        }
        _ => end.clone(),
    }
}

fn add_numbers(as_int: Option<i64>, as_float: Option<f64>, offset: f64) -> Json {
    if let Some(i) = as_int.filter(|_| offset.fract() == 0.0) {
        if let Some(sum) = i.checked_add(offset as i64) {
            return Json::from(sum);
        }
    }
    as_float
        .map(|f| serde_json::Number::from_f64(f + offset).map(Json::Number).unwrap_or(Json::Null))
        .unwrap_or(Json::Null)
}

/// Range predicate; with `end_offset` the end bound becomes exclusive
pub fn between(call: &FilterCall) -> Json {
    let (start, end) = range_bounds(&call.value);
    if start.is_none() && end.is_none() {
        return fragment(call.empty_fallback());
    }
    let field = call.field_name();

    if let Some(offset) = call.end_offset() {
        let end = end.map(|e| shift_end(&e, offset));
        return fragment(match (start, end) {
            (Some(s), Some(e)) => format!("{}>={} AND {}<{}", field, sql_literal(&s), field, sql_literal(&e)),
            (Some(s), None) => format!("{}>={}", field, sql_literal(&s)),
            (None, Some(e)) => format!("{}<{}", field, sql_literal(&e)),
            (None, None) => unreachable!("checked above"),
        });
    }

    fragment(match (start, end) {
        (Some(s), Some(e)) => format!("{} BETWEEN {} AND {}", field, sql_literal(&s), sql_literal(&e)),
        (Some(s), None) => format!("{} >= {}", field, sql_literal(&s)),
        (None, Some(e)) => format!("{} <= {}", field, sql_literal(&e)),
        (None, None) => unreachable!("checked above"),
    })
}

/// Type-aware literal (see [`sql_literal`])
pub fn sql(call: &FilterCall) -> Json {
    fragment(sql_literal(&call.value))
}

/// Force single-quote wrapping
pub fn quote(call: &FilterCall) -> Json {
    match &call.value {
        Json::Array(items) => fragment(quoted_list(items)),
        value => fragment(quote_str(&scalar_text(value))),
    }
}

/// Start component of a range value
pub fn begin(call: &FilterCall) -> Json {
    range_bounds(&call.value).0.unwrap_or(Json::Null)
}

/// End component of a range value
pub fn end(call: &FilterCall) -> Json {
    range_bounds(&call.value).1.unwrap_or(Json::Null)
}

/// Shift an 8-digit date by the given number of days; other input passes through
pub fn add_days(call: &FilterCall) -> Json {
    let days = call
        .args
        .first()
        .or_else(|| call.kwargs.get("days"))
        .and_then(|d| match d {
            Json::Number(n) => n.as_i64(),
            Json::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0);

    let text = match &call.value {
        Json::Number(n) => n.to_string(),
        Json::String(s) => s.clone(),
        other => return other.clone(),
    };
    dates::add_days(&text, days)
        .map(Json::String)
        .unwrap_or_else(|| call.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn text(value: Json) -> String {
        value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
    }

    #[test]
    fn test_quote_str() {
        assert_eq!(quote_str("hello"), "'hello'");
        assert_eq!(quote_str("it's"), "'it''s'");
    }

    #[test]
    fn test_sql_literal_types() {
        assert_eq!(text(sql(&FilterCall::new(json!(null)))), "NULL");
        assert_eq!(text(sql(&FilterCall::new(json!("")))), "NULL");
        assert_eq!(text(sql(&FilterCall::new(json!(42)))), "42");
        assert_eq!(text(sql(&FilterCall::new(json!("abc")))), "'abc'");
        assert_eq!(text(sql(&FilterCall::new(json!(["a", "b"])))), "('a', 'b')");
        assert_eq!(text(sql(&FilterCall::new(json!(true)))), "1");
        assert_eq!(text(sql(&FilterCall::new(json!(false)))), "0");
    }

    #[test]
    fn test_eq_scalar_and_list() {
        let call = FilterCall::new(json!("eu")).with_field("region");
        assert_eq!(text(eq(&call)), "region = 'eu'");

        let call = FilterCall::new(json!(7)).with_field("id");
        assert_eq!(text(eq(&call)), "id = 7");

        let call = FilterCall::new(json!(["eu", 3])).with_field("region");
        assert_eq!(text(eq(&call)), "region IN ('eu', 3)");

        let call = FilterCall::new(json!(["eu", "us"])).with_field("region");
        assert_eq!(text(ne(&call)), "region NOT IN ('eu', 'us')");
        let call = FilterCall::new(json!("eu")).with_field("region");
        assert_eq!(text(ne(&call)), "region <> 'eu'");
    }

    #[test]
    fn test_eq_empty_array_emits_fallback() {
        let call = FilterCall::new(json!([])).with_field("region");
        assert_eq!(text(eq(&call)), "");

        let call = FilterCall::new(json!([]))
            .with_field("region")
            .with_empty("{field} IS NOT NULL");
        assert_eq!(text(eq(&call)), "region IS NOT NULL");
    }

    #[test]
    fn test_field_name_precedence() {
        let call = FilterCall::new(json!(1))
            .with_field("bound")
            .with_arg(json!("positional"));
        assert_eq!(call.field_name(), "positional");

        let call = call.with_kwarg("field", json!("keyword"));
        assert_eq!(call.field_name(), "keyword");
    }

    #[test]
    fn test_empty_keyword_overrides_bound_empty() {
        let call = FilterCall::new(json!(null))
            .with_field("x")
            .with_empty("1=1")
            .with_kwarg("empty", json!("{field} IS NULL"));
        assert_eq!(text(gt(&call)), "x IS NULL");
    }

    #[test]
    fn test_ordering_filters() {
        let call = FilterCall::new(json!(10)).with_field("qty");
        assert_eq!(text(gt(&call)), "qty > 10");
        assert_eq!(text(lt(&call)), "qty < 10");
        assert_eq!(text(gte(&call)), "qty >= 10");
        assert_eq!(text(lte(&call)), "qty <= 10");
        assert_eq!(text(gt(&FilterCall::new(json!("")).with_field("qty"))), "");
    }

    #[test]
    fn test_like() {
        let call = FilterCall::new(json!("o'b")).with_field("name");
        assert_eq!(text(like(&call)), "name LIKE '%o''b%'");

        let call = FilterCall::new(json!(["a", "b"])).with_field("name");
        assert_eq!(text(like(&call)), "(name LIKE '%a%' OR name LIKE '%b%')");
    }

    #[test]
    fn test_between_with_date_end_offset() {
        let call = FilterCall::new(json!({"start": "20240101", "end": "20240105"}))
            .with_field("field")
            .with_kwarg("end_offset", json!(1));
        assert_eq!(text(between(&call)), "field>='20240101' AND field<'20240106'");
    }

    #[test]
    fn test_between_numeric_offset_and_plain() {
        let call = FilterCall::new(json!({"begin": 1, "finish": 9}))
            .with_field("n")
            .with_kwarg("end_offset", json!(1));
        assert_eq!(text(between(&call)), "n>=1 AND n<10");

        let call = FilterCall::new(json!({"start": 1, "end": 9})).with_field("n");
        assert_eq!(text(between(&call)), "n BETWEEN 1 AND 9");

        let call = FilterCall::new(json!({"start": "20240101", "end": ""})).with_field("d");
        assert_eq!(text(between(&call)), "d >= '20240101'");
    }

    #[test]
    fn test_between_offset_past_integer_limit() {
        let call = FilterCall::new(json!({"start": 1, "end": i64::MAX}))
            .with_field("n")
            .with_kwarg("end_offset", json!(1));
        let rendered = text(between(&call));

        assert!(rendered.starts_with("n>=1 AND n<"), "{rendered}");
        assert!(!rendered.contains('-'), "{rendered}");
    }

    #[test]
    fn test_between_empty_uses_fallback() {
        let call = FilterCall::new(json!({"start": null, "end": ""}))
            .with_field("d")
            .with_empty("1=1");
        assert_eq!(text(between(&call)), "1=1");
    }

    #[test]
    fn test_quote() {
        assert_eq!(text(quote(&FilterCall::new(json!(42)))), "'42'");
        assert_eq!(text(quote(&FilterCall::new(json!(null)))), "''");
        assert_eq!(text(quote(&FilterCall::new(json!(["a", 1])))), "'a', 1");
    }

    #[test]
    fn test_range_extractors() {
        let range = json!({"begin": "20240101", "end": "20240131"});
        assert_eq!(begin(&FilterCall::new(range.clone())), json!("20240101"));
        assert_eq!(end(&FilterCall::new(range)), json!("20240131"));
        assert_eq!(begin(&FilterCall::new(json!("scalar"))), Json::Null);
    }

    #[test]
    fn test_add_days_filter() {
        let call = FilterCall::new(json!("20240228")).with_arg(json!(2));
        assert_eq!(add_days(&call), json!("20240301"));

        let call = FilterCall::new(json!(20240101)).with_arg(json!(-1));
        assert_eq!(add_days(&call), json!("20231231"));

        let call = FilterCall::new(json!("soon")).with_arg(json!(1));
        assert_eq!(add_days(&call), json!("soon"));
    }

    #[test]
    fn test_standard_table_aliases() {
        let table = FilterTable::standard();
        for name in ["eq", "ne", "ge", "le", "start", "finish", "add_days"] {
            assert!(table.contains(name), "missing filter {name}");
        }
        let custom = FilterTable::empty().with_filter("eq", eq);
        assert_eq!(custom.len(), 1);
    }
}
