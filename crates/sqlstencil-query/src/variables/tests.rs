//! Tests for variable scanning, reconciliation and resolution

use super::*;
use chrono::NaiveDate;
use serde_json::json;
use sqlstencil_core::{FilterType, Variable, VariableType};
use sqlstencil_templates::ResolvedValue;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn resolver() -> VariableResolver {
    VariableResolver::default().with_today(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap())
}

fn criteria(pairs: &[(&str, serde_json::Value)]) -> Criteria {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

mod scan_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scan_expression_bases() {
        let sql = "SELECT * FROM t WHERE {{ REGION('r.code') | eq }} AND d > {{ PERIOD.start }} AND x = {{ LIMIT }}";
        assert_eq!(scan(sql), names(&["REGION", "PERIOD", "LIMIT"]));
    }

    #[test]
    fn test_scan_first_occurrence_order_and_dedup() {
        let sql = "{{ B }} {{ A }} {{ B | sql }} {{- A -}}";
        assert_eq!(scan(sql), names(&["B", "A"]));
    }

    #[test]
    fn test_scan_control_tags() {
        let sql = "{% if SHOW_ALL and not HIDE %}1{% elif MODE == 'x' %}2{% endif %}";
        assert_eq!(scan(sql), names(&["SHOW_ALL", "HIDE", "MODE"]));
    }

    #[test]
    fn test_scan_skips_reserved_words_and_strings() {
        let sql = "{% if FLAG is defined and FLAG != 'ELSEWHERE' and true %}{{ loop }}{% endif %}";
        assert_eq!(scan(sql), names(&["FLAG"]));
    }

    #[test]
    fn test_scan_skips_attributes_and_filter_names() {
        let sql = "{% if ITEMS | length > 0 and CFG.enabled %}x{% endif %}";
        assert_eq!(scan(sql), names(&["ITEMS", "CFG"]));
    }

    #[test]
    fn test_scan_skips_keyword_arguments_and_tests() {
        let sql = [
            "{% if PERIOD | between('d', end_offset=1) %}x{% endif %}",
            "{% set y = R('c', empty='1=1') %}",
            "{% if N is number and M is not none and K == 1 %}z{% endif %}",
        ]
        .join("\n");
        assert_eq!(scan(&sql), names(&["PERIOD", "R", "N", "M", "K"]));
    }

    #[test]
    fn test_scan_ignores_comments() {
        let sql = "{# {{ HIDDEN }} #}SELECT {{ SHOWN }}";
        assert_eq!(scan(sql), names(&["SHOWN"]));
    }

    #[test]
    fn test_scan_excludes_loop_and_set_targets() {
        let sql = "{% for item in ITEMS %}{{ item }}{% endfor %}{% set total = BASE + 1 %}{{ total }}";
        assert_eq!(scan(sql), names(&["ITEMS", "BASE"]));
    }

    #[test]
    fn test_scan_excludes_date_globals() {
        assert_eq!(scan("{{ today }} {{ yesterday | add_days(1) }} {{ D }}"), names(&["D"]));
    }

    #[test]
    fn test_scan_plain_sql() {
        assert!(scan("SELECT 1").is_empty());
        assert!(scan("{{ 'literal' }} {{ 42 }}").is_empty());
    }
}

mod reconcile_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reconcile_adds_new_names() {
        let result = reconcile_detailed(&names(&["A", "B"]), &[]);

        assert_eq!(result.change, ReconcileChange::Added(names(&["A", "B"])));
        assert_eq!(result.variables.len(), 2);
        assert_eq!(result.variables[0].name, "A");
        assert_eq!(result.variables[0].label, "A");
        assert_eq!(result.variables[1].name, "B");
    }

    #[test]
    fn test_reconcile_single_swap_is_rename() {
        let old = Variable::new("OLD").with_value("42").with_required(true);
        let id = old.id;

        let template = "SELECT {{ NEW }}";
        let result = reconcile_detailed(&scan(template), &[old]);

        assert_eq!(
            result.change,
            ReconcileChange::Renamed {
                from: "OLD".into(),
                to: "NEW".into()
            }
        );
        assert_eq!(result.variables.len(), 1);
        let renamed = &result.variables[0];
        assert_eq!(renamed.id, id);
        assert_eq!(renamed.name, "NEW");
        assert_eq!(renamed.label, "NEW");
        assert_eq!(renamed.value, "42");
        assert!(renamed.required);
    }

    #[test]
    fn test_rename_unaffected_by_filter_keywords() {
        let old = Variable::new("OLD");
        let template = "{% if NEW | between('d', end_offset=1) %}1{% endif %}";
        let result = reconcile_detailed(&scan(template), &[old]);

        assert_eq!(
            result.change,
            ReconcileChange::Renamed {
                from: "OLD".into(),
                to: "NEW".into()
            }
        );
        assert_eq!(result.variables.len(), 1);
    }

    #[test]
    fn test_rename_keeps_custom_label() {
        let old = Variable::new("OLD").with_label("Region");
        let result = reconcile(&names(&["NEW"]), &[old]);

        assert_eq!(result[0].name, "NEW");
        assert_eq!(result[0].label, "Region");
    }

    #[test]
    fn test_reconcile_never_removes() {
        let existing = vec![Variable::new("A"), Variable::new("B")];
        let result = reconcile_detailed(&names(&["A"]), &existing);

        assert_eq!(result.change, ReconcileChange::Unchanged);
        assert_eq!(result.variables.len(), 2);
    }

    #[test]
    fn test_two_new_names_with_one_stale_appends() {
        let existing = vec![Variable::new("OLD")];
        let result = reconcile_detailed(&names(&["X", "Y"]), &existing);

        assert_eq!(result.change, ReconcileChange::Added(names(&["X", "Y"])));
        let list: Vec<&str> = result.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(list, vec!["OLD", "X", "Y"]);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let template = "{{ A }} {% if B %}{{ C('c') | eq }}{% endif %}";
        let existing = vec![Variable::new("A").with_value("1"), Variable::new("STALE")];
        let scanned = scan(template);

        let once = reconcile(&scanned, &existing);
        let twice = reconcile(&scanned, &once);
        assert_eq!(twice, once);
    }
}

mod resolve_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_precedence_criteria_value_default() {
        let variable = Variable::new("X").with_value("v").with_default_value("d");
        let r = resolver();

        let from_criteria = r.resolve(&variable, &criteria(&[("X", json!("c"))]));
        assert_eq!(from_criteria.value, ResolvedValue::Single(json!("c")));

        let from_value = r.resolve(&variable, &Criteria::new());
        assert_eq!(from_value.value, ResolvedValue::Single(json!("v")));

        let from_default = r.resolve(&Variable::new("X").with_default_value("d"), &Criteria::new());
        assert_eq!(from_default.value, ResolvedValue::Single(json!("d")));

        let blank = r.resolve(&variable, &criteria(&[("X", json!(""))]));
        assert_eq!(blank.value, ResolvedValue::Single(json!("v")));
    }

    #[test]
    fn test_value_evaluation_expands_date_globals_and_offsets() {
        let r = resolver();
        assert_eq!(r.evaluate("{{ today }}"), "20240110");
        assert_eq!(r.evaluate("{{ yesterday }}"), "20240109");
        assert_eq!(r.evaluate("{{ today }}-7d"), "20240103");
        assert_eq!(r.evaluate("20240131+1m"), "20240229");
        assert_eq!(r.evaluate("plain"), "plain");
    }

    #[test]
    fn test_number_coercion() {
        let r = resolver();
        let variable = Variable::new("N").with_type(VariableType::Number);

        let int = r.resolve(&variable, &criteria(&[("N", json!("42"))]));
        assert_eq!(int.value, ResolvedValue::Single(json!(42)));
        assert_eq!(int.literal, "42");

        let float = r.resolve(&variable, &criteria(&[("N", json!("1.5"))]));
        assert_eq!(float.value, ResolvedValue::Single(json!(1.5)));

        let bad = r.resolve(&variable, &criteria(&[("N", json!("abc"))]));
        assert_eq!(bad.value, ResolvedValue::Single(json!("abc")));
    }

    #[test]
    fn test_switch_selects_configured_fragment() {
        let r = resolver();
        let variable = Variable::new("ACTIVE")
            .with_filter_type(FilterType::Switch)
            .with_switch("status = 'A'", "1=1");

        for on in [json!(true), json!("true"), json!(1), json!("1")] {
            let resolved = r.resolve(&variable, &criteria(&[("ACTIVE", on)]));
            assert_eq!(resolved.literal, "status = 'A'");
        }
        for off in [json!(false), json!("no"), json!(0)] {
            let resolved = r.resolve(&variable, &criteria(&[("ACTIVE", off)]));
            assert_eq!(resolved.literal, "1=1");
        }
    }

    #[test]
    fn test_between_priority_chain() {
        let r = resolver();
        let variable = Variable::new("P")
            .with_filter_type(FilterType::Between)
            .with_default_value(r#"{"start":"20230101","end":"20230131"}"#)
            .with_between("{{ yesterday }}", "{{ today }}");

        let explicit = r.resolve(&variable, &criteria(&[("P", json!({"start": "20240101", "end": "20240105"}))]));
        assert_eq!(
            explicit.value,
            ResolvedValue::Range {
                start: Some(json!("20240101")),
                end: Some(json!("20240105")),
            }
        );

        let default = r.resolve(&variable, &Criteria::new());
        assert_eq!(
            default.value,
            ResolvedValue::Range {
                start: Some(json!("20230101")),
                end: Some(json!("20230131")),
            }
        );

        let fallback = r.resolve(&variable.clone().with_default_value("{not json"), &Criteria::new());
        assert_eq!(
            fallback.value,
            ResolvedValue::Range {
                start: Some(json!("20240109")),
                end: Some(json!("20240110")),
            }
        );
    }

    #[test]
    fn test_between_renders_with_end_offset() {
        let r = resolver();
        let variable = Variable::new("P").with_filter_type(FilterType::Between);
        let resolution = r.resolve_all(
            &[variable],
            &criteria(&[("P", json!({"start": "20240101", "end": "20240105"}))]),
        );

        let out = r
            .renderer()
            .render("WHERE {{ P('dt') | between(end_offset=1) }}", &resolution.context);
        assert_eq!(out.sql, "WHERE dt>='20240101' AND dt<'20240106'");
    }

    #[test]
    fn test_multi_select_shapes() {
        let r = resolver();
        let variable = Variable::new("R")
            .with_filter_type(FilterType::Dropdown)
            .with_multi_select(true);

        let array = r.resolve(&variable, &criteria(&[("R", json!(["eu", "us"]))]));
        assert_eq!(array.value, ResolvedValue::Multi(vec![json!("eu"), json!("us")]));
        assert_eq!(array.literal, "'eu', 'us'");

        let scalar = r.resolve(&variable, &criteria(&[("R", json!("eu"))]));
        assert_eq!(scalar.value, ResolvedValue::Multi(vec![json!("eu")]));

        let encoded = r.resolve(&variable.clone().with_default_value(r#"["a","b"]"#), &Criteria::new());
        assert_eq!(encoded.value, ResolvedValue::Multi(vec![json!("a"), json!("b")]));

        let empty = r.resolve(&variable, &criteria(&[("R", json!([]))]));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_empty_multi_select_uses_empty_value() {
        let r = resolver();
        let variable = Variable::new("R")
            .with_filter_type(FilterType::Dropdown)
            .with_multi_select(true)
            .with_empty_value("{field} IS NOT NULL");
        let resolution = r.resolve_all(&[variable], &criteria(&[("R", json!([]))]));

        let out = r.renderer().render("WHERE {{ R('r.code') | eq }}", &resolution.context);
        assert_eq!(out.sql, "WHERE r.code IS NOT NULL");
    }

    #[test]
    fn test_regex_mismatch_is_a_warning() {
        let r = resolver();
        let variable = Variable::new("CODE")
            .with_regex("^[A-Z]{3}$", Some("three capitals".into()))
            .with_required(true);

        let resolution = r.resolve_all(&[variable.clone()], &criteria(&[("CODE", json!("abcd"))]));
        assert!(resolution.is_ready());
        assert_eq!(resolution.warnings.len(), 1);
        assert_eq!(resolution.warnings[0].message, "three capitals");

        let ok = r.resolve_all(&[variable], &criteria(&[("CODE", json!("ABC"))]));
        assert!(ok.warnings.is_empty());
    }

    #[test]
    fn test_resolve_all_builds_criteria_payload() {
        let r = resolver();
        let variables = vec![
            Variable::new("A").with_value("1").with_type(VariableType::Number),
            Variable::new("P").with_filter_type(FilterType::Between).with_between("20240101", ""),
        ];
        let resolution = r.resolve_all(&variables, &Criteria::new());

        assert_eq!(resolution.criteria["A"], json!(1));
        assert_eq!(resolution.criteria["P"], json!({"start": "20240101", "end": null}));
        assert!(resolution.context.contains("today"));
        assert_eq!(resolution.context.variable("A").unwrap().as_literal(), "1");
    }
}

mod missing_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_required_empty_is_missing() {
        let variables = vec![
            Variable::new("A").with_required(true),
            Variable::new("B").with_required(true).with_default_value("x"),
            Variable::new("C"),
        ];
        let missing = scan_missing("{{ A }} {{ B }} {{ C }}", &variables, &Criteria::new());

        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "A");
        assert!(missing[0].required);
    }

    #[test]
    fn test_switch_absent_from_criteria_always_missing() {
        let variable = Variable::new("FLAG")
            .with_filter_type(FilterType::Switch)
            .with_switch("Y", "N")
            .with_required(false);

        let missing = scan_missing("{{ FLAG }}", &[variable.clone()], &Criteria::new());
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "FLAG");
        assert!(!missing[0].required);

        let present = scan_missing("{{ FLAG }}", &[variable], &criteria(&[("FLAG", json!(false))]));
        assert!(present.is_empty());
    }

    #[test]
    fn test_blank_switch_criteria_counts_as_absent() {
        let variable = Variable::new("FLAG")
            .with_filter_type(FilterType::Switch)
            .with_switch("Y", "N");

        for blank in [json!(null), json!(""), json!("  ")] {
            let missing = scan_missing("{{ FLAG }}", &[variable.clone()], &criteria(&[("FLAG", blank)]));
            assert_eq!(missing.len(), 1);
        }
    }

    #[test]
    fn test_unreferenced_variables_never_block() {
        let variables = vec![Variable::new("STALE").with_required(true)];
        assert!(scan_missing("SELECT 1", &variables, &Criteria::new()).is_empty());
    }
}
