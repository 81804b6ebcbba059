use validate_email_html::config::RuleThresholds;
use validate_email_html::{Category, ConfigPatch, Severity, ValidationEngine};

fn nest(levels: usize) -> String {
    (0..levels).fold("content".to_string(), |inner, _| {
        format!("<table><tr><td>{}</td></tr></table>", inner)
    })
}

fn rules_reported(engine: &ValidationEngine, html: &str) -> Vec<String> {
    engine
        .validate(html)
        .unwrap()
        .issues()
        .map(|r| r.rule.clone())
        .collect()
}

#[test]
fn test_builtin_catalogue() {
    let engine = ValidationEngine::default();
    let rules = engine.get_available_rules().unwrap();

    assert_eq!(rules.len(), 26);
    assert!(rules.values().all(|r| !r.custom && !r.description.is_empty()));

    let per_category: usize = Category::ALL
        .into_iter()
        .map(|c| engine.get_rules_by_category(c).unwrap().len())
        .sum();
    assert_eq!(per_category, rules.len());
}

#[test]
fn test_deep_table_nesting_is_flattened() {
    let engine = ValidationEngine::default();
    let html = nest(6);

    let report = engine.validate(&html).unwrap();
    let finding = report
        .warnings
        .iter()
        .find(|r| r.rule == "table-nesting")
        .unwrap();
    assert!(finding.message.contains("6 levels"));

    let outcome = engine.auto_fix_specific_issue(&html, "table-nesting").unwrap();
    assert!(outcome.html.contains("content"));
    assert_eq!(outcome.html.matches("<table>").count(), 4);
    assert!(!rules_reported(&engine, &outcome.html).contains(&"table-nesting".to_string()));
}

#[test]
fn test_nesting_threshold_is_configurable() {
    let mut engine = ValidationEngine::default();
    let html = nest(3);
    assert!(!rules_reported(&engine, &html).contains(&"table-nesting".to_string()));

    engine
        .update_config(ConfigPatch {
            thresholds: Some(RuleThresholds {
                max_table_depth: 2,
                ..RuleThresholds::default()
            }),
            ..ConfigPatch::default()
        })
        .unwrap();
    assert!(rules_reported(&engine, &html).contains(&"table-nesting".to_string()));
}

#[test]
fn test_gmail_clip_threshold() {
    let mut engine = ValidationEngine::default();
    engine
        .update_config(ConfigPatch {
            thresholds: Some(RuleThresholds {
                gmail_clip_bytes: 64,
                ..RuleThresholds::default()
            }),
            ..ConfigPatch::default()
        })
        .unwrap();

    let report = engine.validate(&"<b>text</b>".repeat(10)).unwrap();
    let finding = report.warnings.iter().find(|r| r.rule == "html-size").unwrap();
    assert_eq!(finding.category, Category::Performance);
}

#[test]
fn test_links_need_text() {
    let engine = ValidationEngine::default();
    let reported = rules_reported(&engine, r#"<a href="https://x.test"></a>"#);
    assert!(reported.contains(&"link-text".to_string()));

    let labelled = rules_reported(&engine, r#"<a href="https://x.test">Shop now</a>"#);
    assert!(!labelled.contains(&"link-text".to_string()));
}

#[test]
fn test_client_css_findings() {
    let engine = ValidationEngine::default();

    let report = engine
        .validate(r#"<table><tr><td style="display:flex">x</td></tr></table>"#)
        .unwrap();
    assert!(report.warnings.iter().any(|r| r.rule == "css-compatibility"));

    let report = engine
        .validate(r#"<link rel="stylesheet" href="a.css"><table><tr><td>x</td></tr></table>"#)
        .unwrap();
    let finding = report
        .errors
        .iter()
        .find(|r| r.rule == "external-stylesheets")
        .unwrap();
    assert_eq!(finding.severity, Severity::Error);
    assert_eq!(finding.category, Category::Compatibility);
}

#[test]
fn test_javascript_urls_and_event_handlers() {
    let engine = ValidationEngine::default();
    let html = r#"<a href="javascript:go()" onclick="go()">Go</a>"#;
    let reported = rules_reported(&engine, html);
    assert!(reported.contains(&"javascript-urls".to_string()));
    assert!(reported.contains(&"no-event-handlers".to_string()));

    let outcome = engine.auto_fix(html).unwrap();
    assert!(!outcome.html.contains("javascript:"));
    assert!(!outcome.html.contains("onclick"));
    assert!(outcome.html.contains("Go"));
}
