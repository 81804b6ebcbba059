use std::sync::Arc;

use validate_email_html::{
    Category, CustomRule, Rule, RuleMeta, Severity, ValidationEngine,
};

use crate::common::test_helpers::{CLEAN_EMAIL, LEGACY_EMAIL, LEGACY_STRUCTURE_RULES};

fn rewrite_rule(
    name: &str,
    fix: impl Fn(&str) -> String + Send + Sync + 'static,
) -> Arc<dyn Rule> {
    Arc::new(
        CustomRule::new(
            RuleMeta::new(name, name, Severity::Warning, Category::BestPractice),
            |_, _, _| Ok(Vec::new()),
        )
        .with_autofix(move |html, _| Ok(fix(html))),
    )
}

#[test]
fn test_fixed_output_is_a_fixed_point() {
    let engine = ValidationEngine::default();

    for html in [LEGACY_EMAIL, "<div><h2>A</h2><p>B</p></div>", r#"<img src="a.png">"#] {
        let once = engine.auto_fix(html).unwrap();
        assert!(once.changed(), "nothing fixed in {}", html);

        let twice = engine.auto_fix(&once.html).unwrap();
        assert_eq!(twice.html, once.html);
        assert!(twice.fixed.is_empty());
    }
}

#[test]
fn test_fixed_legacy_markup_has_no_structure_errors() {
    let engine = ValidationEngine::default();
    let outcome = engine.auto_fix(LEGACY_EMAIL).unwrap();

    assert!(!outcome.html.contains("<script"));
    assert!(outcome.html.contains("Welcome"));
    assert!(outcome.html.contains("Thanks for joining."));

    let report = engine.validate(&outcome.html).unwrap();
    for rule in LEGACY_STRUCTURE_RULES {
        assert!(report.issues().all(|r| r.rule != *rule), "{} still reported", rule);
        assert!(outcome.fixed.iter().any(|f| f == rule));
    }
}

#[test]
fn test_clean_markup_is_untouched() {
    let outcome = ValidationEngine::default().auto_fix(CLEAN_EMAIL).unwrap();
    assert_eq!(outcome.html, CLEAN_EMAIL);
    assert!(!outcome.changed());
}

#[test]
fn test_rewrites_that_break_markup_are_discarded() {
    let mut engine = ValidationEngine::default();
    engine
        .add_rule(rewrite_rule("double-open", |html| html.replacen('<', "<<", 1)))
        .unwrap();
    engine
        .add_rule(rewrite_rule("self-close-slash", |html| html.replacen("/>", "//>", 1)))
        .unwrap();
    engine
        .add_rule(rewrite_rule("stray-close", |html| format!("{}</td>", html)))
        .unwrap();

    let html = r#"<table><tr><td>x<br/></td></tr></table>"#;
    let outcome = engine
        .auto_fix_multiple_issues(html, &["double-open", "self-close-slash", "stray-close"])
        .unwrap();

    assert_eq!(outcome.html, html);
    assert!(outcome.fixed.is_empty());
    assert_eq!(engine.get_stats().unwrap().rewrites_rejected, 3);
}

#[test]
fn test_rewrites_keeping_double_brackets_are_discarded() {
    let mut engine = ValidationEngine::default();
    engine
        .add_rule(rewrite_rule("rename-x", |html| html.replace('x', "y")))
        .unwrap();

    let html = "<span>a << x</span>";
    let outcome = engine.auto_fix_specific_issue(html, "rename-x").unwrap();
    assert_eq!(outcome.html, html);
    assert!(outcome.fixed.is_empty());
    assert_eq!(engine.get_stats().unwrap().rewrites_rejected, 1);

    let heading = "<h1>a << b</h1>";
    let outcome = engine.auto_fix_specific_issue(heading, "no-heading-tags").unwrap();
    assert_eq!(outcome.html, heading);
    assert!(!outcome.changed());
}

#[test]
fn test_runaway_growth_is_stopped() {
    let mut engine = ValidationEngine::default();
    engine
        .add_rule(rewrite_rule("doubler", |html| format!("{}{}", html, html)))
        .unwrap();

    let html = "<b>grow</b>".repeat(20);
    let outcome = engine.auto_fix_specific_issue(&html, "doubler").unwrap();
    let config = engine.get_config().unwrap().autofix.clone();
    let ceiling = ((html.len() as f64 * config.growth_limit) as usize)
        .max(html.len() + config.growth_allowance_bytes);

    assert!(outcome.html.len() <= ceiling);
    assert!(outcome.html.len() > html.len());

    let history = engine.fix_history().unwrap();
    assert!(!history[0].success);
}

#[test]
fn test_disabled_rule_is_not_applied() {
    let mut engine = ValidationEngine::default();
    engine.set_rule_enabled("no-heading-tags", false).unwrap();

    let outcome = engine.auto_fix("<h1>Title</h1>").unwrap();
    assert!(outcome.html.contains("<h1>"));
    assert!(!outcome.fixed.contains(&"no-heading-tags".to_string()));
}

#[test]
fn test_severity_filter() {
    let engine = ValidationEngine::default();
    let html = r#"<h1>T</h1><img src="a.png">"#;

    let everything = engine.auto_fix_all_issues(html, Severity::Info).unwrap();
    let errors_only = engine.auto_fix_all_issues(html, Severity::Error).unwrap();
    assert!(everything.fixed.len() > errors_only.fixed.len());
    assert!(errors_only.fixed.iter().all(|name| {
        engine.get_available_rules().unwrap()[name].severity == Severity::Error
    }));
}

#[test]
fn test_fix_history_counts_repeats() {
    let engine = ValidationEngine::default();
    engine.auto_fix("<h3>x</h3>").unwrap();
    engine.auto_fix("<h3>x</h3>").unwrap();

    let history = engine.fix_history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].occurrences, 2);
    assert!(history[0].success);
    assert!(history[0].key.starts_with("10:"));
}
