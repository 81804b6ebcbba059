use std::sync::Arc;

use validate_email_html::config::{ScoringConfig, TargetClients};
use validate_email_html::{
    Category, ConfigPatch, CustomRule, EmailClient, EngineConfig, EngineError, RuleMeta, Severity,
    ValidationEngine, ValidationResult,
};

use crate::common::test_helpers::{CLEAN_EMAIL, LEGACY_EMAIL, LEGACY_STRUCTURE_RULES};

#[test]
fn test_div_scenario() {
    let engine = ValidationEngine::default();
    let report = engine.validate("<div>Hello</div>").unwrap();

    assert!(!report.is_valid);
    let error = report
        .errors
        .iter()
        .find(|r| r.rule == "no-block-tags")
        .unwrap();
    assert_eq!(error.category, Category::Structure);
    assert_eq!(error.line, Some(1));
    assert!(report.auto_fix_available);
    assert!(report.score < 100);
}

#[test]
fn test_empty_input_scenario() {
    let report = ValidationEngine::default().validate("").unwrap();

    assert!(!report.is_valid);
    assert_eq!(report.score, 0);
    assert_eq!(report.total_issues, 1);
    assert_eq!(report.errors[0].message, "HTML content is empty");
    assert_eq!(report.category_counts[&Category::Structure], 1);
}

#[test]
fn test_oversize_scenario() {
    let config = EngineConfig {
        max_html_size: 1024,
        ..EngineConfig::default()
    };
    let engine = ValidationEngine::new(config).unwrap();
    let report = engine.validate(&"<td>x</td>".repeat(200)).unwrap();

    assert!(!report.is_valid);
    assert_eq!(report.total_issues, 1);
    assert_eq!(report.errors[0].category, Category::Performance);
    assert_eq!(engine.get_stats().unwrap().rejected_inputs, 1);
}

#[test]
fn test_legacy_markup_reports_every_structure_problem() {
    let report = ValidationEngine::default().validate(LEGACY_EMAIL).unwrap();

    for rule in LEGACY_STRUCTURE_RULES {
        assert!(
            report.errors.iter().any(|r| r.rule == *rule),
            "missing {} in {:?}",
            rule,
            report.errors
        );
    }
}

#[test]
fn test_report_arithmetic() {
    let engine = ValidationEngine::default();
    let scoring = ScoringConfig::default();

    for html in [CLEAN_EMAIL, LEGACY_EMAIL, "<div><p>x</p></div>", "<b>bold</b>"] {
        let report = engine.validate(html).unwrap();

        assert_eq!(
            report.total_issues,
            report.errors.len() + report.warnings.len() + report.suggestions.len()
        );
        assert_eq!(report.category_counts.values().sum::<usize>(), report.total_issues);
        assert!(report.errors.iter().all(|r| r.severity == Severity::Error));
        assert!(report.warnings.iter().all(|r| r.severity == Severity::Warning));
        assert!(report.suggestions.iter().all(|r| r.severity == Severity::Info));
        assert_eq!(report.is_valid, report.errors.is_empty());
        assert_eq!(
            report.auto_fix_available,
            report.issues().any(|r| r.auto_fix_available)
        );
        assert_eq!(
            report.score,
            validate_email_html::report::score(
                report.errors.len(),
                report.warnings.len(),
                report.suggestions.len(),
                &scoring
            )
        );
    }
}

#[test]
fn test_strict_mode_treats_warnings_as_failures() {
    let mut engine = ValidationEngine::default();
    engine
        .add_rule(Arc::new(CustomRule::new(
            RuleMeta::new("always-warn", "Always warn", Severity::Warning, Category::BestPractice),
            |_, _, meta| Ok(vec![ValidationResult::new(meta, "heads up")]),
        )))
        .unwrap();

    assert!(engine.validate(CLEAN_EMAIL).unwrap().is_valid);

    engine
        .update_config(ConfigPatch {
            strict_mode: Some(true),
            ..ConfigPatch::default()
        })
        .unwrap();
    assert!(!engine.validate(CLEAN_EMAIL).unwrap().is_valid);
}

#[test]
fn test_repeated_validation_is_deterministic() {
    let engine = ValidationEngine::default();
    let first = engine.validate(LEGACY_EMAIL).unwrap();
    for _ in 0..5 {
        assert_eq!(engine.validate(LEGACY_EMAIL).unwrap(), first);
    }

    let stats = engine.get_stats().unwrap();
    assert_eq!(stats.validations, 6);
    assert_eq!(stats.ast_cache.misses, 1);
    assert_eq!(stats.ast_cache.hits, 5);
}

#[test]
fn test_custom_rule_uses_compiled_patterns() {
    let mut engine = ValidationEngine::default();
    let rule = CustomRule::new(
        RuleMeta::new("no-marquee-text", "No marquee", Severity::Error, Category::BestPractice),
        |html, ctx, meta| {
            let pattern = ctx.pattern(r"(?i)<marquee\b")?;
            Ok(pattern
                .find_iter(html)
                .map(|m| ValidationResult::new(meta, "Marquee is not supported").at_offset(html, m.start()))
                .collect())
        },
    )
    .with_autofix(|html, _| Ok(html.replace("<marquee>", "<span>").replace("</marquee>", "</span>")));
    engine.add_rule(Arc::new(rule)).unwrap();

    let html = "<b>x</b>\n<marquee>Sale</marquee>";
    let report = engine.validate(html).unwrap();
    let finding = report
        .errors
        .iter()
        .find(|r| r.rule == "no-marquee-text")
        .unwrap();
    assert_eq!(finding.line, Some(2));
    assert!(finding.auto_fix_available);

    let fixed = engine.auto_fix_specific_issue(html, "no-marquee-text").unwrap();
    assert_eq!(fixed.html, "<b>x</b>\n<span>Sale</span>");
}

#[test]
fn test_invalid_custom_pattern_becomes_a_finding() {
    let mut engine = ValidationEngine::default();
    engine
        .add_rule(Arc::new(CustomRule::new(
            RuleMeta::new("bad-pattern", "Bad pattern", Severity::Info, Category::BestPractice),
            |_, ctx, _| {
                ctx.pattern("(unclosed")?;
                Ok(Vec::new())
            },
        )))
        .unwrap();

    let report = engine.validate(CLEAN_EMAIL).unwrap();
    let failure = report.errors.iter().find(|r| r.rule == "bad-pattern").unwrap();
    assert!(failure.message.starts_with("Rule 'bad-pattern' failed"));
    assert_eq!(engine.get_stats().unwrap().rule_failures, 1);
}

#[test]
fn test_compatibility_report_respects_targets() {
    let mut engine = ValidationEngine::default();
    let html = r#"<table><tr><td style="display:flex;border-radius:4px">x</td></tr></table><style>td{}</style>"#;

    let report = engine.get_compatibility_report(html).unwrap();
    assert_eq!(report.len(), EmailClient::ALL.len());
    assert!(!report[&EmailClient::Outlook].compatible);
    assert!(!report[&EmailClient::Gmail].compatible);
    assert!(report[&EmailClient::AppleMail].compatible);

    let mut clients = TargetClients::default();
    clients.only(&[EmailClient::AppleMail]);
    engine
        .update_config(ConfigPatch {
            clients: Some(clients),
            ..ConfigPatch::default()
        })
        .unwrap();

    let report = engine.get_compatibility_report(html).unwrap();
    assert_eq!(report.keys().copied().collect::<Vec<_>>(), vec![EmailClient::AppleMail]);
}

#[test]
fn test_update_config_changes_scoring() {
    let mut engine = ValidationEngine::default();
    let before = engine.validate("<div>x</div>").unwrap().score;

    engine
        .update_config(ConfigPatch {
            scoring: Some(ScoringConfig {
                error_penalty: 40.0,
                ..ScoringConfig::default()
            }),
            ..ConfigPatch::default()
        })
        .unwrap();
    let after = engine.validate("<div>x</div>").unwrap().score;
    assert!(after < before);
}

#[test]
fn test_disposed_engine_rejects_every_call() {
    let mut engine = ValidationEngine::default();
    engine.dispose();

    assert!(matches!(engine.validate("x"), Err(EngineError::Disposed)));
    assert!(matches!(engine.get_config(), Err(EngineError::Disposed)));
    assert!(matches!(engine.get_available_rules(), Err(EngineError::Disposed)));
    assert!(matches!(engine.get_compatibility_report("x"), Err(EngineError::Disposed)));
    assert!(matches!(engine.fix_history(), Err(EngineError::Disposed)));
    assert!(matches!(
        engine.update_config(ConfigPatch::default()),
        Err(EngineError::Disposed)
    ));
}
