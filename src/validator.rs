//! The validation engine: rule execution, scoring, autofix and rule management.
//!
//! All work is synchronous and takes `&self`, so one engine can be shared
//! through an `Arc` by many tasks. Rule and configuration changes take
//! `&mut self`. Parsed trees and compiled patterns are cached per engine.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::autofix::{AutofixEngine, FixOutcome, FixRecord, fix_sequence};
use crate::cache::{AstCache, CacheStats, PatternCache, lock};
use crate::compatibility::{CompatibilityReport, compatibility_report};
use crate::config::{ConfigPatch, EngineConfig};
use crate::error::{EngineError, Result};
use crate::report::EmailValidationReport;
use crate::rules::{
    Category, Rule, RuleContext, RuleInfo, RuleMeta, RuleRegistry, Severity, ValidationResult,
};
use crate::traversal::TraversalIndex;

/// Counters and cache statistics of one engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub validations: u64,
    /// Inputs refused as empty or oversize
    pub rejected_inputs: u64,
    /// Rule checks that returned an error or panicked
    pub rule_failures: u64,
    pub auto_fix_runs: u64,
    pub fixes_applied: u64,
    /// Rewrites discarded by the structural check
    pub rewrites_rejected: u64,
    pub ast_cache: CacheStats,
    pub pattern_cache: CacheStats,
    pub fix_history_len: usize,
}

#[derive(Default)]
struct Counters {
    validations: AtomicU64,
    rejected_inputs: AtomicU64,
    rule_failures: AtomicU64,
}

fn input_error(category: Category, message: String) -> ValidationResult {
    let meta = RuleMeta::new("input", "Input", Severity::Error, category);
    ValidationResult::new(&meta, message)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

pub struct ValidationEngine {
    registry: RuleRegistry,
    config: EngineConfig,
    ast_cache: Arc<AstCache>,
    pattern_cache: Arc<PatternCache>,
    autofix: AutofixEngine,
    counters: Counters,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    disposed: bool,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::build(EngineConfig::default())
    }
}

impl ValidationEngine {
    /// Create an engine with the built-in rules and a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        Self {
            registry: RuleRegistry::with_builtin_rules(),
            ast_cache: Arc::new(AstCache::new(config.cache.ast_policy())),
            pattern_cache: Arc::new(PatternCache::new(config.cache.pattern_policy())),
            autofix: AutofixEngine::new(
                config
                    .cache
                    .history_policy(config.autofix.history_capacity),
            ),
            counters: Counters::default(),
            maintenance: Mutex::new(None),
            disposed: false,
            config,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.disposed {
            Err(EngineError::Disposed)
        } else {
            Ok(())
        }
    }

    fn context(&self) -> RuleContext<'_> {
        RuleContext::new(&self.config, &self.pattern_cache)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Validate `html` against every enabled rule.
    ///
    /// Bad markup never fails: empty or oversize input yields a report with a
    /// single error and a score of 0, and a failing rule yields one error
    /// finding for that rule. `Err` is returned only after [`dispose`](Self::dispose).
    pub fn validate(&self, html: &str) -> Result<EmailValidationReport> {
        self.ensure_active()?;
        self.counters.validations.fetch_add(1, Ordering::Relaxed);

        if html.trim().is_empty() {
            self.counters.rejected_inputs.fetch_add(1, Ordering::Relaxed);
            return Ok(EmailValidationReport::rejected(
                input_error(Category::Structure, "HTML content is empty".to_string())
                    .suggestion("Provide the HTML of the email body"),
            ));
        }
        if html.len() > self.config.max_html_size {
            self.counters.rejected_inputs.fetch_add(1, Ordering::Relaxed);
            return Ok(EmailValidationReport::rejected(
                input_error(
                    Category::Performance,
                    format!(
                        "HTML is {} bytes, larger than the {} byte limit",
                        html.len(),
                        self.config.max_html_size
                    ),
                )
                .suggestion("Reduce the size of the email"),
            ));
        }

        let ctx = self.context();
        let tree = self.ast_cache.get_or_parse(html, &ctx.parser());
        let mut index = TraversalIndex::new(&tree, self.config.cache.traversal_max_results);
        let mut results = Vec::new();

        for rule in self.registry.iter() {
            let meta = rule.meta();
            if !self.config.rule_enabled(meta) {
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if rule.uses_ast() {
                    rule.check_with_ast(html, &ctx, &mut index)
                } else {
                    rule.check(html, &ctx)
                }
            }));

            let failure = match outcome {
                Ok(Ok(found)) => {
                    let severity = self.config.rule(&meta.name).and_then(|r| r.severity);
                    results.extend(found.into_iter().map(|mut result| {
                        if let Some(severity) = severity {
                            result.severity = severity;
                        }
                        result
                    }));
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };

            warn!(rule = %meta.name, error = %failure, "rule check failed");
            self.counters.rule_failures.fetch_add(1, Ordering::Relaxed);
            let mut result =
                ValidationResult::new(meta, format!("Rule '{}' failed: {}", meta.name, failure));
            result.severity = Severity::Error;
            result.auto_fix_available = false;
            results.push(result);
        }
        drop(index);

        Ok(EmailValidationReport::from_results(
            results,
            &self.config.scoring,
            self.config.strict_mode,
        ))
    }

    fn fix_with(&self, html: &str, include: impl Fn(&dyn Rule) -> bool) -> Result<FixOutcome> {
        self.ensure_active()?;
        let sequence = fix_sequence(&self.registry, &self.config, include);
        Ok(self.autofix.run(html, &sequence, &self.context()))
    }

    /// Apply every enabled fixable rule until the markup stops changing.
    pub fn auto_fix(&self, html: &str) -> Result<FixOutcome> {
        self.fix_with(html, |_| true)
    }

    /// Apply one rule's fix. Unknown, disabled and non-fixable rules change nothing.
    pub fn auto_fix_specific_issue(&self, html: &str, rule: &str) -> Result<FixOutcome> {
        self.fix_with(html, |candidate| candidate.name() == rule)
    }

    pub fn auto_fix_multiple_issues(&self, html: &str, rules: &[&str]) -> Result<FixOutcome> {
        self.fix_with(html, |candidate| rules.contains(&candidate.name()))
    }

    /// Apply the fixes of rules whose effective severity is at least `severity`.
    pub fn auto_fix_all_issues(&self, html: &str, severity: Severity) -> Result<FixOutcome> {
        self.fix_with(html, |candidate| {
            self.config
                .rule_severity(candidate.meta())
                .is_at_least(severity)
        })
    }

    pub fn auto_fix_category(&self, html: &str, category: Category) -> Result<FixOutcome> {
        self.fix_with(html, |candidate| candidate.meta().category == category)
    }

    /// Register a custom rule. A built-in or custom rule of the same name is replaced.
    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) -> Result<()> {
        self.ensure_active()?;
        debug!(rule = rule.name(), "registering custom rule");
        self.registry.add_custom(rule);
        Ok(())
    }

    pub fn remove_rule(&mut self, name: &str) -> Result<bool> {
        self.ensure_active()?;
        Ok(self.registry.remove(name))
    }

    fn known_rule(&self, name: &str) -> Result<()> {
        self.ensure_active()?;
        if self.registry.contains(name) {
            Ok(())
        } else {
            Err(EngineError::UnknownRule(name.to_string()))
        }
    }

    pub fn set_rule_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        self.known_rule(name)?;
        self.config.rules.entry(name.to_string()).or_default().enabled = Some(enabled);
        Ok(())
    }

    pub fn set_rule_severity(&mut self, name: &str, severity: Severity) -> Result<()> {
        self.known_rule(name)?;
        self.config.rules.entry(name.to_string()).or_default().severity = Some(severity);
        Ok(())
    }

    fn rule_info(&self, rule: &dyn Rule) -> RuleInfo {
        let meta = rule.meta();
        RuleInfo {
            name: meta.name.clone(),
            display_name: meta.display_name.clone(),
            description: meta.description.clone(),
            severity: self.config.rule_severity(meta),
            category: meta.category,
            enabled: self.config.rule_enabled(meta),
            auto_fix_available: rule.has_autofix(),
            custom: self.registry.is_custom(&meta.name),
        }
    }

    /// Effective view of every registered rule, keyed by name.
    pub fn get_available_rules(&self) -> Result<BTreeMap<String, RuleInfo>> {
        self.ensure_active()?;
        Ok(self
            .registry
            .iter()
            .map(|rule| (rule.name().to_string(), self.rule_info(rule.as_ref())))
            .collect())
    }

    pub fn get_rules_by_category(&self, category: Category) -> Result<Vec<RuleInfo>> {
        self.ensure_active()?;
        Ok(self
            .registry
            .iter()
            .filter(|rule| rule.meta().category == category)
            .map(|rule| self.rule_info(rule.as_ref()))
            .collect())
    }

    pub fn get_auto_fixable_rules(&self) -> Result<Vec<RuleInfo>> {
        self.ensure_active()?;
        Ok(self
            .registry
            .iter()
            .filter(|rule| rule.has_autofix())
            .map(|rule| self.rule_info(rule.as_ref()))
            .collect())
    }

    pub fn get_compatibility_report(&self, html: &str) -> Result<CompatibilityReport> {
        self.ensure_active()?;
        Ok(compatibility_report(html, &self.config, &self.pattern_cache)?)
    }

    pub fn get_config(&self) -> Result<&EngineConfig> {
        self.ensure_active()?;
        Ok(&self.config)
    }

    /// Apply a partial update. An invalid result is rejected and the current
    /// configuration kept.
    pub fn update_config(&mut self, patch: ConfigPatch) -> Result<()> {
        self.ensure_active()?;
        let updated = self.config.patched(patch);
        updated.validate()?;

        if updated.parser != self.config.parser {
            self.ast_cache.clear();
        }
        if updated.cache != self.config.cache {
            self.ast_cache.set_policy(updated.cache.ast_policy());
            self.pattern_cache.set_policy(updated.cache.pattern_policy());
        }
        self.autofix.set_history_policy(
            updated
                .cache
                .history_policy(updated.autofix.history_capacity),
        );
        self.config = updated;
        debug!("engine configuration updated");
        Ok(())
    }

    pub fn get_stats(&self) -> Result<EngineStats> {
        self.ensure_active()?;
        let fixes = self.autofix.stats();
        Ok(EngineStats {
            validations: self.counters.validations.load(Ordering::Relaxed),
            rejected_inputs: self.counters.rejected_inputs.load(Ordering::Relaxed),
            rule_failures: self.counters.rule_failures.load(Ordering::Relaxed),
            auto_fix_runs: fixes.runs,
            fixes_applied: fixes.fixes_applied,
            rewrites_rejected: fixes.rewrites_rejected,
            ast_cache: self.ast_cache.stats(),
            pattern_cache: self.pattern_cache.stats(),
            fix_history_len: self.autofix.history_len(),
        })
    }

    /// Zero the counters. Cached entries are kept.
    pub fn reset_stats(&self) -> Result<()> {
        self.ensure_active()?;
        self.counters.validations.store(0, Ordering::Relaxed);
        self.counters.rejected_inputs.store(0, Ordering::Relaxed);
        self.counters.rule_failures.store(0, Ordering::Relaxed);
        self.autofix.reset_stats();
        self.ast_cache.reset_stats();
        self.pattern_cache.reset_stats();
        Ok(())
    }

    pub fn fix_history(&self) -> Result<Vec<FixRecord>> {
        self.ensure_active()?;
        Ok(self.autofix.history())
    }

    /// Start a background task that sweeps expired cache entries every
    /// `cache.sweep_interval_seconds`. Returns `false` outside a tokio runtime.
    /// Calling it again while the task runs does nothing.
    pub fn spawn_maintenance(&self) -> Result<bool> {
        self.ensure_active()?;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Ok(false);
        };

        let mut slot = lock(&self.maintenance);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(true);
        }

        let ast_cache = Arc::clone(&self.ast_cache);
        let pattern_cache = Arc::clone(&self.pattern_cache);
        let period = Duration::from_secs(self.config.cache.sweep_interval_seconds.max(1));

        *slot = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = ast_cache.sweep() + pattern_cache.sweep();
                if removed > 0 {
                    debug!(removed, "maintenance sweep");
                }
            }
        }));
        Ok(true)
    }

    fn stop_maintenance(&self) {
        if let Some(task) = lock(&self.maintenance).take() {
            task.abort();
        }
    }

    /// Release rules, caches and history and stop background maintenance.
    /// Every later call returns [`EngineError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.stop_maintenance();
        self.registry.clear();
        self.ast_cache.clear();
        self.pattern_cache.clear();
        self.autofix.clear_history();
        self.disposed = true;
        info!("validation engine disposed");
    }
}

impl Drop for ValidationEngine {
    fn drop(&mut self) {
        self.stop_maintenance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;
    use crate::rules::CustomRule;

    fn rule(
        name: &str,
        check: impl Fn(&str) -> crate::error::RuleResult<Vec<ValidationResult>> + Send + Sync + 'static,
    ) -> Arc<dyn Rule> {
        Arc::new(CustomRule::new(
            RuleMeta::new(name, name, Severity::Warning, Category::BestPractice),
            move |html, _, _| check(html),
        ))
    }

    #[test]
    fn test_div_is_a_structure_error() {
        let engine = ValidationEngine::default();
        let report = engine.validate("<div>Hi</div>").unwrap();

        assert!(!report.is_valid);
        assert!(report
            .errors
            .iter()
            .any(|r| r.category == Category::Structure && r.rule == "no-block-tags"));
        assert!(report.auto_fix_available);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let engine = ValidationEngine::default();
        for html in ["", "   \n\t"] {
            let report = engine.validate(html).unwrap();
            assert_eq!(report.score, 0);
            assert_eq!(report.total_issues, 1);
            assert_eq!(report.errors[0].category, Category::Structure);
        }
        assert_eq!(engine.get_stats().unwrap().rejected_inputs, 2);
    }

    #[test]
    fn test_oversize_input_is_not_parsed() {
        let config = EngineConfig {
            max_html_size: 64,
            ..EngineConfig::default()
        };
        let engine = ValidationEngine::new(config).unwrap();
        let report = engine.validate(&"<b>x</b>".repeat(20)).unwrap();

        assert_eq!(report.total_issues, 1);
        assert_eq!(report.errors[0].category, Category::Performance);
        assert_eq!(report.score, 0);
        let stats = engine.get_stats().unwrap();
        assert_eq!(stats.ast_cache.entries, 0);
        assert_eq!(stats.ast_cache.misses, 0);
    }

    #[test]
    fn test_clean_email_is_valid() {
        let html = r#"<table role="presentation" cellpadding="0" cellspacing="0" border="0"><tr><td><a href="https://x.test">Shop</a></td></tr></table>"#;
        let report = ValidationEngine::default().validate(html).unwrap();
        assert!(report.is_valid, "{:?}", report);
        assert_eq!(report.score, 100);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let engine = ValidationEngine::default();
        let html = r#"<div><h1>Hi</h1><img src="a.png"><a href="javascript:go()" onclick="x()">go</a></div>"#;
        let first = engine.validate(html).unwrap();
        let second = engine.validate(html).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.get_stats().unwrap().ast_cache.hits, 1);
    }

    #[test]
    fn test_failing_rules_are_isolated() {
        let mut engine = ValidationEngine::default();
        engine
            .add_rule(rule("fails", |_| Err(RuleError::Failed("bad state".to_string()))))
            .unwrap();
        engine.add_rule(rule("panics", |_| panic!("kaboom"))).unwrap();

        let report = engine.validate("<b>x</b>").unwrap();
        let failures: Vec<_> = report
            .errors
            .iter()
            .filter(|r| r.rule == "fails" || r.rule == "panics")
            .collect();
        assert_eq!(failures.len(), 2);
        assert!(failures[1].message.contains("kaboom"));
        assert_eq!(engine.get_stats().unwrap().rule_failures, 2);
    }

    #[test]
    fn test_severity_override_rewrites_results() {
        let mut engine = ValidationEngine::default();
        engine.set_rule_severity("no-block-tags", Severity::Info).unwrap();

        let report = engine.validate("<div>Hi</div>").unwrap();
        assert!(report.errors.iter().all(|r| r.rule != "no-block-tags"));
        assert!(report.suggestions.iter().any(|r| r.rule == "no-block-tags"));
    }

    #[test]
    fn test_disabled_rules_and_categories_do_not_run() {
        let mut engine = ValidationEngine::default();
        engine.set_rule_enabled("no-block-tags", false).unwrap();
        engine
            .update_config(ConfigPatch {
                check_accessibility: Some(false),
                ..ConfigPatch::default()
            })
            .unwrap();

        let report = engine.validate(r#"<div><img src="a.png"></div>"#).unwrap();
        assert!(report.issues().all(|r| r.rule != "no-block-tags"));
        assert_eq!(report.category_counts[&Category::Accessibility], 0);
    }

    #[test]
    fn test_unknown_rule_names_are_errors() {
        let mut engine = ValidationEngine::default();
        assert!(matches!(
            engine.set_rule_enabled("nope", true),
            Err(EngineError::UnknownRule(name)) if name == "nope"
        ));
        assert!(engine.set_rule_severity("nope", Severity::Error).is_err());
    }

    #[test]
    fn test_invalid_update_keeps_config() {
        let mut engine = ValidationEngine::default();
        let result = engine.update_config(ConfigPatch {
            max_html_size: Some(0),
            ..ConfigPatch::default()
        });
        assert!(matches!(result, Err(EngineError::Config(_))));
        assert_eq!(engine.get_config().unwrap().max_html_size, 512 * 1024);
    }

    #[test]
    fn test_heading_autofix() {
        let engine = ValidationEngine::default();
        let outcome = engine.auto_fix("<h1>Title</h1>").unwrap();

        assert!(outcome.html.starts_with("<span"));
        assert!(outcome.html.contains("Title"));
        assert!(!outcome.html.contains("<h1"));
        assert!(outcome.fixed.contains(&"no-heading-tags".to_string()));
    }

    #[test]
    fn test_targeted_autofix_operations() {
        let engine = ValidationEngine::default();
        let html = r#"<h1>T</h1><img src="a.png">"#;

        let only_alt = engine.auto_fix_specific_issue(html, "image-alt-text").unwrap();
        assert_eq!(only_alt.fixed, vec!["image-alt-text"]);
        assert!(only_alt.html.contains("<h1>"));

        let unknown = engine.auto_fix_specific_issue(html, "no-such-rule").unwrap();
        assert_eq!(unknown.html, html);

        let both = engine
            .auto_fix_multiple_issues(html, &["image-alt-text", "no-heading-tags"])
            .unwrap();
        assert_eq!(both.fixed, vec!["no-heading-tags", "image-alt-text"]);

        let errors_only = engine.auto_fix_all_issues(html, Severity::Error).unwrap();
        assert!(errors_only.fixed.contains(&"no-heading-tags".to_string()));
        assert!(!errors_only.fixed.contains(&"image-attributes".to_string()));

        let accessibility = engine
            .auto_fix_category(html, Category::Accessibility)
            .unwrap();
        assert!(accessibility.html.contains("<h1>"));
        assert!(accessibility.fixed.contains(&"image-alt-text".to_string()));
    }

    #[test]
    fn test_custom_rule_replaces_builtin() {
        let mut engine = ValidationEngine::default();
        engine.add_rule(rule("no-block-tags", |_| Ok(Vec::new()))).unwrap();

        let rules = engine.get_available_rules().unwrap();
        assert_eq!(rules.len(), 26);
        assert!(rules["no-block-tags"].custom);
        assert!(engine.validate("<div>x</div>").unwrap().issues().all(|r| r.rule != "no-block-tags"));

        assert!(engine.remove_rule("no-block-tags").unwrap());
        assert_eq!(engine.get_available_rules().unwrap().len(), 25);
    }

    #[test]
    fn test_rule_listings() {
        let engine = ValidationEngine::default();
        let structure = engine.get_rules_by_category(Category::Structure).unwrap();
        assert_eq!(structure.len(), 8);
        let fixable = engine.get_auto_fixable_rules().unwrap();
        assert!(fixable.iter().all(|r| r.auto_fix_available));
        assert!(fixable.iter().any(|r| r.name == "table-nesting"));
    }

    #[test]
    fn test_dispose_blocks_further_calls() {
        let mut engine = ValidationEngine::default();
        engine.validate("<b>x</b>").unwrap();
        engine.dispose();
        engine.dispose();

        assert!(engine.is_disposed());
        assert!(matches!(engine.validate("<b>x</b>"), Err(EngineError::Disposed)));
        assert!(matches!(engine.auto_fix("<b>x</b>"), Err(EngineError::Disposed)));
        assert!(matches!(engine.get_stats(), Err(EngineError::Disposed)));
        assert!(matches!(
            engine.add_rule(rule("late", |_| Ok(Vec::new()))),
            Err(EngineError::Disposed)
        ));
    }

    #[test]
    fn test_reset_stats_keeps_cache_contents() {
        let engine = ValidationEngine::default();
        engine.validate("<b>x</b>").unwrap();
        engine.auto_fix("<h2>x</h2>").unwrap();
        engine.reset_stats().unwrap();

        let stats = engine.get_stats().unwrap();
        assert_eq!(stats.validations, 0);
        assert_eq!(stats.auto_fix_runs, 0);
        assert_eq!(stats.ast_cache.entries, 1);
        assert_eq!(stats.fix_history_len, 1);
    }

    #[test]
    fn test_maintenance_needs_a_runtime() {
        let engine = ValidationEngine::default();
        assert!(!engine.spawn_maintenance().unwrap());
    }

    #[tokio::test]
    async fn test_maintenance_task_lifecycle() {
        let mut engine = ValidationEngine::default();
        assert!(engine.spawn_maintenance().unwrap());
        assert!(engine.spawn_maintenance().unwrap());
        engine.dispose();
        assert!(lock(&engine.maintenance).is_none());
    }
}
