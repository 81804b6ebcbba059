//! Rule model and registry.
//!
//! A rule inspects raw markup (and optionally the parsed tree through a
//! [`TraversalIndex`]) and may carry a rewrite that repairs what it reports.
//! Built-in rules are plain function tables; callers add their own through
//! [`CustomRule`]. Both sit behind the same [`Rule`] trait object so the
//! engine never special-cases either.

pub mod accessibility;
pub mod best_practice;
pub mod compatibility;
pub mod markup;
pub mod performance;
pub mod structure;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::{PatternCache, PatternFlags};
use crate::config::EngineConfig;
use crate::error::RuleResult;
use crate::parser::HtmlParser;
use crate::traversal::TraversalIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn rank(self) -> u8 {
        match self {
            Severity::Error => 3,
            Severity::Warning => 2,
            Severity::Info => 1,
        }
    }

    /// `Error.is_at_least(Warning)` holds; `Info.is_at_least(Warning)` does not.
    pub fn is_at_least(self, threshold: Severity) -> bool {
        self.rank() >= threshold.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" | "warn" => Ok(Severity::Warning),
            "info" | "suggestion" => Ok(Severity::Info),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Structure,
    Accessibility,
    Compatibility,
    Performance,
    BestPractice,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Structure,
        Category::Accessibility,
        Category::Compatibility,
        Category::Performance,
        Category::BestPractice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Structure => "structure",
            Category::Accessibility => "accessibility",
            Category::Compatibility => "compatibility",
            Category::Performance => "performance",
            Category::BestPractice => "best-practice",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "structure" => Ok(Category::Structure),
            "accessibility" => Ok(Category::Accessibility),
            "compatibility" => Ok(Category::Compatibility),
            "performance" => Ok(Category::Performance),
            "best-practice" | "best-practices" | "bestpractice" => Ok(Category::BestPractice),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// Descriptive metadata and defaults of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMeta {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub severity: Severity,
    pub category: Category,
    /// Default enablement; configuration overrides it
    pub enabled: bool,
    pub auto_fix_available: bool,
}

impl RuleMeta {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        severity: Severity,
        category: Category,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: String::new(),
            severity,
            category,
            enabled: true,
            auto_fix_available: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn fixable(mut self) -> Self {
        self.auto_fix_available = true;
        self
    }
}

/// A single finding produced by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub auto_fix_available: bool,
}

impl ValidationResult {
    pub fn new(meta: &RuleMeta, message: impl Into<String>) -> Self {
        Self {
            rule: meta.name.clone(),
            severity: meta.severity,
            message: message.into(),
            category: meta.category,
            line: None,
            column: None,
            suggestion: None,
            auto_fix_available: meta.auto_fix_available,
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Locate the result at a byte offset of `html`.
    pub fn at_offset(self, html: &str, offset: usize) -> Self {
        let (line, column) = markup::line_col(html, offset);
        self.at(line, column)
    }

    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// What a rule sees while running: the engine configuration and the shared
/// compiled-pattern cache.
pub struct RuleContext<'a> {
    pub config: &'a EngineConfig,
    pub patterns: &'a PatternCache,
}

impl<'a> RuleContext<'a> {
    pub fn new(config: &'a EngineConfig, patterns: &'a PatternCache) -> Self {
        Self { config, patterns }
    }

    /// Case-insensitive compiled pattern.
    pub fn pattern(&self, pattern: &str) -> RuleResult<Arc<Regex>> {
        self.patterns
            .get_or_compile(pattern, PatternFlags::CASE_INSENSITIVE)
    }

    pub fn pattern_with(&self, pattern: &str, flags: PatternFlags) -> RuleResult<Arc<Regex>> {
        self.patterns.get_or_compile(pattern, flags)
    }

    pub fn parser(&self) -> HtmlParser {
        HtmlParser::new(self.config.parser)
    }
}

pub trait Rule: Send + Sync {
    fn meta(&self) -> &RuleMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn check(&self, html: &str, ctx: &RuleContext<'_>) -> RuleResult<Vec<ValidationResult>>;

    /// Whether the engine should call [`Rule::check_with_ast`] instead of [`Rule::check`].
    fn uses_ast(&self) -> bool {
        false
    }

    fn check_with_ast(
        &self,
        html: &str,
        ctx: &RuleContext<'_>,
        _index: &mut TraversalIndex<'_>,
    ) -> RuleResult<Vec<ValidationResult>> {
        self.check(html, ctx)
    }

    fn has_autofix(&self) -> bool {
        self.meta().auto_fix_available
    }

    fn autofix(&self, html: &str, _ctx: &RuleContext<'_>) -> RuleResult<String> {
        Ok(html.to_owned())
    }
}

pub type CheckFn = fn(&str, &RuleContext<'_>, &RuleMeta) -> RuleResult<Vec<ValidationResult>>;
pub type TreeCheckFn = fn(
    &str,
    &RuleContext<'_>,
    &RuleMeta,
    &mut TraversalIndex<'_>,
) -> RuleResult<Vec<ValidationResult>>;
pub type FixFn = fn(&str, &RuleContext<'_>) -> RuleResult<String>;

#[derive(Clone, Copy)]
pub enum Check {
    Source(CheckFn),
    Tree(TreeCheckFn),
}

/// A rule shipped with the engine.
pub struct BuiltinRule {
    meta: RuleMeta,
    check: Check,
    fix: Option<FixFn>,
}

impl BuiltinRule {
    pub fn source(meta: RuleMeta, check: CheckFn) -> Self {
        Self {
            meta,
            check: Check::Source(check),
            fix: None,
        }
    }

    pub fn tree(meta: RuleMeta, check: TreeCheckFn) -> Self {
        Self {
            meta,
            check: Check::Tree(check),
            fix: None,
        }
    }

    pub fn with_fix(mut self, fix: FixFn) -> Self {
        self.meta.auto_fix_available = true;
        self.fix = Some(fix);
        self
    }

    fn into_rule(self) -> Arc<dyn Rule> {
        Arc::new(self)
    }
}

impl Rule for BuiltinRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn check(&self, html: &str, ctx: &RuleContext<'_>) -> RuleResult<Vec<ValidationResult>> {
        match self.check {
            Check::Source(check) => check(html, ctx, &self.meta),
            Check::Tree(check) => {
                let tree = ctx.parser().parse(html).nodes;
                let mut index = TraversalIndex::new(&tree, ctx.config.cache.traversal_max_results);
                check(html, ctx, &self.meta, &mut index)
            }
        }
    }

    fn uses_ast(&self) -> bool {
        matches!(self.check, Check::Tree(_))
    }

    fn check_with_ast(
        &self,
        html: &str,
        ctx: &RuleContext<'_>,
        index: &mut TraversalIndex<'_>,
    ) -> RuleResult<Vec<ValidationResult>> {
        match self.check {
            Check::Source(check) => check(html, ctx, &self.meta),
            Check::Tree(check) => check(html, ctx, &self.meta, index),
        }
    }

    fn autofix(&self, html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
        match self.fix {
            Some(fix) => fix(html, ctx),
            None => Ok(html.to_owned()),
        }
    }
}

type CustomCheck =
    Box<dyn Fn(&str, &RuleContext<'_>, &RuleMeta) -> RuleResult<Vec<ValidationResult>> + Send + Sync>;
type CustomTreeCheck = Box<
    dyn Fn(&str, &RuleContext<'_>, &RuleMeta, &mut TraversalIndex<'_>) -> RuleResult<Vec<ValidationResult>>
        + Send
        + Sync,
>;
type CustomFix = Box<dyn Fn(&str, &RuleContext<'_>) -> RuleResult<String> + Send + Sync>;

/// A caller-supplied rule built from closures.
///
/// ```
/// use validate_email_html::rules::{Category, CustomRule, RuleMeta, Severity, ValidationResult};
///
/// let rule = CustomRule::new(
///     RuleMeta::new("no-marquee", "No marquee", Severity::Error, Category::Structure),
///     |html, _ctx, meta| {
///         Ok(html
///             .contains("<marquee")
///             .then(|| ValidationResult::new(meta, "marquee is not allowed"))
///             .into_iter()
///             .collect())
///     },
/// );
/// assert_eq!(rule.meta().name, "no-marquee");
/// ```
pub struct CustomRule {
    meta: RuleMeta,
    check: CustomCheck,
    tree_check: Option<CustomTreeCheck>,
    fix: Option<CustomFix>,
}

impl CustomRule {
    pub fn new<F>(meta: RuleMeta, check: F) -> Self
    where
        F: Fn(&str, &RuleContext<'_>, &RuleMeta) -> RuleResult<Vec<ValidationResult>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            meta,
            check: Box::new(check),
            tree_check: None,
            fix: None,
        }
    }

    pub fn with_tree_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&str, &RuleContext<'_>, &RuleMeta, &mut TraversalIndex<'_>) -> RuleResult<Vec<ValidationResult>>
            + Send
            + Sync
            + 'static,
    {
        self.tree_check = Some(Box::new(check));
        self
    }

    pub fn with_autofix<F>(mut self, fix: F) -> Self
    where
        F: Fn(&str, &RuleContext<'_>) -> RuleResult<String> + Send + Sync + 'static,
    {
        self.meta.auto_fix_available = true;
        self.fix = Some(Box::new(fix));
        self
    }

    pub fn meta(&self) -> &RuleMeta {
        &self.meta
    }
}

impl Rule for CustomRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn check(&self, html: &str, ctx: &RuleContext<'_>) -> RuleResult<Vec<ValidationResult>> {
        (self.check)(html, ctx, &self.meta)
    }

    fn uses_ast(&self) -> bool {
        self.tree_check.is_some()
    }

    fn check_with_ast(
        &self,
        html: &str,
        ctx: &RuleContext<'_>,
        index: &mut TraversalIndex<'_>,
    ) -> RuleResult<Vec<ValidationResult>> {
        match &self.tree_check {
            Some(check) => check(html, ctx, &self.meta, index),
            None => self.check(html, ctx),
        }
    }

    fn autofix(&self, html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
        match &self.fix {
            Some(fix) => fix(html, ctx),
            None => Ok(html.to_owned()),
        }
    }
}

/// Effective view of a registered rule, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub severity: Severity,
    pub category: Category,
    pub enabled: bool,
    pub auto_fix_available: bool,
    pub custom: bool,
}

/// Built-in and custom rules, each kept in registration order.
///
/// A name lives in at most one of the two sets: adding a custom rule under
/// a built-in name replaces the built-in.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    builtin: Vec<Arc<dyn Rule>>,
    custom: Vec<Arc<dyn Rule>>,
}

fn replace_or_push(rules: &mut Vec<Arc<dyn Rule>>, rule: Arc<dyn Rule>) {
    match rules.iter_mut().find(|existing| existing.name() == rule.name()) {
        Some(slot) => *slot = rule,
        None => rules.push(rule),
    }
}

impl RuleRegistry {
    pub fn with_builtin_rules() -> Self {
        let mut registry = Self::default();
        for rule in builtin_rules() {
            registry.insert_builtin(rule);
        }
        registry
    }

    pub fn insert_builtin(&mut self, rule: Arc<dyn Rule>) {
        self.custom.retain(|existing| existing.name() != rule.name());
        replace_or_push(&mut self.builtin, rule);
    }

    pub fn add_custom(&mut self, rule: Arc<dyn Rule>) {
        self.builtin.retain(|existing| existing.name() != rule.name());
        replace_or_push(&mut self.custom, rule);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Rule>> {
        self.builtin
            .iter()
            .chain(self.custom.iter())
            .find(|rule| rule.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_custom(&self, name: &str) -> bool {
        self.custom.iter().any(|rule| rule.name() == name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.len();
        self.builtin.retain(|rule| rule.name() != name);
        self.custom.retain(|rule| rule.name() != name);
        self.len() != before
    }

    /// Built-in rules then custom rules, each in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Rule>> {
        self.builtin.iter().chain(self.custom.iter())
    }

    pub fn builtin(&self) -> &[Arc<dyn Rule>] {
        &self.builtin
    }

    pub fn custom(&self) -> &[Arc<dyn Rule>] {
        &self.custom
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty() && self.custom.is_empty()
    }

    pub fn clear(&mut self) {
        self.builtin.clear();
        self.custom.clear();
    }
}

/// Every built-in rule in registration order.
pub fn builtin_rules() -> Vec<Arc<dyn Rule>> {
    structure::rules()
        .into_iter()
        .chain(accessibility::rules())
        .chain(compatibility::rules())
        .chain(performance::rules())
        .chain(best_practice::rules())
        .map(BuiltinRule::into_rule)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_rule(name: &str, category: Category) -> Arc<dyn Rule> {
        Arc::new(CustomRule::new(
            RuleMeta::new(name, name, Severity::Warning, category),
            |_, _, _| Ok(Vec::new()),
        ))
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error.is_at_least(Severity::Warning));
        assert!(Severity::Warning.is_at_least(Severity::Warning));
        assert!(!Severity::Info.is_at_least(Severity::Warning));
        assert_eq!("WARN".parse::<Severity>(), Ok(Severity::Warning));
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn test_category_round_trip_names() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
        assert_eq!(
            serde_json::to_string(&Category::BestPractice).unwrap(),
            "\"best-practice\""
        );
    }

    #[test]
    fn test_builtin_names_are_unique() {
        let registry = RuleRegistry::with_builtin_rules();
        let mut names: Vec<_> = registry.iter().map(|r| r.name().to_string()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 26);
    }

    #[test]
    fn test_custom_rule_shadows_builtin() {
        let mut registry = RuleRegistry::with_builtin_rules();
        let before = registry.len();
        registry.add_custom(ok_rule("no-heading-tags", Category::Structure));

        assert_eq!(registry.len(), before);
        assert!(registry.is_custom("no-heading-tags"));
        assert!(!registry.builtin().iter().any(|r| r.name() == "no-heading-tags"));
    }

    #[test]
    fn test_last_registration_wins_in_place() {
        let mut registry = RuleRegistry::default();
        registry.add_custom(ok_rule("a", Category::Structure));
        registry.add_custom(ok_rule("b", Category::Structure));
        registry.add_custom(ok_rule("a", Category::Performance));

        let names: Vec<_> = registry.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(
            registry.get("a").map(|r| r.meta().category),
            Some(Category::Performance)
        );
    }

    #[test]
    fn test_remove_rule() {
        let mut registry = RuleRegistry::with_builtin_rules();
        assert!(registry.remove("html-size"));
        assert!(!registry.remove("html-size"));
        assert!(registry.get("html-size").is_none());
    }

    #[test]
    fn test_validation_result_builder() {
        let meta = RuleMeta::new("r", "R", Severity::Info, Category::BestPractice).fixable();
        let result = ValidationResult::new(&meta, "msg")
            .at_offset("ab\ncd", 4)
            .suggestion("do it");
        assert_eq!(result.line, Some(2));
        assert_eq!(result.column, Some(2));
        assert!(result.auto_fix_available);
        assert_eq!(result.suggestion.as_deref(), Some("do it"));
    }

    #[test]
    fn test_tree_rule_falls_back_to_own_parse() {
        let config = EngineConfig::default();
        let patterns = PatternCache::default();
        let ctx = RuleContext::new(&config, &patterns);
        let registry = RuleRegistry::with_builtin_rules();
        let rule = registry.get("link-text").unwrap();

        assert!(rule.uses_ast());
        let results = rule.check(r#"<a href="https://x.test"></a>"#, &ctx).unwrap();
        assert_eq!(results.len(), 1);
    }
}
