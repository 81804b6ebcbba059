//! Iterative rewriting of markup by the fixable rules.
//!
//! A run applies an ordered sequence of rule rewrites, pass after pass, until
//! a pass changes nothing or the pass budget is spent. Every single rewrite
//! is checked for structural damage and discarded if it made the markup
//! worse; a pass that grows the document past the growth limit ends the run.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::cache::{EvictionPolicy, PatternFlags, ScoredCache, lock};
use crate::config::EngineConfig;
use crate::parser::VOID_TAGS;
use crate::rules::{Rule, RuleContext, RuleRegistry};

/// Built-in rules whose rewrites run first, in this order. Later rewrites
/// rely on earlier ones: tags are converted before attributes are tidied,
/// and empty elements are only removed once everything else is settled.
pub const FIX_ORDER: &[&str] = &[
    "no-dangerous-tags",
    "no-heading-tags",
    "no-paragraph-tags",
    "no-block-tags",
    "tag-format",
    "malformed-attributes",
    "javascript-urls",
    "link-attributes",
    "image-alt-text",
    "image-attributes",
    "table-attributes",
    "duplicate-styles",
    "table-nesting",
    "empty-elements",
];

/// Token sequences an accepted rewrite never contains.
const BROKEN_TOKENS: &[&str] = &["<<", ">>", "<//", "//>"];

const TAG_PATTERN: &str = r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^<>]*?(/?)>";

/// Rewritten markup and the rules that changed it, in first-application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixOutcome {
    pub html: String,
    pub fixed: Vec<String>,
}

impl FixOutcome {
    fn unchanged(html: &str) -> Self {
        Self {
            html: html.to_owned(),
            fixed: Vec::new(),
        }
    }

    pub fn changed(&self) -> bool {
        !self.fixed.is_empty()
    }
}

/// One entry of the fix history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixRecord {
    /// `<input length>:<applied rules joined by ,>`
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub pass_count: usize,
    /// False when the run was cut short by the growth limit
    pub success: bool,
    /// Number of runs recorded under this key
    pub occurrences: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixStats {
    pub runs: u64,
    pub fixes_applied: u64,
    pub rewrites_rejected: u64,
}

/// Fixable rules in run order: [`FIX_ORDER`], then the other built-ins
/// alphabetically, then custom rules alphabetically. Only rules that are
/// enabled and accepted by `include` are returned.
pub fn fix_sequence(
    registry: &RuleRegistry,
    config: &EngineConfig,
    include: impl Fn(&dyn Rule) -> bool,
) -> Vec<Arc<dyn Rule>> {
    let eligible = |rule: &Arc<dyn Rule>| {
        rule.has_autofix() && config.rule_enabled(rule.meta()) && include(rule.as_ref())
    };

    let mut sequence: Vec<Arc<dyn Rule>> = FIX_ORDER
        .iter()
        .filter_map(|name| registry.builtin().iter().find(|rule| rule.name() == *name))
        .filter(|rule| eligible(rule))
        .cloned()
        .collect();

    let mut remaining: Vec<&Arc<dyn Rule>> = registry
        .builtin()
        .iter()
        .filter(|rule| !FIX_ORDER.contains(&rule.name()))
        .filter(|rule| eligible(rule))
        .collect();
    remaining.sort_by(|a, b| a.name().cmp(b.name()));
    sequence.extend(remaining.into_iter().cloned());

    let mut custom: Vec<&Arc<dyn Rule>> = registry
        .custom()
        .iter()
        .filter(|rule| eligible(rule))
        .collect();
    custom.sort_by(|a, b| a.name().cmp(b.name()));
    sequence.extend(custom.into_iter().cloned());

    sequence
}

/// Sum over paired tags of the difference between opening and closing counts.
fn tag_imbalance(html: &str, ctx: &RuleContext<'_>) -> Option<usize> {
    let tags = ctx
        .pattern_with(TAG_PATTERN, PatternFlags::NONE)
        .ok()?;
    let mut balance: HashMap<String, i64> = HashMap::new();

    for caps in tags.captures_iter(html) {
        let name = caps[2].to_ascii_lowercase();
        let closing = !caps[1].is_empty();
        let self_closed = !caps[3].is_empty();
        if VOID_TAGS.contains(&name.as_str()) || (self_closed && !closing) {
            continue;
        }
        *balance.entry(name).or_insert(0) += if closing { -1 } else { 1 };
    }

    Some(balance.values().map(|n| n.unsigned_abs() as usize).sum())
}

/// Whether `after` is safe to keep: it contains none of the
/// [`BROKEN_TOKENS`] and leaves paired tags no less balanced than `before`.
pub fn is_structurally_sound(before: &str, after: &str, ctx: &RuleContext<'_>) -> bool {
    if BROKEN_TOKENS.iter().any(|token| after.contains(token)) {
        return false;
    }

    match (tag_imbalance(before, ctx), tag_imbalance(after, ctx)) {
        (Some(before), Some(after)) => after <= before,
        _ => false,
    }
}

/// Runs rewrites and remembers what it did.
pub struct AutofixEngine {
    history: Mutex<ScoredCache<String, FixRecord>>,
    runs: AtomicU64,
    fixes_applied: AtomicU64,
    rewrites_rejected: AtomicU64,
}

impl AutofixEngine {
    pub fn new(history_policy: EvictionPolicy) -> Self {
        Self {
            history: Mutex::new(ScoredCache::new(history_policy)),
            runs: AtomicU64::new(0),
            fixes_applied: AtomicU64::new(0),
            rewrites_rejected: AtomicU64::new(0),
        }
    }

    /// Apply one rule's rewrite. `None` when the rule is disabled or not
    /// fixable, changed nothing, failed, or damaged the markup.
    pub fn apply_single_fix(
        &self,
        html: &str,
        rule: &dyn Rule,
        ctx: &RuleContext<'_>,
    ) -> Option<String> {
        if !rule.has_autofix() || !ctx.config.rule_enabled(rule.meta()) {
            return None;
        }

        let rewritten = match panic::catch_unwind(AssertUnwindSafe(|| rule.autofix(html, ctx))) {
            Ok(Ok(rewritten)) => rewritten,
            Ok(Err(e)) => {
                debug!(rule = rule.name(), error = %e, "rewrite failed");
                return None;
            }
            Err(_) => {
                debug!(rule = rule.name(), "rewrite panicked");
                return None;
            }
        };

        if rewritten == html {
            return None;
        }
        if !is_structurally_sound(html, &rewritten, ctx) {
            self.rewrites_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(rule = rule.name(), "discarded rewrite that damaged the markup");
            return None;
        }
        Some(rewritten)
    }

    /// Apply `rules` in order, pass after pass, within the configured bounds.
    pub fn run(&self, html: &str, rules: &[Arc<dyn Rule>], ctx: &RuleContext<'_>) -> FixOutcome {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let config = &ctx.config.autofix;

        if html.trim().is_empty() || html.len() > ctx.config.max_html_size || rules.is_empty() {
            return FixOutcome::unchanged(html);
        }

        let growth_ceiling = ((html.len() as f64 * config.growth_limit) as usize)
            .max(html.len() + config.growth_allowance_bytes);

        let mut current = html.to_owned();
        let mut fixed: Vec<String> = Vec::new();
        let mut passes = 0;
        let mut success = true;

        for pass in 1..=config.max_passes {
            passes = pass;
            let mut candidate = current.clone();
            let mut changed: Vec<&str> = Vec::new();

            for rule in rules {
                let Some(rewritten) = self.apply_single_fix(&candidate, rule.as_ref(), ctx) else {
                    continue;
                };
                if rewritten.len() > growth_ceiling {
                    debug!(
                        pass,
                        rule = rule.name(),
                        length = rewritten.len(),
                        ceiling = growth_ceiling,
                        "rewrite grew past the limit, skipping it"
                    );
                    success = false;
                    continue;
                }
                candidate = rewritten;
                changed.push(rule.name());
            }

            if changed.is_empty() {
                break;
            }

            debug!(pass, changes = changed.len(), "autofix pass complete");
            current = candidate;
            for name in changed {
                if !fixed.iter().any(|f| f == name) {
                    fixed.push(name.to_string());
                }
            }
        }

        self.fixes_applied
            .fetch_add(fixed.len() as u64, Ordering::Relaxed);
        self.record(html.len(), &fixed, passes, success);

        FixOutcome {
            html: current,
            fixed,
        }
    }

    fn record(&self, input_len: usize, fixed: &[String], pass_count: usize, success: bool) {
        let key = format!("{}:{}", input_len, fixed.join(","));
        let timestamp = Utc::now();
        lock(&self.history).upsert(
            key.clone(),
            |record| {
                record.timestamp = timestamp;
                record.pass_count = pass_count;
                record.success = success;
                record.occurrences += 1;
            },
            || FixRecord {
                key,
                timestamp,
                pass_count,
                success,
                occurrences: 1,
            },
        );
    }

    /// History entries, most recent first.
    pub fn history(&self) -> Vec<FixRecord> {
        let mut records: Vec<FixRecord> = lock(&self.history).values().cloned().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.key.cmp(&b.key)));
        records
    }

    pub fn history_len(&self) -> usize {
        lock(&self.history).len()
    }

    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    pub fn set_history_policy(&self, policy: EvictionPolicy) {
        lock(&self.history).set_policy(policy);
    }

    pub fn stats(&self) -> FixStats {
        FixStats {
            runs: self.runs.load(Ordering::Relaxed),
            fixes_applied: self.fixes_applied.load(Ordering::Relaxed),
            rewrites_rejected: self.rewrites_rejected.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.runs.store(0, Ordering::Relaxed);
        self.fixes_applied.store(0, Ordering::Relaxed);
        self.rewrites_rejected.store(0, Ordering::Relaxed);
    }
}
