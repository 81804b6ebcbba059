use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::ScoringConfig;
use crate::rules::{Category, Severity, ValidationResult};

/// Outcome of validating one HTML document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationResult>,
    pub warnings: Vec<ValidationResult>,
    /// Info-level findings
    pub suggestions: Vec<ValidationResult>,
    /// Findings per category; every category is present
    pub category_counts: BTreeMap<Category, usize>,
    pub auto_fix_available: bool,
    pub total_issues: usize,
    /// 0 to 100
    pub score: u32,
}

/// Score after applying the penalties for the given counts.
pub fn score(errors: usize, warnings: usize, infos: usize, scoring: &ScoringConfig) -> u32 {
    let penalty = errors as f64 * scoring.error_penalty
        + warnings as f64 * scoring.warning_penalty
        + infos as f64 * scoring.info_penalty;
    let penalty = penalty.min(scoring.max_penalty);
    (100.0 - penalty).max(0.0).round() as u32
}

impl EmailValidationReport {
    pub fn from_results(
        results: Vec<ValidationResult>,
        scoring: &ScoringConfig,
        strict_mode: bool,
    ) -> Self {
        let mut category_counts: BTreeMap<Category, usize> =
            Category::ALL.into_iter().map(|c| (c, 0)).collect();
        let auto_fix_available = results.iter().any(|r| r.auto_fix_available);

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();
        for result in results {
            *category_counts.entry(result.category).or_insert(0) += 1;
            match result.severity {
                Severity::Error => errors.push(result),
                Severity::Warning => warnings.push(result),
                Severity::Info => suggestions.push(result),
            }
        }

        let is_valid = errors.is_empty() && (!strict_mode || warnings.is_empty());
        let score = score(errors.len(), warnings.len(), suggestions.len(), scoring);

        Self {
            is_valid,
            total_issues: errors.len() + warnings.len() + suggestions.len(),
            errors,
            warnings,
            suggestions,
            category_counts,
            auto_fix_available,
            score,
        }
    }

    /// Report for input that was refused before any rule ran.
    pub fn rejected(result: ValidationResult) -> Self {
        let mut category_counts: BTreeMap<Category, usize> =
            Category::ALL.into_iter().map(|c| (c, 0)).collect();
        category_counts.insert(result.category, 1);

        Self {
            is_valid: false,
            errors: vec![result],
            warnings: Vec::new(),
            suggestions: Vec::new(),
            category_counts,
            auto_fix_available: false,
            total_issues: 1,
            score: 0,
        }
    }

    /// All findings, errors first.
    pub fn issues(&self) -> impl Iterator<Item = &ValidationResult> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .chain(self.suggestions.iter())
    }
}
