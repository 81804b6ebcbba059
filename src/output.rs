//! Rendering of batch results for the terminal.

use std::time::Duration;

use crate::batch::{BatchResults, FileValidationResult, ValidationStatus};
use crate::cli::{OutputFormat, VerbosityLevel};
use crate::rules::{Severity, ValidationResult};

/// Formats batch results as human text, JSON or a short summary
pub struct Output {
    format: OutputFormat,
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    /// Colours are used when stdout is a terminal.
    pub fn new(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn render(&self, results: &BatchResults) -> serde_json::Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(results),
            OutputFormat::Summary => Ok(self.format_summary(results)),
            OutputFormat::Human => Ok(self.format_results(results)),
        }
    }

    pub fn format_results(&self, results: &BatchResults) -> String {
        let mut output = String::new();

        for file_result in &results.file_results {
            if self.verbosity == VerbosityLevel::Quiet && file_result.status.is_valid() {
                continue;
            }
            output.push_str(&self.format_file_result(file_result));
            output.push('\n');
        }

        match self.verbosity {
            VerbosityLevel::Quiet => {
                if results.has_errors() {
                    output.push_str(&format!(
                        "Errors: {} Invalid: {}\n",
                        results.error_files, results.invalid_files
                    ));
                }
            }
            VerbosityLevel::Normal | VerbosityLevel::Verbose => {
                if !results.file_results.is_empty() {
                    output.push('\n');
                }
                output.push_str(&self.format_summary(results));
            }
        }

        output
    }

    pub fn format_file_result(&self, result: &FileValidationResult) -> String {
        let path_display = result.path.display();
        let duration_str = format_duration(result.duration);
        let score = result
            .report
            .as_ref()
            .map(|r| format!(", score {}", r.score))
            .unwrap_or_default();

        let mut output = match &result.status {
            ValidationStatus::Valid => format!(
                "{}  {} ({}{})",
                self.colorize("✓ VALID", "32"),
                path_display,
                duration_str,
                score
            ),
            ValidationStatus::Invalid { errors, warnings } => format!(
                "{}  {} ({}{}) - {} error{}, {} warning{}",
                self.colorize("✗ INVALID", "31"),
                path_display,
                duration_str,
                score,
                errors,
                plural(*errors),
                warnings,
                plural(*warnings)
            ),
            ValidationStatus::Error { message } => format!(
                "{}  {} ({}) - {}",
                self.colorize("⚠ ERROR", "33"),
                path_display,
                duration_str,
                message
            ),
        };

        if !result.fixed.is_empty() {
            let target = result
                .written_to
                .as_ref()
                .map(|p| format!(" -> {}", p.display()))
                .unwrap_or_default();
            output.push_str(&format!("\n    fixed: {}{}", result.fixed.join(", "), target));
        }

        if let Some(report) = &result.report {
            for issue in report.issues() {
                if self.shows(issue) {
                    output.push_str(&format!("\n    {}", self.format_issue(issue)));
                }
            }
        }

        if self.verbosity == VerbosityLevel::Verbose
            && let Some(compat) = &result.compatibility
        {
            for (client, entry) in compat {
                let mark = if entry.compatible {
                    self.colorize("ok", "32")
                } else {
                    self.colorize("issues", "33")
                };
                output.push_str(&format!("\n    {}: {}", client.display_name(), mark));
                for issue in &entry.issues {
                    output.push_str(&format!("\n      - {}", issue));
                }
            }
        }

        output
    }

    /// Errors always; warnings unless quiet; suggestions only when verbose.
    fn shows(&self, issue: &ValidationResult) -> bool {
        match issue.severity {
            Severity::Error => true,
            Severity::Warning => self.verbosity >= VerbosityLevel::Normal,
            Severity::Info => self.verbosity >= VerbosityLevel::Verbose,
        }
    }

    fn format_issue(&self, issue: &ValidationResult) -> String {
        let label = match issue.severity {
            Severity::Error => self.colorize("error", "31"),
            Severity::Warning => self.colorize("warning", "33"),
            Severity::Info => self.colorize("info", "36"),
        };
        let location = match (issue.line, issue.column) {
            (Some(line), Some(column)) => format!("{}:{} ", line, column),
            _ => String::new(),
        };

        let mut text = format!("{}{} [{}] {}", location, label, issue.rule, issue.message);
        if self.verbosity == VerbosityLevel::Verbose
            && let Some(suggestion) = &issue.suggestion
        {
            text.push_str(&format!(" ({})", suggestion));
        }
        text
    }

    fn format_summary(&self, results: &BatchResults) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Total files: {}\n", results.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Valid:", "32"),
            results.valid_files
        ));

        if results.invalid_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Invalid:", "31"),
                results.invalid_files
            ));
        }
        if results.error_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "33"),
                results.error_files
            ));
        }
        if results.fixed_files > 0 {
            output.push_str(&format!("  Fixed: {}\n", results.fixed_files));
        }
        if let Some(score) = results.average_score {
            output.push_str(&format!("  Average score: {:.1}\n", score));
        }

        output.push_str(&format!("  Success rate: {:.1}%\n", results.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));
        if self.verbosity == VerbosityLevel::Verbose {
            output.push_str(&format!(
                "  Average per file: {}\n",
                format_duration(results.average_duration)
            ));
        }

        output
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
