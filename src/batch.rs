//! Concurrent validation of many files with one shared engine.
//!
//! Reading and writing go through `tokio::fs`. Validation itself is synchronous
//! and runs inside the spawned task; a semaphore bounds how many files are in
//! flight at once.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::compatibility::CompatibilityReport;
use crate::error::{EngineError, Result};
use crate::report::EmailValidationReport;
use crate::validator::ValidationEngine;

/// What to do with each file besides validating it
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Number of files processed concurrently
    pub concurrency: usize,
    /// Apply autofix and write the result
    pub fix: bool,
    /// Write fixed files here instead of in place
    pub out_dir: Option<PathBuf>,
    /// Attach a per-client compatibility report
    pub compat: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            fix: false,
            out_dir: None,
            compat: false,
        }
    }
}

/// Status of a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ValidationStatus {
    Valid,
    Invalid { errors: usize, warnings: usize },
    /// The file could not be read or validated
    Error { message: String },
}

impl ValidationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationStatus::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationStatus::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationStatus::Error { .. })
    }
}

/// Result of processing one file
#[derive(Debug, Clone, Serialize)]
pub struct FileValidationResult {
    pub path: PathBuf,
    pub status: ValidationStatus,
    /// Absent when the file failed to load
    pub report: Option<EmailValidationReport>,
    /// Rules whose rewrite changed the file
    pub fixed: Vec<String>,
    /// Where the fixed markup was written
    pub written_to: Option<PathBuf>,
    pub compatibility: Option<CompatibilityReport>,
    pub duration: Duration,
}

impl FileValidationResult {
    fn from_report(path: PathBuf, report: EmailValidationReport, duration: Duration) -> Self {
        let status = if report.is_valid {
            ValidationStatus::Valid
        } else {
            ValidationStatus::Invalid {
                errors: report.errors.len(),
                warnings: report.warnings.len(),
            }
        };
        Self {
            path,
            status,
            report: Some(report),
            fixed: Vec::new(),
            written_to: None,
            compatibility: None,
            duration,
        }
    }

    pub fn error(path: PathBuf, error: &EngineError, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Error {
                message: error.to_string(),
            },
            report: None,
            fixed: Vec::new(),
            written_to: None,
            compatibility: None,
            duration,
        }
    }
}

/// Aggregated results of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchResults {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub error_files: usize,
    /// Files rewritten by autofix
    pub fixed_files: usize,
    pub total_duration: Duration,
    pub average_duration: Duration,
    /// Mean score over files that produced a report
    pub average_score: Option<f64>,
    pub file_results: Vec<FileValidationResult>,
}

impl BatchResults {
    pub fn aggregate(file_results: Vec<FileValidationResult>) -> Self {
        let total_files = file_results.len();
        let mut valid_files = 0;
        let mut invalid_files = 0;
        let mut error_files = 0;
        let mut total_duration = Duration::ZERO;
        let mut scores = Vec::new();

        for result in &file_results {
            match result.status {
                ValidationStatus::Valid => valid_files += 1,
                ValidationStatus::Invalid { .. } => invalid_files += 1,
                ValidationStatus::Error { .. } => error_files += 1,
            }
            total_duration += result.duration;
            if let Some(report) = &result.report {
                scores.push(f64::from(report.score));
            }
        }

        let average_duration = if total_files > 0 {
            total_duration / total_files as u32
        } else {
            Duration::ZERO
        };
        let average_score =
            (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

        Self {
            total_files,
            valid_files,
            invalid_files,
            error_files,
            fixed_files: file_results.iter().filter(|r| !r.fixed.is_empty()).count(),
            total_duration,
            average_duration,
            average_score,
            file_results,
        }
    }

    pub fn all_valid(&self) -> bool {
        self.valid_files == self.total_files && self.total_files > 0
    }

    pub fn has_errors(&self) -> bool {
        self.error_files > 0 || self.invalid_files > 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.valid_files as f64 / self.total_files as f64) * 100.0
        }
    }
}

/// Destination for a fixed copy of `path` under `out_dir`.
///
/// The relative layout is kept so files with the same name in different
/// directories do not overwrite each other.
pub fn output_path(path: &Path, out_dir: &Path) -> PathBuf {
    let relative: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    out_dir.join(relative)
}

/// Runs a shared [`ValidationEngine`] over many files
pub struct BatchValidator {
    engine: Arc<ValidationEngine>,
    options: BatchOptions,
}

impl BatchValidator {
    pub fn new(engine: Arc<ValidationEngine>, options: BatchOptions) -> Self {
        Self { engine, options }
    }

    pub fn engine(&self) -> &Arc<ValidationEngine> {
        &self.engine
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Process every file; results come back in input order.
    pub async fn validate_files(&self, files: Vec<PathBuf>) -> Result<Vec<FileValidationResult>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));

        let tasks: Vec<_> = files
            .into_iter()
            .map(|path| {
                let engine = Arc::clone(&self.engine);
                let options = self.options.clone();
                let semaphore = Arc::clone(&semaphore);

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.map_err(|_| {
                        EngineError::Concurrency {
                            details: "validation semaphore closed".to_string(),
                        }
                    })?;

                    let start = Instant::now();
                    let result = match Self::process_file(&engine, &options, &path).await {
                        Ok(mut result) => {
                            result.duration = start.elapsed();
                            result
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "file not validated");
                            FileValidationResult::error(path, &e, start.elapsed())
                        }
                    };

                    Ok::<FileValidationResult, EngineError>(result)
                })
            })
            .collect();

        let joined = try_join_all(tasks)
            .await
            .map_err(|e| EngineError::Concurrency {
                details: format!("Task join error: {}", e),
            })?;

        joined.into_iter().collect()
    }

    /// Process files and aggregate the outcome.
    pub async fn run(&self, files: Vec<PathBuf>) -> Result<BatchResults> {
        Ok(BatchResults::aggregate(self.validate_files(files).await?))
    }

    /// Process a single file.
    pub async fn validate_file(&self, path: &Path) -> Result<FileValidationResult> {
        let start = Instant::now();
        let mut result = Self::process_file(&self.engine, &self.options, path).await?;
        result.duration = start.elapsed();
        Ok(result)
    }

    async fn process_file(
        engine: &ValidationEngine,
        options: &BatchOptions,
        path: &Path,
    ) -> Result<FileValidationResult> {
        let html = read_html(path, engine.get_config()?.max_file_size).await?;

        let mut fixed = Vec::new();
        let mut written_to = None;
        let mut html = html;
        if options.fix {
            let outcome = engine.auto_fix(&html)?;
            if outcome.changed() {
                let target = match &options.out_dir {
                    Some(dir) => output_path(path, dir),
                    None => path.to_path_buf(),
                };
                if let Some(parent) = target.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&target, &outcome.html).await?;
                debug!(path = %target.display(), rules = ?outcome.fixed, "wrote fixed file");

                fixed = outcome.fixed;
                written_to = Some(target);
                html = outcome.html;
            }
        }

        let report = engine.validate(&html)?;
        let mut result = FileValidationResult::from_report(path.to_path_buf(), report, Duration::ZERO);
        result.fixed = fixed;
        result.written_to = written_to;
        if options.compat {
            result.compatibility = Some(engine.get_compatibility_report(&html)?);
        }

        Ok(result)
    }
}

/// Read a file as UTF-8 after checking its size against `limit`.
pub async fn read_html(path: &Path, limit: u64) -> Result<String> {
    let metadata = fs::metadata(path).await?;
    if metadata.len() > limit {
        return Err(EngineError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit,
        });
    }

    let bytes = fs::read(path).await?;
    String::from_utf8(bytes).map_err(|_| EngineError::InvalidEncoding {
        path: path.to_path_buf(),
    })
}
