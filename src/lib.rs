//! # validate-email-html Library
//!
//! Validation and automatic repair of HTML email markup for the constraints
//! of real email clients (Outlook, Gmail, Apple Mail, Thunderbird, mobile).
//!
//! [`ValidationEngine`] runs a registry of rules over a tolerant structural
//! parse and produces a scored [`EmailValidationReport`]. Rules with a
//! rewrite can repair the markup through the autofix passes, which discard
//! any rewrite that would damage the document.

pub mod autofix;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod compatibility;
pub mod config;
pub mod error;
pub mod file_discovery;
pub mod output;
pub mod parser;
pub mod report;
pub mod rules;
pub mod traversal;
pub mod validator;

pub use autofix::{FixOutcome, FixRecord};
pub use batch::{BatchOptions, BatchResults, BatchValidator, FileValidationResult, ValidationStatus};
pub use cache::CacheStats;
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use compatibility::{ClientCompatibility, CompatibilityReport, EmailClient};
pub use config::{Config, ConfigManager, ConfigPatch, EngineConfig};
pub use error::{ConfigError, EngineError, RuleError};
pub use file_discovery::FileDiscovery;
pub use output::Output;
pub use report::EmailValidationReport;
pub use rules::{Category, CustomRule, Rule, RuleInfo, RuleMeta, Severity, ValidationResult};
pub use validator::{EngineStats, ValidationEngine};
