use std::path::PathBuf;

use thiserror::Error;

/// Main engine error type.
///
/// Bad markup is never an error: it always produces a report or a best-effort
/// rewrite. These variants cover lifecycle, configuration and I/O failures.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine has been disposed")]
    Disposed,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File too large: {path} is {size} bytes (limit {limit} bytes)")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Invalid encoding: {path} is not valid UTF-8")]
    InvalidEncoding { path: PathBuf },

    #[error("File discovery error: {path} - {reason}")]
    Discovery { path: PathBuf, reason: String },

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

/// Configuration-specific error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

/// Failures raised from inside a single rule's check or rewrite.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule failed: {0}")]
    Failed(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Rule result type alias
pub type RuleResult<T> = std::result::Result<T, RuleError>;
