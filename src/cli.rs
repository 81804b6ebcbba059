use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compatibility::EmailClient;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Per-file findings with colour on terminals
    #[default]
    Human,
    /// Machine-readable JSON document
    Json,
    /// Totals only
    Summary,
}

/// Validate HTML email markup against email-client compatibility rules
#[derive(Parser, Debug, Clone)]
#[command(name = "validate-email-html")]
#[command(about = "Validate and repair HTML email markup for email-client compatibility")]
#[command(version)]
pub struct Cli {
    /// Files or directories to validate
    #[arg(required = true, help = "HTML files or directories to validate")]
    pub paths: Vec<PathBuf>,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Show every finding with suggestions")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Only report invalid files",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Treat warnings as failures
    #[arg(long = "strict")]
    pub strict: bool,

    /// Rewrite files with every available autofix
    #[arg(long = "fix")]
    pub fix: bool,

    /// Write fixed files here instead of in place
    #[arg(long = "out-dir", requires = "fix")]
    pub out_dir: Option<PathBuf>,

    /// Include the per-client compatibility report
    #[arg(long = "compat")]
    pub compat: bool,

    /// Number of files validated concurrently
    #[arg(
        short = 't',
        long = "threads",
        help = "Number of files validated concurrently"
    )]
    pub threads: Option<usize>,

    /// File extensions to process (comma-separated)
    #[arg(
        short = 'e',
        long = "extensions",
        help = "File extensions to process (e.g., 'html,htm')"
    )]
    pub extensions: Option<String>,

    /// Include file patterns (glob syntax)
    #[arg(long = "include", action = clap::ArgAction::Append)]
    pub include_patterns: Vec<String>,

    /// Exclude file patterns (glob syntax)
    #[arg(long = "exclude", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Maximum HTML size in bytes accepted for validation
    #[arg(long = "max-html-size")]
    pub max_html_size: Option<usize>,

    /// Target clients (comma-separated: outlook,gmail,apple-mail,thunderbird,mobile)
    #[arg(long = "clients")]
    pub clients: Option<String>,

    /// Disable a rule by name
    #[arg(long = "disable-rule", action = clap::ArgAction::Append)]
    pub disabled_rules: Vec<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn get_extensions(&self) -> Option<Vec<String>> {
        self.extensions.as_ref().map(|extensions| {
            extensions
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    pub fn get_clients(&self) -> Result<Option<Vec<EmailClient>>, String> {
        self.clients
            .as_deref()
            .map(EmailClient::parse_list)
            .transpose()
    }

    pub fn validate(&self) -> Result<(), String> {
        for path in &self.paths {
            if !path.exists() {
                return Err(format!("Path does not exist: {}", path.display()));
            }
        }
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        self.get_clients()?;
        Ok(())
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}
