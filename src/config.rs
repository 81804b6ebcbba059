use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::EvictionPolicy;
use crate::cli::{Cli, OutputFormat};
use crate::compatibility::EmailClient;
use crate::error::{ConfigError, ConfigResult as Result};
use crate::parser::ParserLimits;
use crate::rules::{Category, RuleMeta, Severity};

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Per-rule override. Unset fields keep the rule's own default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub enabled: Option<bool>,
    pub severity: Option<Severity>,
}

/// Email clients the markup is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetClients {
    pub outlook: bool,
    pub gmail: bool,
    pub apple_mail: bool,
    pub thunderbird: bool,
    pub mobile: bool,
}

impl Default for TargetClients {
    fn default() -> Self {
        Self {
            outlook: true,
            gmail: true,
            apple_mail: true,
            thunderbird: true,
            mobile: true,
        }
    }
}

impl TargetClients {
    pub fn targets(&self, client: EmailClient) -> bool {
        match client {
            EmailClient::Outlook => self.outlook,
            EmailClient::Gmail => self.gmail,
            EmailClient::AppleMail => self.apple_mail,
            EmailClient::Thunderbird => self.thunderbird,
            EmailClient::Mobile => self.mobile,
        }
    }

    pub fn set(&mut self, client: EmailClient, enabled: bool) {
        let slot = match client {
            EmailClient::Outlook => &mut self.outlook,
            EmailClient::Gmail => &mut self.gmail,
            EmailClient::AppleMail => &mut self.apple_mail,
            EmailClient::Thunderbird => &mut self.thunderbird,
            EmailClient::Mobile => &mut self.mobile,
        };
        *slot = enabled;
    }

    /// Target exactly `clients`.
    pub fn only(&mut self, clients: &[EmailClient]) {
        for client in EmailClient::ALL {
            self.set(client, clients.contains(&client));
        }
    }

    pub fn enabled(&self) -> Vec<EmailClient> {
        EmailClient::ALL
            .into_iter()
            .filter(|client| self.targets(*client))
            .collect()
    }
}

/// Score penalties per finding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub error_penalty: f64,
    pub warning_penalty: f64,
    pub info_penalty: f64,
    /// Ceiling on the summed penalty
    pub max_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            error_penalty: 15.0,
            warning_penalty: 5.0,
            info_penalty: 1.0,
            max_penalty: 100.0,
        }
    }
}

/// Iterative rewrite bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofixConfig {
    /// Outer passes over the fix sequence
    pub max_passes: usize,
    /// Output may grow to this multiple of the input length
    pub growth_limit: f64,
    /// Absolute growth always allowed, so tiny inputs can gain attributes
    pub growth_allowance_bytes: usize,
    /// Fix history entries kept
    pub history_capacity: usize,
}

impl Default for AutofixConfig {
    fn default() -> Self {
        Self {
            max_passes: 5,
            growth_limit: 3.0,
            growth_allowance_bytes: 4096,
            history_capacity: 200,
        }
    }
}

/// In-memory cache sizing and eviction scoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of parsed trees kept
    pub ast_capacity: usize,
    /// Parsed tree time-to-live in seconds (0 disables expiry)
    pub ast_ttl_seconds: u64,
    /// Maximum number of compiled patterns kept
    pub pattern_capacity: usize,
    pub eviction_threshold: f64,
    pub evict_fraction: f64,
    pub access_weight: f64,
    pub age_weight: f64,
    pub sweep_interval_seconds: u64,
    /// Parsed trees and patterns idle for a whole sweep interval and scoring
    /// below this are dropped by the sweep
    pub min_entry_score: f64,
    /// Cap on the elements returned by one traversal query
    pub traversal_max_results: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ast_capacity: 100,
            ast_ttl_seconds: 300,
            pattern_capacity: 500,
            eviction_threshold: 0.9,
            evict_fraction: 0.25,
            access_weight: 1.0,
            age_weight: 0.01,
            sweep_interval_seconds: 60,
            min_entry_score: 0.0,
            traversal_max_results: 1000,
        }
    }
}

impl CacheConfig {
    fn policy(&self, capacity: usize) -> EvictionPolicy {
        EvictionPolicy {
            capacity,
            threshold: self.eviction_threshold,
            evict_fraction: self.evict_fraction,
            access_weight: self.access_weight,
            age_weight: self.age_weight,
            ttl: None,
            min_score: None,
            sweep_interval: Duration::from_secs(self.sweep_interval_seconds),
        }
    }

    pub fn ast_policy(&self) -> EvictionPolicy {
        let ttl = (self.ast_ttl_seconds > 0).then(|| Duration::from_secs(self.ast_ttl_seconds));
        self.policy(self.ast_capacity)
            .with_ttl(ttl)
            .with_min_score(Some(self.min_entry_score))
    }

    pub fn pattern_policy(&self) -> EvictionPolicy {
        self.policy(self.pattern_capacity)
            .with_min_score(Some(self.min_entry_score))
    }

    pub fn history_policy(&self, capacity: usize) -> EvictionPolicy {
        self.policy(capacity)
    }
}

/// Numeric limits used by individual rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    pub max_table_depth: usize,
    pub max_width_px: u32,
    pub gmail_clip_bytes: usize,
    pub min_font_size_px: u32,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            max_table_depth: 4,
            max_width_px: 600,
            gmail_clip_bytes: 102_400,
            min_font_size_px: 13,
        }
    }
}

/// Configuration of one validation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rules: BTreeMap<String, RuleConfig>,
    pub clients: TargetClients,
    /// Warnings also make a document invalid
    pub strict_mode: bool,
    /// Largest HTML string accepted by `validate`, in bytes
    pub max_html_size: usize,
    /// Largest file the CLI reads, in bytes
    pub max_file_size: u64,
    pub check_accessibility: bool,
    pub check_performance: bool,
    pub check_best_practices: bool,
    pub scoring: ScoringConfig,
    pub parser: ParserLimits,
    pub autofix: AutofixConfig,
    pub cache: CacheConfig,
    pub thresholds: RuleThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
            clients: TargetClients::default(),
            strict_mode: false,
            max_html_size: 512 * 1024,
            max_file_size: 5 * 1024 * 1024,
            check_accessibility: true,
            check_performance: true,
            check_best_practices: true,
            scoring: ScoringConfig::default(),
            parser: ParserLimits::default(),
            autofix: AutofixConfig::default(),
            cache: CacheConfig::default(),
            thresholds: RuleThresholds::default(),
        }
    }
}

/// Partial update of an [`EngineConfig`]. Rule overrides are merged per rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub rules: Option<BTreeMap<String, RuleConfig>>,
    pub clients: Option<TargetClients>,
    pub strict_mode: Option<bool>,
    pub max_html_size: Option<usize>,
    pub max_file_size: Option<u64>,
    pub check_accessibility: Option<bool>,
    pub check_performance: Option<bool>,
    pub check_best_practices: Option<bool>,
    pub scoring: Option<ScoringConfig>,
    pub parser: Option<ParserLimits>,
    pub autofix: Option<AutofixConfig>,
    pub cache: Option<CacheConfig>,
    pub thresholds: Option<RuleThresholds>,
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(invalid(format!("{} must be in (0, 1], got {}", name, value)))
    }
}

impl EngineConfig {
    pub fn rule(&self, name: &str) -> Option<&RuleConfig> {
        self.rules.get(name)
    }

    /// Rule enablement after overrides and category toggles.
    pub fn rule_enabled(&self, meta: &RuleMeta) -> bool {
        let enabled = self
            .rule(&meta.name)
            .and_then(|rule| rule.enabled)
            .unwrap_or(meta.enabled);
        enabled && self.category_enabled(meta.category)
    }

    pub fn rule_severity(&self, meta: &RuleMeta) -> Severity {
        self.rule(&meta.name)
            .and_then(|rule| rule.severity)
            .unwrap_or(meta.severity)
    }

    /// Whether rules of `category` run. Structure and compatibility always do.
    pub fn category_enabled(&self, category: Category) -> bool {
        match category {
            Category::Accessibility => self.check_accessibility,
            Category::Performance => self.check_performance,
            Category::BestPractice => self.check_best_practices,
            Category::Structure | Category::Compatibility => true,
        }
    }

    /// The configuration with `patch` applied. `self` is left untouched.
    pub fn patched(&self, patch: ConfigPatch) -> Self {
        let mut config = self.clone();
        if let Some(rules) = patch.rules {
            config.rules.extend(rules);
        }
        if let Some(clients) = patch.clients {
            config.clients = clients;
        }
        if let Some(strict_mode) = patch.strict_mode {
            config.strict_mode = strict_mode;
        }
        if let Some(max_html_size) = patch.max_html_size {
            config.max_html_size = max_html_size;
        }
        if let Some(max_file_size) = patch.max_file_size {
            config.max_file_size = max_file_size;
        }
        if let Some(check) = patch.check_accessibility {
            config.check_accessibility = check;
        }
        if let Some(check) = patch.check_performance {
            config.check_performance = check;
        }
        if let Some(check) = patch.check_best_practices {
            config.check_best_practices = check;
        }
        if let Some(scoring) = patch.scoring {
            config.scoring = scoring;
        }
        if let Some(parser) = patch.parser {
            config.parser = parser;
        }
        if let Some(autofix) = patch.autofix {
            config.autofix = autofix;
        }
        if let Some(cache) = patch.cache {
            config.cache = cache;
        }
        if let Some(thresholds) = patch.thresholds {
            config.thresholds = thresholds;
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_html_size == 0 {
            return Err(invalid("max_html_size must be greater than 0"));
        }
        if self.max_file_size == 0 {
            return Err(invalid("max_file_size must be greater than 0"));
        }

        let scoring = &self.scoring;
        if !(scoring.error_penalty > scoring.warning_penalty
            && scoring.warning_penalty > scoring.info_penalty
            && scoring.info_penalty >= 0.0)
        {
            return Err(invalid(
                "Scoring penalties must satisfy error > warning > info >= 0",
            ));
        }
        if scoring.max_penalty <= 0.0 {
            return Err(invalid("scoring.max_penalty must be greater than 0"));
        }

        if !(1..=50).contains(&self.autofix.max_passes) {
            return Err(invalid("autofix.max_passes must be between 1 and 50"));
        }
        if self.autofix.growth_limit <= 1.0 {
            return Err(invalid("autofix.growth_limit must be greater than 1"));
        }
        if self.autofix.history_capacity == 0 {
            return Err(invalid("autofix.history_capacity must be greater than 0"));
        }

        let cache = &self.cache;
        if cache.ast_capacity == 0 || cache.pattern_capacity == 0 {
            return Err(invalid("Cache capacities must be greater than 0"));
        }
        if cache.traversal_max_results == 0 {
            return Err(invalid("cache.traversal_max_results must be greater than 0"));
        }
        check_fraction("cache.eviction_threshold", cache.eviction_threshold)?;
        check_fraction("cache.evict_fraction", cache.evict_fraction)?;
        if !cache.min_entry_score.is_finite() {
            return Err(invalid("cache.min_entry_score must be a finite number"));
        }

        if self.parser.max_iterations == 0 || self.parser.max_attribute_iterations == 0 {
            return Err(invalid("Parser iteration limits must be greater than 0"));
        }

        Ok(())
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub validation: ValidationConfig,
    pub output: OutputConfig,
    pub files: FileConfig,
}

/// Batch validation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ValidationConfig {
    /// Number of files validated concurrently
    pub threads: Option<usize>,
    /// Rewrite files with autofix after validating
    pub fix: bool,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub verbose: bool,
    /// Quiet mode (invalid files only)
    pub quiet: bool,
}

/// File processing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// File extensions to process
    pub extensions: Vec<String>,
    /// Include patterns (glob syntax)
    pub include_patterns: Vec<String>,
    /// Exclude patterns (glob syntax)
    pub exclude_patterns: Vec<String>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["html".to_string(), "htm".to_string()],
            include_patterns: vec![],
            exclude_patterns: vec![],
        }
    }
}

const CONFIG_NAMES: [&str; 4] = [
    "validate-email-html.toml",
    "validate-email-html.json",
    ".validate-email-html.toml",
    ".validate-email-html.json",
];

fn parse_env<T: FromStr>(env: &impl EnvProvider, key: &str) -> Result<Option<T>> {
    env.get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
        })
        .transpose()
}

fn parse_env_flag(env: &impl EnvProvider, key: &str) -> Result<Option<bool>> {
    env.get(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Environment(format!(
                "Invalid {} value: {}",
                key, value
            ))),
        })
        .transpose()
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli)?;

        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => match toml::from_str::<Config>(&content) {
                Ok(config) => Ok(config),
                Err(_) => Ok(serde_json::from_str(&content)?),
            },
        }
    }

    /// Find configuration file in the current directory, then the user config directory
    pub async fn find_config_file() -> Result<Option<Config>> {
        for name in &CONFIG_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("validate-email-html");
            for name in &CONFIG_NAMES {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Engine settings
        if let Some(size) = parse_env(env, "EMAIL_HTML_MAX_SIZE")? {
            config.engine.max_html_size = size;
        }
        if let Some(size) = parse_env(env, "EMAIL_HTML_MAX_FILE_SIZE")? {
            config.engine.max_file_size = size;
        }
        if let Some(strict) = parse_env_flag(env, "EMAIL_HTML_STRICT")? {
            config.engine.strict_mode = strict;
        }
        if let Some(clients) = env.get("EMAIL_HTML_CLIENTS") {
            let clients = EmailClient::parse_list(&clients).map_err(|e| {
                ConfigError::Environment(format!("Invalid EMAIL_HTML_CLIENTS value: {}", e))
            })?;
            config.engine.clients.only(&clients);
        }
        if let Some(check) = parse_env_flag(env, "EMAIL_HTML_CHECK_ACCESSIBILITY")? {
            config.engine.check_accessibility = check;
        }
        if let Some(check) = parse_env_flag(env, "EMAIL_HTML_CHECK_PERFORMANCE")? {
            config.engine.check_performance = check;
        }
        if let Some(check) = parse_env_flag(env, "EMAIL_HTML_CHECK_BEST_PRACTICES")? {
            config.engine.check_best_practices = check;
        }

        // Batch and output settings
        if let Some(threads) = parse_env(env, "EMAIL_HTML_THREADS")? {
            config.validation.threads = Some(threads);
        }
        if let Some(format) = env.get("EMAIL_HTML_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormat::Human,
                "json" => OutputFormat::Json,
                "summary" => OutputFormat::Summary,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid EMAIL_HTML_FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence).
    /// Only flags that were actually given override the configuration.
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Result<Config> {
        if cli.threads.is_some() {
            config.validation.threads = cli.threads;
        }
        if cli.fix {
            config.validation.fix = true;
        }

        if let Some(format) = cli.format {
            config.output.format = format;
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        if cli.strict {
            config.engine.strict_mode = true;
        }
        if let Some(size) = cli.max_html_size {
            config.engine.max_html_size = size;
        }
        if let Some(clients) = cli.get_clients().map_err(ConfigError::Validation)? {
            config.engine.clients.only(&clients);
        }
        for name in &cli.disabled_rules {
            config.engine.rules.entry(name.clone()).or_default().enabled = Some(false);
        }

        if let Some(extensions) = cli.get_extensions() {
            config.files.extensions = extensions;
        }
        if !cli.include_patterns.is_empty() {
            config.files.include_patterns = cli.include_patterns.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.files.exclude_patterns = cli.exclude_patterns.clone();
        }

        Ok(config)
    }

    /// Merge two configurations (second takes precedence for set values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        base.engine = override_config.engine;

        if override_config.validation.threads.is_some() {
            base.validation.threads = override_config.validation.threads;
        }
        base.validation.fix = override_config.validation.fix;

        base.output = override_config.output;

        if !override_config.files.extensions.is_empty() {
            base.files.extensions = override_config.files.extensions;
        }
        if !override_config.files.include_patterns.is_empty() {
            base.files.include_patterns = override_config.files.include_patterns;
        }
        if !override_config.files.exclude_patterns.is_empty() {
            base.files.exclude_patterns = override_config.files.exclude_patterns;
        }

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        config.engine.validate()?;

        if let Some(threads) = config.validation.threads {
            if threads == 0 {
                return Err(invalid("Number of threads must be greater than 0"));
            }
            if threads > 1000 {
                return Err(invalid("Number of threads cannot exceed 1000"));
            }
        }

        if config.output.verbose && config.output.quiet {
            return Err(invalid("Cannot enable both verbose and quiet modes"));
        }

        if config.files.extensions.is_empty() {
            return Err(invalid("At least one file extension must be specified"));
        }
        for ext in &config.files.extensions {
            if ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(invalid(format!("Invalid file extension: {}", ext)));
            }
        }

        Ok(())
    }

    /// Get the effective thread count
    pub fn get_thread_count(config: &Config) -> usize {
        config.validation.threads.unwrap_or_else(num_cpus::get)
    }
}
