use std::collections::HashMap;

use tempfile::TempDir;
use tokio::fs;
use validate_email_html::config::EnvProvider;
use validate_email_html::{
    Category, ConfigError, ConfigManager, EmailClient, OutputFormat, Severity, ValidationEngine,
};

struct FakeEnv(HashMap<&'static str, &'static str>);

impl EnvProvider for FakeEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|v| v.to_string())
    }
}

#[tokio::test]
async fn test_file_config_drives_the_engine() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("validate-email-html.toml");
    fs::write(
        &path,
        r#"
[engine]
strict_mode = true
check_accessibility = false

[engine.rules.no-block-tags]
enabled = false

[engine.rules.no-heading-tags]
severity = "info"

[engine.thresholds]
max_table_depth = 2

[output]
format = "json"
"#,
    )
    .await
    .unwrap();

    let config = ConfigManager::load_from_file(&path).await.unwrap();
    assert_eq!(config.output.format, OutputFormat::Json);
    assert_eq!(config.engine.thresholds.max_table_depth, 2);
    assert_eq!(config.engine.max_html_size, 512 * 1024);

    let engine = ValidationEngine::new(config.engine).unwrap();
    let report = engine
        .validate(r#"<div><h1>Hi</h1><img src="a.png"></div>"#)
        .unwrap();

    assert!(report.issues().all(|r| r.rule != "no-block-tags"));
    assert!(report.suggestions.iter().any(|r| r.rule == "no-heading-tags"));
    assert_eq!(report.category_counts[&Category::Accessibility], 0);

    let rules = engine.get_available_rules().unwrap();
    assert!(!rules["no-block-tags"].enabled);
    assert_eq!(rules["no-heading-tags"].severity, Severity::Info);
    assert!(!rules["image-alt-text"].enabled);
}

#[tokio::test]
async fn test_json_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.json");
    fs::write(
        &path,
        r#"{"engine": {"max_html_size": 2048, "clients": {"outlook": true, "gmail": false, "apple_mail": false, "thunderbird": false, "mobile": false}}}"#,
    )
    .await
    .unwrap();

    let config = ConfigManager::load_from_file(&path).await.unwrap();
    assert_eq!(config.engine.max_html_size, 2048);
    assert_eq!(config.engine.clients.enabled(), vec![EmailClient::Outlook]);
}

#[tokio::test]
async fn test_malformed_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    fs::write(&path, "[engine\nstrict_mode = ").await.unwrap();

    assert!(matches!(
        ConfigManager::load_from_file(&path).await,
        Err(ConfigError::TomlParsing(_))
    ));
}

#[test]
fn test_environment_overrides() {
    let env = FakeEnv(HashMap::from([
        ("EMAIL_HTML_MAX_SIZE", "4096"),
        ("EMAIL_HTML_STRICT", "yes"),
        ("EMAIL_HTML_CLIENTS", "gmail, mobile"),
        ("EMAIL_HTML_CHECK_PERFORMANCE", "off"),
        ("EMAIL_HTML_FORMAT", "summary"),
    ]));

    let config =
        ConfigManager::apply_environment_overrides_with(&env, Default::default()).unwrap();
    assert_eq!(config.engine.max_html_size, 4096);
    assert!(config.engine.strict_mode);
    assert!(!config.engine.check_performance);
    assert_eq!(
        config.engine.clients.enabled(),
        vec![EmailClient::Gmail, EmailClient::Mobile]
    );
    assert_eq!(config.output.format, OutputFormat::Summary);
    ConfigManager::validate_config(&config).unwrap();
}

#[test]
fn test_invalid_environment_values() {
    for (key, value) in [
        ("EMAIL_HTML_MAX_SIZE", "lots"),
        ("EMAIL_HTML_STRICT", "maybe"),
        ("EMAIL_HTML_CLIENTS", "lotus-notes"),
        ("EMAIL_HTML_FORMAT", "xml"),
    ] {
        let env = FakeEnv(HashMap::from([(key, value)]));
        let result = ConfigManager::apply_environment_overrides_with(&env, Default::default());
        assert!(
            matches!(result, Err(ConfigError::Environment(_))),
            "{}={} accepted",
            key,
            value
        );
    }
}
