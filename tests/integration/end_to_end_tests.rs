use std::sync::Arc;

use tokio::fs;
use validate_email_html::{
    BatchOptions, BatchValidator, EngineConfig, FileDiscovery, Output, OutputFormat,
    ValidationEngine, VerbosityLevel,
};

use crate::common::test_helpers::{CLEAN_EMAIL, create_temp_email_files, create_temp_file};

fn batch(options: BatchOptions) -> BatchValidator {
    BatchValidator::new(Arc::new(ValidationEngine::default()), options)
}

#[tokio::test]
async fn test_discover_validate_and_report() {
    let temp_dir = create_temp_email_files().await.unwrap();
    let files = FileDiscovery::new()
        .discover_all(&[temp_dir.path().to_path_buf()])
        .await
        .unwrap();
    assert_eq!(files.len(), 4);

    let results = batch(BatchOptions::default()).run(files).await.unwrap();
    assert_eq!(results.total_files, 4);
    assert_eq!(results.valid_files, 2);
    assert_eq!(results.invalid_files, 2);
    assert_eq!(results.error_files, 0);
    assert!(results.has_errors());
    assert!((results.success_rate() - 50.0).abs() < f64::EPSILON);

    let text = Output::new(OutputFormat::Human, VerbosityLevel::Normal)
        .with_colors(false)
        .render(&results)
        .unwrap();
    assert!(text.contains("legacy.html"));
    assert!(text.contains("[no-block-tags]"));
    assert!(text.contains("Total files: 4"));
}

#[tokio::test]
async fn test_exclude_patterns_limit_the_batch() {
    let temp_dir = create_temp_email_files().await.unwrap();
    let files = FileDiscovery::new()
        .with_exclude_patterns(vec!["**/drafts/**".to_string(), "**/legacy.html".to_string()])
        .unwrap()
        .discover_files(temp_dir.path())
        .await
        .unwrap();

    let results = batch(BatchOptions::default()).run(files).await.unwrap();
    assert_eq!(results.total_files, 2);
    assert!(results.all_valid());
}

#[tokio::test]
async fn test_fix_in_place_then_revalidate() {
    let temp_dir = create_temp_email_files().await.unwrap();
    let legacy = temp_dir.path().join("legacy.html");

    let options = BatchOptions {
        fix: true,
        ..BatchOptions::default()
    };
    let first = batch(options.clone()).run(vec![legacy.clone()]).await.unwrap();
    assert_eq!(first.fixed_files, 1);
    assert_eq!(first.file_results[0].written_to.as_deref(), Some(legacy.as_path()));

    let rewritten = fs::read_to_string(&legacy).await.unwrap();
    assert!(!rewritten.contains("<div"));
    assert!(!rewritten.contains("<script"));

    let second = batch(options).run(vec![legacy]).await.unwrap();
    assert_eq!(second.fixed_files, 0);
    let report = second.file_results[0].report.as_ref().unwrap();
    assert!(report.issues().all(|r| r.rule != "no-block-tags"));
}

#[tokio::test]
async fn test_files_over_the_limit_are_errors() {
    let (_temp_dir, path) = create_temp_file("big.html", CLEAN_EMAIL.repeat(50).as_bytes())
        .await
        .unwrap();

    let config = EngineConfig {
        max_file_size: 1024,
        ..EngineConfig::default()
    };
    let engine = ValidationEngine::new(config).unwrap();
    let results = BatchValidator::new(Arc::new(engine), BatchOptions::default())
        .run(vec![path])
        .await
        .unwrap();

    assert_eq!(results.error_files, 1);
    let status = &results.file_results[0].status;
    assert!(status.is_error());
}

#[tokio::test]
async fn test_json_output_with_compatibility() {
    let (_temp_dir, path) = create_temp_file(
        "flex.html",
        br#"<table><tr><td style="display:flex">x</td></tr></table>"#,
    )
    .await
    .unwrap();

    let options = BatchOptions {
        compat: true,
        ..BatchOptions::default()
    };
    let results = batch(options).run(vec![path]).await.unwrap();
    let json = Output::new(OutputFormat::Json, VerbosityLevel::Normal)
        .render(&results)
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    let compat = &value["file_results"][0]["compatibility"];
    assert_eq!(compat["outlook"]["compatible"], false);
    assert_eq!(compat["apple-mail"]["compatible"], true);
}

#[tokio::test]
async fn test_shared_engine_counts_every_file() {
    let temp_dir = create_temp_email_files().await.unwrap();
    let files = FileDiscovery::new()
        .discover_files(temp_dir.path())
        .await
        .unwrap();

    let validator = batch(BatchOptions {
        concurrency: 3,
        ..BatchOptions::default()
    });
    validator.run(files.clone()).await.unwrap();
    validator.run(files).await.unwrap();

    let stats = validator.engine().get_stats().unwrap();
    assert_eq!(stats.validations, 8);
    assert!(stats.ast_cache.hits >= 4);
}
