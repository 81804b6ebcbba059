use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use validate_email_html::batch::{BatchOptions, BatchValidator};
use validate_email_html::cli::{Cli, VerbosityLevel};
use validate_email_html::config::{Config, ConfigManager};
use validate_email_html::file_discovery::FileDiscovery;
use validate_email_html::output::Output;
use validate_email_html::validator::ValidationEngine;

fn init_logging(verbosity: VerbosityLevel) {
    let default_level = match verbosity {
        VerbosityLevel::Quiet => "error",
        VerbosityLevel::Normal => "warn",
        VerbosityLevel::Verbose => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn verbosity(config: &Config) -> VerbosityLevel {
    if config.output.quiet {
        VerbosityLevel::Quiet
    } else if config.output.verbose {
        VerbosityLevel::Verbose
    } else {
        VerbosityLevel::Normal
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse_args();
    init_logging(cli.verbosity());

    cli.validate().map_err(|e| anyhow!(e))?;

    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;
    debug!(?config, "configuration loaded");

    let discovery = FileDiscovery::new()
        .with_extensions(config.files.extensions.clone())
        .with_include_patterns(config.files.include_patterns.clone())?
        .with_exclude_patterns(config.files.exclude_patterns.clone())?;
    let files = discovery.discover_all(&cli.paths).await?;
    info!(count = files.len(), "discovered files");

    let engine =
        ValidationEngine::new(config.engine.clone()).context("Invalid engine configuration")?;
    engine.spawn_maintenance()?;

    let options = BatchOptions {
        concurrency: ConfigManager::get_thread_count(&config),
        fix: config.validation.fix,
        out_dir: cli.out_dir.clone(),
        compat: cli.compat,
    };
    let batch = BatchValidator::new(Arc::new(engine), options);
    let results = batch.run(files).await?;

    if let Ok(stats) = batch.engine().get_stats() {
        debug!(?stats, "engine statistics");
    }

    let output = Output::new(config.output.format, verbosity(&config));
    let rendered = output
        .render(&results)
        .context("Failed to render results")?;
    print!("{}", rendered);
    if !rendered.ends_with('\n') {
        println!();
    }

    Ok(if results.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
