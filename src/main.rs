//! testpool - parallel test runner over pooled resources
//!
//! Runs batches of independent tests with bounded concurrency, lending each
//! test the browser session, HTTP client and database connections it declares.
//!
//! ## Usage
//!
//! ```bash
//! # Check two endpoints, three at a time
//! testpool run --url http://localhost:8080/health --url http://localhost:8080/ready -n 3
//!
//! # JSON results, expecting a redirect
//! testpool run --url http://localhost:8080/login --expect-status 302 --format json
//!
//! # Configuration
//! testpool config init
//! testpool config show --format json
//! testpool env
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

mod cli;

use cli::{Args, Command, ConfigAction, OutputFormat, RunArgs};
use testpool::checks::HttpCheck;
use testpool::config::env::{print_env_help, EnvConfig};
use testpool::config::RunnerConfig;
use testpool::executor::ParallelRunner;
use testpool::models::Test;
use testpool::resources::ResourceFactories;
use testpool::utils::logger::{init_logger, LogLevel};
use testpool::utils::timer::Timer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env_config = EnvConfig::load();

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        env_config
            .log_level
            .as_deref()
            .and_then(|level| level.parse().ok())
            .unwrap_or_default()
    };
    init_logger(level);

    match args.command {
        Command::Run(run_args) => {
            let config = load_config(args.config.as_deref(), &env_config)?;
            run_checks(run_args, config).await?;
        }
        Command::Config(config_args) => {
            manage_config(config_args.action, args.config.as_deref(), &env_config)?;
        }
        Command::Env => {
            print_env_help();
        }
    }

    Ok(())
}

/// File (explicit, `TESTPOOL_CONFIG`, or first standard location), then
/// environment overrides
fn load_config(path: Option<&Path>, env_config: &EnvConfig) -> Result<RunnerConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| env_config.config_file.as_ref().map(PathBuf::from))
        .or_else(RunnerConfig::find);

    let mut config = match &path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            RunnerConfig::load(path)?
        }
        None => RunnerConfig::default(),
    };

    env_config.apply_to(&mut config);
    config
        .validate()
        .context("Invalid configuration after environment overrides")?;
    Ok(config)
}

async fn run_checks(args: RunArgs, mut config: RunnerConfig) -> Result<()> {
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(suite) = args.suite {
        config.suite_name = suite;
    }

    let runner = ParallelRunner::with_factories(config, ResourceFactories::new())
        .context("Failed to start runner")?;

    let tests: Vec<Arc<dyn Test>> = args
        .urls
        .iter()
        .map(|url| {
            let mut check = HttpCheck::new(url).expect_status(args.expect_status);
            if let Some(text) = &args.body_contains {
                check = check.expect_body(text);
            }
            Arc::new(check) as Arc<dyn Test>
        })
        .collect();

    let timer = Timer::start("run");
    let batch = runner.execute_tests_parallel(tests);
    tokio::pin!(batch);

    let finished = tokio::select! {
        results = &mut batch => Some(results),
        _ = tokio::signal::ctrl_c() => None,
    };
    let results = match finished {
        Some(results) => {
            runner.shutdown().await.context("Failed to release resources")?;
            results?
        }
        None => {
            warn!("Interrupted, shutting down");
            let (results, shutdown) = tokio::join!(batch, runner.shutdown());
            shutdown.context("Failed to release resources")?;
            results?
        }
    };

    match args.format {
        OutputFormat::Table => println!("{results}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
    }
    info!("Completed in {:.2}s", timer.elapsed_secs());

    if !results.is_all_passed() {
        bail!(
            "{} of {} checks did not pass",
            results.total - results.passed,
            results.total
        );
    }
    Ok(())
}

fn manage_config(action: ConfigAction, path: Option<&Path>, env_config: &EnvConfig) -> Result<()> {
    match action {
        ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            RunnerConfig::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        ConfigAction::Show { env, format } => {
            if env {
                env_config.print_summary();
            } else {
                let config = load_config(path, env_config)?;
                let output = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{output}");
            }
        }

        ConfigAction::Validate { file } => {
            let Some(file) = file.or_else(|| path.map(Path::to_path_buf)).or_else(RunnerConfig::find)
            else {
                bail!("No configuration file found");
            };

            match RunnerConfig::load(&file) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {}", file.display());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", file.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
