//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Parallel test runner with pooled browser, HTTP and database resources
#[derive(Parser, Debug)]
#[command(name = "testpool")]
#[command(version)]
#[command(about = "Run test batches in parallel over pooled resources")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to the first standard location found)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run HTTP smoke checks through the parallel runner
    Run(RunArgs),

    /// Show, create or validate configuration
    Config(ConfigArgs),

    /// List supported environment variables
    Env,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// URL to check (repeatable)
    #[arg(short, long = "url", required = true)]
    pub urls: Vec<String>,

    /// Status code every check expects
    #[arg(short, long, default_value = "200")]
    pub expect_status: u16,

    /// Text the response body must contain
    #[arg(short, long)]
    pub body_contains: Option<String>,

    /// Maximum checks running at once
    #[arg(short = 'n', long)]
    pub concurrency: Option<usize>,

    /// Suite name recorded on the results
    #[arg(short, long)]
    pub suite: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show {
        /// Print environment overrides instead
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Write an example configuration file
    Init {
        #[arg(short, long, default_value = "./testpool.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check a configuration file
    Validate {
        file: Option<PathBuf>,
    },
}
