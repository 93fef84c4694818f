//! sa-channel CLI - channel bundle generation
//!
//! Commands: generate, channels, verify
//! Outputs JSON to stdout, logs to stderr
//! Exit codes: 0 ok, 1 fatal (config, store, no channel), 2 channel failures

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use sa_channel_core::{
    Config, ConfigError, Overrides, PipelineError, ReleasePipeline, SqliteRuleStore, SystemRunner,
};

#[derive(Parser)]
#[command(name = "sa-channel-cli")]
#[command(about = "sa-channel CLI - signed SpamAssassin channel bundles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args)]
struct ChannelArgs {
    /// Only this channel (name as in `channels.name`)
    #[arg(long, conflicts_with = "channel_id")]
    channel: Option<String>,

    /// Only this channel (id as in `channels.id`)
    #[arg(long)]
    channel_id: Option<i64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render, lint, archive and sign channel bundles
    Generate {
        #[command(flatten)]
        select: ChannelArgs,

        /// Target directory for artifacts and bundles
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Log intended actions only; write nothing, run nothing
        #[arg(long)]
        dry_run: bool,

        /// Fail on undefined template variables
        #[arg(long, conflicts_with = "lenient")]
        strict: bool,

        /// Render undefined template variables as empty
        #[arg(long)]
        lenient: bool,
    },

    /// List channels with their eligible rule counts
    Channels {
        #[command(flatten)]
        select: ChannelArgs,
    },

    /// Check stored rule fingerprints without generating anything
    Verify {
        #[command(flatten)]
        select: ChannelArgs,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            print_json(&serde_json::json!({ "success": false, "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "sa_channel_core=debug,sa_channel_cli=debug"
    } else {
        "sa_channel_core=info,sa_channel_cli=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode, PipelineError> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Generate {
            select,
            output_dir,
            dry_run,
            strict,
            lenient,
        } => {
            let strict_templates = match (strict, lenient) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let config = configure(
                config,
                select,
                Overrides {
                    output_dir,
                    dry_run,
                    strict_templates,
                    ..Overrides::default()
                },
            )?;
            let pipeline = open_pipeline(&config)?;
            let report = pipeline.run(&config.selector())?;

            print_json(&report);
            Ok(if report.has_failures() {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }

        Commands::Channels { select } => {
            let config = configure(config, select, Overrides::default())?;
            let pipeline = open_pipeline(&config)?;
            print_json(&pipeline.list_channels(&config.selector())?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Verify { select } => {
            let config = configure(config, select, Overrides::default())?;
            let pipeline = open_pipeline(&config)?;
            let audits = pipeline.audit_fingerprints(&config.selector())?;
            print_json(&audits);
            if audits.iter().all(|a| a.mismatches.is_empty()) {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }
    }
}

/// Command-line selection and flags take precedence over the file
fn configure(mut config: Config, select: ChannelArgs, overrides: Overrides) -> Result<Config, ConfigError> {
    config.apply_overrides(Overrides {
        channel_id: select.channel_id,
        channel_name: select.channel,
        ..overrides
    })?;
    Ok(config)
}

fn open_pipeline(config: &Config) -> Result<ReleasePipeline<SqliteRuleStore>, PipelineError> {
    let store = SqliteRuleStore::open(&config.database.path)?;
    Ok(ReleasePipeline::from_config(store, config, Arc::new(SystemRunner)))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => println!(r#"{{"success": false, "error": "Cannot serialize output: {}"}}"#, e),
    }
}
