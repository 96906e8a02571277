//! Cogflow CLI - runs workflow files on the Cogflow engine.
//!
//! The `cogflow` binary loads a TOML workflow file, builds it into an
//! engine workflow and either runs it against a target or validates it.

mod commands;
mod config;
mod template;
mod workflow_file;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Cogflow - declarative step workflows over commands, chat models and agents.
#[derive(Parser, Debug)]
#[command(name = "cogflow", author, version, about = "Run Cogflow workflow files")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file (overrides .cogflowrc and ~/.cogflow/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a workflow file
    ///
    /// Walks the main scope in declaration order and prints a per-step
    /// report. Exits non-zero when a step aborts the run.
    Run {
        /// Workflow file
        file: PathBuf,

        /// Target passed to every step as {{target}}
        target: Option<String>,

        /// Output the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a workflow file without running it
    Validate {
        /// Workflow file
        file: PathBuf,

        /// Output the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_level(value: &str) -> Level {
    match value.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let engine_config = config::load_config(args.config.as_deref())?;

    // Logs go to stderr so --json output stays parseable.
    let level = args
        .log_level
        .as_deref()
        .or(engine_config.log_level.as_deref())
        .map_or(Level::INFO, parse_level);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Run { file, target, json } => {
            commands::run::execute(&file, target, json, engine_config).await
        }
        Command::Validate { file, json } => commands::validate::execute(&file, json, engine_config),
    }
}
