//! Studyexec CLI
//!
//! A command-line tool for running study scripts and inspecting their
//! executions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use studyexec::{Config, EXAMPLE_CONFIG, Engine, ExecutionRequest, ExecutionState};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "studyexec")]
#[command(about = "A tool for running study analytics scripts and inspecting their executions")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: studyexec.toml)
        #[arg(short, long, default_value = "studyexec.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a study once and wait for it to finish
    Submit {
        /// Study identifier
        study: String,

        /// Execution identifier (default: current UTC timestamp)
        #[arg(short, long)]
        execution: Option<String>,

        /// Timeout in seconds, between 10 and 3600
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Parameter as KEY=VALUE; VALUE is read as JSON when it parses
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        param: Vec<String>,

        /// Parameters as a JSON object, applied before --param
        #[arg(long, value_name = "JSON")]
        params: Option<String>,
    },

    /// Show the status of an execution
    Status { study: String, execution: String },

    /// Show the result of a completed execution
    #[command(name = "result")]
    Results { study: String, execution: String },

    /// Print the log of an execution
    Log { study: String, execution: String },

    /// List the executions of a study, newest first
    List { study: String },

    /// Check interpreters, studies directory and result store
    Health,

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    if let Some(path) = &cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using default configuration with environment overrides");
    }
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let engine = Engine::new(config);

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Submit {
            study,
            execution,
            timeout,
            param,
            params,
        } => run_submit(&engine, study, execution, timeout, &param, params.as_deref()).await,
        Commands::Status { study, execution } => {
            let status = engine
                .status(&study, &execution)
                .await
                .with_context(|| format!("failed to read status of {study}/{execution}"))?;
            print_json(&status)
        }
        Commands::Results { study, execution } => {
            let result = engine
                .result(&study, &execution)
                .await
                .with_context(|| format!("failed to read results of {study}/{execution}"))?;
            print_json(&result)
        }
        Commands::Log { study, execution } => {
            let log = engine
                .log(&study, &execution)
                .await
                .with_context(|| format!("failed to read log of {study}/{execution}"))?;
            print!("{log}");
            Ok(())
        }
        Commands::List { study } => list_executions(&engine, &study).await,
        Commands::Health => {
            let report = engine.health().await;
            print_json(&report)?;
            if !report.is_healthy() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(engine.config());
            Ok(())
        }
    }
}

async fn run_submit(
    engine: &Engine,
    study: String,
    execution: Option<String>,
    timeout: Option<u64>,
    param: &[String],
    params: Option<&str>,
) -> Result<()> {
    let execution = execution.unwrap_or_else(default_execution_id);
    let timeout = timeout.unwrap_or(engine.config().default_timeout_seconds);
    let parameters = parse_parameters(params, param)?;

    let request = ExecutionRequest::new(study, execution)
        .and_then(|r| r.with_timeout_seconds(timeout))
        .context("invalid execution request")?
        .with_parameters(parameters);

    info!(key = %request.key(), timeout_secs = timeout, "submitting execution");
    let status = engine
        .submit(&request)
        .await
        .context("execution could not be completed")?;

    print_json(&status)?;
    if status.state == ExecutionState::Failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Merge the JSON object and the KEY=VALUE pairs, pairs last
fn parse_parameters(json: Option<&str>, pairs: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut parameters = match json {
        Some(json) => {
            serde_json::from_str::<BTreeMap<String, Value>>(json)
                .context("--params must be a JSON object")?
        }
        None => BTreeMap::new(),
    };

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("invalid parameter '{pair}', expected KEY=VALUE");
        };
        if key.is_empty() {
            bail!("invalid parameter '{pair}', empty key");
        }
        let value =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        parameters.insert(key.to_owned(), value);
    }
    Ok(parameters)
}

fn default_execution_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

async fn list_executions(engine: &Engine, study: &str) -> Result<()> {
    let statuses = engine
        .list_executions(study)
        .await
        .with_context(|| format!("failed to list executions of {study}"))?;

    if statuses.is_empty() {
        println!("No executions for study '{study}'");
        return Ok(());
    }

    for status in statuses {
        println!(
            "  {:<28} {:<10} {}",
            status.execution_id,
            status.state,
            status.created_at.to_rfc3339()
        );
    }
    Ok(())
}

fn show_config(config: &Config) {
    println!("Studies directory: {}", config.studies_dir.display());
    println!("Results directory: {}", config.results_dir.display());
    println!("Default timeout: {}s", config.default_timeout_seconds);
    println!("Max output per stream: {} bytes", config.max_output_bytes);
    println!(
        "Store retries: {} attempts, {} ms backoff",
        config.store.retry_attempts, config.store.retry_backoff_ms
    );
    println!("Dataset: {:?}", config.dataset);
    println!();
    for runtime in [&config.runtimes.r, &config.runtimes.python] {
        println!(
            "  {:<8} *.{} {}",
            runtime.name,
            runtime.extension,
            runtime.command.join(" ")
        );
    }
    match &config.default_analysis.command {
        Some(command) => println!("  default  {}", command.join(" ")),
        None => println!("  default  built-in study inventory"),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
