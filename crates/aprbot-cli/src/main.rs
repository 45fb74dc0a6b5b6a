//! APRBOT - automated program repair for failed CI runs
//!
//! ## Commands
//!
//! - `repair`: run one repair attempt for a failed workflow run
//! - `inspect`: interpret an engine result file offline
//! - `locate-engine`: show which engine binary a run would use

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use aprbot_core::interpret::parse_results_file;
use aprbot_core::{
    AnalysisExecutionError, AppConfig, EngineConfig, EngineLocator, RepairError, RepairEvent,
    RepairPipeline,
};
use aprbot_github::{GitHubAppTokenProvider, GitHubConnector};

#[derive(Parser)]
#[command(name = "aprbot")]
#[command(author = "APRBOT Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Turn failed CI runs into repair pull requests", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one repair attempt and print the run report as JSON
    ///
    /// Configuration comes from the environment (APP_ID, PRIVATE_KEY,
    /// WEBHOOK_SECRET, APR_*).
    Repair {
        /// Event JSON file, or `-` for stdin
        #[arg(short, long)]
        event: PathBuf,
    },

    /// Interpret a pipeline_results.json without touching GitHub
    Inspect {
        /// Path to the engine's result file
        #[arg(short, long)]
        results: PathBuf,

        /// Apply the patch cap a run would apply (0 disables)
        #[arg(long)]
        max_patches: Option<usize>,
    },

    /// Report which engine binary would be used (never downloads)
    LocateEngine,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    aprbot_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Repair { event } => cmd_repair(&event).await,
        Commands::Inspect {
            results,
            max_patches,
        } => cmd_inspect(&results, max_patches).await,
        Commands::LocateEngine => cmd_locate_engine().await,
    }
}

fn with_hint(err: RepairError) -> anyhow::Error {
    anyhow!("{err}\nhint: {}", err.remediation())
}

fn load_event(path: &Path) -> Result<RepairEvent> {
    let raw = if path == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read event from stdin")?;
        raw
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file: {:?}", path))?
    };
    serde_json::from_str(&raw).context("Event is not a valid repair event document")
}

async fn cmd_repair(event_path: &Path) -> Result<()> {
    let event = load_event(event_path)?;
    let config = Arc::new(
        AppConfig::from_env()
            .map_err(RepairError::from)
            .map_err(with_hint)?,
    );

    let tokens = GitHubAppTokenProvider::from_config(&config.github)
        .map_err(RepairError::from)
        .map_err(with_hint)?;
    let hosts = GitHubConnector::new(config.github.api_base_url.clone(), config.github.api_timeout);
    let pipeline = RepairPipeline::new(config, Arc::new(tokens), Arc::new(hosts));

    let report = pipeline.run(&event).await.map_err(with_hint)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_inspect(results: &Path, max_patches: Option<usize>) -> Result<()> {
    let mut outcome = parse_results_file(results).await;
    if let Some(max) = max_patches {
        let dropped = outcome.cap_patches(max);
        if dropped > 0 {
            info!(dropped, kept = outcome.patches.len(), "patch cap applied");
        }
    }

    if outcome.is_actionable() {
        info!(
            patches = outcome.patches.len(),
            average_confidence = outcome.average_confidence(),
            "a run would open a pull request"
        );
    } else {
        warn!(
            reason = outcome.error_message.as_deref().unwrap_or("no patches"),
            "a run would not open a pull request"
        );
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn cmd_locate_engine() -> Result<()> {
    let engine = EngineConfig::from_env().context("Invalid engine configuration")?;
    let locator = EngineLocator::new(&engine);

    if let Some(path) = locator.find_local().await {
        println!("{}", path.display());
        return Ok(());
    }

    for path in locator.search_paths() {
        warn!(path = %path.display(), "no usable engine binary");
    }
    let url = locator.archive_url().map_err(|e| {
        let err = AnalysisExecutionError::from(e);
        anyhow!("{err}\nhint: {}", err.remediation())
    })?;
    println!("not installed; a run would download {url}");
    Ok(())
}
