use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gpuwatch_collector::{detect, GpuManager};
use gpuwatch_core::GpuwatchConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gpuwatch")]
#[command(about = "gpuwatch - GPU telemetry from vendor tools", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between reports (overrides config)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Print a single report and exit
    #[arg(long)]
    once: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the GPU tools found on PATH
    Detect,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the JSON reports
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Detect) => cmd_detect()?,
        None => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(secs) = cli.interval {
                config.report_interval_secs = secs;
                config.validate().context("invalid --interval")?;
            }
            cmd_watch(&config, cli.once).await?
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<GpuwatchConfig> {
    let mut config = match path {
        Some(path) => GpuwatchConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GpuwatchConfig::default(),
    };
    config
        .apply_env()
        .context("invalid environment override")?;
    Ok(config)
}

fn cmd_detect() -> Result<()> {
    let tools = detect().context("GPU detection failed")?;
    for (tool, path) in tools.iter() {
        println!("{:<14} {:<7} {}", tool, tool.vendor(), path.display());
    }
    Ok(())
}

async fn cmd_watch(config: &GpuwatchConfig, once: bool) -> Result<()> {
    let manager = GpuManager::new(config).context("failed to start GPU collectors")?;
    info!(
        tools = manager.tools().len(),
        interval_secs = config.report_interval_secs,
        "Reporting GPU usage"
    );

    let mut ticker = tokio::time::interval(config.report_interval());
    // The first tick is immediate; wait a full interval for samples
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = manager.snapshot();
                println!("{}", serde_json::to_string(&snapshot)?);

                if once {
                    break;
                }
                if manager.active_collectors() == 0 {
                    warn!("All GPU collectors have stopped, readings are frozen");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
