//! `xmlpipeline` CLI — boots an organism from a YAML description and runs
//! its message pump until interrupted. The Rust counterpart of
//! `run_organism.py`, minus the console (out of scope — see SPEC_FULL.md).

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xmlpipeline", about = "Runs an agent message pump organism")]
struct Cli {
    /// Path to the organism YAML description.
    #[arg(default_value = "config/organism.yaml")]
    config: PathBuf,

    /// Raw envelope XML to inject once at startup, if any.
    #[arg(long)]
    inject: Option<PathBuf>,

    /// `from_id` recorded on the injected message.
    #[arg(long, default_value = "cli")]
    from: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = xmlpipeline_organism::ConfigLoader::load(&cli.config)?;
    tracing::info!(organism = %config.organism.name, listeners = config.listeners.len(), "booting organism");

    let pump = xmlpipeline::bootstrap(&config)?;

    if let Some(path) = &cli.inject {
        let raw = std::fs::read(path)?;
        pump.inject(raw, None, Some(cli.from.clone()));
    }

    let pump = std::sync::Arc::new(pump);
    let runner = {
        let pump = pump.clone();
        tokio::spawn(async move { pump.run().await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, draining queue");
    pump.shutdown();
    runner.await?;

    tracing::info!(
        injected = pump.injected_total(),
        errors = pump.errors().len(),
        "organism stopped"
    );
    Ok(())
}
