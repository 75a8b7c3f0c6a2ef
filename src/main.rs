use anyhow::Context;
use clap::Parser;
use shelly_em_bridge::{logging, ConfigSnapshot, MeterBridge};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "shelly_em_bridge")]
#[command(about = "Publishes Shelly EM readings as an energy meter service")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory that receives current.log
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_dir)?;

    info!("Start");
    if let Err(err) = run(&cli).await {
        error!("Error at main: {err:#}");
        return Err(err);
    }
    Ok(())
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = ConfigSnapshot::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let bridge = MeterBridge::start(&config)
        .await
        .context("initial meter fetch")?;

    bridge
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "Cannot listen for Ctrl-C, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Stopped");
    Ok(())
}
