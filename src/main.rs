use std::path::PathBuf;

use clap::Parser;
use ladder_quoter::config::Settings;
use ladder_quoter::market_data::router;
use ladder_quoter::telemetry;
use tracing::info;

/// Quote a symmetric limit-order ladder against a simulated venue.
#[derive(Debug, Parser)]
#[command(name = "ladder-quoter", version)]
struct Cli {
    /// Settings file (toml, yaml or json); LADDER__* env vars override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many simulated market steps
    #[arg(long)]
    ticks: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    levels: Option<usize>,

    #[arg(long)]
    shift: Option<f64>,

    #[arg(long)]
    max_volume: Option<f64>,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    telemetry::init_tracing("info");
    if let Some(port) = cli.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(ticks) = cli.ticks {
        settings.simulation.ticks = Some(ticks);
    }
    if let Some(seed) = cli.seed {
        settings.simulation.seed = seed;
    }
    if let Some(levels) = cli.levels {
        settings.quote.level_count = levels;
    }
    if let Some(shift) = cli.shift {
        settings.quote.shift_coefficient = shift;
    }
    if let Some(max_volume) = cli.max_volume {
        settings.quote.max_volume_per_level = max_volume;
    }
    settings.quote.validate()?;

    let status = router::run_demo(settings).await?;
    info!(passes = status.engine.passes, net_position = status.engine.net_position, "Done");
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
