use clap::Parser;
use token_usage_stats::{Config, StatsEngine};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "token-usage-stats")]
#[command(about = "Time-windowed token usage aggregation engine")]
struct Cli {
    #[arg(short, long, help = "Path to configuration file")]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.logging.level))
        .init();

    if config.metrics.enabled {
        if let Err(e) = token_usage_stats::metrics::init_metrics(&config.metrics) {
            error!("Failed to initialize metrics exporter: {}", e);
            std::process::exit(1);
        }
    }

    info!("Starting token usage stats engine");
    info!("Configuration loaded successfully");

    let engine = StatsEngine::new(config);

    if let Err(e) = engine.run().await {
        error!("Engine error: {}", e);
        std::process::exit(1);
    }
}
