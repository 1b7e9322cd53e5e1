use clap::Parser;
use kikitori::config::Config;
use kikitori::models::ModelSet;
use kikitori::{defaults, server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kikitori",
    version,
    about = "Incremental Japanese speech-to-text streaming server"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address override (host:port)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kikitori=info")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let mut config = match Config::load_or_default(&config_path) {
        Ok(config) => config.with_env_overrides(),
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let models = match ModelSet::from_config(&config) {
        Ok(models) if models.is_ready() => Arc::new(models),
        Ok(_) => {
            error!("acoustic model not available (build with --features whisper)");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "failed to load models");
            std::process::exit(1);
        }
    };

    info!(
        model = %config.whisper.model_size,
        backend = defaults::gpu_backend(),
        translation = !config.translation.command.is_empty(),
        "models loaded"
    );

    if let Err(e) = server::serve(config, models).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
