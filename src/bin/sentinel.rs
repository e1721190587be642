use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info};

use sentinel::config::ConfigBundle;
use sentinel::runtime::Sentinel;

#[derive(Parser)]
#[command(author, version, about = "Agentless health inspector for GPU compute fleets")]
struct Args {
    /// Directory holding app_config.yaml, nodes.yaml, profiles.yaml and
    /// thresholds.yaml
    #[arg(short, long, default_value = "configs")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let args = Args::parse();

    let config = match ConfigBundle::load(&args.config_dir) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: configuration load failed: {err}");
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(config.app.log_level.as_str())
        .init();

    info!("fleet sentinel starting");
    if config.nodes.is_empty() {
        error!("no nodes declared in nodes.yaml, nothing to inspect");
        return ExitCode::from(1);
    }
    if config.profiles.is_empty() {
        error!("no profiles declared in profiles.yaml, nothing to run");
        return ExitCode::from(1);
    }

    let runtime = match Sentinel::new(config).start().await {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "fatal: boot failed");
            return ExitCode::from(1);
        }
    };

    info!("all services scheduled, press Ctrl+C to stop");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for the shutdown signal");
    }

    if let Err(err) = runtime.shutdown().await {
        error!(error = %err, "shutdown failed");
        return ExitCode::from(1);
    }
    info!("clean shutdown");
    ExitCode::SUCCESS
}
