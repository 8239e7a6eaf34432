//! Bitspy monitor entry point

use std::path::PathBuf;

use bitspy_daemon::config::{self, MonitorConfig};
use bitspy_daemon::{logging, service};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(name = "bitspy", about = "Live monitor for a node's block-exchange sessions")]
struct Cli {
    /// Config file (defaults to {config_dir}/bitspy/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node API base URL
    #[arg(long)]
    api: Option<String>,

    /// Telemetry WebSocket port (0 disables it)
    #[arg(long)]
    ws_port: Option<u16>,

    /// Don't draw the terminal dashboard
    #[arg(long)]
    no_dashboard: bool,

    /// Log filter used when RUST_LOG is unset (e.g. "info", "bitspy_daemon=debug")
    #[arg(long)]
    log_level: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut MonitorConfig) {
        if let Some(api) = self.api {
            config.api_url = api;
        }
        if let Some(port) = self.ws_port {
            config.ws_port = port;
        }
        if self.no_dashboard {
            config.dashboard = false;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(path) = self.log_file {
            config.log_file = Some(path);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(config::default_config_path);
    let mut config = match &config_path {
        Some(path) => MonitorConfig::load_from(path),
        None => MonitorConfig::load(),
    };
    cli.apply(&mut config);

    logging::init(&config.log_level, config.log_file.as_deref())?;
    info!("Bitspy starting (config: {:?}, node: {})", config_path, config.api_url);

    service::run_monitor(config).await?;
    Ok(())
}
