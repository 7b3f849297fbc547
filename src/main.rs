use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use murmur_server::{ConnectionLimits, ServerConfig};
use murmur_settings::MurmurSettings;
use murmur_telemetry::TelemetryConfig;

/// Line-based TCP chat server.
#[derive(Debug, Parser)]
#[command(name = "murmur", version, about)]
struct Cli {
    /// Port to listen on (default: 4000, or PORT env var).
    #[arg(short, long)]
    port: Option<u16>,

    /// Idle timeout in seconds (default: 60).
    #[arg(short = 't', long)]
    idle_timeout: Option<u64>,

    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Settings file (default: ~/.murmur/settings.json).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut MurmurSettings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(secs) = self.idle_timeout {
            settings.server.idle_timeout_secs = secs;
        }
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
    }
}

fn server_config(settings: &MurmurSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        idle_timeout: server.idle_timeout(),
        reap_interval: server.reap_interval(),
        limits: ConnectionLimits {
            max_send_queue: server.max_send_queue,
            max_line_length: server.max_line_length,
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(murmur_settings::settings_path);
    let mut settings = murmur_settings::load_settings_from_path(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate()?;

    murmur_telemetry::init_telemetry(&TelemetryConfig::from_level_name(
        &settings.logging.level,
        settings.logging.json,
    ));

    let handle = murmur_server::start(server_config(&settings))
        .await
        .with_context(|| {
            format!(
                "binding {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    tracing::info!(
        port = handle.port(),
        reap_interval_secs = settings.server.reap_interval().as_secs(),
        "Waiting for connections"
    );

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    tokio::time::timeout(Duration::from_secs(10), handle.shutdown())
        .await
        .context("shutdown timed out")?;
    Ok(())
}
