use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use telemon_common::lifecycle::Lifecycle;
use telemon_server::app::{self, Listeners};
use telemon_server::config::{Overrides, ServerConfig};
use telemon_server::state::AppState;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "telemon-server", version, about = "Receive and store telemon metrics")]
struct Cli {
    /// TOML config file, applied after the environment
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(cli.config.as_deref(), cli.overrides)?;
    tracing::info!(
        http = ?config.http_address,
        grpc = ?config.grpc_address,
        database = ?config.database_path,
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        subnet = config.trusted_subnet.as_deref().unwrap_or("-"),
        "telemon-server starting"
    );

    let state = AppState::from_config(&config).await?;
    let listeners = Listeners::bind(config.http_address, config.grpc_address).await?;

    let lifecycle = Lifecycle::new();
    let mut server = tokio::spawn(app::serve(listeners, state, lifecycle.subscribe()));

    tokio::select! {
        signal = lifecycle.wait_for_signal() => {
            signal?;
            server.await??;
        }
        // A listener failed on its own; nothing left to wait for.
        joined = &mut server => joined??,
    }
    tracing::info!("telemon-server stopped");
    Ok(())
}
