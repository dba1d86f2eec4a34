use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use telemon_agent::config::{AgentConfig, Overrides, TransportKind};
use telemon_agent::delivery::Delivery;
use telemon_agent::dispatcher::{DispatchConfig, Dispatcher};
use telemon_agent::transport::{GrpcTransport, HttpTransport, Transport};
use telemon_collector::Sampler;
use telemon_common::lifecycle::Lifecycle;
use telemon_security::{Encryptor, Signer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "telemon-agent", version, about = "Push host metrics to a telemon server")]
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
    let config = AgentConfig::load(cli.config.as_deref(), cli.overrides)?;

    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Http => Arc::new(HttpTransport::new(
            &config.endpoint(),
            config.request_timeout,
        )?),
        TransportKind::Grpc => Arc::new(GrpcTransport::new(
            &config.endpoint(),
            config.request_timeout,
        )?),
    };

    let encryptor = config
        .crypto_key
        .as_deref()
        .map(|path| {
            Encryptor::load(path).with_context(|| format!("loading {}", path.display()))
        })
        .transpose()?;

    let signer = Signer::new(config.key.as_deref());
    let real_ip = config.source_ip();
    tracing::info!(
        address = %config.address,
        transport = transport.name(),
        signed = signer.is_enabled(),
        encrypted = encryptor.is_some(),
        compress = config.compress,
        real_ip = real_ip.as_deref().unwrap_or("-"),
        "telemon-agent starting"
    );

    let delivery = Delivery::new(transport)
        .with_signer(signer)
        .with_encryptor(encryptor)
        .with_compression(config.compress)
        .with_real_ip(real_ip);

    let lifecycle = Lifecycle::new();
    let dispatcher = Dispatcher::start(
        DispatchConfig {
            poll_interval: config.poll_interval,
            report_interval: config.report_interval,
            workers: config.workers,
            queue_capacity: config.queue_capacity(),
        },
        Sampler::with_defaults(),
        Arc::new(delivery),
        lifecycle.subscribe(),
    );

    lifecycle.wait_for_signal().await?;
    dispatcher.close().await;
    tracing::info!("telemon-agent stopped");
    Ok(())
}
