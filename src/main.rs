#[cfg(not(any(
    target_env = "musl",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "windows",
    feature = "mimalloc"
)))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use anyhow::Context;
use artifact_relay::consumer::{ConsumerClient, ConsumerEvent};
use artifact_relay::{logging, server, Relay, RelayConfig};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "artifact-relay", version, about = "Artifact change-distribution relay")]
struct Cli {
    #[arg(long, global = true, env = "RELAY_CONFIG", help = "Path to a TOML config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a consumer that logs every received artifact
    Consume {
        #[arg(long)]
        server_url: Option<String>,
        #[arg(long)]
        api_base: Option<String>,
        #[arg(long)]
        client_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = RelayConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            logging::init(&config.log);
            serve(config).await
        }
        Commands::Consume {
            server_url,
            api_base,
            client_id,
        } => {
            if let Some(url) = server_url {
                config.consumer.server_url = url;
            }
            if let Some(base) = api_base {
                config.consumer.api_base = base;
            }
            if client_id.is_some() {
                config.consumer.client_id = client_id;
            }
            config.validate()?;
            logging::init(&config.log);
            consume(config).await
        }
    }
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let relay = Relay::from_config(&config)
        .await
        .context("initializing relay")?;
    server::serve(&config, relay, shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

async fn consume(config: RelayConfig) -> anyhow::Result<()> {
    let mut handle = ConsumerClient::new(config.consumer)?.connect();

    let ctrl_c = shutdown_signal();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = handle.events().recv() => match event {
                Some(ConsumerEvent::Artifact { artifact, via }) => {
                    let json = serde_json::to_string(&artifact)?;
                    info!(id = %artifact.id, ?via, artifact = %json, "artifact");
                }
                Some(ConsumerEvent::Connected) => info!("connected"),
                Some(ConsumerEvent::Disconnected { reason }) => warn!(%reason, "disconnected"),
                Some(ConsumerEvent::GaveUp { attempts }) => {
                    warn!(attempts, "push channel gave up, continuing with polling only");
                }
                None => break,
            },
            () = &mut ctrl_c => break,
        }
    }

    let state = handle.disconnect().await;
    info!(phase = ?state.phase, "consumer stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
