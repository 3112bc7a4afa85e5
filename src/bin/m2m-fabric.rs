//! M2M Fabric CLI binary.
//!
//! # Commands
//!
//! - `hub` - Start the discovery hub (control socket + HTTP surface)

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use m2m_fabric::{Hub, HubConfig, VERSION};

#[derive(Parser)]
#[command(name = "m2m-fabric")]
#[command(version = VERSION)]
#[command(about = "M2M Fabric - agent discovery and encrypted transport", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the discovery hub
    Hub {
        /// Control socket port (falls back to PORT / HUB_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// HTTP surface port (default: control port + 1)
        #[arg(long)]
        http_port: Option<u16>,

        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Accept agent-supplied addresses verbatim (development only)
        #[arg(long)]
        trust_client_address: bool,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hub {
            port,
            host,
            http_port,
            config,
            trust_client_address,
            verbose,
        } => cmd_hub(port, host, http_port, config, trust_client_address, verbose),
    }
}

fn cmd_hub(
    port: Option<u16>,
    host: Option<String>,
    http_port: Option<u16>,
    config_file: Option<PathBuf>,
    trust_client_address: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    // Initialize logging
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    // Base config from the file or the environment, then the CLI flags
    // as an overlay; merge lets explicit values win
    let base = match &config_file {
        Some(path) => HubConfig::from_file(path)?,
        None if port.is_some() => HubConfig::default(),
        None => HubConfig::from_env().map_err(|_| {
            anyhow::anyhow!("hub port required: pass --port, set PORT/HUB_PORT, or use --config")
        })?,
    };

    let mut overrides = HubConfig::default();
    if let Some(port) = port {
        overrides = overrides.with_port(port);
    }
    if let Some(host) = host {
        overrides = overrides.with_host(host);
    }
    if let Some(http_port) = http_port {
        overrides = overrides.with_http_port(http_port);
    }
    if trust_client_address {
        overrides = overrides.trusting_client_address();
        tracing::warn!("trusting agent-supplied addresses; development mode only");
    }

    let config = base.merge(overrides);

    tracing::info!(
        control = %config.control_addr(),
        http = %config.http_addr(),
        "starting M2M Fabric hub"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let hub = Hub::start(config).await?;
        hub.run().await?;
        Ok::<_, anyhow::Error>(())
    })
}
