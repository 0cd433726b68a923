//! OpenGate gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use opengate::server::{self, GatewayState, MethodRegistry};
use opengate::VERSION;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "opengate-server",
    version = VERSION,
    about = "OpenGate gateway server"
)]
struct Args {
    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides config)
    #[arg(long, short)]
    port: Option<u16>,

    /// Path to a config file (overrides the default search path)
    #[arg(long, short)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,opengate=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => opengate::config::load_config_from_path(path)?,
        None => opengate::config::load_config()?,
    };
    if let Some(bind) = args.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let addr: SocketAddr = config.gateway.listen_addr().parse()?;
    info!(
        auth_mode = config.gateway.auth.mode.as_str(),
        "starting gateway"
    );

    let state = Arc::new(GatewayState::with_tick_interval(
        config.gateway.auth.to_settings(),
        MethodRegistry::new(),
        config.gateway.tick_interval,
    ));
    server::run(addr, state).await?;
    Ok(())
}
