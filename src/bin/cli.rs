//! OpenGate CLI
//!
//! Command-line client for calling gateway methods and watching the
//! event stream.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use opengate::client::{
    ClientAuth, ClientIdentity, ClientOptions, EngineEvent, GatewayClient, Transport, WsTransport,
};
use opengate::config::Config;
use opengate::{Result, VERSION};
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "opengate",
    version = VERSION,
    about = "OpenGate gateway client",
    long_about = None
)]
struct Cli {
    /// Gateway URL (overrides config)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Auth token (overrides config)
    #[arg(long, global = true, env = "OPENGATE_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show gateway status
    Status,

    /// Check gateway health
    Health,

    /// Call an arbitrary method with JSON params
    Call {
        /// Method name, e.g. `presence.list`
        method: String,
        /// JSON params
        params: Option<String>,
    },

    /// Stream gateway events to stdout
    Watch,

    /// Write a sample configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = opengate::config::load_config()?;
    if let Some(url) = cli.url {
        config.client.url = url;
    }
    if let Some(token) = cli.token {
        config.client.token = Some(secrecy::SecretString::from(token));
    }

    match cli.command {
        Commands::Status => call_and_print(&config, "status", None).await,
        Commands::Health => call_and_print(&config, "health", None).await,
        Commands::Call { method, params } => {
            let params = params
                .map(|p| serde_json::from_str(&p))
                .transpose()
                .map_err(|e| opengate::Error::InvalidInput(format!("bad params JSON: {e}")))?;
            call_and_print(&config, &method, params).await
        }
        Commands::Watch => watch(&config).await,
        Commands::InitConfig => init_config(),
    }
}

fn client_from_config(config: &Config) -> Result<GatewayClient> {
    let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(config.client.url.clone())?);
    let identity = ClientIdentity {
        instance_id: config.client.instance_id.clone(),
        locale: config.client.locale.clone(),
        ..ClientIdentity::default()
    };
    let auth = ClientAuth {
        token: config.client.token.clone(),
        password: config.client.password.clone(),
    };
    let options = ClientOptions {
        request_timeout_ms: config.client.request_timeout.as_millis() as u64,
    };
    Ok(GatewayClient::with_options(transport, identity, auth, options))
}

/// Start the engine and wait for the handshake to complete
async fn connect(config: &Config) -> Result<GatewayClient> {
    let client = client_from_config(config)?;
    let mut events = client.subscribe();
    client.start().await?;
    let deadline = Duration::from_secs(15);
    tokio::time::timeout(deadline, async {
        loop {
            match events.recv().await {
                Ok(EngineEvent::HelloOk(_)) => break Ok(()),
                Ok(EngineEvent::Close { code, reason }) => {
                    warn!(code, %reason, "connection closed during handshake");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break Err(opengate::Error::Closed("engine terminated".to_string()))
                }
            }
        }
    })
    .await
    .map_err(|_| opengate::Error::Timeout("gateway did not answer in 15s".to_string()))??;
    Ok(client)
}

async fn call_and_print(
    config: &Config,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<()> {
    let client = connect(config).await?;
    let result = client.request(method, params).await;
    client.stop().await?;
    let payload = result?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn watch(config: &Config) -> Result<()> {
    let client = connect(config).await?;
    let mut events = client.subscribe();
    eprintln!("connected; streaming events (ctrl-c to quit)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(EngineEvent::Event { event, payload, seq, .. }) => {
                    println!(
                        "{}",
                        serde_json::json!({ "event": event, "seq": seq, "payload": payload })
                    );
                }
                Ok(EngineEvent::Gap(gap)) => {
                    eprintln!("gap: expected {} received {}", gap.expected, gap.received);
                }
                Ok(EngineEvent::ConnectionChange(up)) => {
                    eprintln!("connection: {}", if up { "up" } else { "down" });
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    eprintln!("lagged: {missed} events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    client.stop().await?;
    Ok(())
}

fn init_config() -> Result<()> {
    let path = opengate::config::config_path();
    if path.exists() {
        return Err(opengate::Error::Config(format!(
            "{} already exists",
            path.display()
        )));
    }
    opengate::config::save_config(&Config::default(), &path)?;
    println!("wrote {}", path.display());
    Ok(())
}
