//! Gateway attaching a relay to every relay-enabled endpoint of a config file.
//!
//! Run with: cargo run -p relay-gateway -- --config demos/relay-gateway/gateway.json
//!
//! Start the backend first: cargo run -p echo-backend

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context as _;
use axum::Router;
use clap::Parser;
use relay_core::{EndpointConfig, RelayConfig};
use relay_transport::{Relay, RelayState, SessionHub, create_ws_router};
use relay_upstream::WsDialer;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(about = "WebSocket relay gateway")]
struct Args {
    /// Gateway configuration file (JSON).
    #[arg(short, long)]
    config: PathBuf,

    /// Listen port, overriding the configuration file.
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Deserialize)]
struct GatewayConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    endpoints: Vec<EndpointConfig>,
}

const fn default_port() -> u16 {
    8080
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let raw = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config: GatewayConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.config.display()))?;

    let cancel = CancellationToken::new();
    let mut app = Router::new();
    let mut relays = Vec::new();

    for endpoint in &config.endpoints {
        let Some(relay_config) = RelayConfig::from_endpoint(endpoint)? else {
            tracing::debug!("Ignoring endpoint {}", endpoint.endpoint);
            continue;
        };

        let hub = Arc::new(SessionHub::new());
        let relay = Relay::attach(
            relay_config,
            Arc::clone(&hub),
            Arc::new(WsDialer::new()),
            &cancel,
        )
        .await
        .with_context(|| format!("attaching relay to {}", endpoint.endpoint))?;
        let relay = Arc::new(relay);

        app = app.merge(create_ws_router(
            &endpoint.endpoint,
            RelayState::new(hub, Arc::clone(&relay)),
        ));
        relays.push(relay);
    }

    if relays.is_empty() {
        tracing::warn!("No relay endpoints configured");
    }

    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port.unwrap_or(config.port)));
    tracing::info!("Gateway listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await?;

    for relay in relays {
        if let Err(e) = relay.shutdown().await {
            tracing::warn!(origin = %relay.config().origin, "Relay stopped with error: {e}");
        }
    }
    Ok(())
}
