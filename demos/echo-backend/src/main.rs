//! Demo backend for the relay.
//!
//! Acknowledges the relay introduction, then answers every envelope with
//! its own payload: by default to every session on the sender's route,
//! with `--direct` to the sending session only. Messages that are not
//! envelopes are sent back untouched.
//!
//! Run with: cargo run -p echo-backend

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use clap::Parser;
use relay_core::{Attributes, Envelope};
use relay_upstream::{CLIENT_INTRODUCTION, CLIENT_INTRODUCTION_ACK};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(about = "Echo backend for the WebSocket relay")]
struct Args {
    /// Listen port.
    #[arg(short, long, default_value_t = 8081)]
    port: u16,

    /// Path the relay dials.
    #[arg(long, default_value = "/ws-mjolnir")]
    path: String,

    /// Answer only the sending session instead of its whole route.
    #[arg(long)]
    direct: bool,
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
    let app = Router::new()
        .route(&args.path, get(ws_handler))
        .with_state(Arc::new(args.direct));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!("Backend listening on ws://{addr}{}", args.path);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(direct): State<Arc<bool>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, *direct))
}

async fn handle_socket(mut socket: WebSocket, direct: bool) {
    tracing::info!("Relay connected");

    while let Some(msg) = socket.recv().await {
        let data = match msg {
            Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket error: {e}");
                break;
            }
        };

        let reply = if data == CLIENT_INTRODUCTION {
            CLIENT_INTRODUCTION_ACK.to_vec()
        } else {
            reply_to(&data, direct)
        };

        let msg = match String::from_utf8(reply) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        };
        if socket.send(msg).await.is_err() {
            break;
        }
    }

    tracing::info!("Relay disconnected");
}

fn reply_to(data: &[u8], direct: bool) -> Vec<u8> {
    match Envelope::decode(data) {
        Ok(request) => {
            tracing::info!(
                route = %request.route,
                "Processing {}",
                String::from_utf8_lossy(&request.payload)
            );
            let attributes = if direct {
                request.attributes
            } else {
                Attributes::new()
            };
            Envelope::new(request.route, attributes, request.payload)
                .encode()
                .unwrap_or_else(|_| data.to_vec())
        }
        Err(e) => {
            tracing::warn!("Message without an envelope: {e}");
            data.to_vec()
        }
    }
}
