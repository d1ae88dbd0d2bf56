//! One physical, handshake-checked connection to the backend.

use std::{
    io,
    sync::atomic::{AtomicU64, Ordering},
};

use relay_core::RelayConfig;
use tokio::sync::OnceCell;

use crate::socket::{Dialer, Socket};

/// Introduction written by the relay on every new connection.
pub const CLIENT_INTRODUCTION: &[u8] = br#"{"msg":"KrakenD WS proxy starting"}"#;

/// Reply the backend must send to accept the introduction.
pub const CLIENT_INTRODUCTION_ACK: &[u8] = b"OK";

const HANDSHAKE_BUFFER: usize = 512;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Upstream error.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Failed to dial {url}: {source}")]
    Dial {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Read loop aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

/// Connection to the backend that refuses data traffic until the
/// introduction handshake has succeeded.
pub struct UpstreamConnection {
    id: u64,
    socket: Box<dyn Socket>,
    handshake: OnceCell<Result<(), String>>,
}

impl UpstreamConnection {
    /// Dial the backend and perform the handshake.
    ///
    /// # Errors
    /// Returns [`UpstreamError::Dial`] if the socket cannot be opened and
    /// [`UpstreamError::Handshake`] if the backend does not acknowledge the
    /// introduction; in the latter case the socket is closed.
    pub async fn connect(dialer: &dyn Dialer, config: &RelayConfig) -> Result<Self, UpstreamError> {
        let socket = dialer
            .dial(&config.upstream_url, &config.origin)
            .await
            .map_err(|source| UpstreamError::Dial {
                url: config.upstream_url.clone(),
                source,
            })?;

        let conn = Self::new(socket);
        if let Err(e) = conn.handshake().await {
            if let Err(close_err) = conn.socket.close().await {
                tracing::debug!(connection = conn.id, "Closing rejected connection: {close_err}");
            }
            return Err(e);
        }
        tracing::debug!(connection = conn.id, "Upstream connection ready");
        Ok(conn)
    }

    pub(crate) fn new(socket: Box<dyn Socket>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            socket,
            handshake: OnceCell::new(),
        }
    }

    /// Process-unique identifier of this physical connection.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Perform the introduction handshake.
    ///
    /// Runs at most once per connection; concurrent and later callers
    /// observe the outcome of the first run.
    ///
    /// # Errors
    /// Returns error if the introduction could not be exchanged or the reply
    /// was not the acknowledgement.
    pub async fn handshake(&self) -> Result<(), UpstreamError> {
        self.handshake
            .get_or_init(|| self.introduce())
            .await
            .clone()
            .map_err(UpstreamError::Handshake)
    }

    async fn introduce(&self) -> Result<(), String> {
        self.socket
            .write(CLIENT_INTRODUCTION)
            .await
            .map_err(|e| format!("writing introduction: {e}"))?;

        let mut resp = [0u8; HANDSHAKE_BUFFER];
        let n = self
            .socket
            .read(&mut resp)
            .await
            .map_err(|e| format!("reading acknowledgement: {e}"))?;
        tracing::debug!(
            connection = self.id,
            "Received handshake reply: {}",
            String::from_utf8_lossy(&resp[..n])
        );

        if &resp[..n] != CLIENT_INTRODUCTION_ACK {
            return Err("backend did not ack the proxy introduction".to_string());
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), UpstreamError> {
        match self.handshake.get() {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(UpstreamError::Handshake(e.clone())),
            None => Err(UpstreamError::Handshake("handshake not completed".to_string())),
        }
    }

    /// Write one message.
    ///
    /// # Errors
    /// Returns error if the handshake has not succeeded or the write fails.
    pub async fn write(&self, bytes: &[u8]) -> Result<usize, UpstreamError> {
        self.ensure_ready()?;
        Ok(self.socket.write(bytes).await?)
    }

    /// Read into `buf`.
    ///
    /// # Errors
    /// Returns error if the handshake has not succeeded or the read fails.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, UpstreamError> {
        self.ensure_ready()?;
        Ok(self.socket.read(buf).await?)
    }

    /// Close the connection.
    ///
    /// # Errors
    /// Returns error if the socket fails to close cleanly.
    pub async fn close(&self) -> Result<(), UpstreamError> {
        Ok(self.socket.close().await?)
    }
}
