//! Relay between client sessions and the shared upstream connection.

use std::sync::Arc;

use bytes::Bytes;
use relay_core::{
    Demultiplexer, Envelope, EnvelopeError, RelayConfig, SessionAttributes, SessionRegistry,
};
use relay_upstream::{Dialer, UpstreamClient, UpstreamError};
use tokio_util::sync::CancellationToken;

/// Relay error.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// Relay attached to one endpoint.
///
/// Client messages are wrapped in an envelope carrying the session's
/// identity and written upstream; backend replies are delivered to the
/// sessions their envelope addresses.
pub struct Relay {
    config: RelayConfig,
    upstream: UpstreamClient,
}

impl Relay {
    /// Connect to the backend and start relaying replies into `registry`.
    ///
    /// # Errors
    /// Returns error if the backend cannot be dialed or rejects the
    /// handshake; the relay does not start in that case.
    pub async fn attach<R>(
        config: RelayConfig,
        registry: Arc<R>,
        dialer: Arc<dyn Dialer>,
        cancel: &CancellationToken,
    ) -> Result<Self, RelayError>
    where
        R: SessionRegistry + 'static,
    {
        let demux = Arc::new(Demultiplexer::new(registry));
        let upstream = UpstreamClient::connect(config.clone(), dialer, demux, cancel).await?;
        tracing::info!(
            origin = %config.origin,
            upstream = %config.upstream_url,
            "Relay attached"
        );
        Ok(Self { config, upstream })
    }

    /// Forward a message from a client session to the backend.
    ///
    /// Failures are logged here; the session itself stays open.
    ///
    /// # Errors
    /// Returns error if the message could not be encoded or written.
    pub async fn forward(
        &self,
        session: &SessionAttributes,
        payload: impl Into<Bytes>,
    ) -> Result<usize, RelayError> {
        let result = self.write_envelope(&Envelope::from_session(session, payload)).await;
        if let Err(e) = &result {
            tracing::warn!(route = session.route(), "Failed to relay client message: {e}");
        }
        result
    }

    async fn write_envelope(&self, envelope: &Envelope) -> Result<usize, RelayError> {
        let bytes = envelope.encode()?;
        Ok(self.upstream.write(&bytes).await?)
    }

    /// Configuration the relay was attached with.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Whether the upstream read loop has stopped for good.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.upstream.is_finished()
    }

    /// Stop relaying and close the upstream connection.
    ///
    /// # Errors
    /// Returns the error that ended the read loop, if any.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        Ok(self.upstream.shutdown().await?)
    }
}
