//! Always-available upstream client with a background read loop.

use std::sync::Arc;

use relay_core::{RelayConfig, ResponseHandler};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    connection::{UpstreamConnection, UpstreamError},
    socket::Dialer,
};

/// Default size of the read loop's buffer (64 KiB).
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

struct Shared {
    config: RelayConfig,
    dialer: Arc<dyn Dialer>,
    current: RwLock<Arc<UpstreamConnection>>,
    /// Serializes connection replacement.
    reconnect: Mutex<()>,
}

impl Shared {
    async fn current(&self) -> Arc<UpstreamConnection> {
        Arc::clone(&*self.current.read().await)
    }

    /// Replace `stale` with a freshly dialed connection.
    ///
    /// If another caller already replaced `stale`, its replacement is
    /// returned and no new connection is dialed.
    async fn replace(
        &self,
        stale: &Arc<UpstreamConnection>,
    ) -> Result<Arc<UpstreamConnection>, UpstreamError> {
        let _guard = self.reconnect.lock().await;

        let current = self.current().await;
        if !Arc::ptr_eq(&current, stale) {
            return Ok(current);
        }

        let fresh =
            Arc::new(UpstreamConnection::connect(self.dialer.as_ref(), &self.config).await?);
        *self.current.write().await = Arc::clone(&fresh);

        if let Err(e) = stale.close().await {
            tracing::debug!(connection = stale.id(), "Closing replaced connection: {e}");
        }
        tracing::info!(
            previous = stale.id(),
            connection = fresh.id(),
            "Upstream connection re-established"
        );
        Ok(fresh)
    }
}

/// Client sharing one upstream connection between many writers.
///
/// Writes transparently re-establish the connection once on failure. A
/// background task reads from the connection for the lifetime of the
/// client and hands every frame to the response handler.
pub struct UpstreamClient {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<Result<(), UpstreamError>>>>,
}

impl UpstreamClient {
    /// Connect to the backend and start the read loop.
    ///
    /// The loop stops when `cancel` is cancelled or the client is dropped.
    ///
    /// # Errors
    /// Returns error if the initial dial or handshake fails.
    pub async fn connect(
        config: RelayConfig,
        dialer: Arc<dyn Dialer>,
        handler: Arc<dyn ResponseHandler>,
        cancel: &CancellationToken,
    ) -> Result<Self, UpstreamError> {
        Self::connect_with_buffer(config, dialer, handler, cancel, DEFAULT_READ_BUFFER).await
    }

    /// Like [`UpstreamClient::connect`] with a custom read buffer size.
    ///
    /// # Errors
    /// Returns error if the initial dial or handshake fails.
    pub async fn connect_with_buffer(
        config: RelayConfig,
        dialer: Arc<dyn Dialer>,
        handler: Arc<dyn ResponseHandler>,
        cancel: &CancellationToken,
        read_buffer: usize,
    ) -> Result<Self, UpstreamError> {
        let conn = UpstreamConnection::connect(dialer.as_ref(), &config).await?;
        let span = tracing::info_span!("relay", origin = %config.origin);

        let shared = Arc::new(Shared {
            config,
            dialer,
            current: RwLock::new(Arc::new(conn)),
            reconnect: Mutex::new(()),
        });

        let cancel = cancel.child_token();
        let task = tokio::spawn(
            read_loop(
                Arc::clone(&shared),
                handler,
                cancel.clone(),
                read_buffer.max(1),
            )
            .instrument(span),
        );

        Ok(Self {
            shared,
            cancel,
            task: std::sync::Mutex::new(Some(task)),
        })
    }

    /// Write one message to the backend.
    ///
    /// On failure the connection is replaced and the write retried once.
    ///
    /// # Errors
    /// Returns the original write error if the connection could not be
    /// re-established, or the retry's error if the retry fails.
    pub async fn write(&self, bytes: &[u8]) -> Result<usize, UpstreamError> {
        let conn = self.shared.current().await;
        match conn.write(bytes).await {
            Ok(n) => Ok(n),
            Err(err) => {
                tracing::warn!(connection = conn.id(), "Upstream write failed: {err}");
                match self.shared.replace(&conn).await {
                    Ok(fresh) => fresh.write(bytes).await,
                    Err(reconnect_err) => {
                        tracing::warn!("Reconnecting upstream failed: {reconnect_err}");
                        Err(err)
                    }
                }
            }
        }
    }

    /// Identifier of the connection currently in use.
    pub async fn connection_id(&self) -> u64 {
        self.shared.current().await.id()
    }

    /// Stop the read loop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the read loop has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .map_or(true, |task| task.as_ref().is_none_or(JoinHandle::is_finished))
    }

    /// Wait for the read loop to stop and return its outcome.
    ///
    /// Returns `Ok(())` if the loop was already joined.
    ///
    /// # Errors
    /// Returns the error that ended the loop.
    pub async fn join(&self) -> Result<(), UpstreamError> {
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        match task {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }

    /// Cancel the read loop, wait for it and close the connection.
    ///
    /// # Errors
    /// Returns the error that ended the loop, if it failed before shutdown.
    pub async fn shutdown(&self) -> Result<(), UpstreamError> {
        self.cancel();
        let result = self.join().await;
        if let Err(e) = self.shared.current().await.close().await {
            tracing::debug!("Closing upstream connection: {e}");
        }
        result
    }
}

impl Drop for UpstreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    handler: Arc<dyn ResponseHandler>,
    cancel: CancellationToken,
    read_buffer: usize,
) -> Result<(), UpstreamError> {
    let mut buf = vec![0u8; read_buffer];
    loop {
        if cancel.is_cancelled() {
            tracing::debug!("Upstream read loop cancelled");
            return Ok(());
        }

        let conn = shared.current().await;
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Upstream read loop cancelled");
                return Ok(());
            }
            read = conn.read(&mut buf) => read,
        };

        match read {
            Ok(n) => handler.on_response(&buf[..n]).await,
            Err(err) => {
                tracing::warn!(connection = conn.id(), "Upstream read failed: {err}");
                if let Err(e) = shared.replace(&conn).await {
                    tracing::error!("Upstream read loop stopped, reconnect failed: {e}");
                    return Err(e);
                }
            }
        }
    }
}
