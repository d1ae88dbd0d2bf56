//! Transport seam between the upstream connection and the network.

use std::io;

use async_trait::async_trait;

/// Duplex, message-oriented byte stream to the backend.
///
/// Reads and writes may be issued concurrently from different tasks.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Write one message.
    async fn write(&self, frame: &[u8]) -> io::Result<usize>;

    /// Read into `buf`, returning the number of bytes read.
    ///
    /// A message larger than `buf` is returned across successive reads.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the socket.
    async fn close(&self) -> io::Result<()>;
}

/// Opens sockets to the backend.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `url`, announcing `origin`.
    async fn dial(&self, url: &str, origin: &str) -> io::Result<Box<dyn Socket>>;
}
