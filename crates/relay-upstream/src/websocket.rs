//! WebSocket transport for the upstream connection.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::ORIGIN},
    },
};

use crate::socket::{Dialer, Socket};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials the backend over `ws://` or `wss://`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsDialer;

impl WsDialer {
    /// Create a new dialer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str, origin: &str) -> io::Result<Box<dyn Socket>> {
        let mut request = url.into_client_request().map_err(into_io)?;
        if !origin.is_empty() {
            let value = HeaderValue::from_str(origin).map_err(io::Error::other)?;
            request.headers_mut().insert(ORIGIN, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(into_io)?;
        tracing::debug!("Dialed upstream {url}");

        Ok(Box::new(WsSocket::new(stream)))
    }
}

struct Reader {
    stream: SplitStream<WsStream>,
    /// Unread remainder of the last message.
    pending: Option<Bytes>,
}

/// WebSocket connection split into independently locked halves.
pub struct WsSocket {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<Reader>,
}

impl WsSocket {
    fn new(stream: WsStream) -> Self {
        let (writer, stream) = stream.split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(Reader {
                stream,
                pending: None,
            }),
        }
    }
}

#[async_trait]
impl Socket for WsSocket {
    async fn write(&self, frame: &[u8]) -> io::Result<usize> {
        let message = match std::str::from_utf8(frame) {
            Ok(text) => Message::text(text.to_owned()),
            Err(_) => Message::binary(frame.to_vec()),
        };
        self.writer.lock().await.send(message).await.map_err(into_io)?;
        Ok(frame.len())
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.reader.lock().await;
        let reader = &mut *guard;

        let frame = loop {
            if let Some(frame) = reader.pending.take() {
                break frame;
            }
            let frame = match reader.stream.next().await {
                Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(frame))) => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        format!("upstream closed the connection: {frame:?}"),
                    ));
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(into_io(e)),
                None => return Err(io::ErrorKind::UnexpectedEof.into()),
            };
            reader.pending = Some(frame);
        };

        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        if n < frame.len() {
            reader.pending = Some(frame.slice(n..));
        }
        Ok(n)
    }

    async fn close(&self) -> io::Result<()> {
        self.writer.lock().await.close().await.map_err(into_io)
    }
}

fn into_io(err: tungstenite::Error) -> io::Error {
    match err {
        tungstenite::Error::Io(e) => e,
        other => io::Error::other(other),
    }
}
