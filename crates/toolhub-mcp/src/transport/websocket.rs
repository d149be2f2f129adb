//! WebSocket transport: one JSON-RPC message per text frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::Channel;
use crate::error::TransportError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket channel.
pub struct WebSocketChannel {
    sink: Mutex<SplitSink<Socket, Message>>,
    stream: Mutex<SplitStream<Socket>>,
    connected: AtomicBool,
}

impl WebSocketChannel {
    /// Connect to `url`, sending `headers` with the upgrade request.
    pub async fn connect(url: &str, headers: &HashMap<String, String>) -> Result<Self, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::protocol(format!("invalid url '{}': {}", url, e)))?;

        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::protocol(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::protocol(format!("invalid value for header '{}': {}", name, e)))?;
            request.headers_mut().insert(name, value);
        }

        debug!(url = url, "Opening WebSocket");
        let (socket, response) = connect_async(request).await.map_err(map_connect_error)?;
        debug!(status = %response.status(), "WebSocket upgraded");

        let (sink, stream) = socket.split();
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            connected: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.sink
            .lock()
            .await
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| TransportError::WriteError(std::io::Error::other(e.to_string())))
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut stream = self.stream.lock().await;

        loop {
            let frame = match stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReadError(std::io::Error::other(e.to_string())));
                }
            };

            match frame {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => return Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
                Message::Close(frame) => {
                    debug!(frame = ?frame, "WebSocket closed by server");
                    self.connected.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                // Ping/pong are answered by tungstenite itself
                other => trace!(frame = ?other, "Skipping control frame"),
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Closing WebSocket");
        let _ = self.sink.lock().await.close().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn map_connect_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::Io(io) => match io.kind() {
            std::io::ErrorKind::TimedOut => TransportError::Timeout(std::time::Duration::ZERO),
            _ => TransportError::refused(io.to_string()),
        },
        tungstenite::Error::Http(response) => {
            TransportError::protocol(format!("upgrade rejected with HTTP {}", response.status()))
        }
        other => TransportError::protocol(other.to_string()),
    }
}
