//! MCP transport implementations.
//!
//! A [`Channel`] is a bidirectional, ordered stream of JSON-RPC text
//! messages. Three variants exist: a spawned child process speaking
//! newline-delimited JSON ([`stdio`]), server-sent events inbound with POSTed
//! requests outbound ([`http`]), and text frames over a WebSocket
//! ([`websocket`]).
//!
//! Channels take `&self` everywhere so the session can share one between its
//! reader task and any number of concurrent callers. Only the reader task
//! calls [`Channel::receive`].

pub mod http;
pub mod sse;
pub mod stdio;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use toolhub_core::TransportConfig;
use tracing::debug;

use crate::error::TransportError;

pub use http::SseChannel;
pub use stdio::StdioChannel;
pub use websocket::WebSocketChannel;

/// An open, bidirectional message channel to one server.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one message. Concurrent sends are serialized by the channel.
    async fn send(&self, message: &str) -> Result<(), TransportError>;

    /// Wait for the next inbound message.
    ///
    /// `Ok(None)` means the peer closed the channel cleanly.
    async fn receive(&self) -> Result<Option<String>, TransportError>;

    /// Close the channel. Closing twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the channel is still usable.
    fn is_connected(&self) -> bool;
}

/// Opens channels from transport configuration.
///
/// The registry holds one of these so tests can substitute an in-memory
/// server for real processes and sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, config: &TransportConfig) -> Result<Arc<dyn Channel>, TransportError>;
}

/// Connector for the real stdio, HTTP/SSE and WebSocket transports.
#[derive(Debug, Clone, Default)]
pub struct TransportConnector {
    http: reqwest::Client,
}

impl TransportConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn open(&self, config: &TransportConfig) -> Result<Arc<dyn Channel>, TransportError> {
        debug!(kind = %config.kind(), endpoint = %config.endpoint(), "Opening transport");

        match config {
            TransportConfig::Stdio {
                command,
                args,
                env,
                working_dir,
            } => {
                let channel = StdioChannel::spawn(command, args, env, working_dir.as_deref()).await?;
                Ok(Arc::new(channel))
            }
            TransportConfig::Http { url, headers } => {
                let channel = SseChannel::connect(self.http.clone(), url, headers).await?;
                Ok(Arc::new(channel))
            }
            TransportConfig::Websocket { url, headers } => {
                let channel = WebSocketChannel::connect(url, headers).await?;
                Ok(Arc::new(channel))
            }
        }
    }
}
