//! HTTP transport: server-sent events inbound, POST outbound.
//!
//! The client opens a long-lived `GET` with `Accept: text/event-stream`.
//! Servers announce where requests should be POSTed with an `endpoint`
//! event; until one arrives the configured URL is used. Every `message`
//! event carries one JSON-RPC message. Servers that answer the POST directly
//! with a JSON body are supported too.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::sse::SseParser;
use super::Channel;
use crate::error::TransportError;

/// How long to wait for the `endpoint` event after the stream opens.
const ENDPOINT_WAIT: Duration = Duration::from_secs(1);

const INBOUND_CAPACITY: usize = 256;

type Inbound = Result<String, TransportError>;

/// HTTP/SSE channel.
pub struct SseChannel {
    client: Client,
    headers: HeaderMap,
    post_url: Arc<RwLock<Url>>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: Mutex<mpsc::Receiver<Inbound>>,
    connected: Arc<AtomicBool>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SseChannel {
    /// Open the event stream at `url`.
    pub async fn connect(
        client: Client,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        let base = Url::parse(url).map_err(|e| TransportError::protocol(format!("invalid url '{}': {}", url, e)))?;
        let headers = header_map(headers)?;

        debug!(url = %base, "Opening SSE stream");

        let response = client
            .get(base.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::protocol(format!(
                "SSE endpoint returned HTTP {}",
                status
            )));
        }

        let post_url = Arc::new(RwLock::new(base.clone()));
        let connected = Arc::new(AtomicBool::new(true));
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (endpoint_tx, endpoint_rx) = oneshot::channel();

        let reader = tokio::spawn(read_events(
            response,
            base,
            Arc::clone(&post_url),
            inbound_tx.clone(),
            Arc::clone(&connected),
            endpoint_tx,
        ));

        if tokio::time::timeout(ENDPOINT_WAIT, endpoint_rx).await.is_err() {
            debug!("No endpoint event received, posting to the stream URL");
        }

        Ok(Self {
            client,
            headers,
            post_url,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            connected,
            reader: parking_lot::Mutex::new(Some(reader)),
        })
    }

    /// URL requests are currently POSTed to.
    pub fn post_url(&self) -> Url {
        self.post_url.read().clone()
    }
}

async fn read_events(
    response: reqwest::Response,
    base: Url,
    post_url: Arc<RwLock<Url>>,
    inbound: mpsc::Sender<Inbound>,
    connected: Arc<AtomicBool>,
    endpoint_tx: oneshot::Sender<()>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "SSE stream failed");
                let _ = inbound
                    .send(Err(TransportError::ReadError(std::io::Error::other(e.to_string()))))
                    .await;
                break;
            }
        };

        for event in parser.feed(&chunk) {
            match event.kind() {
                "endpoint" => match base.join(event.data.trim()) {
                    Ok(url) => {
                        debug!(url = %url, "SSE endpoint announced");
                        *post_url.write() = url;
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                    Err(e) => warn!(data = %event.data, error = %e, "Ignoring invalid endpoint event"),
                },
                "message" => {
                    trace!(data = %event.data, "SSE message");
                    if inbound.send(Ok(event.data)).await.is_err() {
                        return;
                    }
                }
                other => trace!(event = other, "Ignoring SSE event"),
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    let _ = inbound.send(Err(TransportError::ConnectionClosed)).await;
}

#[async_trait]
impl Channel for SseChannel {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let url = self.post_url();
        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(message.to_string())
            .send()
            .await
            .map_err(|e| TransportError::WriteError(std::io::Error::other(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::protocol(format!("POST returned HTTP {}", status)));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.starts_with("application/json"));

        if is_json {
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::ReadError(std::io::Error::other(e.to_string())))?;
            if !body.trim().is_empty() {
                let _ = self.inbound_tx.send(Ok(body)).await;
            }
        }

        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(TransportError::ConnectionClosed)) | None => Ok(None),
            Some(Err(e)) => Err(e),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Closing SSE stream");
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let _ = self.inbound_tx.try_send(Err(TransportError::ConnectionClosed));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SseChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

fn map_request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(Duration::ZERO)
    } else if e.is_connect() {
        TransportError::refused(e.to_string())
    } else {
        TransportError::protocol(e.to_string())
    }
}

pub(crate) fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::protocol(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::protocol(format!("invalid value for header '{}': {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());
        let map = header_map(&headers).unwrap();
        assert_eq!(map.get("authorization").unwrap(), "Bearer token");
    }

    #[test]
    fn test_header_map_rejects_bad_names() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(header_map(&headers), Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 (discard) is almost never listening on loopback
        let result = SseChannel::connect(Client::new(), "http://127.0.0.1:9/sse", &HashMap::new()).await;
        match result {
            Err(e) => assert_eq!(e.reason(), crate::error::FailureReason::Refused),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result = SseChannel::connect(Client::new(), "not a url", &HashMap::new()).await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }
}
