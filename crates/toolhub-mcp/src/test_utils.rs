//! In-memory tool server for tests.
//!
//! [`MockServer`] speaks JSON-RPC over an in-process [`MemoryChannel`] and
//! declares a small fixed catalog:
//!
//! - tools: `echo(text: string, required)`, `add(a: number, b: number)`,
//!   `slow_echo(text, delay_ms)` (answers after `delay_ms`), `hang()` (never
//!   answers) and `fail()` (answers with `isError`)
//! - resources: `memo://greeting`
//! - prompts: `greet(name required, tone optional)`
//!
//! [`MockConnector`] hands out channels to it and counts how many were
//! opened.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolhub_core::TransportConfig;

use crate::error::TransportError;
use crate::protocol::{methods, IncomingMessage, JsonRpcError, JsonRpcResponse};
use crate::transport::{Channel, Connector};

/// Client end of an in-memory channel.
pub struct MemoryChannel {
    outbound: mpsc::UnboundedSender<String>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    connected: AtomicBool,
    closed: CancellationToken,
}

impl MemoryChannel {
    /// Create a connected pair: the client channel, plus the server's
    /// inbound receiver and outbound sender.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let channel = Self {
            outbound: to_server,
            inbound: tokio::sync::Mutex::new(from_server),
            connected: AtomicBool::new(true),
            closed: CancellationToken::new(),
        };
        (channel, from_client, to_client)
    }

    /// Token cancelled when the client closes the channel.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(message.to_string())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            message = inbound.recv() => {
                if message.is_none() {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Ok(message)
            }
            _ = self.closed.cancelled() => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct MockBehavior {
    silent: bool,
    malformed_tools: bool,
    no_resources: bool,
    page_size: Option<usize>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct MockState {
    behavior: MockBehavior,
    ignore_pings: AtomicBool,
    live: AtomicUsize,
    requests: Mutex<HashMap<String, usize>>,
    shutdown: Mutex<CancellationToken>,
}

/// Scripted in-memory MCP server.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<MockState>,
}

impl MockServer {
    /// Server with the default echo catalog.
    pub fn echo() -> Self {
        Self::default()
    }

    fn with_behavior(self, f: impl FnOnce(&mut MockBehavior)) -> Self {
        let mut behavior = match Arc::try_unwrap(self.state) {
            Ok(state) => state.behavior,
            Err(_) => MockBehavior::default(),
        };
        f(&mut behavior);
        Self {
            state: Arc::new(MockState {
                behavior,
                ..MockState::default()
            }),
        }
    }

    /// Never answer anything, including `initialize`.
    pub fn silent(self) -> Self {
        self.with_behavior(|b| b.silent = true)
    }

    /// Declare a tool without an input schema.
    pub fn with_malformed_tools(self) -> Self {
        self.with_behavior(|b| b.malformed_tools = true)
    }

    /// Do not advertise the resources capability.
    pub fn without_resources(self) -> Self {
        self.with_behavior(|b| b.no_resources = true)
    }

    /// Paginate list results.
    pub fn with_page_size(self, size: usize) -> Self {
        self.with_behavior(|b| b.page_size = Some(size.max(1)))
    }

    /// Delay every response.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_behavior(|b| b.delay = Some(delay))
    }

    /// Stop answering `ping` from now on.
    pub fn ignore_pings(&self) {
        self.state.ignore_pings.store(true, Ordering::SeqCst);
    }

    /// Close every open connection from the server side.
    pub fn drop_connections(&self) {
        let mut shutdown = self.state.shutdown.lock();
        shutdown.cancel();
        *shutdown = CancellationToken::new();
    }

    /// Number of requests received for `method`.
    pub fn requests(&self, method: &str) -> usize {
        self.state.requests.lock().get(method).copied().unwrap_or(0)
    }

    /// Connections currently being served.
    pub fn live_connections(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Start serving a fresh channel.
    pub fn serve(&self) -> MemoryChannel {
        let (channel, mut inbound, outbound) = MemoryChannel::pair();
        let client_closed = channel.closed_token();
        let shutdown = self.state.shutdown.lock().clone();
        let server = self.clone();
        server.state.live.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = inbound.recv() => match message {
                        Some(text) => server.handle(&text, &outbound),
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                    _ = client_closed.cancelled() => break,
                }
            }
            server.state.live.fetch_sub(1, Ordering::SeqCst);
        });

        channel
    }

    fn handle(&self, text: &str, outbound: &mpsc::UnboundedSender<String>) {
        let (id, method, params) = match IncomingMessage::parse(text) {
            Ok(IncomingMessage::Request { id, method, params }) => (id, method, params),
            Ok(IncomingMessage::Notification { method, .. }) => {
                *self.state.requests.lock().entry(method).or_default() += 1;
                return;
            }
            _ => return,
        };

        *self.state.requests.lock().entry(method.clone()).or_default() += 1;

        let behavior = &self.state.behavior;
        if behavior.silent {
            return;
        }
        if method == methods::PING && self.state.ignore_pings.load(Ordering::SeqCst) {
            return;
        }

        let params = params.unwrap_or(Value::Null);
        let delay = requested_delay(&method, &params).or(behavior.delay);
        let Some(result) = self.respond(&method, params) else {
            return;
        };

        let text = match result {
            Ok(value) => serde_json::to_string(&JsonRpcResponse::success(id, value)),
            Err(error) => serde_json::to_string(&JsonRpcResponse::<Value>::failure(id, error)),
        };
        let Ok(text) = text else {
            return;
        };

        match delay {
            Some(delay) => {
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = outbound.send(text);
                });
            }
            None => {
                let _ = outbound.send(text);
            }
        }
    }

    /// `None` means the request is never answered.
    fn respond(&self, method: &str, params: Value) -> Option<Result<Value, JsonRpcError>> {
        let behavior = &self.state.behavior;
        let response = match method {
            methods::INITIALIZE => {
                let mut capabilities = json!({"tools": {"listChanged": false}, "prompts": {}});
                if !behavior.no_resources {
                    capabilities["resources"] = json!({});
                }
                Ok(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": capabilities,
                    "serverInfo": {"name": "mock-server", "version": "1.0.0"}
                }))
            }
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => {
                let tools = if behavior.malformed_tools {
                    vec![json!({"name": "broken"})]
                } else {
                    tool_catalog()
                };
                Ok(self.page("tools", tools, &params))
            }
            methods::RESOURCES_LIST => Ok(self.page(
                "resources",
                vec![json!({"uri": "memo://greeting", "name": "Greeting", "mimeType": "text/plain"})],
                &params,
            )),
            methods::PROMPTS_LIST => Ok(self.page(
                "prompts",
                vec![json!({
                    "name": "greet",
                    "description": "Greet someone",
                    "arguments": [
                        {"name": "name", "required": true},
                        {"name": "tone"}
                    ]
                })],
                &params,
            )),
            methods::TOOLS_CALL => return call_tool(&params),
            methods::RESOURCES_READ => match params["uri"].as_str() {
                Some(uri) if uri.starts_with("memo://") => Ok(json!({
                    "contents": [{"uri": uri, "mimeType": "text/plain", "text": "Hello from memo"}]
                })),
                _ => Err(invalid_params("unknown resource")),
            },
            methods::PROMPTS_GET => match params["name"].as_str() {
                Some("greet") => Ok(json!({
                    "description": "Greet someone",
                    "messages": [
                        {"role": "user", "content": {"type": "text", "text": "Say hello to {{name}}."}},
                        {"role": "user", "content": {"type": "text", "text": "Use a {{tone}} tone."}}
                    ]
                })),
                _ => Err(invalid_params("unknown prompt")),
            },
            other => Err(JsonRpcError::method_not_found(other)),
        };
        Some(response)
    }

    fn page(&self, key: &str, items: Vec<Value>, params: &Value) -> Value {
        let start: usize = params["cursor"]
            .as_str()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let size = self.state.behavior.page_size.unwrap_or(items.len().max(1));
        let end = (start + size).min(items.len());

        let mut page = serde_json::Map::new();
        page.insert(key.to_string(), Value::Array(items[start.min(end)..end].to_vec()));
        if end < items.len() {
            page.insert("nextCursor".to_string(), json!(end.to_string()));
        }
        Value::Object(page)
    }
}

fn tool_catalog() -> Vec<Value> {
    vec![
        json!({
            "name": "echo",
            "description": "Echo text back",
            "inputSchema": {
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }
        }),
        json!({
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": {
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            }
        }),
        json!({
            "name": "slow_echo",
            "description": "Echo text back after delay_ms",
            "inputSchema": {
                "type": "object",
                "properties": {"text": {"type": "string"}, "delay_ms": {"type": "integer"}},
                "required": ["text", "delay_ms"]
            }
        }),
        json!({
            "name": "hang",
            "description": "Never returns",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "fail",
            "description": "Always reports a tool error",
            "inputSchema": {"type": "object"}
        }),
    ]
}

fn call_tool(params: &Value) -> Option<Result<Value, JsonRpcError>> {
    let args = &params["arguments"];
    let result = match params["name"].as_str() {
        Some("echo") | Some("slow_echo") => Ok(json!({
            "content": [{"type": "text", "text": args["text"].as_str().unwrap_or_default()}]
        })),
        Some("add") => {
            let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"content": [{"type": "text", "text": sum.to_string()}]}))
        }
        Some("fail") => Ok(json!({"content": [{"type": "text", "text": "boom"}], "isError": true})),
        Some("hang") => return None,
        _ => Err(invalid_params("unknown tool")),
    };
    Some(result)
}

/// Per-call response delay requested through `slow_echo`.
fn requested_delay(method: &str, params: &Value) -> Option<Duration> {
    if method != methods::TOOLS_CALL || params["name"] != "slow_echo" {
        return None;
    }
    params["arguments"]["delay_ms"].as_u64().map(Duration::from_millis)
}

fn invalid_params(message: &str) -> JsonRpcError {
    JsonRpcError {
        code: JsonRpcError::INVALID_PARAMS,
        message: message.to_string(),
        data: None,
    }
}

/// Connector that serves every open from a [`MockServer`].
pub struct MockConnector {
    server: Option<MockServer>,
    opens: AtomicUsize,
    open_delay: Option<Duration>,
}

impl MockConnector {
    pub fn new(server: MockServer) -> Self {
        Self {
            server: Some(server),
            opens: AtomicUsize::new(0),
            open_delay: None,
        }
    }

    /// Connector whose every open is refused.
    pub fn refusing() -> Self {
        Self {
            server: None,
            opens: AtomicUsize::new(0),
            open_delay: None,
        }
    }

    /// Sleep before handing out each channel.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Number of channels opened so far (refused opens included).
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, config: &TransportConfig) -> Result<Arc<dyn Channel>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.server {
            Some(server) => Ok(Arc::new(server.serve())),
            None => Err(TransportError::refused(format!("{} refused the connection", config.endpoint()))),
        }
    }
}

