//! One live connection to a tool server.
//!
//! A [`Session`] owns its channel, performs the handshake, routes responses
//! to waiting callers by correlation id, pings the server while connected
//! and keeps call statistics.
//!
//! ```text
//! disconnected -> connecting -> connected -> { error, disconnected }
//!                     |
//!                     +--------> error
//! ```
//!
//! A session in `error` is never retried implicitly. Reconnecting builds a
//! fresh session (see [`crate::Registry::reconnect`]).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use toolhub_core::{ServerCategory, ServerDescriptor, TransportKind};
use tracing::{debug, info, trace, warn};

use crate::capabilities::{NegotiatedCapabilities, ToolDescriptor};
use crate::error::{FailureReason, McpError, TransportError};
use crate::policy::SessionPolicy;
use crate::protocol::{
    methods, IncomingMessage, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PaginatedParams, RequestId,
};
use crate::transport::{Channel, Connector};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Error(FailureReason),
}

impl SessionState {
    /// State name without the failure reason.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error(_) => "error",
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Error(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(reason) => write!(f, "error ({})", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// Rolling call statistics. Counters only ever grow.
#[derive(Debug, Default)]
struct SessionStats {
    total_calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl SessionStats {
    fn record(&self, outcome: &Result<Value, McpError>, latency: Duration) {
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        match outcome {
            Ok(_) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
            }
            Err(McpError::Timeout { .. }) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let total_latency_ms = self.total_latency_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            total_calls,
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            total_latency_ms,
            avg_latency_ms: (total_calls > 0).then(|| total_latency_ms as f64 / total_calls as f64),
        }
    }
}

/// Point-in-time copy of a session's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub total_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
}

/// Serializable view of a session for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub name: String,
    pub category: ServerCategory,
    pub transport: TransportKind,
    pub endpoint: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
    pub stats: StatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, McpError>>>;

/// Removes a correlation entry when the waiting call goes away, whether it
/// completed, timed out or was cancelled.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// A connection to a single tool server.
pub struct Session {
    descriptor: ServerDescriptor,
    policy: SessionPolicy,
    state: watch::Sender<SessionState>,
    capabilities: OnceLock<NegotiatedCapabilities>,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    pending: Mutex<PendingMap>,
    next_id: AtomicU64,
    establishing: AtomicBool,
    closed: AtomicBool,
    stats: SessionStats,
    last_activity: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.descriptor.id)
            .field("state", &self.state())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl Session {
    /// Create a disconnected session. Nothing is opened until [`establish`].
    ///
    /// [`establish`]: Session::establish
    pub fn new(descriptor: ServerDescriptor, policy: SessionPolicy) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            descriptor,
            policy,
            state,
            capabilities: OnceLock::new(),
            channel: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            establishing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            stats: SessionStats::default(),
            last_activity: Mutex::new(None),
            last_error: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Capabilities captured at handshake, if it has completed.
    pub fn capabilities(&self) -> Option<&NegotiatedCapabilities> {
        self.capabilities.get()
    }

    /// Convenience lookup into the negotiated tool list.
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.capabilities().and_then(|c| c.tool(name))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.lock()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        let caps = self.capabilities();
        SessionSnapshot {
            id: self.descriptor.id.clone(),
            name: self.descriptor.name.clone(),
            category: self.descriptor.category,
            transport: self.descriptor.transport.kind(),
            endpoint: self.descriptor.transport.endpoint(),
            state: state.label(),
            failure: state.failure_reason(),
            server_name: caps.map(|c| c.server_name.clone()),
            server_version: caps.and_then(|c| c.server_version.clone()),
            tools: caps.map_or(0, |c| c.tools().len()),
            resources: caps.map_or(0, |c| c.resources().len()),
            prompts: caps.map_or(0, |c| c.prompts().len()),
            stats: self.stats(),
            last_activity: self.last_activity(),
            last_error: self.last_error(),
        }
    }

    /// Wait until the session leaves `connecting` and return the new state.
    pub async fn wait_settled(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state != SessionState::Connecting {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Move `connected` to `error`. Returns false if the session was in any
    /// other state.
    fn fail_connected(&self, reason: FailureReason, message: String) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == SessionState::Connected {
                *state = SessionState::Error(reason);
                true
            } else {
                false
            }
        });
        if moved {
            *self.last_error.lock() = Some(message);
        }
        moved
    }

    fn touch(&self) {
        *self.last_activity.lock() = Some(Utc::now());
    }

    fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel.lock().clone()
    }

    /// Move to `connecting` unless the session has been closed.
    fn enter_connecting(&self) -> bool {
        self.state.send_if_modified(|state| {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            *state = SessionState::Connecting;
            true
        })
    }

    /// Move `connecting` to `connected`. Fails if the session was closed
    /// while the handshake ran.
    fn enter_connected(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting && !self.closed.load(Ordering::SeqCst) {
                *state = SessionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Give up on a handshake overtaken by [`close`](Session::close).
    async fn abandon_handshake(&self) -> McpError {
        debug!(server = %self.id(), "Session closed during handshake");
        self.teardown().await;
        self.establishing.store(false, Ordering::SeqCst);
        McpError::not_connected(self.id(), Some(self.state()))
    }

    /// Open the channel and run the handshake within the handshake timeout.
    ///
    /// On success the negotiated capabilities are captured and the session
    /// is `connected`. On failure it is left in `error` with the reason and
    /// the returned error is [`McpError::Transport`]. A session closed
    /// before the handshake completes never becomes `connected`: the
    /// channel it opened is closed and [`McpError::NotConnected`] is
    /// returned. A call made while another establish is in flight returns
    /// immediately.
    pub async fn establish(self: &Arc<Self>, connector: &dyn Connector) -> Result<(), McpError> {
        if self.capabilities.get().is_some() {
            return if self.is_connected() {
                Ok(())
            } else {
                Err(McpError::not_connected(self.id(), Some(self.state())))
            };
        }
        if self.establishing.swap(true, Ordering::SeqCst) {
            debug!(server = %self.id(), "Handshake already in flight");
            return Ok(());
        }

        if !self.enter_connecting() {
            return Err(self.abandon_handshake().await);
        }
        let timeout = self.policy.handshake_timeout;
        info!(
            server = %self.id(),
            transport = %self.descriptor.transport.kind(),
            endpoint = %self.descriptor.transport.endpoint(),
            "Connecting to MCP server"
        );

        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.open_and_handshake(connector)).await {
            Ok(Ok(capabilities)) => Ok(capabilities),
            Ok(Err(e)) => Err(handshake_error(e)),
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        if self.closed.load(Ordering::SeqCst) {
            return Err(self.abandon_handshake().await);
        }

        match outcome {
            Ok(capabilities) => {
                let _ = self.capabilities.set(capabilities);
                if !self.enter_connected() {
                    return Err(self.abandon_handshake().await);
                }
                let Some(capabilities) = self.capabilities.get() else {
                    return Err(self.abandon_handshake().await);
                };
                info!(
                    server = %self.id(),
                    server_name = %capabilities.server_name,
                    protocol_version = %capabilities.protocol_version,
                    tools = capabilities.tools().len(),
                    resources = capabilities.resources().len(),
                    prompts = capabilities.prompts().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "MCP session connected"
                );
                self.touch();
                self.spawn_heartbeat();
                Ok(())
            }
            Err(e) => {
                warn!(server = %self.id(), reason = %e.reason(), error = %e, "MCP handshake failed");
                *self.last_error.lock() = Some(e.to_string());
                self.set_state(SessionState::Error(e.reason()));
                self.teardown().await;
                self.establishing.store(false, Ordering::SeqCst);
                Err(McpError::Transport(e))
            }
        }
    }

    async fn open_and_handshake(
        self: &Arc<Self>,
        connector: &dyn Connector,
    ) -> Result<NegotiatedCapabilities, McpError> {
        let channel = connector.open(&self.descriptor.transport).await?;
        // close() flags the session before taking this lock to tear down
        let stored = {
            let mut slot = self.channel.lock();
            let open = !self.closed.load(Ordering::SeqCst);
            if open {
                *slot = Some(Arc::clone(&channel));
            }
            open
        };
        if !stored {
            if let Err(e) = channel.close().await {
                warn!(server = %self.id(), error = %e, "Failed to close channel");
            }
            return Err(McpError::not_connected(self.id(), Some(self.state())));
        }
        self.spawn_reader(channel);

        let timeout = self.policy.handshake_timeout;
        let params = InitializeParams::for_client(self.policy.client_name.clone());
        let init: InitializeResult = self
            .request_typed(methods::INITIALIZE, Some(params), timeout)
            .await?;

        self.notify(methods::INITIALIZED).await?;

        let mut capabilities = NegotiatedCapabilities::from_initialize(&init);

        if capabilities.tools.is_some() {
            let mut tools = Vec::new();
            for def in self
                .list_all(methods::TOOLS_LIST, |page: ListToolsResult| (page.tools, page.next_cursor))
                .await?
            {
                tools.push(ToolDescriptor::from_definition(def).map_err(McpError::Protocol)?);
            }
            capabilities.tools = Some(tools);
        }

        if capabilities.resources.is_some() {
            let resources = self
                .list_all(methods::RESOURCES_LIST, |page: ListResourcesResult| {
                    (page.resources, page.next_cursor)
                })
                .await?;
            capabilities.resources = Some(resources.into_iter().map(Into::into).collect());
        }

        if capabilities.prompts.is_some() {
            let prompts = self
                .list_all(methods::PROMPTS_LIST, |page: ListPromptsResult| (page.prompts, page.next_cursor))
                .await?;
            capabilities.prompts = Some(prompts.into_iter().map(Into::into).collect());
        }

        Ok(capabilities)
    }

    /// Follow `nextCursor` until the listing is exhausted.
    async fn list_all<R, T>(
        &self,
        method: &str,
        split: impl Fn(R) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>, McpError>
    where
        R: DeserializeOwned,
    {
        let timeout = self.policy.handshake_timeout;
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page: R = self
                .request_typed(method, Some(PaginatedParams { cursor: cursor.clone() }), timeout)
                .await?;
            let (mut batch, next) = split(page);
            items.append(&mut batch);

            match next {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(McpError::protocol(format!("{} returned the same cursor twice", method)));
                }
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
    }

    /// Send a request and wait for its response, up to `timeout`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let channel = self
            .channel()
            .ok_or_else(|| McpError::not_connected(self.id(), Some(self.state())))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        trace!(server = %self.id(), id = id, method = method, "Sending request");

        let exchange = async {
            if let Err(e) = channel.send(&text).await {
                self.on_channel_closed(Some(&e)).await;
                return Err(McpError::connection_lost(self.id()));
            }
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(McpError::connection_lost(self.id())),
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                self.touch();
                result
            }
            Err(_) => {
                debug!(server = %self.id(), id = id, method = method, "Request timed out");
                Err(McpError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    async fn request_typed<P, R>(&self, method: &str, params: Option<P>, timeout: Duration) -> Result<R, McpError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = params.map(serde_json::to_value).transpose()?;
        let value = self.request(method, params, timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("malformed {} result: {}", method, e)))
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let channel = self
            .channel()
            .ok_or_else(|| McpError::not_connected(self.id(), Some(self.state())))?;
        let text = serde_json::to_string(&JsonRpcNotification::<Value>::new(method, None))?;
        channel.send(&text).await?;
        Ok(())
    }

    /// Dispatch a call with the session's per-call timeout and record it in
    /// the statistics.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(McpError::not_connected(self.id(), Some(self.state())));
        }

        let started = Instant::now();
        let result = self.request(method, params, self.policy.call_timeout).await;
        let latency = started.elapsed();
        self.stats.record(&result, latency);

        match &result {
            Ok(_) => debug!(
                server = %self.id(),
                method = method,
                latency_ms = latency.as_millis() as u64,
                "Call succeeded"
            ),
            Err(e) => warn!(
                server = %self.id(),
                method = method,
                latency_ms = latency.as_millis() as u64,
                error = %e,
                "Call failed"
            ),
        }

        result
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<Duration, McpError> {
        let started = Instant::now();
        self.request(methods::PING, None, self.policy.handshake_timeout).await?;
        Ok(started.elapsed())
    }

    /// Close the channel and move to `disconnected`. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let previous = self.state.send_replace(SessionState::Disconnected);
        if previous != SessionState::Disconnected {
            debug!(server = %self.id(), from = %previous, "Closing MCP session");
        }
        self.teardown().await;
    }

    async fn teardown(&self) {
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!(server = %self.id(), error = %e, "Failed to close channel");
            }
        }
        self.fail_pending();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn fail_pending(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        if !pending.is_empty() {
            debug!(server = %self.id(), count = pending.len(), "Failing in-flight calls");
        }
        for (_, tx) in pending {
            let _ = tx.send(Err(McpError::connection_lost(self.id())));
        }
    }

    async fn on_channel_closed(&self, error: Option<&TransportError>) {
        let message = match error {
            Some(e) => format!("channel failed: {}", e),
            None => "channel closed by server".to_string(),
        };
        if self.fail_connected(FailureReason::ConnectionLost, message.clone()) {
            warn!(server = %self.id(), reason = %message, "MCP session lost its connection");
            let channel = self.channel.lock().take();
            if let Some(channel) = channel {
                let _ = channel.close().await;
            }
        }
        self.fail_pending();
    }

    fn spawn_reader(self: &Arc<Self>, channel: Arc<dyn Channel>) {
        let session = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                let incoming = channel.receive().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                match incoming {
                    Ok(Some(text)) => session.dispatch(channel.as_ref(), &text).await,
                    Ok(None) => {
                        session.on_channel_closed(None).await;
                        break;
                    }
                    Err(e) => {
                        session.on_channel_closed(Some(&e)).await;
                        break;
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    async fn dispatch(&self, channel: &dyn Channel, text: &str) {
        let message = match IncomingMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(server = %self.id(), error = %e, "Ignoring unparseable message");
                return;
            }
        };

        match message {
            IncomingMessage::Response { id, result } => {
                let waiter = id.as_u64().and_then(|id| self.pending.lock().remove(&id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result.map_err(|e| McpError::server_error(e.code, e.message)));
                    }
                    None => debug!(server = %self.id(), id = ?id, "Dropping response with no waiting caller"),
                }
            }
            IncomingMessage::Request { id, method, .. } => {
                self.answer_server_request(channel, id, &method).await;
            }
            IncomingMessage::Notification { method, params } => {
                if method.ends_with("/list_changed") {
                    info!(
                        server = %self.id(),
                        notification = %method,
                        "Server capabilities changed; reconnect to pick them up"
                    );
                } else {
                    debug!(server = %self.id(), notification = %method, params = ?params, "Server notification");
                }
            }
        }
    }

    async fn answer_server_request(&self, channel: &dyn Channel, id: RequestId, method: &str) {
        let response = if method == methods::PING {
            serde_json::to_string(&JsonRpcResponse::success(id, serde_json::json!({})))
        } else {
            debug!(server = %self.id(), method = method, "Rejecting server request");
            serde_json::to_string(&JsonRpcResponse::<Value>::failure(id, JsonRpcError::method_not_found(method)))
        };

        match response {
            Ok(text) => {
                if let Err(e) = channel.send(&text).await {
                    debug!(server = %self.id(), error = %e, "Failed to answer server request");
                }
            }
            Err(e) => warn!(server = %self.id(), error = %e, "Failed to encode response"),
        }
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let Some(interval) = self.policy.heartbeat_interval else {
            return;
        };
        let session: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                if !session.is_connected() {
                    break;
                }
                match session.ping().await {
                    Ok(rtt) => trace!(server = %session.id(), rtt_ms = rtt.as_millis() as u64, "Heartbeat"),
                    Err(e) => {
                        let reason = match e {
                            McpError::Timeout { .. } => FailureReason::Timeout,
                            _ => FailureReason::ConnectionLost,
                        };
                        if session.fail_connected(reason, format!("heartbeat failed: {}", e)) {
                            warn!(server = %session.id(), error = %e, "Heartbeat failed");
                            let channel = session.channel.lock().take();
                            if let Some(channel) = channel {
                                let _ = channel.close().await;
                            }
                            session.fail_pending();
                        }
                        break;
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn handshake_error(e: McpError) -> TransportError {
    match e {
        McpError::Transport(e) => e,
        McpError::Timeout { after, .. } => TransportError::Timeout(after),
        McpError::ConnectionLost { .. } => TransportError::ConnectionClosed,
        other => TransportError::protocol(other.to_string()),
    }
}
