//! Server registry.
//!
//! Maps server ids to live [`Session`]s. The session map is guarded by a
//! mutex that is only held while the map itself changes, never across
//! transport I/O. Connects are single-flight: whoever inserts the entry
//! performs the handshake, everyone else gets the same session back.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use toolhub_core::{DescriptorStore, ServerDescriptor};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::marketplace::Marketplace;
use crate::policy::SessionPolicy;
use crate::session::{Session, SessionSnapshot, SessionState};
use crate::transport::{Connector, TransportConnector};

/// Registry of tool server sessions.
pub struct Registry {
    /// Sessions in insertion order.
    sessions: Mutex<Vec<Arc<Session>>>,
    connector: Arc<dyn Connector>,
    policy: SessionPolicy,
    marketplace: Marketplace,
    store: Option<Arc<dyn DescriptorStore>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}

impl Registry {
    /// Registry using the real transports and an empty marketplace.
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            connector: Arc::new(TransportConnector::new()),
            policy,
            marketplace: Marketplace::default(),
            store: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_marketplace(mut self, marketplace: Marketplace) -> Self {
        self.marketplace = marketplace;
        self
    }

    /// Write descriptors through to `store` on connect and disconnect.
    pub fn with_store(mut self, store: Arc<dyn DescriptorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn marketplace(&self) -> &Marketplace {
        &self.marketplace
    }

    /// Connect to a server, or return the existing session for its id.
    ///
    /// An existing session is returned unchanged whatever its state,
    /// including `error`. A new session is inserted as `connecting` before
    /// the lock is released, then handshaken. If the handshake fails the
    /// session stays registered in `error` and the transport error is
    /// returned. If the session is disconnected before the handshake
    /// completes, `NotConnected` is returned and no channel stays open.
    pub async fn connect(&self, descriptor: ServerDescriptor) -> Result<Arc<Session>, McpError> {
        let session = {
            let mut sessions = self.sessions.lock();
            if let Some(existing) = sessions.iter().find(|s| s.id() == descriptor.id) {
                debug!(server = %descriptor.id, state = %existing.state(), "Session already registered");
                return Ok(Arc::clone(existing));
            }

            let session = Arc::new(Session::new(
                descriptor.clone(),
                self.policy.for_descriptor(&descriptor),
            ));
            session.set_state(SessionState::Connecting);
            sessions.push(Arc::clone(&session));
            session
        };

        self.persist(&descriptor).await;
        session.establish(self.connector.as_ref()).await?;
        Ok(session)
    }

    /// Connect several servers concurrently.
    pub async fn connect_all(
        &self,
        descriptors: Vec<ServerDescriptor>,
    ) -> Vec<(String, Result<Arc<Session>, McpError>)> {
        let ids: Vec<String> = descriptors.iter().map(|d| d.id.clone()).collect();
        let results = join_all(descriptors.into_iter().map(|d| self.connect(d))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Tear down and forget a session. Unknown ids are ignored.
    pub async fn disconnect(&self, id: &str) {
        let removed = {
            let mut sessions = self.sessions.lock();
            sessions
                .iter()
                .position(|s| s.id() == id)
                .map(|index| sessions.remove(index))
        };

        match removed {
            Some(session) => {
                session.close().await;
                info!(server = %id, "Disconnected MCP server");
            }
            None => debug!(server = %id, "Disconnect for unknown server ignored"),
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.remove(id).await {
                warn!(server = %id, error = %e, "Failed to remove stored descriptor");
            }
        }
    }

    /// Replace a session with a fresh one, retrying with exponential backoff.
    ///
    /// Tries up to the session's `retry_attempts`; the last error is returned
    /// if every attempt fails. The newest session stays registered either
    /// way.
    pub async fn reconnect(&self, id: &str) -> Result<Arc<Session>, McpError> {
        let old = self.get(id).ok_or_else(|| McpError::not_connected(id, None))?;
        let descriptor = old.descriptor().clone();
        let policy = old.policy().clone();
        old.close().await;

        let attempts = policy.retry_attempts.max(1);
        let mut last_error = McpError::not_connected(id, None);

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = policy.backoff.delay(attempt - 1);
                debug!(server = %id, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Backing off before reconnect");
                tokio::time::sleep(delay).await;
            }

            let session = Arc::new(Session::new(descriptor.clone(), policy.clone()));
            session.set_state(SessionState::Connecting);
            if !self.replace(id, &session) {
                debug!(server = %id, "Server was disconnected during reconnect");
                return Err(McpError::not_connected(id, None));
            }

            match session.establish(self.connector.as_ref()).await {
                Ok(()) => {
                    info!(server = %id, attempt = attempt + 1, "Reconnected MCP server");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(server = %id, attempt = attempt + 1, attempts = attempts, error = %e, "Reconnect attempt failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn replace(&self, id: &str, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.iter_mut().find(|s| s.id() == id) {
            Some(slot) => {
                *slot = Arc::clone(session);
                true
            }
            None => false,
        }
    }

    /// Install a marketplace entry and connect to it.
    pub async fn install_from_marketplace(&self, entry_id: &str) -> Result<Arc<Session>, McpError> {
        let entry = self
            .marketplace
            .find(entry_id)
            .ok_or_else(|| McpError::NotFound(entry_id.to_string()))?;
        let descriptor = entry.to_descriptor()?;

        info!(entry = %entry_id, command = %descriptor.transport.endpoint(), "Installing from marketplace");
        self.connect(descriptor).await
    }

    /// Connect every descriptor in the store. Failures are logged, not
    /// returned; the count of connected sessions is.
    pub async fn restore(&self) -> Result<usize, McpError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let descriptors = store.load_all().await?;
        debug!(count = descriptors.len(), "Restoring stored servers");

        let mut connected = 0;
        for (id, result) in self.connect_all(descriptors).await {
            match result {
                Ok(_) => connected += 1,
                Err(e) => warn!(server = %id, error = %e, "Failed to restore server"),
            }
        }
        Ok(connected)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().iter().find(|s| s.id() == id).cloned()
    }

    /// Current sessions in insertion order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().clone()
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.list().iter().map(|s| s.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Close every session without touching the store.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain(..).collect();
        for session in sessions {
            session.close().await;
        }
    }

    async fn persist(&self, descriptor: &ServerDescriptor) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(descriptor).await {
                warn!(server = %descriptor.id, error = %e, "Failed to persist descriptor");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::FailureReason;
    use crate::policy::Backoff;
    use crate::test_utils::{MockConnector, MockServer};
    use toolhub_core::{MemoryDescriptorStore, TransportConfig};

    fn descriptor(id: &str) -> ServerDescriptor {
        ServerDescriptor::new(id, id, TransportConfig::stdio("mock-server", vec![]))
    }

    fn policy() -> SessionPolicy {
        SessionPolicy::default()
            .with_handshake_timeout(Duration::from_millis(300))
            .with_heartbeat(None)
            .with_backoff(Backoff {
                base: Duration::from_millis(5),
                factor: 2,
                cap: Duration::from_millis(20),
            })
    }

    fn registry(connector: Arc<MockConnector>) -> Registry {
        Registry::new(policy()).with_connector(connector)
    }

    #[tokio::test]
    async fn test_connect_returns_existing_session() {
        let connector = Arc::new(MockConnector::new(MockServer::echo()));
        let registry = registry(connector.clone());

        let a = registry.connect(descriptor("echo")).await.unwrap();
        let b = registry.connect(descriptor("echo")).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.opens(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_stays_registered_in_error() {
        let connector = Arc::new(MockConnector::refusing());
        let registry = registry(connector.clone());

        let err = registry.connect(descriptor("down")).await.unwrap_err();
        assert_eq!(err.failure_reason(), Some(FailureReason::Refused));

        let session = registry.get("down").unwrap();
        assert_eq!(session.state(), SessionState::Error(FailureReason::Refused));

        // Not retried implicitly
        let again = registry.connect(descriptor("down")).await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert_eq!(connector.opens(), 1);
    }

    async fn wait_for_live(server: &MockServer, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while server.live_connections() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_during_handshake_leaves_no_live_session() {
        let server = MockServer::echo();
        let connector =
            Arc::new(MockConnector::new(server.clone()).with_open_delay(Duration::from_millis(100)));
        let registry = Arc::new(registry(connector.clone()));

        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.connect(descriptor("x")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let first = registry.get("x").unwrap();
        registry.disconnect("x").await;

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotConnected);
        assert_ne!(first.state(), SessionState::Connected);
        assert!(registry.get("x").is_none());

        let fresh = registry.connect(descriptor("x")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert!(fresh.is_connected());
        assert_eq!(connector.opens(), 2);
        // The channel opened for the abandoned handshake was closed
        wait_for_live(&server, 1).await;
    }

    #[tokio::test]
    async fn test_list_preserves_insertion_order() {
        let registry = registry(Arc::new(MockConnector::new(MockServer::echo())));
        for id in ["c", "a", "b"] {
            registry.connect(descriptor(id)).await.unwrap();
        }
        let ids: Vec<String> = registry.list().iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let registry = registry(Arc::new(MockConnector::new(MockServer::echo())));
        let session = registry.connect(descriptor("echo")).await.unwrap();

        registry.disconnect("echo").await;
        registry.disconnect("echo").await;
        registry.disconnect("never-connected").await;

        assert!(registry.is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let server = MockServer::echo();
        let connector = Arc::new(MockConnector::new(server.clone()));
        let registry = registry(connector.clone());

        let first = registry.connect(descriptor("echo")).await.unwrap();
        server.drop_connections();
        let mut states = first.subscribe();
        tokio::time::timeout(Duration::from_secs(2), states.wait_for(|s| s.failure_reason().is_some()))
            .await
            .unwrap()
            .unwrap();

        let second = registry.reconnect("echo").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_connected());
        assert!(Arc::ptr_eq(&registry.get("echo").unwrap(), &second));
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_retry_attempts() {
        let connector = Arc::new(MockConnector::refusing());
        let registry = registry(connector.clone());
        let _ = registry.connect(descriptor("down").with_retry_attempts(3)).await;

        let err = registry.reconnect("down").await.unwrap_err();
        assert_eq!(err.failure_reason(), Some(FailureReason::Refused));
        assert_eq!(connector.opens(), 1 + 3);
        assert_eq!(
            registry.get("down").unwrap().state(),
            SessionState::Error(FailureReason::Refused)
        );
    }

    #[tokio::test]
    async fn test_reconnect_unknown_server() {
        let registry = registry(Arc::new(MockConnector::new(MockServer::echo())));
        let err = registry.reconnect("ghost").await.unwrap_err();
        assert!(matches!(err, McpError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_install_from_marketplace() {
        let connector = Arc::new(MockConnector::new(MockServer::echo()));
        let registry = registry(connector).with_marketplace(Marketplace::builtin());

        let session = registry.install_from_marketplace("github").await.unwrap();
        assert_eq!(session.id(), "github");
        assert_eq!(session.descriptor().transport.endpoint(), "npx -y @modelcontextprotocol/server-github");

        let err = registry.install_from_marketplace("nope").await.unwrap_err();
        assert!(matches!(err, McpError::NotFound(ref id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_store_write_through_and_restore() {
        let store = Arc::new(MemoryDescriptorStore::new());
        let connector = Arc::new(MockConnector::new(MockServer::echo()));

        let registry = registry(connector.clone()).with_store(store.clone());
        registry.connect(descriptor("a")).await.unwrap();
        registry.connect(descriptor("b")).await.unwrap();
        registry.disconnect("a").await;
        assert_eq!(store.len(), 1);

        let restored = Registry::new(policy()).with_connector(connector).with_store(store);
        assert_eq!(restored.restore().await.unwrap(), 1);
        assert!(restored.get("b").unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let registry = registry(Arc::new(MockConnector::new(MockServer::echo())));
        let session = registry.connect(descriptor("echo")).await.unwrap();

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
