//! Persistence collaborator for server descriptors.
//!
//! The registry treats process memory as the source of truth. A store only
//! lets configured servers survive restarts: descriptors are loaded once at
//! startup and written through on connect/disconnect.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::server::ServerDescriptor;

/// Key-value store of descriptors keyed by server id.
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    /// Load every stored descriptor.
    async fn load_all(&self) -> Result<Vec<ServerDescriptor>>;

    /// Get one descriptor by id.
    async fn get(&self, id: &str) -> Result<Option<ServerDescriptor>>;

    /// Insert or replace a descriptor.
    async fn save(&self, descriptor: &ServerDescriptor) -> Result<()>;

    /// Remove a descriptor. Removing a missing id is not an error.
    async fn remove(&self, id: &str) -> Result<()>;
}

/// In-process store, mostly useful for tests and ephemeral registries.
#[derive(Debug, Default)]
pub struct MemoryDescriptorStore {
    descriptors: RwLock<Vec<ServerDescriptor>>,
}

impl MemoryDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with descriptors.
    pub fn with_descriptors(descriptors: Vec<ServerDescriptor>) -> Self {
        Self {
            descriptors: RwLock::new(descriptors),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }
}

#[async_trait]
impl DescriptorStore for MemoryDescriptorStore {
    async fn load_all(&self) -> Result<Vec<ServerDescriptor>> {
        Ok(self.descriptors.read().clone())
    }

    async fn get(&self, id: &str) -> Result<Option<ServerDescriptor>> {
        Ok(self.descriptors.read().iter().find(|d| d.id == id).cloned())
    }

    async fn save(&self, descriptor: &ServerDescriptor) -> Result<()> {
        let mut descriptors = self.descriptors.write();
        match descriptors.iter_mut().find(|d| d.id == descriptor.id) {
            Some(existing) => *existing = descriptor.clone(),
            None => descriptors.push(descriptor.clone()),
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.descriptors.write().retain(|d| d.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::TransportConfig;

    fn descriptor(id: &str) -> ServerDescriptor {
        ServerDescriptor::new(id, id, TransportConfig::stdio("cat", vec![]))
    }

    #[tokio::test]
    async fn test_save_replaces_by_id() {
        let store = MemoryDescriptorStore::new();
        store.save(&descriptor("a")).await.unwrap();
        store.save(&descriptor("b")).await.unwrap();
        store.save(&descriptor("a").with_version("2.0.0")).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].version, "2.0.0");
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let store = MemoryDescriptorStore::with_descriptors(vec![descriptor("a")]);
        store.remove("nope").await.unwrap();
        assert_eq!(store.len(), 1);

        store.remove("a").await.unwrap();
        assert!(store.is_empty());
        assert!(store.get("a").await.unwrap().is_none());
    }
}
