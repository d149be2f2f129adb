//! SQLite-backed descriptor store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use toolhub_core::{DescriptorStore, ServerDescriptor};
use tracing::debug;

/// Errors that can occur during descriptor storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

impl From<StoreError> for toolhub_core::Error {
    fn from(e: StoreError) -> Self {
        toolhub_core::Error::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A stored descriptor with its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct StoredServer {
    pub descriptor: ServerDescriptor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed descriptor storage.
pub struct SqliteDescriptorStore {
    /// Database connection (wrapped in mutex for thread safety).
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteDescriptorStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Database file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        let current_version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
            .unwrap_or(0);

        if current_version < 1 {
            debug!(path = ?self.path, "Creating descriptor store schema");
            conn.execute_batch(include_str!("../migrations/001_initial.sql"))?;
        }

        Ok(())
    }

    /// Every stored server in the order it was first saved.
    pub fn list(&self) -> Result<Vec<StoredServer>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT descriptor, created_at, updated_at FROM servers ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut servers = Vec::new();
        for row in rows {
            let (json, created_at, updated_at) = row?;
            servers.push(StoredServer {
                descriptor: serde_json::from_str(&json)?,
                created_at: parse_datetime(&created_at),
                updated_at: parse_datetime(&updated_at),
            });
        }
        Ok(servers)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM servers", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn get_sync(&self, id: &str) -> Result<Option<ServerDescriptor>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row("SELECT descriptor FROM servers WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        json.map(|j| serde_json::from_str(&j)).transpose().map_err(Into::into)
    }

    fn save_sync(&self, descriptor: &ServerDescriptor) -> Result<()> {
        let json = serde_json::to_string(descriptor)?;
        let now = format_datetime(&Utc::now());
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO servers (id, name, transport, descriptor, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                transport = excluded.transport,
                descriptor = excluded.descriptor,
                updated_at = excluded.updated_at
            "#,
            params![
                descriptor.id,
                descriptor.name,
                descriptor.transport.kind().to_string(),
                json,
                now
            ],
        )?;
        debug!(server = %descriptor.id, "Saved descriptor");
        Ok(())
    }

    fn remove_sync(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM servers WHERE id = ?1", params![id])?;
        if removed > 0 {
            debug!(server = %id, "Removed descriptor");
        }
        Ok(())
    }
}

#[async_trait]
impl DescriptorStore for SqliteDescriptorStore {
    async fn load_all(&self) -> toolhub_core::Result<Vec<ServerDescriptor>> {
        Ok(self.list()?.into_iter().map(|s| s.descriptor).collect())
    }

    async fn get(&self, id: &str) -> toolhub_core::Result<Option<ServerDescriptor>> {
        Ok(self.get_sync(id)?)
    }

    async fn save(&self, descriptor: &ServerDescriptor) -> toolhub_core::Result<()> {
        Ok(self.save_sync(descriptor)?)
    }

    async fn remove(&self, id: &str) -> toolhub_core::Result<()> {
        Ok(self.remove_sync(id)?)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use toolhub_core::{ServerCategory, TransportConfig};

    fn create_test_store() -> (SqliteDescriptorStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteDescriptorStore::open(temp_dir.path().join("servers.db")).unwrap();
        (store, temp_dir)
    }

    fn stdio(id: &str) -> ServerDescriptor {
        ServerDescriptor::new(id, id.to_uppercase(), TransportConfig::stdio("npx", vec!["-y".to_string(), id.to_string()]))
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let (store, _tmp) = create_test_store();
        let descriptor = ServerDescriptor::new(
            "remote",
            "Remote",
            TransportConfig::http("https://mcp.example.com/sse").with_header("Authorization", "Bearer t"),
        )
        .with_category(ServerCategory::Integration)
        .with_timeout(Duration::from_secs(45));

        store.save(&descriptor).await.unwrap();
        let loaded = store.get("remote").await.unwrap().unwrap();
        assert_eq!(loaded, descriptor);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_and_keeps_order() {
        let (store, _tmp) = create_test_store();
        store.save(&stdio("a")).await.unwrap();
        store.save(&stdio("b")).await.unwrap();
        store.save(&stdio("a").with_version("2.0.0")).await.unwrap();

        let all = store.load_all().await.unwrap();
        let ids: Vec<_> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(all[0].version, "2.0.0");
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (store, _tmp) = create_test_store();
        store.save(&stdio("a")).await.unwrap();

        store.remove("a").await.unwrap();
        store.remove("a").await.unwrap();
        store.remove("never").await.unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("servers.db");

        {
            let store = SqliteDescriptorStore::open(&path).unwrap();
            store.save(&stdio("filesystem")).await.unwrap();
        }

        let reopened = SqliteDescriptorStore::open(&path).unwrap();
        let servers = reopened.list().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].descriptor.id, "filesystem");
        assert!(servers[0].updated_at >= servers[0].created_at);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = SqliteDescriptorStore::open_in_memory().unwrap();
        assert!(store.path().is_none());
        store.save(&stdio("memory")).await.unwrap();
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }
}
