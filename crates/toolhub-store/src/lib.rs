//! # toolhub-store
//!
//! SQLite persistence for tool server descriptors.
//!
//! The registry keeps live sessions in memory; this crate only lets the set
//! of configured servers survive a restart. Descriptors are stored as JSON in
//! a single `servers` table keyed by server id.
//!
//! ```rust,ignore
//! use toolhub_store::SqliteDescriptorStore;
//!
//! let store = Arc::new(SqliteDescriptorStore::open(config.store_path())?);
//! let registry = Registry::new(SessionPolicy::from_config(&config)).with_store(store);
//! registry.restore().await?;
//! ```

pub mod store;

pub use store::{SqliteDescriptorStore, StoreError, StoredServer};
