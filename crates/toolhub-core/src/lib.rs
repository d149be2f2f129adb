//! # toolhub-core
//!
//! Core types and abstractions shared by the toolhub crates.
//!
//! This crate provides:
//! - Tool server descriptors and transport configuration
//! - The persistence collaborator contract for descriptors
//! - Configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{ServerCategory, ServerDescriptor, TransportConfig, TransportKind};
pub use store::{DescriptorStore, MemoryDescriptorStore};
