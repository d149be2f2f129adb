//! # toolhub-mcp
//!
//! MCP (Model Context Protocol) registry and invocation gateway.
//!
//! This crate provides:
//! - stdio, HTTP/SSE and WebSocket transports behind one `Channel` trait
//! - Server sessions with handshake, heartbeat and call statistics
//! - A single-flight registry of sessions with reconnect and persistence
//! - A gateway that validates and dispatches tool, resource and prompt calls
//! - A searchable marketplace catalog of installable servers

pub mod capabilities;
pub mod error;
pub mod gateway;
pub mod marketplace;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use capabilities::{NegotiatedCapabilities, PromptDescriptor, ResourceDescriptor, ToolDescriptor};
pub use error::{ErrorKind, FailureReason, McpError, TransportError};
pub use gateway::Gateway;
pub use marketplace::{Marketplace, MarketplaceEntry};
pub use policy::{Backoff, SessionPolicy};
pub use registry::Registry;
pub use schema::{InputSchema, SchemaViolation, ViolationKind};
pub use session::{Session, SessionSnapshot, SessionState, StatsSnapshot};
pub use transport::{Channel, Connector, TransportConnector};
