//! Tool server descriptors.
//!
//! A [`ServerDescriptor`] is the identity and static metadata of one tool
//! server, including how to reach it. Descriptors are never patched in
//! place: reconfiguring a server means building a new descriptor.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Catalog category of a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerCategory {
    Data,
    Ai,
    Productivity,
    Communication,
    Analytics,
    Integration,
    #[default]
    Custom,
}

impl ServerCategory {
    /// All categories, in display order.
    pub const ALL: [ServerCategory; 7] = [
        Self::Data,
        Self::Ai,
        Self::Productivity,
        Self::Communication,
        Self::Analytics,
        Self::Integration,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Ai => "ai",
            Self::Productivity => "productivity",
            Self::Communication => "communication",
            Self::Analytics => "analytics",
            Self::Integration => "integration",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ServerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown category '{}', expected one of: data, ai, productivity, communication, analytics, integration, custom",
                    s
                ))
            })
    }
}

/// Transport variant used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Websocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
            Self::Websocket => write!(f, "websocket"),
        }
    }
}

/// Kind-specific connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Child process speaking newline-delimited JSON over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
    /// Server-sent events inbound, POSTed JSON outbound.
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// JSON text frames over a WebSocket.
    Websocket {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    /// Stdio transport for `command` with `args`.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args,
            env: HashMap::new(),
            working_dir: None,
        }
    }

    /// HTTP/SSE transport for `url`.
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    /// WebSocket transport for `url`.
    pub fn websocket(url: impl Into<String>) -> Self {
        Self::Websocket {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    /// Pick a transport from a user-supplied target.
    ///
    /// `http(s)://` targets become HTTP/SSE, `ws(s)://` targets become
    /// WebSocket, anything else is treated as a command to spawn.
    pub fn from_target(target: &str, args: Vec<String>) -> Self {
        if target.starts_with("http://") || target.starts_with("https://") {
            Self::http(target)
        } else if target.starts_with("ws://") || target.starts_with("wss://") {
            Self::websocket(target)
        } else {
            Self::stdio(target, args)
        }
    }

    /// Add an environment variable (stdio only, ignored otherwise).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Stdio { env, .. } = &mut self {
            env.insert(key.into(), value.into());
        }
        self
    }

    /// Add a request header (http/websocket only, ignored otherwise).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Http { headers, .. } | Self::Websocket { headers, .. } => {
                headers.insert(name.into(), value.into());
            }
            Self::Stdio { .. } => {}
        }
        self
    }

    /// Set the working directory (stdio only, ignored otherwise).
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if let Self::Stdio { working_dir, .. } = &mut self {
            *working_dir = Some(dir.into());
        }
        self
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Http { .. } => TransportKind::Http,
            Self::Websocket { .. } => TransportKind::Websocket,
        }
    }

    /// Short human-readable endpoint: the command line or the URL.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            Self::Stdio { command, args, .. } => format!("{} {}", command, args.join(" ")),
            Self::Http { url, .. } | Self::Websocket { url, .. } => url.clone(),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(Error::validation("stdio command cannot be empty"));
                }
            }
            Self::Http { url, .. } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(Error::validation(format!(
                        "http url must start with http:// or https://, got '{}'",
                        url
                    )));
                }
            }
            Self::Websocket { url, .. } => {
                if !url.starts_with("ws://") && !url.starts_with("wss://") {
                    return Err(Error::validation(format!(
                        "websocket url must start with ws:// or wss://, got '{}'",
                        url
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Identity and static metadata for a tool server.
///
/// Timeouts and retry attempts are optional overrides; when absent the
/// registry's session policy applies (10s handshake, 30s per call, 3 tries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique server id (registry key).
    pub id: String,
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub category: ServerCategory,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: String,
    /// How to reach the server.
    pub transport: TransportConfig,
    /// Per-call timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Handshake timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_ms: Option<u64>,
    /// Reconnect attempt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl ServerDescriptor {
    /// Create a descriptor with the given id.
    pub fn new(id: impl Into<String>, name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: ServerCategory::Custom,
            version: default_version(),
            author: String::new(),
            transport,
            timeout_ms: None,
            handshake_timeout_ms: None,
            retry_attempts: None,
        }
    }

    /// Create a custom descriptor with a generated id.
    pub fn custom(name: impl Into<String>, transport: TransportConfig) -> Self {
        let id = format!("custom-{}", uuid::Uuid::new_v4().simple());
        Self::new(id, name, transport)
    }

    pub fn with_category(mut self, category: ServerCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Override the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Override the reconnect attempt count.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    /// Check that the descriptor can be used to open a connection.
    pub fn validate(&self) -> Result<(), Error> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("server id cannot be empty"));
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::validation(format!(
                "server '{}': timeout_ms must be greater than 0",
                self.id
            )));
        }
        if self.handshake_timeout_ms == Some(0) {
            return Err(Error::validation(format!(
                "server '{}': handshake_timeout_ms must be greater than 0",
                self.id
            )));
        }
        self.transport
            .validate()
            .map_err(|e| Error::validation(format!("server '{}': {}", self.id, e)))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
