//! # toolhub-cli
//!
//! Command-line interface for toolhub.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toolhub_core::{Config, DescriptorStore, ServerDescriptor};
use toolhub_mcp::{Gateway, Marketplace, McpError, Registry, Session, SessionPolicy};
use toolhub_store::SqliteDescriptorStore;

mod commands;
mod output;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
    pub store: Option<Arc<SqliteDescriptorStore>>,
    pub registry: Arc<Registry>,
    pub gateway: Gateway,
}

impl AppContext {
    async fn new(config: Config) -> anyhow::Result<Self> {
        let store = if config.store.enabled {
            let path = config.store_path();
            let store = SqliteDescriptorStore::open(&path)
                .with_context(|| format!("failed to open descriptor store at {}", path.display()))?;
            Some(Arc::new(store))
        } else {
            None
        };

        let client = reqwest::Client::new();
        let marketplace = Marketplace::from_config(&config.marketplace, &client).await?;

        let mut registry = Registry::new(SessionPolicy::from_config(&config)).with_marketplace(marketplace);
        if let Some(store) = &store {
            let store: Arc<dyn DescriptorStore> = store.clone();
            registry = registry.with_store(store);
        }
        let registry = Arc::new(registry);
        let gateway = Gateway::new(Arc::clone(&registry));

        Ok(Self {
            config,
            store,
            registry,
            gateway,
        })
    }

    /// Statically configured servers followed by stored ones. A stored
    /// descriptor with the id of a configured one is ignored.
    pub fn known_servers(&self) -> anyhow::Result<Vec<ServerDescriptor>> {
        let mut servers = self.config.servers.clone();
        if let Some(store) = &self.store {
            for stored in store.list()? {
                if !servers.iter().any(|s| s.id == stored.descriptor.id) {
                    servers.push(stored.descriptor);
                }
            }
        }
        Ok(servers)
    }

    pub fn descriptor(&self, id: &str) -> anyhow::Result<ServerDescriptor> {
        self.known_servers()?
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| toolhub_core::Error::NotFound(format!("server '{}'", id)).into())
    }

    /// Connect to a known server, showing a spinner while the handshake runs.
    pub async fn connect(&self, id: &str) -> anyhow::Result<Arc<Session>> {
        let descriptor = self.descriptor(id)?;
        let spinner = output::spinner(format!("Connecting to {}...", descriptor.name));
        let result = self.registry.connect(descriptor).await;
        spinner.finish_and_clear();
        Ok(result?)
    }
}

/// toolhub - MCP server registry and invocation gateway
#[derive(Parser)]
#[command(name = "toolhub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tool server management
    Servers {
        #[command(subcommand)]
        action: ServersAction,
    },
    /// Call a tool on a server
    Call {
        /// Server ID
        server: String,
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },
    /// Read a resource from a server
    Read {
        /// Server ID
        server: String,
        /// Resource URI
        uri: String,
        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },
    /// Render a prompt from a server
    Prompt {
        /// Server ID
        server: String,
        /// Prompt name
        name: String,
        /// Prompt argument (repeatable)
        #[arg(short, long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
    },
    /// Browse and install servers from the marketplace
    Market {
        #[command(subcommand)]
        action: MarketAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
    /// Diagnose installation issues
    Doctor,
}

#[derive(Subcommand)]
enum ServersAction {
    /// List known servers
    List {
        /// Connect to each server and report its live state
        #[arg(short, long)]
        connect: bool,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a server and verify it answers the handshake
    Add {
        /// Server ID
        id: String,
        /// Command to spawn, or an http(s):// or ws(s):// URL
        target: String,
        /// Arguments passed to a spawned command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Display name (defaults to the ID)
        #[arg(long)]
        name: Option<String>,
        /// Category (data, ai, productivity, communication, analytics, integration, custom)
        #[arg(long)]
        category: Option<String>,
        /// HTTP header for remote servers (repeatable)
        #[arg(long = "header", value_name = "NAME=VALUE")]
        headers: Vec<String>,
        /// Environment variable for spawned servers (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Per-call timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Save without connecting
        #[arg(long)]
        no_connect: bool,
    },
    /// Remove a stored server
    Remove {
        /// Server ID
        id: String,
    },
    /// Connect to a server and show its tools, resources and prompts
    Inspect {
        /// Server ID
        id: String,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MarketAction {
    /// Search the catalog
    Search {
        /// Text to match against name, description and tags
        query: Option<String>,
        /// Only entries in this category
        #[arg(short, long)]
        category: Option<String>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Install a catalog entry and connect to it
    Install {
        /// Entry ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show where configuration and data live
    Path,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        if let Some(suggestion) = recovery_suggestion(&e) {
            eprintln!("Hint: {}", suggestion);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Version => {
            println!("toolhub {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Config { action } => return commands::config::handle(action),
        _ => {}
    }

    let config = Config::load_validated()?;
    let ctx = AppContext::new(config).await?;

    let result = match cli.command {
        Commands::Servers { action } => commands::servers::handle(action, &ctx).await,
        Commands::Call {
            server,
            tool,
            args,
            json,
        } => commands::invoke::call(&ctx, &server, &tool, &args, json).await,
        Commands::Read { server, uri, json } => commands::invoke::read(&ctx, &server, &uri, json).await,
        Commands::Prompt { server, name, args } => commands::invoke::prompt(&ctx, &server, &name, &args).await,
        Commands::Market { action } => commands::market::handle(action, &ctx).await,
        Commands::Doctor => commands::doctor::run(&ctx).await,
        Commands::Version | Commands::Config { .. } => Ok(()),
    };

    ctx.registry.shutdown().await;
    result
}

fn recovery_suggestion(e: &anyhow::Error) -> Option<&'static str> {
    if let Some(e) = e.downcast_ref::<toolhub_core::Error>() {
        return e.recovery_suggestion();
    }
    let e = e.downcast_ref::<McpError>()?;
    match e {
        McpError::NotFound(_) => Some("Use 'toolhub market search' to browse the catalog"),
        McpError::UnknownTool { .. } | McpError::UnknownPrompt { .. } => {
            Some("Use 'toolhub servers inspect <id>' to see what the server offers")
        }
        McpError::Transport(_) | McpError::NotConnected { .. } => {
            Some("Check the server command or URL with 'toolhub servers list'")
        }
        McpError::Timeout { .. } => Some("Raise session.call_timeout_ms or the server's timeout"),
        _ => None,
    }
}
