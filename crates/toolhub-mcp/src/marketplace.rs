//! Marketplace index of installable tool servers.
//!
//! The index is an immutable catalog: lookups and searches never fail. Only
//! loading a catalog (from a file or a URL) can.

use std::path::Path;

use serde::{Deserialize, Serialize};
use toolhub_core::config::MarketplaceConfig;
use toolhub_core::{ServerCategory, ServerDescriptor, TransportConfig};
use tracing::{debug, warn};

use crate::error::McpError;

/// One installable server in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: ServerCategory,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub rating: f32,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Shell-style command line that starts the server over stdio.
    pub install_command: String,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl MarketplaceEntry {
    fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }

    /// Build a stdio descriptor from the install command.
    ///
    /// The command is split on whitespace; quoting is not interpreted.
    pub fn to_descriptor(&self) -> Result<ServerDescriptor, McpError> {
        let mut parts = self.install_command.split_whitespace().map(str::to_string);
        let command = parts
            .next()
            .ok_or_else(|| McpError::Catalog(format!("entry '{}' has an empty install command", self.id)))?;

        Ok(ServerDescriptor::new(
            self.id.clone(),
            self.name.clone(),
            TransportConfig::stdio(command, parts.collect()),
        )
        .with_category(self.category)
        .with_version(self.version.clone())
        .with_author(self.author.clone()))
    }
}

/// Read-only catalog lookup.
#[derive(Debug, Clone, Default)]
pub struct Marketplace {
    entries: Vec<MarketplaceEntry>,
}

impl Marketplace {
    pub fn new(entries: Vec<MarketplaceEntry>) -> Self {
        Self { entries }
    }

    /// The catalog shipped with toolhub.
    pub fn builtin() -> Self {
        Self::new(builtin_entries())
    }

    /// Parse a JSON array of entries.
    pub fn from_json(json: &str) -> Result<Self, McpError> {
        let entries: Vec<MarketplaceEntry> =
            serde_json::from_str(json).map_err(|e| McpError::Catalog(format!("invalid catalog: {}", e)))?;
        Ok(Self::new(entries))
    }

    /// Load a JSON catalog file.
    pub fn load_file(path: &Path) -> Result<Self, McpError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| McpError::Catalog(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Fetch a JSON catalog over HTTP.
    pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<Self, McpError> {
        debug!(url = url, "Fetching marketplace catalog");
        let response = client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| McpError::Catalog(format!("failed to fetch {}: {}", url, e)))?;
        let json = response
            .text()
            .await
            .map_err(|e| McpError::Catalog(format!("failed to read {}: {}", url, e)))?;
        Self::from_json(&json)
    }

    /// Assemble the catalog described by `config`: the built-in entries if
    /// enabled, then a catalog file, then a remote catalog. Later sources
    /// replace earlier entries with the same id. A remote catalog that cannot
    /// be fetched is skipped with a warning; a bad file is an error.
    pub async fn from_config(config: &MarketplaceConfig, client: &reqwest::Client) -> Result<Self, McpError> {
        let mut market = if config.include_builtin {
            Self::builtin()
        } else {
            Self::default()
        };

        if let Some(path) = &config.catalog_path {
            market.merge(Self::load_file(path)?);
        }

        if let Some(url) = &config.catalog_url {
            match Self::fetch(client, url).await {
                Ok(remote) => market.merge(remote),
                Err(e) => warn!(url = %url, error = %e, "Skipping remote marketplace catalog"),
            }
        }

        debug!(entries = market.len(), "Marketplace catalog ready");
        Ok(market)
    }

    /// Add entries from another catalog. Entries whose id already exists are
    /// replaced.
    pub fn merge(&mut self, other: Marketplace) {
        for entry in other.entries {
            match self.entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => self.entries.push(entry),
            }
        }
    }

    pub fn entries(&self) -> &[MarketplaceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&MarketplaceEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Case-insensitive match on name, description and tags; `category` must
    /// match exactly. An empty query matches everything.
    pub fn search(&self, query: &str, category: Option<ServerCategory>) -> Vec<&MarketplaceEntry> {
        let needle = query.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .filter(|e| e.matches(&needle))
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn entry(
    id: &str,
    name: &str,
    description: &str,
    category: ServerCategory,
    downloads: u64,
    rating: f32,
    tags: &[&str],
    install_command: &str,
) -> MarketplaceEntry {
    MarketplaceEntry {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category,
        author: "Model Context Protocol".to_string(),
        downloads,
        rating,
        version: "latest".to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        install_command: install_command.to_string(),
    }
}

fn builtin_entries() -> Vec<MarketplaceEntry> {
    use ServerCategory::*;

    vec![
        entry(
            "slack",
            "Slack",
            "Read channels, post messages and search workspace history",
            Communication,
            52_000,
            4.7,
            &["slack", "messaging", "chat"],
            "npx -y @modelcontextprotocol/server-slack",
        ),
        entry(
            "github",
            "GitHub",
            "Repositories, issues, pull requests and code search",
            Integration,
            98_000,
            4.8,
            &["github", "git", "code"],
            "npx -y @modelcontextprotocol/server-github",
        ),
        entry(
            "postgres",
            "PostgreSQL",
            "Read-only SQL access with schema inspection",
            Data,
            41_000,
            4.6,
            &["database", "sql", "postgres"],
            "npx -y @modelcontextprotocol/server-postgres",
        ),
        entry(
            "filesystem",
            "Filesystem",
            "Secure file operations within allowed directories",
            Productivity,
            120_000,
            4.9,
            &["files", "local", "storage"],
            "npx -y @modelcontextprotocol/server-filesystem .",
        ),
        entry(
            "brave-search",
            "Brave Search",
            "Web and local search through the Brave Search API",
            Ai,
            36_000,
            4.5,
            &["search", "web"],
            "npx -y @modelcontextprotocol/server-brave-search",
        ),
        entry(
            "gdrive",
            "Google Drive",
            "Search and read files stored in Google Drive",
            Productivity,
            27_000,
            4.4,
            &["google", "drive", "documents"],
            "npx -y @modelcontextprotocol/server-gdrive",
        ),
        entry(
            "notion",
            "Notion",
            "Query and update Notion pages and databases",
            Productivity,
            23_000,
            4.3,
            &["notion", "notes", "wiki"],
            "npx -y @notionhq/notion-mcp-server",
        ),
        entry(
            "memory",
            "Memory",
            "Knowledge-graph based persistent memory",
            Ai,
            31_000,
            4.5,
            &["memory", "knowledge-graph"],
            "npx -y @modelcontextprotocol/server-memory",
        ),
        entry(
            "sentry",
            "Sentry",
            "Retrieve and analyze issues from Sentry",
            Analytics,
            12_000,
            4.2,
            &["errors", "monitoring", "observability"],
            "uvx mcp-server-sentry",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slack_only() -> Marketplace {
        Marketplace::new(vec![entry(
            "slack",
            "Slack",
            "Team chat",
            ServerCategory::Communication,
            10,
            4.0,
            &["slack", "messaging"],
            "npx -y @modelcontextprotocol/server-slack",
        )])
    }

    #[test]
    fn test_search_matches_name_and_tags() {
        let market = slack_only();
        let hits = market.search("slack", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "slack");

        assert_eq!(market.search("MESSAGING", None).len(), 1);
        assert_eq!(market.search("chat", None).len(), 1);
    }

    #[test]
    fn test_search_category_is_exact() {
        let market = slack_only();
        assert!(market.search("slack", Some(ServerCategory::Data)).is_empty());
        assert_eq!(market.search("slack", Some(ServerCategory::Communication)).len(), 1);
    }

    #[test]
    fn test_empty_query_lists_all() {
        let market = Marketplace::builtin();
        assert_eq!(market.search("", None).len(), market.len());
        assert!(market
            .search("  ", Some(ServerCategory::Productivity))
            .iter()
            .all(|e| e.category == ServerCategory::Productivity));
    }

    #[test]
    fn test_builtin_catalog_ids_are_unique() {
        let market = Marketplace::builtin();
        let mut ids: Vec<_> = market.entries().iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), market.len());
        assert!(market.find("slack").is_some());
        assert!(market.find("nope").is_none());
    }

    #[test]
    fn test_to_descriptor_splits_command() {
        let descriptor = slack_only().find("slack").unwrap().to_descriptor().unwrap();
        assert_eq!(descriptor.id, "slack");
        assert_eq!(descriptor.category, ServerCategory::Communication);
        match descriptor.transport {
            TransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args, vec!["-y", "@modelcontextprotocol/server-slack"]);
            }
            other => panic!("unexpected transport {:?}", other),
        }
    }

    #[test]
    fn test_empty_install_command_is_catalog_error() {
        let mut e = slack_only().find("slack").unwrap().clone();
        e.install_command = "   ".to_string();
        assert!(matches!(e.to_descriptor(), Err(McpError::Catalog(_))));
    }

    #[test]
    fn test_from_json_and_merge() {
        let json = r#"[{
            "id": "slack",
            "name": "Slack (fork)",
            "description": "Patched",
            "category": "communication",
            "tags": ["slack"],
            "installCommand": "slack-mcp"
        }, {
            "id": "jira",
            "name": "Jira",
            "description": "Issue tracking",
            "category": "integration",
            "installCommand": "uvx mcp-jira"
        }]"#;

        let extra = Marketplace::from_json(json).unwrap();
        assert_eq!(extra.find("jira").unwrap().version, "0.0.0");

        let mut market = slack_only();
        market.merge(extra);
        assert_eq!(market.len(), 2);
        assert_eq!(market.find("slack").unwrap().name, "Slack (fork)");
    }

    #[test]
    fn test_invalid_json_is_catalog_error() {
        assert!(matches!(Marketplace::from_json("{"), Err(McpError::Catalog(_))));
    }

    #[tokio::test]
    async fn test_from_config_layers_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{"id":"github","name":"GitHub Enterprise","description":"","category":"integration","installCommand":"gh-mcp"}]"#,
        )
        .unwrap();

        let config = MarketplaceConfig {
            include_builtin: true,
            catalog_path: Some(path),
            // Unreachable remote catalogs are skipped
            catalog_url: Some("http://127.0.0.1:1/catalog.json".to_string()),
        };
        let market = Marketplace::from_config(&config, &reqwest::Client::new()).await.unwrap();
        assert_eq!(market.len(), Marketplace::builtin().len());
        assert_eq!(market.find("github").unwrap().name, "GitHub Enterprise");

        let empty = MarketplaceConfig {
            include_builtin: false,
            catalog_path: None,
            catalog_url: None,
        };
        assert!(Marketplace::from_config(&empty, &reqwest::Client::new()).await.unwrap().is_empty());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{"id":"x","name":"X","description":"","category":"custom","installCommand":"x-server"}]"#,
        )
        .unwrap();

        let market = Marketplace::load_file(&path).unwrap();
        assert_eq!(market.len(), 1);
        assert!(Marketplace::load_file(&dir.path().join("missing.json")).is_err());
    }
}
