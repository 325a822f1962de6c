//! MediaSync Configuration
//!
//! This module provides configuration structures for the MediaSync
//! replication server and its batch client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::id::NodeId;

/// Main MediaSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSyncConfig {
    /// Server-specific configuration
    pub node: NodeConfig,

    /// Media store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Network-wide sharing switches
    #[serde(default)]
    pub sharing: SharingConfig,

    /// Replication tuning
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Nodes registered at startup
    #[serde(default)]
    pub nodes: Vec<NodeSeed>,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name of this server (used in logs and status output)
    pub name: String,

    /// Data directory for the media store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Node that is active when no request has switched context
    #[serde(default = "default_main_node")]
    pub main_node: NodeId,
}

/// Media store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// SQLite database path (defaults to `<data_dir>/media.db`)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Sharing switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharingConfig {
    /// Replicate uploads to paired nodes
    #[serde(default = "default_true")]
    pub share_media: bool,

    /// Deleting an asset anywhere deletes the original and every copy
    #[serde(default)]
    pub delete_shared_media: bool,
}

/// Replication tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Batch size used when a request does not name one
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Upper bound on a requested batch size
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// How much the client shrinks the batch after a failed request
    #[serde(default = "default_batch_shrink_step")]
    pub batch_shrink_step: usize,

    /// MIME type prefixes that are never replicated (e.g. "video/")
    #[serde(default)]
    pub skip_mime_types: Vec<String>,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// A node registered at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSeed {
    /// Node ID
    pub id: NodeId,

    /// Public base URL of the node, used to rewrite asset URLs on copies
    pub url: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/mediasync")
}

fn default_main_node() -> NodeId {
    NodeId(1)
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    10
}

fn default_max_batch_size() -> usize {
    999
}

fn default_batch_shrink_step() -> usize {
    2
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            share_media: true,
            delete_shared_media: false,
        }
    }
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            max_batch_size: default_max_batch_size(),
            batch_shrink_step: default_batch_shrink_step(),
            skip_mime_types: Vec::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl MediaSyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: MediaSyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.name.is_empty() {
            return Err(crate::Error::Config("node.name cannot be empty".into()));
        }

        if self.replication.default_batch_size == 0 {
            return Err(crate::Error::Config(
                "replication.default_batch_size must be at least 1".into(),
            ));
        }

        if self.replication.default_batch_size > self.replication.max_batch_size {
            return Err(crate::Error::Config(format!(
                "replication.default_batch_size ({}) exceeds max_batch_size ({})",
                self.replication.default_batch_size, self.replication.max_batch_size
            )));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(crate::Error::Config(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for seed in &self.nodes {
            if !seen.insert(seed.id) {
                return Err(crate::Error::Config(format!(
                    "node {} is listed more than once",
                    seed.id
                )));
            }
            if seed.url.is_empty() {
                return Err(crate::Error::Config(format!("node {} has an empty url", seed.id)));
            }
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Get the SQLite store path
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("media.db"))
    }

    /// Clamp a requested batch size into `1..=max_batch_size`, falling back
    /// to the default when none was given
    pub fn effective_batch_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.replication.default_batch_size)
            .clamp(1, self.replication.max_batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
name = "media-1"
data_dir = "/var/lib/mediasync"

[sharing]
share_media = true
delete_shared_media = true

[replication]
default_batch_size = 5
skip_mime_types = ["video/"]

[[nodes]]
id = 1
url = "https://example.com"

[[nodes]]
id = 2
url = "https://shop.example.com"
"#;

        let config = MediaSyncConfig::from_str(toml).unwrap();
        assert_eq!(config.node.name, "media-1");
        assert_eq!(config.node.main_node, NodeId(1));
        assert!(config.sharing.delete_shared_media);
        assert_eq!(config.replication.default_batch_size, 5);
        assert_eq!(config.replication.batch_shrink_step, 2);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/mediasync/media.db"));
    }

    #[test]
    fn test_defaults() {
        let config = MediaSyncConfig::from_str("[node]\nname = \"n\"\n").unwrap();
        assert!(config.sharing.share_media);
        assert!(!config.sharing.delete_shared_media);
        assert_eq!(config.replication.default_batch_size, 10);
        assert_eq!(config.api.bind_address, "0.0.0.0:8080");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_effective_batch_size() {
        let config = MediaSyncConfig::from_str("[node]\nname = \"n\"\n").unwrap();
        assert_eq!(config.effective_batch_size(None), 10);
        assert_eq!(config.effective_batch_size(Some(0)), 1);
        assert_eq!(config.effective_batch_size(Some(5000)), 999);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(MediaSyncConfig::from_str("[node]\nname = \"\"\n").is_err());

        let dup = r#"
[node]
name = "n"

[[nodes]]
id = 1
url = "https://a"

[[nodes]]
id = 1
url = "https://b"
"#;
        assert!(matches!(MediaSyncConfig::from_str(dup), Err(crate::Error::Config(_))));

        let bad_format = "[node]\nname = \"n\"\n[logging]\nformat = \"xml\"\n";
        assert!(MediaSyncConfig::from_str(bad_format).is_err());
    }
}
