//! Node configuration, loaded once at startup from TOML.

use mmr_core::DEFAULT_NODE_COUNT;
use mmr_db::{Namespace, ValidationAction};
use mmr_sync::{HostAndPort, ReplicationConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub replication: ReplicationConfig,
    pub collections: CollectionsSection,
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Slot of this node in every vector time, in `[0, node_count)`.
    pub id: u32,
    pub node_count: usize,
    pub host: String,
    pub port: u16,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: 0,
            node_count: DEFAULT_NODE_COUNT,
            host: "localhost".to_string(),
            port: 27017,
        }
    }
}

impl NodeSection {
    pub fn address(&self) -> HostAndPort {
        HostAndPort::new(self.host.clone(), self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionsSection {
    /// Namespaces under multi-master replication.
    pub replicated: Vec<Namespace>,
    pub validation_action: ValidationAction,
    /// Top-level fields every document of a namespace must carry.
    pub required_fields: BTreeMap<Namespace, Vec<String>>,
}

impl Default for CollectionsSection {
    fn default() -> Self {
        Self {
            replicated: vec![Namespace::new("mm_replication", "MultiMasterCollection")],
            validation_action: ValidationAction::Error,
            required_fields: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let node = &self.node;
        if node.node_count == 0 {
            return Err(ConfigError::Invalid("node_count must be at least 1".to_string()));
        }
        if node.id as usize >= node.node_count {
            return Err(ConfigError::Invalid(format!(
                "node id {} is out of range for {} nodes",
                node.id, node.node_count
            )));
        }
        let repl = &self.replication;
        if repl.apply_tier && repl.upstream.is_none() {
            return Err(ConfigError::Invalid(
                "apply_tier requires replication.upstream".to_string(),
            ));
        }
        if repl.hub && repl.peers.is_empty() {
            return Err(ConfigError::Invalid("hub requires replication.peers".to_string()));
        }
        if repl.peers.contains(&node.address()) || repl.upstream.as_ref() == Some(&node.address()) {
            return Err(ConfigError::Invalid(
                "a node cannot replicate from itself".to_string(),
            ));
        }
        Ok(())
    }
}
