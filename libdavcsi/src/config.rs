//! Node plugin configuration.
//!
//! Settings come from an optional YAML file and environment variables, the
//! latter taking precedence:
//!
//! - `DAVCSI_CONFIG`: path of a YAML file deserialized into [`NodeConfig`].
//! - `DAVCSI_NODE_ID`: node identifier reported by `GetInfo`.  Defaults to
//!   the host name.
//! - `DAVCSI_DEFAULT_CLIENT`: client used when a volume does not name one.
//!   Defaults to `webdav`.
//! - `DAVCSI_SECRETS_FILE`: YAML map of node-level default secrets
//!   (e.g. a shared `user`/`password`), layered under per-volume secrets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::params::ClientType;

pub const ENV_CONFIG: &str = "DAVCSI_CONFIG";
pub const ENV_NODE_ID: &str = "DAVCSI_NODE_ID";
pub const ENV_DEFAULT_CLIENT: &str = "DAVCSI_DEFAULT_CLIENT";
pub const ENV_SECRETS_FILE: &str = "DAVCSI_SECRETS_FILE";

/// Name reported through the identity service unless configured otherwise.
pub const DEFAULT_PLUGIN_NAME: &str = "webdav.csi.cyverse.org";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unknown client type {0:?}")]
    UnknownClient(String),

    #[error("cannot determine node id: {0}")]
    NodeId(String),
}

/// Settings of one node plugin instance.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// Identifier of this node; empty means "use the host name".
    pub node_id: String,
    pub plugin_name: String,
    pub default_client: ClientType,
    /// Node-level default secrets.  Request secrets override them.
    pub secrets: HashMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            plugin_name: DEFAULT_PLUGIN_NAME.to_owned(),
            default_client: ClientType::WebDav,
            secrets: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.secrets.keys().collect();
        keys.sort();
        f.debug_struct("NodeConfig")
            .field("node_id", &self.node_id)
            .field("plugin_name", &self.plugin_name)
            .field("default_client", &self.default_client)
            .field("secrets", &keys)
            .finish()
    }
}

impl NodeConfig {
    /// Configuration for a node with a fixed id and defaults elsewhere.
    pub fn with_node_id(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let mut config = match non_empty(ENV_CONFIG) {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };

        if let Some(node_id) = non_empty(ENV_NODE_ID) {
            config.node_id = node_id;
        }
        if let Some(client) = non_empty(ENV_DEFAULT_CLIENT) {
            config.default_client =
                ClientType::parse(&client).ok_or(ConfigError::UnknownClient(client))?;
        }
        if let Some(path) = non_empty(ENV_SECRETS_FILE) {
            let secrets: HashMap<String, String> = read_yaml(Path::new(&path))?;
            config.secrets.extend(secrets);
        }
        if config.node_id.is_empty() {
            config.node_id = hostname()?;
        }

        debug!(?config, "node configuration loaded");
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_yaml(path.as_ref())
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn hostname() -> Result<String, ConfigError> {
    let name = nix::unistd::gethostname().map_err(|e| ConfigError::NodeId(e.to_string()))?;
    name.into_string()
        .map_err(|raw| ConfigError::NodeId(format!("non-UTF8 host name {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, String)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_use_host_name() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert!(!config.node_id.is_empty());
        assert_eq!(config.default_client, ClientType::WebDav);
        assert_eq!(config.plugin_name, DEFAULT_PLUGIN_NAME);
        assert!(config.secrets.is_empty());
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.yaml");
        std::fs::write(&file, "node_id: from-file\nsecrets:\n  user: alice\n").unwrap();
        let secrets = dir.path().join("secrets.yaml");
        std::fs::write(&secrets, "password: s3cret\n").unwrap();

        let config = NodeConfig::from_lookup(lookup(&[
            (ENV_CONFIG, file.display().to_string()),
            (ENV_NODE_ID, "node-7".into()),
            (ENV_DEFAULT_CLIENT, "WebDAV".into()),
            (ENV_SECRETS_FILE, secrets.display().to_string()),
        ]))
        .unwrap();

        assert_eq!(config.node_id, "node-7");
        assert_eq!(config.secrets["user"], "alice");
        assert_eq!(config.secrets["password"], "s3cret");
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn unknown_client_is_rejected() {
        let result = NodeConfig::from_lookup(lookup(&[(ENV_DEFAULT_CLIENT, "nfs".into())]));
        assert!(matches!(result, Err(ConfigError::UnknownClient(_))));
    }

    #[test]
    fn missing_file_is_reported() {
        let result = NodeConfig::from_yaml_file("/nonexistent/davcsi.yaml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
