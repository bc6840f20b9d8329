//! Identity service of the WebDAV node plugin.
//!
//! The plugin runs on every node and ships no controller: volumes are
//! created cluster-side and only mounted here, so the identity service
//! advertises no plugin capabilities beyond the node service itself.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// Name, version and liveness of a node plugin.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Configured plugin name and the crate version.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// `true` while the plugin can serve node calls.
    async fn probe(&self) -> Result<bool, CsiError>;

    /// Plugin-level capabilities.  Empty for a node-only plugin: no
    /// controller service, no topology constraints.
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}
