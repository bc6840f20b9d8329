//! Core node-side types: volume ids, capabilities, requests, node state.
//!
//! Request types mirror the fields the CSI node RPCs carry.  Optional fields
//! are `Option`s; an empty string inside `Some` is treated the same as a
//! missing value by the orchestrator, because that is how protobuf encodes
//! an unset string.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct VolumeId(pub String);

impl VolumeId {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// CSI access modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Mode was not set by the caller.
    Unknown,
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
    SingleNodeSingleWriter,
    SingleNodeMultiWriter,
}

/// How the volume is exposed to the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// Exposed as a mounted filesystem.
    Mount {
        /// Filesystem type requested by the caller, if any.
        #[serde(default)]
        fs_type: String,
        /// Additional mount flags (e.g. `"noatime"`).
        #[serde(default)]
        mount_flags: Vec<String>,
    },
    /// Exposed as a raw block device.
    Block,
}

/// Describes the capability a workload requires from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    pub access_type: AccessType,
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// A mount capability with the given access mode and flags.
    pub fn mount(access_mode: AccessMode, mount_flags: Vec<String>) -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags,
            },
            access_mode,
        }
    }

    /// Mount flags declared by the capability; empty for block access.
    pub fn mount_flags(&self) -> &[String] {
        match &self.access_type {
            AccessType::Mount { mount_flags, .. } => mount_flags,
            AccessType::Block => &[],
        }
    }

    /// A WebDAV share can only be exposed as a filesystem, and the access
    /// mode must be one the caller actually set.
    pub fn is_supported(&self) -> bool {
        matches!(self.access_type, AccessType::Mount { .. })
            && self.access_mode != AccessMode::Unknown
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self::mount(AccessMode::SingleNodeWriter, Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Node volume state
// ---------------------------------------------------------------------------

/// This node's knowledge of one volume's mount state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NodeVolume {
    pub id: VolumeId,
    /// Where the shared mount lives; only set for staged dynamic volumes.
    #[serde(default)]
    pub staging_mount_path: String,
    /// Where the volume is currently published; empty until Publish.
    #[serde(default)]
    pub mount_path: String,
    pub dynamic_provisioning: bool,
    /// Set once Stage completed, in either provisioning mode.  Decides
    /// whether Unpublish may drop the entry or must leave it for Unstage.
    pub staged: bool,
}

impl NodeVolume {
    /// Marker recorded when a statically provisioned volume is staged.
    pub fn static_staged(id: VolumeId) -> Self {
        Self {
            id,
            staged: true,
            ..Default::default()
        }
    }

    /// Entry for a dynamically provisioned volume mounted at `staging_path`.
    pub fn dynamic_staged(id: VolumeId, staging_path: impl Into<String>) -> Self {
        Self {
            id,
            staging_mount_path: staging_path.into(),
            dynamic_provisioning: true,
            staged: true,
            ..Default::default()
        }
    }

    /// Entry for a static volume published without a preceding Stage.
    pub fn static_published(id: VolumeId, mount_path: impl Into<String>) -> Self {
        Self {
            id,
            mount_path: mount_path.into(),
            ..Default::default()
        }
    }

    pub fn state(&self) -> VolumeState {
        match (self.mount_path.is_empty(), self.dynamic_provisioning) {
            (true, _) => VolumeState::StagedOnly,
            (false, false) => VolumeState::PublishedStatic,
            (false, true) => VolumeState::PublishedDynamic,
        }
    }
}

/// Lifecycle state of a registered volume on this node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeState {
    /// Staged (dynamic: shared mount exists; static: marker only), not published.
    StagedOnly,
    /// Remote share mounted directly at the publish path.
    PublishedStatic,
    /// Staging mount bind-mounted at the publish path.
    PublishedDynamic,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to stage a volume on this node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    pub volume_id: VolumeId,
    /// Global staging mount point; only used for dynamic provisioning.
    #[serde(default)]
    pub staging_target_path: Option<String>,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Opaque context carried from volume creation.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Request to publish a volume at a workload path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    pub volume_id: VolumeId,
    /// Path the workload will see the volume at.
    pub target_path: String,
    /// Source of the bind mount in dynamic mode.
    #[serde(default)]
    pub staging_target_path: Option<String>,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"webdav.csi.cyverse.org"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised through the identity service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// Capabilities of the node service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    /// The node implements Stage / Unstage in addition to Publish / Unpublish.
    StageUnstageVolume,
}

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host; `0` means unlimited.
    pub max_volumes: u64,
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
        assert!(VolumeId::default().is_empty());
    }

    #[test]
    fn block_and_unknown_capabilities_are_unsupported() {
        assert!(VolumeCapability::default().is_supported());

        let block = VolumeCapability {
            access_type: AccessType::Block,
            access_mode: AccessMode::SingleNodeWriter,
        };
        assert!(!block.is_supported());
        assert!(block.mount_flags().is_empty());

        let unknown = VolumeCapability::mount(AccessMode::Unknown, vec![]);
        assert!(!unknown.is_supported());
    }

    #[test]
    fn node_volume_state() {
        let id = VolumeId::from("v1");
        let mut vol = NodeVolume::dynamic_staged(id.clone(), "/s");
        assert_eq!(vol.state(), VolumeState::StagedOnly);
        vol.mount_path = "/t".into();
        assert_eq!(vol.state(), VolumeState::PublishedDynamic);

        let vol = NodeVolume::static_published(id.clone(), "/t");
        assert_eq!(vol.state(), VolumeState::PublishedStatic);
        assert!(!vol.staged);

        let vol = NodeVolume::static_staged(id);
        assert!(vol.staged);
        assert!(vol.staging_mount_path.is_empty());
        assert_eq!(vol.state(), VolumeState::StagedOnly);
    }
}
