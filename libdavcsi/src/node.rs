//! CSI Node service trait.
//!
//! The Node service runs on each worker node and makes a volume available to
//! workloads:
//!
//! 1. **Stage**: mount the share once at a node-global staging path
//!    (dynamic provisioning) or just record the volume (static).
//! 2. **Publish**: expose the volume at the workload's target path, either
//!    by bind-mounting the staging path or by mounting the share directly.
//! 3. **Unpublish**: unmount the target path.
//! 4. **Unstage**: unmount the staging path.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId,
};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume on this node.
    ///
    /// Staging a dynamic volume whose staging path is already mounted is
    /// rejected; the caller must unstage first.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Unstage a volume.
    ///
    /// This is idempotent: an already-unmounted staging path is a success.
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Publish a volume at `req.target_path`.
    ///
    /// Fails with [`CsiError::AlreadyMounted`] if the target is already a
    /// mount point.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume.
    ///
    /// This is idempotent: an already-unmounted target is a success.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Capabilities of the node service.
    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}
