//! WebDAV node backend.
//!
//! [`WebDavNode`] implements [`CsiIdentity`] and [`CsiNode`] on top of an
//! injected [`Mounter`].  Volumes are provisioned in one of two modes,
//! chosen per call from the `provisioning_mode` volume context key:
//!
//! ```text
//! static:   Stage   -> record volume
//!           Publish -> mount <url> (davfs) at <target>
//! dynamic:  Stage   -> mount <url> (davfs) at <staging>
//!           Publish -> bind mount <staging> at <target>
//! ```
//!
//! Unpublish and Unstage consult the mount table rather than the registry
//! to decide whether anything has to be unmounted.
//!
//! # Concurrency
//!
//! Calls for one volume id are serialized through [`VolumeLocks`]; calls for
//! different ids run in parallel.  The locked section runs on its own Tokio
//! task, so a caller that gives up waiting never leaves a mount behind that
//! the registry does not know about.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::NodeConfig;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::lock::VolumeLocks;
use crate::mounter::system::SystemMounter;
use crate::mounter::{MountSpec, Mounter};
use crate::node::CsiNode;
use crate::params::{
    ClientType, ProvisioningMode, VolumeOptions, WEBDAV_FS_TYPE, WebDavConnection,
    layered_secrets, mount_flags,
};
use crate::registry::VolumeRegistry;
use crate::types::*;

/// CSI node plugin for WebDAV shares.
#[derive(Clone)]
pub struct WebDavNode {
    state: Arc<NodeState>,
}

struct NodeState {
    config: NodeConfig,
    mounter: Arc<dyn Mounter>,
    registry: VolumeRegistry,
    locks: VolumeLocks,
}

impl WebDavNode {
    pub fn new(config: NodeConfig, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            state: Arc::new(NodeState {
                config,
                mounter,
                registry: VolumeRegistry::new(),
                locks: VolumeLocks::new(),
            }),
        }
    }

    /// Node mounting through the host's kernel mount table.
    pub fn with_system_mounter(config: NodeConfig) -> Self {
        Self::new(config, Arc::new(SystemMounter::new()))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.state.config
    }

    /// What this node currently believes is mounted.
    pub fn registry(&self) -> &VolumeRegistry {
        &self.state.registry
    }

    /// Run `op` while holding the lock for `volume_id`.
    async fn serialized<T, F, Fut>(&self, volume_id: &VolumeId, op: F) -> Result<T, CsiError>
    where
        F: FnOnce(Arc<NodeState>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CsiError>> + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let id = volume_id.clone();
        tokio::spawn(async move {
            let _guard = state.locks.lock(&id).await;
            op(Arc::clone(&state)).await
        })
        .await
        .map_err(|e| CsiError::Internal(format!("lifecycle task for {volume_id} failed: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

fn required_id(volume_id: &VolumeId) -> Result<(), CsiError> {
    if volume_id.is_empty() {
        return Err(CsiError::missing("volume ID"));
    }
    Ok(())
}

fn required_path(path: Option<&str>, what: &str) -> Result<String, CsiError> {
    match path {
        Some(p) if !p.is_empty() => Ok(p.to_owned()),
        _ => Err(CsiError::missing(what)),
    }
}

fn supported_capability(cap: Option<&VolumeCapability>) -> Result<&VolumeCapability, CsiError> {
    let cap = cap.ok_or_else(|| CsiError::missing("volume capability"))?;
    if !cap.is_supported() {
        return Err(CsiError::InvalidArgument(
            "volume capability not supported".to_owned(),
        ));
    }
    Ok(cap)
}

// ---------------------------------------------------------------------------
// Remote mounts
// ---------------------------------------------------------------------------

/// A resolved remote share, one variant per [`ClientType`].
enum RemoteMount {
    WebDav(WebDavConnection),
}

impl RemoteMount {
    fn mount_spec(&self, flags: Vec<String>, target: &Path) -> MountSpec {
        match self {
            Self::WebDav(conn) => {
                let mut spec = MountSpec {
                    source: conn.url.clone(),
                    fs_type: WEBDAV_FS_TYPE.to_owned(),
                    target: target.to_path_buf(),
                    options: flags,
                    ..Default::default()
                };
                // Anonymous shares need neither; davfs reads the password
                // from stdin.
                if conn.has_credentials() {
                    spec.sensitive_options.push(format!("username={}", conn.user));
                    spec.stdin.push(conn.password.clone());
                }
                spec
            }
        }
    }
}

fn bind_mount_spec(source: &str, mut flags: Vec<String>, target: &Path) -> MountSpec {
    flags.push("bind".to_owned());
    MountSpec {
        source: source.to_owned(),
        target: target.to_path_buf(),
        options: flags,
        ..Default::default()
    }
}

impl NodeState {
    /// Pick the client and validate its connection parameters.  Node-level
    /// secrets sit under request secrets, parameters override both.
    fn resolve_remote(
        &self,
        volume_context: &HashMap<String, String>,
        secrets: &HashMap<String, String>,
    ) -> Result<RemoteMount, CsiError> {
        let secrets = layered_secrets(&self.config.secrets, secrets);
        let options = VolumeOptions::merge(volume_context, &secrets);
        match ClientType::resolve(&options, self.config.default_client) {
            ClientType::WebDav => Ok(RemoteMount::WebDav(WebDavConnection::resolve(&options)?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Mount target preparation
// ---------------------------------------------------------------------------

/// Directory a mount is about to land on.  If this call created it and the
/// mount does not complete, dropping the guard removes it again.
struct PreparedDir {
    path: PathBuf,
    created: bool,
    keep: bool,
}

impl PreparedDir {
    async fn ensure(path: &Path) -> Result<Self, CsiError> {
        let created = match tokio::fs::metadata(path).await {
            Ok(_) => false,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "creating mount directory");
                tokio::fs::create_dir_all(path)
                    .await
                    .map_err(|e| CsiError::MountFailed {
                        path: path.display().to_string(),
                        reason: format!("could not create dir: {e}"),
                    })?;
                true
            }
            Err(e) => {
                return Err(CsiError::MountFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            created,
            keep: false,
        })
    }

    fn commit(mut self) {
        self.keep = true;
    }
}

impl Drop for PreparedDir {
    fn drop(&mut self) {
        if self.created && !self.keep {
            // Empty directory created by this call: a single rmdir, run
            // inline on the runtime thread.
            if let Err(e) = std::fs::remove_dir(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove mount directory");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle steps (run under the volume lock)
// ---------------------------------------------------------------------------

impl NodeState {
    /// Create `spec.target` if needed, refuse to stack on an existing mount,
    /// then mount.
    async fn mount_at(&self, spec: &MountSpec) -> Result<(), CsiError> {
        let target = spec.target.as_path();
        let dir = PreparedDir::ensure(target).await?;

        let not_mounted = self
            .mounter
            .is_likely_not_mount_point(target)
            .await
            .map_err(|e| CsiError::Internal(format!("check mount point {}: {e}", target.display())))?;
        if !not_mounted {
            return Err(CsiError::AlreadyMounted {
                path: target.display().to_string(),
            });
        }

        debug!(
            source = %spec.source,
            fs_type = %spec.fs_type,
            target = %target.display(),
            options = ?spec.options,
            "mounting",
        );
        self.mounter
            .mount_sensitive(spec)
            .await
            .map_err(|e| CsiError::MountFailed {
                path: target.display().to_string(),
                reason: e.to_string(),
            })?;

        dir.commit();
        Ok(())
    }

    /// Number of mount table entries for `path`.
    async fn ref_count(&self, path: &Path) -> Result<usize, CsiError> {
        let (_, refs) = self
            .mounter
            .device_name_and_ref_count(path)
            .await
            .map_err(|e| CsiError::Internal(format!("failed to check if volume is mounted: {e}")))?;
        Ok(refs)
    }

    async fn unmount(&self, path: &Path) -> Result<(), CsiError> {
        self.mounter
            .unmount_forcefully(path)
            .await
            .map_err(|e| CsiError::UnmountFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    fn stage_static(&self, id: VolumeId) {
        let volume = match self.registry.pop(&id) {
            Some(mut volume) => {
                // The mode is read per call; a leftover dynamic record
                // becomes a static one.
                if volume.dynamic_provisioning {
                    debug!(volume_id = %id, "replacing dynamic record with static stage");
                }
                volume.staged = true;
                volume.dynamic_provisioning = false;
                volume.staging_mount_path.clear();
                volume
            }
            None => NodeVolume::static_staged(id),
        };
        self.registry.put(volume);
    }

    async fn stage_dynamic(&self, id: VolumeId, spec: MountSpec) -> Result<(), CsiError> {
        self.mount_at(&spec).await?;
        let staging = spec.target.display().to_string();
        info!(volume_id = %id, path = %staging, "volume staged");
        self.registry.put(NodeVolume::dynamic_staged(id, staging));
        Ok(())
    }

    async fn publish_dynamic(&self, id: VolumeId, spec: MountSpec) -> Result<(), CsiError> {
        let Some(mut volume) = self
            .registry
            .get(&id)
            .filter(|v| v.dynamic_provisioning && v.staged)
        else {
            return Err(CsiError::VolumeNotStaged(id.to_string()));
        };
        if volume.staging_mount_path != spec.source {
            warn!(
                volume_id = %id,
                staged_at = %volume.staging_mount_path,
                source = %spec.source,
                "publishing from a path other than the recorded staging path",
            );
        }

        self.mount_at(&spec).await?;
        volume.mount_path = spec.target.display().to_string();
        info!(volume_id = %id, target_path = %volume.mount_path, "volume published (bind mount)");
        self.registry.put(volume);
        Ok(())
    }

    async fn publish_static(&self, id: VolumeId, spec: MountSpec) -> Result<(), CsiError> {
        self.mount_at(&spec).await?;
        let target = spec.target.display().to_string();
        info!(volume_id = %id, target_path = %target, "volume published");
        let volume = match self.registry.pop(&id) {
            Some(mut volume) => {
                volume.mount_path = target;
                volume
            }
            None => NodeVolume::static_published(id, target),
        };
        self.registry.put(volume);
        Ok(())
    }

    async fn unpublish(&self, id: VolumeId, target: String) -> Result<(), CsiError> {
        if self.registry.get(&id).is_none() {
            debug!(volume_id = %id, "volume not registered on this node");
        }

        let path = Path::new(&target);
        if self.ref_count(path).await? == 0 {
            debug!(volume_id = %id, target_path = %target, "target not mounted");
            self.forget_publication(&id, &target);
            return Ok(());
        }

        self.unmount(path).await?;
        self.forget_publication(&id, &target);

        match tokio::fs::remove_dir(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CsiError::UnmountFailed {
                    path: target,
                    reason: format!("remove target dir: {e}"),
                });
            }
        }
        info!(volume_id = %id, target_path = %target, "volume unpublished");
        Ok(())
    }

    /// Drop `target` from the registry: a volume that was never staged
    /// goes away entirely, a staged one stays for Unstage.
    fn forget_publication(&self, id: &VolumeId, target: &str) {
        let Some(mut volume) = self.registry.pop(id) else {
            return;
        };
        let published_here = volume.mount_path.is_empty() || volume.mount_path == target;
        if !volume.staged && published_here {
            debug!(volume_id = %id, "registry entry removed");
            return;
        }
        if volume.mount_path == target {
            volume.mount_path.clear();
        }
        self.registry.put(volume);
    }

    async fn unstage(&self, id: VolumeId, staging: String) -> Result<(), CsiError> {
        match self.registry.get(&id) {
            Some(volume) if !volume.dynamic_provisioning => {
                self.registry.pop(&id);
                debug!(volume_id = %id, "static volume unstaged, nothing mounted");
                return Ok(());
            }
            Some(volume) if !volume.mount_path.is_empty() => {
                warn!(
                    volume_id = %id,
                    mount_path = %volume.mount_path,
                    "unstaging a volume that is still published",
                );
            }
            Some(_) => {}
            None => debug!(volume_id = %id, "volume not registered on this node"),
        }

        let path = Path::new(&staging);
        if self.ref_count(path).await? == 0 {
            debug!(volume_id = %id, path = %staging, "staging path not mounted");
            self.registry.pop(&id);
            return Ok(());
        }

        self.unmount(path).await?;
        self.registry.pop(&id);
        info!(volume_id = %id, path = %staging, "volume unstaged");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for WebDavNode {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.state.config.plugin_name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        // Node-only plugin: no controller service, no topology.
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for WebDavNode {
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        required_id(&req.volume_id)?;
        let id = req.volume_id.clone();

        match ProvisioningMode::from_context(&req.volume_context) {
            ProvisioningMode::Static => {
                self.serialized(&req.volume_id, move |state| async move {
                    state.stage_static(id);
                    Ok(())
                })
                .await
            }
            ProvisioningMode::Dynamic => {
                let staging = required_path(
                    req.staging_target_path.as_deref(),
                    "staging target path",
                )?;
                let cap = supported_capability(req.volume_capability.as_ref())?;
                let flags = mount_flags(false, cap.mount_flags());
                let remote = self
                    .state
                    .resolve_remote(&req.volume_context, &req.secrets)?;
                let spec = remote.mount_spec(flags, Path::new(&staging));

                self.serialized(&req.volume_id, move |state| async move {
                    state.stage_dynamic(id, spec).await
                })
                .await
            }
        }
    }

    #[instrument(skip(self))]
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError> {
        required_id(volume_id)?;
        let staging = required_path(Some(staging_target_path), "staging target path")?;
        let id = volume_id.clone();
        self.serialized(volume_id, move |state| async move {
            state.unstage(id, staging).await
        })
        .await
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        required_id(&req.volume_id)?;
        let target = required_path(Some(req.target_path.as_str()), "target path")?;
        let cap = supported_capability(req.volume_capability.as_ref())?;
        let flags = mount_flags(req.read_only, cap.mount_flags());
        let id = req.volume_id.clone();

        match ProvisioningMode::from_context(&req.volume_context) {
            ProvisioningMode::Dynamic => {
                let staging = required_path(
                    req.staging_target_path.as_deref(),
                    "staging target path",
                )?;
                let spec = bind_mount_spec(&staging, flags, Path::new(&target));
                self.serialized(&req.volume_id, move |state| async move {
                    state.publish_dynamic(id, spec).await
                })
                .await
            }
            ProvisioningMode::Static => {
                let remote = self
                    .state
                    .resolve_remote(&req.volume_context, &req.secrets)?;
                let spec = remote.mount_spec(flags, Path::new(&target));
                self.serialized(&req.volume_id, move |state| async move {
                    state.publish_static(id, spec).await
                })
                .await
            }
        }
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        required_id(volume_id)?;
        let target = required_path(Some(target_path), "target path")?;
        let id = volume_id.clone();
        self.serialized(volume_id, move |state| async move {
            state.unpublish(id, target).await
        })
        .await
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![NodeCapability::StageUnstageVolume])
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.state.config.node_id.clone(),
            max_volumes: 0,
            accessible_topology: None,
        })
    }
}
