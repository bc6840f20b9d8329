//! In-memory [`Mounter`] for orchestrator tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MountError, MountSpec, Mounter};

/// Calls observed by [`FakeMounter`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MountCall {
    Mount {
        source: String,
        fs_type: String,
        target: PathBuf,
        options: Vec<String>,
    },
    Unmount(PathBuf),
}

#[derive(Default)]
struct State {
    /// target → source
    mounts: HashMap<PathBuf, String>,
    calls: Vec<MountCall>,
    specs: Vec<MountSpec>,
    fail_mounts: bool,
    fail_unmounts: bool,
}

/// Keeps a mount table in memory and records every call.
#[derive(Default)]
pub(crate) struct FakeMounter {
    state: Mutex<State>,
}

impl FakeMounter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_mounts(&self, fail: bool) {
        self.state.lock().unwrap().fail_mounts = fail;
    }

    pub(crate) fn fail_unmounts(&self, fail: bool) {
        self.state.lock().unwrap().fail_unmounts = fail;
    }

    /// Pretend something else already mounted `target`.
    pub(crate) fn preload(&self, target: &Path, source: &str) {
        self.state
            .lock()
            .unwrap()
            .mounts
            .insert(target.to_path_buf(), source.to_owned());
    }

    pub(crate) fn is_mounted(&self, target: &Path) -> bool {
        self.state.lock().unwrap().mounts.contains_key(target)
    }

    pub(crate) fn mount_count(&self) -> usize {
        self.state.lock().unwrap().mounts.len()
    }

    pub(crate) fn calls(&self) -> Vec<MountCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Full specs of successful mounts, credentials included.
    pub(crate) fn specs(&self) -> Vec<MountSpec> {
        self.state.lock().unwrap().specs.clone()
    }
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn is_likely_not_mount_point(&self, path: &Path) -> Result<bool, MountError> {
        if !path.exists() {
            return Err(MountError::Other(format!("{} does not exist", path.display())));
        }
        Ok(!self.is_mounted(path))
    }

    async fn mount_sensitive(&self, spec: &MountSpec) -> Result<(), MountError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_mounts {
            return Err(MountError::Other("injected mount failure".into()));
        }
        state.calls.push(MountCall::Mount {
            source: spec.source.clone(),
            fs_type: spec.fs_type.clone(),
            target: spec.target.clone(),
            options: spec.options.clone(),
        });
        state.specs.push(spec.clone());
        state.mounts.insert(spec.target.clone(), spec.source.clone());
        Ok(())
    }

    async fn device_name_and_ref_count(&self, path: &Path) -> Result<(String, usize), MountError> {
        let state = self.state.lock().unwrap();
        Ok(match state.mounts.get(path) {
            Some(source) => (source.clone(), 1),
            None => (String::new(), 0),
        })
    }

    async fn unmount_forcefully(&self, path: &Path) -> Result<(), MountError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_unmounts {
            return Err(MountError::Other("injected unmount failure".into()));
        }
        state.calls.push(MountCall::Unmount(path.to_path_buf()));
        state.mounts.remove(path);
        Ok(())
    }
}
