//! Mount execution capability.
//!
//! The orchestrator never touches the mount table itself; every mount,
//! unmount and mount-point query goes through a [`Mounter`].  The
//! [`system`] module holds the Linux implementation.

pub mod system;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Failures reported by a [`Mounter`].
#[derive(Debug, Error)]
pub enum MountError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} {path}: {errno}")]
    Sys {
        op: &'static str,
        path: PathBuf,
        errno: nix::errno::Errno,
    },

    /// The external mount helper exited unsuccessfully.
    #[error("mount helper exited with {status}: {stderr}")]
    Helper { status: String, stderr: String },

    #[error("{0}")]
    Other(String),
}

/// Everything needed to perform one mount.
///
/// `sensitive_options` and `stdin` carry credentials.  They are handed to
/// the mount helper but never logged and never placed in its arguments; the
/// [`fmt::Debug`] impl redacts them.
#[derive(Clone, Default)]
pub struct MountSpec {
    pub source: String,
    /// Filesystem type; empty for bind mounts.
    pub fs_type: String,
    pub target: PathBuf,
    pub options: Vec<String>,
    pub sensitive_options: Vec<String>,
    /// Lines written to the helper's standard input.
    pub stdin: Vec<String>,
}

impl MountSpec {
    pub fn is_bind(&self) -> bool {
        self.options.iter().any(|o| o == "bind")
    }
}

impl fmt::Debug for MountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountSpec")
            .field("source", &self.source)
            .field("fs_type", &self.fs_type)
            .field("target", &self.target)
            .field("options", &self.options)
            .field(
                "sensitive_options",
                &format_args!("<{} redacted>", self.sensitive_options.len()),
            )
            .field("stdin", &format_args!("<{} redacted>", self.stdin.len()))
            .finish()
    }
}

/// Mount / unmount capability the lifecycle orchestrator depends on.
///
/// Implementations may assume they are never called concurrently for the
/// same path.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// `true` when `path` is most likely not a mount point.  Cheap check:
    /// bind mounts of a directory onto the same filesystem may be missed.
    async fn is_likely_not_mount_point(&self, path: &Path) -> Result<bool, MountError>;

    /// Mount according to `spec`.
    async fn mount_sensitive(&self, spec: &MountSpec) -> Result<(), MountError>;

    /// Device mounted at `path` and the number of mount table entries that
    /// refer to it.  A count of `0` means `path` is not mounted.
    async fn device_name_and_ref_count(&self, path: &Path) -> Result<(String, usize), MountError>;

    /// Unmount `path`, forcing it if a regular unmount does not succeed.
    async fn unmount_forcefully(&self, path: &Path) -> Result<(), MountError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_credentials() {
        let spec = MountSpec {
            source: "https://dav.example.org/share".into(),
            fs_type: "davfs".into(),
            target: PathBuf::from("/mnt/share"),
            options: vec!["ro".into()],
            sensitive_options: vec!["username=bob".into()],
            stdin: vec!["hunter2".into()],
        };
        let rendered = format!("{spec:?}");
        assert!(rendered.contains("dav.example.org"));
        assert!(!rendered.contains("bob"));
        assert!(!rendered.contains("hunter2"));
        assert!(!spec.is_bind());
    }
}
