//! Linux [`Mounter`] backed by the kernel mount table.
//!
//! * mount-point checks compare the device of a path with its parent's and
//!   fall back to `/proc/self/mounts`;
//! * bind mounts go straight through `mount(2)`;
//! * filesystem mounts (davfs) spawn the `mount` helper and hand it
//!   credentials over stdin, never on its command line;
//! * forced unmounts use `umount2(2)`, degrading to a lazy detach.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use nix::mount::{MntFlags, MsFlags};
use nix::sys::stat::{SFlag, lstat};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{MountError, MountSpec, Mounter};

const PROC_MOUNTS: &str = "/proc/self/mounts";
const MOUNT_HELPER: &str = "mount";

/// [`Mounter`] for the host this process runs on.
#[derive(Debug, Clone)]
pub struct SystemMounter {
    /// Mount table to consult, normally `/proc/self/mounts`.
    mount_table: PathBuf,
    /// Helper used for non-bind mounts.
    helper: PathBuf,
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMounter {
    pub fn new() -> Self {
        Self {
            mount_table: PathBuf::from(PROC_MOUNTS),
            helper: PathBuf::from(MOUNT_HELPER),
        }
    }

    /// Read mounts from `mount_table` instead of `/proc/self/mounts`.
    pub fn with_mount_table(mut self, mount_table: impl Into<PathBuf>) -> Self {
        self.mount_table = mount_table.into();
        self
    }

    /// Use `helper` instead of `mount` for filesystem mounts.
    pub fn with_helper(mut self, helper: impl Into<PathBuf>) -> Self {
        self.helper = helper.into();
        self
    }

    async fn mount_entries(&self) -> Result<Vec<MountEntry>, MountError> {
        let contents = tokio::fs::read_to_string(&self.mount_table)
            .await
            .map_err(|source| MountError::Io {
                op: "read mount table",
                path: self.mount_table.clone(),
                source,
            })?;
        Ok(parse_mount_table(&contents))
    }

    async fn run_helper(&self, spec: &MountSpec) -> Result<(), MountError> {
        let mut cmd = Command::new(&self.helper);
        if !spec.fs_type.is_empty() {
            cmd.arg("-t").arg(&spec.fs_type);
        }
        if !spec.options.is_empty() {
            cmd.arg("-o").arg(spec.options.join(","));
        }
        cmd.arg(&spec.source)
            .arg(&spec.target)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!(?spec, helper = %self.helper.display(), "running mount helper");

        let mut child = cmd.spawn().map_err(|source| MountError::Io {
            op: "spawn mount helper for",
            path: spec.target.clone(),
            source,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            for line in stdin_lines(spec) {
                match stdin.write_all(format!("{line}\n").as_bytes()).await {
                    Ok(()) => {}
                    // The helper exited without reading; its status says why.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => break,
                    Err(source) => {
                        return Err(MountError::Io {
                            op: "write mount helper stdin for",
                            path: spec.target.clone(),
                            source,
                        });
                    }
                }
            }
            // Dropping stdin closes the pipe so the helper stops waiting.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| MountError::Io {
                op: "wait for mount helper for",
                path: spec.target.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MountError::Helper {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn is_likely_not_mount_point(&self, path: &Path) -> Result<bool, MountError> {
        let stat = lstat(path).map_err(|errno| MountError::Sys {
            op: "stat",
            path: path.to_path_buf(),
            errno,
        })?;
        // A symlink is never a mount point itself.
        if SFlag::from_bits_truncate(stat.st_mode) & SFlag::S_IFMT == SFlag::S_IFLNK {
            return Ok(true);
        }

        let parent = path.join("..");
        let parent_stat = lstat(parent.as_path()).map_err(|errno| MountError::Sys {
            op: "stat",
            path: parent,
            errno,
        })?;
        if stat.st_dev != parent_stat.st_dev {
            return Ok(false);
        }

        // Same device as the parent: still a mount point if it is a bind
        // mount from the same filesystem.
        let target = normalize(path);
        let listed = self
            .mount_entries()
            .await?
            .iter()
            .any(|entry| entry.mount_point == target);
        Ok(!listed)
    }

    async fn mount_sensitive(&self, spec: &MountSpec) -> Result<(), MountError> {
        if spec.fs_type.is_empty() && spec.is_bind() {
            let spec = spec.clone();
            return tokio::task::spawn_blocking(move || bind_mount(&spec))
                .await
                .map_err(|e| MountError::Other(format!("bind mount task: {e}")))?;
        }
        self.run_helper(spec).await
    }

    async fn device_name_and_ref_count(&self, path: &Path) -> Result<(String, usize), MountError> {
        let entries = self.mount_entries().await?;
        let target = normalize(path);
        let Some(device) = entries
            .iter()
            .find(|entry| entry.mount_point == target)
            .map(|entry| entry.device.clone())
        else {
            return Ok((String::new(), 0));
        };
        let refs = entries.iter().filter(|entry| entry.device == device).count();
        Ok((device, refs))
    }

    async fn unmount_forcefully(&self, path: &Path) -> Result<(), MountError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            match nix::mount::umount2(path.as_path(), MntFlags::MNT_FORCE) {
                Ok(()) => Ok(()),
                Err(errno) => {
                    warn!(path = %path.display(), %errno, "forced unmount failed, detaching");
                    nix::mount::umount2(path.as_path(), MntFlags::MNT_DETACH).map_err(|errno| {
                        MountError::Sys {
                            op: "umount",
                            path: path.clone(),
                            errno,
                        }
                    })
                }
            }
        })
        .await
        .map_err(|e| MountError::Other(format!("unmount task: {e}")))?
    }
}

/// What the helper reads on stdin: the value of each sensitive option,
/// then the extra stdin lines.  mount.davfs prompts for the username and
/// then the password when neither is on its command line.
fn stdin_lines(spec: &MountSpec) -> impl Iterator<Item = &str> {
    spec.sensitive_options
        .iter()
        .map(|option| option.split_once('=').map_or(option.as_str(), |(_, value)| value))
        .chain(spec.stdin.iter().map(String::as_str))
}

fn bind_mount(spec: &MountSpec) -> Result<(), MountError> {
    let mut extra = MsFlags::empty();
    for option in &spec.options {
        match option.as_str() {
            "bind" => {}
            other => match ms_flag(other) {
                Some(flag) => extra |= flag,
                None => debug!(option = other, "ignoring unsupported bind mount option"),
            },
        }
    }

    nix::mount::mount(
        Some(spec.source.as_str()),
        spec.target.as_path(),
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|errno| MountError::Sys {
        op: "bind mount",
        path: spec.target.clone(),
        errno,
    })?;

    // The kernel ignores per-mount flags on the initial bind; they only take
    // effect through a remount.
    if !extra.is_empty() {
        nix::mount::mount(
            None::<&str>,
            spec.target.as_path(),
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | extra,
            None::<&str>,
        )
        .map_err(|errno| MountError::Sys {
            op: "remount",
            path: spec.target.clone(),
            errno,
        })?;
    }
    Ok(())
}

fn ms_flag(option: &str) -> Option<MsFlags> {
    match option {
        "ro" => Some(MsFlags::MS_RDONLY),
        "noatime" => Some(MsFlags::MS_NOATIME),
        "nodiratime" => Some(MsFlags::MS_NODIRATIME),
        "relatime" => Some(MsFlags::MS_RELATIME),
        "nosuid" => Some(MsFlags::MS_NOSUID),
        "nodev" => Some(MsFlags::MS_NODEV),
        "noexec" => Some(MsFlags::MS_NOEXEC),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Mount table parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    device: String,
    mount_point: String,
}

/// Parse `/proc/self/mounts` style content.
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`, with
/// whitespace and backslashes in fields written as octal escapes.
fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            Some(MountEntry {
                device: unescape(device),
                mount_point: normalize(Path::new(&unescape(mount_point))),
            })
        })
        .collect()
}

fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(&[a, b, c]) = bytes.get(i + 1..i + 4) {
                if [a, b, c].iter().all(|d| (b'0'..=b'7').contains(d)) {
                    out.push(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'));
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mount table entries never carry a trailing slash.
fn normalize(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 {
        s.trim_end_matches('/').to_owned()
    } else {
        s.into_owned()
    }
}
