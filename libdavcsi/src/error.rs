//! CSI error types.
//!
//! Every node operation fails with a [`CsiError`].  The enum derives
//! [`thiserror::Error`] and [`Serialize`]/[`Deserialize`] so an RPC layer can
//! carry it verbatim, and [`CsiError::code`] maps each variant onto the status
//! code the CSI protocol expects the plugin to return.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::ParamError;

/// Unified error type for CSI node operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied a missing or invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A dynamically provisioned volume was published before being staged.
    #[error("volume {0} is not staged on this node")]
    VolumeNotStaged(String),

    /// The target path is already a mount point.
    #[error("{path} is already mounted")]
    AlreadyMounted {
        /// Path that was expected to be unmounted.
        path: String,
    },

    /// A mount operation (or preparing its target directory) failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation (or removing its directory) failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Status codes a CSI node plugin reports back to the container orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusCode {
    InvalidArgument,
    FailedPrecondition,
    Internal,
}

impl CsiError {
    /// Shorthand for a missing required request field.
    pub fn missing(what: &str) -> Self {
        Self::InvalidArgument(format!("{what} not provided"))
    }

    /// Protocol status code for this error.
    ///
    /// An already-mounted target is a conflict on our side but the protocol
    /// has no dedicated code for it, so it is reported as `Internal`.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::VolumeNotStaged(_) => StatusCode::FailedPrecondition,
            Self::AlreadyMounted { .. }
            | Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::Internal(_) => StatusCode::Internal,
        }
    }
}

impl From<ParamError> for CsiError {
    fn from(e: ParamError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}
