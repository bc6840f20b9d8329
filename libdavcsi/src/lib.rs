//! # libdavcsi: CSI node plugin for WebDAV shares
//!
//! `libdavcsi` implements the node half of the [Container Storage
//! Interface][csi] for remote WebDAV collections mounted through `davfs`.
//! Volumes are either mounted straight at each workload target (static
//! provisioning) or mounted once at a staging path and bind-mounted into
//! each target (dynamic provisioning).  The crate follows the RK8s
//! conventions: Tokio async runtime, `tracing` for observability and
//! `thiserror` for structured errors.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `NodeVolume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum and its CSI status codes. |
//! | [`params`] | Volume option merge and WebDAV connection parameters. |
//! | [`config`] | [`NodeConfig`] loaded from YAML and the environment. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery and health. |
//! | [`node`] | [`CsiNode`] trait: stage, publish, unpublish, unstage. |
//! | [`mounter`] | [`Mounter`] capability and its Linux implementation. |
//! | [`registry`] | In-memory record of volumes on this node. |
//! | [`lock`] | Per-volume serialization of lifecycle calls. |
//! | [`backend`] | The WebDAV node backend. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod config;
pub mod error;
pub mod identity;
pub mod lock;
pub mod mounter;
pub mod node;
pub mod params;
pub mod registry;
pub mod types;

pub use backend::webdav::WebDavNode;
pub use config::NodeConfig;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use mounter::Mounter;
pub use node::CsiNode;
pub use types::*;
