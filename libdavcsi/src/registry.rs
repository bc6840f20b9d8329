//! In-memory registry of node volumes.
//!
//! [`VolumeRegistry`] is what this node believes is mounted for each volume.
//! It is a cache of intent: when it disagrees with the mount table, the
//! mount table wins.  Each operation is atomic on its own; sequencing
//! several operations for one volume is the caller's job (see
//! [`crate::lock::VolumeLocks`]).

use dashmap::DashMap;

use crate::types::{NodeVolume, VolumeId};

/// Concurrent map from volume id to [`NodeVolume`].
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: DashMap<VolumeId, NodeVolume>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `volume`, replacing any entry with the same id.
    pub fn put(&self, volume: NodeVolume) {
        self.volumes.insert(volume.id.clone(), volume);
    }

    /// Copy of the entry for `id`, if any.
    pub fn get(&self, id: &VolumeId) -> Option<NodeVolume> {
        self.volumes.get(id).map(|entry| entry.value().clone())
    }

    /// Remove and return the entry for `id`.
    pub fn pop(&self, id: &VolumeId) -> Option<NodeVolume> {
        self.volumes.remove(id).map(|(_, volume)| volume)
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Ids of all registered volumes, in no particular order.
    pub fn ids(&self) -> Vec<VolumeId> {
        self.volumes.iter().map(|entry| entry.key().clone()).collect()
    }
}
