//! Per-volume serialization of lifecycle calls.
//!
//! Checking a mount point, creating a directory, mounting and recording the
//! result spans several awaits.  Holding the lock for a volume id across that
//! sequence makes it atomic with respect to other calls on the same id,
//! while calls on different ids never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::VolumeId;

/// Table of per-volume async mutexes.  Entries are removed again once no
/// caller holds or waits for them.
#[derive(Debug, Default)]
pub struct VolumeLocks {
    locks: DashMap<VolumeId, Arc<Mutex<()>>>,
}

/// Held while a lifecycle call for one volume is in progress.
#[derive(Debug)]
pub struct VolumeLockGuard<'a> {
    id: VolumeId,
    locks: &'a DashMap<VolumeId, Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other call holds the lock for `id`, then take it.
    pub async fn lock(&self, id: &VolumeId) -> VolumeLockGuard<'_> {
        let mutex = Arc::clone(
            self.locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = mutex.lock_owned().await;
        VolumeLockGuard {
            id: id.clone(),
            locks: &self.locks,
            guard: Some(guard),
        }
    }

    /// Number of ids with an active or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for VolumeLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table itself still references the mutex: nobody is
        // waiting, so the entry can go.
        self.locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_id_is_serialized() {
        let locks = Arc::new(VolumeLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _guard = locks.lock(&VolumeId::from("vol-1")).await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_ids_do_not_block() {
        let locks = VolumeLocks::new();
        let _a = locks.lock(&VolumeId::from("vol-a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(&VolumeId::from("vol-b")))
            .await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entry_is_removed_after_release() {
        let locks = VolumeLocks::new();
        {
            let _guard = locks.lock(&VolumeId::from("vol-1")).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
