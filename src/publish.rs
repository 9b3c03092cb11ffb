//! Versioned, thread-safe publication of the growing map.
//!
//! A single reconstruction worker mutates the map; any number of consumer
//! threads read consistent copies. All mutation goes through
//! [`SharedMap::publish`], which bumps the snapshot version and wakes
//! waiting consumers inside the same critical section. Readers hold the
//! lock only for the duration of their copy.
//!
//! The processing status is an independent atomic: setting it to
//! [`ProcStatus::Finish`] from any thread is a cooperative cancellation
//! request which the worker honors at its per-view loop boundary.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::map::{ColoredPoint, Map3D, ViewObservations};

/// Lifecycle of the reconstruction worker. The transition to `Finish` is
/// one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcStatus {
    Reconstruction = 0,
    Finish = 1,
}

impl ProcStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ProcStatus::Reconstruction,
            _ => ProcStatus::Finish,
        }
    }
}

/// Shared handle over the map, its snapshot version and the worker status.
pub struct SharedMap {
    map: Mutex<Map3D>,
    updated: Condvar,
    version: AtomicU64,
    status: AtomicU8,
}

impl SharedMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            map: Mutex::new(Map3D::new()),
            updated: Condvar::new(),
            version: AtomicU64::new(0),
            status: AtomicU8::new(ProcStatus::Reconstruction as u8),
        })
    }

    /// Apply a mutation to the map, bump the version, wake consumers.
    ///
    /// This is the only mutation path; the version increment and the
    /// notification happen before the lock is released, so a snapshot at
    /// version `V` never contains state published after `V`.
    pub fn publish<R>(&self, mutate: impl FnOnce(&mut Map3D) -> R) -> R {
        let mut map = self.map.lock();
        let result = mutate(&mut map);
        self.version.fetch_add(1, Ordering::SeqCst);
        self.updated.notify_all();
        result
    }

    /// Bump the version and wake consumers without touching the map.
    pub fn emit_update(&self) {
        let _map = self.map.lock();
        self.version.fetch_add(1, Ordering::SeqCst);
        self.updated.notify_all();
    }

    /// Read access without a version bump.
    pub fn with_map<R>(&self, read: impl FnOnce(&Map3D) -> R) -> R {
        read(&self.map.lock())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn map_size(&self) -> usize {
        self.map.lock().len()
    }

    /// A consistent copy of all points plus the version at copy time.
    pub fn points_snapshot(&self) -> (Vec<ColoredPoint>, u64) {
        let map = self.map.lock();
        (map.colored_points(), self.version.load(Ordering::SeqCst))
    }

    /// Per-image observation lists plus the version at copy time.
    pub fn cameras_with_points(&self) -> (ViewObservations, u64) {
        let map = self.map.lock();
        (map.observations_by_view(), self.version.load(Ordering::SeqCst))
    }

    /// Points and per-image observations in one consistent copy.
    ///
    /// Returns `None` when nothing was published since `last_version`;
    /// otherwise `last_version` is advanced to the copied version.
    pub fn points_and_cameras(
        &self,
        last_version: &mut u64,
    ) -> Option<(Vec<ColoredPoint>, ViewObservations)> {
        let map = self.map.lock();
        let version = self.version.load(Ordering::SeqCst);
        if version <= *last_version {
            return None;
        }
        *last_version = version;
        Some((map.colored_points(), map.observations_by_view()))
    }

    /// Block until a version newer than `last_version` is published or the
    /// worker finishes. Returns the current version.
    pub fn wait_for_update(&self, last_version: u64) -> u64 {
        let mut map = self.map.lock();
        loop {
            let version = self.version.load(Ordering::SeqCst);
            if version > last_version || self.is_finished() {
                return version;
            }
            self.updated.wait(&mut map);
        }
    }

    pub fn status(&self) -> ProcStatus {
        ProcStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Set the worker status. Always wakes waiting consumers so a consumer
    /// blocked on updates observes the transition to `Finish`.
    pub fn set_status(&self, status: ProcStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
        let _map = self.map.lock();
        self.updated.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.status() == ProcStatus::Finish
    }

    /// Replace the map and version wholesale, as checkpoint restore does.
    /// Resets the status to `Reconstruction`.
    pub fn restore(&self, map: Map3D, version: u64) {
        let mut guard = self.map.lock();
        *guard = map;
        self.version.store(version, Ordering::SeqCst);
        self.status
            .store(ProcStatus::Reconstruction as u8, Ordering::SeqCst);
        self.updated.notify_all();
    }

    /// The map and version in one consistent copy, for checkpointing.
    pub fn checkpoint_state(&self) -> (Map3D, u64) {
        let map = self.map.lock();
        (map.clone(), self.version.load(Ordering::SeqCst))
    }
}
