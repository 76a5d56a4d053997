//! Live build progress
//!
//! Written by the builder thread, read by the main thread without locking.
//! Floats are stored as their bit patterns in atomics, so a reader sees
//! either the old or the new value of each field but never a torn float.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Progress record shared between a builder and its readers.
#[derive(Debug, Default)]
pub struct GenerationInfo {
    completion: AtomicU32,
    elapsed: AtomicU32,
    voxel_count: AtomicU64,
    node_count: AtomicU64,
}

/// Point-in-time copy of a [`GenerationInfo`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationSnapshot {
    pub completion: f32,
    pub elapsed_seconds: f32,
    pub voxel_count: u64,
    pub node_count: u64,
}

impl GenerationInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completion(&self) -> f32 {
        f32::from_bits(self.completion.load(Ordering::Relaxed))
    }

    pub fn set_completion(&self, fraction: f32) {
        self.completion
            .store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn elapsed_seconds(&self) -> f32 {
        f32::from_bits(self.elapsed.load(Ordering::Relaxed))
    }

    pub fn set_elapsed_seconds(&self, seconds: f32) {
        self.elapsed.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn voxel_count(&self) -> u64 {
        self.voxel_count.load(Ordering::Relaxed)
    }

    pub fn add_voxels(&self, count: u64) {
        self.voxel_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_voxel_count(&self, count: u64) {
        self.voxel_count.store(count, Ordering::Relaxed);
    }

    pub fn node_count(&self) -> u64 {
        self.node_count.load(Ordering::Relaxed)
    }

    pub fn set_node_count(&self, count: u64) {
        self.node_count.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GenerationSnapshot {
        GenerationSnapshot {
            completion: self.completion(),
            elapsed_seconds: self.elapsed_seconds(),
            voxel_count: self.voxel_count(),
            node_count: self.node_count(),
        }
    }

    pub fn reset(&self) {
        self.set_completion(0.0);
        self.set_elapsed_seconds(0.0);
        self.set_voxel_count(0);
        self.set_node_count(0);
    }
}

/// Wall clock helper that keeps completion and elapsed time monotonic.
pub struct ProgressClock<'a> {
    info: &'a GenerationInfo,
    start: Instant,
}

impl<'a> ProgressClock<'a> {
    pub fn start(info: &'a GenerationInfo) -> Self {
        info.set_completion(0.0);
        info.set_elapsed_seconds(0.0);
        Self {
            info,
            start: Instant::now(),
        }
    }

    /// Record `done` of `total` units of work.
    pub fn record(&self, done: u64, total: u64) {
        let fraction = if total == 0 {
            1.0
        } else {
            done as f32 / total as f32
        };
        if fraction >= self.info.completion() {
            self.info.set_completion(fraction);
        }
        self.info
            .set_elapsed_seconds(self.start.elapsed().as_secs_f32());
    }

    pub fn finish(&self) {
        self.info.set_completion(1.0);
        self.info
            .set_elapsed_seconds(self.start.elapsed().as_secs_f32());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trips_floats() {
        let info = GenerationInfo::new();
        info.set_completion(0.25);
        info.set_elapsed_seconds(1.5);
        info.add_voxels(3);
        info.add_voxels(4);
        info.set_node_count(9);

        let snap = info.snapshot();
        assert_eq!(snap.completion, 0.25);
        assert_eq!(snap.elapsed_seconds, 1.5);
        assert_eq!(snap.voxel_count, 7);
        assert_eq!(snap.node_count, 9);
    }

    #[test]
    fn test_progress_clock_is_monotonic() {
        let info = GenerationInfo::new();
        let clock = ProgressClock::start(&info);
        clock.record(5, 10);
        clock.record(2, 10);
        assert_eq!(info.completion(), 0.5);
        clock.finish();
        assert_eq!(info.completion(), 1.0);
    }

    #[test]
    fn test_completion_is_clamped() {
        let info = GenerationInfo::new();
        info.set_completion(3.0);
        assert_eq!(info.completion(), 1.0);
    }
}
