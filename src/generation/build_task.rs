//! Background builder tasks
//!
//! Each launch runs on a detached thread with its own [`StopToken`] and
//! [`GenerationInfo`]. Launches are numbered by a monotonic generation
//! counter; a finished result is published tagged with its generation and
//! only the latest generation is ever handed out by [`BuildTask::poll`].
//! A builder that panics is published as failed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::{BuildError, GenerationInfo, StopToken};

enum Published<T> {
    Pending,
    Finished(u64, T),
    Failed(u64),
}

/// Outcome of polling a [`BuildTask`].
#[derive(Debug)]
pub enum BuildPoll<T> {
    /// Nothing launched, or the last result was already taken.
    Idle,
    Running,
    Finished(T),
    /// The latest build hit a structural error (already logged).
    Failed,
}

/// Owner of the currently running builder for one structure.
pub struct BuildTask<T> {
    name: &'static str,
    generation: Arc<AtomicU64>,
    launched: u64,
    stop: StopToken,
    info: Arc<GenerationInfo>,
    slot: Arc<Mutex<Published<T>>>,
    handle: Option<JoinHandle<()>>,
    running: bool,
}

impl<T: Send + 'static> BuildTask<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: Arc::new(AtomicU64::new(0)),
            launched: 0,
            stop: StopToken::new(),
            info: Arc::new(GenerationInfo::new()),
            slot: Arc::new(Mutex::new(Published::Pending)),
            handle: None,
            running: false,
        }
    }

    /// Stop any running build and start `build` on a fresh thread.
    pub fn launch<F>(&mut self, build: F)
    where
        F: FnOnce(&GenerationInfo, &StopToken) -> Result<T, BuildError> + Send + 'static,
    {
        self.stop.request_stop();

        let generation = {
            let mut slot = self.slot.lock();
            *slot = Published::Pending;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.launched = generation;

        let stop = StopToken::new();
        let info = Arc::new(GenerationInfo::new());
        self.stop = stop.clone();
        self.info = info.clone();

        let slot = self.slot.clone();
        let current = self.generation.clone();
        let name = self.name;

        let spawned = std::thread::Builder::new()
            .name(format!("{}-build-{}", name.to_lowercase(), generation))
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| build(&info, &stop)));

                let mut slot = slot.lock();
                if current.load(Ordering::SeqCst) != generation {
                    log::debug!(
                        "[Build] {} build {} superseded, result discarded",
                        name,
                        generation
                    );
                    return;
                }

                match result {
                    Ok(Ok(value)) => {
                        log::info!(
                            "[Build] {} build {} finished in {:.2}s ({} voxels, {} nodes)",
                            name,
                            generation,
                            info.elapsed_seconds(),
                            info.voxel_count(),
                            info.node_count()
                        );
                        *slot = Published::Finished(generation, value);
                    }
                    Ok(Err(BuildError::Cancelled)) => {
                        log::debug!("[Build] {} build {} cancelled", name, generation);
                    }
                    Ok(Err(e)) => {
                        log::error!("[Build] {} build {} failed: {}", name, generation, e);
                        *slot = Published::Failed(generation);
                    }
                    Err(_) => {
                        log::error!("[Build] {} build {} panicked", name, generation);
                        *slot = Published::Failed(generation);
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.running = true;
            }
            Err(e) => {
                log::error!("[Build] Failed to spawn {} builder thread: {}", name, e);
                self.running = false;
            }
        }
    }

    /// Take the latest build's result if it has finished.
    pub fn poll(&mut self) -> BuildPoll<T> {
        if !self.running {
            return BuildPoll::Idle;
        }

        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Published::Pending) {
            Published::Finished(generation, value) if generation == self.launched => {
                self.running = false;
                BuildPoll::Finished(value)
            }
            Published::Failed(generation) if generation == self.launched => {
                self.running = false;
                BuildPoll::Failed
            }
            _ => BuildPoll::Running,
        }
    }

    /// Request the running build to stop. Its result will be discarded.
    pub fn cancel(&mut self) {
        self.stop.request_stop();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.running = false;
    }

    /// Block until the most recently launched thread exits.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[Build] {} builder thread panicked", self.name);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Progress of the latest launch.
    pub fn info(&self) -> &Arc<GenerationInfo> {
        &self.info
    }

    pub fn generation(&self) -> u64 {
        self.launched
    }
}

impl<T> Drop for BuildTask<T> {
    fn drop(&mut self) {
        self.stop.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    fn wait_for<T: Send + 'static>(task: &mut BuildTask<T>) -> BuildPoll<T> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match task.poll() {
                BuildPoll::Running if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1))
                }
                other => return other,
            }
        }
    }

    #[test]
    fn test_finished_result_is_taken_once() {
        let mut task = BuildTask::new("Test");
        task.launch(|info, _| {
            info.set_voxel_count(3);
            Ok(42u32)
        });

        assert!(matches!(wait_for(&mut task), BuildPoll::Finished(42)));
        assert!(matches!(task.poll(), BuildPoll::Idle));
        assert_eq!(task.info().voxel_count(), 3);
    }

    #[test]
    fn test_relaunch_stops_previous_and_only_latest_is_ready() {
        let observed_stop = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));
        let mut task = BuildTask::new("Test");

        let observed = observed_stop.clone();
        let running = started.clone();
        task.launch(move |_, stop| {
            running.store(true, Ordering::SeqCst);
            while !stop.stop_requested() {
                std::thread::sleep(Duration::from_millis(1));
            }
            observed.store(true, Ordering::SeqCst);
            Ok(1u32)
        });
        let first_generation = task.generation();

        while !started.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }

        task.launch(|_, _| Ok(2u32));
        assert!(task.generation() > first_generation);

        assert!(matches!(wait_for(&mut task), BuildPoll::Finished(2)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !observed_stop.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(observed_stop.load(Ordering::SeqCst));
        assert!(matches!(task.poll(), BuildPoll::Idle));
    }

    #[test]
    fn test_structural_failure_is_reported() {
        let mut task: BuildTask<u32> = BuildTask::new("Test");
        task.launch(|_, _| {
            Err(BuildError::Structural {
                structure: "Test",
                reason: "too deep".to_string(),
            })
        });
        assert!(matches!(wait_for(&mut task), BuildPoll::Failed));
        assert!(!task.is_running());
    }

    #[test]
    fn test_panicking_builder_is_reported_as_failed() {
        let mut task: BuildTask<u32> = BuildTask::new("Test");
        task.launch(|_, _| -> Result<u32, BuildError> { panic!("builder bug") });
        assert!(matches!(wait_for(&mut task), BuildPoll::Failed));
        assert!(!task.is_running());
        task.join();
    }

    #[test]
    fn test_cancel_discards_result() {
        let mut task = BuildTask::new("Test");
        task.launch(|_, stop| {
            while !stop.stop_requested() {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(7u32)
        });
        task.cancel();
        task.join();
        assert!(matches!(task.poll(), BuildPoll::Idle));
    }
}
