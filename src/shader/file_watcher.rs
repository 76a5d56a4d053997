//! Shader file watching
//!
//! The registry talks to a [`FileWatchService`]. The notify-backed
//! implementation runs one thread that drains watcher events and reports
//! every change to a watched file through an [`UpdateSink`]. Editors often
//! replace files by deleting them, so a removed file is reported and then
//! subscribed again once it reappears.

use std::path::Path;

use crate::error::VoxrayResult;

#[cfg(feature = "native")]
pub use self::native::NotifyWatcher;

/// Subscribe to modify/delete notifications for single files.
pub trait FileWatchService {
    fn watch(&mut self, path: &Path) -> VoxrayResult<()>;
    fn unwatch(&mut self, path: &Path);
}

#[cfg(feature = "native")]
mod native {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Weak};
    use std::time::Duration;

    use crossbeam_channel::Receiver;
    use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use parking_lot::Mutex;
    use rustc_hash::FxHashSet;

    use super::FileWatchService;
    use crate::error::{VoxrayError, VoxrayResult};
    use crate::shader::UpdateSink;

    const RESUBSCRIBE_ATTEMPTS: u32 = 40;
    const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(25);

    type Watched = Arc<Mutex<FxHashSet<PathBuf>>>;

    pub struct NotifyWatcher {
        watcher: Arc<Mutex<RecommendedWatcher>>,
        watched: Watched,
    }

    impl NotifyWatcher {
        pub fn new(sink: UpdateSink) -> VoxrayResult<Self> {
            let (tx, rx) = crossbeam_channel::unbounded();
            let watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
                let _ = tx.send(event);
            })
            .map_err(|e| VoxrayError::AssetWatchError {
                path: String::new(),
                error: e.to_string(),
            })?;

            let watcher = Arc::new(Mutex::new(watcher));
            let watched: Watched = Arc::default();

            // The thread holds a weak reference and exits once the watcher
            // is dropped and its channel closes.
            std::thread::Builder::new()
                .name("shader-watcher".into())
                .spawn({
                    let watcher = Arc::downgrade(&watcher);
                    let watched = watched.clone();
                    move || event_loop(rx, watcher, watched, sink)
                })
                .map_err(|e| VoxrayError::AssetWatchError {
                    path: String::new(),
                    error: e.to_string(),
                })?;

            log::info!("[File Watcher] Watching shader sources");
            Ok(Self { watcher, watched })
        }

        pub fn watched_count(&self) -> usize {
            self.watched.lock().len()
        }
    }

    impl FileWatchService for NotifyWatcher {
        fn watch(&mut self, path: &Path) -> VoxrayResult<()> {
            self.watcher
                .lock()
                .watch(path, RecursiveMode::NonRecursive)
                .map_err(|e| VoxrayError::AssetWatchError {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
            self.watched.lock().insert(path.to_path_buf());
            Ok(())
        }

        fn unwatch(&mut self, path: &Path) {
            self.watched.lock().remove(path);
            if let Err(e) = self.watcher.lock().unwatch(path) {
                log::debug!("[File Watcher] Unwatch {}: {}", path.display(), e);
            }
        }
    }

    fn event_loop(
        rx: Receiver<notify::Result<Event>>,
        watcher: Weak<Mutex<RecommendedWatcher>>,
        watched: Watched,
        sink: UpdateSink,
    ) {
        for event in rx.iter() {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    log::error!("[File Watcher] {}", e);
                    continue;
                }
            };

            let removed = matches!(event.kind, EventKind::Remove(_));
            if !removed && !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }

            for path in event.paths {
                if !watched.lock().contains(&path) {
                    continue;
                }
                if removed {
                    log::warn!("[File Watcher] {} removed, re-subscribing", path.display());
                    resubscribe(&watcher, &path);
                }
                sink.file_updated(&path);
            }
        }
    }

    fn resubscribe(watcher: &Weak<Mutex<RecommendedWatcher>>, path: &Path) {
        for _ in 0..RESUBSCRIBE_ATTEMPTS {
            let Some(watcher) = watcher.upgrade() else {
                return;
            };
            if path.exists() && watcher.lock().watch(path, RecursiveMode::NonRecursive).is_ok() {
                return;
            }
            drop(watcher);
            std::thread::sleep(RESUBSCRIBE_DELAY);
        }
        log::error!(
            "[File Watcher] Could not re-subscribe to {}; reload it manually",
            path.display()
        );
    }
}
