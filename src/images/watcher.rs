//! Sidecar directory watcher
//!
//! Reports when image files inside a sidecar directory change on disk so
//! the manifest can be refreshed. Events are collected from a notify
//! watcher and coalesced: `poll` only reports a change once the directory
//! has been quiet for the debounce interval.

use crate::images::format::is_image_path;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

/// Watches one sidecar directory for image changes
pub struct SidecarWatcher {
    _watcher: RecommendedWatcher,
    event_rx: Receiver<notify::Result<Event>>,
    directory: PathBuf,
    debounce: Duration,
    /// Image paths changed since the last report
    pending: HashSet<PathBuf>,
    last_event: Option<Instant>,
}

impl SidecarWatcher {
    /// Start watching `directory` (non-recursively)
    pub fn new(directory: impl AsRef<Path>, debounce: Duration) -> Result<Self, notify::Error> {
        let (tx, rx) = channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;

        let directory = directory.as_ref().to_path_buf();
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        log::debug!("Watching sidecar directory {}", directory.display());

        Ok(Self {
            _watcher: watcher,
            event_rx: rx,
            directory,
            debounce,
            pending: HashSet::new(),
            last_event: None,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Drain pending events; returns true once image changes have settled
    pub fn poll(&mut self) -> bool {
        let now = Instant::now();

        while let Ok(event_result) = self.event_rx.try_recv() {
            match event_result {
                Ok(event) => {
                    if is_relevant(&event.kind) {
                        let images: Vec<PathBuf> =
                            event.paths.into_iter().filter(|p| is_image_path(p)).collect();
                        if !images.is_empty() {
                            self.pending.extend(images);
                            self.last_event = Some(now);
                        }
                    }
                }
                Err(e) => log::warn!("Sidecar watcher error: {}", e),
            }
        }

        match self.last_event {
            Some(last) if now.duration_since(last) >= self.debounce => {
                log::debug!("{} sidecar image(s) changed", self.pending.len());
                self.pending.clear();
                self.last_event = None;
                true
            }
            _ => false,
        }
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn poll_until(watcher: &mut SidecarWatcher, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if watcher.poll() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_reports_new_image() {
        let dir = TempDir::new().unwrap();
        let mut watcher = SidecarWatcher::new(dir.path(), Duration::from_millis(50)).unwrap();
        assert!(!watcher.poll());

        std::fs::write(dir.path().join("new.png"), b"png").unwrap();
        assert!(poll_until(&mut watcher, Duration::from_secs(3)));

        // Reported once
        assert!(!watcher.poll());
    }

    #[test]
    fn test_ignores_non_image_files() {
        let dir = TempDir::new().unwrap();
        let mut watcher = SidecarWatcher::new(dir.path(), Duration::from_millis(50)).unwrap();

        std::fs::write(dir.path().join("notes.txt"), b"text").unwrap();
        assert!(!poll_until(&mut watcher, Duration::from_millis(400)));
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        assert!(SidecarWatcher::new(dir.path().join("absent"), Duration::from_millis(50)).is_err());
    }
}
