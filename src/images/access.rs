//! Security-scoped file access
//!
//! Sandboxed platforms only allow reading files outside the application's
//! container while an explicit access grant is held. This module provides:
//! - A provider trait for starting/stopping access and managing bookmarks
//! - An RAII guard that releases access on every exit path
//! - A bookmark store keyed by file path
//! - The unsandboxed provider used on platforms without a sandbox

use crate::error::AccessError;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A bookmark resolved back to a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBookmark {
    pub path: PathBuf,
    /// The bookmark still resolves but should be recreated
    pub is_stale: bool,
}

/// Platform hook for security-scoped resources
pub trait ScopedAccessProvider: Send + Sync {
    /// Start accessing a resource; returns false if access was denied
    fn start_accessing(&self, path: &Path) -> bool;

    /// Balance a successful `start_accessing`
    fn stop_accessing(&self, path: &Path);

    /// Create an opaque bookmark that can re-grant access later
    fn create_bookmark(&self, path: &Path) -> Result<Vec<u8>, AccessError>;

    /// Resolve a bookmark created by `create_bookmark`
    fn resolve_bookmark(&self, bookmark: &[u8]) -> Result<ResolvedBookmark, AccessError>;
}

/// Held access to a security-scoped resource, released on drop
pub struct ScopedAccess {
    provider: Arc<dyn ScopedAccessProvider>,
    path: PathBuf,
}

impl ScopedAccess {
    /// Start accessing `path`, returning a guard if access was granted
    pub fn acquire(provider: &Arc<dyn ScopedAccessProvider>, path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        if provider.start_accessing(&path) {
            Some(Self {
                provider: Arc::clone(provider),
                path,
            })
        } else {
            log::debug!("Scoped access denied for {}", path.display());
            None
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedAccess {
    fn drop(&mut self) {
        self.provider.stop_accessing(&self.path);
    }
}

impl fmt::Debug for ScopedAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedAccess").field("path", &self.path).finish()
    }
}

/// Stored bookmarks, keyed by the path they were created for
#[derive(Debug, Clone, Default)]
pub struct BookmarkStore {
    bookmarks: HashMap<PathBuf, Vec<u8>>,
}

impl BookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&[u8]> {
        self.bookmarks.get(path).map(Vec::as_slice)
    }

    pub fn insert(&mut self, path: PathBuf, bookmark: Vec<u8>) {
        self.bookmarks.insert(path, bookmark);
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.bookmarks.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.bookmarks.clear();
    }

    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }
}

/// Provider for platforms without an application sandbox.
///
/// Access is always granted. Bookmarks hold the canonical path; a bookmark is
/// stale when the file now canonicalizes somewhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAccess;

impl ScopedAccessProvider for DirectAccess {
    fn start_accessing(&self, _path: &Path) -> bool {
        true
    }

    fn stop_accessing(&self, _path: &Path) {}

    fn create_bookmark(&self, path: &Path) -> Result<Vec<u8>, AccessError> {
        let canonical = path.canonicalize().map_err(|e| AccessError::BookmarkCreation {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(canonical.to_string_lossy().into_owned().into_bytes())
    }

    fn resolve_bookmark(&self, bookmark: &[u8]) -> Result<ResolvedBookmark, AccessError> {
        let recorded = std::str::from_utf8(bookmark)
            .map(PathBuf::from)
            .map_err(|e| AccessError::BookmarkResolution(e.to_string()))?;
        let current = recorded
            .canonicalize()
            .map_err(|e| AccessError::BookmarkResolution(e.to_string()))?;
        let is_stale = current != recorded;
        Ok(ResolvedBookmark {
            path: current,
            is_stale,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Provider that records calls and denies access outside allowed roots
    #[derive(Default)]
    pub struct RecordingAccess {
        pub allowed: Mutex<HashSet<PathBuf>>,
        pub started: Mutex<Vec<PathBuf>>,
        pub stopped: Mutex<Vec<PathBuf>>,
        pub bookmarks_created: Mutex<Vec<PathBuf>>,
        pub stale_bookmarks: bool,
    }

    impl RecordingAccess {
        pub fn allowing(paths: &[&Path]) -> Self {
            let access = Self::default();
            access
                .allowed
                .lock()
                .extend(paths.iter().map(|p| p.to_path_buf()));
            access
        }

        pub fn open_scopes(&self) -> usize {
            self.started.lock().len() - self.stopped.lock().len()
        }
    }

    impl ScopedAccessProvider for RecordingAccess {
        fn start_accessing(&self, path: &Path) -> bool {
            let allowed = self.allowed.lock().iter().any(|root| path.starts_with(root));
            if allowed {
                self.started.lock().push(path.to_path_buf());
            }
            allowed
        }

        fn stop_accessing(&self, path: &Path) {
            self.stopped.lock().push(path.to_path_buf());
        }

        fn create_bookmark(&self, path: &Path) -> Result<Vec<u8>, AccessError> {
            self.bookmarks_created.lock().push(path.to_path_buf());
            Ok(path.to_string_lossy().into_owned().into_bytes())
        }

        fn resolve_bookmark(&self, bookmark: &[u8]) -> Result<ResolvedBookmark, AccessError> {
            let path = String::from_utf8(bookmark.to_vec())
                .map_err(|e| AccessError::BookmarkResolution(e.to_string()))?;
            Ok(ResolvedBookmark {
                path: PathBuf::from(path),
                is_stale: self.stale_bookmarks,
            })
        }
    }
}
