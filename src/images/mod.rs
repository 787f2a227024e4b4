//! Image pipeline for the markdown preview
//!
//! - Resolving image destinations to typed sources
//! - Managing per-document sidecar asset directories
//! - Loading and caching local and remote images
//! - Scoped access to files outside the document's folder
//! - Ingesting dropped and pasted images

pub mod access;
pub mod cache;
pub mod format;
pub mod ingest;
pub mod loader;
pub mod sidecar;
pub mod source;
pub mod watcher;

pub use access::{BookmarkStore, DirectAccess, ResolvedBookmark, ScopedAccess, ScopedAccessProvider};
pub use cache::FifoCache;
pub use format::{is_image_mime, is_image_path, ImageFormat};
pub use ingest::{DroppedItem, ImageIngestor, PasteboardContents};
pub use loader::{LoadResult, ProgressCallback, SecureImageLoader};
pub use sidecar::{sanitize_filename, SidecarAssetManager, SidecarManifest, SidecarSnapshot};
pub use source::{is_traversal_attempt, resolve, resolve_normalized, standardize, ImageSource, SidecarLookup};
pub use watcher::SidecarWatcher;
