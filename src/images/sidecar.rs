//! Sidecar asset directories
//!
//! Every document may have a companion directory holding the images it
//! references, named after the document (`notes.md` → `notes.assets/`).
//! The manager owns that directory for one open document:
//! - Discovering the directory (including two legacy naming forms)
//! - Keeping a manifest of the image files it contains
//! - Adding images from files or raw bytes with sanitized, unique names
//! - Holding scoped access to the document's folder while configured

use crate::config::SidecarConfig;
use crate::error::{SidecarError, SidecarResult};
use crate::images::access::{ScopedAccess, ScopedAccessProvider};
use crate::images::format::{is_image_path, ImageFormat};
use crate::images::source::{standardize, SidecarLookup};
use crate::markdown::Document;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Characters replaced by `_` in image filenames
const UNSAFE_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Fallback name for images whose name sanitizes to nothing
const DEFAULT_IMAGE_NAME: &str = "image";

/// Candidate sidecar directory names for a document base name, in lookup order
pub fn sidecar_candidates(base: &str) -> [String; 3] {
    [
        format!("{}.assets", base),
        format!("_{}_assets", base),
        format!(".{}.assets", base),
    ]
}

/// Make a user-supplied name safe to use as a sidecar filename
pub fn sanitize_filename(name: &str, default_extension: &str) -> String {
    let mut sanitized: String = name
        .trim()
        .chars()
        .map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) || c == '\0' { '_' } else { c })
        .collect();

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        sanitized = DEFAULT_IMAGE_NAME.to_string();
    }

    let has_extension = Path::new(&sanitized)
        .extension()
        .map(|e| !e.is_empty())
        .unwrap_or(false);
    if !has_extension {
        sanitized = format!("{}.{}", sanitized, default_extension);
    }

    sanitized
}

/// Filename → absolute path of the images in a sidecar directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidecarManifest {
    entries: HashMap<String, PathBuf>,
}

impl SidecarManifest {
    pub fn get(&self, filename: &str) -> Option<&Path> {
        self.entries.get(filename).map(PathBuf::as_path)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries.contains_key(filename)
    }

    pub fn insert(&mut self, filename: String, path: PathBuf) {
        self.entries.insert(filename, path);
    }

    pub fn remove(&mut self, filename: &str) -> Option<PathBuf> {
        self.entries.remove(filename)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filenames in sorted order
    pub fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Point-in-time copy of the sidecar state, for readers
#[derive(Debug, Clone, Default)]
pub struct SidecarSnapshot {
    pub directory: Option<PathBuf>,
    pub manifest: SidecarManifest,
}

impl SidecarLookup for SidecarSnapshot {
    fn sidecar_directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    fn lookup(&self, filename: &str) -> Option<PathBuf> {
        self.manifest.get(filename).map(Path::to_path_buf)
    }
}

/// Owns the sidecar directory of one open document
pub struct SidecarAssetManager {
    access: Arc<dyn ScopedAccessProvider>,
    default_extension: String,
    document_path: Option<PathBuf>,
    sidecar_directory: Option<PathBuf>,
    manifest: SidecarManifest,
    /// Scoped access to the document and its folder while configured
    scopes: Vec<ScopedAccess>,
}

impl SidecarAssetManager {
    /// Create an unconfigured manager
    pub fn new(access: Arc<dyn ScopedAccessProvider>) -> Self {
        Self::with_config(access, &SidecarConfig::default())
    }

    pub fn with_config(access: Arc<dyn ScopedAccessProvider>, config: &SidecarConfig) -> Self {
        Self {
            access,
            default_extension: config.default_extension.clone(),
            document_path: None,
            sidecar_directory: None,
            manifest: SidecarManifest::default(),
            scopes: Vec::new(),
        }
    }

    /// Configure the manager for a document, discarding any previous state
    pub fn configure(&mut self, document_path: impl AsRef<Path>) {
        self.reset();

        let document_path = standardize(document_path.as_ref());
        let parent = document_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for target in [parent.clone(), document_path.clone()] {
            if let Some(scope) = ScopedAccess::acquire(&self.access, target) {
                self.scopes.push(scope);
            }
        }

        let base = document_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        let candidates = sidecar_candidates(&base);
        let existing = candidates
            .iter()
            .map(|name| parent.join(name))
            .find(|dir| dir.is_dir());

        let found = existing.is_some();
        self.sidecar_directory = Some(existing.unwrap_or_else(|| parent.join(&candidates[0])));
        self.document_path = Some(document_path);

        if found {
            self.refresh_manifest();
        }

        log::debug!(
            "Sidecar configured at {} ({} images)",
            self.sidecar_directory.as_deref().unwrap_or(Path::new("")).display(),
            self.manifest.len()
        );
    }

    /// Release scoped access and forget the document
    pub fn reset(&mut self) {
        self.scopes.clear();
        self.document_path = None;
        self.sidecar_directory = None;
        self.manifest.clear();
    }

    /// Rebuild the manifest from the sidecar directory's image files.
    ///
    /// Any filesystem error leaves the manifest empty.
    pub fn refresh_manifest(&mut self) {
        self.manifest.clear();

        let Some(dir) = self.sidecar_directory.as_deref() else {
            return;
        };
        if !dir.is_dir() {
            return;
        }

        match scan_images(dir) {
            Ok(manifest) => self.manifest = manifest,
            Err(e) => log::warn!("Could not read sidecar directory {}: {}", dir.display(), e),
        }
    }

    /// Copy an image file into the sidecar directory, returning its filename
    pub fn add_image(&mut self, from: &Path, preferred_name: Option<&str>) -> SidecarResult<String> {
        let dir = self
            .sidecar_directory
            .clone()
            .ok_or(SidecarError::NoSidecarConfigured)?;

        if !from.is_file() {
            return Err(SidecarError::ImageNotFound(from.to_path_buf()));
        }
        if ImageFormat::from_path(from).is_none() && sniff_file(from).is_none() {
            return Err(SidecarError::InvalidImageFormat);
        }

        let name = preferred_name
            .map(str::to_string)
            .or_else(|| from.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();

        self.ensure_directory(&dir)?;
        let filename = self.unique_filename(&dir, &sanitize_filename(&name, &self.default_extension));
        let destination = dir.join(&filename);

        fs::copy(from, &destination).map_err(|e| SidecarError::CopyFailed(e.to_string()))?;

        log::info!("Copied {} into sidecar as {}", from.display(), filename);
        self.manifest.insert(filename.clone(), destination);
        Ok(filename)
    }

    /// Write raw image bytes into the sidecar directory, returning the filename
    pub fn add_image_data(&mut self, bytes: &[u8], preferred_name: &str) -> SidecarResult<String> {
        let dir = self
            .sidecar_directory
            .clone()
            .ok_or(SidecarError::NoSidecarConfigured)?;

        // Unrecognized bytes are only accepted under an image filename
        let format = ImageFormat::from_bytes(bytes)
            .or_else(|| ImageFormat::from_path(Path::new(preferred_name)))
            .filter(|_| !bytes.is_empty())
            .ok_or(SidecarError::InvalidImageFormat)?;
        let extension = format.extension();

        self.ensure_directory(&dir)?;
        let filename = self.unique_filename(&dir, &sanitize_filename(preferred_name, extension));
        let destination = dir.join(&filename);

        fs::write(&destination, bytes).map_err(|e| SidecarError::CopyFailed(e.to_string()))?;

        log::info!("Wrote {} bytes into sidecar as {}", bytes.len(), filename);
        self.manifest.insert(filename.clone(), destination);
        Ok(filename)
    }

    /// Delete an image from the sidecar directory
    pub fn remove_image(&mut self, filename: &str) -> SidecarResult<bool> {
        let Some(path) = self.manifest.get(filename).map(Path::to_path_buf) else {
            return Ok(false);
        };

        if path.exists() {
            fs::remove_file(&path).map_err(|e| SidecarError::CopyFailed(e.to_string()))?;
        }
        self.manifest.remove(filename);
        Ok(true)
    }

    /// Sidecar images that no image destination in `document` refers to
    pub fn unreferenced_images(&self, document: &Document) -> Vec<String> {
        let dir_name = self
            .sidecar_directory
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned());

        let referenced: Vec<String> = document
            .images()
            .into_iter()
            .map(|image| image.destination)
            .collect();

        self.manifest
            .filenames()
            .into_iter()
            .filter(|filename| {
                !referenced.iter().any(|dest| {
                    dest == filename
                        || dir_name
                            .as_ref()
                            .map(|dir| *dest == format!("{}/{}", dir, filename))
                            .unwrap_or(false)
                })
            })
            .collect()
    }

    /// Manifest lookup
    pub fn resolve_image(&self, filename: &str) -> Option<PathBuf> {
        self.manifest.get(filename).map(Path::to_path_buf)
    }

    /// Copy of the current directory and manifest
    pub fn snapshot(&self) -> SidecarSnapshot {
        SidecarSnapshot {
            directory: self.sidecar_directory.clone(),
            manifest: self.manifest.clone(),
        }
    }

    pub fn images(&self) -> Vec<String> {
        self.manifest.filenames()
    }

    pub fn manifest(&self) -> &SidecarManifest {
        &self.manifest
    }

    pub fn document_path(&self) -> Option<&Path> {
        self.document_path.as_deref()
    }

    pub fn sidecar_directory(&self) -> Option<&Path> {
        self.sidecar_directory.as_deref()
    }

    pub fn is_configured(&self) -> bool {
        self.sidecar_directory.is_some()
    }

    fn ensure_directory(&self, dir: &Path) -> SidecarResult<()> {
        if dir.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(dir).map_err(|e| SidecarError::DirectoryCreationFailed(e.to_string()))?;
        log::info!("Created sidecar directory {}", dir.display());
        Ok(())
    }

    /// Suffix `-1`, `-2`, ... before the extension until the name is free
    fn unique_filename(&self, dir: &Path, candidate: &str) -> String {
        let taken = |name: &str| self.manifest.contains(name) || dir.join(name).exists();
        if !taken(candidate) {
            return candidate.to_string();
        }

        let path = Path::new(candidate);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string());
        let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

        let mut counter = 1u32;
        loop {
            let name = match &extension {
                Some(ext) => format!("{}-{}.{}", stem, counter, ext),
                None => format!("{}-{}", stem, counter),
            };
            if !taken(&name) {
                return name;
            }
            counter += 1;
        }
    }
}

impl SidecarLookup for SidecarAssetManager {
    fn sidecar_directory(&self) -> Option<&Path> {
        self.sidecar_directory.as_deref()
    }

    fn lookup(&self, filename: &str) -> Option<PathBuf> {
        self.resolve_image(filename)
    }
}

/// List the image files directly inside `dir`
fn scan_images(dir: &Path) -> Result<SidecarManifest, walkdir::Error> {
    let mut manifest = SidecarManifest::default();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && is_image_path(path) {
            manifest.insert(entry.file_name().to_string_lossy().into_owned(), path.to_path_buf());
        }
    }
    Ok(manifest)
}

/// Detect an image format from the first bytes of a file
fn sniff_file(path: &Path) -> Option<ImageFormat> {
    let mut head = [0u8; 64];
    let mut file = fs::File::open(path).ok()?;
    let read = file.read(&mut head).ok()?;
    ImageFormat::from_bytes(&head[..read])
}
