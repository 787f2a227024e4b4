//! Per-document preview session
//!
//! Wires together everything one open document needs for its preview: the
//! sidecar directory, the image loader, the render scheduler, drop/paste
//! ingestion and an optional sidecar watcher. Nothing here is global; each
//! open document gets its own session.

use crate::config::Config;
use crate::error::{AppResult, ClipboardError, RenderError};
use crate::images::{
    resolve, resolve_normalized, DroppedItem, ImageIngestor, ImageSource, LoadResult,
    PasteboardContents, ProgressCallback, ScopedAccessProvider, SecureImageLoader,
    SidecarAssetManager, SidecarWatcher,
};
use crate::markdown::{Document, ImageReference, MarkdownParser};
use crate::render::{RenderPhase, RenderScheduler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// An image reference from the document together with where it points
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImage {
    pub reference: ImageReference,
    pub source: ImageSource,
}

/// Preview state for one open document
pub struct DocumentSession {
    config: Config,
    document_path: Option<PathBuf>,
    sidecar: SidecarAssetManager,
    loader: Arc<SecureImageLoader>,
    scheduler: RenderScheduler,
    ingestor: ImageIngestor,
    watcher: Option<SidecarWatcher>,
}

impl DocumentSession {
    /// Create a session with no document attached
    pub fn new(config: Config, parser: Arc<dyn MarkdownParser>, access: Arc<dyn ScopedAccessProvider>) -> Self {
        let loader = Arc::new(SecureImageLoader::new(&config.loader, Arc::clone(&access)));
        Self::with_loader(config, parser, access, loader)
    }

    /// Create a session around an existing loader
    pub fn with_loader(
        config: Config,
        parser: Arc<dyn MarkdownParser>,
        access: Arc<dyn ScopedAccessProvider>,
        loader: Arc<SecureImageLoader>,
    ) -> Self {
        Self {
            sidecar: SidecarAssetManager::with_config(Arc::clone(&access), &config.sidecar),
            scheduler: RenderScheduler::new(parser, config.render.debounce()),
            ingestor: ImageIngestor::new(access),
            loader,
            watcher: None,
            document_path: None,
            config,
        }
    }

    /// Attach a document and discover its sidecar directory
    pub async fn open(&mut self, document_path: impl AsRef<Path>) {
        log::info!("Opening preview session for {}", document_path.as_ref().display());
        self.set_document_path(document_path).await;
    }

    /// The document moved or was saved under a new name
    pub async fn set_document_path(&mut self, document_path: impl AsRef<Path>) {
        let document_path = document_path.as_ref().to_path_buf();
        self.sidecar.configure(&document_path);
        self.loader.clear_local_cache().await;
        self.document_path = Some(document_path);
        self.watcher = None;
        self.ensure_watcher();
    }

    /// Detach the document and release everything tied to it
    pub async fn close(&mut self) {
        self.scheduler.cancel_pending_render();
        self.loader.cancel_all_downloads().await;
        self.loader.clear_all().await;
        self.loader.clear_bookmarks().await;
        self.sidecar.reset();
        self.watcher = None;
        if let Some(path) = self.document_path.take() {
            log::info!("Closed preview session for {}", path.display());
        }
    }

    pub fn document_path(&self) -> Option<&Path> {
        self.document_path.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sidecar(&self) -> &SidecarAssetManager {
        &self.sidecar
    }

    pub fn sidecar_mut(&mut self) -> &mut SidecarAssetManager {
        &mut self.sidecar
    }

    pub fn loader(&self) -> &Arc<SecureImageLoader> {
        &self.loader
    }

    /// The editor text changed
    pub fn text_changed(&mut self, content: impl Into<String>) {
        self.scheduler.debounce_render(content);
    }

    /// Render without waiting for the debounce delay
    pub fn force_render(&mut self, content: impl Into<String>) {
        self.scheduler.force_render(content);
    }

    /// Render on the caller's task
    pub async fn render(&self, content: &str) -> Result<Arc<Document>, RenderError> {
        self.scheduler.render(content).await
    }

    /// Re-render the editor's current text and notify preview observers
    pub fn refresh_preview(&mut self, content: impl Into<String>) {
        self.scheduler.refresh_preview(content);
    }

    pub fn render_phase(&self) -> RenderPhase {
        self.scheduler.phase()
    }

    pub fn rendered_document(&self) -> Option<Arc<Document>> {
        self.scheduler.rendered_document()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Document>>> {
        self.scheduler.subscribe()
    }

    /// Resolve a raw destination as written in the markdown source
    pub fn resolve(&self, raw: &str) -> ImageSource {
        resolve(raw, self.document_path.as_deref(), Some(&self.sidecar))
    }

    /// Resolve every image in a parsed document, in document order
    pub fn image_references(&self, document: &Document) -> Vec<ResolvedImage> {
        let snapshot = self.sidecar.snapshot();
        document
            .images()
            .into_iter()
            .map(|reference| {
                let source = resolve_normalized(
                    &reference.destination,
                    self.document_path.as_deref(),
                    Some(&snapshot),
                );
                ResolvedImage { reference, source }
            })
            .collect()
    }

    pub async fn load(&self, image: &ResolvedImage, on_progress: Option<ProgressCallback>) -> LoadResult {
        self.loader
            .load(&image.source, &image.reference.alt, self.document_path.as_deref(), on_progress)
            .await
    }

    /// Store dropped images in the sidecar directory
    pub fn handle_drop(&mut self, items: &[DroppedItem]) -> bool {
        let accepted = self.ingestor.handle_drop(&mut self.sidecar, items);
        if accepted {
            self.ensure_watcher();
        }
        accepted
    }

    pub fn handle_paste(&mut self, contents: &PasteboardContents) -> bool {
        let accepted = self.ingestor.handle_paste(&mut self.sidecar, contents);
        if accepted {
            self.ensure_watcher();
        }
        accepted
    }

    /// Paste whatever images the system clipboard holds
    pub fn paste_from_clipboard(&mut self) -> Result<bool, ClipboardError> {
        let contents = PasteboardContents::from_clipboard()?;
        Ok(self.handle_paste(&contents))
    }

    /// Markdown snippets waiting to be inserted at the cursor
    pub fn take_insertions(&mut self) -> Vec<String> {
        self.ingestor.take_insertions()
    }

    /// Refresh the manifest if the sidecar directory changed on disk
    pub fn poll_sidecar_changes(&mut self) -> bool {
        self.ensure_watcher();
        let changed = self.watcher.as_mut().map(SidecarWatcher::poll).unwrap_or(false);
        if changed {
            self.sidecar.refresh_manifest();
        }
        changed
    }

    /// Start watching the sidecar directory if it exists on disk.
    ///
    /// Returns whether a watcher is active afterwards.
    pub fn watch_sidecar(&mut self) -> AppResult<bool> {
        if self.watcher.is_some() {
            return Ok(true);
        }
        let Some(dir) = self.sidecar.sidecar_directory().filter(|d| d.is_dir()) else {
            return Ok(false);
        };
        self.watcher = Some(SidecarWatcher::new(dir, self.config.render.debounce())?);
        Ok(true)
    }

    fn ensure_watcher(&mut self) {
        if !self.config.sidecar.watch_directory {
            return;
        }
        if let Err(e) = self.watch_sidecar() {
            log::warn!("Could not watch sidecar directory: {}", e);
        }
    }
}
