//! Secure image loader
//!
//! Turns a resolved [`ImageSource`] into a decoded image. All bookkeeping
//! (the local and remote caches, the in-flight download table and stored
//! bookmarks) lives behind a single async mutex, so every mutation is
//! linearized without callers having to coordinate.
//!
//! Failures never cross this boundary as errors: every outcome is a
//! [`LoadResult`] the preview can switch over.

use crate::config::LoaderConfig;
use crate::images::access::{BookmarkStore, ScopedAccess, ScopedAccessProvider};
use crate::images::cache::FifoCache;
use crate::images::source::{standardize, ImageSource};
use image::DynamicImage;
use reqwest::header;
use reqwest::{Client, Response, Url};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Progress reported while streaming never exceeds this before decoding
const MAX_STREAMING_PROGRESS: f64 = 0.99;

/// Called with download progress in `0.0..=1.0`
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Outcome of loading an image
#[derive(Debug, Clone)]
pub enum LoadResult {
    Success(Arc<DynamicImage>),
    /// The image could not be found or fetched; carries the alt text
    Missing(String),
    /// The bytes were not a decodable image; carries the alt text
    Corrupt(String),
}

impl LoadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, LoadResult::Success(_))
    }

    pub fn image(&self) -> Option<&Arc<DynamicImage>> {
        match self {
            LoadResult::Success(image) => Some(image),
            _ => None,
        }
    }

    /// Short status label
    pub fn label(&self) -> &'static str {
        match self {
            LoadResult::Success(_) => "ok",
            LoadResult::Missing(_) => "missing",
            LoadResult::Corrupt(_) => "corrupt",
        }
    }

    /// Same outcome, carrying another caller's alt text
    fn with_alt(self, alt_text: &str) -> Self {
        match self {
            LoadResult::Success(image) => LoadResult::Success(image),
            LoadResult::Missing(_) => LoadResult::Missing(alt_text.to_string()),
            LoadResult::Corrupt(_) => LoadResult::Corrupt(alt_text.to_string()),
        }
    }
}

/// Published by a download task to everyone awaiting it
#[derive(Debug, Clone, Default)]
struct DownloadStatus {
    progress: f64,
    result: Option<LoadResult>,
}

struct ActiveDownload {
    id: u64,
    status: watch::Receiver<DownloadStatus>,
    task: JoinHandle<()>,
}

struct LoaderState {
    local_cache: FifoCache<Arc<DynamicImage>>,
    remote_cache: FifoCache<Arc<DynamicImage>>,
    active_downloads: HashMap<String, ActiveDownload>,
    bookmarks: BookmarkStore,
    next_download_id: u64,
}

/// Loads, decodes and caches images for one document session
pub struct SecureImageLoader {
    state: Arc<Mutex<LoaderState>>,
    client: Client,
    access: Arc<dyn ScopedAccessProvider>,
    max_download_bytes: u64,
    /// How long to wait for response headers
    request_timeout: Duration,
}

impl SecureImageLoader {
    /// Create a loader with an HTTP client built from `config`
    pub fn new(config: &LoaderConfig, access: Arc<dyn ScopedAccessProvider>) -> Self {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.request_timeout())
            .timeout(config.resource_timeout())
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Could not configure HTTP client, using defaults: {}", e);
                Client::new()
            });
        Self::with_client(config, access, client)
    }

    /// Create a loader around an existing HTTP client
    pub fn with_client(
        config: &LoaderConfig,
        access: Arc<dyn ScopedAccessProvider>,
        client: Client,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoaderState {
                local_cache: FifoCache::new(config.max_local_cache),
                remote_cache: FifoCache::new(config.max_remote_cache),
                active_downloads: HashMap::new(),
                bookmarks: BookmarkStore::new(),
                next_download_id: 0,
            })),
            client,
            access,
            max_download_bytes: config.max_download_bytes,
            request_timeout: config.request_timeout(),
        }
    }

    /// Load the image behind `source`.
    ///
    /// `document_path` decides whether local files need scoped access;
    /// `on_progress` receives strictly increasing progress for remote images.
    pub async fn load(
        &self,
        source: &ImageSource,
        alt_text: &str,
        document_path: Option<&Path>,
        on_progress: Option<ProgressCallback>,
    ) -> LoadResult {
        match source {
            ImageSource::Remote(url) => self.load_remote(url, alt_text, on_progress).await,
            ImageSource::Sidecar {
                filename,
                resolved_path: None,
            } => {
                log::debug!("Sidecar image {:?} is not in the manifest", filename);
                LoadResult::Missing(alt_text.to_string())
            }
            local => match local.local_path() {
                Some(path) => self.load_local(path, alt_text, document_path).await,
                None => LoadResult::Missing(alt_text.to_string()),
            },
        }
    }

    async fn load_local(&self, path: &Path, alt_text: &str, document_path: Option<&Path>) -> LoadResult {
        let key = path.to_string_lossy().into_owned();

        if let Some(image) = self.state.lock().await.local_cache.get(&key) {
            return LoadResult::Success(image);
        }

        // Released when this function returns, whatever the outcome
        let _scope = if needs_scoped_access(path, document_path) {
            match self.acquire_scoped_access(path).await {
                Some(scope) => Some(scope),
                None => {
                    log::debug!("No access to {}", path.display());
                    return LoadResult::Missing(alt_text.to_string());
                }
            }
        } else {
            None
        };

        if !path.is_file() {
            log::debug!("Image file not found: {}", path.display());
            return LoadResult::Missing(alt_text.to_string());
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::debug!("Could not read {}: {}", path.display(), e);
                return LoadResult::Missing(alt_text.to_string());
            }
        };

        let Some(image) = decode(&bytes) else {
            log::debug!("Could not decode {}", path.display());
            return LoadResult::Corrupt(alt_text.to_string());
        };

        let image = Arc::new(image);
        if let Some(evicted) = self.state.lock().await.local_cache.insert(key, Arc::clone(&image)) {
            log::trace!("Evicted {} from local image cache", evicted);
        }
        LoadResult::Success(image)
    }

    /// Try a stored bookmark first, then direct access
    async fn acquire_scoped_access(&self, path: &Path) -> Option<ScopedAccess> {
        let bookmark = self
            .state
            .lock()
            .await
            .bookmarks
            .get(path)
            .map(<[u8]>::to_vec);

        if let Some(bookmark) = bookmark {
            match self.access.resolve_bookmark(&bookmark) {
                Ok(resolved) => {
                    if let Some(scope) = ScopedAccess::acquire(&self.access, resolved.path) {
                        if resolved.is_stale {
                            log::debug!("Refreshing stale bookmark for {}", path.display());
                            self.store_bookmark(path).await;
                        }
                        return Some(scope);
                    }
                }
                Err(e) => log::debug!("Stored bookmark unusable: {}", e),
            }
        }

        ScopedAccess::acquire(&self.access, path)
    }

    async fn load_remote(&self, url: &Url, alt_text: &str, on_progress: Option<ProgressCallback>) -> LoadResult {
        let key = url.as_str().to_string();

        let mut status = {
            let mut state = self.state.lock().await;

            let cached = state.remote_cache.get(&key);
            if let Some(image) = cached {
                drop(state);
                if let Some(callback) = &on_progress {
                    callback(1.0);
                }
                return LoadResult::Success(image);
            }

            match state.active_downloads.get(&key) {
                Some(active) => {
                    log::debug!("Joining in-flight download of {}", key);
                    active.status.clone()
                }
                None => self.start_download(&mut state, key, url.clone(), alt_text, on_progress.is_some()),
            }
        };

        wait_for_download(&mut status, alt_text, on_progress.as_ref()).await
    }

    /// Spawn a tracked download task; the caller holds the state lock
    fn start_download(
        &self,
        state: &mut LoaderState,
        key: String,
        url: Url,
        alt_text: &str,
        stream: bool,
    ) -> watch::Receiver<DownloadStatus> {
        let id = state.next_download_id;
        state.next_download_id += 1;

        let (tx, rx) = watch::channel(DownloadStatus::default());
        let shared = Arc::clone(&self.state);
        let client = self.client.clone();
        let max_bytes = self.max_download_bytes;
        let request_timeout = self.request_timeout;
        let alt_text = alt_text.to_string();
        let task_key = key.clone();

        log::debug!("Downloading {}", key);
        let task = tokio::spawn(async move {
            let result = fetch_image(&client, url, &alt_text, stream, max_bytes, request_timeout, &tx).await;

            {
                let mut state = shared.lock().await;
                let is_current = state
                    .active_downloads
                    .get(&task_key)
                    .map(|active| active.id == id)
                    .unwrap_or(false);
                if is_current {
                    state.active_downloads.remove(&task_key);
                }
                if let LoadResult::Success(image) = &result {
                    state.remote_cache.insert(task_key, Arc::clone(image));
                }
            }

            tx.send_modify(|status| {
                if result.is_success() {
                    status.progress = 1.0;
                }
                status.result = Some(result);
            });
        });

        state.active_downloads.insert(
            key,
            ActiveDownload {
                id,
                status: rx.clone(),
                task,
            },
        );
        rx
    }

    pub async fn clear_local_cache(&self) {
        self.state.lock().await.local_cache.clear();
    }

    pub async fn clear_remote_cache(&self) {
        self.state.lock().await.remote_cache.clear();
    }

    /// Clear both caches
    pub async fn clear_all(&self) {
        let mut state = self.state.lock().await;
        state.local_cache.clear();
        state.remote_cache.clear();
    }

    /// Remove a URL or path from both caches
    pub async fn evict(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.local_cache.remove(key);
        state.remote_cache.remove(key);
    }

    /// Cancel every in-flight download; awaiting callers get `Missing`
    pub async fn cancel_all_downloads(&self) {
        let mut state = self.state.lock().await;
        for (url, download) in state.active_downloads.drain() {
            log::debug!("Cancelling download of {}", url);
            download.task.abort();
        }
    }

    /// Remember a bookmark for `path`; failures are ignored
    pub async fn store_bookmark(&self, path: &Path) {
        match self.access.create_bookmark(path) {
            Ok(bookmark) => self
                .state
                .lock()
                .await
                .bookmarks
                .insert(path.to_path_buf(), bookmark),
            Err(e) => log::debug!("Not storing bookmark: {}", e),
        }
    }

    pub async fn remove_bookmark(&self, path: &Path) -> bool {
        self.state.lock().await.bookmarks.remove(path)
    }

    pub async fn clear_bookmarks(&self) {
        self.state.lock().await.bookmarks.clear();
    }

    /// Local cache keys from oldest to newest
    pub async fn local_cache_keys(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .local_cache
            .keys()
            .map(str::to_string)
            .collect()
    }

    pub async fn remote_cache_len(&self) -> usize {
        self.state.lock().await.remote_cache.len()
    }

    pub async fn active_download_count(&self) -> usize {
        self.state.lock().await.active_downloads.len()
    }

    pub async fn bookmark_count(&self) -> usize {
        self.state.lock().await.bookmarks.len()
    }
}

impl Drop for SecureImageLoader {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_lock() {
            for (_, download) in state.active_downloads.drain() {
                download.task.abort();
            }
        }
    }
}

/// Files outside the document's folder need explicit access
fn needs_scoped_access(path: &Path, document_path: Option<&Path>) -> bool {
    match document_path.and_then(Path::parent) {
        Some(dir) => !standardize(path).starts_with(standardize(dir)),
        None => true,
    }
}

/// Decode bytes into an image, rejecting empty images
fn decode(bytes: &[u8]) -> Option<DynamicImage> {
    image::load_from_memory(bytes)
        .ok()
        .filter(|image| image.width() > 0 && image.height() > 0)
}

async fn wait_for_download(
    status: &mut watch::Receiver<DownloadStatus>,
    alt_text: &str,
    on_progress: Option<&ProgressCallback>,
) -> LoadResult {
    let mut reported = 0.0_f64;

    loop {
        let current = status.borrow_and_update().clone();
        if let Some(callback) = on_progress {
            if current.progress > reported {
                reported = current.progress;
                callback(reported);
            }
        }
        if let Some(result) = current.result {
            return result.with_alt(alt_text);
        }

        if status.changed().await.is_err() {
            let last = status.borrow().clone();
            if let Some(result) = last.result {
                if let Some(callback) = on_progress {
                    if last.progress > reported {
                        callback(last.progress);
                    }
                }
                return result.with_alt(alt_text);
            }
            log::debug!("Download cancelled before completion");
            return LoadResult::Missing(alt_text.to_string());
        }
    }
}

async fn fetch_image(
    client: &Client,
    url: Url,
    alt_text: &str,
    stream: bool,
    max_bytes: u64,
    request_timeout: Duration,
    status: &watch::Sender<DownloadStatus>,
) -> LoadResult {
    let missing = || LoadResult::Missing(alt_text.to_string());
    let corrupt = || LoadResult::Corrupt(alt_text.to_string());

    let request = client
        .get(url.clone())
        .header(header::CACHE_CONTROL, "no-cache")
        .send();
    let response = match tokio::time::timeout(request_timeout, request).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            log::debug!("Request for {} failed: {}", url, e);
            return missing();
        }
        Err(_) => {
            log::debug!("No response from {} within {:?}", url, request_timeout);
            return missing();
        }
    };

    if !response.status().is_success() {
        log::debug!("{} answered {}", url, response.status());
        return missing();
    }

    if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
        let content_type = content_type.to_str().unwrap_or("").trim().to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            log::debug!("{} is {}, not an image", url, content_type);
            return corrupt();
        }
    }

    if response.content_length().map(|len| len > max_bytes).unwrap_or(false) {
        log::warn!("{} exceeds the {} byte download limit", url, max_bytes);
        return missing();
    }

    let body = if stream {
        read_with_progress(response, max_bytes, status).await
    } else {
        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                log::debug!("Could not read body of {}: {}", url, e);
                None
            }
        }
    };

    let Some(body) = body.filter(|body| body.len() as u64 <= max_bytes) else {
        return missing();
    };

    match decode(&body) {
        Some(image) => LoadResult::Success(Arc::new(image)),
        None => {
            log::debug!("Could not decode image from {}", url);
            corrupt()
        }
    }
}

/// Read the body chunk by chunk, publishing fractional progress
async fn read_with_progress(
    mut response: Response,
    max_bytes: u64,
    status: &watch::Sender<DownloadStatus>,
) -> Option<Vec<u8>> {
    let expected = response.content_length().filter(|len| *len > 0);
    let mut body = Vec::with_capacity(expected.unwrap_or(0).min(max_bytes) as usize);
    let mut last = 0.0_f64;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                body.extend_from_slice(&chunk);
                if body.len() as u64 > max_bytes {
                    log::warn!("Download exceeded the {} byte limit", max_bytes);
                    return None;
                }
                if let Some(total) = expected {
                    let fraction = (body.len() as f64 / total as f64).min(MAX_STREAMING_PROGRESS);
                    if fraction > last {
                        last = fraction;
                        status.send_modify(|s| s.progress = fraction);
                    }
                }
            }
            Ok(None) => return Some(body),
            Err(e) => {
                log::debug!("Download interrupted: {}", e);
                return None;
            }
        }
    }
}
