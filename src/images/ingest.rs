//! Drag-and-drop and paste ingestion
//!
//! Dropped or pasted images are stored in the document's sidecar directory
//! and a markdown image reference is queued for the editor to insert at the
//! cursor.

use crate::error::ClipboardError;
use crate::images::access::{ScopedAccess, ScopedAccessProvider};
use crate::images::format::{is_image_path, ImageFormat};
use crate::images::sidecar::SidecarAssetManager;
use crate::markdown::format_destination;
use arboard::Clipboard;
use chrono::Utc;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Alt text for images that arrive without a name
const DATA_ALT_TEXT: &str = "image";

/// One item delivered by a drop or paste
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DroppedItem {
    /// A file on disk
    File(PathBuf),
    /// Raw image bytes with their declared MIME type, if any
    Data { bytes: Vec<u8>, mime: Option<String> },
}

/// Everything the pasteboard offered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasteboardContents {
    pub items: Vec<DroppedItem>,
}

impl PasteboardContents {
    pub fn new(items: Vec<DroppedItem>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Read image data and image file references from the system clipboard
    pub fn from_clipboard() -> Result<Self, ClipboardError> {
        let mut clipboard =
            Clipboard::new().map_err(|e| ClipboardError::AccessDenied(e.to_string()))?;
        let mut items = Vec::new();

        match clipboard.get_image() {
            Ok(image) => {
                let bytes = encode_png(image.width, image.height, image.bytes.into_owned())?;
                items.push(DroppedItem::Data {
                    bytes,
                    mime: Some(ImageFormat::Png.mime_type().to_string()),
                });
            }
            Err(arboard::Error::ContentNotAvailable) => {}
            Err(e) => return Err(ClipboardError::AccessDenied(e.to_string())),
        }

        match clipboard.get_text() {
            Ok(text) => items.extend(file_items_from_text(&text)),
            Err(arboard::Error::ContentNotAvailable) => {}
            Err(e) => log::debug!("Clipboard text unavailable: {}", e),
        }

        if items.is_empty() {
            return Err(ClipboardError::Empty);
        }
        Ok(Self { items })
    }
}

/// Image files named by a text paste, one per line
pub fn file_items_from_text(text: &str) -> Vec<DroppedItem> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let path = if line.starts_with("file://") {
                Url::parse(line).ok()?.to_file_path().ok()?
            } else {
                PathBuf::from(line)
            };
            (path.is_file() && is_image_path(&path)).then_some(DroppedItem::File(path))
        })
        .collect()
}

fn encode_png(width: usize, height: usize, rgba: Vec<u8>) -> Result<Vec<u8>, ClipboardError> {
    let buffer = image::RgbaImage::from_raw(width as u32, height as u32, rgba)
        .ok_or_else(|| ClipboardError::Encode("pixel buffer size mismatch".to_string()))?;
    let mut out = std::io::Cursor::new(Vec::new());
    buffer
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| ClipboardError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

/// Turns drops and pastes into sidecar images and pending insertions
pub struct ImageIngestor {
    access: Arc<dyn ScopedAccessProvider>,
    insertions: Vec<String>,
}

impl ImageIngestor {
    pub fn new(access: Arc<dyn ScopedAccessProvider>) -> Self {
        Self {
            access,
            insertions: Vec::new(),
        }
    }

    /// Store every dropped image; returns true if at least one succeeded
    pub fn handle_drop(&mut self, sidecar: &mut SidecarAssetManager, items: &[DroppedItem]) -> bool {
        if !sidecar.is_configured() {
            log::warn!("Ignoring dropped images: document has no sidecar directory");
            return false;
        }

        let mut accepted = false;
        for item in items {
            match self.ingest(sidecar, item) {
                Some(markdown) => {
                    self.insertions.push(markdown);
                    accepted = true;
                }
                None => log::debug!("Skipped dropped item"),
            }
        }
        accepted
    }

    /// Same as a drop of the pasteboard's items
    pub fn handle_paste(&mut self, sidecar: &mut SidecarAssetManager, contents: &PasteboardContents) -> bool {
        self.handle_drop(sidecar, &contents.items)
    }

    /// Drain queued markdown insertions, oldest first
    pub fn take_insertions(&mut self) -> Vec<String> {
        std::mem::take(&mut self.insertions)
    }

    pub fn pending_insertions(&self) -> &[String] {
        &self.insertions
    }

    fn ingest(&self, sidecar: &mut SidecarAssetManager, item: &DroppedItem) -> Option<String> {
        match item {
            DroppedItem::File(path) => {
                let Some(_scope) = ScopedAccess::acquire(&self.access, path.as_path()) else {
                    log::warn!("No access to dropped file {}", path.display());
                    return None;
                };
                match sidecar.add_image(path, None) {
                    Ok(filename) => Some(image_markdown(&alt_text_for(path), &filename)),
                    Err(e) => {
                        log::warn!("Could not add {}: {}", path.display(), e);
                        None
                    }
                }
            }
            DroppedItem::Data { bytes, mime } => {
                let sniffed = ImageFormat::from_bytes(bytes);
                let declared = mime.as_deref().and_then(ImageFormat::from_mime);
                // Sniffed bytes win; the declared type only fills in an extension
                let name = match (sniffed, declared) {
                    (Some(_), _) => pasted_image_name(),
                    (None, Some(declared)) => format!("{}.{}", pasted_image_name(), declared.extension()),
                    (None, None) => {
                        log::warn!(
                            "Ignoring dropped data of type {}",
                            mime.as_deref().unwrap_or("unknown")
                        );
                        return None;
                    }
                };
                match sidecar.add_image_data(bytes, &name) {
                    Ok(filename) => Some(image_markdown(DATA_ALT_TEXT, &filename)),
                    Err(e) => {
                        log::warn!("Could not store pasted image: {}", e);
                        None
                    }
                }
            }
        }
    }
}

/// `pasted-2024-05-01-12-30-00` style name for anonymous images
fn pasted_image_name() -> String {
    format!("pasted-{}", Utc::now().format("%Y-%m-%d-%H-%M-%S"))
}

/// File stem with separators turned into spaces
fn alt_text_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace(['-', '_'], " "))
        .unwrap_or_else(|| DATA_ALT_TEXT.to_string())
}

fn image_markdown(alt: &str, filename: &str) -> String {
    format!("![{}]({})", alt, format_destination(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::access::testing::RecordingAccess;
    use crate::images::access::DirectAccess;
    use tempfile::TempDir;

    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn configured_sidecar(dir: &TempDir) -> SidecarAssetManager {
        let doc = dir.path().join("notes.md");
        std::fs::write(&doc, "# Notes").unwrap();
        let mut sidecar = SidecarAssetManager::new(Arc::new(DirectAccess));
        sidecar.configure(&doc);
        sidecar
    }

    #[test]
    fn test_drop_file_queues_markdown() {
        let dir = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let file = source.path().join("team_photo-2.png");
        std::fs::write(&file, PNG_HEADER).unwrap();

        let mut sidecar = configured_sidecar(&dir);
        let mut ingestor = ImageIngestor::new(Arc::new(DirectAccess));

        assert!(ingestor.handle_drop(&mut sidecar, &[DroppedItem::File(file)]));
        assert_eq!(ingestor.take_insertions(), vec!["![team photo 2](team_photo-2.png)"]);
        assert!(ingestor.take_insertions().is_empty());
        assert!(dir.path().join("notes.assets/team_photo-2.png").is_file());
    }

    #[test]
    fn test_name_with_spaces_is_wrapped() {
        let dir = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let file = source.path().join("my shot.png");
        std::fs::write(&file, PNG_HEADER).unwrap();

        let mut sidecar = configured_sidecar(&dir);
        let mut ingestor = ImageIngestor::new(Arc::new(DirectAccess));

        assert!(ingestor.handle_drop(&mut sidecar, &[DroppedItem::File(file)]));
        assert_eq!(ingestor.pending_insertions(), ["![my shot](<my shot.png>)"]);
    }

    #[test]
    fn test_paste_data_uses_sniffed_extension() {
        let dir = TempDir::new().unwrap();
        let mut sidecar = configured_sidecar(&dir);
        let mut ingestor = ImageIngestor::new(Arc::new(DirectAccess));

        let contents = PasteboardContents::new(vec![DroppedItem::Data {
            bytes: PNG_HEADER.to_vec(),
            mime: Some("image/png".to_string()),
        }]);
        assert!(ingestor.handle_paste(&mut sidecar, &contents));

        let insertions = ingestor.take_insertions();
        assert_eq!(insertions.len(), 1);
        assert!(insertions[0].starts_with("![image](pasted-"));
        assert!(insertions[0].ends_with(".png)"));
        assert_eq!(sidecar.images().len(), 1);
    }

    #[test]
    fn test_partial_failure_keeps_successes() {
        let dir = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let good = source.path().join("good.png");
        std::fs::write(&good, PNG_HEADER).unwrap();

        let mut sidecar = configured_sidecar(&dir);
        let mut ingestor = ImageIngestor::new(Arc::new(DirectAccess));
        let items = vec![
            DroppedItem::File(source.path().join("gone.png")),
            DroppedItem::Data {
                bytes: b"plain text".to_vec(),
                mime: Some("text/plain".to_string()),
            },
            DroppedItem::File(good),
        ];

        assert!(ingestor.handle_drop(&mut sidecar, &items));
        assert_eq!(ingestor.take_insertions(), vec!["![good](good.png)"]);
    }

    #[test]
    fn test_untyped_non_image_data_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut sidecar = configured_sidecar(&dir);
        let mut ingestor = ImageIngestor::new(Arc::new(DirectAccess));

        let items = [DroppedItem::Data {
            bytes: b"hello, plain text".to_vec(),
            mime: None,
        }];
        assert!(!ingestor.handle_drop(&mut sidecar, &items));
        assert!(ingestor.pending_insertions().is_empty());
        assert!(sidecar.images().is_empty());
    }

    #[test]
    fn test_drop_without_document_fails() {
        let source = TempDir::new().unwrap();
        let file = source.path().join("a.png");
        std::fs::write(&file, PNG_HEADER).unwrap();

        let mut sidecar = SidecarAssetManager::new(Arc::new(DirectAccess));
        let mut ingestor = ImageIngestor::new(Arc::new(DirectAccess));
        assert!(!ingestor.handle_drop(&mut sidecar, &[DroppedItem::File(file)]));
        assert!(ingestor.pending_insertions().is_empty());
    }

    #[test]
    fn test_dropped_file_access_is_released() {
        let dir = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let file = source.path().join("a.png");
        std::fs::write(&file, PNG_HEADER).unwrap();

        let mut sidecar = configured_sidecar(&dir);
        let recording = Arc::new(RecordingAccess::allowing(&[source.path()]));
        let mut ingestor = ImageIngestor::new(recording.clone());

        assert!(ingestor.handle_drop(&mut sidecar, &[DroppedItem::File(file)]));
        assert_eq!(recording.started.lock().len(), 1);
        assert_eq!(recording.open_scopes(), 0);

        let denied = Arc::new(RecordingAccess::default());
        let mut ingestor = ImageIngestor::new(denied);
        let other = source.path().join("b.png");
        std::fs::write(&other, PNG_HEADER).unwrap();
        assert!(!ingestor.handle_drop(&mut sidecar, &[DroppedItem::File(other)]));
    }

    #[test]
    fn test_file_items_from_text() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("shot.png");
        std::fs::write(&image, PNG_HEADER).unwrap();
        let text_file = dir.path().join("notes.txt");
        std::fs::write(&text_file, "x").unwrap();

        let url = Url::from_file_path(&image).unwrap();
        let text = format!("{}\n{}\n\n{}\n", url, text_file.display(), image.display());
        let items = file_items_from_text(&text);
        assert_eq!(items, vec![DroppedItem::File(image.clone()), DroppedItem::File(image)]);
    }

    #[test]
    fn test_alt_text_for() {
        assert_eq!(alt_text_for(Path::new("/x/my-cat_photo.jpg")), "my cat photo");
    }

    #[test]
    fn test_encode_png_checks_buffer_size() {
        assert!(encode_png(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(encode_png(2, 2, vec![0; 3]), Err(ClipboardError::Encode(_))));
    }
}
