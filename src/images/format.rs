//! Image format detection
//!
//! Decides whether a file, a byte buffer or a declared MIME type is an image,
//! and which extension it should carry.

use std::path::Path;

/// Supported image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Svg,
    Bmp,
    Tiff,
    Ico,
    Avif,
    Heic,
}

impl ImageFormat {
    /// Get file extension for the format
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Svg => "svg",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Ico => "ico",
            ImageFormat::Avif => "avif",
            ImageFormat::Heic => "heic",
        }
    }

    /// Get the MIME type for the format
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Svg => "image/svg+xml",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::Ico => "image/x-icon",
            ImageFormat::Avif => "image/avif",
            ImageFormat::Heic => "image/heic",
        }
    }

    /// Detect format from magic bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(ImageFormat::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageFormat::Jpeg);
        }

        // GIF: GIF87a or GIF89a
        if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            return Some(ImageFormat::Gif);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && data.len() >= 12 && &data[8..12] == b"WEBP" {
            return Some(ImageFormat::Webp);
        }

        // ISO base media: ....ftypavif / ....ftypheic
        if data.len() >= 12 && &data[4..8] == b"ftyp" {
            match &data[8..12] {
                b"avif" | b"avis" => return Some(ImageFormat::Avif),
                b"heic" | b"heix" | b"mif1" => return Some(ImageFormat::Heic),
                _ => {}
            }
        }

        if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
            return Some(ImageFormat::Tiff);
        }

        if data.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
            return Some(ImageFormat::Ico);
        }

        if data.starts_with(b"BM") && data.len() >= 14 {
            return Some(ImageFormat::Bmp);
        }

        // SVG: Look for XML/SVG declaration
        let head = &data[..data.len().min(256)];
        let start = String::from_utf8_lossy(head);
        if start.contains("<svg") || (start.trim_start().starts_with("<?xml") && start.contains("svg")) {
            return Some(ImageFormat::Svg);
        }

        None
    }

    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" | "jpe" => Some(ImageFormat::Jpeg),
            "gif" => Some(ImageFormat::Gif),
            "webp" => Some(ImageFormat::Webp),
            "svg" => Some(ImageFormat::Svg),
            "bmp" => Some(ImageFormat::Bmp),
            "tif" | "tiff" => Some(ImageFormat::Tiff),
            "ico" => Some(ImageFormat::Ico),
            "avif" => Some(ImageFormat::Avif),
            "heic" | "heif" => Some(ImageFormat::Heic),
            _ => None,
        }
    }

    /// Detect format from a declared MIME type such as `image/png`
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_lowercase();
        let subtype = essence.strip_prefix("image/")?;
        match subtype {
            "png" => Some(ImageFormat::Png),
            "jpeg" | "jpg" | "pjpeg" => Some(ImageFormat::Jpeg),
            "gif" => Some(ImageFormat::Gif),
            "webp" => Some(ImageFormat::Webp),
            "svg+xml" => Some(ImageFormat::Svg),
            "bmp" | "x-ms-bmp" => Some(ImageFormat::Bmp),
            "tiff" => Some(ImageFormat::Tiff),
            "x-icon" | "vnd.microsoft.icon" => Some(ImageFormat::Ico),
            "avif" => Some(ImageFormat::Avif),
            "heic" | "heif" => Some(ImageFormat::Heic),
            _ => None,
        }
    }

    /// Detect format from a path's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Check if a path names a supported image file
pub fn is_image_path(path: &Path) -> bool {
    ImageFormat::from_path(path).is_some()
}

/// Check if a declared MIME type is an image type
pub fn is_image_mime(mime: &str) -> bool {
    mime.trim().to_lowercase().starts_with("image/")
}
