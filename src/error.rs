//! Error types for Notebook Preview
//!
//! This module defines the custom error types used throughout the crate.
//! Only configuration-level problems are errors: image resolution and loading
//! failures are represented as data (`ImageSource`, `LoadResult`) instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type encompassing all error categories
#[derive(Error, Debug)]
pub enum AppError {
    /// Sidecar asset directory errors
    #[error(transparent)]
    Sidecar(#[from] SidecarError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Markdown rendering errors
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Clipboard errors
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),

    /// File watcher errors
    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

/// Errors raised by the sidecar asset manager
#[derive(Error, Debug)]
pub enum SidecarError {
    /// No document (and therefore no sidecar directory) is configured
    #[error("No sidecar directory configured (save the document first)")]
    NoSidecarConfigured,

    /// The image to add does not exist
    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    /// Copying or writing the image into the sidecar directory failed
    #[error("Could not copy image: {0}")]
    CopyFailed(String),

    /// The sidecar directory could not be created
    #[error("Could not create assets directory: {0}")]
    DirectoryCreationFailed(String),

    /// The file or data is not a recognized image format
    #[error("Invalid image format")]
    InvalidImageFormat,
}

impl SidecarError {
    /// Create a user-friendly error message suitable for display in dialogs
    pub fn user_message(&self) -> String {
        match self {
            SidecarError::NoSidecarConfigured => {
                "Images can only be added to a document that has been saved.".to_string()
            }
            SidecarError::ImageNotFound(path) => {
                format!("The image {} could not be found.", path.display())
            }
            SidecarError::CopyFailed(_) => {
                "The image could not be copied into the document's assets folder.".to_string()
            }
            SidecarError::DirectoryCreationFailed(_) => {
                "The document's assets folder could not be created.".to_string()
            }
            SidecarError::InvalidImageFormat => {
                "This file is not a supported image.".to_string()
            }
        }
    }

    /// Suggest how the user can recover from the error
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SidecarError::NoSidecarConfigured => "Save the document, then insert the image again.",
            SidecarError::ImageNotFound(_) => "Check that the file still exists and try again.",
            SidecarError::CopyFailed(_) | SidecarError::DirectoryCreationFailed(_) => {
                "Check disk space and folder permissions, then try again."
            }
            SidecarError::InvalidImageFormat => {
                "Use a PNG, JPEG, GIF, WebP, SVG, BMP, TIFF, AVIF or HEIC image."
            }
        }
    }
}

/// Markdown rendering errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The parser rejected the document
    #[error("Could not parse markdown: {0}")]
    Parse(String),

    /// The render was superseded before it finished
    #[error("Render cancelled")]
    Cancelled,
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error loading configuration file
    #[error("Could not load configuration: {0}")]
    LoadError(String),

    /// Error saving configuration
    #[error("Could not save configuration: {0}")]
    SaveError(String),

    /// Error parsing configuration
    #[error("Invalid configuration format: {0}")]
    ParseError(String),

    /// Configuration directory error
    #[error("Could not access configuration directory")]
    DirectoryError,
}

/// Clipboard related errors
#[derive(Error, Debug)]
pub enum ClipboardError {
    /// Could not access clipboard
    #[error("Could not access clipboard: {0}")]
    AccessDenied(String),

    /// Clipboard is empty
    #[error("Clipboard is empty")]
    Empty,

    /// Clipboard image could not be converted
    #[error("Could not encode clipboard image: {0}")]
    Encode(String),
}

/// Security-scoped bookmark errors
#[derive(Error, Debug)]
pub enum AccessError {
    /// A bookmark could not be created for the path
    #[error("Could not create bookmark for {}: {reason}", path.display())]
    BookmarkCreation { path: PathBuf, reason: String },

    /// A stored bookmark could not be resolved
    #[error("Could not resolve bookmark: {0}")]
    BookmarkResolution(String),
}

/// Result type alias for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for sidecar operations
pub type SidecarResult<T> = Result<T, SidecarError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_error_display() {
        let err = SidecarError::ImageNotFound(PathBuf::from("/test/logo.png"));
        assert!(err.to_string().contains("/test/logo.png"));
    }

    #[test]
    fn test_sidecar_error_user_message() {
        let err = SidecarError::NoSidecarConfigured;
        assert!(err.user_message().contains("saved"));
        assert!(err.recovery_suggestion().starts_with("Save"));
    }

    #[test]
    fn test_app_error_from_sidecar_error() {
        let app_err: AppError = SidecarError::InvalidImageFormat.into();
        assert!(matches!(app_err, AppError::Sidecar(_)));
    }

    #[test]
    fn test_render_error_display() {
        let err = RenderError::Parse("unexpected end".to_string());
        assert_eq!(err.to_string(), "Could not parse markdown: unexpected end");
    }
}
