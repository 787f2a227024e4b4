//! Notebook Preview - image resolution and preview scheduling for a
//! Markdown editor
//!
//! The crate turns markdown image destinations into typed sources, keeps a
//! per-document sidecar directory of assets, loads local and remote images
//! through bounded caches and schedules debounced re-renders of the preview.

pub mod config;
pub mod error;
pub mod images;
pub mod markdown;
pub mod render;
pub mod session;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use session::{DocumentSession, ResolvedImage};
