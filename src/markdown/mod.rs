//! Markdown module for Notebook Preview
//!
//! Handles the markdown side of the preview pipeline:
//! - Link/image destination normalization
//! - Parsing text into a document tree for the preview

pub mod ast;
pub mod destination;

pub use ast::{CommonMarkParser, Document, ImageReference, MarkdownParser, Node, NodeKind};
pub use destination::{format_destination, parse_destination};
