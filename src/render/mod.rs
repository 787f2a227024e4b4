//! Preview rendering
//!
//! Schedules markdown parsing for the live preview.

pub mod scheduler;

pub use scheduler::{RenderPhase, RenderScheduler};
