//! Structured logging setup and run-event export.

mod format;

pub use format::{RunEvent, StructuredLogger};
