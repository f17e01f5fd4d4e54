//! framegrab-core: error taxonomy and reader configuration.
//!
//! This crate is the foundational dependency for the other framegrab crates.
//! Every demuxer funnels its failures into [`Error`], and every caller-facing
//! failure can be reduced to a [`ResultCode`].

pub mod config;
pub mod error;

// Re-export the most commonly used items at the crate root.
pub use config::{Config, IndexConfig, MjpegConfig};
pub use error::{Error, Result, ResultCode};
