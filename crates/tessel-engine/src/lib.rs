//! Tessel engine crate.
//!
//! Immediate-mode 2D batching backend: decomposed primitives, mask tiles and
//! per-pixel image filters are turned into ordered draw calls against a
//! [`backend::RenderBackend`].

pub mod backend;
pub mod batch;
pub mod config;
pub mod device;
pub mod error;
pub mod imageop;
pub mod logging;
pub mod mask;
pub mod paint;
pub mod render;

pub use error::{RenderError, Result, UsageError};
