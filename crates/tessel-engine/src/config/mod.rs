//! Capacity constants and the graphics configuration descriptor.
//!
//! The constants in [`caps`] are shared with the command encoder that packs
//! drawing commands for this backend; changing one without the other breaks
//! payload decoding.

pub mod caps;
mod graphics;

pub use caps::CacheLayout;
pub use graphics::{
    color_layout, describe, ContextCaps, FlipContents, GraphicsConfig, PixelLayout, SurfaceKind,
    Transparency,
};
