//! Image-op pipeline state: per-pixel filters applied while drawing image quads.
//!
//! At most one op is active per context. Enabling flushes pending geometry and
//! writes the shared [`FilterUniforms`] slot; disabling flushes again before the
//! pipeline returns to plain sampling.

pub mod eval;
mod params;
mod state;
mod uniforms;

pub use params::{ConvolveOp, LookupOp, LookupTable, RescaleOp};
pub use state::{ImageOp, ImageOpState};
pub use uniforms::{FilterUniforms, EDGE_ZERO_FILL, LOOKUP_ALPHA, NON_PREMULTIPLIED};

/// Pixel-pipeline variant selected for image draws.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum FilterKind {
    #[default]
    None,
    Convolve,
    Rescale,
    Lookup,
}

impl FilterKind {
    #[inline]
    pub const fn index(self) -> u32 {
        match self {
            FilterKind::None => 0,
            FilterKind::Convolve => 1,
            FilterKind::Rescale => 2,
            FilterKind::Lookup => 3,
        }
    }
}
