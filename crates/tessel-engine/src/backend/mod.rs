//! Device seam: the operations the batching core needs from a graphics device.
//!
//! [`SoftwareBackend`] rasterizes on the CPU and records what it was asked to do;
//! [`gpu::WgpuBackend`] records the same calls into wgpu command buffers.

pub mod gpu;
mod raster;
mod software;

pub use software::{DrawRecord, Fault, SoftwareBackend, Upload};

use crate::batch::{PrimitiveKind, Vertex};
use crate::error::Result;
use crate::imageop::{FilterKind, FilterUniforms};
use crate::mask::TileSlot;

/// Opaque handle to a backend-owned texture.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ImageId(u32);

impl ImageId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Source image for blits and image ops.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SourceImage {
    pub id: ImageId,
    pub width: u32,
    pub height: u32,
}

/// Extent of the bound drawing target, in pixels.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TargetInfo {
    pub width: u32,
    pub height: u32,
}

/// Pipeline selection in effect for a draw call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineState {
    pub filter: FilterKind,
    pub aa_program: bool,
    pub mask_atlas: bool,
    pub image_source: Option<SourceImage>,
    pub glyph_source: Option<ImageId>,
}

/// One flushed batch.
#[derive(Debug)]
pub struct DrawCall<'a> {
    pub kind: PrimitiveKind,
    pub state: &'a PipelineState,
    pub vertices: &'a [Vertex],
}

/// Operations a device context issues against its graphics device.
///
/// Calls between `open_command_buffer` and `commit`/`discard` are recorded in
/// order and take effect together; tile uploads and uniform writes only affect
/// draws recorded after them.
pub trait RenderBackend {
    /// Drawable bound by `begin_frame`.
    type Target;

    /// Allocates the mask atlas and vertex/uniform storage. The reserved tile is
    /// filled opaque here.
    fn init(&mut self) -> Result<()>;

    fn bind_target(&mut self, target: Self::Target) -> Result<TargetInfo>;

    fn open_command_buffer(&mut self) -> Result<()>;

    /// Replaces the texels of `slot`; `texels` is one full row-major tile.
    fn upload_mask_tile(&mut self, slot: TileSlot, texels: &[u8]) -> Result<()>;

    /// Replaces the shared filter uniform block.
    fn write_uniforms(&mut self, uniforms: &FilterUniforms) -> Result<()>;

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()>;

    /// Closes and dispatches the open command buffer.
    fn commit(&mut self) -> Result<()>;

    /// Drops the open command buffer without dispatch.
    fn discard(&mut self);

    /// Recreates every device object after a loss. `init` runs again afterwards.
    fn reset_device(&mut self) -> Result<()>;
}
