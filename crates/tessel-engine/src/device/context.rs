use crate::backend::{DrawCall, ImageId, PipelineState, RenderBackend, SourceImage, TargetInfo};
use crate::batch::{PrimitiveKind, Vertex};
use crate::error::{RenderError, Result, UsageError};
use crate::imageop::{FilterKind, FilterUniforms};
use crate::mask::TileSlot;
use crate::paint::Color;

/// Counters accumulated by a [`DeviceContext`] since creation or the last
/// [`DeviceContext::take_stats`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FrameStats {
    pub draw_calls: u64,
    pub vertices: u64,
    pub tile_uploads: u64,
    pub uniform_writes: u64,
    pub submits: u64,
}

/// Per-target drawing context.
///
/// Owns the backend, at most one open command buffer, the pipeline selection
/// and the shared filter uniforms. The command buffer opens lazily on the first
/// draw after a submit.
pub struct DeviceContext<B: RenderBackend> {
    backend: B,
    target: Option<TargetInfo>,
    command_buffer_open: bool,

    pipeline: PipelineState,
    uniforms: Option<Box<FilterUniforms>>,
    uniforms_dirty: bool,

    color: Color,
    packed_color: [u8; 4],

    lost: bool,
    stats: FrameStats,
}

impl<B: RenderBackend> DeviceContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            target: None,
            command_buffer_open: false,
            pipeline: PipelineState::default(),
            uniforms: None,
            uniforms_dirty: false,
            color: Color::BLACK,
            packed_color: Color::BLACK.to_rgba8(),
            lost: false,
            stats: FrameStats::default(),
        }
    }

    /// Allocates backend resources. Failure means the backend cannot be used.
    pub fn init(&mut self) -> Result<()> {
        self.backend.init().map_err(|err| match err {
            RenderError::BackendUnavailable(_) => err,
            other => RenderError::BackendUnavailable(other.to_string()),
        })
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Drops the context, discarding any open command buffer.
    pub fn into_backend(mut self) -> B {
        self.abandon_frame();
        self.backend
    }

    #[inline]
    pub fn target(&self) -> Option<TargetInfo> {
        self.target
    }

    #[inline]
    pub fn pipeline(&self) -> &PipelineState {
        &self.pipeline
    }

    #[inline]
    pub fn is_command_buffer_open(&self) -> bool {
        self.command_buffer_open
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn take_stats(&mut self) -> FrameStats {
        std::mem::take(&mut self.stats)
    }

    // ── frame lifecycle ───────────────────────────────────────────────────

    /// Binds `target` and opens a command buffer.
    ///
    /// A command buffer still open from the previous target is submitted first;
    /// callers flush their batches before calling this.
    pub fn begin_frame(&mut self, target: B::Target) -> Result<()> {
        self.ensure_usable()?;
        if self.command_buffer_open {
            self.submit()?;
        }
        let info = self
            .backend
            .bind_target(target)
            .map_err(|err| self.fail(err))?;
        log::trace!("bound target {}x{}", info.width, info.height);
        self.target = Some(info);
        self.ensure_open()
    }

    /// Closes and dispatches the open command buffer. No-op when none is open.
    pub fn submit(&mut self) -> Result<()> {
        if !self.command_buffer_open {
            return Ok(());
        }
        self.command_buffer_open = false;
        self.backend.commit().map_err(|err| self.fail(err))?;
        self.stats.submits += 1;
        log::trace!(
            "submit #{}: {} draws, {} vertices so far",
            self.stats.submits,
            self.stats.draw_calls,
            self.stats.vertices
        );
        Ok(())
    }

    /// Discards the open command buffer without dispatch.
    pub fn abandon_frame(&mut self) {
        if self.command_buffer_open {
            log::debug!("abandoning open command buffer");
            self.backend.discard();
            self.command_buffer_open = false;
        }
    }

    /// Recreates every backend object after [`RenderError::DeviceLost`].
    ///
    /// The target must be bound again with `begin_frame`.
    pub fn recover(&mut self) -> Result<()> {
        self.backend.discard();
        self.command_buffer_open = false;
        self.target = None;
        self.backend.reset_device()?;
        self.init()?;
        self.lost = false;
        self.uniforms_dirty = self.uniforms.is_some();
        log::debug!("device context recovered");
        Ok(())
    }

    // ── color ─────────────────────────────────────────────────────────────

    /// Sets the color baked into vertices appended from now on.
    pub fn set_color(&mut self, color: Color) {
        self.color = color;
        self.packed_color = color.to_rgba8();
    }

    #[inline]
    pub fn color(&self) -> Color {
        self.color
    }

    #[inline]
    pub fn packed_color(&self) -> [u8; 4] {
        self.packed_color
    }

    // ── pipeline selection ────────────────────────────────────────────────
    //
    // Callers flush pending geometry before changing any of these.

    /// Selects `kind` for image draws and replaces the shared uniform block.
    pub fn set_filter(&mut self, source: SourceImage, uniforms: FilterUniforms) {
        log::debug!("image op {:?} on image {}", uniforms.kind(), source.id.raw());
        self.pipeline.filter = uniforms.kind();
        self.pipeline.image_source = Some(source);
        self.uniforms = Some(Box::new(uniforms));
        self.uniforms_dirty = true;
    }

    pub fn clear_filter(&mut self) {
        log::debug!("image op {:?} cleared", self.pipeline.filter);
        self.pipeline.filter = FilterKind::None;
        self.uniforms = None;
        self.uniforms_dirty = false;
    }

    #[inline]
    pub fn uniforms(&self) -> Option<&FilterUniforms> {
        self.uniforms.as_deref()
    }

    pub fn set_aa_program(&mut self, enabled: bool) {
        self.pipeline.aa_program = enabled;
    }

    pub fn bind_mask_atlas(&mut self, bound: bool) {
        self.pipeline.mask_atlas = bound;
    }

    pub fn bind_image_source(&mut self, source: Option<SourceImage>) {
        self.pipeline.image_source = source;
    }

    pub fn bind_glyph_source(&mut self, texture: Option<ImageId>) {
        self.pipeline.glyph_source = texture;
    }

    // ── recording ─────────────────────────────────────────────────────────

    /// Records one draw call with the current pipeline selection.
    pub fn draw(&mut self, kind: PrimitiveKind, vertices: &[Vertex]) -> Result<()> {
        self.ensure_open()?;
        if self.uniforms_dirty {
            self.write_uniforms()?;
        }
        let call = DrawCall {
            kind,
            state: &self.pipeline,
            vertices,
        };
        if let Err(err) = self.backend.draw(&call) {
            return Err(self.fail(err));
        }
        self.stats.draw_calls += 1;
        self.stats.vertices += vertices.len() as u64;
        log::trace!("draw {:?} x{}", kind, vertices.len());
        Ok(())
    }

    /// Records a tile upload ahead of the draws that sample it.
    pub fn upload_mask_tile(&mut self, slot: TileSlot, texels: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if let Err(err) = self.backend.upload_mask_tile(slot, texels) {
            return Err(self.fail(err));
        }
        self.stats.tile_uploads += 1;
        Ok(())
    }

    fn write_uniforms(&mut self) -> Result<()> {
        let Some(uniforms) = self.uniforms.as_deref() else {
            self.uniforms_dirty = false;
            return Ok(());
        };
        if let Err(err) = self.backend.write_uniforms(uniforms) {
            return Err(self.fail(err));
        }
        self.uniforms_dirty = false;
        self.stats.uniform_writes += 1;
        Ok(())
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.lost {
            return Err(RenderError::DeviceLost);
        }
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.command_buffer_open {
            return Ok(());
        }
        if self.target.is_none() {
            return Err(UsageError::NoTarget.into());
        }
        if let Err(err) = self.backend.open_command_buffer() {
            return Err(self.fail(err));
        }
        self.command_buffer_open = true;
        // Uniform storage is per command buffer.
        self.uniforms_dirty = self.uniforms.is_some();
        Ok(())
    }

    /// Applies the frame-abandoning failure policy and hands the error back.
    fn fail(&mut self, err: RenderError) -> RenderError {
        match &err {
            RenderError::DeviceLost => {
                log::error!("graphics device lost; context unusable until recover()");
                self.lost = true;
                self.backend.discard();
                self.command_buffer_open = false;
            }
            RenderError::ResourceExhausted(what) => {
                log::warn!("abandoning frame: {what}");
                self.backend.discard();
                self.command_buffer_open = false;
            }
            _ => {}
        }
        err
    }
}
