use std::collections::HashMap;

use crate::batch::{PrimitiveKind, Vertex};
use crate::config::caps::{
    MASK_CACHE_HEIGHT_IN_TEXELS, MASK_CACHE_SPECIAL_TILE_X, MASK_CACHE_SPECIAL_TILE_Y,
    MASK_CACHE_WIDTH_IN_TEXELS, MASK_TILE_HEIGHT, MASK_TILE_SIZE, MASK_TILE_WIDTH,
};
use crate::error::{RenderError, Result, UsageError};
use crate::imageop::eval::{filter_texel, SampleSource};
use crate::imageop::{FilterKind, FilterUniforms};
use crate::mask::TileSlot;

use super::raster::{self, Canvas, Fragment};
use super::{DrawCall, ImageId, PipelineState, RenderBackend, SourceImage, TargetInfo};

/// Failure injected into the next fallible backend call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Fault {
    Exhausted,
    DeviceLost,
}

/// A committed draw call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub kind: PrimitiveKind,
    pub vertex_count: usize,
    pub state: PipelineState,
    pub vertices: Vec<Vertex>,
}

/// A committed tile upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub slot: TileSlot,
    pub texels: Vec<u8>,
}

#[derive(Debug)]
enum Command {
    Upload(Upload),
    Uniforms(Box<FilterUniforms>),
    Draw(DrawRecord),
}

#[derive(Debug, Clone)]
struct Image {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
}

impl SampleSource for Image {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        self.texels[(y * self.width + x) as usize]
    }
}

/// CPU backend: rasterizes committed command buffers into an RGBA canvas and
/// keeps a log of everything that reached the device.
///
/// Used for headless rendering and as the reference the GPU pipelines are
/// checked against.
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    initialized: bool,
    lost: bool,
    fault: Option<Fault>,

    canvas: Option<Canvas>,
    atlas: Vec<u8>,
    images: HashMap<ImageId, Image>,
    next_image: u32,

    recording: Option<Vec<Command>>,
    uniforms: FilterUniforms,

    draws: Vec<DrawRecord>,
    uploads: Vec<Upload>,
    commits: u64,
    resets: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next fallible call fail with `fault`.
    pub fn inject_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    /// Registers a premultiplied RGBA8 image.
    pub fn add_image_rgba8(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<SourceImage> {
        let needed = width as usize * height as usize * 4;
        if rgba.len() != needed {
            return Err(UsageError::ImageSizeMismatch { len: rgba.len(), needed }.into());
        }
        let texels = rgba
            .chunks_exact(4)
            .map(|p| {
                [
                    p[0] as f32 / 255.0,
                    p[1] as f32 / 255.0,
                    p[2] as f32 / 255.0,
                    p[3] as f32 / 255.0,
                ]
            })
            .collect();
        Ok(self.insert(Image { width, height, texels }))
    }

    /// Registers an 8-bit coverage texture, as used for glyphs.
    pub fn add_coverage(&mut self, width: u32, height: u32, coverage: &[u8]) -> Result<ImageId> {
        let needed = width as usize * height as usize;
        if coverage.len() != needed {
            return Err(UsageError::ImageSizeMismatch { len: coverage.len(), needed }.into());
        }
        let texels = coverage
            .iter()
            .map(|&c| {
                let v = c as f32 / 255.0;
                [v, v, v, v]
            })
            .collect();
        Ok(self.insert(Image { width, height, texels }).id)
    }

    fn insert(&mut self, image: Image) -> SourceImage {
        self.next_image += 1;
        let source = SourceImage {
            id: ImageId::new(self.next_image),
            width: image.width,
            height: image.height,
        };
        self.images.insert(source.id, image);
        source
    }

    // ── inspection ────────────────────────────────────────────────────────

    /// Draw calls of every committed command buffer, in submission order.
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Draw calls recorded into the open command buffer.
    pub fn pending_draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.recording.iter().flatten().filter_map(|c| match c {
            Command::Draw(d) => Some(d),
            _ => None,
        })
    }

    pub fn uploads(&self) -> &[Upload] {
        &self.uploads
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn clear_log(&mut self) {
        self.draws.clear();
        self.uploads.clear();
    }

    /// Full atlas, row-major, `MASK_CACHE_WIDTH_IN_TEXELS` wide.
    pub fn mask_atlas(&self) -> &[u8] {
        &self.atlas
    }

    /// Texels of the tile at texel origin `(x, y)`.
    pub fn mask_tile(&self, x: u32, y: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(MASK_TILE_SIZE);
        if self.atlas.is_empty() {
            return out;
        }
        for row in y..y + MASK_TILE_HEIGHT {
            let start = (row * MASK_CACHE_WIDTH_IN_TEXELS + x) as usize;
            out.extend_from_slice(&self.atlas[start..start + MASK_TILE_WIDTH as usize]);
        }
        out
    }

    /// Premultiplied color of a target pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        let canvas = self.canvas.as_ref()?;
        (x < canvas.width && y < canvas.height).then(|| canvas.get(x, y))
    }

    pub fn pixel_rgba8(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.pixel(x, y)
            .map(|p| p.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
    }

    // ── execution ─────────────────────────────────────────────────────────

    fn check(&mut self) -> Result<()> {
        if self.lost {
            return Err(RenderError::DeviceLost);
        }
        match self.fault.take() {
            None => Ok(()),
            Some(Fault::Exhausted) => Err(RenderError::ResourceExhausted(
                "software backend allocation failed".into(),
            )),
            Some(Fault::DeviceLost) => {
                self.lost = true;
                Err(RenderError::DeviceLost)
            }
        }
    }

    fn recording(&mut self) -> Result<&mut Vec<Command>> {
        self.check()?;
        self.recording
            .as_mut()
            .ok_or_else(|| RenderError::BackendUnavailable("no open command buffer".into()))
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Upload(upload) => {
                let (ox, oy) = upload.slot.origin();
                for (row, texels) in upload.texels.chunks_exact(MASK_TILE_WIDTH as usize).enumerate() {
                    let start = ((oy + row as u32) * MASK_CACHE_WIDTH_IN_TEXELS + ox) as usize;
                    self.atlas[start..start + texels.len()].copy_from_slice(texels);
                }
                self.uploads.push(upload);
            }
            Command::Uniforms(uniforms) => self.uniforms = *uniforms,
            Command::Draw(record) => {
                self.rasterize(&record);
                self.draws.push(record);
            }
        }
    }

    fn rasterize(&mut self, record: &DrawRecord) {
        let Some(mut canvas) = self.canvas.take() else {
            return;
        };
        let (w, h) = (canvas.width, canvas.height);

        if record.kind == PrimitiveKind::Lines {
            for seg in record.vertices.chunks_exact(2) {
                raster::draw_line(w, h, &seg[0], &seg[1], |x, y, c| canvas.blend(x, y, c));
            }
        } else {
            for tri in record.vertices.chunks_exact(3) {
                raster::fill_triangle(w, h, tri, |f| {
                    if let Some(c) = self.shade(record, f) {
                        canvas.blend(f.x, f.y, c);
                    }
                });
            }
        }
        self.canvas = Some(canvas);
    }

    fn shade(&self, record: &DrawRecord, f: &Fragment) -> Option<[f32; 4]> {
        let scale = |c: [f32; 4], k: f32| c.map(|v| v * k);
        let (tx, ty) = (f.tex[0].floor() as i32, f.tex[1].floor() as i32);
        match record.kind {
            PrimitiveKind::Lines | PrimitiveKind::Triangles => Some(f.color),
            PrimitiveKind::MaskQuads => {
                let x = tx.clamp(0, MASK_CACHE_WIDTH_IN_TEXELS as i32 - 1) as u32;
                let y = ty.clamp(0, MASK_CACHE_HEIGHT_IN_TEXELS as i32 - 1) as u32;
                let cov = *self.atlas.get((y * MASK_CACHE_WIDTH_IN_TEXELS + x) as usize)?;
                Some(scale(f.color, cov as f32 / 255.0))
            }
            PrimitiveKind::GlyphQuads => {
                let image = self.images.get(&record.state.glyph_source?)?;
                Some(scale(f.color, image.texel_clamped(tx, ty)[0]))
            }
            PrimitiveKind::ImageQuads => {
                let source = record.state.image_source?;
                let image = self.images.get(&source.id)?;
                let texel = if record.state.filter == FilterKind::None {
                    image.texel_clamped(tx, ty)
                } else {
                    filter_texel(&self.uniforms, image, tx, ty)
                };
                Some(scale(texel, f.color[3]))
            }
            PrimitiveKind::AaParallelograms => {
                let outer = raster::parallelogram_coverage(f.tex, f.tex_dx, f.tex_dy);
                let inner = raster::parallelogram_coverage(f.aux, f.aux_dx, f.aux_dy);
                Some(scale(f.color, (outer - inner).max(0.0)))
            }
        }
    }
}

impl RenderBackend for SoftwareBackend {
    /// Target size in pixels; binding allocates a transparent canvas.
    type Target = (u32, u32);

    fn init(&mut self) -> Result<()> {
        self.check()
            .map_err(|err| RenderError::BackendUnavailable(err.to_string()))?;
        self.atlas = vec![0; (MASK_CACHE_WIDTH_IN_TEXELS * MASK_CACHE_HEIGHT_IN_TEXELS) as usize];
        for row in 0..MASK_TILE_HEIGHT {
            let start = ((MASK_CACHE_SPECIAL_TILE_Y + row) * MASK_CACHE_WIDTH_IN_TEXELS
                + MASK_CACHE_SPECIAL_TILE_X) as usize;
            self.atlas[start..start + MASK_TILE_WIDTH as usize].fill(0xff);
        }
        self.initialized = true;
        log::debug!("software backend initialized");
        Ok(())
    }

    fn bind_target(&mut self, (width, height): (u32, u32)) -> Result<TargetInfo> {
        self.check()?;
        self.canvas = Some(Canvas::new(width, height));
        Ok(TargetInfo { width, height })
    }

    fn open_command_buffer(&mut self) -> Result<()> {
        self.check()?;
        if !self.initialized {
            return Err(RenderError::BackendUnavailable("backend not initialized".into()));
        }
        self.recording = Some(Vec::new());
        Ok(())
    }

    fn upload_mask_tile(&mut self, slot: TileSlot, texels: &[u8]) -> Result<()> {
        let upload = Upload {
            slot,
            texels: texels[..MASK_TILE_SIZE.min(texels.len())].to_vec(),
        };
        self.recording()?.push(Command::Upload(upload));
        Ok(())
    }

    fn write_uniforms(&mut self, uniforms: &FilterUniforms) -> Result<()> {
        let boxed = Box::new(*uniforms);
        self.recording()?.push(Command::Uniforms(boxed));
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        let record = DrawRecord {
            kind: call.kind,
            vertex_count: call.vertices.len(),
            state: call.state.clone(),
            vertices: call.vertices.to_vec(),
        };
        self.recording()?.push(Command::Draw(record));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.check()?;
        let Some(commands) = self.recording.take() else {
            return Ok(());
        };
        for command in commands {
            self.execute(command);
        }
        self.commits += 1;
        Ok(())
    }

    fn discard(&mut self) {
        self.recording = None;
    }

    fn reset_device(&mut self) -> Result<()> {
        self.lost = false;
        self.fault = None;
        self.initialized = false;
        self.recording = None;
        self.canvas = None;
        self.atlas.clear();
        self.resets += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::caps::MASK_CACHE_MAX_INDEX;

    fn ready() -> SoftwareBackend {
        let mut b = SoftwareBackend::new();
        b.init().unwrap();
        b.bind_target((8, 8)).unwrap();
        b
    }

    #[test]
    fn init_makes_reserved_tile_opaque() {
        let b = ready();
        let reserved = b.mask_tile(MASK_CACHE_SPECIAL_TILE_X, MASK_CACHE_SPECIAL_TILE_Y);
        assert!(reserved.iter().all(|&t| t == 0xff));
        assert!(b.mask_tile(0, 0).iter().all(|&t| t == 0));
    }

    #[test]
    fn uploads_land_in_their_slot_on_commit() {
        let mut b = ready();
        b.open_command_buffer().unwrap();
        let slot = TileSlot::new(MASK_CACHE_MAX_INDEX - 1).unwrap();
        b.upload_mask_tile(slot, &[7; MASK_TILE_SIZE]).unwrap();
        assert!(b.uploads().is_empty());
        b.commit().unwrap();
        let (x, y) = slot.origin();
        assert!(b.mask_tile(x, y).iter().all(|&t| t == 7));
        assert_eq!(b.uploads().len(), 1);
    }

    #[test]
    fn discarded_commands_never_execute() {
        let mut b = ready();
        b.open_command_buffer().unwrap();
        b.upload_mask_tile(TileSlot::FIRST, &[9; MASK_TILE_SIZE]).unwrap();
        b.discard();
        b.commit().unwrap();
        assert!(b.mask_tile(0, 0).iter().all(|&t| t == 0));
        assert_eq!(b.commits(), 0);
    }

    #[test]
    fn image_sizes_are_checked() {
        let mut b = SoftwareBackend::new();
        assert!(b.add_image_rgba8(2, 2, &[0; 16]).is_ok());
        assert!(matches!(
            b.add_image_rgba8(2, 2, &[0; 15]),
            Err(RenderError::InvalidStateTransition(UsageError::ImageSizeMismatch { len: 15, needed: 16 }))
        ));
        assert!(b.add_coverage(3, 1, &[0; 3]).is_ok());
    }

    #[test]
    fn lost_device_fails_until_reset() {
        let mut b = ready();
        b.inject_fault(Fault::DeviceLost);
        assert!(matches!(b.open_command_buffer(), Err(RenderError::DeviceLost)));
        assert!(matches!(b.open_command_buffer(), Err(RenderError::DeviceLost)));
        b.reset_device().unwrap();
        b.init().unwrap();
        b.bind_target((2, 2)).unwrap();
        assert!(b.open_command_buffer().is_ok());
        assert_eq!(b.resets(), 1);
    }

    #[test]
    fn init_failure_reports_unavailable() {
        let mut b = SoftwareBackend::new();
        b.inject_fault(Fault::Exhausted);
        assert!(matches!(b.init(), Err(RenderError::BackendUnavailable(_))));
    }
}
