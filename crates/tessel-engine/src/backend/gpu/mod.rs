//! wgpu implementation of [`RenderBackend`].
//!
//! Calls between `open_command_buffer` and `commit` are recorded on the CPU.
//! Commit uploads the vertex, uniform and staging arenas with one queue write
//! each, then encodes the ops in order: consecutive draws share a render pass,
//! and a tile upload ends the pass so later draws see the new texels.

mod pipelines;
mod recording;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::batch::Vertex;
use crate::config::caps::{
    MASK_CACHE_HEIGHT_IN_TEXELS, MASK_CACHE_SPECIAL_TILE_X, MASK_CACHE_SPECIAL_TILE_Y,
    MASK_CACHE_WIDTH_IN_TEXELS, MASK_TILE_HEIGHT, MASK_TILE_SIZE, MASK_TILE_WIDTH,
};
use crate::device::device_descriptor;
use crate::error::{RenderError, Result, UsageError};
use crate::imageop::FilterUniforms;
use crate::mask::TileSlot;

use super::{DrawCall, ImageId, RenderBackend, SourceImage, TargetInfo};
use pipelines::{PipelineCache, ViewportUniform};
use recording::{DrawOp, Op, Recording, STAGED_TILE_BYTES, STAGING_ROW_PITCH, UNIFORM_STRIDE};

/// Drawing target: a color view plus its extent.
#[derive(Debug, Clone)]
pub struct WgpuTarget {
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    /// Applied by the first render pass of the next commit.
    pub clear: Option<wgpu::Color>,
}

struct GpuImage {
    view: wgpu::TextureView,
}

/// Buffer that grows to the next power of two when a commit outgrows it.
struct Arena {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
}

impl Arena {
    const fn new(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        Self {
            label,
            usage,
            buffer: None,
            capacity: 0,
        }
    }

    fn ensure(&mut self, device: &wgpu::Device, needed: u64) -> Result<&wgpu::Buffer> {
        let limit = device.limits().max_buffer_size;
        if needed > limit {
            return Err(RenderError::ResourceExhausted(format!(
                "{} needs {needed} bytes, device limit is {limit}",
                self.label
            )));
        }
        if self.buffer.is_none() || needed > self.capacity {
            let capacity = needed.next_power_of_two().max(4096).min(limit);
            log::debug!("{}: allocating {capacity} bytes", self.label);
            self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(self.label),
                size: capacity,
                usage: self.usage | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.capacity = capacity;
        }
        self.buffer
            .as_ref()
            .ok_or_else(|| RenderError::ResourceExhausted(self.label.into()))
    }
}

/// Device objects created by `init`.
struct Resources {
    pipelines: PipelineCache,
    atlas: wgpu::Texture,
    atlas_view: wgpu::TextureView,
    placeholder_view: wgpu::TextureView,
    viewport_ubo: wgpu::Buffer,
    vertices: Arena,
    uniforms: Arena,
    staging: Arena,
}

/// Records batches into wgpu command buffers for one target format.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    format: wgpu::TextureFormat,

    /// Needed to recreate the device after a loss.
    adapter: Option<(wgpu::Adapter, wgpu::Limits)>,
    lost: Arc<AtomicBool>,

    resources: Option<Resources>,
    images: HashMap<ImageId, GpuImage>,
    next_image: u32,

    target: Option<WgpuTarget>,
    recording: Option<Recording>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, format: wgpu::TextureFormat) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        watch_device(&device, &lost);
        Self {
            device,
            queue,
            format,
            adapter: None,
            lost,
            resources: None,
            images: HashMap::new(),
            next_image: 0,
            target: None,
            recording: None,
        }
    }

    /// Enables `reset_device` by keeping the adapter the device came from.
    pub fn with_adapter(mut self, adapter: wgpu::Adapter, limits: wgpu::Limits) -> Self {
        self.adapter = Some((adapter, limits));
        self
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Uploads a premultiplied RGBA8 image for blits and image ops.
    pub fn upload_image_rgba8(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<SourceImage> {
        let id = self.upload_texture(width, height, rgba, wgpu::TextureFormat::Rgba8Unorm, 4)?;
        Ok(SourceImage { id, width, height })
    }

    /// Uploads an 8-bit coverage texture for glyph quads.
    pub fn upload_coverage(&mut self, width: u32, height: u32, coverage: &[u8]) -> Result<ImageId> {
        self.upload_texture(width, height, coverage, wgpu::TextureFormat::R8Unorm, 1)
    }

    /// Releases an uploaded image. Draws already committed are unaffected.
    pub fn release_image(&mut self, id: ImageId) -> bool {
        self.images.remove(&id).is_some()
    }

    fn upload_texture(
        &mut self,
        width: u32,
        height: u32,
        texels: &[u8],
        format: wgpu::TextureFormat,
        bytes_per_texel: u32,
    ) -> Result<ImageId> {
        self.check_lost()?;
        let needed = width as usize * height as usize * bytes_per_texel as usize;
        if texels.len() != needed {
            return Err(UsageError::ImageSizeMismatch { len: texels.len(), needed }.into());
        }
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::ResourceExhausted(format!(
                "image {width}x{height} exceeds texture limit {max}"
            )));
        }

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("tessel image"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            texels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_texel),
                rows_per_image: Some(height),
            },
            size,
        );

        self.next_image += 1;
        let id = ImageId::new(self.next_image);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.images.insert(id, GpuImage { view });
        Ok(id)
    }

    fn check_lost(&self) -> Result<()> {
        if self.lost.load(Ordering::Acquire) {
            return Err(RenderError::DeviceLost);
        }
        Ok(())
    }

    fn recording(&mut self) -> Result<&mut Recording> {
        self.check_lost()?;
        self.recording
            .as_mut()
            .ok_or_else(|| RenderError::BackendUnavailable("no open command buffer".into()))
    }

    fn create_resources(&self) -> Resources {
        let device = &self.device;

        let atlas = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("tessel mask atlas"),
            size: wgpu::Extent3d {
                width: MASK_CACHE_WIDTH_IN_TEXELS,
                height: MASK_CACHE_HEIGHT_IN_TEXELS,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        // New textures are zeroed; only the reserved tile needs texels.
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &atlas,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: MASK_CACHE_SPECIAL_TILE_X,
                    y: MASK_CACHE_SPECIAL_TILE_Y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &[0xff; MASK_TILE_SIZE],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(MASK_TILE_WIDTH),
                rows_per_image: Some(MASK_TILE_HEIGHT),
            },
            wgpu::Extent3d {
                width: MASK_TILE_WIDTH,
                height: MASK_TILE_HEIGHT,
                depth_or_array_layers: 1,
            },
        );

        let placeholder = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("tessel placeholder source"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let viewport_ubo = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessel viewport ubo"),
            size: std::mem::size_of::<ViewportUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Resources {
            pipelines: PipelineCache::new(device, self.format),
            atlas_view: atlas.create_view(&wgpu::TextureViewDescriptor::default()),
            atlas,
            placeholder_view: placeholder.create_view(&wgpu::TextureViewDescriptor::default()),
            viewport_ubo,
            vertices: Arena::new("tessel vertex arena", wgpu::BufferUsages::VERTEX),
            uniforms: Arena::new("tessel uniform arena", wgpu::BufferUsages::UNIFORM),
            staging: Arena::new("tessel tile staging", wgpu::BufferUsages::COPY_SRC),
        }
    }

    fn encode(&mut self, rec: &Recording) -> Result<()> {
        let Some(target) = self.target.as_ref() else {
            return Err(UsageError::NoTarget.into());
        };
        let Some(res) = self.resources.as_mut() else {
            return Err(RenderError::BackendUnavailable("backend not initialized".into()));
        };
        let device = &self.device;
        let queue = &self.queue;

        // Arenas first: growing them replaces buffers the bind groups refer to.
        let vertex_bytes = rec.vertex_bytes();
        let vbo = res.vertices.ensure(device, (vertex_bytes.len() as u64).max(Vertex::SIZE))?;
        queue.write_buffer(vbo, 0, vertex_bytes);
        let ubo = res.uniforms.ensure(device, rec.uniforms.len() as u64)?;
        queue.write_buffer(ubo, 0, &rec.uniforms);
        if !rec.staging.is_empty() {
            let staging = res.staging.ensure(device, rec.staging.len() as u64)?;
            queue.write_buffer(staging, 0, &rec.staging);
        }
        let viewport = ViewportUniform {
            viewport: [target.width.max(1) as f32, target.height.max(1) as f32],
            _pad: [0.0; 2],
        };
        queue.write_buffer(&res.viewport_ubo, 0, bytemuck::bytes_of(&viewport));

        for draw in rec.draws() {
            res.pipelines.prepare(device, draw.key);
        }

        let (Some(vbo), Some(ubo)) = (res.vertices.buffer.as_ref(), res.uniforms.buffer.as_ref())
        else {
            return Err(RenderError::BackendUnavailable("arenas missing".into()));
        };

        let mut bind_groups: HashMap<Option<ImageId>, wgpu::BindGroup> = HashMap::new();
        for draw in rec.draws() {
            if bind_groups.contains_key(&draw.source) {
                continue;
            }
            let source_view = match draw.source {
                Some(id) => match self.images.get(&id) {
                    Some(image) => &image.view,
                    None => {
                        log::warn!("draw references released image {}", id.raw());
                        &res.placeholder_view
                    }
                },
                None => &res.placeholder_view,
            };
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("tessel bind group"),
                layout: res.pipelines.bind_group_layout(),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: res.viewport_ubo.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: ubo,
                            offset: 0,
                            size: wgpu::BufferSize::new(FilterUniforms::SIZE),
                        }),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&res.atlas_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(source_view),
                    },
                ],
            });
            bind_groups.insert(draw.source, bind_group);
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tessel encoder"),
        });
        let mut load = target.clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear);
        let mut passes = 0u32;

        let mut i = 0;
        while i < rec.ops.len() {
            match rec.ops[i] {
                Op::Upload { slot, staging_offset } => {
                    let Some(staging) = res.staging.buffer.as_ref() else {
                        return Err(RenderError::BackendUnavailable("staging missing".into()));
                    };
                    copy_tile(&mut encoder, staging, &res.atlas, slot, staging_offset);
                    i += 1;
                }
                Op::Draw(_) => {
                    let end = rec.ops[i..]
                        .iter()
                        .position(|op| matches!(op, Op::Upload { .. }))
                        .map_or(rec.ops.len(), |n| i + n);
                    let mut pass = begin_pass(&mut encoder, &target.view, load);
                    pass.set_vertex_buffer(0, vbo.slice(..));
                    for op in &rec.ops[i..end] {
                        let Op::Draw(draw) = op else { continue };
                        record_draw(&mut pass, draw, &res.pipelines, &bind_groups);
                    }
                    drop(pass);
                    load = wgpu::LoadOp::Load;
                    passes += 1;
                    i = end;
                }
            }
        }
        if passes == 0 && target.clear.is_some() {
            drop(begin_pass(&mut encoder, &target.view, load));
        }

        queue.submit(Some(encoder.finish()));
        log::trace!(
            "committed {} ops in {passes} passes ({} pipelines cached)",
            rec.ops.len(),
            res.pipelines.len()
        );
        Ok(())
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("format", &self.format)
            .field("initialized", &self.resources.is_some())
            .field("images", &self.images.len())
            .field("recording", &self.recording.is_some())
            .field("lost", &self.lost.load(Ordering::Relaxed))
            .finish()
    }
}

impl RenderBackend for WgpuBackend {
    type Target = WgpuTarget;

    fn init(&mut self) -> Result<()> {
        self.check_lost()
            .map_err(|err| RenderError::BackendUnavailable(err.to_string()))?;
        let limits = self.device.limits();
        if (limits.max_uniform_buffer_binding_size as u64) < FilterUniforms::SIZE {
            return Err(RenderError::BackendUnavailable(format!(
                "uniform bindings limited to {} bytes",
                limits.max_uniform_buffer_binding_size
            )));
        }
        self.resources = Some(self.create_resources());
        log::debug!("wgpu backend initialized for {:?}", self.format);
        Ok(())
    }

    fn bind_target(&mut self, target: WgpuTarget) -> Result<TargetInfo> {
        self.check_lost()?;
        let info = TargetInfo {
            width: target.width,
            height: target.height,
        };
        self.target = Some(target);
        Ok(info)
    }

    fn open_command_buffer(&mut self) -> Result<()> {
        self.check_lost()?;
        if self.resources.is_none() {
            return Err(RenderError::BackendUnavailable("backend not initialized".into()));
        }
        self.recording = Some(Recording::new());
        Ok(())
    }

    fn upload_mask_tile(&mut self, slot: TileSlot, texels: &[u8]) -> Result<()> {
        self.recording()?.push_upload(slot, texels);
        Ok(())
    }

    fn write_uniforms(&mut self, uniforms: &FilterUniforms) -> Result<()> {
        self.recording()?.push_uniforms(uniforms);
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        self.recording()?.push_draw(call);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.check_lost()?;
        let Some(rec) = self.recording.take() else {
            return Ok(());
        };
        self.encode(&rec)?;
        // The callback may have fired while encoding.
        self.check_lost()
    }

    fn discard(&mut self) {
        self.recording = None;
    }

    fn reset_device(&mut self) -> Result<()> {
        let Some((adapter, limits)) = self.adapter.as_ref() else {
            return Err(RenderError::BackendUnavailable(
                "no adapter to recreate the device from".into(),
            ));
        };
        let features = self.device.features();
        let (device, queue) =
            pollster::block_on(adapter.request_device(&device_descriptor(features, limits.clone())))
                .map_err(|err| RenderError::BackendUnavailable(err.to_string()))?;

        self.lost = Arc::new(AtomicBool::new(false));
        watch_device(&device, &self.lost);
        self.device = device;
        self.queue = queue;
        self.resources = None;
        self.recording = None;
        self.target = None;
        if !self.images.is_empty() {
            log::warn!("dropping {} images owned by the lost device", self.images.len());
            self.images.clear();
        }
        log::info!("wgpu device recreated");
        Ok(())
    }
}

fn watch_device(device: &wgpu::Device, lost: &Arc<AtomicBool>) {
    let flag = Arc::clone(lost);
    device.set_device_lost_callback(move |reason, message| {
        if matches!(reason, wgpu::DeviceLostReason::Destroyed) {
            log::debug!("device destroyed: {message}");
        } else {
            log::error!("device lost ({reason:?}): {message}");
        }
        flag.store(true, Ordering::Release);
    });
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("tessel pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    })
}

fn record_draw(
    pass: &mut wgpu::RenderPass<'_>,
    draw: &DrawOp,
    pipelines: &PipelineCache,
    bind_groups: &HashMap<Option<ImageId>, wgpu::BindGroup>,
) {
    let (Some(pipeline), Some(bind_group)) = (pipelines.get(draw.key), bind_groups.get(&draw.source))
    else {
        log::warn!("skipping draw without pipeline or bindings: {:?}", draw.key);
        return;
    };
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[draw.uniform_offset]);
    let first = draw.first_vertex;
    pass.draw(first..first + draw.vertex_count, 0..1);
}

fn copy_tile(
    encoder: &mut wgpu::CommandEncoder,
    staging: &wgpu::Buffer,
    atlas: &wgpu::Texture,
    slot: TileSlot,
    staging_offset: u64,
) {
    let (x, y) = slot.origin();
    debug_assert_eq!(staging_offset % STAGED_TILE_BYTES, 0);
    encoder.copy_buffer_to_texture(
        wgpu::TexelCopyBufferInfo {
            buffer: staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: staging_offset,
                bytes_per_row: Some(STAGING_ROW_PITCH),
                rows_per_image: Some(MASK_TILE_HEIGHT),
            },
        },
        wgpu::TexelCopyTextureInfo {
            texture: atlas,
            mip_level: 0,
            origin: wgpu::Origin3d { x, y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::Extent3d {
            width: MASK_TILE_WIDTH,
            height: MASK_TILE_HEIGHT,
            depth_or_array_layers: 1,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_stride_fits_device_alignment() {
        let limits = wgpu::Limits::default();
        assert_eq!(UNIFORM_STRIDE % limits.min_uniform_buffer_offset_alignment as u64, 0);
        assert!(FilterUniforms::SIZE <= limits.max_uniform_buffer_binding_size as u64);
    }

    #[test]
    fn staged_tiles_satisfy_copy_alignment() {
        assert_eq!(STAGING_ROW_PITCH % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);
        assert!(STAGING_ROW_PITCH >= MASK_TILE_WIDTH);
        assert_eq!(STAGED_TILE_BYTES % wgpu::COPY_BUFFER_ALIGNMENT, 0);
    }
}
