use crate::batch::Vertex;
use crate::config::caps::MAX_INDEX;
use crate::imageop::FilterUniforms;

/// How [`Gpu`](super::Gpu) brings up the adapter, device and surface.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Use an sRGB surface format when one exists. Off by default: blending
    /// happens on the stored premultiplied values.
    pub prefer_srgb: bool,

    pub present_mode: wgpu::PresentMode,

    /// Falls back to a supported mode when the surface rejects this one.
    pub alpha_mode: Option<wgpu::CompositeAlphaMode>,

    pub power_preference: wgpu::PowerPreference,

    pub required_features: wgpu::Features,

    /// Starting point for the device limits; see [`GpuInit::device_limits`].
    pub required_limits: wgpu::Limits,

    /// Hint only; support depends on platform/backend.
    pub desired_maximum_frame_latency: u32,

    /// Display the surface belongs to, reported through the graphics config.
    pub display_id: u32,
}

impl GpuInit {
    /// `required_limits`, raised where the batching backend needs more: one
    /// filter uniform block per binding and a full vertex batch per buffer.
    pub fn device_limits(&self) -> wgpu::Limits {
        let mut limits = self.required_limits.clone();
        limits.max_uniform_buffer_binding_size = limits
            .max_uniform_buffer_binding_size
            .max(FilterUniforms::SIZE as u32);
        let batch_bytes = MAX_INDEX as u64 * Vertex::SIZE;
        limits.max_buffer_size = limits.max_buffer_size.max(batch_bytes);
        limits
    }
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            prefer_srgb: false,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: None,
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            desired_maximum_frame_latency: 2,
            display_id: 0,
        }
    }
}
