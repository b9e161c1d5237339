use anyhow::{Context, Result};
use wgpu::SurfaceError;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::backend::gpu::{WgpuBackend, WgpuTarget};
use crate::config::{self, GraphicsConfig};

use super::surface;
use super::{GpuInit, SurfaceErrorAction};

/// Owns wgpu core objects and the window surface.
///
/// Rendering itself goes through a [`WgpuBackend`] created from this type;
/// `Gpu` only acquires and presents surface textures.
pub struct Gpu<'w> {
    instance: wgpu::Instance,

    /// Surface lifetime is tied to the window via `'w`.
    surface: wgpu::Surface<'w>,

    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    config: wgpu::SurfaceConfiguration,

    /// Current drawable size in physical pixels.
    size: PhysicalSize<u32>,

    display_id: u32,
    required_limits: wgpu::Limits,
}

/// An acquired surface texture. Present it with [`Gpu::present`] once the
/// backend has submitted the frame.
pub struct SurfaceFrame {
    surface_texture: wgpu::SurfaceTexture,
}

impl SurfaceFrame {
    /// Drawing target over this frame's texture. `clear` is applied by the
    /// first render pass recorded against it.
    pub fn target(&self, clear: Option<wgpu::Color>) -> WgpuTarget {
        let texture = &self.surface_texture.texture;
        WgpuTarget {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            width: texture.width(),
            height: texture.height(),
            clear,
        }
    }
}

impl<'w> Gpu<'w> {
    /// Creates a GPU context bound to a window.
    pub async fn new(window: &'w Window, init: GpuInit) -> Result<Self> {
        let size = window.inner_size();
        anyhow::ensure!(size.width > 0 && size.height > 0, "window has zero size");

        let required_limits = init.device_limits();
        let GpuInit {
            prefer_srgb,
            present_mode,
            alpha_mode,
            power_preference,
            required_features,
            desired_maximum_frame_latency,
            display_id,
            ..
        } = init;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&device_descriptor(required_features, required_limits.clone()))
            .await
            .context("failed to create wgpu device/queue")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface::choose_surface_format(&surface_caps, prefer_srgb)
            .context("no supported surface formats")?;
        let alpha_mode = surface::choose_alpha_mode(&surface_caps, alpha_mode);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency,
        };

        surface.configure(&device, &config);

        log::info!(
            "gpu ready: {} ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            format,
            config.width,
            config.height
        );

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            config,
            size,
            display_id,
            required_limits,
        })
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    /// Configuration descriptor for the display this surface lives on.
    pub fn graphics_config(&self) -> GraphicsConfig {
        config::describe(self.display_id, &self.device.limits())
    }

    /// Backend rendering into targets of the surface format on this device.
    pub fn create_backend(&self) -> WgpuBackend {
        WgpuBackend::new(
            self.device.clone(),
            self.queue.clone(),
            self.config.format,
        )
        .with_adapter(self.adapter.clone(), self.required_limits.clone())
    }

    /// Switches to the device a backend recreated after a loss and
    /// reconfigures the surface on it.
    pub fn adopt_device(&mut self, backend: &WgpuBackend) {
        self.device = backend.device().clone();
        self.queue = backend.queue().clone();
        if self.size.width > 0 && self.size.height > 0 {
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Reconfigures the surface after a resize.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        surface::apply_resize(
            &self.surface,
            &self.device,
            &mut self.config,
            &mut self.size,
            new_size,
        );
    }

    /// Acquires the next surface texture.
    pub fn acquire_frame(&self) -> std::result::Result<SurfaceFrame, SurfaceError> {
        let surface_texture = self.surface.get_current_texture()?;
        Ok(SurfaceFrame { surface_texture })
    }

    /// Presents a frame whose commands have been submitted.
    pub fn present(&self, frame: SurfaceFrame) {
        frame.surface_texture.present();
    }

    /// Converts a `SurfaceError` into a higher-level action.
    pub fn handle_surface_error(&mut self, err: SurfaceError) -> SurfaceErrorAction {
        surface::map_surface_error(&self.surface, &self.device, &self.config, self.size, err)
    }
}

pub(crate) fn device_descriptor(
    required_features: wgpu::Features,
    required_limits: wgpu::Limits,
) -> wgpu::DeviceDescriptor<'static> {
    wgpu::DeviceDescriptor {
        label: Some("tessel device"),
        required_features,
        required_limits,
        experimental_features: wgpu::ExperimentalFeatures::disabled(),
        memory_hints: wgpu::MemoryHints::Performance,
        trace: wgpu::Trace::Off,
    }
}
