mod scene;

use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use ouroboros::self_referencing;

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use tessel_engine::RenderError;
use tessel_engine::config::{FlipContents, SurfaceKind, Transparency, color_layout};
use tessel_engine::backend::gpu::WgpuBackend;
use tessel_engine::device::{Gpu, GpuInit, SurfaceErrorAction};
use tessel_engine::logging::{LoggingConfig, init_logging};
use tessel_engine::render::Renderer;

use scene::Assets;

const CLEAR: wgpu::Color = wgpu::Color { r: 0.06, g: 0.06, b: 0.08, a: 1.0 };

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
    let mut studio = Studio::new(GpuInit::default());

    event_loop
        .run_app(&mut studio)
        .context("winit event loop terminated with error")?;

    match studio.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[self_referencing]
struct StudioWindow {
    window: Window,

    #[borrows(window)]
    #[covariant]
    gpu: Gpu<'this>,
}

struct Session {
    renderer: Renderer<WgpuBackend>,
    assets: Assets,
}

struct Studio {
    gpu_init: GpuInit,
    started: Instant,
    window: Option<StudioWindow>,
    session: Option<Session>,
    fatal: Option<anyhow::Error>,
}

impl Studio {
    fn new(gpu_init: GpuInit) -> Self {
        Self {
            gpu_init,
            started: Instant::now(),
            window: None,
            session: None,
            fatal: None,
        }
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title("tessel studio")
            .with_inner_size(LogicalSize::new(720.0, 480.0));

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;

        let gpu_init = self.gpu_init.clone();
        let entry = StudioWindowTryBuilder {
            window,
            gpu_builder: |w| pollster::block_on(Gpu::new(w, gpu_init)),
        }
        .try_build()
        .context("GPU initialization failed for window")?;

        let gpu = entry.borrow_gpu();
        let config = gpu.graphics_config();
        let window = entry.borrow_window();
        let size = window.inner_size();
        let scale = window.scale_factor().ceil() as u32;
        log::info!("graphics config: {config:?}");
        log::info!(
            "max texture extent {:?}, page flipping {}, volatile offscreen {}, cache layout {:?}",
            config.max_texture_extent(scale, (size.width, size.height)),
            config.check_flip(2, FlipContents::Copied).is_ok(),
            config.supports_volatile(Transparency::Translucent, SurfaceKind::Offscreen),
            color_layout(Transparency::Translucent),
        );

        let mut renderer = Renderer::new(gpu.create_backend())?;
        let assets = Assets::upload(renderer.backend_mut())?;

        self.session = Some(Session { renderer, assets });
        self.window = Some(entry);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.fatal = Some(err);
        event_loop.exit();
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.renderer.dispose() {
                log::warn!("renderer disposed in a bad state: {err}");
            }
        }
        self.window = None;
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(entry), Some(session)) = (self.window.as_mut(), self.session.as_mut()) else {
            return Ok(());
        };
        let t = self.started.elapsed().as_secs_f32();

        let drawn = entry.with_gpu_mut(|gpu| render_frame(gpu, session, t));
        let Err(err) = drawn else {
            return Ok(());
        };

        match err.downcast::<RenderError>() {
            Ok(RenderError::DeviceLost) => {
                log::warn!("device lost, recreating resources");
                session.renderer.recover()?;
                entry.with_gpu_mut(|gpu| gpu.adopt_device(session.renderer.backend()));
                scene::reset_modes(&mut session.renderer)?;
                session.assets = Assets::upload(session.renderer.backend_mut())?;
                Ok(())
            }
            Ok(RenderError::ResourceExhausted(what)) => {
                log::warn!("frame dropped: {what}");
                scene::reset_modes(&mut session.renderer)?;
                Ok(())
            }
            Ok(other) => Err(other.into()),
            Err(err) => Err(err),
        }
    }
}

/// Draws and presents one frame. A skipped surface frame is not an error.
fn render_frame(gpu: &mut Gpu<'_>, session: &mut Session, t: f32) -> Result<()> {
    let frame = match gpu.acquire_frame() {
        Ok(frame) => frame,
        Err(err) => {
            return match gpu.handle_surface_error(err) {
                SurfaceErrorAction::Reconfigured | SurfaceErrorAction::SkipFrame => Ok(()),
                SurfaceErrorAction::Fatal => Err(anyhow!("surface out of memory")),
            };
        }
    };

    let renderer = &mut session.renderer;
    renderer.begin_frame(frame.target(Some(CLEAR)))?;
    scene::draw(renderer, &mut session.assets, t)?;
    renderer.submit()?;
    gpu.present(frame);
    Ok(())
}

impl ApplicationHandler for Studio {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.open(event_loop) {
            self.fail(event_loop, err.context("failed to open studio window"));
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(entry) = &self.window {
            entry.borrow_window().request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let Some(entry) = self.window.as_mut() else {
            return;
        };
        if entry.borrow_window().id() != id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                entry.with_gpu_mut(|gpu| gpu.resize(size));
                entry.borrow_window().request_redraw();
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = entry.borrow_window().inner_size();
                entry.with_gpu_mut(|gpu| gpu.resize(size));
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    self.fail(event_loop, err.context("rendering failed"));
                }
            }
            _ => {}
        }
    }
}
