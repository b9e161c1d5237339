//! Device contexts and window-bound GPU bring-up.
//!
//! [`DeviceContext`] is backend-agnostic and drives one drawing target.
//! [`Gpu`] owns the wgpu instance, device and window surface and hands out
//! [`WgpuBackend`](crate::backend::gpu::WgpuBackend)s and per-frame targets.

mod context;
mod gpu;
mod init;
mod surface;

pub use context::{DeviceContext, FrameStats};
pub use gpu::{Gpu, SurfaceFrame};
pub(crate) use gpu::device_descriptor;
pub use init::GpuInit;
pub use surface::SurfaceErrorAction;
