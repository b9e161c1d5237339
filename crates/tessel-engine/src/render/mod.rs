//! Public drawing entry points.
//!
//! [`Renderer`] decomposes primitive requests into batched vertices and owns
//! the pieces of per-context state they depend on; [`RenderQueue`] decodes a
//! buffered command stream into renderer calls.

mod parallelogram;
pub mod queue;
mod renderer;
mod shapes;

pub use parallelogram::{Parallelogram, Stroke};
pub use queue::{CommandWriter, RenderQueue};
pub use renderer::Renderer;
