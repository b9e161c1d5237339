//! Vertex batching: fixed-capacity, single-kind vertex runs flushed as one draw.

mod batcher;
mod vertex;

pub use batcher::VertexBatcher;
pub use vertex::{PrimitiveKind, Vertex};
