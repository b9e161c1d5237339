//! Color representation used when baking vertices.

mod color;

pub use color::Color;
