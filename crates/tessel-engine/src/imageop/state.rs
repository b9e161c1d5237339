use crate::backend::{RenderBackend, SourceImage};
use crate::batch::VertexBatcher;
use crate::device::DeviceContext;
use crate::error::{Result, UsageError};

use super::{ConvolveOp, FilterKind, FilterUniforms, LookupOp, RescaleOp};

/// A validated image op.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOp {
    Convolve(ConvolveOp),
    Rescale(RescaleOp),
    Lookup(LookupOp),
}

impl ImageOp {
    #[inline]
    pub fn kind(&self) -> FilterKind {
        match self {
            ImageOp::Convolve(_) => FilterKind::Convolve,
            ImageOp::Rescale(_) => FilterKind::Rescale,
            ImageOp::Lookup(_) => FilterKind::Lookup,
        }
    }
}

/// Active image op of one context, with the source it filters.
#[derive(Debug, Default)]
pub struct ImageOpState {
    active: Option<(ImageOp, SourceImage)>,
}

impl ImageOpState {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn kind(&self) -> FilterKind {
        self.active
            .as_ref()
            .map_or(FilterKind::None, |(op, _)| op.kind())
    }

    #[inline]
    pub fn op(&self) -> Option<&ImageOp> {
        self.active.as_ref().map(|(op, _)| op)
    }

    #[inline]
    pub fn source(&self) -> Option<SourceImage> {
        self.active.as_ref().map(|(_, src)| *src)
    }

    /// Activates `op` on `source`. Fails, leaving the state unchanged, while
    /// another op is active.
    pub fn enable<B: RenderBackend>(
        &mut self,
        batcher: &mut VertexBatcher,
        ctx: &mut DeviceContext<B>,
        source: SourceImage,
        op: ImageOp,
    ) -> Result<()> {
        if let Some((active, _)) = &self.active {
            return Err(UsageError::ImageOpActive {
                active: active.kind(),
                requested: op.kind(),
            }
            .into());
        }
        batcher.flush(ctx)?;
        ctx.set_filter(source, FilterUniforms::for_op(&op, &source));
        self.active = Some((op, source));
        Ok(())
    }

    /// Deactivates the current op after flushing geometry drawn with it.
    ///
    /// With `expected` set, fails unless that op is the active one. Without it,
    /// disabling while idle is a no-op.
    pub fn disable<B: RenderBackend>(
        &mut self,
        batcher: &mut VertexBatcher,
        ctx: &mut DeviceContext<B>,
        expected: Option<FilterKind>,
    ) -> Result<()> {
        let active = self.kind();
        if let Some(expected) = expected {
            if expected != active {
                return Err(UsageError::ImageOpNotActive { expected, active }.into());
            }
        }
        if active == FilterKind::None {
            return Ok(());
        }
        batcher.flush(ctx)?;
        ctx.clear_filter();
        self.active = None;
        Ok(())
    }
}
