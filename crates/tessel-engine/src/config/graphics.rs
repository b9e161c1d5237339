//! Graphics configuration queries for embedders: texture extents, buffer
//! strategy checks, volatile-image support and cache pixel layouts.

use crate::error::{RenderError, Result};

use super::CacheLayout;

/// Surface transparency class requested by the toolkit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Transparency {
    Opaque,
    Bitmask,
    Translucent,
}

/// Kind of accelerated surface backing a volatile image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceKind {
    /// Render target backed by an offscreen framebuffer.
    Offscreen,
    /// Sampled texture.
    Texture,
    /// Window drawable; never created through this path.
    Window,
}

/// Contents of the back buffer after a flip.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FlipContents {
    Undefined,
    Background,
    Prior,
    Copied,
}

/// Packed pixel layout of a surface class.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PixelLayout {
    pub bits: u8,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub alpha_mask: u32,
    pub premultiplied: bool,
}

/// Capabilities of the device context behind a configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ContextCaps {
    pub double_buffered: bool,
    pub offscreen_targets: bool,
    pub max_texture_size: u32,
}

/// Value-typed graphics configuration for one display.
///
/// Built once by [`describe`]; there is no shared registry behind it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GraphicsConfig {
    pub display_id: u32,
    pub caps: ContextCaps,
    pub cache: CacheLayout,
}

/// Describes the configuration for `display_id` on a device with `limits`.
pub fn describe(display_id: u32, limits: &wgpu::Limits) -> GraphicsConfig {
    GraphicsConfig {
        display_id,
        caps: ContextCaps {
            double_buffered: true,
            offscreen_targets: true,
            max_texture_size: limits.max_texture_dimension_2d,
        },
        cache: CacheLayout::STANDARD,
    }
}

/// Pixel layout used for surfaces of the given transparency.
pub fn color_layout(transparency: Transparency) -> PixelLayout {
    match transparency {
        Transparency::Opaque => PixelLayout {
            bits: 24,
            red_mask: 0x00ff_0000,
            green_mask: 0x0000_ff00,
            blue_mask: 0x0000_00ff,
            alpha_mask: 0,
            premultiplied: false,
        },
        Transparency::Bitmask => PixelLayout {
            bits: 25,
            red_mask: 0x00ff_0000,
            green_mask: 0x0000_ff00,
            blue_mask: 0x0000_00ff,
            alpha_mask: 0x0100_0000,
            premultiplied: false,
        },
        Transparency::Translucent => PixelLayout {
            bits: 32,
            red_mask: 0x00ff_0000,
            green_mask: 0x0000_ff00,
            blue_mask: 0x0000_00ff,
            alpha_mask: 0xff00_0000,
            premultiplied: true,
        },
    }
}

impl GraphicsConfig {
    /// Largest texture extent usable for a window of `bounds` at `scale_factor`.
    pub fn max_texture_extent(&self, scale_factor: u32, bounds: (u32, u32)) -> (u32, u32) {
        let per_scale = self.caps.max_texture_size / scale_factor.max(1);
        (per_scale.max(bounds.0), per_scale.max(bounds.1))
    }

    /// Back buffer size for a component; zero-sized components still get 1x1.
    pub fn back_buffer_size(width: i32, height: i32) -> (u32, u32) {
        (width.max(1) as u32, height.max(1) as u32)
    }

    /// Validates a buffer strategy request.
    ///
    /// Only double buffering with page flipping is supported, and the prior
    /// back-buffer contents are never preserved.
    pub fn check_flip(&self, num_buffers: u32, contents: FlipContents) -> Result<()> {
        if num_buffers != 2 {
            return Err(RenderError::Unsupported("only double buffering is supported"));
        }
        if !self.caps.double_buffered {
            return Err(RenderError::Unsupported("page flipping is not supported"));
        }
        if contents == FlipContents::Prior {
            return Err(RenderError::Unsupported("FlipContents::Prior is not supported"));
        }
        Ok(())
    }

    /// Whether a volatile image of this kind and transparency can be accelerated.
    pub fn supports_volatile(&self, transparency: Transparency, kind: SurfaceKind) -> bool {
        match kind {
            SurfaceKind::Window => false,
            _ if transparency == Transparency::Bitmask => false,
            SurfaceKind::Offscreen => self.caps.offscreen_targets,
            SurfaceKind::Texture => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_texture_size: u32) -> GraphicsConfig {
        let limits = wgpu::Limits {
            max_texture_dimension_2d: max_texture_size,
            ..wgpu::Limits::downlevel_defaults()
        };
        describe(3, &limits)
    }

    #[test]
    fn describe_reports_limits_and_cache_layout() {
        let cfg = config(8192);
        assert_eq!(cfg.display_id, 3);
        assert_eq!(cfg.caps.max_texture_size, 8192);
        assert_eq!(cfg.cache, CacheLayout::STANDARD);
    }

    #[test]
    fn translucent_layout_is_premultiplied_argb() {
        let layout = color_layout(Transparency::Translucent);
        assert_eq!(layout.bits, 32);
        assert_eq!(layout.alpha_mask, 0xff00_0000);
        assert!(layout.premultiplied);
        assert_eq!(color_layout(Transparency::Opaque).alpha_mask, 0);
        assert_eq!(color_layout(Transparency::Bitmask).bits, 25);
    }

    #[test]
    fn texture_extent_never_below_bounds() {
        let cfg = config(4096);
        assert_eq!(cfg.max_texture_extent(2, (100, 100)), (2048, 2048));
        assert_eq!(cfg.max_texture_extent(2, (3000, 10)), (3000, 2048));
    }

    #[test]
    fn zero_sized_back_buffer_is_clamped() {
        assert_eq!(GraphicsConfig::back_buffer_size(0, -5), (1, 1));
        assert_eq!(GraphicsConfig::back_buffer_size(640, 480), (640, 480));
    }

    #[test]
    fn flip_rejects_prior_contents_and_single_buffering() {
        let cfg = config(4096);
        assert!(cfg.check_flip(2, FlipContents::Copied).is_ok());
        assert!(matches!(
            cfg.check_flip(2, FlipContents::Prior),
            Err(RenderError::Unsupported(_))
        ));
        assert!(cfg.check_flip(3, FlipContents::Undefined).is_err());
    }

    #[test]
    fn bitmask_volatile_images_are_not_accelerated() {
        let cfg = config(4096);
        assert!(!cfg.supports_volatile(Transparency::Bitmask, SurfaceKind::Texture));
        assert!(cfg.supports_volatile(Transparency::Translucent, SurfaceKind::Offscreen));
        assert!(!cfg.supports_volatile(Transparency::Opaque, SurfaceKind::Window));
    }
}
