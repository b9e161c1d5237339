/// Premultiplied RGBA color.
///
/// Invariant: `r`, `g`, `b` are already multiplied by `a`.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::from_premul(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::from_premul(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::from_premul(1.0, 1.0, 1.0, 1.0);

    #[inline]
    pub const fn from_premul(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a premultiplied color from straight alpha components.
    #[inline]
    pub fn from_straight(r: f32, g: f32, b: f32, a: f32) -> Self {
        let a = a.clamp(0.0, 1.0);
        Self {
            r: r.clamp(0.0, 1.0) * a,
            g: g.clamp(0.0, 1.0) * a,
            b: b.clamp(0.0, 1.0) * a,
            a,
        }
    }

    /// Creates a color from a packed premultiplied `0xAARRGGBB` pixel, the
    /// format of the translucent surface layout and the command stream.
    #[inline]
    pub fn from_argb_premul(pixel: u32) -> Self {
        let [a, r, g, b] = pixel.to_be_bytes();
        Self::from_premul(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    /// Returns a straight-alpha representation. For `a == 0`, RGB is 0.
    #[inline]
    pub fn to_straight(self) -> (f32, f32, f32, f32) {
        if self.a <= 0.0 {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let inv = 1.0 / self.a;
            (self.r * inv, self.g * inv, self.b * inv, self.a)
        }
    }

    /// Clamps all channels to [0, 1] and enforces premultiplication.
    #[inline]
    pub fn clamped(self) -> Self {
        let a = self.a.clamp(0.0, 1.0);
        Self {
            r: self.r.clamp(0.0, a),
            g: self.g.clamp(0.0, a),
            b: self.b.clamp(0.0, a),
            a,
        }
    }

    /// Packs into RGBA8 as stored in each vertex.
    #[inline]
    pub fn to_rgba8(self) -> [u8; 4] {
        let c = self.clamped();
        [unorm8(c.r), unorm8(c.g), unorm8(c.b), unorm8(c.a)]
    }

    #[inline]
    pub fn from_rgba8(rgba: [u8; 4]) -> Self {
        Self::from_premul(
            rgba[0] as f32 / 255.0,
            rgba[1] as f32 / 255.0,
            rgba[2] as f32 / 255.0,
            rgba[3] as f32 / 255.0,
        )
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

#[inline]
fn unorm8(v: f32) -> u8 {
    (v * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_alpha_is_premultiplied() {
        let c = Color::from_straight(1.0, 0.5, 0.0, 0.5);
        assert_eq!(c, Color::from_premul(0.5, 0.25, 0.0, 0.5));
        let (r, g, _, a) = c.to_straight();
        assert!((r - 1.0).abs() < 1e-6 && (g - 0.5).abs() < 1e-6 && a == 0.5);
    }

    #[test]
    fn argb_pixel_unpacks_channels() {
        let c = Color::from_argb_premul(0x80_40_20_10);
        assert_eq!(c.to_rgba8(), [0x40, 0x20, 0x10, 0x80]);
    }

    #[test]
    fn packing_clamps_rgb_to_alpha() {
        let c = Color::from_premul(1.0, 0.2, 0.0, 0.5);
        assert_eq!(c.to_rgba8(), [128, 51, 0, 128]);
    }

    #[test]
    fn rgba8_roundtrip_is_exact_on_byte_values() {
        let rgba = [10, 20, 30, 200];
        assert_eq!(Color::from_rgba8(rgba).to_rgba8(), rgba);
    }
}
