use tessel_engine::backend::gpu::WgpuBackend;
use tessel_engine::backend::{ImageId, SourceImage};
use tessel_engine::imageop::LookupTable;
use tessel_engine::paint::Color;
use tessel_engine::render::{CommandWriter, RenderQueue, Renderer};
use tessel_engine::Result;

const CHECKER_HANDLE: i64 = 1;
const CHECKER_SIZE: u32 = 48;
const DISC_SIZE: u32 = 72;

/// Device-owned inputs of the demo scene. Rebuilt after a device reset.
pub struct Assets {
    checker: SourceImage,
    glyph: ImageId,
    disc: Vec<u8>,
    queue: RenderQueue,
    stream: Vec<u8>,
}

impl Assets {
    pub fn upload(backend: &mut WgpuBackend) -> Result<Self> {
        let checker = backend.upload_image_rgba8(CHECKER_SIZE, CHECKER_SIZE, &checker_rgba())?;
        let glyph = backend.upload_coverage(8, 8, &glyph_coverage())?;

        let mut queue = RenderQueue::new();
        queue.register_source(CHECKER_HANDLE, checker);

        Ok(Self {
            checker,
            glyph,
            disc: disc_coverage(DISC_SIZE),
            queue,
            stream: queued_panel(),
        })
    }
}

/// Draws one frame of the demo. `t` is seconds since start.
pub fn draw(r: &mut Renderer<WgpuBackend>, assets: &mut Assets, t: f32) -> Result<()> {
    primitives(r)?;
    parallelograms(r, t)?;
    masks_and_glyphs(r, assets)?;
    image_ops(r, assets)?;
    assets.queue.execute(r, &assets.stream)?;
    Ok(())
}

fn primitives(r: &mut Renderer<WgpuBackend>) -> Result<()> {
    let palette = [
        Color::from_straight(0.90, 0.30, 0.25, 1.0),
        Color::from_straight(0.95, 0.70, 0.20, 1.0),
        Color::from_straight(0.30, 0.75, 0.40, 1.0),
        Color::from_straight(0.25, 0.50, 0.90, 1.0),
    ];
    for (i, color) in palette.iter().enumerate() {
        r.set_color(*color);
        r.fill_rect(24 + i as i32 * 40, 24, 32, 32)?;
    }

    r.set_color(Color::WHITE);
    for i in 0..8 {
        let d = i * 8;
        r.draw_line(200, 24 + d, 264, 88 - d)?;
    }
    r.draw_rect(280, 24, 64, 64)?;
    r.draw_poly(&[360, 400, 420, 380], &[24, 30, 80, 88], true, 0, 0)?;

    // Triangle from scanlines.
    r.set_color(Color::from_straight(0.6, 0.4, 0.9, 0.8));
    let mut lines = Vec::new();
    for y in 0..48 {
        lines.extend_from_slice(&[440 + (48 - y) / 2, 440 + 48 - (48 - y) / 2, 40 + y]);
    }
    r.draw_scanlines(&lines)
}

fn parallelograms(r: &mut Renderer<WgpuBackend>, t: f32) -> Result<()> {
    let (s, c) = (t.sin(), t.cos());

    r.set_color(Color::from_straight(0.2, 0.6, 0.8, 1.0));
    r.fill_parallelogram(24.0, 120.0, 80.0, 0.0, 20.0, 50.0)?;
    r.draw_parallelogram(140.0, 120.0, 80.0, 10.0, 10.0, 50.0, 0.1, 0.15)?;

    r.enable_aa_parallelogram_program()?;
    r.set_color(Color::from_straight(0.95, 0.85, 0.3, 1.0));
    r.fill_aa_parallelogram(300.0, 145.0, 60.0 * c, 60.0 * s, -25.0 * s, 25.0 * c)?;
    r.draw_aa_parallelogram(400.0, 120.0, 70.0, 12.0, 8.0, 50.0, 0.08, 0.12)?;
    r.disable_aa_parallelogram_program()
}

fn masks_and_glyphs(r: &mut Renderer<WgpuBackend>, assets: &Assets) -> Result<()> {
    r.enable_mask_cache()?;
    r.set_color(Color::from_straight(0.85, 0.35, 0.6, 1.0));
    r.mask_fill(24, 200, DISC_SIZE, DISC_SIZE, 0, DISC_SIZE, Some(assets.disc.as_slice()))?;
    r.set_color(Color::from_straight(1.0, 1.0, 1.0, 0.25));
    r.mask_fill(110, 200, 40, 72, 0, 0, None)?;
    r.disable_mask_cache()?;

    r.set_color(Color::WHITE);
    for i in 0..6 {
        let x = 170.0 + i as f32 * 18.0;
        r.draw_glyph_quad(assets.glyph, 0.0, 0.0, 8.0, 8.0, x, 210.0, x + 16.0, 226.0)?;
    }
    Ok(())
}

fn image_ops(r: &mut Renderer<WgpuBackend>, assets: &Assets) -> Result<()> {
    let src = assets.checker;
    let (w, h) = (src.width as f32, src.height as f32);
    let blit = |r: &mut Renderer<WgpuBackend>, x: f32| {
        r.blit_image(src, 0.0, 0.0, w, h, x, 300.0, x + w * 2.0, 300.0 + h * 2.0)
    };

    r.set_color(Color::WHITE);
    blit(r, 24.0)?;

    r.enable_rescale_op(src, false, &[1.4, 0.8, 0.8, 1.0], &[0.05, 0.0, 0.0, 0.0])?;
    blit(r, 134.0)?;
    r.disable_rescale_op()?;

    r.enable_convolve_op(src, false, 3, 3, &[1.0 / 9.0; 9])?;
    blit(r, 244.0)?;
    r.disable_convolve_op()?;

    let invert: Vec<u8> = (0..=255u8).rev().collect();
    r.enable_lookup_op(src, false, 1, 256, 0, LookupTable::Bytes(invert))?;
    blit(r, 354.0)?;
    r.disable_lookup_op()
}

/// Leaves every drawing mode disabled after a failed frame.
pub fn reset_modes(r: &mut Renderer<WgpuBackend>) -> Result<()> {
    r.disable_current_op()?;
    if r.is_aa_program_enabled() {
        r.disable_aa_parallelogram_program()?;
    }
    if r.mask_cache().is_enabled() {
        r.disable_mask_cache()?;
    }
    Ok(())
}

/// A panel drawn through the command stream decoder.
fn queued_panel() -> Vec<u8> {
    let mut w = CommandWriter::new();
    w.set_color(Color::from_straight(0.15, 0.15, 0.2, 0.9))
        .fill_spans(&[480, 200, 600, 280, 490, 290, 590, 296])
        .set_color(Color::from_straight(0.4, 0.9, 0.7, 1.0))
        .draw_rect(480, 200, 120, 80)
        .mask_fill(500, 220, 40, 40, 0, 0, None)
        .fill_parallelogram([550.0, 220.0, 30.0, 0.0, 10.0, 40.0], true)
        .blit(CHECKER_HANDLE, [0.0, 0.0, 16.0, 16.0], [480.0, 300.0, 512.0, 332.0]);
    w.into_bytes()
}

fn checker_rgba() -> Vec<u8> {
    let mut out = Vec::with_capacity((CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
    for y in 0..CHECKER_SIZE {
        for x in 0..CHECKER_SIZE {
            let on = ((x / 8) + (y / 8)) % 2 == 0;
            let c = if on {
                Color::from_straight(0.9, 0.9, 0.95, 1.0)
            } else {
                Color::from_straight(0.2, 0.3, 0.6, 1.0)
            };
            out.extend_from_slice(&c.to_rgba8());
        }
    }
    out
}

fn glyph_coverage() -> Vec<u8> {
    // A small diamond.
    let mut out = vec![0u8; 64];
    for y in 0..8i32 {
        for x in 0..8i32 {
            let d = (x * 2 - 7).abs() + (y * 2 - 7).abs();
            if d <= 8 {
                out[(y * 8 + x) as usize] = 255;
            }
        }
    }
    out
}

/// Antialiased disc coverage, row-major.
fn disc_coverage(size: u32) -> Vec<u8> {
    let r = size as f32 / 2.0;
    let mut out = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        for x in 0..size {
            let dx = x as f32 + 0.5 - r;
            let dy = y as f32 + 0.5 - r;
            let d = (dx * dx + dy * dy).sqrt();
            let cov = (r - d + 0.5).clamp(0.0, 1.0);
            out.push((cov * 255.0).round() as u8);
        }
    }
    out
}
