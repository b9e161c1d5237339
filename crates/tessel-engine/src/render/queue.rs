//! Buffered command streams.
//!
//! A stream is a sequence of little-endian records: an `i32` opcode followed
//! by its payload. Variable-length byte payloads are padded to four bytes.
//! [`RenderQueue`] replays a stream against a [`Renderer`]; [`CommandWriter`]
//! produces one.

use std::collections::HashMap;

use crate::backend::{RenderBackend, SourceImage};
use crate::config::caps::{BYTES_PER_POLY_POINT, BYTES_PER_SCANLINE, BYTES_PER_SPAN};
use crate::error::{RenderError, Result};
use crate::imageop::LookupTable;
use crate::paint::Color;

use super::Renderer;

pub mod opcodes {
    pub const DRAW_LINE: i32 = 10;
    pub const DRAW_RECT: i32 = 11;
    pub const DRAW_POLY: i32 = 12;
    pub const DRAW_SCANLINES: i32 = 14;
    pub const DRAW_PARALLELOGRAM: i32 = 15;
    pub const DRAW_AAPARALLELOGRAM: i32 = 16;

    pub const FILL_RECT: i32 = 20;
    pub const FILL_SPANS: i32 = 21;
    pub const FILL_PARALLELOGRAM: i32 = 22;
    pub const FILL_AAPARALLELOGRAM: i32 = 23;

    pub const BLIT: i32 = 31;
    pub const MASK_FILL: i32 = 32;

    pub const SYNC: i32 = 76;
    pub const SET_COLOR: i32 = 101;

    pub const ENABLE_CONVOLVE_OP: i32 = 120;
    pub const DISABLE_CONVOLVE_OP: i32 = 121;
    pub const ENABLE_RESCALE_OP: i32 = 122;
    pub const DISABLE_RESCALE_OP: i32 = 123;
    pub const ENABLE_LOOKUP_OP: i32 = 124;
    pub const DISABLE_LOOKUP_OP: i32 = 125;
}

/// Mode left enabled by the previous command.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum PrevOp {
    Idle,
    Mask,
    AaParallelogram,
}

/// Replays command streams against a renderer.
///
/// Images are referenced by `i64` handles registered up front. The queue
/// enables the mask cache and the AA program on demand and disables them when
/// another drawing command follows, so streams never carry those pairs.
#[derive(Debug)]
pub struct RenderQueue {
    sources: HashMap<i64, SourceImage>,
    prev: PrevOp,
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderQueue {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            prev: PrevOp::Idle,
        }
    }

    /// Makes `image` addressable as `handle`; returns the image it replaces.
    pub fn register_source(&mut self, handle: i64, image: SourceImage) -> Option<SourceImage> {
        self.sources.insert(handle, image)
    }

    pub fn unregister_source(&mut self, handle: i64) -> Option<SourceImage> {
        self.sources.remove(&handle)
    }

    /// Decodes and executes every command in `stream`, returning how many ran.
    ///
    /// On failure the commands before the bad one have been applied and any
    /// mode the queue enabled is disabled again.
    pub fn execute<B: RenderBackend>(
        &mut self,
        renderer: &mut Renderer<B>,
        stream: &[u8],
    ) -> Result<usize> {
        let mut reader = Reader::new(stream);
        let mut executed = 0usize;
        while !reader.is_empty() {
            let at = reader.pos;
            if let Err(err) = self.step(renderer, &mut reader) {
                log::warn!("command at byte {at} failed: {err}");
                if let Err(cleanup) = self.enter(renderer, PrevOp::Idle) {
                    log::debug!("queue cleanup failed: {cleanup}");
                    self.prev = PrevOp::Idle;
                }
                return Err(err);
            }
            executed += 1;
        }
        self.enter(renderer, PrevOp::Idle)?;
        log::trace!("executed {executed} queued commands");
        Ok(executed)
    }

    fn step<B: RenderBackend>(&mut self, r: &mut Renderer<B>, rd: &mut Reader<'_>) -> Result<()> {
        use opcodes::*;

        let opcode = rd.i32()?;
        match opcode {
            DRAW_LINE => {
                let [x1, y1, x2, y2] = rd.i32s()?;
                self.enter(r, PrevOp::Idle)?;
                r.draw_line(x1, y1, x2, y2)
            }
            DRAW_RECT => {
                let [x, y, w, h] = rd.i32s()?;
                self.enter(r, PrevOp::Idle)?;
                r.draw_rect(x, y, w, h)
            }
            DRAW_POLY => {
                let n = rd.count()?;
                let closed = rd.i32()? != 0;
                let [tx, ty] = rd.i32s()?;
                rd.expect(n, BYTES_PER_POLY_POINT)?;
                let xs = rd.i32_vec(n)?;
                let ys = rd.i32_vec(n)?;
                self.enter(r, PrevOp::Idle)?;
                r.draw_poly(&xs, &ys, closed, tx, ty)
            }
            DRAW_SCANLINES => {
                let n = rd.count()?;
                rd.expect(n, BYTES_PER_SCANLINE)?;
                let scanlines = rd.i32_vec(n * 3)?;
                self.enter(r, PrevOp::Idle)?;
                r.draw_scanlines(&scanlines)
            }
            DRAW_PARALLELOGRAM => {
                let [fx, fy, dx21, dy21, dx12, dy12, lw21, lw12] = rd.f32s()?;
                self.enter(r, PrevOp::Idle)?;
                r.draw_parallelogram(fx, fy, dx21, dy21, dx12, dy12, lw21, lw12)
            }
            DRAW_AAPARALLELOGRAM => {
                let [fx, fy, dx21, dy21, dx12, dy12, lw21, lw12] = rd.f32s()?;
                self.enter(r, PrevOp::AaParallelogram)?;
                r.draw_aa_parallelogram(fx, fy, dx21, dy21, dx12, dy12, lw21, lw12)
            }
            FILL_RECT => {
                let [x, y, w, h] = rd.i32s()?;
                self.enter(r, PrevOp::Idle)?;
                r.fill_rect(x, y, w, h)
            }
            FILL_SPANS => {
                let n = rd.count()?;
                rd.expect(n, BYTES_PER_SPAN)?;
                let spans = rd.i32_vec(n * 4)?;
                self.enter(r, PrevOp::Idle)?;
                r.fill_spans(&spans)
            }
            FILL_PARALLELOGRAM => {
                let [fx, fy, dx21, dy21, dx12, dy12] = rd.f32s()?;
                self.enter(r, PrevOp::Idle)?;
                r.fill_parallelogram(fx, fy, dx21, dy21, dx12, dy12)
            }
            FILL_AAPARALLELOGRAM => {
                let [fx, fy, dx21, dy21, dx12, dy12] = rd.f32s()?;
                self.enter(r, PrevOp::AaParallelogram)?;
                r.fill_aa_parallelogram(fx, fy, dx21, dy21, dx12, dy12)
            }
            BLIT => {
                let src = self.source(rd.i64()?)?;
                let [sx1, sy1, sx2, sy2, dx1, dy1, dx2, dy2] = rd.f32s()?;
                self.enter(r, PrevOp::Idle)?;
                r.blit_image(src, sx1, sy1, sx2, sy2, dx1, dy1, dx2, dy2)
            }
            MASK_FILL => {
                let [x, y] = rd.i32s()?;
                let w = rd.count()? as u32;
                let h = rd.count()? as u32;
                let mask_offset = rd.count()?;
                let mask_scan = rd.count()? as u32;
                let len = rd.count()?;
                let mask = rd.padded_bytes(len)?;
                self.enter(r, PrevOp::Mask)?;
                let mask = (len > 0).then_some(mask);
                r.mask_fill(x, y, w, h, mask_offset, mask_scan, mask)
            }
            SYNC => r.submit(),
            SET_COLOR => {
                let pixel = rd.i32()?;
                r.set_color(Color::from_argb_premul(pixel as u32));
                Ok(())
            }
            ENABLE_CONVOLVE_OP => {
                let src = self.source(rd.i64()?)?;
                let edge_zero_fill = rd.i32()? != 0;
                let kw = rd.count()?;
                let kh = rd.count()?;
                let values = rd.f32_vec(kw.saturating_mul(kh))?;
                self.enter(r, PrevOp::Idle)?;
                r.enable_convolve_op(src, edge_zero_fill, kw as u32, kh as u32, &values)
            }
            DISABLE_CONVOLVE_OP => {
                self.enter(r, PrevOp::Idle)?;
                r.disable_convolve_op()
            }
            ENABLE_RESCALE_OP => {
                let src = self.source(rd.i64()?)?;
                let non_premultiplied = rd.i32()? != 0;
                let n = rd.count()?;
                let scale = rd.f32_vec(n)?;
                let offset = rd.f32_vec(n)?;
                self.enter(r, PrevOp::Idle)?;
                r.enable_rescale_op(src, non_premultiplied, &scale, &offset)
            }
            DISABLE_RESCALE_OP => {
                self.enter(r, PrevOp::Idle)?;
                r.disable_rescale_op()
            }
            ENABLE_LOOKUP_OP => {
                let src = self.source(rd.i64()?)?;
                let non_premultiplied = rd.i32()? != 0;
                let short_data = rd.i32()? != 0;
                let bands = rd.count()?;
                let len = rd.count()?;
                let offset = rd.i32()?;
                let entries = bands.saturating_mul(len);
                let table = if short_data {
                    let bytes = rd.padded_bytes(entries.saturating_mul(2))?;
                    LookupTable::Shorts(
                        bytes
                            .chunks_exact(2)
                            .map(|b| u16::from_le_bytes([b[0], b[1]]))
                            .collect(),
                    )
                } else {
                    LookupTable::Bytes(rd.padded_bytes(entries)?.to_vec())
                };
                self.enter(r, PrevOp::Idle)?;
                r.enable_lookup_op(src, non_premultiplied, bands, len, offset, table)
            }
            DISABLE_LOOKUP_OP => {
                self.enter(r, PrevOp::Idle)?;
                r.disable_lookup_op()
            }
            other => Err(malformed(format!("unknown opcode {other}"))),
        }
    }

    /// Switches the queue-managed mode to `next`.
    fn enter<B: RenderBackend>(&mut self, r: &mut Renderer<B>, next: PrevOp) -> Result<()> {
        if self.prev == next {
            return Ok(());
        }
        match self.prev {
            PrevOp::Idle => {}
            PrevOp::Mask => r.disable_mask_cache()?,
            PrevOp::AaParallelogram => r.disable_aa_parallelogram_program()?,
        }
        self.prev = PrevOp::Idle;
        match next {
            PrevOp::Idle => {}
            PrevOp::Mask => r.enable_mask_cache()?,
            PrevOp::AaParallelogram => r.enable_aa_parallelogram_program()?,
        }
        self.prev = next;
        Ok(())
    }

    fn source(&self, handle: i64) -> Result<SourceImage> {
        self.sources
            .get(&handle)
            .copied()
            .ok_or_else(|| malformed(format!("unknown image handle {handle}")))
    }
}

fn malformed(msg: String) -> RenderError {
    RenderError::MalformedCommand(msg)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(malformed(format!(
                "payload truncated at byte {}: need {len}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Checks that `count` records of `size` bytes follow.
    fn expect(&self, count: usize, size: usize) -> Result<()> {
        match count.checked_mul(size) {
            Some(len) if len <= self.remaining() => Ok(()),
            _ => Err(malformed(format!(
                "{count} records of {size} bytes exceed the remaining {}",
                self.remaining()
            ))),
        }
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.i32()? as u32))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_le_bytes(raw))
    }

    /// Non-negative `i32` length or count.
    fn count(&mut self) -> Result<usize> {
        let v = self.i32()?;
        usize::try_from(v).map_err(|_| malformed(format!("negative count {v}")))
    }

    fn i32s<const N: usize>(&mut self) -> Result<[i32; N]> {
        let mut out = [0; N];
        for v in &mut out {
            *v = self.i32()?;
        }
        Ok(out)
    }

    fn f32s<const N: usize>(&mut self) -> Result<[f32; N]> {
        let mut out = [0.0; N];
        for v in &mut out {
            *v = self.f32()?;
        }
        Ok(out)
    }

    fn i32_vec(&mut self, n: usize) -> Result<Vec<i32>> {
        self.expect(n, 4)?;
        (0..n).map(|_| self.i32()).collect()
    }

    fn f32_vec(&mut self, n: usize) -> Result<Vec<f32>> {
        self.expect(n, 4)?;
        (0..n).map(|_| self.f32()).collect()
    }

    /// `len` bytes followed by padding to the next multiple of four.
    fn padded_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.take(len)?;
        self.take(len.next_multiple_of(4) - len)?;
        Ok(bytes)
    }
}

/// Encodes command streams for [`RenderQueue`].
#[derive(Debug, Default, Clone)]
pub struct CommandWriter {
    buf: Vec<u8>,
}

impl CommandWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32s(&mut self, vs: &[i32]) -> &mut Self {
        for &v in vs {
            self.i32(v);
        }
        self
    }

    pub fn f32s(&mut self, vs: &[f32]) -> &mut Self {
        for &v in vs {
            self.f32(v);
        }
        self
    }

    /// Raw bytes padded with zeros to a multiple of four.
    pub fn padded_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        let pad = bytes.len().next_multiple_of(4) - bytes.len();
        self.buf.extend(std::iter::repeat_n(0u8, pad));
        self
    }

    // ── typed records ─────────────────────────────────────────────────────

    pub fn set_color(&mut self, color: Color) -> &mut Self {
        let [r, g, b, a] = color.to_rgba8();
        let argb = u32::from_be_bytes([a, r, g, b]);
        self.i32(opcodes::SET_COLOR).i32(argb as i32)
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32) -> &mut Self {
        self.i32(opcodes::FILL_RECT).i32s(&[x, y, w, h])
    }

    pub fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) -> &mut Self {
        self.i32(opcodes::DRAW_LINE).i32s(&[x1, y1, x2, y2])
    }

    pub fn draw_rect(&mut self, x: i32, y: i32, w: i32, h: i32) -> &mut Self {
        self.i32(opcodes::DRAW_RECT).i32s(&[x, y, w, h])
    }

    pub fn draw_poly(&mut self, xs: &[i32], ys: &[i32], closed: bool, tx: i32, ty: i32) -> &mut Self {
        let n = xs.len().min(ys.len());
        self.i32(opcodes::DRAW_POLY)
            .i32s(&[n as i32, closed as i32, tx, ty])
            .i32s(&xs[..n])
            .i32s(&ys[..n])
    }

    /// `scanlines` packed as `[x1, x2, y, ...]`.
    pub fn draw_scanlines(&mut self, scanlines: &[i32]) -> &mut Self {
        let n = scanlines.len() / 3;
        self.i32(opcodes::DRAW_SCANLINES)
            .i32(n as i32)
            .i32s(&scanlines[..n * 3])
    }

    /// `spans` packed as `[x1, y1, x2, y2, ...]`.
    pub fn fill_spans(&mut self, spans: &[i32]) -> &mut Self {
        let n = spans.len() / 4;
        self.i32(opcodes::FILL_SPANS).i32(n as i32).i32s(&spans[..n * 4])
    }

    /// `[fx11, fy11, dx21, dy21, dx12, dy12]`.
    pub fn fill_parallelogram(&mut self, p: [f32; 6], antialiased: bool) -> &mut Self {
        let op = if antialiased {
            opcodes::FILL_AAPARALLELOGRAM
        } else {
            opcodes::FILL_PARALLELOGRAM
        };
        self.i32(op).f32s(&p)
    }

    /// `[fx11, fy11, dx21, dy21, dx12, dy12, lw21, lw12]`.
    pub fn draw_parallelogram(&mut self, p: [f32; 8], antialiased: bool) -> &mut Self {
        let op = if antialiased {
            opcodes::DRAW_AAPARALLELOGRAM
        } else {
            opcodes::DRAW_PARALLELOGRAM
        };
        self.i32(op).f32s(&p)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mask_fill(
        &mut self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        mask_offset: i32,
        mask_scan: i32,
        mask: Option<&[u8]>,
    ) -> &mut Self {
        let mask = mask.unwrap_or(&[]);
        self.i32(opcodes::MASK_FILL)
            .i32s(&[x, y, w, h, mask_offset, mask_scan, mask.len() as i32])
            .padded_bytes(mask)
    }

    /// `src` region `[sx1, sy1, sx2, sy2]` into `dst` `[dx1, dy1, dx2, dy2]`.
    pub fn blit(&mut self, handle: i64, src: [f32; 4], dst: [f32; 4]) -> &mut Self {
        self.i32(opcodes::BLIT).i64(handle).f32s(&src).f32s(&dst)
    }

    pub fn sync(&mut self) -> &mut Self {
        self.i32(opcodes::SYNC)
    }

    pub fn enable_convolve_op(
        &mut self,
        handle: i64,
        edge_zero_fill: bool,
        kw: i32,
        kh: i32,
        kernel: &[f32],
    ) -> &mut Self {
        self.i32(opcodes::ENABLE_CONVOLVE_OP)
            .i64(handle)
            .i32s(&[edge_zero_fill as i32, kw, kh])
            .f32s(kernel)
    }

    pub fn enable_rescale_op(
        &mut self,
        handle: i64,
        non_premultiplied: bool,
        scale: &[f32],
        offset: &[f32],
    ) -> &mut Self {
        self.i32(opcodes::ENABLE_RESCALE_OP)
            .i64(handle)
            .i32s(&[non_premultiplied as i32, scale.len() as i32])
            .f32s(scale)
            .f32s(offset)
    }

    pub fn enable_lookup_op(
        &mut self,
        handle: i64,
        non_premultiplied: bool,
        bands: i32,
        len: i32,
        offset: i32,
        table: &LookupTable,
    ) -> &mut Self {
        let (short, bytes) = match table {
            LookupTable::Bytes(b) => (false, b.clone()),
            LookupTable::Shorts(s) => (true, s.iter().flat_map(|v| v.to_le_bytes()).collect()),
        };
        self.i32(opcodes::ENABLE_LOOKUP_OP)
            .i64(handle)
            .i32s(&[non_premultiplied as i32, short as i32, bands, len, offset])
            .padded_bytes(&bytes)
    }

    pub fn disable_op(&mut self, opcode: i32) -> &mut Self {
        self.i32(opcode)
    }
}
