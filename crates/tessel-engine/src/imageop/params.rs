use crate::config::caps::{MAX_KERNEL_ENTRIES, MAX_LOOKUP_ENTRIES};
use crate::error::UsageError;

/// Largest kernel side; 5x5 fills `MAX_KERNEL_ENTRIES` taps.
const MAX_KERNEL_SIDE: u32 = 5;

/// Convolution with a kernel of at most 5x5 taps, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolveOp {
    pub edge_zero_fill: bool,
    pub kernel_width: u32,
    pub kernel_height: u32,
    pub values: Vec<f32>,
}

impl ConvolveOp {
    pub fn new(
        edge_zero_fill: bool,
        kernel_width: u32,
        kernel_height: u32,
        values: &[f32],
    ) -> Result<Self, UsageError> {
        let sides_ok = (1..=MAX_KERNEL_SIDE).contains(&kernel_width)
            && (1..=MAX_KERNEL_SIDE).contains(&kernel_height);
        let taps = (kernel_width as usize).saturating_mul(kernel_height as usize);
        if !sides_ok || taps > MAX_KERNEL_ENTRIES || values.len() != taps {
            return Err(UsageError::InvalidKernel {
                width: kernel_width,
                height: kernel_height,
                values: values.len(),
            });
        }
        Ok(Self {
            edge_zero_fill,
            kernel_width,
            kernel_height,
            values: values.to_vec(),
        })
    }

    /// Tap offsets relative to the destination texel, paired with weights.
    pub fn taps(&self) -> impl Iterator<Item = (i32, i32, f32)> + '_ {
        let ox = -((self.kernel_width / 2) as i32);
        let oy = -((self.kernel_height / 2) as i32);
        let w = self.kernel_width as usize;
        self.values
            .iter()
            .enumerate()
            .map(move |(i, &weight)| ((i % w) as i32 + ox, (i / w) as i32 + oy, weight))
    }
}

/// Per-band linear rescale: `c * scale + offset`, offsets in [0, 1] units.
#[derive(Debug, Clone, PartialEq)]
pub struct RescaleOp {
    pub non_premultiplied: bool,
    pub scale: Vec<f32>,
    pub offset: Vec<f32>,
}

impl RescaleOp {
    pub fn new(non_premultiplied: bool, scale: &[f32], offset: &[f32]) -> Result<Self, UsageError> {
        check_bands(scale.len())?;
        if offset.len() != scale.len() {
            return Err(UsageError::InvalidBandCount { bands: offset.len() });
        }
        Ok(Self {
            non_premultiplied,
            scale: scale.to_vec(),
            offset: offset.to_vec(),
        })
    }

    /// Scale and offset expanded to RGBA. One band covers RGB; alpha is
    /// identity unless four bands are given.
    pub fn expanded(&self) -> ([f32; 4], [f32; 4]) {
        (expand(&self.scale, 1.0), expand(&self.offset, 0.0))
    }
}

/// Lookup table data, 8- or 16-bit elements, bands stored back to back.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupTable {
    Bytes(Vec<u8>),
    Shorts(Vec<u16>),
}

impl LookupTable {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            LookupTable::Bytes(v) => v.len(),
            LookupTable::Shorts(v) => v.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_short(&self) -> bool {
        matches!(self, LookupTable::Shorts(_))
    }

    /// Element `i` normalized to [0, 1].
    #[inline]
    pub fn normalized(&self, i: usize) -> f32 {
        match self {
            LookupTable::Bytes(v) => v[i] as f32 / 255.0,
            LookupTable::Shorts(v) => v[i] as f32 / 65535.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupOp {
    pub non_premultiplied: bool,
    pub num_bands: usize,
    pub band_length: usize,
    /// Subtracted from the 0..=255 sample before indexing.
    pub offset: i32,
    pub table: LookupTable,
}

impl LookupOp {
    pub fn new(
        non_premultiplied: bool,
        num_bands: usize,
        band_length: usize,
        offset: i32,
        table: LookupTable,
    ) -> Result<Self, UsageError> {
        check_bands(num_bands)?;
        if band_length == 0 || band_length > MAX_LOOKUP_ENTRIES {
            return Err(UsageError::InvalidLookupTable("band length must be 1..=256"));
        }
        if table.len() < num_bands * band_length {
            return Err(UsageError::InvalidLookupTable("table shorter than bands * length"));
        }
        Ok(Self {
            non_premultiplied,
            num_bands,
            band_length,
            offset,
            table,
        })
    }

    /// Value of `band` at `index`; one band serves every color channel.
    #[inline]
    pub fn entry(&self, band: usize, index: usize) -> f32 {
        let band = if self.num_bands == 1 { 0 } else { band };
        self.table.normalized(band * self.band_length + index)
    }

    #[inline]
    pub fn affects_alpha(&self) -> bool {
        self.num_bands == 4
    }
}

fn check_bands(bands: usize) -> Result<(), UsageError> {
    match bands {
        1 | 3 | 4 => Ok(()),
        _ => Err(UsageError::InvalidBandCount { bands }),
    }
}

fn expand(bands: &[f32], alpha_identity: f32) -> [f32; 4] {
    match *bands {
        [v] => [v, v, v, alpha_identity],
        [r, g, b] => [r, g, b, alpha_identity],
        [r, g, b, a] => [r, g, b, a],
        _ => [alpha_identity; 4],
    }
}
