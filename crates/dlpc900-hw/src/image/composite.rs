//! Three-channel composite image packing up to 24 bit planes.

use super::bitplane::{BitPlane, PIXEL_COUNT};
use crate::{Error, Result, DMD_HEIGHT, DMD_WIDTH, PLANES_PER_SLOT};

/// Bytes per composite pixel.
pub const CHANNELS: usize = 3;

/// 1080x1920x3 byte image, row-major and channel-interleaved.
///
/// Planes 0-7 live in channel 2, planes 8-15 in channel 1 and planes 16-23
/// in channel 0, each at bit `plane % 8`.
#[derive(Clone, PartialEq, Eq)]
pub struct Composite {
    data: Vec<u8>,
}

impl Default for Composite {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Composite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composite")
            .field("width", &DMD_WIDTH)
            .field("height", &DMD_HEIGHT)
            .finish()
    }
}

impl Composite {
    /// Creates an all-black composite.
    pub fn new() -> Self {
        Self {
            data: vec![0; PIXEL_COUNT * CHANNELS],
        }
    }

    /// Wraps raw interleaved bytes.
    pub fn from_raw(data: Vec<u8>) -> Result<Self> {
        if data.len() != PIXEL_COUNT * CHANNELS {
            return Err(Error::PlaneSize {
                expected: PIXEL_COUNT * CHANNELS,
                actual: data.len(),
            });
        }
        Ok(Self { data })
    }

    /// Returns the raw interleaved bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the pixel at `(x, y)`. Coordinates must be in range.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * DMD_WIDTH as usize + x) * CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Writes the pixel at `(x, y)`. Coordinates must be in range.
    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, pixel: [u8; 3]) {
        let i = (y * DMD_WIDTH as usize + x) * CHANNELS;
        self.data[i..i + CHANNELS].copy_from_slice(&pixel);
    }

    /// Extracts bit plane `index` (0-23).
    pub fn plane(&self, index: usize) -> Result<BitPlane> {
        if index >= PLANES_PER_SLOT {
            return Err(Error::TooManyPlanes(index + 1));
        }
        let (channel, bit) = plane_location(index);
        let samples: Vec<u8> = self
            .data
            .chunks_exact(CHANNELS)
            .map(|px| (px[channel] >> bit) & 1)
            .collect();
        BitPlane::from_luma8(&samples)
    }
}

/// Channel and bit holding plane `index`.
fn plane_location(index: usize) -> (usize, u32) {
    (2 - index / 8, (index % 8) as u32)
}

/// Packs up to 24 bit planes into one composite.
pub fn compose(planes: &[BitPlane]) -> Result<Composite> {
    if planes.len() > PLANES_PER_SLOT {
        return Err(Error::TooManyPlanes(planes.len()));
    }

    let mut composite = Composite::new();
    for (index, plane) in planes.iter().enumerate() {
        let (channel, bit) = plane_location(index);
        let weight = 1u8 << bit;
        for (px, &on) in composite.data.chunks_exact_mut(CHANNELS).zip(plane.data()) {
            if on {
                px[channel] |= weight;
            }
        }
    }
    Ok(composite)
}
