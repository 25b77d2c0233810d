//! Single-bit pattern image for the 1920x1080 mirror array.

use crate::{Error, Result, DMD_HEIGHT, DMD_WIDTH};

/// Total pixel count for the mirror array.
pub const PIXEL_COUNT: usize = DMD_WIDTH as usize * DMD_HEIGHT as usize;

/// One binary pattern: `true` turns the mirror on.
#[derive(Clone, PartialEq, Eq)]
pub struct BitPlane {
    /// Row-major pixel data.
    data: Vec<bool>,
}

impl Default for BitPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BitPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.data.iter().filter(|&&p| p).count();
        f.debug_struct("BitPlane")
            .field("width", &DMD_WIDTH)
            .field("height", &DMD_HEIGHT)
            .field("lit", &lit)
            .finish()
    }
}

impl BitPlane {
    /// Creates an all-off plane.
    pub fn new() -> Self {
        Self {
            data: vec![false; PIXEL_COUNT],
        }
    }

    /// Builds a plane by evaluating `f(x, y)` for every pixel.
    pub fn from_fn<F: FnMut(u16, u16) -> bool>(mut f: F) -> Self {
        let mut data = Vec::with_capacity(PIXEL_COUNT);
        for y in 0..DMD_HEIGHT {
            for x in 0..DMD_WIDTH {
                data.push(f(x, y));
            }
        }
        Self { data }
    }

    /// Builds a plane from 8-bit luma samples; any non-zero sample is on.
    pub fn from_luma8(samples: &[u8]) -> Result<Self> {
        if samples.len() != PIXEL_COUNT {
            return Err(Error::PlaneSize {
                expected: PIXEL_COUNT,
                actual: samples.len(),
            });
        }
        Ok(Self {
            data: samples.iter().map(|&s| s != 0).collect(),
        })
    }

    /// Returns the width of the plane.
    pub fn width(&self) -> u16 {
        DMD_WIDTH
    }

    /// Returns the height of the plane.
    pub fn height(&self) -> u16 {
        DMD_HEIGHT
    }

    /// Returns the raw row-major pixels.
    pub fn data(&self) -> &[bool] {
        &self.data
    }

    /// Sets a pixel at the given coordinates.
    pub fn set(&mut self, x: u16, y: u16, value: bool) {
        if x < DMD_WIDTH && y < DMD_HEIGHT {
            self.data[y as usize * DMD_WIDTH as usize + x as usize] = value;
        }
    }

    /// Gets a pixel at the given coordinates.
    pub fn get(&self, x: u16, y: u16) -> Option<bool> {
        if x < DMD_WIDTH && y < DMD_HEIGHT {
            Some(self.data[y as usize * DMD_WIDTH as usize + x as usize])
        } else {
            None
        }
    }

    /// Fills a rectangle, clipped to the plane.
    pub fn fill_rect(&mut self, x: u16, y: u16, width: u16, height: u16, value: bool) {
        for dy in 0..height {
            for dx in 0..width {
                self.set(x.saturating_add(dx), y.saturating_add(dy), value);
            }
        }
    }

    /// Inverts every pixel.
    pub fn invert(&mut self) {
        for p in &mut self.data {
            *p = !*p;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_ops() {
        let mut plane = BitPlane::new();
        assert_eq!(plane.width(), 1920);
        assert_eq!(plane.height(), 1080);
        assert_eq!(plane.get(10, 20), Some(false));

        plane.set(10, 20, true);
        assert_eq!(plane.get(10, 20), Some(true));
        assert_eq!(plane.get(1920, 0), None);

        plane.fill_rect(1900, 1070, 100, 100, true);
        assert_eq!(plane.get(1919, 1079), Some(true));
        assert_eq!(plane.get(1899, 1079), Some(false));

        plane.invert();
        assert_eq!(plane.get(10, 20), Some(false));
        assert_eq!(plane.get(0, 0), Some(true));
    }

    #[test]
    fn test_from_luma8() {
        let mut samples = vec![0u8; PIXEL_COUNT];
        samples[1921] = 200;
        let plane = BitPlane::from_luma8(&samples).unwrap();
        assert_eq!(plane.get(1, 1), Some(true));
        assert_eq!(plane.get(0, 1), Some(false));

        assert!(matches!(
            BitPlane::from_luma8(&[0u8; 16]),
            Err(Error::PlaneSize { actual: 16, .. })
        ));
    }
}
