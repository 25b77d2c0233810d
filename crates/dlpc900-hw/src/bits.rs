//! Fixed-width bit field packing.
//!
//! Protocol fields are assembled as big-endian bit strings and then turned
//! into bytes with the controller's ordering: the string is left-padded to a
//! whole number of bytes, split most-significant bit first, and the byte
//! sequence is reversed. For single fields this yields little-endian bytes;
//! for concatenated fields the first field lands in the last byte.

use crate::{Error, Result};
use std::fmt;

/// A big-endian string of bits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitString {
    bits: Vec<bool>,
}

impl BitString {
    /// Creates an empty bit string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes `value` in exactly `width` bits.
    pub fn field(value: u64, width: u32) -> Result<Self> {
        if width > 64 || (width < 64 && value >> width != 0) {
            return Err(Error::FieldOverflow { value, width });
        }
        let bits = (0..width).rev().map(|i| (value >> i) & 1 == 1).collect();
        Ok(Self { bits })
    }

    /// Appends `value` as a `width`-bit field.
    pub fn push_field(&mut self, value: u64, width: u32) -> Result<&mut Self> {
        let field = Self::field(value, width)?;
        self.bits.extend(field.bits);
        Ok(self)
    }

    /// Appends a single bit.
    pub fn push_bit(&mut self, bit: bool) -> &mut Self {
        self.bits.push(bit);
        self
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns true if the string holds no bits.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Converts to bytes in controller order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let padding = (8 - self.bits.len() % 8) % 8;
        let padded = std::iter::repeat(false)
            .take(padding)
            .chain(self.bits.iter().copied())
            .collect::<Vec<_>>();

        let mut bytes: Vec<u8> = padded
            .chunks(8)
            .map(|chunk| chunk.iter().fold(0u8, |acc, &bit| (acc << 1) | bit as u8))
            .collect();
        bytes.reverse();
        bytes
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &bit in &self.bits {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Encodes `value` as a big-endian bit string of `width` bits.
pub fn to_bits(value: u64, width: u32) -> Result<BitString> {
    BitString::field(value, width)
}

/// Converts a bit string to bytes in controller order.
pub fn to_bytes(bits: &BitString) -> Vec<u8> {
    bits.to_bytes()
}

/// Packs a single field straight to bytes.
pub fn pack(value: u64, width: u32) -> Result<Vec<u8>> {
    Ok(to_bits(value, width)?.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_bits() {
        assert_eq!(to_bits(300, 16).unwrap().to_string(), "0000000100101100");
        assert_eq!(to_bits(0, 3).unwrap().to_string(), "000");
        assert_eq!(to_bits(5, 3).unwrap().to_string(), "101");
        assert!(to_bits(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_to_bytes_reverses() {
        let bits = to_bits(300, 16).unwrap();
        assert_eq!(to_bytes(&bits), vec![0x2C, 0x01]);

        // 1920 and 1080 as they appear in the bitmap header
        assert_eq!(pack(1920, 16).unwrap(), vec![0x80, 0x07]);
        assert_eq!(pack(1080, 16).unwrap(), vec![0x38, 0x04]);
    }

    #[test]
    fn test_overflow_fails() {
        assert!(matches!(
            to_bits(8, 3),
            Err(Error::FieldOverflow { value: 8, width: 3 })
        ));
        assert!(to_bits(1, 0).is_err());
        assert!(to_bits(u64::MAX, 64).is_ok());
        assert!(to_bits(0, 65).is_err());
    }

    #[test]
    fn test_widths_round_trip() {
        for width in 1..=32u32 {
            let max = (1u64 << width) - 1;
            for value in [0, 1, max / 3, max / 2, max] {
                let bytes = pack(value, width).unwrap();
                assert_eq!(bytes.len(), width.div_ceil(8) as usize);
                let decoded = bytes
                    .iter()
                    .rev()
                    .fold(0u64, |acc, &b| (acc << 8) | b as u64);
                assert_eq!(decoded, value, "width {}", width);
            }
        }
    }

    #[test]
    fn test_concatenated_fields() {
        // 5-bit position then 11-bit slot: the first field ends up in the last byte
        let mut bits = BitString::new();
        bits.push_field(3, 5).unwrap().push_field(0, 11).unwrap();
        assert_eq!(bits.len(), 16);
        assert_eq!(bits.to_bytes(), vec![0x00, 0x18]);

        let mut flag = BitString::new();
        flag.push_bit(true).push_field(0b1000000, 7).unwrap();
        assert_eq!(flag.to_bytes(), vec![0xC0]);
    }
}
