//! Payload encodings for the pattern-mode commands.

use crate::bits::{pack, BitString};
use crate::{Error, Result};

/// Maximum bitmap bytes carried by one upload command.
pub const BMP_CHUNK_SIZE: usize = 504;

/// One entry of the pattern lookup table (command 0x1A34).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternDefinition {
    /// Pattern index in the LUT.
    pub index: u16,
    /// Exposure time in microseconds (24 bits).
    pub exposure_us: u32,
    /// Bit depth, 1-8.
    pub bit_depth: u8,
    /// LED color mask, 3 bits (blue, green, red).
    pub color_mask: u8,
    /// Wait for an external trigger before displaying.
    pub trigger_in: bool,
    /// Dark time after exposure in microseconds (24 bits).
    pub dark_time_us: u32,
    /// Trigger output; the wire byte holds the inverse.
    pub trigger_out: bool,
    /// Composite image holding this pattern (11 bits).
    pub slot_index: u16,
    /// Bit position inside the composite (5 bits).
    pub bit_position: u8,
}

impl PatternDefinition {
    /// Encodes the 12-byte payload.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let depth = (self.bit_depth as u64)
            .checked_sub(1)
            .ok_or(Error::FieldOverflow { value: 0, width: 3 })?;

        let mut options = BitString::new();
        options
            .push_bit(self.trigger_in)
            .push_field(self.color_mask as u64, 3)?
            .push_field(depth, 3)?
            .push_bit(true);

        let mut position = BitString::new();
        position
            .push_field(self.bit_position as u64, 5)?
            .push_field(self.slot_index as u64, 11)?;

        let mut out = Vec::with_capacity(12);
        out.extend(pack(self.index as u64, 16)?);
        out.extend(pack(self.exposure_us as u64, 24)?);
        out.extend(options.to_bytes());
        out.extend(pack(self.dark_time_us as u64, 24)?);
        out.extend(pack(!self.trigger_out as u64, 8)?);
        out.extend(position.to_bytes());
        Ok(out)
    }
}

/// Pattern LUT configuration (command 0x1A31).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LutConfig {
    /// Number of LUT entries to play (11 bits).
    pub pattern_count: u16,
    /// Times to repeat the LUT; 0 repeats forever.
    pub repeat_count: u32,
}

impl LutConfig {
    /// Encodes the 6-byte payload.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let mut bits = BitString::new();
        bits.push_field(self.repeat_count as u64, 32)?
            .push_field(0, 5)?
            .push_field(self.pattern_count as u64, 11)?;
        Ok(bits.to_bytes())
    }
}

/// Trigger out 1 configuration (command 0x1A1E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerOut {
    /// Invert the output polarity.
    pub inverted: bool,
    /// Rising edge delay in microseconds.
    pub rising_delay_us: u16,
    /// Falling edge delay in microseconds.
    pub falling_delay_us: u16,
}

impl Default for TriggerOut {
    fn default() -> Self {
        Self {
            inverted: false,
            rising_delay_us: 0,
            falling_delay_us: 20,
        }
    }
}

impl TriggerOut {
    /// Encodes the 5-byte payload.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let mut out = pack(self.inverted as u64, 1)?;
        out.extend(pack(self.rising_delay_us as u64, 16)?);
        out.extend(pack(self.falling_delay_us as u64, 16)?);
        Ok(out)
    }
}

/// Encodes the 6-byte payload announcing a bitmap upload (command 0x1A2A).
pub fn set_bmp_payload(slot_index: u16, byte_count: u32) -> Result<Vec<u8>> {
    let mut index = BitString::new();
    index.push_field(0, 11)?.push_field(slot_index as u64, 5)?;

    let mut out = index.to_bytes();
    out.extend(pack(byte_count as u64, 32)?);
    Ok(out)
}

/// Splits an encoded bitmap into length-prefixed upload payloads
/// (command 0x1A2B).
pub fn bmp_chunks(bitmap: &[u8]) -> Result<Vec<Vec<u8>>> {
    bitmap
        .chunks(BMP_CHUNK_SIZE)
        .map(|chunk| {
            let mut payload = pack(chunk.len() as u64, 16)?;
            payload.extend_from_slice(chunk);
            Ok(payload)
        })
        .collect()
}
