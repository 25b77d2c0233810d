//! Persisted encoded sequences.
//!
//! Encoding a long sequence takes far longer than uploading it, so encoded
//! slots can be saved once and reloaded later. File layout, little-endian:
//!
//! ```text
//! "DSEQ" | u16 version | u16 reserved | u32 pattern count | u32 slot count
//! per slot: u32 byte count | encoded bitmap
//! ```

use super::{encode_slots, slot_count, CompositeSlot};
use crate::image::{BitPlane, EncodedBitmap, PIXEL_COUNT};
use crate::{Error, Result};
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// File signature.
pub const SEQUENCE_MAGIC: [u8; 4] = *b"DSEQ";

/// Current file format version.
pub const SEQUENCE_VERSION: u16 = 1;

/// Upper bound on one encoded slot; the worst case encoding stays well below.
const MAX_SLOT_BYTES: u32 = (PIXEL_COUNT * 4) as u32;

/// Encoded slots of a sequence, without timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSequence {
    pattern_count: u32,
    slots: Vec<CompositeSlot>,
}

impl EncodedSequence {
    /// Wraps encoded slots after checking they cover `pattern_count` patterns.
    pub fn new(pattern_count: u32, slots: Vec<CompositeSlot>) -> Result<Self> {
        let expected = slot_count(pattern_count as usize);
        if pattern_count == 0 {
            return Err(Error::EmptySequence);
        }
        if slots.len() != expected {
            return Err(Error::InvalidSequenceFile(format!(
                "{} patterns need {} slots, got {}",
                pattern_count,
                expected,
                slots.len()
            )));
        }
        if let Some((i, slot)) = slots
            .iter()
            .enumerate()
            .find(|(i, slot)| slot.index() as usize != *i)
        {
            return Err(Error::InvalidSequenceFile(format!(
                "slot {} stored at position {}",
                slot.index(),
                i
            )));
        }
        Ok(Self {
            pattern_count,
            slots,
        })
    }

    /// Encodes bit planes without a device attached.
    pub fn encode(planes: &[BitPlane]) -> Result<Self> {
        if planes.is_empty() {
            return Err(Error::EmptySequence);
        }
        Self::new(planes.len() as u32, encode_slots(planes)?)
    }

    /// Number of patterns.
    pub fn pattern_count(&self) -> u32 {
        self.pattern_count
    }

    /// Encoded slots in index order.
    pub fn slots(&self) -> &[CompositeSlot] {
        &self.slots
    }

    /// Consumes the sequence, returning its slots.
    pub fn into_slots(self) -> Vec<CompositeSlot> {
        self.slots
    }

    /// Total encoded bytes across all slots.
    pub fn total_bytes(&self) -> u64 {
        self.slots.iter().map(|s| s.byte_count() as u64).sum()
    }

    /// Serializes the sequence.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&SEQUENCE_MAGIC)?;
        writer.write_all(&SEQUENCE_VERSION.to_le_bytes())?;
        writer.write_all(&0u16.to_le_bytes())?;
        writer.write_all(&self.pattern_count.to_le_bytes())?;
        writer.write_all(&(self.slots.len() as u32).to_le_bytes())?;
        for slot in &self.slots {
            writer.write_all(&slot.byte_count().to_le_bytes())?;
            writer.write_all(slot.bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Deserializes and validates a sequence.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != SEQUENCE_MAGIC {
            return Err(Error::InvalidSequenceFile(format!(
                "bad magic {:02X?}",
                magic
            )));
        }

        let version = read_u16(&mut reader)?;
        if version != SEQUENCE_VERSION {
            return Err(Error::InvalidSequenceFile(format!(
                "unsupported version {}",
                version
            )));
        }
        let _reserved = read_u16(&mut reader)?;

        let pattern_count = read_u32(&mut reader)?;
        let stored_slots = read_u32(&mut reader)? as usize;
        if stored_slots != slot_count(pattern_count as usize) {
            return Err(Error::InvalidSequenceFile(format!(
                "{} patterns need {} slots, header declares {}",
                pattern_count,
                slot_count(pattern_count as usize),
                stored_slots
            )));
        }

        let mut slots = Vec::with_capacity(stored_slots.min(64));
        for index in 0..stored_slots {
            let byte_count = read_u32(&mut reader)?;
            if byte_count % 4 != 0 || byte_count > MAX_SLOT_BYTES {
                return Err(Error::InvalidSequenceFile(format!(
                    "slot {} has invalid byte count {}",
                    index, byte_count
                )));
            }
            let mut bytes = vec![0u8; byte_count as usize];
            reader.read_exact(&mut bytes)?;
            let bitmap = EncodedBitmap::from_bytes(bytes).map_err(|e| {
                Error::InvalidSequenceFile(format!("slot {}: {}", index, e))
            })?;
            slots.push(CompositeSlot::from_bitmap(index as u16, bitmap));
        }

        Self::new(pattern_count, slots)
    }

    /// Saves the sequence, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut buffer = Vec::with_capacity(self.total_bytes() as usize + 16);
        self.write_to(&mut buffer)?;
        std::fs::write(path, buffer)?;
        debug!(
            "Saved {} patterns ({} slots) to {}",
            self.pattern_count,
            self.slots.len(),
            path.display()
        );
        Ok(())
    }

    /// Loads a sequence saved with [`EncodedSequence::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::read_from(bytes.as_slice())
    }
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncodedSequence {
        let planes: Vec<BitPlane> = (0..3)
            .map(|i| BitPlane::from_fn(move |x, y| (x + y + i) % 3 == 0))
            .collect();
        EncodedSequence::encode(&planes).unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stripes.dseq");

        let sequence = sample();
        sequence.save(&path).unwrap();
        let loaded = EncodedSequence::load(&path).unwrap();
        assert_eq!(loaded, sequence);
        assert_eq!(loaded.pattern_count(), 3);
    }

    #[test]
    fn test_layout() {
        let sequence = sample();
        let mut out = Vec::new();
        sequence.write_to(&mut out).unwrap();

        assert_eq!(&out[..4], b"DSEQ");
        assert_eq!(&out[4..8], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&out[8..12], &[0x03, 0x00, 0x00, 0x00]);
        assert_eq!(&out[12..16], &[0x01, 0x00, 0x00, 0x00]);
        let count = u32::from_le_bytes([out[16], out[17], out[18], out[19]]);
        assert_eq!(count, sequence.slots()[0].byte_count());
        assert_eq!(out.len(), 20 + count as usize);
    }

    #[test]
    fn test_rejects_corruption() {
        let mut out = Vec::new();
        sample().write_to(&mut out).unwrap();

        let mut bad_magic = out.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            EncodedSequence::read_from(bad_magic.as_slice()),
            Err(Error::InvalidSequenceFile(_))
        ));

        // Bitmap header length no longer matches the stored byte count
        let mut bad_length = out.clone();
        bad_length[20 + 8] ^= 0x04;
        assert!(matches!(
            EncodedSequence::read_from(bad_length.as_slice()),
            Err(Error::InvalidSequenceFile(_))
        ));

        let mut bad_slots = out.clone();
        bad_slots[12] = 2;
        assert!(matches!(
            EncodedSequence::read_from(bad_slots.as_slice()),
            Err(Error::InvalidSequenceFile(_))
        ));

        let truncated = &out[..out.len() - 4];
        assert!(matches!(
            EncodedSequence::read_from(truncated),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_slot_coverage() {
        let slots = sample().into_slots();
        assert!(EncodedSequence::new(25, slots.clone()).is_err());
        assert!(matches!(
            EncodedSequence::new(0, Vec::new()),
            Err(Error::EmptySequence)
        ));
        assert!(EncodedSequence::new(24, slots).is_ok());
    }
}
