//! Pattern sequence programming.
//!
//! A sequence is uploaded in a fixed order: stop playback, define every LUT
//! entry, configure the LUT, then upload the composite images starting from
//! the highest slot index. The controller rejects uploads in ascending order.

mod file;

pub use file::{EncodedSequence, SEQUENCE_MAGIC, SEQUENCE_VERSION};

use crate::device::DmdDevice;
use crate::image::{compose, rle, BitPlane, EncodedBitmap};
use crate::protocol::{set_bmp_payload, LutConfig, PatternDefinition, TriggerOut};
use crate::transport::Transport;
use crate::{Error, Result, PLANES_PER_SLOT};
use tracing::{debug, info};

/// Bit depth of every uploaded pattern.
const PATTERN_BIT_DEPTH: u8 = 1;

/// All three LED colors on.
const PATTERN_COLOR_MASK: u8 = 0b111;

/// Number of composite slots needed for `patterns` patterns.
pub fn slot_count(patterns: usize) -> usize {
    patterns.div_ceil(PLANES_PER_SLOT)
}

/// Display timing and triggering of one pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternTiming {
    /// Exposure time in microseconds.
    pub exposure_us: u32,
    /// Dark time after exposure in microseconds.
    pub dark_time_us: u32,
    /// Wait for an external trigger.
    pub trigger_in: bool,
    /// Drive the trigger output.
    pub trigger_out: bool,
}

impl Default for PatternTiming {
    fn default() -> Self {
        Self {
            exposure_us: 1_000_000,
            dark_time_us: 0,
            trigger_in: false,
            trigger_out: true,
        }
    }
}

/// An encoded composite and the slot it is uploaded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeSlot {
    index: u16,
    bitmap: EncodedBitmap,
}

impl CompositeSlot {
    /// Composes and encodes up to 24 planes.
    pub fn encode(index: u16, planes: &[BitPlane]) -> Result<Self> {
        let composite = compose(planes)?;
        let bitmap = rle::encode(&composite)?;
        debug!(
            "Slot {}: {} planes encoded into {} bytes",
            index,
            planes.len(),
            bitmap.byte_count()
        );
        Ok(Self { index, bitmap })
    }

    /// Wraps an already encoded bitmap.
    pub fn from_bitmap(index: u16, bitmap: EncodedBitmap) -> Self {
        Self { index, bitmap }
    }

    /// Slot index on the controller.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Encoded bitmap bytes.
    pub fn bytes(&self) -> &[u8] {
        self.bitmap.bytes()
    }

    /// Encoded bitmap length.
    pub fn byte_count(&self) -> u32 {
        self.bitmap.byte_count()
    }
}

/// Encodes planes into consecutive slots of up to 24 patterns.
pub fn encode_slots(planes: &[BitPlane]) -> Result<Vec<CompositeSlot>> {
    planes
        .chunks(PLANES_PER_SLOT)
        .enumerate()
        .map(|(i, group)| {
            let index = u16::try_from(i).map_err(|_| Error::FieldOverflow {
                value: i as u64,
                width: 16,
            })?;
            CompositeSlot::encode(index, group)
        })
        .collect()
}

fn pattern_definition(ordinal: usize, timing: &PatternTiming) -> Result<PatternDefinition> {
    let narrow = |value: usize, width: u32| {
        u16::try_from(value).map_err(|_| Error::FieldOverflow {
            value: value as u64,
            width,
        })
    };

    Ok(PatternDefinition {
        index: narrow(ordinal, 16)?,
        exposure_us: timing.exposure_us,
        bit_depth: PATTERN_BIT_DEPTH,
        color_mask: PATTERN_COLOR_MASK,
        trigger_in: timing.trigger_in,
        dark_time_us: timing.dark_time_us,
        trigger_out: timing.trigger_out,
        slot_index: narrow(ordinal / PLANES_PER_SLOT, 11)?,
        bit_position: (ordinal % PLANES_PER_SLOT) as u8,
    })
}

/// A fully encoded, validated pattern sequence.
#[derive(Debug, Clone)]
pub struct Sequence {
    patterns: Vec<PatternDefinition>,
    slots: Vec<CompositeSlot>,
    lut: LutConfig,
    trigger_out1: Option<TriggerOut>,
}

impl Sequence {
    /// Builds a sequence from bit planes.
    ///
    /// `timings` holds either one entry per plane or a single entry shared by
    /// all of them. `repeat` is the LUT repeat count (0 loops forever).
    pub fn build(planes: &[BitPlane], timings: &[PatternTiming], repeat: u32) -> Result<Self> {
        if planes.is_empty() {
            return Err(Error::EmptySequence);
        }
        let slots = encode_slots(planes)?;
        Self::assemble(planes.len(), slots, timings, repeat)
    }

    /// Builds a sequence from a previously encoded sequence file.
    pub fn from_encoded(
        encoded: EncodedSequence,
        timings: &[PatternTiming],
        repeat: u32,
    ) -> Result<Self> {
        let count = encoded.pattern_count() as usize;
        Self::assemble(count, encoded.into_slots(), timings, repeat)
    }

    fn assemble(
        count: usize,
        slots: Vec<CompositeSlot>,
        timings: &[PatternTiming],
        repeat: u32,
    ) -> Result<Self> {
        if count == 0 {
            return Err(Error::EmptySequence);
        }
        if timings.len() != 1 && timings.len() != count {
            return Err(Error::TimingCount {
                expected: count,
                actual: timings.len(),
            });
        }

        let patterns = (0..count)
            .map(|ordinal| pattern_definition(ordinal, &timings[ordinal % timings.len()]))
            .collect::<Result<Vec<_>>>()?;

        let lut = LutConfig {
            pattern_count: u16::try_from(count).map_err(|_| Error::FieldOverflow {
                value: count as u64,
                width: 11,
            })?,
            repeat_count: repeat,
        };

        let sequence = Self {
            patterns,
            slots,
            lut,
            trigger_out1: None,
        };
        sequence.validate()?;
        Ok(sequence)
    }

    /// Packs every payload once so field overflows surface before any I/O.
    fn validate(&self) -> Result<()> {
        if self.slots.len() != slot_count(self.patterns.len()) {
            return Err(Error::InvalidSequenceFile(format!(
                "{} patterns need {} slots, got {}",
                self.patterns.len(),
                slot_count(self.patterns.len()),
                self.slots.len()
            )));
        }
        for pattern in &self.patterns {
            pattern.payload()?;
        }
        self.lut.payload()?;
        for slot in &self.slots {
            set_bmp_payload(slot.index, slot.byte_count())?;
        }
        if let Some(trigger) = &self.trigger_out1 {
            trigger.payload()?;
        }
        Ok(())
    }

    /// Configures trigger out 1 before the patterns are defined.
    pub fn with_trigger_out1(mut self, trigger: TriggerOut) -> Self {
        self.trigger_out1 = Some(trigger);
        self
    }

    /// LUT entries in pattern order.
    pub fn patterns(&self) -> &[PatternDefinition] {
        &self.patterns
    }

    /// Composite slots in index order.
    pub fn slots(&self) -> &[CompositeSlot] {
        &self.slots
    }

    /// LUT configuration.
    pub fn lut(&self) -> &LutConfig {
        &self.lut
    }

    /// Slots in the order they must be uploaded (highest index first).
    pub fn upload_order(&self) -> impl Iterator<Item = &CompositeSlot> {
        self.slots.iter().rev()
    }

    /// Extracts the persistable form of this sequence.
    pub fn to_encoded(&self) -> Result<EncodedSequence> {
        EncodedSequence::new(self.patterns.len() as u32, self.slots.clone())
    }
}

impl<T: Transport> DmdDevice<T> {
    /// Uploads a prepared sequence.
    pub fn load_sequence(&self, sequence: &Sequence) -> Result<()> {
        self.stop_sequence()?;

        if let Some(trigger) = &sequence.trigger_out1 {
            self.configure_trigger_out1(trigger)?;
        }
        for pattern in &sequence.patterns {
            self.define_pattern(pattern)?;
        }
        self.configure_lut(&sequence.lut)?;

        for slot in sequence.upload_order() {
            self.upload_bitmap(slot.index, slot.bytes())?;
        }

        info!(
            "Sequence loaded: {} patterns in {} slots (repeat {})",
            sequence.patterns.len(),
            sequence.slots.len(),
            sequence.lut.repeat_count
        );
        Ok(())
    }

    /// Encodes bit planes and uploads them as a new sequence.
    pub fn define_sequence(
        &self,
        planes: &[BitPlane],
        timings: &[PatternTiming],
        repeat: u32,
    ) -> Result<()> {
        let sequence = Sequence::build(planes, timings, repeat)?;
        self.load_sequence(&sequence)
    }
}
