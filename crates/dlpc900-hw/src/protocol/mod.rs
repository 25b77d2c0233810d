//! DLPC900 USB command protocol.
//!
//! Every command is a 6-byte header (flag, sequence byte, 16-bit length,
//! command byte pair) followed by its payload, cut into 64-byte packets.

mod command;
mod payload;

pub use command::{build_command, packetize, Direction, BASE_CHUNK_SIZE, HEADER_SIZE};
pub use payload::{
    bmp_chunks, set_bmp_payload, LutConfig, PatternDefinition, TriggerOut, BMP_CHUNK_SIZE,
};

use std::fmt;
use std::str::FromStr;

/// Sequence byte used for control and definition commands.
pub const SEQ_CONTROL: u8 = 0x00;

/// Sequence byte used for bitmap chunk uploads.
pub const SEQ_BITMAP: u8 = 0x11;

/// Sequence byte used for diagnostic reads.
pub const SEQ_DIAGNOSTIC: u8 = 0x22;

/// Sequence byte used for the loopback test read.
pub const SEQ_TEST_READ: u8 = 0xFF;

/// Controller commands, valued as `(com1 << 8) | com2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Last error code.
    ErrorCode = 0x0100,
    /// Last error description string.
    ErrorDescription = 0x0101,
    /// Normal / standby / reset.
    PowerControl = 0x0200,
    /// Idle mode on/off.
    IdleMode = 0x0201,
    /// Loopback test.
    Test = 0x1100,
    /// Display mode selection.
    DisplayMode = 0x1A1B,
    /// Trigger out 1 polarity and delays.
    TriggerOut1 = 0x1A1E,
    /// Pattern sequence start/pause/stop.
    PatternStartStop = 0x1A24,
    /// Announce a bitmap upload.
    InitPatternBmpLoad = 0x1A2A,
    /// One bitmap chunk.
    PatternBmpLoad = 0x1A2B,
    /// Pattern LUT configuration.
    ConfigureLut = 0x1A31,
    /// Pattern LUT entry definition.
    PatternDefinition = 0x1A34,
}

impl Opcode {
    /// First command byte (sent last).
    pub fn com1(self) -> u8 {
        (self as u16 >> 8) as u8
    }

    /// Second command byte (sent first).
    pub fn com2(self) -> u8 {
        (self as u16 & 0xFF) as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:04X})", self, *self as u16)
    }
}

/// Controller display modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DisplayMode {
    /// Video input.
    Video = 0x00,
    /// Patterns stored in flash.
    PreStoredPattern = 0x01,
    /// Patterns from the video port.
    VideoPattern = 0x02,
    /// Patterns uploaded over USB.
    #[default]
    PatternOnTheFly = 0x03,
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" | "0" => Ok(DisplayMode::Video),
            "pre-stored" | "prestored" | "1" => Ok(DisplayMode::PreStoredPattern),
            "video-pattern" | "2" => Ok(DisplayMode::VideoPattern),
            "on-the-fly" | "otf" | "3" => Ok(DisplayMode::PatternOnTheFly),
            _ => Err(format!("invalid display mode: {}", s)),
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::Video => write!(f, "video"),
            DisplayMode::PreStoredPattern => write!(f, "pre-stored"),
            DisplayMode::VideoPattern => write!(f, "video-pattern"),
            DisplayMode::PatternOnTheFly => write!(f, "on-the-fly"),
        }
    }
}

/// Power control states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerMode {
    /// Normal operation (wake up).
    Normal = 0x00,
    /// Standby.
    Standby = 0x01,
    /// Software reset.
    Reset = 0x02,
}

/// Pattern sequence playback states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SequenceState {
    /// Stop the sequence.
    Stop = 0x00,
    /// Pause the sequence.
    Pause = 0x01,
    /// Start the sequence.
    Start = 0x02,
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceState::Stop => write!(f, "stop"),
            SequenceState::Pause => write!(f, "pause"),
            SequenceState::Start => write!(f, "start"),
        }
    }
}
