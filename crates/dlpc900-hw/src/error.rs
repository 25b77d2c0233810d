//! Error types for the DLPC900 hardware library.

use crate::protocol::Opcode;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when encoding data for, or talking to, the controller.
#[derive(Error, Debug)]
pub enum Error {
    /// Opening the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The link failed while a command was in flight.
    #[error("command {opcode} (sequence 0x{sequence:02X}) failed: {source}")]
    Command {
        opcode: Opcode,
        sequence: u8,
        #[source]
        source: TransportError,
    },

    /// A value does not fit the bit width of its protocol field.
    #[error("value {value} does not fit in {width} bits")]
    FieldOverflow { value: u64, width: u32 },

    /// More bit planes than one composite image can hold.
    #[error("too many bit planes for one composite: {0} (max 24)")]
    TooManyPlanes(usize),

    /// The RLE encoder failed to advance along a row.
    #[error("RLE encoder stalled at row {row}, column {column}")]
    CodecStall { row: usize, column: usize },

    /// Image buffer size mismatch.
    #[error("image size mismatch: expected {expected} pixels, got {actual}")]
    PlaneSize { expected: usize, actual: usize },

    /// Malformed Enhanced-RLE bitmap.
    #[error("invalid bitmap: {0}")]
    InvalidBitmap(String),

    /// Malformed persisted sequence file.
    #[error("invalid sequence file: {0}")]
    InvalidSequenceFile(String),

    /// Timing list length does not match the pattern count.
    #[error("expected 1 or {expected} pattern timings, got {actual}")]
    TimingCount { expected: usize, actual: usize },

    /// A sequence needs at least one pattern.
    #[error("sequence has no patterns")]
    EmptySequence,

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the underlying USB link.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Controller not found or could not be opened.
    #[error("DMD controller not found (VID:PID {vid:04X}:{pid:04X})")]
    NotFound { vid: u16, pid: u16 },

    /// HID device path that cannot be passed to the OS.
    #[error("invalid HID device path {0:?}")]
    InvalidPath(String),

    /// USB HID communication error.
    #[error("USB HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// libusb communication error.
    #[cfg(feature = "libusb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// No response within the timeout.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// The device accepted fewer bytes than were written.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// The transport handle was poisoned by a panic in another thread.
    #[error("transport handle poisoned")]
    Poisoned,
}

/// Error reported by the controller in a reply packet.
///
/// These are logged and kept on the device handle; they do not fail the
/// command that triggered them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("device reported error for {opcode} (sequence 0x{sequence:02X}, flags 0x{flags:02X}): code {code} {description:?}")]
pub struct ProtocolError {
    /// Command that produced the error reply.
    pub opcode: Opcode,
    /// Sequence byte of that command.
    pub sequence: u8,
    /// Flag byte of the reply.
    pub flags: u8,
    /// Error code read back from the controller.
    pub code: u8,
    /// Description string read back from the controller.
    pub description: String,
}
