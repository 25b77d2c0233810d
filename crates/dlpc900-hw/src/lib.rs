//! DLPC900 Hardware Library
//!
//! Drives DLPC900-based digital micromirror device controllers (DLP6500,
//! DLP9000 evaluation modules) over USB: command framing, the Enhanced-RLE
//! bitmap codec and pattern sequence programming.

pub mod bits;
pub mod device;
pub mod error;
pub mod image;
pub mod protocol;
pub mod sequence;
pub mod transport;

pub use device::DmdDevice;
pub use error::{Error, ProtocolError, Result, TransportError};
pub use image::{BitPlane, Composite};
pub use protocol::{DisplayMode, LutConfig, Opcode, PatternDefinition, PowerMode, SequenceState};
pub use sequence::{CompositeSlot, EncodedSequence, PatternTiming, Sequence};
pub use transport::{HidTransport, Transport};

#[cfg(feature = "libusb")]
pub use transport::BulkTransport;

/// DMD mirror array dimensions
pub const DMD_WIDTH: u16 = 1920;
pub const DMD_HEIGHT: u16 = 1080;

/// USB VID:PID for the DLPC900 controller
pub const DMD_VID: u16 = 0x0451;
pub const DMD_PID: u16 = 0xC900;

/// Bit planes packed into one composite image (8 bits x 3 channels).
pub const PLANES_PER_SLOT: usize = 24;
