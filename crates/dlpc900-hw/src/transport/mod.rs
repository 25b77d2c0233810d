//! USB transports for the controller.
//!
//! The controller exposes the same command protocol over two bindings: a
//! HID interface (65-byte reports with a leading report id) and a pair of
//! bulk endpoints (plain 64-byte packets). Both are driven through
//! [`Transport`]; everything above this module is binding-agnostic.

mod hid;
#[cfg(feature = "libusb")]
mod usb;

#[cfg(test)]
pub(crate) mod mock;

pub use hid::HidTransport;
#[cfg(feature = "libusb")]
pub use usb::BulkTransport;

use crate::protocol::BASE_CHUNK_SIZE;
use crate::TransportError;
use std::time::Duration;

/// Error bit in the reply flag byte.
pub const REPLY_ERROR_FLAG: u8 = 0x20;

/// Offset of the first data byte in a reply packet.
pub const REPLY_DATA_OFFSET: usize = 4;

/// How a transport signals a failed command in its reply packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusStyle {
    /// Error bit set in the flag byte (HID binding).
    ErrorFlag,
    /// Non-zero status byte at the given offset (bulk binding).
    StatusByte(usize),
}

impl StatusStyle {
    /// Returns true if `reply` reports an error.
    pub fn is_error(&self, reply: &[u8]) -> bool {
        match *self {
            StatusStyle::ErrorFlag => reply.first().is_some_and(|f| f & REPLY_ERROR_FLAG != 0),
            StatusStyle::StatusByte(offset) => reply.get(offset).is_some_and(|&b| b != 0),
        }
    }
}

/// A packet link to the controller.
pub trait Transport: Send {
    /// Writes one full packet.
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Reads one reply packet of at most `max_len` bytes.
    fn read_packet(&mut self, max_len: usize, timeout: Duration)
        -> Result<Vec<u8>, TransportError>;

    /// Report id prefixed to every outgoing packet, if any.
    fn report_id(&self) -> Option<u8>;

    /// How replies signal errors.
    fn status_style(&self) -> StatusStyle;

    /// Bytes per outgoing packet.
    fn packet_capacity(&self) -> usize {
        BASE_CHUNK_SIZE + self.report_id().map_or(0, |_| 1)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        (**self).write_packet(packet)
    }

    fn read_packet(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).read_packet(max_len, timeout)
    }

    fn report_id(&self) -> Option<u8> {
        (**self).report_id()
    }

    fn status_style(&self) -> StatusStyle {
        (**self).status_style()
    }

    fn packet_capacity(&self) -> usize {
        (**self).packet_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_styles() {
        assert!(StatusStyle::ErrorFlag.is_error(&[0x60, 0x00]));
        assert!(!StatusStyle::ErrorFlag.is_error(&[0x40, 0x00]));
        assert!(!StatusStyle::ErrorFlag.is_error(&[]));

        let style = StatusStyle::StatusByte(6);
        assert!(style.is_error(&[0, 0, 0, 0, 0, 0, 3]));
        assert!(!style.is_error(&[0xFF; 6]));
    }

    #[test]
    fn test_packet_capacity() {
        let hid = mock::MockTransport::hid();
        assert_eq!(hid.packet_capacity(), 65);
        let bulk = mock::MockTransport::bulk();
        assert_eq!(bulk.packet_capacity(), 64);
    }
}
