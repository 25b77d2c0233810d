//! Controller communication via the libusb bulk endpoints.

use super::{StatusStyle, Transport};
use crate::TransportError;
use rusb::{DeviceHandle, GlobalContext};
use std::time::Duration;
use tracing::{debug, info};

const INTERFACE: u8 = 0;
const CONFIGURATION: u8 = 1;
const OUT_ENDPOINT: u8 = 0x01;
const IN_ENDPOINT: u8 = 0x81;

/// Offset of the status byte checked in bulk replies.
const STATUS_OFFSET: usize = 6;

/// Controller link over the bulk endpoints.
pub struct BulkTransport {
    handle: DeviceHandle<GlobalContext>,
    write_timeout: Duration,
}

fn map_usb(error: rusb::Error, timeout: Duration) -> TransportError {
    match error {
        rusb::Error::Timeout => TransportError::Timeout(timeout.as_millis() as u64),
        other => TransportError::Usb(other),
    }
}

impl BulkTransport {
    /// Opens the controller by VID:PID and claims its interface.
    pub fn open(vid: u16, pid: u16, write_timeout: Duration) -> Result<Self, TransportError> {
        let mut handle = rusb::open_device_with_vid_pid(vid, pid)
            .ok_or(TransportError::NotFound { vid, pid })?;

        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        if handle.active_configuration()? != CONFIGURATION {
            handle.set_active_configuration(CONFIGURATION)?;
        }
        handle.claim_interface(INTERFACE)?;

        info!(
            "DMD controller opened (VID:{:04X} PID:{:04X}, bulk endpoints)",
            vid, pid
        );

        Ok(Self {
            handle,
            write_timeout,
        })
    }
}

impl Transport for BulkTransport {
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let written = self
            .handle
            .write_bulk(OUT_ENDPOINT, packet, self.write_timeout)
            .map_err(|e| map_usb(e, self.write_timeout))?;
        if written < packet.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: packet.len(),
            });
        }
        Ok(())
    }

    fn read_packet(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut buffer = vec![0u8; max_len];
        let read = self
            .handle
            .read_bulk(IN_ENDPOINT, &mut buffer, timeout)
            .map_err(|e| map_usb(e, timeout))?;
        buffer.truncate(read);
        Ok(buffer)
    }

    fn report_id(&self) -> Option<u8> {
        None
    }

    fn status_style(&self) -> StatusStyle {
        StatusStyle::StatusByte(STATUS_OFFSET)
    }
}

impl Drop for BulkTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(INTERFACE) {
            debug!("Failed to release interface: {}", e);
        }
    }
}
