//! Controller communication via USB HID.

use super::{StatusStyle, Transport};
use crate::TransportError;
use hidapi::{HidApi, HidDevice};
use std::ffi::CString;
use std::time::Duration;
use tracing::{debug, info};

/// HID report id prefixed to every packet.
const REPORT_ID: u8 = 0x00;

/// The HID interface carrying the command protocol.
const DMD_INTERFACE: i32 = 0;

/// Controller link over the HID interface.
pub struct HidTransport {
    device: HidDevice,
}

impl HidTransport {
    /// Opens the controller by VID:PID.
    pub fn open(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let api = HidApi::new()?;

        let devices: Vec<_> = api
            .device_list()
            .filter(|d| d.vendor_id() == vid && d.product_id() == pid)
            .collect();

        for dev in &devices {
            debug!(
                "Found HID device: path={:?}, interface={}",
                dev.path(),
                dev.interface_number()
            );
        }

        let device_info = devices
            .iter()
            .find(|d| d.interface_number() == DMD_INTERFACE)
            .or_else(|| devices.first())
            .ok_or(TransportError::NotFound { vid, pid })?;

        let device = device_info.open_device(&api).map_err(|e| {
            debug!("Failed to open device: {}", e);
            TransportError::NotFound { vid, pid }
        })?;

        info!(
            "DMD controller opened (VID:{:04X} PID:{:04X}, interface={})",
            vid,
            pid,
            device_info.interface_number()
        );

        // The controller drops the first commands sent right after enumeration
        debug!("Waiting for device initialization (500ms)...");
        std::thread::sleep(Duration::from_millis(500));

        Ok(Self { device })
    }

    /// Opens a specific controller by HID path.
    pub fn open_path(path: &str) -> Result<Self, TransportError> {
        let c_path =
            CString::new(path).map_err(|_| TransportError::InvalidPath(path.to_string()))?;
        let api = HidApi::new()?;
        let device = api.open_path(&c_path)?;

        info!("DMD controller opened at path: {}", path);

        Ok(Self { device })
    }
}

impl Transport for HidTransport {
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let written = self.device.write(packet)?;
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
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let read = self.device.read_timeout(&mut buffer, millis)?;
        if read == 0 {
            return Err(TransportError::Timeout(millis as u64));
        }
        buffer.truncate(read);
        Ok(buffer)
    }

    fn report_id(&self) -> Option<u8> {
        Some(REPORT_ID)
    }

    fn status_style(&self) -> StatusStyle {
        StatusStyle::ErrorFlag
    }
}
