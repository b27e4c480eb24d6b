//! hidapi-based transport implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use tracing::{debug, info};

use super::traits::{HidTransport, TransportError};
use crate::protocol::constants::{EV3_BOOTLOADER_PRODUCT_ID, LEGO_VENDOR_ID, MAX_FRAME_SIZE};

/// HID transport backed by hidapi.
pub struct HidDeviceTransport {
    device: HidDevice,
    vid: u16,
    pid: u16,
    connected: AtomicBool,
}

impl HidDeviceTransport {
    /// Open the EV3 bootloader device.
    pub fn open() -> Result<Self, TransportError> {
        Self::open_with_ids(LEGO_VENDOR_ID, EV3_BOOTLOADER_PRODUCT_ID)
    }

    /// Open a device with specific VID/PID.
    pub fn open_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let api = HidApi::new().map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let device_info = api
            .device_list()
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            product = device_info.product_string().unwrap_or("?"),
            "Found device"
        );

        let device = device_info
            .open_device(&api)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        Ok(Self {
            device,
            vid,
            pid,
            connected: AtomicBool::new(true),
        })
    }

    /// Vendor id of the opened device.
    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    /// Product id of the opened device.
    pub fn product_id(&self) -> u16 {
        self.pid
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

impl HidTransport for HidDeviceTransport {
    fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        // hidapi expects the report id as the first byte of the buffer.
        let mut report = Vec::with_capacity(data.len() + 1);
        report.push(report_id);
        report.extend_from_slice(data);

        match self.device.write(&report) {
            Ok(written) => {
                debug!(len = data.len(), written, "Report sent");
                Ok(())
            }
            Err(e) => {
                self.mark_disconnected();
                Err(TransportError::WriteFailed(e.to_string()))
            }
        }
    }

    fn recv_report(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

        match self.device.read_timeout(&mut buf, timeout_ms) {
            Ok(0) => Err(TransportError::Timeout {
                timeout_ms: timeout_ms as u64,
            }),
            Ok(n) => {
                debug!(len = n, "Report received");
                Ok(buf[..n].to_vec())
            }
            Err(e) => {
                self.mark_disconnected();
                Err(TransportError::ReadFailed(e.to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
