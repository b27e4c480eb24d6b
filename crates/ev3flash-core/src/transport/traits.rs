//! HID transport layer abstraction.
//!
//! Defines the `HidTransport` trait for report-channel communication,
//! allowing different implementations (hidapi, mock, etc.).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to close device: {0}")]
    CloseFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Abstract HID report transport.
///
/// This trait enables:
/// - Production implementation using hidapi
/// - Mock implementation for unit testing
///
/// Implementations must queue inbound reports: a report arriving before
/// `recv_report` is called is delivered by the next call, not dropped. The
/// OS HID stack provides this for real devices; the mock queues explicitly.
pub trait HidTransport: Send {
    /// Send one outbound report.
    fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next inbound report, waiting at most `timeout`.
    fn recv_report(&self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Check if the device is still connected.
    fn is_connected(&self) -> bool;
}
