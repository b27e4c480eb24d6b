//! Upgrade session - per-connection owner of the command link.
//!
//! Replaces ad-hoc global device state: one session is constructed around an
//! opened transport, owns the link (and with it the message counter and any
//! running transfer), and is discarded on close.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::events::{TracingObserver, UpgradeEvent, UpgradeObserver};
use crate::flasher::{TransferError, TransferSession, run_transfer};
use crate::link::{CommandLink, LinkError};
use crate::protocol::constants::{Command, EV3_BOOTLOADER_PRODUCT_ID, LEGO_VENDOR_ID};
use crate::protocol::frame::FrameError;
use crate::transport::{HidDeviceTransport, HidTransport, TransportError};

/// Default bound on waiting for a reply.
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5000;

/// Configuration for an upgrade session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// USB vendor id to open.
    pub vendor_id: u16,
    /// USB product id to open.
    pub product_id: u16,
    /// Milliseconds to wait for a reply before giving up.
    pub reply_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vendor_id: LEGO_VENDOR_ID,
            product_id: EV3_BOOTLOADER_PRODUCT_ID,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Hardware and firmware ids reported by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub hardware: u16,
    pub firmware: u16,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HW {}, FW {}", self.hardware, self.firmware)
    }
}

/// One connected device, one session.
pub struct UpgradeSession<T: HidTransport, O: UpgradeObserver> {
    link: CommandLink<T, O>,
}

impl UpgradeSession<HidDeviceTransport, TracingObserver> {
    /// Open the device named by the config, with the default tracing
    /// observer.
    pub fn open(config: &SessionConfig) -> Result<Self, TransportError> {
        Self::open_with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: UpgradeObserver> UpgradeSession<HidDeviceTransport, O> {
    /// Open the device named by the config with a custom observer.
    pub fn open_with_observer(
        config: &SessionConfig,
        observer: Arc<O>,
    ) -> Result<Self, TransportError> {
        observer.on_event(&UpgradeEvent::Init);
        let transport = match HidDeviceTransport::open_with_ids(config.vendor_id, config.product_id)
        {
            Ok(t) => t,
            Err(e) => {
                observer.on_event(&UpgradeEvent::Disconnected {
                    error: Some(e.to_string()),
                });
                return Err(e);
            }
        };
        Ok(Self::with_transport(transport, observer, config))
    }
}

impl<T: HidTransport, O: UpgradeObserver> UpgradeSession<T, O> {
    /// Wrap an already-open transport.
    pub fn with_transport(transport: T, observer: Arc<O>, config: &SessionConfig) -> Self {
        let timeout = Duration::from_millis(config.reply_timeout_ms);
        observer.on_event(&UpgradeEvent::Connected);
        Self {
            link: CommandLink::new(transport, observer, timeout),
        }
    }

    /// Observer attached to this session.
    pub fn observer(&self) -> &Arc<O> {
        self.link.observer()
    }

    /// Query hardware and firmware version ids.
    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, LinkError> {
        info!("Getting version...");
        let reply = self.link.request(Command::GetVersion, &[])?;

        // Hardware id big-endian at byte 6, firmware id at byte 8; the one
        // place the device answers big-endian.
        let short = || {
            LinkError::Frame(FrameError::TooShort {
                expected: 10,
                actual: reply.as_bytes().len(),
            })
        };
        let hardware = reply.read_u16_be(6).ok_or_else(short)?;
        let firmware = reply.read_u16_be(8).ok_or_else(short)?;

        let version = FirmwareVersion { hardware, firmware };
        info!(%version, "Version");
        Ok(version)
    }

    /// Reboot a brick running normal firmware into the bootloader.
    ///
    /// The device drops off the bus afterwards and re-enumerates with the
    /// bootloader product id; this session is then stale and should be
    /// closed.
    pub fn enter_firmware_update(&mut self) -> Result<(), LinkError> {
        self.link.request(Command::EnterFwUpdate, &[])?;
        Ok(())
    }

    /// Erase the whole flash chip without opening a download.
    pub fn erase_chip(&mut self) -> Result<(), LinkError> {
        self.link.request(Command::ChipErase, &[])?;
        Ok(())
    }

    /// Write a firmware image: erase, download in chunks, verify the
    /// checksum, restart into the new firmware.
    ///
    /// Progress is reported through the observer; the returned session
    /// carries the final byte count and checksum.
    pub fn write_firmware(&mut self, image: &[u8]) -> Result<TransferSession, TransferError> {
        let observer = self.link.observer().clone();
        observer.on_event(&UpgradeEvent::TransferStarted);

        match run_transfer(&mut self.link, image) {
            Ok(session) => {
                observer.on_event(&UpgradeEvent::TransferEnded);
                Ok(session)
            }
            Err(e) => {
                observer.on_event(&UpgradeEvent::TransferFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Close the session, dropping the transport.
    pub fn close(self) {
        let observer = self.link.observer().clone();
        observer.on_event(&UpgradeEvent::Disconnected { error: None });
        drop(self.link.into_transport());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::MockTransport;

    fn mock_session(
        mock: MockTransport,
    ) -> UpgradeSession<MockTransport, NullObserver> {
        let config = SessionConfig {
            reply_timeout_ms: 50,
            ..SessionConfig::default()
        };
        UpgradeSession::with_transport(mock, Arc::new(NullObserver), &config)
    }

    #[test]
    fn test_firmware_version_parsing() {
        let mock = MockTransport::new();
        // Body from byte 6: 00 06 00 00 -> HW 6 (BE at 6), FW 0 (BE at 8).
        mock.queue_reply(0, Command::GetVersion, &[0x00, 0x06, 0x00, 0x00]);
        let mut session = mock_session(mock);

        let version = session.firmware_version().unwrap();
        assert_eq!(
            version,
            FirmwareVersion {
                hardware: 6,
                firmware: 0
            }
        );
        assert_eq!(version.to_string(), "HW 6, FW 0");
    }

    #[test]
    fn test_firmware_version_short_reply() {
        let mock = MockTransport::new();
        mock.queue_reply(0, Command::GetVersion, &[0x00]);
        let mut session = mock_session(mock);

        let err = session.firmware_version().unwrap_err();
        assert!(matches!(
            err,
            LinkError::Frame(FrameError::TooShort { expected: 10, .. })
        ));
    }

    #[test]
    fn test_enter_firmware_update() {
        let mock = MockTransport::new();
        mock.queue_reply(0, Command::EnterFwUpdate, &[0x00]);
        let mut session = mock_session(mock);

        session.enter_firmware_update().unwrap();
    }

    #[test]
    fn test_erase_chip_frame() {
        let mock = MockTransport::new();
        mock.queue_reply(0, Command::ChipErase, &[0x00]);
        let mut session = mock_session(mock);

        session.erase_chip().unwrap();
        let frames = session.link.into_transport().sent_frames();
        assert_eq!(frames, vec![vec![0x04, 0x00, 0x00, 0x00, 0x01, 0xF3]]);
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.vendor_id, 0x0694);
        assert_eq!(config.product_id, 0x0006);
        assert_eq!(config.reply_timeout_ms, 5000);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = SessionConfig {
            vendor_id: 0x1234,
            product_id: 0x5678,
            reply_timeout_ms: 250,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.vendor_id, 0x1234);
        assert_eq!(parsed.product_id, 0x5678);
        assert_eq!(parsed.reply_timeout_ms, 250);
    }
}
