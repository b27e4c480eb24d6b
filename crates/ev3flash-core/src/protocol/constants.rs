//! Protocol constants for the EV3 bootloader HID protocol.
//!
//! Values taken from the brick's system-command documentation; the recovery
//! command set (0xF0..0xF6) is only accepted while the brick runs its
//! bootloader ("updating..." screen).

use std::fmt;

// ============================================================================
// Device Identification
// ============================================================================

/// LEGO Group Vendor ID.
pub const LEGO_VENDOR_ID: u16 = 0x0694;

/// EV3 brick running normal firmware.
pub const EV3_PRODUCT_ID: u16 = 0x0005;

/// EV3 brick in firmware-update (bootloader) mode.
pub const EV3_BOOTLOADER_PRODUCT_ID: u16 = 0x0006;

// ============================================================================
// Frame Layout
// ============================================================================

/// HID report id used for both directions.
pub const REPORT_ID: u8 = 0x00;

/// Bytes in a frame before the payload (length + sequence + type + command).
pub const FRAME_HEADER_SIZE: usize = 6;

/// Payload ceiling per frame; one chunk of firmware fits in one frame.
pub const MAX_PAYLOAD_SIZE: usize = 1018;

/// Largest frame the device will exchange (header + full payload).
pub const MAX_FRAME_SIZE: usize = FRAME_HEADER_SIZE + MAX_PAYLOAD_SIZE;

// ============================================================================
// Message Types
// ============================================================================

/// Frame message type (offset 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Host command expecting a reply.
    SystemCommandReply = 0x01,
    /// Host command with no reply.
    SystemCommandNoReply = 0x81,
    /// Device reply.
    SystemReply = 0x03,
    /// Device reply signalling an error; byte 6 carries the status code.
    SystemReplyError = 0x05,
}

impl MessageType {
    /// Decode a raw message-type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::SystemCommandReply),
            0x81 => Some(Self::SystemCommandNoReply),
            0x03 => Some(Self::SystemReply),
            0x05 => Some(Self::SystemReplyError),
            _ => None,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// System commands consumed by this crate.
///
/// The recovery subset drives the reflash sequence; `EnterFwUpdate` is the
/// one non-recovery command, sent to a brick running normal firmware to
/// reboot it into the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Reboot a running brick into firmware-update mode.
    EnterFwUpdate = 0xA0,
    /// Erase flash and open a download for the given address/size range.
    BeginDownloadWithErase = 0xF0,
    /// Open a download without erasing first.
    BeginDownload = 0xF1,
    /// One chunk of image data for the open download.
    DownloadData = 0xF2,
    /// Erase the whole chip without starting a download.
    ChipErase = 0xF3,
    /// Leave the bootloader and start the application image.
    StartApp = 0xF4,
    /// Ask the device for the checksum of a flash range.
    GetChecksum = 0xF5,
    /// Query hardware and firmware version ids.
    GetVersion = 0xF6,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::EnterFwUpdate => "ENTER_FW_UPDATE",
            Command::BeginDownloadWithErase => "BEGIN_DOWNLOAD_WITH_ERASE",
            Command::BeginDownload => "BEGIN_DOWNLOAD",
            Command::DownloadData => "DOWNLOAD_DATA",
            Command::ChipErase => "CHIP_ERASE",
            Command::StartApp => "START_APP",
            Command::GetChecksum => "GET_CHECKSUM",
            Command::GetVersion => "GET_VERSION",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        for raw in [0x01u8, 0x81, 0x03, 0x05] {
            let mt = MessageType::from_u8(raw).unwrap();
            assert_eq!(mt as u8, raw);
        }
        assert!(MessageType::from_u8(0x02).is_none());
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::BeginDownloadWithErase as u8, 0xF0);
        assert_eq!(Command::DownloadData as u8, 0xF2);
        assert_eq!(Command::GetVersion as u8, 0xF6);
        assert_eq!(Command::EnterFwUpdate as u8, 0xA0);
    }
}
