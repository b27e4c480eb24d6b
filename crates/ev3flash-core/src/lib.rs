//! EV3 firmware-recovery protocol implementation in Rust.
//!
//! Host-side driver for reflashing a LEGO MINDSTORMS EV3 brick over its HID
//! bootloader: query the version, erase and reprogram flash with a firmware
//! image, verify it with a CRC-32, and restart into the new firmware.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Frame layout, command codes, reply status codes
//! - **Transport**: HID report channel abstraction (hidapi, mock)
//! - **Link**: Pairs each sent command with its reply
//! - **Flasher**: Firmware-transfer state machine
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Per-connection orchestrator
//!
//! # Example
//!
//! ```no_run
//! use ev3flash_core::session::{SessionConfig, UpgradeSession};
//!
//! let config = SessionConfig::default();
//! let mut session = UpgradeSession::open(&config).expect("no bootloader device");
//!
//! let image = std::fs::read("firmware.bin").expect("image");
//! session.write_firmware(&image).expect("flash failed");
//! session.close();
//! ```

pub mod checksum;
pub mod events;
pub mod flasher;
pub mod link;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use checksum::crc32;
pub use events::{
    NullObserver, ProgressStage, TracingObserver, TransferPhase, UpgradeEvent, UpgradeObserver,
};
pub use flasher::{CHUNK_SIZE, TransferError, TransferSession};
pub use link::{CommandLink, LinkError};
pub use protocol::{Command, FrameError, MessageType, ReplyFrame, ReplyStatus};
pub use session::{FirmwareVersion, SessionConfig, UpgradeSession};
pub use transport::{HidDeviceTransport, HidTransport, MockTransport, TransportError};
