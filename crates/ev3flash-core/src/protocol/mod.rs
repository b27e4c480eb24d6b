//! Protocol module - frame layout, commands, and status codes.

pub mod constants;
pub mod frame;
pub mod status;

pub use constants::{Command, MessageType};
pub use constants::{
    EV3_BOOTLOADER_PRODUCT_ID, EV3_PRODUCT_ID, FRAME_HEADER_SIZE, LEGO_VENDOR_ID, MAX_FRAME_SIZE,
    MAX_PAYLOAD_SIZE, REPORT_ID,
};
pub use frame::{FrameError, ReplyFrame, encode_command};
pub use status::ReplyStatus;
