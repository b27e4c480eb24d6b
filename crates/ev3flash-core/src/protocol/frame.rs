//! Frame encoding and decoding.
//!
//! One frame per HID report, both directions:
//!
//! ```text
//! offset 0: u16 length          = 4 + payload length, little-endian
//! offset 2: u16 sequence        little-endian
//! offset 4: u8  message type
//! offset 5: u8  command
//! offset 6: payload (0..=1018 bytes)
//! ```
//!
//! The length field counts everything after itself. Inbound frames echo the
//! command byte at offset 5; byte 6 of an error reply is the status code.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{Command, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE, MessageType};
use super::status::ReplyStatus;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("payload too large: {len} bytes, ceiling is {MAX_PAYLOAD_SIZE}")]
    PayloadTooLarge { len: usize },
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// Encode an outbound command frame.
///
/// Fails with [`FrameError::PayloadTooLarge`] before anything is built when
/// the payload exceeds the 1018-byte ceiling.
pub fn encode_command(
    sequence: u16,
    command: Command,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge { len: payload.len() });
    }

    let length = (4 + payload.len()) as u16;
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.write_u16::<LittleEndian>(length).unwrap();
    buf.write_u16::<LittleEndian>(sequence).unwrap();
    buf.push(MessageType::SystemCommandReply as u8);
    buf.push(command as u8);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Parsed inbound frame.
///
/// Parsing only splits the header; judging the message type (error replies,
/// command echo) is the caller's business.
#[derive(Debug, Clone)]
pub struct ReplyFrame {
    /// Declared length (everything after the length field).
    pub length: u16,
    /// Sequence number echoed from the request.
    pub sequence: u16,
    /// Raw message-type byte (0x01/0x81/0x03/0x05).
    pub message_type: u8,
    /// Command byte echoed from the request.
    pub command: u8,
    raw: Vec<u8>,
}

impl ReplyFrame {
    /// Parse an inbound report into its header fields.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: FRAME_HEADER_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            length: u16::from_le_bytes([data[0], data[1]]),
            sequence: u16::from_le_bytes([data[2], data[3]]),
            message_type: data[4],
            command: data[5],
            raw: data.to_vec(),
        })
    }

    /// Whether the device flagged this reply as an error.
    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::SystemReplyError as u8
    }

    /// Status code at byte 6 (error replies carry it there).
    pub fn status(&self) -> Option<ReplyStatus> {
        self.raw.get(FRAME_HEADER_SIZE).map(|&b| ReplyStatus::from_u8(b))
    }

    /// Reply body: everything after the 6-byte header.
    pub fn body(&self) -> &[u8] {
        &self.raw[FRAME_HEADER_SIZE..]
    }

    /// Little-endian u32 at a fixed byte offset into the frame.
    pub fn read_u32_le(&self, offset: usize) -> Option<u32> {
        if self.raw.len() >= offset + 4 {
            let mut cursor = Cursor::new(&self.raw[offset..]);
            cursor.read_u32::<LittleEndian>().ok()
        } else {
            None
        }
    }

    /// Big-endian u16 at a fixed byte offset into the frame.
    ///
    /// The version reply is the one place the device answers big-endian.
    pub fn read_u16_be(&self, offset: usize) -> Option<u16> {
        if self.raw.len() >= offset + 2 {
            let mut cursor = Cursor::new(&self.raw[offset..]);
            cursor.read_u16::<BigEndian>().ok()
        } else {
            None
        }
    }

    /// Full raw frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_no_payload() {
        // GET_VERSION with sequence 0: length 4, LE fields.
        let frame = encode_command(0, Command::GetVersion, &[]).unwrap();
        assert_eq!(frame, [0x04, 0x00, 0x00, 0x00, 0x01, 0xF6]);
    }

    #[test]
    fn test_encode_with_payload() {
        let frame = encode_command(0x0102, Command::DownloadData, &[0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(
            frame,
            [0x07, 0x00, 0x02, 0x01, 0x01, 0xF2, 0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn test_encode_max_payload() {
        let payload = vec![0x55u8; MAX_PAYLOAD_SIZE];
        let frame = encode_command(7, Command::DownloadData, &payload).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + MAX_PAYLOAD_SIZE);
        // length field covers sequence + type + command + payload
        assert_eq!(
            u16::from_le_bytes([frame[0], frame[1]]) as usize,
            4 + MAX_PAYLOAD_SIZE
        );
    }

    #[test]
    fn test_encode_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = encode_command(0, Command::DownloadData, &payload).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { len: 1019 }));
    }

    #[test]
    fn test_roundtrip() {
        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let bytes = encode_command(42, Command::DownloadData, &payload).unwrap();
        let parsed = ReplyFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.length, 8);
        assert_eq!(parsed.sequence, 42);
        assert_eq!(parsed.message_type, MessageType::SystemCommandReply as u8);
        assert_eq!(parsed.command, Command::DownloadData as u8);
        assert_eq!(parsed.body(), &payload);
    }

    #[test]
    fn test_parse_version_reply() {
        // length 13, seq 0, SYSTEM_REPLY, GET_VERSION echo, then reply body.
        let bytes = [
            0x0D, 0x00, 0x00, 0x00, 0x03, 0xF6, 0x00, 0x06, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00,
            0x00,
        ];
        let reply = ReplyFrame::parse(&bytes).unwrap();
        assert_eq!(reply.length, 0x000D);
        assert_eq!(reply.command, 0xF6);
        assert!(!reply.is_error());
        // hardware id big-endian at offset 6, firmware id at offset 8
        assert_eq!(reply.read_u16_be(6), Some(0x0006));
        assert_eq!(reply.read_u16_be(8), Some(0x0000));
    }

    #[test]
    fn test_parse_error_reply() {
        let bytes = [0x05, 0x00, 0x03, 0x00, 0x05, 0xF0, 0x0A];
        let reply = ReplyFrame::parse(&bytes).unwrap();
        assert_eq!(reply.sequence, 3);
        assert!(reply.is_error());
        assert_eq!(reply.status(), Some(ReplyStatus::UnknownError));
    }

    #[test]
    fn test_parse_too_short() {
        let err = ReplyFrame::parse(&[0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::TooShort {
                expected: 6,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_read_u32_le() {
        // Checksum reply: u32 little-endian straight after the command echo.
        let bytes = [0x08, 0x00, 0x01, 0x00, 0x03, 0xF5, 0x78, 0x56, 0x34, 0x12];
        let reply = ReplyFrame::parse(&bytes).unwrap();
        assert_eq!(reply.read_u32_le(6), Some(0x1234_5678));
        assert_eq!(reply.read_u32_le(7), None);
    }
}
