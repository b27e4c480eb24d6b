//! Firmware transfer state machine.
//!
//! Drives the ordered recovery sequence: erase + begin download, chunked
//! data download, checksum verification, restart into the new firmware.
//! Any step failure aborts the whole transfer; there is no resume.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::{debug, info};

use crate::checksum::crc32;
use crate::events::{ProgressStage, TransferPhase, UpgradeEvent, UpgradeObserver};
use crate::link::{CommandLink, LinkError};
use crate::protocol::constants::{Command, MAX_PAYLOAD_SIZE};
use crate::protocol::frame::{FrameError, ReplyFrame};
use crate::transport::HidTransport;

/// Bytes of image data per download frame.
pub const CHUNK_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Byte offset of the device checksum in a GET_CHECKSUM reply.
const CHECKSUM_REPLY_OFFSET: usize = 6;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("empty firmware image")]
    EmptyImage,

    #[error("firmware image too large: {len} bytes")]
    ImageTooLarge { len: usize },

    #[error("device command {step} failed: {source}")]
    Step { step: Command, source: LinkError },

    #[error("checksum mismatch: expected 0x{expected:08X}, device reported 0x{device:08X}")]
    ChecksumMismatch { expected: u32, device: u32 },
}

/// State of one firmware write.
///
/// Created per `write_firmware` call and never reused; a second write starts
/// a fresh session.
#[derive(Debug)]
pub struct TransferSession {
    expected_size: u32,
    expected_checksum: u32,
    bytes_sent: u32,
    phase: TransferPhase,
}

impl TransferSession {
    /// Size the device was told to expect, in bytes.
    pub fn expected_size(&self) -> u32 {
        self.expected_size
    }

    /// CRC-32 of the full image, computed before any bytes were sent.
    pub fn expected_checksum(&self) -> u32 {
        self.expected_checksum
    }

    /// Bytes acknowledged by the device so far.
    pub fn bytes_sent(&self) -> u32 {
        self.bytes_sent
    }

    /// Current phase.
    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    fn new(image: &[u8]) -> Result<Self, TransferError> {
        if image.is_empty() {
            return Err(TransferError::EmptyImage);
        }
        if image.len() > u32::MAX as usize {
            return Err(TransferError::ImageTooLarge { len: image.len() });
        }
        Ok(Self {
            expected_size: image.len() as u32,
            expected_checksum: crc32(image),
            bytes_sent: 0,
            phase: TransferPhase::Idle,
        })
    }

    fn goto(&mut self, phase: TransferPhase) {
        debug!(from = %self.phase, to = %phase, "Transfer phase");
        self.phase = phase;
    }
}

/// Run a complete firmware write over an open link.
///
/// Returns the finished session (phase `Complete`) or the first error; the
/// session moves to `Failed` on any step failure.
pub fn run_transfer<T: HidTransport, O: UpgradeObserver>(
    link: &mut CommandLink<T, O>,
    image: &[u8],
) -> Result<TransferSession, TransferError> {
    // Checksum and size are fixed before any transport activity.
    let mut session = TransferSession::new(image)?;
    let observer = link.observer().clone();
    let emit = |stage: ProgressStage, bytes_sent: Option<u32>, expected_size: Option<u32>| {
        observer.on_event(&UpgradeEvent::Progress {
            stage,
            bytes_sent,
            expected_size,
        });
    };

    info!(
        size = session.expected_size,
        checksum = %format!("{:08X}", session.expected_checksum),
        "Starting firmware transfer"
    );

    // Address 0 and image size, little-endian; the same pair is used to open
    // the download and to request the checksum of the written range.
    let mut range = [0u8; 8];
    LittleEndian::write_u32(&mut range[0..4], 0);
    LittleEndian::write_u32(&mut range[4..8], session.expected_size);

    // Erase flash and open the download. Erasing gives no progress feedback;
    // expect a delay before the reply.
    session.goto(TransferPhase::EraseAndBegin);
    emit(ProgressStage::DownloadWithEraseStart, None, None);
    step(link, &mut session, Command::BeginDownloadWithErase, &range)?;
    emit(ProgressStage::DownloadWithEraseEnd, None, None);

    // Stream the image in frame-sized chunks, in order. bytes_sent advances
    // only after the device acknowledged the chunk.
    session.goto(TransferPhase::WriteChunks);
    emit(ProgressStage::WriteStart, None, None);
    emit(
        ProgressStage::WriteProcess,
        Some(0),
        Some(session.expected_size),
    );
    for chunk in image.chunks(CHUNK_SIZE) {
        step(link, &mut session, Command::DownloadData, chunk)?;
        session.bytes_sent += chunk.len() as u32;
        emit(
            ProgressStage::WriteProcess,
            Some(session.bytes_sent),
            Some(session.expected_size),
        );
    }
    emit(ProgressStage::WriteEnd, Some(session.bytes_sent), None);

    // Ask the device for its own checksum of the written range and compare.
    session.goto(TransferPhase::Verify);
    emit(ProgressStage::VerifyStart, None, None);
    let reply = step(link, &mut session, Command::GetChecksum, &range)?;
    let device_checksum = read_checksum(&reply).map_err(|source| {
        session.goto(TransferPhase::Failed);
        TransferError::Step {
            step: Command::GetChecksum,
            source,
        }
    })?;
    if device_checksum != session.expected_checksum {
        session.goto(TransferPhase::Failed);
        return Err(TransferError::ChecksumMismatch {
            expected: session.expected_checksum,
            device: device_checksum,
        });
    }
    emit(ProgressStage::VerifyEnd, None, None);

    // Leave the bootloader and start the freshly written application.
    session.goto(TransferPhase::Restart);
    emit(ProgressStage::RestartStart, None, None);
    step(link, &mut session, Command::StartApp, &[])?;
    emit(ProgressStage::RestartEnd, None, None);

    session.goto(TransferPhase::Complete);
    info!(bytes = session.bytes_sent, "Firmware transfer complete");
    Ok(session)
}

fn step<T: HidTransport, O: UpgradeObserver>(
    link: &mut CommandLink<T, O>,
    session: &mut TransferSession,
    command: Command,
    payload: &[u8],
) -> Result<ReplyFrame, TransferError> {
    link.request(command, payload).map_err(|source| {
        session.goto(TransferPhase::Failed);
        TransferError::Step {
            step: command,
            source,
        }
    })
}

fn read_checksum(reply: &ReplyFrame) -> Result<u32, LinkError> {
    reply
        .read_u32_le(CHECKSUM_REPLY_OFFSET)
        .ok_or(LinkError::Frame(FrameError::TooShort {
            expected: CHECKSUM_REPLY_OFFSET + 4,
            actual: reply.as_bytes().len(),
        }))
}
