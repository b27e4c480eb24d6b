//! Command link - pairs each outbound command with its reply.
//!
//! One link per connected device. The link owns the transport and the
//! per-connection message counter; `&mut self` receivers keep exactly one
//! exchange in flight at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

use crate::events::{UpgradeEvent, UpgradeObserver};
use crate::protocol::constants::{Command, REPORT_ID};
use crate::protocol::frame::{FrameError, ReplyFrame, encode_command};
use crate::protocol::status::ReplyStatus;
use crate::transport::{HidTransport, TransportError};

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no reply to {command} within {waited_ms}ms")]
    NoReply { command: Command, waited_ms: u64 },

    #[error("command mismatch: reply carries 0x{received:02X}, sent 0x{sent:02X}")]
    CommandMismatch { sent: u8, received: u8 },

    #[error("device reported {status} for {command}")]
    Device {
        command: Command,
        status: ReplyStatus,
    },
}

/// Request/reply link over one HID report channel.
pub struct CommandLink<T: HidTransport, O: UpgradeObserver> {
    transport: T,
    observer: Arc<O>,
    /// Total messages sent on this connection. The wire sequence number is
    /// this value modulo 65536, taken before the increment.
    sent: u64,
    reply_timeout: Duration,
}

impl<T: HidTransport, O: UpgradeObserver> CommandLink<T, O> {
    /// Create a link around an opened transport.
    pub fn new(transport: T, observer: Arc<O>, reply_timeout: Duration) -> Self {
        Self {
            transport,
            observer,
            sent: 0,
            reply_timeout,
        }
    }

    /// Observer handle shared with the owning session.
    pub fn observer(&self) -> &Arc<O> {
        &self.observer
    }

    /// Total messages sent on this connection.
    pub fn messages_sent(&self) -> u64 {
        self.sent
    }

    /// Whether the underlying transport still considers itself connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Give the transport back, consuming the link.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send a command and, when `expect_reply`, wait for the matching reply.
    pub fn execute(
        &mut self,
        command: Command,
        payload: &[u8],
        expect_reply: bool,
    ) -> Result<Option<ReplyFrame>, LinkError> {
        let sequence = self.send_frame(command, payload)?;
        if expect_reply {
            self.await_reply(sequence, command).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Send a command and wait for its reply.
    pub fn request(&mut self, command: Command, payload: &[u8]) -> Result<ReplyFrame, LinkError> {
        let sequence = self.send_frame(command, payload)?;
        self.await_reply(sequence, command)
    }

    fn send_frame(&mut self, command: Command, payload: &[u8]) -> Result<u16, LinkError> {
        // Encoding validates the payload size; the transport is untouched on
        // a too-large payload.
        let sequence = (self.sent % 0x1_0000) as u16;
        let frame = encode_command(sequence, command, payload)?;
        self.sent += 1;

        debug!(command = %command, sequence, len = frame.len(), "Sending command");
        self.observer.on_event(&UpgradeEvent::Message {
            count: self.sent,
            in_flight: false,
        });
        self.transport.send_report(REPORT_ID, &frame)?;
        self.observer.on_event(&UpgradeEvent::Message {
            count: self.sent,
            in_flight: true,
        });
        Ok(sequence)
    }

    fn await_reply(&mut self, sequence: u16, command: Command) -> Result<ReplyFrame, LinkError> {
        let deadline = Instant::now() + self.reply_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::NoReply {
                    command,
                    waited_ms: self.reply_timeout.as_millis() as u64,
                });
            }

            let raw = match self.transport.recv_report(remaining) {
                Ok(raw) => raw,
                Err(TransportError::Timeout { .. }) => {
                    return Err(LinkError::NoReply {
                        command,
                        waited_ms: self.reply_timeout.as_millis() as u64,
                    });
                }
                Err(e) => return Err(LinkError::Transport(e)),
            };

            let reply = ReplyFrame::parse(&raw)?;

            // A report whose sequence number is not the one just sent is a
            // stale reply to an earlier exchange; skip it and keep waiting.
            if reply.sequence != sequence {
                debug!(
                    got = reply.sequence,
                    want = sequence,
                    "Discarding stale reply"
                );
                continue;
            }

            if reply.is_error() {
                let status = reply.status().unwrap_or(ReplyStatus::UnknownError);
                return Err(LinkError::Device { command, status });
            }

            if reply.command != command as u8 {
                return Err(LinkError::CommandMismatch {
                    sent: command as u8,
                    received: reply.command,
                });
            }

            trace!(sequence, len = raw.len(), "Reply matched");
            return Ok(reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::MockTransport;

    fn test_link(mock: MockTransport) -> CommandLink<MockTransport, NullObserver> {
        CommandLink::new(mock, Arc::new(NullObserver), Duration::from_millis(50))
    }

    #[test]
    fn test_sequence_numbers_monotonic() {
        let mock = MockTransport::new();
        // Replies for the exchanges that expect one (sequences 1 and 3).
        mock.queue_reply(1, Command::GetVersion, &[0x00]);
        mock.queue_reply(3, Command::GetVersion, &[0x00]);
        let mut link = test_link(mock);

        // Mixed expect_reply values; sequence numbers are assigned
        // regardless: 0, 1, 2, 3, 4.
        link.execute(Command::GetVersion, &[], false).unwrap();
        link.execute(Command::GetVersion, &[], true).unwrap();
        link.execute(Command::GetVersion, &[], false).unwrap();
        link.execute(Command::GetVersion, &[], true).unwrap();
        link.execute(Command::GetVersion, &[], false).unwrap();

        assert_eq!(link.messages_sent(), 5);
        let frames = link.into_transport().sent_frames();
        let sequences: Vec<u16> = frames
            .iter()
            .map(|f| u16::from_le_bytes([f[2], f[3]]))
            .collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_request_matches_reply() {
        let mock = MockTransport::new();
        mock.queue_reply(0, Command::GetVersion, &[0x00, 0x00, 0x06, 0x00, 0x06]);
        let mut link = test_link(mock);

        let reply = link.request(Command::GetVersion, &[]).unwrap();
        assert_eq!(reply.sequence, 0);
        assert_eq!(reply.command, Command::GetVersion as u8);
    }

    #[test]
    fn test_no_reply_times_out() {
        let mock = MockTransport::new();
        let mut link = test_link(mock);

        let err = link.request(Command::GetVersion, &[]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::NoReply {
                command: Command::GetVersion,
                ..
            }
        ));
    }

    #[test]
    fn test_command_mismatch() {
        let mock = MockTransport::new();
        mock.queue_reply_for_raw_command(0, Command::StartApp as u8, &[0x00]);
        let mut link = test_link(mock);

        let err = link.request(Command::GetVersion, &[]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::CommandMismatch {
                sent: 0xF6,
                received: 0xF4,
            }
        ));
    }

    #[test]
    fn test_stale_sequence_discarded() {
        let mock = MockTransport::new();
        // A leftover reply from a previous exchange, then the real one.
        mock.queue_reply(7, Command::GetVersion, &[0x00]);
        mock.queue_reply(0, Command::GetVersion, &[0x00]);
        let mut link = test_link(mock);

        let reply = link.request(Command::GetVersion, &[]).unwrap();
        assert_eq!(reply.sequence, 0);
    }

    #[test]
    fn test_device_error_reply() {
        let mock = MockTransport::new();
        mock.queue_error_reply(0, Command::BeginDownloadWithErase, 0x0A);
        let mut link = test_link(mock);

        let err = link
            .request(Command::BeginDownloadWithErase, &[0u8; 8])
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Device {
                command: Command::BeginDownloadWithErase,
                status: ReplyStatus::UnknownError,
            }
        ));
    }

    #[test]
    fn test_payload_too_large_never_sent() {
        let mock = MockTransport::new();
        let mut link = test_link(mock);

        let payload = vec![0u8; 1019];
        let err = link
            .execute(Command::DownloadData, &payload, true)
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Frame(FrameError::PayloadTooLarge { len: 1019 })
        ));
        assert!(link.into_transport().sent_frames().is_empty());
    }

    #[test]
    fn test_write_failure_surfaces() {
        let mock = MockTransport::new();
        mock.disconnect();
        let mut link = test_link(mock);

        let err = link.execute(Command::GetVersion, &[], false).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Transport(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_report_id_zero() {
        let mock = MockTransport::new();
        let mut link = test_link(mock);
        link.execute(Command::GetVersion, &[], false).unwrap();
        assert_eq!(link.into_transport().sent_report_ids(), vec![0x00]);
    }
}
