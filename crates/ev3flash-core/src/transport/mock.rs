//! Mock HID transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};

use super::traits::{HidTransport, TransportError};
use crate::protocol::constants::{Command, MessageType};

/// Mock transport for unit testing link and transfer logic.
pub struct MockTransport {
    /// Queued inbound reports, returned in order on recv.
    reply_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured outbound reports as (report_id, frame) pairs.
    write_log: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    /// Whether the device is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            reply_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue a raw inbound report.
    pub fn queue_raw(&self, bytes: &[u8]) {
        self.reply_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue a well-formed reply frame with the given body (byte 6 onward).
    pub fn queue_reply(&self, sequence: u16, command: Command, body: &[u8]) {
        self.queue_frame(sequence, MessageType::SystemReply as u8, command as u8, body);
    }

    /// Queue a reply whose command byte differs from any request.
    pub fn queue_reply_for_raw_command(&self, sequence: u16, command: u8, body: &[u8]) {
        self.queue_frame(sequence, MessageType::SystemReply as u8, command, body);
    }

    /// Queue an error reply carrying a status byte.
    pub fn queue_error_reply(&self, sequence: u16, command: Command, status: u8) {
        self.queue_frame(
            sequence,
            MessageType::SystemReplyError as u8,
            command as u8,
            &[status],
        );
    }

    fn queue_frame(&self, sequence: u16, message_type: u8, command: u8, body: &[u8]) {
        let mut frame = Vec::with_capacity(6 + body.len());
        frame
            .write_u16::<LittleEndian>((4 + body.len()) as u16)
            .unwrap();
        frame.write_u16::<LittleEndian>(sequence).unwrap();
        frame.push(message_type);
        frame.push(command);
        frame.extend_from_slice(body);
        self.queue_raw(&frame);
    }

    /// Get all captured outbound frames (without report ids).
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Get the report ids used for outbound reports.
    pub fn sent_report_ids(&self) -> Vec<u8> {
        self.write_log.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HidTransport for MockTransport {
    fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log
            .lock()
            .unwrap()
            .push((report_id, data.to_vec()));
        Ok(())
    }

    fn recv_report(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.reply_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}
