//! Transport that replays queued responses and records what was sent

use std::collections::VecDeque;

use errors::{DriveError, DriveResult};
use parking_lot::Mutex;

use super::Transport;
use crate::protocol::crc::crc16;

#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<DriveResult<Vec<u8>>>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw response bytes, CRC included
    pub fn push_response(&self, bytes: impl Into<Vec<u8>>) {
        self.responses.lock().push_back(Ok(bytes.into()));
    }

    /// Queue a response and append its CRC
    pub fn push_sealed(&self, bytes: &[u8]) {
        let mut reply = bytes.to_vec();
        reply.extend_from_slice(&crc16(bytes).to_le_bytes());
        self.push_response(reply);
    }

    pub fn push_error(&self, error: DriveError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.lock().len()
    }
}

impl Transport for ScriptedTransport {
    fn transmit_and_maybe_receive(
        &self,
        frame: &[u8],
        expect_response: bool,
    ) -> DriveResult<Vec<u8>> {
        self.sent.lock().push(frame.to_vec());
        if !expect_response {
            return Ok(Vec::new());
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(DriveError::Timeout("scripted transport".to_string())))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
