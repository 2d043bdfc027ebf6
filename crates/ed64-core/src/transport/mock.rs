//! Mock transport for testing.

use std::collections::VecDeque;
use std::time::Duration;

use super::traits::{Transport, TransportError};
use crate::protocol::constants::{ED64_PRODUCT_ID, FTDI_VENDOR_ID};

/// Mock transport for unit testing session logic.
#[derive(Debug)]
pub struct MockTransport {
    /// Queued responses returned on read.
    responses: VecDeque<Vec<u8>>,
    /// Captured writes.
    write_log: Vec<Vec<u8>>,
    /// Zero-based index of the write call that should fail.
    fail_write_at: Option<usize>,
    /// Zero-based index of the write call that should time out.
    time_out_write_at: Option<usize>,
    fail_close: bool,
    closed: bool,
    timeouts: Option<(Duration, Duration)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            write_log: Vec::new(),
            fail_write_at: None,
            time_out_write_at: None,
            fail_close: false,
            closed: false,
            timeouts: None,
        }
    }

    /// Queue a response to be returned on the next read.
    pub fn queue_response(&mut self, bytes: &[u8]) {
        self.responses.push_back(bytes.to_vec());
    }

    /// Queue the device's ready acknowledgement.
    pub fn queue_ready(&mut self) {
        self.queue_response(b"cmdr");
    }

    /// Make the `index`-th write call (zero-based) fail.
    pub fn fail_write_at(&mut self, index: usize) {
        self.fail_write_at = Some(index);
    }

    /// Make the `index`-th write call (zero-based) time out.
    pub fn time_out_write_at(&mut self, index: usize) {
        self.time_out_write_at = Some(index);
    }

    pub fn fail_close(&mut self) {
        self.fail_close = true;
    }

    /// All captured writes, one entry per call.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.write_log
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn timeouts(&self) -> Option<(Duration, Duration)> {
        self.timeouts
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn set_timeouts(&mut self, read: Duration, write: Duration) {
        self.timeouts = Some((read, write));
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.fail_write_at == Some(self.write_log.len()) {
            self.fail_write_at = None;
            return Err(TransportError::WriteFailed("simulated failure".into()));
        }
        if self.time_out_write_at == Some(self.write_log.len()) {
            self.time_out_write_at = None;
            return Err(TransportError::Timeout { timeout_ms: 1500 });
        }
        self.write_log.push(data.to_vec());
        Ok(data.len())
    }

    /// Pops one queued response; an empty queue behaves like a timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let Some(response) = self.responses.pop_front() else {
            return Ok(0);
        };
        let n = response.len().min(buf.len());
        buf[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;
        if self.fail_close {
            return Err(TransportError::Io(std::io::Error::other("simulated close failure")));
        }
        Ok(())
    }

    fn vendor_id(&self) -> u16 {
        FTDI_VENDOR_ID
    }

    fn product_id(&self) -> u16 {
        ED64_PRODUCT_ID
    }
}
