//! USB Transport layer abstraction.
//!
//! Defines the `Transport` trait for the byte link to the cartridge,
//! allowing different implementations (FTDI over nusb, mock).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Device busy: {0}")]
    Busy(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Endpoint 0x{address:02X} unavailable: {message}")]
    EndpointNotFound { address: u8, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport already closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking, timeout-bounded byte link to the device.
///
/// A read timeout surfaces as a short count; callers inspect the returned
/// length. A write timeout is an error ([`TransportError::Timeout`]).
/// Nothing here retries.
pub trait Transport {
    /// Set the per-call read and write timeouts.
    fn set_timeouts(&mut self, read: Duration, write: Duration);

    /// Write `data`, returning how many bytes went out.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read into `buf`, returning how many bytes were filled.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Release the device. Further I/O fails with [`TransportError::Closed`].
    fn close(&mut self) -> Result<(), TransportError>;

    fn vendor_id(&self) -> u16;

    fn product_id(&self) -> u16;
}
