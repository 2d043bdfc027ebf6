//! FTDI FIFO transport over nusb.
//!
//! The EverDrive-64 exposes its USB port through an FT245R. This backend
//! speaks to it directly with nusb (no libftdi):
//!
//! - interface 0, bulk OUT `0x02`, bulk IN `0x81`
//! - SIO reset after claiming the interface
//! - every IN packet carries two modem status bytes that are stripped here
//!
//! Key nusb 0.2 API patterns:
//! - `list_devices().wait()` for device enumeration
//! - `device.detach_and_claim_interface(n).wait()` to take over from `ftdi_sio`
//! - `interface.endpoint::<Bulk, In>(addr)?.reader(buf_size)` for buffered I/O

use std::io::{self, BufRead, ErrorKind, Write};
use std::time::{Duration, Instant};

use nusb::io::{EndpointRead, EndpointWrite};
use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{Transport, TransportError};
use crate::protocol::constants::*;

/// FTDI chip family, derived from `bcdDevice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipType {
    Am,
    Bm,
    Ft2232C,
    R,
    Ft2232H,
    Ft4232H,
    Ft232H,
    Ft230X,
    Unknown(u16),
}

impl ChipType {
    pub fn from_bcd_device(bcd: u16) -> Self {
        match bcd {
            0x0200 => ChipType::Am,
            0x0400 => ChipType::Bm,
            0x0500 => ChipType::Ft2232C,
            0x0600 => ChipType::R,
            0x0700 => ChipType::Ft2232H,
            0x0800 => ChipType::Ft4232H,
            0x0900 => ChipType::Ft232H,
            0x1000 => ChipType::Ft230X,
            other => ChipType::Unknown(other),
        }
    }
}

fn chip_id_shift(value: u8) -> u8 {
    ((value & 1) << 1)
        | ((value & 2) << 5)
        | ((value & 4) >> 2)
        | ((value & 8) << 4)
        | ((value & 16) >> 1)
        | ((value & 32) >> 1)
        | ((value & 64) >> 4)
        | ((value & 128) >> 2)
}

/// Decode the R-type chip id from EEPROM words 0x43 and 0x44 (raw bytes as
/// returned by the control transfer).
pub fn chip_id_from_eeprom(word_43: [u8; 2], word_44: [u8; 2]) -> u32 {
    let raw = [word_43[0], word_43[1], word_44[0], word_44[1]];
    let shuffled = raw.map(chip_id_shift);
    u32::from_be_bytes(shuffled) ^ 0xA5F0_F7D1
}

/// The chip id is only worth two EEPROM transfers when it will be logged.
pub fn chip_id_wanted(chip: ChipType, debug_enabled: bool) -> bool {
    debug_enabled && chip == ChipType::R
}

/// Strip the two modem status bytes from one IN packet.
fn packet_payload(packet: &[u8]) -> &[u8] {
    packet.get(FTDI_STATUS_LEN..).unwrap_or(&[])
}

/// Overall read deadline, or `None` when `timeout` is too large to add.
fn read_deadline(now: Instant, timeout: Duration) -> Option<Instant> {
    now.checked_add(timeout)
}

/// A status-only packet means the device has nothing more queued; stop
/// there once something was received.
fn read_drained(payload_len: usize, filled: usize) -> bool {
    payload_len == 0 && filled > 0
}

fn write_error(e: io::Error, timeout: Duration) -> TransportError {
    if e.kind() == ErrorKind::TimedOut {
        TransportError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        TransportError::WriteFailed(e.to_string())
    }
}

struct Link {
    interface: Interface,
    reader: EndpointRead<Bulk>,
    writer: EndpointWrite<Bulk>,
}

/// FTDI-backed transport.
pub struct FtdiTransport {
    link: Option<Link>,
    /// Payload bytes received but not yet handed to a caller.
    pending: Vec<u8>,
    read_timeout: Duration,
    write_timeout: Duration,
    chip: ChipType,
    vid: u16,
    pid: u16,
}

impl FtdiTransport {
    /// Open the first device matching `vid:pid`.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        let chip = ChipType::from_bcd_device(device_info.device_version());
        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            chip = ?chip,
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        // Fails when another process holds the interface.
        let interface = device
            .detach_and_claim_interface(FTDI_INTERFACE)
            .wait()
            .map_err(|e| TransportError::Busy(e.to_string()))?;

        let read_timeout = Duration::from_millis(USB_READ_TIMEOUT_MS);
        let write_timeout = Duration::from_millis(USB_WRITE_TIMEOUT_MS);

        interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: SIO_RESET_REQUEST,
                    value: SIO_RESET_SIO,
                    index: FTDI_CHANNEL_A,
                    data: &[],
                },
                write_timeout,
            )
            .wait()
            .map_err(|e| TransportError::OpenFailed(format!("SIO reset: {e}")))?;

        let mut reader = interface
            .endpoint::<Bulk, In>(FTDI_EP_IN)
            .map_err(|e| TransportError::EndpointNotFound {
                address: FTDI_EP_IN,
                message: e.to_string(),
            })?
            // One packet per transfer keeps status bytes at the front of
            // every buffer handed out by fill_buf().
            .reader(FTDI_PACKET_SIZE);
        reader.set_read_timeout(read_timeout);

        let mut writer = interface
            .endpoint::<Bulk, Out>(FTDI_EP_OUT)
            .map_err(|e| TransportError::EndpointNotFound {
                address: FTDI_EP_OUT,
                message: e.to_string(),
            })?
            .writer(CHUNK_SIZE);
        writer.set_write_timeout(write_timeout);

        info!(
            in_ep = %format!("0x{:02X}", FTDI_EP_IN),
            out_ep = %format!("0x{:02X}", FTDI_EP_OUT),
            "Device opened successfully"
        );

        Ok(Self {
            link: Some(Link {
                interface,
                reader,
                writer,
            }),
            pending: Vec::new(),
            read_timeout,
            write_timeout,
            chip,
            vid,
            pid,
        })
    }

    pub fn chip_type(&self) -> ChipType {
        self.chip
    }

    /// Read the chip id of an R-type part from its EEPROM.
    ///
    /// Returns `Ok(None)` for other chip families.
    pub fn read_chip_id(&self) -> Result<Option<u32>, TransportError> {
        if self.chip != ChipType::R {
            return Ok(None);
        }
        let word_43 = self.read_eeprom_word(0x43)?;
        let word_44 = self.read_eeprom_word(0x44)?;
        Ok(Some(chip_id_from_eeprom(word_43, word_44)))
    }

    fn read_eeprom_word(&self, address: u16) -> Result<[u8; 2], TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::Closed)?;
        let data = link
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: SIO_READ_EEPROM_REQUEST,
                    value: 0,
                    index: address,
                    length: 2,
                },
                self.read_timeout,
            )
            .wait()
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        match data.as_slice() {
            [lo, hi] => Ok([*lo, *hi]),
            other => Err(TransportError::ReadFailed(format!(
                "EEPROM word 0x{address:02X}: got {} bytes",
                other.len()
            ))),
        }
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl Transport for FtdiTransport {
    fn set_timeouts(&mut self, read: Duration, write: Duration) {
        self.read_timeout = read;
        self.write_timeout = write;
        if let Some(link) = self.link.as_mut() {
            link.reader.set_read_timeout(read);
            link.writer.set_write_timeout(write);
        }
    }

    /// Hands `data` to the bulk writer and waits for the transfer to
    /// complete. A stalled device ends in [`TransportError::Timeout`].
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let timeout = self.write_timeout;
        let link = self.link.as_mut().ok_or(TransportError::Closed)?;

        link.writer
            .write_all(data)
            .and_then(|()| link.writer.flush())
            .map_err(|e| write_error(e, timeout))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self, buf), fields(max_len = buf.len()))]
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut filled = self.take_pending(buf);
        let deadline = read_deadline(Instant::now(), self.read_timeout);

        while filled < buf.len() {
            // Without a deadline each packet wait gets the full timeout
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.read_timeout,
            };
            if remaining.is_zero() {
                break;
            }

            let link = self.link.as_mut().ok_or(TransportError::Closed)?;
            link.reader.set_read_timeout(remaining);

            let packet = match link.reader.fill_buf() {
                Ok(packet) => packet,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(TransportError::ReadFailed(e.to_string())),
            };
            let packet_len = packet.len();
            let payload = packet_payload(packet);
            let payload_len = payload.len();

            let n = payload.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&payload[..n]);
            self.pending.extend_from_slice(&payload[n..]);
            filled += n;

            link.reader.consume(packet_len);
            if read_drained(payload_len, filled) {
                break;
            }
        }

        if let Some(link) = self.link.as_mut() {
            link.reader.set_read_timeout(self.read_timeout);
        }

        debug!(bytes_read = filled, "Read complete");
        Ok(filled)
    }

    #[instrument(skip(self))]
    fn close(&mut self) -> Result<(), TransportError> {
        let mut link = self.link.take().ok_or(TransportError::Closed)?;
        link.writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        drop(link);
        info!("Device closed");
        Ok(())
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
