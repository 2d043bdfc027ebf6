//! Protocol constants for the EverDrive-64 USB link.

use std::time::Duration;

// ============================================================================
// Device Identification
// ============================================================================

/// FTDI vendor ID.
pub const FTDI_VENDOR_ID: u16 = 0x0403;
/// FT232R / FT245R product ID used by the EverDrive-64 USB port.
pub const ED64_PRODUCT_ID: u16 = 0x6001;

// ============================================================================
// FTDI endpoint layout
// ============================================================================

/// Interface number claimed on the FTDI chip.
pub const FTDI_INTERFACE: u8 = 0;
/// Bulk OUT endpoint (host -> device).
pub const FTDI_EP_OUT: u8 = 0x02;
/// Bulk IN endpoint (device -> host).
pub const FTDI_EP_IN: u8 = 0x81;
/// Max packet size of a full-speed FTDI bulk endpoint.
pub const FTDI_PACKET_SIZE: usize = 64;
/// Every IN packet starts with two modem status bytes.
pub const FTDI_STATUS_LEN: usize = 2;

/// Vendor request: reset the SIO port.
pub const SIO_RESET_REQUEST: u8 = 0x00;
/// Vendor request: read one EEPROM word.
pub const SIO_READ_EEPROM_REQUEST: u8 = 0x90;
/// `wValue` for a full SIO reset.
pub const SIO_RESET_SIO: u16 = 0;
/// `wIndex` addressing the first (only) FIFO channel.
pub const FTDI_CHANNEL_A: u16 = 1;

// ============================================================================
// Timeouts
// ============================================================================

pub const USB_READ_TIMEOUT_MS: u64 = 1500;
pub const USB_WRITE_TIMEOUT_MS: u64 = 1500;

/// Device-side erase latency after a fill command.
pub const FILL_SETTLE: Duration = Duration::from_secs(1);

// ============================================================================
// Frames
// ============================================================================

/// Every command frame starts with this tag.
pub const CMD_TAG: &[u8; 3] = b"cmd";

/// Byte offset of the op character.
pub const OP_OFFSET: usize = 3;
/// Byte offset of the first big-endian parameter (target offset).
pub const PARAM_OFFSET_OFFSET: usize = 4;
/// Byte offset of the second big-endian parameter (length in blocks).
pub const PARAM_LENGTH_OFFSET: usize = 8;

pub const SHORT_FRAME_LEN: usize = 16;
pub const FULL_FRAME_LEN: usize = 512;

// Op codes
pub const OP_TEST: u8 = b't';
pub const OP_FILL: u8 = b'c';
pub const OP_WRITE: u8 = b'W';
pub const OP_BOOT: u8 = b's';

/// Acknowledgement character expected at byte 3 of a response.
pub const ACK_READY: u8 = b'r';

// ============================================================================
// Memory layout
// ============================================================================

/// Start of the cartridge ROM window in device memory.
pub const ROM_BASE_ADDRESS: u32 = 0x1000_0000;

/// Length parameters are counted in 512-byte blocks.
pub const BLOCK_SIZE: u64 = 512;

/// Transfers are padded up to a multiple of this.
pub const PAD_ALIGN: u64 = 0x10000;

/// Size of the CRC-checked region at the start of the ROM (1 MiB + 4 KiB).
/// Images shorter than this leave part of it stale, so it gets filled first.
pub const CRC_REGION_LEN: u64 = 0x10_0000 + 0x1000;

/// Size of one USB data chunk.
pub const CHUNK_SIZE: usize = 0x8000;
