//! Command frame encoding and acknowledgement checks.
//!
//! Frame layout (16 or 512 bytes):
//!
//! | bytes | content                                   |
//! |-------|-------------------------------------------|
//! | 0..3  | `"cmd"`                                   |
//! | 3     | op character (`t`, `c`, `W`, `s`)         |
//! | 4..8  | target offset, big-endian u32             |
//! | 8..12 | length in 512-byte blocks, big-endian u32 |
//! | rest  | zero                                      |

use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame too short: expected at least {expected}, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
    #[error("Invalid frame tag: {0:02X?}")]
    BadTag([u8; 3]),
    #[error("Unknown op: 0x{0:02X}")]
    UnknownOp(u8),
}

/// On-wire frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    /// 16-byte frame used for commands without a response payload.
    Short,
    /// 512-byte frame used for the initial liveness exchange.
    Full,
}

impl FrameSize {
    pub const fn len(self) -> usize {
        match self {
            FrameSize::Short => SHORT_FRAME_LEN,
            FrameSize::Full => FULL_FRAME_LEN,
        }
    }
}

/// Host-to-device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Liveness test, answered with `cmdr`.
    Test,
    /// Fill (erase) `blocks` 512-byte blocks starting at `offset`.
    Fill { offset: u32, blocks: u32 },
    /// Announce a write of `blocks` blocks at `offset`; raw data follows.
    Write { offset: u32, blocks: u32 },
    /// Simulate cartridge boot (PIF boot).
    Boot,
}

impl Command {
    pub const fn op(&self) -> u8 {
        match self {
            Command::Test => OP_TEST,
            Command::Fill { .. } => OP_FILL,
            Command::Write { .. } => OP_WRITE,
            Command::Boot => OP_BOOT,
        }
    }

    fn params(&self) -> Option<(u32, u32)> {
        match *self {
            Command::Fill { offset, blocks } | Command::Write { offset, blocks } => {
                Some((offset, blocks))
            }
            Command::Test | Command::Boot => None,
        }
    }

    /// Encode into `buf`, zeroing everything the frame does not use.
    ///
    /// `buf` must be at least [`SHORT_FRAME_LEN`] bytes.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf.fill(0);
        buf[..OP_OFFSET].copy_from_slice(CMD_TAG);
        buf[OP_OFFSET] = self.op();
        if let Some((offset, blocks)) = self.params() {
            BigEndian::write_u32(
                &mut buf[PARAM_OFFSET_OFFSET..PARAM_OFFSET_OFFSET + 4],
                offset,
            );
            BigEndian::write_u32(
                &mut buf[PARAM_LENGTH_OFFSET..PARAM_LENGTH_OFFSET + 4],
                blocks,
            );
        }
    }

    pub fn encode(&self, size: FrameSize) -> Vec<u8> {
        let mut buf = vec![0u8; size.len()];
        self.encode_into(&mut buf);
        buf
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < SHORT_FRAME_LEN {
            return Err(ProtocolError::FrameTooShort {
                expected: SHORT_FRAME_LEN,
                actual: frame.len(),
            });
        }

        let tag = [frame[0], frame[1], frame[2]];
        if &tag != CMD_TAG {
            return Err(ProtocolError::BadTag(tag));
        }

        let offset = BigEndian::read_u32(&frame[PARAM_OFFSET_OFFSET..PARAM_OFFSET_OFFSET + 4]);
        let blocks = BigEndian::read_u32(&frame[PARAM_LENGTH_OFFSET..PARAM_LENGTH_OFFSET + 4]);

        match frame[OP_OFFSET] {
            OP_TEST => Ok(Command::Test),
            OP_FILL => Ok(Command::Fill { offset, blocks }),
            OP_WRITE => Ok(Command::Write { offset, blocks }),
            OP_BOOT => Ok(Command::Boot),
            other => Err(ProtocolError::UnknownOp(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Test => write!(f, "test"),
            Command::Fill { offset, blocks } => {
                write!(f, "fill(0x{offset:08X}, {blocks} blocks)")
            }
            Command::Write { offset, blocks } => {
                write!(f, "write(0x{offset:08X}, {blocks} blocks)")
            }
            Command::Boot => write!(f, "boot"),
        }
    }
}

/// Response byte 3 was not the ready acknowledgement.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unexpected response byte {got} (expected {})", ACK_READY)]
pub struct AckMismatch {
    pub got: u8,
}

/// Check that a response carries the ready acknowledgement at byte 3.
///
/// Responses shorter than four bytes are judged on a zero byte, the same as
/// an untouched receive buffer.
pub fn check_ack(response: &[u8]) -> Result<(), AckMismatch> {
    let got = response.get(OP_OFFSET).copied().unwrap_or(0);
    if got == ACK_READY {
        Ok(())
    } else {
        Err(AckMismatch { got })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_frame_layout() {
        let frame = Command::Write {
            offset: ROM_BASE_ADDRESS,
            blocks: 0x880,
        }
        .encode(FrameSize::Short);

        assert_eq!(frame.len(), 16);
        assert_eq!(
            &frame[..12],
            &[b'c', b'm', b'd', b'W', 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x80]
        );
        assert!(frame[12..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_full_test_frame_is_zero_padded() {
        let frame = Command::Test.encode(FrameSize::Full);
        assert_eq!(frame.len(), 512);
        assert_eq!(&frame[..4], b"cmdt");
        assert!(frame[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_into_clears_previous_contents() {
        let mut buf = [0xAAu8; SHORT_FRAME_LEN];
        Command::Boot.encode_into(&mut buf);
        assert_eq!(&buf[..4], b"cmds");
        assert!(buf[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_round_trip() {
        let commands = [
            Command::Test,
            Command::Boot,
            Command::Fill {
                offset: ROM_BASE_ADDRESS,
                blocks: 0x808,
            },
            Command::Write {
                offset: ROM_BASE_ADDRESS,
                blocks: 0x880,
            },
        ];
        for cmd in commands {
            for size in [FrameSize::Short, FrameSize::Full] {
                assert_eq!(Command::decode(&cmd.encode(size)).unwrap(), cmd);
            }
        }
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert_eq!(
            Command::decode(b"cmdt"),
            Err(ProtocolError::FrameTooShort {
                expected: 16,
                actual: 4
            })
        );

        let mut frame = Command::Test.encode(FrameSize::Short);
        frame[0] = b'x';
        assert_eq!(
            Command::decode(&frame),
            Err(ProtocolError::BadTag(*b"xmd"))
        );

        let mut frame = Command::Test.encode(FrameSize::Short);
        frame[3] = b'?';
        assert_eq!(Command::decode(&frame), Err(ProtocolError::UnknownOp(b'?')));
    }

    #[test]
    fn test_check_ack() {
        assert!(check_ack(b"cmdr").is_ok());
        assert_eq!(check_ack(b"cmdx"), Err(AckMismatch { got: b'x' }));
        assert_eq!(check_ack(b"cm"), Err(AckMismatch { got: 0 }));
        assert_eq!(
            AckMismatch { got: b'x' }.to_string(),
            "Unexpected response byte 120 (expected 114)"
        );
    }
}
