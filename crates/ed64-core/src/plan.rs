//! Transfer planning and chunked reading of the ROM image.
//!
//! The device expects whole 64 KiB units, so the announced write length is
//! the file size rounded up to the next 0x10000 boundary and the data is
//! streamed in 0x8000-byte chunks.

use std::io::{self, ErrorKind, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::constants::{BLOCK_SIZE, CHUNK_SIZE, CRC_REGION_LEN, PAD_ALIGN};

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Image too large: {padded_len} bytes does not fit the length field")]
    TooLarge { padded_len: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Sizes derived once from the source length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    raw_len: u64,
    padded_len: u64,
    needs_fill: bool,
}

impl TransferPlan {
    pub fn new(raw_len: u64) -> Self {
        let padded_len = padded_length(raw_len);
        Self {
            raw_len,
            padded_len,
            needs_fill: padded_len < CRC_REGION_LEN,
        }
    }

    /// Plan for the file at `path`, sized from its metadata.
    pub fn for_file<P: AsRef<Path>>(path: P) -> Result<Self, PlanError> {
        let raw_len = std::fs::metadata(path)?.len();
        Ok(Self::new(raw_len))
    }

    pub fn raw_len(&self) -> u64 {
        self.raw_len
    }

    pub fn padded_len(&self) -> u64 {
        self.padded_len
    }

    /// Whether the CRC region must be filled before writing.
    pub fn needs_fill(&self) -> bool {
        self.needs_fill
    }

    pub fn chunk_count(&self) -> u64 {
        self.padded_len.div_ceil(CHUNK_SIZE as u64)
    }

    /// Length field of the write command, in 512-byte blocks.
    pub fn write_blocks(&self) -> Result<u32, PlanError> {
        u32::try_from(self.padded_len / BLOCK_SIZE).map_err(|_| PlanError::TooLarge {
            padded_len: self.padded_len,
        })
    }
}

/// Round `raw_len` up to the next multiple of 0x10000 (aligned sizes stay).
pub fn padded_length(raw_len: u64) -> u64 {
    if raw_len % PAD_ALIGN == 0 {
        raw_len
    } else {
        (raw_len / PAD_ALIGN) * PAD_ALIGN + PAD_ALIGN
    }
}

/// Length field of the fill command, in 512-byte blocks.
pub const fn fill_blocks() -> u32 {
    (CRC_REGION_LEN / BLOCK_SIZE) as u32
}

/// What the unread tail of a short chunk contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailFill {
    /// Zero the remainder.
    #[default]
    Zero,
    /// Leave whatever the previous chunk left in the buffer.
    Stale,
}

/// One chunk handed out by [`ChunkReader`].
#[derive(Debug)]
pub struct Chunk<'a> {
    pub index: u64,
    /// Bytes actually read from the source for this chunk.
    pub bytes_read: usize,
    /// Always `CHUNK_SIZE` bytes.
    pub data: &'a [u8],
}

/// Sequential, single-pass chunk producer over a reader.
///
/// Yields exactly `plan.chunk_count()` chunks into one reused buffer. Once
/// exhausted it stays exhausted.
pub struct ChunkReader<R: Read> {
    source: R,
    buffer: Vec<u8>,
    tail_fill: TailFill,
    next: u64,
    total: u64,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(source: R, plan: &TransferPlan, tail_fill: TailFill) -> Self {
        Self {
            source,
            buffer: vec![0u8; CHUNK_SIZE],
            tail_fill,
            next: 0,
            total: plan.chunk_count(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.total
    }

    /// Read the next chunk, or `None` once all chunks were produced.
    pub fn next_chunk(&mut self) -> io::Result<Option<Chunk<'_>>> {
        if self.is_done() {
            return Ok(None);
        }

        let bytes_read = self.fill()?;
        if bytes_read < CHUNK_SIZE && self.tail_fill == TailFill::Zero {
            self.buffer[bytes_read..].fill(0);
        }

        let index = self.next;
        self.next += 1;
        Ok(Some(Chunk {
            index,
            bytes_read,
            data: &self.buffer,
        }))
    }

    /// Read until the buffer is full or the source hits EOF.
    fn fill(&mut self) -> io::Result<usize> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.source.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_padding_invariants() {
        let sizes = (0..0x30000u64)
            .step_by(0x7FF)
            .chain([0, 1, 0xFFFF, 0x10000, 0x10001, 0x100000, 0x3FF_FFFF]);
        for n in sizes {
            let padded = padded_length(n);
            assert_eq!(padded % PAD_ALIGN, 0, "n = {n:#X}");
            assert!(padded >= n);
            assert!(padded - n < PAD_ALIGN, "n = {n:#X}");
            if n % PAD_ALIGN == 0 {
                assert_eq!(padded, n);
            }
        }
    }

    #[test]
    fn test_fill_boundary() {
        // 0x100FFF and 0x101000 both pad to 0x110000
        assert!(!TransferPlan::new(0x100FFF).needs_fill());
        assert!(!TransferPlan::new(0x101000).needs_fill());
        assert!(TransferPlan::new(0x100000 - 1).needs_fill());
        assert!(TransferPlan::new(0).needs_fill());

        for n in [0u64, 0x500, 0xFFFFF, 0x100000, 0x100FFF, 0x101000, 0x200000] {
            let plan = TransferPlan::new(n);
            assert_eq!(plan.needs_fill(), plan.padded_len() < 0x101000);
        }
    }

    #[test]
    fn test_one_mib_plan() {
        // Already aligned, and still inside the CRC region
        let plan = TransferPlan::new(0x100000);
        assert_eq!(plan.padded_len(), 0x100000);
        assert!(plan.needs_fill());
        assert_eq!(plan.write_blocks().unwrap(), 0x800);
    }

    #[test]
    fn test_just_over_one_mib_plan() {
        let plan = TransferPlan::new(0x100001);
        assert_eq!(plan.padded_len(), 0x110000);
        assert!(!plan.needs_fill());
        assert_eq!(plan.write_blocks().unwrap(), 0x880);
    }

    #[test]
    fn test_small_plan() {
        let plan = TransferPlan::new(0x500);
        assert_eq!(plan.padded_len(), 0x10000);
        assert!(plan.needs_fill());
        assert_eq!(plan.chunk_count(), 2);
        assert_eq!(fill_blocks(), 0x808);
    }

    #[test]
    fn test_chunk_counts() {
        let mut plan = TransferPlan::new(0x10000);
        assert_eq!(plan.chunk_count(), 2);
        plan.padded_len = 0x8000;
        assert_eq!(plan.chunk_count(), 1);
        assert_eq!(TransferPlan::new(0).chunk_count(), 0);
    }

    #[test]
    fn test_write_blocks_overflow() {
        let plan = TransferPlan::new(1u64 << 42);
        assert!(matches!(
            plan.write_blocks(),
            Err(PlanError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_chunk_reader_zero_tail() {
        let data = vec![0xAAu8; CHUNK_SIZE + 0x10];
        let plan = TransferPlan::new(data.len() as u64);
        let mut reader = ChunkReader::new(Cursor::new(data), &plan, TailFill::Zero);
        assert_eq!(reader.total(), 2);

        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c1.index, 0);
        assert_eq!(c1.bytes_read, CHUNK_SIZE);
        assert!(c1.data.iter().all(|&b| b == 0xAA));

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c2.index, 1);
        assert_eq!(c2.bytes_read, 0x10);
        assert_eq!(c2.data.len(), CHUNK_SIZE);
        assert!(c2.data[..0x10].iter().all(|&b| b == 0xAA));
        assert!(c2.data[0x10..].iter().all(|&b| b == 0));

        assert!(reader.next_chunk().unwrap().is_none());
        assert!(reader.is_done());
    }

    #[test]
    fn test_chunk_reader_stale_tail() {
        let mut data = vec![0x11u8; CHUNK_SIZE];
        data.extend_from_slice(&[0x22; 4]);
        let plan = TransferPlan::new(data.len() as u64);
        let mut reader = ChunkReader::new(Cursor::new(data), &plan, TailFill::Stale);

        reader.next_chunk().unwrap().unwrap();
        let last = reader.next_chunk().unwrap().unwrap();
        assert_eq!(last.bytes_read, 4);
        assert_eq!(&last.data[..4], &[0x22; 4]);
        assert!(last.data[4..].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_chunk_reader_past_eof() {
        // 0x500 bytes pad to 0x10000: the second chunk reads nothing
        let plan = TransferPlan::new(0x500);
        let mut reader = ChunkReader::new(Cursor::new(vec![7u8; 0x500]), &plan, TailFill::Zero);

        let first = reader.next_chunk().unwrap().unwrap();
        assert_eq!(first.bytes_read, 0x500);
        let second = reader.next_chunk().unwrap().unwrap();
        assert_eq!(second.bytes_read, 0);
        assert!(second.data.iter().all(|&b| b == 0));
        assert!(reader.next_chunk().unwrap().is_none());
    }
}
