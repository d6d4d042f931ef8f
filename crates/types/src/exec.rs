//! On-disk executable layout.
//!
//! ```text
//! offset 0                      ExecHeader (20 bytes)
//! offset 20                     ExecSegment * nsegments (12 bytes each)
//! offset header.offset * PAGE   page data for pages [base, base + size)
//! ```
//!
//! All fields are little-endian `u32`. Page numbers are absolute, so the
//! first page of the virtual range is `VIRT_BASE / PAGE_SIZE`.

use alloc::vec::Vec;

use crate::error::{AbiError, ensure_len};
use crate::mmu::{PAGE_SIZE, Prot};
use crate::{read_u32, write_u32};

/// Maximum number of segments an executable may declare.
pub const MAX_SEGMENTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecHeader {
    /// First file-backed page (absolute page number).
    pub base: u32,
    /// Location of the page data in the file, in pages.
    pub offset: u32,
    /// Number of file-backed pages.
    pub size: u32,
    pub nsegments: u32,
    /// Initial instruction pointer.
    pub start: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSegment {
    /// First virtual page (absolute page number).
    pub first: u32,
    pub npages: u32,
    pub prot: Prot,
}

impl ExecHeader {
    pub const ENCODED_LEN: usize = 20;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        write_u32(&mut buf, 0, self.base);
        write_u32(&mut buf, 4, self.offset);
        write_u32(&mut buf, 8, self.size);
        write_u32(&mut buf, 12, self.nsegments);
        write_u32(&mut buf, 16, self.start);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AbiError> {
        ensure_len(buf, Self::ENCODED_LEN)?;
        let header = Self {
            base: read_u32(buf, 0),
            offset: read_u32(buf, 4),
            size: read_u32(buf, 8),
            nsegments: read_u32(buf, 12),
            start: read_u32(buf, 16),
        };
        if header.nsegments as usize > MAX_SEGMENTS {
            return Err(AbiError::TooManySegments(header.nsegments));
        }
        Ok(header)
    }

    /// Total bytes taken by the header and its segment table.
    pub fn table_len(&self) -> usize {
        Self::ENCODED_LEN + self.nsegments as usize * ExecSegment::ENCODED_LEN
    }

    /// File offset holding absolute page `page`, if the page is file-backed.
    pub fn file_offset(&self, page: u32) -> Option<u64> {
        if page < self.base || page - self.base >= self.size {
            return None;
        }
        Some((self.offset as u64 + (page - self.base) as u64) * PAGE_SIZE as u64)
    }
}

impl ExecSegment {
    pub const ENCODED_LEN: usize = 12;

    pub fn contains(&self, page: u32) -> bool {
        page >= self.first && page - self.first < self.npages
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        write_u32(&mut buf, 0, self.first);
        write_u32(&mut buf, 4, self.npages);
        write_u32(&mut buf, 8, self.prot.bits());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AbiError> {
        ensure_len(buf, Self::ENCODED_LEN)?;
        Ok(Self {
            first: read_u32(buf, 0),
            npages: read_u32(buf, 4),
            prot: Prot::from_bits(read_u32(buf, 8)),
        })
    }
}

/// Parse the header and segment table at the start of an executable image.
pub fn decode_table(buf: &[u8]) -> Result<(ExecHeader, Vec<ExecSegment>), AbiError> {
    let header = ExecHeader::decode(buf)?;
    ensure_len(buf, header.table_len())?;
    let segments = (0..header.nsegments as usize)
        .map(|i| {
            let at = ExecHeader::ENCODED_LEN + i * ExecSegment::ENCODED_LEN;
            ExecSegment::decode(&buf[at..])
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((header, segments))
}

/// Serialize a header and its segment table.
pub fn encode_table(header: &ExecHeader, segments: &[ExecSegment]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header.table_len());
    out.extend_from_slice(&header.encode());
    for segment in segments {
        out.extend_from_slice(&segment.encode());
    }
    out
}
