//! Executables: a header, a segment table and file-backed page data, read on
//! demand as pages fault in.

use std::fmt;
use std::io;
use std::sync::Arc;

use types::exec::{decode_table, encode_table};
use types::{
    DEFAULT_VIRT_PAGES, ExecHeader, ExecSegment, MAX_SEGMENTS, PAGE_SIZE, Prot, page_number, virt_base_page, virt_top,
};

use crate::error::KernelError;

/// Random-access byte source an executable is read from. Short reads are
/// allowed; a read at or past the end returns 0.
pub trait ExecSource: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

impl ExecSource for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else { return Ok(0) };
        if start >= self.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

#[derive(Clone)]
pub struct Executable {
    name: String,
    header: ExecHeader,
    segments: Vec<ExecSegment>,
    source: Arc<dyn ExecSource>,
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("name", &self.name)
            .field("header", &self.header)
            .field("segments", &self.segments)
            .finish()
    }
}

impl Executable {
    /// Read the header and segment table from `source`.
    pub fn load(name: impl Into<String>, source: Arc<dyn ExecSource>) -> Result<Self, KernelError> {
        let mut table = vec![0u8; ExecHeader::ENCODED_LEN + MAX_SEGMENTS * ExecSegment::ENCODED_LEN];
        let mut filled = 0;
        while filled < table.len() {
            match source.read_at(filled as u64, &mut table[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) => return Err(KernelError::BadExecutable(err.to_string())),
            }
        }
        let (header, segments) = decode_table(&table[..filled])?;
        Ok(Self { name: name.into(), header, segments, source })
    }

    pub fn from_bytes(name: impl Into<String>, image: Vec<u8>) -> Result<Self, KernelError> {
        Self::load(name, Arc::new(image))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &ExecHeader {
        &self.header
    }

    pub fn segments(&self) -> &[ExecSegment] {
        &self.segments
    }

    pub fn entry(&self) -> u32 {
        self.header.start
    }

    /// The entry point and every segment must fit in a range of
    /// `virt_pages` pages.
    pub fn validate(&self, virt_pages: usize) -> Result<(), KernelError> {
        let first = virt_base_page();
        let end = first + virt_pages as u32;
        let entry_page = page_number(self.header.start);
        if self.header.start < types::VIRT_BASE || self.header.start >= virt_top(virt_pages) {
            return Err(KernelError::BadExecutable(format!(
                "{}: entry {:#x} outside the virtual range",
                self.name, self.header.start
            )));
        }
        for seg in &self.segments {
            if seg.first < first || seg.first.saturating_add(seg.npages) > end {
                return Err(KernelError::BadExecutable(format!(
                    "{}: segment at page {:#x} ({} pages) outside the virtual range",
                    self.name, seg.first, seg.npages
                )));
            }
        }
        if !self.segments.is_empty() && !self.segments.iter().any(|s| s.contains(entry_page)) {
            log::warn!("{}: entry {:#x} is not in any segment", self.name, self.header.start);
        }
        Ok(())
    }

    /// True if absolute page `page` has initial contents in the file.
    pub fn backs(&self, page: u32) -> bool {
        self.header.file_offset(page).is_some() && self.segments.iter().any(|s| s.contains(page))
    }

    /// Fill `frame` with the initial contents of absolute page `page`.
    /// Whatever the file does not provide is zero.
    pub fn read_page(&self, page: u32, frame: &mut [u8]) -> io::Result<usize> {
        frame.fill(0);
        let Some(offset) = self.header.file_offset(page) else { return Ok(0) };
        if !self.segments.iter().any(|s| s.contains(page)) {
            return Ok(0);
        }
        let mut filled = 0;
        while filled < frame.len() {
            match self.source.read_at(offset + filled as u64, &mut frame[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }
}

/// Lays out an executable image: the table on page 0, page data from page 1.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    start: u32,
    virt_pages: usize,
    segments: Vec<(ExecSegment, Vec<u8>)>,
}

impl ImageBuilder {
    pub fn new(start: u32) -> Self {
        Self { start, virt_pages: DEFAULT_VIRT_PAGES, segments: Vec::new() }
    }

    /// Size of the virtual range every segment must fit in.
    pub fn virt_pages(mut self, virt_pages: usize) -> Self {
        self.virt_pages = virt_pages;
        self
    }

    /// Add a segment starting at absolute page `first`, `npages` long, with
    /// `data` as its initial contents. Pages past `data` start zeroed.
    pub fn segment(mut self, first: u32, npages: u32, prot: Prot, data: &[u8]) -> Self {
        self.segments.push((ExecSegment { first, npages, prot }, data.to_vec()));
        self
    }

    pub fn build(&self) -> Result<Vec<u8>, KernelError> {
        if self.segments.len() > MAX_SEGMENTS {
            return Err(KernelError::BadExecutable(format!(
                "{} segments, at most {} allowed",
                self.segments.len(),
                MAX_SEGMENTS
            )));
        }
        let base = virt_base_page();
        let end = base as u64 + self.virt_pages as u64;
        let mut size = 0u32;
        for (seg, data) in &self.segments {
            if seg.first < base {
                return Err(KernelError::BadExecutable(format!(
                    "segment at page {:#x} below the virtual range",
                    seg.first
                )));
            }
            if seg.first as u64 + seg.npages as u64 > end {
                return Err(KernelError::BadExecutable(format!(
                    "segment at page {:#x} ({} pages) past the end of a {}-page virtual range",
                    seg.first, seg.npages, self.virt_pages
                )));
            }
            if data.len() > seg.npages as usize * PAGE_SIZE {
                return Err(KernelError::BadExecutable(format!(
                    "segment at page {:#x} holds more data than its {} pages",
                    seg.first, seg.npages
                )));
            }
            let data_pages = data.len().div_ceil(PAGE_SIZE) as u32;
            size = size.max(seg.first - base + data_pages);
        }
        let header = ExecHeader {
            base,
            offset: 1,
            size,
            nsegments: self.segments.len() as u32,
            start: self.start,
        };
        let segs: Vec<ExecSegment> = self.segments.iter().map(|(s, _)| *s).collect();
        let mut image = encode_table(&header, &segs);
        image.resize((1 + size as usize) * PAGE_SIZE, 0);
        for (seg, data) in &self.segments {
            let at = (1 + (seg.first - base) as usize) * PAGE_SIZE;
            image[at..at + data.len()].copy_from_slice(data);
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::VIRT_BASE;

    #[test]
    fn built_image_round_trips_through_load() {
        let base = virt_base_page();
        let image = ImageBuilder::new(VIRT_BASE)
            .segment(base, 1, Prot::READ | Prot::EXEC, &[1, 2, 3, 4])
            .segment(base + 2, 2, Prot::READ | Prot::WRITE, &[9; 10])
            .build()
            .unwrap();
        let exe = Executable::from_bytes("t", image).unwrap();
        assert_eq!(exe.entry(), VIRT_BASE);
        assert_eq!(exe.segments().len(), 2);
        assert_eq!(exe.header().size, 3);

        let mut frame = vec![0xffu8; PAGE_SIZE];
        exe.read_page(base, &mut frame).unwrap();
        assert_eq!(&frame[..5], &[1, 2, 3, 4, 0]);

        // Page between the segments is file-backed but not loadable.
        assert!(!exe.backs(base + 1));
        exe.read_page(base + 1, &mut frame).unwrap();
        assert!(frame.iter().all(|b| *b == 0));

        // Second page of the data segment lies past the file extent.
        assert!(!exe.backs(base + 3));
        assert!(exe.backs(base + 2));
    }

    #[test]
    fn truncated_file_reads_zero_padded() {
        let base = virt_base_page();
        let mut image = ImageBuilder::new(VIRT_BASE)
            .segment(base, 1, Prot::RWX, &[7; 100])
            .build()
            .unwrap();
        image.truncate(PAGE_SIZE + 50);
        let exe = Executable::from_bytes("short", image).unwrap();
        let mut frame = vec![0xffu8; PAGE_SIZE];
        assert_eq!(exe.read_page(base, &mut frame).unwrap(), 50);
        assert_eq!(frame[49], 7);
        assert_eq!(frame[50], 0);
    }

    #[test]
    fn segments_past_the_range_are_rejected() {
        let far = page_number(0x8000_0000);
        let err = ImageBuilder::new(0x8000_0000).segment(far, 1, Prot::RWX, &[1; 16]).build();
        assert!(matches!(err, Err(KernelError::BadExecutable(_))));

        let base = virt_base_page();
        let bss = ImageBuilder::new(VIRT_BASE).segment(base, 17, Prot::RWX, &[]).virt_pages(16).build();
        assert!(matches!(bss, Err(KernelError::BadExecutable(_))));
        let fits = ImageBuilder::new(VIRT_BASE).segment(base, 16, Prot::RWX, &[]).virt_pages(16).build();
        assert_eq!(fits.unwrap().len(), PAGE_SIZE);
    }

    #[test]
    fn entry_outside_range_is_rejected() {
        let image = ImageBuilder::new(0x1000).build().unwrap();
        let exe = Executable::from_bytes("bad", image).unwrap();
        assert!(matches!(exe.validate(16), Err(KernelError::BadExecutable(_))));
    }
}
