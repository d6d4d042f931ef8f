//! Frame and TLB manager.
//!
//! Every process executes against the same live virtual range. A page of
//! that range is accessible only while a TLB entry maps it: mapping copies the
//! frame into the range and opens the page's protection, unmapping copies it
//! back (when dirty) and closes it again. Physical frames are plain byte
//! arrays owned here; the paging engine decides which page lives in which
//! frame.

use std::fmt;

use types::{PAGE_SIZE, Prot, VIRT_BASE, page_address, page_number, virt_base_page};
use vm::{Access, Bus, MemFault, Width};

pub type FrameNo = usize;

/// Protection change on an address the range does not cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectError {
    pub page: u32,
}

impl fmt::Display for ProtectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {:#x} lies outside the virtual range", self.page)
    }
}

/// The protected user-visible address range.
pub struct VirtualRange {
    bytes: Vec<u8>,
    prot: Vec<Prot>,
    dirty: Vec<bool>,
}

impl VirtualRange {
    pub fn new(virt_pages: usize) -> Self {
        Self {
            bytes: vec![0; virt_pages * PAGE_SIZE],
            prot: vec![Prot::NONE; virt_pages],
            dirty: vec![false; virt_pages],
        }
    }

    pub fn pages(&self) -> usize {
        self.prot.len()
    }

    pub fn top(&self) -> u32 {
        VIRT_BASE + self.bytes.len() as u32
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= VIRT_BASE && addr < self.top()
    }

    fn index(&self, vpage: u32) -> Option<usize> {
        let idx = vpage.checked_sub(virt_base_page())? as usize;
        (idx < self.prot.len()).then_some(idx)
    }

    pub fn protect(&mut self, vpage: u32, prot: Prot) -> Result<(), ProtectError> {
        let idx = self.index(vpage).ok_or(ProtectError { page: vpage })?;
        self.prot[idx] = prot;
        Ok(())
    }

    pub fn is_dirty(&self, vpage: u32) -> bool {
        self.index(vpage).is_some_and(|idx| self.dirty[idx])
    }

    fn page_bytes(&self, idx: usize) -> &[u8] {
        &self.bytes[idx * PAGE_SIZE..(idx + 1) * PAGE_SIZE]
    }

    fn page_bytes_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.bytes[idx * PAGE_SIZE..(idx + 1) * PAGE_SIZE]
    }

    /// Check that `len` bytes at `addr` all allow `access`. Returns the byte
    /// offset into the range, or the first offending address.
    fn check(&self, addr: u32, len: usize, access: Access) -> Result<usize, MemFault> {
        let need = match access {
            Access::Fetch => Prot::EXEC,
            Access::Load => Prot::READ,
            Access::Store => Prot::WRITE,
        };
        if len == 0 {
            return Ok(addr.wrapping_sub(VIRT_BASE) as usize);
        }
        let last = addr.checked_add(len as u32 - 1).ok_or(MemFault { addr, access })?;
        let mut page = page_number(addr);
        while page <= page_number(last) {
            let fault_at = if page == page_number(addr) { addr } else { page_address(page) };
            match self.index(page) {
                Some(idx) if self.prot[idx].contains(need) => {}
                _ => return Err(MemFault { addr: fault_at, access }),
            }
            page += 1;
        }
        Ok((addr - VIRT_BASE) as usize)
    }

    fn mark_dirty(&mut self, addr: u32, len: usize) {
        let first = page_number(addr);
        let last = page_number(addr + len.max(1) as u32 - 1);
        for page in first..=last {
            if let Some(idx) = self.index(page) {
                self.dirty[idx] = true;
            }
        }
    }

    /// Protection-checked read, as a user load would see it.
    pub fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), MemFault> {
        let at = self.check(addr, buf.len(), Access::Load)?;
        buf.copy_from_slice(&self.bytes[at..at + buf.len()]);
        Ok(())
    }

    /// Protection-checked write. Nothing is written unless every byte is
    /// writable.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), MemFault> {
        let at = self.check(addr, data.len(), Access::Store)?;
        self.bytes[at..at + data.len()].copy_from_slice(data);
        self.mark_dirty(addr, data.len());
        Ok(())
    }
}

impl Bus for VirtualRange {
    fn fetch(&mut self, addr: u32) -> Result<u32, MemFault> {
        let at = self.check(addr, 4, Access::Fetch)?;
        let b = &self.bytes[at..at + 4];
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn load(&mut self, addr: u32, width: Width) -> Result<u32, MemFault> {
        let n = width.bytes();
        let at = self.check(addr, n, Access::Load)?;
        let mut word = [0u8; 4];
        word[..n].copy_from_slice(&self.bytes[at..at + n]);
        Ok(u32::from_le_bytes(word))
    }

    fn store(&mut self, addr: u32, width: Width, value: u32) -> Result<(), MemFault> {
        let n = width.bytes();
        self.write(addr, &value.to_le_bytes()[..n])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub page: u32,
    pub frame: Option<FrameNo>,
    pub prot: Prot,
}

impl TlbEntry {
    const EMPTY: TlbEntry = TlbEntry { page: 0, frame: None, prot: Prot::NONE };
}

/// Physical frames, the software TLB and the live range they feed.
pub struct Mmu {
    range: VirtualRange,
    frames: Vec<Box<[u8]>>,
    tlb: Vec<TlbEntry>,
    hand: usize,
}

impl Mmu {
    pub fn new(virt_pages: usize, phys_frames: usize, tlb_entries: usize) -> Self {
        Self {
            range: VirtualRange::new(virt_pages),
            frames: (0..phys_frames).map(|_| vec![0u8; PAGE_SIZE].into_boxed_slice()).collect(),
            tlb: vec![TlbEntry::EMPTY; tlb_entries],
            hand: 0,
        }
    }

    pub fn range(&self) -> &VirtualRange {
        &self.range
    }

    pub fn range_mut(&mut self) -> &mut VirtualRange {
        &mut self.range
    }

    pub fn frame(&self, frame: FrameNo) -> &[u8] {
        &self.frames[frame]
    }

    pub fn frame_mut(&mut self, frame: FrameNo) -> &mut [u8] {
        &mut self.frames[frame]
    }

    pub fn entries(&self) -> &[TlbEntry] {
        &self.tlb
    }

    /// Round-robin replacement cursor.
    pub fn next_slot(&mut self) -> usize {
        let slot = self.hand;
        self.hand = (self.hand + 1) % self.tlb.len();
        slot
    }

    /// TLB slot currently mapping `vpage`.
    pub fn lookup(&self, vpage: u32) -> Option<usize> {
        self.tlb.iter().position(|e| e.frame.is_some() && e.page == vpage)
    }

    /// Install `vpage -> frame` in `slot`, evicting whatever the slot held.
    pub fn map(&mut self, slot: usize, vpage: u32, frame: FrameNo, prot: Prot) -> Result<(), ProtectError> {
        self.flush_slot(slot)?;
        let idx = self.range.index(vpage).ok_or(ProtectError { page: vpage })?;
        let src = &self.frames[frame];
        self.range.page_bytes_mut(idx).copy_from_slice(src);
        self.range.dirty[idx] = false;
        self.range.protect(vpage, prot)?;
        self.tlb[slot] = TlbEntry { page: vpage, frame: Some(frame), prot };
        log::trace!("tlb[{}] <- page {:#x} frame {} {}", slot, vpage, frame, prot);
        Ok(())
    }

    /// Drop the mapping of `vpage`, if any, writing it back first.
    pub fn unmap(&mut self, vpage: u32) -> Result<(), ProtectError> {
        match self.lookup(vpage) {
            Some(slot) => self.flush_slot(slot),
            None => Ok(()),
        }
    }

    /// Write every dirty mapped page back to its frame, keeping the mappings.
    pub fn sync_all(&mut self) {
        for entry in &self.tlb {
            let Some(frame) = entry.frame else { continue };
            let Some(idx) = self.range.index(entry.page) else { continue };
            if self.range.dirty[idx] {
                self.frames[frame].copy_from_slice(self.range.page_bytes(idx));
                self.range.dirty[idx] = false;
            }
        }
    }

    /// Write back and drop every mapping.
    pub fn flush_all(&mut self) -> Result<(), ProtectError> {
        for slot in 0..self.tlb.len() {
            self.flush_slot(slot)?;
        }
        Ok(())
    }

    fn flush_slot(&mut self, slot: usize) -> Result<(), ProtectError> {
        let entry = self.tlb[slot];
        let Some(frame) = entry.frame else { return Ok(()) };
        let idx = self.range.index(entry.page).ok_or(ProtectError { page: entry.page })?;
        if self.range.dirty[idx] {
            self.frames[frame].copy_from_slice(self.range.page_bytes(idx));
            self.range.dirty[idx] = false;
        }
        self.range.protect(entry.page, Prot::NONE)?;
        self.tlb[slot] = TlbEntry::EMPTY;
        Ok(())
    }

    pub fn mapped_count(&self) -> usize {
        self.tlb.iter().filter(|e| e.frame.is_some()).count()
    }

    /// No virtual page and no frame may be mapped by two entries, and exactly
    /// the mapped pages are accessible.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mapped: Vec<&TlbEntry> = self.tlb.iter().filter(|e| e.frame.is_some()).collect();
        for (i, a) in mapped.iter().enumerate() {
            for b in &mapped[i + 1..] {
                if a.page == b.page {
                    return Err(format!("page {:#x} mapped twice in the TLB", a.page));
                }
                if a.frame == b.frame {
                    return Err(format!("frame {:?} mapped twice in the TLB", a.frame));
                }
            }
        }
        for idx in 0..self.range.pages() {
            let page = virt_base_page() + idx as u32;
            let open = !self.range.prot[idx].is_none();
            if open != self.lookup(page).is_some() {
                return Err(format!("page {:#x} protection disagrees with the TLB", page));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P0: u32 = VIRT_BASE / PAGE_SIZE as u32;

    #[test]
    fn unmapped_page_faults() {
        let mut mmu = Mmu::new(4, 4, 4);
        let err = mmu.range_mut().load(VIRT_BASE + 8, Width::Word).unwrap_err();
        assert_eq!(err.addr, VIRT_BASE + 8);
    }

    #[test]
    fn map_copies_frame_and_flush_writes_back() {
        let mut mmu = Mmu::new(4, 4, 4);
        mmu.frame_mut(2)[0] = 0xab;
        mmu.map(0, P0 + 1, 2, Prot::RWX).unwrap();
        let addr = VIRT_BASE + PAGE_SIZE as u32;
        assert_eq!(mmu.range_mut().load(addr, Width::Byte).unwrap(), 0xab);

        mmu.range_mut().store(addr + 1, Width::Byte, 0xcd).unwrap();
        assert_eq!(mmu.frame(2)[1], 0, "write-back happens at flush");
        mmu.flush_all().unwrap();
        assert_eq!(mmu.frame(2)[1], 0xcd);
        assert!(mmu.range_mut().load(addr, Width::Byte).is_err());
        assert_eq!(mmu.mapped_count(), 0);
    }

    #[test]
    fn remapping_a_slot_evicts_its_page() {
        let mut mmu = Mmu::new(4, 4, 4);
        mmu.map(1, P0, 0, Prot::RWX).unwrap();
        mmu.range_mut().store(VIRT_BASE, Width::Word, 7).unwrap();
        mmu.map(1, P0 + 2, 1, Prot::RWX).unwrap();
        assert_eq!(mmu.lookup(P0), None);
        assert_eq!(mmu.lookup(P0 + 2), Some(1));
        assert_eq!(mmu.frame(0)[0], 7);
        mmu.check_invariants().unwrap();
    }

    #[test]
    fn store_spanning_into_closed_page_writes_nothing() {
        let mut mmu = Mmu::new(4, 4, 4);
        mmu.map(0, P0, 0, Prot::RWX).unwrap();
        let edge = VIRT_BASE + PAGE_SIZE as u32 - 2;
        let err = mmu.range_mut().store(edge, Width::Word, 0xffff_ffff).unwrap_err();
        assert_eq!(err.addr, VIRT_BASE + PAGE_SIZE as u32);
        assert_eq!(mmu.range_mut().load(edge, Width::Half).unwrap(), 0);
    }

    #[test]
    fn sync_keeps_mappings() {
        let mut mmu = Mmu::new(4, 4, 4);
        mmu.map(0, P0, 3, Prot::RWX).unwrap();
        mmu.range_mut().write(VIRT_BASE, b"hi").unwrap();
        assert!(mmu.range().is_dirty(P0));
        mmu.sync_all();
        assert_eq!(&mmu.frame(3)[..2], b"hi");
        assert!(!mmu.range().is_dirty(P0));
        assert_eq!(mmu.lookup(P0), Some(0));
    }

    #[test]
    fn round_robin_wraps() {
        let mut mmu = Mmu::new(4, 4, 4);
        let slots: Vec<usize> = (0..6).map(|_| mmu.next_slot()).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn execute_needs_exec_permission() {
        let mut mmu = Mmu::new(4, 4, 4);
        mmu.map(0, P0, 0, Prot::READ | Prot::WRITE).unwrap();
        assert!(mmu.range_mut().fetch(VIRT_BASE).is_err());
        assert!(mmu.range_mut().load(VIRT_BASE, Width::Word).is_ok());
    }
}
