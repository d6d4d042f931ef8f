//! Demand-paging bookkeeping: per-process page states, the frame table with
//! its clock hand, and the swap space on a block device.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use types::{BLOCK_SIZE, BLOCKS_PER_PAGE, PAGE_SIZE};

use crate::mmu::FrameNo;

/// Index of a page-sized slot in the swap space.
pub type SwapSlot = usize;

/// Where a virtual page of a process currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageState {
    /// Never touched: filled from the executable or with zeroes on first fault.
    #[default]
    Uninitialized,
    Valid { frame: FrameNo },
    OnDisk { slot: SwapSlot },
}

/// Owner of an allocated frame: a process table slot and a page index into
/// that process's virtual range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRef {
    pub proc: usize,
    pub page: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Free,
    /// Used since the clock hand last passed.
    Referenced(PageRef),
    /// Passed once by the clock hand; next in line for eviction.
    Unreferenced(PageRef),
    /// Being evicted or filled; the clock hand skips it.
    Pinned(PageRef),
}

impl FrameState {
    pub fn owner(&self) -> Option<PageRef> {
        match *self {
            FrameState::Free => None,
            FrameState::Referenced(r) | FrameState::Unreferenced(r) | FrameState::Pinned(r) => Some(r),
        }
    }
}

pub struct FrameTable {
    states: Vec<FrameState>,
    free: Vec<FrameNo>,
    hand: usize,
}

impl FrameTable {
    pub fn new(frames: usize) -> Self {
        Self {
            states: vec![FrameState::Free; frames],
            free: (0..frames).rev().collect(),
            hand: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn state(&self, frame: FrameNo) -> FrameState {
        self.states[frame]
    }

    /// Take a frame off the free list for `owner`.
    pub fn take_free(&mut self, owner: PageRef) -> Option<FrameNo> {
        let frame = self.free.pop()?;
        self.states[frame] = FrameState::Referenced(owner);
        Some(frame)
    }

    /// Run the clock until a frame that was not referenced since the last
    /// pass turns up. The victim comes back pinned, with its old owner. Gives
    /// up after two full revolutions.
    pub fn select_victim(&mut self) -> Option<(FrameNo, PageRef)> {
        let n = self.states.len();
        for _ in 0..2 * n {
            let frame = self.hand;
            self.hand = (self.hand + 1) % n;
            match self.states[frame] {
                FrameState::Free | FrameState::Pinned(_) => {}
                FrameState::Referenced(r) => self.states[frame] = FrameState::Unreferenced(r),
                FrameState::Unreferenced(r) => {
                    self.states[frame] = FrameState::Pinned(r);
                    return Some((frame, r));
                }
            }
        }
        None
    }

    /// Hand a pinned frame to its new owner.
    pub fn assign(&mut self, frame: FrameNo, owner: PageRef) {
        self.states[frame] = FrameState::Referenced(owner);
    }

    /// Mark a resident page as recently used.
    pub fn touch(&mut self, frame: FrameNo) {
        if let FrameState::Unreferenced(r) = self.states[frame] {
            self.states[frame] = FrameState::Referenced(r);
        }
    }

    pub fn release(&mut self, frame: FrameNo) {
        self.states[frame] = FrameState::Free;
        self.free.push(frame);
    }
}

/// A device of fixed-size blocks.
pub trait BlockStore: Send {
    fn nblocks(&self) -> usize;

    fn read_block(&mut self, index: usize, buf: &mut [u8]) -> io::Result<()>;

    fn write_block(&mut self, index: usize, buf: &[u8]) -> io::Result<()>;
}

fn check_block(index: usize, nblocks: usize, len: usize) -> io::Result<()> {
    if index >= nblocks {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("block {} out of range ({} blocks)", index, nblocks),
        ));
    }
    if len != BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("block buffer is {} bytes, expected {}", len, BLOCK_SIZE),
        ));
    }
    Ok(())
}

/// Block device held in memory.
pub struct RamDisk {
    data: Vec<u8>,
}

impl RamDisk {
    pub fn new(nblocks: usize) -> Self {
        Self { data: vec![0; nblocks * BLOCK_SIZE] }
    }
}

impl BlockStore for RamDisk {
    fn nblocks(&self) -> usize {
        self.data.len() / BLOCK_SIZE
    }

    fn read_block(&mut self, index: usize, buf: &mut [u8]) -> io::Result<()> {
        check_block(index, self.nblocks(), buf.len())?;
        buf.copy_from_slice(&self.data[index * BLOCK_SIZE..(index + 1) * BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&mut self, index: usize, buf: &[u8]) -> io::Result<()> {
        check_block(index, self.nblocks(), buf.len())?;
        self.data[index * BLOCK_SIZE..(index + 1) * BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

/// Block device backed by a host file. Blocks past the end of the file read
/// as zeroes.
pub struct FileDisk {
    file: File,
    nblocks: usize,
}

impl FileDisk {
    pub fn create(path: impl AsRef<Path>, nblocks: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        file.set_len((nblocks * BLOCK_SIZE) as u64)?;
        Ok(Self { file, nblocks })
    }
}

impl BlockStore for FileDisk {
    fn nblocks(&self) -> usize {
        self.nblocks
    }

    fn read_block(&mut self, index: usize, buf: &mut [u8]) -> io::Result<()> {
        check_block(index, self.nblocks, buf.len())?;
        self.file.seek(SeekFrom::Start((index * BLOCK_SIZE) as u64))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_block(&mut self, index: usize, buf: &[u8]) -> io::Result<()> {
        check_block(index, self.nblocks, buf.len())?;
        self.file.seek(SeekFrom::Start((index * BLOCK_SIZE) as u64))?;
        self.file.write_all(buf)
    }
}

/// Page-sized slots on a block device. Slot `n` occupies blocks
/// `n * BLOCKS_PER_PAGE ..`.
pub struct SwapSpace {
    store: Box<dyn BlockStore>,
    free: Vec<SwapSlot>,
    slots: usize,
}

impl SwapSpace {
    pub fn new(store: Box<dyn BlockStore>) -> Self {
        let slots = store.nblocks() / BLOCKS_PER_PAGE;
        Self { store, free: (0..slots).rev().collect(), slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn alloc(&mut self) -> Option<SwapSlot> {
        self.free.pop()
    }

    pub fn free(&mut self, slot: SwapSlot) {
        self.free.push(slot);
    }

    pub fn write_page(&mut self, slot: SwapSlot, page: &[u8]) -> io::Result<()> {
        for (i, chunk) in page[..PAGE_SIZE].chunks(BLOCK_SIZE).enumerate() {
            self.store.write_block(slot * BLOCKS_PER_PAGE + i, chunk)?;
        }
        Ok(())
    }

    pub fn read_page(&mut self, slot: SwapSlot, page: &mut [u8]) -> io::Result<()> {
        for (i, chunk) in page[..PAGE_SIZE].chunks_mut(BLOCK_SIZE).enumerate() {
            self.store.read_block(slot * BLOCKS_PER_PAGE + i, chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(page: usize) -> PageRef {
        PageRef { proc: 0, page }
    }

    #[test]
    fn free_frames_come_out_lowest_first() {
        let mut table = FrameTable::new(3);
        assert_eq!(table.take_free(owner(0)), Some(0));
        assert_eq!(table.take_free(owner(1)), Some(1));
        assert_eq!(table.free_count(), 1);
    }

    #[test]
    fn clock_gives_second_chance() {
        let mut table = FrameTable::new(3);
        for page in 0..3 {
            table.take_free(owner(page));
        }
        // First revolution clears every reference bit, second finds frame 0.
        let (frame, old) = table.select_victim().unwrap();
        assert_eq!(frame, 0);
        assert_eq!(old, owner(0));
        assert_eq!(table.state(0), FrameState::Pinned(owner(0)));

        // Touching frame 1 saves it; frame 2 goes next.
        table.assign(0, owner(9));
        table.touch(1);
        let (frame, _) = table.select_victim().unwrap();
        assert_eq!(frame, 2);
    }

    #[test]
    fn all_pinned_means_no_victim() {
        let mut table = FrameTable::new(2);
        table.take_free(owner(0));
        table.take_free(owner(1));
        assert!(table.select_victim().is_some());
        assert!(table.select_victim().is_some());
        assert_eq!(table.select_victim(), None);
    }

    #[test]
    fn swap_round_trip_and_reuse() {
        let mut swap = SwapSpace::new(Box::new(RamDisk::new(2 * BLOCKS_PER_PAGE)));
        assert_eq!(swap.capacity(), 2);
        let slot = swap.alloc().unwrap();
        let page: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        swap.write_page(slot, &page).unwrap();
        let mut back = vec![0u8; PAGE_SIZE];
        swap.read_page(slot, &mut back).unwrap();
        assert_eq!(back, page);

        swap.alloc().unwrap();
        assert_eq!(swap.alloc(), None);
        swap.free(slot);
        assert_eq!(swap.alloc(), Some(slot));
    }

    #[test]
    fn ram_disk_rejects_out_of_range_block() {
        let mut disk = RamDisk::new(4);
        let mut buf = [0u8; BLOCK_SIZE];
        assert!(disk.read_block(4, &mut buf).is_err());
        assert!(disk.write_block(0, &buf[..10]).is_err());
    }
}
