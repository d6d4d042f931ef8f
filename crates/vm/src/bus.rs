use std::fmt;

/// Kind of memory access a fault was raised for.
///
/// EDUCATIONAL: Real MMUs report the access type with a page fault (RISC-V
/// has separate instruction, load and store page-fault causes) so the OS can
/// tell a missing code page from a write to a read-only page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Fetch,
    Load,
    Store,
}

/// Width of a data access in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl Width {
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

/// A refused memory access. `addr` is the first byte the bus could not reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFault {
    pub addr: u32,
    pub access: Access,
}

impl fmt::Display for MemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} fault at 0x{:08x}", self.access, self.addr)
    }
}

/// Memory seam between the CPU and whatever backs the address space.
///
/// EDUCATIONAL: This is the software equivalent of the memory bus plus MMU.
/// An implementation either completes the whole access or completes none of
/// it, which is what lets the CPU restart a faulting instruction.
pub trait Bus {
    /// Read a 32-bit instruction word for execution.
    fn fetch(&mut self, addr: u32) -> Result<u32, MemFault>;
    /// Read `width` bytes, zero-extended into the low bits of the result.
    fn load(&mut self, addr: u32, width: Width) -> Result<u32, MemFault>;
    /// Write the low `width` bytes of `value`.
    fn store(&mut self, addr: u32, width: Width, value: u32) -> Result<(), MemFault>;
}

/// Flat, always-present memory starting at `base`. Handy for running code
/// outside the kernel.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    base: u32,
    bytes: Vec<u8>,
}

impl FlatMemory {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0u8; size],
        }
    }

    /// Copy `data` into memory at absolute address `addr`.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) {
        let start = (addr - self.base) as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub fn read_bytes(&self, addr: u32, len: usize) -> &[u8] {
        let start = (addr - self.base) as usize;
        &self.bytes[start..start + len]
    }

    fn range(&self, addr: u32, len: usize, access: Access) -> Result<usize, MemFault> {
        let fault = MemFault { addr, access };
        let offset = addr.checked_sub(self.base).ok_or(fault)? as usize;
        if offset + len > self.bytes.len() {
            return Err(fault);
        }
        Ok(offset)
    }
}

impl Bus for FlatMemory {
    fn fetch(&mut self, addr: u32) -> Result<u32, MemFault> {
        self.load(addr, Width::Word)
            .map_err(|fault| MemFault { access: Access::Fetch, ..fault })
    }

    fn load(&mut self, addr: u32, width: Width) -> Result<u32, MemFault> {
        let at = self.range(addr, width.bytes(), Access::Load)?;
        let mut word = [0u8; 4];
        word[..width.bytes()].copy_from_slice(&self.bytes[at..at + width.bytes()]);
        Ok(u32::from_le_bytes(word))
    }

    fn store(&mut self, addr: u32, width: Width, value: u32) -> Result<(), MemFault> {
        let at = self.range(addr, width.bytes(), Access::Store)?;
        self.bytes[at..at + width.bytes()].copy_from_slice(&value.to_le_bytes()[..width.bytes()]);
        Ok(())
    }
}
