use core::fmt;
use core::ops::BitOr;

/// Size of a virtual page and of a physical frame, in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Size of one backing-store block, in bytes.
pub const BLOCK_SIZE: usize = 1024;
/// Number of backing-store blocks holding one page.
pub const BLOCKS_PER_PAGE: usize = PAGE_SIZE / BLOCK_SIZE;

/// First address of the user-visible virtual range.
pub const VIRT_BASE: u32 = 0x1000_0000;
/// Default size of the virtual range, in pages (1 MiB).
pub const DEFAULT_VIRT_PAGES: usize = 0x100;

/// Illegal address kernel initialization faults on to bootstrap the trap
/// machinery. Never a valid user address.
pub const BOOTSTRAP_FAULT_ADDR: u32 = 1;

const _: () = assert!(PAGE_SIZE % BLOCK_SIZE == 0);

/// Absolute page number containing `addr`.
pub const fn page_number(addr: u32) -> u32 {
    addr / PAGE_SIZE as u32
}

/// First address of absolute page `page`.
pub const fn page_address(page: u32) -> u32 {
    page * PAGE_SIZE as u32
}

/// Absolute page number of the first page of the virtual range.
pub const fn virt_base_page() -> u32 {
    page_number(VIRT_BASE)
}

/// One past the last address of a virtual range of `virt_pages` pages.
pub const fn virt_top(virt_pages: usize) -> u32 {
    VIRT_BASE + (virt_pages * PAGE_SIZE) as u32
}

/// Page protection bits, as carried by executable segments and TLB entries.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Prot(u32);

impl Prot {
    pub const NONE: Prot = Prot(0);
    pub const READ: Prot = Prot(1);
    pub const WRITE: Prot = Prot(2);
    pub const EXEC: Prot = Prot(4);
    pub const RWX: Prot = Prot(7);

    /// Keeps only the three defined bits.
    pub const fn from_bits(bits: u32) -> Self {
        Prot(bits & 7)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Prot) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Prot {
    type Output = Prot;

    fn bitor(self, rhs: Prot) -> Prot {
        Prot(self.0 | rhs.0)
    }
}

impl fmt::Debug for Prot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Prot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |bit: Prot, c: char| if self.contains(bit) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Prot::READ, 'r'),
            flag(Prot::WRITE, 'w'),
            flag(Prot::EXEC, 'x')
        )
    }
}
