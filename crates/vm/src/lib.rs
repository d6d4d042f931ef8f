//! RV32IM interpreter used as the emulated user-mode processor.
//!
//! The CPU never touches memory directly. Every fetch, load and store goes
//! through a [`bus::Bus`], which may refuse the access with a fault. Faults
//! are precise: the faulting instruction commits nothing, so the kernel can
//! page the memory in and simply step the same instruction again.

pub mod asm;
pub mod bus;
pub mod cpu;
pub mod decoder;
pub mod instruction;
pub mod isa;
pub mod registers;

pub use bus::{Access, Bus, FlatMemory, MemFault, Width};
pub use cpu::{StepOutcome, CPU};
pub use registers::Register;
