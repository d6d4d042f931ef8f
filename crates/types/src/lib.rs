#![no_std]

//! Types shared between the kernel and the programs it runs: the address-space
//! layout, the IPC vocabulary, the syscall record and the executable format.

extern crate alloc;

pub mod error;
pub use error::AbiError;

pub mod mmu;
pub use mmu::*;

pub mod ipc;
pub use ipc::{MsgClass, Pid, ProcEvent, status};

pub mod syscall;
pub use syscall::{SyscallKind, SyscallRecord, UserEnv};

pub mod exec;
pub use exec::{ExecHeader, ExecSegment, MAX_SEGMENTS};

/// Read a little-endian `u32` at `offset`. Callers check the length first.
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
