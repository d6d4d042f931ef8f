//! The record a user program hands to the kernel with `ecall`.
//!
//! Register `a0` holds the user address of a [`SyscallRecord`]. The kernel
//! copies the record in, performs the call, and copies it back out with
//! `result` (and any output arguments) filled in. Per-call argument slots:
//!
//! | kind    | in                                          | out                       |
//! |---------|---------------------------------------------|---------------------------|
//! | EXIT    | a0 status                                   | -                         |
//! | PRINT   | a0 ptr, a1 len                              | result = len              |
//! | RECV    | a0 class, a1 max wait ms, a2 ptr, a3 size   | a4 src, a5 truncated      |
//! | SEND    | a0 dst, a1 class, a2 ptr, a3 len            | -                         |
//! | RPC     | a0 dst, a1 req ptr, a2 req len, a3 reply ptr, a4 reply size | a5 truncated |
//! | GETTIME | -                                           | a0 low ms, a1 high ms     |

use crate::error::{AbiError, ensure_len};
use crate::ipc::Pid;
use crate::{read_u32, write_u32};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallKind {
    Exit = 1,
    Print = 2,
    Recv = 3,
    Send = 4,
    Rpc = 5,
    GetTime = 6,
}

impl SyscallKind {
    pub fn from_u32(tag: u32) -> Option<Self> {
        Some(match tag {
            1 => SyscallKind::Exit,
            2 => SyscallKind::Print,
            3 => SyscallKind::Recv,
            4 => SyscallKind::Send,
            5 => SyscallKind::Rpc,
            6 => SyscallKind::GetTime,
            _ => return None,
        })
    }
}

pub const SYSCALL_ARGS: usize = 6;

/// Fixed 32-byte little-endian syscall record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallRecord {
    /// Raw operation tag; see [`SyscallKind`].
    pub kind: u32,
    /// Written by the kernel: non-negative on success, -1 on failure.
    pub result: i32,
    pub args: [u32; SYSCALL_ARGS],
}

impl SyscallRecord {
    pub const ENCODED_LEN: usize = 8 + 4 * SYSCALL_ARGS;

    pub fn new(kind: SyscallKind, args: [u32; SYSCALL_ARGS]) -> Self {
        Self { kind: kind as u32, result: 0, args }
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        write_u32(&mut buf, 0, self.kind);
        write_u32(&mut buf, 4, self.result as u32);
        for (i, arg) in self.args.iter().enumerate() {
            write_u32(&mut buf, 8 + 4 * i, *arg);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AbiError> {
        ensure_len(buf, Self::ENCODED_LEN)?;
        let mut args = [0u32; SYSCALL_ARGS];
        for (i, arg) in args.iter_mut().enumerate() {
            *arg = read_u32(buf, 8 + 4 * i);
        }
        Ok(Self {
            kind: read_u32(buf, 0),
            result: read_u32(buf, 4) as i32,
            args,
        })
    }
}

/// Environment block placed at the top of every user process's stack.
/// `a0` points at it when the program starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserEnv {
    pub pid: Pid,
    pub owner: Pid,
    pub uid: u32,
}

impl UserEnv {
    pub const ENCODED_LEN: usize = 12;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        write_u32(&mut buf, 0, self.pid);
        write_u32(&mut buf, 4, self.owner);
        write_u32(&mut buf, 8, self.uid);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AbiError> {
        ensure_len(buf, Self::ENCODED_LEN)?;
        Ok(Self {
            pid: read_u32(buf, 0),
            owner: read_u32(buf, 4),
            uid: read_u32(buf, 8),
        })
    }
}
