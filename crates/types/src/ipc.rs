use crate::error::{AbiError, ensure_len};
use crate::{read_u32, write_u32};

/// Process identifier. Issued monotonically, never reused.
pub type Pid = u32;

/// Message classes. Every process owns one queue per class.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgClass {
    Request = 0,
    Reply = 1,
    Event = 2,
}

impl MsgClass {
    pub const COUNT: usize = 3;
    pub const ALL: [MsgClass; MsgClass::COUNT] = [MsgClass::Request, MsgClass::Reply, MsgClass::Event];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_u32(tag: u32) -> Result<Self, AbiError> {
        match tag {
            0 => Ok(MsgClass::Request),
            1 => Ok(MsgClass::Reply),
            2 => Ok(MsgClass::Event),
            other => Err(AbiError::UnknownClass(other)),
        }
    }
}

/// Termination status codes reported in [`ProcEvent`]s. Ordinary exits use
/// whatever non-negative status the process chose.
pub mod status {
    /// Touched memory outside its virtual range, or made a malformed syscall.
    pub const ILLEGAL_MEMORY: i32 = -1;
    /// Killed by another process.
    pub const KILLED: i32 = -2;
    /// Killed as part of an interrupt sweep.
    pub const INTERRUPTED: i32 = -3;
    /// Reaped while the kernel shut down.
    pub const SHUTDOWN: i32 = -4;
}

/// Event type tag: a process owned by the receiver has died.
pub const EVENT_PROC_DIED: u32 = 1;

/// Event message sent to a process's owner when the process terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcEvent {
    pub pid: Pid,
    pub status: i32,
}

impl ProcEvent {
    pub const ENCODED_LEN: usize = 12;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        write_u32(&mut buf, 0, EVENT_PROC_DIED);
        write_u32(&mut buf, 4, self.pid);
        write_u32(&mut buf, 8, self.status as u32);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AbiError> {
        ensure_len(buf, Self::ENCODED_LEN)?;
        match read_u32(buf, 0) {
            EVENT_PROC_DIED => Ok(ProcEvent {
                pid: read_u32(buf, 4),
                status: read_u32(buf, 8) as i32,
            }),
            other => Err(AbiError::UnknownEvent(other)),
        }
    }
}
