use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use types::{MsgClass, Pid};

use crate::exec::Executable;
use crate::paging::PageState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Free,
    Runnable,
    Waiting,
    /// Terminated, resources not yet reclaimed.
    Zombie,
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcState::Free => "FREE",
            ProcState::Runnable => "RUNNABLE",
            ProcState::Waiting => "WAITING",
            ProcState::Zombie => "ZOMBIE",
        };
        f.write_str(name)
    }
}

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub src: Pid,
    pub data: Vec<u8>,
}

/// Result of receiving into a caller-supplied buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub src: Pid,
    /// Bytes copied.
    pub len: usize,
    /// The message was longer than the buffer.
    pub truncated: bool,
}

impl Delivery {
    pub(crate) fn copy(msg: &Message, buf: &mut [u8]) -> Self {
        let len = msg.data.len().min(buf.len());
        buf[..len].copy_from_slice(&msg.data[..len]);
        Self { src: msg.src, len, truncated: len < msg.data.len() }
    }
}

#[derive(Debug, Default)]
pub struct Mailbox {
    pub queue: VecDeque<Message>,
    /// The owner is blocked on this mailbox.
    pub waiting: bool,
}

/// What a process runs.
#[derive(Debug, Clone)]
pub enum ProcKind {
    /// Host code with direct kernel access.
    Kernel,
    /// An executable on the emulated processor.
    User(Arc<Executable>),
}

pub struct Pcb {
    pub pid: Pid,
    pub owner: Pid,
    pub uid: u32,
    pub descr: String,
    pub state: ProcState,
    pub kind: ProcKind,
    pub mailboxes: [Mailbox; MsgClass::COUNT],
    /// Process whose reply an outstanding RPC waits for.
    pub server: Option<Pid>,
    /// Absolute wake-up time of a bounded receive, in ms since boot.
    pub alarm: Option<u64>,
    /// Subject to `kill(0, ..)` sweeps.
    pub interruptable: bool,
    pub pages: Vec<PageState>,
}

impl Pcb {
    fn free() -> Self {
        Self {
            pid: 0,
            owner: 0,
            uid: 0,
            descr: String::new(),
            state: ProcState::Free,
            kind: ProcKind::Kernel,
            mailboxes: Default::default(),
            server: None,
            alarm: None,
            interruptable: false,
            pages: Vec::new(),
        }
    }

    pub fn mailbox(&self, class: MsgClass) -> &Mailbox {
        &self.mailboxes[class.index()]
    }

    pub fn mailbox_mut(&mut self, class: MsgClass) -> &mut Mailbox {
        &mut self.mailboxes[class.index()]
    }

    pub fn is_live(&self) -> bool {
        self.state != ProcState::Free
    }

    pub fn exec(&self) -> Option<&Arc<Executable>> {
        match &self.kind {
            ProcKind::User(exe) => Some(exe),
            ProcKind::Kernel => None,
        }
    }
}

/// Fixed-capacity process table. Slot indices are stable for the life of a
/// process; pids are never reused.
pub struct ProcTable {
    slots: Vec<Pcb>,
    next_pid: Pid,
    live: usize,
}

impl ProcTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Pcb::free()).collect(),
            next_pid: 1,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of non-free slots.
    pub fn count(&self) -> usize {
        self.live
    }

    pub fn alloc(
        &mut self,
        owner: Pid,
        descr: &str,
        uid: u32,
        kind: ProcKind,
        virt_pages: usize,
    ) -> Option<usize> {
        let slot = self.slots.iter().position(|p| p.state == ProcState::Free)?;
        let pid = self.next_pid;
        self.next_pid += 1;
        self.live += 1;
        self.slots[slot] = Pcb {
            pid,
            owner,
            uid,
            descr: descr.to_string(),
            state: ProcState::Runnable,
            kind,
            mailboxes: Default::default(),
            server: None,
            alarm: None,
            interruptable: false,
            pages: vec![PageState::Uninitialized; virt_pages],
        };
        Some(slot)
    }

    /// Return a slot to the free pool, dropping its queued messages.
    pub fn free(&mut self, slot: usize) {
        if self.slots[slot].is_live() {
            self.live -= 1;
        }
        self.slots[slot] = Pcb::free();
    }

    pub fn find(&self, pid: Pid) -> Option<usize> {
        self.slots.iter().position(|p| p.is_live() && p.pid == pid)
    }

    /// True while `slot` still holds the process `pid`.
    pub fn holds(&self, slot: usize, pid: Pid) -> bool {
        let p = &self.slots[slot];
        p.is_live() && p.pid == pid
    }

    pub fn live_slots(&self) -> Vec<usize> {
        (0..self.slots.len()).filter(|&s| self.slots[s].is_live()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.slots.iter().filter(|p| p.is_live())
    }
}

impl std::ops::Index<usize> for ProcTable {
    type Output = Pcb;

    fn index(&self, slot: usize) -> &Pcb {
        &self.slots[slot]
    }
}

impl std::ops::IndexMut<usize> for ProcTable {
    fn index_mut(&mut self, slot: usize) -> &mut Pcb {
        &mut self.slots[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_are_not_reused() {
        let mut table = ProcTable::new(2);
        let a = table.alloc(0, "a", 0, ProcKind::Kernel, 4).unwrap();
        let pid_a = table[a].pid;
        table.free(a);
        let b = table.alloc(0, "b", 0, ProcKind::Kernel, 4).unwrap();
        assert_eq!(a, b, "slot is reused");
        assert_ne!(table[b].pid, pid_a);
        assert!(!table.holds(a, pid_a));
    }

    #[test]
    fn full_table_refuses() {
        let mut table = ProcTable::new(1);
        assert!(table.alloc(0, "a", 0, ProcKind::Kernel, 0).is_some());
        assert!(table.alloc(0, "b", 0, ProcKind::Kernel, 0).is_none());
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn delivery_truncates() {
        let msg = Message { src: 3, data: b"hello".to_vec() };
        let mut buf = [0u8; 3];
        let d = Delivery::copy(&msg, &mut buf);
        assert_eq!(d, Delivery { src: 3, len: 3, truncated: true });
        assert_eq!(&buf, b"hel");
    }
}
