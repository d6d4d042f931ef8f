//! Asynchronous notifications: the clock tick, device input, and the small
//! amount of kernel work devices and timers may schedule.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::mpsc::Sender;

use types::{MsgClass, Pid};

use crate::error::KernelError;
use crate::state::KernelState;

/// Pid used as the source of messages the kernel itself sends.
pub const KERNEL_PID: Pid = 0;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Irq {
    Clock = 1,
    Io = 2,
}

/// Pending interrupt bits, raised from host threads and consumed by whichever
/// process context reaches an unmasked interrupt check first.
#[derive(Debug, Default)]
pub struct InterruptController {
    pending: AtomicU32,
    bootstrapped: AtomicBool,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, irq: Irq) {
        self.pending.fetch_or(irq as u32, Ordering::AcqRel);
    }

    pub fn clear(&self, irq: Irq) {
        self.pending.fetch_and(!(irq as u32), Ordering::AcqRel);
    }

    /// Consume one pending interrupt. The clock wins over I/O.
    pub fn take(&self) -> Option<Irq> {
        if self.pending.load(Ordering::Acquire) == 0 {
            return None;
        }
        for irq in [Irq::Clock, Irq::Io] {
            let prev = self.pending.fetch_and(!(irq as u32), Ordering::AcqRel);
            if prev & irq as u32 != 0 {
                return Some(irq);
            }
        }
        None
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::Acquire)
    }

    pub(crate) fn finish_bootstrap(&self) {
        self.bootstrapped.store(true, Ordering::Release);
    }
}

pub type DeviceId = usize;

pub(crate) struct IoEvent {
    pub device: DeviceId,
    pub data: Vec<u8>,
}

/// Kernel-side half of an input device. The kernel calls `read_avail` from
/// its scheduler loop, with the lock held, for every chunk the host side
/// posted through the [`DeviceHandle`].
pub trait DeviceSource: Send {
    fn name(&self) -> &str;

    fn read_avail(&mut self, io: &mut IoContext<'_>, input: Vec<u8>);
}

/// Host-side half of an input device. Cheap to clone; usable from any thread.
#[derive(Clone)]
pub struct DeviceHandle {
    id: DeviceId,
    tx: Sender<IoEvent>,
    irq: Arc<InterruptController>,
}

impl DeviceHandle {
    pub(crate) fn new(id: DeviceId, tx: Sender<IoEvent>, irq: Arc<InterruptController>) -> Self {
        Self { id, tx, irq }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Queue input for the device and raise the I/O interrupt. Returns false
    /// once the kernel is gone.
    pub fn post(&self, data: Vec<u8>) -> bool {
        let sent = self.tx.send(IoEvent { device: self.id, data }).is_ok();
        if sent {
            self.irq.raise(Irq::Io);
        }
        sent
    }
}

/// Work scheduled to run on the next scheduler pass.
pub(crate) type Deferred = Box<dyn FnOnce(&mut IoContext<'_>) + Send>;

/// What device handlers and deferred events may do to the kernel: deliver
/// messages, read the clock, schedule more work. They never block.
pub struct IoContext<'a> {
    pub(crate) st: &'a mut KernelState,
}

impl IoContext<'_> {
    pub fn now_ms(&self) -> u64 {
        self.st.clock.now_ms()
    }

    /// Deliver a message from the kernel to `dst`.
    pub fn send(&mut self, dst: Pid, class: MsgClass, payload: &[u8]) -> Result<(), KernelError> {
        self.st.send(KERNEL_PID, dst, class, payload.to_vec())
    }

    pub fn defer(&mut self, work: impl FnOnce(&mut IoContext<'_>) + Send + 'static) {
        self.st.events.push_back(Box::new(work));
    }
}
