//! Trap entry for one process context.
//!
//! Every trap (page fault, clock tick, device input, syscall) enters the
//! kernel through [`TrapDispatcher::dispatch`], which masks further
//! interrupts for the context while the handler runs. Trap handling never
//! nests: a trap raised while one is being handled is a kernel bug.

use std::cell::Cell;
use std::sync::Arc;

use types::BOOTSTRAP_FAULT_ADDR;

use crate::intr::{InterruptController, Irq};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    PageFault { addr: u32 },
    Clock,
    Io,
    /// `arg` is the user address of the syscall record.
    Syscall { arg: u32 },
}

/// Machine state at the trap, and where execution resumes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    pub trap: Trap,
    pub ip: u32,
    pub sp: u32,
}

pub trait TrapHandler {
    fn handle_trap(&mut self, frame: &TrapFrame);
}

pub struct TrapDispatcher {
    irq: Arc<InterruptController>,
    depth: Cell<u32>,
}

impl TrapDispatcher {
    pub fn new(irq: Arc<InterruptController>) -> Self {
        Self { irq, depth: Cell::new(0) }
    }

    /// Interrupts are masked while a trap is being handled.
    pub fn is_masked(&self) -> bool {
        self.depth.get() != 0
    }

    /// Take a pending clock or I/O interrupt, unless masked.
    pub fn pending(&self, ip: u32, sp: u32) -> Option<TrapFrame> {
        if self.is_masked() {
            return None;
        }
        let trap = match self.irq.take()? {
            Irq::Clock => Trap::Clock,
            Irq::Io => Trap::Io,
        };
        Some(TrapFrame { trap, ip, sp })
    }

    /// Handshake performed once by kernel initialization: a deliberate fault
    /// on an address no process can own, recognized and swallowed here.
    pub fn bootstrap(&self) {
        struct Unreachable;
        impl TrapHandler for Unreachable {
            fn handle_trap(&mut self, frame: &TrapFrame) {
                log::warn!("bootstrap fault reached a handler: {:?}", frame.trap);
            }
        }
        let frame = TrapFrame { trap: Trap::PageFault { addr: BOOTSTRAP_FAULT_ADDR }, ip: 0, sp: 0 };
        self.dispatch(frame, &mut Unreachable);
    }

    /// Run `handler` for `frame` and return the frame to resume from. A
    /// syscall resumes after the trapping instruction; everything else
    /// re-executes it.
    pub fn dispatch<H: TrapHandler + ?Sized>(&self, frame: TrapFrame, handler: &mut H) -> TrapFrame {
        if self.depth.get() != 0 {
            log::error!("kernel fatal: nested {:?} trap at ip {:#010x}", frame.trap, frame.ip);
            panic!("kernel fatal: nested {:?} trap at ip {:#010x}", frame.trap, frame.ip);
        }
        if !self.irq.is_bootstrapped() {
            if frame.trap == (Trap::PageFault { addr: BOOTSTRAP_FAULT_ADDR }) {
                self.irq.finish_bootstrap();
                log::debug!("trap machinery bootstrapped");
                return frame;
            }
            log::error!("kernel fatal: {:?} trap before bootstrap", frame.trap);
            panic!("kernel fatal: {:?} trap before bootstrap", frame.trap);
        }

        self.depth.set(1);
        handler.handle_trap(&frame);
        self.depth.set(0);

        let mut resume = frame;
        if let Trap::Syscall { .. } = frame.trap {
            resume.ip = frame.ip.wrapping_add(4);
        }
        resume
    }
}
