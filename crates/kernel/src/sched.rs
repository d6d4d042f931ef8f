//! Scheduling and every kernel operation that may give up the CPU.
//!
//! Each process runs on its own host thread, but only the thread of the
//! current process ever proceeds: all others are parked on their slot's
//! condition variable. Switching sets `current`, wakes the next thread and
//! parks the calling one, so exactly one flow of control runs kernel or user
//! code at a time. Functions that may switch take the kernel lock guard by
//! value and hand it back once the caller is current again, or once it is
//! dead or the kernel halted; callers must check which.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use types::{MsgClass, Pid};

use crate::error::KernelError;
use crate::exec::Executable;
use crate::proc::{Message, ProcKind, ProcState};
use crate::state::{Gates, KernelState};
use crate::sys::{self, Sys};
use crate::user;

pub(crate) type Guard<'a> = MutexGuard<'a, KernelState>;

/// Body of a kernel process. Its return value is the exit status.
pub type ProcBody = Box<dyn FnOnce(Sys) -> i32 + Send + 'static>;

pub(crate) enum Launch {
    Kernel(ProcBody),
    User(Arc<Executable>),
}

pub(crate) struct Shared {
    state: Mutex<KernelState>,
    gates: Arc<Gates>,
}

impl Shared {
    pub fn new(state: KernelState) -> Arc<Self> {
        let gates = state.gates.clone();
        Arc::new(Self { state: Mutex::new(state), gates })
    }

    pub fn lock(&self) -> Guard<'_> {
        match self.state.lock() {
            Ok(st) => st,
            Err(_) => panic!("kernel halted: {}", self.gates.fatal_reason()),
        }
    }

    /// Lock unless a fatal error poisoned the kernel.
    pub fn try_lock(&self) -> Option<Guard<'_>> {
        self.state.lock().ok()
    }

    /// Block until `pid` is scheduled onto the CPU, has been reclaimed, or
    /// the kernel halted.
    pub fn park<'a>(&'a self, st: Guard<'a>, slot: usize, pid: Pid) -> Guard<'a> {
        match self.gates.slot(slot).wait_while(st, |st| !st.may_resume(slot, pid)) {
            Ok(st) => st,
            Err(_) => panic!("kernel halted: {}", self.gates.fatal_reason()),
        }
    }

    /// Whether `pid` came back from a switch still able to run.
    pub fn resumed(&self, st: &KernelState, pid: Pid) -> Result<(), KernelError> {
        if st.is_running(pid) && st.procs[st.current].state == ProcState::Runnable && !st.halted {
            Ok(())
        } else if st.halted {
            Err(KernelError::ShuttingDown)
        } else {
            Err(KernelError::Terminated)
        }
    }

    /// Hand the CPU to `next` and park the caller.
    fn switch_to<'a>(&'a self, mut st: Guard<'a>, next: usize) -> Guard<'a> {
        let prev = st.current;
        if next == prev {
            st.fatal("switch to the running process");
        }
        if st.procs[next].state != ProcState::Runnable {
            st.fatal(format!("switch to process {} while {}", st.procs[next].pid, st.procs[next].state));
        }
        let prev_pid = st.procs[prev].pid;
        st.flush_tlb();
        if st.procs[prev].state == ProcState::Zombie {
            st.release(prev);
        }
        log::trace!("switch {} -> {}", prev_pid, st.procs[next].pid);
        st.current = next;
        self.gates.notify(next);
        self.park(st, prev, prev_pid)
    }

    /// Give up the CPU to the next runnable process, idling for timers and
    /// device input when there is none. Returns immediately if the caller is
    /// still runnable and nobody else is.
    pub fn reschedule<'a>(&'a self, mut st: Guard<'a>) -> Guard<'a> {
        if st.halted {
            return st;
        }
        st.run_io(Duration::ZERO);
        let next = loop {
            let now = st.clock.now_ms();
            if let Some(curfew) = st.curfew {
                if now > curfew {
                    st.halt("shutdown curfew passed");
                    return st;
                }
            }
            let mut wake = st.sweep(now);
            if let Some(next) = st.pop_ready() {
                break next;
            }
            let cur = st.current;
            if st.procs[cur].state == ProcState::Runnable {
                return st;
            }
            if st.shutting_down && st.procs.count() == 1 {
                st.halt("all processes gone");
                return st;
            }
            if let Some(curfew) = st.curfew {
                wake = wake.min(curfew + 1);
            }
            st.run_io(Duration::from_millis(wake.saturating_sub(now).max(1)));
        };
        let cur = st.current;
        if st.procs[cur].state == ProcState::Runnable {
            st.enqueue(cur);
        }
        self.switch_to(st, next)
    }

    /// Create a process owned by the caller and run it right away. The caller
    /// goes to the back of the ready queue.
    pub fn create<'a>(
        self: &'a Arc<Self>,
        mut st: Guard<'a>,
        descr: &str,
        uid: u32,
        launch: Launch,
    ) -> (Guard<'a>, Result<Pid, KernelError>) {
        let caller = st.current;
        let caller_pid = st.procs[caller].pid;
        let kind = match &launch {
            Launch::Kernel(_) => ProcKind::Kernel,
            Launch::User(exe) => ProcKind::User(exe.clone()),
        };
        let (slot, pid) = match st.admit(caller_pid, descr, uid, kind) {
            Ok(admitted) => admitted,
            Err(err) => return (st, Err(err)),
        };

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("pid{}-{}", pid, descr))
            .spawn(move || match launch {
                Launch::Kernel(body) => sys::run_kernel_process(shared, slot, pid, body),
                Launch::User(exe) => user::run_user_process(shared, slot, pid, exe),
            });
        if let Err(err) = spawned {
            log::error!("no host thread for process {}: {}", pid, err);
            st.procs.free(slot);
            return (st, Err(KernelError::TableFull));
        }

        if st.procs[caller].state == ProcState::Runnable {
            st.enqueue(caller);
        }
        let st = self.switch_to(st, slot);
        (st, Ok(pid))
    }

    /// Dequeue a message of `class`, blocking while there is none. A
    /// non-zero `max_wait_ms` bounds the wait.
    pub fn receive<'a>(
        &'a self,
        mut st: Guard<'a>,
        class: MsgClass,
        max_wait_ms: u64,
    ) -> (Guard<'a>, Result<Message, KernelError>) {
        let cur = st.current;
        let pid = st.procs[cur].pid;
        if st.procs[cur].state != ProcState::Runnable {
            st.fatal(format!("receive by process {} while {}", pid, st.procs[cur].state));
        }
        if st.procs[cur].mailbox(class).queue.is_empty() {
            let now = st.clock.now_ms();
            let p = &mut st.procs[cur];
            p.mailbox_mut(class).waiting = true;
            p.state = ProcState::Waiting;
            p.alarm = (max_wait_ms > 0).then(|| now + max_wait_ms);
            st = self.reschedule(st);
            if let Err(err) = self.resumed(&st, pid) {
                return (st, Err(err));
            }
        }
        let p = &mut st.procs[cur];
        let res = match p.mailbox_mut(class).queue.pop_front() {
            Some(msg) => Ok(msg),
            None if class == MsgClass::Reply => Err(KernelError::ServerGone(p.server.unwrap_or(0))),
            None => Err(KernelError::TimedOut),
        };
        (st, res)
    }

    /// Send a request to `dst` and block for its reply. Nothing but the reply
    /// from `dst` ends the wait, short of `dst` or the caller dying.
    pub fn rpc<'a>(
        &'a self,
        mut st: Guard<'a>,
        dst: Pid,
        request: Vec<u8>,
    ) -> (Guard<'a>, Result<Message, KernelError>) {
        let cur = st.current;
        let pid = st.procs[cur].pid;
        if dst == pid {
            return (st, Err(KernelError::SelfRpc));
        }
        if let Err(err) = st.send(pid, dst, MsgClass::Request, request) {
            return (st, Err(err));
        }
        st.procs[cur].server = Some(dst);
        let (mut st, res) = self.receive(st, MsgClass::Reply, 0);
        if st.is_running(pid) {
            st.procs[cur].server = None;
            if let Ok(reply) = &res {
                if reply.src != dst {
                    st.fatal(format!("process {} got a reply from {} while calling {}", pid, reply.src, dst));
                }
            }
        }
        (st, res)
    }

    /// Kill `target`, or every interruptable process when `target` is 0.
    /// Killing oneself does not return to the caller as a live process.
    pub fn kill<'a>(&'a self, mut st: Guard<'a>, target: Pid, status: i32) -> (Guard<'a>, Result<(), KernelError>) {
        let killer = st.current;
        let res = if target == 0 {
            for slot in st.procs.live_slots() {
                if st.procs[slot].is_live() && st.procs[slot].interruptable {
                    if let Err(err) = st.zap(Some(killer), slot, status) {
                        log::debug!("sweep skipped process {}: {}", st.procs[slot].pid, err);
                    }
                }
            }
            Ok(())
        } else {
            match st.procs.find(target) {
                Some(slot) => st.zap(Some(killer), slot, status),
                None => Err(KernelError::UnknownProcess(target)),
            }
        };
        if st.procs[killer].state == ProcState::Zombie {
            let st = self.reschedule(st);
            return (st, Err(KernelError::Terminated));
        }
        (st, res)
    }

    /// Terminate the caller and switch away for good.
    pub fn exit<'a>(&'a self, mut st: Guard<'a>, status: i32) -> Guard<'a> {
        let cur = st.current;
        st.terminate(cur, status);
        self.reschedule(st)
    }

    /// Reap every process and halt. Returns once the kernel has halted, or
    /// with the caller dead if it was reaped before the kernel could halt.
    pub fn shutdown<'a>(&'a self, mut st: Guard<'a>) -> Guard<'a> {
        if !st.shutting_down {
            let now = st.clock.now_ms();
            st.shutting_down = true;
            st.curfew = Some(now + st.config.shutdown_grace_ms);
            log::info!("shutting down, {} processes left", st.procs.count());
        }
        self.reschedule(st)
    }
}
