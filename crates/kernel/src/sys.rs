//! Booting the kernel, and the interface kernel processes program against.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use types::{BLOCKS_PER_PAGE, MsgClass, Pid, ProcEvent, status};

use crate::clock::Timer;
use crate::config::KernelConfig;
use crate::console::Console;
use crate::error::KernelError;
use crate::exec::Executable;
use crate::intr::{DeviceHandle, DeviceSource, InterruptController, IoContext};
use crate::paging::{BlockStore, RamDisk};
use crate::proc::{Delivery, Message, ProcKind, ProcState};
use crate::sched::{Guard, Launch, ProcBody, Shared};
use crate::state::{KernelState, MemoryStats};
use crate::trap::{TrapDispatcher, TrapFrame, TrapHandler};

/// Unwind payload of a kernel process leaving through [`Sys::exit`].
struct Exited;

/// Boot-time options.
pub struct Kernel {
    config: KernelConfig,
    swap: Option<Box<dyn BlockStore>>,
    console: Console,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        Self { config, swap: None, console: Console::stdout() }
    }

    /// Page to `store` instead of a RAM disk sized by `swap_pages`.
    pub fn with_swap(mut self, store: Box<dyn BlockStore>) -> Self {
        self.swap = Some(store);
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Bring up the kernel. The calling thread becomes the first process,
    /// "main", and drives it through the returned handle.
    pub fn boot(self) -> Result<Sys, KernelError> {
        let config = self.config;
        config.validate()?;

        let irq = Arc::new(InterruptController::new());
        let traps = TrapDispatcher::new(irq.clone());
        traps.bootstrap();

        let swap = self
            .swap
            .unwrap_or_else(|| Box::new(RamDisk::new(config.swap_pages * BLOCKS_PER_PAGE)));
        let mut st = KernelState::new(config.clone(), swap, self.console, irq.clone());
        let slot = st
            .procs
            .alloc(0, "main", 0, ProcKind::Kernel, config.virt_pages)
            .ok_or(KernelError::TableFull)?;
        st.current = slot;
        st.timer = Timer::start(config.timer_interval_ms, Arc::downgrade(&irq));
        let pid = st.procs[slot].pid;
        log::info!(
            "kernel up: {} frames, {} TLB entries, {} swap pages, {} virtual pages per process",
            config.phys_frames,
            config.tlb_entries,
            st.swap.capacity(),
            config.virt_pages
        );

        Ok(Sys { shared: Shared::new(st), slot, pid, traps, spawned: false })
    }
}

/// Preemption at kernel-process syscall entry: a pending tick reschedules.
struct Preempt<'a> {
    shared: &'a Shared,
    st: Option<Guard<'a>>,
}

impl TrapHandler for Preempt<'_> {
    fn handle_trap(&mut self, frame: &TrapFrame) {
        if let Some(st) = self.st.take() {
            log::trace!("preempted on {:?}", frame.trap);
            self.st = Some(self.shared.reschedule(st));
        }
    }
}

/// A kernel process's handle on the kernel. Every call may switch to other
/// processes before it returns.
pub struct Sys {
    shared: Arc<Shared>,
    slot: usize,
    pid: Pid,
    traps: TrapDispatcher,
    /// Runs a process body on its own thread, as opposed to the boot thread.
    spawned: bool,
}

fn timeout_ms(timeout: Option<Duration>) -> u64 {
    timeout.map(|d| (d.as_millis() as u64).max(1)).unwrap_or(0)
}

impl Sys {
    /// Lock the kernel on behalf of this process, taking a pending interrupt
    /// first.
    fn enter(&self) -> Result<Guard<'_>, KernelError> {
        let st = self.alive(self.shared.lock())?;
        let Some(frame) = self.traps.pending(0, 0) else { return Ok(st) };
        let mut handler = Preempt { shared: &self.shared, st: Some(st) };
        self.traps.dispatch(frame, &mut handler);
        let st = handler.st.take().ok_or(KernelError::Terminated)?;
        self.alive(st)
    }

    /// Hand the lock back if the caller still owns the CPU. A spawned
    /// process that was reaped or outlived the kernel leaves its body here
    /// and never runs again; the boot thread gets the error instead.
    fn alive<'a>(&'a self, st: Guard<'a>) -> Result<Guard<'a>, KernelError> {
        match self.shared.resumed(&st, self.pid) {
            Ok(()) => Ok(st),
            Err(_) if self.spawned => self.vanish(st),
            Err(err) => Err(err),
        }
    }

    /// Drop the lock and leave the process body for good.
    fn vanish(&self, st: Guard<'_>) -> ! {
        drop(st);
        panic::resume_unwind(Box::new(Exited))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn owner(&self) -> Result<Pid, KernelError> {
        let st = self.enter()?;
        Ok(st.procs[self.slot].owner)
    }

    pub fn uid(&self) -> Result<u32, KernelError> {
        let st = self.enter()?;
        Ok(st.procs[self.slot].uid)
    }

    /// Start a kernel process owned by the caller. It runs before this call
    /// returns.
    pub fn spawn<F>(&self, descr: &str, body: F) -> Result<Pid, KernelError>
    where
        F: FnOnce(Sys) -> i32 + Send + 'static,
    {
        self.spawn_as(descr, 0, body)
    }

    /// Like [`spawn`](Sys::spawn) with an explicit uid, which only takes
    /// effect when the caller runs as uid 0.
    pub fn spawn_as<F>(&self, descr: &str, uid: u32, body: F) -> Result<Pid, KernelError>
    where
        F: FnOnce(Sys) -> i32 + Send + 'static,
    {
        let body: ProcBody = Box::new(body);
        self.create(descr, uid, Launch::Kernel(body))
    }

    /// Start a user process running `exe`.
    pub fn exec(&self, exe: Executable) -> Result<Pid, KernelError> {
        self.exec_as(exe, 0)
    }

    pub fn exec_as(&self, exe: Executable, uid: u32) -> Result<Pid, KernelError> {
        let descr = exe.name().to_string();
        self.create(&descr, uid, Launch::User(Arc::new(exe)))
    }

    fn create(&self, descr: &str, uid: u32, launch: Launch) -> Result<Pid, KernelError> {
        let st = self.enter()?;
        if let Launch::User(exe) = &launch {
            exe.validate(st.config.virt_pages)?;
        }
        let (st, res) = self.shared.create(st, descr, uid, launch);
        let pid = res?;
        self.alive(st)?;
        Ok(pid)
    }

    pub fn send(&self, dst: Pid, class: MsgClass, payload: &[u8]) -> Result<(), KernelError> {
        let mut st = self.enter()?;
        st.send(self.pid, dst, class, payload.to_vec())
    }

    /// Answer an RPC from `dst`.
    pub fn reply(&self, dst: Pid, payload: &[u8]) -> Result<(), KernelError> {
        self.send(dst, MsgClass::Reply, payload)
    }

    /// Wait for a Request or an Event, at most `timeout` if given. Replies
    /// only ever end an [`rpc`](Sys::rpc).
    pub fn recv(&self, class: MsgClass, timeout: Option<Duration>) -> Result<Message, KernelError> {
        if class == MsgClass::Reply {
            return Err(KernelError::BadClass(class));
        }
        let st = self.enter()?;
        let (st, res) = self.shared.receive(st, class, timeout_ms(timeout));
        self.alive(st)?;
        res
    }

    pub fn recv_into(
        &self,
        class: MsgClass,
        timeout: Option<Duration>,
        buf: &mut [u8],
    ) -> Result<Delivery, KernelError> {
        let msg = self.recv(class, timeout)?;
        Ok(Delivery::copy(&msg, buf))
    }

    /// Send `request` to `dst` and wait for its reply.
    pub fn rpc(&self, dst: Pid, request: &[u8]) -> Result<Vec<u8>, KernelError> {
        let st = self.enter()?;
        let (st, res) = self.shared.rpc(st, dst, request.to_vec());
        self.alive(st)?;
        res.map(|msg| msg.data)
    }

    pub fn rpc_into(&self, dst: Pid, request: &[u8], reply: &mut [u8]) -> Result<Delivery, KernelError> {
        let st = self.enter()?;
        let (st, res) = self.shared.rpc(st, dst, request.to_vec());
        self.alive(st)?;
        Ok(Delivery::copy(&res?, reply))
    }

    /// Kill `pid` with `status`; `pid` 0 kills every interruptable process.
    /// Killing oneself does not return.
    pub fn kill(&self, pid: Pid, status: i32) -> Result<(), KernelError> {
        let st = self.enter()?;
        let (st, res) = self.shared.kill(st, pid, status);
        if res == Err(KernelError::Terminated) {
            self.vanish(st);
        }
        res
    }

    /// Kill every interruptable process, the caller included if it is one.
    pub fn interrupt(&self) -> Result<(), KernelError> {
        self.kill(0, status::INTERRUPTED)
    }

    pub fn set_interruptable(&self, interruptable: bool) -> Result<(), KernelError> {
        let mut st = self.enter()?;
        st.procs[self.slot].interruptable = interruptable;
        Ok(())
    }

    /// Milliseconds since boot.
    pub fn gettime(&self) -> Result<u64, KernelError> {
        let st = self.enter()?;
        Ok(st.clock.now_ms())
    }

    pub fn print(&self, text: &str) -> Result<(), KernelError> {
        let mut st = self.enter()?;
        st.console.write(text.as_bytes());
        Ok(())
    }

    pub fn yield_now(&self) -> Result<(), KernelError> {
        let st = self.enter()?;
        let st = self.shared.reschedule(st);
        self.alive(st).map(drop)
    }

    /// Terminate the calling process. On a spawned process this unwinds out
    /// of its body; on the boot thread it unwinds the thread.
    pub fn exit(&self, status: i32) -> ! {
        let st = self.shared.lock();
        if self.shared.resumed(&st, self.pid).is_ok() {
            let st = self.shared.exit(st, status);
            self.vanish(st);
        }
        self.vanish(st)
    }

    /// Terminate every process and halt. Returns Ok once the kernel halted.
    pub fn shutdown(&self) -> Result<(), KernelError> {
        let st = self.enter()?;
        let st = self.shared.shutdown(st);
        if st.halted {
            return Ok(());
        }
        self.alive(st)?;
        Err(KernelError::Terminated)
    }

    /// Attach an input device. Its handle may be moved to any thread.
    pub fn register_device(&self, source: impl DeviceSource + 'static) -> Result<DeviceHandle, KernelError> {
        let mut st = self.enter()?;
        let id = st.devices.len();
        log::info!("device {} attached as {}", source.name(), id);
        st.devices.push(Some(Box::new(source)));
        Ok(DeviceHandle::new(id, st.io_tx.clone(), st.irq.clone()))
    }

    /// Run `work` from the scheduler on its next pass.
    pub fn defer(&self, work: impl FnOnce(&mut IoContext<'_>) + Send + 'static) -> Result<(), KernelError> {
        let mut st = self.enter()?;
        st.events.push_back(Box::new(work));
        Ok(())
    }

    /// Wait for the next process-termination event addressed to the caller.
    pub fn wait_event(&self, timeout: Option<Duration>) -> Result<ProcEvent, KernelError> {
        loop {
            let msg = self.recv(MsgClass::Event, timeout)?;
            match ProcEvent::decode(&msg.data) {
                Ok(event) => return Ok(event),
                Err(err) => log::debug!("ignoring event from {}: {}", msg.src, err),
            }
        }
    }

    /// Reap child termination events until the caller can no longer wait.
    pub fn reap_children(&self) -> KernelError {
        loop {
            match self.wait_event(None) {
                Ok(event) => log::info!("process {} died, status {}", event.pid, event.status),
                Err(err) => return err,
            }
        }
    }

    /// Process table listing.
    pub fn dump(&self) -> Result<String, KernelError> {
        Ok(self.enter()?.dump())
    }

    pub fn memory_stats(&self) -> Result<MemoryStats, KernelError> {
        Ok(self.enter()?.memory_stats())
    }

    pub fn check_invariants(&self) -> Result<(), KernelError> {
        self.enter()?.check_invariants().map_err(KernelError::InvariantViolated)
    }

    /// State of process `pid`, if it is still in the table.
    pub fn state_of(&self, pid: Pid) -> Result<Option<ProcState>, KernelError> {
        let st = self.enter()?;
        Ok(st.procs.find(pid).map(|slot| st.procs[slot].state))
    }
}

/// Thread body of a kernel process.
pub(crate) fn run_kernel_process(shared: Arc<Shared>, slot: usize, pid: Pid, body: ProcBody) {
    let irq = {
        let st = shared.lock();
        let st = shared.park(st, slot, pid);
        if shared.resumed(&st, pid).is_err() {
            return;
        }
        st.irq.clone()
    };
    let sys = Sys { shared: shared.clone(), slot, pid, traps: TrapDispatcher::new(irq), spawned: true };
    let status = match panic::catch_unwind(AssertUnwindSafe(move || body(sys))) {
        Ok(status) => status,
        Err(payload) if payload.is::<Exited>() => return,
        Err(payload) => {
            let why = payload
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| payload.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic");
            let Some(st) = shared.try_lock() else { return };
            st.fatal(format!("kernel process {} panicked: {}", pid, why));
        }
    };
    let st = shared.lock();
    if shared.resumed(&st, pid).is_ok() {
        drop(shared.exit(st, status));
    }
}
