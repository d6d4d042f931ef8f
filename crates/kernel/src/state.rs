//! Kernel tables and every operation on them that completes without a
//! context switch. Whoever holds the kernel lock owns this state.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, OnceLock};
use std::time::Duration;

use serde::Serialize;
use types::{MsgClass, Pid, ProcEvent, Prot, page_number, status, virt_base_page};

use crate::clock::{Clock, Timer};
use crate::config::{Config, KernelConfig};
use crate::console::Console;
use crate::error::KernelError;
use crate::intr::{Deferred, DeviceSource, InterruptController, IoContext, IoEvent, Irq};
use crate::mmu::{FrameNo, Mmu};
use crate::paging::{BlockStore, FrameState, FrameTable, PageRef, PageState, SwapSpace};
use crate::proc::{Message, ProcKind, ProcState, ProcTable};

/// One condition variable per process slot, plus the reason the kernel died
/// if it did.
pub(crate) struct Gates {
    slots: Vec<Condvar>,
    fatal: OnceLock<String>,
}

impl Gates {
    pub fn new(slots: usize) -> Self {
        Self { slots: (0..slots).map(|_| Condvar::new()).collect(), fatal: OnceLock::new() }
    }

    pub fn slot(&self, slot: usize) -> &Condvar {
        &self.slots[slot]
    }

    pub fn notify(&self, slot: usize) {
        self.slots[slot].notify_all();
    }

    pub fn wake_all(&self) {
        self.slots.iter().for_each(Condvar::notify_all);
    }

    pub fn fatal_reason(&self) -> &str {
        self.fatal.get().map(String::as_str).unwrap_or("kernel lock poisoned")
    }
}

/// Physical memory and backing-store occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub frames_total: usize,
    pub frames_free: usize,
    pub swap_total: usize,
    pub swap_free: usize,
    pub tlb_entries: usize,
    pub tlb_mapped: usize,
    pub resident_pages: usize,
    pub swapped_pages: usize,
}

pub(crate) struct KernelState {
    pub config: KernelConfig,
    pub clock: Clock,
    pub procs: ProcTable,
    pub ready: VecDeque<usize>,
    /// Slot of the process holding the CPU.
    pub current: usize,
    pub mmu: Mmu,
    pub frames: FrameTable,
    pub swap: SwapSpace,
    pub shutting_down: bool,
    pub curfew: Option<u64>,
    pub halted: bool,
    pub events: VecDeque<Deferred>,
    pub devices: Vec<Option<Box<dyn DeviceSource>>>,
    pub io_tx: Sender<IoEvent>,
    io_rx: Receiver<IoEvent>,
    pub console: Console,
    pub irq: Arc<InterruptController>,
    pub timer: Option<Timer>,
    pub gates: Arc<Gates>,
}

impl KernelState {
    pub fn new(
        config: KernelConfig,
        swap: Box<dyn BlockStore>,
        console: Console,
        irq: Arc<InterruptController>,
    ) -> Self {
        let (io_tx, io_rx) = mpsc::channel();
        Self {
            clock: Clock::start(),
            procs: ProcTable::new(config.max_procs),
            ready: VecDeque::new(),
            current: 0,
            mmu: Mmu::new(config.virt_pages, config.phys_frames, config.tlb_entries),
            frames: FrameTable::new(config.phys_frames),
            swap: SwapSpace::new(swap),
            shutting_down: false,
            curfew: None,
            halted: false,
            events: VecDeque::new(),
            devices: Vec::new(),
            io_tx,
            io_rx,
            console,
            irq,
            timer: None,
            gates: Arc::new(Gates::new(config.max_procs)),
            config,
        }
    }

    /// Kernel state is corrupt: record why, wake everyone so they observe the
    /// poisoned lock, and unwind with the lock held.
    pub fn fatal(&self, msg: impl Into<String>) -> ! {
        let msg = msg.into();
        log::error!("kernel fatal: {}", msg);
        let _ = self.gates.fatal.set(msg.clone());
        self.gates.wake_all();
        panic!("kernel fatal: {}", msg);
    }

    pub fn current_pid(&self) -> Pid {
        self.procs[self.current].pid
    }

    /// `pid` holds the CPU and has not terminated.
    pub fn is_running(&self, pid: Pid) -> bool {
        let p = &self.procs[self.current];
        p.pid == pid && matches!(p.state, ProcState::Runnable | ProcState::Waiting)
    }

    /// Wake-up condition of a parked process context.
    pub fn may_resume(&self, slot: usize, pid: Pid) -> bool {
        self.halted || !self.procs.holds(slot, pid) || self.current == slot
    }

    // ---------------------------------------------------------------
    // Process lifecycle
    // ---------------------------------------------------------------

    /// Allocate a table slot for a new process owned by `owner`.
    pub fn admit(&mut self, owner: Pid, descr: &str, uid: u32, kind: ProcKind) -> Result<(usize, Pid), KernelError> {
        if self.shutting_down || self.halted {
            return Err(KernelError::ShuttingDown);
        }
        let parent = self.procs.find(owner).ok_or(KernelError::UnknownProcess(owner))?;
        let parent_uid = self.procs[parent].uid;
        let uid = if parent_uid != 0 { parent_uid } else { uid };
        let slot = self
            .procs
            .alloc(owner, descr, uid, kind, self.config.virt_pages)
            .ok_or(KernelError::TableFull)?;
        let pid = self.procs[slot].pid;
        log::info!("created process {} ({}) owner {} uid {}", pid, descr, owner, uid);
        Ok((slot, pid))
    }

    pub fn enqueue(&mut self, slot: usize) {
        if self.ready.contains(&slot) {
            self.fatal(format!("process {} queued twice", self.procs[slot].pid));
        }
        self.ready.push_back(slot);
    }

    /// Next runnable process off the ready queue. Zombies found on the way are
    /// reclaimed.
    pub fn pop_ready(&mut self) -> Option<usize> {
        while let Some(slot) = self.ready.pop_front() {
            match self.procs[slot].state {
                ProcState::Runnable => return Some(slot),
                ProcState::Zombie => self.release(slot),
                other => self.fatal(format!("process {} on the ready queue while {}", self.procs[slot].pid, other)),
            }
        }
        None
    }

    pub fn wakeup(&mut self, slot: usize) {
        let p = &mut self.procs[slot];
        p.state = ProcState::Runnable;
        p.alarm = None;
        for mbox in p.mailboxes.iter_mut() {
            mbox.waiting = false;
        }
        if slot != self.current {
            self.enqueue(slot);
        }
    }

    /// Mark a process terminated: notify its owner, fail RPCs waiting on it
    /// and give back its memory. The table slot stays until [`release`].
    ///
    /// [`release`]: KernelState::release
    pub fn terminate(&mut self, slot: usize, status: i32) {
        match self.procs[slot].state {
            ProcState::Zombie => return,
            ProcState::Free => self.fatal(format!("terminating free slot {}", slot)),
            ProcState::Runnable | ProcState::Waiting => {}
        }
        let (pid, owner) = (self.procs[slot].pid, self.procs[slot].owner);
        log::info!("process {} ({}) terminated, status {}", pid, self.procs[slot].descr, status);
        {
            let p = &mut self.procs[slot];
            p.state = ProcState::Zombie;
            p.alarm = None;
            for mbox in p.mailboxes.iter_mut() {
                mbox.waiting = false;
            }
        }

        let event = ProcEvent { pid, status }.encode();
        if let Err(err) = self.send(pid, owner, MsgClass::Event, event.to_vec()) {
            log::debug!("owner {} of process {} not notified: {}", owner, pid, err);
        }

        for other in self.procs.live_slots() {
            let p = &self.procs[other];
            if p.state == ProcState::Waiting && p.mailbox(MsgClass::Reply).waiting && p.server == Some(pid) {
                log::debug!("process {} loses its server {}", p.pid, pid);
                self.wakeup(other);
            }
        }

        self.release_memory(slot);
    }

    /// Terminate `slot` on behalf of `killer` (the kernel when `None`).
    pub fn zap(&mut self, killer: Option<usize>, slot: usize, status: i32) -> Result<(), KernelError> {
        if let Some(k) = killer {
            let (ku, tu) = (self.procs[k].uid, self.procs[slot].uid);
            if ku != 0 && ku != tu {
                return Err(KernelError::PermissionDenied {
                    killer: self.procs[k].pid,
                    target: self.procs[slot].pid,
                });
            }
        }
        match self.procs[slot].state {
            ProcState::Runnable => self.terminate(slot, status),
            ProcState::Waiting => {
                self.terminate(slot, status);
                if slot != self.current {
                    self.release(slot);
                }
            }
            ProcState::Zombie => {}
            ProcState::Free => self.fatal(format!("killing free slot {}", slot)),
        }
        Ok(())
    }

    /// Return a terminated process's slot to the table.
    pub fn release(&mut self, slot: usize) {
        if self.procs[slot].state != ProcState::Zombie {
            self.fatal(format!(
                "releasing process {} while {}",
                self.procs[slot].pid, self.procs[slot].state
            ));
        }
        self.release_memory(slot);
        log::debug!("released process {}", self.procs[slot].pid);
        self.procs.free(slot);
        self.gates.notify(slot);
    }

    /// Free every frame and swap slot of `slot`. Idempotent.
    fn release_memory(&mut self, slot: usize) {
        if slot == self.current {
            self.flush_tlb();
        }
        for idx in 0..self.procs[slot].pages.len() {
            match self.procs[slot].pages[idx] {
                PageState::Valid { frame } => self.frames.release(frame),
                PageState::OnDisk { slot: swap } => self.swap.free(swap),
                PageState::Uninitialized => {}
            }
            self.procs[slot].pages[idx] = PageState::Uninitialized;
        }
    }

    pub fn flush_tlb(&mut self) {
        if let Err(err) = self.mmu.flush_all() {
            self.fatal(err.to_string());
        }
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    pub fn send(&mut self, src: Pid, dst: Pid, class: MsgClass, data: Vec<u8>) -> Result<(), KernelError> {
        let slot = self.procs.find(dst).ok_or(KernelError::UnknownProcess(dst))?;
        let p = &mut self.procs[slot];
        if p.state == ProcState::Zombie {
            return Err(KernelError::ProcessDead(dst));
        }
        if class == MsgClass::Reply
            && !(p.state == ProcState::Waiting && p.mailbox(MsgClass::Reply).waiting && p.server == Some(src))
        {
            return Err(KernelError::NotAwaitingReply(dst));
        }
        log::trace!(
            "msg {} -> {} {:?} {} bytes {}",
            src,
            dst,
            class,
            data.len(),
            hex::encode(&data[..data.len().min(32)])
        );
        let mbox = p.mailbox_mut(class);
        mbox.queue.push_back(Message { src, data });
        if mbox.waiting {
            self.wakeup(slot);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Scheduler support
    // ---------------------------------------------------------------

    /// Reap everything during shutdown, otherwise fire expired alarms.
    /// Returns when the next alarm is due.
    pub fn sweep(&mut self, now: u64) -> u64 {
        let mut next = now + Config::IDLE_WAIT_MS;
        for slot in self.procs.live_slots() {
            if !self.procs[slot].is_live() {
                continue;
            }
            if self.shutting_down {
                let _ = self.zap(None, slot, status::SHUTDOWN);
                continue;
            }
            let p = &self.procs[slot];
            if p.state != ProcState::Waiting {
                continue;
            }
            match p.alarm {
                Some(at) if at <= now => {
                    log::trace!("alarm of process {} expired", p.pid);
                    self.wakeup(slot);
                }
                Some(at) => next = next.min(at),
                None => {}
            }
        }
        next
    }

    /// Run deferred work, then deliver device input, waiting up to `wait`
    /// for some to arrive when there was nothing else to do.
    pub fn run_io(&mut self, wait: Duration) {
        let batch: Vec<Deferred> = self.events.drain(..).collect();
        let mut wait = if batch.is_empty() { wait } else { Duration::ZERO };
        for work in batch {
            work(&mut IoContext { st: self });
        }
        self.irq.clear(Irq::Io);
        loop {
            let event = if wait.is_zero() {
                self.io_rx.try_recv().ok()
            } else {
                self.io_rx.recv_timeout(wait).ok()
            };
            let Some(event) = event else { break };
            self.deliver(event);
            wait = Duration::ZERO;
        }
    }

    fn deliver(&mut self, event: IoEvent) {
        let Some(mut device) = self.devices.get_mut(event.device).and_then(Option::take) else {
            log::warn!("input for unknown device {}", event.device);
            return;
        };
        device.read_avail(&mut IoContext { st: self }, event.data);
        self.devices[event.device] = Some(device);
    }

    pub fn halt(&mut self, why: &str) {
        if self.halted {
            return;
        }
        self.halted = true;
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
        log::info!("kernel halted: {}", why);
        self.gates.wake_all();
    }

    // ---------------------------------------------------------------
    // Paging
    // ---------------------------------------------------------------

    /// Resolve a fault of the current process at `addr`. An address outside
    /// the virtual range terminates the process.
    pub fn page_fault(&mut self, addr: u32) -> Result<(), KernelError> {
        let cur = self.current;
        if !self.mmu.range().contains(addr) {
            log::warn!(
                "process {} ({}) touched {:#010x} outside its virtual range",
                self.procs[cur].pid,
                self.procs[cur].descr,
                addr
            );
            self.terminate(cur, status::ILLEGAL_MEMORY);
            return Err(KernelError::Terminated);
        }
        let vpage = page_number(addr);
        if self.mmu.lookup(vpage).is_some() {
            self.fatal(format!("fault at {:#010x} on a page the TLB maps", addr));
        }
        let idx = (vpage - virt_base_page()) as usize;
        let owner = PageRef { proc: cur, page: idx };
        let frame = match self.procs[cur].pages[idx] {
            PageState::Valid { frame } => {
                self.frames.touch(frame);
                frame
            }
            PageState::Uninitialized => {
                let frame = self.alloc_frame(owner);
                self.fill_frame(cur, vpage, frame);
                frame
            }
            PageState::OnDisk { slot } => {
                let frame = self.alloc_frame(owner);
                if let Err(err) = self.swap.read_page(slot, self.mmu.frame_mut(frame)) {
                    self.fatal(format!("swap read of slot {} failed: {}", slot, err));
                }
                self.swap.free(slot);
                log::trace!("page {:#x} of process {} in from swap slot {}", vpage, self.procs[cur].pid, slot);
                frame
            }
        };
        self.procs[cur].pages[idx] = PageState::Valid { frame };
        let tlb_slot = self.mmu.next_slot();
        if let Err(err) = self.mmu.map(tlb_slot, vpage, frame, Prot::RWX) {
            self.fatal(err.to_string());
        }
        Ok(())
    }

    fn fill_frame(&mut self, slot: usize, vpage: u32, frame: FrameNo) {
        let exe = self.procs[slot].exec().cloned();
        let buf = self.mmu.frame_mut(frame);
        match exe {
            Some(exe) if exe.backs(vpage) => {
                if let Err(err) = exe.read_page(vpage, buf) {
                    log::warn!("{}: reading page {:#x} failed, zero-filling: {}", exe.name(), vpage, err);
                    buf.fill(0);
                }
            }
            _ => buf.fill(0),
        }
    }

    /// A frame for `owner`, evicting a page to swap when none is free.
    fn alloc_frame(&mut self, owner: PageRef) -> FrameNo {
        if let Some(frame) = self.frames.take_free(owner) {
            return frame;
        }
        let Some((frame, victim)) = self.frames.select_victim() else {
            self.fatal("no frame can be evicted");
        };
        if self.procs[victim.proc].pages[victim.page] != (PageState::Valid { frame }) {
            self.fatal(format!("frame {} owner does not map it", frame));
        }
        let vpage = virt_base_page() + victim.page as u32;
        if victim.proc == self.current {
            if let Err(err) = self.mmu.unmap(vpage) {
                self.fatal(err.to_string());
            }
        }
        let Some(swap) = self.swap.alloc() else {
            self.fatal("out of swap space");
        };
        if let Err(err) = self.swap.write_page(swap, self.mmu.frame(frame)) {
            self.fatal(format!("swap write of slot {} failed: {}", swap, err));
        }
        self.procs[victim.proc].pages[victim.page] = PageState::OnDisk { slot: swap };
        log::trace!(
            "page {:#x} of process {} out from frame {} to swap slot {}",
            vpage,
            self.procs[victim.proc].pid,
            frame,
            swap
        );
        self.frames.assign(frame, owner);
        frame
    }

    // ---------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------

    pub fn memory_stats(&self) -> MemoryStats {
        let mut resident = 0;
        let mut swapped = 0;
        for p in self.procs.iter() {
            for page in &p.pages {
                match page {
                    PageState::Valid { .. } => resident += 1,
                    PageState::OnDisk { .. } => swapped += 1,
                    PageState::Uninitialized => {}
                }
            }
        }
        MemoryStats {
            frames_total: self.frames.len(),
            frames_free: self.frames.free_count(),
            swap_total: self.swap.capacity(),
            swap_free: self.swap.free_count(),
            tlb_entries: self.mmu.entries().len(),
            tlb_mapped: self.mmu.mapped_count(),
            resident_pages: resident,
            swapped_pages: swapped,
        }
    }

    /// Cross-check the TLB, the frame table, the page tables and the ready
    /// queue against each other.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.mmu.check_invariants()?;

        let base = virt_base_page();
        for entry in self.mmu.entries() {
            let Some(frame) = entry.frame else { continue };
            let idx = (entry.page - base) as usize;
            if self.procs[self.current].pages.get(idx) != Some(&PageState::Valid { frame }) {
                return Err(format!(
                    "TLB maps page {:#x} to frame {} but the current process does not",
                    entry.page, frame
                ));
            }
        }

        let mut free = 0;
        for frame in 0..self.frames.len() {
            match self.frames.state(frame) {
                FrameState::Free => free += 1,
                state => {
                    let Some(r) = state.owner() else { continue };
                    let p = &self.procs[r.proc];
                    if !p.is_live() || p.pages.get(r.page) != Some(&PageState::Valid { frame }) {
                        return Err(format!("frame {} owned by slot {} page {} which does not map it", frame, r.proc, r.page));
                    }
                }
            }
        }
        if free != self.frames.free_count() {
            return Err(format!("{} free frames but {} on the free list", free, self.frames.free_count()));
        }

        let mut swap_used = vec![false; self.swap.capacity()];
        for (slot, p) in (0..self.procs.capacity()).map(|s| (s, &self.procs[s])) {
            for (idx, page) in p.pages.iter().enumerate() {
                match *page {
                    PageState::Valid { frame } => {
                        if self.frames.state(frame).owner() != Some(PageRef { proc: slot, page: idx }) {
                            return Err(format!("process {} page {} maps frame {} owned by another", p.pid, idx, frame));
                        }
                    }
                    PageState::OnDisk { slot: swap } => {
                        if std::mem::replace(&mut swap_used[swap], true) {
                            return Err(format!("swap slot {} holds two pages", swap));
                        }
                    }
                    PageState::Uninitialized => {}
                }
            }
        }

        for (i, &slot) in self.ready.iter().enumerate() {
            if slot == self.current {
                return Err(format!("running process {} is on the ready queue", self.procs[slot].pid));
            }
            if self.ready.iter().skip(i + 1).any(|&s| s == slot) {
                return Err(format!("process {} queued twice", self.procs[slot].pid));
            }
            if !matches!(self.procs[slot].state, ProcState::Runnable | ProcState::Zombie) {
                return Err(format!("process {} queued while {}", self.procs[slot].pid, self.procs[slot].state));
            }
        }
        Ok(())
    }

    /// Process table listing.
    pub fn dump(&self) -> String {
        let now = self.clock.now_ms();
        let runnable = self.procs.iter().filter(|p| p.state == ProcState::Runnable).count();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} processes (current = {}, nrunnable = {}):",
            self.procs.count(),
            self.current_pid(),
            runnable
        );
        let _ = writeln!(out, "PID   DESCRIPTION  UID STATUS      OWNER ALARM   EXEC");
        for slot in self.procs.live_slots() {
            let p = &self.procs[slot];
            let status = match p.state {
                ProcState::Runnable if slot == self.current => "RUNNING    ".to_string(),
                ProcState::Runnable => "RUNNABLE   ".to_string(),
                ProcState::Waiting if p.mailbox(MsgClass::Reply).waiting => {
                    format!("AWAIT {:5}", p.server.unwrap_or(0))
                }
                ProcState::Waiting if p.mailbox(MsgClass::Request).waiting => "AWAIT REQST".to_string(),
                ProcState::Waiting => "AWAIT EVENT".to_string(),
                ProcState::Zombie => "ZOMBIE     ".to_string(),
                ProcState::Free => continue,
            };
            let alarm = match (p.state, p.alarm) {
                (ProcState::Waiting, Some(at)) => format!("{:5}", at.saturating_sub(now)),
                _ => "     ".to_string(),
            };
            let exec = p.exec().map(|e| format!("   {}", e.name())).unwrap_or_default();
            let _ = writeln!(
                out,
                "{:4}: {:<12.12} {:3} {} {:5} {}{}",
                p.pid, p.descr, p.uid, status, p.owner, alarm, exec
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Executable, ImageBuilder};
    use crate::paging::RamDisk;
    use types::{BLOCKS_PER_PAGE, PAGE_SIZE, VIRT_BASE};
    use vm::{Bus, Width};

    fn small_config(frames: usize) -> KernelConfig {
        KernelConfig {
            virt_pages: 16,
            phys_frames: frames,
            tlb_entries: 4,
            swap_pages: 32,
            timer_interval_ms: 0,
            max_procs: 4,
            ..KernelConfig::default()
        }
    }

    fn state(frames: usize) -> KernelState {
        let config = small_config(frames);
        let disk = RamDisk::new(config.swap_pages * BLOCKS_PER_PAGE);
        let mut st = KernelState::new(config, Box::new(disk), Console::capture().0, Arc::new(InterruptController::new()));
        let main = st.procs.alloc(0, "main", 0, ProcKind::Kernel, 16).unwrap();
        st.current = main;
        st
    }

    fn page(i: u32) -> u32 {
        VIRT_BASE + i * PAGE_SIZE as u32
    }

    #[test]
    fn zero_segment_page_faults_in_zeroed() {
        let mut st = state(4);
        let base = virt_base_page();
        let image = ImageBuilder::new(VIRT_BASE)
            .segment(base, 1, Prot::RWX, &[0; PAGE_SIZE])
            .build()
            .unwrap();
        let exe = Arc::new(Executable::from_bytes("zero", image).unwrap());
        let (slot, _) = st.admit(1, "zero", 0, ProcKind::User(exe)).unwrap();
        st.current = slot;

        st.page_fault(VIRT_BASE).unwrap();
        let PageState::Valid { frame } = st.procs[slot].pages[0] else { panic!("page not valid") };
        assert!(st.mmu.frame(frame).iter().all(|b| *b == 0));
        assert_eq!(st.procs[slot].state, ProcState::Runnable);
        assert_eq!(st.mmu.range_mut().fetch(VIRT_BASE).unwrap(), 0);
        st.check_invariants().unwrap();
    }

    #[test]
    fn evicted_pages_come_back_intact() {
        let mut st = state(4);
        for i in 0..10u32 {
            st.page_fault(page(i)).unwrap();
            st.mmu.range_mut().store(page(i) + 8, Width::Word, 0x1000 + i).unwrap();
            st.check_invariants().unwrap();
        }
        let stats = st.memory_stats();
        assert_eq!(stats.resident_pages, 4);
        assert_eq!(stats.swapped_pages, 6);

        for i in 0..10u32 {
            if st.mmu.lookup(page_number(page(i))).is_none() {
                st.page_fault(page(i)).unwrap();
            }
            assert_eq!(st.mmu.range_mut().load(page(i) + 8, Width::Word).unwrap(), 0x1000 + i);
            st.check_invariants().unwrap();
        }
    }

    #[test]
    fn out_of_range_fault_terminates() {
        let mut st = state(4);
        let (slot, pid) = st.admit(1, "wild", 0, ProcKind::Kernel).unwrap();
        st.current = slot;
        assert_eq!(st.page_fault(0x10), Err(KernelError::Terminated));
        assert_eq!(st.procs[slot].state, ProcState::Zombie);

        let main = st.procs.find(1).unwrap();
        let event = st.procs[main].mailbox(MsgClass::Event).queue.front().cloned().unwrap();
        assert_eq!(ProcEvent::decode(&event.data).unwrap(), ProcEvent { pid, status: status::ILLEGAL_MEMORY });
    }

    #[test]
    fn termination_frees_memory_once() {
        let mut st = state(4);
        let (slot, _) = st.admit(1, "p", 0, ProcKind::Kernel).unwrap();
        st.current = slot;
        for i in 0..6 {
            st.page_fault(page(i)).unwrap();
        }
        st.terminate(slot, 0);
        st.terminate(slot, 0);
        st.release(slot);
        let stats = st.memory_stats();
        assert_eq!(stats.frames_free, 4);
        assert_eq!(stats.swap_free, stats.swap_total);
        assert_eq!(stats.tlb_mapped, 0);
    }

    #[test]
    #[should_panic(expected = "out of swap space")]
    fn swap_exhaustion_is_fatal() {
        let mut config = small_config(4);
        config.swap_pages = 1;
        let disk = RamDisk::new(BLOCKS_PER_PAGE);
        let mut st = KernelState::new(config, Box::new(disk), Console::capture().0, Arc::new(InterruptController::new()));
        st.current = st.procs.alloc(0, "main", 0, ProcKind::Kernel, 16).unwrap();
        for i in 0..6 {
            st.page_fault(page(i)).unwrap();
        }
    }

    #[test]
    #[should_panic(expected = "TLB maps")]
    fn fault_on_mapped_page_is_fatal() {
        let mut st = state(4);
        st.page_fault(page(0)).unwrap();
        st.page_fault(page(0) + 4).unwrap();
    }

    #[test]
    fn reply_needs_waiting_caller() {
        let mut st = state(4);
        let (slot, pid) = st.admit(1, "client", 0, ProcKind::Kernel).unwrap();
        assert_eq!(
            st.send(1, pid, MsgClass::Reply, vec![1]),
            Err(KernelError::NotAwaitingReply(pid))
        );
        st.procs[slot].state = ProcState::Waiting;
        st.procs[slot].mailbox_mut(MsgClass::Reply).waiting = true;
        st.procs[slot].server = Some(1);
        st.send(1, pid, MsgClass::Reply, vec![1]).unwrap();
        assert_eq!(st.procs[slot].state, ProcState::Runnable);
        assert_eq!(st.ready.back(), Some(&slot));
    }

    #[test]
    fn dump_lists_every_process() {
        let mut st = state(4);
        st.admit(1, "server", 0, ProcKind::Kernel).unwrap();
        let text = st.dump();
        assert!(text.starts_with("2 processes (current = 1"));
        assert!(text.contains("RUNNING"));
        assert!(text.contains("server"));
    }
}
