//! User processes: an emulated RV32IM processor stepping through the live
//! virtual range, with every fault, `ecall` and interrupt entering the kernel
//! as a trap.

use std::sync::Arc;

use types::{Pid, UserEnv, status, virt_top};
use vm::{CPU, Register, StepOutcome};

use crate::exec::Executable;
use crate::sched::{Guard, Shared};
use crate::syscall::{copy_out, handle_syscall};
use crate::trap::{Trap, TrapDispatcher, TrapFrame, TrapHandler};

/// Kernel side of a user trap. Owns the lock guard while the trap is handled.
struct UserTrap<'a> {
    shared: &'a Shared,
    st: Option<Guard<'a>>,
    pid: Pid,
    alive: bool,
}

impl TrapHandler for UserTrap<'_> {
    fn handle_trap(&mut self, frame: &TrapFrame) {
        let Some(mut st) = self.st.take() else { return };
        let st = match frame.trap {
            Trap::PageFault { addr } => match st.page_fault(addr) {
                Ok(()) => st,
                Err(_) => {
                    self.alive = false;
                    self.shared.reschedule(st)
                }
            },
            Trap::Clock | Trap::Io => {
                let st = self.shared.reschedule(st);
                self.alive = self.shared.resumed(&st, self.pid).is_ok();
                st
            }
            Trap::Syscall { arg } => {
                let (st, res) = handle_syscall(self.shared, st, arg);
                self.alive = res.is_ok();
                st
            }
        };
        self.st = Some(st);
    }
}

/// Thread body of a user process.
pub(crate) fn run_user_process(shared: Arc<Shared>, slot: usize, pid: Pid, exe: Arc<Executable>) {
    let st = shared.lock();
    let st = shared.park(st, slot, pid);
    if shared.resumed(&st, pid).is_err() {
        return;
    }

    let env = UserEnv { pid, owner: st.procs[slot].owner, uid: st.procs[slot].uid };
    let env_addr = (virt_top(st.config.virt_pages) - UserEnv::ENCODED_LEN as u32) & !0xf;
    let traps = TrapDispatcher::new(st.irq.clone());
    let (mut st, res) = copy_out(&shared, st, env_addr, &env.encode());
    if res.is_err() {
        return;
    }

    let mut cpu = CPU::new(exe.entry());
    cpu.verbose = log::log_enabled!(log::Level::Trace);
    cpu.set_reg(Register::Sp, env_addr);
    cpu.set_reg(Register::A0, env_addr);
    log::debug!("process {} starts {} at {:#010x}", pid, exe.name(), cpu.pc);

    loop {
        let frame = match traps.pending(cpu.pc, cpu.reg(Register::Sp)) {
            Some(frame) => frame,
            None => {
                let trap = match cpu.step(st.mmu.range_mut()) {
                    StepOutcome::Retired => continue,
                    StepOutcome::Fault(fault) => Trap::PageFault { addr: fault.addr },
                    StepOutcome::Ecall => Trap::Syscall { arg: cpu.reg(Register::A0) },
                    StepOutcome::Ebreak => {
                        log::warn!("process {} hit a breakpoint at {:#010x}", pid, cpu.pc);
                        log::debug!("process {} registers:\n{}", pid, cpu.dump());
                        return die(&shared, st, status::ILLEGAL_MEMORY);
                    }
                    StepOutcome::Illegal(word) => {
                        log::warn!("process {} illegal instruction {:#010x} at {:#010x}", pid, word, cpu.pc);
                        log::debug!("process {} registers:\n{}", pid, cpu.dump());
                        return die(&shared, st, status::ILLEGAL_MEMORY);
                    }
                };
                TrapFrame { trap, ip: cpu.pc, sp: cpu.reg(Register::Sp) }
            }
        };

        let mut handler = UserTrap { shared: &shared, st: Some(st), pid, alive: true };
        let resume = traps.dispatch(frame, &mut handler);
        let Some(next) = handler.st.take() else { return };
        st = next;
        if !handler.alive {
            return;
        }
        cpu.pc = resume.ip;
        st.mmu.sync_all();
    }
}

fn die(shared: &Shared, mut st: Guard<'_>, status: i32) {
    let cur = st.current;
    st.terminate(cur, status);
    drop(shared.reschedule(st));
}
