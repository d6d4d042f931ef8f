//! Syscalls made by user processes.
//!
//! The user passes the address of a [`SyscallRecord`] in `a0`. The record and
//! every buffer it points to are copied through the live virtual range,
//! faulting pages in as needed; a bad address terminates the caller just
//! like a bad load would. Failures the caller can recover from come back as
//! `result = -1`.

use types::{MsgClass, PAGE_SIZE, SyscallKind, SyscallRecord, status};

use crate::error::KernelError;
use crate::sched::{Guard, Shared};

/// Copy `buf.len()` bytes from user address `addr`.
pub(crate) fn copy_in<'a>(
    shared: &'a Shared,
    mut st: Guard<'a>,
    addr: u32,
    buf: &mut [u8],
) -> (Guard<'a>, Result<(), KernelError>) {
    let mut done = 0;
    while done < buf.len() {
        let at = addr.wrapping_add(done as u32);
        let chunk = (buf.len() - done).min(PAGE_SIZE - at as usize % PAGE_SIZE);
        match st.mmu.range().read(at, &mut buf[done..done + chunk]) {
            Ok(()) => done += chunk,
            Err(fault) => {
                if let Err(err) = st.page_fault(fault.addr) {
                    return (shared.reschedule(st), Err(err));
                }
            }
        }
    }
    (st, Ok(()))
}

/// Copy `data` to user address `addr`.
pub(crate) fn copy_out<'a>(
    shared: &'a Shared,
    mut st: Guard<'a>,
    addr: u32,
    data: &[u8],
) -> (Guard<'a>, Result<(), KernelError>) {
    let mut done = 0;
    while done < data.len() {
        let at = addr.wrapping_add(done as u32);
        let chunk = (data.len() - done).min(PAGE_SIZE - at as usize % PAGE_SIZE);
        match st.mmu.range_mut().write(at, &data[done..done + chunk]) {
            Ok(()) => done += chunk,
            Err(fault) => {
                if let Err(err) = st.page_fault(fault.addr) {
                    return (shared.reschedule(st), Err(err));
                }
            }
        }
    }
    (st, Ok(()))
}

fn kill_caller<'a>(shared: &'a Shared, mut st: Guard<'a>, status: i32) -> (Guard<'a>, Result<(), KernelError>) {
    let cur = st.current;
    st.terminate(cur, status);
    (shared.reschedule(st), Err(KernelError::Terminated))
}

/// Err only when the caller is no longer alive to resume.
type Step<'a> = (Guard<'a>, Result<(), KernelError>);

/// Service the syscall whose record lives at user address `arg`.
pub(crate) fn handle_syscall<'a>(shared: &'a Shared, st: Guard<'a>, arg: u32) -> Step<'a> {
    let mut raw = [0u8; SyscallRecord::ENCODED_LEN];
    let (st, res) = copy_in(shared, st, arg, &mut raw);
    if let Err(err) = res {
        return (st, Err(err));
    }
    let pid = st.current_pid();
    log::trace!("process {} syscall {}", pid, hex::encode(raw));

    let mut rec = match SyscallRecord::decode(&raw) {
        Ok(rec) => rec,
        Err(err) => {
            log::warn!("process {} passed a malformed syscall record: {}", pid, err);
            return kill_caller(shared, st, status::ILLEGAL_MEMORY);
        }
    };
    let Some(kind) = SyscallKind::from_u32(rec.kind) else {
        log::warn!("process {} made unknown syscall {}", pid, rec.kind);
        return kill_caller(shared, st, status::ILLEGAL_MEMORY);
    };

    let (st, res) = match kind {
        SyscallKind::Exit => {
            let st = shared.exit(st, rec.args[0] as i32);
            return (st, Err(KernelError::Terminated));
        }
        SyscallKind::Print => sys_print(shared, st, &mut rec),
        SyscallKind::Recv => sys_recv(shared, st, &mut rec),
        SyscallKind::Send => sys_send(shared, st, &mut rec),
        SyscallKind::Rpc => sys_rpc(shared, st, &mut rec),
        SyscallKind::GetTime => {
            let now = st.clock.now_ms();
            rec.args[0] = now as u32;
            rec.args[1] = (now >> 32) as u32;
            rec.result = 0;
            (st, Ok(()))
        }
    };
    if let Err(err) = res {
        return (st, Err(err));
    }
    if let Err(err) = shared.resumed(&st, pid) {
        return (st, Err(err));
    }
    copy_out(shared, st, arg, &rec.encode())
}

/// Largest buffer a syscall may name: the whole virtual range.
fn transfer_limit(st: &Guard<'_>) -> usize {
    st.config.virt_pages * PAGE_SIZE
}

fn fail<'a>(st: Guard<'a>, rec: &mut SyscallRecord, why: impl std::fmt::Display) -> Step<'a> {
    log::debug!("process {} syscall {} failed: {}", st.current_pid(), rec.kind, why);
    rec.result = -1;
    (st, Ok(()))
}

fn sys_print<'a>(shared: &'a Shared, st: Guard<'a>, rec: &mut SyscallRecord) -> Step<'a> {
    let (ptr, len) = (rec.args[0], rec.args[1] as usize);
    if len > transfer_limit(&st) {
        return fail(st, rec, format!("print of {} bytes", len));
    }
    let mut text = vec![0u8; len];
    let (mut st, res) = copy_in(shared, st, ptr, &mut text);
    if res.is_err() {
        return (st, res);
    }
    st.console.write(&text);
    rec.result = len as i32;
    (st, Ok(()))
}

fn sys_recv<'a>(shared: &'a Shared, st: Guard<'a>, rec: &mut SyscallRecord) -> Step<'a> {
    let class = match MsgClass::from_u32(rec.args[0]) {
        Ok(MsgClass::Reply) => return fail(st, rec, KernelError::BadClass(MsgClass::Reply)),
        Ok(class) => class,
        Err(err) => return fail(st, rec, err),
    };
    let (max_wait, ptr, size) = (rec.args[1] as u64, rec.args[2], rec.args[3] as usize);
    let pid = st.current_pid();
    let (st, res) = shared.receive(st, class, max_wait);
    let msg = match res {
        Ok(msg) => msg,
        Err(err) => {
            if shared.resumed(&st, pid).is_err() {
                return (st, Err(err));
            }
            return fail(st, rec, err);
        }
    };
    let len = msg.data.len().min(size);
    let (st, res) = copy_out(shared, st, ptr, &msg.data[..len]);
    if res.is_err() {
        return (st, res);
    }
    rec.args[4] = msg.src;
    rec.args[5] = (len < msg.data.len()) as u32;
    rec.result = len as i32;
    (st, Ok(()))
}

fn sys_send<'a>(shared: &'a Shared, st: Guard<'a>, rec: &mut SyscallRecord) -> Step<'a> {
    let (dst, ptr, len) = (rec.args[0], rec.args[2], rec.args[3] as usize);
    let class = match MsgClass::from_u32(rec.args[1]) {
        Ok(class) => class,
        Err(err) => return fail(st, rec, err),
    };
    if len > transfer_limit(&st) {
        return fail(st, rec, format!("send of {} bytes", len));
    }
    let mut payload = vec![0u8; len];
    let (mut st, res) = copy_in(shared, st, ptr, &mut payload);
    if res.is_err() {
        return (st, res);
    }
    let pid = st.current_pid();
    match st.send(pid, dst, class, payload) {
        Ok(()) => {
            rec.result = 0;
            (st, Ok(()))
        }
        Err(err) => fail(st, rec, err),
    }
}

fn sys_rpc<'a>(shared: &'a Shared, st: Guard<'a>, rec: &mut SyscallRecord) -> Step<'a> {
    let (dst, req_ptr, req_len) = (rec.args[0], rec.args[1], rec.args[2] as usize);
    let (reply_ptr, reply_size) = (rec.args[3], rec.args[4] as usize);
    if req_len > transfer_limit(&st) {
        return fail(st, rec, format!("request of {} bytes", req_len));
    }
    let mut request = vec![0u8; req_len];
    let (st, res) = copy_in(shared, st, req_ptr, &mut request);
    if res.is_err() {
        return (st, res);
    }
    let pid = st.current_pid();
    let (st, res) = shared.rpc(st, dst, request);
    let reply = match res {
        Ok(reply) => reply,
        Err(err) => {
            if shared.resumed(&st, pid).is_err() {
                return (st, Err(err));
            }
            return fail(st, rec, err);
        }
    };
    let len = reply.data.len().min(reply_size);
    let (st, res) = copy_out(shared, st, reply_ptr, &reply.data[..len]);
    if res.is_err() {
        return (st, res);
    }
    rec.args[5] = (len < reply.data.len()) as u32;
    rec.result = len as i32;
    (st, Ok(()))
}
