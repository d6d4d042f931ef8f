mod common;

use std::time::Duration;

use common::*;
use kernel::{Console, Kernel, KernelConfig, KernelError, MsgClass, ProcEvent, ProcState, status};

#[test]
fn user_program_prints_and_exits() {
    let (console, out) = Console::capture();
    let sys = Kernel::new(quiet_config()).with_console(console).boot().unwrap();

    let pid = sys.exec(hello("hello from user space\n", 7)).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid, status: 7 });
    assert_eq!(out.contents(), "hello from user space\n");

    let stats = sys.memory_stats().unwrap();
    assert_eq!(stats.frames_free, stats.frames_total);
    assert_eq!(stats.swap_free, stats.swap_total);
    sys.shutdown().unwrap();
}

#[test]
fn user_echo_server_answers_rpc() {
    let sys = boot(quiet_config());
    let server = sys.exec(ECHO.clone()).unwrap();
    assert_eq!(sys.state_of(server).unwrap(), Some(ProcState::Waiting));

    assert_eq!(sys.rpc(server, b"ping").unwrap(), b"ping");
    assert_eq!(sys.rpc(server, b"a longer request").unwrap(), b"a longer request");
    sys.check_invariants().unwrap();

    sys.kill(server, status::KILLED).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: server, status: status::KILLED });
    sys.shutdown().unwrap();
}

#[test]
fn user_program_calls_its_owner() {
    let (console, out) = Console::capture();
    let sys = Kernel::new(quiet_config()).with_console(console).boot().unwrap();

    let child = sys.exec(caller("marco")).unwrap();
    let req = sys.recv(MsgClass::Request, WAIT).unwrap();
    assert_eq!((req.src, req.data.as_slice()), (child, &b"marco"[..]));
    sys.reply(child, b"polo").unwrap();

    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: child, status: 0 });
    assert_eq!(out.contents(), "polo");
    sys.shutdown().unwrap();
}

#[test]
fn pages_survive_eviction() {
    let config = KernelConfig { phys_frames: 4, tlb_entries: 4, ..quiet_config() };
    let sys = boot(config);

    let pid = sys.exec(page_toucher(16)).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid, status: (0..16).sum() });

    let stats = sys.memory_stats().unwrap();
    assert_eq!(stats.frames_free, 4);
    assert_eq!(stats.swap_free, stats.swap_total);
    assert_eq!(stats.resident_pages + stats.swapped_pages, 0);
    sys.check_invariants().unwrap();
    sys.shutdown().unwrap();
}

#[test]
fn two_user_processes_share_the_frames() {
    let config = KernelConfig { phys_frames: 6, tlb_entries: 4, ..quiet_config() };
    let sys = boot(config);

    let server = sys.exec(ECHO.clone()).unwrap();
    let toucher = sys.exec(page_toucher(12)).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: toucher, status: (0..12).sum() });

    // The server's pages were evicted meanwhile and must come back intact.
    assert_eq!(sys.rpc(server, b"still here").unwrap(), b"still here");
    sys.check_invariants().unwrap();
    sys.shutdown().unwrap();
}

#[test]
fn access_outside_the_range_kills() {
    let sys = boot(quiet_config());
    let pid = sys.exec(wild_load(0x40)).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid, status: status::ILLEGAL_MEMORY });
    sys.shutdown().unwrap();
}

#[test]
fn illegal_instruction_kills() {
    let sys = boot(quiet_config());
    let pid = sys.exec(jump_to_zeros()).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid, status: status::ILLEGAL_MEMORY });
    sys.shutdown().unwrap();
}

#[test]
fn clock_preempts_a_spinning_process() {
    let config = KernelConfig { timer_interval_ms: 5, ..quiet_config() };
    let sys = boot(config);

    let spinner = sys.exec(spinner()).unwrap();
    let started = sys.gettime().unwrap();
    assert_eq!(sys.state_of(spinner).unwrap(), Some(ProcState::Runnable));

    sys.kill(spinner, status::KILLED).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: spinner, status: status::KILLED });
    assert!(sys.gettime().unwrap() >= started);
    sys.shutdown().unwrap();
}

#[test]
fn shutdown_reaps_a_spinning_process() {
    let config = KernelConfig { timer_interval_ms: 5, ..quiet_config() };
    let sys = boot(config);
    sys.exec(spinner()).unwrap();
    sys.shutdown().unwrap();
}

#[test]
fn idle_user_server_stays_waiting() {
    let sys = boot(quiet_config());
    let server = sys.exec(ECHO.clone()).unwrap();
    assert_eq!(sys.recv(MsgClass::Request, Some(Duration::from_millis(10))), Err(KernelError::TimedOut));
    assert_eq!(sys.state_of(server).unwrap(), Some(ProcState::Waiting));
    sys.shutdown().unwrap();
}
