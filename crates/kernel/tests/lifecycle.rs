mod common;

use std::time::Duration;

use common::*;
use kernel::{KernelConfig, KernelError, MsgClass, ProcEvent, ProcState, status};

fn idle(sys: kernel::Sys) -> i32 {
    let _ = sys.recv(MsgClass::Event, None);
    0
}

#[test]
fn first_process_is_main() {
    let sys = boot(quiet_config());
    assert_eq!(sys.pid(), 1);
    assert_eq!(sys.owner().unwrap(), 0);
    assert_eq!(sys.uid().unwrap(), 0);
    assert_eq!(sys.state_of(1).unwrap(), Some(ProcState::Runnable));
    sys.shutdown().unwrap();
}

#[test]
fn child_runs_before_spawn_returns() {
    let sys = boot(quiet_config());
    let main = sys.pid();
    let child = sys
        .spawn("greeter", move |sys| {
            if sys.owner() != Ok(main) {
                return 1;
            }
            match sys.send(main, MsgClass::Request, b"hi") {
                Ok(()) => 0,
                Err(_) => 2,
            }
        })
        .unwrap();
    assert!(child > main);

    // Already queued: a zero-length wait would time out otherwise.
    let msg = sys.recv(MsgClass::Request, Some(Duration::from_millis(1))).unwrap();
    assert_eq!(msg.src, child);
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: child, status: 0 });
    sys.shutdown().unwrap();
}

#[test]
fn exit_reports_status_once() {
    let sys = boot(quiet_config());
    let child = sys.spawn("quitter", |sys| sys.exit(9)).unwrap();

    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: child, status: 9 });
    assert_eq!(sys.recv(MsgClass::Event, Some(Duration::from_millis(20))), Err(KernelError::TimedOut));
    assert_eq!(sys.state_of(child).unwrap(), None);
    sys.shutdown().unwrap();
}

#[test]
fn killing_a_waiting_process() {
    let sys = boot(quiet_config());
    let child = sys.spawn("sleeper", idle).unwrap();
    assert_eq!(sys.state_of(child).unwrap(), Some(ProcState::Waiting));

    sys.kill(child, status::KILLED).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: child, status: status::KILLED });
    assert_eq!(sys.kill(child, status::KILLED), Err(KernelError::UnknownProcess(child)));
    assert_eq!(sys.recv(MsgClass::Event, Some(Duration::from_millis(20))), Err(KernelError::TimedOut));
    sys.check_invariants().unwrap();
    sys.shutdown().unwrap();
}

#[test]
fn killing_oneself_does_not_return() {
    let sys = boot(quiet_config());
    let child = sys
        .spawn("suicidal", |sys| {
            let _ = sys.kill(sys.pid(), 5);
            100
        })
        .unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: child, status: 5 });
    sys.shutdown().unwrap();
}

#[test]
fn kill_needs_matching_uid() {
    let sys = boot(quiet_config());
    let victim = sys.spawn_as("victim", 6, idle).unwrap();
    let attacker = sys
        .spawn_as("attacker", 5, move |sys| match sys.kill(victim, status::KILLED) {
            Err(KernelError::PermissionDenied { target, .. }) if target == victim => 0,
            _ => 1,
        })
        .unwrap();

    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: attacker, status: 0 });
    assert_eq!(sys.state_of(victim).unwrap(), Some(ProcState::Waiting));
    sys.kill(victim, status::KILLED).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: victim, status: status::KILLED });
    sys.shutdown().unwrap();
}

#[test]
fn children_inherit_a_nonzero_uid() {
    let sys = boot(quiet_config());
    let parent = sys
        .spawn_as("parent", 5, |sys| {
            if sys.spawn_as("child", 0, |sys| sys.uid().map(|uid| uid as i32).unwrap_or(-1)).is_err() {
                return -1;
            }
            match sys.wait_event(None) {
                Ok(event) => event.status,
                Err(_) => -2,
            }
        })
        .unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: parent, status: 5 });
    sys.shutdown().unwrap();
}

#[test]
fn interrupt_kills_only_interruptable_processes() {
    let sys = boot(quiet_config());
    let soft = sys
        .spawn("soft", |sys| {
            if sys.set_interruptable(true).is_err() {
                return 1;
            }
            idle(sys)
        })
        .unwrap();
    let hard = sys.spawn("hard", idle).unwrap();

    sys.interrupt().unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: soft, status: status::INTERRUPTED });
    assert_eq!(sys.state_of(hard).unwrap(), Some(ProcState::Waiting));
    assert_eq!(sys.state_of(sys.pid()).unwrap(), Some(ProcState::Runnable));
    sys.shutdown().unwrap();
}

#[test]
fn table_full() {
    let sys = boot(KernelConfig { max_procs: 4, ..quiet_config() });
    for i in 0..3 {
        sys.spawn(&format!("idle{}", i), idle).unwrap();
    }
    assert_eq!(sys.spawn("one-too-many", idle), Err(KernelError::TableFull));
    sys.shutdown().unwrap();
}

#[test]
fn shutdown_reaps_everything_and_halts() {
    let sys = boot(quiet_config());
    for i in 0..3 {
        sys.spawn(&format!("idle{}", i), idle).unwrap();
    }
    let server = sys
        .spawn("stubborn", |sys| loop {
            if sys.recv(MsgClass::Request, None).is_err() {
                return 0;
            }
        })
        .unwrap();
    assert_eq!(sys.state_of(server).unwrap(), Some(ProcState::Waiting));

    sys.shutdown().unwrap();
    assert_eq!(sys.gettime(), Err(KernelError::ShuttingDown));
    assert_eq!(sys.spawn("late", idle), Err(KernelError::ShuttingDown));
    assert_eq!(sys.shutdown(), Err(KernelError::ShuttingDown));
}

#[test]
fn dump_lists_processes() {
    let sys = boot(quiet_config());
    sys.spawn("listener", |sys| {
        let _ = sys.recv(MsgClass::Request, None);
        0
    })
    .unwrap();

    let dump = sys.dump().unwrap();
    assert!(dump.starts_with("2 processes (current = 1"));
    assert!(dump.contains("main"));
    assert!(dump.contains("RUNNING"));
    assert!(dump.contains("listener"));
    assert!(dump.contains("AWAIT REQST"));
    sys.shutdown().unwrap();
}

#[test]
fn gettime_advances() {
    let sys = boot(quiet_config());
    let before = sys.gettime().unwrap();
    let _ = sys.recv(MsgClass::Event, Some(Duration::from_millis(15)));
    assert!(sys.gettime().unwrap() >= before + 10);
    sys.shutdown().unwrap();
}

#[test]
fn invalid_config_is_rejected_at_boot() {
    let config = KernelConfig { tlb_entries: 2, ..KernelConfig::default() };
    assert!(matches!(kernel::Kernel::new(config).boot(), Err(KernelError::InvalidConfig(_))));
}

#[test]
fn config_from_json() {
    let config = KernelConfig::from_json(r#"{ "phys_frames": 8, "timer_interval_ms": 0 }"#).unwrap();
    assert_eq!(config.phys_frames, 8);
    assert_eq!(config.timer_interval_ms, 0);
    assert_eq!(config.tlb_entries, KernelConfig::default().tlb_entries);
    assert_eq!(KernelConfig::from_json(&config.to_json()).unwrap(), config);

    assert!(matches!(KernelConfig::from_json(r#"{ "max_procs": 1 }"#), Err(KernelError::InvalidConfig(_))));
    assert!(matches!(KernelConfig::from_json("not json"), Err(KernelError::InvalidConfig(_))));
}
