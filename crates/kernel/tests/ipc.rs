mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use kernel::{KernelError, MsgClass, ProcEvent};

fn echo(sys: kernel::Sys) -> i32 {
    loop {
        let Ok(req) = sys.recv(MsgClass::Request, None) else { return 0 };
        if sys.reply(req.src, &req.data).is_err() {
            return 1;
        }
    }
}

#[test]
fn rpc_round_trip() {
    let sys = boot(quiet_config());
    let server = sys.spawn("echo", echo).unwrap();

    assert_eq!(sys.rpc(server, b"ping").unwrap(), b"ping");
    assert_eq!(sys.rpc(server, b"").unwrap(), b"");
    sys.check_invariants().unwrap();
    sys.shutdown().unwrap();
}

#[test]
fn rpc_reply_is_truncated_to_buffer() {
    let sys = boot(quiet_config());
    let server = sys.spawn("echo", echo).unwrap();

    let mut reply = [0u8; 4];
    let delivery = sys.rpc_into(server, b"abcdefgh", &mut reply).unwrap();
    assert_eq!(delivery.src, server);
    assert_eq!(delivery.len, 4);
    assert!(delivery.truncated);
    assert_eq!(&reply, b"abcd");
    sys.shutdown().unwrap();
}

#[test]
fn requests_are_served_in_order() {
    let sys = boot(quiet_config());
    let server = sys
        .spawn("counter", |sys| {
            let mut seen = 0u32;
            loop {
                let Ok(req) = sys.recv(MsgClass::Request, None) else { return 0 };
                seen += 1;
                let mut out = req.data.clone();
                out.extend_from_slice(&seen.to_le_bytes());
                if sys.reply(req.src, &out).is_err() {
                    return 1;
                }
            }
        })
        .unwrap();

    for i in 1..=5u32 {
        let reply = sys.rpc(server, b"n").unwrap();
        assert_eq!(&reply[..1], b"n");
        assert_eq!(u32::from_le_bytes(reply[1..5].try_into().unwrap()), i);
    }
    sys.shutdown().unwrap();
}

#[test]
fn only_the_reply_ends_an_rpc() {
    let sys = boot(quiet_config());
    let server = sys
        .spawn("noisy", |sys| {
            let Ok(req) = sys.recv(MsgClass::Request, None) else { return 1 };
            // The caller is blocked on its reply; an event must not wake it.
            if sys.send(req.src, MsgClass::Event, b"noise").is_err() {
                return 2;
            }
            if sys.send(req.src, MsgClass::Request, b"req").is_err() {
                return 3;
            }
            if sys.reply(req.src, b"answer").is_err() {
                return 4;
            }
            0
        })
        .unwrap();

    assert_eq!(sys.rpc(server, b"q").unwrap(), b"answer");

    let noise = sys.recv(MsgClass::Event, WAIT).unwrap();
    assert_eq!((noise.src, noise.data.as_slice()), (server, &b"noise"[..]));
    let req = sys.recv(MsgClass::Request, WAIT).unwrap();
    assert_eq!((req.src, req.data.as_slice()), (server, &b"req"[..]));
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: server, status: 0 });
    sys.shutdown().unwrap();
}

#[test]
fn stray_reply_is_refused() {
    let sys = boot(quiet_config());
    let main = sys.pid();
    let child = sys
        .spawn("stray", move |sys| match sys.reply(main, b"unasked") {
            Err(KernelError::NotAwaitingReply(pid)) if pid == main => 0,
            _ => 1,
        })
        .unwrap();

    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: child, status: 0 });
    sys.check_invariants().unwrap();
    sys.shutdown().unwrap();
}

#[test]
fn replies_are_only_received_through_rpc() {
    let sys = boot(quiet_config());
    let started = Instant::now();
    assert_eq!(
        sys.recv(MsgClass::Reply, Some(Duration::from_millis(30))),
        Err(KernelError::BadClass(MsgClass::Reply))
    );
    assert_eq!(sys.recv(MsgClass::Reply, None), Err(KernelError::BadClass(MsgClass::Reply)));
    assert!(started.elapsed() < Duration::from_millis(30));
    sys.shutdown().unwrap();
}

#[test]
fn queued_requests_are_delivered_without_blocking() {
    let sys = boot(quiet_config());
    let main = sys.pid();
    let worker = sys
        .spawn("batch", move |sys| {
            if sys.recv(MsgClass::Event, None).is_err() {
                return 1;
            }
            let mut joined = Vec::new();
            for _ in 0..2 {
                match sys.recv(MsgClass::Request, Some(Duration::from_millis(1))) {
                    Ok(req) => joined.extend_from_slice(&req.data),
                    Err(_) => return 2,
                }
            }
            match sys.send(main, MsgClass::Request, &joined) {
                Ok(()) => 0,
                Err(_) => 3,
            }
        })
        .unwrap();

    sys.send(worker, MsgClass::Request, b"a").unwrap();
    sys.send(worker, MsgClass::Request, b"b").unwrap();
    sys.send(worker, MsgClass::Event, b"go").unwrap();

    let joined = sys.recv(MsgClass::Request, WAIT).unwrap();
    assert_eq!((joined.src, joined.data.as_slice()), (worker, &b"ab"[..]));
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: worker, status: 0 });
    sys.shutdown().unwrap();
}

#[test]
fn recv_times_out() {
    let sys = boot(quiet_config());
    let started = Instant::now();
    assert_eq!(sys.recv(MsgClass::Request, Some(Duration::from_millis(30))), Err(KernelError::TimedOut));
    assert!(started.elapsed() >= Duration::from_millis(25));
    sys.shutdown().unwrap();
}

#[test]
fn rpc_to_self_fails() {
    let sys = boot(quiet_config());
    assert_eq!(sys.rpc(sys.pid(), b"me"), Err(KernelError::SelfRpc));
    sys.shutdown().unwrap();
}

#[test]
fn messages_to_unknown_or_dead_processes_fail() {
    let sys = boot(quiet_config());
    assert_eq!(sys.send(77, MsgClass::Request, b"x"), Err(KernelError::UnknownProcess(77)));
    assert_eq!(sys.rpc(77, b"x"), Err(KernelError::UnknownProcess(77)));

    let child = sys.spawn("short", |_| 3).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: child, status: 3 });
    assert!(sys.send(child, MsgClass::Request, b"x").is_err());
    sys.shutdown().unwrap();
}

#[test]
fn killing_the_server_fails_the_rpc() {
    let sys = boot(quiet_config());
    let server = sys
        .spawn("mute", |sys| {
            let _ = sys.recv(MsgClass::Request, None);
            let _ = sys.recv(MsgClass::Event, None);
            0
        })
        .unwrap();
    let client = sys
        .spawn("client", move |sys| match sys.rpc(server, b"hello?") {
            Err(KernelError::ServerGone(pid)) if pid == server => 0,
            _ => 1,
        })
        .unwrap();

    sys.kill(server, kernel::status::KILLED).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: server, status: kernel::status::KILLED });
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: client, status: 0 });
    sys.check_invariants().unwrap();
    sys.shutdown().unwrap();
}

#[test]
fn killing_a_client_then_its_server() {
    let sys = boot(quiet_config());
    let server = sys
        .spawn("mute", |sys| {
            let _ = sys.recv(MsgClass::Event, None);
            0
        })
        .unwrap();
    let client = sys.spawn("client", move |sys| sys.rpc(server, b"hello?").map_or(1, |_| 0)).unwrap();
    assert_eq!(sys.state_of(client).unwrap(), Some(kernel::ProcState::Waiting));

    sys.kill(client, kernel::status::KILLED).unwrap();
    sys.kill(server, kernel::status::KILLED).unwrap();
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: client, status: kernel::status::KILLED });
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: server, status: kernel::status::KILLED });
    assert_eq!(sys.recv(MsgClass::Event, Some(Duration::from_millis(20))), Err(KernelError::TimedOut));
    assert_eq!(sys.state_of(client).unwrap(), None);
    assert_eq!(sys.state_of(server).unwrap(), None);
    sys.check_invariants().unwrap();
    sys.shutdown().unwrap();
}

#[test]
fn killed_waiter_never_runs_again() {
    let sys = boot(quiet_config());
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let waiter = sys
        .spawn("waiter", move |sys| {
            let _ = sys.recv(MsgClass::Request, None);
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::yield_now();
            }
        })
        .unwrap();

    sys.kill(waiter, kernel::status::KILLED).unwrap();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(sys.wait_event(WAIT).unwrap(), ProcEvent { pid: waiter, status: kernel::status::KILLED });
    sys.check_invariants().unwrap();
    sys.shutdown().unwrap();
}

#[test]
fn reaped_server_never_runs_again() {
    let sys = boot(quiet_config());
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    sys.spawn("lingering", move |sys| {
        let _ = sys.recv(MsgClass::Event, None);
        loop {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::yield_now();
        }
    })
    .unwrap();

    sys.shutdown().unwrap();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}
