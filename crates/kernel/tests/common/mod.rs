#![allow(dead_code)]

use std::time::Duration;

use once_cell::sync::Lazy;

use kernel::{Executable, ImageBuilder, Kernel, KernelConfig, Sys};
use types::{Prot, SyscallKind, VIRT_BASE, page_number};
use vm::Register;
use vm::asm::{self, Assembler, reg};

/// Code page of every test program.
pub const CODE: u32 = VIRT_BASE;
/// First data page: initial data at the start, buffers further in.
pub const DATA: u32 = VIRT_BASE + 0x1000;
pub const BUF: u32 = DATA + 0x800;
pub const RECORD: u32 = DATA + 0xf00;

pub const WAIT: Option<Duration> = Some(Duration::from_secs(5));

/// Small deterministic machine: no timer, tiny memory.
pub fn quiet_config() -> KernelConfig {
    KernelConfig {
        virt_pages: 64,
        phys_frames: 16,
        tlb_entries: 8,
        swap_pages: 64,
        timer_interval_ms: 0,
        ..KernelConfig::default()
    }
}

pub fn boot(config: KernelConfig) -> Sys {
    Kernel::new(config).boot().unwrap()
}

pub enum Arg {
    Imm(u32),
    Reg(Register),
}

/// Fill the syscall record at [`RECORD`] and trap. Leaves the record address
/// in `s1` and the result in `a0`. `s1` and `t2` are scratch; register
/// arguments must live elsewhere.
pub fn syscall(a: &mut Assembler, kind: SyscallKind, args: &[Arg]) {
    let s1 = reg(Register::S1);
    let t2 = reg(Register::T2);
    a.emit_all(asm::li(s1, RECORD));
    a.emit_all(asm::li(t2, kind as u32));
    a.emit(asm::sw(t2, s1, 0));
    for (i, arg) in args.iter().enumerate() {
        let offset = 8 + 4 * i as i32;
        match arg {
            Arg::Imm(value) => {
                a.emit_all(asm::li(t2, *value));
                a.emit(asm::sw(t2, s1, offset));
            }
            Arg::Reg(r) => {
                a.emit(asm::sw(reg(*r), s1, offset));
            }
        }
    }
    a.emit(asm::addi(reg(Register::A0), s1, 0));
    a.emit(asm::ecall());
    a.emit(asm::lw(reg(Register::A0), s1, 4));
}

/// Load output argument `index` of the last syscall into `rd`.
pub fn out_arg(a: &mut Assembler, index: usize, rd: Register) {
    a.emit(asm::lw(reg(rd), reg(Register::S1), 8 + 4 * index as i32));
}

pub fn exit_with(a: &mut Assembler, status: Arg) {
    syscall(a, SyscallKind::Exit, &[status]);
}

/// One code page at [`CODE`] and two data pages at [`DATA`] holding `data`.
pub fn program(name: &str, code: &Assembler, data: &[u8]) -> Executable {
    let words = code.finish().unwrap();
    let image = ImageBuilder::new(CODE)
        .segment(page_number(CODE), 1, Prot::READ | Prot::EXEC, &asm::assemble(&words))
        .segment(page_number(DATA), 2, Prot::READ | Prot::WRITE, data)
        .build()
        .unwrap();
    Executable::from_bytes(name, image).unwrap()
}

/// Prints `text` and exits with `status`.
pub fn hello(text: &str, status: u32) -> Executable {
    let mut a = Assembler::new();
    syscall(&mut a, SyscallKind::Print, &[Arg::Imm(DATA), Arg::Imm(text.len() as u32)]);
    exit_with(&mut a, Arg::Imm(status));
    program("hello", &a, text.as_bytes())
}

/// Answers every request with its own payload.
pub static ECHO: Lazy<Executable> = Lazy::new(echo_server);

fn echo_server() -> Executable {
    let (t0, t1) = (Register::T0, Register::T1);
    let mut a = Assembler::new();
    a.label("serve");
    syscall(&mut a, SyscallKind::Recv, &[Arg::Imm(0), Arg::Imm(0), Arg::Imm(BUF), Arg::Imm(256)]);
    a.emit(asm::addi(reg(t1), reg(Register::A0), 0));
    out_arg(&mut a, 4, t0);
    syscall(&mut a, SyscallKind::Send, &[Arg::Reg(t0), Arg::Imm(1), Arg::Imm(BUF), Arg::Reg(t1)]);
    a.jal(0, "serve");
    program("echo", &a, &[])
}

/// Calls its owner with `request`, prints the reply and exits 0.
pub fn caller(request: &str) -> Executable {
    let (s0, t0) = (Register::S0, Register::T0);
    let mut a = Assembler::new();
    // Owner pid from the environment a0 points at.
    a.emit(asm::lw(reg(s0), reg(Register::A0), 4));
    syscall(
        &mut a,
        SyscallKind::Rpc,
        &[Arg::Reg(s0), Arg::Imm(DATA), Arg::Imm(request.len() as u32), Arg::Imm(BUF), Arg::Imm(64)],
    );
    a.emit(asm::addi(reg(t0), reg(Register::A0), 0));
    syscall(&mut a, SyscallKind::Print, &[Arg::Imm(BUF), Arg::Reg(t0)]);
    exit_with(&mut a, Arg::Imm(0));
    program("caller", &a, request.as_bytes())
}

/// Writes its index into the first word of `pages` consecutive pages past
/// the data segment, then exits with the sum read back.
pub fn page_toucher(pages: u32) -> Executable {
    let [t0, t1, a1, a2, a3, a4] =
        [Register::T0, Register::T1, Register::A1, Register::A2, Register::A3, Register::A4].map(reg);
    let mut a = Assembler::new();
    a.emit_all(asm::li(t0, DATA + 0x2000));
    a.emit_all(asm::li(a1, pages));
    a.emit(asm::addi(t1, 0, 0));
    a.label("fill");
    a.emit(asm::slli(a2, t1, 12));
    a.emit(asm::add(a2, a2, t0));
    a.emit(asm::sw(t1, a2, 0));
    a.emit(asm::addi(t1, t1, 1));
    a.blt(t1, a1, "fill");
    a.emit(asm::addi(t1, 0, 0));
    a.emit(asm::addi(a3, 0, 0));
    a.label("check");
    a.emit(asm::slli(a2, t1, 12));
    a.emit(asm::add(a2, a2, t0));
    a.emit(asm::lw(a4, a2, 0));
    a.emit(asm::add(a3, a3, a4));
    a.emit(asm::addi(t1, t1, 1));
    a.blt(t1, a1, "check");
    exit_with(&mut a, Arg::Reg(Register::A3));
    program("toucher", &a, &[])
}

/// Spins forever.
pub fn spinner() -> Executable {
    let mut a = Assembler::new();
    a.label("spin");
    a.jal(0, "spin");
    program("spinner", &a, &[])
}

/// Loads from address `addr`.
pub fn wild_load(addr: u32) -> Executable {
    let t0 = reg(Register::T0);
    let mut a = Assembler::new();
    a.emit_all(asm::li(t0, addr));
    a.emit(asm::lw(t0, t0, 0));
    exit_with(&mut a, Arg::Imm(0));
    program("wild", &a, &[])
}

/// Jumps into a zero-filled page.
pub fn jump_to_zeros() -> Executable {
    let t0 = reg(Register::T0);
    let mut a = Assembler::new();
    a.emit_all(asm::li(t0, DATA + 0x4000));
    a.emit(asm::jalr(0, t0, 0));
    program("zeros", &a, &[])
}
