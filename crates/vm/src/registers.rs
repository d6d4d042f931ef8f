/// RISC-V integer registers by ABI name.
///
/// EDUCATIONAL: The hardware only knows x0..x31; the ABI names describe the
/// calling convention. The kernel cares about three of them: `sp` for the
/// initial stack, `a0` for the syscall record pointer, and `ra` for
/// diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Register {
    Zero = 0,
    Ra = 1,
    Sp = 2,
    Gp = 3,
    Tp = 4,
    T0 = 5,
    T1 = 6,
    T2 = 7,
    S0 = 8,
    S1 = 9,
    A0 = 10,
    A1 = 11,
    A2 = 12,
    A3 = 13,
    A4 = 14,
    A5 = 15,
    A6 = 16,
    A7 = 17,
}

impl Register {
    pub const fn idx(self) -> usize {
        self as usize
    }
}

const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// ABI name of register `x{idx}`.
pub fn abi_name(idx: usize) -> &'static str {
    ABI_NAMES.get(idx).copied().unwrap_or("?")
}
