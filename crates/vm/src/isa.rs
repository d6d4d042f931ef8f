/// EDUCATIONAL: RV32 major opcodes (bits 6:0 of every 32-bit instruction).
///
/// Each major opcode selects an instruction format (R, I, S, B, U, J); the
/// funct3/funct7 fields then pick the exact operation. Only the opcodes the
/// emulated user processor implements are listed: the base integer set, the
/// M extension (which shares `Op`), fences and the system opcode.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Opcode {
    /// LOAD (0x03): LB, LH, LW, LBU, LHU. I-type.
    Load = 0x03,
    /// MISC-MEM (0x0F): FENCE, FENCE.I. No-ops on a single hart.
    MiscMem = 0x0f,
    /// OP-IMM (0x13): ADDI, SLTI, ANDI, shifts by immediate. I-type.
    OpImm = 0x13,
    /// AUIPC (0x17): PC-relative upper immediate. U-type.
    Auipc = 0x17,
    /// STORE (0x23): SB, SH, SW. S-type.
    Store = 0x23,
    /// OP (0x33): register-register ALU ops, including MUL/DIV. R-type.
    Op = 0x33,
    /// LUI (0x37): load upper immediate. U-type.
    Lui = 0x37,
    /// BRANCH (0x63): conditional branches. B-type.
    Branch = 0x63,
    /// JALR (0x67): indirect jump and link. I-type.
    Jalr = 0x67,
    /// JAL (0x6F): direct jump and link. J-type.
    Jal = 0x6f,
    /// SYSTEM (0x73): ECALL and EBREAK.
    System = 0x73,
}

impl Opcode {
    /// EDUCATIONAL: Hardware routes the instruction to an execution unit from
    /// these seven bits; we turn them into an enum and let `match` do it.
    pub fn from_u8(value: u8) -> Option<Self> {
        use Opcode::*;
        Some(match value {
            0x03 => Load,
            0x0f => MiscMem,
            0x13 => OpImm,
            0x17 => Auipc,
            0x23 => Store,
            0x33 => Op,
            0x37 => Lui,
            0x63 => Branch,
            0x67 => Jalr,
            0x6f => Jal,
            0x73 => System,
            _ => return None,
        })
    }
}
