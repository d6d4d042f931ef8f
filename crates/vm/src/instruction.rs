/// Decoded RV32IM instruction.
///
/// EDUCATIONAL PURPOSE: The decoder turns a raw 32-bit word into one of these
/// variants so the CPU can `match` on meaning instead of bit patterns.
///
/// INSTRUCTION CATEGORIES:
/// - ARITHMETIC / LOGICAL: register-register and register-immediate ALU ops
/// - MEMORY: loads and stores, the only instructions that can page-fault on data
/// - CONTROL FLOW: branches and jumps
/// - M EXTENSION: multiply and divide
/// - SYSTEM: `ecall` traps into the kernel, `ebreak` stops the processor
///
/// Register fields are indices 0..32. Immediates are already sign-extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    // ===== RV32I =====
    Add { rd: usize, rs1: usize, rs2: usize },
    Sub { rd: usize, rs1: usize, rs2: usize },
    Sll { rd: usize, rs1: usize, rs2: usize },
    Slt { rd: usize, rs1: usize, rs2: usize },
    Sltu { rd: usize, rs1: usize, rs2: usize },
    Xor { rd: usize, rs1: usize, rs2: usize },
    Srl { rd: usize, rs1: usize, rs2: usize },
    Sra { rd: usize, rs1: usize, rs2: usize },
    Or { rd: usize, rs1: usize, rs2: usize },
    And { rd: usize, rs1: usize, rs2: usize },

    Addi { rd: usize, rs1: usize, imm: i32 },
    Slti { rd: usize, rs1: usize, imm: i32 },
    Sltiu { rd: usize, rs1: usize, imm: i32 },
    Xori { rd: usize, rs1: usize, imm: i32 },
    Ori { rd: usize, rs1: usize, imm: i32 },
    Andi { rd: usize, rs1: usize, imm: i32 },
    Slli { rd: usize, rs1: usize, shamt: u8 },
    Srli { rd: usize, rs1: usize, shamt: u8 },
    Srai { rd: usize, rs1: usize, shamt: u8 },

    /// Load byte, sign-extended
    Lb { rd: usize, rs1: usize, offset: i32 },
    /// Load halfword, sign-extended
    Lh { rd: usize, rs1: usize, offset: i32 },
    Lw { rd: usize, rs1: usize, offset: i32 },
    /// Load byte, zero-extended
    Lbu { rd: usize, rs1: usize, offset: i32 },
    /// Load halfword, zero-extended
    Lhu { rd: usize, rs1: usize, offset: i32 },
    Sb { rs1: usize, rs2: usize, offset: i32 },
    Sh { rs1: usize, rs2: usize, offset: i32 },
    Sw { rs1: usize, rs2: usize, offset: i32 },

    Beq { rs1: usize, rs2: usize, offset: i32 },
    Bne { rs1: usize, rs2: usize, offset: i32 },
    Blt { rs1: usize, rs2: usize, offset: i32 },
    Bge { rs1: usize, rs2: usize, offset: i32 },
    Bltu { rs1: usize, rs2: usize, offset: i32 },
    Bgeu { rs1: usize, rs2: usize, offset: i32 },

    /// Jump and link: rd = pc + 4; pc += offset
    Jal { rd: usize, offset: i32 },
    /// Jump and link register: rd = pc + 4; pc = (rs1 + offset) & !1
    Jalr { rd: usize, rs1: usize, offset: i32 },

    /// rd = imm << 12 (imm holds the raw 20-bit field)
    Lui { rd: usize, imm: u32 },
    /// rd = pc + (imm << 12)
    Auipc { rd: usize, imm: u32 },

    // ===== RV32M =====
    Mul { rd: usize, rs1: usize, rs2: usize },
    Mulh { rd: usize, rs1: usize, rs2: usize },
    Mulhsu { rd: usize, rs1: usize, rs2: usize },
    Mulhu { rd: usize, rs1: usize, rs2: usize },
    Div { rd: usize, rs1: usize, rs2: usize },
    Divu { rd: usize, rs1: usize, rs2: usize },
    Rem { rd: usize, rs1: usize, rs2: usize },
    Remu { rd: usize, rs1: usize, rs2: usize },

    // ===== System =====
    Fence,
    /// Environment call: traps into the kernel.
    Ecall,
    /// Breakpoint: stops the processor.
    Ebreak,
}

impl Instruction {
    /// Short mnemonic, used in trace output.
    pub fn mnemonic(&self) -> &'static str {
        use Instruction::*;
        match self {
            Add { .. } => "add",
            Sub { .. } => "sub",
            Sll { .. } => "sll",
            Slt { .. } => "slt",
            Sltu { .. } => "sltu",
            Xor { .. } => "xor",
            Srl { .. } => "srl",
            Sra { .. } => "sra",
            Or { .. } => "or",
            And { .. } => "and",
            Addi { .. } => "addi",
            Slti { .. } => "slti",
            Sltiu { .. } => "sltiu",
            Xori { .. } => "xori",
            Ori { .. } => "ori",
            Andi { .. } => "andi",
            Slli { .. } => "slli",
            Srli { .. } => "srli",
            Srai { .. } => "srai",
            Lb { .. } => "lb",
            Lh { .. } => "lh",
            Lw { .. } => "lw",
            Lbu { .. } => "lbu",
            Lhu { .. } => "lhu",
            Sb { .. } => "sb",
            Sh { .. } => "sh",
            Sw { .. } => "sw",
            Beq { .. } => "beq",
            Bne { .. } => "bne",
            Blt { .. } => "blt",
            Bge { .. } => "bge",
            Bltu { .. } => "bltu",
            Bgeu { .. } => "bgeu",
            Jal { .. } => "jal",
            Jalr { .. } => "jalr",
            Lui { .. } => "lui",
            Auipc { .. } => "auipc",
            Mul { .. } => "mul",
            Mulh { .. } => "mulh",
            Mulhsu { .. } => "mulhsu",
            Mulhu { .. } => "mulhu",
            Div { .. } => "div",
            Divu { .. } => "divu",
            Rem { .. } => "rem",
            Remu { .. } => "remu",
            Fence => "fence",
            Ecall => "ecall",
            Ebreak => "ebreak",
        }
    }
}
