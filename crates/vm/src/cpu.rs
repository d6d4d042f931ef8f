use crate::bus::{Bus, MemFault, Width};
use crate::decoder::decode_full;
use crate::instruction::Instruction;
use crate::registers::{abi_name, Register};

/// What a single [`CPU::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The instruction completed and the PC moved on.
    Retired,
    /// A memory access was refused. Nothing was committed and the PC still
    /// points at the faulting instruction.
    Fault(MemFault),
    /// `ecall`. The PC still points at the `ecall`; whoever services the
    /// trap decides where execution resumes.
    Ecall,
    /// `ebreak`. The PC still points at the `ebreak`.
    Ebreak,
    /// The word at PC is not a supported instruction.
    Illegal(u32),
}

/// Control-flow effect of an executed instruction.
enum Flow {
    Next,
    Jump(u32),
    Ecall,
    Ebreak,
}

/// The emulated user-mode processor: a program counter and 32 registers.
///
/// EDUCATIONAL PURPOSE: This models the architectural state a real OS saves
/// and restores on every context switch. There is no privileged state here:
/// the kernel runs natively on the host, and only user code is interpreted.
///
/// RISC-V ARCHITECTURE NOTES:
/// - 32 general-purpose registers (x0-x31); x0 is hardwired to zero
/// - The PC is separate from the general registers
///
/// PRECISE TRAPS: an instruction either completes entirely or has no visible
/// effect. Loads read through the bus before touching the destination
/// register, stores are a single bus call, and the PC only moves once the
/// instruction has retired. This is what makes demand paging work: after the
/// kernel maps the missing page, stepping again re-executes the same
/// instruction from scratch.
#[derive(Debug, Clone)]
pub struct CPU {
    /// Program Counter - address of the next instruction to execute
    pub pc: u32,

    /// General-purpose registers (x0-x31)
    pub regs: [u32; 32],

    /// Trace every retired instruction at `trace` log level
    pub verbose: bool,
}

impl Default for CPU {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CPU {
    /// Creates a CPU with all registers cleared and the PC at `entry`.
    pub fn new(entry: u32) -> Self {
        Self {
            pc: entry,
            regs: [0; 32],
            verbose: false,
        }
    }

    pub fn reg(&self, reg: Register) -> u32 {
        self.regs[reg.idx()]
    }

    pub fn set_reg(&mut self, reg: Register, value: u32) {
        self.write_reg(reg.idx(), value);
    }

    /// Executes a single instruction cycle (fetch, decode, execute).
    ///
    /// EDUCATIONAL: Every CPU follows this basic pattern:
    /// 1. Fetch: read the instruction word at PC (may fault)
    /// 2. Decode: figure out what the word means
    /// 3. Execute: perform the operation (loads and stores may fault)
    pub fn step(&mut self, bus: &mut dyn Bus) -> StepOutcome {
        let word = match bus.fetch(self.pc) {
            Ok(word) => word,
            Err(fault) => return StepOutcome::Fault(fault),
        };
        let Some(instr) = decode_full(word) else {
            return StepOutcome::Illegal(word);
        };

        if self.verbose {
            log::trace!("PC = 0x{:08x}, Word = 0x{:08x}, Instr = {:?}", self.pc, word, instr);
        }

        match self.execute(instr, bus) {
            Ok(Flow::Next) => {
                self.pc = self.pc.wrapping_add(4);
                StepOutcome::Retired
            }
            Ok(Flow::Jump(target)) => {
                self.pc = target;
                StepOutcome::Retired
            }
            Ok(Flow::Ecall) => StepOutcome::Ecall,
            Ok(Flow::Ebreak) => StepOutcome::Ebreak,
            Err(fault) => StepOutcome::Fault(fault),
        }
    }

    /// Safely write to a register, ignoring writes to x0 (which should always be 0)
    fn write_reg(&mut self, rd: usize, value: u32) {
        if rd != 0 {
            self.regs[rd] = value;
        }
    }

    fn effective_addr(&self, rs1: usize, offset: i32) -> u32 {
        self.regs[rs1].wrapping_add(offset as u32)
    }

    fn branch(&self, taken: bool, offset: i32) -> Flow {
        if taken {
            Flow::Jump(self.pc.wrapping_add(offset as u32))
        } else {
            Flow::Next
        }
    }

    /// Executes a decoded instruction.
    ///
    /// EDUCATIONAL: rd is the destination register, rs1/rs2 the sources and
    /// imm an already sign-extended immediate. Memory instructions are the
    /// only ones that can fail, and they fail before writing anything.
    fn execute(&mut self, instr: Instruction, bus: &mut dyn Bus) -> Result<Flow, MemFault> {
        use Instruction::*;
        let r = self.regs;
        match instr {
            // EDUCATIONAL: wrapping arithmetic, as RISC-V has no overflow traps
            Add { rd, rs1, rs2 } => self.write_reg(rd, r[rs1].wrapping_add(r[rs2])),
            Sub { rd, rs1, rs2 } => self.write_reg(rd, r[rs1].wrapping_sub(r[rs2])),
            Sll { rd, rs1, rs2 } => self.write_reg(rd, r[rs1] << (r[rs2] & 0x1f)),
            Slt { rd, rs1, rs2 } => self.write_reg(rd, ((r[rs1] as i32) < (r[rs2] as i32)) as u32),
            Sltu { rd, rs1, rs2 } => self.write_reg(rd, (r[rs1] < r[rs2]) as u32),
            Xor { rd, rs1, rs2 } => self.write_reg(rd, r[rs1] ^ r[rs2]),
            Srl { rd, rs1, rs2 } => self.write_reg(rd, r[rs1] >> (r[rs2] & 0x1f)),
            Sra { rd, rs1, rs2 } => self.write_reg(rd, ((r[rs1] as i32) >> (r[rs2] & 0x1f)) as u32),
            Or { rd, rs1, rs2 } => self.write_reg(rd, r[rs1] | r[rs2]),
            And { rd, rs1, rs2 } => self.write_reg(rd, r[rs1] & r[rs2]),

            Addi { rd, rs1, imm } => self.write_reg(rd, r[rs1].wrapping_add(imm as u32)),
            Slti { rd, rs1, imm } => self.write_reg(rd, ((r[rs1] as i32) < imm) as u32),
            Sltiu { rd, rs1, imm } => self.write_reg(rd, (r[rs1] < imm as u32) as u32),
            Xori { rd, rs1, imm } => self.write_reg(rd, r[rs1] ^ imm as u32),
            Ori { rd, rs1, imm } => self.write_reg(rd, r[rs1] | imm as u32),
            Andi { rd, rs1, imm } => self.write_reg(rd, r[rs1] & imm as u32),
            Slli { rd, rs1, shamt } => self.write_reg(rd, r[rs1] << shamt),
            Srli { rd, rs1, shamt } => self.write_reg(rd, r[rs1] >> shamt),
            Srai { rd, rs1, shamt } => self.write_reg(rd, ((r[rs1] as i32) >> shamt) as u32),

            // EDUCATIONAL: loads - read first, then write the register
            Lb { rd, rs1, offset } => {
                let value = bus.load(self.effective_addr(rs1, offset), Width::Byte)?;
                self.write_reg(rd, value as u8 as i8 as i32 as u32);
            }
            Lh { rd, rs1, offset } => {
                let value = bus.load(self.effective_addr(rs1, offset), Width::Half)?;
                self.write_reg(rd, value as u16 as i16 as i32 as u32);
            }
            Lw { rd, rs1, offset } => {
                let value = bus.load(self.effective_addr(rs1, offset), Width::Word)?;
                self.write_reg(rd, value);
            }
            Lbu { rd, rs1, offset } => {
                let value = bus.load(self.effective_addr(rs1, offset), Width::Byte)?;
                self.write_reg(rd, value);
            }
            Lhu { rd, rs1, offset } => {
                let value = bus.load(self.effective_addr(rs1, offset), Width::Half)?;
                self.write_reg(rd, value);
            }
            Sb { rs1, rs2, offset } => bus.store(self.effective_addr(rs1, offset), Width::Byte, r[rs2])?,
            Sh { rs1, rs2, offset } => bus.store(self.effective_addr(rs1, offset), Width::Half, r[rs2])?,
            Sw { rs1, rs2, offset } => bus.store(self.effective_addr(rs1, offset), Width::Word, r[rs2])?,

            // EDUCATIONAL: branches compare two registers and jump PC-relative
            Beq { rs1, rs2, offset } => return Ok(self.branch(r[rs1] == r[rs2], offset)),
            Bne { rs1, rs2, offset } => return Ok(self.branch(r[rs1] != r[rs2], offset)),
            Blt { rs1, rs2, offset } => return Ok(self.branch((r[rs1] as i32) < (r[rs2] as i32), offset)),
            Bge { rs1, rs2, offset } => return Ok(self.branch((r[rs1] as i32) >= (r[rs2] as i32), offset)),
            Bltu { rs1, rs2, offset } => return Ok(self.branch(r[rs1] < r[rs2], offset)),
            Bgeu { rs1, rs2, offset } => return Ok(self.branch(r[rs1] >= r[rs2], offset)),

            Jal { rd, offset } => {
                let target = self.pc.wrapping_add(offset as u32);
                self.write_reg(rd, self.pc.wrapping_add(4));
                return Ok(Flow::Jump(target));
            }
            Jalr { rd, rs1, offset } => {
                // EDUCATIONAL: read rs1 before writing rd, they may be the same register
                let target = r[rs1].wrapping_add(offset as u32) & !1;
                self.write_reg(rd, self.pc.wrapping_add(4));
                return Ok(Flow::Jump(target));
            }

            Lui { rd, imm } => self.write_reg(rd, imm << 12),
            Auipc { rd, imm } => self.write_reg(rd, self.pc.wrapping_add(imm << 12)),

            Mul { rd, rs1, rs2 } => self.write_reg(rd, r[rs1].wrapping_mul(r[rs2])),
            Mulh { rd, rs1, rs2 } => {
                let product = (r[rs1] as i32 as i64) * (r[rs2] as i32 as i64);
                self.write_reg(rd, (product >> 32) as u32)
            }
            Mulhsu { rd, rs1, rs2 } => {
                let product = (r[rs1] as i32 as i64).wrapping_mul(r[rs2] as u64 as i64);
                self.write_reg(rd, (product >> 32) as u32)
            }
            Mulhu { rd, rs1, rs2 } => {
                let product = (r[rs1] as u64) * (r[rs2] as u64);
                self.write_reg(rd, (product >> 32) as u32)
            }
            // EDUCATIONAL: RISC-V division never traps. Divide by zero yields
            // all ones (quotient) or the dividend (remainder), and the single
            // overflow case i32::MIN / -1 yields the dividend.
            Div { rd, rs1, rs2 } => {
                let (a, b) = (r[rs1] as i32, r[rs2] as i32);
                let q = if b == 0 { -1 } else { a.wrapping_div(b) };
                self.write_reg(rd, q as u32)
            }
            Divu { rd, rs1, rs2 } => {
                let q = if r[rs2] == 0 { u32::MAX } else { r[rs1] / r[rs2] };
                self.write_reg(rd, q)
            }
            Rem { rd, rs1, rs2 } => {
                let (a, b) = (r[rs1] as i32, r[rs2] as i32);
                let rem = if b == 0 { a } else { a.wrapping_rem(b) };
                self.write_reg(rd, rem as u32)
            }
            Remu { rd, rs1, rs2 } => {
                let rem = if r[rs2] == 0 { r[rs1] } else { r[rs1] % r[rs2] };
                self.write_reg(rd, rem)
            }

            // FENCE orders memory between harts; a no-op with a single hart
            Fence => {}
            Ecall => return Ok(Flow::Ecall),
            Ebreak => return Ok(Flow::Ebreak),
        }
        Ok(Flow::Next)
    }

    /// Register dump for crash diagnostics.
    pub fn dump(&self) -> String {
        let mut out = format!("pc   = 0x{:08x}\n", self.pc);
        for (i, value) in self.regs.iter().enumerate() {
            out.push_str(&format!("{:<4} = 0x{:08x}", abi_name(i), value));
            out.push(if i % 4 == 3 { '\n' } else { ' ' });
        }
        out
    }
}
