//! Minimal RV32IM encoder.
//!
//! Enough to hand-assemble small user programs for tests and demos without a
//! cross toolchain. Register arguments are plain indices (`Register::A0 as u8`
//! or a literal); branch and jump offsets are byte offsets relative to the
//! instruction itself.

use std::collections::HashMap;

use crate::registers::Register;

fn r_type(funct7: u32, rs2: u8, rs1: u8, funct3: u32, rd: u8, opcode: u32) -> u32 {
    funct7 << 25 | (rs2 as u32) << 20 | (rs1 as u32) << 15 | funct3 << 12 | (rd as u32) << 7 | opcode
}

fn i_type(imm: i32, rs1: u8, funct3: u32, rd: u8, opcode: u32) -> u32 {
    ((imm as u32) & 0xfff) << 20 | (rs1 as u32) << 15 | funct3 << 12 | (rd as u32) << 7 | opcode
}

fn s_type(imm: i32, rs2: u8, rs1: u8, funct3: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 5) & 0x7f) << 25
        | (rs2 as u32) << 20
        | (rs1 as u32) << 15
        | funct3 << 12
        | (imm & 0x1f) << 7
        | 0x23
}

fn b_type(offset: i32, rs2: u8, rs1: u8, funct3: u32) -> u32 {
    let imm = offset as u32;
    ((imm >> 12) & 0x1) << 31
        | ((imm >> 5) & 0x3f) << 25
        | (rs2 as u32) << 20
        | (rs1 as u32) << 15
        | funct3 << 12
        | ((imm >> 1) & 0xf) << 8
        | ((imm >> 11) & 0x1) << 7
        | 0x63
}

pub fn add(rd: u8, rs1: u8, rs2: u8) -> u32 {
    r_type(0x00, rs2, rs1, 0x0, rd, 0x33)
}

pub fn sub(rd: u8, rs1: u8, rs2: u8) -> u32 {
    r_type(0x20, rs2, rs1, 0x0, rd, 0x33)
}

pub fn mul(rd: u8, rs1: u8, rs2: u8) -> u32 {
    r_type(0x01, rs2, rs1, 0x0, rd, 0x33)
}

pub fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    i_type(imm, rs1, 0x0, rd, 0x13)
}

pub fn slli(rd: u8, rs1: u8, shamt: u8) -> u32 {
    i_type((shamt & 0x1f) as i32, rs1, 0x1, rd, 0x13)
}

pub fn lw(rd: u8, rs1: u8, offset: i32) -> u32 {
    i_type(offset, rs1, 0x2, rd, 0x03)
}

pub fn lbu(rd: u8, rs1: u8, offset: i32) -> u32 {
    i_type(offset, rs1, 0x4, rd, 0x03)
}

pub fn sw(rs2: u8, rs1: u8, offset: i32) -> u32 {
    s_type(offset, rs2, rs1, 0x2)
}

pub fn sb(rs2: u8, rs1: u8, offset: i32) -> u32 {
    s_type(offset, rs2, rs1, 0x0)
}

pub fn beq(rs1: u8, rs2: u8, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0x0)
}

pub fn bne(rs1: u8, rs2: u8, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0x1)
}

pub fn blt(rs1: u8, rs2: u8, offset: i32) -> u32 {
    b_type(offset, rs2, rs1, 0x4)
}

pub fn lui(rd: u8, imm20: u32) -> u32 {
    (imm20 & 0xfffff) << 12 | (rd as u32) << 7 | 0x37
}

pub fn jal(rd: u8, offset: i32) -> u32 {
    let imm = offset as u32;
    ((imm >> 20) & 0x1) << 31
        | ((imm >> 1) & 0x3ff) << 21
        | ((imm >> 11) & 0x1) << 20
        | ((imm >> 12) & 0xff) << 12
        | (rd as u32) << 7
        | 0x6f
}

pub fn jalr(rd: u8, rs1: u8, offset: i32) -> u32 {
    i_type(offset, rs1, 0x0, rd, 0x67)
}

pub fn ecall() -> u32 {
    0x0000_0073
}

pub fn ebreak() -> u32 {
    0x0010_0073
}

/// Load an arbitrary 32-bit constant: `lui` + `addi`, compensating for the
/// sign extension of the low 12 bits.
pub fn li(rd: u8, value: u32) -> [u32; 2] {
    let hi = value.wrapping_add(0x800) >> 12;
    let lo = value.wrapping_sub(hi << 12) as i32;
    [lui(rd, hi), addi(rd, rd, lo)]
}

/// Shorthand for a register index.
pub const fn reg(r: Register) -> u8 {
    r as u8
}

/// Flatten instruction words into little-endian machine code.
pub fn assemble(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[derive(Debug, Clone, Copy)]
enum Fixup {
    Branch { rs1: u8, rs2: u8, funct3: u32 },
    Jal { rd: u8 },
}

/// Instruction buffer with forward and backward labels for branches.
///
/// ```ignore
/// let mut a = Assembler::new();
/// a.label("top").emit(addi(10, 10, -1)).bne(10, 0, "top");
/// let code = a.finish()?;
/// ```
#[derive(Debug, Default)]
pub struct Assembler {
    words: Vec<u32>,
    labels: HashMap<&'static str, usize>,
    fixups: Vec<(usize, &'static str, Fixup)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, word: u32) -> &mut Self {
        self.words.push(word);
        self
    }

    pub fn emit_all(&mut self, words: impl IntoIterator<Item = u32>) -> &mut Self {
        self.words.extend(words);
        self
    }

    pub fn label(&mut self, name: &'static str) -> &mut Self {
        self.labels.insert(name, self.words.len());
        self
    }

    pub fn beq(&mut self, rs1: u8, rs2: u8, target: &'static str) -> &mut Self {
        self.fixup(target, Fixup::Branch { rs1, rs2, funct3: 0x0 })
    }

    pub fn bne(&mut self, rs1: u8, rs2: u8, target: &'static str) -> &mut Self {
        self.fixup(target, Fixup::Branch { rs1, rs2, funct3: 0x1 })
    }

    pub fn blt(&mut self, rs1: u8, rs2: u8, target: &'static str) -> &mut Self {
        self.fixup(target, Fixup::Branch { rs1, rs2, funct3: 0x4 })
    }

    pub fn jal(&mut self, rd: u8, target: &'static str) -> &mut Self {
        self.fixup(target, Fixup::Jal { rd })
    }

    fn fixup(&mut self, target: &'static str, kind: Fixup) -> &mut Self {
        self.fixups.push((self.words.len(), target, kind));
        self.words.push(0);
        self
    }

    /// Resolve labels and return the instruction words.
    pub fn finish(&self) -> Result<Vec<u32>, String> {
        let mut words = self.words.clone();
        for &(at, target, kind) in &self.fixups {
            let dest = *self
                .labels
                .get(target)
                .ok_or_else(|| format!("undefined label `{}`", target))?;
            let offset = (dest as i32 - at as i32) * 4;
            words[at] = match kind {
                Fixup::Branch { rs1, rs2, funct3 } => b_type(offset, rs2, rs1, funct3),
                Fixup::Jal { rd } => jal(rd, offset),
            };
        }
        Ok(words)
    }
}
