use crate::instruction::Instruction;
use crate::isa::Opcode;

/// Decodes a 32-bit RISC-V instruction word.
///
/// EDUCATIONAL PURPOSE: This is the decode phase of the instruction cycle.
///
/// RISC-V INSTRUCTION FORMAT:
/// ```text
/// 31:25  funct7  (7 bits)
/// 24:20  rs2     (5 bits)
/// 19:15  rs1     (5 bits)
/// 14:12  funct3  (3 bits)
/// 11:7   rd      (5 bits)
/// 6:0    opcode  (7 bits)
/// ```
///
/// IMMEDIATE EXTRACTION: each format scatters its immediate differently so
/// that the sign bit is always bit 31 and register fields never move:
/// - I-type: bits 31:20
/// - S-type: bits 31:25 and 11:7
/// - B-type: bits 31, 7, 30:25, 11:8 (multiple of 2)
/// - U-type: bits 31:12
/// - J-type: bits 31, 19:12, 20, 30:21 (multiple of 2)
///
/// RETURNS: Some(instruction) if the word encodes a supported instruction,
/// None otherwise. Compressed (16-bit) encodings are not supported.
pub fn decode_full(word: u32) -> Option<Instruction> {
    let opcode = Opcode::from_u8((word & 0x7f) as u8)?;

    let rd = ((word >> 7) & 0x1f) as usize;
    let funct3 = (word >> 12) & 0x07;
    let rs1 = ((word >> 15) & 0x1f) as usize;
    let rs2 = ((word >> 20) & 0x1f) as usize;
    let funct7 = (word >> 25) & 0x7f;
    let imm_i = (word as i32) >> 20;

    match opcode {
        Opcode::Op => Some(match (funct3, funct7) {
            (0x0, 0x00) => Instruction::Add { rd, rs1, rs2 },
            (0x0, 0x20) => Instruction::Sub { rd, rs1, rs2 },
            (0x1, 0x00) => Instruction::Sll { rd, rs1, rs2 },
            (0x2, 0x00) => Instruction::Slt { rd, rs1, rs2 },
            (0x3, 0x00) => Instruction::Sltu { rd, rs1, rs2 },
            (0x4, 0x00) => Instruction::Xor { rd, rs1, rs2 },
            (0x5, 0x00) => Instruction::Srl { rd, rs1, rs2 },
            (0x5, 0x20) => Instruction::Sra { rd, rs1, rs2 },
            (0x6, 0x00) => Instruction::Or { rd, rs1, rs2 },
            (0x7, 0x00) => Instruction::And { rd, rs1, rs2 },
            // EDUCATIONAL: the M extension reuses OP with funct7 = 1
            (0x0, 0x01) => Instruction::Mul { rd, rs1, rs2 },
            (0x1, 0x01) => Instruction::Mulh { rd, rs1, rs2 },
            (0x2, 0x01) => Instruction::Mulhsu { rd, rs1, rs2 },
            (0x3, 0x01) => Instruction::Mulhu { rd, rs1, rs2 },
            (0x4, 0x01) => Instruction::Div { rd, rs1, rs2 },
            (0x5, 0x01) => Instruction::Divu { rd, rs1, rs2 },
            (0x6, 0x01) => Instruction::Rem { rd, rs1, rs2 },
            (0x7, 0x01) => Instruction::Remu { rd, rs1, rs2 },
            _ => return None,
        }),

        Opcode::OpImm => {
            let shamt = ((word >> 20) & 0x1f) as u8;
            Some(match funct3 {
                0x0 => Instruction::Addi { rd, rs1, imm: imm_i },
                0x2 => Instruction::Slti { rd, rs1, imm: imm_i },
                0x3 => Instruction::Sltiu { rd, rs1, imm: imm_i },
                0x4 => Instruction::Xori { rd, rs1, imm: imm_i },
                0x6 => Instruction::Ori { rd, rs1, imm: imm_i },
                0x7 => Instruction::Andi { rd, rs1, imm: imm_i },
                0x1 if funct7 == 0x00 => Instruction::Slli { rd, rs1, shamt },
                0x5 if funct7 == 0x00 => Instruction::Srli { rd, rs1, shamt },
                0x5 if funct7 == 0x20 => Instruction::Srai { rd, rs1, shamt },
                _ => return None,
            })
        }

        Opcode::Load => Some(match funct3 {
            0x0 => Instruction::Lb { rd, rs1, offset: imm_i },
            0x1 => Instruction::Lh { rd, rs1, offset: imm_i },
            0x2 => Instruction::Lw { rd, rs1, offset: imm_i },
            0x4 => Instruction::Lbu { rd, rs1, offset: imm_i },
            0x5 => Instruction::Lhu { rd, rs1, offset: imm_i },
            _ => return None,
        }),

        Opcode::Store => {
            let offset = extract_store_offset(word);
            Some(match funct3 {
                0x0 => Instruction::Sb { rs1, rs2, offset },
                0x1 => Instruction::Sh { rs1, rs2, offset },
                0x2 => Instruction::Sw { rs1, rs2, offset },
                _ => return None,
            })
        }

        Opcode::Branch => {
            let offset = extract_branch_offset(word);
            Some(match funct3 {
                0x0 => Instruction::Beq { rs1, rs2, offset },
                0x1 => Instruction::Bne { rs1, rs2, offset },
                0x4 => Instruction::Blt { rs1, rs2, offset },
                0x5 => Instruction::Bge { rs1, rs2, offset },
                0x6 => Instruction::Bltu { rs1, rs2, offset },
                0x7 => Instruction::Bgeu { rs1, rs2, offset },
                _ => return None,
            })
        }

        Opcode::Jal => Some(Instruction::Jal { rd, offset: extract_jal_offset(word) }),
        Opcode::Jalr if funct3 == 0 => Some(Instruction::Jalr { rd, rs1, offset: imm_i }),
        Opcode::Jalr => None,

        Opcode::Lui => Some(Instruction::Lui { rd, imm: word >> 12 }),
        Opcode::Auipc => Some(Instruction::Auipc { rd, imm: word >> 12 }),

        Opcode::MiscMem => Some(Instruction::Fence),

        // EDUCATIONAL: ECALL and EBREAK differ only in bit 20; anything else
        // under SYSTEM is a CSR access, which user mode may not perform.
        Opcode::System => match word {
            0x0000_0073 => Some(Instruction::Ecall),
            0x0010_0073 => Some(Instruction::Ebreak),
            _ => None,
        },
    }
}

/// S-type: imm[11:5] = bits 31:25, imm[4:0] = bits 11:7.
fn extract_store_offset(word: u32) -> i32 {
    let imm = ((word >> 25) << 5) | ((word >> 7) & 0x1f);
    ((imm as i32) << 20) >> 20
}

/// B-type: imm[12] = bit 31, imm[11] = bit 7, imm[10:5] = bits 30:25,
/// imm[4:1] = bits 11:8.
fn extract_branch_offset(word: u32) -> i32 {
    let imm = ((word >> 31) & 0x1) << 12
        | ((word >> 7) & 0x1) << 11
        | ((word >> 25) & 0x3f) << 5
        | ((word >> 8) & 0xf) << 1;
    ((imm as i32) << 19) >> 19
}

/// J-type: imm[20] = bit 31, imm[19:12] = bits 19:12, imm[11] = bit 20,
/// imm[10:1] = bits 30:21.
fn extract_jal_offset(word: u32) -> i32 {
    let imm = ((word >> 31) & 0x1) << 20
        | ((word >> 12) & 0xff) << 12
        | ((word >> 20) & 0x1) << 11
        | ((word >> 21) & 0x3ff) << 1;
    ((imm as i32) << 11) >> 11
}
