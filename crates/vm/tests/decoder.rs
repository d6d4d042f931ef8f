use vm::asm;
use vm::decoder::decode_full;
use vm::instruction::Instruction;

#[test]
fn decodes_negative_branch_offsets() {
    assert_eq!(
        decode_full(asm::bne(5, 0, -8)),
        Some(Instruction::Bne { rs1: 5, rs2: 0, offset: -8 })
    );
    assert_eq!(
        decode_full(asm::blt(1, 2, 2048)),
        Some(Instruction::Blt { rs1: 1, rs2: 2, offset: 2048 })
    );
}

#[test]
fn decodes_jal_range() {
    assert_eq!(decode_full(asm::jal(1, -4)), Some(Instruction::Jal { rd: 1, offset: -4 }));
    assert_eq!(
        decode_full(asm::jal(0, 0x7fffe)),
        Some(Instruction::Jal { rd: 0, offset: 0x7fffe })
    );
}

#[test]
fn decodes_store_offsets() {
    assert_eq!(
        decode_full(asm::sw(6, 2, -12)),
        Some(Instruction::Sw { rs1: 2, rs2: 6, offset: -12 })
    );
}

#[test]
fn system_words() {
    assert_eq!(decode_full(asm::ecall()), Some(Instruction::Ecall));
    assert_eq!(decode_full(asm::ebreak()), Some(Instruction::Ebreak));
    assert_eq!(decode_full(0), None);
}

#[test]
fn m_extension() {
    assert_eq!(decode_full(asm::mul(3, 4, 5)), Some(Instruction::Mul { rd: 3, rs1: 4, rs2: 5 }));
}
