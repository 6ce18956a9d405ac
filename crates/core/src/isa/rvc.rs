//! Compressed (RVC) instruction expansion.
//!
//! Provides [`expand`], which converts a 16-bit RV32C instruction into its
//! 32-bit uncompressed equivalent. Reserved encodings and RV64-only forms
//! return `None` and surface as illegal instruction at execution.

use crate::common::sign_extend;
use crate::isa::opcodes::{funct3, funct7, op};

/// Quadrant 0 (op bits 00): stack-pointer arithmetic and x8-x15 memory ops.
const QUADRANT_0: u16 = 0x0;
/// Quadrant 1 (op bits 01): immediates, control flow, register arithmetic.
const QUADRANT_1: u16 = 0x1;
/// Quadrant 2 (op bits 10): shifts, stack-relative memory, jr/jalr/mv/add.
const QUADRANT_2: u16 = 0x2;

/// Extracts bits `hi..=lo` of a compressed encoding.
#[inline]
fn c_bits(insn: u16, hi: u32, lo: u32) -> u32 {
    (u32::from(insn) >> lo) & ((1 << (hi - lo + 1)) - 1)
}

/// Decodes the 6-bit sign-extended immediate shared by c.addi/c.li/c.andi.
fn c_imm6(insn: u16) -> u32 {
    sign_extend((c_bits(insn, 12, 12) << 5) | c_bits(insn, 6, 2), 6)
}

/// Decodes the 12-bit jump offset of c.j/c.jal.
fn c_imm_j(insn: u16) -> u32 {
    let imm = (c_bits(insn, 12, 12) << 11)
        | (c_bits(insn, 8, 8) << 10)
        | (c_bits(insn, 10, 9) << 8)
        | (c_bits(insn, 6, 6) << 7)
        | (c_bits(insn, 7, 7) << 6)
        | (c_bits(insn, 2, 2) << 5)
        | (c_bits(insn, 11, 11) << 4)
        | (c_bits(insn, 5, 3) << 1);
    sign_extend(imm, 12)
}

/// Decodes the 9-bit branch offset of c.beqz/c.bnez.
fn c_imm_b(insn: u16) -> u32 {
    let imm = (c_bits(insn, 12, 12) << 8)
        | (c_bits(insn, 6, 5) << 6)
        | (c_bits(insn, 2, 2) << 5)
        | (c_bits(insn, 11, 10) << 3)
        | (c_bits(insn, 4, 3) << 1);
    sign_extend(imm, 9)
}

/// Encodes an I-type word from its fields.
fn enc_i(imm: u32, rs1: u32, f3: u32, rd: u32, opcode: u32) -> u32 {
    ((imm & 0xfff) << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | opcode
}

/// Encodes an R-type word from its fields.
fn enc_r(f7: u32, rs2: u32, rs1: u32, f3: u32, rd: u32, opcode: u32) -> u32 {
    (f7 << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | opcode
}

/// Encodes an S-type word from its fields.
fn enc_s(imm: u32, rs2: u32, rs1: u32, f3: u32, opcode: u32) -> u32 {
    let imm_low = imm & 0x1f;
    let imm_high = (imm >> 5) & 0x7f;
    (imm_high << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | (imm_low << 7) | opcode
}

/// Encodes a B-type word from a sign-extended even offset.
fn enc_b(offset: u32, rs2: u32, rs1: u32, f3: u32) -> u32 {
    let bit_12 = (offset >> 12) & 0x1;
    let bit_11 = (offset >> 11) & 0x1;
    let bits_10_5 = (offset >> 5) & 0x3f;
    let bits_4_1 = (offset >> 1) & 0xf;
    (bit_12 << 31)
        | (bits_10_5 << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (f3 << 12)
        | (bits_4_1 << 8)
        | (bit_11 << 7)
        | op::BRANCH
}

/// Encodes a J-type word from a sign-extended even offset.
fn enc_j(offset: u32, rd: u32) -> u32 {
    let bit_20 = (offset >> 20) & 0x1;
    let bits_10_1 = (offset >> 1) & 0x3ff;
    let bit_11 = (offset >> 11) & 0x1;
    let bits_19_12 = (offset >> 12) & 0xff;
    (bit_20 << 31) | (bits_10_1 << 21) | (bit_11 << 20) | (bits_19_12 << 12) | (rd << 7) | op::JAL
}

/// Expands a 16-bit RV32C instruction into its 32-bit equivalent.
///
/// # Returns
///
/// `None` for reserved encodings, RV64-only forms, and the all-zero word.
#[allow(clippy::too_many_lines)]
#[must_use]
pub fn expand(insn: u16) -> Option<u32> {
    let quadrant = insn & 0x3;
    let f3 = (insn >> 13) & 0x7;

    match quadrant {
        QUADRANT_0 => match f3 {
            0x0 => {
                // c.addi4spn
                let imm = (c_bits(insn, 6, 6) << 2)
                    | (c_bits(insn, 5, 5) << 3)
                    | (c_bits(insn, 12, 11) << 4)
                    | (c_bits(insn, 10, 7) << 6);
                if imm == 0 {
                    return None;
                }
                let rd = 8 + c_bits(insn, 4, 2);
                Some(enc_i(imm, 2, funct3::ADD_SUB, rd, op::OP_IMM))
            }
            0x1 => {
                // c.fld
                let imm = (c_bits(insn, 12, 10) << 3) | (c_bits(insn, 6, 5) << 6);
                let rs1 = 8 + c_bits(insn, 9, 7);
                let rd = 8 + c_bits(insn, 4, 2);
                Some(enc_i(imm, rs1, funct3::FP_D, rd, op::LOAD_FP))
            }
            0x2 => {
                // c.lw
                let imm = (c_bits(insn, 6, 6) << 2)
                    | (c_bits(insn, 12, 10) << 3)
                    | (c_bits(insn, 5, 5) << 6);
                let rs1 = 8 + c_bits(insn, 9, 7);
                let rd = 8 + c_bits(insn, 4, 2);
                Some(enc_i(imm, rs1, funct3::LW, rd, op::LOAD))
            }
            0x3 => {
                // c.flw (RV32)
                let imm = (c_bits(insn, 6, 6) << 2)
                    | (c_bits(insn, 12, 10) << 3)
                    | (c_bits(insn, 5, 5) << 6);
                let rs1 = 8 + c_bits(insn, 9, 7);
                let rd = 8 + c_bits(insn, 4, 2);
                Some(enc_i(imm, rs1, funct3::FP_W, rd, op::LOAD_FP))
            }
            0x5 => {
                // c.fsd
                let imm = (c_bits(insn, 12, 10) << 3) | (c_bits(insn, 6, 5) << 6);
                let rs1 = 8 + c_bits(insn, 9, 7);
                let rs2 = 8 + c_bits(insn, 4, 2);
                Some(enc_s(imm, rs2, rs1, funct3::FP_D, op::STORE_FP))
            }
            0x6 => {
                // c.sw
                let imm = (c_bits(insn, 6, 6) << 2)
                    | (c_bits(insn, 12, 10) << 3)
                    | (c_bits(insn, 5, 5) << 6);
                let rs1 = 8 + c_bits(insn, 9, 7);
                let rs2 = 8 + c_bits(insn, 4, 2);
                Some(enc_s(imm, rs2, rs1, funct3::SW, op::STORE))
            }
            0x7 => {
                // c.fsw (RV32)
                let imm = (c_bits(insn, 6, 6) << 2)
                    | (c_bits(insn, 12, 10) << 3)
                    | (c_bits(insn, 5, 5) << 6);
                let rs1 = 8 + c_bits(insn, 9, 7);
                let rs2 = 8 + c_bits(insn, 4, 2);
                Some(enc_s(imm, rs2, rs1, funct3::FP_W, op::STORE_FP))
            }
            _ => None,
        },

        QUADRANT_1 => match f3 {
            0x0 => {
                // c.addi / c.nop
                let rd = c_bits(insn, 11, 7);
                Some(enc_i(c_imm6(insn), rd, funct3::ADD_SUB, rd, op::OP_IMM))
            }
            0x1 => {
                // c.jal (RV32)
                Some(enc_j(c_imm_j(insn), 1))
            }
            0x2 => {
                // c.li
                let rd = c_bits(insn, 11, 7);
                Some(enc_i(c_imm6(insn), 0, funct3::ADD_SUB, rd, op::OP_IMM))
            }
            0x3 => {
                let rd = c_bits(insn, 11, 7);
                if rd == 2 {
                    // c.addi16sp
                    let imm = (c_bits(insn, 6, 6) << 4)
                        | (c_bits(insn, 2, 2) << 5)
                        | (c_bits(insn, 5, 5) << 6)
                        | (c_bits(insn, 4, 3) << 7)
                        | (c_bits(insn, 12, 12) << 9);
                    if imm == 0 {
                        return None;
                    }
                    return Some(enc_i(sign_extend(imm, 10), 2, funct3::ADD_SUB, 2, op::OP_IMM));
                }
                if rd == 0 {
                    return None;
                }
                // c.lui
                let imm = (c_bits(insn, 12, 12) << 5) | c_bits(insn, 6, 2);
                if imm == 0 {
                    return None;
                }
                Some(((sign_extend(imm, 6) << 12) & 0xffff_f000) | (rd << 7) | op::LUI)
            }
            0x4 => {
                let rd = 8 + c_bits(insn, 9, 7);
                match c_bits(insn, 11, 10) {
                    0x0 => {
                        // c.srli (shamt[5] must be zero on RV32)
                        if c_bits(insn, 12, 12) != 0 {
                            return None;
                        }
                        let shamt = c_bits(insn, 6, 2);
                        Some(enc_i(shamt, rd, funct3::SRL_SRA, rd, op::OP_IMM))
                    }
                    0x1 => {
                        // c.srai
                        if c_bits(insn, 12, 12) != 0 {
                            return None;
                        }
                        let shamt = c_bits(insn, 6, 2);
                        Some(enc_i(
                            (funct7::ALT << 5) | shamt,
                            rd,
                            funct3::SRL_SRA,
                            rd,
                            op::OP_IMM,
                        ))
                    }
                    0x2 => {
                        // c.andi
                        Some(enc_i(c_imm6(insn), rd, funct3::AND, rd, op::OP_IMM))
                    }
                    _ => {
                        // c.sub/c.xor/c.or/c.and (bit 12 set selects RV64 forms)
                        if c_bits(insn, 12, 12) != 0 {
                            return None;
                        }
                        let rs2 = 8 + c_bits(insn, 4, 2);
                        match c_bits(insn, 6, 5) {
                            0x0 => Some(enc_r(funct7::ALT, rs2, rd, funct3::ADD_SUB, rd, op::OP)),
                            0x1 => Some(enc_r(funct7::BASE, rs2, rd, funct3::XOR, rd, op::OP)),
                            0x2 => Some(enc_r(funct7::BASE, rs2, rd, funct3::OR, rd, op::OP)),
                            _ => Some(enc_r(funct7::BASE, rs2, rd, funct3::AND, rd, op::OP)),
                        }
                    }
                }
            }
            0x5 => {
                // c.j
                Some(enc_j(c_imm_j(insn), 0))
            }
            0x6 => {
                // c.beqz
                let rs1 = 8 + c_bits(insn, 9, 7);
                Some(enc_b(c_imm_b(insn), 0, rs1, funct3::BEQ))
            }
            0x7 => {
                // c.bnez
                let rs1 = 8 + c_bits(insn, 9, 7);
                Some(enc_b(c_imm_b(insn), 0, rs1, funct3::BNE))
            }
            _ => None,
        },

        QUADRANT_2 => match f3 {
            0x0 => {
                // c.slli
                let rd = c_bits(insn, 11, 7);
                if rd == 0 || c_bits(insn, 12, 12) != 0 {
                    return None;
                }
                let shamt = c_bits(insn, 6, 2);
                Some(enc_i(shamt, rd, funct3::SLL, rd, op::OP_IMM))
            }
            0x1 => {
                // c.fldsp
                let rd = c_bits(insn, 11, 7);
                if rd == 0 {
                    return None;
                }
                let imm = (c_bits(insn, 4, 2) << 6)
                    | (c_bits(insn, 12, 12) << 5)
                    | (c_bits(insn, 6, 5) << 3);
                Some(enc_i(imm, 2, funct3::FP_D, rd, op::LOAD_FP))
            }
            0x2 => {
                // c.lwsp
                let rd = c_bits(insn, 11, 7);
                if rd == 0 {
                    return None;
                }
                let imm = (c_bits(insn, 6, 4) << 2)
                    | (c_bits(insn, 12, 12) << 5)
                    | (c_bits(insn, 3, 2) << 6);
                Some(enc_i(imm, 2, funct3::LW, rd, op::LOAD))
            }
            0x3 => {
                // c.flwsp (RV32)
                let rd = c_bits(insn, 11, 7);
                if rd == 0 {
                    return None;
                }
                let imm = (c_bits(insn, 6, 4) << 2)
                    | (c_bits(insn, 12, 12) << 5)
                    | (c_bits(insn, 3, 2) << 6);
                Some(enc_i(imm, 2, funct3::FP_W, rd, op::LOAD_FP))
            }
            0x4 => {
                let rd = c_bits(insn, 11, 7);
                let rs2 = c_bits(insn, 6, 2);
                if c_bits(insn, 12, 12) == 0 {
                    if rs2 == 0 {
                        // c.jr
                        if rd == 0 {
                            return None;
                        }
                        return Some(enc_i(0, rd, 0, 0, op::JALR));
                    }
                    if rd == 0 {
                        return None;
                    }
                    // c.mv
                    return Some(enc_r(funct7::BASE, rs2, 0, funct3::ADD_SUB, rd, op::OP));
                }
                if rd == 0 && rs2 == 0 {
                    // c.ebreak
                    return Some(0x0010_0073);
                }
                if rs2 == 0 {
                    // c.jalr
                    if rd == 0 {
                        return None;
                    }
                    return Some(enc_i(0, rd, 0, 1, op::JALR));
                }
                if rd == 0 {
                    return None;
                }
                // c.add
                Some(enc_r(funct7::BASE, rs2, rd, funct3::ADD_SUB, rd, op::OP))
            }
            0x5 => {
                // c.fsdsp
                let rs2 = c_bits(insn, 6, 2);
                let imm = (c_bits(insn, 12, 10) << 3) | (c_bits(insn, 9, 7) << 6);
                Some(enc_s(imm, rs2, 2, funct3::FP_D, op::STORE_FP))
            }
            0x6 => {
                // c.swsp
                let rs2 = c_bits(insn, 6, 2);
                let imm = (c_bits(insn, 12, 9) << 2) | (c_bits(insn, 8, 7) << 6);
                Some(enc_s(imm, rs2, 2, funct3::SW, op::STORE))
            }
            0x7 => {
                // c.fswsp
                let rs2 = c_bits(insn, 6, 2);
                let imm = (c_bits(insn, 12, 9) << 2) | (c_bits(insn, 8, 7) << 6);
                Some(enc_s(imm, rs2, 2, funct3::FP_W, op::STORE_FP))
            }
            _ => None,
        },

        _ => None,
    }
}
