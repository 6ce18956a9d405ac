//! Instruction decoding.
//!
//! This module converts raw instruction words into the [`Decoded`] record.
//! It extracts the fixed fields, pre-computes the sign-extended immediate of
//! every canonical format (I, S, B, U, J), and tags the record with its
//! instruction family. Compressed encodings are expanded to their 32-bit
//! equivalent first so the interpreter dispatches on a single shape.
//!
//! Decoding never touches architectural state and never faults; executing an
//! unrecognized record raises illegal instruction.

use crate::common::sign_extend;
use crate::isa::insn::{Decoded, InsnBits, InsnClass};
use crate::isa::rvc;

/// Decodes a 32-bit instruction into its component fields.
///
/// # Arguments
///
/// * `insn` - The 32-bit instruction encoding to decode.
///
/// # Returns
///
/// A [`Decoded`] record with all fields and immediates extracted.
#[must_use]
pub fn decode32(insn: u32) -> Decoded {
    let opcode = insn.opcode();

    Decoded {
        raw: insn,
        opcode,
        rd: insn.rd(),
        rs1: insn.rs1(),
        rs2: insn.rs2(),
        funct3: insn.funct3(),
        funct7: insn.funct7(),
        imm_i: decode_i_imm(insn),
        imm_s: decode_s_imm(insn),
        imm_b: decode_b_imm(insn),
        imm_u: decode_u_imm(insn),
        imm_j: decode_j_imm(insn),
        class: InsnClass::from_opcode(opcode),
        insn_len: 4,
    }
}

/// Decodes a 16-bit compressed instruction into the 32-bit decoded shape.
///
/// The compressed form is first expanded to its 32-bit equivalent and then
/// decoded; `raw` keeps the original 16-bit encoding and `insn_len` is 2.
///
/// # Returns
///
/// `None` for reserved or RV64-only compressed encodings; executing the
/// caller's fallback record raises illegal instruction.
#[must_use]
pub fn decode16(insn: u16) -> Option<Decoded> {
    let expanded = rvc::expand(insn)?;
    let mut decoded = decode32(expanded);
    decoded.raw = u32::from(insn);
    decoded.insn_len = 2;
    Some(decoded)
}

/// Decodes the I-type immediate: `imm[11:0]` from bits 31:20, sign-extended.
fn decode_i_imm(insn: u32) -> i32 {
    (insn as i32) >> 20
}

/// Decodes the S-type immediate: `imm[11:5]` from bits 31:25 and `imm[4:0]`
/// from bits 11:7, sign-extended.
fn decode_s_imm(insn: u32) -> i32 {
    let low = (insn >> 7) & 0x1f;
    let high = (insn >> 25) & 0x7f;
    sign_extend((high << 5) | low, 12) as i32
}

/// Decodes the B-type immediate: `imm[12|10:5|4:1|11]` from bits
/// 31|30:25|11:8|7, sign-extended. The offset is always even.
fn decode_b_imm(insn: u32) -> i32 {
    let bit_11 = (insn >> 7) & 0x1;
    let bits_4_1 = (insn >> 8) & 0xf;
    let bits_10_5 = (insn >> 25) & 0x3f;
    let bit_12 = (insn >> 31) & 0x1;

    let combined = (bit_12 << 12) | (bit_11 << 11) | (bits_10_5 << 5) | (bits_4_1 << 1);
    sign_extend(combined, 13) as i32
}

/// Decodes the U-type immediate: bits 31:12 in place, low 12 bits zero.
fn decode_u_imm(insn: u32) -> i32 {
    (insn & 0xffff_f000) as i32
}

/// Decodes the J-type immediate: `imm[20|10:1|11|19:12]` from bits
/// 31|30:21|20|19:12, sign-extended. The offset is always even.
fn decode_j_imm(insn: u32) -> i32 {
    let bits_19_12 = (insn >> 12) & 0xff;
    let bit_11 = (insn >> 20) & 0x1;
    let bits_10_1 = (insn >> 21) & 0x3ff;
    let bit_20 = (insn >> 31) & 0x1;

    let combined = (bit_20 << 20) | (bits_19_12 << 12) | (bit_11 << 11) | (bits_10_1 << 1);
    sign_extend(combined, 21) as i32
}
