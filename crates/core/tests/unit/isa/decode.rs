//! 32-bit decoder tests: field extraction, immediates, class tagging.

use pretty_assertions::assert_eq;

use crate::common::builder::{addi, beq, enc_s, jal, lui, lw, sw};
use rv32sim_core::isa::{InsnClass, decode32};

#[test]
fn decode_addi_fields() {
    let d = decode32(addi(1, 2, 5));
    assert_eq!(d.opcode, 0x13);
    assert_eq!(d.rd, 1);
    assert_eq!(d.rs1, 2);
    assert_eq!(d.funct3, 0x0);
    assert_eq!(d.imm_i, 5);
    assert_eq!(d.class, InsnClass::I);
    assert_eq!(d.insn_len, 4);
}

#[test]
fn decode_addi_negative_immediate() {
    let d = decode32(addi(1, 1, -1));
    assert_eq!(d.imm_i, -1);
}

#[test]
fn decode_lui_upper_immediate() {
    let d = decode32(lui(3, 0xdead_b000));
    assert_eq!(d.class, InsnClass::U);
    assert_eq!(d.imm_u as u32, 0xdead_b000);
}

#[test]
fn decode_load_store_immediates_match() {
    let load = decode32(lw(5, 10, -32));
    let store = decode32(sw(5, 10, -32));
    assert_eq!(load.imm_i, -32);
    assert_eq!(store.imm_s, -32);
    assert_eq!(load.class, InsnClass::I);
    assert_eq!(store.class, InsnClass::S);
}

#[test]
fn decode_store_split_immediate() {
    // imm = 0x7ff exercises both halves of the split S-type field.
    let d = decode32(enc_s(0x7ff, 1, 2, 0x2, 0x23));
    assert_eq!(d.imm_s, 0x7ff);
}

#[test]
fn decode_branch_offset_sign() {
    let fwd = decode32(beq(1, 2, 0x100));
    let back = decode32(beq(1, 2, -0x100));
    assert_eq!(fwd.imm_b, 0x100);
    assert_eq!(back.imm_b, -0x100);
    assert_eq!(fwd.class, InsnClass::B);
}

#[test]
fn decode_jal_offset_sign() {
    let fwd = decode32(jal(1, 0x800));
    let back = decode32(jal(0, -0x800));
    assert_eq!(fwd.imm_j, 0x800);
    assert_eq!(back.imm_j, -0x800);
    assert_eq!(fwd.class, InsnClass::J);
}

#[test]
fn decode_system_class() {
    let d = decode32(0x0010_0073); // ebreak
    assert_eq!(d.class, InsnClass::System);
    assert!(d.is_block_terminator());
}

#[test]
fn decode_unknown_opcode() {
    let d = decode32(0x0000_007b);
    assert_eq!(d.class, InsnClass::Unknown);
}

#[test]
fn block_terminators() {
    assert!(decode32(jal(0, 8)).is_block_terminator());
    assert!(decode32(beq(0, 0, 8)).is_block_terminator());
    assert!(decode32(crate::common::builder::jalr(0, 1, 0)).is_block_terminator());
    assert!(!decode32(addi(1, 1, 1)).is_block_terminator());
    assert!(!decode32(lw(1, 2, 0)).is_block_terminator());
}
