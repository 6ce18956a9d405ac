//! Opcode and function-code constants for the RV32IMAFDC subset.
//!
//! Grouped by field so executing code reads like the ISA listing:
//! `opcodes::OP_BRANCH`, `funct3::BEQ`, `funct5::LR_W`, and so on.

/// Major opcode field values (bits 6:0 of the 32-bit encoding).
pub mod op {
    /// LUI (load upper immediate).
    pub const LUI: u32 = 0x37;
    /// AUIPC (add upper immediate to PC).
    pub const AUIPC: u32 = 0x17;
    /// JAL (jump and link).
    pub const JAL: u32 = 0x6f;
    /// JALR (jump and link register).
    pub const JALR: u32 = 0x67;
    /// Conditional branch family.
    pub const BRANCH: u32 = 0x63;
    /// Integer load family.
    pub const LOAD: u32 = 0x03;
    /// Integer store family.
    pub const STORE: u32 = 0x23;
    /// Floating-point load family.
    pub const LOAD_FP: u32 = 0x07;
    /// Floating-point store family.
    pub const STORE_FP: u32 = 0x27;
    /// Integer register-immediate operations.
    pub const OP_IMM: u32 = 0x13;
    /// Integer register-register operations (and M-extension).
    pub const OP: u32 = 0x33;
    /// Floating-point computational operations.
    pub const OP_FP: u32 = 0x53;
    /// FENCE / FENCE.I.
    pub const MISC_MEM: u32 = 0x0f;
    /// Atomic memory operations (A-extension).
    pub const AMO: u32 = 0x2f;
    /// SYSTEM (ECALL/EBREAK/xRET/WFI/SFENCE.VMA and CSR operations).
    pub const SYSTEM: u32 = 0x73;
}

/// funct3 field values, grouped by the opcode family they refine.
pub mod funct3 {
    /// BRANCH: equal.
    pub const BEQ: u32 = 0x0;
    /// BRANCH: not equal.
    pub const BNE: u32 = 0x1;
    /// BRANCH: signed less-than.
    pub const BLT: u32 = 0x4;
    /// BRANCH: signed greater-or-equal.
    pub const BGE: u32 = 0x5;
    /// BRANCH: unsigned less-than.
    pub const BLTU: u32 = 0x6;
    /// BRANCH: unsigned greater-or-equal.
    pub const BGEU: u32 = 0x7;

    /// LOAD: signed byte.
    pub const LB: u32 = 0x0;
    /// LOAD: signed halfword.
    pub const LH: u32 = 0x1;
    /// LOAD: word.
    pub const LW: u32 = 0x2;
    /// LOAD: unsigned byte.
    pub const LBU: u32 = 0x4;
    /// LOAD: unsigned halfword.
    pub const LHU: u32 = 0x5;

    /// STORE: byte.
    pub const SB: u32 = 0x0;
    /// STORE: halfword.
    pub const SH: u32 = 0x1;
    /// STORE: word.
    pub const SW: u32 = 0x2;

    /// OP/OP-IMM: add (sub with funct7 bit 5 on OP).
    pub const ADD_SUB: u32 = 0x0;
    /// OP/OP-IMM: shift left logical.
    pub const SLL: u32 = 0x1;
    /// OP/OP-IMM: set less-than signed.
    pub const SLT: u32 = 0x2;
    /// OP/OP-IMM: set less-than unsigned.
    pub const SLTU: u32 = 0x3;
    /// OP/OP-IMM: exclusive or.
    pub const XOR: u32 = 0x4;
    /// OP/OP-IMM: shift right (logical/arithmetic by funct7).
    pub const SRL_SRA: u32 = 0x5;
    /// OP/OP-IMM: inclusive or.
    pub const OR: u32 = 0x6;
    /// OP/OP-IMM: and.
    pub const AND: u32 = 0x7;

    /// M-extension: multiply low.
    pub const MUL: u32 = 0x0;
    /// M-extension: multiply high signed x signed.
    pub const MULH: u32 = 0x1;
    /// M-extension: multiply high signed x unsigned.
    pub const MULHSU: u32 = 0x2;
    /// M-extension: multiply high unsigned x unsigned.
    pub const MULHU: u32 = 0x3;
    /// M-extension: divide signed.
    pub const DIV: u32 = 0x4;
    /// M-extension: divide unsigned.
    pub const DIVU: u32 = 0x5;
    /// M-extension: remainder signed.
    pub const REM: u32 = 0x6;
    /// M-extension: remainder unsigned.
    pub const REMU: u32 = 0x7;

    /// FP load/store: single precision (32-bit).
    pub const FP_W: u32 = 0x2;
    /// FP load/store: double precision (64-bit).
    pub const FP_D: u32 = 0x3;

    /// SYSTEM: CSRRW.
    pub const CSRRW: u32 = 0x1;
    /// SYSTEM: CSRRS.
    pub const CSRRS: u32 = 0x2;
    /// SYSTEM: CSRRC.
    pub const CSRRC: u32 = 0x3;
    /// SYSTEM: CSRRWI.
    pub const CSRRWI: u32 = 0x5;
    /// SYSTEM: CSRRSI.
    pub const CSRRSI: u32 = 0x6;
    /// SYSTEM: CSRRCI.
    pub const CSRRCI: u32 = 0x7;
}

/// funct7 field values.
pub mod funct7 {
    /// Base encoding (ADD, SRL, ...).
    pub const BASE: u32 = 0x00;
    /// M-extension marker on OP.
    pub const MULDIV: u32 = 0x01;
    /// Alternate encoding (SUB, SRA).
    pub const ALT: u32 = 0x20;
    /// OP-FP: single-precision sign injection.
    pub const FSGNJ_S: u32 = 0x10;
    /// OP-FP: double-precision sign injection.
    pub const FSGNJ_D: u32 = 0x11;
    /// OP-FP: FMV.X.W.
    pub const FMV_X_W: u32 = 0x70;
    /// OP-FP: FMV.W.X.
    pub const FMV_W_X: u32 = 0x78;
    /// SYSTEM: SFENCE.VMA.
    pub const SFENCE_VMA: u32 = 0x09;
    /// SYSTEM: SRET/WFI group.
    pub const SRET_WFI: u32 = 0x08;
    /// SYSTEM: MRET group.
    pub const MRET: u32 = 0x18;
}

/// funct5 field values (bits 31:27) for the AMO opcode.
pub mod funct5 {
    /// Load-reserved word.
    pub const LR_W: u32 = 0x02;
    /// Store-conditional word.
    pub const SC_W: u32 = 0x03;
    /// Atomic swap.
    pub const AMOSWAP_W: u32 = 0x01;
    /// Atomic add.
    pub const AMOADD_W: u32 = 0x00;
    /// Atomic xor.
    pub const AMOXOR_W: u32 = 0x04;
    /// Atomic and.
    pub const AMOAND_W: u32 = 0x0c;
    /// Atomic or.
    pub const AMOOR_W: u32 = 0x08;
    /// Atomic minimum (signed).
    pub const AMOMIN_W: u32 = 0x10;
    /// Atomic maximum (signed).
    pub const AMOMAX_W: u32 = 0x14;
    /// Atomic minimum (unsigned).
    pub const AMOMINU_W: u32 = 0x18;
    /// Atomic maximum (unsigned).
    pub const AMOMAXU_W: u32 = 0x1c;
}
