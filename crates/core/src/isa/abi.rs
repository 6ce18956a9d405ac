//! ABI register index constants.
//!
//! Only the registers the platform touches by name (boot protocol and the
//! SBI calling convention) are listed.

/// Return address (x1).
pub const REG_RA: usize = 1;
/// Stack pointer (x2).
pub const REG_SP: usize = 2;
/// Argument/return register a0 (x10).
pub const REG_A0: usize = 10;
/// Argument/return register a1 (x11).
pub const REG_A1: usize = 11;
/// Argument register a2 (x12).
pub const REG_A2: usize = 12;
/// SBI function id register a6 (x16).
pub const REG_A6: usize = 16;
/// SBI extension id register a7 (x17).
pub const REG_A7: usize = 17;
