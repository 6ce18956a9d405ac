//! Instruction set: decoding, compressed expansion, and constant tables.
//!
//! This module turns raw instruction words into the uniform [`Decoded`]
//! record the rest of the core dispatches on. It provides:
//! 1. **Decoding:** Field and immediate extraction for 32-bit encodings.
//! 2. **RVC:** Expansion of 16-bit compressed forms into the 32-bit shape.
//! 3. **Tables:** Opcode, funct, and ABI register constants.

/// ABI register index constants.
pub mod abi;
/// 32-bit and 16-bit instruction decoding.
pub mod decode;
/// Decoded instruction record and field extraction.
pub mod insn;
/// Opcode and function-code constants.
pub mod opcodes;
/// Compressed (RVC) instruction expansion.
pub mod rvc;

pub use decode::{decode16, decode32};
pub use insn::{Decoded, InsnBits, InsnClass};
