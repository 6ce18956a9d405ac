//! RV32 SoC emulator library.
//!
//! This crate implements a 32-bit RISC-V system emulator with the following:
//! 1. **Core:** RV32IMAFDC interpreter (FP as data movement), M/S/U
//!    privilege modes, Sv32 translation, and the trap architecture.
//! 2. **Platform:** DRAM plus a 16550-like UART, CLINT, PLIC, and stub
//!    VirtIO slots behind one memory fabric.
//! 3. **Acceleration:** a translation-block cache with a block interpreter
//!    and a hotness-driven x86-64 template JIT with chain linking and an
//!    optional async compile pool.
//! 4. **Scheduling:** round-robin single-thread or one-thread-per-hart
//!    execution of up to four harts with cross-hart IPI and LR/SC
//!    coordination.
//! 5. **Surface:** machine options, ELF32/raw loaders, the SBI shim, and
//!    the `RV32SIM_EXPERIMENTAL_*` tuning knobs.

/// Common types and constants (memory map, modes, traps).
pub mod common;
/// Machine options and tuning-knob parsing.
pub mod config;
/// Control and status registers.
pub mod csr;
/// Per-instruction interpreter.
pub mod exec;
/// Architectural per-hart state.
pub mod hart;
/// Instruction set: decode, RVC expansion, constant tables.
pub mod isa;
/// Native code generation for translation blocks.
pub mod jit;
/// Guest image loading.
pub mod loader;
/// Machine aggregate: options, platform, harts.
pub mod machine;
/// Sv32 translation and virtual memory access.
pub mod mmu;
/// Execution scheduling.
pub mod run;
/// SBI shim for S-mode environment calls.
pub mod sbi;
/// System-on-chip: memory fabric and devices.
pub mod soc;
/// Process-wide TB/JIT statistics.
pub mod stats;
/// Translation-block cache and block execution.
pub mod tb;
/// Trap entry, delegation, and interrupt selection.
pub mod trap;

/// Machine construction options; deserialize from JSON or use the defaults.
pub use crate::config::MachineOptions;
/// Architectural hart state.
pub use crate::hart::Hart;
/// The emulated machine; construct with `Machine::new`.
pub use crate::machine::{Machine, MachineError};
/// Top-level run entry point.
pub use crate::run::run;
