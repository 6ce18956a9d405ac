//! Translation-block cache and block execution.
//!
//! A translation block (TB) is a cached decode of up to 32 consecutive
//! instructions starting at a PC, ending at the first control-flow or
//! system instruction. This module provides:
//! 1. **Cache:** a PC-indexed, 2-way set-associative line store with a
//!    hotness-aware eviction policy.
//! 2. **Block executor:** replays decoded lines through the interpreter,
//!    crediting partial retirement on traps.
//! 3. **Tuning:** the `RV32SIM_EXPERIMENTAL_*` knob surface.
//!
//! The JIT consumes the same lines; its state machine lives in the line
//! fields (`jit_state`, hotness, chain cache).

/// Block execution over cached lines.
pub mod block;
/// TB line and cache structures.
pub mod cache;
/// Tuning-knob parsing.
pub mod config;

pub use block::{BlockResult, BlockStatus, exec_one_tb, exec_tb_block};
pub use cache::{JitState, TB_MAX_INSNS, TbCache, TbLine};
pub use config::TbTuning;

use crate::hart::Hart;
use crate::machine::Machine;

/// Entry point of a compiled block.
///
/// The System V arguments are the machine and the hart; the return value is
/// the cumulative retired count, or a non-positive value for the
/// handled-no-retire and no-progress outcomes.
pub type JitFn = unsafe extern "C" fn(*const Machine, *mut Hart) -> i32;

/// Outcome of one JIT dispatch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JitStatus {
    /// No compiled block was entered; the caller should fall back.
    NoProgress,
    /// The block retired `retired` guest instructions.
    Retired,
    /// The dispatch consumed an event (interrupt, stop, fault) without
    /// crediting guest retirement; the PC may have moved.
    HandledNoRetire,
}

/// Result of one JIT dispatch attempt.
#[derive(Clone, Copy, Debug)]
pub struct JitResult {
    /// Outcome classification.
    pub status: JitStatus,
    /// Retired instruction count (meaningful for `Retired`).
    pub retired: u32,
}

impl JitResult {
    /// The no-progress result.
    #[must_use]
    pub fn no_progress() -> Self {
        Self {
            status: JitStatus::NoProgress,
            retired: 0,
        }
    }
}
