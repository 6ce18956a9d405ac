//! Hotness-driven native code generation for translation blocks.
//!
//! The JIT lowers the supported prefix of a hot TB line into x86-64 machine
//! code: ALU operations inline against the hart's register file, memory and
//! control flow through helper trampolines that re-enter the MMU and trap
//! layer. Blocks chain to each other through a relocatable epilogue, and a
//! worker pool can carry compilation off the execution thread.
//!
//! On hosts other than x86-64 the dispatch entry reports no progress and
//! the schedulers stay on the interpreter and block paths.

#[cfg(target_arch = "x86_64")]
mod async_compile;
#[cfg(target_arch = "x86_64")]
mod compile;
#[cfg(target_arch = "x86_64")]
mod dispatch;
#[cfg(target_arch = "x86_64")]
mod emit;
#[cfg(target_arch = "x86_64")]
mod pool;
#[cfg(target_arch = "x86_64")]
mod runtime;

#[cfg(target_arch = "x86_64")]
pub use async_compile::worker_count;
#[cfg(target_arch = "x86_64")]
pub use compile::insn_supported;
#[cfg(target_arch = "x86_64")]
pub use dispatch::exec_tb_jit;

#[cfg(not(target_arch = "x86_64"))]
mod fallback {
    use crate::hart::Hart;
    use crate::machine::Machine;
    use crate::tb::{JitResult, TbCache};

    /// JIT dispatch on a host without a code generator: never progresses.
    pub fn exec_tb_jit(
        _m: &Machine,
        _cpu: &mut Hart,
        _cache: &mut TbCache,
        _budget: u64,
    ) -> JitResult {
        JitResult::no_progress()
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub use fallback::exec_tb_jit;
