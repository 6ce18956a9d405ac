//! Translation-block and JIT tuning knobs.
//!
//! All knobs live under the `RV32SIM_EXPERIMENTAL_*` environment prefix and
//! are parsed once per cache construction; numeric values are clamped to
//! their documented ranges.

use crate::config::{env_bool, env_u32};
use crate::tb::cache::TB_MAX_INSNS;

/// Default hotness threshold before a line is compiled.
pub const DEFAULT_HOT_THRESHOLD: u32 = 3;
/// Default upper bound on a compiled prefix.
pub const DEFAULT_MAX_BLOCK_INSNS: u32 = 8;
/// Default lower bound below which a prefix is rejected.
pub const DEFAULT_MIN_PREFIX_INSNS: u32 = 4;
/// Default cap on chained retires per dispatch.
pub const DEFAULT_CHAIN_MAX_INSNS: u32 = 64;
/// Hard cap on the chain limit knob.
pub const MAX_CHAIN_LIMIT: u32 = 4096;
/// Default code-pool capacity in MiB.
pub const DEFAULT_POOL_MB: u32 = 4;
/// Hard cap on the code-pool knob.
pub const MAX_POOL_MB: u32 = 1024;
/// Default async compile queue depth.
pub const DEFAULT_ASYNC_QUEUE: u32 = 1024;
/// Hard cap on the async queue knob.
pub const MAX_ASYNC_QUEUE: u32 = 16384;
/// Default async worker count.
pub const DEFAULT_ASYNC_WORKERS: u32 = 2;
/// Hard cap on the async worker knob.
pub const MAX_ASYNC_WORKERS: u32 = 8;
/// Default async busy-percent backpressure threshold.
pub const DEFAULT_ASYNC_BUSY_PCT: u32 = 75;
/// Default hotness discount applied when compiling asynchronously.
pub const DEFAULT_ASYNC_HOT_DISCOUNT: u32 = 1;
/// Default hotness bonus applied when compiling asynchronously.
pub const DEFAULT_ASYNC_HOT_BONUS: u32 = 0;
/// Foreground drain interval in dispatch attempts.
pub const ASYNC_DRAIN_INTERVAL: u8 = 8;

/// Parsed tuning knobs for one TB cache.
#[derive(Clone, Copy, Debug)]
pub struct TbTuning {
    /// Hits before a line is compiled.
    pub hot_threshold: u8,
    /// Upper bound on the compiled prefix.
    pub max_block_insns: u8,
    /// Prefixes shorter than this are rejected.
    pub min_prefix_insns: u8,
    /// Cap on chained retires per dispatch.
    pub chain_max_insns: u32,
    /// Compile TB lines off the execution thread.
    pub async_enabled: bool,
    /// Force synchronous compilation even when the pool is running.
    pub async_foreground_sync: bool,
    /// Speculatively queue static successors of hot blocks.
    pub async_prefetch: bool,
    /// Allow helper-calling blocks to be compiled asynchronously.
    pub async_allow_helpers: bool,
    /// Re-decode helper operands from guest memory at execution time.
    pub async_redecode_helpers: bool,
    /// Allow structure-keyed recycling of async results.
    pub async_recycle: bool,
    /// Apply exact-prefix template hits when queueing instead of compiling.
    pub template_fast_apply: bool,
    /// Queued dispatch attempts before reverting to foreground compile.
    pub sync_fallback_spins: u8,
    /// Queue-depth percentage treated as "busy" for backpressure.
    pub async_busy_pct: u8,
    /// Hotness-threshold discount for async compilation.
    pub async_hot_discount: u8,
    /// Hotness-threshold bonus for async compilation.
    pub async_hot_bonus: u8,
}

impl TbTuning {
    /// Parses the knob surface from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            hot_threshold: env_u32("EXPERIMENTAL_JIT_HOT", DEFAULT_HOT_THRESHOLD, 1, 255) as u8,
            max_block_insns: env_u32(
                "EXPERIMENTAL_JIT_MAX_BLOCK_INSNS",
                DEFAULT_MAX_BLOCK_INSNS,
                1,
                TB_MAX_INSNS as u32,
            ) as u8,
            min_prefix_insns: env_u32(
                "EXPERIMENTAL_JIT_MIN_PREFIX_INSNS",
                DEFAULT_MIN_PREFIX_INSNS,
                1,
                TB_MAX_INSNS as u32,
            ) as u8,
            chain_max_insns: env_u32(
                "EXPERIMENTAL_JIT_CHAIN_MAX_INSNS",
                DEFAULT_CHAIN_MAX_INSNS,
                1,
                MAX_CHAIN_LIMIT,
            ),
            async_enabled: env_bool("EXPERIMENTAL_JIT_ASYNC", false),
            async_foreground_sync: env_bool("EXPERIMENTAL_JIT_ASYNC_FOREGROUND_SYNC", true),
            async_prefetch: env_bool("EXPERIMENTAL_JIT_ASYNC_PREFETCH", false),
            async_allow_helpers: env_bool("EXPERIMENTAL_JIT_ASYNC_ALLOW_HELPERS", true),
            async_redecode_helpers: env_bool("EXPERIMENTAL_JIT_ASYNC_REDECODE_HELPERS", false),
            async_recycle: env_bool("EXPERIMENTAL_JIT_ASYNC_RECYCLE", false),
            template_fast_apply: env_bool("EXPERIMENTAL_JIT_TEMPLATE_FAST_APPLY", false),
            sync_fallback_spins: env_u32("EXPERIMENTAL_JIT_ASYNC_SYNC_FALLBACK_SPINS", 8, 0, 255)
                as u8,
            async_busy_pct: env_u32(
                "EXPERIMENTAL_JIT_ASYNC_BUSY_PCT",
                DEFAULT_ASYNC_BUSY_PCT,
                10,
                100,
            ) as u8,
            async_hot_discount: env_u32(
                "EXPERIMENTAL_JIT_ASYNC_HOT_DISCOUNT",
                DEFAULT_ASYNC_HOT_DISCOUNT,
                0,
                254,
            ) as u8,
            async_hot_bonus: env_u32(
                "EXPERIMENTAL_JIT_ASYNC_HOT_BONUS",
                DEFAULT_ASYNC_HOT_BONUS,
                0,
                255,
            ) as u8,
        }
    }
}

impl Default for TbTuning {
    /// The built-in defaults, independent of the environment. Used by tests
    /// that must not observe ambient knob settings.
    fn default() -> Self {
        Self {
            hot_threshold: DEFAULT_HOT_THRESHOLD as u8,
            max_block_insns: DEFAULT_MAX_BLOCK_INSNS as u8,
            min_prefix_insns: DEFAULT_MIN_PREFIX_INSNS as u8,
            chain_max_insns: DEFAULT_CHAIN_MAX_INSNS,
            async_enabled: false,
            async_foreground_sync: true,
            async_prefetch: false,
            async_allow_helpers: true,
            async_redecode_helpers: false,
            async_recycle: false,
            template_fast_apply: false,
            sync_fallback_spins: 8,
            async_busy_pct: DEFAULT_ASYNC_BUSY_PCT as u8,
            async_hot_discount: DEFAULT_ASYNC_HOT_DISCOUNT as u8,
            async_hot_bonus: DEFAULT_ASYNC_HOT_BONUS as u8,
        }
    }
}
