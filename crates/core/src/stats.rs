//! Process-wide TB/JIT statistics.
//!
//! Counters are relaxed atomics incremented from the execution threads, the
//! generated code helpers, and the async compile workers. They survive
//! failures (a pool-exhausted JIT keeps counting) and are reset explicitly.
//! The dump is gated behind the `RV32SIM_EXPERIMENTAL_JIT_STATS` knob.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// One relaxed event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Adds one.
    #[inline]
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `n`.
    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

macro_rules! jit_stats {
    ($($(#[$doc:meta])* $name:ident),+ $(,)?) => {
        /// The TB/JIT counter set.
        #[derive(Debug)]
        pub struct JitStats {
            $($(#[$doc])* pub $name: Counter,)+
        }

        impl JitStats {
            const fn new() -> Self {
                Self { $($name: Counter::new(),)+ }
            }

            /// Resets every counter to zero.
            pub fn reset(&self) {
                $(self.$name.reset();)+
            }

            /// Writes a human-readable report of the non-zero counters.
            pub fn dump(&self, executed: u64) {
                eprintln!("[jit-stats] executed={executed}");
                $(
                    let value = self.$name.get();
                    if value != 0 {
                        eprintln!("[jit-stats]   {}={}", stringify!($name), value);
                    }
                )+
            }
        }
    };
}

jit_stats! {
    /// JIT dispatch attempts.
    dispatch_calls,
    /// Dispatches whose budget was clamped to the chain cap.
    dispatch_budget_clamped,
    /// Dispatches that found no ready compiled line.
    dispatch_no_ready,
    /// Dispatches that returned handled-no-retire.
    dispatch_handled_no_retire,
    /// Dispatches that made no progress.
    dispatch_noprogress,
    /// Dispatches that retired at least one instruction.
    dispatch_retired_calls,
    /// Guest instructions retired through compiled code.
    dispatch_retired_insns,
    /// Chain-cache hits in the block epilogue.
    chain_hits,
    /// Chain-cache misses in the block epilogue.
    chain_misses,
    /// Compile attempts.
    compile_attempts,
    /// Successful compiles.
    compile_success,
    /// Instructions covered by successful compiles.
    compile_prefix_insns,
    /// Compiles rejected because the supported prefix was empty.
    compile_fail_unsupported_prefix,
    /// Compiles rejected because the prefix was below the minimum.
    compile_fail_too_short,
    /// Compiles failing for code-pool exhaustion.
    compile_fail_alloc,
    /// Compiles failing in the emitter.
    compile_fail_emit,
    /// Prefixes truncated at the block-length cap.
    compile_prefix_truncated,
    /// Exact-prefix template hits.
    compile_template_hit,
    /// Exact-prefix template stores.
    compile_template_store,
    /// Structure-keyed template hits.
    compile_struct_hit,
    /// Structure-keyed template stores.
    compile_struct_store,
    /// Memory-helper invocations from generated code.
    helper_mem_calls,
    /// Control-flow-helper invocations from generated code.
    helper_cf_calls,
    /// Async compile jobs enqueued.
    async_jobs_enqueued,
    /// Async compile jobs dropped (queue full or backpressure).
    async_jobs_dropped,
    /// Async compile jobs completed by a worker.
    async_jobs_compiled,
    /// Async results applied (direct or recycled).
    async_results_applied,
    /// Async results applied to their original line.
    async_applied_direct,
    /// Async results relocated onto a rebuilt line.
    async_applied_recycled,
    /// Async results unusable: artifact not portable.
    async_stale_nonportable,
    /// Async results unusable: compile did not succeed.
    async_stale_not_success,
    /// Async results unusable: target line no longer cached.
    async_stale_lookup_miss,
    /// Async results unusable: target line in the wrong state.
    async_stale_state_mismatch,
    /// Async results unusable: prefix signature changed.
    async_stale_sig_mismatch,
    /// Async results classified stale (sum of the above).
    async_results_stale,
    /// Queued lines reverted to foreground compilation.
    async_sync_fallbacks,
    /// Template fast-applies on the queueing path.
    async_template_applied,
    /// Guest-visible stale artifacts dropped at dispatch.
    async_results_stale_guest,
    /// Lines evicted while a compile job was in flight.
    async_evict_queued,
}

static JIT_STATS: JitStats = JitStats::new();

/// The process-wide TB/JIT counter set.
#[must_use]
pub fn jit() -> &'static JitStats {
    &JIT_STATS
}

static JIT_GENERATION: AtomicU32 = AtomicU32::new(1);

/// Allocates the next line-generation stamp (never zero).
#[must_use]
pub fn next_jit_generation() -> u32 {
    let generation = JIT_GENERATION.fetch_add(1, Ordering::Relaxed);
    if generation == u32::MAX {
        JIT_GENERATION.store(1, Ordering::Relaxed);
        return JIT_GENERATION.fetch_add(1, Ordering::Relaxed);
    }
    generation
}

/// Whether the stats dump is enabled.
#[must_use]
pub fn dump_enabled() -> bool {
    crate::config::env_bool("EXPERIMENTAL_JIT_STATS", false)
}
