//! Asynchronous block compilation.
//!
//! A bounded job queue feeds N detached worker threads; each job carries a
//! snapshot (never a live reference) of the source line's decoded prefix
//! and a generation stamp taken at enqueue time. The foreground drains
//! completed results on a fixed cadence: a result applies directly iff the
//! target line's generation still matches; otherwise a portable
//! (structure-keyed) result may be relocated onto the rebuilt line, and
//! anything else is classified for observability. Lines stuck in the queue
//! beyond the sync-fallback knob revert to foreground compilation.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, OnceLock};

use crate::config::env_bool;
use crate::isa::Decoded;
use crate::isa::opcodes::op;
use crate::jit::compile;
use crate::jit::pool::{self, Artifact};
use crate::machine::Machine;
use crate::stats;
use crate::tb::cache::{JitState, TB_MAX_INSNS, TbCache};
use crate::tb::config::{DEFAULT_ASYNC_QUEUE, DEFAULT_ASYNC_WORKERS, MAX_ASYNC_QUEUE, MAX_ASYNC_WORKERS};

/// One queued compile job: a self-contained snapshot of the line.
struct Job {
    start_pc: u32,
    generation: u32,
    portable: bool,
    count: u8,
    max_block_insns: u8,
    min_prefix_insns: u8,
    pcs: [u32; TB_MAX_INSNS],
    decoded: Box<[Decoded]>,
}

/// One completed compile, stamped for application.
struct Done {
    start_pc: u32,
    generation: u32,
    portable: bool,
    success: bool,
    prefix_sig: u64,
    artifact: Option<Artifact>,
}

struct MgrState {
    pending: VecDeque<Job>,
    done: VecDeque<Done>,
    running: bool,
}

struct Mgr {
    state: Mutex<MgrState>,
    pending_cv: Condvar,
    queue_cap: usize,
    worker_count: u32,
}

static MGR: OnceLock<Option<&'static Mgr>> = OnceLock::new();

fn worker_main(mgr: &'static Mgr) {
    loop {
        let job = {
            let mut state = match mgr.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            loop {
                if !state.running {
                    return;
                }
                if let Some(job) = state.pending.pop_front() {
                    break job;
                }
                state = match mgr.pending_cv.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };

        let mut prefix_sig = 0u64;
        let artifact = if job.portable {
            let key = compile::template_key(
                &job.decoded,
                &job.pcs,
                job.count,
                job.max_block_insns,
                job.min_prefix_insns,
            );
            let hit = key.and_then(|(jit_count, sig)| {
                pool::template_lookup(&job.decoded, &job.pcs, jit_count, sig)
                    .or_else(|| pool::struct_template_lookup(&job.decoded, jit_count, job.start_pc))
            });
            hit.or_else(|| {
                let compiled = compile::compile_from_snapshot(
                    &job.decoded,
                    &job.pcs,
                    job.count,
                    job.start_pc,
                    job.max_block_insns,
                    job.min_prefix_insns,
                );
                if let (Some(artifact), Some((jit_count, sig))) = (&compiled, key) {
                    if artifact.jit_count == jit_count {
                        pool::template_store(&job.decoded, &job.pcs, jit_count, sig, artifact);
                        pool::struct_template_store(&job.decoded, jit_count, artifact);
                    }
                }
                compiled
            })
        } else {
            compile::compile_from_snapshot(
                &job.decoded,
                &job.pcs,
                job.count,
                job.start_pc,
                job.max_block_insns,
                job.min_prefix_insns,
            )
        };
        stats::jit().async_jobs_compiled.incr();

        if job.portable {
            if let Some(artifact) = &artifact {
                prefix_sig = pool::prefix_signature(&job.decoded, &job.pcs, artifact.jit_count);
            }
        }

        let done = Done {
            start_pc: job.start_pc,
            generation: job.generation,
            portable: job.portable,
            success: artifact.is_some(),
            prefix_sig,
            artifact,
        };

        let mut state = match mgr.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.done.len() < mgr.queue_cap {
            state.done.push_back(done);
        } else {
            stats::jit().async_jobs_dropped.incr();
        }
    }
}

fn mgr() -> Option<&'static Mgr> {
    *MGR.get_or_init(|| {
        if !env_bool("EXPERIMENTAL_JIT_ASYNC", false) {
            return None;
        }

        let worker_count = crate::config::env_u32(
            "EXPERIMENTAL_JIT_ASYNC_WORKERS",
            DEFAULT_ASYNC_WORKERS,
            1,
            MAX_ASYNC_WORKERS,
        );
        let queue_cap = crate::config::env_u32(
            "EXPERIMENTAL_JIT_ASYNC_QUEUE",
            DEFAULT_ASYNC_QUEUE,
            64,
            MAX_ASYNC_QUEUE,
        ) as usize;

        let mgr: &'static Mgr = Box::leak(Box::new(Mgr {
            state: Mutex::new(MgrState {
                pending: VecDeque::new(),
                done: VecDeque::new(),
                running: true,
            }),
            pending_cv: Condvar::new(),
            queue_cap,
            worker_count,
        }));

        let mut started = 0u32;
        for i in 0..worker_count {
            let spawned = std::thread::Builder::new()
                .name(format!("jit-compile-{i}"))
                .spawn(move || worker_main(mgr));
            if spawned.is_ok() {
                started += 1;
            }
        }

        if started == 0 {
            if let Ok(mut state) = mgr.state.lock() {
                state.running = false;
            }
            return None;
        }

        Some(mgr)
    })
}

/// Whether the async pool is configured, alive, and usable for this cache:
/// async compilation is a single-hart, single-executor optimization.
pub(super) fn supported(m: &Machine, cache: &TbCache) -> bool {
    if !cache.tuning.async_enabled {
        return false;
    }
    if m.hart_count() != 1 || m.threaded_exec_active() {
        return false;
    }
    mgr().is_some()
}

/// Whether the combined queue depth is at or above `busy_pct` percent.
pub(super) fn is_busy(busy_pct: u8) -> bool {
    if busy_pct == 0 || busy_pct > 100 {
        return false;
    }
    let Some(mgr) = mgr() else {
        return false;
    };
    let state = match mgr.state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let depth = state.pending.len() + state.done.len();
    depth * 100 >= mgr.queue_cap * usize::from(busy_pct)
}

/// Whether a line's supported prefix contains helper-lowered instructions.
fn block_has_helpers(cache: &TbCache, idx: usize) -> bool {
    let line = cache.line(idx);
    if !line.valid || line.count == 0 {
        return true;
    }
    let max = if cache.tuning.max_block_insns == 0 {
        crate::tb::config::DEFAULT_MAX_BLOCK_INSNS as u8
    } else {
        cache.tuning.max_block_insns
    };

    for i in 0..line.count.min(max) {
        let d = &line.decoded[i as usize];
        if !compile::insn_supported(d) {
            break;
        }
        if matches!(d.opcode, op::LOAD | op::STORE | op::BRANCH | op::JALR | op::JAL) {
            return true;
        }
    }
    false
}

/// Reverts a queued (or stale) line to an immediate foreground compile.
pub(super) fn force_sync_compile(cache: &mut TbCache, idx: usize) {
    if !cache.line(idx).valid || cache.line(idx).count == 0 {
        return;
    }

    if pool::is_exhausted() {
        let line = cache.line_mut(idx);
        line.jit_tried = true;
        line.clear_jit(JitState::Failed);
        stats::jit().async_sync_fallbacks.incr();
        stats::jit().compile_fail_alloc.incr();
        return;
    }

    {
        let line = cache.line_mut(idx);
        line.jit_generation = stats::next_jit_generation();
        line.jit_tried = false;
        line.clear_jit(JitState::None);
    }
    stats::jit().async_sync_fallbacks.incr();
    let tuning = cache.tuning;
    let _ = compile::try_compile(
        tuning.max_block_insns,
        tuning.min_prefix_insns,
        cache.line_mut(idx),
    );
}

/// Posts a line's decoded snapshot to the compile queue.
///
/// Template fast-apply may satisfy the request immediately; backpressure
/// and the helper policy may decline it. On success the line transitions
/// to `Queued`.
pub(super) fn queue_compile(cache: &mut TbCache, idx: usize, prefetch_hint: bool) -> bool {
    if !cache.line(idx).valid
        || cache.line(idx).count == 0
        || cache.line(idx).jit_state != JitState::None
    {
        return false;
    }

    if cache.tuning.async_recycle && cache.tuning.template_fast_apply {
        let line = cache.line(idx);
        if let Some((jit_count, sig)) = compile::template_key(
            &line.decoded,
            &line.pcs,
            line.count,
            cache.tuning.max_block_insns,
            cache.tuning.min_prefix_insns,
        ) {
            if let Some(artifact) = pool::template_lookup(&line.decoded, &line.pcs, jit_count, sig)
            {
                let line = cache.line_mut(idx);
                line.jit_tried = true;
                compile::line_apply_jit(line, &artifact);
                stats::jit().async_template_applied.incr();
                return true;
            }
        }
    }

    if pool::is_exhausted() {
        let line = cache.line_mut(idx);
        line.jit_tried = true;
        line.clear_jit(JitState::Failed);
        stats::jit().compile_fail_alloc.incr();
        return false;
    }

    if cache.tuning.async_busy_pct != 0 && is_busy(cache.tuning.async_busy_pct) {
        if prefetch_hint {
            stats::jit().async_jobs_dropped.incr();
            return false;
        }
        if !cache.tuning.async_foreground_sync {
            return false;
        }
    }

    if !cache.tuning.async_allow_helpers && block_has_helpers(cache, idx) {
        let line = cache.line_mut(idx);
        line.jit_tried = true;
        line.clear_jit(JitState::Failed);
        stats::jit().compile_fail_unsupported_prefix.incr();
        return false;
    }

    let Some(mgr) = mgr() else {
        return false;
    };

    let job = {
        let line = cache.line(idx);
        Job {
            start_pc: line.start_pc,
            generation: line.jit_generation,
            portable: cache.tuning.async_recycle,
            count: line.count,
            max_block_insns: cache.tuning.max_block_insns,
            min_prefix_insns: cache.tuning.min_prefix_insns,
            pcs: line.pcs,
            decoded: line.decoded[..line.count as usize].into(),
        }
    };

    let enqueued = {
        let mut state = match mgr.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.running && state.pending.len() < mgr.queue_cap {
            state.pending.push_back(job);
            mgr.pending_cv.notify_one();
            true
        } else {
            false
        }
    };

    if !enqueued {
        stats::jit().async_jobs_dropped.incr();
        return false;
    }
    stats::jit().async_jobs_enqueued.incr();

    let line = cache.line_mut(idx);
    line.jit_tried = true;
    line.clear_jit(JitState::Queued);
    true
}

/// Classification of one drained result.
enum ApplyOutcome {
    Direct,
    Recycled,
    StaleNonportable,
    StaleNotSuccess,
    StaleLookupMiss,
    StaleStateMismatch,
    StaleSigMismatch,
}

fn try_apply(cache: &mut TbCache, done: &Done) -> ApplyOutcome {
    // Direct application: the line build this job was taken from is still
    // the one in the cache (generation stamps match) and still queued.
    if let Some(idx) = cache.find_line(done.start_pc) {
        let line = cache.line(idx);
        if line.jit_generation == done.generation && line.jit_state == JitState::Queued {
            let line = cache.line_mut(idx);
            line.jit_tried = true;
            match &done.artifact {
                Some(artifact) if done.success => compile::line_apply_jit(line, artifact),
                _ => line.clear_jit(JitState::Failed),
            }
            return ApplyOutcome::Direct;
        }
    }

    if !done.portable {
        return ApplyOutcome::StaleNonportable;
    }
    let Some(artifact) = done.artifact.as_ref().filter(|_| done.success) else {
        return ApplyOutcome::StaleNotSuccess;
    };
    if artifact.jit_count == 0 || done.prefix_sig == 0 {
        return ApplyOutcome::StaleNotSuccess;
    }

    let Some(idx) = cache.find_line(done.start_pc) else {
        return ApplyOutcome::StaleLookupMiss;
    };
    let line = cache.line(idx);
    if !line.valid || line.start_pc != done.start_pc || line.count < artifact.jit_count {
        return ApplyOutcome::StaleLookupMiss;
    }
    if line.jit_state != JitState::None && line.jit_state != JitState::Queued {
        return ApplyOutcome::StaleStateMismatch;
    }
    if pool::prefix_signature(&line.decoded, &line.pcs, artifact.jit_count) != done.prefix_sig {
        return ApplyOutcome::StaleSigMismatch;
    }

    let line = cache.line_mut(idx);
    line.jit_tried = true;
    compile::line_apply_jit(line, artifact);
    ApplyOutcome::Recycled
}

/// Drains every completed result into the cache, applying or classifying.
pub(super) fn drain(cache: &mut TbCache) {
    let Some(mgr) = mgr() else {
        return;
    };

    loop {
        let done = {
            let mut state = match mgr.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match state.done.pop_front() {
                Some(done) => done,
                None => return,
            }
        };

        let counters = stats::jit();
        match try_apply(cache, &done) {
            ApplyOutcome::Direct => {
                counters.async_results_applied.incr();
                counters.async_applied_direct.incr();
            }
            ApplyOutcome::Recycled => {
                counters.async_results_applied.incr();
                counters.async_applied_recycled.incr();
            }
            ApplyOutcome::StaleNonportable => {
                counters.async_stale_nonportable.incr();
                counters.async_results_stale.incr();
            }
            ApplyOutcome::StaleNotSuccess => {
                counters.async_stale_not_success.incr();
                counters.async_results_stale.incr();
            }
            ApplyOutcome::StaleLookupMiss => {
                counters.async_stale_lookup_miss.incr();
                counters.async_results_stale.incr();
            }
            ApplyOutcome::StaleStateMismatch => {
                counters.async_stale_state_mismatch.incr();
                counters.async_results_stale.incr();
            }
            ApplyOutcome::StaleSigMismatch => {
                counters.async_stale_sig_mismatch.incr();
                counters.async_results_stale.incr();
            }
        }
    }
}

/// Worker count the pool was brought up with (0 when disabled).
#[must_use]
pub fn worker_count() -> u32 {
    mgr().map_or(0, |mgr| mgr.worker_count)
}
