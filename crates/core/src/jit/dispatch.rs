//! JIT dispatch: hotness, compile scheduling, entry, and chain lookup.
//!
//! One dispatch attempt: resolve (or heat up) the line at the current PC,
//! drain async results on a fixed cadence, revalidate the compiled prefix
//! against guest memory when async compilation is live, then enter the
//! block under a pushed dispatch frame. The result classifies into
//! retired / handled-no-retire / no-progress for the scheduler.

use crate::hart::Hart;
use crate::jit::runtime::DispatchFrame;
use crate::jit::{async_compile, compile};
use crate::machine::Machine;
use crate::stats;
use crate::tb::cache::{JitState, TbCache};
use crate::tb::config::{ASYNC_DRAIN_INTERVAL, DEFAULT_CHAIN_MAX_INSNS};
use crate::tb::{JitFn, JitResult, JitStatus};

/// Compile threshold with the async discount/bonus applied.
fn compile_threshold(cache: &TbCache, async_compile_ok: bool) -> u32 {
    let mut threshold = u32::from(cache.tuning.hot_threshold).max(1);

    if async_compile_ok {
        let discount = u32::from(cache.tuning.async_hot_discount);
        threshold = threshold.saturating_sub(discount).max(1);
        threshold = (threshold + u32::from(cache.tuning.async_hot_bonus)).min(255);
    }
    threshold
}

/// Re-reads the compiled prefix from guest memory and compares it byte for
/// byte with the decode the artifact was built from.
fn prefix_matches_guest(m: &Machine, cpu: &mut Hart, cache: &TbCache, idx: usize) -> bool {
    let line = cache.line(idx);
    if !line.jit_valid || line.jit_count == 0 || line.jit_count > line.count {
        return false;
    }

    for i in 0..line.jit_count as usize {
        let len = if line.decoded[i].insn_len == 2 { 2 } else { 4 };
        let Some(raw) = crate::mmu::virt_read(
            m,
            cpu,
            line.pcs[i],
            len,
            crate::common::MemAccess::Fetch,
        ) else {
            return false;
        };
        let line = cache.line(idx);
        if len == 2 {
            if line.decoded[i].raw & 0xffff != raw & 0xffff {
                return false;
            }
        } else if line.decoded[i].raw != raw {
            return false;
        }
    }
    true
}

/// Static successors of a line's tail: fall-through and/or branch target.
fn static_successors(cache: &TbCache, idx: usize) -> ([u32; 2], u8) {
    let line = cache.line(idx);
    let mut out = [0u32; 2];
    let mut count = 0u8;
    if !line.valid || line.count == 0 {
        return (out, count);
    }

    let tail = &line.decoded[line.count as usize - 1];
    let tail_pc = line.pcs[line.count as usize - 1];
    let step = u32::from(tail.insn_len);

    match tail.opcode {
        crate::isa::opcodes::op::BRANCH => {
            let fallthrough = tail_pc.wrapping_add(step);
            let target = tail_pc.wrapping_add(tail.imm_b as u32);
            out[count as usize] = fallthrough;
            count += 1;
            if target != fallthrough {
                out[count as usize] = target;
                count += 1;
            }
        }
        crate::isa::opcodes::op::JAL => {
            out[count as usize] = tail_pc.wrapping_add(tail.imm_j as u32);
            count += 1;
        }
        // jalr: dynamic target; system: trap/return side effects. Skip both.
        crate::isa::opcodes::op::JALR | crate::isa::opcodes::op::SYSTEM => {}
        _ => {
            out[count as usize] = tail_pc.wrapping_add(step);
            count += 1;
        }
    }

    (out, count)
}

/// Speculatively queues compilation of a hot block's static successors.
///
/// Probes every other hit to keep the prefetch overhead bounded.
fn prefetch_successors(m: &Machine, cpu: &mut Hart, cache: &mut TbCache, idx: usize) {
    if !cache.tuning.async_prefetch || !cache.line(idx).jit_ready() {
        return;
    }

    if cache.line(idx).jit_async_prefetched {
        cache.line_mut(idx).jit_async_prefetched = false;
        return;
    }
    cache.line_mut(idx).jit_async_prefetched = true;

    let (successors, succ_count) = static_successors(cache, idx);
    let threshold = compile_threshold(cache, !cache.tuning.async_foreground_sync);

    for &target in &successors[..succ_count as usize] {
        if target & 1 != 0 {
            continue;
        }
        let next_idx = cache.lookup_or_build(m, cpu, target);
        let next = cache.line(next_idx);
        if !next.valid
            || next.start_pc != target
            || next.jit_ready()
            || next.jit_state != JitState::None
        {
            continue;
        }

        if cache.line(next_idx).hotness < 255 {
            cache.line_mut(next_idx).hotness += 1;
        }
        if u32::from(cache.line(next_idx).hotness) < threshold {
            continue;
        }

        let _ = async_compile::queue_compile(cache, next_idx, true);
    }
}

/// Resolves a ready compiled line at `pc`, heating, compiling, or waiting
/// as the line's state machine dictates.
fn get_ready_jit_line(
    m: &Machine,
    cpu: &mut Hart,
    cache: &mut TbCache,
    pc: u32,
    budget: u64,
) -> Option<usize> {
    if budget == 0 {
        return None;
    }

    let async_ok = !cache.tuning.async_foreground_sync && async_compile::supported(m, cache);
    if async_ok {
        if cache.async_drain_ticks + 1 >= ASYNC_DRAIN_INTERVAL {
            cache.async_drain_ticks = 0;
            async_compile::drain(cache);
        } else {
            cache.async_drain_ticks += 1;
        }
    }

    let idx = cache.lookup_or_build(m, cpu, pc);
    if cache.line(idx).start_pc != pc {
        return None;
    }

    if !cache.line(idx).jit_ready() && cache.line(idx).jit_state == JitState::None {
        if cache.line(idx).hotness < 255 {
            cache.line_mut(idx).hotness += 1;
        }

        let threshold = compile_threshold(cache, async_ok);
        if u32::from(cache.line(idx).hotness) >= threshold {
            if async_ok {
                if !async_compile::queue_compile(cache, idx, false)
                    && cache.line(idx).jit_state == JitState::None
                    && !crate::jit::pool::is_exhausted()
                {
                    async_compile::force_sync_compile(cache, idx);
                }
            } else {
                let tuning = cache.tuning;
                let _ = compile::try_compile(
                    tuning.max_block_insns,
                    tuning.min_prefix_insns,
                    cache.line_mut(idx),
                );
            }
        }
    }

    if async_ok && cache.line(idx).jit_state == JitState::Queued {
        cache.async_drain_ticks = 0;
        async_compile::drain(cache);
        if cache.line(idx).jit_state == JitState::Queued
            && cache.tuning.sync_fallback_spins != 0
        {
            if cache.line(idx).jit_async_wait < 255 {
                cache.line_mut(idx).jit_async_wait += 1;
            }
            let wait = cache.line(idx).jit_async_wait;
            let busy = cache.tuning.async_busy_pct != 0
                && wait != 0
                && async_compile::is_busy(cache.tuning.async_busy_pct);
            if busy || wait >= cache.tuning.sync_fallback_spins {
                async_compile::force_sync_compile(cache, idx);
            }
        }
    }

    if !cache.line(idx).jit_ready() {
        return None;
    }

    if async_ok && !prefix_matches_guest(m, cpu, cache, idx) {
        // Guest code changed under a live artifact: drop the line entirely.
        let line = cache.line_mut(idx);
        line.valid = false;
        line.hotness = 0;
        line.jit_tried = false;
        line.jit_generation = stats::next_jit_generation();
        line.clear_jit(JitState::None);
        stats::jit().async_results_stale_guest.incr();
        return None;
    }
    if async_ok {
        prefetch_successors(m, cpu, cache, idx);
    }

    if u64::from(cache.line(idx).jit_count) > budget {
        return None;
    }
    Some(idx)
}

/// Chain lookup used by the block epilogue: the one-entry chain cache
/// first, then the full resolve path (which records a fresh chain entry).
pub(super) fn chain_lookup(
    m: &Machine,
    cpu: &mut Hart,
    cache: &mut TbCache,
    from_idx: usize,
    next_pc: u32,
    budget: u64,
) -> Option<JitFn> {
    if budget == 0 {
        return None;
    }

    // Cached chain: still pointing at a live line with the same entry?
    let from = cache.line(from_idx);
    if from.chain_valid && from.chain_pc == next_pc {
        if let (Some(chain_fn), Some(next_idx)) = (from.chain_fn, cache.find_line(next_pc)) {
            let next = cache.line(next_idx);
            if next.jit_ready()
                && next.jit_fn.map(|f| f as usize) == Some(chain_fn as usize)
                && u64::from(next.jit_count) <= budget
            {
                stats::jit().chain_hits.incr();
                return Some(chain_fn);
            }
        }
        // The successor was evicted or rebuilt; invalidate the cached link.
        let from = cache.line_mut(from_idx);
        from.chain_valid = false;
        from.chain_pc = 0;
        from.chain_fn = None;
    }

    stats::jit().chain_misses.incr();
    let next_idx = get_ready_jit_line(m, cpu, cache, next_pc, budget)?;
    let next_fn = cache.line(next_idx).jit_fn?;

    let from = cache.line_mut(from_idx);
    from.chain_valid = true;
    from.chain_pc = next_pc;
    from.chain_fn = Some(next_fn);
    Some(next_fn)
}

/// One JIT dispatch attempt at the hart's current PC.
pub fn exec_tb_jit(m: &Machine, cpu: &mut Hart, cache: &mut TbCache, budget: u64) -> JitResult {
    let mut result = JitResult::no_progress();
    if budget == 0 {
        return result;
    }

    stats::jit().dispatch_calls.incr();

    let chain_cap = if cache.tuning.chain_max_insns == 0 {
        DEFAULT_CHAIN_MAX_INSNS
    } else {
        cache.tuning.chain_max_insns
    };
    let mut local_budget = budget;
    if local_budget > u64::from(chain_cap) {
        local_budget = u64::from(chain_cap);
        stats::jit().dispatch_budget_clamped.incr();
    }

    let pc = cpu.pc;
    let Some(idx) = get_ready_jit_line(m, cpu, cache, pc, local_budget) else {
        stats::jit().dispatch_no_ready.incr();
        return result;
    };
    let Some(jit_fn) = cache.line(idx).jit_fn else {
        stats::jit().dispatch_no_ready.incr();
        return result;
    };

    let shared = m.shared(cpu.hartid);
    let frame = DispatchFrame::push(cache, local_budget);
    // SAFETY: the artifact was emitted for exactly this (machine, hart) ABI;
    // the dispatch frame is live for the whole native execution, and `cache`
    // is not touched from Rust until the block returns.
    let retired = unsafe { jit_fn(std::ptr::from_ref(m), std::ptr::from_mut(cpu)) };
    let handled = frame.handled();
    drop(frame);

    let running_now = shared.is_running();
    let pc_changed = cpu.pc != pc;
    cache.active = false;

    if retired <= 0 {
        // Avoid spinning forever on handled-no-retire when the PC did not
        // move; the caller falls back to the interpreter for progress.
        if pc_changed || !running_now {
            result.status = JitStatus::HandledNoRetire;
            stats::jit().dispatch_handled_no_retire.incr();
        } else {
            tracing::trace!(handled, pc = format_args!("{pc:#010x}"), "jit dispatch made no progress");
            stats::jit().dispatch_noprogress.incr();
        }
        return result;
    }

    let mut retired = retired as u64;
    if retired > local_budget {
        retired = local_budget;
    }

    result.status = JitStatus::Retired;
    result.retired = retired as u32;
    stats::jit().dispatch_retired_calls.incr();
    stats::jit().dispatch_retired_insns.add(retired);
    result
}
