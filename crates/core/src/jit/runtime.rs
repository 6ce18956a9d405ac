//! Helper surface of the generated code.
//!
//! Generated blocks escape to the interpreter through a small set of
//! `extern "C"` helpers that observe the thread-local dispatch frame:
//! `{cache, budget, cumulative retired, handled}` pushed at dispatch entry
//! and popped on exit. A helper may raise a guest fault (retiring the
//! already-completed prefix and reporting "handled"), redirect control
//! (committing and letting the block exit), or succeed quietly.

use std::cell::Cell;

use crate::common::Trap;
use crate::exec::{decode_at_pc, load_value, store_value};
use crate::hart::Hart;
use crate::isa::Decoded;
use crate::isa::opcodes::{funct3, op};
use crate::machine::Machine;
use crate::soc::step_timer_many;
use crate::stats;
use crate::tb::cache::TbCache;
use crate::trap::{check_pending_interrupt, raise_exception};

thread_local! {
    static TLS_CACHE: Cell<*mut TbCache> = const { Cell::new(std::ptr::null_mut()) };
    static TLS_BUDGET: Cell<u64> = const { Cell::new(0) };
    static TLS_TOTAL: Cell<u64> = const { Cell::new(0) };
    static TLS_HANDLED: Cell<bool> = const { Cell::new(false) };
}

/// Sentinel returned by a helper that consumed an event without any guest
/// retirement in this dispatch.
const NO_RETIRE: u32 = u32::MAX;

/// The thread-local dispatch frame, pushed around every block entry.
pub struct DispatchFrame;

impl DispatchFrame {
    /// Pushes the frame for one dispatch: the cache the block chains
    /// through and the retire budget it may consume.
    pub fn push(cache: &mut TbCache, budget: u64) -> Self {
        TLS_CACHE.with(|c| c.set(std::ptr::from_mut(cache)));
        TLS_BUDGET.with(|c| c.set(budget));
        TLS_TOTAL.with(|c| c.set(0));
        TLS_HANDLED.with(|c| c.set(false));
        Self
    }

    /// Whether a helper reported a handled event.
    #[must_use]
    pub fn handled(&self) -> bool {
        TLS_HANDLED.with(Cell::get)
    }
}

impl Drop for DispatchFrame {
    fn drop(&mut self) {
        TLS_CACHE.with(|c| c.set(std::ptr::null_mut()));
        TLS_BUDGET.with(|c| c.set(0));
        TLS_TOTAL.with(|c| c.set(0));
        TLS_HANDLED.with(|c| c.set(false));
    }
}

fn set_handled() {
    TLS_HANDLED.with(|c| c.set(true));
}

fn tls_cache<'a>() -> Option<&'a mut TbCache> {
    let ptr = TLS_CACHE.with(Cell::get);
    // SAFETY: the pointer was installed by `DispatchFrame::push` on this
    // thread and stays valid until the frame drops; generated code only
    // runs inside a frame.
    unsafe { ptr.as_mut() }
}

/// Result helper: the cumulative retired count, or the no-retire sentinel.
fn result_or_no_retire() -> u32 {
    let total = TLS_TOTAL.with(Cell::get);
    if total == 0 { NO_RETIRE } else { total as u32 }
}

fn credit_retired(m: &Machine, cpu: &mut Hart, retired: u32) {
    cpu.x[0] = 0;
    cpu.cycle += u64::from(retired);
    cpu.instret += u64::from(retired);
    step_timer_many(m, u64::from(retired));

    TLS_TOTAL.with(|c| c.set(c.get() + u64::from(retired)));
    TLS_BUDGET.with(|c| c.set(c.get().saturating_sub(u64::from(retired))));
}

/// Retires the already-completed prefix of a block that is about to divert
/// to a trap handler.
fn retire_prefix(m: &Machine, cpu: &mut Hart, retired: u32) {
    if retired != 0 {
        credit_retired(m, cpu, retired);
    }
}

/// Entry pre-check keeping blocks interrupt-safe even when an IRQ appears
/// between scheduler polling and native block entry.
///
/// Returns 0 to continue into the block, -1 when the event was handled and
/// the block must return without crediting guest retires.
pub(super) unsafe extern "C" fn pre_dispatch(m: *const Machine, cpu: *mut Hart) -> i32 {
    // SAFETY: generated code passes the dispatch arguments through
    // unchanged; both outlive the dispatch.
    let (m, cpu) = unsafe { (&*m, &mut *cpu) };

    if !m.shared(cpu.hartid).is_running() {
        set_handled();
        return -1;
    }
    if check_pending_interrupt(m, cpu) {
        set_handled();
        return -1;
    }
    if !m.shared(cpu.hartid).is_running() {
        set_handled();
        return -1;
    }
    0
}

/// Commits a block's trailing state: final PC, retire counters, timer.
///
/// Returns the cumulative retired count for this dispatch.
pub(super) unsafe extern "C" fn block_commit(
    m: *const Machine,
    cpu: *mut Hart,
    next_pc: u32,
    retired: u32,
) -> i32 {
    if retired == 0 {
        return 0;
    }
    // SAFETY: as in `pre_dispatch`.
    let (m, cpu) = unsafe { (&*m, &mut *cpu) };

    cpu.pc = next_pc;
    credit_retired(m, cpu, retired);
    TLS_TOTAL.with(Cell::get) as i32
}

/// The decoded record a helper should execute: the compiled operand, or a
/// fresh decode of guest memory when the redecode knob is set.
fn effective_decoded(
    m: &Machine,
    cpu: &mut Hart,
    d: &Decoded,
    insn_pc: u32,
    retired_prefix: u32,
) -> Option<Decoded> {
    let redecode = tls_cache()
        .map(|cache| cache.tuning.async_enabled && cache.tuning.async_redecode_helpers)
        .unwrap_or(false);
    if !redecode {
        return Some(*d);
    }
    if let Some(fresh) = decode_at_pc(m, cpu, insn_pc) {
        return Some(fresh);
    }
    retire_prefix(m, cpu, retired_prefix);
    set_handled();
    None
}

/// Memory helper: executes one lowered load or store.
///
/// Returns 0 on success (the block continues) or the cumulative-retired /
/// no-retire result after a fault (the block returns).
pub(super) unsafe extern "C" fn exec_mem(
    m: *const Machine,
    cpu: *mut Hart,
    d: *const Decoded,
    insn_pc: u32,
    retired_prefix: u32,
) -> u32 {
    stats::jit().helper_mem_calls.incr();
    // SAFETY: `d` points into the pool snapshot arena, which outlives every
    // artifact; `m`/`cpu` as in `pre_dispatch`.
    let (m, cpu, d) = unsafe { (&*m, &mut *cpu, &*d) };

    let Some(d) = effective_decoded(m, cpu, d, insn_pc, retired_prefix) else {
        return result_or_no_retire();
    };

    cpu.pc = insn_pc;
    let rs1v = cpu.x[d.rs1];
    let rs2v = cpu.x[d.rs2];

    match d.opcode {
        op::LOAD => {
            let addr = rs1v.wrapping_add(d.imm_i as u32);
            if let Some(value) = load_value(m, cpu, addr, d.funct3) {
                cpu.write_x(d.rd, value);
                return 0;
            }
        }
        op::STORE => {
            let addr = rs1v.wrapping_add(d.imm_s as u32);
            if store_value(m, cpu, addr, d.funct3, rs2v) {
                return 0;
            }
        }
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
        }
    }

    retire_prefix(m, cpu, retired_prefix);
    set_handled();
    result_or_no_retire()
}

/// Control-flow helper: executes the lowered jump or branch terminating a
/// block and commits the whole prefix (including this instruction).
///
/// Returns the cumulative retired count, or the no-retire result after a
/// fault.
pub(super) unsafe extern "C" fn exec_cf(
    m: *const Machine,
    cpu: *mut Hart,
    d: *const Decoded,
    insn_pc: u32,
    retired_prefix: u32,
) -> u32 {
    stats::jit().helper_cf_calls.incr();
    // SAFETY: as in `exec_mem`.
    let (m, cpu, d) = unsafe { (&*m, &mut *cpu, &*d) };

    let Some(d) = effective_decoded(m, cpu, d, insn_pc, retired_prefix) else {
        return result_or_no_retire();
    };

    cpu.pc = insn_pc;
    let step = u32::from(d.insn_len);
    let mut next_pc = insn_pc.wrapping_add(step);
    let ret_pc = next_pc;
    let rs1v = cpu.x[d.rs1];
    let rs2v = cpu.x[d.rs2];

    match d.opcode {
        op::JAL => {
            cpu.write_x(d.rd, ret_pc);
            next_pc = insn_pc.wrapping_add(d.imm_j as u32);
        }
        op::JALR => {
            if d.funct3 != 0 {
                raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                retire_prefix(m, cpu, retired_prefix);
                set_handled();
                return result_or_no_retire();
            }
            next_pc = rs1v.wrapping_add(d.imm_i as u32) & !1;
            cpu.write_x(d.rd, ret_pc);
        }
        op::BRANCH => {
            let taken = match d.funct3 {
                funct3::BEQ => rs1v == rs2v,
                funct3::BNE => rs1v != rs2v,
                funct3::BLT => (rs1v as i32) < (rs2v as i32),
                funct3::BGE => (rs1v as i32) >= (rs2v as i32),
                funct3::BLTU => rs1v < rs2v,
                funct3::BGEU => rs1v >= rs2v,
                _ => {
                    raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                    retire_prefix(m, cpu, retired_prefix);
                    set_handled();
                    return result_or_no_retire();
                }
            };
            if taken {
                next_pc = insn_pc.wrapping_add(d.imm_b as u32);
            }
        }
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            retire_prefix(m, cpu, retired_prefix);
            set_handled();
            return result_or_no_retire();
        }
    }

    // SAFETY: same pointers the caller handed us, still valid.
    unsafe {
        block_commit(
            std::ptr::from_ref(m),
            std::ptr::from_mut(cpu),
            next_pc,
            retired_prefix + 1,
        ) as u32
    }
}

/// Chain epilogue: returns the next block's entry point, or null.
///
/// Consulted after a block commits its trailing instruction. Polls for
/// interrupts and the running flag first; a consumed event reports
/// "handled" and breaks the chain.
pub(super) unsafe extern "C" fn chain_next_pc(
    m: *const Machine,
    cpu: *mut Hart,
    from_pc: u32,
) -> *const () {
    // SAFETY: as in `pre_dispatch`.
    let (m, cpu) = unsafe { (&*m, &mut *cpu) };
    let Some(cache) = tls_cache() else {
        return std::ptr::null();
    };
    let budget = TLS_BUDGET.with(Cell::get);
    if from_pc == 0 || budget == 0 {
        return std::ptr::null();
    }

    if !m.shared(cpu.hartid).is_running() {
        return std::ptr::null();
    }
    if check_pending_interrupt(m, cpu) {
        set_handled();
        return std::ptr::null();
    }
    if !m.shared(cpu.hartid).is_running() {
        return std::ptr::null();
    }

    let from_idx = cache.lookup_or_build(m, cpu, from_pc);
    if cache.line(from_idx).start_pc != from_pc || !cache.line(from_idx).jit_ready() {
        return std::ptr::null();
    }

    let next_pc = cpu.pc;
    if let Some(next_fn) = super::dispatch::chain_lookup(m, cpu, cache, from_idx, next_pc, budget)
    {
        return next_fn as *const ();
    }
    std::ptr::null()
}

/// Raw helper addresses the emitter embeds into generated code.
pub(super) mod addr {
    use super::{block_commit, chain_next_pc, exec_cf, exec_mem, pre_dispatch};

    /// Address of the pre-dispatch check.
    pub(crate) fn pre_dispatch_addr() -> u64 {
        pre_dispatch as usize as u64
    }

    /// Address of the block-commit helper.
    pub(crate) fn block_commit_addr() -> u64 {
        block_commit as usize as u64
    }

    /// Address of the memory helper.
    pub(crate) fn exec_mem_addr() -> u64 {
        exec_mem as usize as u64
    }

    /// Address of the control-flow helper.
    pub(crate) fn exec_cf_addr() -> u64 {
        exec_cf as usize as u64
    }

    /// Address of the chain-lookup helper.
    pub(crate) fn chain_next_pc_addr() -> u64 {
        chain_next_pc as usize as u64
    }
}
