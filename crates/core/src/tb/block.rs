//! Block execution over cached translation lines.
//!
//! The block executor replays decoded instructions through the interpreter
//! in line order, carrying an active-line cursor so consecutive calls resume
//! mid-line. A trap aborts the replay and the partial retired count is
//! returned, so the scheduler credits exactly the work that committed.

use crate::exec::exec_decoded;
use crate::hart::Hart;
use crate::machine::Machine;
use crate::tb::cache::TbCache;
use crate::trap::check_pending_interrupt;

/// Outcome of a block-execution attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    /// Nothing retired and nothing consumed; the caller should fall back.
    NoProgress,
    /// At least one instruction retired.
    Retired,
    /// An event (interrupt, stop, trap) was consumed without retirement.
    HandledNoRetire,
}

/// Result of a block-execution attempt.
#[derive(Clone, Copy, Debug)]
pub struct BlockResult {
    /// Outcome classification.
    pub status: BlockStatus,
    /// Instructions retired (partial counts included).
    pub retired: u32,
}

impl BlockResult {
    fn no_progress() -> Self {
        Self {
            status: BlockStatus::NoProgress,
            retired: 0,
        }
    }
}

/// Replays cached lines through the interpreter for up to `budget` retires.
///
/// Interrupts are polled between instructions; taking one (or trapping
/// mid-line) ends the replay with the partial count. Falling off the end of
/// a line continues into the successor line when it is cached.
pub fn exec_tb_block(m: &Machine, cpu: &mut Hart, cache: &mut TbCache, budget: u64) -> BlockResult {
    let mut result = BlockResult::no_progress();
    if budget == 0 {
        return result;
    }

    let shared = m.shared(cpu.hartid);
    let first_pc = cpu.pc;

    while u64::from(result.retired) < budget {
        if !shared.is_running() {
            result.status = if result.retired == 0 {
                BlockStatus::HandledNoRetire
            } else {
                BlockStatus::Retired
            };
            return result;
        }

        if check_pending_interrupt(m, cpu) {
            if result.retired == 0 && (cpu.pc != first_pc || !shared.is_running()) {
                result.status = BlockStatus::HandledNoRetire;
            } else if result.retired != 0 {
                result.status = BlockStatus::Retired;
            }
            return result;
        }

        let pc = cpu.pc;
        let mut index = 0u8;
        let mut line_idx = None;

        if cache.active {
            let active_idx = cache.lookup_or_build(m, cpu, cache.active_start_pc);
            let active = cache.line(active_idx);
            if cache.active_index < active.count
                && active.pcs[cache.active_index as usize] == pc
            {
                line_idx = Some(active_idx);
                index = cache.active_index;
            } else {
                cache.active = false;
            }
        }

        let line_idx = match line_idx {
            Some(idx) => idx,
            None => {
                let idx = cache.lookup_or_build(m, cpu, pc);
                let line = cache.line(idx);
                if line.count == 0 || line.pcs[0] != pc {
                    cache.active = false;
                    if result.retired != 0 {
                        result.status = BlockStatus::Retired;
                    }
                    return result;
                }
                let start_pc = line.start_pc;
                cache.active = true;
                cache.active_start_pc = start_pc;
                cache.active_index = 0;
                index = 0;
                idx
            }
        };

        while index < cache.line(line_idx).count && u64::from(result.retired) < budget {
            let line = cache.line(line_idx);
            if cpu.pc != line.pcs[index as usize] {
                cache.active = false;
                if result.retired != 0 {
                    result.status = BlockStatus::Retired;
                }
                return result;
            }

            let decoded = line.decoded[index as usize];
            if !exec_decoded(m, cpu, &decoded) {
                cache.active = false;
                if result.retired != 0 {
                    result.status = BlockStatus::Retired;
                } else if cpu.pc != first_pc || !shared.is_running() {
                    result.status = BlockStatus::HandledNoRetire;
                }
                return result;
            }
            result.retired += 1;

            let line = cache.line(line_idx);
            if index + 1 < line.count && cpu.pc == line.pcs[index as usize + 1] {
                let start_pc = line.start_pc;
                cache.active = true;
                cache.active_start_pc = start_pc;
                cache.active_index = index + 1;
                index += 1;
                continue;
            }

            cache.active = false;
            break;
        }
    }

    if result.retired != 0 {
        result.status = BlockStatus::Retired;
    }
    result
}

/// Executes exactly one instruction through the cached-line path.
///
/// Returns whether an instruction retired; a trap (or an unbuildable line)
/// returns `false` with the trap already dispatched.
pub fn exec_one_tb(m: &Machine, cpu: &mut Hart, cache: &mut TbCache) -> bool {
    let pc = cpu.pc;
    let mut index = 0u8;
    let mut line_idx = None;

    if cache.active {
        let active_idx = cache.lookup_or_build(m, cpu, cache.active_start_pc);
        let active = cache.line(active_idx);
        if cache.active_index < active.count && active.pcs[cache.active_index as usize] == pc {
            line_idx = Some(active_idx);
            index = cache.active_index;
        } else {
            cache.active = false;
        }
    }

    let line_idx = match line_idx {
        Some(idx) => idx,
        None => {
            let idx = cache.lookup_or_build(m, cpu, pc);
            let line = cache.line(idx);
            if line.count == 0 || line.pcs[0] != pc {
                cache.active = false;
                return false;
            }
            let start_pc = line.start_pc;
            cache.active = true;
            cache.active_start_pc = start_pc;
            cache.active_index = 0;
            index = 0;
            idx
        }
    };

    let decoded = cache.line(line_idx).decoded[index as usize];
    if !exec_decoded(m, cpu, &decoded) {
        cache.active = false;
        return false;
    }

    let line = cache.line(line_idx);
    if index + 1 < line.count && cpu.pc == line.pcs[index as usize + 1] {
        let start_pc = line.start_pc;
        cache.active = true;
        cache.active_start_pc = start_pc;
        cache.active_index = index + 1;
    } else {
        cache.active = false;
    }

    true
}
