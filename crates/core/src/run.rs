//! Execution scheduling: single-thread round-robin and per-hart threads.
//!
//! Both schedulers share the same per-quantum decision: poll interrupts,
//! try the JIT (when enabled and allowed), then the block interpreter, then
//! a single-step interpreter burst, crediting whatever retired. A
//! no-progress guard watches JIT dispatches that consume events without
//! retiring and forces interpreter steps (plus a cooldown on further JIT
//! entry) so forward progress is guaranteed.
//!
//! Every layer respects the outer instruction budget; the run returns the
//! total retired including partial progress.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::common::PrivilegeMode;
use crate::common::constants::{DEFAULT_MAX_INSTRUCTIONS, MAX_HARTS};
use crate::config::env_bool;
use crate::exec::exec_interp_burst;
use crate::exec::exec_one;
use crate::hart::Hart;
use crate::jit::exec_tb_jit;
use crate::machine::Machine;
use crate::tb::block::{BlockStatus, exec_tb_block};
use crate::tb::cache::TbCache;
use crate::tb::JitStatus;
use crate::trap::check_pending_interrupt;

/// Instructions per hart scheduling quantum (single-thread mode).
const HART_SLICE_INSTR: u64 = 64;
/// Worker retires between global-counter commits (threaded mode).
const WORKER_COMMIT_BATCH: u64 = 256;
/// Handled-no-retire streak that forces an interpreter step.
const JIT_NO_RETIRE_FALLBACK_THRESHOLD: u32 = 64;
/// Quanta of JIT-entry cooldown after a no-progress dispatch.
const JIT_NOPROGRESS_COOLDOWN: u32 = 1024;

/// Execution-path selection parsed from the knob surface.
#[derive(Clone, Copy, Debug)]
pub struct RunConfig {
    /// Enable the block-interpreter path.
    pub use_tb: bool,
    /// Enable the code-generation path.
    pub use_jit: bool,
    /// Keep M-mode execution in the interpreter.
    pub jit_skip_mmode: bool,
    /// Enable the no-progress guard and cooldown.
    pub jit_guard: bool,
    /// Opt into one OS thread per hart.
    pub hart_threads: bool,
}

impl RunConfig {
    /// Parses the knob surface.
    ///
    /// The JIT defaults are safety-first: when the JIT is enabled, M-mode
    /// stays in the interpreter and the no-progress guard is on unless
    /// overridden explicitly.
    #[must_use]
    pub fn from_env() -> Self {
        let use_jit = env_bool("EXPERIMENTAL_JIT", false);
        Self {
            use_tb: env_bool("EXPERIMENTAL_TB", false),
            use_jit,
            jit_skip_mmode: env_bool("EXPERIMENTAL_JIT_SKIP_MMODE", use_jit),
            jit_guard: env_bool("EXPERIMENTAL_JIT_GUARD", use_jit),
            hart_threads: env_bool("EXPERIMENTAL_HART_THREADS", false),
        }
    }
}

/// Per-hart guard state for the JIT no-progress watchdog.
#[derive(Clone, Copy, Default)]
struct GuardState {
    no_retire_streak: u32,
    cooldown: u32,
}

/// One scheduling decision for a hart: JIT, block, or interpreter.
///
/// Returns the retired count; `handled` reports an event consumed without
/// retirement so the caller advances the quantum without crediting work.
fn run_quantum(
    m: &Machine,
    cpu: &mut Hart,
    cache: &mut TbCache,
    cfg: &RunConfig,
    guard: &mut GuardState,
    budget: u64,
    tb_budget: u64,
) -> (u32, bool) {
    let shared = m.shared(cpu.hartid);
    let mut steps = 0u32;
    let mut handled = false;

    let jit_allowed =
        cfg.use_jit && (!cfg.jit_skip_mmode || cpu.priv_mode != PrivilegeMode::Machine);
    if cfg.jit_guard && jit_allowed && guard.cooldown != 0 {
        guard.cooldown -= 1;
    }

    if jit_allowed && (!cfg.jit_guard || guard.cooldown == 0) {
        let entry_pc = cpu.pc;
        let jit_result = exec_tb_jit(m, cpu, cache, budget);
        match jit_result.status {
            JitStatus::Retired if jit_result.retired > 0 => {
                steps = jit_result.retired;
                if cfg.jit_guard {
                    guard.no_retire_streak = 0;
                    guard.cooldown = 0;
                }
            }
            JitStatus::HandledNoRetire => {
                if cfg.jit_guard {
                    if cpu.pc == entry_pc {
                        guard.no_retire_streak = guard.no_retire_streak.saturating_add(1);
                    } else {
                        guard.no_retire_streak = 1;
                    }
                    if guard.no_retire_streak >= JIT_NO_RETIRE_FALLBACK_THRESHOLD
                        && shared.is_running()
                        && exec_one(m, cpu)
                    {
                        steps = 1;
                        guard.no_retire_streak = 0;
                    } else {
                        handled = true;
                    }
                    if guard.cooldown < JIT_NOPROGRESS_COOLDOWN {
                        guard.cooldown += 1;
                    }
                } else {
                    handled = true;
                }
            }
            _ => {
                if cfg.jit_guard {
                    guard.no_retire_streak = 0;
                    guard.cooldown = JIT_NOPROGRESS_COOLDOWN;
                }
            }
        }
    }

    if steps == 0 && !handled {
        if cfg.use_tb {
            let tb_result = exec_tb_block(m, cpu, cache, tb_budget);
            match tb_result.status {
                BlockStatus::Retired if tb_result.retired > 0 => steps = tb_result.retired,
                BlockStatus::HandledNoRetire => handled = true,
                _ => {
                    if shared.is_running() {
                        steps = exec_interp_burst(m, cpu, tb_budget);
                    }
                }
            }
        } else if exec_one(m, cpu) {
            steps = 1;
        }
    }

    (steps, handled)
}

fn run_single_thread(m: &Machine, max_instructions: u64, cfg: &RunConfig) -> u64 {
    let mut executed = 0u64;
    let mut next_hart = 0u32;
    let hart_count = m.hart_count();

    let mut caches: Vec<TbCache> = (0..hart_count).map(|_| TbCache::from_env()).collect();
    let mut guards = [GuardState::default(); MAX_HARTS];

    while executed < max_instructions {
        let mut progressed = false;

        for checked in 0..hart_count {
            let hartid = (next_hart + checked) % hart_count;
            let shared = m.shared(hartid);

            // SAFETY: the single-threaded scheduler is the only executor of
            // every hart; no other reference to this hart exists.
            let cpu = unsafe { m.hart_for_executor(hartid) };

            if !shared.is_running() && !m.apply_start_request(hartid, cpu) {
                continue;
            }

            progressed = true;
            let cache = &mut caches[hartid as usize];
            let guard = &mut guards[hartid as usize];

            let mut slice = 0u64;
            while slice < HART_SLICE_INSTR && executed < max_instructions && shared.is_running() {
                if check_pending_interrupt(m, cpu) {
                    if !shared.is_running() {
                        break;
                    }
                    slice += 1;
                    continue;
                }

                let budget = max_instructions - executed;
                let tb_budget = budget.min(HART_SLICE_INSTR - slice);

                let (steps, handled) = run_quantum(m, cpu, cache, cfg, guard, budget, tb_budget);

                if steps != 0 {
                    executed += u64::from(steps);
                    slice = (slice + u64::from(steps)).min(HART_SLICE_INSTR);
                    continue;
                }
                if handled {
                    slice += 1;
                    continue;
                }
                if !shared.is_running() {
                    break;
                }
                slice += 1;
            }

            next_hart = (hartid + 1) % hart_count;
            break;
        }

        if !progressed {
            break;
        }
    }

    executed
}

/// Shared stop/progress state of the threaded run.
struct ThreadState {
    executed: AtomicU64,
    stop: AtomicBool,
}

impl ThreadState {
    fn commit(&self, local: &mut u64, max_instructions: u64) -> bool {
        if *local == 0 {
            return false;
        }
        let now = self.executed.fetch_add(*local, Ordering::Relaxed) + *local;
        *local = 0;
        if now >= max_instructions {
            self.stop.store(true, Ordering::Release);
            return true;
        }
        false
    }
}

fn run_worker(
    m: &Machine,
    state: &ThreadState,
    hartid: u32,
    max_instructions: u64,
    cfg: &RunConfig,
) {
    // SAFETY: each worker thread is the sole executor of its hart for the
    // lifetime of the threaded run; the spawning scope joins every worker
    // before `run` returns.
    let cpu = unsafe { m.hart_for_executor(hartid) };
    let shared = m.shared(hartid);

    let mut cache = TbCache::from_env();
    let mut guard = GuardState::default();
    let mut local_executed = 0u64;

    loop {
        if state.stop.load(Ordering::Acquire) {
            break;
        }
        let global = state.executed.load(Ordering::Relaxed);
        if global + local_executed >= max_instructions {
            state.stop.store(true, Ordering::Release);
            break;
        }

        if !shared.is_running() {
            if m.apply_start_request(hartid, cpu) {
                continue;
            }
            let _ = state.commit(&mut local_executed, max_instructions);
            if m.any_hart_running() {
                std::thread::yield_now();
                continue;
            }
            state.stop.store(true, Ordering::Release);
            break;
        }

        if check_pending_interrupt(m, cpu) {
            if !shared.is_running() && !m.any_hart_running() {
                state.stop.store(true, Ordering::Release);
            }
            continue;
        }

        let budget = max_instructions - (global + local_executed);
        let (steps, _handled) = run_quantum(m, cpu, &mut cache, cfg, &mut guard, budget, budget);

        if steps != 0 {
            local_executed += u64::from(steps);
            if local_executed >= WORKER_COMMIT_BATCH {
                let _ = state.commit(&mut local_executed, max_instructions);
            }
            continue;
        }

        if !shared.is_running() && !m.any_hart_running() {
            state.stop.store(true, Ordering::Release);
        }
    }

    let _ = state.commit(&mut local_executed, max_instructions);
}

fn run_threaded(m: &Machine, max_instructions: u64, cfg: &RunConfig) -> u64 {
    let state = ThreadState {
        executed: AtomicU64::new(0),
        stop: AtomicBool::new(false),
    };

    m.set_threaded_exec(true);
    std::thread::scope(|scope| {
        for hartid in 0..m.hart_count() {
            let state = &state;
            scope.spawn(move || run_worker(m, state, hartid, max_instructions, cfg));
        }
    });
    m.set_threaded_exec(false);

    state.executed.load(Ordering::Relaxed)
}

/// Runs the machine for up to `max_instructions` retired instructions.
///
/// A zero budget selects the platform default. Execution paths are chosen
/// by the `RV32SIM_EXPERIMENTAL_*` knobs; the per-hart-thread mode engages
/// only for multi-hart machines that opt in. Returns the total retired
/// count, including partial progress at a trap or budget boundary.
pub fn run(m: &mut Machine, max_instructions: u64) -> u64 {
    let max_instructions = if max_instructions == 0 {
        DEFAULT_MAX_INSTRUCTIONS
    } else {
        max_instructions
    };
    let cfg = RunConfig::from_env();
    run_with_config(m, max_instructions, &cfg)
}

/// Runs the machine with an explicit path configuration.
pub fn run_with_config(m: &mut Machine, max_instructions: u64, cfg: &RunConfig) -> u64 {
    run_shared_with_config(m, max_instructions, cfg)
}

/// Runs against a shared machine reference.
///
/// Used when a device pump (for example a stdin-to-UART thread) holds a
/// reference to the machine alongside the schedulers; the pump may only
/// touch the mutex/atomic platform surface while this runs.
pub fn run_shared_with_config(m: &Machine, max_instructions: u64, cfg: &RunConfig) -> u64 {
    let max_instructions = if max_instructions == 0 {
        DEFAULT_MAX_INSTRUCTIONS
    } else {
        max_instructions
    };

    if m.hart_count() > 1 && cfg.hart_threads {
        run_threaded(m, max_instructions, cfg)
    } else {
        run_single_thread(m, max_instructions, cfg)
    }
}
