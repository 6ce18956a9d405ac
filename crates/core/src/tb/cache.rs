//! Translation-block line and cache structures.
//!
//! The cache is indexed by `(pc >> 2) & (LINES - 1)` with two ways per set.
//! Eviction prefers invalid lines, then failed/cold ones; lines queued for
//! asynchronous compilation are evicted last (and accounted when they are).
//! Lookups for a non-matching start PC within a set never overwrite another
//! valid line unless a victim is actually needed.

use crate::exec::decode_at_pc;
use crate::hart::Hart;
use crate::isa::Decoded;
use crate::machine::Machine;
use crate::stats;
use crate::tb::JitFn;
use crate::tb::config::TbTuning;

/// Number of sets in the cache.
pub const TB_LINES: usize = 256;
/// Ways per set.
pub const TB_WAYS: usize = 2;
/// Total line count.
pub const TB_TOTAL_LINES: usize = TB_LINES * TB_WAYS;
/// Maximum decoded instructions per line.
pub const TB_MAX_INSNS: usize = 32;

/// Compilation state of a line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitState {
    /// Never compiled (or reset since).
    #[default]
    None,
    /// A compile job is in flight on the async pool.
    Queued,
    /// A compiled entry point is installed.
    Ready,
    /// Compilation failed; the line stays interpreter-only.
    Failed,
}

/// One cached translation block.
#[derive(Clone)]
pub struct TbLine {
    /// Whether the line holds a decoded block.
    pub valid: bool,
    /// Guest PC of the first instruction.
    pub start_pc: u32,
    /// Number of decoded instructions.
    pub count: u8,
    /// Execution-count heat driving compilation.
    pub hotness: u8,
    /// Whether a compile has ever been attempted for this decode.
    pub jit_tried: bool,
    /// Compilation state machine.
    pub jit_state: JitState,
    /// Whether `jit_fn`/`jit_count` describe a live artifact.
    pub jit_valid: bool,
    /// Number of instructions the compiled prefix covers.
    pub jit_count: u8,
    /// Generation stamp matched against async results.
    pub jit_generation: u32,
    /// Compiled entry point.
    pub jit_fn: Option<JitFn>,
    /// Size of the compiled code in bytes.
    pub jit_code_size: u32,
    /// Dispatch attempts spent waiting on a queued compile.
    pub jit_async_wait: u8,
    /// Every-other-hit toggle for successor prefetch probing.
    pub jit_async_prefetched: bool,
    /// Whether the chain cache below is populated.
    pub chain_valid: bool,
    /// Successor start PC the chain cache was recorded for.
    pub chain_pc: u32,
    /// Successor entry point (weak: revalidated against the cache on use).
    pub chain_fn: Option<JitFn>,
    /// Guest PC of each decoded instruction.
    pub pcs: [u32; TB_MAX_INSNS],
    /// The decoded instructions.
    pub decoded: [Decoded; TB_MAX_INSNS],
}

impl std::fmt::Debug for TbLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TbLine")
            .field("valid", &self.valid)
            .field("start_pc", &self.start_pc)
            .field("count", &self.count)
            .field("jit_state", &self.jit_state)
            .finish_non_exhaustive()
    }
}

impl TbLine {
    fn empty() -> Self {
        Self {
            valid: false,
            start_pc: 0,
            count: 0,
            hotness: 0,
            jit_tried: false,
            jit_state: JitState::None,
            jit_valid: false,
            jit_count: 0,
            jit_generation: stats::next_jit_generation(),
            jit_fn: None,
            jit_code_size: 0,
            jit_async_wait: 0,
            jit_async_prefetched: false,
            chain_valid: false,
            chain_pc: 0,
            chain_fn: None,
            pcs: [0; TB_MAX_INSNS],
            decoded: [Decoded::default(); TB_MAX_INSNS],
        }
    }

    /// Drops any compiled artifact and moves the state machine to `state`.
    pub fn clear_jit(&mut self, state: JitState) {
        self.jit_valid = false;
        self.jit_state = state;
        self.jit_async_wait = 0;
        self.jit_async_prefetched = false;
        self.jit_count = 0;
        self.jit_fn = None;
        self.jit_code_size = 0;
        self.chain_valid = false;
        self.chain_pc = 0;
        self.chain_fn = None;
    }

    /// Whether a compiled entry point is installed and usable.
    #[must_use]
    pub fn jit_ready(&self) -> bool {
        self.jit_state == JitState::Ready
            && self.jit_valid
            && self.jit_count != 0
            && self.jit_fn.is_some()
    }

    /// Eviction priority; higher is evicted first. Queued lines rank below
    /// everything else that is valid.
    fn evict_priority(&self) -> u8 {
        if !self.valid {
            return 255;
        }
        match self.jit_state {
            JitState::Failed => 5,
            JitState::None => 4,
            JitState::Ready => 3,
            JitState::Queued => 1,
        }
    }
}

/// The per-executor translation-block cache.
pub struct TbCache {
    lines: Box<[TbLine]>,
    /// Parsed tuning knobs.
    pub tuning: TbTuning,
    /// Whether the block executor has an active line cursor.
    pub active: bool,
    /// Start PC of the active line.
    pub active_start_pc: u32,
    /// Index of the next instruction within the active line.
    pub active_index: u8,
    /// Dispatch attempts since the last async-result drain.
    pub async_drain_ticks: u8,
}

impl std::fmt::Debug for TbCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TbCache")
            .field("tuning", &self.tuning)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl TbCache {
    /// Creates an empty cache with the given tuning.
    #[must_use]
    pub fn new(tuning: TbTuning) -> Self {
        Self {
            lines: vec![TbLine::empty(); TB_TOTAL_LINES].into_boxed_slice(),
            tuning,
            active: false,
            active_start_pc: 0,
            active_index: 0,
            async_drain_ticks: 0,
        }
    }

    /// Creates an empty cache with knobs parsed from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(TbTuning::from_env())
    }

    /// Invalidates every line and resets the cursor.
    pub fn reset(&mut self) {
        self.active = false;
        self.async_drain_ticks = 0;
        for line in &mut self.lines {
            *line = TbLine::empty();
        }
    }

    /// Set index of a PC.
    #[inline]
    fn set_index(pc: u32) -> usize {
        ((pc >> 2) as usize) & (TB_LINES - 1)
    }

    #[inline]
    fn slot(set: usize, way: usize) -> usize {
        set * TB_WAYS + way
    }

    /// Shared view of a line by slot index.
    #[inline]
    #[must_use]
    pub fn line(&self, idx: usize) -> &TbLine {
        &self.lines[idx]
    }

    /// Exclusive view of a line by slot index.
    #[inline]
    pub fn line_mut(&mut self, idx: usize) -> &mut TbLine {
        &mut self.lines[idx]
    }

    /// Finds the slot holding a valid line that starts at `pc`.
    #[must_use]
    pub fn find_line(&self, pc: u32) -> Option<usize> {
        let set = Self::set_index(pc);
        (0..TB_WAYS)
            .map(|way| Self::slot(set, way))
            .find(|&idx| self.lines[idx].valid && self.lines[idx].start_pc == pc)
    }

    /// Picks the eviction victim in a set.
    fn pick_victim(&self, set: usize) -> usize {
        let mut best = Self::slot(set, 0);
        let mut best_prio = 0u8;
        let mut best_hotness = u8::MAX;

        for way in 0..TB_WAYS {
            let idx = Self::slot(set, way);
            let line = &self.lines[idx];
            if !line.valid {
                return idx;
            }
            let prio = line.evict_priority();
            if way == 0
                || prio > best_prio
                || (prio == best_prio && line.hotness <= best_hotness)
            {
                best = idx;
                best_prio = prio;
                best_hotness = line.hotness;
            }
        }
        best
    }

    /// Builds a fresh line at `start_pc` by decoding forward until the block
    /// length limit or a terminator (which is included).
    ///
    /// Fetch faults during building raise the guest trap and truncate the
    /// block; the line is still marked valid with whatever prefix decoded.
    fn build_line(&mut self, m: &Machine, cpu: &mut Hart, idx: usize, start_pc: u32) {
        let line = &mut self.lines[idx];
        *line = TbLine::empty();
        line.start_pc = start_pc;

        let mut pc = start_pc;
        for _ in 0..TB_MAX_INSNS {
            if pc & 1 != 0 {
                break;
            }
            let Some(decoded) = decode_at_pc(m, cpu, pc) else {
                break;
            };
            let line = &mut self.lines[idx];
            line.pcs[line.count as usize] = pc;
            line.decoded[line.count as usize] = decoded;
            line.count += 1;
            pc = pc.wrapping_add(u32::from(decoded.insn_len));

            if decoded.is_block_terminator() {
                break;
            }
        }

        self.lines[idx].valid = true;
    }

    /// Looks up the line at `pc`, building (and possibly evicting) on miss.
    pub fn lookup_or_build(&mut self, m: &Machine, cpu: &mut Hart, pc: u32) -> usize {
        if let Some(idx) = self.find_line(pc) {
            return idx;
        }

        let set = Self::set_index(pc);
        let idx = self.pick_victim(set);
        if self.lines[idx].valid && self.lines[idx].jit_state == JitState::Queued {
            stats::jit().async_evict_queued.incr();
        }
        self.build_line(m, cpu, idx, pc);
        idx
    }
}
