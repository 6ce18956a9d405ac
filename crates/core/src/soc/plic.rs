//! Platform-Level Interrupt Controller.
//!
//! A 32-source PLIC with one {M-mode, S-mode} context pair per hart.
//!
//! # Memory Map (offsets from the PLIC base)
//!
//! * `0x1000`: pending bitmap
//! * `0x2000 + ctx*0x80`: per-context enable bitmap
//! * `0x200000 + ctx*0x1000`: per-context threshold (+0) and claim/complete (+4)
//!
//! Claim returns the lowest enabled pending source and clears it from
//! pending; re-reading claim while one is outstanding returns the same
//! source; completion clears the outstanding claim only when the written
//! value matches it.

use crate::common::constants::{MAX_PLIC_CONTEXTS, PLIC_BASE, PLIC_SIZE};
use crate::csr::{MIP_MEIP, MIP_SEIP};
use crate::machine::Machine;
use crate::soc::platform::MmioDevices;

/// Offset of the pending bitmap.
const PLIC_PENDING: u32 = 0x1000;
/// Base offset of the per-context enable bitmaps.
const PLIC_ENABLE_BASE: u32 = 0x2000;
/// Stride between per-context enable bitmaps.
const PLIC_ENABLE_STRIDE: u32 = 0x80;
/// Base offset of the per-context register blocks.
const PLIC_CONTEXT_BASE: u32 = 0x0020_0000;
/// Stride between per-context register blocks.
const PLIC_CONTEXT_STRIDE: u32 = 0x1000;
/// Per-context offset of the priority threshold register.
const PLIC_CONTEXT_THRESHOLD: u32 = 0x0;
/// Per-context offset of the claim/complete register.
const PLIC_CONTEXT_CLAIM: u32 = 0x4;

/// PLIC pending/enable/claim state.
#[derive(Debug)]
pub struct Plic {
    /// Pending bitmap over the 32 sources.
    pub pending: u32,
    /// Per-context enable bitmaps.
    pub enable: [u32; MAX_PLIC_CONTEXTS],
    /// Per-context outstanding claim.
    pub claim: [u32; MAX_PLIC_CONTEXTS],
}

impl Plic {
    /// Creates a PLIC in its reset state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: 0,
            enable: [0; MAX_PLIC_CONTEXTS],
            claim: [0; MAX_PLIC_CONTEXTS],
        }
    }
}

impl Default for Plic {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of live contexts: an {M, S} pair per hart.
fn context_count(m: &Machine) -> u32 {
    m.hart_count() * 2
}

/// Refreshes every hart's MEIP/SEIP pending bits from pending AND enable.
pub(crate) fn update_irq_lines(m: &Machine, plic: &Plic) {
    for hartid in 0..m.hart_count() {
        let m_ctx = (hartid * 2) as usize;
        let s_ctx = m_ctx + 1;
        let shared = m.shared(hartid);

        if plic.pending & plic.enable[m_ctx] != 0 {
            shared.mip_set_bits(MIP_MEIP);
        } else {
            shared.mip_clear_bits(MIP_MEIP);
        }

        if plic.pending & plic.enable[s_ctx] != 0 {
            shared.mip_set_bits(MIP_SEIP);
        } else {
            shared.mip_clear_bits(MIP_SEIP);
        }
    }
}

/// Lowest non-zero source that is both pending and enabled, or 0.
fn find_claimable(pending: u32, enabled: u32) -> u32 {
    let active = pending & enabled & !1;
    if active == 0 {
        0
    } else {
        active.trailing_zeros()
    }
}

/// Performs a claim for a context, clearing the source from pending.
fn claim(m: &Machine, devs: &mut MmioDevices, context: usize) -> u32 {
    if context >= context_count(m) as usize {
        return 0;
    }
    if devs.plic.claim[context] != 0 {
        return devs.plic.claim[context];
    }

    let source = find_claimable(devs.plic.pending, devs.plic.enable[context]);
    if source != 0 {
        devs.plic.claim[context] = source;
        devs.plic.pending &= !(1 << source);
        update_irq_lines(m, &devs.plic);
    }
    devs.plic.claim[context]
}

/// Handles a read in the PLIC region. The MMIO lock is held by the caller.
pub(crate) fn read(m: &Machine, devs: &mut MmioDevices, paddr: u32, len: u32) -> Option<u32> {
    let off = paddr - PLIC_BASE;
    if off >= PLIC_SIZE || len != 4 {
        return None;
    }

    let contexts = context_count(m);

    if off == PLIC_PENDING {
        return Some(devs.plic.pending);
    }

    if off >= PLIC_ENABLE_BASE && off < PLIC_ENABLE_BASE + contexts * PLIC_ENABLE_STRIDE {
        let rel = off - PLIC_ENABLE_BASE;
        let context = (rel / PLIC_ENABLE_STRIDE) as usize;
        if rel % PLIC_ENABLE_STRIDE == 0 {
            return Some(devs.plic.enable[context]);
        }
        return Some(0);
    }

    if off >= PLIC_CONTEXT_BASE && off < PLIC_CONTEXT_BASE + contexts * PLIC_CONTEXT_STRIDE {
        let rel = off - PLIC_CONTEXT_BASE;
        let context = (rel / PLIC_CONTEXT_STRIDE) as usize;
        match rel % PLIC_CONTEXT_STRIDE {
            PLIC_CONTEXT_THRESHOLD => return Some(0),
            PLIC_CONTEXT_CLAIM => return Some(claim(m, devs, context)),
            _ => {}
        }
    }

    Some(0)
}

/// Handles a write in the PLIC region. The MMIO lock is held by the caller.
pub(crate) fn write(m: &Machine, devs: &mut MmioDevices, paddr: u32, len: u32, data: u32) -> bool {
    let off = paddr - PLIC_BASE;
    if off >= PLIC_SIZE || len != 4 {
        return false;
    }

    let contexts = context_count(m);

    if off == PLIC_PENDING {
        devs.plic.pending = data;
        crate::soc::uart::sync_irq(m, devs);
        return true;
    }

    if off >= PLIC_ENABLE_BASE && off < PLIC_ENABLE_BASE + contexts * PLIC_ENABLE_STRIDE {
        let rel = off - PLIC_ENABLE_BASE;
        let context = (rel / PLIC_ENABLE_STRIDE) as usize;
        if rel % PLIC_ENABLE_STRIDE == 0 {
            devs.plic.enable[context] = data;
            update_irq_lines(m, &devs.plic);
        }
        return true;
    }

    if off >= PLIC_CONTEXT_BASE && off < PLIC_CONTEXT_BASE + contexts * PLIC_CONTEXT_STRIDE {
        let rel = off - PLIC_CONTEXT_BASE;
        let context = (rel / PLIC_CONTEXT_STRIDE) as usize;
        if rel % PLIC_CONTEXT_STRIDE == PLIC_CONTEXT_CLAIM {
            // Complete: only a matching value retires the outstanding claim,
            // which re-enables pending scanning for this context.
            if data == devs.plic.claim[context] {
                devs.plic.claim[context] = 0;
                crate::soc::uart::sync_irq(m, devs);
            } else {
                update_irq_lines(m, &devs.plic);
            }
            return true;
        }
    }

    true
}
