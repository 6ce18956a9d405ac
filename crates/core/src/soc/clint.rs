//! Core Local Interruptor.
//!
//! Per-hart software interrupt latches and timer comparators plus the
//! free-running `mtime` counter.
//!
//! # Memory Map (offsets from the CLINT base)
//!
//! * `0x0000 + hart*4`: MSIP
//! * `0x4000 + hart*8`: MTIMECMP (low/high words)
//! * `0xBFF8`: MTIME (low/high words)
//!
//! An MSIP write that raises the latch also wakes a stopped hart; MTIMECMP
//! and MTIME writes refresh the affected timer-interrupt pending bits and
//! the cached next deadline.

use crate::common::constants::{CLINT_BASE, CLINT_SIZE};
use crate::csr::{MIP_MSIP, MIP_MTIP, MIP_STIP};
use crate::machine::Machine;

/// Base offset of the per-hart MSIP registers.
const CLINT_MSIP_BASE: u32 = 0x0000;
/// Base offset of the per-hart MTIMECMP registers.
const CLINT_MTIMECMP_BASE: u32 = 0x4000;
/// Offset of the MTIME register.
const CLINT_MTIME: u32 = 0xbff8;

/// Refreshes one hart's timer-interrupt pending bit from its comparator.
///
/// Under the SBI shim the timer is delivered as STIP (the shim owns the
/// machine timer); otherwise as MTIP.
pub(crate) fn sync_timer_irq_for_hart(m: &Machine, hartid: u32) {
    let Some(shared) = m.shared_checked(hartid) else {
        return;
    };

    let expired = m.plat.mtime_load() >= m.plat.mtimecmp_load(hartid);
    if m.opts.enable_sbi_shim {
        if expired {
            shared.mip_set_bits(MIP_STIP);
        } else {
            shared.mip_clear_bits(MIP_STIP);
        }
        shared.mip_clear_bits(MIP_MTIP);
        return;
    }

    if expired {
        shared.mip_set_bits(MIP_MTIP);
    } else {
        shared.mip_clear_bits(MIP_MTIP);
    }
}

/// Refreshes every hart's timer-interrupt pending bit and the deadline cache.
pub(crate) fn sync_all_timer_irqs(m: &Machine) {
    for hartid in 0..m.hart_count() {
        sync_timer_irq_for_hart(m, hartid);
    }
    m.timer_refresh_deadline();
}

/// Handles a read in the CLINT region. The MMIO lock is held by the caller.
pub(crate) fn read(m: &Machine, paddr: u32, len: u32) -> Option<u32> {
    let off = paddr - CLINT_BASE;
    if off >= CLINT_SIZE || len != 4 {
        return None;
    }

    if off < CLINT_MSIP_BASE + m.hart_count() * 4 {
        if off & 0x3 != 0 {
            return None;
        }
        let hart = (off - CLINT_MSIP_BASE) / 4;
        return Some(m.plat.msip_load(hart));
    }

    if off >= CLINT_MTIMECMP_BASE && off < CLINT_MTIMECMP_BASE + m.hart_count() * 8 {
        let rel = off - CLINT_MTIMECMP_BASE;
        if rel & 0x3 != 0 {
            return None;
        }
        let hart = rel / 8;
        let cmp = m.plat.mtimecmp_load(hart);
        return Some(if rel & 0x4 == 0 {
            cmp as u32
        } else {
            (cmp >> 32) as u32
        });
    }

    match off {
        CLINT_MTIME => Some(m.plat.mtime_load() as u32),
        val if val == CLINT_MTIME + 4 => Some((m.plat.mtime_load() >> 32) as u32),
        _ => Some(0),
    }
}

/// Handles a write in the CLINT region. The MMIO lock is held by the caller.
pub(crate) fn write(m: &Machine, paddr: u32, len: u32, data: u32) -> bool {
    let off = paddr - CLINT_BASE;
    if off >= CLINT_SIZE || len != 4 {
        return false;
    }

    if off < CLINT_MSIP_BASE + m.hart_count() * 4 {
        if off & 0x3 != 0 {
            return false;
        }
        let hart = (off - CLINT_MSIP_BASE) / 4;
        let msip = data & 1;
        m.plat.msip_store(hart, msip);
        if let Some(shared) = m.shared_checked(hart) {
            if msip != 0 && !shared.is_running() {
                shared.set_running(true);
            }
            if msip != 0 {
                shared.mip_set_bits(MIP_MSIP);
            } else {
                shared.mip_clear_bits(MIP_MSIP);
            }
        }
        return true;
    }

    if off >= CLINT_MTIMECMP_BASE && off < CLINT_MTIMECMP_BASE + m.hart_count() * 8 {
        let rel = off - CLINT_MTIMECMP_BASE;
        if rel & 0x3 != 0 {
            return false;
        }
        let hart = rel / 8;
        let cmp = m.plat.mtimecmp_load(hart);
        let cmp = if rel & 0x4 == 0 {
            (cmp & 0xffff_ffff_0000_0000) | u64::from(data)
        } else {
            (cmp & 0x0000_0000_ffff_ffff) | (u64::from(data) << 32)
        };
        m.plat.mtimecmp_store(hart, cmp);
        sync_timer_irq_for_hart(m, hart);
        m.timer_refresh_deadline();
        return true;
    }

    match off {
        CLINT_MTIME => {
            let mtime = m.plat.mtime_load();
            m.plat
                .mtime_store((mtime & 0xffff_ffff_0000_0000) | u64::from(data));
        }
        val if val == CLINT_MTIME + 4 => {
            let mtime = m.plat.mtime_load();
            m.plat
                .mtime_store((mtime & 0x0000_0000_ffff_ffff) | (u64::from(data) << 32));
        }
        _ => return true,
    }

    sync_all_timer_irqs(m);
    true
}
