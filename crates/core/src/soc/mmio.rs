//! Physical access routing and timer stepping.
//!
//! The memory fabric: DRAM accesses go through the lock-or-atomics cell
//! paths, device accesses take the single MMIO lock and dispatch by base
//! range. Handlers report whether the access succeeded; the MMU lifts a
//! failure into the matching guest access fault.

use crate::common::constants::{
    CLINT_BASE, CLINT_SIZE, PLIC_BASE, PLIC_SIZE, UART_BASE, UART_SIZE, VIRTIO_BASE, VIRTIO_SIZE,
};
use crate::machine::Machine;
use crate::soc::{clint, dram, plic, uart, virtio};

/// Reads `len` (1, 2, or 4) bytes from a physical address.
///
/// Returns `None` when no region claims the address or the width is not
/// supported by the claiming device.
#[must_use]
pub fn phys_read(m: &Machine, paddr: u32, len: u32) -> Option<u32> {
    if let Some(off) = m.plat.dram_offset(paddr, len) {
        return dram::read(m, off, len);
    }
    mmio_read(m, paddr, len)
}

/// Writes `len` (1, 2, or 4) bytes to a physical address.
///
/// Returns whether a region claimed the address and accepted the width.
#[must_use]
pub fn phys_write(m: &Machine, paddr: u32, len: u32, data: u32) -> bool {
    if let Some(off) = m.plat.dram_offset(paddr, len) {
        return dram::write(m, off, len, data);
    }
    mmio_write(m, paddr, len, data)
}

fn mmio_read(m: &Machine, paddr: u32, len: u32) -> Option<u32> {
    let mut devs = m.plat.lock_mmio();

    if (UART_BASE..UART_BASE + UART_SIZE).contains(&paddr) {
        return uart::read(m, &mut devs, paddr, len);
    }
    if (CLINT_BASE..CLINT_BASE + CLINT_SIZE).contains(&paddr) {
        return clint::read(m, paddr, len);
    }
    if (PLIC_BASE..PLIC_BASE + PLIC_SIZE).contains(&paddr) {
        return plic::read(m, &mut devs, paddr, len);
    }
    if (VIRTIO_BASE..VIRTIO_BASE + VIRTIO_SIZE).contains(&paddr) {
        return virtio::read(paddr, len);
    }

    tracing::warn!(paddr = format_args!("{paddr:#010x}"), len, "unclaimed MMIO read");
    None
}

fn mmio_write(m: &Machine, paddr: u32, len: u32, data: u32) -> bool {
    let mut devs = m.plat.lock_mmio();

    if (UART_BASE..UART_BASE + UART_SIZE).contains(&paddr) {
        return uart::write(m, &mut devs, paddr, len, data);
    }
    if (CLINT_BASE..CLINT_BASE + CLINT_SIZE).contains(&paddr) {
        return clint::write(m, paddr, len, data);
    }
    if (PLIC_BASE..PLIC_BASE + PLIC_SIZE).contains(&paddr) {
        return plic::write(m, &mut devs, paddr, len, data);
    }
    if (VIRTIO_BASE..VIRTIO_BASE + VIRTIO_SIZE).contains(&paddr) {
        return virtio::write(paddr, len);
    }

    tracing::warn!(paddr = format_args!("{paddr:#010x}"), len, "unclaimed MMIO write");
    false
}

/// Pushes one byte into the UART receive FIFO from the host side.
///
/// Returns `false` when the FIFO is full. Safe to call concurrently with a
/// running machine; used by front-end stdin pumps.
pub fn uart_push_rx(m: &Machine, byte: u8) -> bool {
    let mut devs = m.plat.lock_mmio();
    uart::push_rx(m, &mut devs, byte)
}

/// Advances `mtime` by one tick (one retired instruction).
///
/// Timer-interrupt pending bits are only re-derived when the cached next
/// deadline is reached, so the common case is a single relaxed increment.
pub fn step_timer(m: &Machine) {
    let mtime = m.plat.mtime_add(1);
    sync_if_due(m, mtime);
}

/// Advances `mtime` by `ticks` at once (batch retirement paths).
pub fn step_timer_many(m: &Machine, ticks: u64) {
    if ticks == 0 {
        return;
    }
    let mtime = m.plat.mtime_add(ticks);
    sync_if_due(m, mtime);
}

fn sync_if_due(m: &Machine, mtime: u64) {
    if mtime < m.plat.next_timer_deadline() {
        return;
    }
    let _devs = m.plat.lock_mmio();
    if mtime >= m.plat.next_timer_deadline() {
        clint::sync_all_timer_irqs(m);
    }
}
