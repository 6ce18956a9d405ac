//! DRAM cell access paths.
//!
//! Two access disciplines cover the same buffer:
//! 1. **Locked:** single-threaded execution serializes accesses with the
//!    platform DRAM lock and uses plain loads/stores.
//! 2. **Lock-free:** per-hart-thread execution uses relaxed atomics — one
//!    aligned halfword/word operation on the fast path, per-byte operations
//!    for unaligned addresses — keeping racing accesses to unrelated words
//!    well-defined.
//!
//! Unaligned accesses always assemble little-endian from individual bytes,
//! so both paths observe identical values.

use std::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, Ordering};

use crate::machine::Machine;

/// Reads `len` (1, 2, or 4) bytes little-endian from a DRAM offset.
///
/// Returns `None` for unsupported widths. The caller is responsible for the
/// range check (`Platform::dram_offset`).
pub(crate) fn read(m: &Machine, off: u32, len: u32) -> Option<u32> {
    let base = m.plat.dram.base_ptr();
    if m.threaded_exec_active() {
        return read_atomic(base, off, len);
    }

    let _guard = match m.plat.dram_lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    read_atomic(base, off, len)
}

/// Writes `len` (1, 2, or 4) bytes little-endian to a DRAM offset.
///
/// Returns whether the width was supported.
pub(crate) fn write(m: &Machine, off: u32, len: u32, data: u32) -> bool {
    let base = m.plat.dram.base_ptr();
    if m.threaded_exec_active() {
        return write_atomic(base, off, len, data);
    }

    let _guard = match m.plat.dram_lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    write_atomic(base, off, len, data)
}

fn read_atomic(base: *mut u8, off: u32, len: u32) -> Option<u32> {
    // SAFETY: `off + len` was range-checked against the DRAM size by the
    // caller; the buffer base is 8-byte aligned, so an `off` aligned to the
    // access width yields a properly aligned atomic cell.
    unsafe {
        let p = base.add(off as usize);
        match len {
            1 => Some(u32::from(AtomicU8::from_ptr(p).load(Ordering::Relaxed))),
            2 => {
                if off & 1 == 0 {
                    Some(u32::from(
                        AtomicU16::from_ptr(p.cast()).load(Ordering::Relaxed),
                    ))
                } else {
                    let b0 = u32::from(AtomicU8::from_ptr(p).load(Ordering::Relaxed));
                    let b1 = u32::from(AtomicU8::from_ptr(p.add(1)).load(Ordering::Relaxed));
                    Some(b0 | (b1 << 8))
                }
            }
            4 => {
                if off & 3 == 0 {
                    Some(AtomicU32::from_ptr(p.cast()).load(Ordering::Relaxed))
                } else {
                    let mut value = 0u32;
                    for i in 0..4 {
                        let b = AtomicU8::from_ptr(p.add(i)).load(Ordering::Relaxed);
                        value |= u32::from(b) << (8 * i);
                    }
                    Some(value)
                }
            }
            _ => None,
        }
    }
}

fn write_atomic(base: *mut u8, off: u32, len: u32, data: u32) -> bool {
    // SAFETY: as in `read_atomic`; the caller range-checked the access and
    // aligned offsets land on properly aligned atomic cells.
    unsafe {
        let p = base.add(off as usize);
        match len {
            1 => {
                AtomicU8::from_ptr(p).store(data as u8, Ordering::Relaxed);
                true
            }
            2 => {
                if off & 1 == 0 {
                    AtomicU16::from_ptr(p.cast()).store(data as u16, Ordering::Relaxed);
                } else {
                    AtomicU8::from_ptr(p).store(data as u8, Ordering::Relaxed);
                    AtomicU8::from_ptr(p.add(1)).store((data >> 8) as u8, Ordering::Relaxed);
                }
                true
            }
            4 => {
                if off & 3 == 0 {
                    AtomicU32::from_ptr(p.cast()).store(data, Ordering::Relaxed);
                } else {
                    for i in 0..4 {
                        AtomicU8::from_ptr(p.add(i)).store((data >> (8 * i)) as u8, Ordering::Relaxed);
                    }
                }
                true
            }
            _ => false,
        }
    }
}
