//! Platform state: memory, locks, timers, and device register files.
//!
//! The [`Platform`] is the shared half of the machine: every field is either
//! atomic, mutex-guarded, or accessed under a documented lock discipline, so
//! harts and device pumps can touch it concurrently.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::common::constants::{DRAM_BASE, MAX_HARTS};
use crate::soc::plic::Plic;
use crate::soc::uart::Uart;

/// Errors constructing the platform.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// DRAM allocation failed.
    #[error("failed to allocate {bytes} bytes of guest DRAM")]
    DramAllocation {
        /// The allocation size that failed.
        bytes: usize,
    },
}

/// Guest DRAM storage.
///
/// Backed by a `u64` buffer so the base address is 8-byte aligned, which
/// makes the aligned halfword/word atomic fast paths legal at any properly
/// aligned guest address.
pub(crate) struct Dram {
    words: UnsafeCell<Box<[u64]>>,
    size: u32,
}

// SAFETY: all access to the cell goes through `dram::read`/`dram::write`,
// which either hold the platform's DRAM lock (single-threaded execution) or
// use relaxed per-byte/aligned atomics (threaded execution), and through
// `slice_mut`, which requires `&mut`.
unsafe impl Sync for Dram {}
// SAFETY: the buffer is plain memory; ownership transfer is unrestricted.
unsafe impl Send for Dram {}

impl Dram {
    fn new(size: u32) -> Result<Self, PlatformError> {
        let words = (size as usize).div_ceil(8);
        let mut buf: Vec<u64> = Vec::new();
        if buf.try_reserve_exact(words).is_err() {
            return Err(PlatformError::DramAllocation {
                bytes: size as usize,
            });
        }
        buf.resize(words, 0);
        Ok(Self {
            words: UnsafeCell::new(buf.into_boxed_slice()),
            size,
        })
    }

    /// Size of the DRAM region in bytes.
    #[inline]
    pub(crate) fn size(&self) -> u32 {
        self.size
    }

    /// Raw base pointer of the DRAM buffer.
    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        // SAFETY: only produces a pointer; dereferencing is governed by the
        // access-path discipline documented on the type.
        unsafe { (*self.words.get()).as_mut_ptr().cast::<u8>() }
    }

    /// Exclusive byte view of the whole DRAM region.
    #[inline]
    pub(crate) fn slice_mut(&mut self) -> &mut [u8] {
        let size = self.size as usize;
        // SAFETY: `&mut self` guarantees exclusive access; the buffer holds
        // at least `size` initialized bytes.
        unsafe { std::slice::from_raw_parts_mut(self.words.get_mut().as_mut_ptr().cast(), size) }
    }
}

/// Mutex-guarded device register files.
///
/// The mutex around this struct *is* the MMIO lock: every UART and PLIC
/// register access runs with the guard held.
#[derive(Debug)]
pub struct MmioDevices {
    /// UART register file and receive FIFO.
    pub uart: Uart,
    /// PLIC pending/enable/claim state.
    pub plic: Plic,
}

/// Shared platform state.
pub struct Platform {
    pub(crate) dram: Dram,
    dram_base: u32,
    /// Serializes DRAM access in single-threaded execution.
    pub(crate) dram_lock: Mutex<()>,
    /// Serializes the read-modify-write window of AMOs across harts.
    pub(crate) amo_lock: Mutex<()>,
    mtime: AtomicU64,
    next_timer_deadline: AtomicU64,
    mtimecmp: [AtomicU64; MAX_HARTS],
    msip: [AtomicU32; MAX_HARTS],
    mmio: Mutex<MmioDevices>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("dram_base", &self.dram_base)
            .field("dram_size", &self.dram.size())
            .finish_non_exhaustive()
    }
}

impl Platform {
    /// Builds the platform with `ram_mb` MiB of DRAM and all devices reset.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::DramAllocation`] when the DRAM buffer cannot
    /// be allocated.
    pub fn new(ram_mb: u32) -> Result<Self, PlatformError> {
        let dram = Dram::new(ram_mb.saturating_mul(1024 * 1024))?;
        Ok(Self {
            dram,
            dram_base: DRAM_BASE,
            dram_lock: Mutex::new(()),
            amo_lock: Mutex::new(()),
            mtime: AtomicU64::new(0),
            next_timer_deadline: AtomicU64::new(u64::MAX),
            mtimecmp: std::array::from_fn(|_| AtomicU64::new(u64::MAX)),
            msip: std::array::from_fn(|_| AtomicU32::new(0)),
            mmio: Mutex::new(MmioDevices {
                uart: Uart::new(),
                plic: Plic::new(),
            }),
        })
    }

    /// Base physical address of DRAM.
    #[inline]
    #[must_use]
    pub fn dram_base(&self) -> u32 {
        self.dram_base
    }

    /// Size of DRAM in bytes.
    #[inline]
    #[must_use]
    pub fn dram_size(&self) -> u32 {
        self.dram.size()
    }

    /// Offset of `paddr..paddr+len` inside DRAM, or `None` if out of range.
    #[inline]
    #[must_use]
    pub fn dram_offset(&self, paddr: u32, len: u32) -> Option<u32> {
        let off = paddr.checked_sub(self.dram_base)?;
        if u64::from(off) + u64::from(len) > u64::from(self.dram.size()) {
            return None;
        }
        Some(off)
    }

    /// Exclusive byte view of a physical DRAM range, for image loading.
    #[must_use]
    pub fn dram_slice_mut(&mut self, paddr: u32, len: u32) -> Option<&mut [u8]> {
        let off = self.dram_offset(paddr, len)? as usize;
        Some(&mut self.dram.slice_mut()[off..off + len as usize])
    }

    /// Loads the free-running timer.
    #[inline]
    #[must_use]
    pub fn mtime_load(&self) -> u64 {
        self.mtime.load(Ordering::Relaxed)
    }

    /// Replaces the free-running timer (guest MTIME writes).
    #[inline]
    pub(crate) fn mtime_store(&self, value: u64) {
        self.mtime.store(value, Ordering::Relaxed);
    }

    /// Advances the free-running timer, returning the new value.
    #[inline]
    pub(crate) fn mtime_add(&self, ticks: u64) -> u64 {
        self.mtime.fetch_add(ticks, Ordering::Relaxed) + ticks
    }

    /// Loads a hart's timer comparator.
    #[inline]
    #[must_use]
    pub fn mtimecmp_load(&self, hartid: u32) -> u64 {
        self.mtimecmp[hartid as usize].load(Ordering::Relaxed)
    }

    /// Replaces a hart's timer comparator.
    #[inline]
    pub(crate) fn mtimecmp_store(&self, hartid: u32, value: u64) {
        self.mtimecmp[hartid as usize].store(value, Ordering::Relaxed);
    }

    /// Loads a hart's software-interrupt latch.
    #[inline]
    #[must_use]
    pub fn msip_load(&self, hartid: u32) -> u32 {
        self.msip[hartid as usize].load(Ordering::Relaxed)
    }

    /// Replaces a hart's software-interrupt latch.
    #[inline]
    pub(crate) fn msip_store(&self, hartid: u32, value: u32) {
        self.msip[hartid as usize].store(value, Ordering::Relaxed);
    }

    /// Loads the cached next timer deadline.
    #[inline]
    #[must_use]
    pub fn next_timer_deadline(&self) -> u64 {
        self.next_timer_deadline.load(Ordering::Relaxed)
    }

    /// Replaces the cached next timer deadline.
    #[inline]
    pub(crate) fn set_next_timer_deadline(&self, deadline: u64) {
        self.next_timer_deadline.store(deadline, Ordering::Relaxed);
    }

    /// Takes the MMIO lock, returning the device register files.
    #[inline]
    pub fn lock_mmio(&self) -> MutexGuard<'_, MmioDevices> {
        match self.mmio.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
