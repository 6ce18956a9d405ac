//! Machine aggregate: options, platform, and harts.
//!
//! The [`Machine`] owns the platform (memory and devices) and up to four
//! harts. Each hart's architectural state is owned exclusively by whichever
//! executor is driving it; cross-hart visible state (`running`, `mip`, the
//! LR/SC reservation, pending HSM start requests) lives in a per-hart
//! [`HartShared`] atomics block so devices and other harts can touch it
//! without taking ownership of the hart itself.

use std::cell::UnsafeCell;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::common::constants::MAX_HARTS;
use crate::config::MachineOptions;
use crate::hart::Hart;
use crate::soc::platform::{Platform, PlatformError};

/// Cross-hart start request posted by SBI HSM `hart_start`.
///
/// The caller snapshots its CSR file so the target resumes with the same
/// delegation and translation context; the target's executor applies the
/// request at its next scheduling boundary.
pub struct HartStartRequest {
    /// Entry PC for the started hart.
    pub start_pc: u32,
    /// Opaque argument delivered in `a1`.
    pub opaque: u32,
    /// CSR image copied from the requesting hart.
    pub csr_image: Box<[u32; 4096]>,
}

impl std::fmt::Debug for HartStartRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HartStartRequest")
            .field("start_pc", &self.start_pc)
            .field("opaque", &self.opaque)
            .finish_non_exhaustive()
    }
}

/// Per-hart state that other harts and devices may touch concurrently.
#[derive(Debug)]
pub struct HartShared {
    /// Running flag; cleared by traps-to-zero, SBI shutdown, and HSM stop.
    running: AtomicBool,
    /// Machine interrupt-pending bits (the architectural `mip`).
    mip: AtomicU32,
    /// LR/SC reservation validity.
    lr_valid: AtomicBool,
    /// LR/SC reserved word address (meaningful only while `lr_valid`).
    lr_addr: AtomicU32,
    /// Pending HSM start request, applied by the target's executor.
    start_req: Mutex<Option<HartStartRequest>>,
}

impl HartShared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            mip: AtomicU32::new(0),
            lr_valid: AtomicBool::new(false),
            lr_addr: AtomicU32::new(0),
            start_req: Mutex::new(None),
        }
    }

    /// Returns whether the hart is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Sets or clears the running flag.
    #[inline]
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Loads the interrupt-pending bits.
    #[inline]
    pub fn mip_load(&self) -> u32 {
        self.mip.load(Ordering::Acquire)
    }

    /// Replaces the interrupt-pending bits.
    #[inline]
    pub fn mip_store(&self, value: u32) {
        self.mip.store(value, Ordering::Release);
    }

    /// Sets the given interrupt-pending bits.
    #[inline]
    pub fn mip_set_bits(&self, bits: u32) {
        self.mip.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clears the given interrupt-pending bits.
    #[inline]
    pub fn mip_clear_bits(&self, bits: u32) {
        self.mip.fetch_and(!bits, Ordering::AcqRel);
    }

    /// Records a reservation on the aligned word at `addr`.
    #[inline]
    pub fn reservation_set(&self, addr: u32) {
        self.lr_addr.store(addr, Ordering::Relaxed);
        self.lr_valid.store(true, Ordering::Release);
    }

    /// Tests whether a valid reservation covers exactly `addr`.
    ///
    /// The caller clears the reservation itself once the `sc.w` outcome is
    /// decided; a store fault leaves the reservation intact for the retry.
    #[inline]
    pub fn reservation_matches(&self, addr: u32) -> bool {
        self.lr_valid.load(Ordering::Acquire) && self.lr_addr.load(Ordering::Relaxed) == addr
    }

    /// Returns whether a reservation is currently valid.
    #[inline]
    pub fn reservation_valid(&self) -> bool {
        self.lr_valid.load(Ordering::Acquire)
    }

    /// Clears the reservation unconditionally.
    #[inline]
    pub fn reservation_clear(&self) {
        self.lr_valid.store(false, Ordering::Release);
    }

    /// Clears the reservation iff its 4-byte window overlaps `[addr, addr+len)`.
    #[inline]
    pub fn reservation_clear_overlap(&self, addr: u32, len: u32) {
        if len == 0 || !self.lr_valid.load(Ordering::Acquire) {
            return;
        }
        let reserved = self.lr_addr.load(Ordering::Relaxed);
        let end = u64::from(addr) + u64::from(len);
        let reserved_end = u64::from(reserved) + 4;
        if u64::from(addr) < reserved_end && u64::from(reserved) < end {
            self.lr_valid.store(false, Ordering::Release);
        }
    }

    /// Posts an HSM start request; any previous unapplied request is replaced.
    pub fn post_start_request(&self, req: HartStartRequest) {
        if let Ok(mut slot) = self.start_req.lock() {
            *slot = Some(req);
        }
    }

    /// Takes the pending HSM start request, if any.
    pub fn take_start_request(&self) -> Option<HartStartRequest> {
        self.start_req.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Errors constructing a machine.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    /// The requested hart count is zero or exceeds the platform maximum.
    #[error("invalid hart count {requested} (platform supports 1..={max})")]
    InvalidHartCount {
        /// The hart count that was requested.
        requested: u32,
        /// The maximum the platform supports.
        max: usize,
    },
    /// Platform construction failed.
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// The emulated machine: options, platform, and harts.
pub struct Machine {
    /// The options the machine was constructed with.
    pub opts: MachineOptions,
    /// Memory and device state.
    pub plat: Platform,
    harts: Vec<UnsafeCell<Hart>>,
    shared: Vec<HartShared>,
    hart_count: u32,
    threaded_exec_active: AtomicBool,
}

// SAFETY: every `UnsafeCell<Hart>` is only dereferenced by the executor the
// hart is bound to (the single-threaded scheduler, one worker thread, or a
// test holding `&mut Machine`); all cross-hart communication goes through
// the `HartShared` atomics and the start-request mailbox. `Platform` guards
// its own shared state with atomics and mutexes.
unsafe impl Sync for Machine {}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("hart_count", &self.hart_count)
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// Constructs a machine from options.
    ///
    /// Hart 0 comes up running in M-mode; remaining harts are stopped until
    /// started through the CLINT MSIP wake or SBI HSM. The machine is left
    /// in a drop-safe state on error.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::InvalidHartCount`] when the option is out of
    /// range, or a platform error when memory allocation fails.
    pub fn new(mut opts: MachineOptions) -> Result<Self, MachineError> {
        opts.apply_defaults();

        let hart_count = opts.hart_count;
        if hart_count == 0 || hart_count as usize > MAX_HARTS {
            return Err(MachineError::InvalidHartCount {
                requested: hart_count,
                max: MAX_HARTS,
            });
        }

        let plat = Platform::new(opts.ram_mb)?;

        let mut harts = Vec::with_capacity(hart_count as usize);
        let mut shared = Vec::with_capacity(hart_count as usize);
        for hartid in 0..hart_count {
            let mut hart = Hart::new(hartid);
            hart.trace = opts.trace;
            harts.push(UnsafeCell::new(hart));
            shared.push(HartShared::new());
        }
        shared[0].set_running(true);

        tracing::info!(hart_count, ram_mb = opts.ram_mb, "machine constructed");

        Ok(Self {
            opts,
            plat,
            harts,
            shared,
            hart_count,
            threaded_exec_active: AtomicBool::new(false),
        })
    }

    /// Returns the number of harts.
    #[inline]
    #[must_use]
    pub fn hart_count(&self) -> u32 {
        self.hart_count
    }

    /// Returns the shared atomic block of a hart.
    ///
    /// # Panics
    ///
    /// Panics if `hartid` is out of range.
    #[inline]
    #[must_use]
    pub fn shared(&self, hartid: u32) -> &HartShared {
        &self.shared[hartid as usize]
    }

    /// Returns the shared atomic block of a hart, or `None` if out of range.
    #[inline]
    #[must_use]
    pub fn shared_checked(&self, hartid: u32) -> Option<&HartShared> {
        self.shared.get(hartid as usize)
    }

    /// Exclusive access to a hart's architectural state.
    #[must_use]
    pub fn hart_mut(&mut self, hartid: u32) -> &mut Hart {
        self.harts[hartid as usize].get_mut()
    }

    /// Shared-machine access to a hart's architectural state.
    ///
    /// # Safety
    ///
    /// The caller must be the executor the hart is currently bound to, and
    /// must not let two references to the same hart coexist.
    #[inline]
    pub(crate) unsafe fn hart_for_executor(&self, hartid: u32) -> &mut Hart {
        // SAFETY: delegated to the caller per the binding discipline above.
        unsafe { &mut *self.harts[hartid as usize].get() }
    }

    /// Runs a closure with shared machine access plus exclusive access to
    /// one hart, the split every execution layer works against.
    ///
    /// # Panics
    ///
    /// Panics if `hartid` is out of range.
    pub fn with_hart<R>(&mut self, hartid: u32, f: impl FnOnce(&Self, &mut Hart) -> R) -> R {
        // SAFETY: `&mut self` guarantees no executor holds any hart; the
        // closure receives the only live reference to this hart.
        let cpu = unsafe { &mut *self.harts[hartid as usize].get() };
        f(self, cpu)
    }

    /// Shared-machine read of a hart's architectural state.
    ///
    /// # Safety
    ///
    /// The caller must ensure no executor is concurrently driving the hart
    /// (for example, after the schedulers have drained).
    #[inline]
    pub unsafe fn hart_unsynchronized(&self, hartid: u32) -> &Hart {
        // SAFETY: delegated to the caller; with no live executor there is
        // no writer to race with.
        unsafe { &*self.harts[hartid as usize].get() }
    }

    /// Returns whether any hart is currently running.
    #[must_use]
    pub fn any_hart_running(&self) -> bool {
        self.shared.iter().any(HartShared::is_running)
    }

    /// Marks entry/exit of the per-hart-thread execution mode; DRAM switches
    /// to lock-free relaxed atomics while active.
    pub(crate) fn set_threaded_exec(&self, active: bool) {
        self.threaded_exec_active.store(active, Ordering::Release);
    }

    /// Returns whether per-hart-thread execution is active.
    #[inline]
    #[must_use]
    pub fn threaded_exec_active(&self) -> bool {
        self.threaded_exec_active.load(Ordering::Acquire)
    }

    /// Clears every reservation whose word overlaps `[addr, addr+len)`.
    ///
    /// Called after every committed store, on every hart, so a subsequent
    /// `sc.w` to an overlapping word fails.
    #[inline]
    pub fn invalidate_reservations(&self, addr: u32, len: u32) {
        for shared in &self.shared {
            shared.reservation_clear_overlap(addr, len);
        }
    }

    /// Recomputes the cached next timer deadline from all comparators.
    ///
    /// Only future comparators are candidates: expired ones already have
    /// pending IRQ state, and including them would force a full-hart scan
    /// every instruction.
    pub fn timer_refresh_deadline(&self) {
        let mtime = self.plat.mtime_load();
        let mut next = u64::MAX;
        for hartid in 0..self.hart_count {
            let cmp = self.plat.mtimecmp_load(hartid);
            if cmp > mtime && cmp < next {
                next = cmp;
            }
        }
        self.plat.set_next_timer_deadline(next);
    }

    /// Applies a pending HSM start request to a stopped hart, if one exists.
    ///
    /// Called by the hart's executor at a scheduling boundary. Returns
    /// whether the hart was started. The hart is reset, given the caller's
    /// CSR image, and enters S-mode at the requested PC with `a0 = hartid`
    /// and `a1 = opaque`.
    pub fn apply_start_request(&self, hartid: u32, cpu: &mut Hart) -> bool {
        let shared = self.shared(hartid);
        if shared.is_running() {
            return false;
        }
        let Some(req) = shared.take_start_request() else {
            return false;
        };

        *cpu = Hart::new(hartid);
        cpu.csr.copy_from_slice(&req.csr_image[..]);
        cpu.csr[crate::csr::MHARTID as usize] = hartid;
        cpu.csr[crate::csr::MISA as usize] = crate::csr::misa_value();
        cpu.pc = req.start_pc;
        cpu.x[crate::isa::abi::REG_A0] = hartid;
        cpu.x[crate::isa::abi::REG_A1] = req.opaque;
        cpu.priv_mode = crate::common::PrivilegeMode::Supervisor;
        cpu.trace = self.opts.trace;

        shared.reservation_clear();
        shared.mip_store(0);
        if self.plat.msip_load(hartid) != 0 {
            shared.mip_set_bits(crate::csr::MIP_MSIP);
        }
        let expired = self.plat.mtime_load() >= self.plat.mtimecmp_load(hartid);
        if self.opts.enable_sbi_shim {
            if expired {
                shared.mip_set_bits(crate::csr::MIP_STIP);
            }
        } else if expired {
            shared.mip_set_bits(crate::csr::MIP_MTIP);
        }

        shared.set_running(true);
        tracing::debug!(hartid, pc = format_args!("{:#x}", req.start_pc), "hart started");
        true
    }
}
