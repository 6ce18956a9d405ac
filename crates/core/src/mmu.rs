//! Sv32 address translation and virtual memory access.
//!
//! This module implements the two-level Sv32 page walk. It performs:
//! 1. **Translation:** Bare/M-mode identity mapping (with MPRV redirecting
//!    M-mode data accesses through the MPP privilege), or the two-level walk
//!    with permission checks and atomic A/D updates.
//! 2. **Virtual access:** `virt_read`/`virt_write` wrappers that translate,
//!    access the fabric, and lift failures into the matching guest trap.
//! 3. **Reservation hook:** every committed store clears overlapping LR/SC
//!    reservations on all harts before the instruction retires.

use crate::common::{MemAccess, PrivilegeMode, Trap};
use crate::csr;
use crate::hart::Hart;
use crate::machine::Machine;
use crate::soc::{phys_read, phys_write};
use crate::trap::raise_exception;

/// PTE valid bit.
const PTE_V: u32 = 1 << 0;
/// PTE read permission bit.
const PTE_R: u32 = 1 << 1;
/// PTE write permission bit.
const PTE_W: u32 = 1 << 2;
/// PTE execute permission bit.
const PTE_X: u32 = 1 << 3;
/// PTE user-accessible bit.
const PTE_U: u32 = 1 << 4;
/// PTE accessed bit.
const PTE_A: u32 = 1 << 6;
/// PTE dirty bit.
const PTE_D: u32 = 1 << 7;

/// A strongly-typed wrapper around a raw Sv32 page table entry.
#[derive(Clone, Copy, Debug)]
struct Pte(u32);

impl Pte {
    fn raw(self) -> u32 {
        self.0
    }

    fn is_valid(self) -> bool {
        self.0 & PTE_V != 0
    }

    fn can_read(self) -> bool {
        self.0 & PTE_R != 0
    }

    fn can_write(self) -> bool {
        self.0 & PTE_W != 0
    }

    fn can_exec(self) -> bool {
        self.0 & PTE_X != 0
    }

    fn is_user(self) -> bool {
        self.0 & PTE_U != 0
    }

    /// A leaf PTE has at least one of R/X set; V with all of R/W/X clear is
    /// a pointer to the next level.
    fn is_leaf(self) -> bool {
        self.can_read() || self.can_exec()
    }

    /// W without R is a reserved encoding.
    fn is_malformed(self) -> bool {
        !self.can_read() && self.can_write()
    }

    fn ppn0(self) -> u32 {
        (self.0 >> 10) & 0x3ff
    }

    fn ppn1(self) -> u32 {
        (self.0 >> 20) & 0xfff
    }

    fn ppn(self) -> u32 {
        (self.0 >> 10) & csr::SATP_PPN_MASK
    }

    fn with_accessed(self) -> Self {
        Self(self.0 | PTE_A)
    }

    fn with_dirty(self) -> Self {
        Self(self.0 | PTE_D)
    }

    fn needs_update(self, access: MemAccess) -> bool {
        self.0 & PTE_A == 0 || (access == MemAccess::Store && self.0 & PTE_D == 0)
    }
}

/// The privilege governing a translation: MPRV redirects M-mode data
/// accesses through the privilege stashed in `mstatus.MPP`.
fn effective_privilege(cpu: &Hart, access: MemAccess, mstatus: u32) -> PrivilegeMode {
    if cpu.priv_mode == PrivilegeMode::Machine
        && access != MemAccess::Fetch
        && mstatus & csr::MSTATUS_MPRV != 0
    {
        return PrivilegeMode::from_bits(
            (mstatus & csr::MSTATUS_MPP_MASK) >> csr::MSTATUS_MPP_SHIFT,
        );
    }
    cpu.priv_mode
}

/// Checks the leaf-PTE permission rules for one access.
fn check_permissions(
    pte: Pte,
    access: MemAccess,
    privilege: PrivilegeMode,
    mstatus: u32,
) -> Result<(), ()> {
    if privilege == PrivilegeMode::User && !pte.is_user() {
        return Err(());
    }

    if privilege == PrivilegeMode::Supervisor && pte.is_user() {
        // U-pages: never executable from S-mode; data access needs SUM.
        if access == MemAccess::Fetch {
            return Err(());
        }
        if mstatus & csr::MSTATUS_SUM == 0 {
            return Err(());
        }
    }

    let allowed = match access {
        MemAccess::Fetch => pte.can_exec(),
        MemAccess::Load => pte.can_read() || (mstatus & csr::MSTATUS_MXR != 0 && pte.can_exec()),
        MemAccess::Store => pte.can_write(),
    };
    if allowed { Ok(()) } else { Err(()) }
}

/// Translates a virtual address to a physical address.
///
/// Identity-maps when translation is off (`satp.MODE == 0`) or the effective
/// privilege is M. Otherwise walks the two Sv32 levels, enforcing the
/// permission rules and updating the A (always) and D (stores) bits before
/// returning.
///
/// # Errors
///
/// Returns the page fault matching `access` with `tval = vaddr` on any
/// denial, including PTE fetch failures during the walk.
pub fn translate(m: &Machine, cpu: &Hart, vaddr: u32, access: MemAccess) -> Result<u32, Trap> {
    let satp = cpu.csr[csr::SATP as usize];
    let mstatus = cpu.csr[csr::MSTATUS as usize];
    let privilege = effective_privilege(cpu, access, mstatus);

    if satp & csr::SATP_MODE_SV32 == 0 || privilege == PrivilegeMode::Machine {
        return Ok(vaddr);
    }

    let fault = || Trap::page_fault(access, vaddr);

    let mut pt_addr = (satp & csr::SATP_PPN_MASK) << 12;
    let vpn = [(vaddr >> 12) & 0x3ff, (vaddr >> 22) & 0x3ff];

    for level in (0..2).rev() {
        let pte_addr = pt_addr + vpn[level] * 4;
        let raw = phys_read(m, pte_addr, 4).ok_or_else(fault)?;
        let pte = Pte(raw);

        if !pte.is_valid() || pte.is_malformed() {
            return Err(fault());
        }

        if !pte.is_leaf() {
            if level == 0 {
                return Err(fault());
            }
            pt_addr = pte.ppn() << 12;
            continue;
        }

        if check_permissions(pte, access, privilege, mstatus).is_err() {
            return Err(fault());
        }

        // Megapage with a non-zero low PPN field is misaligned.
        if level == 1 && pte.ppn0() != 0 {
            return Err(fault());
        }

        if pte.needs_update(access) {
            let mut updated = pte.with_accessed();
            if access == MemAccess::Store {
                updated = updated.with_dirty();
            }
            if !phys_write(m, pte_addr, 4, updated.raw()) {
                return Err(fault());
            }
        }

        let offset = vaddr & 0xfff;
        let pa_ppn0 = if level == 1 { vpn[0] } else { pte.ppn0() };
        return Ok((pte.ppn1() << 22) | (pa_ppn0 << 12) | offset);
    }

    Err(fault())
}

/// Reads `len` bytes through translation, raising the matching trap on
/// failure.
///
/// A translation denial raises the page fault; a physical access refused by
/// the fabric raises the access fault. Returns `None` after a trap has been
/// taken.
pub fn virt_read(
    m: &Machine,
    cpu: &mut Hart,
    vaddr: u32,
    len: u32,
    access: MemAccess,
) -> Option<u32> {
    let paddr = match translate(m, cpu, vaddr, access) {
        Ok(paddr) => paddr,
        Err(trap) => {
            raise_exception(m, cpu, trap);
            return None;
        }
    };

    if let Some(value) = phys_read(m, paddr, len) {
        return Some(value);
    }

    tracing::warn!(
        vaddr = format_args!("{vaddr:#010x}"),
        paddr = format_args!("{paddr:#010x}"),
        len,
        "read access fault"
    );
    raise_exception(m, cpu, Trap::access_fault(access, vaddr));
    None
}

/// Writes `len` bytes through translation, raising the matching trap on
/// failure.
///
/// After the write commits, overlapping LR/SC reservations are cleared on
/// every hart; this ordering is what makes a later `sc.w` to the window
/// fail. Returns whether the write committed.
pub fn virt_write(
    m: &Machine,
    cpu: &mut Hart,
    vaddr: u32,
    len: u32,
    access: MemAccess,
    data: u32,
) -> bool {
    let paddr = match translate(m, cpu, vaddr, access) {
        Ok(paddr) => paddr,
        Err(trap) => {
            raise_exception(m, cpu, trap);
            return false;
        }
    };

    if !phys_write(m, paddr, len, data) {
        tracing::warn!(
            vaddr = format_args!("{vaddr:#010x}"),
            paddr = format_args!("{paddr:#010x}"),
            len,
            "write access fault"
        );
        raise_exception(m, cpu, Trap::access_fault(access, vaddr));
        return false;
    }

    m.invalidate_reservations(vaddr, len);
    true
}
