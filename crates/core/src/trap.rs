//! Trap entry, delegation, and interrupt selection.
//!
//! This module implements the privileged trap architecture:
//! 1. **Entry:** cause/epc/tval capture, PIE/IE shuffle, previous-privilege
//!    recording, and the vectored-mode base adjustment for interrupts.
//! 2. **Delegation:** `medeleg`/`mideleg` route traps taken below M-mode to
//!    S-mode; delegation never promotes above S.
//! 3. **Returns:** `mret`/`sret` invert trap entry and restore privilege.
//! 4. **Selection:** the priority-ordered pending-and-enabled interrupt scan
//!    run at every quantum boundary and block entry.

use crate::common::trap::{CAUSE_INTERRUPT_FLAG, IRQ_MEIP, IRQ_MSIP, IRQ_MTIP, IRQ_SEIP, IRQ_SSIP, IRQ_STIP};
use crate::common::{PrivilegeMode, Trap};
use crate::csr;
use crate::hart::Hart;
use crate::machine::Machine;

/// Interrupt selection order: machine external, software, timer, then the
/// supervisor counterparts.
const IRQ_PRIORITY: [u32; 6] = [IRQ_MEIP, IRQ_MSIP, IRQ_MTIP, IRQ_SEIP, IRQ_SSIP, IRQ_STIP];

/// Takes a trap on the given hart.
///
/// Selects the destination privilege by delegation, saves the trap context
/// into the destination's CSRs, and redirects the PC to the trap vector
/// (`BASE + 4*cause` for vectored interrupts). A zero trap vector clears the
/// hart's running flag so the scheduler drains instead of spinning through
/// address zero.
pub fn take_trap(m: &Machine, cpu: &mut Hart, cause: u32, tval: u32, is_interrupt: bool) {
    let cause_bit = cause & 0x1f;
    let cause_value = if is_interrupt {
        cause | CAUSE_INTERRUPT_FLAG
    } else {
        cause
    };

    let deleg = if is_interrupt {
        cpu.csr[csr::MIDELEG as usize]
    } else {
        cpu.csr[csr::MEDELEG as usize]
    };
    let delegated_to_s =
        cpu.priv_mode != PrivilegeMode::Machine && deleg & (1 << cause_bit) != 0;

    let from_priv = cpu.priv_mode;
    let from_pc = cpu.pc;

    if delegated_to_s {
        let mut mstatus = cpu.csr[csr::MSTATUS as usize];
        let stvec = cpu.csr[csr::STVEC as usize];
        let mut vector = stvec & !0x3;

        cpu.csr[csr::SEPC as usize] = cpu.pc;
        cpu.csr[csr::SCAUSE as usize] = cause_value;
        cpu.csr[csr::STVAL as usize] = tval;

        if mstatus & csr::MSTATUS_SIE != 0 {
            mstatus |= csr::MSTATUS_SPIE;
        } else {
            mstatus &= !csr::MSTATUS_SPIE;
        }
        mstatus &= !csr::MSTATUS_SIE;

        if cpu.priv_mode == PrivilegeMode::Supervisor {
            mstatus |= csr::MSTATUS_SPP;
        } else {
            mstatus &= !csr::MSTATUS_SPP;
        }

        if is_interrupt && stvec & 0x3 == 1 {
            vector += cause_bit * 4;
        }

        tracing::debug!(
            hartid = cpu.hartid,
            pc = format_args!("{from_pc:#010x}"),
            cause = format_args!("{cause_value:#010x}"),
            tval = format_args!("{tval:#010x}"),
            from = %from_priv,
            "trap delegated to S-mode"
        );

        cpu.csr[csr::MSTATUS as usize] = mstatus;
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.pc = vector;
        m.shared(cpu.hartid).set_running(vector != 0);
        return;
    }

    let mut mstatus = cpu.csr[csr::MSTATUS as usize];
    let mtvec = cpu.csr[csr::MTVEC as usize];
    let mut vector = mtvec & !0x3;

    cpu.csr[csr::MEPC as usize] = cpu.pc;
    cpu.csr[csr::MCAUSE as usize] = cause_value;
    cpu.csr[csr::MTVAL as usize] = tval;

    if mstatus & csr::MSTATUS_MIE != 0 {
        mstatus |= csr::MSTATUS_MPIE;
    } else {
        mstatus &= !csr::MSTATUS_MPIE;
    }
    mstatus &= !csr::MSTATUS_MIE;
    mstatus = (mstatus & !csr::MSTATUS_MPP_MASK)
        | ((from_priv.to_bits() << csr::MSTATUS_MPP_SHIFT) & csr::MSTATUS_MPP_MASK);

    if is_interrupt && mtvec & 0x3 == 1 {
        vector += cause_bit * 4;
    }

    tracing::debug!(
        hartid = cpu.hartid,
        pc = format_args!("{from_pc:#010x}"),
        cause = format_args!("{cause_value:#010x}"),
        tval = format_args!("{tval:#010x}"),
        from = %from_priv,
        "trap taken to M-mode"
    );

    cpu.csr[csr::MSTATUS as usize] = mstatus;
    cpu.priv_mode = PrivilegeMode::Machine;
    cpu.pc = vector;
    m.shared(cpu.hartid).set_running(vector != 0);
}

/// Raises a synchronous exception.
pub fn raise_exception(m: &Machine, cpu: &mut Hart, trap: Trap) {
    take_trap(m, cpu, trap.cause(), trap.tval(), false);
}

/// Selects and takes the highest-priority pending-and-enabled interrupt.
///
/// An interrupt delegated to S is deliverable below M unconditionally, and
/// in S-mode only when `sstatus.SIE` is set; an M-targeted interrupt is
/// deliverable below M unconditionally, and in M-mode only when
/// `mstatus.MIE` is set. Returns whether a trap was taken.
pub fn check_pending_interrupt(m: &Machine, cpu: &mut Hart) -> bool {
    let mip = m.shared(cpu.hartid).mip_load();
    let enabled_pending = cpu.csr[csr::MIE as usize] & mip;
    if enabled_pending == 0 {
        return false;
    }

    let mstatus = cpu.csr[csr::MSTATUS as usize];
    let mideleg = cpu.csr[csr::MIDELEG as usize];

    for cause in IRQ_PRIORITY {
        let bit = 1 << cause;
        if enabled_pending & bit == 0 {
            continue;
        }

        let delegated = mideleg & bit != 0;
        let global_enabled = if delegated {
            match cpu.priv_mode {
                PrivilegeMode::Machine => continue,
                PrivilegeMode::Supervisor => mstatus & csr::MSTATUS_SIE != 0,
                PrivilegeMode::User => true,
            }
        } else {
            match cpu.priv_mode {
                PrivilegeMode::Machine => mstatus & csr::MSTATUS_MIE != 0,
                _ => true,
            }
        };

        if !global_enabled {
            continue;
        }

        take_trap(m, cpu, cause, 0, true);
        return true;
    }

    false
}

/// Executes `mret`: restores IE from MPIE, privilege from MPP, and returns
/// the target PC. `None` when executed below M-mode.
#[must_use]
pub fn exec_mret(cpu: &mut Hart) -> Option<u32> {
    if cpu.priv_mode != PrivilegeMode::Machine {
        return None;
    }

    let mut mstatus = cpu.csr[csr::MSTATUS as usize];
    let mpp = (mstatus & csr::MSTATUS_MPP_MASK) >> csr::MSTATUS_MPP_SHIFT;

    if mstatus & csr::MSTATUS_MPIE != 0 {
        mstatus |= csr::MSTATUS_MIE;
    } else {
        mstatus &= !csr::MSTATUS_MIE;
    }
    mstatus |= csr::MSTATUS_MPIE;
    mstatus &= !csr::MSTATUS_MPP_MASK;

    cpu.csr[csr::MSTATUS as usize] = mstatus;
    cpu.priv_mode = PrivilegeMode::from_bits(mpp);
    Some(cpu.csr[csr::MEPC as usize] & !1)
}

/// Executes `sret`: restores SIE from SPIE, privilege from SPP, and returns
/// the target PC. `None` when executed in U-mode.
#[must_use]
pub fn exec_sret(cpu: &mut Hart) -> Option<u32> {
    if cpu.priv_mode == PrivilegeMode::User {
        return None;
    }

    let mut mstatus = cpu.csr[csr::MSTATUS as usize];
    if mstatus & csr::MSTATUS_SPIE != 0 {
        mstatus |= csr::MSTATUS_SIE;
    } else {
        mstatus &= !csr::MSTATUS_SIE;
    }
    mstatus |= csr::MSTATUS_SPIE;

    cpu.priv_mode = if mstatus & csr::MSTATUS_SPP != 0 {
        PrivilegeMode::Supervisor
    } else {
        PrivilegeMode::User
    };
    mstatus &= !csr::MSTATUS_SPP;

    cpu.csr[csr::MSTATUS as usize] = mstatus;
    Some(cpu.csr[csr::SEPC as usize] & !1)
}
