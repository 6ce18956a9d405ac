//! Guest-architectural trap representation.
//!
//! This module defines the trap vocabulary of the emulator. It provides:
//! 1. **Trap Representation:** All synchronous exceptions and asynchronous
//!    interrupts the core can raise, with their payload values.
//! 2. **Cause Codes:** The numeric exception and interrupt cause encodings
//!    written to `mcause`/`scause`.
//! 3. **Error Integration:** `Display` and `std::error::Error` so host-side
//!    diagnostics can carry a trap without translation.
//!
//! Traps are never surfaced to callers of the run loop; they are dispatched
//! through the trap machine and become guest control flow.

use std::fmt;

use crate::common::MemAccess;

/// Exception cause: instruction address misaligned.
pub const EXC_INST_MISALIGNED: u32 = 0;
/// Exception cause: instruction access fault.
pub const EXC_INST_ACCESS_FAULT: u32 = 1;
/// Exception cause: illegal instruction.
pub const EXC_ILLEGAL_INST: u32 = 2;
/// Exception cause: breakpoint.
pub const EXC_BREAKPOINT: u32 = 3;
/// Exception cause: load address misaligned.
pub const EXC_LOAD_MISALIGNED: u32 = 4;
/// Exception cause: load access fault.
pub const EXC_LOAD_ACCESS_FAULT: u32 = 5;
/// Exception cause: store/AMO address misaligned.
pub const EXC_STORE_MISALIGNED: u32 = 6;
/// Exception cause: store/AMO access fault.
pub const EXC_STORE_ACCESS_FAULT: u32 = 7;
/// Exception cause: environment call from U-mode.
pub const EXC_ECALL_U: u32 = 8;
/// Exception cause: environment call from S-mode.
pub const EXC_ECALL_S: u32 = 9;
/// Exception cause: environment call from M-mode.
pub const EXC_ECALL_M: u32 = 11;
/// Exception cause: instruction page fault.
pub const EXC_INST_PAGE_FAULT: u32 = 12;
/// Exception cause: load page fault.
pub const EXC_LOAD_PAGE_FAULT: u32 = 13;
/// Exception cause: store/AMO page fault.
pub const EXC_STORE_PAGE_FAULT: u32 = 15;

/// Interrupt cause number: supervisor software interrupt.
pub const IRQ_SSIP: u32 = 1;
/// Interrupt cause number: machine software interrupt.
pub const IRQ_MSIP: u32 = 3;
/// Interrupt cause number: supervisor timer interrupt.
pub const IRQ_STIP: u32 = 5;
/// Interrupt cause number: machine timer interrupt.
pub const IRQ_MTIP: u32 = 7;
/// Interrupt cause number: supervisor external interrupt.
pub const IRQ_SEIP: u32 = 9;
/// Interrupt cause number: machine external interrupt.
pub const IRQ_MEIP: u32 = 11;

/// MSB set in `mcause`/`scause` for interrupt causes.
pub const CAUSE_INTERRUPT_FLAG: u32 = 0x8000_0000;

/// A guest-architectural trap: one synchronous exception or one interrupt.
///
/// Exception variants carry the value written to `mtval`/`stval` on entry
/// (faulting address, offending encoding, or zero where the architecture
/// leaves it unspecified).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trap {
    /// Instruction address misaligned; payload is the misaligned PC.
    InstructionAddressMisaligned(u32),
    /// Instruction access fault; payload is the faulting address.
    InstructionAccessFault(u32),
    /// Illegal instruction; payload is the offending encoding.
    IllegalInstruction(u32),
    /// Breakpoint; payload is the PC of the `ebreak`.
    Breakpoint(u32),
    /// Load address misaligned; payload is the misaligned address.
    LoadAddressMisaligned(u32),
    /// Load access fault; payload is the faulting address.
    LoadAccessFault(u32),
    /// Store/AMO address misaligned; payload is the misaligned address.
    StoreAddressMisaligned(u32),
    /// Store/AMO access fault; payload is the faulting address.
    StoreAccessFault(u32),
    /// Environment call from U-mode.
    EnvironmentCallFromUMode,
    /// Environment call from S-mode.
    EnvironmentCallFromSMode,
    /// Environment call from M-mode.
    EnvironmentCallFromMMode,
    /// Instruction page fault; payload is the faulting virtual address.
    InstructionPageFault(u32),
    /// Load page fault; payload is the faulting virtual address.
    LoadPageFault(u32),
    /// Store/AMO page fault; payload is the faulting virtual address.
    StorePageFault(u32),
}

impl Trap {
    /// Builds the page-fault trap matching an access kind.
    #[must_use]
    pub fn page_fault(access: MemAccess, vaddr: u32) -> Self {
        match access {
            MemAccess::Fetch => Trap::InstructionPageFault(vaddr),
            MemAccess::Load => Trap::LoadPageFault(vaddr),
            MemAccess::Store => Trap::StorePageFault(vaddr),
        }
    }

    /// Builds the access-fault trap matching an access kind.
    #[must_use]
    pub fn access_fault(access: MemAccess, vaddr: u32) -> Self {
        match access {
            MemAccess::Fetch => Trap::InstructionAccessFault(vaddr),
            MemAccess::Load => Trap::LoadAccessFault(vaddr),
            MemAccess::Store => Trap::StoreAccessFault(vaddr),
        }
    }

    /// Returns the numeric exception cause code.
    #[must_use]
    pub fn cause(self) -> u32 {
        match self {
            Trap::InstructionAddressMisaligned(_) => EXC_INST_MISALIGNED,
            Trap::InstructionAccessFault(_) => EXC_INST_ACCESS_FAULT,
            Trap::IllegalInstruction(_) => EXC_ILLEGAL_INST,
            Trap::Breakpoint(_) => EXC_BREAKPOINT,
            Trap::LoadAddressMisaligned(_) => EXC_LOAD_MISALIGNED,
            Trap::LoadAccessFault(_) => EXC_LOAD_ACCESS_FAULT,
            Trap::StoreAddressMisaligned(_) => EXC_STORE_MISALIGNED,
            Trap::StoreAccessFault(_) => EXC_STORE_ACCESS_FAULT,
            Trap::EnvironmentCallFromUMode => EXC_ECALL_U,
            Trap::EnvironmentCallFromSMode => EXC_ECALL_S,
            Trap::EnvironmentCallFromMMode => EXC_ECALL_M,
            Trap::InstructionPageFault(_) => EXC_INST_PAGE_FAULT,
            Trap::LoadPageFault(_) => EXC_LOAD_PAGE_FAULT,
            Trap::StorePageFault(_) => EXC_STORE_PAGE_FAULT,
        }
    }

    /// Returns the value written to `mtval`/`stval` on trap entry.
    #[must_use]
    pub fn tval(self) -> u32 {
        match self {
            Trap::InstructionAddressMisaligned(v)
            | Trap::InstructionAccessFault(v)
            | Trap::IllegalInstruction(v)
            | Trap::Breakpoint(v)
            | Trap::LoadAddressMisaligned(v)
            | Trap::LoadAccessFault(v)
            | Trap::StoreAddressMisaligned(v)
            | Trap::StoreAccessFault(v)
            | Trap::InstructionPageFault(v)
            | Trap::LoadPageFault(v)
            | Trap::StorePageFault(v) => v,
            Trap::EnvironmentCallFromUMode
            | Trap::EnvironmentCallFromSMode
            | Trap::EnvironmentCallFromMMode => 0,
        }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::InstructionAddressMisaligned(addr) => {
                write!(f, "InstructionAddressMisaligned({addr:#x})")
            }
            Trap::InstructionAccessFault(addr) => write!(f, "InstructionAccessFault({addr:#x})"),
            Trap::IllegalInstruction(inst) => write!(f, "IllegalInstruction({inst:#x})"),
            Trap::Breakpoint(pc) => write!(f, "Breakpoint({pc:#x})"),
            Trap::LoadAddressMisaligned(addr) => write!(f, "LoadAddressMisaligned({addr:#x})"),
            Trap::LoadAccessFault(addr) => write!(f, "LoadAccessFault({addr:#x})"),
            Trap::StoreAddressMisaligned(addr) => write!(f, "StoreAddressMisaligned({addr:#x})"),
            Trap::StoreAccessFault(addr) => write!(f, "StoreAccessFault({addr:#x})"),
            Trap::EnvironmentCallFromUMode => write!(f, "EnvironmentCallFromUMode"),
            Trap::EnvironmentCallFromSMode => write!(f, "EnvironmentCallFromSMode"),
            Trap::EnvironmentCallFromMMode => write!(f, "EnvironmentCallFromMMode"),
            Trap::InstructionPageFault(addr) => write!(f, "InstructionPageFault({addr:#x})"),
            Trap::LoadPageFault(addr) => write!(f, "LoadPageFault({addr:#x})"),
            Trap::StorePageFault(addr) => write!(f, "StorePageFault({addr:#x})"),
        }
    }
}

impl std::error::Error for Trap {}
