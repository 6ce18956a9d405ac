//! RISC-V privilege modes and memory access kinds.
//!
//! This module defines the privilege levels the emulator models and the
//! access classification used by the MMU. It implements the following:
//! 1. **Mode Classification:** User (U), Supervisor (S), and Machine (M).
//! 2. **Serialization:** Conversion between numeric encodings and variants.
//! 3. **Access Kinds:** Fetch, load, and store for translation decisions.

/// RISC-V privilege mode levels.
///
/// Machine mode is the highest privilege level; the numeric values match the
/// encodings architecturally stored in `mstatus.MPP`/`mstatus.SPP`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivilegeMode {
    /// User mode (U-mode), the lowest privilege level for application code.
    User = 0,
    /// Supervisor mode (S-mode) for operating system kernels.
    Supervisor = 1,
    /// Machine mode (M-mode) for firmware and low-level system control.
    Machine = 3,
}

impl PrivilegeMode {
    /// Converts a numeric privilege encoding to a mode.
    ///
    /// Invalid encodings (2, or anything above 3) decay to `Machine`, which
    /// matches the hardware treatment of reserved MPP values.
    #[must_use]
    pub fn from_bits(val: u32) -> Self {
        match val & 0x3 {
            0 => PrivilegeMode::User,
            1 => PrivilegeMode::Supervisor,
            _ => PrivilegeMode::Machine,
        }
    }

    /// Returns the numeric encoding of the privilege mode (0, 1, or 3).
    #[must_use]
    pub fn to_bits(self) -> u32 {
        self as u32
    }

    /// Returns the human-readable name of the privilege mode.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PrivilegeMode::User => "User",
            PrivilegeMode::Supervisor => "Supervisor",
            PrivilegeMode::Machine => "Machine",
        }
    }
}

impl std::fmt::Display for PrivilegeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Classification of a memory access for translation and fault reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemAccess {
    /// Instruction fetch.
    Fetch,
    /// Data load.
    Load,
    /// Data store (including AMO and SC write halves).
    Store,
}
