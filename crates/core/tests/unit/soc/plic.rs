//! PLIC tests: pending/enable gating, claim/complete protocol, contexts.
//!
//! Source 10 is the UART's line and is re-derived from UART state on every
//! pending write, so these tests drive the non-UART sources.

use pretty_assertions::assert_eq;

use crate::common::harness::{machine, machine_with};
use rv32sim_core::csr::{MIP_MEIP, MIP_SEIP};
use rv32sim_core::soc::{phys_read, phys_write};

const PLIC: u32 = 0x0c00_0000;
const PENDING: u32 = PLIC + 0x1000;
const ENABLE_M0: u32 = PLIC + 0x2000;
const ENABLE_S0: u32 = PLIC + 0x2080;
const CLAIM_M0: u32 = PLIC + 0x0020_0004;
const CLAIM_S0: u32 = PLIC + 0x0020_1004;
const THRESHOLD_M0: u32 = PLIC + 0x0020_0000;

#[test]
fn pending_needs_enable_to_raise_lines() {
    let m = machine();
    assert!(phys_write(&m, PENDING, 4, 1 << 5));
    assert_eq!(m.shared(0).mip_load() & MIP_MEIP, 0, "not enabled yet");

    assert!(phys_write(&m, ENABLE_M0, 4, 1 << 5));
    assert_ne!(m.shared(0).mip_load() & MIP_MEIP, 0);
    assert_eq!(m.shared(0).mip_load() & MIP_SEIP, 0, "S context not enabled");
}

#[test]
fn s_context_raises_seip() {
    let m = machine();
    assert!(phys_write(&m, ENABLE_S0, 4, 1 << 7));
    assert!(phys_write(&m, PENDING, 4, 1 << 7));
    assert_ne!(m.shared(0).mip_load() & MIP_SEIP, 0);
}

#[test]
fn claim_returns_lowest_enabled_source_and_clears_pending() {
    let m = machine();
    assert!(phys_write(&m, ENABLE_M0, 4, (1 << 7) | (1 << 5)));
    assert!(phys_write(&m, PENDING, 4, (1 << 7) | (1 << 5)));

    assert_eq!(phys_read(&m, CLAIM_M0, 4), Some(5));
    assert_eq!(
        phys_read(&m, PENDING, 4).map(|p| p & (1 << 5)),
        Some(0),
        "claimed source leaves pending"
    );
}

#[test]
fn claim_is_idempotent_until_completed() {
    let m = machine();
    assert!(phys_write(&m, ENABLE_M0, 4, 1 << 7));
    assert!(phys_write(&m, PENDING, 4, 1 << 7));

    assert_eq!(phys_read(&m, CLAIM_M0, 4), Some(7));
    assert_eq!(phys_read(&m, CLAIM_M0, 4), Some(7), "same claim until complete");

    // Completion with a non-matching id keeps the claim outstanding.
    assert!(phys_write(&m, CLAIM_M0, 4, 3));
    assert_eq!(phys_read(&m, CLAIM_M0, 4), Some(7));

    assert!(phys_write(&m, CLAIM_M0, 4, 7));
    assert_eq!(phys_read(&m, CLAIM_M0, 4), Some(0), "completed");
}

#[test]
fn contexts_are_independent() {
    let m = machine();
    assert!(phys_write(&m, ENABLE_M0, 4, 1 << 5));
    assert!(phys_write(&m, ENABLE_S0, 4, 1 << 5));
    assert!(phys_write(&m, PENDING, 4, 1 << 5));

    assert_eq!(phys_read(&m, CLAIM_M0, 4), Some(5));
    // The M-context claim consumed pending; the S context sees nothing.
    assert_eq!(phys_read(&m, CLAIM_S0, 4), Some(0));
}

#[test]
fn threshold_reads_zero_and_ignores_writes() {
    let m = machine();
    assert_eq!(phys_read(&m, THRESHOLD_M0, 4), Some(0));
    assert!(phys_write(&m, THRESHOLD_M0, 4, 7));
    assert_eq!(phys_read(&m, THRESHOLD_M0, 4), Some(0));
}

#[test]
fn second_hart_contexts_follow_the_stride() {
    let m = machine_with(|opts| opts.hart_count = 2);
    let enable_m1 = PLIC + 0x2000 + 2 * 0x80;
    assert!(phys_write(&m, enable_m1, 4, 1 << 5));
    assert!(phys_write(&m, PENDING, 4, 1 << 5));
    assert_ne!(m.shared(1).mip_load() & MIP_MEIP, 0);
    assert_eq!(m.shared(0).mip_load() & MIP_MEIP, 0);
}

#[test]
fn narrow_accesses_are_rejected() {
    let m = machine();
    assert_eq!(phys_read(&m, PENDING, 1), None);
    assert!(!phys_write(&m, PENDING, 2, 1));
}
