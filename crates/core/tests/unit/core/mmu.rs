//! Sv32 translation tests: identity map, walks, permissions, A/D updates.

use pretty_assertions::assert_eq;

use crate::common::harness::{RAM_BASE, machine};
use rv32sim_core::common::{MemAccess, PrivilegeMode, Trap};
use rv32sim_core::csr;
use rv32sim_core::mmu::translate;
use rv32sim_core::soc::{phys_read, phys_write};

/// PTE flag bits.
const V: u32 = 1 << 0;
const R: u32 = 1 << 1;
const W: u32 = 1 << 2;
const X: u32 = 1 << 3;
const U: u32 = 1 << 4;
const A: u32 = 1 << 6;
const D: u32 = 1 << 7;

/// Physical address of the root page table.
const ROOT_PT: u32 = RAM_BASE + 0x1000;
/// Physical address of the second-level page table.
const LEAF_PT: u32 = RAM_BASE + 0x2000;

/// Installs a two-level mapping `vaddr -> paddr` with `flags` on the leaf.
fn map_page(m: &rv32sim_core::Machine, vaddr: u32, paddr: u32, flags: u32) {
    let vpn1 = (vaddr >> 22) & 0x3ff;
    let vpn0 = (vaddr >> 12) & 0x3ff;

    let pointer = ((LEAF_PT >> 12) << 10) | V;
    assert!(phys_write(m, ROOT_PT + vpn1 * 4, 4, pointer));

    let leaf = ((paddr >> 12) << 10) | flags;
    assert!(phys_write(m, LEAF_PT + vpn0 * 4, 4, leaf));
}

/// Points satp at the root table in Sv32 mode.
fn enable_sv32(cpu: &mut rv32sim_core::Hart) {
    cpu.csr[csr::SATP as usize] = csr::SATP_MODE_SV32 | (ROOT_PT >> 12);
    cpu.priv_mode = PrivilegeMode::Supervisor;
}

#[test]
fn bare_mode_is_identity() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        let paddr = translate(m, cpu, 0x8000_1234, MemAccess::Load).expect("bare translation");
        assert_eq!(paddr, 0x8000_1234);
    });
}

#[test]
fn m_mode_ignores_satp() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        cpu.csr[csr::SATP as usize] = csr::SATP_MODE_SV32 | (ROOT_PT >> 12);
        cpu.priv_mode = PrivilegeMode::Machine;
        let paddr = translate(m, cpu, 0x4000_0000, MemAccess::Load).expect("identity in M-mode");
        assert_eq!(paddr, 0x4000_0000);
    });
}

#[test]
fn two_level_walk_translates_and_sets_a() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | R | W);
        enable_sv32(cpu);

        let paddr =
            translate(m, cpu, 0x4000_0000, MemAccess::Load).expect("mapped load translation");
        assert_eq!(paddr, RAM_BASE + 0x3000);

        let vpn0 = 0;
        let pte = phys_read(m, LEAF_PT + vpn0 * 4, 4).expect("leaf PTE readable");
        assert_ne!(pte & A, 0, "A set on access");
        assert_eq!(pte & D, 0, "D untouched by a load");
    });
}

#[test]
fn store_sets_dirty() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | R | W);
        enable_sv32(cpu);

        let paddr =
            translate(m, cpu, 0x4000_0010, MemAccess::Store).expect("mapped store translation");
        assert_eq!(paddr, RAM_BASE + 0x3010);

        let pte = phys_read(m, LEAF_PT, 4).expect("leaf PTE readable");
        assert_ne!(pte & A, 0);
        assert_ne!(pte & D, 0, "D set on store");
    });
}

#[test]
fn unmapped_vaddr_faults_with_vaddr_tval() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | R);
        enable_sv32(cpu);

        let trap = translate(m, cpu, 0x5000_0000, MemAccess::Load).expect_err("unmapped");
        assert_eq!(trap, Trap::LoadPageFault(0x5000_0000));
    });
}

#[test]
fn write_requires_w() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | R);
        enable_sv32(cpu);

        let trap = translate(m, cpu, 0x4000_0000, MemAccess::Store).expect_err("read-only page");
        assert_eq!(trap, Trap::StorePageFault(0x4000_0000));
    });
}

#[test]
fn fetch_requires_x() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | R | W);
        enable_sv32(cpu);

        let trap = translate(m, cpu, 0x4000_0000, MemAccess::Fetch).expect_err("non-exec page");
        assert_eq!(trap, Trap::InstructionPageFault(0x4000_0000));
    });
}

#[test]
fn mxr_makes_exec_pages_loadable() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | X);
        enable_sv32(cpu);

        assert!(translate(m, cpu, 0x4000_0000, MemAccess::Load).is_err());

        cpu.csr[csr::MSTATUS as usize] |= csr::MSTATUS_MXR;
        assert!(translate(m, cpu, 0x4000_0000, MemAccess::Load).is_ok());
    });
}

#[test]
fn supervisor_needs_sum_for_user_pages() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | R | W | U);
        enable_sv32(cpu);

        assert!(translate(m, cpu, 0x4000_0000, MemAccess::Load).is_err());

        cpu.csr[csr::MSTATUS as usize] |= csr::MSTATUS_SUM;
        assert!(translate(m, cpu, 0x4000_0000, MemAccess::Load).is_ok());

        // SUM never unlocks S-mode execution of U pages.
        cpu.csr[csr::MSTATUS as usize] |= csr::MSTATUS_MXR;
        assert!(translate(m, cpu, 0x4000_0000, MemAccess::Fetch).is_err());
    });
}

#[test]
fn user_cannot_touch_supervisor_pages() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | R | W);
        enable_sv32(cpu);
        cpu.priv_mode = PrivilegeMode::User;

        assert!(translate(m, cpu, 0x4000_0000, MemAccess::Load).is_err());
    });
}

#[test]
fn mprv_redirects_m_mode_data_accesses() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | R | W);
        cpu.csr[csr::SATP as usize] = csr::SATP_MODE_SV32 | (ROOT_PT >> 12);
        cpu.priv_mode = PrivilegeMode::Machine;
        cpu.csr[csr::MSTATUS as usize] = csr::MSTATUS_MPRV
            | (PrivilegeMode::Supervisor.to_bits() << csr::MSTATUS_MPP_SHIFT);

        let paddr = translate(m, cpu, 0x4000_0000, MemAccess::Load)
            .expect("MPRV data access translates via MPP");
        assert_eq!(paddr, RAM_BASE + 0x3000);

        // Fetches stay in M-mode identity regardless of MPRV.
        let fetch = translate(m, cpu, 0x4000_0000, MemAccess::Fetch).expect("identity fetch");
        assert_eq!(fetch, 0x4000_0000);
    });
}

#[test]
fn misaligned_megapage_faults() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        // Leaf at level 1 with a non-zero PPN0 field.
        let vpn1 = (0x4000_0000u32 >> 22) & 0x3ff;
        let leaf = (((RAM_BASE + 0x3000) >> 12) << 10) | V | R | W;
        assert!(phys_write(m, ROOT_PT + vpn1 * 4, 4, leaf));
        enable_sv32(cpu);

        assert!(translate(m, cpu, 0x4000_0000, MemAccess::Load).is_err());
    });
}

#[test]
fn w_without_r_is_malformed() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        map_page(m, 0x4000_0000, RAM_BASE + 0x3000, V | W);
        enable_sv32(cpu);
        assert!(translate(m, cpu, 0x4000_0000, MemAccess::Store).is_err());
    });
}
