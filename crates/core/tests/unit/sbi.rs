//! SBI shim tests: gating, timer delegation, BASE identity, HSM lifecycle.

use pretty_assertions::assert_eq;

use crate::common::harness::{machine, machine_with};
use rv32sim_core::common::PrivilegeMode;
use rv32sim_core::csr::{MIP_MSIP, MIP_MTIP, MIP_SSIP, MIP_STIP};
use rv32sim_core::isa::abi;
use rv32sim_core::sbi::handle_ecall;
use rv32sim_core::soc::step_timer;

fn shim_machine() -> rv32sim_core::Machine {
    machine_with(|opts| {
        opts.enable_sbi_shim = true;
        opts.hart_count = 2;
    })
}

#[test]
fn shim_only_consumes_s_mode_calls() {
    let mut m = shim_machine();
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Machine;
        cpu.x[abi::REG_A7] = 0x10;
        assert!(!handle_ecall(m, cpu), "M-mode ecalls trap normally");

        cpu.priv_mode = PrivilegeMode::User;
        assert!(!handle_ecall(m, cpu), "U-mode ecalls trap normally");
    });
}

#[test]
fn disabled_shim_consumes_nothing() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.x[abi::REG_A7] = 0x10;
        assert!(!handle_ecall(m, cpu));
    });
}

#[test]
fn set_timer_programs_comparator_and_delegates_stip() {
    let mut m = shim_machine();

    // Pre-state: the timer is already at 100 (via the CLINT MTIME register).
    assert!(rv32sim_core::soc::phys_write(&m, 0x0200_0000 + 0xbff8, 4, 100));
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.x[abi::REG_A7] = 0x00; // legacy SET_TIMER
        cpu.x[abi::REG_A0] = 120;
        cpu.x[abi::REG_A1] = 0;
        assert!(handle_ecall(m, cpu));
        assert_eq!(cpu.x[abi::REG_A0], 0, "legacy success");
    });

    assert_eq!(m.plat.mtimecmp_load(0), 120);
    let mip = m.shared(0).mip_load();
    assert_eq!(mip & (MIP_STIP | MIP_MTIP), 0, "not yet expired");

    for _ in 0..20 {
        step_timer(&m);
    }
    let mip = m.shared(0).mip_load();
    assert_ne!(mip & MIP_STIP, 0, "timer delivered as STIP under the shim");
    assert_eq!(mip & MIP_MTIP, 0, "MTIP stays clear under the shim");
}

#[test]
fn base_reports_identity() {
    let mut m = shim_machine();
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.x[abi::REG_A7] = 0x10;

        cpu.x[abi::REG_A6] = 0; // spec version
        assert!(handle_ecall(m, cpu));
        assert_eq!(cpu.x[abi::REG_A0], 0);
        assert_eq!(cpu.x[abi::REG_A1], 0x2);

        cpu.x[abi::REG_A6] = 1; // impl id
        assert!(handle_ecall(m, cpu));
        assert_eq!(cpu.x[abi::REG_A1], 0x5256_3332);

        cpu.x[abi::REG_A6] = 2; // impl version
        assert!(handle_ecall(m, cpu));
        assert_eq!(cpu.x[abi::REG_A1], 0x0001_0000);

        cpu.x[abi::REG_A6] = 3; // probe TIME
        cpu.x[abi::REG_A0] = 0x5449_4d45;
        assert!(handle_ecall(m, cpu));
        assert_eq!(cpu.x[abi::REG_A1], 1);
    });
}

#[test]
fn send_ipi_raises_ssip_on_targets() {
    let mut m = shim_machine();
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.x[abi::REG_A7] = 0x0073_5049; // IPI
        cpu.x[abi::REG_A6] = 0;
        cpu.x[abi::REG_A0] = 0b10; // mask: hart 1
        cpu.x[abi::REG_A1] = 0; // base
        assert!(handle_ecall(m, cpu));
    });
    assert_ne!(m.shared(1).mip_load() & MIP_SSIP, 0);
    assert_eq!(m.shared(0).mip_load() & MIP_SSIP, 0);
}

#[test]
fn legacy_ipi_targets_self() {
    let mut m = shim_machine();
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.x[abi::REG_A7] = 0x04; // legacy SEND_IPI
        assert!(handle_ecall(m, cpu));
    });
    assert_ne!(m.shared(0).mip_load() & MIP_MSIP, 0);

    m.with_hart(0, |m, cpu| {
        cpu.x[abi::REG_A7] = 0x03; // legacy CLEAR_IPI
        assert!(handle_ecall(m, cpu));
    });
    assert_eq!(m.shared(0).mip_load() & MIP_MSIP, 0);
}

#[test]
fn hsm_start_posts_a_mailbox_request() {
    let mut m = shim_machine();
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.csr[rv32sim_core::csr::SATP as usize] = 0x1234;
        cpu.x[abi::REG_A7] = 0x0048_534d; // HSM
        cpu.x[abi::REG_A6] = 0; // hart_start
        cpu.x[abi::REG_A0] = 1; // target
        cpu.x[abi::REG_A1] = 0x8000_4000; // entry
        cpu.x[abi::REG_A2] = 0xcafe; // opaque
        assert!(handle_ecall(m, cpu));
        assert_eq!(cpu.x[abi::REG_A0], 0);
    });

    // The target's executor applies the request at its boundary.
    m.with_hart(1, |m, cpu| {
        assert!(m.apply_start_request(1, cpu));
        assert_eq!(cpu.pc, 0x8000_4000);
        assert_eq!(cpu.priv_mode, PrivilegeMode::Supervisor);
        assert_eq!(cpu.x[abi::REG_A0], 1, "a0 = hartid");
        assert_eq!(cpu.x[abi::REG_A1], 0xcafe, "a1 = opaque");
        assert_eq!(
            cpu.csr[rv32sim_core::csr::SATP as usize],
            0x1234,
            "caller CSR image propagated"
        );
        assert_eq!(cpu.csr[rv32sim_core::csr::MHARTID as usize], 1);
    });
    assert!(m.shared(1).is_running());
}

#[test]
fn hsm_status_and_stop() {
    let mut m = shim_machine();
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.x[abi::REG_A7] = 0x0048_534d;
        cpu.x[abi::REG_A6] = 2; // hart_status
        cpu.x[abi::REG_A0] = 1;
        assert!(handle_ecall(m, cpu));
        assert_eq!(cpu.x[abi::REG_A1], 1, "hart 1 reports stopped");

        cpu.x[abi::REG_A6] = 1; // hart_stop (self)
        assert!(handle_ecall(m, cpu));
    });
    assert!(!m.shared(0).is_running());
}

#[test]
fn srst_stops_the_calling_hart() {
    let mut m = shim_machine();
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.x[abi::REG_A7] = 0x5352_5354; // SRST
        cpu.x[abi::REG_A6] = 0;
        assert!(handle_ecall(m, cpu));
    });
    assert!(!m.shared(0).is_running());
}

#[test]
fn unknown_extension_reports_not_supported() {
    let mut m = shim_machine();
    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Supervisor;
        cpu.x[abi::REG_A7] = 0xdead_beef;
        assert!(handle_ecall(m, cpu), "consumed with an error code");
        assert_eq!(cpu.x[abi::REG_A0] as i32, -2);
    });
}
