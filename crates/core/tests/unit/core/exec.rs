//! Interpreter tests: retirement bookkeeping, ALU, M-extension edge cases,
//! unaligned memory, FP data movement, and privileged no-ops.

use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::builder::{addi, div, ebreak, enc_i, enc_r, mul, rem, sh, sw, wfi};
use crate::common::harness::{RAM_BASE, machine, set_pc, write_words};
use rv32sim_core::common::PrivilegeMode;
use rv32sim_core::csr;
use rv32sim_core::exec::exec_one;
use rv32sim_core::soc::phys_read;

#[test]
fn retirement_updates_counters_and_x0() {
    let mut m = machine();
    write_words(&m, RAM_BASE, &[addi(0, 0, 5), addi(1, 0, 7)]);
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[0], 0, "x0 stays zero even as a destination");
        assert_eq!(cpu.pc, RAM_BASE + 4);
        assert_eq!(cpu.cycle, 1);
        assert_eq!(cpu.instret, 1);
        assert_eq!(m.plat.mtime_load(), 1, "mtime ticks once per retirement");

        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[1], 7);
        assert_eq!(cpu.cycle, cpu.instret);
    });
}

#[rstest]
#[case::mul(mul(3, 1, 2), 7, 6, 42)]
#[case::div(div(3, 1, 2), 42, 7, 6)]
#[case::div_by_zero(div(3, 1, 2), 42, 0, 0xffff_ffff)]
#[case::div_overflow(div(3, 1, 2), 0x8000_0000, 0xffff_ffff, 0x8000_0000)]
#[case::rem_by_zero(rem(3, 1, 2), 42, 0, 42)]
#[case::rem_overflow(rem(3, 1, 2), 0x8000_0000, 0xffff_ffff, 0)]
fn muldiv_edge_cases(#[case] insn: u32, #[case] rs1: u32, #[case] rs2: u32, #[case] expect: u32) {
    let mut m = machine();
    write_words(&m, RAM_BASE, &[insn]);
    set_pc(&mut m, RAM_BASE);
    m.with_hart(0, |m, cpu| {
        cpu.x[1] = rs1;
        cpu.x[2] = rs2;
        assert!(exec_one(m, cpu), "M-extension never traps");
        assert_eq!(cpu.x[3], expect);
    });
}

#[test]
fn unaligned_word_store_and_load_round_trip() {
    let mut m = machine();
    let addr = RAM_BASE + 0x101; // odd address forces the byte path
    write_words(
        &m,
        RAM_BASE,
        &[
            sw(2, 1, 0),
            crate::common::builder::lw(3, 1, 0),
        ],
    );
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        cpu.x[1] = addr;
        cpu.x[2] = 0x1122_3344;
        assert!(exec_one(m, cpu));
        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[3], 0x1122_3344);
    });

    // The bytes landed little-endian at the unaligned address.
    assert_eq!(phys_read(&m, addr, 1), Some(0x44));
    assert_eq!(phys_read(&m, addr + 3, 1), Some(0x11));
}

#[test]
fn misaligned_pc_raises_instruction_misaligned() {
    let mut m = machine();
    m.with_hart(0, |_m, cpu| {
        cpu.csr[csr::MTVEC as usize] = RAM_BASE + 0x100;
    });
    set_pc(&mut m, RAM_BASE + 1);
    m.with_hart(0, |m, cpu| {
        assert!(!exec_one(m, cpu));
        assert_eq!(cpu.csr[csr::MCAUSE as usize], 0, "instruction misaligned");
        assert_eq!(cpu.csr[csr::MTVAL as usize], RAM_BASE + 1);
        assert_eq!(cpu.pc, RAM_BASE + 0x100);
    });
}

#[test]
fn illegal_instruction_reports_encoding() {
    let mut m = machine();
    write_words(&m, RAM_BASE, &[0x0000_007b]);
    m.with_hart(0, |_m, cpu| {
        cpu.csr[csr::MTVEC as usize] = RAM_BASE + 0x100;
    });
    set_pc(&mut m, RAM_BASE);
    m.with_hart(0, |m, cpu| {
        assert!(!exec_one(m, cpu));
        assert_eq!(cpu.csr[csr::MCAUSE as usize], 2);
        assert_eq!(cpu.csr[csr::MTVAL as usize], 0x0000_007b);
    });
}

#[test]
fn fence_retires_as_noop() {
    let mut m = machine();
    write_words(&m, RAM_BASE, &[0x0ff0_000f, 0x0000_100f]); // fence, fence.i
    set_pc(&mut m, RAM_BASE);
    m.with_hart(0, |m, cpu| {
        assert!(exec_one(m, cpu));
        assert!(exec_one(m, cpu));
        assert_eq!(cpu.instret, 2);
    });
}

#[test]
fn wfi_is_illegal_in_u_mode() {
    let mut m = machine();
    write_words(&m, RAM_BASE, &[wfi()]);
    m.with_hart(0, |_m, cpu| {
        cpu.csr[csr::MTVEC as usize] = RAM_BASE + 0x100;
    });
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        cpu.priv_mode = PrivilegeMode::Machine;
        assert!(exec_one(m, cpu), "wfi retires above U-mode");

        cpu.pc = RAM_BASE;
        cpu.priv_mode = PrivilegeMode::User;
        assert!(!exec_one(m, cpu));
        assert_eq!(cpu.csr[csr::MCAUSE as usize], 2);
    });
}

#[test]
fn fp_load_nan_boxes_and_store_round_trips() {
    let mut m = machine();
    let data = RAM_BASE + 0x200;
    write_words(
        &m,
        RAM_BASE,
        &[
            enc_i(0x200, 1, 0x2, 5, 0x07), // flw f5, 0x200(x1)
            enc_r(0x78, 0, 6, 0x0, 7, 0x53), // fmv.w.x f7, x6
            enc_r(0x70, 0, 5, 0x0, 8, 0x53), // fmv.x.w x8, f5
        ],
    );
    write_words(&m, data, &[0x3f80_0000]); // 1.0f
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        cpu.x[1] = RAM_BASE;
        cpu.x[6] = 0xc0a0_0000;
        assert!(exec_one(m, cpu));
        assert_eq!(cpu.f[5], 0xffff_ffff_3f80_0000, "flw NaN-boxes");

        assert!(exec_one(m, cpu));
        assert_eq!(cpu.f[7], 0xffff_ffff_c0a0_0000, "fmv.w.x NaN-boxes");

        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[8], 0x3f80_0000, "fmv.x.w moves the low word");
    });
}

#[test]
fn fp_arithmetic_is_illegal() {
    let mut m = machine();
    // fadd.s f1, f2, f3
    write_words(&m, RAM_BASE, &[enc_r(0x00, 3, 2, 0x0, 1, 0x53)]);
    m.with_hart(0, |_m, cpu| {
        cpu.csr[csr::MTVEC as usize] = RAM_BASE + 0x100;
    });
    set_pc(&mut m, RAM_BASE);
    m.with_hart(0, |m, cpu| {
        assert!(!exec_one(m, cpu));
        assert_eq!(cpu.csr[csr::MCAUSE as usize], 2);
    });
}

#[test]
fn partial_store_commits_up_to_protection_boundary() {
    let mut m = machine();
    // An unaligned halfword store whose second byte falls past the end of
    // DRAM: the first byte commits, the second faults.
    let last = RAM_BASE + m.plat.dram_size() - 1;
    write_words(&m, RAM_BASE, &[sh(2, 1, 0), ebreak()]);
    m.with_hart(0, |_m, cpu| {
        cpu.csr[csr::MTVEC as usize] = RAM_BASE + 0x100;
    });
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        cpu.x[1] = last;
        cpu.x[2] = 0xBBAA;
        assert!(!exec_one(m, cpu), "second byte faults");
        assert_eq!(cpu.csr[csr::MCAUSE as usize], 7, "store access fault");
        assert_eq!(cpu.csr[csr::MTVAL as usize], last + 1, "first failing byte");
    });
    assert_eq!(phys_read(&m, last, 1), Some(0xAA), "first byte committed");
}
