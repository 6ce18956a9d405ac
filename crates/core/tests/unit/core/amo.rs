//! Atomic instruction tests: LR/SC reservations and the AMO set.

use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::builder::{amoadd_w, enc_r, lr_w, sc_w, sw};
use crate::common::harness::{RAM_BASE, machine, set_pc, write_words};
use rv32sim_core::exec::exec_one;
use rv32sim_core::soc::phys_read;

const WORD: u32 = RAM_BASE + 0x900;

#[test]
fn lr_then_sc_succeeds() {
    let mut m = machine();
    write_words(&m, WORD, &[41]);
    write_words(&m, RAM_BASE, &[lr_w(5, 1), sc_w(6, 2, 1)]);
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        cpu.x[1] = WORD;
        cpu.x[2] = 42;
        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[5], 41, "lr loads the old value");
        assert!(m.shared(0).reservation_valid());

        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[6], 0, "sc success writes 0");
        assert!(!m.shared(0).reservation_valid(), "sc consumes the reservation");
    });
    assert_eq!(phys_read(&m, WORD, 4), Some(42));
}

#[test]
fn sc_without_reservation_fails() {
    let mut m = machine();
    write_words(&m, WORD, &[41]);
    write_words(&m, RAM_BASE, &[sc_w(6, 2, 1)]);
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        cpu.x[1] = WORD;
        cpu.x[2] = 42;
        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[6], 1, "sc failure writes 1");
    });
    assert_eq!(phys_read(&m, WORD, 4), Some(41), "no store on failure");
}

#[rstest]
#[case::own_store(0)]
#[case::overlapping_byte(2)]
fn intervening_store_breaks_the_reservation(#[case] offset: i32) {
    let mut m = machine();
    write_words(&m, WORD, &[0]);
    write_words(
        &m,
        RAM_BASE,
        &[lr_w(5, 1), sw(3, 4, offset), sc_w(6, 2, 1)],
    );
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        cpu.x[1] = WORD;
        cpu.x[2] = 42;
        cpu.x[3] = 7;
        cpu.x[4] = WORD;
        assert!(exec_one(m, cpu));
        assert!(exec_one(m, cpu));
        assert!(!m.shared(0).reservation_valid(), "store cleared it");
        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[6], 1, "sc fails after an overlapping store");
    });
}

#[test]
fn cross_hart_store_invalidates_reservation() {
    let mut m = machine_with_two_harts();
    m.shared(0).reservation_set(WORD);
    m.shared(1).reservation_set(WORD + 0x100);

    // A store from any hart clears every overlapping reservation.
    m.invalidate_reservations(WORD + 2, 1);
    assert!(!m.shared(0).reservation_valid());
    assert!(m.shared(1).reservation_valid(), "non-overlapping survives");
}

fn machine_with_two_harts() -> rv32sim_core::Machine {
    crate::common::harness::machine_with(|opts| opts.hart_count = 2)
}

#[test]
fn amoadd_returns_old_value_and_stores_sum() {
    let mut m = machine();
    write_words(&m, WORD, &[40]);
    write_words(&m, RAM_BASE, &[amoadd_w(5, 2, 1)]);
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        cpu.x[1] = WORD;
        cpu.x[2] = 2;
        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[5], 40);
    });
    assert_eq!(phys_read(&m, WORD, 4), Some(42));
}

#[rstest]
#[case::amoswap(0x01, 10, 99, 99)]
#[case::amoxor(0x04, 0b1100, 0b1010, 0b0110)]
#[case::amoand(0x0c, 0b1100, 0b1010, 0b1000)]
#[case::amoor(0x08, 0b1100, 0b1010, 0b1110)]
#[case::amomin_signed(0x10, 0xffff_fffe, 5, 0xffff_fffe)]
#[case::amomax_signed(0x14, 0xffff_fffe, 5, 5)]
#[case::amominu(0x18, 0xffff_fffe, 5, 5)]
#[case::amomaxu(0x1c, 0xffff_fffe, 5, 0xffff_fffe)]
fn amo_operations(#[case] funct5: u32, #[case] old: u32, #[case] rs2: u32, #[case] result: u32) {
    let mut m = machine();
    write_words(&m, WORD, &[old]);
    write_words(&m, RAM_BASE, &[enc_r(funct5 << 2, 2, 1, 0x2, 5, 0x2f)]);
    set_pc(&mut m, RAM_BASE);

    m.with_hart(0, |m, cpu| {
        cpu.x[1] = WORD;
        cpu.x[2] = rs2;
        assert!(exec_one(m, cpu));
        assert_eq!(cpu.x[5], old, "AMO returns the old value");
    });
    assert_eq!(phys_read(&m, WORD, 4), Some(result));
}

#[test]
fn misaligned_amo_address_faults() {
    let mut m = machine();
    write_words(&m, RAM_BASE, &[lr_w(5, 1)]);
    m.with_hart(0, |_m, cpu| {
        cpu.csr[rv32sim_core::csr::MTVEC as usize] = RAM_BASE + 0x100;
    });
    set_pc(&mut m, RAM_BASE);
    m.with_hart(0, |m, cpu| {
        cpu.x[1] = WORD + 2;
        assert!(!exec_one(m, cpu));
        assert_eq!(cpu.csr[rv32sim_core::csr::MCAUSE as usize], 4);
    });
}
