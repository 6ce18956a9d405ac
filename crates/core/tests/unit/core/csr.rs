//! CSR tests: masked S-views, read-only counters, whitelist policy.

use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::harness::machine;
use rv32sim_core::csr;

#[test]
fn sstatus_write_then_read_is_masked() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        csr::write(m, cpu, csr::SSTATUS, 0xffff_ffff);
        let sstatus = csr::read(m, cpu, csr::SSTATUS);
        assert_eq!(sstatus, csr::SSTATUS_MASK);
    });
}

#[test]
fn mstatus_keeps_m_only_bits_over_sstatus_writes() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        csr::write(m, cpu, csr::MSTATUS, csr::MSTATUS_MIE | csr::MSTATUS_MPRV);
        csr::write(m, cpu, csr::SSTATUS, csr::MSTATUS_SIE);
        let mstatus = csr::read(m, cpu, csr::MSTATUS);
        assert_eq!(
            mstatus,
            csr::MSTATUS_MIE | csr::MSTATUS_MPRV | csr::MSTATUS_SIE,
            "sstatus writes must not clobber M-only bits"
        );
    });
}

#[test]
fn sie_sip_are_masked_views() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        csr::write(m, cpu, csr::MIE, 0xffff_ffff);
        assert_eq!(csr::read(m, cpu, csr::SIE), csr::SIE_MASK);

        csr::write(m, cpu, csr::SIP, 0xffff_ffff);
        let mip = csr::read(m, cpu, csr::MIP);
        assert_eq!(mip & !csr::SIE_MASK, 0, "sip writes stay inside the S mask");
    });
}

#[rstest]
#[case(csr::CYCLE)]
#[case(csr::TIME)]
#[case(csr::INSTRET)]
#[case(csr::CYCLEH)]
#[case(csr::TIMEH)]
#[case(csr::INSTRETH)]
fn counters_ignore_writes(#[case] counter: u32) {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        let before = csr::read(m, cpu, counter);
        csr::write(m, cpu, counter, 0xdead_beef);
        assert_eq!(csr::read(m, cpu, counter), before);
    });
}

#[test]
fn counters_project_hart_state() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        cpu.cycle = 0x1_2345_6789;
        cpu.instret = 0x1_2345_6789;
        assert_eq!(csr::read(m, cpu, csr::CYCLE), 0x2345_6789);
        assert_eq!(csr::read(m, cpu, csr::CYCLEH), 0x1);
        assert_eq!(csr::read(m, cpu, csr::INSTRET), 0x2345_6789);
        assert_eq!(csr::read(m, cpu, csr::INSTRETH), 0x1);
    });
}

#[test]
fn unimplemented_csrs_read_zero_and_drop_writes() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        csr::write(m, cpu, 0x5c0, 0x1234);
        assert_eq!(csr::read(m, cpu, 0x5c0), 0);
    });
}

#[test]
fn fflags_frm_are_fcsr_fields() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        csr::write(m, cpu, csr::FCSR, 0xff);
        assert_eq!(csr::read(m, cpu, csr::FFLAGS), 0x1f);
        assert_eq!(csr::read(m, cpu, csr::FRM), 0x7);

        csr::write(m, cpu, csr::FRM, 0x2);
        assert_eq!(csr::read(m, cpu, csr::FCSR), 0x5f);

        csr::write(m, cpu, csr::FFLAGS, 0x00);
        assert_eq!(csr::read(m, cpu, csr::FCSR), 0x40);
    });
}

#[test]
fn mhartid_and_misa_are_populated() {
    let mut m = machine();
    m.with_hart(0, |m, cpu| {
        assert_eq!(csr::read(m, cpu, csr::MHARTID), 0);
        let misa = csr::read(m, cpu, csr::MISA);
        assert_ne!(misa & (1 << 8), 0, "I");
        assert_ne!(misa & (1 << 12), 0, "M");
        assert_ne!(misa & (1 << 0), 0, "A");
        assert_ne!(misa & (1 << 2), 0, "C");
        assert_ne!(misa & (1 << 18), 0, "S");
        assert_ne!(misa & (1 << 20), 0, "U");
    });
}
