//! UART tests: line status, FIFO flow, and interrupt plumbing to the PLIC.

use pretty_assertions::assert_eq;

use crate::common::harness::machine;
use rv32sim_core::csr::MIP_MEIP;
use rv32sim_core::soc::mmio::uart_push_rx;
use rv32sim_core::soc::{phys_read, phys_write};

const UART: u32 = 0x1000_0000;
const RBR: u32 = UART;
const IER: u32 = UART + 1;
const IIR: u32 = UART + 2;
const FCR: u32 = UART + 2;
const LSR: u32 = UART + 5;
const MSR: u32 = UART + 6;
const SCR: u32 = UART + 7;

const PLIC_ENABLE_M0: u32 = 0x0c00_2000;
const UART_IRQ_BIT: u32 = 1 << 10;

#[test]
fn lsr_reports_transmitter_empty() {
    let m = machine();
    let lsr = phys_read(&m, LSR, 1).expect("LSR readable");
    assert_eq!(lsr & 0x60, 0x60, "THRE|TEMT always set");
    assert_eq!(lsr & 0x01, 0, "no data ready");
}

#[test]
fn rx_fifo_drains_through_rbr() {
    let m = machine();
    assert!(uart_push_rx(&m, b'h'));
    assert!(uart_push_rx(&m, b'i'));

    let lsr = phys_read(&m, LSR, 1).expect("LSR readable");
    assert_eq!(lsr & 0x01, 1, "DR follows FIFO occupancy");

    assert_eq!(phys_read(&m, RBR, 1), Some(u32::from(b'h')));
    assert_eq!(phys_read(&m, RBR, 1), Some(u32::from(b'i')));
    assert_eq!(phys_read(&m, RBR, 1), Some(0), "empty FIFO reads zero");
}

#[test]
fn rx_fifo_bounds_at_capacity() {
    let m = machine();
    for i in 0..256 {
        assert!(uart_push_rx(&m, i as u8), "byte {i} fits");
    }
    assert!(!uart_push_rx(&m, 0xff), "257th byte is refused");
}

#[test]
fn fcr_bit1_clears_the_fifo() {
    let m = machine();
    assert!(uart_push_rx(&m, b'x'));
    assert!(phys_write(&m, FCR, 1, 0x02));
    let lsr = phys_read(&m, LSR, 1).expect("LSR readable");
    assert_eq!(lsr & 0x01, 0, "FIFO cleared");
}

#[test]
fn rx_data_with_rdi_enabled_raises_the_plic_line() {
    let m = machine();
    assert!(phys_write(&m, PLIC_ENABLE_M0, 4, UART_IRQ_BIT));
    assert!(phys_write(&m, IER, 1, 0x01)); // RDI enable

    assert_eq!(m.shared(0).mip_load() & MIP_MEIP, 0);
    assert!(uart_push_rx(&m, b'k'));
    assert_ne!(m.shared(0).mip_load() & MIP_MEIP, 0, "UART asserts source 10");

    assert_eq!(phys_read(&m, RBR, 1), Some(u32::from(b'k')));
    assert_eq!(m.shared(0).mip_load() & MIP_MEIP, 0, "drained FIFO drops the line");
}

#[test]
fn iir_prioritizes_rx_over_tx() {
    let m = machine();
    assert!(phys_write(&m, IER, 1, 0x03)); // RDI | THRI
    // Enabling THRI latches a TX interrupt.
    assert_eq!(phys_read(&m, IIR, 1), Some(0x02));

    assert!(uart_push_rx(&m, b'a'));
    assert_eq!(phys_read(&m, IIR, 1), Some(0x04), "RX beats TX");
}

#[test]
fn thr_write_with_thri_latches_tx_interrupt() {
    let m = machine();
    assert!(phys_write(&m, PLIC_ENABLE_M0, 4, UART_IRQ_BIT));
    assert!(phys_write(&m, IER, 1, 0x02)); // THRI enable

    // The enable itself latches; a transmit keeps it latched.
    assert!(phys_write(&m, RBR, 1, u32::from(b'\n')));
    assert_ne!(m.shared(0).mip_load() & MIP_MEIP, 0);
}

#[test]
fn scratch_and_msr_behave() {
    let m = machine();
    assert!(phys_write(&m, SCR, 1, 0x5a));
    assert_eq!(phys_read(&m, SCR, 1), Some(0x5a));
    assert_eq!(phys_read(&m, MSR, 1), Some(0));
}

#[test]
fn unsupported_width_is_rejected() {
    let m = machine();
    assert_eq!(phys_read(&m, LSR, 2), None);
}
