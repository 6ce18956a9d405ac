//! CLINT tests: MSIP/MTIMECMP/MTIME registers, wake-up, timer delivery.

use pretty_assertions::assert_eq;

use crate::common::harness::{machine, machine_with};
use rv32sim_core::csr::{MIP_MSIP, MIP_MTIP, MIP_STIP};
use rv32sim_core::soc::{phys_read, phys_write, step_timer};

const CLINT: u32 = 0x0200_0000;
const MSIP0: u32 = CLINT;
const MTIMECMP0: u32 = CLINT + 0x4000;
const MTIME: u32 = CLINT + 0xbff8;

#[test]
fn msip_write_sets_pending_and_reads_back() {
    let m = machine();
    assert!(phys_write(&m, MSIP0, 4, 1));
    assert_eq!(phys_read(&m, MSIP0, 4), Some(1));
    assert_ne!(m.shared(0).mip_load() & MIP_MSIP, 0);

    assert!(phys_write(&m, MSIP0, 4, 0));
    assert_eq!(m.shared(0).mip_load() & MIP_MSIP, 0);
}

#[test]
fn msip_only_writes_bit_zero() {
    let m = machine();
    assert!(phys_write(&m, MSIP0, 4, 0xff));
    assert_eq!(phys_read(&m, MSIP0, 4), Some(1));
}

#[test]
fn msip_wakes_a_stopped_hart() {
    let m = machine_with(|opts| opts.hart_count = 2);
    assert!(!m.shared(1).is_running());
    assert!(phys_write(&m, CLINT + 4, 4, 1));
    assert!(m.shared(1).is_running(), "MSIP raise wakes the hart");
    assert_ne!(m.shared(1).mip_load() & MIP_MSIP, 0);
}

#[test]
fn mtimecmp_halves_read_back() {
    let m = machine();
    assert!(phys_write(&m, MTIMECMP0, 4, 0x9abc_def0));
    assert!(phys_write(&m, MTIMECMP0 + 4, 4, 0x1234_5678));
    assert_eq!(phys_read(&m, MTIMECMP0, 4), Some(0x9abc_def0));
    assert_eq!(phys_read(&m, MTIMECMP0 + 4, 4), Some(0x1234_5678));
    assert_eq!(m.plat.mtimecmp_load(0), 0x1234_5678_9abc_def0);
}

#[test]
fn mtime_is_writable_and_reevaluates() {
    let m = machine();
    assert!(phys_write(&m, MTIMECMP0, 4, 50));
    assert!(phys_write(&m, MTIMECMP0 + 4, 4, 0));
    assert_eq!(m.shared(0).mip_load() & MIP_MTIP, 0);

    assert!(phys_write(&m, MTIME, 4, 60));
    assert_ne!(
        m.shared(0).mip_load() & MIP_MTIP,
        0,
        "MTIME write past the comparator raises MTIP"
    );
}

#[test]
fn timer_fires_at_the_comparator() {
    let m = machine();
    assert!(phys_write(&m, MTIMECMP0, 4, 5));
    assert!(phys_write(&m, MTIMECMP0 + 4, 4, 0));

    for _ in 0..4 {
        step_timer(&m);
        assert_eq!(m.shared(0).mip_load() & MIP_MTIP, 0);
    }
    step_timer(&m);
    assert_ne!(m.shared(0).mip_load() & MIP_MTIP, 0, "mtime reached mtimecmp");
}

#[test]
fn sbi_shim_delivers_timer_as_stip() {
    let m = machine_with(|opts| opts.enable_sbi_shim = true);
    assert!(phys_write(&m, MTIMECMP0, 4, 3));
    assert!(phys_write(&m, MTIMECMP0 + 4, 4, 0));

    for _ in 0..3 {
        step_timer(&m);
    }
    let mip = m.shared(0).mip_load();
    assert_ne!(mip & MIP_STIP, 0, "shim mode uses STIP");
    assert_eq!(mip & MIP_MTIP, 0, "MTIP suppressed under the shim");
}

#[test]
fn deadline_cache_tracks_future_comparators() {
    let m = machine();
    assert_eq!(m.plat.next_timer_deadline(), u64::MAX);
    assert!(phys_write(&m, MTIMECMP0, 4, 123));
    assert!(phys_write(&m, MTIMECMP0 + 4, 4, 0));
    assert_eq!(m.plat.next_timer_deadline(), 123);
}

#[test]
fn unknown_offsets_read_zero() {
    let m = machine();
    assert_eq!(phys_read(&m, CLINT + 0x8000, 4), Some(0));
}
