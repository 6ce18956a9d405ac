//! SBI shim for S-mode environment calls.
//!
//! When enabled, the shim stands in for M-mode firmware: an `ecall` issued
//! from S-mode is consumed here instead of trapping. It implements:
//! 1. **Legacy:** SET_TIMER, CONSOLE_PUTCHAR/GETCHAR, CLEAR/SEND_IPI,
//!    remote fences (no-op success), SHUTDOWN.
//! 2. **BASE:** spec version 0.2, implementation id/version, probe, and the
//!    machine-id CSR readers.
//! 3. **TIME / IPI / RFENCE:** typed counterparts of the legacy calls.
//! 4. **HSM:** hart start (via the cross-hart mailbox), stop, status; and
//!    **SRST:** system reset via the running flag.
//!
//! Timer delivery under the shim uses STIP (the shim owns the machine
//! timer), which is what the delegated S-mode kernels expect.

use crate::common::PrivilegeMode;
use crate::common::constants::UART_BASE;
use crate::csr;
use crate::hart::Hart;
use crate::isa::abi;
use crate::machine::{HartStartRequest, Machine};
use crate::soc::clint;
use crate::soc::phys_write;

/// Legacy extension: set timer.
const LEGACY_SET_TIMER: u32 = 0x00;
/// Legacy extension: console putchar.
const LEGACY_CONSOLE_PUTCHAR: u32 = 0x01;
/// Legacy extension: console getchar.
const LEGACY_CONSOLE_GETCHAR: u32 = 0x02;
/// Legacy extension: clear IPI.
const LEGACY_CLEAR_IPI: u32 = 0x03;
/// Legacy extension: send IPI.
const LEGACY_SEND_IPI: u32 = 0x04;
/// Legacy extension: remote FENCE.I.
const LEGACY_REMOTE_FENCE_I: u32 = 0x05;
/// Legacy extension: remote SFENCE.VMA.
const LEGACY_REMOTE_SFENCE_VMA: u32 = 0x06;
/// Legacy extension: remote SFENCE.VMA with ASID.
const LEGACY_REMOTE_SFENCE_VMA_ASID: u32 = 0x07;
/// Legacy extension: shutdown.
const LEGACY_SHUTDOWN: u32 = 0x08;

/// BASE extension id.
const EXT_BASE: u32 = 0x10;
/// TIME extension id ("TIME").
const EXT_TIME: u32 = 0x5449_4d45;
/// IPI extension id ("sPI").
const EXT_IPI: u32 = 0x0073_5049;
/// RFENCE extension id ("RFNC").
const EXT_RFENCE: u32 = 0x5246_4e43;
/// HSM extension id ("HSM").
const EXT_HSM: u32 = 0x0048_534d;
/// SRST extension id ("SRST").
const EXT_SRST: u32 = 0x5352_5354;

/// SBI success.
const SBI_SUCCESS: i32 = 0;
/// SBI: not supported.
const SBI_ERR_NOT_SUPPORTED: i32 = -2;
/// SBI: invalid parameter.
const SBI_ERR_INVALID_PARAM: i32 = -3;
/// SBI: already available.
const SBI_ERR_ALREADY_AVAILABLE: i32 = -6;

/// HSM state: started.
const HSM_STATE_STARTED: u32 = 0;
/// HSM state: stopped.
const HSM_STATE_STOPPED: u32 = 1;

/// Implementation id reported by BASE get_impl_id ("RV32").
const IMPL_ID: u32 = 0x5256_3332;
/// Implementation version reported by BASE get_impl_version.
const IMPL_VERSION: u32 = 0x0001_0000;
/// SBI specification version 0.2.
const SPEC_VERSION_0_2: u32 = 0x0000_0002;

fn set_legacy_ret(cpu: &mut Hart, value: i32) {
    cpu.x[abi::REG_A0] = value as u32;
}

fn set_ret(cpu: &mut Hart, error: i32, value: u32) {
    cpu.x[abi::REG_A0] = error as u32;
    cpu.x[abi::REG_A1] = value;
}

/// Reassembles a 64-bit argument from an even/odd register pair.
fn arg_u64(cpu: &Hart, lo_reg: usize) -> u64 {
    u64::from(cpu.x[lo_reg]) | (u64::from(cpu.x[lo_reg + 1]) << 32)
}

fn is_supported_extension(eid: u32) -> bool {
    matches!(
        eid,
        EXT_BASE | EXT_TIME | EXT_IPI | EXT_RFENCE | EXT_HSM | EXT_SRST
    )
}

/// Programs the calling hart's timer comparator and refreshes STIP.
fn set_timer(m: &Machine, cpu: &Hart, stime_value: u64) {
    let _devs = m.plat.lock_mmio();
    m.plat.mtimecmp_store(cpu.hartid, stime_value);
    clint::sync_timer_irq_for_hart(m, cpu.hartid);
    m.timer_refresh_deadline();
}

fn handle_legacy(m: &Machine, cpu: &mut Hart, eid: u32) -> bool {
    match eid {
        LEGACY_SET_TIMER => {
            set_timer(m, cpu, arg_u64(cpu, abi::REG_A0));
            set_legacy_ret(cpu, 0);
            true
        }
        LEGACY_CONSOLE_PUTCHAR => {
            let _ = phys_write(m, UART_BASE, 1, cpu.x[abi::REG_A0] & 0xff);
            set_legacy_ret(cpu, 0);
            true
        }
        LEGACY_CONSOLE_GETCHAR => {
            set_legacy_ret(cpu, -1);
            true
        }
        LEGACY_CLEAR_IPI => {
            m.shared(cpu.hartid).mip_clear_bits(csr::MIP_MSIP);
            set_legacy_ret(cpu, 0);
            true
        }
        LEGACY_SEND_IPI => {
            m.shared(cpu.hartid).mip_set_bits(csr::MIP_MSIP);
            set_legacy_ret(cpu, 0);
            true
        }
        LEGACY_REMOTE_FENCE_I | LEGACY_REMOTE_SFENCE_VMA | LEGACY_REMOTE_SFENCE_VMA_ASID => {
            set_legacy_ret(cpu, 0);
            true
        }
        LEGACY_SHUTDOWN => {
            m.shared(cpu.hartid).set_running(false);
            set_legacy_ret(cpu, 0);
            true
        }
        _ => false,
    }
}

fn handle_base(m: &Machine, cpu: &mut Hart, fid: u32) {
    match fid {
        0 => set_ret(cpu, SBI_SUCCESS, SPEC_VERSION_0_2),
        1 => set_ret(cpu, SBI_SUCCESS, IMPL_ID),
        2 => set_ret(cpu, SBI_SUCCESS, IMPL_VERSION),
        3 => {
            let probed = u32::from(is_supported_extension(cpu.x[abi::REG_A0]));
            set_ret(cpu, SBI_SUCCESS, probed);
        }
        4 => {
            let value = csr::read(m, cpu, csr::MVENDORID);
            set_ret(cpu, SBI_SUCCESS, value);
        }
        5 => {
            let value = csr::read(m, cpu, csr::MARCHID);
            set_ret(cpu, SBI_SUCCESS, value);
        }
        6 => {
            let value = csr::read(m, cpu, csr::MIMPID);
            set_ret(cpu, SBI_SUCCESS, value);
        }
        _ => set_ret(cpu, SBI_ERR_NOT_SUPPORTED, 0),
    }
}

fn handle_time(m: &Machine, cpu: &mut Hart, fid: u32) {
    if fid != 0 {
        set_ret(cpu, SBI_ERR_NOT_SUPPORTED, 0);
        return;
    }
    set_timer(m, cpu, arg_u64(cpu, abi::REG_A0));
    set_ret(cpu, SBI_SUCCESS, 0);
}

fn handle_ipi(m: &Machine, cpu: &mut Hart, fid: u32) {
    if fid != 0 {
        set_ret(cpu, SBI_ERR_NOT_SUPPORTED, 0);
        return;
    }

    let hart_mask = cpu.x[abi::REG_A0];
    let hart_base = cpu.x[abi::REG_A1];

    for bit in 0..32 {
        if hart_mask & (1 << bit) == 0 {
            continue;
        }
        let hartid = hart_base.wrapping_add(bit);
        if let Some(target) = m.shared_checked(hartid) {
            target.mip_set_bits(csr::MIP_SSIP);
        }
    }
    set_ret(cpu, SBI_SUCCESS, 0);
}

fn handle_hsm(m: &Machine, cpu: &mut Hart, fid: u32) {
    let hartid = cpu.x[abi::REG_A0];

    match fid {
        0 => {
            // hart_start
            let Some(target) = m.shared_checked(hartid) else {
                set_ret(cpu, SBI_ERR_INVALID_PARAM, 0);
                return;
            };
            if target.is_running() {
                set_ret(cpu, SBI_ERR_ALREADY_AVAILABLE, 0);
                return;
            }
            // The target's executor applies the request at its next
            // scheduling boundary and raises the running flag itself.
            target.post_start_request(HartStartRequest {
                start_pc: cpu.x[abi::REG_A1],
                opaque: cpu.x[abi::REG_A2],
                csr_image: cpu.csr.clone(),
            });
            set_ret(cpu, SBI_SUCCESS, 0);
        }
        1 => {
            // hart_stop (stops the calling hart)
            m.shared(cpu.hartid).set_running(false);
            set_ret(cpu, SBI_SUCCESS, 0);
        }
        2 => {
            // hart_status
            let Some(target) = m.shared_checked(hartid) else {
                set_ret(cpu, SBI_ERR_INVALID_PARAM, 0);
                return;
            };
            let state = if target.is_running() {
                HSM_STATE_STARTED
            } else {
                HSM_STATE_STOPPED
            };
            set_ret(cpu, SBI_SUCCESS, state);
        }
        _ => set_ret(cpu, SBI_ERR_NOT_SUPPORTED, 0),
    }
}

fn handle_srst(m: &Machine, cpu: &mut Hart, fid: u32) {
    if fid != 0 {
        set_ret(cpu, SBI_ERR_NOT_SUPPORTED, 0);
        return;
    }
    m.shared(cpu.hartid).set_running(false);
    set_ret(cpu, SBI_SUCCESS, 0);
}

/// Attempts to consume an `ecall` as an SBI call.
///
/// Returns whether the call was consumed; when it was, the return registers
/// hold the SBI result and the instruction retires normally. The shim only
/// engages when enabled and the caller is in S-mode.
pub fn handle_ecall(m: &Machine, cpu: &mut Hart) -> bool {
    if !m.opts.enable_sbi_shim || cpu.priv_mode != PrivilegeMode::Supervisor {
        return false;
    }

    let eid = cpu.x[abi::REG_A7];
    let fid = cpu.x[abi::REG_A6];
    tracing::debug!(hartid = cpu.hartid, eid = format_args!("{eid:#x}"), fid, "sbi call");

    if handle_legacy(m, cpu, eid) {
        return true;
    }

    match eid {
        EXT_BASE => handle_base(m, cpu, fid),
        EXT_TIME => handle_time(m, cpu, fid),
        EXT_IPI => handle_ipi(m, cpu, fid),
        EXT_RFENCE => set_ret(cpu, SBI_SUCCESS, 0),
        EXT_HSM => handle_hsm(m, cpu, fid),
        EXT_SRST => handle_srst(m, cpu, fid),
        _ => set_ret(cpu, SBI_ERR_NOT_SUPPORTED, 0),
    }
    true
}
