//! Per-instruction interpreter.
//!
//! This module executes one decoded instruction at a time against a hart:
//! 1. **Dispatch:** a single match on the instruction-class tag fans out to
//!    the control-flow, memory, integer, and system groups.
//! 2. **Unaligned memory:** halfword/word accesses that cross alignment are
//!    decomposed into byte accesses; the first failing byte reports the
//!    fault.
//! 3. **Atomics:** LR/SC against the per-hart reservation and the AMO set
//!    under the cross-hart AMO lock.
//! 4. **Retirement:** commit `next_pc`, re-zero `x0`, advance the counters,
//!    and tick `mtime` once per retired instruction.
//!
//! Floating-point coverage is deliberately the data-movement contract only:
//! loads/stores, sign manipulation, and x<->f transfers with NaN boxing;
//! arithmetic opcodes raise illegal instruction.

use crate::common::sign_extend;
use crate::common::{MemAccess, PrivilegeMode, Trap};
use crate::csr;
use crate::hart::Hart;
use crate::isa::opcodes::{funct3, funct5, funct7, op};
use crate::isa::{Decoded, InsnClass, decode16, decode32};
use crate::machine::Machine;
use crate::mmu::{virt_read, virt_write};
use crate::sbi;
use crate::soc::step_timer;
use crate::trap::{check_pending_interrupt, exec_mret, exec_sret, raise_exception};

/// Loads a value of the width selected by a LOAD funct3, decomposing
/// unaligned halfword/word accesses into byte reads.
pub(crate) fn load_value(m: &Machine, cpu: &mut Hart, addr: u32, f3: u32) -> Option<u32> {
    match f3 {
        funct3::LB => {
            let raw = virt_read(m, cpu, addr, 1, MemAccess::Load)?;
            Some(sign_extend(raw & 0xff, 8))
        }
        funct3::LH => {
            let raw = read_halfword(m, cpu, addr)?;
            Some(sign_extend(raw & 0xffff, 16))
        }
        funct3::LW => read_word(m, cpu, addr),
        funct3::LBU => {
            let raw = virt_read(m, cpu, addr, 1, MemAccess::Load)?;
            Some(raw & 0xff)
        }
        funct3::LHU => {
            let raw = read_halfword(m, cpu, addr)?;
            Some(raw & 0xffff)
        }
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(0));
            None
        }
    }
}

fn read_halfword(m: &Machine, cpu: &mut Hart, addr: u32) -> Option<u32> {
    if addr & 1 == 0 {
        return virt_read(m, cpu, addr, 2, MemAccess::Load);
    }
    let b0 = virt_read(m, cpu, addr, 1, MemAccess::Load)?;
    let b1 = virt_read(m, cpu, addr.wrapping_add(1), 1, MemAccess::Load)?;
    Some((b0 & 0xff) | ((b1 & 0xff) << 8))
}

fn read_word(m: &Machine, cpu: &mut Hart, addr: u32) -> Option<u32> {
    if addr & 3 == 0 {
        return virt_read(m, cpu, addr, 4, MemAccess::Load);
    }
    let mut value = 0u32;
    for i in 0..4 {
        let b = virt_read(m, cpu, addr.wrapping_add(i), 1, MemAccess::Load)?;
        value |= (b & 0xff) << (8 * i);
    }
    Some(value)
}

/// Stores a value of the width selected by a STORE funct3, decomposing
/// unaligned accesses into byte writes. A committed store consumes the local
/// reservation as well (cross-hart invalidation happens in `virt_write`).
pub(crate) fn store_value(m: &Machine, cpu: &mut Hart, addr: u32, f3: u32, value: u32) -> bool {
    let ok = match f3 {
        funct3::SB => virt_write(m, cpu, addr, 1, MemAccess::Store, value),
        funct3::SH => {
            if addr & 1 == 0 {
                virt_write(m, cpu, addr, 2, MemAccess::Store, value)
            } else {
                virt_write(m, cpu, addr, 1, MemAccess::Store, value & 0xff)
                    && virt_write(
                        m,
                        cpu,
                        addr.wrapping_add(1),
                        1,
                        MemAccess::Store,
                        (value >> 8) & 0xff,
                    )
            }
        }
        funct3::SW => {
            if addr & 3 == 0 {
                virt_write(m, cpu, addr, 4, MemAccess::Store, value)
            } else {
                (0..4).all(|i| {
                    virt_write(
                        m,
                        cpu,
                        addr.wrapping_add(i),
                        1,
                        MemAccess::Store,
                        (value >> (8 * i)) & 0xff,
                    )
                })
            }
        }
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(0));
            return false;
        }
    };

    if ok {
        m.shared(cpu.hartid).reservation_clear();
    }
    ok
}

fn load_u64(m: &Machine, cpu: &mut Hart, addr: u32) -> Option<u64> {
    let lo = virt_read(m, cpu, addr, 4, MemAccess::Load)?;
    let hi = virt_read(m, cpu, addr.wrapping_add(4), 4, MemAccess::Load)?;
    Some((u64::from(hi) << 32) | u64::from(lo))
}

fn store_u64(m: &Machine, cpu: &mut Hart, addr: u32, value: u64) -> bool {
    virt_write(m, cpu, addr, 4, MemAccess::Store, value as u32)
        && virt_write(
            m,
            cpu,
            addr.wrapping_add(4),
            4,
            MemAccess::Store,
            (value >> 32) as u32,
        )
}

/// NaN-boxes a single-precision value into an FLEN=64 register.
fn nan_box(value: u32) -> u64 {
    0xffff_ffff_0000_0000 | u64::from(value)
}

fn exec_fp_load(m: &Machine, cpu: &mut Hart, d: &Decoded, base: u32, imm: i32) -> bool {
    let addr = base.wrapping_add(imm as u32);
    match d.funct3 {
        funct3::FP_W => {
            let Some(raw) = virt_read(m, cpu, addr, 4, MemAccess::Load) else {
                return false;
            };
            cpu.f[d.rd] = nan_box(raw);
            true
        }
        funct3::FP_D => {
            let Some(raw) = load_u64(m, cpu, addr) else {
                return false;
            };
            cpu.f[d.rd] = raw;
            true
        }
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            false
        }
    }
}

fn exec_fp_store(m: &Machine, cpu: &mut Hart, d: &Decoded, base: u32, imm: i32) -> bool {
    let addr = base.wrapping_add(imm as u32);
    match d.funct3 {
        funct3::FP_W => virt_write(m, cpu, addr, 4, MemAccess::Store, cpu.f[d.rs2] as u32),
        funct3::FP_D => store_u64(m, cpu, addr, cpu.f[d.rs2]),
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            false
        }
    }
}

/// FP computational opcodes: only the sign-manipulation and x<->f transfer
/// subset is modeled; everything else reports unsupported.
fn exec_fp_op(cpu: &mut Hart, d: &Decoded) -> bool {
    let a = cpu.f[d.rs1];
    let b = cpu.f[d.rs2];

    match d.funct7 {
        funct7::FSGNJ_S => {
            let sign_mask = 0x8000_0000u64;
            let mag_mask = 0x7fff_ffffu64;
            let result = match d.funct3 {
                0x0 => (a & mag_mask) | (b & sign_mask),
                0x1 => (a & mag_mask) | (!b & sign_mask),
                0x2 => (a & mag_mask) | ((a ^ b) & sign_mask),
                _ => return false,
            };
            cpu.f[d.rd] = nan_box(result as u32);
            true
        }
        funct7::FSGNJ_D => {
            let sign_mask = 1u64 << 63;
            let mag_mask = !sign_mask;
            let result = match d.funct3 {
                0x0 => (a & mag_mask) | (b & sign_mask),
                0x1 => (a & mag_mask) | (!b & sign_mask),
                0x2 => (a & mag_mask) | ((a ^ b) & sign_mask),
                _ => return false,
            };
            cpu.f[d.rd] = result;
            true
        }
        funct7::FMV_X_W => {
            if d.funct3 != 0 || d.rs2 != 0 {
                return false;
            }
            cpu.write_x(d.rd, a as u32);
            true
        }
        funct7::FMV_W_X => {
            if d.funct3 != 0 || d.rs2 != 0 {
                return false;
            }
            cpu.f[d.rd] = nan_box(cpu.x[d.rs1]);
            true
        }
        _ => false,
    }
}

/// M-extension multiply/divide with the architectural edge cases: division
/// by zero yields all-ones (DIV/DIVU) or the dividend (REM/REMU), and
/// `INT_MIN / -1` yields `INT_MIN` / 0 without trapping.
fn exec_muldiv(cpu: &mut Hart, rd: usize, f3: u32, rs1v: u32, rs2v: u32) -> bool {
    let s1 = rs1v as i32;
    let s2 = rs2v as i32;

    let result = match f3 {
        funct3::MUL => (i64::from(s1) * i64::from(s2)) as u32,
        funct3::MULH => ((i64::from(s1) * i64::from(s2)) >> 32) as u32,
        funct3::MULHSU => ((i64::from(s1) * (i64::from(rs2v))) >> 32) as u32,
        funct3::MULHU => ((u64::from(rs1v) * u64::from(rs2v)) >> 32) as u32,
        funct3::DIV => {
            if rs2v == 0 {
                0xffff_ffff
            } else if s1 == i32::MIN && s2 == -1 {
                i32::MIN as u32
            } else {
                (s1 / s2) as u32
            }
        }
        funct3::DIVU => {
            if rs2v == 0 {
                0xffff_ffff
            } else {
                rs1v / rs2v
            }
        }
        funct3::REM => {
            if rs2v == 0 {
                rs1v
            } else if s1 == i32::MIN && s2 == -1 {
                0
            } else {
                (s1 % s2) as u32
            }
        }
        funct3::REMU => {
            if rs2v == 0 {
                rs1v
            } else {
                rs1v % rs2v
            }
        }
        _ => return false,
    };

    cpu.write_x(rd, result);
    true
}

/// LR/SC and the AMO set.
///
/// The whole read-modify-write window runs under the cross-hart AMO lock;
/// `sc.w` consumes the local reservation on either outcome, and every AMO
/// store clears it like an ordinary store.
fn exec_amo(m: &Machine, cpu: &mut Hart, d: &Decoded) -> bool {
    if d.funct3 != 0x2 {
        raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
        return false;
    }

    let addr = cpu.x[d.rs1];
    if addr & 3 != 0 {
        raise_exception(m, cpu, Trap::LoadAddressMisaligned(addr));
        return false;
    }

    let f5 = d.raw >> 27;
    let rs2v = cpu.x[d.rs2];
    let shared = m.shared(cpu.hartid);

    let _guard = match m.plat.amo_lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if f5 == funct5::LR_W {
        if d.rs2 != 0 {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            return false;
        }
        let Some(old) = virt_read(m, cpu, addr, 4, MemAccess::Load) else {
            return false;
        };
        shared.reservation_set(addr);
        cpu.write_x(d.rd, old);
        return true;
    }

    if f5 == funct5::SC_W {
        let mut status = 1u32;
        if shared.reservation_matches(addr) {
            if !virt_write(m, cpu, addr, 4, MemAccess::Store, rs2v) {
                return false;
            }
            status = 0;
        }
        shared.reservation_clear();
        cpu.write_x(d.rd, status);
        return true;
    }

    let Some(old) = virt_read(m, cpu, addr, 4, MemAccess::Load) else {
        return false;
    };

    let new = match f5 {
        funct5::AMOSWAP_W => rs2v,
        funct5::AMOADD_W => old.wrapping_add(rs2v),
        funct5::AMOXOR_W => old ^ rs2v,
        funct5::AMOAND_W => old & rs2v,
        funct5::AMOOR_W => old | rs2v,
        funct5::AMOMIN_W => {
            if (old as i32) < (rs2v as i32) {
                old
            } else {
                rs2v
            }
        }
        funct5::AMOMAX_W => {
            if (old as i32) > (rs2v as i32) {
                old
            } else {
                rs2v
            }
        }
        funct5::AMOMINU_W => old.min(rs2v),
        funct5::AMOMAXU_W => old.max(rs2v),
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            return false;
        }
    };

    if !virt_write(m, cpu, addr, 4, MemAccess::Store, new) {
        return false;
    }
    shared.reservation_clear();
    cpu.write_x(d.rd, old);
    true
}

/// CSR read-modify-write operations. Returns `false` for unimplemented CSR
/// numbers and reserved funct3 encodings; the caller raises the trap.
fn exec_csr_op(m: &Machine, cpu: &mut Hart, d: &Decoded, rs1v: u32) -> bool {
    let csr_num = (d.raw >> 20) & 0xfff;
    if !csr::is_implemented(csr_num) {
        return false;
    }

    let old = csr::read(m, cpu, csr_num);
    let zimm = (d.rs1 & 0x1f) as u32;

    match d.funct3 {
        funct3::CSRRW => csr::write(m, cpu, csr_num, rs1v),
        funct3::CSRRS => {
            if d.rs1 != 0 {
                csr::write(m, cpu, csr_num, old | rs1v);
            }
        }
        funct3::CSRRC => {
            if d.rs1 != 0 {
                csr::write(m, cpu, csr_num, old & !rs1v);
            }
        }
        funct3::CSRRWI => csr::write(m, cpu, csr_num, zimm),
        funct3::CSRRSI => {
            if zimm != 0 {
                csr::write(m, cpu, csr_num, old | zimm);
            }
        }
        funct3::CSRRCI => {
            if zimm != 0 {
                csr::write(m, cpu, csr_num, old & !zimm);
            }
        }
        _ => return false,
    }

    cpu.write_x(d.rd, old);
    true
}

/// Control-transfer and upper-immediate families (U/J/B plus JALR).
fn exec_cf(m: &Machine, cpu: &mut Hart, d: &Decoded, rs1v: u32, rs2v: u32, next_pc: &mut u32) -> bool {
    match d.opcode {
        op::LUI => {
            cpu.write_x(d.rd, d.imm_u as u32);
            true
        }
        op::AUIPC => {
            cpu.write_x(d.rd, cpu.pc.wrapping_add(d.imm_u as u32));
            true
        }
        op::JAL => {
            cpu.write_x(d.rd, *next_pc);
            *next_pc = cpu.pc.wrapping_add(d.imm_j as u32);
            true
        }
        op::JALR => {
            if d.funct3 != 0 {
                raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                return false;
            }
            let ret = *next_pc;
            *next_pc = rs1v.wrapping_add(d.imm_i as u32) & !1;
            cpu.write_x(d.rd, ret);
            true
        }
        op::BRANCH => {
            let taken = match d.funct3 {
                funct3::BEQ => rs1v == rs2v,
                funct3::BNE => rs1v != rs2v,
                funct3::BLT => (rs1v as i32) < (rs2v as i32),
                funct3::BGE => (rs1v as i32) >= (rs2v as i32),
                funct3::BLTU => rs1v < rs2v,
                funct3::BGEU => rs1v >= rs2v,
                _ => {
                    raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                    return false;
                }
            };
            if taken {
                *next_pc = cpu.pc.wrapping_add(d.imm_b as u32);
            }
            true
        }
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            false
        }
    }
}

/// Integer and FP load/store families.
fn exec_mem(m: &Machine, cpu: &mut Hart, d: &Decoded, rs1v: u32, rs2v: u32) -> bool {
    match d.opcode {
        op::LOAD => {
            let addr = rs1v.wrapping_add(d.imm_i as u32);
            let Some(value) = load_value(m, cpu, addr, d.funct3) else {
                return false;
            };
            cpu.write_x(d.rd, value);
            true
        }
        op::LOAD_FP => exec_fp_load(m, cpu, d, rs1v, d.imm_i),
        op::STORE => {
            let addr = rs1v.wrapping_add(d.imm_s as u32);
            store_value(m, cpu, addr, d.funct3, rs2v)
        }
        op::STORE_FP => exec_fp_store(m, cpu, d, rs1v, d.imm_s),
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            false
        }
    }
}

/// Integer ALU families (OP-IMM and OP, including the M-extension).
fn exec_int(m: &Machine, cpu: &mut Hart, d: &Decoded, rs1v: u32, rs2v: u32) -> bool {
    match d.opcode {
        op::OP_IMM => {
            let imm = d.imm_i as u32;
            let value = match d.funct3 {
                funct3::ADD_SUB => rs1v.wrapping_add(imm),
                funct3::SLT => u32::from((rs1v as i32) < d.imm_i),
                funct3::SLTU => u32::from(rs1v < imm),
                funct3::XOR => rs1v ^ imm,
                funct3::OR => rs1v | imm,
                funct3::AND => rs1v & imm,
                funct3::SLL => rs1v << (d.rs2 as u32),
                funct3::SRL_SRA => match d.funct7 {
                    funct7::BASE => rs1v >> (d.rs2 as u32),
                    funct7::ALT => ((rs1v as i32) >> (d.rs2 as u32)) as u32,
                    _ => {
                        raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                        return false;
                    }
                },
                _ => {
                    raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                    return false;
                }
            };
            cpu.write_x(d.rd, value);
            true
        }
        op::OP => {
            if d.funct7 == funct7::MULDIV {
                if !exec_muldiv(cpu, d.rd, d.funct3, rs1v, rs2v) {
                    raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                    return false;
                }
                return true;
            }
            let value = match d.funct3 {
                funct3::ADD_SUB => match d.funct7 {
                    funct7::BASE => rs1v.wrapping_add(rs2v),
                    funct7::ALT => rs1v.wrapping_sub(rs2v),
                    _ => {
                        raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                        return false;
                    }
                },
                funct3::SLL => rs1v << (rs2v & 0x1f),
                funct3::SLT => u32::from((rs1v as i32) < (rs2v as i32)),
                funct3::SLTU => u32::from(rs1v < rs2v),
                funct3::XOR => rs1v ^ rs2v,
                funct3::SRL_SRA => match d.funct7 {
                    funct7::BASE => rs1v >> (rs2v & 0x1f),
                    funct7::ALT => ((rs1v as i32) >> (rs2v & 0x1f)) as u32,
                    _ => {
                        raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                        return false;
                    }
                },
                funct3::OR => rs1v | rs2v,
                funct3::AND => rs1v & rs2v,
                _ => {
                    raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                    return false;
                }
            };
            cpu.write_x(d.rd, value);
            true
        }
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            false
        }
    }
}

/// SYSTEM family: CSR operations and the privileged instructions.
fn exec_system(m: &Machine, cpu: &mut Hart, d: &Decoded, rs1v: u32, next_pc: &mut u32) -> bool {
    if d.funct3 != 0 {
        if !exec_csr_op(m, cpu, d, rs1v) {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            return false;
        }
        return true;
    }

    if d.funct7 == funct7::SFENCE_VMA {
        // sfence.vma retires as a no-op; this core has no TLB to shoot down.
        if cpu.priv_mode == PrivilegeMode::User {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            return false;
        }
        return true;
    }

    match d.imm_i & 0xfff {
        0x000 => {
            // ecall: the SBI shim may consume S-mode calls.
            if sbi::handle_ecall(m, cpu) {
                return true;
            }
            let trap = match cpu.priv_mode {
                PrivilegeMode::User => Trap::EnvironmentCallFromUMode,
                PrivilegeMode::Supervisor => Trap::EnvironmentCallFromSMode,
                PrivilegeMode::Machine => Trap::EnvironmentCallFromMMode,
            };
            raise_exception(m, cpu, trap);
            false
        }
        0x001 => {
            // ebreak
            raise_exception(m, cpu, Trap::Breakpoint(cpu.pc));
            false
        }
        0x302 => {
            // mret
            match exec_mret(cpu) {
                Some(target) => {
                    *next_pc = target;
                    true
                }
                None => {
                    raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                    false
                }
            }
        }
        0x102 => {
            // sret
            match exec_sret(cpu) {
                Some(target) => {
                    *next_pc = target;
                    true
                }
                None => {
                    raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                    false
                }
            }
        }
        0x105 => {
            // wfi retires as a no-op above U-mode.
            if cpu.priv_mode == PrivilegeMode::User {
                raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                return false;
            }
            true
        }
        _ => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            false
        }
    }
}

/// Executes one decoded instruction and commits its retirement.
///
/// Returns `false` when the instruction trapped; the trap has already been
/// dispatched and no retirement is committed.
pub fn exec_decoded(m: &Machine, cpu: &mut Hart, d: &Decoded) -> bool {
    let mut next_pc = cpu.pc.wrapping_add(u32::from(d.insn_len));
    let rs1v = cpu.x[d.rs1];
    let rs2v = cpu.x[d.rs2];

    let ok = match d.class {
        InsnClass::U | InsnClass::J | InsnClass::B => {
            exec_cf(m, cpu, d, rs1v, rs2v, &mut next_pc)
        }
        InsnClass::I => match d.opcode {
            op::JALR => exec_cf(m, cpu, d, rs1v, rs2v, &mut next_pc),
            op::LOAD | op::LOAD_FP => exec_mem(m, cpu, d, rs1v, rs2v),
            op::OP_IMM => exec_int(m, cpu, d, rs1v, rs2v),
            // fence / fence.i retire as architectural no-ops.
            op::MISC_MEM => true,
            _ => {
                raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                false
            }
        },
        InsnClass::S => exec_mem(m, cpu, d, rs1v, rs2v),
        InsnClass::R => match d.opcode {
            op::OP => exec_int(m, cpu, d, rs1v, rs2v),
            op::AMO => exec_amo(m, cpu, d),
            op::OP_FP => {
                if exec_fp_op(cpu, d) {
                    true
                } else {
                    raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                    false
                }
            }
            _ => {
                raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
                false
            }
        },
        InsnClass::System => exec_system(m, cpu, d, rs1v, &mut next_pc),
        InsnClass::Unknown => {
            raise_exception(m, cpu, Trap::IllegalInstruction(d.raw));
            false
        }
    };

    if !ok {
        return false;
    }

    if cpu.trace {
        tracing::trace!(
            hartid = cpu.hartid,
            pc = format_args!("{:#010x}", cpu.pc),
            raw = format_args!("{:#010x}", d.raw),
            next_pc = format_args!("{next_pc:#010x}"),
            "retire"
        );
    }

    cpu.pc = next_pc;
    cpu.x[0] = 0;
    cpu.cycle += 1;
    cpu.instret += 1;
    step_timer(m);
    true
}

/// Fetches, decodes, and executes one instruction at the current PC.
///
/// A 16-bit probe selects the compressed or full-width path; both feed the
/// same decoded-record executor. Returns `false` when the instruction
/// trapped (fetch fault, misaligned PC, or execution trap).
pub fn exec_one(m: &Machine, cpu: &mut Hart) -> bool {
    if cpu.pc & 1 != 0 {
        raise_exception(m, cpu, Trap::InstructionAddressMisaligned(cpu.pc));
        return false;
    }

    let Some(low) = virt_read(m, cpu, cpu.pc, 2, MemAccess::Fetch) else {
        return false;
    };

    if low & 0x3 != 0x3 {
        let Some(decoded) = decode16(low as u16) else {
            raise_exception(m, cpu, Trap::IllegalInstruction(low & 0xffff));
            return false;
        };
        return exec_decoded(m, cpu, &decoded);
    }

    let Some(word) = virt_read(m, cpu, cpu.pc, 4, MemAccess::Fetch) else {
        return false;
    };
    let decoded = decode32(word);
    exec_decoded(m, cpu, &decoded)
}

/// Fetches and decodes the instruction at `pc` without executing it.
///
/// Used by the TB builder and the JIT helper revalidation path. Returns
/// `None` on a fetch fault (the trap has been raised) or an undecodable
/// compressed encoding.
pub fn decode_at_pc(m: &Machine, cpu: &mut Hart, pc: u32) -> Option<Decoded> {
    if pc & 1 != 0 {
        return None;
    }
    let low = virt_read(m, cpu, pc, 2, MemAccess::Fetch)?;
    if low & 0x3 != 0x3 {
        return decode16(low as u16);
    }
    let word = virt_read(m, cpu, pc, 4, MemAccess::Fetch)?;
    Some(decode32(word))
}

/// Retires up to `budget` instructions (capped at a small burst) with the
/// interpreter, polling interrupts before each step.
///
/// An interrupt that redirects the PC does not count as retirement; a few
/// consecutive redirect-to-same-PC outcomes bail out so a stuck vector
/// cannot spin the scheduler.
pub fn exec_interp_burst(m: &Machine, cpu: &mut Hart, budget: u64) -> u32 {
    /// Upper bound on one burst regardless of remaining budget.
    const INTERP_BURST_MAX: u32 = 32;
    /// Redirects-to-same-PC tolerated before bailing out.
    const IDLE_SPIN_LIMIT: u32 = 4;

    if budget == 0 {
        return 0;
    }

    let shared = m.shared(cpu.hartid);
    let max_steps = u64::min(budget, u64::from(INTERP_BURST_MAX)) as u32;
    let mut retired = 0u32;
    let mut idle_spins = 0u32;

    while retired < max_steps && shared.is_running() {
        let pc_before = cpu.pc;

        if check_pending_interrupt(m, cpu) {
            if !shared.is_running() {
                break;
            }
            if cpu.pc == pc_before {
                idle_spins += 1;
                if idle_spins >= IDLE_SPIN_LIMIT {
                    break;
                }
            } else {
                idle_spins = 0;
            }
            continue;
        }

        if !exec_one(m, cpu) {
            break;
        }

        retired += 1;
        idle_spins = 0;
    }

    retired
}
