//! Block compilation: prefix selection, lowering, and template reuse.
//!
//! The compiler walks a line's decoded instructions, selects the longest
//! supported prefix (bounded by the block-length knob, rejected below the
//! minimum), and emits: a prologue that consults the pre-dispatch helper, a
//! lowered sequence per instruction (ALU inline; memory and control flow
//! through helper trampolines), and an epilogue that commits the trailing
//! state and attempts chain-linking. Every immediate carrying a guest PC is
//! recorded in the artifact's relocation table at emitter-derived offsets,
//! so any artifact can be cloned onto a new start address.

use std::sync::OnceLock;

use crate::config::env_bool;
use crate::hart::Hart;
use crate::isa::Decoded;
use crate::isa::opcodes::{funct3, funct7, op};
use crate::jit::emit::{EmitOverflow, Emitter};
use crate::jit::pool::{self, Artifact, MAX_PC_RELOCS};
use crate::jit::runtime::addr;
use crate::stats;
use crate::tb::JitFn;
use crate::tb::cache::{JitState, TbLine};
use crate::tb::config::{DEFAULT_MAX_BLOCK_INSNS, DEFAULT_MIN_PREFIX_INSNS};

/// Worst-case generated bytes per lowered instruction.
const BYTES_PER_INSN: usize = 112;
/// Worst-case generated bytes for prologue plus epilogue.
const EPILOGUE_BYTES: usize = 128;

/// Per-class lowering switches (debug knobs).
struct LoweringPolicy {
    allow_alu: bool,
    allow_mem: bool,
    allow_cf: bool,
}

fn policy() -> &'static LoweringPolicy {
    static POLICY: OnceLock<LoweringPolicy> = OnceLock::new();
    POLICY.get_or_init(|| LoweringPolicy {
        allow_alu: !env_bool("EXPERIMENTAL_JIT_DISABLE_ALU", false),
        allow_mem: !env_bool("EXPERIMENTAL_JIT_DISABLE_MEM", false),
        allow_cf: !env_bool("EXPERIMENTAL_JIT_DISABLE_CF", false),
    })
}

/// Whether the emitter can lower this instruction.
///
/// The supported floor: LUI/AUIPC, the full OP-IMM set, OP without the
/// M-extension, integer loads/stores (via the memory helper), and
/// JAL/JALR/branches (via the control-flow helper). Anything else ends the
/// compiled prefix.
#[must_use]
pub fn insn_supported(d: &Decoded) -> bool {
    let policy = policy();

    match d.opcode {
        op::LUI | op::AUIPC => policy.allow_alu,
        op::OP_IMM => {
            policy.allow_alu
                && match d.funct3 {
                    funct3::SRL_SRA => d.funct7 == funct7::BASE || d.funct7 == funct7::ALT,
                    _ => true,
                }
        }
        op::OP => {
            if !policy.allow_alu || d.funct7 == funct7::MULDIV {
                // M-extension falls back to the interpreter.
                return false;
            }
            match d.funct3 {
                funct3::ADD_SUB | funct3::SRL_SRA => {
                    d.funct7 == funct7::BASE || d.funct7 == funct7::ALT
                }
                _ => true,
            }
        }
        op::LOAD => {
            policy.allow_mem
                && matches!(
                    d.funct3,
                    funct3::LB | funct3::LH | funct3::LW | funct3::LBU | funct3::LHU
                )
        }
        op::STORE => {
            policy.allow_mem && matches!(d.funct3, funct3::SB | funct3::SH | funct3::SW)
        }
        op::JAL => policy.allow_cf,
        op::JALR => policy.allow_cf && d.funct3 == 0,
        op::BRANCH => {
            policy.allow_cf
                && matches!(
                    d.funct3,
                    funct3::BEQ
                        | funct3::BNE
                        | funct3::BLT
                        | funct3::BGE
                        | funct3::BLTU
                        | funct3::BGEU
                )
        }
        _ => false,
    }
}

fn record_reloc(artifact: &mut Artifact, off: usize) -> bool {
    if artifact.pc_relocs.len() >= MAX_PC_RELOCS || off > usize::from(u16::MAX) {
        return false;
    }
    artifact.pc_relocs.push(off as u16);
    true
}

fn x_off(idx: usize) -> u32 {
    Hart::x_offset(idx)
}

/// Prologue: consult the pre-dispatch helper and bail out when it reports a
/// handled event.
fn emit_prologue(e: &mut Emitter) -> Result<(), EmitOverflow> {
    e.push_frame()?;
    e.sub_rsp_8()?;
    e.call_abs(addr::pre_dispatch_addr())?;
    e.add_rsp_8()?;
    e.reload_rsi()?;
    e.reload_rdi()?;
    e.test_eax_eax()?;
    e.jz_rel8(3)?;
    e.pop_frame_ret()
}

/// ALU-class inline lowering.
fn emit_alu(
    e: &mut Emitter,
    d: &Decoded,
    insn_pc: u32,
    artifact: &mut Artifact,
) -> Result<bool, EmitOverflow> {
    match d.opcode {
        op::LUI => {
            e.mov_eax_imm32(d.imm_u as u32)?;
        }
        op::AUIPC => {
            let imm_off = e.mov_eax_imm32(insn_pc.wrapping_add(d.imm_u as u32))?;
            if !record_reloc(artifact, imm_off) {
                return Ok(false);
            }
        }
        op::OP_IMM => {
            e.mov_eax_mem_rsi(x_off(d.rs1))?;
            match d.funct3 {
                funct3::ADD_SUB => {
                    if d.imm_i != 0 {
                        e.add_eax_imm32(d.imm_i as u32)?;
                    }
                }
                funct3::SLL => e.shl_eax_imm8(d.rs2 as u8)?,
                funct3::SLT => {
                    e.cmp_eax_imm32(d.imm_i as u32)?;
                    e.setl_al()?;
                    e.movzx_eax_al()?;
                }
                funct3::SLTU => {
                    e.cmp_eax_imm32(d.imm_i as u32)?;
                    e.setb_al()?;
                    e.movzx_eax_al()?;
                }
                funct3::XOR => e.xor_eax_imm32(d.imm_i as u32)?,
                funct3::SRL_SRA => {
                    if d.funct7 == funct7::BASE {
                        e.shr_eax_imm8(d.rs2 as u8)?;
                    } else if d.funct7 == funct7::ALT {
                        e.sar_eax_imm8(d.rs2 as u8)?;
                    } else {
                        return Ok(false);
                    }
                }
                funct3::OR => e.or_eax_imm32(d.imm_i as u32)?,
                funct3::AND => e.and_eax_imm32(d.imm_i as u32)?,
                _ => return Ok(false),
            }
        }
        op::OP => {
            if d.funct7 == funct7::MULDIV {
                return Ok(false);
            }
            e.mov_eax_mem_rsi(x_off(d.rs1))?;
            e.mov_ecx_mem_rsi(x_off(d.rs2))?;
            match d.funct3 {
                funct3::ADD_SUB => {
                    if d.funct7 == funct7::BASE {
                        e.add_eax_ecx()?;
                    } else if d.funct7 == funct7::ALT {
                        e.sub_eax_ecx()?;
                    } else {
                        return Ok(false);
                    }
                }
                funct3::SLL => e.shl_eax_cl_masked()?,
                funct3::SLT => {
                    e.cmp_eax_ecx()?;
                    e.setl_al()?;
                    e.movzx_eax_al()?;
                }
                funct3::SLTU => {
                    e.cmp_eax_ecx()?;
                    e.setb_al()?;
                    e.movzx_eax_al()?;
                }
                funct3::XOR => e.xor_eax_ecx()?,
                funct3::SRL_SRA => {
                    if d.funct7 == funct7::BASE {
                        e.shr_eax_cl_masked()?;
                    } else if d.funct7 == funct7::ALT {
                        e.sar_eax_cl_masked()?;
                    } else {
                        return Ok(false);
                    }
                }
                funct3::OR => e.or_eax_ecx()?,
                funct3::AND => e.and_eax_ecx()?,
                _ => return Ok(false),
            }
        }
        _ => return Ok(false),
    }

    if d.rd != 0 {
        e.mov_mem_rsi_eax(x_off(d.rd))?;
    }
    Ok(true)
}

/// Memory-class lowering: trampoline into the memory helper, returning on a
/// reported fault and reloading the frame registers otherwise.
fn emit_mem_helper(
    e: &mut Emitter,
    helper_d: *const Decoded,
    insn_pc: u32,
    retired_before: u32,
    artifact: &mut Artifact,
) -> Result<bool, EmitOverflow> {
    e.sub_rsp_8()?;
    e.mov_rdx_imm64(helper_d as u64)?;
    let imm_off = e.mov_ecx_imm32(insn_pc)?;
    e.mov_r8d_imm32(retired_before)?;
    e.call_abs(addr::exec_mem_addr())?;
    e.add_rsp_8()?;
    e.test_eax_eax()?;
    e.jz_rel8(3)?;
    e.pop_frame_ret()?;
    e.reload_rsi()?;
    e.reload_rdi()?;
    Ok(record_reloc(artifact, imm_off))
}

/// Control-flow-class lowering: trampoline into the control-flow helper and
/// return its result unconditionally (the helper committed the block).
fn emit_cf_helper(
    e: &mut Emitter,
    helper_d: *const Decoded,
    insn_pc: u32,
    retired_before: u32,
    artifact: &mut Artifact,
) -> Result<bool, EmitOverflow> {
    e.sub_rsp_8()?;
    e.mov_rdx_imm64(helper_d as u64)?;
    let imm_off = e.mov_ecx_imm32(insn_pc)?;
    e.mov_r8d_imm32(retired_before)?;
    e.call_abs(addr::exec_cf_addr())?;
    e.add_rsp_8()?;
    e.pop_frame_ret()?;
    Ok(record_reloc(artifact, imm_off))
}

/// Epilogue: commit the fall-through state, then consult the chain helper
/// and either tail-call the successor block or return.
///
/// Both PC-carrying immediates (the commit `next_pc` and the block's own
/// `chain_from_pc`) are recorded as relocations at the offsets the emitter
/// reports, which keeps every artifact relocatable.
fn emit_epilogue(
    e: &mut Emitter,
    chain_from_pc: u32,
    next_pc: u32,
    retired: u32,
    artifact: &mut Artifact,
) -> Result<bool, EmitOverflow> {
    e.sub_rsp_8()?;
    let next_pc_off = e.mov_edx_imm32(next_pc)?;
    e.mov_ecx_imm32(retired)?;
    e.call_abs(addr::block_commit_addr())?;
    e.add_rsp_8()?;
    if !record_reloc(artifact, next_pc_off) {
        return Ok(false);
    }

    e.push_rax()?;
    e.reload_rsi_off8()?;
    e.reload_rdi_off16()?;
    let from_pc_off = e.mov_edx_imm32(chain_from_pc)?;
    e.call_abs(addr::chain_next_pc_addr())?;
    if !record_reloc(artifact, from_pc_off) {
        return Ok(false);
    }

    e.test_rax_rax()?;
    e.jnz_rel8(4)?;
    e.pop_rax()?;
    e.pop_frame_ret()?;
    e.add_rsp_8()?;
    e.pop_frame_jmp_rax()?;
    Ok(true)
}

/// PC the epilogue falls through to after the compiled prefix.
fn prefix_next_pc(decoded: &[Decoded], pcs: &[u32], total: u8, prefix: u8) -> u32 {
    if prefix < total {
        return pcs[prefix as usize];
    }
    let last = prefix as usize - 1;
    pcs[last].wrapping_add(u32::from(decoded[last].insn_len))
}

/// Length of the longest supported prefix, capped at `max_jit_insns`.
fn supported_prefix(decoded: &[Decoded], count: u8, max_jit_insns: u8) -> u8 {
    let mut jit_count = 0u8;
    while jit_count < count && jit_count < max_jit_insns {
        if !insn_supported(&decoded[jit_count as usize]) {
            break;
        }
        jit_count += 1;
    }
    jit_count
}

/// Computes the template key (prefix length and signature) for a decode.
///
/// Returns `None` when the supported prefix is shorter than the minimum.
#[must_use]
pub fn template_key(
    decoded: &[Decoded],
    pcs: &[u32],
    count: u8,
    mut max_jit_insns: u8,
    mut min_prefix_insns: u8,
) -> Option<(u8, u64)> {
    if count == 0 {
        return None;
    }
    if max_jit_insns == 0 {
        max_jit_insns = DEFAULT_MAX_BLOCK_INSNS as u8;
    }
    if min_prefix_insns == 0 {
        min_prefix_insns = DEFAULT_MIN_PREFIX_INSNS as u8;
    }
    min_prefix_insns = min_prefix_insns.min(max_jit_insns);

    let jit_count = supported_prefix(decoded, count, max_jit_insns);
    if jit_count < min_prefix_insns {
        return None;
    }

    let sig = pool::prefix_signature(decoded, pcs, jit_count);
    if sig == 0 {
        return None;
    }
    Some((jit_count, sig))
}

/// Compiles the supported prefix of a decoded snapshot into native code.
///
/// The snapshot is parked in the pool arena so the helper-operand pointers
/// embedded in the generated code outlive the artifact. Returns `None` on
/// rejection (unsupported/short prefix), pool exhaustion, or emit overflow.
#[must_use]
pub fn compile_from_snapshot(
    decoded: &[Decoded],
    pcs: &[u32],
    count: u8,
    chain_from_pc: u32,
    mut max_jit_insns: u8,
    mut min_prefix_insns: u8,
) -> Option<Artifact> {
    if count == 0 {
        return None;
    }
    if max_jit_insns == 0 {
        max_jit_insns = DEFAULT_MAX_BLOCK_INSNS as u8;
    }
    if min_prefix_insns == 0 {
        min_prefix_insns = DEFAULT_MIN_PREFIX_INSNS as u8;
    }
    min_prefix_insns = min_prefix_insns.min(max_jit_insns);

    stats::jit().compile_attempts.incr();

    let jit_count = supported_prefix(decoded, count, max_jit_insns);
    if jit_count == 0 {
        stats::jit().compile_fail_unsupported_prefix.incr();
        return None;
    }
    if jit_count < min_prefix_insns {
        stats::jit().compile_fail_too_short.incr();
        return None;
    }

    let code_bytes = jit_count as usize * BYTES_PER_INSN + EPILOGUE_BYTES;
    let Some(code_ptr) = pool::alloc(code_bytes) else {
        stats::jit().compile_fail_alloc.incr();
        return None;
    };

    // Helper operands must outlive the code; park a snapshot in the arena.
    let snapshot: Box<[Decoded]> = decoded[..jit_count as usize].into();
    let helper_base = pool::park_snapshot(snapshot);

    let mut artifact = Artifact {
        jit_count,
        // Placeholder entry point until emission finishes.
        jit_fn: dangling_entry,
        code_size: 0,
        base_start_pc: pcs[0],
        pc_relocs: Vec::new(),
    };

    let mut e = Emitter::new(code_ptr, code_bytes);
    let emitted = (|| -> Result<bool, EmitOverflow> {
        emit_prologue(&mut e)?;

        for i in 0..jit_count {
            let d = &decoded[i as usize];
            let insn_pc = pcs[i as usize];
            // SAFETY: `helper_base` points at `jit_count` parked records.
            let helper_d = unsafe { helper_base.add(i as usize) };
            let ok = match d.opcode {
                op::LUI | op::AUIPC | op::OP_IMM | op::OP => {
                    emit_alu(&mut e, d, insn_pc, &mut artifact)?
                }
                op::LOAD | op::STORE => {
                    emit_mem_helper(&mut e, helper_d, insn_pc, u32::from(i), &mut artifact)?
                }
                op::BRANCH | op::JALR | op::JAL => {
                    emit_cf_helper(&mut e, helper_d, insn_pc, u32::from(i), &mut artifact)?
                }
                _ => false,
            };
            if !ok {
                return Ok(false);
            }
        }

        let next_pc = prefix_next_pc(decoded, pcs, count, jit_count);
        emit_epilogue(&mut e, chain_from_pc, next_pc, u32::from(jit_count), &mut artifact)
    })();

    match emitted {
        Ok(true) => {}
        Ok(false) | Err(EmitOverflow) => {
            stats::jit().compile_fail_emit.incr();
            return None;
        }
    }

    artifact.code_size = e.pos() as u32;
    // SAFETY: the allocation now holds a complete block whose ABI matches
    // `JitFn`; the pool bytes are never rewritten after this point.
    artifact.jit_fn = unsafe { std::mem::transmute::<*mut u8, JitFn>(code_ptr) };

    stats::jit().compile_success.incr();
    stats::jit().compile_prefix_insns.add(u64::from(jit_count));
    if jit_count < count && jit_count == max_jit_insns {
        stats::jit().compile_prefix_truncated.incr();
    }
    Some(artifact)
}

/// Placeholder entry point used while an artifact is under construction.
unsafe extern "C" fn dangling_entry(_m: *const crate::machine::Machine, _cpu: *mut Hart) -> i32 {
    0
}

/// Installs a compiled artifact into a line.
pub fn line_apply_jit(line: &mut TbLine, artifact: &Artifact) {
    line.jit_valid = true;
    line.jit_state = JitState::Ready;
    line.jit_async_wait = 0;
    line.jit_async_prefetched = false;
    line.jit_count = artifact.jit_count;
    line.jit_fn = Some(artifact.jit_fn);
    line.jit_code_size = artifact.code_size;
    line.chain_valid = false;
    line.chain_pc = 0;
    line.chain_fn = None;
}

/// Foreground compile of a line: template lookup first, then a fresh
/// emission keyed for chaining from the line's own start PC.
pub fn try_compile(max_jit_insns: u8, min_prefix_insns: u8, line: &mut TbLine) -> bool {
    if !line.valid || line.count == 0 {
        return false;
    }

    line.jit_tried = true;
    line.clear_jit(JitState::None);

    if let Some((jit_count, sig)) =
        template_key(&line.decoded, &line.pcs, line.count, max_jit_insns, min_prefix_insns)
    {
        if let Some(artifact) = pool::template_lookup(&line.decoded, &line.pcs, jit_count, sig) {
            line_apply_jit(line, &artifact);
            return true;
        }
    }

    if pool::is_exhausted() {
        stats::jit().compile_fail_alloc.incr();
        line.jit_state = JitState::Failed;
        return false;
    }

    let Some(artifact) = compile_from_snapshot(
        &line.decoded,
        &line.pcs,
        line.count,
        line.start_pc,
        max_jit_insns,
        min_prefix_insns,
    ) else {
        line.jit_state = JitState::Failed;
        return false;
    };

    line_apply_jit(line, &artifact);
    true
}
