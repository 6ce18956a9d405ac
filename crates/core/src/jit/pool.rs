//! Executable code pool and template caches.
//!
//! Process-wide singletons with explicit initialization and reset:
//! 1. **Code pool:** one `mmap`ed read/write/execute region, bump-allocated
//!    under a mutex; exhaustion latches a flag that downgrades further
//!    compiles to failures without aborting execution.
//! 2. **Snapshot arena:** decoded-operand arrays referenced by generated
//!    code; they live as long as the pool so embedded pointers stay valid.
//! 3. **Template caches:** content-addressed compiled artifacts — an
//!    exact-prefix cache keyed by (bytes, PCs, lengths) for bit-identical
//!    reuse, and a structure cache keyed by (bytes, lengths) that relocates
//!    clones onto new start addresses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::isa::Decoded;
use crate::stats;
use crate::tb::JitFn;
use crate::tb::cache::TB_MAX_INSNS;
use crate::tb::config::{DEFAULT_POOL_MB, MAX_POOL_MB};

/// Upper bound on relocation sites per artifact: one per instruction plus
/// the epilogue's commit and chain immediates.
pub const MAX_PC_RELOCS: usize = TB_MAX_INSNS + 8;

/// A compiled block and the metadata needed to reuse it.
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Number of guest instructions the compiled prefix covers.
    pub jit_count: u8,
    /// Entry point inside the code pool.
    pub jit_fn: JitFn,
    /// Generated code size in bytes.
    pub code_size: u32,
    /// Start PC the code was emitted for (relocation origin).
    pub base_start_pc: u32,
    /// Byte offsets of every 32-bit immediate that encodes a guest PC.
    pub pc_relocs: Vec<u16>,
}

struct PoolInner {
    base: *mut u8,
    cap: usize,
    used: usize,
}

// SAFETY: the raw pool pointer is only dereferenced while holding the pool
// mutex (allocation/copy) or through artifact entry points whose bytes are
// never rewritten after publication.
unsafe impl Send for PoolInner {}

struct Pool {
    inner: Mutex<PoolInner>,
    exhausted: AtomicBool,
    snapshots: Mutex<Vec<Box<[Decoded]>>>,
}

static POOL: OnceLock<Pool> = OnceLock::new();

fn pool_size_from_env() -> usize {
    let mb = crate::config::env_u32("EXPERIMENTAL_JIT_POOL_MB", DEFAULT_POOL_MB, 1, MAX_POOL_MB);
    mb as usize * 1024 * 1024
}

fn pool() -> &'static Pool {
    POOL.get_or_init(|| {
        let cap = pool_size_from_env();
        // SAFETY: anonymous private mapping with no file descriptor; a
        // failed map is reported as MAP_FAILED and latched as exhaustion.
        let mem = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                cap,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if mem == libc::MAP_FAILED {
            tracing::warn!(cap, "JIT code pool mapping failed; JIT disabled");
            return Pool {
                inner: Mutex::new(PoolInner {
                    base: std::ptr::null_mut(),
                    cap: 0,
                    used: 0,
                }),
                exhausted: AtomicBool::new(true),
                snapshots: Mutex::new(Vec::new()),
            };
        }

        Pool {
            inner: Mutex::new(PoolInner {
                base: mem.cast::<u8>(),
                cap,
                used: 0,
            }),
            exhausted: AtomicBool::new(false),
            snapshots: Mutex::new(Vec::new()),
        }
    })
}

/// Whether the code pool has latched exhaustion.
#[must_use]
pub fn is_exhausted() -> bool {
    pool().exhausted.load(Ordering::Relaxed)
}

/// Bump-allocates `bytes` of executable memory, 16-byte aligned.
///
/// Returns `None` (and latches exhaustion) when the pool is full.
pub fn alloc(bytes: usize) -> Option<*mut u8> {
    if bytes == 0 {
        return None;
    }

    let p = pool();
    let mut inner = match p.inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if inner.base.is_null() {
        return None;
    }

    let aligned = (inner.used + 15) & !15;
    if aligned + bytes > inner.cap {
        p.exhausted.store(true, Ordering::Relaxed);
        return None;
    }

    // SAFETY: `aligned + bytes <= cap` keeps the pointer inside the mapping.
    let out = unsafe { inner.base.add(aligned) };
    inner.used = aligned + bytes;
    Some(out)
}

/// Parks a decoded-operand snapshot in the arena and returns its address.
///
/// The snapshot outlives every artifact that embeds the pointer: the arena
/// is only cleared together with the pool.
pub fn park_snapshot(snapshot: Box<[Decoded]>) -> *const Decoded {
    let ptr = snapshot.as_ptr();
    let mut arena = match pool().snapshots.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    arena.push(snapshot);
    ptr
}

/// Number of template cache lines (power of two, indexed by signature).
const TEMPLATE_LINES: usize = 1024;

/// An exact-prefix template entry.
#[derive(Clone)]
struct TemplateLine {
    jit_count: u8,
    prefix_sig: u64,
    pcs: Vec<u32>,
    raw: Vec<u32>,
    insn_len: Vec<u8>,
    artifact: Artifact,
}

/// A structure-keyed template entry (PC-relocatable).
#[derive(Clone)]
struct StructTemplateLine {
    jit_count: u8,
    struct_sig: u64,
    raw: Vec<u32>,
    insn_len: Vec<u8>,
    artifact: Artifact,
}

static TEMPLATE_CACHE: OnceLock<Mutex<Vec<Option<TemplateLine>>>> = OnceLock::new();
static STRUCT_CACHE: OnceLock<Mutex<Vec<Option<StructTemplateLine>>>> = OnceLock::new();

fn template_cache() -> &'static Mutex<Vec<Option<TemplateLine>>> {
    TEMPLATE_CACHE.get_or_init(|| Mutex::new(vec![None; TEMPLATE_LINES]))
}

fn struct_cache() -> &'static Mutex<Vec<Option<StructTemplateLine>>> {
    STRUCT_CACHE.get_or_init(|| Mutex::new(vec![None; TEMPLATE_LINES]))
}

/// FNV-1a over (PC, raw bytes, encoded length) per prefix instruction.
#[must_use]
pub fn prefix_signature(decoded: &[Decoded], pcs: &[u32], count: u8) -> u64 {
    const FNV_OFFSET: u64 = 1_469_598_103_934_665_603;
    const FNV_PRIME: u64 = 1_099_511_628_211;

    if count == 0 {
        return 0;
    }

    let mut h = FNV_OFFSET;
    for i in 0..count as usize {
        h ^= u64::from(pcs[i]);
        h = h.wrapping_mul(FNV_PRIME);
        h ^= u64::from(decoded[i].raw);
        h = h.wrapping_mul(FNV_PRIME);
        h ^= u64::from(decoded[i].insn_len);
        h = h.wrapping_mul(FNV_PRIME);
    }
    if h == 0 { 1 } else { h }
}

/// FNV-1a over (raw bytes, encoded length) only, permitting PC relocation.
#[must_use]
pub fn structure_signature(decoded: &[Decoded], count: u8) -> u64 {
    const FNV_OFFSET: u64 = 1_469_598_103_934_665_603;
    const FNV_PRIME: u64 = 1_099_511_628_211;

    if count == 0 || count as usize > TB_MAX_INSNS {
        return 0;
    }

    let mut h = FNV_OFFSET;
    for i in 0..count as usize {
        h ^= u64::from(decoded[i].raw);
        h = h.wrapping_mul(FNV_PRIME);
        h ^= u64::from(decoded[i].insn_len);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h ^= u64::from(count);
    h = h.wrapping_mul(FNV_PRIME);
    if h == 0 { 1 } else { h }
}

/// Looks up a bit-identical compiled prefix.
#[must_use]
pub fn template_lookup(
    decoded: &[Decoded],
    pcs: &[u32],
    jit_count: u8,
    prefix_sig: u64,
) -> Option<Artifact> {
    if jit_count == 0 || prefix_sig == 0 {
        return None;
    }

    let idx = (prefix_sig as usize) & (TEMPLATE_LINES - 1);
    let cache = match template_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let line = cache[idx].as_ref()?;
    if line.jit_count != jit_count || line.prefix_sig != prefix_sig {
        return None;
    }
    for i in 0..jit_count as usize {
        if line.pcs[i] != pcs[i]
            || line.raw[i] != decoded[i].raw
            || line.insn_len[i] != decoded[i].insn_len
        {
            return None;
        }
    }

    stats::jit().compile_template_hit.incr();
    Some(line.artifact.clone())
}

/// Publishes a compiled prefix into the exact-prefix template cache.
pub fn template_store(decoded: &[Decoded], pcs: &[u32], jit_count: u8, prefix_sig: u64, artifact: &Artifact) {
    if jit_count == 0 || prefix_sig == 0 || artifact.jit_count != jit_count {
        return;
    }

    let idx = (prefix_sig as usize) & (TEMPLATE_LINES - 1);
    let mut cache = match template_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    cache[idx] = Some(TemplateLine {
        jit_count,
        prefix_sig,
        pcs: pcs[..jit_count as usize].to_vec(),
        raw: decoded[..jit_count as usize].iter().map(|d| d.raw).collect(),
        insn_len: decoded[..jit_count as usize]
            .iter()
            .map(|d| d.insn_len)
            .collect(),
        artifact: artifact.clone(),
    });
    stats::jit().compile_template_store.incr();
}

/// Clones a template's code, patching every recorded PC immediate by the
/// delta between the template's origin and `start_pc`.
fn clone_with_delta(template: &Artifact, start_pc: u32) -> Option<Artifact> {
    if template.code_size == 0 {
        return None;
    }

    let dst = alloc(template.code_size as usize).or_else(|| {
        stats::jit().compile_fail_alloc.incr();
        None
    })?;
    let src = template.jit_fn as usize as *const u8;

    // SAFETY: `src` points at `code_size` published pool bytes; `dst` was
    // just allocated with the same length.
    unsafe {
        std::ptr::copy_nonoverlapping(src, dst, template.code_size as usize);
    }

    let delta = start_pc.wrapping_sub(template.base_start_pc);
    if delta != 0 {
        for &off in &template.pc_relocs {
            if u32::from(off) + 4 > template.code_size {
                return None;
            }
            // SAFETY: the reloc offset was bounds-checked against the copy.
            unsafe {
                let imm = dst.add(off as usize);
                let value = imm.cast::<u32>().read_unaligned().wrapping_add(delta);
                imm.cast::<u32>().write_unaligned(value);
            }
        }
    }

    let mut artifact = template.clone();
    // SAFETY: `dst` holds a complete, patched copy of a published artifact
    // with the same ABI as the original entry point.
    artifact.jit_fn = unsafe { std::mem::transmute::<*mut u8, JitFn>(dst) };
    artifact.base_start_pc = start_pc;
    Some(artifact)
}

/// Looks up a structurally identical prefix and relocates it to `start_pc`.
#[must_use]
pub fn struct_template_lookup(decoded: &[Decoded], jit_count: u8, start_pc: u32) -> Option<Artifact> {
    let sig = structure_signature(decoded, jit_count);
    if sig == 0 {
        return None;
    }

    let idx = (sig as usize) & (TEMPLATE_LINES - 1);
    let template = {
        let cache = match struct_cache().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let line = cache[idx].as_ref()?;
        if line.jit_count != jit_count
            || line.struct_sig != sig
            || line.artifact.jit_count != jit_count
            || line.artifact.pc_relocs.is_empty()
        {
            return None;
        }
        for i in 0..jit_count as usize {
            if line.raw[i] != decoded[i].raw || line.insn_len[i] != decoded[i].insn_len {
                return None;
            }
        }
        line.artifact.clone()
    };

    let artifact = clone_with_delta(&template, start_pc)?;
    stats::jit().compile_struct_hit.incr();
    stats::jit().compile_template_hit.incr();
    Some(artifact)
}

/// Publishes a relocatable compiled prefix into the structure cache.
pub fn struct_template_store(decoded: &[Decoded], jit_count: u8, artifact: &Artifact) {
    if jit_count == 0 || artifact.jit_count != jit_count || artifact.pc_relocs.is_empty() {
        return;
    }
    let sig = structure_signature(decoded, jit_count);
    if sig == 0 {
        return;
    }

    let idx = (sig as usize) & (TEMPLATE_LINES - 1);
    let mut cache = match struct_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    cache[idx] = Some(StructTemplateLine {
        jit_count,
        struct_sig: sig,
        raw: decoded[..jit_count as usize].iter().map(|d| d.raw).collect(),
        insn_len: decoded[..jit_count as usize]
            .iter()
            .map(|d| d.insn_len)
            .collect(),
        artifact: artifact.clone(),
    });
    stats::jit().compile_struct_store.incr();
    stats::jit().compile_template_store.incr();
}
