//! Guest image loading.
//!
//! Two formats feed guest memory:
//! 1. **ELF32:** little-endian RISC-V `ET_EXEC`/`ET_DYN` images; every
//!    `PT_LOAD` segment lands at its `p_paddr` (falling back to `p_vaddr`
//!    when the physical address is zero) and the entry point is returned.
//! 2. **Raw:** anything else is copied verbatim to a caller-supplied
//!    physical address.
//!
//! `load_image_auto` sniffs the ELF magic and class to pick between them.

use object::elf;
use object::read::elf::{ElfFile32, FileHeader, ProgramHeader};

use crate::machine::Machine;

/// Errors loading a guest image.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("failed to read '{path}': {source}")]
    Io {
        /// Path of the image.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The ELF image could not be parsed.
    #[error("failed to parse ELF image '{path}': {source}")]
    Elf {
        /// Path of the image.
        path: String,
        /// Underlying parse error.
        #[source]
        source: object::read::Error,
    },
    /// The image is not a loadable 32-bit little-endian RISC-V ELF.
    #[error("'{path}' is not a loadable ELF32 RISC-V image")]
    UnsupportedElf {
        /// Path of the image.
        path: String,
    },
    /// A segment or blob does not fit in guest DRAM.
    #[error("image '{path}' does not fit at {addr:#010x} (+{len} bytes)")]
    OutOfRange {
        /// Path of the image.
        path: String,
        /// Physical load address.
        addr: u32,
        /// Length in bytes.
        len: u32,
    },
}

/// Outcome of an automatic image load.
#[derive(Clone, Copy, Debug)]
pub struct LoadedImage {
    /// ELF entry point, when the image carried one.
    pub entry: Option<u32>,
    /// Bytes placed in guest memory.
    pub size: u32,
}

fn read_file(path: &str) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_owned(),
        source,
    })
}

fn place(m: &mut Machine, path: &str, addr: u32, data: &[u8]) -> Result<(), LoadError> {
    let len = data.len() as u32;
    let Some(dst) = m.plat.dram_slice_mut(addr, len) else {
        return Err(LoadError::OutOfRange {
            path: path.to_owned(),
            addr,
            len,
        });
    };
    dst.copy_from_slice(data);
    Ok(())
}

fn is_elf32(data: &[u8]) -> bool {
    data.len() >= 5
        && data[..4] == elf::ELFMAG
        && data[4] == elf::ELFCLASS32
}

/// Loads an ELF32 RISC-V image, placing each `PT_LOAD` segment and
/// returning the entry point.
///
/// # Errors
///
/// Fails on I/O, parse, an unsupported machine/class/type, or a segment
/// outside guest DRAM.
pub fn load_elf32(m: &mut Machine, path: &str) -> Result<LoadedImage, LoadError> {
    let data = read_file(path)?;
    let file = ElfFile32::<object::Endianness>::parse(&*data).map_err(|source| LoadError::Elf {
        path: path.to_owned(),
        source,
    })?;

    let header = file.elf_header();
    let endian = file.endian();
    let e_type = header.e_type(endian);
    if header.e_machine(endian) != elf::EM_RISCV
        || header.e_ident().data != elf::ELFDATA2LSB
        || (e_type != elf::ET_EXEC && e_type != elf::ET_DYN)
    {
        return Err(LoadError::UnsupportedElf {
            path: path.to_owned(),
        });
    }

    let mut loaded = 0u32;
    let mut placed_any = false;
    for phdr in file.elf_program_headers() {
        if phdr.p_type(endian) != elf::PT_LOAD {
            continue;
        }
        let memsz = phdr.p_memsz(endian);
        let filesz = phdr.p_filesz(endian);
        if memsz < filesz {
            return Err(LoadError::UnsupportedElf {
                path: path.to_owned(),
            });
        }

        let paddr = phdr.p_paddr(endian);
        let seg_addr = if paddr != 0 { paddr } else { phdr.p_vaddr(endian) };

        let Some(dst) = m.plat.dram_slice_mut(seg_addr, memsz) else {
            return Err(LoadError::OutOfRange {
                path: path.to_owned(),
                addr: seg_addr,
                len: memsz,
            });
        };
        dst.fill(0);

        if filesz > 0 {
            let bytes = phdr
                .data(endian, &*data)
                .map_err(|()| LoadError::UnsupportedElf {
                    path: path.to_owned(),
                })?;
            place(m, path, seg_addr, bytes)?;
        }
        loaded = loaded.saturating_add(memsz);
        placed_any = true;
    }

    if !placed_any {
        return Err(LoadError::UnsupportedElf {
            path: path.to_owned(),
        });
    }

    let entry = header.e_entry(endian);
    tracing::info!(path, entry = format_args!("{entry:#010x}"), bytes = loaded, "ELF image loaded");
    Ok(LoadedImage {
        entry: Some(entry),
        size: loaded,
    })
}

/// Loads a raw blob at a caller-supplied physical address.
///
/// # Errors
///
/// Fails on I/O or when the blob falls outside guest DRAM.
pub fn load_raw(m: &mut Machine, path: &str, load_addr: u32) -> Result<LoadedImage, LoadError> {
    let data = read_file(path)?;
    place(m, path, load_addr, &data)?;
    tracing::info!(path, addr = format_args!("{load_addr:#010x}"), bytes = data.len(), "raw image loaded");
    Ok(LoadedImage {
        entry: None,
        size: data.len() as u32,
    })
}

/// Loads an image, auto-detecting ELF32 versus raw.
///
/// ELF images ignore `load_addr` and report their entry point; raw blobs
/// land at `load_addr` with no entry.
///
/// # Errors
///
/// Propagates the format-specific loader errors.
pub fn load_image_auto(m: &mut Machine, path: &str, load_addr: u32) -> Result<LoadedImage, LoadError> {
    let head = {
        let data = read_file(path)?;
        is_elf32(&data)
    };
    if head {
        load_elf32(m, path)
    } else {
        load_raw(m, path, load_addr)
    }
}

/// Loads the configured images and wires up the boot state of hart 0.
///
/// The kernel image decides the entry point (ELF entry, or the raw load
/// address) unless the options carry an explicit override. Hart 0 starts at
/// the entry in S-mode or M-mode per `boot_s_mode`, with `a0 = hartid` and
/// `a1` pointing at the device tree.
///
/// # Errors
///
/// Propagates the image loader errors.
pub fn setup_boot(m: &mut Machine) -> Result<(), LoadError> {
    let opts = m.opts.clone();
    let mut entry = opts.kernel_load_addr;

    if let Some(kernel) = opts.kernel_path.as_deref() {
        let image = load_image_auto(m, kernel, opts.kernel_load_addr)?;
        if let Some(elf_entry) = image.entry {
            entry = elf_entry;
        }
    }
    if let Some(dtb) = opts.dtb_path.as_deref() {
        load_raw(m, dtb, opts.dtb_load_addr)?;
    }
    if let Some(initrd) = opts.initrd_path.as_deref() {
        load_raw(m, initrd, opts.initrd_load_addr)?;
    }

    if opts.has_entry_override {
        entry = opts.entry_override;
    }

    let boot_s_mode = opts.boot_s_mode;
    let dtb_addr = opts.dtb_load_addr;
    let cpu = m.hart_mut(0);
    cpu.pc = entry;
    cpu.priv_mode = if boot_s_mode {
        crate::common::PrivilegeMode::Supervisor
    } else {
        crate::common::PrivilegeMode::Machine
    };
    cpu.x[crate::isa::abi::REG_A0] = 0;
    cpu.x[crate::isa::abi::REG_A1] = dtb_addr;

    tracing::info!(
        entry = format_args!("{entry:#010x}"),
        s_mode = boot_s_mode,
        "boot state wired"
    );
    Ok(())
}
