//! Loader tests: raw blobs, minimal ELF32 images, auto-detection.

use std::io::Write;

use pretty_assertions::assert_eq;

use crate::common::harness::{RAM_BASE, machine};
use rv32sim_core::loader::{LoadError, load_image_auto, load_raw};
use rv32sim_core::soc::phys_read;

/// Builds a minimal ELF32 RISC-V executable with one PT_LOAD segment.
fn minimal_elf(entry: u32, paddr: u32, payload: &[u8]) -> Vec<u8> {
    let ehsize = 52u32;
    let phentsize = 32u32;
    let offset = ehsize + phentsize;

    let mut out = Vec::new();
    // e_ident
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    out.extend_from_slice(&243u16.to_le_bytes()); // e_machine = EM_RISCV
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&entry.to_le_bytes()); // e_entry
    out.extend_from_slice(&ehsize.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(ehsize as u16).to_le_bytes()); // e_ehsize
    out.extend_from_slice(&(phentsize as u16).to_le_bytes()); // e_phentsize
    out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

    // Program header: PT_LOAD
    out.extend_from_slice(&1u32.to_le_bytes()); // p_type
    out.extend_from_slice(&offset.to_le_bytes()); // p_offset
    out.extend_from_slice(&paddr.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&paddr.to_le_bytes()); // p_paddr
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes()); // p_filesz
    out.extend_from_slice(&(payload.len() as u32 + 16).to_le_bytes()); // p_memsz
    out.extend_from_slice(&5u32.to_le_bytes()); // p_flags = R|X
    out.extend_from_slice(&4u32.to_le_bytes()); // p_align

    out.extend_from_slice(payload);
    out
}

fn temp_file(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(bytes).expect("write image");
    file
}

#[test]
fn raw_blob_lands_at_the_given_address() {
    let mut m = machine();
    let file = temp_file(&[0x11, 0x22, 0x33, 0x44]);
    let path = file.path().to_string_lossy().into_owned();

    let image = load_raw(&mut m, &path, RAM_BASE + 0x4000).expect("raw load");
    assert_eq!(image.size, 4);
    assert_eq!(image.entry, None);
    assert_eq!(phys_read(&m, RAM_BASE + 0x4000, 4), Some(0x4433_2211));
}

#[test]
fn raw_blob_outside_dram_is_rejected() {
    let mut m = machine();
    let file = temp_file(&[0u8; 16]);
    let path = file.path().to_string_lossy().into_owned();

    let err = load_raw(&mut m, &path, 0x1000_0000).expect_err("MMIO is not loadable");
    assert!(matches!(err, LoadError::OutOfRange { .. }));
}

#[test]
fn elf_segments_land_at_paddr_with_entry() {
    let mut m = machine();
    let payload = [0x93u8, 0x00, 0x50, 0x00]; // addi x1, x0, 5
    let elf = minimal_elf(RAM_BASE + 0x8000, RAM_BASE + 0x8000, &payload);
    let file = temp_file(&elf);
    let path = file.path().to_string_lossy().into_owned();

    let image = load_image_auto(&mut m, &path, 0).expect("elf load");
    assert_eq!(image.entry, Some(RAM_BASE + 0x8000));
    assert_eq!(phys_read(&m, RAM_BASE + 0x8000, 4), Some(0x0050_0093));
    // The zero-filled BSS tail of the segment.
    assert_eq!(phys_read(&m, RAM_BASE + 0x8000 + 4, 4), Some(0));
}

#[test]
fn auto_detection_falls_back_to_raw() {
    let mut m = machine();
    let file = temp_file(b"not an elf image");
    let path = file.path().to_string_lossy().into_owned();

    let image = load_image_auto(&mut m, &path, RAM_BASE + 0x5000).expect("raw fallback");
    assert_eq!(image.entry, None);
    assert_eq!(phys_read(&m, RAM_BASE + 0x5000, 1), Some(u32::from(b'n')));
}

#[test]
fn missing_file_reports_io_error() {
    let mut m = machine();
    let err = load_raw(&mut m, "/nonexistent/image.bin", RAM_BASE).expect_err("missing file");
    assert!(matches!(err, LoadError::Io { .. }));
}

#[test]
fn wrong_machine_elf_is_rejected() {
    let mut m = machine();
    let mut elf = minimal_elf(RAM_BASE, RAM_BASE, &[0u8; 4]);
    elf[18] = 0x3e; // e_machine = EM_X86_64
    let file = temp_file(&elf);
    let path = file.path().to_string_lossy().into_owned();

    let err = load_image_auto(&mut m, &path, 0).expect_err("not RISC-V");
    assert!(matches!(err, LoadError::UnsupportedElf { .. }));
}
