//! Stub VirtIO MMIO slots.
//!
//! Eight 4 KiB slots that identify themselves as empty virtio-mmio devices:
//! magic "virt", version 2, vendor "QEMU", device id 0 ("no device"). Guest
//! probe code walks the slots, sees no device, and moves on. Writes are
//! accepted and discarded.

use crate::common::constants::{VIRTIO_BASE, VIRTIO_SIZE, VIRTIO_STRIDE};

/// Slot offset of the magic value register.
const MMIO_MAGIC_VALUE: u32 = 0x000;
/// Slot offset of the version register.
const MMIO_VERSION: u32 = 0x004;
/// Slot offset of the device-id register.
const MMIO_DEVICE_ID: u32 = 0x008;
/// Slot offset of the vendor-id register.
const MMIO_VENDOR_ID: u32 = 0x00c;
/// Slot offset of the status register.
const MMIO_STATUS: u32 = 0x070;

/// Handles a read in the VirtIO window.
pub(crate) fn read(paddr: u32, len: u32) -> Option<u32> {
    let off = paddr - VIRTIO_BASE;
    if off >= VIRTIO_SIZE || len != 4 {
        return None;
    }

    let value = match off % VIRTIO_STRIDE {
        MMIO_MAGIC_VALUE => 0x7472_6976, // "virt"
        MMIO_VERSION => 2,
        MMIO_DEVICE_ID => 0, // no device attached
        MMIO_VENDOR_ID => 0x554d_4551, // "QEMU"
        MMIO_STATUS => 0,
        _ => 0,
    };
    Some(value)
}

/// Handles a write in the VirtIO window; accepted and discarded.
pub(crate) fn write(paddr: u32, len: u32) -> bool {
    let off = paddr - VIRTIO_BASE;
    off < VIRTIO_SIZE && len == 4
}
