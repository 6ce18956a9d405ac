//! Physical memory map and platform defaults.
//!
//! These values define the fixed SoC layout and the baseline configuration
//! used when an option is left unset. The device bases match the virt-style
//! layout the guest firmware and kernels expect.

/// Base physical address of main memory.
pub const DRAM_BASE: u32 = 0x8000_0000;

/// Default main memory size in MiB.
pub const DEFAULT_RAM_MB: u32 = 256;

/// Base physical address of the 16550-like UART.
pub const UART_BASE: u32 = 0x1000_0000;
/// Size of the UART MMIO region in bytes.
pub const UART_SIZE: u32 = 0x0000_0100;

/// Base physical address of the CLINT.
pub const CLINT_BASE: u32 = 0x0200_0000;
/// Size of the CLINT MMIO region in bytes.
pub const CLINT_SIZE: u32 = 0x0001_0000;

/// Base physical address of the PLIC.
pub const PLIC_BASE: u32 = 0x0c00_0000;
/// Size of the PLIC MMIO region in bytes.
pub const PLIC_SIZE: u32 = 0x0400_0000;

/// Base physical address of the stub VirtIO MMIO window.
pub const VIRTIO_BASE: u32 = 0x1000_1000;
/// Size of the VirtIO MMIO window (8 slots of 4 KiB).
pub const VIRTIO_SIZE: u32 = 0x0000_8000;
/// Stride between VirtIO MMIO slots.
pub const VIRTIO_STRIDE: u32 = 0x0000_1000;

/// Default kernel image load address.
pub const DEFAULT_KERNEL_LOAD: u32 = 0x8040_0000;
/// Default device-tree blob load address.
pub const DEFAULT_DTB_LOAD: u32 = 0x87f0_0000;
/// Default initrd load address.
pub const DEFAULT_INITRD_LOAD: u32 = 0x8800_0000;

/// Default instruction budget when none is requested.
pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 50_000_000;

/// Depth of the UART receive FIFO in bytes.
pub const UART_RX_FIFO_SIZE: usize = 256;

/// Default number of harts.
pub const DEFAULT_HART_COUNT: u32 = 1;
/// Maximum number of harts the platform models.
pub const MAX_HARTS: usize = 4;
/// Maximum number of PLIC contexts ({M, S} pair per hart).
pub const MAX_PLIC_CONTEXTS: usize = MAX_HARTS * 2;

/// Page size shift for Sv32 (4 KiB pages).
pub const PAGE_SHIFT: u32 = 12;
