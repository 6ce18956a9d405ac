//! System-on-chip: memory fabric and memory-mapped devices.
//!
//! This module implements the physical side of the machine. It provides:
//! 1. **Platform:** DRAM, locks, timer state, and the device register files.
//! 2. **Fabric:** Typed physical reads/writes routed by address range.
//! 3. **Devices:** UART (16550-like), CLINT, PLIC, and the VirtIO stub.
//!
//! Device handlers run with the single MMIO lock held; DRAM takes its own
//! lock in single-threaded execution and switches to relaxed atomics when
//! per-hart threads are active.

/// Core Local Interruptor: per-hart software interrupt and timer.
pub mod clint;
/// DRAM cell access paths.
pub mod dram;
/// Physical access routing and timer stepping.
pub mod mmio;
/// Platform state: memory, locks, device register files.
pub mod platform;
/// Platform-Level Interrupt Controller.
pub mod plic;
/// 16550-like UART with a receive FIFO.
pub mod uart;
/// Stub VirtIO MMIO slots.
pub mod virtio;

pub use mmio::{phys_read, phys_write, step_timer, step_timer_many};
pub use platform::{Platform, PlatformError};
