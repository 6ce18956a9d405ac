//! RV32 SoC emulator CLI.
//!
//! This binary is the thin front-end over `rv32sim-core`. It performs:
//! 1. **Option assembly:** clap flags layered over an optional JSON config
//!    file into `MachineOptions`.
//! 2. **Image loading:** kernel (ELF32 or raw), device tree, and initrd.
//! 3. **Run:** drives the core scheduler, pumping stdin into the UART
//!    receive FIFO from a side thread.
//! 4. **Reporting:** final hart state and, when enabled, the JIT counters.

use std::io::Read;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rv32sim_core::config::MachineOptions;
use rv32sim_core::machine::Machine;
use rv32sim_core::soc::mmio::uart_push_rx;
use rv32sim_core::{csr, loader, run, stats};

#[derive(Parser, Debug)]
#[command(
    name = "rv32sim",
    author,
    version,
    about = "RV32 SoC emulator",
    long_about = "Boot a small RISC-V OS stack (firmware, supervisor kernel, userland) on an \
                  emulated RV32IMAFDC SoC with Sv32 paging, CLINT/PLIC/UART, and an optional \
                  translation-block JIT (RV32SIM_EXPERIMENTAL_* knobs)."
)]
struct Cli {
    /// Kernel image, ELF32 or raw.
    #[arg(short, long)]
    kernel: Option<String>,

    /// Device tree blob.
    #[arg(long)]
    dtb: Option<String>,

    /// Initrd image.
    #[arg(long)]
    initrd: Option<String>,

    /// JSON config file with `MachineOptions` fields (flags win).
    #[arg(long)]
    config: Option<String>,

    /// Main memory size in MiB.
    #[arg(long)]
    ram_mb: Option<u32>,

    /// Load address for raw kernel images.
    #[arg(long, value_parser = parse_u32_hex)]
    kernel_load_addr: Option<u32>,

    /// Load address for the device tree blob.
    #[arg(long, value_parser = parse_u32_hex)]
    dtb_load_addr: Option<u32>,

    /// Load address for the initrd image.
    #[arg(long, value_parser = parse_u32_hex)]
    initrd_load_addr: Option<u32>,

    /// Override the entry point.
    #[arg(long, value_parser = parse_u32_hex)]
    entry: Option<u32>,

    /// Boot hart 0 in S-mode (with the SBI shim standing in for firmware).
    #[arg(long)]
    boot_s_mode: bool,

    /// Enable the SBI shim for S-mode ECALLs.
    #[arg(long)]
    sbi_shim: bool,

    /// Per-instruction trace flag.
    #[arg(long)]
    trace: bool,

    /// Number of harts (1..=4).
    #[arg(long)]
    harts: Option<u32>,

    /// Instruction budget (0 = default).
    #[arg(long)]
    max_instructions: Option<u64>,

    /// Pump stdin into the UART receive FIFO.
    #[arg(long)]
    interactive: bool,
}

/// Parses decimal or `0x`-prefixed hexadecimal addresses.
fn parse_u32_hex(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}

/// Layers the CLI flags over the config-file options.
fn assemble_options(cli: &Cli) -> Result<MachineOptions, String> {
    let mut opts = if let Some(path) = &cli.config {
        let data = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config '{path}': {e}"))?;
        serde_json::from_str::<MachineOptions>(&data)
            .map_err(|e| format!("failed to parse config '{path}': {e}"))?
    } else {
        MachineOptions::default()
    };

    if cli.kernel.is_some() {
        opts.kernel_path.clone_from(&cli.kernel);
    }
    if cli.dtb.is_some() {
        opts.dtb_path.clone_from(&cli.dtb);
    }
    if cli.initrd.is_some() {
        opts.initrd_path.clone_from(&cli.initrd);
    }
    if let Some(ram_mb) = cli.ram_mb {
        opts.ram_mb = ram_mb;
    }
    if let Some(addr) = cli.kernel_load_addr {
        opts.kernel_load_addr = addr;
    }
    if let Some(addr) = cli.dtb_load_addr {
        opts.dtb_load_addr = addr;
    }
    if let Some(addr) = cli.initrd_load_addr {
        opts.initrd_load_addr = addr;
    }
    if let Some(entry) = cli.entry {
        opts.entry_override = entry;
        opts.has_entry_override = true;
    }
    if cli.boot_s_mode {
        opts.boot_s_mode = true;
        opts.enable_sbi_shim = true;
    }
    if cli.sbi_shim {
        opts.enable_sbi_shim = true;
    }
    if cli.trace {
        opts.trace = true;
    }
    if let Some(harts) = cli.harts {
        opts.hart_count = harts;
    }
    if let Some(max) = cli.max_instructions {
        opts.max_instructions = max;
    }

    Ok(opts)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let opts = match assemble_options(&cli) {
        Ok(opts) => opts,
        Err(message) => {
            eprintln!("[err] {message}");
            return ExitCode::from(2);
        }
    };
    let max_instructions = opts.max_instructions;

    let mut machine = match Machine::new(opts) {
        Ok(machine) => machine,
        Err(e) => {
            eprintln!("[err] machine construction failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = loader::setup_boot(&mut machine) {
        eprintln!("[err] {e}");
        return ExitCode::FAILURE;
    }

    let (executed, running, pc, priv_mode, mcause, mepc, mtval);
    if cli.interactive {
        // The stdin pump holds a machine reference for the process
        // lifetime; leaking the machine keeps both sides 'static.
        let machine: &'static Machine = Box::leak(Box::new(machine));
        spawn_stdin_pump(machine);

        let cfg = run::RunConfig::from_env();
        executed = run::run_shared_with_config(machine, max_instructions, &cfg);

        running = machine.shared(0).is_running();
        // SAFETY: the schedulers have drained; only the pump thread is
        // still alive and it never touches hart state.
        let cpu = unsafe { machine.hart_unsynchronized(0) };
        (pc, priv_mode) = (cpu.pc, cpu.priv_mode);
        mcause = cpu.csr[csr::MCAUSE as usize];
        mepc = cpu.csr[csr::MEPC as usize];
        mtval = cpu.csr[csr::MTVAL as usize];
    } else {
        executed = run::run(&mut machine, max_instructions);

        running = machine.shared(0).is_running();
        let cpu = machine.hart_mut(0);
        (pc, priv_mode) = (cpu.pc, cpu.priv_mode);
        mcause = cpu.csr[csr::MCAUSE as usize];
        mepc = cpu.csr[csr::MEPC as usize];
        mtval = cpu.csr[csr::MTVAL as usize];
    }

    if stats::dump_enabled() {
        stats::jit().dump(executed);
    }

    eprintln!(
        "[info] stop: executed={executed} running={running} pc={pc:#010x} priv={priv_mode} \
         mcause={mcause:#010x} mepc={mepc:#010x} mtval={mtval:#010x}"
    );

    ExitCode::SUCCESS
}

/// Detached thread draining host stdin into the UART receive FIFO.
fn spawn_stdin_pump(machine: &'static Machine) {
    std::thread::spawn(move || {
        let mut buffer = [0u8; 1];
        let mut stdin = std::io::stdin().lock();
        while stdin.read_exact(&mut buffer).is_ok() {
            // Back off while the FIFO is full; the guest drains it.
            while !uart_push_rx(machine, buffer[0]) {
                std::thread::yield_now();
            }
        }
    });
}
