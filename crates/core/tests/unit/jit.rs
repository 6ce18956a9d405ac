//! JIT tests: dispatch state machine and observational equivalence with
//! the interpreter, including the interrupt-boundary scenario.

use pretty_assertions::assert_eq;

use crate::common::builder::{addi, enc_b, enc_i, lui, sw};
use crate::common::harness::{RAM_BASE, interp_config, machine, set_pc, write_words};
use rv32sim_core::csr;
use rv32sim_core::jit::exec_tb_jit;
use rv32sim_core::run::{RunConfig, run_with_config};
use rv32sim_core::tb::JitStatus;
use rv32sim_core::tb::cache::TbCache;
use rv32sim_core::tb::config::TbTuning;

/// JIT-enabled scheduling without the guard, so the heat-up path is not
/// throttled by the no-progress cooldown inside short test budgets.
fn jit_config() -> RunConfig {
    RunConfig {
        use_tb: false,
        use_jit: true,
        jit_skip_mmode: false,
        jit_guard: false,
        hart_threads: false,
    }
}

/// A tight ALU loop: four supported instructions and a backward jump.
fn alu_loop() -> Vec<u32> {
    vec![
        addi(1, 1, 1),
        addi(2, 2, 1),
        addi(3, 3, 1),
        addi(4, 4, 1),
        crate::common::builder::jal(0, -16),
    ]
}

#[test]
fn dispatch_heats_then_compiles_and_retires() {
    let mut m = machine();
    write_words(&m, RAM_BASE, &alu_loop());
    set_pc(&mut m, RAM_BASE);

    let mut cache = TbCache::new(TbTuning::default());
    m.with_hart(0, |m, cpu| {
        // Below the hotness threshold nothing is compiled.
        for _ in 0..2 {
            let result = exec_tb_jit(m, cpu, &mut cache, 64);
            assert_eq!(result.status, JitStatus::NoProgress);
            assert_eq!(cpu.pc, RAM_BASE, "no progress means no PC movement");
        }

        // The third dispatch crosses the threshold, compiles, and runs one
        // whole block: the jump terminates the dispatch via its helper.
        let result = exec_tb_jit(m, cpu, &mut cache, 64);
        assert_eq!(result.status, JitStatus::Retired);
        assert_eq!(result.retired, 5);
        assert_eq!(cpu.x[1], 1);
        assert_eq!(cpu.x[4], 1);
        assert_eq!(cpu.pc, RAM_BASE, "the loop re-enters its own head");
        assert_eq!(cpu.instret, 5);
        assert_eq!(m.plat.mtime_load(), 5, "mtime follows JIT retirement");

        // The compiled entry is reused on the next dispatch.
        let result = exec_tb_jit(m, cpu, &mut cache, 64);
        assert_eq!(result.status, JitStatus::Retired);
        assert_eq!(result.retired, 5);
    });
}

#[test]
fn long_prefix_chains_into_its_tail_block() {
    // Twelve ALU instructions and a backward jump: the compiled prefix is
    // capped at eight, so the epilogue falls through and chain-links into
    // the tail block once that compiles too.
    let mut program: Vec<u32> = (0..12).map(|i| addi(1 + (i % 4), 1 + (i % 4), 1)).collect();
    program.push(crate::common::builder::jal(0, -48));

    let mut m = machine();
    write_words(&m, RAM_BASE, &program);
    set_pc(&mut m, RAM_BASE);

    let mut cache = TbCache::new(TbTuning::default());
    m.with_hart(0, |m, cpu| {
        let mut last_retired = 0;
        for _ in 0..12 {
            // Keep every dispatch on the loop head so the head line (and,
            // through chain attempts, the tail line) accumulates heat.
            while cpu.pc != RAM_BASE {
                assert!(rv32sim_core::exec::exec_one(m, cpu));
            }
            let result = exec_tb_jit(m, cpu, &mut cache, 64);
            if result.status == JitStatus::Retired {
                last_retired = result.retired;
            }
        }
        assert_eq!(
            last_retired, 13,
            "head prefix (8) chains into the tail block (5)"
        );
    });
}

#[test]
fn compiled_block_matches_interpreter() {
    // Reference: pure interpretation.
    let mut reference = machine();
    write_words(&reference, RAM_BASE, &alu_loop());
    set_pc(&mut reference, RAM_BASE);
    let ref_executed = run_with_config(&mut reference, 200, &interp_config());

    // Subject: JIT-enabled run of the same program and budget.
    let mut m = machine();
    write_words(&m, RAM_BASE, &alu_loop());
    set_pc(&mut m, RAM_BASE);
    let executed = run_with_config(&mut m, 200, &jit_config());

    assert_eq!(executed, ref_executed);
    let expect = reference.hart_mut(0);
    let got = m.hart_mut(0);
    assert_eq!(got.x, expect.x);
    assert_eq!(got.pc, expect.pc);
    assert_eq!(got.cycle, expect.cycle);
    assert_eq!(got.instret, expect.instret);
}

/// A loop whose body stores through the memory helper.
fn store_loop(word: u32) -> Vec<u32> {
    vec![
        lui(10, word & 0xffff_f000),
        enc_i((word & 0xfff) as i32, 10, 0x0, 10, 0x13), // addi x10, x10, low
        addi(1, 1, 1),
        sw(1, 10, 0),
        addi(2, 2, 1),
        enc_b(-12, 5, 1, 0x1), // bne x1, x5, back to the store
        0x0010_0073,           // ebreak
    ]
}

#[test]
fn helper_lowered_stores_match_interpreter() {
    // Low 12 bits stay below 0x800 so the lui/addi pair needs no carry.
    let word = RAM_BASE + 0x700;

    let mut reference = machine();
    write_words(&reference, RAM_BASE, &store_loop(word));
    reference.hart_mut(0).x[5] = 40;
    set_pc(&mut reference, RAM_BASE);
    let ref_executed = run_with_config(&mut reference, 10_000, &interp_config());

    let mut m = machine();
    write_words(&m, RAM_BASE, &store_loop(word));
    m.hart_mut(0).x[5] = 40;
    set_pc(&mut m, RAM_BASE);
    let executed = run_with_config(&mut m, 10_000, &jit_config());

    assert_eq!(executed, ref_executed);
    assert_eq!(
        rv32sim_core::soc::phys_read(&m, word, 4),
        rv32sim_core::soc::phys_read(&reference, word, 4)
    );
    let expect = reference.hart_mut(0);
    let got = m.hart_mut(0);
    assert_eq!(got.x, expect.x);
    assert_eq!(got.instret, expect.instret);
    assert_eq!(got.csr[csr::MCAUSE as usize], 3, "both runs end at the ebreak");
}

/// Interrupt scenario: a hot M-mode block raises MSIP every iteration; the
/// handler observes the cause, clears the latch, and returns; the final
/// ebreak routes to the exception half of the handler, which clears the
/// trap vector and stops the hart. The JIT run ends in the same
/// architectural state as the interpreter run.
#[test]
fn jit_interrupt_boundary_matches_interpreter() {
    fn csrr(rd: u32, num: u32) -> u32 {
        enc_i(num as i32, 0, 0x2, rd, 0x73)
    }

    fn prepare(m: &mut rv32sim_core::Machine) {
        let handler_base = RAM_BASE + 0x1000;

        let main = [
            addi(1, 1, 1),
            sw(21, 20, 0),          // msip[0] = 1
            addi(2, 2, 1),
            enc_b(-12, 22, 1, 0x1), // bne x1, x22, loop
            0x0010_0073,            // ebreak -> exception half of the handler
        ];
        let handler = [
            csrr(5, csr::MCAUSE),
            enc_b(16, 0, 5, 0x5), // bge x5, x0: exceptions go to the halt path
            csrr(6, csr::MEPC),
            sw(0, 20, 0), // msip[0] = 0
            0x3020_0073,  // mret
            // Halt path: zero the vector, then trap to it.
            enc_i(csr::MTVEC as i32, 0, 0x1, 0, 0x73), // csrrw x0, mtvec, x0
            0x0010_0073,                               // ebreak with vector 0 stops the hart
        ];
        write_words(m, RAM_BASE, &main);
        write_words(m, handler_base, &handler);

        let cpu = m.hart_mut(0);
        cpu.csr[csr::MTVEC as usize] = handler_base;
        cpu.csr[csr::MIE as usize] = csr::MIP_MSIP;
        cpu.csr[csr::MSTATUS as usize] = csr::MSTATUS_MIE;
        cpu.x[20] = 0x0200_0000; // CLINT base
        cpu.x[21] = 1;
        cpu.x[22] = 30; // iterations
        cpu.pc = RAM_BASE;
    }

    let mut reference = machine();
    prepare(&mut reference);
    reference.shared(0).set_running(true);
    let ref_executed = run_with_config(&mut reference, 100_000, &interp_config());

    let mut m = machine();
    prepare(&mut m);
    m.shared(0).set_running(true);
    let executed = run_with_config(&mut m, 100_000, &jit_config());

    assert_eq!(executed, ref_executed, "identical retire totals");
    assert!(!m.shared(0).is_running(), "the halt path drained the hart");

    let expect = reference.hart_mut(0);
    let got = m.hart_mut(0);
    assert_eq!(got.x[1], 30, "loop completed");
    assert_eq!(got.x[1], expect.x[1]);
    assert_eq!(got.x[2], expect.x[2]);
    assert_eq!(got.x[5], 3, "the handler's last observed cause is the ebreak");
    assert_eq!(got.csr[csr::MCAUSE as usize], 3);
    assert_eq!(got.cycle, expect.cycle);
    assert_eq!(got.instret, expect.instret);
}
