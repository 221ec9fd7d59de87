//! Skip-length correctness: `CPSE`/`SBRC`/`SBRS`/`SBIC`/`SBIS` must size
//! their skip by the opcode at the target — 4 bytes and two extra cycles
//! over a 32-bit instruction, 2 bytes and one extra cycle otherwise.

mod common;

use avr_cpu_core::{Engine, Strategy, StepOutcome};
use avr_isa::encode;
use common::core_with_words;

fn step_once(words: &[u16]) -> (avr_cpu_core::AvrCore, u32, u8) {
    let mut core = core_with_words(words);
    let mut engine = Engine::new(Strategy::Direct);
    match engine.step(&mut core).unwrap() {
        StepOutcome::Executed { next_pc, cycles, .. } => (core, next_pc, cycles),
        other => panic!("expected an executed instruction, got {other:?}"),
    }
}

#[test]
fn cpse_skips_four_bytes_over_jmp() {
    // r0 == r0, JMP at the skip target.
    let mut words = vec![encode::cpse(0, 0)];
    words.extend_from_slice(&encode::jmp(0x40));
    words.push(encode::nop());
    let (_, next_pc, cycles) = step_once(&words);
    assert_eq!(next_pc, 6);
    assert_eq!(cycles, 3);
}

#[test]
fn cpse_skips_two_bytes_over_nop() {
    let words = [encode::cpse(0, 0), encode::nop(), encode::nop()];
    let (_, next_pc, cycles) = step_once(&words);
    assert_eq!(next_pc, 4);
    assert_eq!(cycles, 2);
}

#[test]
fn cpse_without_match_falls_through() {
    let mut words = vec![encode::cpse(0, 1)];
    words.extend_from_slice(&encode::jmp(0x40));
    let mut core = core_with_words(&words);
    core.ds.set_reg(1, 1);
    let mut engine = Engine::new(Strategy::Direct);
    let StepOutcome::Executed { next_pc, cycles, .. } = engine.step(&mut core).unwrap() else {
        panic!("expected execution");
    };
    assert_eq!(next_pc, 2);
    assert_eq!(cycles, 1);
}

#[test]
fn sbrs_skips_over_32_bit_sts() {
    let mut words = vec![encode::sbrs(5, 3)];
    words.extend_from_slice(&encode::sts(0x0123, 7));
    words.push(encode::nop());
    let mut core = core_with_words(&words);
    core.ds.set_reg(5, 0x08);
    let mut engine = Engine::new(Strategy::Direct);
    let StepOutcome::Executed { next_pc, cycles, .. } = engine.step(&mut core).unwrap() else {
        panic!("expected execution");
    };
    assert_eq!(next_pc, 6);
    assert_eq!(cycles, 3);
}

#[test]
fn sbrc_skips_two_over_16_bit_target() {
    let words = [encode::sbrc(5, 3), encode::nop(), encode::nop()];
    let (_, next_pc, cycles) = step_once(&words);
    assert_eq!(next_pc, 4);
    assert_eq!(cycles, 2);
}

#[test]
fn sbic_reads_io_and_sizes_skip_over_lds() {
    // Bit 2 of IO 0x10 (data space 0x30) is clear, so SBIC skips the LDS.
    let mut words = vec![encode::sbic(0x10, 2)];
    words.extend_from_slice(&encode::lds(9, 0x0150));
    words.push(encode::nop());
    let (_, next_pc, cycles) = step_once(&words);
    assert_eq!(next_pc, 6);
    assert_eq!(cycles, 3);
}

#[test]
fn sbis_falls_through_when_bit_clear() {
    let mut words = vec![encode::sbis(0x10, 2)];
    words.extend_from_slice(&encode::lds(9, 0x0150));
    let (_, next_pc, cycles) = step_once(&words);
    assert_eq!(next_pc, 2);
    assert_eq!(cycles, 1);
}

/// The lookahead is part of the skip's semantics in every tier.
#[test]
fn skip_sizing_agrees_across_tiers() {
    let mut words = vec![encode::ldi(16, 1), encode::sbrs(16, 0)];
    words.extend_from_slice(&encode::jmp(6)); // skipped
    words.push(encode::inc(17));
    let direct = common::run_program(&words, Strategy::Direct).unwrap();
    let cached = common::run_program(&words, Strategy::Cached).unwrap();
    let fused = common::run_program(&words, Strategy::Fused).unwrap();
    assert_eq!(direct, cached);
    assert_eq!(direct, fused);
    assert_eq!(direct.data[17], 1);
}
