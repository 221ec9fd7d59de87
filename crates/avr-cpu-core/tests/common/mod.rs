#![allow(dead_code)]

//! Shared helpers for the integration tests: assemble a word list into a
//! core, drive it to the end of the program, snapshot architectural state.

use avr_cpu_core::{AvrCore, CoreConfig, CoreError, Engine, StepOutcome, Strategy};
use avr_isa::encode;

pub fn small_config() -> CoreConfig {
    CoreConfig {
        flashend: 0x0fff,
        ramend: 0x04ff,
        ..CoreConfig::default()
    }
}

pub fn core_with_words(words: &[u16]) -> AvrCore {
    let mut core = AvrCore::new(small_config());
    core.flash.load(&encode::to_bytes(words), 0).unwrap();
    core
}

/// Everything an instruction can observably change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub data: Vec<u8>,
    pub sreg: u8,
    pub pc: u32,
    pub cycle: u64,
    pub sp: u16,
}

pub fn snapshot(core: &AvrCore) -> Snapshot {
    Snapshot {
        data: (0..=core.ds.ramend()).map(|a| core.ds.get(a)).collect(),
        sreg: core.ds.sreg.pack(),
        pc: core.pc,
        cycle: core.cycle,
        sp: core.sp(),
    }
}

/// Step until the PC leaves the assembled program (straight-line programs
/// with forward-only control flow always get there).
pub fn run_to_end(
    engine: &mut Engine,
    core: &mut AvrCore,
    end_pc: u32,
) -> Result<(), CoreError> {
    let mut steps = 0u32;
    while core.pc < end_pc {
        if let StepOutcome::Halted = engine.step(core)? {
            break;
        }
        steps += 1;
        assert!(steps < 100_000, "program did not reach {end_pc:#x}");
    }
    Ok(())
}

/// Assemble, pad with `NOP`s (so skips and short forward branches stay in
/// bounds), execute under `strategy`, and snapshot the result.
pub fn run_program(words: &[u16], strategy: Strategy) -> Result<Snapshot, CoreError> {
    let mut padded = words.to_vec();
    padded.extend_from_slice(&[encode::nop(); 4]);
    let mut core = core_with_words(&padded);
    let mut engine = Engine::new(strategy);
    run_to_end(&mut engine, &mut core, padded.len() as u32 * 2)?;
    Ok(snapshot(&core))
}
