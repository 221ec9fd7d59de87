//! Interrupt timing: pipeline latency after raise, the one-instruction
//! shadow after the global enable turns on, wake-from-sleep, and the
//! sleep-deadlock report.

mod common;

use avr_cpu_core::{
    AvrCore, CoreError, Engine, RegBit, RunState, Strategy, StepOutcome, Vector,
};
use avr_isa::encode;
use common::core_with_words;

const TIMSK: u16 = 0x6e;
const VECTOR: u8 = 1;

/// Image layout: `RJMP main` at the reset vector, `INC r20; RETI` in the
/// vector-1 slot, `main` right after the vector table.
fn firmware(main: &[u16]) -> Vec<u16> {
    let mut words = vec![
        encode::rjmp(3),  // reset -> main at word 4
        encode::nop(),    // pad to the vector-1 slot (byte 4)
        encode::inc(20),  // ISR body
        encode::reti(),
    ];
    words.extend_from_slice(main);
    words
}

fn interrupt_core(main: &[u16]) -> AvrCore {
    let mut core = core_with_words(&firmware(main));
    core.register_vector(Vector {
        number: VECTOR,
        enable: RegBit { addr: TIMSK, bit: 0 },
        raised: None,
    });
    core.ds.set_bit(TIMSK, 0, true);
    core
}

fn step(engine: &mut Engine, core: &mut AvrCore) -> StepOutcome {
    engine.step(core).unwrap()
}

#[test]
fn vector_fires_only_after_the_latency_window() {
    let mut core = interrupt_core(&[encode::nop(); 6].to_vec());
    let mut engine = Engine::new(Strategy::Direct);
    core.ds.sreg.i = true;

    step(&mut engine, &mut core); // rjmp main
    core.raise_interrupt(VECTOR);

    // Latency 2: the next tick still executes an instruction.
    assert!(matches!(step(&mut engine, &mut core), StepOutcome::Executed { .. }));
    match step(&mut engine, &mut core) {
        StepOutcome::InterruptServiced { vector, next_pc, .. } => {
            assert_eq!(vector, VECTOR);
            assert_eq!(next_pc, VECTOR as u32 * core.cfg.vector_size);
        }
        other => panic!("expected service, got {other:?}"),
    }
    assert!(!core.ds.sreg.i, "service clears the global enable");
}

#[test]
fn vector_never_fires_while_global_enable_is_clear() {
    let mut core = interrupt_core(&[encode::nop(); 8].to_vec());
    let mut engine = Engine::new(Strategy::Direct);
    core.raise_interrupt(VECTOR);

    for _ in 0..8 {
        assert!(
            matches!(step(&mut engine, &mut core), StepOutcome::Executed { .. }),
            "no service while I is clear"
        );
    }
    assert!(core.interrupts.is_pending(VECTOR), "vector stays pending");
}

#[test]
fn one_instruction_runs_after_sei_before_service() {
    // main: SEI; NOP; NOP ...
    let mut main = vec![encode::sei()];
    main.extend_from_slice(&[encode::nop(); 6]);
    let mut core = interrupt_core(&main);
    let mut engine = Engine::new(Strategy::Direct);

    step(&mut engine, &mut core); // rjmp
    core.raise_interrupt(VECTOR);
    step(&mut engine, &mut core); // sei

    // The shadow boundary: the instruction after SEI always completes.
    let after_sei = step(&mut engine, &mut core);
    assert!(matches!(after_sei, StepOutcome::Executed { .. }));

    // Service arrives on a later boundary.
    let mut serviced = false;
    for _ in 0..4 {
        if let StepOutcome::InterruptServiced { .. } = step(&mut engine, &mut core) {
            serviced = true;
            break;
        }
    }
    assert!(serviced);
}

#[test]
fn reti_re_enables_but_shadow_spans_one_instruction() {
    let mut main = vec![encode::sei()];
    main.extend_from_slice(&[encode::nop(); 10]);
    let mut core = interrupt_core(&main);
    let mut engine = Engine::new(Strategy::Direct);
    step(&mut engine, &mut core); // rjmp
    core.raise_interrupt(VECTOR);

    // Run until the ISR has returned.
    let mut serviced = false;
    let mut reti_seen = false;
    for _ in 0..16 {
        match step(&mut engine, &mut core) {
            StepOutcome::InterruptServiced { .. } => {
                serviced = true;
                // Queue the next interrupt while inside the ISR.
                core.raise_interrupt(VECTOR);
            }
            StepOutcome::Executed { entry_pc, .. } if entry_pc == 6 => {
                // RETI executed.
                reti_seen = true;
                break;
            }
            _ => {}
        }
    }
    assert!(serviced && reti_seen);
    assert!(core.ds.sreg.i, "RETI restores the global enable");

    // The first boundary after RETI must execute an instruction, never
    // service the queued vector.
    assert!(matches!(
        step(&mut engine, &mut core),
        StepOutcome::Executed { .. }
    ));
}

#[test]
fn raise_wakes_a_sleeping_core_and_services_at_the_vector() {
    let mut main = vec![encode::sei(), encode::sleep(), encode::nop(), encode::nop()];
    main.extend_from_slice(&[encode::nop(); 4]);
    let mut core = interrupt_core(&main);
    let mut engine = Engine::new(Strategy::Direct);

    step(&mut engine, &mut core); // rjmp
    step(&mut engine, &mut core); // sei
    step(&mut engine, &mut core); // shadow boundary: nop? no - sleep executes
    assert_eq!(core.state, RunState::Sleeping);

    // Idle tick while asleep.
    assert!(matches!(step(&mut engine, &mut core), StepOutcome::Slept { .. }));
    let cycles_asleep = core.cycle;

    core.raise_interrupt(VECTOR);
    assert_eq!(core.state, RunState::Running);

    let mut serviced = false;
    for _ in 0..4 {
        if let StepOutcome::InterruptServiced { .. } = step(&mut engine, &mut core) {
            serviced = true;
            break;
        }
    }
    assert!(serviced);
    assert!(core.cycle > cycles_asleep);
    assert_eq!(core.pc, VECTOR as u32 * core.cfg.vector_size);
}

#[test]
fn sleeping_with_interrupts_off_is_a_reported_deadlock() {
    let main = vec![encode::cli(), encode::sleep(), encode::nop()];
    let mut core = interrupt_core(&main);
    let mut engine = Engine::new(Strategy::Direct);

    step(&mut engine, &mut core); // rjmp
    step(&mut engine, &mut core); // cli
    step(&mut engine, &mut core); // sleep
    assert_eq!(core.state, RunState::Sleeping);

    let err = engine.step(&mut core).unwrap_err();
    assert!(matches!(err, CoreError::SleepDeadlock { .. }));
}

/// The pending bitmap services lowest-vector-first when several queue up.
#[test]
fn simultaneous_vectors_service_in_number_order() {
    let mut core = interrupt_core(&[encode::nop(); 8].to_vec());
    core.register_vector(Vector {
        number: 3,
        enable: RegBit { addr: TIMSK, bit: 1 },
        raised: None,
    });
    core.ds.set_bit(TIMSK, 1, true);
    core.ds.sreg.i = true;
    let mut engine = Engine::new(Strategy::Direct);

    step(&mut engine, &mut core); // rjmp
    core.raise_interrupt(3);
    core.raise_interrupt(VECTOR);

    let mut order = Vec::new();
    for _ in 0..12 {
        match step(&mut engine, &mut core) {
            StepOutcome::InterruptServiced { vector, .. } => {
                order.push(vector);
                if order.len() == 2 {
                    break;
                }
                // Let the ISR run to RETI, which re-enables I.
            }
            _ => {}
        }
    }
    assert_eq!(order, vec![VECTOR, 3]);
}
