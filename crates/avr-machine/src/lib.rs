//! Machine integration layer.
//!
//! Composes the core (`avr-cpu-core`) with whatever the embedding supplies:
//! a device descriptor naming the memory layout and interrupt geometry,
//! peripheral IO handlers, and run budgets. Peripheral state is shared into
//! the registered closures via `Rc<RefCell<_>>`; the machine itself owns
//! only the core and the host-side hooks.

use std::cell::RefCell;
use std::rc::Rc;

use avr_cpu_core::{
    AvrCore, CoreConfig, CoreError, Engine, IoNotify, IoRead, IoWrite, RunBudget, RunExit,
    RunState, RunSummary, StepOutcome, Strategy, Vector,
};

/// Memory layout and interrupt geometry of one simulated part.
///
/// Produced by whoever knows the device being simulated; the machine does
/// not parse configuration formats.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub name: &'static str,
    pub flashend: u32,
    pub ramend: u16,
    pub ioend: u16,
    pub sreg_addr: u16,
    pub spl_addr: u16,
    pub sph_addr: u16,
    pub rampz_addr: Option<u16>,
    pub eind_addr: Option<u16>,
    pub vector_size: u32,
    pub interrupt_latency: u8,
    pub reset_pc: u32,
    /// Symbolic IO register names, so peripherals can be wired up by name
    /// instead of hard-coding part-specific addresses.
    pub io_names: Vec<(&'static str, u16)>,
}

impl DeviceDescriptor {
    /// ATmega328-class part: 32 KiB flash, 2 KiB SRAM, 4-byte vectors.
    pub fn atmega328() -> Self {
        Self {
            name: "atmega328",
            flashend: 0x7fff,
            ramend: 0x08ff,
            ioend: 0x00ff,
            sreg_addr: 0x5f,
            spl_addr: 0x5d,
            sph_addr: 0x5e,
            rampz_addr: None,
            eind_addr: None,
            vector_size: 4,
            interrupt_latency: 2,
            reset_pc: 0,
            io_names: vec![
                ("SREG", 0x5f),
                ("SPH", 0x5e),
                ("SPL", 0x5d),
                ("PORTB", 0x25),
                ("DDRB", 0x24),
                ("PINB", 0x23),
                ("PORTD", 0x2b),
                ("DDRD", 0x2a),
                ("PIND", 0x29),
            ],
        }
    }

    /// ATtiny85-class part: 8 KiB flash, 512 bytes SRAM, 2-byte vectors.
    pub fn attiny85() -> Self {
        Self {
            name: "attiny85",
            flashend: 0x1fff,
            ramend: 0x025f,
            ioend: 0x005f,
            sreg_addr: 0x5f,
            spl_addr: 0x5d,
            sph_addr: 0x5e,
            rampz_addr: None,
            eind_addr: None,
            vector_size: 2,
            interrupt_latency: 2,
            reset_pc: 0,
            io_names: vec![
                ("SREG", 0x5f),
                ("SPH", 0x5e),
                ("SPL", 0x5d),
                ("PORTB", 0x38),
                ("DDRB", 0x37),
                ("PINB", 0x36),
            ],
        }
    }

    /// Data-space address of a named IO register on this part.
    pub fn io_addr(&self, name: &str) -> Option<u16> {
        self.io_names
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, addr)| addr)
    }

    fn core_config(&self, debugger_attached: bool) -> CoreConfig {
        CoreConfig {
            flashend: self.flashend,
            ramend: self.ramend,
            ioend: self.ioend,
            sreg_addr: self.sreg_addr,
            spl_addr: self.spl_addr,
            sph_addr: self.sph_addr,
            rampz_addr: self.rampz_addr,
            eind_addr: self.eind_addr,
            vector_size: self.vector_size,
            interrupt_latency: self.interrupt_latency,
            reset_pc: self.reset_pc,
            debugger_attached,
        }
    }
}

/// Cycles to fast-forward while sleeping; the hook receives the current
/// cycle count and returns how far to skip (0 keeps the one-cycle idle
/// tick). The embedding is responsible for keeping skipped-over interrupt
/// deadlines accurate.
pub type SleepHook = Box<dyn FnMut(u64) -> u64>;

pub struct Machine {
    name: &'static str,
    core: AvrCore,
    engine: Engine,
    reset_hooks: Vec<Box<dyn FnMut()>>,
    sleep_hook: Option<SleepHook>,
}

impl Machine {
    pub fn new(descriptor: &DeviceDescriptor, strategy: Strategy) -> Self {
        let core = AvrCore::new(descriptor.core_config(false));
        log::debug!(
            "{}: flashend={:#06x} ramend={:#06x} vectors every {} bytes",
            descriptor.name,
            descriptor.flashend,
            descriptor.ramend,
            descriptor.vector_size,
        );
        Self {
            name: descriptor.name,
            core,
            engine: Engine::new(strategy),
            reset_hooks: Vec::new(),
            sleep_hook: None,
        }
    }

    pub fn with_debugger(descriptor: &DeviceDescriptor, strategy: Strategy) -> Self {
        let mut machine = Self::new(descriptor, strategy);
        machine.core.cfg.debugger_attached = true;
        machine
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn core(&self) -> &AvrCore {
        &self.core
    }

    #[inline]
    pub fn core_mut(&mut self) -> &mut AvrCore {
        &mut self.core
    }

    // ---- program loading --------------------------------------------------

    /// Copy a firmware image into program memory at `offset`. Image format
    /// parsing (ELF sections and friends) belongs to the caller.
    pub fn load(&mut self, image: &[u8], offset: u32) -> Result<(), CoreError> {
        self.core.flash.load(image, offset)
    }

    // ---- peripheral surface -----------------------------------------------

    pub fn register_io_read(&mut self, addr: u16, handler: IoRead) {
        self.core.ds.register_io_read(addr, handler);
    }

    pub fn register_io_write(&mut self, addr: u16, handler: IoWrite) {
        self.core.ds.register_io_write(addr, handler);
    }

    pub fn register_io_notify(&mut self, addr: u16, hook: IoNotify) {
        self.core.ds.register_io_notify(addr, hook);
    }

    pub fn register_vector(&mut self, vector: Vector) {
        self.core.register_vector(vector);
    }

    pub fn raise_interrupt(&mut self, vector: u8) {
        self.core.raise_interrupt(vector);
    }

    /// Run `hook` whenever the machine resets.
    pub fn on_reset(&mut self, hook: Box<dyn FnMut()>) {
        self.reset_hooks.push(hook);
    }

    /// Fast-forward the cycle counter while the core sleeps instead of
    /// idling one cycle per tick.
    pub fn on_sleep(&mut self, hook: SleepHook) {
        self.sleep_hook = Some(hook);
    }

    /// Designate an IO address as the host console: bytes written there
    /// collect into a line buffer flushed to the log on carriage return.
    pub fn set_console_addr(&mut self, addr: u16) {
        let buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let name = self.name;
        self.core.ds.register_io_write(
            addr,
            Box::new(move |_, v| {
                let mut buf = buffer.borrow_mut();
                if v == b'\r' {
                    log::info!("{name} console: {}", String::from_utf8_lossy(&buf));
                    buf.clear();
                } else if v >= b' ' {
                    buf.push(v);
                }
                None
            }),
        );
    }

    // ---- run control ------------------------------------------------------

    /// Execute one instruction, fused run, interrupt-service prologue or
    /// sleep tick; the outcome carries the new PC and cycle delta.
    pub fn step(&mut self) -> Result<StepOutcome, CoreError> {
        let outcome = self.engine.step(&mut self.core)?;
        if let StepOutcome::Slept { .. } = outcome {
            if let Some(hook) = self.sleep_hook.as_mut() {
                let skip = hook(self.core.cycle);
                self.core.cycle += skip;
            }
        }
        Ok(outcome)
    }

    /// Loop [`Self::step`] until a budget is exhausted or the core halts.
    pub fn run(&mut self, budget: RunBudget) -> Result<RunSummary, CoreError> {
        let start_cycle = self.core.cycle;
        let mut instructions: u64 = 0;

        loop {
            let spent = self.core.cycle - start_cycle;
            let budget_hit = budget.max_instructions.is_some_and(|m| instructions >= m)
                || budget.max_cycles.is_some_and(|m| spent >= m);
            if budget_hit {
                return Ok(RunSummary {
                    instructions,
                    cycles: spent,
                    exit: RunExit::BudgetReached,
                });
            }
            match self.step()? {
                StepOutcome::Executed { instructions: n, .. } => instructions += n as u64,
                StepOutcome::InterruptServiced { .. } | StepOutcome::Slept { .. } => {}
                StepOutcome::Halted => {
                    return Ok(RunSummary {
                        instructions,
                        cycles: self.core.cycle - start_cycle,
                        exit: RunExit::Halted,
                    });
                }
            }
        }
    }

    /// Reinitialize the core and forward the reset to registered
    /// peripheral hooks.
    pub fn reset(&mut self) {
        self.core.reset();
        for hook in &mut self.reset_hooks {
            hook();
        }
    }

    // ---- convenience accessors --------------------------------------------

    #[inline]
    pub fn pc(&self) -> u32 {
        self.core.pc
    }

    #[inline]
    pub fn cycle(&self) -> u64 {
        self.core.cycle
    }

    #[inline]
    pub fn state(&self) -> RunState {
        self.core.state
    }

    #[inline]
    pub fn reg(&self, r: u8) -> u8 {
        self.core.ds.reg(r)
    }

    #[inline]
    pub fn sp(&self) -> u16 {
        self.core.sp()
    }

    #[inline]
    pub fn sreg(&self) -> avr_cpu_core::Sreg {
        self.core.ds.sreg
    }
}
