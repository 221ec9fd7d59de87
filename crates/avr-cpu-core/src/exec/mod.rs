//! Tiered execution dispatcher.
//!
//! One semantic core, three dispatch strategies: decode every step
//! (ground truth), decode once into the translation cache, or translate
//! with idiom fusion. All three produce identical register, memory, flag
//! and cycle outcomes; only the dispatch cost differs.

pub mod fuse;

use avr_isa::Instr;

use crate::core::{AvrCore, RunState};
use crate::error::CoreError;
use crate::interp::{exec_instr, ExecResult};
use crate::interrupts::SERVICE_CYCLES;
use self::fuse::FusedOp;

/// Dispatch strategy; the tier selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Fetch and decode at every step.
    #[default]
    Direct,
    /// Decode once per PC, execute from the translation cache.
    Cached,
    /// As `Cached`, translating adjacent-instruction idioms into fused
    /// entries where a pattern matches.
    Fused,
}

/// One translation-cache slot: a single pre-decoded micro-op, or a fused
/// run standing in for two or three of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntry {
    Single(Instr),
    Fused(FusedOp),
}

/// What one run-loop tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Executed from `entry_pc`; `instructions` is > 1 for fused entries.
    Executed {
        entry_pc: u32,
        next_pc: u32,
        cycles: u8,
        instructions: u8,
    },
    /// An interrupt-service prologue ran instead of an instruction.
    InterruptServiced { vector: u8, next_pc: u32, cycles: u8 },
    /// Core is sleeping; only the cycle counter advanced.
    Slept { cycles: u8 },
    /// Core is halted (`Stopped`, or `StepDone` under a debugger).
    Halted,
}

/// Translation-cache counters; cheap enough to keep in every build.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TranslationStats {
    pub hits: u64,
    pub misses: u64,
    pub fused_entries: u64,
}

/// Stop conditions for [`Engine::run`]. Budgets compose; the first one
/// reached wins. A sleeping core advances only cycles, so pair an
/// instruction budget with a cycle budget when the firmware may sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunBudget {
    pub max_instructions: Option<u64>,
    pub max_cycles: Option<u64>,
}

impl RunBudget {
    pub fn instructions(n: u64) -> Self {
        Self {
            max_instructions: Some(n),
            ..Self::default()
        }
    }

    pub fn cycles(n: u64) -> Self {
        Self {
            max_cycles: Some(n),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    BudgetReached,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub instructions: u64,
    pub cycles: u64,
    pub exit: RunExit,
}

pub struct Engine {
    strategy: Strategy,
    /// One slot per even PC, populated lazily and never invalidated: flash
    /// is immutable once execution starts.
    cache: Vec<Option<CacheEntry>>,
    stats: TranslationStats,
}

impl Engine {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            cache: Vec::new(),
            stats: TranslationStats::default(),
        }
    }

    #[inline]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn translation_stats(&self) -> TranslationStats {
        self.stats
    }

    /// Execute exactly one instruction, one fused run, one interrupt-service
    /// prologue, or one sleeping tick.
    pub fn step(&mut self, core: &mut AvrCore) -> Result<StepOutcome, CoreError> {
        match core.state {
            RunState::Stopped | RunState::StepDone => return Ok(StepOutcome::Halted),
            RunState::Running | RunState::Sleeping => {}
        }

        // Interrupts are serviced on instruction boundaries, except on the
        // boundary right after the global enable turned on: one full
        // instruction must execute first.
        if core.irq_shadow {
            core.irq_shadow = false;
        } else if let Some(vector) = core.service_pending()? {
            core.cycle += SERVICE_CYCLES as u64;
            return Ok(StepOutcome::InterruptServiced {
                vector,
                next_pc: core.pc,
                cycles: SERVICE_CYCLES,
            });
        }

        if core.state == RunState::Sleeping {
            if !core.ds.sreg.i && !core.interrupts.has_pending() {
                let err = CoreError::SleepDeadlock { pc: core.pc };
                log::error!("{err}");
                return Err(err);
            }
            core.cycle += 1;
            return Ok(StepOutcome::Slept { cycles: 1 });
        }

        let pc = core.pc;
        if (pc == 0 && core.cycle > 0) || pc + 1 > core.cfg.flashend {
            let err = CoreError::BadProgramCounter { pc };
            log::error!("{err}");
            return Err(err);
        }

        let i_before = core.ds.sreg.i;
        let (r, instructions) = match self.entry_at(core, pc)? {
            CacheEntry::Single(instr) => (exec_instr(core, instr, pc)?, 1),
            CacheEntry::Fused(op) => (fuse::exec_fused(core, op, pc)?, op.instruction_count()),
        };
        core.pc = r.next_pc;
        core.cycle += r.cycles as u64;
        if !i_before && core.ds.sreg.i {
            core.irq_shadow = true;
        }

        let ExecResult { next_pc, cycles } = r;
        Ok(StepOutcome::Executed {
            entry_pc: pc,
            next_pc,
            cycles,
            instructions,
        })
    }

    /// Loop [`Self::step`] until a budget is exhausted or the core halts.
    /// Errors abort immediately, leaving the core on the failing boundary.
    pub fn run(&mut self, core: &mut AvrCore, budget: RunBudget) -> Result<RunSummary, CoreError> {
        let start_cycle = core.cycle;
        let mut instructions: u64 = 0;

        loop {
            let spent = core.cycle - start_cycle;
            let budget_hit = budget.max_instructions.is_some_and(|m| instructions >= m)
                || budget.max_cycles.is_some_and(|m| spent >= m);
            if budget_hit {
                return Ok(RunSummary {
                    instructions,
                    cycles: spent,
                    exit: RunExit::BudgetReached,
                });
            }
            match self.step(core)? {
                StepOutcome::Executed { instructions: n, .. } => instructions += n as u64,
                StepOutcome::InterruptServiced { .. } | StepOutcome::Slept { .. } => {}
                StepOutcome::Halted => {
                    return Ok(RunSummary {
                        instructions,
                        cycles: core.cycle - start_cycle,
                        exit: RunExit::Halted,
                    });
                }
            }
        }
    }

    fn ensure_cache(&mut self, core: &AvrCore) {
        let words = (core.cfg.flashend as usize + 1) / 2;
        if self.cache.len() < words {
            self.cache.resize(words, None);
        }
    }

    fn entry_at(&mut self, core: &mut AvrCore, pc: u32) -> Result<CacheEntry, CoreError> {
        match self.strategy {
            Strategy::Direct => Ok(CacheEntry::Single(decode_at(core, pc)?.instr)),
            Strategy::Cached | Strategy::Fused => {
                self.ensure_cache(core);
                let slot = (pc >> 1) as usize;
                if let Some(entry) = self.cache[slot] {
                    self.stats.hits += 1;
                    return Ok(entry);
                }
                self.stats.misses += 1;

                let decoded = decode_at(core, pc)?;
                let entry = if self.strategy == Strategy::Fused {
                    match fuse::try_fuse(core, pc, decoded.instr) {
                        Some(op) => {
                            self.stats.fused_entries += 1;
                            CacheEntry::Fused(op)
                        }
                        None => CacheEntry::Single(decoded.instr),
                    }
                } else {
                    CacheEntry::Single(decoded.instr)
                };
                self.cache[slot] = Some(entry);
                Ok(entry)
            }
        }
    }
}

fn decode_at(core: &AvrCore, pc: u32) -> Result<avr_isa::Decoded, CoreError> {
    let word = core.flash.read16le(pc);
    let next = core.flash.read16le(pc + 2);
    avr_isa::decode(word, next).map_err(|e| {
        let err = CoreError::InvalidOpcode { pc, opcode: e.word };
        log::error!("{err} sp={:#06x}", core.sp());
        err
    })
}
