//! Cycle-accurate AVR core.
//!
//! The core executes fetched opcodes against a unified register/IO/SRAM
//! data space, keeps the status register unpacked for fast flag updates,
//! services interrupts with hardware-faithful latency, and offers three
//! behaviorally-equivalent execution tiers behind [`exec::Strategy`]:
//! a direct interpreter, a translate-and-cache micro-op engine, and a
//! fusing variant. Peripheral models, firmware loading and debugger
//! transport live outside this crate and talk to it through the IO handler
//! and interrupt-vector registration surfaces.

pub mod core;
pub mod dataspace;
pub mod error;
pub mod exec;
pub mod flash;
pub mod interp;
pub mod interrupts;
pub mod sreg;

pub use crate::core::{AvrCore, CoreConfig, Hooks, RunState};
pub use dataspace::{DataSpace, IoNotify, IoRead, IoWrite};
pub use error::CoreError;
pub use exec::{
    CacheEntry, Engine, RunBudget, RunExit, RunSummary, StepOutcome, Strategy,
};
pub use flash::Flash;
pub use interrupts::{RegBit, Vector};
pub use sreg::{Sreg, SregBits};
