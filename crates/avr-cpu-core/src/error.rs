//! Core error taxonomy.
//!
//! Every variant is fatal to the owning core instance; recovery policy
//! (reset, halt, abort) belongs to the embedding host.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A data-space or program-memory access landed beyond the configured
    /// end of memory. The simulated firmware has corrupted its stack or a
    /// pointer; the access cannot be satisfied.
    #[error("invalid memory access at {addr:#06x} (pc={pc:#06x} sp={sp:#06x})")]
    MemoryAccess { pc: u32, sp: u16, addr: u32 },

    /// No decode-table entry matches the fetched word.
    #[error("invalid opcode {opcode:#06x} at pc={pc:#06x}")]
    InvalidOpcode { pc: u32, opcode: u16 },

    /// The program counter left program memory, or returned to the reset
    /// vector after startup — both symptoms of a derailed program.
    #[error("program counter out of range: pc={pc:#06x}")]
    BadProgramCounter { pc: u32 },

    /// `SLEEP` with global interrupts disabled and nothing pending: the
    /// firmware can never wake. Reported instead of spinning forever.
    #[error("sleeping with interrupts disabled at pc={pc:#06x}")]
    SleepDeadlock { pc: u32 },

    /// A program image larger than the configured flash.
    #[error("program of {len} bytes does not fit in {flash_size} bytes of flash")]
    ProgramTooLarge { len: usize, flash_size: usize },
}
