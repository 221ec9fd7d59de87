//! The core bundle: program memory, data space, PC/cycle state and the
//! interrupt controller, plus the stack discipline shared by calls,
//! returns and interrupt service.

use crate::dataspace::DataSpace;
use crate::error::CoreError;
use crate::flash::Flash;
use crate::interrupts::InterruptController;

/// Core run states, shared by all execution tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// `SLEEP` executed; instruction execution is skipped while the cycle
    /// counter and interrupt controller continue to advance.
    Sleeping,
    /// `BREAK` under an attached debugger.
    StepDone,
    /// External halt. Terminal until `reset`.
    Stopped,
}

/// Construction contract, produced by an external device descriptor.
///
/// The core does not parse configuration formats; whoever builds this knows
/// the part being simulated.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub flashend: u32,
    pub ramend: u16,
    /// Last IO-window address cleared on reset.
    pub ioend: u16,
    pub sreg_addr: u16,
    pub spl_addr: u16,
    pub sph_addr: u16,
    /// `RAMPZ` data-space address, on parts that have one. Gates `ELPM`.
    pub rampz_addr: Option<u16>,
    /// `EIND` data-space address. Gates `EIJMP`/`EICALL`.
    pub eind_addr: Option<u16>,
    /// Bytes per interrupt vector slot (2 on small parts, 4 on large).
    pub vector_size: u32,
    /// Pipeline delay between raising an enabled vector and the earliest
    /// service, in run-loop ticks. Device-specific; 2 on the megaAVR
    /// parts.
    pub interrupt_latency: u8,
    pub reset_pc: u32,
    /// Makes `BREAK` halt the core in `StepDone` instead of falling
    /// through as a no-op.
    pub debugger_attached: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        // ATmega328-class layout.
        Self {
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
            debugger_attached: false,
        }
    }
}

/// Host hooks for the two opcodes whose effect lives outside the core
/// (watchdog restart and self-programming). Absent hooks make them
/// one-cycle no-ops.
#[derive(Default)]
pub struct Hooks {
    pub wdr: Option<Box<dyn FnMut()>>,
    pub spm: Option<Box<dyn FnMut()>>,
}

pub struct AvrCore {
    pub cfg: CoreConfig,
    pub flash: Flash,
    pub ds: DataSpace,
    pub interrupts: InterruptController,
    pub hooks: Hooks,
    /// Byte offset into program memory; always even.
    pub pc: u32,
    pub cycle: u64,
    pub state: RunState,
    /// Set when an instruction turned the global interrupt enable on;
    /// suppresses service for exactly one following instruction.
    pub(crate) irq_shadow: bool,
}

impl AvrCore {
    pub fn new(cfg: CoreConfig) -> Self {
        let flash = Flash::new(cfg.flashend);
        let ds = DataSpace::new(cfg.ramend, cfg.sreg_addr);
        let mut core = Self {
            flash,
            ds,
            interrupts: InterruptController::default(),
            hooks: Hooks::default(),
            pc: cfg.reset_pc,
            cycle: 0,
            state: RunState::Running,
            irq_shadow: false,
            cfg,
        };
        core.set_sp_raw(core.cfg.ramend);
        core
    }

    /// Reinitialize data space, PC, SREG and interrupt state. Flash and
    /// SRAM contents survive, as they do through a hardware reset pulse.
    pub fn reset(&mut self) {
        log::debug!("core reset (pc -> {:#06x})", self.cfg.reset_pc);
        self.ds.reset(self.cfg.ioend);
        self.set_sp_raw(self.cfg.ramend);
        self.pc = self.cfg.reset_pc;
        self.cycle = 0;
        self.state = RunState::Running;
        self.irq_shadow = false;
        self.interrupts.reset();
    }

    // ---- diagnostics-preserving data access ------------------------------

    #[inline]
    pub(crate) fn fatal_access(&self, addr: u16) -> CoreError {
        CoreError::MemoryAccess {
            pc: self.pc,
            sp: self.sp(),
            addr: addr as u32,
        }
    }

    #[inline]
    pub fn read_data(&mut self, addr: u16) -> Result<u8, CoreError> {
        match self.ds.read(addr) {
            Ok(v) => Ok(v),
            Err(v) => {
                let err = self.fatal_access(v.addr);
                log::error!("{err}");
                Err(err)
            }
        }
    }

    #[inline]
    pub fn write_data(&mut self, addr: u16, v: u8) -> Result<(), CoreError> {
        match self.ds.write(addr, v) {
            Ok(()) => Ok(()),
            Err(viol) => {
                let err = self.fatal_access(viol.addr);
                log::error!("{err}");
                Err(err)
            }
        }
    }

    /// Program-memory byte read (`LPM`/`ELPM`).
    #[inline]
    pub fn read_flash(&self, addr: u32) -> Result<u8, CoreError> {
        self.flash.read8(addr).ok_or(CoreError::MemoryAccess {
            pc: self.pc,
            sp: self.sp(),
            addr,
        })
    }

    // ---- stack ------------------------------------------------------------

    #[inline]
    pub fn sp(&self) -> u16 {
        u16::from_le_bytes([self.ds.get(self.cfg.spl_addr), self.ds.get(self.cfg.sph_addr)])
    }

    fn set_sp_raw(&mut self, sp: u16) {
        let [lo, hi] = sp.to_le_bytes();
        self.ds.set(self.cfg.spl_addr, lo);
        self.ds.set(self.cfg.sph_addr, hi);
    }

    pub fn set_sp(&mut self, sp: u16) -> Result<(), CoreError> {
        let [lo, hi] = sp.to_le_bytes();
        self.write_data(self.cfg.spl_addr, lo)?;
        self.write_data(self.cfg.sph_addr, hi)
    }

    pub fn push8(&mut self, v: u8) -> Result<(), CoreError> {
        let sp = self.sp();
        self.write_data(sp, v)?;
        self.set_sp(sp.wrapping_sub(1))
    }

    pub fn pop8(&mut self) -> Result<u8, CoreError> {
        let sp = self.sp().wrapping_add(1);
        let v = self.read_data(sp)?;
        self.set_sp(sp)?;
        Ok(v)
    }

    /// Push a word address: low byte first, high byte above it. The pops
    /// below mirror the order; calls, returns and interrupt entry all share
    /// these two helpers so the order stays consistent by construction.
    pub fn push16(&mut self, v: u16) -> Result<(), CoreError> {
        self.push8(v as u8)?;
        self.push8((v >> 8) as u8)
    }

    pub fn pop16(&mut self) -> Result<u16, CoreError> {
        let hi = self.pop8()?;
        let lo = self.pop8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_core_points_sp_at_ramend() {
        let core = AvrCore::new(CoreConfig::default());
        assert_eq!(core.sp(), 0x08ff);
        assert_eq!(core.pc, 0);
        assert_eq!(core.state, RunState::Running);
    }

    #[test]
    fn push_pop_word_round_trip() {
        let mut core = AvrCore::new(CoreConfig::default());
        core.push16(0x1234).unwrap();
        assert_eq!(core.sp(), 0x08fd);
        // Low byte lands at the original SP, high byte below it.
        assert_eq!(core.ds.get(0x08ff), 0x34);
        assert_eq!(core.ds.get(0x08fe), 0x12);
        assert_eq!(core.pop16().unwrap(), 0x1234);
        assert_eq!(core.sp(), 0x08ff);
    }

    #[test]
    fn stack_underflow_into_nowhere_is_fatal() {
        let mut core = AvrCore::new(CoreConfig {
            ramend: 0xff,
            ..CoreConfig::default()
        });
        core.set_sp(0xff).unwrap();
        // Popping above ramend must fail, not wrap silently.
        assert!(matches!(
            core.pop8(),
            Err(CoreError::MemoryAccess { addr: 0x100, .. })
        ));
    }

    #[test]
    fn reset_restores_sp_and_pc() {
        let mut core = AvrCore::new(CoreConfig::default());
        core.pc = 0x100;
        core.cycle = 99;
        core.push16(0xbeef).unwrap();
        core.ds.sreg.i = true;
        core.reset();
        assert_eq!(core.pc, 0);
        assert_eq!(core.cycle, 0);
        assert_eq!(core.sp(), 0x08ff);
        assert!(!core.ds.sreg.i);
    }
}
