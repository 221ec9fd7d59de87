//! The semantic core: execute one decoded instruction against the core.
//!
//! All three execution tiers funnel through [`exec_instr`]; they differ
//! only in how they obtain the decoded record. Register operands follow an
//! index-based fetch/compute/store-back discipline — values are read out of
//! the data space, computed on, and written back by index, never through
//! aliases into the backing storage.

pub mod alu;

use avr_isa::{IndexMode, Instr};

use crate::core::{AvrCore, RunState};
use crate::error::CoreError;

/// Net effect of one executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub next_pc: u32,
    pub cycles: u8,
}

#[inline]
fn res(next_pc: u32, cycles: u8) -> ExecResult {
    ExecResult { next_pc, cycles }
}

/// Pick the skip distance and extra cycle charge for `CPSE`/`SBRC`/`SBRS`/
/// `SBIC`/`SBIS` by inspecting the opcode at the skip target. Part of the
/// skip instruction's own semantics, not a separate pass.
#[inline]
fn skip_over(core: &AvrCore, next_pc: u32) -> (u32, u8) {
    if avr_isa::is_32bit_opcode(core.flash.read16le(next_pc)) {
        (next_pc + 4, 2)
    } else {
        (next_pc + 2, 1)
    }
}

/// Load the 24-bit `Z` used by `ELPM`, or fail as an invalid opcode on
/// parts without `RAMPZ`.
fn elpm_z(core: &AvrCore, pc: u32) -> Result<(u32, u16), CoreError> {
    let Some(rampz) = core.cfg.rampz_addr else {
        return Err(CoreError::InvalidOpcode {
            pc,
            opcode: core.flash.read16le(pc),
        });
    };
    let z = core.ds.reg16(30);
    Ok(((core.ds.get(rampz) as u32) << 16 | z as u32, rampz))
}

pub(crate) fn exec_instr(core: &mut AvrCore, instr: Instr, pc: u32) -> Result<ExecResult, CoreError> {
    let next_pc = pc + instr.len();
    let sreg_c = core.ds.sreg.c;

    let r = match instr {
        Instr::Nop => res(next_pc, 1),

        // ---- two-register ALU --------------------------------------------
        Instr::Add { d, r } => {
            let (vd, vr) = (core.ds.reg(d), core.ds.reg(r));
            let v = alu::add8(&mut core.ds.sreg, vd, vr, false);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Adc { d, r } => {
            let (vd, vr) = (core.ds.reg(d), core.ds.reg(r));
            let v = alu::add8(&mut core.ds.sreg, vd, vr, sreg_c);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Sub { d, r } => {
            let (vd, vr) = (core.ds.reg(d), core.ds.reg(r));
            let v = alu::sub8(&mut core.ds.sreg, vd, vr, false, false);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Sbc { d, r } => {
            let (vd, vr) = (core.ds.reg(d), core.ds.reg(r));
            let v = alu::sub8(&mut core.ds.sreg, vd, vr, sreg_c, true);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::And { d, r } => {
            let v = core.ds.reg(d) & core.ds.reg(r);
            let v = alu::logical(&mut core.ds.sreg, v);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Or { d, r } => {
            let v = core.ds.reg(d) | core.ds.reg(r);
            let v = alu::logical(&mut core.ds.sreg, v);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Eor { d, r } => {
            let v = core.ds.reg(d) ^ core.ds.reg(r);
            let v = alu::logical(&mut core.ds.sreg, v);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Mov { d, r } => {
            let v = core.ds.reg(r);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Cp { d, r } => {
            let (vd, vr) = (core.ds.reg(d), core.ds.reg(r));
            alu::sub8(&mut core.ds.sreg, vd, vr, false, false);
            res(next_pc, 1)
        }
        Instr::Cpc { d, r } => {
            let (vd, vr) = (core.ds.reg(d), core.ds.reg(r));
            alu::sub8(&mut core.ds.sreg, vd, vr, sreg_c, true);
            res(next_pc, 1)
        }
        Instr::Cpse { d, r } => {
            if core.ds.reg(d) == core.ds.reg(r) {
                let (pc2, extra) = skip_over(core, next_pc);
                res(pc2, 1 + extra)
            } else {
                res(next_pc, 1)
            }
        }

        // ---- multiply ----------------------------------------------------
        Instr::Mul { d, r } => {
            let prod = core.ds.reg(d) as u16 * core.ds.reg(r) as u16;
            core.ds.set_reg16(0, prod);
            alu::mul_flags(&mut core.ds.sreg, prod, prod & 0x8000 != 0);
            res(next_pc, 2)
        }
        Instr::Muls { d, r } => {
            let prod = (core.ds.reg(d) as i8 as i16 * core.ds.reg(r) as i8 as i16) as u16;
            core.ds.set_reg16(0, prod);
            alu::mul_flags(&mut core.ds.sreg, prod, prod & 0x8000 != 0);
            res(next_pc, 2)
        }
        Instr::Mulsu { d, r } => {
            let prod = (core.ds.reg(d) as i8 as i16 * core.ds.reg(r) as i16) as u16;
            core.ds.set_reg16(0, prod);
            alu::mul_flags(&mut core.ds.sreg, prod, prod & 0x8000 != 0);
            res(next_pc, 2)
        }
        Instr::Fmul { d, r } => {
            let prod = core.ds.reg(d) as u16 * core.ds.reg(r) as u16;
            let carry = prod & 0x8000 != 0;
            let prod = prod << 1;
            core.ds.set_reg16(0, prod);
            alu::mul_flags(&mut core.ds.sreg, prod, carry);
            res(next_pc, 2)
        }
        Instr::Fmuls { d, r } => {
            let prod = (core.ds.reg(d) as i8 as i16 * core.ds.reg(r) as i8 as i16) as u16;
            let carry = prod & 0x8000 != 0;
            let prod = prod << 1;
            core.ds.set_reg16(0, prod);
            alu::mul_flags(&mut core.ds.sreg, prod, carry);
            res(next_pc, 2)
        }
        Instr::Fmulsu { d, r } => {
            let prod = (core.ds.reg(d) as i8 as i16 * core.ds.reg(r) as i16) as u16;
            let carry = prod & 0x8000 != 0;
            let prod = prod << 1;
            core.ds.set_reg16(0, prod);
            alu::mul_flags(&mut core.ds.sreg, prod, carry);
            res(next_pc, 2)
        }

        Instr::Movw { d, r } => {
            let v = core.ds.reg16(r);
            core.ds.set_reg16(d, v);
            res(next_pc, 1)
        }

        // ---- register/immediate ALU --------------------------------------
        Instr::Cpi { d, k } => {
            let vd = core.ds.reg(d);
            alu::sub8(&mut core.ds.sreg, vd, k, false, false);
            res(next_pc, 1)
        }
        Instr::Sbci { d, k } => {
            let vd = core.ds.reg(d);
            let v = alu::sub8(&mut core.ds.sreg, vd, k, sreg_c, true);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Subi { d, k } => {
            let vd = core.ds.reg(d);
            let v = alu::sub8(&mut core.ds.sreg, vd, k, false, false);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Ori { d, k } => {
            let v = core.ds.reg(d) | k;
            let v = alu::logical(&mut core.ds.sreg, v);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Andi { d, k } => {
            let v = core.ds.reg(d) & k;
            let v = alu::logical(&mut core.ds.sreg, v);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Ldi { d, k } => {
            core.ds.set_reg(d, k);
            res(next_pc, 1)
        }

        Instr::Adiw { p, k } => {
            let vp = core.ds.reg16(p);
            let v = alu::adiw16(&mut core.ds.sreg, vp, k);
            core.ds.set_reg16(p, v);
            res(next_pc, 2)
        }
        Instr::Sbiw { p, k } => {
            let vp = core.ds.reg16(p);
            let v = alu::sbiw16(&mut core.ds.sreg, vp, k);
            core.ds.set_reg16(p, v);
            res(next_pc, 2)
        }

        // ---- single-register ALU -----------------------------------------
        Instr::Com { d } => {
            let v = 0xff - core.ds.reg(d);
            let v = alu::logical(&mut core.ds.sreg, v);
            core.ds.sreg.c = true;
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Neg { d } => {
            let vd = core.ds.reg(d);
            let v = 0u8.wrapping_sub(vd);
            core.ds.sreg.h = (v | vd) & 0x08 != 0;
            core.ds.sreg.v = v == 0x80;
            core.ds.sreg.c = v != 0;
            alu::zns(&mut core.ds.sreg, v);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Swap { d } => {
            let vd = core.ds.reg(d);
            core.ds.set_reg(d, vd.rotate_left(4));
            res(next_pc, 1)
        }
        Instr::Inc { d } => {
            let v = core.ds.reg(d).wrapping_add(1);
            core.ds.sreg.v = v == 0x80;
            alu::zns(&mut core.ds.sreg, v);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Dec { d } => {
            let v = core.ds.reg(d).wrapping_sub(1);
            core.ds.sreg.v = v == 0x7f;
            alu::zns(&mut core.ds.sreg, v);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Asr { d } => {
            let vd = core.ds.reg(d);
            let v = alu::shift_right(&mut core.ds.sreg, (vd >> 1) | (vd & 0x80), vd & 1 != 0);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Lsr { d } => {
            let vd = core.ds.reg(d);
            let v = alu::shift_right(&mut core.ds.sreg, vd >> 1, vd & 1 != 0);
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Ror { d } => {
            let vd = core.ds.reg(d);
            let v = alu::shift_right(
                &mut core.ds.sreg,
                ((sreg_c as u8) << 7) | (vd >> 1),
                vd & 1 != 0,
            );
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }

        // ---- SREG bits and T transfers -----------------------------------
        Instr::Bset { b } => {
            core.ds.sreg.set_bit(b, true);
            res(next_pc, 1)
        }
        Instr::Bclr { b } => {
            core.ds.sreg.set_bit(b, false);
            res(next_pc, 1)
        }
        Instr::Bld { d, b } => {
            let vd = core.ds.reg(d);
            let v = if core.ds.sreg.t {
                vd | (1 << b)
            } else {
                vd & !(1 << b)
            };
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Bst { d, b } => {
            core.ds.sreg.t = core.ds.reg(d) & (1 << b) != 0;
            res(next_pc, 1)
        }

        // ---- skips -------------------------------------------------------
        Instr::Sbrc { r, b } => {
            if core.ds.reg(r) & (1 << b) == 0 {
                let (pc2, extra) = skip_over(core, next_pc);
                res(pc2, 1 + extra)
            } else {
                res(next_pc, 1)
            }
        }
        Instr::Sbrs { r, b } => {
            if core.ds.reg(r) & (1 << b) != 0 {
                let (pc2, extra) = skip_over(core, next_pc);
                res(pc2, 1 + extra)
            } else {
                res(next_pc, 1)
            }
        }
        Instr::Sbic { a, b } => {
            if core.read_data(a)? & (1 << b) == 0 {
                let (pc2, extra) = skip_over(core, next_pc);
                res(pc2, 1 + extra)
            } else {
                res(next_pc, 1)
            }
        }
        Instr::Sbis { a, b } => {
            if core.read_data(a)? & (1 << b) != 0 {
                let (pc2, extra) = skip_over(core, next_pc);
                res(pc2, 1 + extra)
            } else {
                res(next_pc, 1)
            }
        }

        // ---- IO ----------------------------------------------------------
        Instr::Cbi { a, b } => {
            let v = core.read_data(a)? & !(1 << b);
            core.write_data(a, v)?;
            res(next_pc, 2)
        }
        Instr::Sbi { a, b } => {
            let v = core.read_data(a)? | (1 << b);
            core.write_data(a, v)?;
            res(next_pc, 2)
        }
        Instr::In { d, a } => {
            let v = core.read_data(a)?;
            core.ds.set_reg(d, v);
            res(next_pc, 1)
        }
        Instr::Out { a, r } => {
            let v = core.ds.reg(r);
            core.write_data(a, v)?;
            res(next_pc, 1)
        }

        // ---- loads and stores --------------------------------------------
        Instr::Ld { d, ptr, mode } => {
            let mut p = core.ds.reg16(ptr.base() as u8);
            if mode == IndexMode::PreDec {
                p = p.wrapping_sub(1);
            }
            let v = core.read_data(p)?;
            core.ds.set_reg(d, v);
            if mode == IndexMode::PostInc {
                p = p.wrapping_add(1);
            }
            if mode != IndexMode::None {
                core.ds.set_reg16(ptr.base() as u8, p);
            }
            res(next_pc, 2)
        }
        Instr::St { r, ptr, mode } => {
            let v = core.ds.reg(r);
            let mut p = core.ds.reg16(ptr.base() as u8);
            if mode == IndexMode::PreDec {
                p = p.wrapping_sub(1);
            }
            core.write_data(p, v)?;
            if mode == IndexMode::PostInc {
                p = p.wrapping_add(1);
            }
            if mode != IndexMode::None {
                core.ds.set_reg16(ptr.base() as u8, p);
            }
            res(next_pc, 2)
        }
        Instr::Ldd { d, ptr, q } => {
            let p = core.ds.reg16(ptr.base() as u8).wrapping_add(q as u16);
            let v = core.read_data(p)?;
            core.ds.set_reg(d, v);
            res(next_pc, 2)
        }
        Instr::Std { r, ptr, q } => {
            let v = core.ds.reg(r);
            let p = core.ds.reg16(ptr.base() as u8).wrapping_add(q as u16);
            core.write_data(p, v)?;
            res(next_pc, 2)
        }
        Instr::Lds { d, addr } => {
            let v = core.read_data(addr)?;
            core.ds.set_reg(d, v);
            res(next_pc, 2)
        }
        Instr::Sts { r, addr } => {
            let v = core.ds.reg(r);
            core.write_data(addr, v)?;
            res(next_pc, 2)
        }
        Instr::Push { r } => {
            let v = core.ds.reg(r);
            core.push8(v)?;
            res(next_pc, 2)
        }
        Instr::Pop { d } => {
            let v = core.pop8()?;
            core.ds.set_reg(d, v);
            res(next_pc, 2)
        }

        // ---- program-memory loads ----------------------------------------
        Instr::Lpm0 => {
            let z = core.ds.reg16(30);
            let v = core.read_flash(z as u32)?;
            core.ds.set_reg(0, v);
            res(next_pc, 3)
        }
        Instr::Lpm { d, postinc } => {
            let z = core.ds.reg16(30);
            let v = core.read_flash(z as u32)?;
            core.ds.set_reg(d, v);
            if postinc {
                core.ds.set_reg16(30, z.wrapping_add(1));
            }
            res(next_pc, 3)
        }
        Instr::Elpm { d, postinc } => {
            let (z24, rampz) = elpm_z(core, pc)?;
            let v = core.read_flash(z24)?;
            core.ds.set_reg(d, v);
            if postinc {
                let z24 = z24.wrapping_add(1);
                core.ds.set_reg16(30, z24 as u16);
                core.ds.set(rampz, (z24 >> 16) as u8);
            }
            res(next_pc, 3)
        }

        // ---- flow control ------------------------------------------------
        Instr::Rjmp { delta } => res(next_pc.wrapping_add_signed(delta as i32), 2),
        Instr::Rcall { delta } => {
            core.push16((next_pc >> 1) as u16)?;
            res(next_pc.wrapping_add_signed(delta as i32), 3)
        }
        Instr::Brbs { b, delta } => {
            if core.ds.sreg.bit(b) {
                res(next_pc.wrapping_add_signed(delta as i32), 2)
            } else {
                res(next_pc, 1)
            }
        }
        Instr::Brbc { b, delta } => {
            if !core.ds.sreg.bit(b) {
                res(next_pc.wrapping_add_signed(delta as i32), 2)
            } else {
                res(next_pc, 1)
            }
        }
        Instr::Jmp { addr } => res(addr << 1, 3),
        Instr::Call { addr } => {
            core.push16((next_pc >> 1) as u16)?;
            res(addr << 1, 4)
        }
        Instr::Ijmp => res((core.ds.reg16(30) as u32) << 1, 2),
        Instr::Icall => {
            core.push16((next_pc >> 1) as u16)?;
            res((core.ds.reg16(30) as u32) << 1, 3)
        }
        Instr::Eijmp => {
            let Some(eind) = core.cfg.eind_addr else {
                return Err(CoreError::InvalidOpcode {
                    pc,
                    opcode: core.flash.read16le(pc),
                });
            };
            let z = core.ds.reg16(30) as u32 | (core.ds.get(eind) as u32) << 16;
            res(z << 1, 2)
        }
        Instr::Eicall => {
            let Some(eind) = core.cfg.eind_addr else {
                return Err(CoreError::InvalidOpcode {
                    pc,
                    opcode: core.flash.read16le(pc),
                });
            };
            let z = core.ds.reg16(30) as u32 | (core.ds.get(eind) as u32) << 16;
            core.push16((next_pc >> 1) as u16)?;
            res(z << 1, 3)
        }
        Instr::Ret => {
            let ra = core.pop16()?;
            res((ra as u32) << 1, 4)
        }
        Instr::Reti => {
            let ra = core.pop16()?;
            core.ds.sreg.i = true;
            res((ra as u32) << 1, 4)
        }

        // ---- core control ------------------------------------------------
        Instr::Sleep => {
            // Refuse to sleep past a service that is already due, so the
            // core cannot doze with interrupts about to fire.
            if !(core.interrupts.has_pending() && core.ds.sreg.i) {
                core.state = RunState::Sleeping;
            }
            res(next_pc, 1)
        }
        Instr::Break => {
            if core.cfg.debugger_attached {
                core.state = RunState::StepDone;
                res(pc, 0)
            } else {
                res(next_pc, 1)
            }
        }
        Instr::Wdr => {
            if let Some(hook) = core.hooks.wdr.as_mut() {
                hook();
            }
            res(next_pc, 1)
        }
        Instr::Spm => {
            if let Some(hook) = core.hooks.spm.as_mut() {
                hook();
            }
            res(next_pc, 1)
        }
    };

    Ok(r)
}
