//! Idiom fusion for the top execution tier.
//!
//! At translation time, adjacent instructions matching a known idiom
//! collapse into one cache slot carrying the combined behavior and the
//! combined cycle cost. Fusion is a performance transform only: each fused
//! body performs the constituent steps in their original order, so the
//! final register/flag/memory/PC/cycle state is identical to sequential
//! execution. Unrecognized sequences stay single micro-ops.

use avr_isa::{IndexMode, Instr, PtrReg};

use crate::core::AvrCore;
use crate::error::CoreError;
use crate::interp::{alu, ExecResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskOp {
    And,
    Or,
}

/// A fused run of adjacent instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusedOp {
    /// `ADD d,r` + `ADC d+1,r+1`: 16-bit add across consecutive pairs.
    AddPair { d: u8, r: u8 },
    /// `SUBI d,kl` + `SBCI d+1,kh`: 16-bit immediate subtract.
    SubiPair { d: u8, kl: u8, kh: u8 },
    /// `LDI d,kl` + `LDI d+1,kh`: register-pair constant load.
    LdiPair { d: u8, kl: u8, kh: u8 },
    /// `IN d,a` + `ANDI/ORI d,k` + `OUT a,d`: IO read-modify-write.
    InMaskOut { d: u8, a: u16, k: u8, op: MaskOp },
    /// `CPI d,k` + `BRBS/BRBC b,delta`: compare-and-branch.
    CpiBranch { d: u8, k: u8, b: u8, branch_if_set: bool, delta: i16 },
    /// Back-to-back `PUSH`/`POP`.
    PushPair { a: u8, b: u8 },
    PopPair { a: u8, b: u8 },
    /// `LPM d, Z+` + `ST ptr+, d`: the flash-to-RAM copy loop body.
    LpmCopy { d: u8, dst: PtrReg },
}

impl FusedOp {
    /// Bytes of program memory the fused run covers.
    pub fn len(self) -> u32 {
        match self {
            FusedOp::InMaskOut { .. } => 6,
            _ => 4,
        }
    }

    /// Source instructions represented by this entry.
    pub fn instruction_count(self) -> u8 {
        match self {
            FusedOp::InMaskOut { .. } => 3,
            _ => 2,
        }
    }
}

/// Try to recognize a fusable idiom starting at `pc` with already-decoded
/// `first`. Returns `None` when no pattern matches; the caller falls back
/// to the single micro-op.
pub(crate) fn try_fuse(core: &AvrCore, pc: u32, first: Instr) -> Option<FusedOp> {
    let second = peek(core, pc + first.len())?;

    match (first, second) {
        (Instr::Add { d, r }, Instr::Adc { d: d2, r: r2 })
            if d2 == d.wrapping_add(1) && r2 == r.wrapping_add(1) =>
        {
            Some(FusedOp::AddPair { d, r })
        }
        (Instr::Subi { d, k: kl }, Instr::Sbci { d: d2, k: kh }) if d2 == d + 1 => {
            Some(FusedOp::SubiPair { d, kl, kh })
        }
        (Instr::Ldi { d, k: kl }, Instr::Ldi { d: d2, k: kh }) if d2 == d + 1 => {
            Some(FusedOp::LdiPair { d, kl, kh })
        }
        (Instr::In { d, a }, Instr::Andi { d: d2, k }) if d2 == d => {
            match peek(core, pc + 4)? {
                Instr::Out { a: a2, r } if a2 == a && r == d => {
                    Some(FusedOp::InMaskOut { d, a, k, op: MaskOp::And })
                }
                _ => None,
            }
        }
        (Instr::In { d, a }, Instr::Ori { d: d2, k }) if d2 == d => match peek(core, pc + 4)? {
            Instr::Out { a: a2, r } if a2 == a && r == d => {
                Some(FusedOp::InMaskOut { d, a, k, op: MaskOp::Or })
            }
            _ => None,
        },
        (Instr::Cpi { d, k }, Instr::Brbs { b, delta }) => Some(FusedOp::CpiBranch {
            d,
            k,
            b,
            branch_if_set: true,
            delta,
        }),
        (Instr::Cpi { d, k }, Instr::Brbc { b, delta }) => Some(FusedOp::CpiBranch {
            d,
            k,
            b,
            branch_if_set: false,
            delta,
        }),
        (Instr::Push { r: a }, Instr::Push { r: b }) => Some(FusedOp::PushPair { a, b }),
        (Instr::Pop { d: a }, Instr::Pop { d: b }) => Some(FusedOp::PopPair { a, b }),
        (
            Instr::Lpm { d, postinc: true },
            Instr::St { r, ptr, mode: IndexMode::PostInc },
        ) if r == d => Some(FusedOp::LpmCopy { d, dst: ptr }),
        _ => None,
    }
}

fn peek(core: &AvrCore, pc: u32) -> Option<Instr> {
    if pc + 1 > core.cfg.flashend {
        return None;
    }
    let word = core.flash.read16le(pc);
    let next = core.flash.read16le(pc + 2);
    avr_isa::decode(word, next).ok().map(|d| d.instr)
}

/// Execute a fused run. Constituent steps happen in source order against
/// the same helpers the single-instruction path uses.
pub(crate) fn exec_fused(core: &mut AvrCore, op: FusedOp, pc: u32) -> Result<ExecResult, CoreError> {
    let next_pc = pc + op.len();

    let r = match op {
        FusedOp::AddPair { d, r } => {
            let (vd, vr) = (core.ds.reg(d), core.ds.reg(r));
            let lo = alu::add8(&mut core.ds.sreg, vd, vr, false);
            core.ds.set_reg(d, lo);
            let carry = core.ds.sreg.c;
            let (vd, vr) = (core.ds.reg(d + 1), core.ds.reg(r + 1));
            let hi = alu::add8(&mut core.ds.sreg, vd, vr, carry);
            core.ds.set_reg(d + 1, hi);
            ExecResult { next_pc, cycles: 2 }
        }
        FusedOp::SubiPair { d, kl, kh } => {
            let vd = core.ds.reg(d);
            let lo = alu::sub8(&mut core.ds.sreg, vd, kl, false, false);
            core.ds.set_reg(d, lo);
            let borrow = core.ds.sreg.c;
            let vd = core.ds.reg(d + 1);
            let hi = alu::sub8(&mut core.ds.sreg, vd, kh, borrow, true);
            core.ds.set_reg(d + 1, hi);
            ExecResult { next_pc, cycles: 2 }
        }
        FusedOp::LdiPair { d, kl, kh } => {
            core.ds.set_reg(d, kl);
            core.ds.set_reg(d + 1, kh);
            ExecResult { next_pc, cycles: 2 }
        }
        FusedOp::InMaskOut { d, a, k, op } => {
            let v = core.read_data(a)?;
            core.ds.set_reg(d, v);
            let masked = match op {
                MaskOp::And => core.ds.reg(d) & k,
                MaskOp::Or => core.ds.reg(d) | k,
            };
            let masked = alu::logical(&mut core.ds.sreg, masked);
            core.ds.set_reg(d, masked);
            core.write_data(a, masked)?;
            ExecResult { next_pc, cycles: 3 }
        }
        FusedOp::CpiBranch { d, k, b, branch_if_set, delta } => {
            let vd = core.ds.reg(d);
            alu::sub8(&mut core.ds.sreg, vd, k, false, false);
            if core.ds.sreg.bit(b) == branch_if_set {
                ExecResult {
                    next_pc: next_pc.wrapping_add_signed(delta as i32),
                    cycles: 3,
                }
            } else {
                ExecResult { next_pc, cycles: 2 }
            }
        }
        FusedOp::PushPair { a, b } => {
            let va = core.ds.reg(a);
            core.push8(va)?;
            let vb = core.ds.reg(b);
            core.push8(vb)?;
            ExecResult { next_pc, cycles: 4 }
        }
        FusedOp::PopPair { a, b } => {
            let va = core.pop8()?;
            core.ds.set_reg(a, va);
            let vb = core.pop8()?;
            core.ds.set_reg(b, vb);
            ExecResult { next_pc, cycles: 4 }
        }
        FusedOp::LpmCopy { d, dst } => {
            let z = core.ds.reg16(30);
            let v = core.read_flash(z as u32)?;
            core.ds.set_reg(d, v);
            core.ds.set_reg16(30, z.wrapping_add(1));
            let p = core.ds.reg16(dst.base() as u8);
            let v = core.ds.reg(d);
            core.write_data(p, v)?;
            core.ds.set_reg16(dst.base() as u8, p.wrapping_add(1));
            ExecResult { next_pc, cycles: 5 }
        }
    };

    Ok(r)
}
