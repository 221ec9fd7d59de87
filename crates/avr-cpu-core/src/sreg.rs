//! The AVR status register.
//!
//! The core keeps the eight flags unpacked for fast per-instruction update;
//! the packed byte exists only at the SREG data-space address and is
//! rebuilt lazily when that address is read.

use bitflags::bitflags;

bitflags! {
    /// Packed SREG byte layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SregBits: u8 {
        const C = 1 << 0;
        const Z = 1 << 1;
        const N = 1 << 2;
        const V = 1 << 3;
        const S = 1 << 4;
        const H = 1 << 5;
        const T = 1 << 6;
        const I = 1 << 7;
    }
}

/// Unpacked status register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sreg {
    pub c: bool,
    pub z: bool,
    pub n: bool,
    pub v: bool,
    pub s: bool,
    pub h: bool,
    pub t: bool,
    pub i: bool,
}

impl Sreg {
    /// Rebuild the packed byte; always equals the OR of the set flags at
    /// their documented positions.
    pub fn pack(self) -> u8 {
        let mut b = SregBits::empty();
        b.set(SregBits::C, self.c);
        b.set(SregBits::Z, self.z);
        b.set(SregBits::N, self.n);
        b.set(SregBits::V, self.v);
        b.set(SregBits::S, self.s);
        b.set(SregBits::H, self.h);
        b.set(SregBits::T, self.t);
        b.set(SregBits::I, self.i);
        b.bits()
    }

    /// Split a written byte back into the eight flags.
    pub fn unpack(&mut self, byte: u8) {
        let b = SregBits::from_bits_retain(byte);
        self.c = b.contains(SregBits::C);
        self.z = b.contains(SregBits::Z);
        self.n = b.contains(SregBits::N);
        self.v = b.contains(SregBits::V);
        self.s = b.contains(SregBits::S);
        self.h = b.contains(SregBits::H);
        self.t = b.contains(SregBits::T);
        self.i = b.contains(SregBits::I);
    }

    /// Flag accessors by bit index, as used by `BSET`/`BCLR`/`BRBS`/`BRBC`.
    pub fn bit(&self, b: u8) -> bool {
        match b & 7 {
            0 => self.c,
            1 => self.z,
            2 => self.n,
            3 => self.v,
            4 => self.s,
            5 => self.h,
            6 => self.t,
            _ => self.i,
        }
    }

    pub fn set_bit(&mut self, b: u8, value: bool) {
        match b & 7 {
            0 => self.c = value,
            1 => self.z = value,
            2 => self.n = value,
            3 => self.v = value,
            4 => self.s = value,
            5 => self.h = value,
            6 => self.t = value,
            _ => self.i = value,
        }
    }

    pub fn clear(&mut self) {
        *self = Sreg::default();
    }
}
