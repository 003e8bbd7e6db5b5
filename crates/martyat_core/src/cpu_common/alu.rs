/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    cpu_common::alu.rs

    This module implements traits for alu operations of different widths
    common across CPU types.

*/
/// ALU operation selector. The discriminants match the `reg` field of the 80-83 group encodings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Xi {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
    Test,
}

impl Xi {
    pub fn from_group(reg: u8) -> Xi {
        match reg & 0x07 {
            0 => Xi::Add,
            1 => Xi::Or,
            2 => Xi::Adc,
            3 => Xi::Sbb,
            4 => Xi::And,
            5 => Xi::Sub,
            6 => Xi::Xor,
            _ => Xi::Cmp,
        }
    }

    /// CMP and TEST only update flags.
    #[inline]
    pub fn writes_result(&self) -> bool {
        !matches!(self, Xi::Cmp | Xi::Test)
    }
}

/* ----------------------- Addition & Subtraction ------------------------- */

pub trait AluNeg: Sized {
    fn alu_neg(self) -> (Self, bool, bool, bool);
}

pub trait AluSub<Rhs = Self>: Sized {
    fn alu_sub(self, rhs: Rhs) -> (Self, bool, bool, bool);
}

pub trait AluSbb<Rhs = Self>: Sized {
    fn alu_sbb(self, rhs: Rhs, carry: bool) -> (Self, bool, bool, bool);
}
pub trait AluAdd<Rhs = Self>: Sized {
    fn alu_add(self, rhs: Rhs) -> (Self, bool, bool, bool);
}

pub trait AluAdc<Rhs = Self>: Sized {
    fn alu_adc(self, rhs: Rhs, carry: bool) -> (Self, bool, bool, bool);
}

macro_rules! impl_neg {
    ($prim:ty) => {
        impl AluNeg for $prim {
            /// Negation
            ///
            /// Implemented as Sub(0 - Self). Flags are identical for Sub.
            fn alu_neg(self) -> (Self, bool, bool, bool) {
                (0 as $prim).alu_sub(self)
            }
        }
    };
}

macro_rules! impl_sbb {
    ($prim:ty) => {
        impl AluSub for $prim {
            fn alu_sub(self, rhs: Self) -> (Self, bool, bool, bool) {
                self.alu_sbb(rhs, false)
            }
        }

        impl AluSbb for $prim {
            /// Subtraction with borrow from carry flag
            ///
            /// Carry flag is set if unsigned overflow occurred.
            /// Overflow flag is set if signed overflow occurred.
            /// AF flag is set on borrow from the low nibble.
            fn alu_sbb(self, rhs: Self, carry_in: bool) -> (Self, bool, bool, bool) {
                let lhs_w = self as u64;
                let rhs_w = rhs as u64;
                let result = lhs_w.wrapping_sub(rhs_w + carry_in as u64);
                let carry = result & !(<$prim>::MAX as u64) != 0;
                let sign: u64 = 1 << (<$prim>::BITS - 1);
                let overflow = (lhs_w ^ rhs_w) & (lhs_w ^ result) & sign != 0;
                let aux_carry = ((lhs_w ^ rhs_w ^ result) & 0x10) != 0;
                (result as Self, carry, overflow, aux_carry)
            }
        }
    };
}

macro_rules! impl_adc {
    ($prim:ty) => {
        impl AluAdd for $prim {
            fn alu_add(self, rhs: Self) -> (Self, bool, bool, bool) {
                self.alu_adc(rhs, false)
            }
        }

        impl AluAdc for $prim {
            /// Addition with carry from carry flag
            ///
            /// Carry flag is set if unsigned overflow occurred.
            /// Overflow flag is set if signed overflow occurred.
            /// AF flag is set on carry out of the low nibble.
            fn alu_adc(self, rhs: Self, carry_in: bool) -> (Self, bool, bool, bool) {
                let lhs_w = self as u64;
                let rhs_w = rhs as u64;
                let result = lhs_w + rhs_w + carry_in as u64;
                let carry = result > <$prim>::MAX as u64;
                let sign: u64 = 1 << (<$prim>::BITS - 1);
                let overflow = (lhs_w ^ result) & (rhs_w ^ result) & sign != 0;
                let aux_carry = ((lhs_w ^ rhs_w ^ result) & 0x10) != 0;
                (result as Self, carry, overflow, aux_carry)
            }
        }
    };
}

impl_neg!(u8);
impl_neg!(u16);
impl_neg!(u32);
impl_sbb!(u8);
impl_sbb!(u16);
impl_sbb!(u32);
impl_adc!(u8);
impl_adc!(u16);
impl_adc!(u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alu_add() {
        let (result, carry, overflow, aux) = 0xFFu8.alu_add(1);
        assert_eq!(result, 0);
        assert_eq!(carry, true);
        assert_eq!(overflow, false);
        assert_eq!(aux, true);

        let (result, carry, overflow, _) = 0x7FFFu16.alu_add(1);
        assert_eq!(result, 0x8000);
        assert_eq!(carry, false);
        assert_eq!(overflow, true);
    }

    #[test]
    fn test_alu_adc_u32() {
        let (result, carry, overflow, _) = 0u32.alu_adc(0xFFFF_FFFF, true);
        assert_eq!(result, 0);
        assert_eq!(carry, true);
        assert_eq!(overflow, false);
    }

    #[test]
    fn test_alu_sbb() {
        let (result, carry, overflow, _) = 0u32.alu_sbb(0xFFFF_FFFF, true);
        assert_eq!(result, 0);
        assert_eq!(carry, true);
        assert_eq!(overflow, false);

        let (result, carry, overflow, aux) = 0x80u8.alu_sub(1);
        assert_eq!(result, 0x7F);
        assert_eq!(carry, false);
        assert_eq!(overflow, true);
        assert_eq!(aux, true);
    }

    #[test]
    fn test_alu_neg() {
        let (result, carry, overflow, _) = 0x8000u16.alu_neg();
        assert_eq!(result, 0x8000);
        assert_eq!(carry, true);
        assert_eq!(overflow, true);

        let (result, carry, _, _) = 0u8.alu_neg();
        assert_eq!(result, 0);
        assert_eq!(carry, false);
    }

    #[test]
    fn test_alu_random_u16() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x286);
        for _ in 0..10_000 {
            let a: u16 = rng.random();
            let b: u16 = rng.random();

            let (result, carry, overflow, _) = a.alu_add(b);
            assert_eq!((result, carry), a.overflowing_add(b));
            assert_eq!(overflow, (a as i16).overflowing_add(b as i16).1);

            let (result, carry, overflow, _) = a.alu_sub(b);
            assert_eq!((result, carry), a.overflowing_sub(b));
            assert_eq!(overflow, (a as i16).overflowing_sub(b as i16).1);
        }
    }
}
