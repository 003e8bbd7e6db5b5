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

    cpu_386::registers.rs

    General purpose register file and flag helpers.

*/
use crate::cpu_common::InstructionWidth;

use super::*;

/// One general purpose register. The byte, word and dword views share a single little-endian
/// cell, so a narrow write leaves the other bytes alone.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneralRegister([u8; 4]);

impl GeneralRegister {
    #[inline]
    pub fn lo(&self) -> u8 {
        self.0[0]
    }
    #[inline]
    pub fn hi(&self) -> u8 {
        self.0[1]
    }
    #[inline]
    pub fn word(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]])
    }
    #[inline]
    pub fn dword(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }
    #[inline]
    pub fn set_lo(&mut self, value: u8) {
        self.0[0] = value;
    }
    #[inline]
    pub fn set_hi(&mut self, value: u8) {
        self.0[1] = value;
    }
    #[inline]
    pub fn set_word(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.0[0] = lo;
        self.0[1] = hi;
    }
    #[inline]
    pub fn set_dword(&mut self, value: u32) {
        self.0 = value.to_le_bytes();
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flag {
    Carry,
    Parity,
    AuxCarry,
    Zero,
    Sign,
    Trap,
    Interrupt,
    Direction,
    Overflow,
    NestedTask,
    Resume,
    Virtual86,
}

impl Flag {
    #[inline]
    pub fn mask(self) -> u32 {
        match self {
            Flag::Carry => CPU_FLAG_CARRY,
            Flag::Parity => CPU_FLAG_PARITY,
            Flag::AuxCarry => CPU_FLAG_AUX_CARRY,
            Flag::Zero => CPU_FLAG_ZERO,
            Flag::Sign => CPU_FLAG_SIGN,
            Flag::Trap => CPU_FLAG_TRAP,
            Flag::Interrupt => CPU_FLAG_INT_ENABLE,
            Flag::Direction => CPU_FLAG_DIRECTION,
            Flag::Overflow => CPU_FLAG_OVERFLOW,
            Flag::NestedTask => CPU_FLAG_NT,
            Flag::Resume => CPU_FLAG_RF,
            Flag::Virtual86 => CPU_FLAG_VM,
        }
    }
}

const fn build_parity_table() -> [bool; 256] {
    let mut table = [false; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).count_ones() % 2 == 0;
        i += 1;
    }
    table
}

/// Even parity of the low byte of a result.
pub const PARITY_TABLE: [bool; 256] = build_parity_table();

impl Intel386 {
    /// 8-bit register by encoding: 0-3 are AL CL DL BL, 4-7 are AH CH DH BH.
    #[inline]
    pub fn reg8(&self, n: u8) -> u8 {
        let n = n as usize & 7;
        if n < 4 {
            self.regs[n].lo()
        }
        else {
            self.regs[n - 4].hi()
        }
    }

    #[inline]
    pub fn set_reg8(&mut self, n: u8, value: u8) {
        let n = n as usize & 7;
        if n < 4 {
            self.regs[n].set_lo(value)
        }
        else {
            self.regs[n - 4].set_hi(value)
        }
    }

    #[inline]
    pub fn reg16(&self, n: u8) -> u16 {
        self.regs[n as usize & 7].word()
    }

    #[inline]
    pub fn set_reg16(&mut self, n: u8, value: u16) {
        self.regs[n as usize & 7].set_word(value)
    }

    #[inline]
    pub fn reg32(&self, n: u8) -> u32 {
        self.regs[n as usize & 7].dword()
    }

    #[inline]
    pub fn set_reg32(&mut self, n: u8, value: u32) {
        self.regs[n as usize & 7].set_dword(value)
    }

    #[inline]
    pub fn reg(&self, width: InstructionWidth, n: u8) -> u32 {
        match width {
            InstructionWidth::Byte => self.reg8(n) as u32,
            InstructionWidth::Word => self.reg16(n) as u32,
            InstructionWidth::Dword => self.reg32(n),
        }
    }

    #[inline]
    pub fn set_reg(&mut self, width: InstructionWidth, n: u8, value: u32) {
        match width {
            InstructionWidth::Byte => self.set_reg8(n, value as u8),
            InstructionWidth::Word => self.set_reg16(n, value as u16),
            InstructionWidth::Dword => self.set_reg32(n, value),
        }
    }

    #[inline]
    pub fn get_flag(&self, flag: Flag) -> bool {
        self.eflags & flag.mask() != 0
    }

    #[inline]
    pub(crate) fn set_flag(&mut self, flag: Flag) {
        self.eflags |= flag.mask();
    }

    #[inline]
    pub(crate) fn clear_flag(&mut self, flag: Flag) {
        self.eflags &= !flag.mask();
    }

    #[inline]
    pub(crate) fn set_flag_state(&mut self, flag: Flag, state: bool) {
        if state {
            self.set_flag(flag)
        }
        else {
            self.clear_flag(flag)
        }
    }

    /// Set sign, zero and parity from a result of the given width.
    #[inline]
    pub(crate) fn set_szp(&mut self, width: InstructionWidth, result: u32) {
        let result = result & width.mask();
        self.set_flag_state(Flag::Sign, result & width.sign_bit() != 0);
        self.set_flag_state(Flag::Zero, result == 0);
        self.set_flag_state(Flag::Parity, PARITY_TABLE[(result & 0xFF) as usize]);
    }

    /// Address-size masked value of ESP/SP, per the B bit of SS.
    #[inline]
    pub(crate) fn stack_pointer(&self) -> u32 {
        if self.sregs[Segment::SS.index()].cache.big {
            self.reg32(REG_ESP as u8)
        }
        else {
            self.reg16(REG_ESP as u8) as u32
        }
    }

    #[inline]
    pub(crate) fn set_stack_pointer(&mut self, value: u32) {
        if self.sregs[Segment::SS.index()].cache.big {
            self.set_reg32(REG_ESP as u8, value)
        }
        else {
            self.set_reg16(REG_ESP as u8, value as u16)
        }
    }

    pub fn eax(&self) -> u32 {
        self.reg32(REG_EAX as u8)
    }
    pub fn ecx(&self) -> u32 {
        self.reg32(REG_ECX as u8)
    }
    pub fn edx(&self) -> u32 {
        self.reg32(REG_EDX as u8)
    }
    pub fn ebx(&self) -> u32 {
        self.reg32(REG_EBX as u8)
    }
    pub fn esp(&self) -> u32 {
        self.reg32(REG_ESP as u8)
    }
    pub fn ebp(&self) -> u32 {
        self.reg32(REG_EBP as u8)
    }
    pub fn esi(&self) -> u32 {
        self.reg32(REG_ESI as u8)
    }
    pub fn edi(&self) -> u32 {
        self.reg32(REG_EDI as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_views() {
        let mut r = GeneralRegister::default();
        r.set_dword(0x1234_5678);
        r.set_lo(0xAA);
        assert_eq!(r.dword(), 0x1234_56AA);
        r.set_hi(0xBB);
        assert_eq!(r.dword(), 0x1234_BBAA);
        r.set_word(0xCCDD);
        assert_eq!(r.dword(), 0x1234_CCDD);
        assert_eq!(r.hi(), 0xCC);
    }

    #[test]
    fn test_parity_table() {
        assert!(PARITY_TABLE[0]);
        assert!(!PARITY_TABLE[1]);
        assert!(PARITY_TABLE[3]);
        assert!(PARITY_TABLE[0xFF]);
    }
}
