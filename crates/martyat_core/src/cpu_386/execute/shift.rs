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

    cpu_386::execute::shift.rs

    Shifts, rotates and the double precision shifts.

*/
use crate::cpu_common::InstructionWidth;

use super::{super::*, ExecResult, Op};

/// Source of a shift count.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShiftCount {
    One,
    Cl,
    Imm,
}

impl Intel386 {
    /// Both CPUs mask shift counts to 5 bits.
    fn shift_count(&self, count: ShiftCount) -> u32 {
        match count {
            ShiftCount::One => 1,
            ShiftCount::Cl => self.reg8(REG_ECX as u8) as u32 & 0x1F,
            ShiftCount::Imm => self.i.imm & 0x1F,
        }
    }

    /// Shift or rotate `value` by a nonzero `count`. The operation is selected by the reg field
    /// of ModR/M, with /6 an alias of SHL.
    pub(crate) fn shift_op(&mut self, op: u8, width: InstructionWidth, value: u32, count: u32) -> u32 {
        let bits = width.bits();
        let mask = width.mask();
        let sign = width.sign_bit();
        let value = value & mask;

        let result = match op & 0x07 {
            0 => {
                let n = count % bits;
                let result = ((value << n) | (value >> ((bits - n) % bits))) & mask;
                let cf = result & 1 != 0;
                self.set_flag_state(Flag::Carry, cf);
                self.set_flag_state(Flag::Overflow, (result & sign != 0) != cf);
                return result;
            }
            1 => {
                let n = count % bits;
                let result = ((value >> n) | (value << ((bits - n) % bits))) & mask;
                self.set_flag_state(Flag::Carry, result & sign != 0);
                self.set_flag_state(Flag::Overflow, ((result ^ (result << 1)) & sign) != 0);
                return result;
            }
            2 => {
                let mut result = value;
                let mut cf = self.get_flag(Flag::Carry);
                for _ in 0..count % (bits + 1) {
                    let out = result & sign != 0;
                    result = ((result << 1) | cf as u32) & mask;
                    cf = out;
                }
                self.set_flag_state(Flag::Carry, cf);
                self.set_flag_state(Flag::Overflow, (result & sign != 0) != cf);
                return result;
            }
            3 => {
                let mut result = value;
                let mut cf = self.get_flag(Flag::Carry);
                for _ in 0..count % (bits + 1) {
                    let out = result & 1 != 0;
                    result = (result >> 1) | if cf { sign } else { 0 };
                    cf = out;
                }
                self.set_flag_state(Flag::Carry, cf);
                self.set_flag_state(Flag::Overflow, ((result ^ (result << 1)) & sign) != 0);
                return result;
            }
            5 => {
                let wide = value as u64;
                let cf = (wide >> (count - 1)) & 1 != 0;
                self.set_flag_state(Flag::Carry, cf);
                self.set_flag_state(Flag::Overflow, value & sign != 0);
                (wide >> count) as u32 & mask
            }
            7 => {
                let wide = width.sign_extend(value) as i32 as i64;
                let cf = (wide >> (count - 1)) & 1 != 0;
                self.set_flag_state(Flag::Carry, cf);
                self.clear_flag(Flag::Overflow);
                (wide >> count) as u32 & mask
            }
            _ => {
                let wide = (value as u64) << count;
                let result = wide as u32 & mask;
                let cf = (wide >> bits) & 1 != 0;
                self.set_flag_state(Flag::Carry, cf);
                self.set_flag_state(Flag::Overflow, (result & sign != 0) != cf);
                result
            }
        };
        self.clear_flag(Flag::AuxCarry);
        self.set_szp(width, result);
        result
    }

    pub(crate) fn shift_e(&mut self, width: InstructionWidth, count: ShiftCount) -> ExecResult {
        let count = self.shift_count(count);
        self.check_e_writable(width)?;
        let value = self.load_e(width)?;
        if count == 0 {
            return Ok(());
        }
        // The 286 spends one cycle per bit shifted.
        if !self.cpu_type.is_386() && !matches!(self.i.op, Op::ShiftEb1 | Op::ShiftEw1 | Op::ShiftEd1) {
            cycles!(self, count);
        }
        let result = self.shift_op(self.i.modrm_reg(), width, value, count);
        self.store_e(width, result)
    }

    pub(crate) fn shld(&mut self, width: InstructionWidth, count: ShiftCount) -> ExecResult {
        let count = self.shift_count(count);
        self.check_e_writable(width)?;
        let dest = self.load_e(width)?;
        if count == 0 {
            return Ok(());
        }
        let src = self.load_g(width);
        let bits = width.bits();
        let wide = (((dest as u128) << bits) | src as u128) << count;
        let result = (wide >> bits) as u32 & width.mask();
        let cf = (wide >> (bits * 2)) & 1 != 0;
        self.set_flag_state(Flag::Carry, cf);
        self.set_flag_state(Flag::Overflow, ((dest ^ result) & width.sign_bit()) != 0);
        self.set_szp(width, result);
        self.store_e(width, result)
    }

    pub(crate) fn shrd(&mut self, width: InstructionWidth, count: ShiftCount) -> ExecResult {
        let count = self.shift_count(count);
        self.check_e_writable(width)?;
        let dest = self.load_e(width)?;
        if count == 0 {
            return Ok(());
        }
        let src = self.load_g(width);
        let bits = width.bits();
        let wide = ((src as u128) << bits) | dest as u128;
        let result = (wide >> count) as u32 & width.mask();
        let cf = (wide >> (count - 1)) & 1 != 0;
        self.set_flag_state(Flag::Carry, cf);
        self.set_flag_state(Flag::Overflow, ((dest ^ result) & width.sign_bit()) != 0);
        self.set_szp(width, result);
        self.store_e(width, result)
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::{super::*, *};

    #[test]
    fn test_shift_ops() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        // shl
        assert_eq!(cpu.shift_op(4, W8, 0x81, 1), 0x02);
        assert!(cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Overflow));
        // shr by more than the width clears everything
        assert_eq!(cpu.shift_op(5, W8, 0xFF, 9), 0);
        // sar keeps the sign
        assert_eq!(cpu.shift_op(7, W16, 0x8000, 4), 0xF800);
        assert!(!cpu.get_flag(Flag::Carry));
        // rol
        assert_eq!(cpu.shift_op(0, W8, 0x81, 1), 0x03);
        assert!(cpu.get_flag(Flag::Carry));
        // ror
        assert_eq!(cpu.shift_op(1, W16, 0x0001, 1), 0x8000);
        assert!(cpu.get_flag(Flag::Carry));
        // rcl through a set carry
        cpu.set_flag(Flag::Carry);
        assert_eq!(cpu.shift_op(2, W8, 0x00, 1), 0x01);
        assert!(!cpu.get_flag(Flag::Carry));
        // rcr by width + 1 is the identity
        assert_eq!(cpu.shift_op(3, W8, 0x5A, 9), 0x5A);
    }

    #[test]
    fn test_double_shifts() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        // shld eax, ebx, 8
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xD8;
        cpu.i.imm = 8;
        cpu.set_reg32(REG_EAX as u8, 0x1234_5678);
        cpu.set_reg32(REG_EBX as u8, 0x9ABC_DEF0);
        cpu.shld(W32, ShiftCount::Imm).unwrap();
        assert_eq!(cpu.reg32(REG_EAX as u8), 0x3456_789A);

        // shrd eax, ebx, 8
        cpu.set_reg32(REG_EAX as u8, 0x1234_5678);
        cpu.shrd(W32, ShiftCount::Imm).unwrap();
        assert_eq!(cpu.reg32(REG_EAX as u8), 0xF012_3456);
        assert!(!cpu.get_flag(Flag::Carry));
    }

    #[test]
    fn test_double_shift_flags() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        // shld eax,ebx,4
        m.load_program(0x1000, &[0x66, 0x0F, 0xA4, 0xD8, 0x04]);
        m.cpu_mut().set_reg32(REG_EAX as u8, 0x1234_5678);
        m.cpu_mut().set_reg32(REG_EBX as u8, 0x9ABC_DEF0);
        m.step();
        assert_eq!(m.cpu().reg32(REG_EAX as u8), 0x2345_6789);
        assert!(m.cpu().get_flag(Flag::Carry));

        let cpu = m.cpu_mut();
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xD8;
        cpu.i.imm = 1;

        // shld ax,bx,1: the sign changes
        cpu.set_reg16(REG_EAX as u8, 0x4000);
        cpu.set_reg16(REG_EBX as u8, 0x8000);
        cpu.shld(W16, ShiftCount::Imm).unwrap();
        assert_eq!(cpu.reg16(REG_EAX as u8), 0x8001);
        assert!(!cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Overflow));

        // shld eax,ebx,1 shifting out the top bit
        cpu.set_reg32(REG_EAX as u8, 0x8000_0000);
        cpu.set_reg32(REG_EBX as u8, 0);
        cpu.shld(W32, ShiftCount::Imm).unwrap();
        assert_eq!(cpu.reg32(REG_EAX as u8), 0);
        assert!(cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Overflow));

        // shrd ax,bx,1
        cpu.set_reg16(REG_EAX as u8, 0x0003);
        cpu.set_reg16(REG_EBX as u8, 0x0001);
        cpu.shrd(W16, ShiftCount::Imm).unwrap();
        assert_eq!(cpu.reg16(REG_EAX as u8), 0x8001);
        assert!(cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Overflow));

        // shrd eax,ebx,1
        cpu.set_reg32(REG_EAX as u8, 0x0000_0002);
        cpu.set_reg32(REG_EBX as u8, 0);
        cpu.shrd(W32, ShiftCount::Imm).unwrap();
        assert_eq!(cpu.reg32(REG_EAX as u8), 0x0000_0001);
        assert!(!cpu.get_flag(Flag::Carry));
        assert!(!cpu.get_flag(Flag::Overflow));
    }
}
