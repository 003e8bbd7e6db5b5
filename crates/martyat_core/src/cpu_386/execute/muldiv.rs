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

    cpu_386::execute::muldiv.rs

    Multiply and divide.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{super::*, ExecResult};

impl Intel386 {
    /// Accumulator and its extension register as a double-width value: AX for byte operations,
    /// DX:AX for word and EDX:EAX for dword.
    fn read_acc_pair(&self, width: InstructionWidth) -> u64 {
        match width {
            InstructionWidth::Byte => self.reg16(REG_EAX as u8) as u64,
            InstructionWidth::Word => (self.reg16(REG_EDX as u8) as u64) << 16 | self.reg16(REG_EAX as u8) as u64,
            InstructionWidth::Dword => (self.reg32(REG_EDX as u8) as u64) << 32 | self.reg32(REG_EAX as u8) as u64,
        }
    }

    fn write_acc_pair(&mut self, width: InstructionWidth, value: u64) {
        match width {
            InstructionWidth::Byte => self.set_reg16(REG_EAX as u8, value as u16),
            InstructionWidth::Word => {
                self.set_reg16(REG_EAX as u8, value as u16);
                self.set_reg16(REG_EDX as u8, (value >> 16) as u16);
            }
            InstructionWidth::Dword => {
                self.set_reg32(REG_EAX as u8, value as u32);
                self.set_reg32(REG_EDX as u8, (value >> 32) as u32);
            }
        }
    }

    /// Quotient and remainder of a divide go to AL/AH, AX/DX or EAX/EDX.
    fn write_div_result(&mut self, width: InstructionWidth, quotient: u32, remainder: u32) {
        match width {
            InstructionWidth::Byte => {
                self.set_reg8(0, quotient as u8);
                self.set_reg8(4, remainder as u8);
            }
            _ => {
                self.set_reg(width, REG_EAX as u8, quotient);
                self.set_reg(width, REG_EDX as u8, remainder);
            }
        }
    }

    #[inline]
    fn signed(width: InstructionWidth, value: u32) -> i64 {
        width.sign_extend(value) as i32 as i64
    }

    pub(crate) fn mul_e(&mut self, width: InstructionWidth) -> ExecResult {
        let src = self.load_e(width)? as u64;
        let acc = self.reg(width, REG_EAX as u8) as u64;
        let product = acc * src;
        self.write_acc_pair(width, product);
        let high = product >> width.bits();
        self.set_flag_state(Flag::Carry, high != 0);
        self.set_flag_state(Flag::Overflow, high != 0);
        self.set_szp(width, product as u32);
        Ok(())
    }

    pub(crate) fn imul_e(&mut self, width: InstructionWidth) -> ExecResult {
        let src = Self::signed(width, self.load_e(width)?);
        let acc = Self::signed(width, self.reg(width, REG_EAX as u8));
        let product = acc * src;
        self.write_acc_pair(width, product as u64);
        let fits = Self::signed(width, product as u32) == product;
        self.set_flag_state(Flag::Carry, !fits);
        self.set_flag_state(Flag::Overflow, !fits);
        self.set_szp(width, product as u32);
        Ok(())
    }

    pub(crate) fn div_e(&mut self, width: InstructionWidth) -> ExecResult {
        let divisor = self.load_e(width)? as u64;
        if divisor == 0 {
            return Err(CpuException::DivideError);
        }
        let dividend = self.read_acc_pair(width);
        let quotient = dividend / divisor;
        if quotient > width.mask() as u64 {
            return Err(CpuException::DivideError);
        }
        let remainder = dividend % divisor;
        self.write_div_result(width, quotient as u32, remainder as u32);
        Ok(())
    }

    pub(crate) fn idiv_e(&mut self, width: InstructionWidth) -> ExecResult {
        let divisor = Self::signed(width, self.load_e(width)?);
        if divisor == 0 {
            return Err(CpuException::DivideError);
        }
        let raw = self.read_acc_pair(width);
        let dividend = match width {
            InstructionWidth::Byte => raw as u16 as i16 as i64,
            InstructionWidth::Word => raw as u32 as i32 as i64,
            InstructionWidth::Dword => raw as i64,
        };
        let (Some(quotient), Some(remainder)) = (dividend.checked_div(divisor), dividend.checked_rem(divisor))
        else {
            return Err(CpuException::DivideError);
        };
        if Self::signed(width, quotient as u32) != quotient {
            return Err(CpuException::DivideError);
        }
        self.write_div_result(width, quotient as u32 & width.mask(), remainder as u32 & width.mask());
        Ok(())
    }

    fn imul_truncating(&mut self, width: InstructionWidth, a: u32, b: u32) -> u32 {
        let product = Self::signed(width, a) * Self::signed(width, b);
        let fits = Self::signed(width, product as u32) == product;
        self.set_flag_state(Flag::Carry, !fits);
        self.set_flag_state(Flag::Overflow, !fits);
        self.set_szp(width, product as u32);
        product as u32 & width.mask()
    }

    /// IMUL reg, r/m, imm
    pub(crate) fn imul_g_e_i(&mut self, width: InstructionWidth) -> ExecResult {
        let src = self.load_e(width)?;
        let imm = self.imm(width);
        let result = self.imul_truncating(width, src, imm);
        self.store_g(width, result);
        Ok(())
    }

    /// IMUL reg, r/m
    pub(crate) fn imul_g_e(&mut self, width: InstructionWidth) -> ExecResult {
        let src = self.load_e(width)?;
        let dst = self.load_g(width);
        let result = self.imul_truncating(width, dst, src);
        self.store_g(width, result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::{super::*, *};

    #[test]
    fn test_mul_word() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        // mul cx
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xE1;
        cpu.set_reg16(REG_EAX as u8, 0x1234);
        cpu.set_reg16(REG_ECX as u8, 0x100);
        cpu.mul_e(W16).unwrap();
        assert_eq!(cpu.reg16(REG_EAX as u8), 0x3400);
        assert_eq!(cpu.reg16(REG_EDX as u8), 0x0012);
        assert!(cpu.get_flag(Flag::Carry));
    }

    #[test]
    fn test_div_overflow() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        // div cl
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xF1;
        cpu.set_reg16(REG_EAX as u8, 0x1000);
        cpu.set_reg8(REG_ECX as u8, 0x10);
        assert_eq!(cpu.div_e(W8), Err(CpuException::DivideError));
        cpu.set_reg8(REG_ECX as u8, 0);
        assert_eq!(cpu.div_e(W8), Err(CpuException::DivideError));
        cpu.set_reg16(REG_EAX as u8, 0x0107);
        cpu.set_reg8(REG_ECX as u8, 0x10);
        cpu.div_e(W8).unwrap();
        assert_eq!(cpu.reg8(0), 0x10);
        assert_eq!(cpu.reg8(4), 0x07);
    }

    #[test]
    fn test_idiv_signed() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        // idiv ecx
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xF9;
        cpu.set_reg32(REG_EDX as u8, 0xFFFF_FFFF);
        cpu.set_reg32(REG_EAX as u8, (-7i32) as u32);
        cpu.set_reg32(REG_ECX as u8, 2);
        cpu.idiv_e(W32).unwrap();
        assert_eq!(cpu.reg32(REG_EAX as u8) as i32, -3);
        assert_eq!(cpu.reg32(REG_EDX as u8) as i32, -1);
    }
}
