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

    cpu_386::execute::alu.rs

    Arithmetic and logic instructions, and the BCD adjustments.

*/
use crate::cpu_common::{alu::*, CpuException, InstructionWidth};

use super::{super::*, ExecResult, W16, W8};

/// Call an ALU trait method at the width of the operation and widen the result back to u32.
macro_rules! by_width {
    ($w:expr, $a:expr, $b:expr, $method:ident $(, $carry:expr)?) => {
        match $w {
            InstructionWidth::Byte => {
                let (r, c, o, af) = ($a as u8).$method($b as u8 $(, $carry)?);
                (r as u32, c, o, af)
            }
            InstructionWidth::Word => {
                let (r, c, o, af) = ($a as u16).$method($b as u16 $(, $carry)?);
                (r as u32, c, o, af)
            }
            InstructionWidth::Dword => $a.$method($b $(, $carry)?),
        }
    };
}

impl Intel386 {
    /// Perform `xi` on `a` and `b` and set the arithmetic flags. Returns the result masked to
    /// the width.
    pub(crate) fn alu(&mut self, xi: Xi, width: InstructionWidth, a: u32, b: u32) -> u32 {
        let carry_in = self.get_flag(Flag::Carry);
        let (result, carry, overflow, aux) = match xi {
            Xi::Add => by_width!(width, a, b, alu_add),
            Xi::Adc => by_width!(width, a, b, alu_adc, carry_in),
            Xi::Sub | Xi::Cmp => by_width!(width, a, b, alu_sub),
            Xi::Sbb => by_width!(width, a, b, alu_sbb, carry_in),
            Xi::And | Xi::Test => (a & b, false, false, false),
            Xi::Or => (a | b, false, false, false),
            Xi::Xor => (a ^ b, false, false, false),
        };
        let result = result & width.mask();
        self.set_flag_state(Flag::Carry, carry);
        self.set_flag_state(Flag::Overflow, overflow);
        self.set_flag_state(Flag::AuxCarry, aux);
        self.set_szp(width, result);
        result
    }

    /// INC and DEC leave CF alone.
    fn inc_dec(&mut self, width: InstructionWidth, value: u32, inc: bool) -> u32 {
        let carry = self.get_flag(Flag::Carry);
        let xi = if inc { Xi::Add } else { Xi::Sub };
        let result = self.alu(xi, width, value, 1);
        self.set_flag_state(Flag::Carry, carry);
        result
    }

    /// op r/m, reg
    pub(crate) fn alu_e_g(&mut self, xi: Xi, width: InstructionWidth) -> ExecResult {
        if xi.writes_result() {
            self.check_e_writable(width)?;
        }
        let a = self.load_e(width)?;
        let b = self.load_g(width);
        let result = self.alu(xi, width, a, b);
        if xi.writes_result() {
            self.store_e(width, result)?;
        }
        Ok(())
    }

    /// op reg, r/m
    pub(crate) fn alu_g_e(&mut self, xi: Xi, width: InstructionWidth) -> ExecResult {
        let a = self.load_g(width);
        let b = self.load_e(width)?;
        let result = self.alu(xi, width, a, b);
        if xi.writes_result() {
            self.store_g(width, result);
        }
        Ok(())
    }

    /// op AL/AX/EAX, imm
    pub(crate) fn alu_a_i(&mut self, xi: Xi, width: InstructionWidth) -> ExecResult {
        let a = self.reg(width, REG_EAX as u8);
        let b = self.imm(width);
        let result = self.alu(xi, width, a, b);
        if xi.writes_result() {
            self.set_reg(width, REG_EAX as u8, result);
        }
        Ok(())
    }

    /// op r/m, imm
    pub(crate) fn alu_e_i(&mut self, xi: Xi, width: InstructionWidth) -> ExecResult {
        if xi.writes_result() {
            self.check_e_writable(width)?;
        }
        let a = self.load_e(width)?;
        let b = self.imm(width);
        let result = self.alu(xi, width, a, b);
        if xi.writes_result() {
            self.store_e(width, result)?;
        }
        Ok(())
    }

    pub(crate) fn test_e_g(&mut self, width: InstructionWidth) -> ExecResult {
        self.alu_e_g(Xi::Test, width)
    }

    pub(crate) fn test_a_i(&mut self, width: InstructionWidth) -> ExecResult {
        self.alu_a_i(Xi::Test, width)
    }

    pub(crate) fn test_e_i(&mut self, width: InstructionWidth) -> ExecResult {
        self.alu_e_i(Xi::Test, width)
    }

    pub(crate) fn inc_reg(&mut self, width: InstructionWidth) -> ExecResult {
        let n = (self.i.opcode & 0x07) as u8;
        let value = self.reg(width, n);
        let result = self.inc_dec(width, value, true);
        self.set_reg(width, n, result);
        Ok(())
    }

    pub(crate) fn dec_reg(&mut self, width: InstructionWidth) -> ExecResult {
        let n = (self.i.opcode & 0x07) as u8;
        let value = self.reg(width, n);
        let result = self.inc_dec(width, value, false);
        self.set_reg(width, n, result);
        Ok(())
    }

    pub(crate) fn inc_e(&mut self, width: InstructionWidth) -> ExecResult {
        self.check_e_writable(width)?;
        let value = self.load_e(width)?;
        let result = self.inc_dec(width, value, true);
        self.store_e(width, result)
    }

    pub(crate) fn dec_e(&mut self, width: InstructionWidth) -> ExecResult {
        self.check_e_writable(width)?;
        let value = self.load_e(width)?;
        let result = self.inc_dec(width, value, false);
        self.store_e(width, result)
    }

    /// NOT changes no flags.
    pub(crate) fn not_e(&mut self, width: InstructionWidth) -> ExecResult {
        self.check_e_writable(width)?;
        let value = self.load_e(width)?;
        self.store_e(width, !value & width.mask())
    }

    pub(crate) fn neg_e(&mut self, width: InstructionWidth) -> ExecResult {
        self.check_e_writable(width)?;
        let value = self.load_e(width)?;
        let result = self.alu(Xi::Sub, width, 0, value);
        self.store_e(width, result)
    }

    /* --------------------------------- BCD --------------------------------- */

    #[inline]
    fn al(&self) -> u8 {
        self.reg8(0)
    }

    #[inline]
    fn ah(&self) -> u8 {
        self.reg8(4)
    }

    pub(crate) fn daa(&mut self) -> ExecResult {
        let old_al = self.al();
        let old_cf = self.get_flag(Flag::Carry);
        if (old_al & 0x0F) > 9 || self.get_flag(Flag::AuxCarry) {
            self.set_reg8(0, old_al.wrapping_add(6));
            self.set_flag(Flag::AuxCarry);
        }
        else {
            self.clear_flag(Flag::AuxCarry);
        }
        if old_al > 0x99 || old_cf {
            self.set_reg8(0, self.al().wrapping_add(0x60));
            self.set_flag(Flag::Carry);
        }
        else {
            self.clear_flag(Flag::Carry);
        }
        self.set_szp(W8, self.al() as u32);
        Ok(())
    }

    pub(crate) fn das(&mut self) -> ExecResult {
        let old_al = self.al();
        let old_cf = self.get_flag(Flag::Carry);
        if (old_al & 0x0F) > 9 || self.get_flag(Flag::AuxCarry) {
            self.set_reg8(0, old_al.wrapping_sub(6));
            self.set_flag(Flag::AuxCarry);
        }
        else {
            self.clear_flag(Flag::AuxCarry);
        }
        if old_al > 0x99 || old_cf {
            self.set_reg8(0, self.al().wrapping_sub(0x60));
            self.set_flag(Flag::Carry);
        }
        else {
            self.clear_flag(Flag::Carry);
        }
        self.set_szp(W8, self.al() as u32);
        Ok(())
    }

    pub(crate) fn aaa(&mut self) -> ExecResult {
        let adjust = (self.al() & 0x0F) > 9 || self.get_flag(Flag::AuxCarry);
        if adjust {
            self.set_reg8(4, self.ah().wrapping_add(1));
            self.set_reg8(0, self.al().wrapping_add(6));
        }
        self.set_flag_state(Flag::AuxCarry, adjust);
        self.set_flag_state(Flag::Carry, adjust);
        self.set_reg8(0, self.al() & 0x0F);
        self.set_szp(W8, self.al() as u32);
        Ok(())
    }

    pub(crate) fn aas(&mut self) -> ExecResult {
        let adjust = (self.al() & 0x0F) > 9 || self.get_flag(Flag::AuxCarry);
        if adjust {
            self.set_reg8(0, self.al().wrapping_sub(6));
            self.set_reg8(4, self.ah().wrapping_sub(1));
        }
        self.set_flag_state(Flag::AuxCarry, adjust);
        self.set_flag_state(Flag::Carry, adjust);
        self.set_reg8(0, self.al() & 0x0F);
        self.set_szp(W8, self.al() as u32);
        Ok(())
    }

    /// AAM with a zero base raises #DE.
    pub(crate) fn aam(&mut self) -> ExecResult {
        let base = self.i.imm as u8;
        if base == 0 {
            return Err(CpuException::DivideError);
        }
        let al = self.al();
        self.set_reg8(4, al / base);
        self.set_reg8(0, al % base);
        self.set_szp(W8, self.al() as u32);
        Ok(())
    }

    pub(crate) fn aad(&mut self) -> ExecResult {
        let base = self.i.imm as u8;
        let al = self.al().wrapping_add(self.ah().wrapping_mul(base));
        self.set_reg16(0, al as u16);
        self.set_szp(W8, al as u32);
        Ok(())
    }

    /// Undocumented: AL = CF ? FF : 00.
    pub(crate) fn salc(&mut self) -> ExecResult {
        let value = if self.get_flag(Flag::Carry) { 0xFF } else { 0 };
        self.set_reg8(0, value);
        Ok(())
    }

    /// Sign of AX spread into DX, used by CWD.
    pub(crate) fn sign_fill(&self, width: InstructionWidth, value: u32) -> u32 {
        if value & width.sign_bit() != 0 {
            width.mask()
        }
        else {
            0
        }
    }
}
