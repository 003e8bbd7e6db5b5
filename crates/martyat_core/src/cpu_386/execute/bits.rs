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

    cpu_386::execute::bits.rs

    Bit test and scan, SETcc, and the zero and sign extending moves.

*/
use crate::cpu_common::InstructionWidth;

use super::{super::*, ExecResult, W8};

/// What a bit test instruction does with the selected bit after copying it to CF.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BitOp {
    Test,
    Set,
    Reset,
    Complement,
}

impl BitOp {
    #[inline]
    fn apply(self, value: u32, bit: u32) -> u32 {
        match self {
            BitOp::Test => value,
            BitOp::Set => value | (1 << bit),
            BitOp::Reset => value & !(1 << bit),
            BitOp::Complement => value ^ (1 << bit),
        }
    }
}

impl Intel386 {
    fn bit_test(&mut self, op: BitOp, width: InstructionWidth, seg: Segment, offset: u32, bit: u32) -> ExecResult {
        if op != BitOp::Test {
            self.seg_check_write(seg, offset, width.bytes())?;
        }
        let value = self.read_mem(seg, offset, width)?;
        self.set_flag_state(Flag::Carry, value & (1 << bit) != 0);
        if op != BitOp::Test {
            self.write_mem(seg, offset, width, op.apply(value, bit))?;
        }
        Ok(())
    }

    /// BT r/m, reg. With a memory operand the register is a signed bit offset that may address
    /// memory outside the operand.
    pub(crate) fn bt_e_g(&mut self, op: BitOp, width: InstructionWidth) -> ExecResult {
        let bit_offset = self.load_g(width);
        let bits = width.bits();
        if self.i.is_register_form() {
            let bit = bit_offset & (bits - 1);
            let value = self.load_e(width)?;
            self.set_flag_state(Flag::Carry, value & (1 << bit) != 0);
            if op != BitOp::Test {
                self.store_e(width, op.apply(value, bit))?;
            }
            return Ok(());
        }
        let (seg, offset) = self.ea();
        let signed = width.sign_extend(bit_offset) as i32;
        let displacement = (signed >> bits.trailing_zeros()) * width.bytes() as i32;
        let offset = offset.wrapping_add(displacement as u32) & self.i.address_mask();
        let bit = bit_offset & (bits - 1);
        self.bit_test(op, width, seg, offset, bit)
    }

    /// BT r/m, imm8
    pub(crate) fn bt_e_i(&mut self, op: BitOp, width: InstructionWidth) -> ExecResult {
        let bit = self.i.imm & (width.bits() - 1);
        if self.i.is_register_form() {
            let value = self.load_e(width)?;
            self.set_flag_state(Flag::Carry, value & (1 << bit) != 0);
            if op != BitOp::Test {
                self.store_e(width, op.apply(value, bit))?;
            }
            return Ok(());
        }
        let (seg, offset) = self.ea();
        self.bit_test(op, width, seg, offset, bit)
    }

    /// BSF. A zero source sets ZF and leaves the destination unchanged.
    pub(crate) fn bsf(&mut self, width: InstructionWidth) -> ExecResult {
        let value = self.load_e(width)?;
        if value == 0 {
            self.set_flag(Flag::Zero);
            return Ok(());
        }
        self.clear_flag(Flag::Zero);
        let index = value.trailing_zeros();
        cycles!(self, index);
        self.store_g(width, index);
        Ok(())
    }

    pub(crate) fn bsr(&mut self, width: InstructionWidth) -> ExecResult {
        let value = self.load_e(width)?;
        if value == 0 {
            self.set_flag(Flag::Zero);
            return Ok(());
        }
        self.clear_flag(Flag::Zero);
        let index = 31 - value.leading_zeros();
        cycles!(self, width.bits() - 1 - index);
        self.store_g(width, index);
        Ok(())
    }

    pub(crate) fn setcc(&mut self, cc: u8) -> ExecResult {
        let value = self.cond(cc) as u32;
        self.store_e(W8, value)
    }

    pub(crate) fn movzx(&mut self, dst: InstructionWidth, src: InstructionWidth) -> ExecResult {
        let value = self.load_e(src)?;
        self.store_g(dst, value);
        Ok(())
    }

    pub(crate) fn movsx(&mut self, dst: InstructionWidth, src: InstructionWidth) -> ExecResult {
        let value = src.sign_extend(self.load_e(src)?);
        self.store_g(dst, value & dst.mask());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::{super::*, *};

    #[test]
    fn test_bt_memory_offset() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        m.poke_u16(0x0FFE, 0x8000);
        let cpu = m.cpu_mut();
        // bts word [0x1000], ax with ax = -1 addresses bit 15 of the word below
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0x06;
        cpu.i.disp = 0x1000;
        cpu.set_reg16(REG_EAX as u8, 0xFFFF);
        cpu.bt_e_g(BitOp::Reset, W16).unwrap();
        assert!(cpu.get_flag(Flag::Carry));
        assert_eq!(cpu.read_mem(Segment::DS, 0x0FFE, W16), Ok(0));
    }

    #[test]
    fn test_bit_scan() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        // bsf ax, cx / bsr ax, cx
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xC1;
        cpu.set_reg16(REG_ECX as u8, 0x0110);
        cpu.bsf(W16).unwrap();
        assert_eq!(cpu.reg16(REG_EAX as u8), 4);
        cpu.bsr(W16).unwrap();
        assert_eq!(cpu.reg16(REG_EAX as u8), 8);
        cpu.set_reg16(REG_ECX as u8, 0);
        cpu.bsf(W16).unwrap();
        assert!(cpu.get_flag(Flag::Zero));
        assert_eq!(cpu.reg16(REG_EAX as u8), 8);
    }

    #[test]
    fn test_movsx() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        // movsx eax, cl
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xC1;
        cpu.set_reg8(REG_ECX as u8, 0x80);
        cpu.movsx(W32, W8).unwrap();
        assert_eq!(cpu.reg32(REG_EAX as u8), 0xFFFF_FF80);
        cpu.movzx(W32, W8).unwrap();
        assert_eq!(cpu.reg32(REG_EAX as u8), 0x80);
    }
}
