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

    cpu_386::execute::stack.rs

    PUSH and POP in all their forms, PUSHA/POPA, PUSHF/POPF, ENTER
    and LEAVE.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{super::*, ExecResult, W16};

impl Intel386 {
    pub(crate) fn push_reg(&mut self, width: InstructionWidth) -> ExecResult {
        // PUSH SP pushes the value from before the decrement.
        let n = (self.i.opcode & 0x07) as u8;
        let value = self.reg(width, n);
        self.push(width, value)
    }

    pub(crate) fn pop_reg(&mut self, width: InstructionWidth) -> ExecResult {
        let n = (self.i.opcode & 0x07) as u8;
        let value = self.pop(width)?;
        self.set_reg(width, n, value);
        Ok(())
    }

    pub(crate) fn push_sreg(&mut self, seg: Segment) -> ExecResult {
        let value = self.sregs[seg.index()].value() as u32;
        self.push_v(value)
    }

    /// POP sreg. The stack pointer only moves once the load has succeeded.
    pub(crate) fn pop_sreg(&mut self, seg: Segment) -> ExecResult {
        let width = self.i.operand_width();
        let selector = self.stack_peek(0, width)? as u16;
        self.load_segment(seg, selector)?;
        let sp = self.stack_pointer().wrapping_add(width.bytes()) & self.stack_mask();
        self.set_stack_pointer(sp);
        if self.is_pmode_not_v86() {
            cycles_pmode!(self, 15, 14);
        }
        if seg == Segment::SS {
            self.inhibit_interrupts();
        }
        Ok(())
    }

    pub(crate) fn push_imm(&mut self, width: InstructionWidth) -> ExecResult {
        let value = self.imm(width);
        self.push(width, value)
    }

    pub(crate) fn push_e(&mut self, width: InstructionWidth) -> ExecResult {
        let value = self.load_e(width)?;
        self.push(width, value)
    }

    /// POP r/m. ESP is incremented before a memory destination is addressed.
    pub(crate) fn pop_e(&mut self, width: InstructionWidth) -> ExecResult {
        let value = self.pop(width)?;
        self.store_e(width, value)
    }

    pub(crate) fn pusha(&mut self, width: InstructionWidth) -> ExecResult {
        let sp = self.reg(width, REG_ESP as u8);
        for n in [REG_EAX, REG_ECX, REG_EDX, REG_EBX] {
            self.push(width, self.reg(width, n as u8))?;
        }
        self.push(width, sp)?;
        for n in [REG_EBP, REG_ESI, REG_EDI] {
            self.push(width, self.reg(width, n as u8))?;
        }
        Ok(())
    }

    /// POPA discards the saved stack pointer.
    pub(crate) fn popa(&mut self, width: InstructionWidth) -> ExecResult {
        for n in [REG_EDI, REG_ESI, REG_EBP] {
            let value = self.pop(width)?;
            self.set_reg(width, n as u8, value);
        }
        self.pop(width)?;
        for n in [REG_EBX, REG_EDX, REG_ECX, REG_EAX] {
            let value = self.pop(width)?;
            self.set_reg(width, n as u8, value);
        }
        Ok(())
    }

    /// In virtual-8086 mode PUSHF and POPF are IOPL sensitive.
    fn v86_flags_check(&self) -> ExecResult {
        if self.is_v86_mode() && self.iopl() < 3 {
            return Err(CpuException::GeneralProtection(0));
        }
        Ok(())
    }

    pub(crate) fn pushf(&mut self, width: InstructionWidth) -> ExecResult {
        self.v86_flags_check()?;
        let value = self.eflags_for_push() & width.mask();
        self.push(width, value)
    }

    /// POPF. Bits the current privilege may not change keep their values.
    pub(crate) fn popf(&mut self, width: InstructionWidth) -> ExecResult {
        self.v86_flags_check()?;
        let value = self.pop(width)?;
        let mask = self.flags_write_mask() & width.mask();
        self.write_eflags(value, mask);
        Ok(())
    }

    /// ENTER imm16, imm8
    pub(crate) fn enter(&mut self) -> ExecResult {
        let width = self.i.operand_width();
        let size = self.i.imm & 0xFFFF;
        let level = self.i.imm2 & 0x1F;
        let frame_reg_width = if self.stack_mask() == 0xFFFF_FFFF { InstructionWidth::Dword } else { W16 };

        let bp = self.reg(width, REG_EBP as u8);
        self.push(width, bp)?;
        let frame = self.stack_pointer();

        if level > 0 {
            let mut display = self.reg(frame_reg_width, REG_EBP as u8);
            for _ in 1..level {
                display = display.wrapping_sub(width.bytes()) & self.stack_mask();
                let value = self.read_mem(Segment::SS, display, width)?;
                self.push(width, value)?;
            }
            self.push(width, frame)?;
            cycles!(self, 4 * level);
        }

        let sp = self.stack_pointer().wrapping_sub(size) & self.stack_mask();
        // The new frame must be addressable before anything is committed.
        self.seg_check_write(Segment::SS, sp, 1)?;
        self.set_reg(frame_reg_width, REG_EBP as u8, frame);
        self.set_stack_pointer(sp);
        Ok(())
    }

    pub(crate) fn leave(&mut self) -> ExecResult {
        let width = self.i.operand_width();
        let bp = self.reg(if self.stack_mask() == 0xFFFF_FFFF { InstructionWidth::Dword } else { W16 }, REG_EBP as u8);
        let value = self.read_mem(Segment::SS, bp, width)?;
        self.set_stack_pointer(bp.wrapping_add(width.bytes()) & self.stack_mask());
        self.set_reg(width, REG_EBP as u8, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::{super::*, *};

    #[test]
    fn test_pusha_popa() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.set_reg16(REG_ESP as u8, 0x200);
        for n in 0..8u8 {
            if n != REG_ESP as u8 {
                cpu.set_reg16(n, 0x1000 + n as u16);
            }
        }
        cpu.pusha(W16).unwrap();
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x1F0);
        // The saved SP is the value before the first push.
        assert_eq!(cpu.stack_peek(6, W16), Ok(0x200));
        for n in 0..8u8 {
            if n != REG_ESP as u8 {
                cpu.set_reg16(n, 0);
            }
        }
        cpu.popa(W16).unwrap();
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x200);
        assert_eq!(cpu.reg16(REG_EBX as u8), 0x1003);
        assert_eq!(cpu.reg16(REG_EDI as u8), 0x1007);
    }

    #[test]
    fn test_pop_sreg_keeps_sp_on_fault() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.cr[0] |= CR0_PE;
        cpu.gdtr = DescriptorTable { base: 0x800, limit: 0x0F };
        cpu.set_reg16(REG_ESP as u8, 0x100);
        cpu.push(W16, 0x0040).unwrap();
        assert_eq!(cpu.pop_sreg(Segment::DS), Err(CpuException::GeneralProtection(0x40)));
        assert_eq!(cpu.reg16(REG_ESP as u8), 0xFE);
    }

    #[test]
    fn test_enter_leave() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.set_reg16(REG_ESP as u8, 0x200);
        cpu.set_reg16(REG_EBP as u8, 0x1234);
        // enter 0x10, 1
        cpu.i.imm = 0x10;
        cpu.i.imm2 = 1;
        cpu.enter().unwrap();
        assert_eq!(cpu.reg16(REG_EBP as u8), 0x1FE);
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x1FC - 0x10);
        assert_eq!(cpu.stack_peek(0x10, W16), Ok(0x1FE));
        cpu.leave().unwrap();
        assert_eq!(cpu.reg16(REG_EBP as u8), 0x1234);
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x200);
    }

    #[test]
    fn test_popf_286_real_mode_clears_iopl() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.set_reg16(REG_ESP as u8, 0x100);
        cpu.push(W16, 0xF0D5).unwrap();
        cpu.popf(W16).unwrap();
        assert_eq!(cpu.eflags(), 0x00D7);
    }
}
