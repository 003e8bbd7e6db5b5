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

    cpu_386::execute::branch.rs

    Jumps, calls, returns, loops and the software interrupt instructions.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{
    super::{interrupt::IntSource, *},
    ExecResult,
    LoopKind,
    W16,
};

/// Extra cycles of a taken short branch over the not-taken count.
const BRANCH_TAKEN: u32 = 4;

impl Intel386 {
    /// Target of a relative branch. The offset wraps at 64K with a 16-bit operand size.
    #[inline]
    fn rel_target(&self) -> u32 {
        let target = self.eip.wrapping_add(self.i.imm);
        if self.i.op32 {
            target
        }
        else {
            target & 0xFFFF
        }
    }

    pub(crate) fn jcc(&mut self, cc: u8) -> ExecResult {
        if self.cond(cc) {
            let target = self.rel_target();
            self.jump_near(target)?;
            cycles!(self, BRANCH_TAKEN);
        }
        Ok(())
    }

    pub(crate) fn jmp_rel(&mut self) -> ExecResult {
        let target = self.rel_target();
        self.jump_near(target)
    }

    /// CALL rel. The target is checked before the return address is pushed.
    pub(crate) fn call_rel(&mut self) -> ExecResult {
        let target = self.rel_target();
        self.check_code_limit(target)?;
        self.push_v(self.eip)?;
        self.jump_near(target)
    }

    pub(crate) fn jmp_e(&mut self, width: InstructionWidth) -> ExecResult {
        let target = self.load_e(width)?;
        self.jump_near(target)
    }

    pub(crate) fn call_e(&mut self, width: InstructionWidth) -> ExecResult {
        let target = self.load_e(width)?;
        self.check_code_limit(target)?;
        self.push(width, self.eip)?;
        self.jump_near(target)
    }

    /// JMP ptr16:16 / ptr16:32
    pub(crate) fn jmp_far_imm(&mut self) -> ExecResult {
        let selector = self.i.imm2 as u16;
        let offset = self.i.imm;
        self.jump_far(selector, offset)
    }

    pub(crate) fn call_far_imm(&mut self) -> ExecResult {
        let selector = self.i.imm2 as u16;
        let offset = self.i.imm;
        let width = self.i.operand_width();
        self.call_far(selector, offset, width)
    }

    /// Read an m16:16 or m16:32 far pointer operand.
    fn far_pointer(&mut self, width: InstructionWidth) -> Result<(u16, u32), CpuException> {
        self.require_memory_form()?;
        let (seg, offset) = self.ea();
        let target = self.read_mem(seg, offset, width)?;
        let sel_offset = offset.wrapping_add(width.bytes()) & self.i.address_mask();
        let selector = self.read_mem_u16(seg, sel_offset)?;
        Ok((selector, target))
    }

    pub(crate) fn jmp_far_m(&mut self, width: InstructionWidth) -> ExecResult {
        let (selector, offset) = self.far_pointer(width)?;
        self.jump_far(selector, offset)
    }

    pub(crate) fn call_far_m(&mut self, width: InstructionWidth) -> ExecResult {
        let (selector, offset) = self.far_pointer(width)?;
        self.call_far(selector, offset, width)
    }

    /// RET and RET imm16.
    pub(crate) fn ret_near(&mut self, has_imm: bool) -> ExecResult {
        let width = self.i.operand_width();
        let target = self.stack_peek(0, width)?;
        self.check_code_limit(target)?;
        self.pop(width)?;
        if has_imm {
            let sp = self.stack_pointer().wrapping_add(self.i.imm & 0xFFFF) & self.stack_mask();
            self.set_stack_pointer(sp);
        }
        self.jump_near(target)
    }

    pub(crate) fn ret_far(&mut self, has_imm: bool) -> ExecResult {
        let width = self.i.operand_width();
        let release = if has_imm { self.i.imm & 0xFFFF } else { 0 };
        self.return_far(width, release)
    }

    /// LOOP, LOOPE and LOOPNE. The count register follows the address size.
    pub(crate) fn loop_cx(&mut self, kind: LoopKind) -> ExecResult {
        let count = self.count_reg().wrapping_sub(1);
        self.set_count_reg(count);
        let zf = self.get_flag(Flag::Zero);
        let taken = count != 0
            && match kind {
                LoopKind::Always => true,
                LoopKind::WhileZero => zf,
                LoopKind::WhileNotZero => !zf,
            };
        if taken {
            let target = self.rel_target();
            self.jump_near(target)?;
            cycles!(self, BRANCH_TAKEN);
        }
        Ok(())
    }

    /// JCXZ / JECXZ
    pub(crate) fn jcxz(&mut self) -> ExecResult {
        if self.count_reg() == 0 {
            let target = self.rel_target();
            self.jump_near(target)?;
            cycles!(self, BRANCH_TAKEN);
        }
        Ok(())
    }

    pub(crate) fn int3(&mut self) -> ExecResult {
        self.interrupt(3, IntSource::Software, None)
    }

    /// INT n. In virtual-8086 mode the instruction is IOPL sensitive.
    pub(crate) fn int_n(&mut self) -> ExecResult {
        if self.is_v86_mode() && self.iopl() < 3 {
            return Err(CpuException::GeneralProtection(0));
        }
        let vector = self.i.imm as u8;
        self.interrupt(vector, IntSource::Software, None)
    }

    /// INTO
    pub(crate) fn into_overflow(&mut self) -> ExecResult {
        if self.get_flag(Flag::Overflow) {
            cycles!(self, 21);
            return self.interrupt(4, IntSource::Software, None);
        }
        Ok(())
    }

    /// ICEBP (F1). Delivered like a hardware debug exception, without the gate DPL check.
    pub(crate) fn int1(&mut self) -> ExecResult {
        self.interrupt(1, IntSource::Exception, None)
    }

    pub(crate) fn iret(&mut self, width: InstructionWidth) -> ExecResult {
        self.interrupt_return(width)
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    #[test]
    fn test_jcc_wraps_at_64k() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.set_eip(0xFFFE);
        cpu.i.imm = 0x10;
        cpu.set_flag(Flag::Zero);
        cpu.jcc(0x4).unwrap();
        assert_eq!(cpu.eip(), 0x000E);
        assert_eq!(cpu.cycles.extra, BRANCH_TAKEN);
        // Not taken: no penalty, no movement.
        cpu.cycles.extra = 0;
        cpu.jcc(0x5).unwrap();
        assert_eq!(cpu.eip(), 0x000E);
        assert_eq!(cpu.cycles.extra, 0);
    }

    #[test]
    fn test_call_ret_near() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.set_reg16(REG_ESP as u8, 0x400);
        cpu.set_eip(0x103);
        cpu.i.imm = 0x0100;
        cpu.call_rel().unwrap();
        assert_eq!(cpu.eip(), 0x203);
        assert_eq!(cpu.stack_peek(0, W16), Ok(0x103));
        // ret 4
        cpu.i.imm = 4;
        cpu.ret_near(true).unwrap();
        assert_eq!(cpu.eip(), 0x103);
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x404);
    }

    #[test]
    fn test_call_outside_limit_pushes_nothing() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.sregs[Segment::CS.index()].cache.limit = 0x0FFF;
        cpu.set_reg16(REG_ESP as u8, 0x400);
        cpu.set_eip(0x100);
        cpu.i.imm = 0x2000;
        assert_eq!(cpu.call_rel(), Err(CpuException::GeneralProtection(0)));
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x400);
    }

    #[test]
    fn test_loop_kinds() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.set_eip(0x100);
        cpu.i.imm = (-2i32) as u32;
        cpu.set_reg16(REG_ECX as u8, 2);
        cpu.loop_cx(LoopKind::Always).unwrap();
        assert_eq!(cpu.eip(), 0xFE);
        cpu.set_eip(0x100);
        cpu.loop_cx(LoopKind::Always).unwrap();
        assert_eq!(cpu.eip(), 0x100);
        assert_eq!(cpu.reg16(REG_ECX as u8), 0);

        // LOOPE stops as soon as ZF is clear.
        cpu.set_reg16(REG_ECX as u8, 5);
        cpu.clear_flag(Flag::Zero);
        cpu.loop_cx(LoopKind::WhileZero).unwrap();
        assert_eq!(cpu.eip(), 0x100);
        assert_eq!(cpu.reg16(REG_ECX as u8), 4);
    }

    #[test]
    fn test_int_real_mode_and_iret() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        // Vector 0x21 -> 1234:5678
        m.poke_u16(0x21 * 4, 0x5678);
        m.poke_u16(0x21 * 4 + 2, 0x1234);
        let cpu = m.cpu_mut();
        cpu.set_reg16(REG_ESP as u8, 0x400);
        cpu.load_segment_real(Segment::CS, 0x2000);
        cpu.set_eip(0x0102);
        cpu.set_flag(Flag::Interrupt);
        cpu.set_flag(Flag::Trap);
        cpu.i.imm = 0x21;
        cpu.int_n().unwrap();
        assert_eq!(cpu.segment(Segment::CS).value(), 0x1234);
        assert_eq!(cpu.eip(), 0x5678);
        assert!(!cpu.get_flag(Flag::Interrupt));
        assert!(!cpu.get_flag(Flag::Trap));
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x3FA);

        cpu.iret(W16).unwrap();
        assert_eq!(cpu.segment(Segment::CS).value(), 0x2000);
        assert_eq!(cpu.eip(), 0x0102);
        assert!(cpu.get_flag(Flag::Interrupt));
        assert!(cpu.get_flag(Flag::Trap));
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x400);
    }

    #[test]
    fn test_v86_int_n_is_iopl_sensitive() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.cr[0] |= CR0_PE;
        cpu.set_vm(true);
        cpu.set_reg16(REG_ESP as u8, 0x400);
        cpu.i.imm = 0x21;
        assert_eq!(cpu.int_n(), Err(CpuException::GeneralProtection(0)));
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x400);

        // INT3 is not IOPL sensitive and reaches the IDT, which has no gate for it here.
        assert_eq!(cpu.int3(), Err(CpuException::GeneralProtection(3 * 8 + 2)));

        cpu.eflags |= CPU_FLAG_IOPL;
        assert_eq!(cpu.int_n(), Err(CpuException::GeneralProtection(0x21 * 8 + 2)));
        assert!(cpu.is_v86_mode());
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x400);
    }
}
