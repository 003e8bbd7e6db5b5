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

    cpu_386::access.rs

    Segmented and linear memory access: limit and rights checks, paging, and
    the stack.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{mmu::PAGE_OFFSET_MASK, *};

impl Intel386 {
    #[inline]
    fn seg_fault(seg: Segment) -> CpuException {
        if seg == Segment::SS {
            CpuException::StackFault(0)
        }
        else {
            CpuException::GeneralProtection(0)
        }
    }

    fn seg_check(&self, seg: Segment, offset: u32, len: u32, write: bool) -> Result<(), CpuException> {
        let cache = &self.sregs[seg.index()].cache;
        if self.is_pmode_not_v86() {
            if !cache.valid {
                return Err(Self::seg_fault(seg));
            }
            if write && !cache.is_writable() {
                return Err(Self::seg_fault(seg));
            }
            if !write && !cache.is_readable() {
                return Err(Self::seg_fault(seg));
            }
        }
        if !cache.check_limit(offset, len) {
            return Err(Self::seg_fault(seg));
        }
        Ok(())
    }

    /// Validate a read of `len` bytes at `seg:offset` against the live descriptor.
    #[inline]
    pub(crate) fn seg_check_read(&self, seg: Segment, offset: u32, len: u32) -> Result<(), CpuException> {
        self.seg_check(seg, offset, len, false)
    }

    /// Validate a write of `len` bytes at `seg:offset` against the live descriptor.
    #[inline]
    pub(crate) fn seg_check_write(&self, seg: Segment, offset: u32, len: u32) -> Result<(), CpuException> {
        self.seg_check(seg, offset, len, true)
    }

    #[inline]
    pub(crate) fn linear(&self, seg: Segment, offset: u32) -> u32 {
        self.sregs[seg.index()].cache.base.wrapping_add(offset)
    }

    #[inline]
    fn crosses_page(linear: u32, len: u32) -> bool {
        (linear & PAGE_OFFSET_MASK) + len > 0x1000
    }

    pub(crate) fn read_linear(&mut self, linear: u32, width: InstructionWidth, user: bool) -> Result<u32, CpuException> {
        if !self.paging_enabled() {
            return Ok(self.bus.read(linear, width));
        }
        let len = width.bytes();
        let phys = self.tlb_lookup(linear, len, user, false)?;
        if !Self::crosses_page(linear, len) {
            return Ok(self.bus.read(phys, width));
        }
        let mut value = 0;
        for i in 0..len {
            let phys = self.translate(linear.wrapping_add(i), user, false)?;
            value |= self.bus.read(phys, InstructionWidth::Byte) << (i * 8);
        }
        Ok(value)
    }

    pub(crate) fn write_linear(
        &mut self,
        linear: u32,
        width: InstructionWidth,
        value: u32,
        user: bool,
    ) -> Result<(), CpuException> {
        if !self.paging_enabled() {
            self.bus.write(linear, width, value);
            return Ok(());
        }
        let len = width.bytes();
        let phys = self.tlb_lookup(linear, len, user, true)?;
        if !Self::crosses_page(linear, len) {
            self.bus.write(phys, width, value);
            return Ok(());
        }
        for i in 0..len {
            let phys = self.translate(linear.wrapping_add(i), user, true)?;
            self.bus.write(phys, InstructionWidth::Byte, value >> (i * 8));
        }
        Ok(())
    }

    /// Read `seg:offset`, checking the segment first.
    pub(crate) fn read_mem(&mut self, seg: Segment, offset: u32, width: InstructionWidth) -> Result<u32, CpuException> {
        self.seg_check_read(seg, offset, width.bytes())?;
        let linear = self.linear(seg, offset);
        self.read_linear(linear, width, self.cpl == 3)
    }

    /// Write `seg:offset`, checking the segment first.
    pub(crate) fn write_mem(
        &mut self,
        seg: Segment,
        offset: u32,
        width: InstructionWidth,
        value: u32,
    ) -> Result<(), CpuException> {
        self.seg_check_write(seg, offset, width.bytes())?;
        let linear = self.linear(seg, offset);
        self.write_linear(linear, width, value, self.cpl == 3)
    }

    #[inline]
    pub(crate) fn read_mem_u16(&mut self, seg: Segment, offset: u32) -> Result<u16, CpuException> {
        Ok(self.read_mem(seg, offset, InstructionWidth::Word)? as u16)
    }

    /// Read on behalf of the processor itself: descriptor tables, the TSS and the IDT. These
    /// accesses are always made at supervisor privilege.
    pub(crate) fn system_read(&mut self, linear: u32, width: InstructionWidth) -> Result<u32, CpuException> {
        if !self.paging_enabled() {
            return Ok(self.bus.read_system(linear, width));
        }
        let mut value = 0;
        for i in 0..width.bytes() {
            let phys = self.translate(linear.wrapping_add(i), false, false)?;
            value |= self.bus.read_system(phys, InstructionWidth::Byte) << (i * 8);
        }
        Ok(value)
    }

    pub(crate) fn system_write(&mut self, linear: u32, width: InstructionWidth, value: u32) -> Result<(), CpuException> {
        if !self.paging_enabled() {
            self.bus.write_system(linear, width, value);
            return Ok(());
        }
        self.tlb_lookup(linear, width.bytes(), false, true)?;
        for i in 0..width.bytes() {
            let phys = self.translate(linear.wrapping_add(i), false, true)?;
            self.bus.write_system(phys, InstructionWidth::Byte, value >> (i * 8));
        }
        Ok(())
    }

    /// Offset mask of the stack segment: 32 bits when SS.B is set.
    #[inline]
    pub(crate) fn stack_mask(&self) -> u32 {
        if self.sregs[Segment::SS.index()].cache.big {
            0xFFFF_FFFF
        }
        else {
            0xFFFF
        }
    }

    pub(crate) fn push(&mut self, width: InstructionWidth, value: u32) -> Result<(), CpuException> {
        let sp = self.stack_pointer().wrapping_sub(width.bytes()) & self.stack_mask();
        self.write_mem(Segment::SS, sp, width, value)?;
        self.set_stack_pointer(sp);
        Ok(())
    }

    pub(crate) fn pop(&mut self, width: InstructionWidth) -> Result<u32, CpuException> {
        let sp = self.stack_pointer();
        let value = self.read_mem(Segment::SS, sp, width)?;
        self.set_stack_pointer(sp.wrapping_add(width.bytes()) & self.stack_mask());
        Ok(value)
    }

    /// Read a stack slot `depth` bytes above the stack pointer without popping it.
    pub(crate) fn stack_peek(&mut self, depth: u32, width: InstructionWidth) -> Result<u32, CpuException> {
        let offset = self.stack_pointer().wrapping_add(depth) & self.stack_mask();
        self.read_mem(Segment::SS, offset, width)
    }

    /// Push the operand size of the current instruction.
    #[inline]
    pub(crate) fn push_v(&mut self, value: u32) -> Result<(), CpuException> {
        let width = self.i.operand_width();
        self.push(width, value)
    }

    #[inline]
    pub(crate) fn pop_v(&mut self) -> Result<u32, CpuException> {
        let width = self.i.operand_width();
        self.pop(width)
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    #[test]
    fn test_real_mode_limit() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        assert!(cpu.read_mem(Segment::DS, 0xFFFE, InstructionWidth::Word).is_ok());
        assert_eq!(
            cpu.read_mem(Segment::DS, 0xFFFF, InstructionWidth::Word),
            Err(CpuException::GeneralProtection(0))
        );
        assert_eq!(
            cpu.read_mem(Segment::SS, 0xFFFF, InstructionWidth::Word),
            Err(CpuException::StackFault(0))
        );
    }

    #[test]
    fn test_push_pop() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.set_reg16(REG_ESP as u8, 0x100);
        cpu.push(InstructionWidth::Word, 0xBEEF).unwrap();
        assert_eq!(cpu.reg16(REG_ESP as u8), 0xFE);
        assert_eq!(cpu.stack_peek(0, InstructionWidth::Word), Ok(0xBEEF));
        assert_eq!(cpu.pop(InstructionWidth::Word), Ok(0xBEEF));
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x100);
    }

    #[test]
    fn test_null_segment_faults_on_use() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.cr[0] |= CR0_PE;
        cpu.sregs[Segment::DS.index()] = SegmentRegister::null(0);
        assert_eq!(
            cpu.read_mem(Segment::DS, 0, InstructionWidth::Byte),
            Err(CpuException::GeneralProtection(0))
        );
    }
}
