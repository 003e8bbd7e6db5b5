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

    cpu_386::execute::mov.rs

    Data movement: MOV, XCHG, LEA, the far pointer loads, and the
    accumulator conversions.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{super::*, ExecResult, W16, W32, W8};

impl Intel386 {
    pub(crate) fn mov_e_g(&mut self, width: InstructionWidth) -> ExecResult {
        let value = self.load_g(width);
        self.store_e(width, value)
    }

    pub(crate) fn mov_g_e(&mut self, width: InstructionWidth) -> ExecResult {
        let value = self.load_e(width)?;
        self.store_g(width, value);
        Ok(())
    }

    pub(crate) fn mov_e_i(&mut self, width: InstructionWidth) -> ExecResult {
        let value = self.imm(width);
        self.store_e(width, value)
    }

    /// MOV reg, imm. The register is encoded in the opcode.
    pub(crate) fn mov_reg_i(&mut self, width: InstructionWidth) -> ExecResult {
        let n = (self.i.opcode & 0x07) as u8;
        let value = self.imm(width);
        self.set_reg(width, n, value);
        Ok(())
    }

    /// Segment register named by the reg field. FS and GS only exist on the 386.
    fn modrm_sreg(&self) -> Result<Segment, CpuException> {
        let reg = self.i.modrm_reg();
        match Segment::from_index(reg) {
            Some(seg) if reg < 4 || self.cpu_type.is_386() => Ok(seg),
            _ => Err(CpuException::InvalidOpcode),
        }
    }

    /// MOV r/m, sreg. A register destination takes the operand size, zero extended; memory is
    /// always written as a word.
    pub(crate) fn mov_e_sreg(&mut self) -> ExecResult {
        let seg = self.modrm_sreg()?;
        let value = self.sregs[seg.index()].value() as u32;
        if self.i.is_register_form() {
            let width = self.i.operand_width();
            self.set_reg(width, self.i.modrm_rm(), value);
            Ok(())
        }
        else {
            self.store_e(W16, value)
        }
    }

    /// MOV sreg, r/m. Loading CS this way is invalid. Loading SS holds off interrupts and debug
    /// traps until after the next instruction.
    pub(crate) fn mov_sreg_e(&mut self) -> ExecResult {
        let seg = self.modrm_sreg()?;
        if seg == Segment::CS {
            return Err(CpuException::InvalidOpcode);
        }
        let selector = self.load_e(W16)? as u16;
        self.load_segment(seg, selector)?;
        if self.is_pmode_not_v86() {
            cycles_pmode!(self, 15, 16);
        }
        if seg == Segment::SS {
            self.inhibit_interrupts();
        }
        Ok(())
    }

    pub(crate) fn mov_a_moffs(&mut self, width: InstructionWidth) -> ExecResult {
        let seg = self.i.segment(Segment::DS);
        let value = self.read_mem(seg, self.i.imm, width)?;
        self.set_reg(width, REG_EAX as u8, value);
        Ok(())
    }

    pub(crate) fn mov_moffs_a(&mut self, width: InstructionWidth) -> ExecResult {
        let seg = self.i.segment(Segment::DS);
        let value = self.reg(width, REG_EAX as u8);
        self.write_mem(seg, self.i.imm, width, value)
    }

    pub(crate) fn lea(&mut self, width: InstructionWidth) -> ExecResult {
        self.require_memory_form()?;
        let (_, offset) = self.ea();
        self.store_g(width, offset & width.mask());
        Ok(())
    }

    pub(crate) fn xchg_e_g(&mut self, width: InstructionWidth) -> ExecResult {
        self.check_e_writable(width)?;
        let a = self.load_e(width)?;
        let b = self.load_g(width);
        self.store_e(width, b)?;
        self.store_g(width, a);
        Ok(())
    }

    /// XCHG eAX, reg. The register is encoded in the opcode.
    pub(crate) fn xchg_a_reg(&mut self, width: InstructionWidth) -> ExecResult {
        let n = (self.i.opcode & 0x07) as u8;
        let a = self.reg(width, REG_EAX as u8);
        let b = self.reg(width, n);
        self.set_reg(width, REG_EAX as u8, b);
        self.set_reg(width, n, a);
        Ok(())
    }

    /// LDS, LES, LSS, LFS, LGS: load an offset and a selector from memory.
    pub(crate) fn load_far_ptr(&mut self, seg: Segment, width: InstructionWidth) -> ExecResult {
        self.require_memory_form()?;
        let (src_seg, offset) = self.ea();
        let pointer = self.read_mem(src_seg, offset, width)?;
        let selector_offset = offset.wrapping_add(width.bytes()) & self.i.address_mask();
        let selector = self.read_mem(src_seg, selector_offset, W16)? as u16;
        self.load_segment(seg, selector)?;
        if self.is_pmode_not_v86() {
            cycles_pmode!(self, 14, 15);
        }
        self.store_g(width, pointer);
        Ok(())
    }

    pub(crate) fn xlat(&mut self) -> ExecResult {
        let seg = self.i.segment(Segment::DS);
        let base = self.regs[REG_EBX].dword() & self.i.address_mask();
        let offset = base.wrapping_add(self.reg8(0) as u32) & self.i.address_mask();
        let value = self.read_mem(seg, offset, W8)?;
        self.set_reg8(0, value as u8);
        Ok(())
    }

    pub(crate) fn cbw(&mut self) -> ExecResult {
        let value = W8.sign_extend(self.reg8(0) as u32);
        self.set_reg16(REG_EAX as u8, value as u16);
        Ok(())
    }

    pub(crate) fn cwde(&mut self) -> ExecResult {
        let value = W16.sign_extend(self.reg16(REG_EAX as u8) as u32);
        self.set_reg32(REG_EAX as u8, value);
        Ok(())
    }

    pub(crate) fn cwd(&mut self) -> ExecResult {
        let fill = self.sign_fill(W16, self.reg16(REG_EAX as u8) as u32);
        self.set_reg16(REG_EDX as u8, fill as u16);
        Ok(())
    }

    pub(crate) fn cdq(&mut self) -> ExecResult {
        let fill = self.sign_fill(W32, self.reg32(REG_EAX as u8));
        self.set_reg32(REG_EDX as u8, fill);
        Ok(())
    }

    pub(crate) fn lahf(&mut self) -> ExecResult {
        let flags = (self.eflags & (CPU_FLAGS_ARITH & !CPU_FLAG_OVERFLOW)) | CPU_FLAGS_RESERVED_ON;
        self.set_reg8(4, flags as u8);
        Ok(())
    }

    pub(crate) fn sahf(&mut self) -> ExecResult {
        let mask = CPU_FLAGS_ARITH & !CPU_FLAG_OVERFLOW;
        let ah = self.reg8(4) as u32;
        self.eflags = (self.eflags & !mask) | (ah & mask) | CPU_FLAGS_RESERVED_ON;
        Ok(())
    }

    /// BOUND reg, mem: the signed register must lie within the two bounds stored in memory.
    pub(crate) fn bound(&mut self, width: InstructionWidth) -> ExecResult {
        self.require_memory_form()?;
        let (seg, offset) = self.ea();
        let index = width.sign_extend(self.load_g(width)) as i32;
        let lower = width.sign_extend(self.read_mem(seg, offset, width)?) as i32;
        let upper_offset = offset.wrapping_add(width.bytes()) & self.i.address_mask();
        let upper = width.sign_extend(self.read_mem(seg, upper_offset, width)?) as i32;
        if index < lower || index > upper {
            return Err(CpuException::BoundRange);
        }
        Ok(())
    }

    pub(crate) fn nop(&mut self) -> ExecResult {
        Ok(())
    }
}
