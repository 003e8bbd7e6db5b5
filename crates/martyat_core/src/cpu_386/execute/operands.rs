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

    cpu_386::execute::operands.rs

    Operand access for instruction handlers: effective address
    calculation, ModR/M register and memory operands, and condition codes.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::super::{registers::Flag, *};

/// Base register pairs of the 16-bit addressing forms, with their default segments.
const EA16_BASE: [(Option<usize>, Option<usize>, Segment); 8] = [
    (Some(REG_EBX), Some(REG_ESI), Segment::DS),
    (Some(REG_EBX), Some(REG_EDI), Segment::DS),
    (Some(REG_EBP), Some(REG_ESI), Segment::SS),
    (Some(REG_EBP), Some(REG_EDI), Segment::SS),
    (Some(REG_ESI), None, Segment::DS),
    (Some(REG_EDI), None, Segment::DS),
    (Some(REG_EBP), None, Segment::SS),
    (Some(REG_EBX), None, Segment::DS),
];

impl Intel386 {
    /// Segment and offset of the ModR/M memory operand. Computed once per instruction.
    pub(crate) fn ea(&mut self) -> (Segment, u32) {
        if let Some(ea) = self.i.ea {
            return ea;
        }
        let (default_seg, offset) = if self.i.addr32 {
            self.ea32()
        }
        else {
            self.ea16()
        };
        let ea = (self.i.segment(default_seg), offset);
        self.i.ea = Some(ea);
        ea
    }

    fn ea16(&self) -> (Segment, u32) {
        let mode = self.i.modrm_mod();
        let rm = self.i.modrm_rm() as usize;
        if mode == 0 && rm == 6 {
            return (Segment::DS, self.i.disp & 0xFFFF);
        }
        let (base, index, seg) = EA16_BASE[rm];
        let mut offset = self.i.disp;
        if let Some(base) = base {
            offset = offset.wrapping_add(self.regs[base].word() as u32);
        }
        if let Some(index) = index {
            offset = offset.wrapping_add(self.regs[index].word() as u32);
        }
        (seg, offset & 0xFFFF)
    }

    fn ea32(&self) -> (Segment, u32) {
        let mode = self.i.modrm_mod();
        let rm = self.i.modrm_rm() as usize;
        let mut seg = Segment::DS;
        let mut offset = self.i.disp;
        match self.i.sib {
            Some(sib) => {
                let scale = sib >> 6;
                let index = ((sib >> 3) & 0x07) as usize;
                let base = (sib & 0x07) as usize;
                if index != REG_ESP {
                    offset = offset.wrapping_add(self.regs[index].dword() << scale);
                }
                if !(base == REG_EBP && mode == 0) {
                    offset = offset.wrapping_add(self.regs[base].dword());
                    if base == REG_ESP || base == REG_EBP {
                        seg = Segment::SS;
                    }
                }
            }
            None => {
                if !(rm == REG_EBP && mode == 0) {
                    offset = offset.wrapping_add(self.regs[rm].dword());
                    if rm == REG_EBP {
                        seg = Segment::SS;
                    }
                }
            }
        }
        (seg, offset)
    }

    /// Read the r/m operand.
    pub(crate) fn load_e(&mut self, width: InstructionWidth) -> Result<u32, CpuException> {
        if self.i.is_register_form() {
            Ok(self.reg(width, self.i.modrm_rm()))
        }
        else {
            let (seg, offset) = self.ea();
            self.read_mem(seg, offset, width)
        }
    }

    /// Write the r/m operand.
    pub(crate) fn store_e(&mut self, width: InstructionWidth, value: u32) -> Result<(), CpuException> {
        if self.i.is_register_form() {
            self.set_reg(width, self.i.modrm_rm(), value);
            Ok(())
        }
        else {
            let (seg, offset) = self.ea();
            self.write_mem(seg, offset, width, value)
        }
    }

    /// Fail a read-modify-write early when the destination is not writable, so that no flags
    /// change on the faulting path.
    pub(crate) fn check_e_writable(&mut self, width: InstructionWidth) -> Result<(), CpuException> {
        if !self.i.is_register_form() {
            let (seg, offset) = self.ea();
            self.seg_check_write(seg, offset, width.bytes())?;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn load_g(&self, width: InstructionWidth) -> u32 {
        self.reg(width, self.i.modrm_reg())
    }

    #[inline]
    pub(crate) fn store_g(&mut self, width: InstructionWidth, value: u32) {
        self.set_reg(width, self.i.modrm_reg(), value);
    }

    /// Memory-only operands (LEA, LxS, BOUND, LGDT) raise #UD in the register form.
    #[inline]
    pub(crate) fn require_memory_form(&self) -> Result<(), CpuException> {
        if self.i.is_register_form() {
            return Err(CpuException::InvalidOpcode);
        }
        Ok(())
    }

    /// Immediate operand truncated to the operand width.
    #[inline]
    pub(crate) fn imm(&self, width: InstructionWidth) -> u32 {
        self.i.imm & width.mask()
    }

    /// Counter register of string and loop instructions, by address size.
    #[inline]
    pub(crate) fn count_reg(&self) -> u32 {
        if self.i.addr32 {
            self.regs[REG_ECX].dword()
        }
        else {
            self.regs[REG_ECX].word() as u32
        }
    }

    #[inline]
    pub(crate) fn set_count_reg(&mut self, value: u32) {
        if self.i.addr32 {
            self.regs[REG_ECX].set_dword(value);
        }
        else {
            self.regs[REG_ECX].set_word(value as u16);
        }
    }

    /// Evaluate condition code `cc`, as encoded in the low nibble of Jcc and SETcc.
    pub(crate) fn cond(&self, cc: u8) -> bool {
        let result = match cc >> 1 {
            0 => self.get_flag(Flag::Overflow),
            1 => self.get_flag(Flag::Carry),
            2 => self.get_flag(Flag::Zero),
            3 => self.get_flag(Flag::Carry) || self.get_flag(Flag::Zero),
            4 => self.get_flag(Flag::Sign),
            5 => self.get_flag(Flag::Parity),
            6 => self.get_flag(Flag::Sign) != self.get_flag(Flag::Overflow),
            _ => self.get_flag(Flag::Zero) || (self.get_flag(Flag::Sign) != self.get_flag(Flag::Overflow)),
        };
        if cc & 1 != 0 {
            !result
        }
        else {
            result
        }
    }
}
