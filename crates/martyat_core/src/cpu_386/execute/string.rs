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

    cpu_386::execute::string.rs

    String instructions and the REP prefixes.

*/
use crate::cpu_common::{alu::Xi, InstructionWidth};

use super::{super::instruction::RepPrefix, super::*, ExecResult};

/// Cycles of each repeated iteration: 286, 386.
const REP_MOVS: (u32, u32) = (4, 4);
const REP_CMPS: (u32, u32) = (9, 9);
const REP_STOS: (u32, u32) = (3, 5);
const REP_LODS: (u32, u32) = (4, 6);
const REP_SCAS: (u32, u32) = (8, 8);
const REP_INS: (u32, u32) = (4, 6);
const REP_OUTS: (u32, u32) = (4, 5);

impl Intel386 {
    /// Read an index register (SI or DI) by address size.
    #[inline]
    fn index_reg(&self, n: usize) -> u32 {
        self.regs[n].dword() & self.i.address_mask()
    }

    /// Step an index register past one element in the direction DF selects.
    fn advance_index(&mut self, n: usize, width: InstructionWidth) {
        let delta = if self.get_flag(Flag::Direction) {
            width.bytes().wrapping_neg()
        }
        else {
            width.bytes()
        };
        let value = self.regs[n].dword().wrapping_add(delta);
        if self.i.addr32 {
            self.regs[n].set_dword(value);
        }
        else {
            self.regs[n].set_word(value as u16);
        }
    }

    /// An interrupt or NMI waiting to be taken suspends a repeated string instruction between
    /// iterations.
    fn rep_interrupt_pending(&self) -> bool {
        self.lines.nmi_pending() || (self.lines.intr() && self.get_flag(Flag::Interrupt))
    }

    /// Run `iteration` once, or under a REP prefix until the count register is exhausted. When
    /// `compare` is set, REPE and REPNE also stop on ZF. A fault leaves the registers as of the
    /// last completed iteration so the instruction restarts where it stopped.
    fn repeat(
        &mut self,
        compare: bool,
        per_iteration: (u32, u32),
        mut iteration: impl FnMut(&mut Intel386) -> ExecResult,
    ) -> ExecResult {
        if self.i.rep == RepPrefix::None {
            return iteration(self);
        }
        let cost = if self.cpu_type.is_386() { per_iteration.1 } else { per_iteration.0 };
        let mut first = true;
        while self.count_reg() != 0 {
            if !first && self.rep_interrupt_pending() {
                self.set_eip(self.i.address);
                break;
            }
            first = false;
            iteration(self)?;
            self.set_count_reg(self.count_reg().wrapping_sub(1));
            self.cycles.rep += cost;
            if compare {
                let zf = self.get_flag(Flag::Zero);
                match self.i.rep {
                    RepPrefix::Repe if !zf => break,
                    RepPrefix::Repne if zf => break,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub(crate) fn movs(&mut self, width: InstructionWidth) -> ExecResult {
        let src = self.i.segment(Segment::DS);
        self.repeat(false, REP_MOVS, |cpu| {
            let value = cpu.read_mem(src, cpu.index_reg(REG_ESI), width)?;
            cpu.write_mem(Segment::ES, cpu.index_reg(REG_EDI), width, value)?;
            cpu.advance_index(REG_ESI, width);
            cpu.advance_index(REG_EDI, width);
            Ok(())
        })
    }

    pub(crate) fn cmps(&mut self, width: InstructionWidth) -> ExecResult {
        let src = self.i.segment(Segment::DS);
        self.repeat(true, REP_CMPS, |cpu| {
            let a = cpu.read_mem(src, cpu.index_reg(REG_ESI), width)?;
            let b = cpu.read_mem(Segment::ES, cpu.index_reg(REG_EDI), width)?;
            cpu.alu(Xi::Cmp, width, a, b);
            cpu.advance_index(REG_ESI, width);
            cpu.advance_index(REG_EDI, width);
            Ok(())
        })
    }

    pub(crate) fn stos(&mut self, width: InstructionWidth) -> ExecResult {
        self.repeat(false, REP_STOS, |cpu| {
            let value = cpu.reg(width, REG_EAX as u8);
            cpu.write_mem(Segment::ES, cpu.index_reg(REG_EDI), width, value)?;
            cpu.advance_index(REG_EDI, width);
            Ok(())
        })
    }

    pub(crate) fn lods(&mut self, width: InstructionWidth) -> ExecResult {
        let src = self.i.segment(Segment::DS);
        self.repeat(false, REP_LODS, |cpu| {
            let value = cpu.read_mem(src, cpu.index_reg(REG_ESI), width)?;
            cpu.set_reg(width, REG_EAX as u8, value);
            cpu.advance_index(REG_ESI, width);
            Ok(())
        })
    }

    pub(crate) fn scas(&mut self, width: InstructionWidth) -> ExecResult {
        self.repeat(true, REP_SCAS, |cpu| {
            let a = cpu.reg(width, REG_EAX as u8);
            let b = cpu.read_mem(Segment::ES, cpu.index_reg(REG_EDI), width)?;
            cpu.alu(Xi::Cmp, width, a, b);
            cpu.advance_index(REG_EDI, width);
            Ok(())
        })
    }

    /// INS. The destination is checked before the port is read so a faulting iteration has no
    /// device side effect.
    pub(crate) fn ins(&mut self, width: InstructionWidth) -> ExecResult {
        let port = self.reg16(REG_EDX as u8);
        self.io_check(port, width.bytes())?;
        self.repeat(false, REP_INS, |cpu| {
            let offset = cpu.index_reg(REG_EDI);
            cpu.seg_check_write(Segment::ES, offset, width.bytes())?;
            let value = cpu.bus.io_read(port, width);
            cpu.write_mem(Segment::ES, offset, width, value)?;
            cpu.advance_index(REG_EDI, width);
            Ok(())
        })
    }

    pub(crate) fn outs(&mut self, width: InstructionWidth) -> ExecResult {
        let port = self.reg16(REG_EDX as u8);
        self.io_check(port, width.bytes())?;
        let src = self.i.segment(Segment::DS);
        self.repeat(false, REP_OUTS, |cpu| {
            let value = cpu.read_mem(src, cpu.index_reg(REG_ESI), width)?;
            cpu.bus.io_write(port, width, value);
            cpu.advance_index(REG_ESI, width);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::{super::*, *};

    #[test]
    fn test_rep_movsb() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        m.poke_bytes(0x100, b"HELLO");
        let cpu = m.cpu_mut();
        cpu.i.rep = RepPrefix::Repe;
        cpu.set_reg16(REG_ESI as u8, 0x100);
        cpu.set_reg16(REG_EDI as u8, 0x200);
        cpu.set_reg16(REG_ECX as u8, 5);
        cpu.movs(W8).unwrap();
        assert_eq!(cpu.reg16(REG_ECX as u8), 0);
        assert_eq!(cpu.reg16(REG_ESI as u8), 0x105);
        assert_eq!(cpu.reg16(REG_EDI as u8), 0x205);
        assert_eq!(cpu.cycles.rep, 20);
        assert_eq!(m.peek_u8(0x204), b'O');
    }

    #[test]
    fn test_repne_scasb_stops_on_match() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        m.poke_bytes(0x300, b"abcdef");
        let cpu = m.cpu_mut();
        cpu.i.rep = RepPrefix::Repne;
        cpu.set_reg8(0, b'd');
        cpu.set_reg16(REG_EDI as u8, 0x300);
        cpu.set_reg16(REG_ECX as u8, 6);
        cpu.scas(W8).unwrap();
        assert!(cpu.get_flag(Flag::Zero));
        assert_eq!(cpu.reg16(REG_EDI as u8), 0x304);
        assert_eq!(cpu.reg16(REG_ECX as u8), 2);
    }

    #[test]
    fn test_stos_backwards() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.set_flag(Flag::Direction);
        cpu.set_reg16(REG_EAX as u8, 0xABCD);
        cpu.set_reg16(REG_EDI as u8, 0x400);
        cpu.stos(W16).unwrap();
        assert_eq!(cpu.reg16(REG_EDI as u8), 0x3FE);
        assert_eq!(m.peek_u8(0x400), 0xCD);
    }

    #[test]
    fn test_rep_with_zero_count_does_nothing() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.i.rep = RepPrefix::Repe;
        cpu.set_reg16(REG_ESI as u8, 0x100);
        cpu.set_reg16(REG_ECX as u8, 0);
        cpu.lods(W8).unwrap();
        assert_eq!(cpu.reg16(REG_ESI as u8), 0x100);
    }
}
