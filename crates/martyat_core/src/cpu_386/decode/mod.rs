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

    cpu_386::decode::mod.rs

    Instruction decoder. Reads prefixes, the opcode, ModR/M, SIB,
    displacement and immediates from a ByteQueue into an Instruction.

*/
mod tables;

use crate::{
    bytequeue::ByteQueue,
    cpu_common::{CpuException, CpuType},
};

use super::{
    execute::Op,
    instruction::{Imm, RepPrefix},
    Instruction,
    Intel386,
    Segment,
};

use tables::{group_op, Group, DECODE_16, DECODE_32, F_286, F_386, F_MODRM};

impl Intel386 {
    /// Decode one instruction. `code32` is the default operand and address size of the code
    /// segment. Instructions longer than the architectural limit raise #GP(0); opcodes the CPU
    /// type does not implement decode to `Op::Invalid`.
    pub fn decode(bytes: &mut impl ByteQueue, cpu_type: CpuType, code32: bool) -> Result<Instruction, CpuException> {
        let is_386 = cpu_type.is_386();
        let max_len = cpu_type.max_instruction_len();

        let mut i = Instruction {
            op32: code32,
            addr32: code32,
            ..Instruction::default()
        };

        let mut opcode = bytes.q_read_u8()?;
        loop {
            match opcode {
                0x26 => i.seg_override = Some(Segment::ES),
                0x2E => i.seg_override = Some(Segment::CS),
                0x36 => i.seg_override = Some(Segment::SS),
                0x3E => i.seg_override = Some(Segment::DS),
                0x64 if is_386 => i.seg_override = Some(Segment::FS),
                0x65 if is_386 => i.seg_override = Some(Segment::GS),
                0x66 if is_386 => i.op32 = !code32,
                0x67 if is_386 => i.addr32 = !code32,
                0xF0 => i.lock = true,
                0xF2 => i.rep = RepPrefix::Repne,
                0xF3 => i.rep = RepPrefix::Repe,
                _ => break,
            }
            if bytes.tell() >= max_len {
                return Err(CpuException::GeneralProtection(0));
            }
            opcode = bytes.q_read_u8()?;
        }

        let index = if opcode == 0x0F {
            0x100 | bytes.q_read_u8()? as u16
        }
        else {
            opcode as u16
        };
        i.opcode = if index & 0x100 != 0 { 0x0F00 | (index & 0xFF) } else { index };

        let entry = if i.op32 {
            DECODE_32[index as usize]
        }
        else {
            DECODE_16[index as usize]
        };
        let mut op = entry.op;
        let mut imm = entry.imm;

        if entry.flags & F_MODRM != 0 {
            i.has_modrm = true;
            i.modrm = bytes.q_read_u8()?;
            if i.modrm_mod() != 3 {
                Self::decode_address(bytes, &mut i)?;
            }
            if entry.group != Group::None {
                (op, imm) = group_op(entry.group, i.modrm_reg(), i.op32, imm);
            }
        }

        let unsupported = if is_386 {
            entry.flags & F_286 != 0
        }
        else {
            entry.flags & F_386 != 0
        };
        if unsupported {
            op = Op::Invalid;
            imm = Imm::None;
        }

        Self::decode_immediate(bytes, &mut i, imm)?;

        if bytes.tell() > max_len {
            return Err(CpuException::GeneralProtection(0));
        }
        i.op = op;
        i.len = bytes.tell() as u8;
        Ok(i)
    }

    /// Read the SIB byte and displacement of a memory operand.
    fn decode_address(bytes: &mut impl ByteQueue, i: &mut Instruction) -> Result<(), CpuException> {
        let mode = i.modrm_mod();
        let rm = i.modrm_rm();
        if i.addr32 {
            let mut base = rm;
            if rm == 4 {
                let sib = bytes.q_read_u8()?;
                i.sib = Some(sib);
                base = sib & 0x07;
            }
            i.disp = match mode {
                0 if base == 5 => bytes.q_read_u32()?,
                1 => bytes.q_read_i8()? as i32 as u32,
                2 => bytes.q_read_u32()?,
                _ => 0,
            };
        }
        else {
            i.disp = match mode {
                0 if rm == 6 => bytes.q_read_u16()? as u32,
                1 => bytes.q_read_i8()? as i16 as u16 as u32,
                2 => bytes.q_read_u16()? as u32,
                _ => 0,
            };
        }
        Ok(())
    }

    fn decode_immediate(bytes: &mut impl ByteQueue, i: &mut Instruction, imm: Imm) -> Result<(), CpuException> {
        match imm {
            Imm::None => {}
            Imm::Ib => i.imm = bytes.q_read_u8()? as u32,
            Imm::Ibs | Imm::Jb => i.imm = bytes.q_read_i8()? as i32 as u32,
            Imm::Iw => i.imm = bytes.q_read_u16()? as u32,
            Imm::Iv => {
                i.imm = if i.op32 {
                    bytes.q_read_u32()?
                }
                else {
                    bytes.q_read_u16()? as u32
                }
            }
            Imm::IwIb => {
                i.imm = bytes.q_read_u16()? as u32;
                i.imm2 = bytes.q_read_u8()? as u32;
            }
            Imm::Ap => {
                i.imm = if i.op32 {
                    bytes.q_read_u32()?
                }
                else {
                    bytes.q_read_u16()? as u32
                };
                i.imm2 = bytes.q_read_u16()? as u32;
            }
            Imm::O => {
                i.imm = if i.addr32 {
                    bytes.q_read_u32()?
                }
                else {
                    bytes.q_read_u16()? as u32
                }
            }
            Imm::Jv => {
                i.imm = if i.op32 {
                    bytes.q_read_u32()?
                }
                else {
                    bytes.q_read_u16()? as i16 as i32 as u32
                }
            }
        }
        Ok(())
    }
}

/// Instruction fetch. Bytes come from the prefetch queue, which is refilled on demand through
/// the paging unit. Fetching past the code segment limit or the instruction length limit
/// raises #GP(0).
impl ByteQueue for Intel386 {
    fn tell(&self) -> usize {
        self.fetch_len
    }

    fn q_read_u8(&mut self) -> Result<u8, CpuException> {
        if self.fetch_len >= self.cpu_type.max_instruction_len() {
            return Err(CpuException::GeneralProtection(0));
        }
        let cs = self.sregs[Segment::CS.index()].cache;
        if !cs.check_limit(self.fetch_eip, 1) {
            return Err(CpuException::GeneralProtection(0));
        }
        let linear = cs.base.wrapping_add(self.fetch_eip);
        if self.bus.queue.head_address() != linear {
            self.bus.pq_invalidate(linear);
        }
        if self.bus.queue.is_empty() {
            let phys = match self.bus.queue.fetch_phys() {
                Some(phys) => phys,
                None => self.translate(linear, self.cpl == 3, false)?,
            };
            self.bus.demand_fetch(phys);
        }
        let byte = self.bus.queue.pop().unwrap_or(crate::bus::OPEN_BUS_BYTE);

        self.fetch_eip = if self.code_big() {
            self.fetch_eip.wrapping_add(1)
        }
        else {
            (self.fetch_eip + 1) & 0xFFFF
        };
        self.fetch_len += 1;
        Ok(byte)
    }
}

#[cfg(test)]
mod tests {
    use crate::{bytequeue::SliceQueue, cpu_common::InstructionWidth};

    use super::*;

    fn decode(bytes: &[u8], cpu_type: CpuType, code32: bool) -> Result<Instruction, CpuException> {
        let mut q = SliceQueue::new(bytes);
        Intel386::decode(&mut q, cpu_type, code32)
    }

    #[test]
    fn test_decode_prefixes() {
        // rep es movsw
        let i = decode(&[0xF3, 0x26, 0xA5], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::Movsw);
        assert_eq!(i.rep, RepPrefix::Repe);
        assert_eq!(i.seg_override, Some(Segment::ES));
        assert_eq!(i.len, 3);

        // 66 prefix selects the 32-bit table
        let i = decode(&[0x66, 0x05, 0x78, 0x56, 0x34, 0x12], CpuType::Intel80386SX, false).unwrap();
        assert_eq!(i.op, Op::AddEaxId);
        assert_eq!(i.imm, 0x1234_5678);
        assert_eq!(i.operand_width(), InstructionWidth::Dword);
    }

    #[test]
    fn test_decode_modrm_16() {
        // mov ax, [bp+di-2]
        let i = decode(&[0x8B, 0x43, 0xFE], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::MovGwEw);
        assert_eq!(i.modrm_reg(), 0);
        assert_eq!(i.disp, 0xFFFE);
        assert_eq!(i.len, 3);

        // mov word [1234], 5678
        let i = decode(&[0xC7, 0x06, 0x34, 0x12, 0x78, 0x56], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::MovEwIw);
        assert_eq!(i.disp, 0x1234);
        assert_eq!(i.imm, 0x5678);
    }

    #[test]
    fn test_decode_sib() {
        // mov eax, [ebx+ecx*4+0x10]
        let i = decode(&[0x8B, 0x44, 0x8B, 0x10], CpuType::Intel80386SX, true).unwrap();
        assert_eq!(i.op, Op::MovGdEd);
        assert_eq!(i.sib, Some(0x8B));
        assert_eq!(i.disp, 0x10);
        assert_eq!(i.len, 4);

        // mov eax, [disp32] through SIB with no base
        let i = decode(&[0x8B, 0x04, 0x25, 0x00, 0x10, 0x00, 0x00], CpuType::Intel80386SX, true).unwrap();
        assert_eq!(i.disp, 0x1000);
        assert_eq!(i.len, 7);
    }

    #[test]
    fn test_decode_cpu_specific() {
        // movzx is a 386 instruction
        let i = decode(&[0x0F, 0xB6, 0xC0], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::Invalid);
        let i = decode(&[0x0F, 0xB6, 0xC0], CpuType::Intel80386SX, false).unwrap();
        assert_eq!(i.op, Op::MovzxGwEb);

        // LOADALL only exists on the 286
        let i = decode(&[0x0F, 0x05], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::Loadall);
        let i = decode(&[0x0F, 0x05], CpuType::Intel80386SX, false).unwrap();
        assert_eq!(i.op, Op::Invalid);

        // 66 is not a prefix on the 286
        let i = decode(&[0x66, 0x90], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::Invalid);
        assert_eq!(i.len, 1);
    }

    #[test]
    fn test_decode_groups() {
        // test byte [bx], 0x80
        let i = decode(&[0xF6, 0x07, 0x80], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::TestEbIb);
        assert_eq!(i.imm, 0x80);
        // neg ax has no immediate
        let i = decode(&[0xF7, 0xD8], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::NegEw);
        assert_eq!(i.len, 2);
        // add word [bx], -1 sign extends
        let i = decode(&[0x83, 0x07, 0xFF], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::AddEwIw);
        assert_eq!(i.imm, 0xFFFF_FFFF);
        // jmp far dword [bx]
        let i = decode(&[0xFF, 0x2F], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::JmpFarMw);
    }

    #[test]
    fn test_decode_far_pointer() {
        let i = decode(&[0xEA, 0x00, 0x01, 0x00, 0xF0], CpuType::Intel80286, false).unwrap();
        assert_eq!(i.op, Op::JmpFarAp);
        assert_eq!(i.imm, 0x0100);
        assert_eq!(i.imm2, 0xF000);
    }

    #[test]
    fn test_length_limit() {
        let mut bytes = vec![0x26; 15];
        bytes.push(0x90);
        assert_eq!(
            decode(&bytes, CpuType::Intel80386SX, false).map(|i| i.op),
            Err(CpuException::GeneralProtection(0))
        );
        let mut bytes = vec![0x26; 14];
        bytes[13] = 0x90;
        assert_eq!(decode(&bytes, CpuType::Intel80386SX, false).map(|i| i.len), Ok(14));
    }
}
