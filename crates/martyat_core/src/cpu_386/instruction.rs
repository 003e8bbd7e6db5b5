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

    cpu_386::instruction.rs

    The decoded instruction.

*/
use std::fmt::Display;

use crate::cpu_common::InstructionWidth;

use super::{execute::Op, Segment};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RepPrefix {
    #[default]
    None,
    /// F3: REP, REPE, REPZ.
    Repe,
    /// F2: REPNE, REPNZ.
    Repne,
}

/// Source of a decoded immediate field.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Imm {
    #[default]
    None,
    /// Unsigned byte.
    Ib,
    /// Byte sign extended to the operand size.
    Ibs,
    /// Word regardless of operand size.
    Iw,
    /// Word or dword by operand size.
    Iv,
    /// Word, then byte (ENTER).
    IwIb,
    /// Far pointer: offset by operand size, then selector.
    Ap,
    /// Memory offset by address size.
    O,
    /// Byte displacement.
    Jb,
    /// Word or dword displacement by operand size.
    Jv,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Instruction {
    pub op: Op,
    /// Primary opcode, or 0x0F00 | second byte for the two byte map.
    pub opcode: u16,
    pub seg_override: Option<Segment>,
    pub rep: RepPrefix,
    pub lock: bool,
    pub op32: bool,
    pub addr32: bool,
    pub has_modrm: bool,
    pub modrm: u8,
    pub sib: Option<u8>,
    pub disp: u32,
    pub imm: u32,
    pub imm2: u32,
    pub len: u8,
    /// EIP of the first byte, prefixes included.
    pub address: u32,
    /// Segment and offset of the memory operand, once computed.
    pub(crate) ea: Option<(Segment, u32)>,
}

impl Instruction {
    #[inline]
    pub fn modrm_mod(&self) -> u8 {
        self.modrm >> 6
    }
    #[inline]
    pub fn modrm_reg(&self) -> u8 {
        (self.modrm >> 3) & 0x07
    }
    #[inline]
    pub fn modrm_rm(&self) -> u8 {
        self.modrm & 0x07
    }
    /// True when the r/m operand names a register.
    #[inline]
    pub fn is_register_form(&self) -> bool {
        !self.has_modrm || self.modrm_mod() == 3
    }
    #[inline]
    pub fn operand_width(&self) -> InstructionWidth {
        if self.op32 {
            InstructionWidth::Dword
        }
        else {
            InstructionWidth::Word
        }
    }
    #[inline]
    pub fn address_mask(&self) -> u32 {
        if self.addr32 {
            0xFFFF_FFFF
        }
        else {
            0xFFFF
        }
    }
    /// Segment of the memory operand given its addressing default.
    #[inline]
    pub fn segment(&self, default: Segment) -> Segment {
        self.seg_override.unwrap_or(default)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mnemonic: &'static str = self.op.into();
        match self.rep {
            RepPrefix::Repe => write!(f, "rep ")?,
            RepPrefix::Repne => write!(f, "repne ")?,
            RepPrefix::None => {}
        }
        if self.lock {
            write!(f, "lock ")?;
        }
        write!(f, "{}", mnemonic)?;
        if let Some(seg) = self.seg_override {
            write!(f, " {}:", seg.name())?;
        }
        if self.has_modrm {
            write!(f, " modrm:{:02X}", self.modrm)?;
            if let Some(sib) = self.sib {
                write!(f, " sib:{:02X}", sib)?;
            }
            if self.modrm_mod() != 3 && self.disp != 0 {
                write!(f, " disp:{:X}", self.disp)?;
            }
        }
        if self.imm != 0 || self.imm2 != 0 {
            write!(f, " imm:{:X}", self.imm)?;
            if self.imm2 != 0 {
                write!(f, ",{:X}", self.imm2)?;
            }
        }
        Ok(())
    }
}
