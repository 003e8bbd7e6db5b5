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

    cpu_386::descriptor.rs

    Selectors, descriptors and the segment descriptor cache.

*/
use std::fmt::Display;

use modular_bitfield::{bitfield, prelude::*};

use crate::cpu_common::CpuType;

pub const ACCESS_PRESENT: u8 = 0x80;
pub const ACCESS_DPL_MASK: u8 = 0x60;
pub const ACCESS_SEGMENT: u8 = 0x10;
pub const ACCESS_CODE: u8 = 0x08;
pub const ACCESS_CONFORMING: u8 = 0x04;
pub const ACCESS_EXPAND_DOWN: u8 = 0x04;
pub const ACCESS_READABLE: u8 = 0x02;
pub const ACCESS_WRITABLE: u8 = 0x02;
pub const ACCESS_ACCESSED: u8 = 0x01;
pub const ACCESS_TYPE_MASK: u8 = 0x0F;

/// Access rights of a real mode data segment: present, writable, accessed.
pub const ACCESS_REAL_DATA: u8 = 0x93;
/// Access rights of a real mode code segment: present, readable, accessed.
pub const ACCESS_REAL_CODE: u8 = 0x9B;

pub const SYS_TSS286_AVAIL: u8 = 0x1;
pub const SYS_LDT: u8 = 0x2;
pub const SYS_TSS286_BUSY: u8 = 0x3;
pub const SYS_CALL_GATE286: u8 = 0x4;
pub const SYS_TASK_GATE: u8 = 0x5;
pub const SYS_INT_GATE286: u8 = 0x6;
pub const SYS_TRAP_GATE286: u8 = 0x7;
pub const SYS_TSS386_AVAIL: u8 = 0x9;
pub const SYS_TSS386_BUSY: u8 = 0xB;
pub const SYS_CALL_GATE386: u8 = 0xC;
pub const SYS_INT_GATE386: u8 = 0xE;
pub const SYS_TRAP_GATE386: u8 = 0xF;

/// The TSS busy bit within the type field.
pub const SYS_TSS_BUSY_BIT: u8 = 0x2;

#[bitfield]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    pub rpl: B2,
    pub ti: bool,
    pub index: B13,
}

impl Default for Selector {
    fn default() -> Self {
        Selector::new()
    }
}

impl Selector {
    #[inline]
    pub fn from_value(value: u16) -> Self {
        Selector::from_bytes(value.to_le_bytes())
    }
    #[inline]
    pub fn value(&self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }
    /// A null selector references GDT entry 0, with any RPL.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.value() & 0xFFFC == 0
    }
    /// The selector with RPL stripped, as reported in error codes.
    #[inline]
    pub fn error_code(&self) -> u16 {
        self.value() & 0xFFFC
    }
    /// Byte offset of the referenced entry within its table.
    #[inline]
    pub fn table_offset(&self) -> u32 {
        (self.index() as u32) << 3
    }
}

/// A code, data or system segment descriptor decoded into effective values. `limit` is the
/// byte granular limit after applying G.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub base: u32,
    pub limit: u32,
    pub access: u8,
    pub big: bool,
    pub granular: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GateDescriptor {
    pub selector: u16,
    pub offset: u32,
    pub param_count: u8,
    pub access: u8,
}

impl GateDescriptor {
    #[inline]
    pub fn gate_type(&self) -> u8 {
        self.access & ACCESS_TYPE_MASK
    }
    /// 386 gates carry a 32-bit offset and push 32-bit frames.
    #[inline]
    pub fn is_32(&self) -> bool {
        self.access & 0x08 != 0
    }
    #[inline]
    pub fn dpl(&self) -> u8 {
        (self.access & ACCESS_DPL_MASK) >> 5
    }
    #[inline]
    pub fn present(&self) -> bool {
        self.access & ACCESS_PRESENT != 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Descriptor {
    /// Code or data segment.
    Segment(SegmentDescriptor),
    /// TSS or LDT.
    System(SegmentDescriptor),
    /// Call, task, interrupt or trap gate.
    Gate(GateDescriptor),
    /// A reserved type. Carries the access byte.
    Invalid(u8),
}

impl Descriptor {
    /// Decode the raw 8 bytes of a descriptor table entry for the given CPU. The 80286 ignores
    /// the top word and has no 386 system types.
    pub fn decode(raw: [u8; 8], cpu_type: CpuType) -> Descriptor {
        let access = raw[5];
        let is_386 = cpu_type.is_386();

        let seg = || {
            let mut base = u32::from_le_bytes([raw[2], raw[3], raw[4], 0]);
            let mut limit = u16::from_le_bytes([raw[0], raw[1]]) as u32;
            let mut big = false;
            let mut granular = false;
            if is_386 {
                base |= (raw[7] as u32) << 24;
                limit |= ((raw[6] & 0x0F) as u32) << 16;
                granular = raw[6] & 0x80 != 0;
                big = raw[6] & 0x40 != 0;
                if granular {
                    limit = (limit << 12) | 0xFFF;
                }
            }
            SegmentDescriptor {
                base,
                limit,
                access,
                big,
                granular,
            }
        };

        if access & ACCESS_SEGMENT != 0 {
            return Descriptor::Segment(seg());
        }

        let sys_type = access & ACCESS_TYPE_MASK;
        if !is_386 && sys_type & 0x08 != 0 {
            return Descriptor::Invalid(access);
        }
        match sys_type {
            SYS_TSS286_AVAIL | SYS_LDT | SYS_TSS286_BUSY | SYS_TSS386_AVAIL | SYS_TSS386_BUSY => {
                Descriptor::System(seg())
            }
            SYS_CALL_GATE286 | SYS_TASK_GATE | SYS_INT_GATE286 | SYS_TRAP_GATE286 | SYS_CALL_GATE386
            | SYS_INT_GATE386 | SYS_TRAP_GATE386 => {
                let mut offset = u16::from_le_bytes([raw[0], raw[1]]) as u32;
                if sys_type & 0x08 != 0 {
                    offset |= (u16::from_le_bytes([raw[6], raw[7]]) as u32) << 16;
                }
                Descriptor::Gate(GateDescriptor {
                    selector: u16::from_le_bytes([raw[2], raw[3]]),
                    offset,
                    param_count: raw[4] & 0x1F,
                    access,
                })
            }
            _ => Descriptor::Invalid(access),
        }
    }

    #[inline]
    pub fn access(&self) -> u8 {
        match self {
            Descriptor::Segment(d) | Descriptor::System(d) => d.access,
            Descriptor::Gate(g) => g.access,
            Descriptor::Invalid(a) => *a,
        }
    }

    #[inline]
    pub fn dpl(&self) -> u8 {
        (self.access() & ACCESS_DPL_MASK) >> 5
    }

    #[inline]
    pub fn present(&self) -> bool {
        self.access() & ACCESS_PRESENT != 0
    }

    #[inline]
    pub fn system_type(&self) -> Option<u8> {
        match self {
            Descriptor::Segment(_) => None,
            _ => Some(self.access() & ACCESS_TYPE_MASK),
        }
    }

    pub fn as_segment(&self) -> Option<&SegmentDescriptor> {
        match self {
            Descriptor::Segment(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_system(&self) -> Option<&SegmentDescriptor> {
        match self {
            Descriptor::System(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_gate(&self) -> Option<&GateDescriptor> {
        match self {
            Descriptor::Gate(g) => Some(g),
            _ => None,
        }
    }
}

/// The hidden part of a segment register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentCache {
    pub base: u32,
    pub limit: u32,
    pub access: u8,
    /// D/B bit: 32-bit code, 32-bit stack pointer or 4G expand-down upper bound.
    pub big: bool,
    pub granular: bool,
    /// False for a register loaded with a null selector, or invalidated on a privilege change.
    pub valid: bool,
}

impl From<&SegmentDescriptor> for SegmentCache {
    fn from(d: &SegmentDescriptor) -> Self {
        SegmentCache {
            base: d.base,
            limit: d.limit,
            access: d.access,
            big: d.big,
            granular: d.granular,
            valid: true,
        }
    }
}

impl SegmentCache {
    #[inline]
    pub fn present(&self) -> bool {
        self.access & ACCESS_PRESENT != 0
    }
    #[inline]
    pub fn dpl(&self) -> u8 {
        (self.access & ACCESS_DPL_MASK) >> 5
    }
    #[inline]
    pub fn is_code(&self) -> bool {
        self.access & (ACCESS_SEGMENT | ACCESS_CODE) == (ACCESS_SEGMENT | ACCESS_CODE)
    }
    #[inline]
    pub fn is_data(&self) -> bool {
        self.access & (ACCESS_SEGMENT | ACCESS_CODE) == ACCESS_SEGMENT
    }
    #[inline]
    pub fn is_conforming(&self) -> bool {
        self.is_code() && self.access & ACCESS_CONFORMING != 0
    }
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.is_data() || (self.is_code() && self.access & ACCESS_READABLE != 0)
    }
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.is_data() && self.access & ACCESS_WRITABLE != 0
    }
    #[inline]
    pub fn is_expand_down(&self) -> bool {
        self.is_data() && self.access & ACCESS_EXPAND_DOWN != 0
    }

    /// Check that `len` bytes at `offset` lie within the segment limit.
    #[inline]
    pub fn check_limit(&self, offset: u32, len: u32) -> bool {
        let last = offset as u64 + len as u64 - 1;
        if self.is_expand_down() {
            let upper: u64 = if self.big { 0xFFFF_FFFF } else { 0xFFFF };
            offset as u64 > self.limit as u64 && last <= upper
        }
        else {
            last <= self.limit as u64
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentRegister {
    pub selector: Selector,
    pub cache: SegmentCache,
}

impl SegmentRegister {
    /// A register loaded in real or virtual-8086 mode.
    pub fn real_mode(selector: u16, code: bool) -> Self {
        SegmentRegister {
            selector: Selector::from_value(selector),
            cache: SegmentCache {
                base: (selector as u32) << 4,
                limit: 0xFFFF,
                access: if code { ACCESS_REAL_CODE } else { ACCESS_REAL_DATA },
                big: false,
                granular: false,
                valid: true,
            },
        }
    }

    /// A protected mode register loaded with a null selector.
    pub fn null(selector: u16) -> Self {
        SegmentRegister {
            selector: Selector::from_value(selector),
            cache: SegmentCache::default(),
        }
    }

    /// LDTR or TR after reset: null, with an empty but usable cache.
    pub fn system_null() -> Self {
        SegmentRegister {
            selector: Selector::default(),
            cache: SegmentCache {
                limit: 0xFFFF,
                access: ACCESS_PRESENT,
                ..SegmentCache::default()
            },
        }
    }

    #[inline]
    pub fn value(&self) -> u16 {
        self.selector.value()
    }
}

impl Display for SegmentRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04X} [base:{:08X} limit:{:08X} ar:{:02X}{}]",
            self.selector.value(),
            self.cache.base,
            self.cache.limit,
            self.cache.access,
            if self.cache.valid { "" } else { " invalid" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_fields() {
        let s = Selector::from_value(0x001F);
        assert_eq!(s.rpl(), 3);
        assert!(s.ti());
        assert_eq!(s.index(), 3);
        assert_eq!(s.table_offset(), 0x18);
        assert_eq!(s.error_code(), 0x1C);
        assert!(Selector::from_value(0x0003).is_null());
        assert!(!Selector::from_value(0x0004).is_null());
    }

    #[test]
    fn test_decode_segment() {
        // Flat 4G 32-bit code segment, DPL 0.
        let raw = [0xFF, 0xFF, 0x00, 0x00, 0x00, 0x9A, 0xCF, 0x00];
        let d = Descriptor::decode(raw, CpuType::Intel80386SX);
        let seg = d.as_segment().unwrap();
        assert_eq!(seg.limit, 0xFFFF_FFFF);
        assert!(seg.big);
        assert_eq!(d.dpl(), 0);

        // The 286 ignores the top word.
        let d = Descriptor::decode(raw, CpuType::Intel80286);
        let seg = d.as_segment().unwrap();
        assert_eq!(seg.limit, 0xFFFF);
        assert!(!seg.big);
    }

    #[test]
    fn test_decode_gate_and_system() {
        let raw = [0x34, 0x12, 0x08, 0x00, 0x02, 0xEC, 0x78, 0x56];
        let d = Descriptor::decode(raw, CpuType::Intel80386SX);
        let g = d.as_gate().unwrap();
        assert_eq!(g.offset, 0x5678_1234);
        assert_eq!(g.selector, 0x0008);
        assert_eq!(g.param_count, 2);
        assert_eq!(g.dpl(), 3);
        assert!(g.is_32());

        // 386 call gate is reserved on the 286.
        assert_eq!(Descriptor::decode(raw, CpuType::Intel80286), Descriptor::Invalid(0xEC));

        let raw = [0x2B, 0x00, 0x00, 0x10, 0x00, 0x81, 0x00, 0x00];
        let d = Descriptor::decode(raw, CpuType::Intel80286);
        assert_eq!(d.system_type(), Some(SYS_TSS286_AVAIL));
        assert_eq!(d.as_system().unwrap().base, 0x1000);
    }

    #[test]
    fn test_expand_down_limit() {
        let cache = SegmentCache {
            limit: 0x0FFF,
            access: 0x97,
            valid: true,
            ..SegmentCache::default()
        };
        assert!(!cache.check_limit(0x0FFF, 1));
        assert!(cache.check_limit(0x1000, 2));
        assert!(!cache.check_limit(0xFFFF, 2));
    }
}
