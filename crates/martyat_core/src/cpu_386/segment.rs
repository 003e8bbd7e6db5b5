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

    cpu_386::segment.rs

    Segment register load protocols and descriptor table access.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{descriptor::*, *};

/// Constructor of the exception a failed load raises: #GP for ordinary loads, #TS during a task
/// switch.
pub(crate) type FaultFn = fn(u16) -> CpuException;

impl Intel386 {
    /// Linear address of the descriptor table entry `selector` references, after checking it
    /// against the table limit.
    pub(crate) fn descriptor_address(&self, selector: Selector, fault: FaultFn) -> Result<u32, CpuException> {
        let (base, limit) = if selector.ti() {
            let ldt = &self.ldtr.cache;
            if !ldt.valid || self.ldtr.selector.is_null() {
                return Err(fault(selector.error_code()));
            }
            (ldt.base, ldt.limit)
        }
        else {
            (self.gdtr.base, self.gdtr.limit as u32)
        };
        let offset = selector.table_offset();
        if offset + 7 > limit {
            return Err(fault(selector.error_code()));
        }
        Ok(base.wrapping_add(offset))
    }

    pub(crate) fn read_descriptor_raw(&mut self, address: u32) -> Result<[u8; 8], CpuException> {
        let lo = self.system_read(address, InstructionWidth::Dword)?;
        let hi = self.system_read(address.wrapping_add(4), InstructionWidth::Dword)?;
        let mut raw = [0u8; 8];
        raw[0..4].copy_from_slice(&lo.to_le_bytes());
        raw[4..8].copy_from_slice(&hi.to_le_bytes());
        Ok(raw)
    }

    /// Fetch and decode the descriptor `selector` references.
    pub(crate) fn fetch_descriptor(&mut self, selector: Selector, fault: FaultFn) -> Result<Descriptor, CpuException> {
        let address = self.descriptor_address(selector, fault)?;
        let raw = self.read_descriptor_raw(address)?;
        Ok(Descriptor::decode(raw, self.cpu_type))
    }

    /// Set the accessed bit of a code or data descriptor in memory.
    pub(crate) fn set_accessed(&mut self, selector: Selector) -> Result<(), CpuException> {
        let address = self.descriptor_address(selector, CpuException::GeneralProtection)?.wrapping_add(5);
        let access = self.system_read(address, InstructionWidth::Byte)? as u8;
        if access & ACCESS_ACCESSED == 0 {
            self.system_write(address, InstructionWidth::Byte, (access | ACCESS_ACCESSED) as u32)?;
        }
        Ok(())
    }

    /// Rewrite the access byte of a descriptor, as when the TSS busy bit changes.
    pub(crate) fn write_descriptor_access(&mut self, selector: Selector, access: u8) -> Result<(), CpuException> {
        let address = self.descriptor_address(selector, CpuException::GeneralProtection)?.wrapping_add(5);
        self.system_write(address, InstructionWidth::Byte, access as u32)
    }

    /// Load a segment register the way MOV, POP and LxS do.
    pub(crate) fn load_segment(&mut self, seg: Segment, selector: u16) -> Result<(), CpuException> {
        if !self.is_pmode_not_v86() {
            self.load_segment_real(seg, selector);
            return Ok(());
        }
        match seg {
            Segment::SS => self.load_ss_pmode(selector, self.cpl, CpuException::GeneralProtection),
            // Code segment loads in protected mode go through the control transfer paths.
            Segment::CS => Err(CpuException::GeneralProtection(0)),
            _ => self.load_data_segment_pmode(seg, selector, CpuException::GeneralProtection),
        }
    }

    /// Real and virtual-8086 mode load: base = selector * 16. Real mode data segments keep the
    /// limit and rights they already had.
    pub(crate) fn load_segment_real(&mut self, seg: Segment, selector: u16) {
        let reg = &mut self.sregs[seg.index()];
        if seg == Segment::CS || self.eflags & CPU_FLAG_VM != 0 {
            let mut new = SegmentRegister::real_mode(selector, seg == Segment::CS);
            if self.eflags & CPU_FLAG_VM != 0 {
                new.cache.access |= ACCESS_DPL_MASK;
            }
            *reg = new;
        }
        else {
            reg.selector = Selector::from_value(selector);
            reg.cache.base = (selector as u32) << 4;
            reg.cache.valid = true;
        }
        if seg == Segment::CS {
            self.pq_invalidate();
        }
    }

    /// Protected mode SS load. SS must be a present writable data segment with DPL and RPL
    /// equal to `cpl`.
    pub(crate) fn load_ss_pmode(&mut self, selector: u16, cpl: u8, fault: FaultFn) -> Result<(), CpuException> {
        let sel = Selector::from_value(selector);
        if sel.is_null() {
            return Err(fault(0));
        }
        let desc = self.fetch_descriptor(sel, fault)?;
        let Descriptor::Segment(d) = desc
        else {
            return Err(fault(sel.error_code()));
        };
        let cache = SegmentCache::from(&d);
        if sel.rpl() != cpl || !cache.is_writable() || cache.dpl() != cpl {
            return Err(fault(sel.error_code()));
        }
        if !cache.present() {
            return Err(CpuException::StackFault(sel.error_code()));
        }
        self.set_accessed(sel)?;
        self.sregs[Segment::SS.index()] = SegmentRegister {
            selector: sel,
            cache: SegmentCache {
                access: cache.access | ACCESS_ACCESSED,
                ..cache
            },
        };
        Ok(())
    }

    /// Protected mode DS/ES/FS/GS load. A null selector is accepted and marks the register
    /// unusable.
    pub(crate) fn load_data_segment_pmode(
        &mut self,
        seg: Segment,
        selector: u16,
        fault: FaultFn,
    ) -> Result<(), CpuException> {
        let sel = Selector::from_value(selector);
        if sel.is_null() {
            self.sregs[seg.index()] = SegmentRegister::null(selector);
            return Ok(());
        }
        let desc = self.fetch_descriptor(sel, fault)?;
        let Descriptor::Segment(d) = desc
        else {
            return Err(fault(sel.error_code()));
        };
        let cache = SegmentCache::from(&d);
        if cache.is_code() && !cache.is_readable() {
            return Err(fault(sel.error_code()));
        }
        if (cache.is_data() || !cache.is_conforming()) && (sel.rpl() > cache.dpl() || self.cpl > cache.dpl()) {
            return Err(fault(sel.error_code()));
        }
        if !cache.present() {
            return Err(CpuException::SegmentNotPresent(sel.error_code()));
        }
        self.set_accessed(sel)?;
        self.sregs[seg.index()] = SegmentRegister {
            selector: sel,
            cache: SegmentCache {
                access: cache.access | ACCESS_ACCESSED,
                ..cache
            },
        };
        Ok(())
    }

    /// Install a validated code segment. `rpl` becomes the new CPL.
    pub(crate) fn load_cs_pmode(&mut self, selector: u16, desc: &SegmentDescriptor, rpl: u8) -> Result<(), CpuException> {
        let mut sel = Selector::from_value(selector);
        self.set_accessed(sel)?;
        sel.set_rpl(rpl);
        self.sregs[Segment::CS.index()] = SegmentRegister {
            selector: sel,
            cache: SegmentCache {
                access: desc.access | ACCESS_ACCESSED,
                ..SegmentCache::from(desc)
            },
        };
        self.update_cpl();
        self.pq_invalidate();
        Ok(())
    }

    /// After a privilege level change, data and non-conforming code segments that are more
    /// privileged than the new CPL become unusable.
    pub(crate) fn validate(&mut self, seg: Segment) {
        let cache = &self.sregs[seg.index()].cache;
        if !cache.valid {
            return;
        }
        if (cache.is_data() || !cache.is_conforming()) && cache.dpl() < self.cpl {
            log::trace!("Invalidating {} on privilege change", seg.name());
            self.sregs[seg.index()] = SegmentRegister::null(0);
        }
    }

    pub(crate) fn validate_data_segments(&mut self) {
        for seg in [Segment::ES, Segment::DS, Segment::FS, Segment::GS] {
            self.validate(seg);
        }
    }

    /// LLDT. The selector must reference an LDT descriptor in the GDT.
    pub(crate) fn load_ldtr(&mut self, selector: u16, fault: FaultFn) -> Result<(), CpuException> {
        let sel = Selector::from_value(selector);
        if sel.is_null() {
            self.ldtr = SegmentRegister::null(selector);
            return Ok(());
        }
        if sel.ti() {
            return Err(fault(sel.error_code()));
        }
        let desc = self.fetch_descriptor(sel, fault)?;
        let Descriptor::System(d) = desc
        else {
            return Err(fault(sel.error_code()));
        };
        if d.access & ACCESS_TYPE_MASK != SYS_LDT {
            return Err(fault(sel.error_code()));
        }
        if d.access & ACCESS_PRESENT == 0 {
            return Err(CpuException::SegmentNotPresent(sel.error_code()));
        }
        self.ldtr = SegmentRegister {
            selector: sel,
            cache: SegmentCache::from(&d),
        };
        Ok(())
    }

    /// LTR. The selector must reference an available TSS in the GDT, which is marked busy.
    pub(crate) fn load_tr(&mut self, selector: u16) -> Result<(), CpuException> {
        let sel = Selector::from_value(selector);
        if sel.is_null() || sel.ti() {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        }
        let desc = self.fetch_descriptor(sel, CpuException::GeneralProtection)?;
        let Descriptor::System(d) = desc
        else {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        };
        let sys_type = d.access & ACCESS_TYPE_MASK;
        if sys_type != SYS_TSS286_AVAIL && sys_type != SYS_TSS386_AVAIL {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        }
        if d.access & ACCESS_PRESENT == 0 {
            return Err(CpuException::SegmentNotPresent(sel.error_code()));
        }
        let busy = d.access | SYS_TSS_BUSY_BIT;
        self.write_descriptor_access(sel, busy)?;
        self.tr = SegmentRegister {
            selector: sel,
            cache: SegmentCache {
                access: busy,
                ..SegmentCache::from(&d)
            },
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    const GDT: u32 = 0x800;

    /// GDT: 1 = ring 0 data, 2 = ring 0 read-only data, 3 = ring 3 data, 4 = ring 0 code
    /// (execute only), 5 = not present ring 0 data.
    fn setup_gdt(m: &mut TestMachine) {
        m.poke_descriptor(GDT, 1, 0x10000, 0xFFFF, 0x92, 0);
        m.poke_descriptor(GDT, 2, 0x20000, 0xFFFF, 0x90, 0);
        m.poke_descriptor(GDT, 3, 0x30000, 0xFFFF, 0xF2, 0);
        m.poke_descriptor(GDT, 4, 0x40000, 0xFFFF, 0x98, 0);
        m.poke_descriptor(GDT, 5, 0x50000, 0xFFFF, 0x12, 0);
        let cpu = m.cpu_mut();
        cpu.gdtr = DescriptorTable { base: GDT, limit: 0x3F };
        cpu.cr[0] |= CR0_PE;
    }

    #[test]
    fn test_ss_load_protocol() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        setup_gdt(&mut m);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.load_segment(Segment::SS, 0), Err(CpuException::GeneralProtection(0)));
        assert_eq!(cpu.load_segment(Segment::SS, 0x10), Err(CpuException::GeneralProtection(0x10)));
        assert_eq!(cpu.load_segment(Segment::SS, 0x18), Err(CpuException::GeneralProtection(0x18)));
        assert_eq!(cpu.load_segment(Segment::SS, 0x0B), Err(CpuException::GeneralProtection(0x08)));
        assert_eq!(cpu.load_segment(Segment::SS, 0x28), Err(CpuException::StackFault(0x28)));
        assert_eq!(cpu.load_segment(Segment::SS, 0x40), Err(CpuException::GeneralProtection(0x40)));
        cpu.load_segment(Segment::SS, 0x08).unwrap();
        assert_eq!(cpu.segment(Segment::SS).cache.base, 0x10000);
        // The accessed bit is written back.
        assert_eq!(m.peek_u8(GDT + 8 + 5), 0x93);
    }

    #[test]
    fn test_data_load_protocol() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        setup_gdt(&mut m);
        let cpu = m.cpu_mut();
        cpu.load_segment(Segment::DS, 0).unwrap();
        assert!(!cpu.segment(Segment::DS).cache.valid);
        assert_eq!(cpu.load_segment(Segment::ES, 0x20), Err(CpuException::GeneralProtection(0x20)));
        assert_eq!(cpu.load_segment(Segment::ES, 0x28), Err(CpuException::SegmentNotPresent(0x28)));
        cpu.load_segment(Segment::ES, 0x10).unwrap();
        assert!(cpu.segment(Segment::ES).cache.valid);

        // At CPL 3 a DPL 0 segment is refused, and validate drops one already loaded.
        cpu.cpl = 3;
        assert_eq!(cpu.load_segment(Segment::DS, 0x0B), Err(CpuException::GeneralProtection(0x08)));
        cpu.load_segment(Segment::DS, 0x1B).unwrap();
        cpu.validate_data_segments();
        assert!(!cpu.segment(Segment::ES).cache.valid);
        assert!(cpu.segment(Segment::DS).cache.valid);
    }

    #[test]
    fn test_real_mode_load_keeps_limit() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.sregs[Segment::DS.index()].cache.limit = 0xFFFF_FFFF;
        cpu.load_segment(Segment::DS, 0x1234).unwrap();
        assert_eq!(cpu.segment(Segment::DS).cache.base, 0x12340);
        assert_eq!(cpu.segment(Segment::DS).cache.limit, 0xFFFF_FFFF);
    }
}
