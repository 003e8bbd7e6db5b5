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

    cpu_386::control.rs

    Operating mode queries and the control, debug and test registers.

*/
use crate::cpu_common::CpuException;

use super::{mmu::PAGE_FRAME_MASK, *};

/// Writable CR0 bits on the 386.
const CR0_386_MASK: u32 = CR0_PE | CR0_MP | CR0_EM | CR0_TS | CR0_ET | CR0_PG;
/// Writable MSW bits on the 286.
const MSW_286_MASK: u32 = CR0_PE | CR0_MP | CR0_EM | CR0_TS;

/// Writable bits of DR6: B0-B3, BD, BS, BT.
const DR6_WRITABLE: u32 = 0xE00F;

impl Intel386 {
    #[inline]
    pub fn is_protected_mode(&self) -> bool {
        self.cr[0] & CR0_PE != 0
    }

    #[inline]
    pub fn is_real_mode(&self) -> bool {
        !self.is_protected_mode()
    }

    #[inline]
    pub fn is_v86_mode(&self) -> bool {
        self.eflags & CPU_FLAG_VM != 0
    }

    /// Protected mode proper, where selectors index descriptor tables.
    #[inline]
    pub fn is_pmode_not_v86(&self) -> bool {
        self.is_protected_mode() && !self.is_v86_mode()
    }

    #[inline]
    pub fn iopl(&self) -> u8 {
        ((self.eflags & CPU_FLAG_IOPL) >> 12) as u8
    }

    /// Default operand and address size of the code segment.
    #[inline]
    pub(crate) fn code_big(&self) -> bool {
        self.sregs[Segment::CS.index()].cache.big && self.is_pmode_not_v86()
    }

    /// Re-derive the current privilege level from the mode and the live code segment.
    pub(crate) fn update_cpl(&mut self) {
        self.cpl = if self.is_real_mode() {
            0
        }
        else if self.is_v86_mode() {
            3
        }
        else {
            self.sregs[Segment::CS.index()].selector.rpl()
        };
    }

    /// Write CR0 (or the MSW on the 286). Setting PG without PE raises #GP(0) and leaves CR0
    /// unchanged.
    pub(crate) fn set_cr0(&mut self, value: u32) -> Result<(), CpuException> {
        let old = self.cr[0];
        let new = if self.cpu_type.is_386() {
            (value & CR0_386_MASK) | CR0_ET
        }
        else {
            // The 286 can only leave protected mode through reset.
            (value & MSW_286_MASK) | (old & CR0_PE) | MSW_286_RESERVED
        };

        if new & CR0_PG != 0 && new & CR0_PE == 0 {
            return Err(CpuException::GeneralProtection(0));
        }
        self.cr[0] = new;

        if (old ^ new) & (CR0_PE | CR0_PG) != 0 {
            log::debug!(
                "CR0 {:08X} -> {:08X}: PE={} PG={}",
                old,
                new,
                new & CR0_PE != 0,
                new & CR0_PG != 0
            );
            self.tlb_flush();
            if new & CR0_PE == 0 {
                self.eflags &= !CPU_FLAG_VM;
            }
            if (old ^ new) & CR0_PE != 0 {
                // CS still holds its real mode cache after PE is set. Its selector RPL is
                // just the low bits of the paragraph and privilege stays at 0.
                self.cpl = if new & CR0_PE != 0 {
                    self.sregs[Segment::CS.index()].cache.dpl()
                }
                else {
                    0
                };
            }
            self.pq_invalidate();
        }
        Ok(())
    }

    pub(crate) fn set_cr3(&mut self, value: u32) {
        self.cr[3] = value & PAGE_FRAME_MASK;
        self.tlb_flush();
    }

    /// Write a control register by number, as MOV CRn does.
    pub(crate) fn write_cr(&mut self, n: u8, value: u32) -> Result<(), CpuException> {
        match n {
            0 => self.set_cr0(value),
            2 => {
                self.cr[2] = value;
                Ok(())
            }
            3 => {
                self.set_cr3(value);
                Ok(())
            }
            _ => Err(CpuException::InvalidOpcode),
        }
    }

    pub(crate) fn read_cr(&self, n: u8) -> Result<u32, CpuException> {
        match n {
            0 | 2 | 3 => Ok(self.cr[n as usize]),
            _ => Err(CpuException::InvalidOpcode),
        }
    }

    /// General detect: with DR7.GD set, any debug register access faults with BD reported.
    fn debug_access_check(&mut self) -> Result<(), CpuException> {
        if self.dr[7] & DR7_GD != 0 {
            self.dr[6] |= DR6_BD;
            self.dr[7] &= !DR7_GD;
            return Err(CpuException::Debug);
        }
        Ok(())
    }

    pub(crate) fn read_dr(&mut self, n: u8) -> Result<u32, CpuException> {
        self.debug_access_check()?;
        Ok(match n {
            0..=3 => self.dr[n as usize],
            4 | 6 => self.dr[6],
            _ => self.dr[7],
        })
    }

    pub(crate) fn write_dr(&mut self, n: u8, value: u32) -> Result<(), CpuException> {
        self.debug_access_check()?;
        match n {
            0..=3 => self.dr[n as usize] = value,
            4 | 6 => self.dr[6] = (value & DR6_WRITABLE) | DR6_RESERVED,
            _ => self.dr[7] = value | DR7_RESERVED,
        }
        Ok(())
    }

    /// Only TR6 and TR7 exist, the TLB test command and data registers. They are latched but
    /// the test function is not modeled.
    pub(crate) fn read_tr(&self, n: u8) -> Result<u32, CpuException> {
        match n {
            6 | 7 => Ok(self.test_regs[n as usize - 6]),
            _ => Err(CpuException::InvalidOpcode),
        }
    }

    pub(crate) fn write_tr(&mut self, n: u8, value: u32) -> Result<(), CpuException> {
        match n {
            6 | 7 => {
                self.test_regs[n as usize - 6] = value;
                Ok(())
            }
            _ => Err(CpuException::InvalidOpcode),
        }
    }

    /// Match the linear address of the next instruction against the enabled execute
    /// breakpoints. Returns the DR6 B bits of every hit.
    pub(crate) fn code_breakpoint_hits(&self, linear: u32) -> u32 {
        let dr7 = self.dr[7];
        let mut hits = 0;
        for i in 0..4 {
            let enabled = (dr7 >> (i * 2)) & 0x3 != 0;
            let rw_len = (dr7 >> (16 + i * 4)) & 0xF;
            if enabled && rw_len == 0 && self.dr[i] == linear {
                hits |= DR6_B0 << i;
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    #[test]
    fn test_cr0_pg_without_pe() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.set_cr0(CR0_PG), Err(CpuException::GeneralProtection(0)));
        assert_eq!(cpu.cr(0) & CR0_PG, 0);
        assert_eq!(cpu.cr(0), CR0_ET);
    }

    #[test]
    fn test_cr0_family_bits() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.cr(0), 0xFFF0);
        cpu.set_cr0(CR0_PE).unwrap();
        assert!(cpu.is_protected_mode());
        // The 286 cannot clear PE.
        cpu.set_cr0(0).unwrap();
        assert_eq!(cpu.cr(0), 0xFFF1);

        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.set_cr0(CR0_PE).unwrap();
        assert_eq!(cpu.cr(0), CR0_PE | CR0_ET);
        cpu.set_cr0(0).unwrap();
        assert!(cpu.is_real_mode());
    }

    #[test]
    fn test_enter_pmode_from_odd_code_segment() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        m.poke_descriptor(0x800, 1, 0x10000, 0xFFFF, 0x92, 0);
        // mov ax,1; lmsw ax; mov ax,8; mov ds,ax
        m.poke_bytes(0x10030, &[0xB8, 0x01, 0x00, 0x0F, 0x01, 0xF0, 0xB8, 0x08, 0x00, 0x8E, 0xD8]);
        let cpu = m.cpu_mut();
        cpu.gdtr = DescriptorTable { base: 0x800, limit: 0x0F };
        cpu.load_segment_real(Segment::CS, 0x1003);
        cpu.set_eip(0);
        m.step();
        m.step();
        assert!(m.cpu().is_protected_mode());
        assert_eq!(m.cpu().cpl(), 0);
        m.step();
        m.step();
        assert_eq!(m.cpu().cpl(), 0);
        assert_eq!(m.cpu().segment(Segment::DS).cache.base, 0x10000);
        assert_eq!(m.cpu().segment(Segment::DS).selector.value(), 0x08);
    }

    #[test]
    fn test_general_detect() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.write_dr(7, DR7_GD).unwrap();
        assert_eq!(cpu.read_dr(0), Err(CpuException::Debug));
        assert_ne!(cpu.dr(6) & DR6_BD, 0);
        assert_eq!(cpu.dr(7) & DR7_GD, 0);
        assert!(cpu.read_dr(0).is_ok());
    }

    #[test]
    fn test_code_breakpoint_match() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.write_dr(1, 0x1234).unwrap();
        assert_eq!(cpu.code_breakpoint_hits(0x1234), 0);
        cpu.write_dr(7, 0x4).unwrap();
        assert_eq!(cpu.code_breakpoint_hits(0x1234), 0x2);
        // A data breakpoint on the same address does not fire on execution.
        cpu.write_dr(7, 0x4 | 0x0010_0000).unwrap();
        assert_eq!(cpu.code_breakpoint_hits(0x1234), 0);
    }
}
