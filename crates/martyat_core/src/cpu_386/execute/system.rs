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

    cpu_386::execute::system.rs

    Protected mode system instructions: descriptor table registers,
    the MSW and control registers, selector queries, and the 286 LOADALL.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{
    super::{descriptor::*, *},
    ExecResult,
    W16,
    W32,
    W8,
};

/// Physical address of the 286 LOADALL image.
const LOADALL_BASE: u32 = 0x800;

impl Intel386 {
    /// Instructions reserved to privilege 0. In V86 mode CPL is 3.
    fn require_cpl0(&self) -> ExecResult {
        if self.is_protected_mode() && self.cpl != 0 {
            return Err(CpuException::GeneralProtection(0));
        }
        Ok(())
    }

    /// The 0F 00 group, LAR, LSL and ARPL do not exist outside protected mode.
    fn require_pmode(&self) -> ExecResult {
        if !self.is_pmode_not_v86() {
            return Err(CpuException::InvalidOpcode);
        }
        Ok(())
    }

    /// Store a selector to r/m: zero extended to the operand size in a register, a word in
    /// memory.
    fn store_selector(&mut self, value: u16) -> ExecResult {
        if self.i.is_register_form() {
            let width = self.i.operand_width();
            self.set_reg(width, self.i.modrm_rm(), value as u32);
            Ok(())
        }
        else {
            self.store_e(W16, value as u32)
        }
    }

    pub(crate) fn sldt(&mut self) -> ExecResult {
        self.require_pmode()?;
        let value = self.ldtr.value();
        self.store_selector(value)
    }

    /// STR
    pub(crate) fn store_task_register(&mut self) -> ExecResult {
        self.require_pmode()?;
        let value = self.tr.value();
        self.store_selector(value)
    }

    pub(crate) fn lldt(&mut self) -> ExecResult {
        self.require_pmode()?;
        self.require_cpl0()?;
        let selector = self.load_e(W16)? as u16;
        self.load_ldtr(selector, CpuException::GeneralProtection)
    }

    pub(crate) fn ltr(&mut self) -> ExecResult {
        self.require_pmode()?;
        self.require_cpl0()?;
        let selector = self.load_e(W16)? as u16;
        self.load_tr(selector)
    }

    /// Look up a selector for VERR, VERW, LAR and LSL. Selectors outside the tables yield
    /// `None` instead of faulting.
    fn query_descriptor(&mut self, selector: u16) -> Result<Option<([u8; 8], Descriptor)>, CpuException> {
        let sel = Selector::from_value(selector);
        if sel.is_null() {
            return Ok(None);
        }
        let Ok(address) = self.descriptor_address(sel, CpuException::GeneralProtection)
        else {
            return Ok(None);
        };
        let raw = self.read_descriptor_raw(address)?;
        Ok(Some((raw, Descriptor::decode(raw, self.cpu_type))))
    }

    /// Privilege test shared by the selector queries. Conforming code segments are visible
    /// from any level.
    fn query_visible(&self, selector: u16, dpl: u8, conforming: bool) -> bool {
        let rpl = Selector::from_value(selector).rpl();
        conforming || (dpl >= self.cpl && dpl >= rpl)
    }

    /// VERR and VERW set ZF when the segment is readable (writable) from the current level.
    pub(crate) fn verify(&mut self, write: bool) -> ExecResult {
        self.require_pmode()?;
        let selector = self.load_e(W16)? as u16;
        let ok = match self.query_descriptor(selector)? {
            Some((_, Descriptor::Segment(d))) => {
                let cache = SegmentCache::from(&d);
                let allowed = if write { cache.is_writable() } else { cache.is_readable() };
                allowed && self.query_visible(selector, cache.dpl(), cache.is_conforming())
            }
            _ => false,
        };
        self.set_flag_state(Flag::Zero, ok);
        Ok(())
    }

    pub(crate) fn lar(&mut self, width: InstructionWidth) -> ExecResult {
        self.require_pmode()?;
        let selector = self.load_e(W16)? as u16;
        let query = self.query_descriptor(selector)?;
        let visible = match &query {
            Some((_, desc @ Descriptor::Segment(d))) => {
                self.query_visible(selector, desc.dpl(), SegmentCache::from(d).is_conforming())
            }
            Some((_, desc @ (Descriptor::System(_) | Descriptor::Gate(_)))) => {
                let valid_type = matches!(
                    desc.system_type(),
                    Some(
                        SYS_TSS286_AVAIL
                            | SYS_LDT
                            | SYS_TSS286_BUSY
                            | SYS_CALL_GATE286
                            | SYS_TASK_GATE
                            | SYS_TSS386_AVAIL
                            | SYS_TSS386_BUSY
                            | SYS_CALL_GATE386
                    )
                );
                valid_type && self.query_visible(selector, desc.dpl(), false)
            }
            _ => false,
        };
        self.set_flag_state(Flag::Zero, visible);
        if let (true, Some((raw, _))) = (visible, query) {
            let high = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
            let rights = if self.cpu_type.is_386() { high & 0x00F0_FF00 } else { high & 0xFF00 };
            self.store_g(width, rights & width.mask());
        }
        Ok(())
    }

    pub(crate) fn lsl(&mut self, width: InstructionWidth) -> ExecResult {
        self.require_pmode()?;
        let selector = self.load_e(W16)? as u16;
        let limit = match self.query_descriptor(selector)? {
            Some((_, desc @ Descriptor::Segment(d))) => self
                .query_visible(selector, desc.dpl(), SegmentCache::from(&d).is_conforming())
                .then_some(d.limit),
            Some((_, desc @ Descriptor::System(d))) => {
                let valid_type = matches!(
                    desc.system_type(),
                    Some(SYS_TSS286_AVAIL | SYS_LDT | SYS_TSS286_BUSY | SYS_TSS386_AVAIL | SYS_TSS386_BUSY)
                );
                (valid_type && self.query_visible(selector, desc.dpl(), false)).then_some(d.limit)
            }
            _ => None,
        };
        self.set_flag_state(Flag::Zero, limit.is_some());
        if let Some(limit) = limit {
            self.store_g(width, limit & width.mask());
        }
        Ok(())
    }

    /// SGDT and SIDT. With a 16-bit operand the 386 stores a 24-bit base; the 286 fills the
    /// top byte with ones.
    pub(crate) fn store_table(&mut self, idt: bool) -> ExecResult {
        self.require_memory_form()?;
        let table = if idt { self.idtr } else { self.gdtr };
        let base = if !self.cpu_type.is_386() {
            table.base | 0xFF00_0000
        }
        else if self.i.op32 {
            table.base
        }
        else {
            table.base & 0x00FF_FFFF
        };
        let (seg, offset) = self.ea();
        self.seg_check_write(seg, offset, 6)?;
        self.write_mem(seg, offset, W16, table.limit as u32)?;
        let base_offset = offset.wrapping_add(2) & self.i.address_mask();
        self.write_mem(seg, base_offset, W32, base)
    }

    /// LGDT and LIDT.
    pub(crate) fn load_table(&mut self, idt: bool) -> ExecResult {
        self.require_cpl0()?;
        self.require_memory_form()?;
        let (seg, offset) = self.ea();
        let limit = self.read_mem(seg, offset, W16)? as u16;
        let base_offset = offset.wrapping_add(2) & self.i.address_mask();
        let mut base = self.read_mem(seg, base_offset, W32)?;
        if !self.i.op32 {
            base &= 0x00FF_FFFF;
        }
        let table = DescriptorTable { base, limit };
        log::debug!("{} loaded: base {:08X} limit {:04X}", if idt { "IDTR" } else { "GDTR" }, base, limit);
        if idt {
            self.idtr = table;
        }
        else {
            self.gdtr = table;
        }
        Ok(())
    }

    pub(crate) fn smsw(&mut self) -> ExecResult {
        let msw = self.cr[0];
        if self.i.is_register_form() {
            let width = self.i.operand_width();
            self.set_reg(width, self.i.modrm_rm(), msw & width.mask());
            Ok(())
        }
        else {
            self.store_e(W16, msw & 0xFFFF)
        }
    }

    /// LMSW writes PE, MP, EM and TS. PE can be set but not cleared.
    pub(crate) fn lmsw(&mut self) -> ExecResult {
        self.require_cpl0()?;
        let value = self.load_e(W16)?;
        let new = (self.cr[0] & !(CR0_MP | CR0_EM | CR0_TS)) | (value & (CR0_PE | CR0_MP | CR0_EM | CR0_TS));
        self.set_cr0(new)
    }

    /// ARPL r/m16, r16: raise the RPL of the destination to that of the source.
    pub(crate) fn arpl(&mut self) -> ExecResult {
        self.require_pmode()?;
        self.check_e_writable(W16)?;
        let dest = self.load_e(W16)?;
        let src = self.load_g(W16);
        if dest & 3 < src & 3 {
            self.set_flag(Flag::Zero);
            self.store_e(W16, (dest & !3) | (src & 3))
        }
        else {
            self.clear_flag(Flag::Zero);
            Ok(())
        }
    }

    pub(crate) fn clts(&mut self) -> ExecResult {
        self.require_cpl0()?;
        self.cr[0] &= !CR0_TS;
        Ok(())
    }

    /// Read a 6-byte descriptor cache entry from the LOADALL image: 24-bit base, access
    /// rights, 16-bit limit.
    fn loadall_cache(&mut self, address: u32) -> SegmentCache {
        let base = self.bus.read_system(address, W16) | (self.bus.read_system(address + 2, W8) << 16);
        let access = self.bus.read_system(address + 3, W8) as u8;
        let limit = self.bus.read_system(address + 4, W16);
        SegmentCache {
            base,
            limit,
            access,
            big: false,
            granular: false,
            valid: access & ACCESS_PRESENT != 0,
        }
    }

    /// 286 LOADALL: reload the whole register file and every descriptor cache from the image at
    /// physical 800h.
    pub(crate) fn loadall(&mut self) -> ExecResult {
        self.require_cpl0()?;
        let word = |cpu: &mut Intel386, offset: u32| cpu.bus.read_system(LOADALL_BASE + offset, W16) as u16;

        let msw = word(self, 0x06) as u32;
        self.cr[0] = (msw & (CR0_PE | CR0_MP | CR0_EM | CR0_TS)) | (self.cr[0] & CR0_PE) | MSW_286_RESERVED;
        let tr = word(self, 0x16);
        let flags = word(self, 0x18) as u32;
        self.eflags = (flags & CPU_FLAGS_286_MASK) | CPU_FLAGS_RESERVED_ON;
        self.eip = word(self, 0x1A) as u32;
        let ldtr = word(self, 0x1C);
        let selectors = [
            (Segment::DS, word(self, 0x1E)),
            (Segment::SS, word(self, 0x20)),
            (Segment::CS, word(self, 0x22)),
            (Segment::ES, word(self, 0x24)),
        ];
        for (i, n) in [REG_EDI, REG_ESI, REG_EBP, REG_ESP, REG_EBX, REG_EDX, REG_ECX, REG_EAX]
            .into_iter()
            .enumerate()
        {
            let value = word(self, 0x26 + i as u32 * 2);
            self.regs[n].set_word(value);
        }

        let caches = [(Segment::ES, 0x36), (Segment::CS, 0x3C), (Segment::SS, 0x42), (Segment::DS, 0x48)];
        for (seg, offset) in caches {
            let cache = self.loadall_cache(LOADALL_BASE + offset);
            self.sregs[seg.index()].cache = cache;
        }
        for (seg, selector) in selectors {
            self.sregs[seg.index()].selector = Selector::from_value(selector);
        }

        let gdt = self.loadall_cache(LOADALL_BASE + 0x4E);
        self.gdtr = DescriptorTable {
            base: gdt.base,
            limit: gdt.limit as u16,
        };
        let ldt = self.loadall_cache(LOADALL_BASE + 0x54);
        self.ldtr = SegmentRegister {
            selector: Selector::from_value(ldtr),
            cache: ldt,
        };
        let idt = self.loadall_cache(LOADALL_BASE + 0x5A);
        self.idtr = DescriptorTable {
            base: idt.base,
            limit: idt.limit as u16,
        };
        let tss = self.loadall_cache(LOADALL_BASE + 0x60);
        self.tr = SegmentRegister {
            selector: Selector::from_value(tr),
            cache: tss,
        };

        log::debug!("LOADALL: CS:IP {:04X}:{:04X} MSW {:04X}", selectors[2].1, self.eip, self.cr[0]);
        self.update_cpl();
        self.tlb_flush();
        self.pq_invalidate();
        Ok(())
    }

    /* ----------------------- 386 special registers ------------------------ */

    /// MOV r32, CRn. The r/m field always names a register.
    pub(crate) fn mov_r_cr(&mut self) -> ExecResult {
        self.require_cpl0()?;
        let value = self.read_cr(self.i.modrm_reg())?;
        self.set_reg32(self.i.modrm_rm(), value);
        Ok(())
    }

    pub(crate) fn mov_cr_r(&mut self) -> ExecResult {
        self.require_cpl0()?;
        let value = self.reg32(self.i.modrm_rm());
        self.write_cr(self.i.modrm_reg(), value)
    }

    pub(crate) fn mov_r_dr(&mut self) -> ExecResult {
        self.require_cpl0()?;
        let value = self.read_dr(self.i.modrm_reg())?;
        self.set_reg32(self.i.modrm_rm(), value);
        Ok(())
    }

    pub(crate) fn mov_dr_r(&mut self) -> ExecResult {
        self.require_cpl0()?;
        let value = self.reg32(self.i.modrm_rm());
        self.write_dr(self.i.modrm_reg(), value)
    }

    pub(crate) fn mov_r_tr(&mut self) -> ExecResult {
        self.require_cpl0()?;
        let value = self.read_tr(self.i.modrm_reg())?;
        self.set_reg32(self.i.modrm_rm(), value);
        Ok(())
    }

    pub(crate) fn mov_tr_r(&mut self) -> ExecResult {
        self.require_cpl0()?;
        let value = self.reg32(self.i.modrm_rm());
        self.write_tr(self.i.modrm_reg(), value)
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    const GDT: u32 = 0x1000;

    fn pmode_machine(cpu_type: CpuType) -> TestMachine {
        let mut m = TestMachine::new(cpu_type);
        // 1 = ring 0 data, 2 = ring 3 data, 3 = ring 0 conforming code, 4 = 286 TSS,
        // 5 = interrupt gate
        m.poke_descriptor(GDT, 1, 0x10000, 0xFFFF, 0x92, 0);
        m.poke_descriptor(GDT, 2, 0x20000, 0x0FFF, 0xF2, 0);
        m.poke_descriptor(GDT, 3, 0x30000, 0xFFFF, 0x9E, 0);
        m.poke_descriptor(GDT, 4, 0x40000, 0x002B, 0x81, 0);
        m.poke_descriptor(GDT, 5, 0x0008, 0x1234, 0x86, 0);
        let cpu = m.cpu_mut();
        cpu.gdtr = DescriptorTable { base: GDT, limit: 0x3F };
        cpu.cr[0] |= CR0_PE;
        m
    }

    #[test]
    fn test_verr_verw() {
        let mut m = pmode_machine(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.i.has_modrm = true;
        // verw ax
        cpu.i.modrm = 0xE8;
        cpu.set_reg16(REG_EAX as u8, 0x08);
        cpu.verify(true).unwrap();
        assert!(cpu.get_flag(Flag::Zero));
        // Conforming code is readable but never writable.
        cpu.set_reg16(REG_EAX as u8, 0x18);
        cpu.verify(true).unwrap();
        assert!(!cpu.get_flag(Flag::Zero));
        cpu.verify(false).unwrap();
        assert!(cpu.get_flag(Flag::Zero));
        // Beyond the GDT limit.
        cpu.set_reg16(REG_EAX as u8, 0x80);
        cpu.verify(false).unwrap();
        assert!(!cpu.get_flag(Flag::Zero));
        // A ring 0 segment is not visible at CPL 3.
        cpu.cpl = 3;
        cpu.set_reg16(REG_EAX as u8, 0x0B);
        cpu.verify(false).unwrap();
        assert!(!cpu.get_flag(Flag::Zero));
    }

    #[test]
    fn test_lar_lsl() {
        let mut m = pmode_machine(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        // lar bx, ax
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xD8;
        cpu.set_reg16(REG_EAX as u8, 0x13);
        cpu.lar(W16).unwrap();
        assert!(cpu.get_flag(Flag::Zero));
        assert_eq!(cpu.reg16(REG_EBX as u8), 0xF200);
        cpu.lsl(W16).unwrap();
        assert_eq!(cpu.reg16(REG_EBX as u8), 0x0FFF);

        // The TSS has rights and a limit; an interrupt gate has neither.
        cpu.set_reg16(REG_EAX as u8, 0x20);
        cpu.lsl(W16).unwrap();
        assert!(cpu.get_flag(Flag::Zero));
        assert_eq!(cpu.reg16(REG_EBX as u8), 0x2B);
        cpu.set_reg16(REG_EAX as u8, 0x28);
        cpu.lar(W16).unwrap();
        assert!(!cpu.get_flag(Flag::Zero));
    }

    #[test]
    fn test_arpl() {
        let mut m = pmode_machine(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        // arpl ax, bx
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xD8;
        cpu.set_reg16(REG_EAX as u8, 0x0010);
        cpu.set_reg16(REG_EBX as u8, 0x0003);
        cpu.arpl().unwrap();
        assert!(cpu.get_flag(Flag::Zero));
        assert_eq!(cpu.reg16(REG_EAX as u8), 0x0013);
        cpu.arpl().unwrap();
        assert!(!cpu.get_flag(Flag::Zero));
    }

    #[test]
    fn test_sgdt_286_fills_top_byte() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.gdtr = DescriptorTable { base: 0x12_3456, limit: 0x7F };
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0x06;
        cpu.i.disp = 0x500;
        cpu.store_table(false).unwrap();
        assert_eq!(m.peek_u32(0x502), 0xFF12_3456);
        assert_eq!(m.peek_u8(0x500), 0x7F);
    }

    #[test]
    fn test_lmsw_cannot_clear_pe() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.i.has_modrm = true;
        cpu.i.modrm = 0xF0;
        cpu.set_reg16(REG_EAX as u8, 0x0001);
        cpu.lmsw().unwrap();
        assert!(cpu.is_protected_mode());
        cpu.set_reg16(REG_EAX as u8, 0x0000);
        cpu.lmsw().unwrap();
        assert!(cpu.is_protected_mode());
    }

    #[test]
    fn test_loadall() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        // MSW, FLAGS, IP
        m.poke_u16(0x806, 0xFFF0);
        m.poke_u16(0x818, 0x0002);
        m.poke_u16(0x81A, 0x1234);
        // CS selector and cache: base 0x120000, present code, limit FFFF
        m.poke_u16(0x822, 0xF000);
        m.poke_bytes(0x83C, &[0x00, 0x00, 0x12, 0x9B, 0xFF, 0xFF]);
        // AX
        m.poke_u16(0x834, 0xBEEF);
        let cpu = m.cpu_mut();
        cpu.loadall().unwrap();
        assert_eq!(cpu.eip(), 0x1234);
        assert_eq!(cpu.reg16(REG_EAX as u8), 0xBEEF);
        assert_eq!(cpu.segment(Segment::CS).value(), 0xF000);
        assert_eq!(cpu.segment(Segment::CS).cache.base, 0x12_0000);
        assert!(cpu.is_real_mode());
    }
}
