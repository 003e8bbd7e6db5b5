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

    cpu_386::task.rs

    Hardware task switching through 286 and 386 task state segments, inner
    stack lookup, and the I/O permission check.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{descriptor::*, *};

const W16: InstructionWidth = InstructionWidth::Word;
const W32: InstructionWidth = InstructionWidth::Dword;

// 286 TSS layout
const TSS286_IP: u32 = 0x0E;
const TSS286_FLAGS: u32 = 0x10;
const TSS286_REGS: u32 = 0x12;
const TSS286_SREGS: u32 = 0x22;
const TSS286_LDT: u32 = 0x2A;
const TSS286_MIN_LIMIT: u32 = 0x2B;

// 386 TSS layout
const TSS386_CR3: u32 = 0x1C;
const TSS386_EIP: u32 = 0x20;
const TSS386_EFLAGS: u32 = 0x24;
const TSS386_REGS: u32 = 0x28;
const TSS386_SREGS: u32 = 0x48;
const TSS386_LDT: u32 = 0x60;
const TSS386_TRAP: u32 = 0x64;
const TSS386_IOMAP: u32 = 0x66;
const TSS386_MIN_LIMIT: u32 = 0x67;

/// Segment registers in TSS order.
const TSS_SREG_ORDER: [Segment; 6] = [Segment::ES, Segment::CS, Segment::SS, Segment::DS, Segment::FS, Segment::GS];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TaskSwitchReason {
    Jump,
    Call,
    Iret,
    Interrupt,
}

/// The register image read from an incoming TSS.
#[derive(Default)]
struct TaskImage {
    cr3: Option<u32>,
    eip: u32,
    eflags: u32,
    regs: [u32; 8],
    sregs: [u16; 6],
    ldt: u16,
    trap: bool,
}

#[inline]
fn is_386_tss(access: u8) -> bool {
    access & 0x08 != 0
}

impl Intel386 {
    /// Inner stack pointer for privilege `dpl` from the current TSS.
    pub(crate) fn tss_stack(&mut self, dpl: u8) -> Result<(u16, u32), CpuException> {
        let tss = self.tr.cache;
        let fault = CpuException::InvalidTss(self.tr.selector.error_code());
        if is_386_tss(tss.access) {
            let offset = 4 + dpl as u32 * 8;
            if offset + 5 > tss.limit {
                return Err(fault);
            }
            let esp = self.system_read(tss.base.wrapping_add(offset), W32)?;
            let ss = self.system_read(tss.base.wrapping_add(offset + 4), W16)? as u16;
            Ok((ss, esp))
        }
        else {
            let offset = 2 + dpl as u32 * 4;
            if offset + 3 > tss.limit {
                return Err(fault);
            }
            let sp = self.system_read(tss.base.wrapping_add(offset), W16)?;
            let ss = self.system_read(tss.base.wrapping_add(offset + 2), W16)? as u16;
            Ok((ss, sp))
        }
    }

    /// Switch through a task gate. The gate names the TSS.
    pub(crate) fn task_gate(&mut self, gate: &GateDescriptor, reason: TaskSwitchReason) -> Result<(), CpuException> {
        let sel = Selector::from_value(gate.selector);
        if sel.ti() || sel.is_null() {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        }
        self.switch_tasks(gate.selector, reason)
    }

    /// Save the outgoing task into the current TSS.
    fn save_task(&mut self, reason: TaskSwitchReason) -> Result<(), CpuException> {
        let base = self.tr.cache.base;
        let mut eflags = self.eflags;
        if reason == TaskSwitchReason::Iret {
            eflags &= !CPU_FLAG_NT;
        }
        if is_386_tss(self.tr.cache.access) {
            self.system_write(base.wrapping_add(TSS386_EIP), W32, self.eip)?;
            self.system_write(base.wrapping_add(TSS386_EFLAGS), W32, eflags)?;
            for n in 0..8 {
                self.system_write(base.wrapping_add(TSS386_REGS + n as u32 * 4), W32, self.regs[n].dword())?;
            }
            for (n, seg) in TSS_SREG_ORDER.iter().enumerate() {
                let value = self.sregs[seg.index()].value() as u32;
                self.system_write(base.wrapping_add(TSS386_SREGS + n as u32 * 4), W16, value)?;
            }
        }
        else {
            self.system_write(base.wrapping_add(TSS286_IP), W16, self.eip)?;
            self.system_write(base.wrapping_add(TSS286_FLAGS), W16, eflags)?;
            for n in 0..8 {
                self.system_write(base.wrapping_add(TSS286_REGS + n as u32 * 2), W16, self.regs[n].dword())?;
            }
            for (n, seg) in TSS_SREG_ORDER[..4].iter().enumerate() {
                let value = self.sregs[seg.index()].value() as u32;
                self.system_write(base.wrapping_add(TSS286_SREGS + n as u32 * 2), W16, value)?;
            }
        }
        Ok(())
    }

    fn read_task(&mut self, base: u32, is_386: bool) -> Result<TaskImage, CpuException> {
        let mut image = TaskImage::default();
        if is_386 {
            image.cr3 = Some(self.system_read(base.wrapping_add(TSS386_CR3), W32)?);
            image.eip = self.system_read(base.wrapping_add(TSS386_EIP), W32)?;
            image.eflags = self.system_read(base.wrapping_add(TSS386_EFLAGS), W32)?;
            for n in 0..8 {
                image.regs[n] = self.system_read(base.wrapping_add(TSS386_REGS + n as u32 * 4), W32)?;
            }
            for n in 0..6 {
                image.sregs[n] = self.system_read(base.wrapping_add(TSS386_SREGS + n as u32 * 4), W16)? as u16;
            }
            image.ldt = self.system_read(base.wrapping_add(TSS386_LDT), W16)? as u16;
            image.trap = self.system_read(base.wrapping_add(TSS386_TRAP), W16)? & 1 != 0;
        }
        else {
            image.eip = self.system_read(base.wrapping_add(TSS286_IP), W16)?;
            image.eflags = self.system_read(base.wrapping_add(TSS286_FLAGS), W16)?;
            for n in 0..8 {
                let word = self.system_read(base.wrapping_add(TSS286_REGS + n as u32 * 2), W16)?;
                // The high words of the 32-bit registers are not part of a 286 task.
                image.regs[n] = (self.regs[n].dword() & 0xFFFF_0000) | word;
            }
            for n in 0..4 {
                image.sregs[n] = self.system_read(base.wrapping_add(TSS286_SREGS + n as u32 * 2), W16)? as u16;
            }
            image.ldt = self.system_read(base.wrapping_add(TSS286_LDT), W16)? as u16;
        }
        Ok(image)
    }

    /// Switch to the task whose TSS `selector` references.
    pub(crate) fn switch_tasks(&mut self, selector: u16, reason: TaskSwitchReason) -> Result<(), CpuException> {
        let sel = Selector::from_value(selector);
        let fault: fn(u16) -> CpuException = if reason == TaskSwitchReason::Iret {
            CpuException::InvalidTss
        }
        else {
            CpuException::GeneralProtection
        };
        if sel.ti() || sel.is_null() {
            return Err(fault(sel.error_code()));
        }
        let Descriptor::System(tss) = self.fetch_descriptor(sel, fault)?
        else {
            return Err(fault(sel.error_code()));
        };
        let tss_type = tss.access & ACCESS_TYPE_MASK;
        let busy = tss_type & SYS_TSS_BUSY_BIT != 0;
        let valid = match tss_type {
            SYS_TSS286_AVAIL | SYS_TSS386_AVAIL => reason != TaskSwitchReason::Iret,
            SYS_TSS286_BUSY | SYS_TSS386_BUSY => reason == TaskSwitchReason::Iret,
            _ => false,
        };
        if !valid {
            return Err(fault(sel.error_code()));
        }
        if tss.access & ACCESS_PRESENT == 0 {
            return Err(CpuException::SegmentNotPresent(sel.error_code()));
        }
        let new_386 = is_386_tss(tss.access);
        let min_limit = if new_386 { TSS386_MIN_LIMIT } else { TSS286_MIN_LIMIT };
        if tss.limit < min_limit {
            return Err(CpuException::InvalidTss(sel.error_code()));
        }

        log::debug!(
            "Task switch ({:?}) {:04X} -> {:04X} at {:04X}:{:08X}",
            reason,
            self.tr.value(),
            selector,
            self.sregs[Segment::CS.index()].value(),
            self.eip
        );

        // Outgoing task.
        self.save_task(reason)?;
        let image = self.read_task(tss.base, new_386)?;
        if matches!(reason, TaskSwitchReason::Jump | TaskSwitchReason::Iret) {
            let old_access = self.tr.cache.access & !SYS_TSS_BUSY_BIT;
            let old_sel = self.tr.selector;
            self.write_descriptor_access(old_sel, old_access)?;
        }

        // Incoming task.
        let mut eflags = image.eflags;
        if matches!(reason, TaskSwitchReason::Call | TaskSwitchReason::Interrupt) {
            self.system_write(tss.base, W16, self.tr.value() as u32)?;
            eflags |= CPU_FLAG_NT;
        }
        let new_access = tss.access | SYS_TSS_BUSY_BIT;
        if !busy {
            self.write_descriptor_access(sel, new_access)?;
        }
        self.tr = SegmentRegister {
            selector: sel,
            cache: SegmentCache {
                access: new_access,
                ..SegmentCache::from(&tss)
            },
        };
        self.cr[0] |= CR0_TS;

        // Everything past this point faults in the context of the new task.
        self.load_task_state(image, eflags, new_386)?;
        cycles_pmode!(self, 175, 300);
        Ok(())
    }

    /// Load the registers of the incoming task. Segment registers are loaded last, after CR3,
    /// EFLAGS and LDTR, with selectors in place first so a fault leaves a consistent task.
    fn load_task_state(&mut self, image: TaskImage, eflags: u32, is_386: bool) -> Result<(), CpuException> {
        if let (Some(cr3), true) = (image.cr3, self.cpu_type.is_386()) {
            if self.paging_enabled() {
                self.set_cr3(cr3);
            }
            else {
                self.cr[3] = cr3 & mmu::PAGE_FRAME_MASK;
            }
        }
        for (n, value) in image.regs.iter().enumerate() {
            self.regs[n].set_dword(*value);
        }
        self.eip = image.eip;
        let flags_mask = if is_386 { CPU_FLAGS_386_MASK } else { CPU_FLAGS_286_MASK & 0xFFFF };
        self.eflags = (eflags & flags_mask & !(CPU_FLAG_VM | CPU_FLAG_RF)) | CPU_FLAGS_RESERVED_ON;

        let sreg_count = if is_386 { 6 } else { 4 };
        for (n, seg) in TSS_SREG_ORDER.iter().enumerate() {
            let value = if n < sreg_count { image.sregs[n] } else { 0 };
            self.sregs[seg.index()] = SegmentRegister::null(value);
        }
        self.ldtr = SegmentRegister::null(image.ldt);

        if is_386 && eflags & CPU_FLAG_VM != 0 {
            self.set_vm(true);
            for (n, seg) in TSS_SREG_ORDER.iter().enumerate() {
                self.load_segment_real(*seg, image.sregs[n]);
            }
            self.load_ldtr(image.ldt, CpuException::InvalidTss)?;
            self.pq_invalidate();
            return Ok(());
        }

        self.load_ldtr(image.ldt, CpuException::InvalidTss)?;

        let cs_sel = Selector::from_value(image.sregs[1]);
        self.cpl = cs_sel.rpl();
        self.load_ss_pmode(image.sregs[2], self.cpl, CpuException::InvalidTss)?;
        for (n, seg) in TSS_SREG_ORDER.iter().enumerate().take(sreg_count) {
            if matches!(seg, Segment::CS | Segment::SS) {
                continue;
            }
            self.load_data_segment_pmode(*seg, image.sregs[n], CpuException::InvalidTss)?;
        }

        if cs_sel.is_null() {
            return Err(CpuException::InvalidTss(0));
        }
        let Descriptor::Segment(code) = self.fetch_descriptor(cs_sel, CpuException::InvalidTss)?
        else {
            return Err(CpuException::InvalidTss(cs_sel.error_code()));
        };
        let cache = SegmentCache::from(&code);
        let allowed = cache.is_code()
            && if cache.is_conforming() {
                cache.dpl() <= cs_sel.rpl()
            }
            else {
                cache.dpl() == cs_sel.rpl()
            };
        if !allowed {
            return Err(CpuException::InvalidTss(cs_sel.error_code()));
        }
        if !cache.present() {
            return Err(CpuException::SegmentNotPresent(cs_sel.error_code()));
        }
        self.load_cs_pmode(cs_sel.value(), &code, cs_sel.rpl())?;

        if image.trap {
            self.state.debug_trap |= DR6_BT;
        }
        if !cache.check_limit(self.eip, 1) {
            return Err(CpuException::GeneralProtection(0));
        }
        Ok(())
    }

    /// Permission check for IN, OUT, INS and OUTS of `len` bytes at `port`. Accesses from
    /// privilege above IOPL, and all accesses from virtual-8086 mode, must be allowed by the I/O
    /// permission bitmap of a 386 TSS.
    pub(crate) fn io_check(&mut self, port: u16, len: u32) -> Result<(), CpuException> {
        if self.is_real_mode() || (!self.is_v86_mode() && self.cpl <= self.iopl()) {
            return Ok(());
        }
        let tss = self.tr.cache;
        if !self.cpu_type.is_386() || !is_386_tss(tss.access) || tss.limit < TSS386_MIN_LIMIT {
            return Err(CpuException::GeneralProtection(0));
        }
        let map_base = self.system_read(tss.base.wrapping_add(TSS386_IOMAP), W16)?;
        let offset = map_base + (port as u32 >> 3);
        if offset + 1 > tss.limit {
            return Err(CpuException::GeneralProtection(0));
        }
        let bits = self.system_read(tss.base.wrapping_add(offset), W16)?;
        let mask = ((1u32 << len) - 1) << (port & 7);
        if bits & mask != 0 {
            trace_print!(self, "I/O bitmap denies port {:04X}", port);
            return Err(CpuException::GeneralProtection(0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    const GDT: u32 = 0x1000;
    const TSS_A: u32 = 0x2000;
    const TSS_B: u32 = 0x3000;

    /// GDT: 1 = code, 2 = data, 3 = TSS A (current), 4 = TSS B, 5 = task gate to B.
    fn setup(m: &mut TestMachine, tss_access: u8, limit: u32) {
        m.poke_descriptor(GDT, 1, 0x10000, 0xFFFF, 0x9A, 0);
        m.poke_descriptor(GDT, 2, 0x20000, 0xFFFF, 0x92, 0);
        m.poke_descriptor(GDT, 3, TSS_A, limit, tss_access, 0);
        m.poke_descriptor(GDT, 4, TSS_B, limit, tss_access, 0);
        m.poke_bytes(GDT + 5 * 8, &[0x00, 0x00, 0x20, 0x00, 0x00, 0x85, 0x00, 0x00]);
        let cpu = m.cpu_mut();
        cpu.gdtr = DescriptorTable { base: GDT, limit: 0x2F };
        cpu.cr[0] |= CR0_PE;
        let Ok(Descriptor::Segment(code)) = cpu.fetch_descriptor(Selector::from_value(0x08), CpuException::GeneralProtection)
        else {
            panic!("bad test descriptor");
        };
        cpu.load_cs_pmode(0x08, &code, 0).unwrap();
        cpu.load_ss_pmode(0x10, 0, CpuException::GeneralProtection).unwrap();
        cpu.load_tr(0x18).unwrap();
    }

    #[test]
    fn test_286_task_call_and_return() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        setup(&mut m, 0x81, 0x2B);
        // Task B image: IP 0x0040, FLAGS 0x0002, AX 0x1111, ES/CS/SS/DS.
        m.poke_u16(TSS_B + TSS286_IP, 0x0040);
        m.poke_u16(TSS_B + TSS286_FLAGS, 0x0002);
        m.poke_u16(TSS_B + TSS286_REGS, 0x1111);
        m.poke_u16(TSS_B + TSS286_SREGS, 0x10);
        m.poke_u16(TSS_B + TSS286_SREGS + 2, 0x08);
        m.poke_u16(TSS_B + TSS286_SREGS + 4, 0x10);
        m.poke_u16(TSS_B + TSS286_SREGS + 6, 0x10);

        let cpu = m.cpu_mut();
        cpu.set_reg16(REG_EAX as u8, 0xAAAA);
        cpu.set_eip(0x0123);
        cpu.call_far(0x28, 0, InstructionWidth::Word).unwrap();
        assert_eq!(cpu.tr().value(), 0x20);
        assert_eq!(cpu.eip(), 0x0040);
        assert_eq!(cpu.reg16(REG_EAX as u8), 0x1111);
        assert!(cpu.get_flag(Flag::NestedTask));
        assert_ne!(cpu.cr(0) & CR0_TS, 0);

        // IRET with NT returns through the back link.
        cpu.interrupt_return(InstructionWidth::Word).unwrap();
        assert_eq!(cpu.tr().value(), 0x18);
        assert_eq!(cpu.eip(), 0x0123);
        assert_eq!(cpu.reg16(REG_EAX as u8), 0xAAAA);

        assert_eq!(m.peek_u16(TSS_B), 0x18);
        // B is available again, A is busy.
        assert_eq!(m.peek_u8(GDT + 4 * 8 + 5), 0x81);
        assert_eq!(m.peek_u8(GDT + 3 * 8 + 5), 0x83);
    }

    #[test]
    fn test_jump_to_busy_task_faults() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        setup(&mut m, 0x81, 0x2B);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.jump_far(0x18, 0), Err(CpuException::GeneralProtection(0x18)));
    }

    #[test]
    fn test_short_tss_limit() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup(&mut m, 0x89, 0x2B);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.jump_far(0x20, 0), Err(CpuException::InvalidTss(0x20)));
    }

    #[test]
    fn test_io_bitmap() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup(&mut m, 0x89, 0x0FFF);
        // Bitmap at 0x100: ports 0x60 and 0x64 are denied.
        m.poke_u16(TSS_A + TSS386_IOMAP, 0x100);
        m.poke_u8(TSS_A + 0x100 + (0x60 >> 3), 0x11);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.io_check(0x60, 1), Ok(()));
        cpu.cpl = 3;
        assert_eq!(cpu.io_check(0x60, 1), Err(CpuException::GeneralProtection(0)));
        assert_eq!(cpu.io_check(0x61, 2), Ok(()));
        assert_eq!(cpu.io_check(0x63, 2), Err(CpuException::GeneralProtection(0)));
    }

    #[test]
    fn test_task_switch_into_v86() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup(&mut m, 0x89, 0x0FFF);
        m.poke_u32(TSS_B + TSS386_EIP, 0x0040);
        m.poke_u32(TSS_B + TSS386_EFLAGS, CPU_FLAG_VM | CPU_FLAG_IOPL | 0x0002);
        m.poke_u32(TSS_B + TSS386_REGS + 4 * REG_ESP as u32, 0x0800);
        for (n, value) in [0x1000u32, 0x2000, 0x3000, 0x4000, 0x5000, 0x6000].iter().enumerate() {
            m.poke_u16(TSS_B + TSS386_SREGS + n as u32 * 4, *value as u16);
        }

        let cpu = m.cpu_mut();
        cpu.jump_far(0x20, 0).unwrap();
        assert!(cpu.is_v86_mode());
        assert_eq!(cpu.cpl(), 3);
        assert_eq!(cpu.iopl(), 3);
        assert_eq!(cpu.eip(), 0x0040);
        assert_eq!(cpu.reg32(REG_ESP as u8), 0x0800);
        for (seg, base) in [
            (Segment::ES, 0x10000),
            (Segment::CS, 0x20000),
            (Segment::SS, 0x30000),
            (Segment::DS, 0x40000),
            (Segment::FS, 0x50000),
            (Segment::GS, 0x60000),
        ] {
            let reg = cpu.segment(seg);
            assert_eq!(reg.cache.base, base);
            assert_eq!(reg.cache.limit, 0xFFFF);
            assert_eq!(reg.cache.dpl(), 3);
        }
        // The outgoing task is no longer busy.
        assert_eq!(m.peek_u8(GDT + 3 * 8 + 5), 0x89);
        assert_eq!(m.peek_u8(GDT + 4 * 8 + 5), 0x8B);
    }

    #[test]
    fn test_v86_io_uses_bitmap_regardless_of_iopl() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup(&mut m, 0x89, 0x0FFF);
        m.poke_u16(TSS_A + TSS386_IOMAP, 0x100);
        m.poke_u8(TSS_A + 0x100 + (0x60 >> 3), 0x11);
        let cpu = m.cpu_mut();
        cpu.eflags |= CPU_FLAG_IOPL;
        cpu.set_vm(true);
        assert_eq!(cpu.cpl(), 3);
        assert_eq!(cpu.io_check(0x60, 1), Err(CpuException::GeneralProtection(0)));
        assert_eq!(cpu.io_check(0x64, 1), Err(CpuException::GeneralProtection(0)));
        assert_eq!(cpu.io_check(0x61, 2), Ok(()));
        // Past the end of the TSS every port is denied.
        assert_eq!(cpu.io_check(0xFFF8, 1), Err(CpuException::GeneralProtection(0)));
    }

    #[test]
    fn test_io_bitmap_wraps_at_4g() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup(&mut m, 0x89, 0x0FFF);
        // A TSS at FFFFFFF0 has its bitmap base at linear 56 and its bitmap at 0F0.
        m.poke_descriptor(GDT, 4, 0xFFFF_FFF0, 0x0FFF, 0x89, 0);
        m.poke_u16(0x56, 0x100);
        m.poke_u8(0xF0 + (0x60 >> 3), 0x01);
        let cpu = m.cpu_mut();
        cpu.load_tr(0x20).unwrap();
        cpu.cpl = 3;
        assert_eq!(cpu.io_check(0x60, 1), Err(CpuException::GeneralProtection(0)));
        assert_eq!(cpu.io_check(0x61, 1), Ok(()));
    }

    #[test]
    fn test_286_io_needs_iopl() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        setup(&mut m, 0x81, 0x2B);
        let cpu = m.cpu_mut();
        cpu.cpl = 3;
        assert_eq!(cpu.io_check(0x80, 1), Err(CpuException::GeneralProtection(0)));
        cpu.eflags |= CPU_FLAG_IOPL;
        assert_eq!(cpu.io_check(0x80, 1), Ok(()));
    }
}
