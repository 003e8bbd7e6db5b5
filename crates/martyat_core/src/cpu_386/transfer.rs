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

    cpu_386::transfer.rs

    Near and far control transfers: intersegment jumps and calls through
    code segments, call gates and task gates, far returns and IRET.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{descriptor::*, task::TaskSwitchReason, *};

/// Stack state saved before switching to an inner privilege stack, restored if the transfer
/// faults part way.
#[derive(Copy, Clone)]
pub(crate) struct SavedStack {
    pub ss: SegmentRegister,
    pub esp: u32,
    pub cpl: u8,
    pub eflags: u32,
}

impl Intel386 {
    pub(crate) fn check_code_limit(&self, target: u32) -> Result<(), CpuException> {
        if !self.sregs[Segment::CS.index()].cache.check_limit(target, 1) {
            return Err(CpuException::GeneralProtection(0));
        }
        Ok(())
    }

    /// Jump within the current code segment.
    pub(crate) fn jump_near(&mut self, target: u32) -> Result<(), CpuException> {
        self.check_code_limit(target)?;
        self.set_eip(target);
        Ok(())
    }

    /// Offset of a far target in real or virtual-8086 mode. Real mode code segments are 64K.
    fn real_far_target(&self, offset: u32) -> Result<u32, CpuException> {
        let offset = if self.i.op32 { offset } else { offset & 0xFFFF };
        if offset > 0xFFFF {
            return Err(CpuException::GeneralProtection(0));
        }
        Ok(offset)
    }

    /// Privilege checks for a direct transfer to a code segment, shared by JMP and CALL.
    fn check_direct_code(&self, sel: Selector, cache: &SegmentCache) -> Result<(), CpuException> {
        if !cache.is_code() {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        }
        let allowed = if cache.is_conforming() {
            cache.dpl() <= self.cpl
        }
        else {
            sel.rpl() <= self.cpl && cache.dpl() == self.cpl
        };
        if !allowed {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        }
        if !cache.present() {
            return Err(CpuException::SegmentNotPresent(sel.error_code()));
        }
        Ok(())
    }

    /// Resolve the code segment a call gate points to. Returns the target selector and its
    /// descriptor.
    fn gate_target(&mut self, gate: &GateDescriptor) -> Result<(Selector, SegmentDescriptor), CpuException> {
        let sel = Selector::from_value(gate.selector);
        if sel.is_null() {
            return Err(CpuException::GeneralProtection(0));
        }
        let Descriptor::Segment(d) = self.fetch_descriptor(sel, CpuException::GeneralProtection)?
        else {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        };
        let cache = SegmentCache::from(&d);
        if !cache.is_code() || cache.dpl() > self.cpl {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        }
        if !cache.present() {
            return Err(CpuException::SegmentNotPresent(sel.error_code()));
        }
        Ok((sel, d))
    }

    /// Gate checks common to calls and jumps: DPL against CPL and RPL, then presence.
    fn check_gate(&self, sel: Selector, gate: &GateDescriptor) -> Result<(), CpuException> {
        if gate.dpl() < self.cpl || gate.dpl() < sel.rpl() {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        }
        if !gate.present() {
            return Err(CpuException::SegmentNotPresent(sel.error_code()));
        }
        Ok(())
    }

    /// Far JMP.
    pub(crate) fn jump_far(&mut self, selector: u16, offset: u32) -> Result<(), CpuException> {
        if !self.is_pmode_not_v86() {
            let offset = self.real_far_target(offset)?;
            self.load_segment_real(Segment::CS, selector);
            self.set_eip(offset);
            return Ok(());
        }

        let sel = Selector::from_value(selector);
        if sel.is_null() {
            return Err(CpuException::GeneralProtection(0));
        }
        match self.fetch_descriptor(sel, CpuException::GeneralProtection)? {
            Descriptor::Segment(d) => {
                self.check_direct_code(sel, &SegmentCache::from(&d))?;
                let offset = if self.i.op32 { offset } else { offset & 0xFFFF };
                if offset > d.limit {
                    return Err(CpuException::GeneralProtection(0));
                }
                self.load_cs_pmode(selector, &d, self.cpl)?;
                self.set_eip(offset);
                Ok(())
            }
            Descriptor::Gate(gate) if matches!(gate.gate_type(), SYS_CALL_GATE286 | SYS_CALL_GATE386) => {
                self.check_gate(sel, &gate)?;
                let (target, d) = self.gate_target(&gate)?;
                let cache = SegmentCache::from(&d);
                // A jump never changes privilege.
                if !cache.is_conforming() && cache.dpl() != self.cpl {
                    return Err(CpuException::GeneralProtection(target.error_code()));
                }
                if gate.offset > d.limit {
                    return Err(CpuException::GeneralProtection(0));
                }
                self.load_cs_pmode(target.value(), &d, self.cpl)?;
                self.set_eip(gate.offset);
                Ok(())
            }
            Descriptor::Gate(gate) if gate.gate_type() == SYS_TASK_GATE => {
                self.check_gate(sel, &gate)?;
                self.task_gate(&gate, TaskSwitchReason::Jump)
            }
            desc @ Descriptor::System(_)
                if matches!(desc.system_type(), Some(SYS_TSS286_AVAIL | SYS_TSS386_AVAIL)) =>
            {
                if desc.dpl() < self.cpl || desc.dpl() < sel.rpl() {
                    return Err(CpuException::GeneralProtection(sel.error_code()));
                }
                self.switch_tasks(selector, TaskSwitchReason::Jump)
            }
            _ => Err(CpuException::GeneralProtection(sel.error_code())),
        }
    }

    /// Far CALL. The return address is pushed with the operand size of the instruction, or of
    /// the gate for a call through a gate.
    pub(crate) fn call_far(&mut self, selector: u16, offset: u32, width: InstructionWidth) -> Result<(), CpuException> {
        let return_cs = self.sregs[Segment::CS.index()].value() as u32;
        let return_eip = self.eip;

        if !self.is_pmode_not_v86() {
            let offset = self.real_far_target(offset)?;
            self.push(width, return_cs)?;
            self.push(width, return_eip)?;
            self.load_segment_real(Segment::CS, selector);
            self.set_eip(offset);
            return Ok(());
        }

        let sel = Selector::from_value(selector);
        if sel.is_null() {
            return Err(CpuException::GeneralProtection(0));
        }
        match self.fetch_descriptor(sel, CpuException::GeneralProtection)? {
            Descriptor::Segment(d) => {
                self.check_direct_code(sel, &SegmentCache::from(&d))?;
                let offset = if width == InstructionWidth::Dword { offset } else { offset & 0xFFFF };
                let sp = self.stack_pointer().wrapping_sub(width.bytes() * 2) & self.stack_mask();
                self.seg_check_write(Segment::SS, sp, width.bytes() * 2)?;
                if offset > d.limit {
                    return Err(CpuException::GeneralProtection(0));
                }
                self.push(width, return_cs)?;
                self.push(width, return_eip)?;
                self.load_cs_pmode(selector, &d, self.cpl)?;
                self.set_eip(offset);
                Ok(())
            }
            Descriptor::Gate(gate) if matches!(gate.gate_type(), SYS_CALL_GATE286 | SYS_CALL_GATE386) => {
                self.check_gate(sel, &gate)?;
                let (target, d) = self.gate_target(&gate)?;
                self.call_gate(&gate, target, &d, return_cs, return_eip)
            }
            Descriptor::Gate(gate) if gate.gate_type() == SYS_TASK_GATE => {
                self.check_gate(sel, &gate)?;
                self.task_gate(&gate, TaskSwitchReason::Call)
            }
            desc @ Descriptor::System(_)
                if matches!(desc.system_type(), Some(SYS_TSS286_AVAIL | SYS_TSS386_AVAIL)) =>
            {
                if desc.dpl() < self.cpl || desc.dpl() < sel.rpl() {
                    return Err(CpuException::GeneralProtection(sel.error_code()));
                }
                self.switch_tasks(selector, TaskSwitchReason::Call)
            }
            _ => Err(CpuException::GeneralProtection(sel.error_code())),
        }
    }

    /// Switch SS:ESP to the privilege `dpl` stack recorded in the current TSS. Returns what is
    /// needed to undo the switch.
    pub(crate) fn enter_inner_stack(&mut self, dpl: u8) -> Result<SavedStack, CpuException> {
        let saved = SavedStack {
            ss: self.sregs[Segment::SS.index()],
            esp: self.regs[REG_ESP].dword(),
            cpl: self.cpl,
            eflags: self.eflags,
        };
        let (new_ss, new_esp) = self.tss_stack(dpl)?;
        self.load_ss_pmode(new_ss, dpl, CpuException::InvalidTss)?;
        if self.sregs[Segment::SS.index()].cache.big {
            self.regs[REG_ESP].set_dword(new_esp);
        }
        else {
            self.regs[REG_ESP].set_word(new_esp as u16);
        }
        self.cpl = dpl;
        Ok(saved)
    }

    pub(crate) fn restore_stack(&mut self, saved: SavedStack) {
        self.sregs[Segment::SS.index()] = saved.ss;
        self.regs[REG_ESP].set_dword(saved.esp);
        self.cpl = saved.cpl;
        self.eflags = saved.eflags;
    }

    /// Transfer through a call gate, switching to an inner stack and copying parameters when
    /// the target is more privileged.
    fn call_gate(
        &mut self,
        gate: &GateDescriptor,
        target: Selector,
        d: &SegmentDescriptor,
        return_cs: u32,
        return_eip: u32,
    ) -> Result<(), CpuException> {
        let cache = SegmentCache::from(d);
        let width = if gate.is_32() { InstructionWidth::Dword } else { InstructionWidth::Word };
        if gate.offset > d.limit {
            return Err(CpuException::GeneralProtection(0));
        }

        if cache.is_conforming() || cache.dpl() == self.cpl {
            self.push(width, return_cs)?;
            self.push(width, return_eip)?;
            self.load_cs_pmode(target.value(), d, self.cpl)?;
            self.set_eip(gate.offset);
            return Ok(());
        }

        // More privileged: parameters are read from the caller's stack before it is left.
        let dpl = cache.dpl();
        let old_ss = self.sregs[Segment::SS.index()].value() as u32;
        let old_esp = self.stack_pointer();
        let mut params = Vec::with_capacity(gate.param_count as usize);
        for n in (0..gate.param_count as u32).rev() {
            params.push(self.stack_peek(n * width.bytes(), width)?);
        }

        let saved = self.enter_inner_stack(dpl)?;
        let pushed: Result<(), CpuException> = (|| {
            self.push(width, old_ss)?;
            self.push(width, old_esp)?;
            for value in params.iter() {
                self.push(width, *value)?;
            }
            self.push(width, return_cs)?;
            self.push(width, return_eip)
        })();
        if let Err(e) = pushed {
            self.restore_stack(saved);
            return Err(e);
        }
        log::trace!("Call gate to ring {}: {:04X}:{:08X}", dpl, target.value(), gate.offset);
        cycles_pmode!(self, 4 * gate.param_count as u32, 4 * gate.param_count as u32);
        self.load_cs_pmode(target.value(), d, dpl)?;
        self.validate_data_segments();
        self.set_eip(gate.offset);
        Ok(())
    }

    /// Validate the code segment selector of a far return or IRET frame.
    fn return_code_segment(&mut self, selector: u16) -> Result<(Selector, SegmentDescriptor), CpuException> {
        let sel = Selector::from_value(selector);
        if sel.is_null() {
            return Err(CpuException::GeneralProtection(0));
        }
        if sel.rpl() < self.cpl {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        }
        let Descriptor::Segment(d) = self.fetch_descriptor(sel, CpuException::GeneralProtection)?
        else {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        };
        let cache = SegmentCache::from(&d);
        let allowed = cache.is_code()
            && if cache.is_conforming() {
                cache.dpl() <= sel.rpl()
            }
            else {
                cache.dpl() == sel.rpl()
            };
        if !allowed {
            return Err(CpuException::GeneralProtection(sel.error_code()));
        }
        if !cache.present() {
            return Err(CpuException::SegmentNotPresent(sel.error_code()));
        }
        Ok((sel, d))
    }

    /// Complete a return to an outer privilege level. `frame` is the size of the CS:EIP (and
    /// EFLAGS) part of the frame, after which the outer SS:ESP follows.
    fn return_to_outer(
        &mut self,
        width: InstructionWidth,
        frame: u32,
        release: u32,
        sel: Selector,
        d: &SegmentDescriptor,
    ) -> Result<(), CpuException> {
        let new_esp = self.stack_peek(frame + release, width)?;
        let new_ss = self.stack_peek(frame + release + width.bytes(), width)? as u16;
        let rpl = sel.rpl();
        self.load_ss_pmode(new_ss, rpl, CpuException::GeneralProtection)?;
        self.load_cs_pmode(sel.value(), d, rpl)?;
        let esp = new_esp.wrapping_add(release);
        if self.sregs[Segment::SS.index()].cache.big {
            self.regs[REG_ESP].set_dword(esp);
        }
        else {
            self.regs[REG_ESP].set_word(esp as u16);
        }
        self.validate_data_segments();
        Ok(())
    }

    /// RETF, releasing `release` bytes of parameters.
    pub(crate) fn return_far(&mut self, width: InstructionWidth, release: u32) -> Result<(), CpuException> {
        let offset = self.stack_peek(0, width)?;
        let selector = self.stack_peek(width.bytes(), width)? as u16;

        if !self.is_pmode_not_v86() {
            let offset = self.real_far_target(offset)?;
            let sp = self.stack_pointer().wrapping_add(width.bytes() * 2 + release) & self.stack_mask();
            self.set_stack_pointer(sp);
            self.load_segment_real(Segment::CS, selector);
            self.set_eip(offset);
            return Ok(());
        }

        let (sel, d) = self.return_code_segment(selector)?;
        if offset > d.limit {
            return Err(CpuException::GeneralProtection(0));
        }
        if sel.rpl() == self.cpl {
            self.load_cs_pmode(selector, &d, self.cpl)?;
            let sp = self.stack_pointer().wrapping_add(width.bytes() * 2 + release) & self.stack_mask();
            self.set_stack_pointer(sp);
        }
        else {
            cycles_pmode!(self, 8, 14);
            self.return_to_outer(width, width.bytes() * 2, release, sel, &d)?;
        }
        self.set_eip(offset);
        Ok(())
    }

    /// IRET / IRETD.
    pub(crate) fn interrupt_return(&mut self, width: InstructionWidth) -> Result<(), CpuException> {
        // Any IRET ends NMI blocking.
        self.state.event_mask &= !EVENT_NMI;
        if self.is_pmode_not_v86() && self.get_flag(Flag::NestedTask) {
            // Return to the task in the back link of the current TSS.
            let back_link = self.system_read(self.tr.cache.base, InstructionWidth::Word)? as u16;
            return self.switch_tasks(back_link, TaskSwitchReason::Iret);
        }
        if self.is_v86_mode() && self.iopl() < 3 {
            return Err(CpuException::GeneralProtection(0));
        }

        let offset = self.stack_peek(0, width)?;
        let selector = self.stack_peek(width.bytes(), width)? as u16;
        let flags = self.stack_peek(width.bytes() * 2, width)?;

        if !self.is_pmode_not_v86() {
            let offset = self.real_far_target(offset)?;
            let mask = self.flags_write_mask() & width.mask();
            let sp = self.stack_pointer().wrapping_add(width.bytes() * 3) & self.stack_mask();
            self.set_stack_pointer(sp);
            self.load_segment_real(Segment::CS, selector);
            self.write_eflags(flags, mask);
            self.set_eip(offset);
            return Ok(());
        }

        if width == InstructionWidth::Dword && flags & CPU_FLAG_VM != 0 && self.cpl == 0 {
            return self.return_to_v86(offset, selector, flags);
        }

        let (sel, d) = self.return_code_segment(selector)?;
        if offset > d.limit {
            return Err(CpuException::GeneralProtection(0));
        }
        // The writable flags are those of the privilege the IRET executes at.
        let mut mask = self.flags_write_mask() & width.mask();
        if width == InstructionWidth::Dword {
            mask |= CPU_FLAG_RF;
        }
        if sel.rpl() == self.cpl {
            self.load_cs_pmode(selector, &d, self.cpl)?;
            let sp = self.stack_pointer().wrapping_add(width.bytes() * 3) & self.stack_mask();
            self.set_stack_pointer(sp);
        }
        else {
            cycles_pmode!(self, 14, 17);
            self.return_to_outer(width, width.bytes() * 3, 0, sel, &d)?;
        }
        self.write_eflags(flags, mask);
        self.set_eip(offset);
        Ok(())
    }

    /// IRETD from privilege 0 to a virtual-8086 task. The frame holds EIP, CS, EFLAGS, ESP,
    /// SS, ES, DS, FS and GS.
    fn return_to_v86(&mut self, offset: u32, selector: u16, flags: u32) -> Result<(), CpuException> {
        let dword = InstructionWidth::Dword;
        let mut frame = [0u32; 6];
        for (n, slot) in frame.iter_mut().enumerate() {
            *slot = self.stack_peek(12 + n as u32 * 4, dword)?;
        }
        let [esp, ss, es, ds, fs, gs] = frame;
        if offset > 0xFFFF {
            return Err(CpuException::GeneralProtection(0));
        }
        log::trace!("IRETD to V86 {:04X}:{:04X}", selector, offset);
        self.write_eflags(flags, CPU_FLAGS_386_MASK);
        for (seg, value) in [
            (Segment::CS, selector as u32),
            (Segment::SS, ss),
            (Segment::ES, es),
            (Segment::DS, ds),
            (Segment::FS, fs),
            (Segment::GS, gs),
        ] {
            self.load_segment_real(seg, value as u16);
        }
        self.regs[REG_ESP].set_dword(esp);
        self.update_cpl();
        self.set_eip(offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    const GDT: u32 = 0x1000;
    const TSS: u32 = 0x2000;

    /// GDT: 1 = ring 0 code, 2 = ring 0 stack, 3 = ring 3 code, 4 = ring 3 stack,
    /// 5 = call gate to ring 0 code with one parameter, DPL 3, 6 = 286 TSS.
    fn rings(m: &mut TestMachine) {
        m.poke_descriptor(GDT, 1, 0x10000, 0xFFFF, 0x9A, 0);
        m.poke_descriptor(GDT, 2, 0x20000, 0xFFFF, 0x92, 0);
        m.poke_descriptor(GDT, 3, 0x30000, 0xFFFF, 0xFA, 0);
        m.poke_descriptor(GDT, 4, 0x40000, 0xFFFF, 0xF2, 0);
        // Gate: offset 0x0500, selector 0x08, one word parameter.
        m.poke_bytes(GDT + 5 * 8, &[0x00, 0x05, 0x08, 0x00, 0x01, 0xE4, 0x00, 0x00]);
        m.poke_descriptor(GDT, 6, TSS, 0x2B, 0x81, 0);
        // Ring 0 stack in the 286 TSS: SP 0x1000, SS 0x10.
        m.poke_u16(TSS + 2, 0x1000);
        m.poke_u16(TSS + 4, 0x0010);
        let cpu = m.cpu_mut();
        cpu.gdtr = DescriptorTable { base: GDT, limit: 0x3F };
        cpu.cr[0] |= CR0_PE;
        cpu.load_tr(0x30).unwrap();
    }

    /// Put the CPU at ring 3 with a ring 3 stack.
    fn enter_ring3(cpu: &mut Intel386) {
        let Ok(Descriptor::Segment(code)) = cpu.fetch_descriptor(Selector::from_value(0x1B), CpuException::GeneralProtection)
        else {
            panic!("bad test descriptor");
        };
        cpu.load_cs_pmode(0x1B, &code, 3).unwrap();
        cpu.load_ss_pmode(0x23, 3, CpuException::GeneralProtection).unwrap();
        cpu.set_reg16(REG_ESP as u8, 0x800);
    }

    #[test]
    fn test_call_gate_to_inner_ring_and_back() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        rings(&mut m);
        let cpu = m.cpu_mut();
        enter_ring3(cpu);
        cpu.push(InstructionWidth::Word, 0xBEEF).unwrap();
        cpu.set_eip(0x0100);

        cpu.call_far(0x2B, 0, InstructionWidth::Word).unwrap();
        assert_eq!(cpu.cpl, 0);
        assert_eq!(cpu.segment(Segment::CS).value(), 0x08);
        assert_eq!(cpu.segment(Segment::SS).value(), 0x10);
        assert_eq!(cpu.eip(), 0x0500);
        // Frame: SS, SP, parameter, CS, IP
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x1000 - 10);
        assert_eq!(cpu.stack_peek(0, InstructionWidth::Word), Ok(0x0100));
        assert_eq!(cpu.stack_peek(2, InstructionWidth::Word), Ok(0x1B));
        assert_eq!(cpu.stack_peek(4, InstructionWidth::Word), Ok(0xBEEF));
        assert_eq!(cpu.stack_peek(6, InstructionWidth::Word), Ok(0x7FE));
        assert_eq!(cpu.stack_peek(8, InstructionWidth::Word), Ok(0x23));

        // retf 2 releases the parameter on both stacks.
        cpu.return_far(InstructionWidth::Word, 2).unwrap();
        assert_eq!(cpu.cpl, 3);
        assert_eq!(cpu.eip(), 0x0100);
        assert_eq!(cpu.segment(Segment::SS).value(), 0x23);
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x800);
    }

    #[test]
    fn test_direct_call_to_more_privileged_code_faults() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        rings(&mut m);
        let cpu = m.cpu_mut();
        enter_ring3(cpu);
        assert_eq!(
            cpu.call_far(0x08, 0, InstructionWidth::Word),
            Err(CpuException::GeneralProtection(0x08))
        );
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x800);
    }

    #[test]
    fn test_iretd_to_v86() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        rings(&mut m);
        let cpu = m.cpu_mut();
        let Ok(Descriptor::Segment(code)) = cpu.fetch_descriptor(Selector::from_value(0x08), CpuException::GeneralProtection)
        else {
            panic!("bad test descriptor");
        };
        cpu.load_cs_pmode(0x08, &code, 0).unwrap();
        cpu.load_ss_pmode(0x10, 0, CpuException::GeneralProtection).unwrap();
        cpu.set_reg32(REG_ESP as u8, 0x400);
        // GS, FS, DS, ES, SS, ESP, EFLAGS, CS, EIP
        for value in [0x6000, 0x5000, 0x4000, 0x1000, 0x3000, 0x0FFE, CPU_FLAG_VM | 0x0202, 0x2000, 0x0040] {
            cpu.push(InstructionWidth::Dword, value).unwrap();
        }

        cpu.interrupt_return(InstructionWidth::Dword).unwrap();
        assert!(cpu.is_v86_mode());
        assert_eq!(cpu.cpl(), 3);
        assert!(cpu.get_flag(Flag::Interrupt));
        assert_eq!(cpu.eip(), 0x0040);
        assert_eq!(cpu.reg32(REG_ESP as u8), 0x0FFE);
        assert_eq!(cpu.segment(Segment::CS).cache.base, 0x20000);
        assert_eq!(cpu.segment(Segment::SS).cache.base, 0x30000);
        assert_eq!(cpu.segment(Segment::ES).cache.base, 0x10000);
        assert_eq!(cpu.segment(Segment::DS).cache.base, 0x40000);
        assert_eq!(cpu.segment(Segment::FS).cache.base, 0x50000);
        assert_eq!(cpu.segment(Segment::GS).value(), 0x6000);
        assert_eq!(cpu.segment(Segment::SS).cache.dpl(), 3);

        // IRET inside V86 is IOPL sensitive.
        assert_eq!(
            cpu.interrupt_return(InstructionWidth::Word),
            Err(CpuException::GeneralProtection(0))
        );
    }

    #[test]
    fn test_iretd_to_v86_needs_ring0() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        rings(&mut m);
        let cpu = m.cpu_mut();
        enter_ring3(cpu);
        cpu.set_eip(0x0100);
        for value in [0x6000, 0x5000, 0x4000, 0x1000, 0x3000, 0x0FFE, CPU_FLAG_VM | 0x0202, 0x001B, 0x0040] {
            cpu.push(InstructionWidth::Dword, value).unwrap();
        }
        // At ring 3 the VM bit of the image is ignored and the return stays in the ring 3 code.
        cpu.interrupt_return(InstructionWidth::Dword).unwrap();
        assert!(!cpu.is_v86_mode());
        assert_eq!(cpu.cpl(), 3);
        assert_eq!(cpu.eip(), 0x0040);
    }

    #[test]
    fn test_real_mode_far_jump() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.jump_far(0xF000, 0xE05B).unwrap();
        assert_eq!(cpu.segment(Segment::CS).cache.base, 0xF0000);
        assert_eq!(cpu.eip(), 0xE05B);
    }

    #[test]
    fn test_return_outside_limit() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.set_reg16(REG_ESP as u8, 0x100);
        cpu.i.op32 = true;
        cpu.push(InstructionWidth::Dword, 0x1000).unwrap();
        cpu.push(InstructionWidth::Dword, 0x0001_0000).unwrap();
        assert_eq!(
            cpu.return_far(InstructionWidth::Dword, 0),
            Err(CpuException::GeneralProtection(0))
        );
    }
}
