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

    cpu_386::interrupt.rs

    Interrupt delivery through the real mode IVT and the protected mode IDT.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::{descriptor::*, task::TaskSwitchReason, *};

/// What raised an interrupt. Software interrupts are subject to the gate DPL check; the others
/// set EXT in error codes. Faults report with RF set in the pushed EFLAGS image on the 386.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum IntSource {
    Software,
    Exception,
    Fault,
    External,
}

impl IntSource {
    #[inline]
    fn ext(self) -> u16 {
        (self != IntSource::Software) as u16
    }
}

/// Where a protected mode interrupt frame goes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StackPlan {
    /// Push onto the current stack.
    Same,
    /// Switch to the stack of the given privilege level from the TSS.
    Inner(u8),
    /// Leave virtual-8086 mode for the ring 0 stack, saving the data segments.
    FromV86,
}

impl Intel386 {
    /// Deliver interrupt `vector`. On failure the stack pointer is left as it was.
    pub(crate) fn interrupt(&mut self, vector: u8, source: IntSource, error_code: Option<u16>) -> Result<(), CpuException> {
        let saved_esp = self.regs[REG_ESP].dword();
        let result = if self.is_protected_mode() {
            self.interrupt_pmode(vector, source, error_code)
        }
        else {
            self.interrupt_real(vector)
        };
        if result.is_err() {
            self.regs[REG_ESP].set_dword(saved_esp);
        }
        else {
            trace_print!(
                self,
                "INT {:02X} -> {:04X}:{:08X}",
                vector,
                self.sregs[Segment::CS.index()].value(),
                self.eip
            );
        }
        result
    }

    /// Real mode: FLAGS, CS and IP are pushed and the vector is read from the IVT.
    fn interrupt_real(&mut self, vector: u8) -> Result<(), CpuException> {
        let entry = vector as u32 * 4;
        if entry + 3 > self.idtr.limit as u32 {
            return Err(CpuException::GeneralProtection(0));
        }
        let address = self.idtr.base.wrapping_add(entry);
        let offset = self.system_read(address, InstructionWidth::Word)?;
        let segment = self.system_read(address.wrapping_add(2), InstructionWidth::Word)? as u16;

        let word = InstructionWidth::Word;
        self.push(word, self.eflags_for_push() & 0xFFFF)?;
        self.push(word, self.sregs[Segment::CS.index()].value() as u32)?;
        self.push(word, self.eip)?;
        self.set_if(false);
        self.set_tf(false);
        self.set_rf(false);
        self.load_segment_real(Segment::CS, segment);
        self.set_eip(offset);
        Ok(())
    }

    /// Decide where the frame of an interrupt to code segment `target` is built.
    pub(crate) fn interrupt_prepare_stack(&self, target: Selector, cache: &SegmentCache) -> Result<StackPlan, CpuException> {
        if self.is_v86_mode() {
            if cache.is_conforming() || cache.dpl() != 0 {
                return Err(CpuException::GeneralProtection(target.error_code()));
            }
            return Ok(StackPlan::FromV86);
        }
        if !cache.is_conforming() && cache.dpl() < self.cpl {
            Ok(StackPlan::Inner(cache.dpl()))
        }
        else {
            Ok(StackPlan::Same)
        }
    }

    pub(crate) fn interrupt_pmode(
        &mut self,
        vector: u8,
        source: IntSource,
        error_code: Option<u16>,
    ) -> Result<(), CpuException> {
        let ext = source.ext();
        let idt_code = ((vector as u16) << 3) | 2 | ext;
        let entry = vector as u32 * 8;
        if entry + 7 > self.idtr.limit as u32 {
            return Err(CpuException::GeneralProtection(idt_code));
        }
        let raw = self.read_descriptor_raw(self.idtr.base.wrapping_add(entry))?;
        let Descriptor::Gate(gate) = Descriptor::decode(raw, self.cpu_type)
        else {
            return Err(CpuException::GeneralProtection(idt_code));
        };
        let gate_type = gate.gate_type();
        if !matches!(
            gate_type,
            SYS_TASK_GATE | SYS_INT_GATE286 | SYS_TRAP_GATE286 | SYS_INT_GATE386 | SYS_TRAP_GATE386
        ) {
            return Err(CpuException::GeneralProtection(idt_code));
        }
        if source == IntSource::Software && gate.dpl() < self.cpl {
            return Err(CpuException::GeneralProtection(idt_code));
        }
        if !gate.present() {
            return Err(CpuException::SegmentNotPresent(idt_code));
        }

        if gate_type == SYS_TASK_GATE {
            self.task_gate(&gate, TaskSwitchReason::Interrupt)?;
            if let Some(code) = error_code {
                let width = if self.tr.cache.access & 0x08 != 0 {
                    InstructionWidth::Dword
                }
                else {
                    InstructionWidth::Word
                };
                self.push(width, code as u32)?;
            }
            return Ok(());
        }

        let target = Selector::from_value(gate.selector);
        if target.is_null() {
            return Err(CpuException::GeneralProtection(ext));
        }
        let Descriptor::Segment(d) = self.fetch_descriptor(target, CpuException::GeneralProtection)?
        else {
            return Err(CpuException::GeneralProtection(target.error_code() | ext));
        };
        let cache = SegmentCache::from(&d);
        if !cache.is_code() || cache.dpl() > self.cpl {
            return Err(CpuException::GeneralProtection(target.error_code() | ext));
        }
        if !cache.present() {
            return Err(CpuException::SegmentNotPresent(target.error_code() | ext));
        }
        if gate.offset > d.limit {
            return Err(CpuException::GeneralProtection(0));
        }

        let width = if gate.is_32() { InstructionWidth::Dword } else { InstructionWidth::Word };
        let plan = self.interrupt_prepare_stack(target, &cache)?;

        let mut image = self.eflags_for_push();
        if source == IntSource::Fault && self.cpu_type.is_386() {
            image |= CPU_FLAG_RF;
        }
        if self.is_v86_mode() {
            image |= CPU_FLAG_VM;
        }
        let return_cs = self.sregs[Segment::CS.index()].value() as u32;
        let return_eip = self.eip;
        let old_ss = self.sregs[Segment::SS.index()].value() as u32;
        let old_esp = self.stack_pointer();
        let v86_segments = [Segment::GS, Segment::FS, Segment::DS, Segment::ES].map(|s| self.sregs[s.index()]);

        let new_cpl = match plan {
            StackPlan::Same => self.cpl,
            StackPlan::Inner(dpl) => dpl,
            StackPlan::FromV86 => 0,
        };
        let saved = if plan == StackPlan::Same {
            None
        }
        else {
            // The inner stack is a protected mode stack even when coming from V86.
            let saved = self.enter_inner_stack(new_cpl)?;
            self.eflags &= !CPU_FLAG_VM;
            Some(saved)
        };

        let pushed: Result<(), CpuException> = (|| {
            if plan == StackPlan::FromV86 {
                for reg in v86_segments.iter() {
                    self.push(width, reg.value() as u32)?;
                }
            }
            if plan != StackPlan::Same {
                self.push(width, old_ss)?;
                self.push(width, old_esp)?;
            }
            self.push(width, image & width.mask())?;
            self.push(width, return_cs)?;
            self.push(width, return_eip)?;
            if let Some(code) = error_code {
                self.push(width, code as u32)?;
            }
            Ok(())
        })();
        if let Err(e) = pushed {
            if let Some(saved) = saved {
                self.restore_stack(saved);
            }
            return Err(e);
        }

        if plan == StackPlan::FromV86 {
            for seg in [Segment::ES, Segment::DS, Segment::FS, Segment::GS] {
                self.sregs[seg.index()] = SegmentRegister::null(0);
            }
            cycles_pmode!(self, 0, 20);
        }
        else if plan != StackPlan::Same {
            cycles_pmode!(self, 16, 22);
        }

        self.eflags &= !(CPU_FLAG_TRAP | CPU_FLAG_NT | CPU_FLAG_RF | CPU_FLAG_VM);
        if matches!(gate_type, SYS_INT_GATE286 | SYS_INT_GATE386) {
            self.eflags &= !CPU_FLAG_INT_ENABLE;
        }
        self.load_cs_pmode(target.value(), &d, new_cpl)?;
        if plan == StackPlan::Inner(new_cpl) {
            self.validate_data_segments();
        }
        self.set_eip(gate.offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    const GDT: u32 = 0x1000;
    const IDT: u32 = 0x1800;

    fn setup(m: &mut TestMachine, cpu_type_386: bool) {
        // 1 = ring 0 code, 2 = ring 0 data
        m.poke_descriptor(GDT, 1, 0x10000, 0xFFFF, 0x9A, 0);
        m.poke_descriptor(GDT, 2, 0x20000, 0xFFFF, 0x92, 0);
        // Vector 0x20: interrupt gate DPL 0 to 0008:0100. Vector 0x21: trap gate DPL 3.
        let (int_gate, trap_gate) = if cpu_type_386 { (0x8E, 0xEF) } else { (0x86, 0xE7) };
        m.poke_bytes(IDT + 0x20 * 8, &[0x00, 0x01, 0x08, 0x00, 0x00, int_gate, 0x00, 0x00]);
        m.poke_bytes(IDT + 0x21 * 8, &[0x00, 0x02, 0x08, 0x00, 0x00, trap_gate, 0x00, 0x00]);
        let cpu = m.cpu_mut();
        cpu.gdtr = DescriptorTable { base: GDT, limit: 0x1F };
        cpu.idtr = DescriptorTable { base: IDT, limit: 0x21 * 8 + 7 };
        cpu.cr[0] |= CR0_PE;
        let Ok(Descriptor::Segment(code)) = cpu.fetch_descriptor(Selector::from_value(0x08), CpuException::GeneralProtection)
        else {
            panic!("bad test descriptor");
        };
        cpu.load_cs_pmode(0x08, &code, 0).unwrap();
        cpu.load_ss_pmode(0x10, 0, CpuException::GeneralProtection).unwrap();
        cpu.set_reg16(REG_ESP as u8, 0x400);
    }

    #[test]
    fn test_interrupt_gate_clears_if() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        setup(&mut m, false);
        let cpu = m.cpu_mut();
        cpu.set_flag(Flag::Interrupt);
        cpu.set_eip(0x1234);
        cpu.interrupt(0x20, IntSource::External, None).unwrap();
        assert_eq!(cpu.eip(), 0x0100);
        assert!(!cpu.get_flag(Flag::Interrupt));
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x3FA);
        assert_eq!(cpu.stack_peek(0, InstructionWidth::Word), Ok(0x1234));

        // A trap gate leaves IF alone.
        cpu.set_flag(Flag::Interrupt);
        cpu.interrupt(0x21, IntSource::Software, None).unwrap();
        assert!(cpu.get_flag(Flag::Interrupt));
        assert_eq!(cpu.eip(), 0x0200);
    }

    #[test]
    fn test_idt_limit_and_gate_dpl() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup(&mut m, true);
        let cpu = m.cpu_mut();
        assert_eq!(
            cpu.interrupt(0x30, IntSource::Software, None),
            Err(CpuException::GeneralProtection(0x30 * 8 + 2))
        );
        assert_eq!(
            cpu.interrupt(0x30, IntSource::External, None),
            Err(CpuException::GeneralProtection(0x30 * 8 + 3))
        );
        cpu.cpl = 3;
        assert_eq!(
            cpu.interrupt(0x20, IntSource::Software, None),
            Err(CpuException::GeneralProtection(0x20 * 8 + 2))
        );
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x400);
    }

    #[test]
    fn test_interrupt_from_v86_and_back() {
        const TSS: u32 = 0x2000;
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup(&mut m, true);
        // 3 = 386 TSS with a ring 0 stack of 0010:0800.
        m.poke_descriptor(GDT, 3, TSS, 0x67, 0x89, 0);
        m.poke_u32(TSS + 4, 0x0800);
        m.poke_u16(TSS + 8, 0x0010);
        let cpu = m.cpu_mut();
        cpu.load_tr(0x18).unwrap();
        for (seg, value) in [
            (Segment::ES, 0x1000),
            (Segment::CS, 0x2000),
            (Segment::SS, 0x3000),
            (Segment::DS, 0x4000),
            (Segment::FS, 0x5000),
            (Segment::GS, 0x6000),
        ] {
            cpu.sregs[seg.index()] = SegmentRegister::real_mode(value, seg == Segment::CS);
        }
        cpu.eflags |= CPU_FLAG_IOPL | CPU_FLAG_INT_ENABLE;
        cpu.set_vm(true);
        cpu.set_reg32(REG_ESP as u8, 0x0100);
        cpu.set_eip(0x1234);

        cpu.interrupt(0x20, IntSource::External, None).unwrap();
        assert!(!cpu.is_v86_mode());
        assert_eq!(cpu.cpl(), 0);
        assert_eq!(cpu.eip(), 0x0100);
        assert!(!cpu.get_flag(Flag::Interrupt));
        assert_eq!(cpu.segment(Segment::SS).value(), 0x10);
        assert_eq!(cpu.reg32(REG_ESP as u8), 0x0800 - 36);
        // EIP, CS, EFLAGS, ESP, SS, ES, DS, FS, GS
        let frame: Vec<u32> = (0..9)
            .map(|n| cpu.stack_peek(n * 4, InstructionWidth::Dword).unwrap())
            .collect();
        assert_eq!(frame[0], 0x1234);
        assert_eq!(frame[1], 0x2000);
        assert_ne!(frame[2] & CPU_FLAG_VM, 0);
        let outer: [u32; 6] = [0x0100, 0x3000, 0x1000, 0x4000, 0x5000, 0x6000];
        assert_eq!(frame[3..], outer);
        for seg in [Segment::ES, Segment::DS, Segment::FS, Segment::GS] {
            assert_eq!(cpu.segment(seg).value(), 0);
            assert!(!cpu.segment(seg).cache.valid);
        }

        cpu.interrupt_return(InstructionWidth::Dword).unwrap();
        assert!(cpu.is_v86_mode());
        assert_eq!(cpu.cpl(), 3);
        assert_eq!(cpu.eip(), 0x1234);
        assert_eq!(cpu.reg32(REG_ESP as u8), 0x0100);
        assert_eq!(cpu.segment(Segment::DS).cache.base, 0x40000);
        assert_eq!(cpu.segment(Segment::GS).cache.base, 0x60000);
    }

    #[test]
    fn test_interrupt_from_v86_to_ring3_faults() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup(&mut m, true);
        // Vector 0x22 targets a ring 3 code segment.
        m.poke_descriptor(GDT, 3, 0x30000, 0xFFFF, 0xFA, 0);
        m.poke_bytes(IDT + 0x22 * 8, &[0x00, 0x01, 0x1B, 0x00, 0x00, 0xEE, 0x00, 0x00]);
        let cpu = m.cpu_mut();
        cpu.idtr.limit = 0x22 * 8 + 7;
        cpu.set_vm(true);
        assert_eq!(
            cpu.interrupt(0x22, IntSource::External, None),
            Err(CpuException::GeneralProtection(0x18))
        );
        assert!(cpu.is_v86_mode());
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x400);
    }

    #[test]
    fn test_fault_frame_has_rf_and_error_code() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup(&mut m, true);
        let cpu = m.cpu_mut();
        cpu.interrupt(0x20, IntSource::Fault, Some(0x0018)).unwrap();
        // Error code, EIP, CS, EFLAGS, each a dword through a 386 gate.
        assert_eq!(cpu.reg16(REG_ESP as u8), 0x400 - 16);
        assert_eq!(cpu.stack_peek(0, InstructionWidth::Dword), Ok(0x18));
        let image = cpu.stack_peek(12, InstructionWidth::Dword).unwrap();
        assert_ne!(image & CPU_FLAG_RF, 0);
        assert!(!cpu.get_flag(Flag::Resume));
    }
}
