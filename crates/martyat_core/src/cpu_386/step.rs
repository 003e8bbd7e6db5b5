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

    cpu_386::step.rs

    The instruction step. Samples the interrupt lines and debug traps at the
    instruction boundary, then decodes and executes one instruction and closes out its
    cycle count on the bus.

*/
use crate::{
    cpu_common::{ActivityState, CpuError, CpuException, StepResult},
    config::TripleFaultPolicy,
};

use super::{exception::Shutdown, execute::Op, interrupt::IntSource, *};

impl Intel386 {
    /// Block INTR and debug traps until the next instruction has completed, as after a load of
    /// SS or STI.
    pub(crate) fn inhibit_interrupts(&mut self) {
        self.state.inhibit_mask = INHIBIT_INTERRUPTS_AND_DEBUG;
        self.state.inhibit_icount = self.icount + 1;
    }

    #[inline]
    fn inhibited(&self, mask: u32) -> bool {
        self.state.inhibit_mask & mask != 0 && self.icount <= self.state.inhibit_icount
    }

    /// Execute one instruction, or take one event. Returns the result and the cycles it took.
    pub fn step(&mut self) -> Result<(StepResult, u32), CpuError> {
        match self.state.activity {
            ActivityState::PowerOff => return Ok((StepResult::PowerOff, 0)),
            ActivityState::Shutdown => return Ok((StepResult::Shutdown, 0)),
            _ => {}
        }

        // A DMA controller holding the bus stops the processor.
        if self.lines.hrq() {
            if !self.hlda {
                log::trace!("HLDA asserted");
                self.hlda = true;
            }
            return Ok((StepResult::BusHold, 0));
        }
        self.hlda = false;

        self.cycles = InstrCycles::default();
        self.prev_eip = self.eip;
        self.prev_esp = self.regs[REG_ESP].dword();
        self.check_descriptor_caches()?;

        if let Some(result) = self.step_events()? {
            return Ok(result);
        }

        if self.state.activity == ActivityState::Halt {
            let total = self.bus.end_instruction(BUS_IDLE_CYCLES);
            self.total_cycles += total as u64;
            return Ok((StepResult::Halted, total));
        }

        // Instruction breakpoints match before decode. RF suppresses them for one instruction.
        if self.cpu_type.is_386() && !self.get_flag(Flag::Resume) {
            let hits = self.code_breakpoint_hits(self.cs_base().wrapping_add(self.eip));
            if hits != 0 {
                self.dr[6] |= hits;
                self.deliver(CpuException::Debug)?;
                return Ok(self.finish_event());
            }
        }

        let single_step = self.get_flag(Flag::Trap);
        match self.decode_and_execute() {
            Ok(()) => {
                self.set_rf(false);
                if single_step && !self.i.op.is_software_interrupt() {
                    self.state.debug_trap |= DR6_BS;
                }
            }
            Err(exc) => {
                if !exc.is_trap() {
                    self.eip = self.prev_eip;
                    self.regs[REG_ESP].set_dword(self.prev_esp);
                }
                self.pq_invalidate();
                self.deliver(exc)?;
            }
        }
        self.icount += 1;

        let total = self.bus.end_instruction(self.cycles.eu());
        self.total_cycles += total as u64;
        let result = match self.state.activity {
            ActivityState::Shutdown => StepResult::Shutdown,
            ActivityState::Halt => StepResult::Halted,
            _ => StepResult::Normal,
        };
        Ok((result, total))
    }

    fn decode_and_execute(&mut self) -> Result<(), CpuException> {
        self.fetch_eip = self.eip;
        self.fetch_len = 0;
        let cpu_type = self.cpu_type;
        let code32 = self.code_big();
        self.i = Intel386::decode(self, cpu_type, code32)?;
        self.i.address = self.prev_eip;
        self.cycles.base = self.i.op.base_cycles(cpu_type.is_386(), !self.i.is_register_form());
        self.eip = self.fetch_eip;
        if self.trace_enabled {
            log::trace!("{:04X}:{:08X} {}", self.sregs[Segment::CS.index()].value(), self.prev_eip, self.i);
        }
        self.execute()
    }

    /// Take a pending debug trap, NMI or INTR at the instruction boundary. Returns the step
    /// result when an event was delivered.
    fn step_events(&mut self) -> Result<Option<(StepResult, u32)>, CpuError> {
        if self.state.debug_trap != 0 && !self.inhibited(INHIBIT_DEBUG) {
            self.dr[6] |= self.state.debug_trap;
            self.state.debug_trap = 0;
            self.deliver(CpuException::Debug)?;
            return Ok(Some(self.finish_event()));
        }

        if self.state.event_mask & EVENT_NMI == 0 && self.lines.take_nmi() {
            log::trace!("NMI at {:04X}:{:08X}", self.sregs[Segment::CS.index()].value(), self.eip);
            self.state.event_mask |= EVENT_NMI;
            self.wake();
            self.external_interrupt(2)?;
            return Ok(Some(self.finish_event()));
        }

        if self.lines.intr() && self.get_flag(Flag::Interrupt) && !self.inhibited(INHIBIT_INTERRUPTS) {
            self.wake();
            let vector = self.bus.io.acknowledge_interrupt();
            self.external_interrupt(vector)?;
            return Ok(Some(self.finish_event()));
        }
        Ok(None)
    }

    fn wake(&mut self) {
        if self.state.activity == ActivityState::Halt {
            self.state.activity = ActivityState::Active;
        }
    }

    /// Deliver a hardware interrupt. Faults raised along the way carry EXT.
    fn external_interrupt(&mut self, vector: u8) -> Result<(), CpuError> {
        if let Err(exc) = self.interrupt(vector, IntSource::External, None) {
            self.ext = true;
            self.deliver(exc)?;
        }
        self.ext = false;
        Ok(())
    }

    /// Cycle count of an event delivered at the instruction boundary.
    fn finish_event(&mut self) -> (StepResult, u32) {
        self.cycles.base += Op::IntIb.base_cycles(self.cpu_type.is_386(), false);
        let total = self.bus.end_instruction(self.cycles.eu());
        self.total_cycles += total as u64;
        let result = if self.state.activity == ActivityState::Shutdown {
            StepResult::Shutdown
        }
        else {
            StepResult::Normal
        };
        (result, total)
    }

    /// Deliver an exception, entering shutdown if it cannot be delivered.
    fn deliver(&mut self, exc: CpuException) -> Result<(), CpuError> {
        if let Err(Shutdown) = self.exception(exc) {
            self.enter_shutdown();
        }
        Ok(())
    }

    fn enter_shutdown(&mut self) {
        log::warn!(
            "Triple fault at {:04X}:{:08X}, entering shutdown",
            self.sregs[Segment::CS.index()].value(),
            self.prev_eip
        );
        self.curr_exception = None;
        self.exception_depth = 0;
        self.ext = false;
        self.state.activity = ActivityState::Shutdown;
        self.bus.io.shutdown();
        if self.triple_fault_policy == TripleFaultPolicy::Reset {
            log::debug!("Resetting after shutdown");
            self.reset();
        }
    }

    /// Protected mode requires a loaded CS cache at every instruction boundary.
    fn check_descriptor_caches(&self) -> Result<(), CpuError> {
        let cs = &self.sregs[Segment::CS.index()];
        if self.is_pmode_not_v86() && !cs.cache.valid {
            log::error!("CS cache is not loaded: {:?}", cs);
            return Err(CpuError::DescriptorCacheError("CS", format!("{:?}", cs)));
        }
        Ok(())
    }
}

/// Bus clocks that elapse each step while halted.
const BUS_IDLE_CYCLES: u32 = 2;

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    #[test]
    fn test_nop_base_cycles() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        m.load_program(0x1000, &[0x90; 32]);
        // Let the queue fill.
        m.run(8);
        let (result, cycles) = m.step();
        assert_eq!(result, StepResult::Normal);
        assert_eq!(cycles, 3);
    }

    #[test]
    fn test_hlt_then_intr() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        // Vector 8 -> 0000:0500, which holds a NOP.
        m.poke_u16(8 * 4, 0x0500);
        m.poke_u16(8 * 4 + 2, 0x0000);
        m.poke_u8(0x500, 0x90);
        m.load_program(0x1000, &[0xFB, 0xF4, 0x90]); // sti; hlt; nop
        m.step();
        assert_eq!(m.step().0, StepResult::Halted);
        assert_eq!(m.step().0, StepResult::Halted);
        m.lines().raise_intr();
        assert_eq!(m.step().0, StepResult::Normal);
        assert_eq!(m.cpu().eip(), 0x0500);
        assert_eq!(m.cpu().activity(), ActivityState::Active);
    }

    #[test]
    fn test_sti_shadow() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        m.poke_u16(8 * 4, 0x0500);
        m.load_program(0x1000, &[0xFB, 0x90, 0x90]); // sti; nop; nop
        m.lines().raise_intr();
        m.step(); // sti
        m.step(); // nop runs inside the shadow
        assert_eq!(m.cpu().eip(), 0x1002);
        m.step();
        assert_eq!(m.cpu().eip(), 0x0500);
    }

    #[test]
    fn test_nmi_is_masked_until_iret() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        m.poke_u16(2 * 4, 0x0500);
        m.poke_u8(0x500, 0xCF); // iret
        m.load_program(0x1000, &[0x90, 0x90, 0x90]);
        m.lines().deliver_nmi();
        m.step();
        assert_eq!(m.cpu().eip(), 0x0500);
        m.lines().deliver_nmi();
        // Masked: the handler's IRET runs instead of a nested NMI.
        m.step();
        assert_eq!(m.cpu().eip(), 0x1000);
        m.step();
        assert_eq!(m.cpu().eip(), 0x0500);
    }

    #[test]
    fn test_bus_hold() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        m.load_program(0x1000, &[0x90]);
        m.lines().set_hrq(true);
        assert_eq!(m.step(), (StepResult::BusHold, 0));
        m.lines().set_hrq(false);
        assert_eq!(m.step().0, StepResult::Normal);
        assert_eq!(m.cpu().eip(), 0x1001);
    }

    #[test]
    fn test_single_step_trap() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        m.poke_u16(4, 0x0600);
        m.load_program(0x1000, &[0x90, 0x90]);
        m.cpu_mut().set_flag(Flag::Trap);
        m.step();
        assert_eq!(m.cpu().eip(), 0x1001);
        m.step();
        assert_eq!(m.cpu().eip(), 0x0600);
        assert_ne!(m.cpu().dr(6) & DR6_BS, 0);
        assert!(!m.cpu().get_flag(Flag::Trap));
    }

    #[test]
    fn test_invalid_opcode_restarts() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        m.poke_u16(6 * 4, 0x0700);
        // 0F FF is undefined.
        m.load_program(0x1000, &[0x0F, 0xFF]);
        m.cpu_mut().set_reg16(REG_ESP as u8, 0x800);
        m.step();
        assert_eq!(m.cpu().eip(), 0x0700);
        // The pushed IP is the faulting instruction.
        assert_eq!(m.peek_u16(0x7FA), 0x1000);
    }

    #[test]
    fn test_triple_fault_reset_policy() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        m.load_program(0x1000, &[0x0F, 0xFF]);
        m.cpu_mut().idtr.limit = 0;
        m.cpu_mut().triple_fault_policy = TripleFaultPolicy::Shutdown;
        assert_eq!(m.step().0, StepResult::Shutdown);
        assert_eq!(m.step(), (StepResult::Shutdown, 0));

        m.cpu_mut().reset();
        m.load_program(0x1000, &[0x0F, 0xFF]);
        m.cpu_mut().idtr.limit = 0;
        m.cpu_mut().triple_fault_policy = TripleFaultPolicy::Reset;
        m.step();
        assert_eq!(m.cpu().activity(), ActivityState::Active);
        assert_eq!(m.cpu().eip(), 0xFFF0);
    }

    #[test]
    fn test_pmode_segment_load_penalty() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        m.poke_descriptor(0x800, 1, 0, 0xFFFF, 0x92, 0);
        m.load_program(0x1000, &[0x8E, 0xD8, 0x8E, 0xD8]); // mov ds,ax; mov ds,ax
        m.cpu_mut().set_reg16(REG_EAX as u8, 0x08);
        m.step();
        let real = m.cpu().cycles;

        let cpu = m.cpu_mut();
        cpu.gdtr = DescriptorTable { base: 0x800, limit: 0x0F };
        cpu.cr[0] |= CR0_PE;
        m.step();
        let pmode = m.cpu().cycles;
        assert_eq!(m.cpu().segment(Segment::DS).cache.base, 0);
        assert_eq!(real.base, pmode.base);
        assert_eq!(pmode.eu() - real.eu(), 15);
    }
}
