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

    cpu_386::execute::misc.rs

    Flag manipulation, HLT, WAIT and the coprocessor escapes.

*/
use crate::cpu_common::{ActivityState, CpuException};

use super::{super::*, ExecResult};

impl Intel386 {
    pub(crate) fn invalid(&mut self) -> ExecResult {
        trace_print!(self, "Invalid opcode {:04X} at {:08X}", self.i.opcode, self.i.address);
        Err(CpuException::InvalidOpcode)
    }

    pub(crate) fn clc(&mut self) -> ExecResult {
        self.clear_flag(Flag::Carry);
        Ok(())
    }

    pub(crate) fn stc(&mut self) -> ExecResult {
        self.set_flag(Flag::Carry);
        Ok(())
    }

    pub(crate) fn cmc(&mut self) -> ExecResult {
        let cf = self.get_flag(Flag::Carry);
        self.set_flag_state(Flag::Carry, !cf);
        Ok(())
    }

    pub(crate) fn cld(&mut self) -> ExecResult {
        self.clear_flag(Flag::Direction);
        Ok(())
    }

    pub(crate) fn std(&mut self) -> ExecResult {
        self.set_flag(Flag::Direction);
        Ok(())
    }

    /// CLI and STI need CPL <= IOPL in protected mode, and IOPL 3 in virtual-8086 mode.
    fn if_check(&self) -> ExecResult {
        if self.is_protected_mode() && self.cpl > self.iopl() {
            return Err(CpuException::GeneralProtection(0));
        }
        Ok(())
    }

    pub(crate) fn cli(&mut self) -> ExecResult {
        self.if_check()?;
        self.set_if(false);
        Ok(())
    }

    /// STI. Interrupts stay blocked until the instruction after STI has completed.
    pub(crate) fn sti(&mut self) -> ExecResult {
        self.if_check()?;
        if !self.get_flag(Flag::Interrupt) {
            self.inhibit_interrupts();
        }
        self.set_if(true);
        Ok(())
    }

    pub(crate) fn hlt(&mut self) -> ExecResult {
        if self.is_protected_mode() && self.cpl != 0 {
            return Err(CpuException::GeneralProtection(0));
        }
        log::trace!("HLT at {:04X}:{:08X}", self.segment(Segment::CS).value(), self.i.address);
        self.state.activity = ActivityState::Halt;
        Ok(())
    }

    /// WAIT faults with #NM when MP and TS are both set. There is no coprocessor to wait for.
    pub(crate) fn wait(&mut self) -> ExecResult {
        if self.cr[0] & (CR0_MP | CR0_TS) == (CR0_MP | CR0_TS) {
            return Err(CpuException::DeviceNotAvailable);
        }
        Ok(())
    }

    /// ESC (D8-DF). With EM or TS set the instruction faults with #NM; otherwise, with no
    /// coprocessor attached, it completes without effect.
    pub(crate) fn esc(&mut self) -> ExecResult {
        if self.cr[0] & (CR0_EM | CR0_TS) != 0 {
            return Err(CpuException::DeviceNotAvailable);
        }
        if !self.i.is_register_form() {
            // The operand address is still formed.
            self.ea();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    #[test]
    fn test_cli_privilege() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.cr[0] |= CR0_PE;
        cpu.cpl = 3;
        assert_eq!(cpu.cli(), Err(CpuException::GeneralProtection(0)));
        cpu.eflags |= CPU_FLAG_IOPL;
        assert_eq!(cpu.cli(), Ok(()));
        assert!(!cpu.get_flag(Flag::Interrupt));
    }

    #[test]
    fn test_esc_device_not_available() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.esc(), Ok(()));
        cpu.cr[0] |= CR0_TS;
        assert_eq!(cpu.esc(), Err(CpuException::DeviceNotAvailable));
        // WAIT only cares about TS when MP is set.
        assert_eq!(cpu.wait(), Ok(()));
        cpu.cr[0] |= CR0_MP;
        assert_eq!(cpu.wait(), Err(CpuException::DeviceNotAvailable));
    }

    #[test]
    fn test_sti_inhibits_next_instruction() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        cpu.sti().unwrap();
        assert_ne!(cpu.state.inhibit_mask & INHIBIT_INTERRUPTS, 0);
    }
}
