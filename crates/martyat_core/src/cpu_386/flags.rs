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

    cpu_386::flags.rs

    EFLAGS writers with side effects, and the privilege rules for POPF and IRET.

*/
use super::*;

impl Intel386 {
    /// Set or clear IF. Pending INTR is sampled against the new value at the next instruction
    /// boundary.
    #[inline]
    pub(crate) fn set_if(&mut self, state: bool) {
        self.set_flag_state(Flag::Interrupt, state);
    }

    /// Set or clear TF. A trap is taken after the first instruction that starts with TF set.
    #[inline]
    pub(crate) fn set_tf(&mut self, state: bool) {
        self.set_flag_state(Flag::Trap, state);
    }

    /// Enter or leave virtual-8086 mode. Only meaningful in protected mode on the 386.
    pub(crate) fn set_vm(&mut self, state: bool) {
        if !self.cpu_type.is_386() || !self.is_protected_mode() {
            return;
        }
        if state != self.is_v86_mode() {
            log::debug!("{} virtual-8086 mode", if state { "Entering" } else { "Leaving" });
        }
        self.set_flag_state(Flag::Virtual86, state);
        if state {
            // V86 segments always have real mode semantics at privilege 3.
            for seg in [Segment::ES, Segment::CS, Segment::SS, Segment::DS, Segment::FS, Segment::GS] {
                let value = self.sregs[seg.index()].value();
                let mut reg = SegmentRegister::real_mode(value, seg == Segment::CS);
                reg.cache.access |= 0x60;
                self.sregs[seg.index()] = reg;
            }
        }
        self.update_cpl();
    }

    /// Set or clear RF. Setting RF invalidates the prefetch queue.
    pub(crate) fn set_rf(&mut self, state: bool) {
        if !self.cpu_type.is_386() {
            return;
        }
        let was_set = self.get_flag(Flag::Resume);
        self.set_flag_state(Flag::Resume, state);
        if state && !was_set {
            self.pq_invalidate();
        }
    }

    /// EFLAGS bits that POPF or a same privilege IRET may change in the current mode.
    pub(crate) fn flags_write_mask(&self) -> u32 {
        let mut mask = CPU_FLAGS_ARITH | CPU_FLAG_TRAP | CPU_FLAG_DIRECTION | CPU_FLAG_INT_ENABLE;
        if self.is_real_mode() {
            // The 286 forces IOPL and NT to 0 in real mode.
            if self.cpu_type.is_386() {
                mask |= CPU_FLAG_IOPL | CPU_FLAG_NT;
            }
        }
        else if self.is_v86_mode() {
            mask |= CPU_FLAG_NT;
        }
        else {
            mask |= CPU_FLAG_NT;
            if self.cpl == 0 {
                mask |= CPU_FLAG_IOPL;
            }
            if self.cpl > self.iopl() {
                mask &= !CPU_FLAG_INT_ENABLE;
            }
        }
        mask
    }

    /// Write the bits of EFLAGS selected by `mask`. Reserved bits keep their fixed values.
    pub(crate) fn write_eflags(&mut self, value: u32, mask: u32) {
        let family_mask = if self.cpu_type.is_386() {
            CPU_FLAGS_386_MASK
        }
        else {
            CPU_FLAGS_286_MASK
        };
        let mask = mask & family_mask;
        let vm = value & CPU_FLAG_VM != 0;
        let rf = value & CPU_FLAG_RF != 0;
        self.eflags = (self.eflags & !(mask & !(CPU_FLAG_VM | CPU_FLAG_RF)))
            | (value & mask & !(CPU_FLAG_VM | CPU_FLAG_RF))
            | CPU_FLAGS_RESERVED_ON;
        if mask & CPU_FLAG_RF != 0 {
            self.set_rf(rf);
        }
        if mask & CPU_FLAG_VM != 0 {
            self.set_vm(vm);
        }
    }

    /// Read EFLAGS as PUSHF/PUSHFD sees it. The pushed image never has VM or RF set.
    #[inline]
    pub(crate) fn eflags_for_push(&self) -> u32 {
        self.eflags & !(CPU_FLAG_VM | CPU_FLAG_RF)
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    #[test]
    fn test_286_real_mode_iopl() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let cpu = m.cpu_mut();
        let mask = cpu.flags_write_mask();
        cpu.write_eflags(0xFFFF, mask);
        assert_eq!(cpu.eflags() & 0xF000, 0);
        assert_eq!(cpu.eflags(), 0x0FD7);

        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        let mask = cpu.flags_write_mask();
        cpu.write_eflags(0xFFFF, mask);
        assert_eq!(cpu.eflags() & 0xF000, 0x7000);
    }

    #[test]
    fn test_user_mode_cannot_change_if() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        let cpu = m.cpu_mut();
        cpu.cr[0] |= CR0_PE;
        cpu.cpl = 3;
        let mask = cpu.flags_write_mask();
        assert_eq!(mask & (CPU_FLAG_INT_ENABLE | CPU_FLAG_IOPL), 0);
    }
}
