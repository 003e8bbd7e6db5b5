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

    cpu_386::mod.rs

    Implements the 80286 / 80386SX CPU core. The 80286 is emulated as a personality of
    the 386 core: 32-bit forms, paging, V86 mode and the 386 system instructions are
    unavailable, and 286 descriptor and TSS formats are used.

*/
#![allow(clippy::upper_case_acronyms)]

mod access;
mod control;
pub mod decode;
pub mod descriptor;
mod exception;
pub mod execute;
mod flags;
pub mod instruction;
mod interrupt;
pub mod mmu;
pub mod registers;
mod segment;
pub mod state;
mod step;
mod task;
mod transfer;

use std::sync::Arc;

use crate::{
    bus::{CpuBus, IoBus},
    config::{CoreConfig, TripleFaultPolicy},
    cpu_common::{ActivityState, CpuType, ExceptionClass},
    machine::InterruptLines,
};

pub use descriptor::{Descriptor, GateDescriptor, SegmentCache, SegmentDescriptor, SegmentRegister, Selector};
pub use instruction::Instruction;
pub use mmu::Tlb;
pub use registers::{Flag, GeneralRegister};

// EFLAGS
pub const CPU_FLAG_CARRY: u32 = 0b0000_0000_0000_0001;
pub const CPU_FLAG_RESERVED1: u32 = 0b0000_0000_0000_0010;
pub const CPU_FLAG_PARITY: u32 = 0b0000_0000_0000_0100;
pub const CPU_FLAG_AUX_CARRY: u32 = 0b0000_0000_0001_0000;
pub const CPU_FLAG_ZERO: u32 = 0b0000_0000_0100_0000;
pub const CPU_FLAG_SIGN: u32 = 0b0000_0000_1000_0000;
pub const CPU_FLAG_TRAP: u32 = 0b0000_0001_0000_0000;
pub const CPU_FLAG_INT_ENABLE: u32 = 0b0000_0010_0000_0000;
pub const CPU_FLAG_DIRECTION: u32 = 0b0000_0100_0000_0000;
pub const CPU_FLAG_OVERFLOW: u32 = 0b0000_1000_0000_0000;
pub const CPU_FLAG_IOPL: u32 = 0b0011_0000_0000_0000;
pub const CPU_FLAG_NT: u32 = 0b0100_0000_0000_0000;
pub const CPU_FLAG_RF: u32 = 0x0001_0000;
pub const CPU_FLAG_VM: u32 = 0x0002_0000;

pub const CPU_FLAGS_ARITH: u32 =
    CPU_FLAG_CARRY | CPU_FLAG_PARITY | CPU_FLAG_AUX_CARRY | CPU_FLAG_ZERO | CPU_FLAG_SIGN | CPU_FLAG_OVERFLOW;
pub const CPU_FLAGS_RESERVED_ON: u32 = CPU_FLAG_RESERVED1;
/// Bits of EFLAGS that exist on the 80286.
pub const CPU_FLAGS_286_MASK: u32 = 0x7FD5;
/// Bits of EFLAGS that exist on the 80386.
pub const CPU_FLAGS_386_MASK: u32 = 0x3_7FD5;

// CR0
pub const CR0_PE: u32 = 0x0000_0001;
pub const CR0_MP: u32 = 0x0000_0002;
pub const CR0_EM: u32 = 0x0000_0004;
pub const CR0_TS: u32 = 0x0000_0008;
pub const CR0_ET: u32 = 0x0000_0010;
pub const CR0_PG: u32 = 0x8000_0000;
/// On the 80286 only the MSW exists, and its undefined bits read as 1.
pub const MSW_286_RESERVED: u32 = 0xFFF0;

// DR6 / DR7
pub const DR6_B0: u32 = 0x0001;
pub const DR6_BD: u32 = 0x2000;
pub const DR6_BS: u32 = 0x4000;
pub const DR6_BT: u32 = 0x8000;
pub const DR6_RESERVED: u32 = 0xFFFF_0FF0;
pub const DR7_GD: u32 = 0x2000;
pub const DR7_RESERVED: u32 = 0x0000_0400;

// Pending event bits
pub const EVENT_NMI: u32 = 0x0001;

// Interrupt inhibit bits
pub const INHIBIT_INTERRUPTS: u32 = 0x01;
pub const INHIBIT_DEBUG: u32 = 0x02;
pub const INHIBIT_INTERRUPTS_AND_DEBUG: u32 = INHIBIT_INTERRUPTS | INHIBIT_DEBUG;

pub const REG_EAX: usize = 0;
pub const REG_ECX: usize = 1;
pub const REG_EDX: usize = 2;
pub const REG_EBX: usize = 3;
pub const REG_ESP: usize = 4;
pub const REG_EBP: usize = 5;
pub const REG_ESI: usize = 6;
pub const REG_EDI: usize = 7;

/// Segment registers in encoding order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Segment {
    ES = 0,
    CS = 1,
    SS = 2,
    #[default]
    DS = 3,
    FS = 4,
    GS = 5,
}

impl Segment {
    pub fn from_index(index: u8) -> Option<Segment> {
        match index {
            0 => Some(Segment::ES),
            1 => Some(Segment::CS),
            2 => Some(Segment::SS),
            3 => Some(Segment::DS),
            4 => Some(Segment::FS),
            5 => Some(Segment::GS),
            _ => None,
        }
    }
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
    pub fn name(self) -> &'static str {
        match self {
            Segment::ES => "ES",
            Segment::CS => "CS",
            Segment::SS => "SS",
            Segment::DS => "DS",
            Segment::FS => "FS",
            Segment::GS => "GS",
        }
    }
}

/// Base and limit of the GDT or IDT.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorTable {
    pub base: u32,
    pub limit: u16,
}

/// Volatile run state that is not part of the architectural register file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuState {
    pub activity: ActivityState,
    /// Latched events waiting for an instruction boundary.
    pub pending_event: u32,
    /// Events currently blocked (NMI while an NMI handler runs).
    pub event_mask: u32,
    /// DR6 bits of debug traps to report at the next instruction boundary.
    pub debug_trap: u32,
    pub inhibit_mask: u32,
    pub inhibit_icount: u64,
}

/// Execution unit cycle breakdown of the current instruction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InstrCycles {
    pub base: u32,
    pub pmode: u32,
    pub rep: u32,
    pub extra: u32,
}

impl InstrCycles {
    #[inline]
    pub fn eu(&self) -> u32 {
        self.base + self.pmode + self.rep + self.extra
    }
}

pub struct Intel386 {
    pub(crate) cpu_type: CpuType,
    pub(crate) regs: [GeneralRegister; 8],
    pub(crate) eip: u32,
    pub(crate) eflags: u32,
    pub(crate) sregs: [SegmentRegister; 6],
    pub(crate) tr: SegmentRegister,
    pub(crate) ldtr: SegmentRegister,
    pub(crate) gdtr: DescriptorTable,
    pub(crate) idtr: DescriptorTable,
    pub(crate) cr: [u32; 4],
    pub(crate) dr: [u32; 8],
    pub(crate) test_regs: [u32; 2],
    pub(crate) cpl: u8,
    pub(crate) state: CpuState,
    pub(crate) bus: CpuBus,
    pub(crate) tlb: Tlb,
    pub(crate) lines: Arc<InterruptLines>,

    pub(crate) i: Instruction,
    pub(crate) cycles: InstrCycles,
    /// EIP and ESP at the start of the current instruction, restored when it faults.
    pub(crate) prev_eip: u32,
    pub(crate) prev_esp: u32,
    /// Decode cursor.
    pub(crate) fetch_eip: u32,
    pub(crate) fetch_len: usize,

    /// Class of the exception being delivered, and the nesting depth of deliveries.
    pub(crate) curr_exception: Option<ExceptionClass>,
    pub(crate) exception_depth: u32,
    /// Error codes pushed while delivering a hardware event carry EXT.
    pub(crate) ext: bool,

    pub(crate) icount: u64,
    pub(crate) total_cycles: u64,
    pub(crate) hlda: bool,
    pub(crate) trace_enabled: bool,
    pub(crate) triple_fault_policy: TripleFaultPolicy,
}

impl Intel386 {
    pub fn new(config: &CoreConfig, io: Box<dyn IoBus>, lines: Arc<InterruptLines>) -> Self {
        let mut cpu = Self {
            cpu_type: config.cpu_type,
            regs: [GeneralRegister::default(); 8],
            eip: 0,
            eflags: CPU_FLAGS_RESERVED_ON,
            sregs: [SegmentRegister::default(); 6],
            tr: SegmentRegister::default(),
            ldtr: SegmentRegister::default(),
            gdtr: DescriptorTable::default(),
            idtr: DescriptorTable::default(),
            cr: [0; 4],
            dr: [0; 8],
            test_regs: [0; 2],
            cpl: 0,
            state: CpuState::default(),
            bus: CpuBus::new(config, io),
            tlb: Tlb::new(),
            lines,
            i: Instruction::default(),
            cycles: InstrCycles::default(),
            prev_eip: 0,
            prev_esp: 0,
            fetch_eip: 0,
            fetch_len: 0,
            curr_exception: None,
            exception_depth: 0,
            ext: false,
            icount: 0,
            total_cycles: 0,
            hlda: false,
            trace_enabled: config.trace,
            triple_fault_policy: config.on_triple_fault,
        };
        cpu.reset();
        cpu
    }

    /// Hardware reset. RAM and mappings are preserved.
    pub fn reset(&mut self) {
        log::debug!("CPU Resetting...");
        for reg in self.regs.iter_mut() {
            reg.set_dword(0);
        }
        if self.cpu_type.is_386() {
            // Component and stepping ID of the 386SX.
            self.regs[REG_EDX].set_dword(0x2308);
        }
        self.eflags = CPU_FLAGS_RESERVED_ON;
        self.eip = 0xFFF0;

        for seg in [Segment::ES, Segment::SS, Segment::DS, Segment::FS, Segment::GS] {
            self.sregs[seg.index()] = SegmentRegister::real_mode(0, false);
        }
        let mut cs = SegmentRegister::real_mode(0xF000, true);
        // The first code fetches come from the top of the address space until CS is reloaded.
        cs.cache.base = 0xFF_0000;
        self.sregs[Segment::CS.index()] = cs;

        self.gdtr = DescriptorTable { base: 0, limit: 0xFFFF };
        self.idtr = DescriptorTable { base: 0, limit: 0x3FF };
        self.ldtr = SegmentRegister::system_null();
        self.tr = SegmentRegister::system_null();

        self.cr = [0; 4];
        self.cr[0] = if self.cpu_type.is_386() { CR0_ET } else { MSW_286_RESERVED };
        self.dr = [0; 8];
        self.dr[6] = DR6_RESERVED;
        self.dr[7] = DR7_RESERVED;
        self.cpl = 0;

        self.state = CpuState::default();
        self.curr_exception = None;
        self.exception_depth = 0;
        self.ext = false;
        self.hlda = false;
        self.i = Instruction::default();
        self.cycles = InstrCycles::default();

        self.tlb.flush();
        self.bus.reset();
        self.bus.pq_invalidate(self.cs_base().wrapping_add(self.eip));
        self.update_fetch_limit();
    }

    /// Remove power. The CPU will not execute until reset.
    pub fn power_off(&mut self) {
        self.state.activity = ActivityState::PowerOff;
    }

    pub fn cpu_type(&self) -> CpuType {
        self.cpu_type
    }

    pub fn bus(&self) -> &CpuBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut CpuBus {
        &mut self.bus
    }

    pub fn activity(&self) -> ActivityState {
        self.state.activity
    }

    pub fn state(&self) -> &CpuState {
        &self.state
    }

    pub fn eip(&self) -> u32 {
        self.eip
    }

    pub fn set_eip(&mut self, eip: u32) {
        self.eip = eip;
        self.pq_invalidate();
    }

    pub fn eflags(&self) -> u32 {
        self.eflags
    }

    pub fn cpl(&self) -> u8 {
        self.cpl
    }

    pub fn cr(&self, n: usize) -> u32 {
        self.cr[n & 3]
    }

    pub fn dr(&self, n: usize) -> u32 {
        self.dr[n & 7]
    }

    pub fn segment(&self, seg: Segment) -> &SegmentRegister {
        &self.sregs[seg.index()]
    }

    pub fn tr(&self) -> &SegmentRegister {
        &self.tr
    }

    pub fn ldtr(&self) -> &SegmentRegister {
        &self.ldtr
    }

    pub fn gdtr(&self) -> DescriptorTable {
        self.gdtr
    }

    pub fn idtr(&self) -> DescriptorTable {
        self.idtr
    }

    pub fn instruction_count(&self) -> u64 {
        self.icount
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn last_instruction(&self) -> &Instruction {
        &self.i
    }

    pub fn set_trace(&mut self, enabled: bool) {
        self.trace_enabled = enabled;
    }

    #[inline]
    pub(crate) fn cs_base(&self) -> u32 {
        self.sregs[Segment::CS.index()].cache.base
    }

    /// Set the A20 gate. Translations cached with the old wrap behavior are discarded.
    pub fn set_a20(&mut self, enabled: bool) {
        if self.bus.memory.set_a20(enabled) {
            log::debug!("A20 {}", if enabled { "enabled" } else { "disabled" });
            self.tlb.flush();
            self.pq_invalidate();
        }
    }

    /// Invalidate the prefetch queue. Fetching resumes at CS:EIP.
    #[inline]
    pub(crate) fn pq_invalidate(&mut self) {
        let address = self.cs_base().wrapping_add(self.eip);
        self.bus.pq_invalidate(address);
        self.update_fetch_limit();
    }

    /// The prefetcher never reads past the end of the code segment.
    pub(crate) fn update_fetch_limit(&mut self) {
        let cs = &self.sregs[Segment::CS.index()].cache;
        self.bus.queue.set_fetch_limit(cs.base.wrapping_add(cs.limit));
    }
}
