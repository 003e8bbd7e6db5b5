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

    cpu_386::state.rs

    CPU save states. A snapshot is a fixed little-endian layout holding the
    register file, the descriptor caches, the prefetch queue and all of RAM.

*/
use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use crate::cpu_common::{ActivityState, CpuError, CpuType};

use super::{descriptor::*, *};

pub const SNAPSHOT_VERSION: u16 = 2;

const CACHE_BIG: u8 = 0x01;
const CACHE_GRANULAR: u8 = 0x02;
const CACHE_VALID: u8 = 0x04;

#[binrw]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[brw(little)]
pub struct SegmentSnapshot {
    pub selector: u16,
    pub base: u32,
    pub limit: u32,
    pub access: u8,
    pub flags: u8,
}

impl From<&SegmentRegister> for SegmentSnapshot {
    fn from(reg: &SegmentRegister) -> Self {
        let c = &reg.cache;
        SegmentSnapshot {
            selector: reg.value(),
            base: c.base,
            limit: c.limit,
            access: c.access,
            flags: (c.big as u8 * CACHE_BIG) | (c.granular as u8 * CACHE_GRANULAR) | (c.valid as u8 * CACHE_VALID),
        }
    }
}

impl From<&SegmentSnapshot> for SegmentRegister {
    fn from(s: &SegmentSnapshot) -> Self {
        SegmentRegister {
            selector: Selector::from_value(s.selector),
            cache: SegmentCache {
                base: s.base,
                limit: s.limit,
                access: s.access,
                big: s.flags & CACHE_BIG != 0,
                granular: s.flags & CACHE_GRANULAR != 0,
                valid: s.flags & CACHE_VALID != 0,
            },
        }
    }
}

#[binrw]
#[derive(Clone, Debug, Default)]
#[brw(little, magic = b"MATS")]
pub struct CpuSnapshot {
    pub version: u16,
    pub cpu_type: u8,

    pub activity: u8,
    pub pending_event: u32,
    pub event_mask: u32,
    pub debug_trap: u32,
    pub inhibit_mask: u32,
    pub inhibit_icount: u64,

    pub regs: [u32; 8],
    pub eip: u32,
    pub eflags: u32,
    pub cpl: u8,
    pub sregs: [SegmentSnapshot; 6],
    pub tr: SegmentSnapshot,
    pub ldtr: SegmentSnapshot,
    pub gdt_base: u32,
    pub gdt_limit: u16,
    pub idt_base: u32,
    pub idt_limit: u16,
    pub cr: [u32; 4],
    pub dr: [u32; 8],
    pub test_regs: [u32; 2],

    pub icount: u64,
    pub total_cycles: u64,
    pub refresh_counter: u64,

    pub a20: u8,
    pub queue_address: u32,
    /// Physical address of the next prefetch, or 0xFFFF_FFFF when it must be translated.
    pub queue_fetch_phys: u32,
    pub queue_len: u8,
    #[br(count = queue_len)]
    pub queue: Vec<u8>,
    pub ram_len: u32,
    #[br(count = ram_len)]
    pub ram: Vec<u8>,
}

const NO_FETCH_PHYS: u32 = 0xFFFF_FFFF;

impl Intel386 {
    /// Serialize the processor and RAM. Mappings and devices are not part of the snapshot.
    pub fn save_state(&self) -> Result<Vec<u8>, CpuError> {
        let queue = self.bus.queue();
        let mut queue_bytes = vec![0u8; queue.len()];
        queue.to_slice(&mut queue_bytes);

        let ram = self.bus.memory().ram().to_vec();
        let snapshot = CpuSnapshot {
            version: SNAPSHOT_VERSION,
            cpu_type: self.cpu_type as u8,
            activity: self.state.activity.to_u8(),
            pending_event: self.state.pending_event,
            event_mask: self.state.event_mask,
            debug_trap: self.state.debug_trap,
            inhibit_mask: self.state.inhibit_mask,
            inhibit_icount: self.state.inhibit_icount,
            regs: std::array::from_fn(|n| self.regs[n].dword()),
            eip: self.eip,
            eflags: self.eflags,
            cpl: self.cpl,
            sregs: std::array::from_fn(|n| SegmentSnapshot::from(&self.sregs[n])),
            tr: SegmentSnapshot::from(&self.tr),
            ldtr: SegmentSnapshot::from(&self.ldtr),
            gdt_base: self.gdtr.base,
            gdt_limit: self.gdtr.limit,
            idt_base: self.idtr.base,
            idt_limit: self.idtr.limit,
            cr: self.cr,
            dr: self.dr,
            test_regs: self.test_regs,
            icount: self.icount,
            total_cycles: self.total_cycles,
            refresh_counter: self.bus.refresh_counter(),
            a20: self.bus.memory().a20_enabled() as u8,
            queue_address: queue.head_address(),
            queue_fetch_phys: queue.fetch_phys().unwrap_or(NO_FETCH_PHYS),
            queue_len: queue_bytes.len() as u8,
            queue: queue_bytes,
            ram_len: ram.len() as u32,
            ram,
        };

        let mut cursor = Cursor::new(Vec::new());
        snapshot
            .write(&mut cursor)
            .map_err(|e| CpuError::StateError(format!("failed to write snapshot: {}", e)))?;
        log::debug!("Saved state: {} bytes", cursor.get_ref().len());
        Ok(cursor.into_inner())
    }

    /// Restore a snapshot produced by [Intel386::save_state]. The snapshot must come from the
    /// same CPU type and RAM size. The TLB starts out empty.
    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<(), CpuError> {
        let snapshot = CpuSnapshot::read(&mut Cursor::new(bytes))
            .map_err(|e| CpuError::StateError(format!("failed to read snapshot: {}", e)))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CpuError::StateError(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        if snapshot.cpu_type != self.cpu_type as u8 {
            let saved = if snapshot.cpu_type == CpuType::Intel80386SX as u8 {
                CpuType::Intel80386SX
            }
            else {
                CpuType::Intel80286
            };
            return Err(CpuError::StateError(format!(
                "snapshot is for {}, this machine has {}",
                saved, self.cpu_type
            )));
        }
        if snapshot.ram.len() != self.bus.memory().ram().len() {
            return Err(CpuError::StateError(format!(
                "snapshot RAM size {:X} does not match configured size {:X}",
                snapshot.ram.len(),
                self.bus.memory().ram().len()
            )));
        }
        let activity = ActivityState::from_u8(snapshot.activity)
            .ok_or_else(|| CpuError::StateError(format!("bad activity state {}", snapshot.activity)))?;

        self.state = CpuState {
            activity,
            pending_event: snapshot.pending_event,
            event_mask: snapshot.event_mask,
            debug_trap: snapshot.debug_trap,
            inhibit_mask: snapshot.inhibit_mask,
            inhibit_icount: snapshot.inhibit_icount,
        };
        for (reg, value) in self.regs.iter_mut().zip(snapshot.regs.iter()) {
            reg.set_dword(*value);
        }
        self.eip = snapshot.eip;
        self.eflags = snapshot.eflags;
        self.cpl = snapshot.cpl;
        for (reg, saved) in self.sregs.iter_mut().zip(snapshot.sregs.iter()) {
            *reg = SegmentRegister::from(saved);
        }
        self.tr = SegmentRegister::from(&snapshot.tr);
        self.ldtr = SegmentRegister::from(&snapshot.ldtr);
        self.gdtr = DescriptorTable {
            base: snapshot.gdt_base,
            limit: snapshot.gdt_limit,
        };
        self.idtr = DescriptorTable {
            base: snapshot.idt_base,
            limit: snapshot.idt_limit,
        };
        self.cr = snapshot.cr;
        self.dr = snapshot.dr;
        self.test_regs = snapshot.test_regs;
        self.icount = snapshot.icount;
        self.total_cycles = snapshot.total_cycles;

        self.curr_exception = None;
        self.exception_depth = 0;
        self.ext = false;
        self.hlda = false;

        self.bus.memory_mut().ram_mut().copy_from_slice(&snapshot.ram);
        self.bus.memory_mut().set_a20(snapshot.a20 != 0);
        self.bus.set_refresh_counter(snapshot.refresh_counter);
        self.bus.queue.restore(snapshot.queue_address, &snapshot.queue);
        let fetch_phys = (snapshot.queue_fetch_phys != NO_FETCH_PHYS).then_some(snapshot.queue_fetch_phys);
        self.bus.queue.set_fetch_phys(fetch_phys);
        self.update_fetch_limit();
        self.tlb_flush();

        log::debug!(
            "Restored state at {:04X}:{:08X}",
            self.sregs[Segment::CS.index()].value(),
            self.eip
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{config::CoreConfig, testutil::TestMachine};

    use super::*;

    /// mov cx,10; l: add ax,cx; loop l; hlt
    const PROGRAM: [u8; 9] = [0xB9, 0x0A, 0x00, 0x01, 0xC8, 0xE2, 0xFC, 0xF4, 0x90];

    #[test]
    fn test_round_trip_continues_identically() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        m.load_program(0x1000, &PROGRAM);
        m.run(5);
        let saved = m.cpu().save_state().unwrap();

        m.run(40);
        let eax = m.cpu().reg16(REG_EAX as u8);
        let cycles = m.cpu().total_cycles();
        assert_eq!(eax, 55);

        let mut other = TestMachine::new(CpuType::Intel80386SX);
        other.cpu_mut().restore_state(&saved).unwrap();
        assert_eq!(other.cpu().segment(Segment::CS), m.cpu().segment(Segment::CS));
        other.run(40);
        assert_eq!(other.cpu().reg16(REG_EAX as u8), eax);
        assert_eq!(other.cpu().eip(), m.cpu().eip());
        assert_eq!(other.cpu().total_cycles(), cycles);
        assert_eq!(other.cpu().bus().memory().ram(), m.cpu().bus().memory().ram());
    }

    #[test]
    fn test_round_trip_keeps_refresh_phase() {
        let mut config = CoreConfig::default();
        config.cpu_type = CpuType::Intel80286;
        config.refresh.enabled = true;
        config.refresh.penalty = 4;

        // mov cx,100; l: add ax,cx; loop l; hlt
        let program = [0xB9, 0x64, 0x00, 0x01, 0xC8, 0xE2, 0xFC, 0xF4];
        let mut m = TestMachine::with_config(config.clone());
        m.load_program(0x1000, &program);
        m.run(7);
        let counter = m.cpu().bus().refresh_counter();
        assert_ne!(counter, 0);
        let saved = m.cpu().save_state().unwrap();

        m.run(250);
        assert_eq!(m.cpu().reg16(REG_EAX as u8), 5050);

        let mut other = TestMachine::with_config(config);
        other.cpu_mut().restore_state(&saved).unwrap();
        assert_eq!(other.cpu().bus().refresh_counter(), counter);
        other.run(250);
        assert_eq!(other.cpu().reg16(REG_EAX as u8), 5050);
        assert_eq!(other.cpu().total_cycles(), m.cpu().total_cycles());
    }

    #[test]
    fn test_rejects_bad_snapshots() {
        let mut m = TestMachine::new(CpuType::Intel80286);
        let mut saved = m.cpu().save_state().unwrap();

        let mut other = TestMachine::new(CpuType::Intel80386SX);
        assert!(matches!(other.cpu_mut().restore_state(&saved), Err(CpuError::StateError(_))));

        // Version follows the magic.
        saved[4] = 0x7F;
        assert!(matches!(m.cpu_mut().restore_state(&saved), Err(CpuError::StateError(_))));

        saved[0] = b'X';
        assert!(matches!(m.cpu_mut().restore_state(&saved), Err(CpuError::StateError(_))));

        assert!(matches!(m.cpu_mut().restore_state(&[]), Err(CpuError::StateError(_))));
    }
}
