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

    bus::mod.rs

    Implement the CPU's external bus. The bus owns physical memory, the prefetch
    queue and the port I/O dispatch, and prices every access in cycles.

*/
pub mod io;
pub mod mapping;
pub mod memory;
pub mod queue;

pub use io::{IoBus, NullIo};
pub use mapping::*;
pub use memory::{Memory, ADDRESS_MASK, ADDRESS_SPACE, OPEN_BUS_BYTE};
pub use queue::PrefetchQueue;

use crate::{config::CoreConfig, cpu_common::InstructionWidth};

/// Clocks in a zero-wait-state bus cycle.
pub const BUS_CYCLE: u32 = 2;
const PAGE_MASK: u32 = 0xFFF;

/// Per-instruction bus activity, cleared at the end of each instruction.
#[derive(Copy, Clone, Debug, Default)]
pub struct BusCycles {
    /// Cycles spent fetching instruction bytes that were not in the queue.
    pub fetch: u32,
    /// Wait cycles of data and I/O reads.
    pub read: u32,
    /// Wait cycles of queued writes.
    pub write: u32,
    /// Number of data bus cycles performed.
    pub accesses: u32,
    pub touched: bool,
}

pub struct CpuBus {
    pub(crate) memory: Memory,
    pub(crate) queue: PrefetchQueue,
    pub(crate) io: Box<dyn IoBus>,
    pub(crate) cycles: BusCycles,
    refresh_enabled: bool,
    refresh_interval: u64,
    refresh_penalty: u32,
    refresh_counter: u64,
}

impl CpuBus {
    pub fn new(config: &CoreConfig, io: Box<dyn IoBus>) -> Self {
        Self {
            memory: Memory::new(config.ram_size),
            queue: PrefetchQueue::new(config.cpu_type.queue_size()),
            io,
            cycles: BusCycles::default(),
            refresh_enabled: config.refresh.enabled,
            refresh_interval: config.refresh_interval_cycles().max(1),
            refresh_penalty: config.refresh.penalty,
            refresh_counter: 0,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn queue(&self) -> &PrefetchQueue {
        &self.queue
    }

    pub fn set_io(&mut self, io: Box<dyn IoBus>) {
        self.io = io;
    }

    /* ------------------------------ Fetching ------------------------------- */

    /// Fetch the word containing `phys` into the queue. An odd address only queues the high
    /// byte. Returns the cycles consumed.
    fn fetch_word(&mut self, phys: u32) -> u32 {
        let mut waits = 0;
        let bytes = self.memory.read_u16(phys & !1, &mut waits).to_le_bytes();
        let next = if phys & 1 != 0 {
            self.queue.push8(bytes[1]);
            phys.wrapping_add(1)
        }
        else {
            self.queue.push8(bytes[0]);
            self.queue.push8(bytes[1]);
            phys.wrapping_add(2)
        };
        self.queue.set_fetch_phys(if next & PAGE_MASK == 0 { None } else { Some(next) });
        BUS_CYCLE + waits
    }

    /// Demand fetch during decode: the queue is empty, so the EU waits for the word.
    pub(crate) fn demand_fetch(&mut self, phys: u32) {
        let cycles = self.fetch_word(phys);
        self.cycles.fetch += cycles;
        self.cycles.touched = true;
    }

    /// Let the prefetcher use `free_cycles` of idle bus time to fill the queue. Prefetching stops
    /// at page boundaries and at the code segment limit.
    pub(crate) fn pq_fill(&mut self, mut free_cycles: u32) {
        while self.queue.has_room_for_fetch() {
            let Some(phys) = self.queue.fetch_phys()
            else {
                break;
            };
            let tail = self.queue.tail_address();
            if tail.wrapping_sub(self.queue.head_address()) > self.queue.fetch_limit().wrapping_sub(self.queue.head_address())
            {
                break;
            }
            let cost = BUS_CYCLE + self.memory.word_cycles(phys);
            if free_cycles < cost {
                break;
            }
            free_cycles -= cost;
            self.fetch_word(phys);
        }
    }

    /// Invalidate the queue. The next fetch starts at `address`.
    #[inline]
    pub(crate) fn pq_invalidate(&mut self, address: u32) {
        self.queue.flush(address);
    }

    /* ---------------------------- Data accesses ---------------------------- */

    #[inline]
    fn count_access(&mut self, phys: u32, width: InstructionWidth) {
        self.cycles.accesses += match width {
            InstructionWidth::Byte => 1,
            InstructionWidth::Word => 1 + (phys & 1),
            InstructionWidth::Dword => 2 + (phys & 1),
        };
        self.cycles.touched = true;
    }

    pub(crate) fn read(&mut self, phys: u32, width: InstructionWidth) -> u32 {
        self.count_access(phys, width);
        match width {
            InstructionWidth::Byte => self.memory.read_u8(phys, &mut self.cycles.read) as u32,
            InstructionWidth::Word => self.memory.read_u16(phys, &mut self.cycles.read) as u32,
            InstructionWidth::Dword => self.memory.read_u32(phys, &mut self.cycles.read),
        }
    }

    pub(crate) fn write(&mut self, phys: u32, width: InstructionWidth, value: u32) {
        self.count_access(phys, width);
        match width {
            InstructionWidth::Byte => self.memory.write_u8(phys, value as u8, &mut self.cycles.write),
            InstructionWidth::Word => self.memory.write_u16(phys, value as u16, &mut self.cycles.write),
            InstructionWidth::Dword => self.memory.write_u32(phys, value, &mut self.cycles.write),
        }
    }

    /// Reads on behalf of the CPU itself (descriptor tables, TSS, page tables). Their cost is
    /// part of the documented instruction timings, so they are not charged.
    pub(crate) fn read_system(&mut self, phys: u32, width: InstructionWidth) -> u32 {
        let mut waits = 0;
        match width {
            InstructionWidth::Byte => self.memory.read_u8(phys, &mut waits) as u32,
            InstructionWidth::Word => self.memory.read_u16(phys, &mut waits) as u32,
            InstructionWidth::Dword => self.memory.read_u32(phys, &mut waits),
        }
    }

    pub(crate) fn write_system(&mut self, phys: u32, width: InstructionWidth, value: u32) {
        let mut waits = 0;
        match width {
            InstructionWidth::Byte => self.memory.write_u8(phys, value as u8, &mut waits),
            InstructionWidth::Word => self.memory.write_u16(phys, value as u16, &mut waits),
            InstructionWidth::Dword => self.memory.write_u32(phys, value, &mut waits),
        }
    }

    /* ------------------------------ Port I/O ------------------------------- */

    pub(crate) fn io_read(&mut self, port: u16, width: InstructionWidth) -> u32 {
        self.cycles.read += self.io.io_wait_states(port);
        self.cycles.accesses += 1;
        self.cycles.touched = true;
        match width {
            InstructionWidth::Byte => self.io.io_read_u8(port) as u32,
            InstructionWidth::Word => self.io.io_read_u16(port) as u32,
            InstructionWidth::Dword => self.io.io_read_u32(port),
        }
    }

    pub(crate) fn io_write(&mut self, port: u16, width: InstructionWidth, value: u32) {
        self.cycles.read += self.io.io_wait_states(port);
        self.cycles.accesses += 1;
        self.cycles.touched = true;
        match width {
            InstructionWidth::Byte => self.io.io_write_u8(port, value as u8),
            InstructionWidth::Word => self.io.io_write_u16(port, value as u16),
            InstructionWidth::Dword => self.io.io_write_u32(port, value),
        }
    }

    /* ------------------------------- Timing -------------------------------- */

    /// Close out the bus activity of an instruction that kept the EU busy for `eu_cycles`.
    /// Returns the total elapsed cycles for the instruction.
    ///
    /// Writes are posted: their wait cycles overlap with the EU cycles not spent on data bus
    /// cycles, and only the excess is charged. Whatever idle bus time remains goes to the
    /// prefetcher.
    pub(crate) fn end_instruction(&mut self, eu_cycles: u32) -> u32 {
        let c = self.cycles;
        let mut free = eu_cycles.saturating_sub(BUS_CYCLE * c.accesses);
        let write_excess = c.write.saturating_sub(free);
        free -= c.write.min(free);
        self.pq_fill(free);

        let mut total = c.fetch + eu_cycles + c.read + write_excess;
        total += self.refresh(total as u64, c.touched);
        self.cycles = BusCycles::default();
        total
    }

    /// Advance the refresh timer. A refresh cycle that falls inside an instruction that used
    /// the bus stalls it.
    fn refresh(&mut self, elapsed: u64, touched: bool) -> u32 {
        if !self.refresh_enabled {
            return 0;
        }
        self.refresh_counter += elapsed;
        if self.refresh_counter >= self.refresh_interval {
            self.refresh_counter %= self.refresh_interval;
            if touched {
                return self.refresh_penalty;
            }
        }
        0
    }

    /// Cycles elapsed since the last refresh.
    pub(crate) fn refresh_counter(&self) -> u64 {
        self.refresh_counter
    }

    pub(crate) fn set_refresh_counter(&mut self, counter: u64) {
        self.refresh_counter = counter % self.refresh_interval;
    }

    pub(crate) fn reset(&mut self) {
        self.queue.flush(0);
        self.cycles = BusCycles::default();
        self.refresh_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bus() -> CpuBus {
        let mut config = CoreConfig::default();
        config.refresh.enabled = false;
        let mut bus = CpuBus::new(&config, Box::new(NullIo));
        bus.memory.add_ram_mapping(0, config.ram_size as u32, 0).unwrap();
        for (i, b) in bus.memory.ram_mut().iter_mut().enumerate().take(0x2000) {
            *b = i as u8;
        }
        bus
    }

    #[test]
    fn test_demand_fetch_and_fill() {
        let mut bus = test_bus();
        bus.pq_invalidate(0x101);
        bus.queue.set_fetch_limit(0xFFFF);
        bus.demand_fetch(0x101);
        assert_eq!(bus.queue.len(), 1);
        assert_eq!(bus.queue.pop(), Some(0x01));
        assert_eq!(bus.cycles.fetch, BUS_CYCLE);
        // Three free cycles buy one word.
        bus.pq_fill(3);
        assert_eq!(bus.queue.len(), 2);
        bus.pq_fill(100);
        assert_eq!(bus.queue.len(), 6);
    }

    #[test]
    fn test_fill_stops_at_page_and_limit() {
        let mut bus = test_bus();
        bus.pq_invalidate(0xFFC);
        bus.queue.set_fetch_limit(0xFFFF);
        bus.demand_fetch(0xFFC);
        bus.pq_fill(100);
        // 0xFFC..0xFFF, then the page boundary stops the prefetcher.
        assert_eq!(bus.queue.len(), 4);

        bus.pq_invalidate(0x10);
        bus.queue.set_fetch_limit(0x13);
        bus.demand_fetch(0x10);
        bus.pq_fill(100);
        assert_eq!(bus.queue.len(), 4);
    }

    #[test]
    fn test_write_overlap() {
        let mut bus = test_bus();
        bus.memory.set_mapping_cycles(0, [2, 2, 4]).unwrap();
        bus.write(0x200, InstructionWidth::Word, 0x1234);
        // 7 EU cycles, one bus cycle of 2: 5 free, 2 write waits fully hidden.
        assert_eq!(bus.end_instruction(7), 7);
        bus.write(0x200, InstructionWidth::Word, 0x1234);
        // 3 EU cycles: 1 free, 1 cycle of write waits left over.
        assert_eq!(bus.end_instruction(3), 4);
    }

    #[test]
    fn test_refresh_penalty() {
        let mut config = CoreConfig::default();
        config.refresh.enabled = true;
        config.refresh.penalty = 5;
        let mut bus = CpuBus::new(&config, Box::new(NullIo));
        let interval = config.refresh_interval_cycles() as u32;
        // No bus activity, no penalty.
        assert_eq!(bus.end_instruction(interval), interval);
        bus.read(0, InstructionWidth::Byte);
        assert_eq!(bus.end_instruction(interval), interval + 5);
    }
}
