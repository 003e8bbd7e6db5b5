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

    machine.rs

    The machine owns the CPU, and through it the bus, memory and TLB. InterruptLines
    is the handle devices on other threads use to signal the processor.

*/
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    bus::{memory::MEM_BLOCK_SIZE, IoBus, MappingId, RomDevice, BUS_CYCLE, MAP_READ},
    config::CoreConfig,
    cpu_386::Intel386,
    cpu_common::{CpuError, StepResult},
};

/// INTR, NMI and HRQ. INTR and HRQ are levels; NMI is an edge latched until the processor
/// takes it.
#[derive(Debug, Default)]
pub struct InterruptLines {
    intr: AtomicBool,
    nmi: AtomicBool,
    hrq: AtomicBool,
}

impl InterruptLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise_intr(&self) {
        self.intr.store(true, Ordering::Release);
    }

    pub fn clear_intr(&self) {
        self.intr.store(false, Ordering::Release);
    }

    #[inline]
    pub fn intr(&self) -> bool {
        self.intr.load(Ordering::Acquire)
    }

    pub fn deliver_nmi(&self) {
        self.nmi.store(true, Ordering::Release);
    }

    /// Consume a latched NMI.
    #[inline]
    pub fn take_nmi(&self) -> bool {
        self.nmi.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn nmi_pending(&self) -> bool {
        self.nmi.load(Ordering::Acquire)
    }

    pub fn set_hrq(&self, state: bool) {
        self.hrq.store(state, Ordering::Release);
    }

    #[inline]
    pub fn hrq(&self) -> bool {
        self.hrq.load(Ordering::Acquire)
    }
}

/// Why [Machine::run] stopped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunExit {
    /// The cycle budget was used up.
    Cycles,
    Shutdown,
    PowerOff,
}

pub struct Machine {
    config: CoreConfig,
    cpu: Intel386,
    lines: Arc<InterruptLines>,
}

impl Machine {
    /// Build a machine with RAM mapped from address 0 and the given port I/O board.
    pub fn new(config: CoreConfig, io: Box<dyn IoBus>) -> Result<Self, CpuError> {
        config.validate()?;
        let lines = Arc::new(InterruptLines::new());
        let mut cpu = Intel386::new(&config, io, lines.clone());
        cpu.bus_mut()
            .memory_mut()
            .add_ram_mapping(0, config.ram_size as u32, config.ram_wait_states)?;
        log::debug!(
            "Created {} machine with {}K of RAM at {}MHz",
            config.cpu_type,
            config.ram_size / 1024,
            config.frequency as f64 / 1_000_000.0
        );
        Ok(Self { config, cpu, lines })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn cpu(&self) -> &Intel386 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Intel386 {
        &mut self.cpu
    }

    /// A handle to the interrupt lines, for devices that signal from other threads.
    pub fn lines(&self) -> Arc<InterruptLines> {
        self.lines.clone()
    }

    /// Map a ROM image at `base`. The window is rounded up to whole 4K blocks.
    pub fn load_rom(&mut self, base: u32, data: Vec<u8>) -> Result<MappingId, CpuError> {
        if data.is_empty() {
            return Err(CpuError::MappingError("ROM image is empty".to_string()));
        }
        let size = (data.len() as u32).div_ceil(MEM_BLOCK_SIZE) * MEM_BLOCK_SIZE;
        log::debug!("Loading {} byte ROM at {:06X}", data.len(), base);
        self.cpu
            .bus_mut()
            .memory_mut()
            .add_mapping(base, size, MAP_READ, Box::new(RomDevice::new(base, data)))
    }

    pub fn reset(&mut self) {
        self.lines.clear_intr();
        self.lines.set_hrq(false);
        self.cpu.reset();
    }

    #[inline]
    pub fn step(&mut self) -> Result<(StepResult, u32), CpuError> {
        self.cpu.step()
    }

    /// Run for at least `cycles` clocks, or until the processor shuts down or loses power.
    /// Returns the exit reason and the clocks actually run.
    pub fn run(&mut self, cycles: u64) -> Result<(RunExit, u64), CpuError> {
        let mut elapsed = 0u64;
        while elapsed < cycles {
            let (result, step_cycles) = self.cpu.step()?;
            match result {
                StepResult::Shutdown => return Ok((RunExit::Shutdown, elapsed)),
                StepResult::PowerOff => return Ok((RunExit::PowerOff, elapsed)),
                // Time passes on the bus while the DMA controller owns it.
                StepResult::BusHold => elapsed += BUS_CYCLE as u64,
                StepResult::Normal | StepResult::Halted => elapsed += step_cycles as u64,
            }
        }
        Ok((RunExit::Cycles, elapsed))
    }

    pub fn save_state(&self) -> Result<Vec<u8>, CpuError> {
        self.cpu.save_state()
    }

    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<(), CpuError> {
        self.cpu.restore_state(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{
        bus::NullIo,
        cpu_386::{Segment, REG_ESP},
        cpu_common::{ActivityState, CpuType},
    };

    fn machine(cpu_type: CpuType) -> Machine {
        let mut config = CoreConfig::default();
        config.cpu_type = cpu_type;
        config.refresh.enabled = false;
        Machine::new(config, Box::new(NullIo)).unwrap()
    }

    /// A 64K BIOS image whose reset vector jumps to F000:E05B, where a HLT waits.
    fn bios() -> Vec<u8> {
        let mut rom = vec![0xFF; 0x10000];
        rom[0xFFF0..0xFFF5].copy_from_slice(&[0xEA, 0x5B, 0xE0, 0x00, 0xF0]);
        rom[0xE05B] = 0xF4;
        rom
    }

    #[test]
    fn test_lines_across_threads() {
        let lines = Arc::new(InterruptLines::new());
        let remote = lines.clone();
        thread::spawn(move || {
            remote.raise_intr();
            remote.deliver_nmi();
        })
        .join()
        .unwrap();
        assert!(lines.intr());
        assert!(lines.nmi_pending());
        assert!(lines.take_nmi());
        assert!(!lines.take_nmi());
        lines.clear_intr();
        assert!(!lines.intr());
    }

    #[test]
    fn test_reset_vector_through_rom_alias() {
        for cpu_type in [CpuType::Intel80286, CpuType::Intel80386SX] {
            let mut m = machine(cpu_type);
            m.load_rom(0xF_0000, bios()).unwrap();
            m.load_rom(0xFF_0000, bios()).unwrap();

            let cpu = m.cpu();
            assert_eq!(cpu.segment(Segment::CS).value(), 0xF000);
            assert_eq!(cpu.eip(), 0xFFF0);
            assert_eq!(cpu.segment(Segment::CS).cache.base, 0xFF_0000);

            // The far jump reloads CS, and execution continues in the low copy.
            m.step().unwrap();
            assert_eq!(m.cpu().segment(Segment::CS).cache.base, 0xF_0000);
            assert_eq!(m.cpu().eip(), 0xE05B);
            assert_eq!(m.step().unwrap().0, StepResult::Halted);
        }
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let mut m = machine(CpuType::Intel80286);
        // No ROM: the reset vector fetches open bus (FF FF), an invalid opcode. With SP at 1
        // every push overruns the stack segment, so #UD escalates to a triple fault.
        m.cpu_mut().set_reg16(REG_ESP as u8, 1);
        let (exit, _) = m.run(100_000).unwrap();
        assert_eq!(exit, RunExit::Shutdown);
        assert_eq!(m.cpu().activity(), ActivityState::Shutdown);

        m.reset();
        assert_eq!(m.cpu().activity(), ActivityState::Active);
    }

    #[test]
    fn test_rom_must_not_be_empty() {
        let mut m = machine(CpuType::Intel80286);
        assert!(matches!(m.load_rom(0xF_0000, Vec::new()), Err(CpuError::MappingError(_))));
    }
}
