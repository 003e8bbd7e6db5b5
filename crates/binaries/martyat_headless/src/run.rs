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

    run.rs

    Implement the main procedure for headless mode: build the machine, map the BIOS,
    optionally restore a snapshot, run, and report.

*/
use std::time::Instant;

use anyhow::{bail, Context};

use martyat_core::{
    cpu_386::Segment,
    machine::{Machine, RunExit},
};

use crate::{config::ConfigFileParams, io::HeadlessIo};

/// Largest BIOS image that fits below the top of the first megabyte.
pub const MAX_BIOS_SIZE: usize = 0x20000;
const ROM_ALIGN: usize = 0x1000;

/// Map a BIOS image so it ends at the top of the first megabyte and, for the reset vector, at
/// the top of the 16MB address space.
pub fn load_bios(machine: &mut Machine, image: Vec<u8>) -> Result<(), anyhow::Error> {
    if image.is_empty() || image.len() > MAX_BIOS_SIZE || image.len() % ROM_ALIGN != 0 {
        bail!(
            "BIOS image must be a non-empty multiple of 4K no larger than {}K, got {} bytes",
            MAX_BIOS_SIZE / 1024,
            image.len()
        );
    }
    let len = image.len() as u32;
    let low = 0x10_0000 - len;
    let high = 0x100_0000 - len;
    log::debug!("Mapping BIOS at {:06X} and {:06X}", low, high);
    machine.load_rom(low, image.clone())?;
    machine.load_rom(high, image)?;
    Ok(())
}

pub fn run_headless(config: &ConfigFileParams) -> Result<(), anyhow::Error> {
    let (io, diag) = HeadlessIo::new();
    let mut machine = Machine::new(config.core.clone(), Box::new(io))?;

    match &config.runner.bios {
        Some(path) => {
            let image = std::fs::read(path).with_context(|| format!("reading BIOS {}", path.display()))?;
            load_bios(&mut machine, image)?;
        }
        None => log::warn!("No BIOS image given, the reset vector will fetch open bus"),
    }

    if let Some(path) = &config.runner.load_state {
        let bytes = std::fs::read(path).with_context(|| format!("reading snapshot {}", path.display()))?;
        machine.restore_state(&bytes)?;
        log::info!("Restored snapshot from {}", path.display());
    }

    let start = Instant::now();
    let (exit, cycles) = machine.run(config.runner.cycles)?;
    let elapsed = start.elapsed();

    let cpu = machine.cpu();
    let mhz = cycles as f64 / elapsed.as_secs_f64().max(f64::EPSILON) / 1_000_000.0;
    println!(
        "{} after {} cycles, {} instructions ({:.1} effective MHz)",
        match exit {
            RunExit::Cycles => "Stopped",
            RunExit::Shutdown => "Shut down",
            RunExit::PowerOff => "Powered off",
        },
        cycles,
        cpu.instruction_count(),
        mhz
    );
    println!(
        "CS:EIP {:04X}:{:08X} EFLAGS {:08X} CR0 {:08X} CPL {}",
        cpu.segment(Segment::CS).value(),
        cpu.eip(),
        cpu.eflags(),
        cpu.cr(0),
        cpu.cpl()
    );
    {
        let diag = diag.borrow();
        if let Some(code) = diag.post_codes.last() {
            println!("Last POST code: {:02X} ({} written)", code, diag.post_codes.len());
        }
    }

    if let Some(path) = &config.runner.save_state {
        let bytes = machine.save_state()?;
        std::fs::write(path, &bytes).with_context(|| format!("writing snapshot {}", path.display()))?;
        log::info!("Wrote {} byte snapshot to {}", bytes.len(), path.display());
    }

    if exit == RunExit::Shutdown {
        log::warn!("The CPU shut down");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use martyat_core::{bus::NullIo, config::CoreConfig, cpu_common::StepResult};

    use super::*;

    fn machine() -> Machine {
        let mut config = CoreConfig::default();
        config.refresh.enabled = false;
        Machine::new(config, Box::new(NullIo)).unwrap()
    }

    #[test]
    fn test_bios_alias() {
        let mut m = machine();
        let mut image = vec![0x90; 0x8000];
        // F000:FFF0 -> jmp F000:8000; hlt there.
        image[0x7FF0..0x7FF5].copy_from_slice(&[0xEA, 0x00, 0x80, 0x00, 0xF0]);
        image[0] = 0xF4;
        load_bios(&mut m, image).unwrap();
        m.step().unwrap();
        assert_eq!(m.cpu().segment(Segment::CS).value(), 0xF000);
        assert_eq!(m.cpu().eip(), 0x8000);
        assert_eq!(m.step().unwrap().0, StepResult::Halted);
    }

    #[test]
    fn test_bios_size_checks() {
        let mut m = machine();
        assert!(load_bios(&mut m, vec![0; 0x1234]).is_err());
        assert!(load_bios(&mut m, vec![0; 0x40000]).is_err());
        assert!(load_bios(&mut m, Vec::new()).is_err());
    }
}
