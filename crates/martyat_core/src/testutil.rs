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

    testutil.rs

    A small machine for unit tests: 1MB of RAM, no refresh, and helpers to poke
    programs and descriptor tables into memory.

*/
use std::sync::Arc;

use crate::{
    bus::NullIo,
    config::CoreConfig,
    cpu_386::{Intel386, Segment},
    cpu_common::{CpuType, StepResult},
    machine::{InterruptLines, Machine},
};

pub(crate) struct TestMachine {
    machine: Machine,
}

impl TestMachine {
    pub(crate) fn new(cpu_type: CpuType) -> Self {
        let mut config = CoreConfig::default();
        config.cpu_type = cpu_type;
        config.refresh.enabled = false;
        Self::with_config(config)
    }

    pub(crate) fn with_config(config: CoreConfig) -> Self {
        let machine = Machine::new(config, Box::new(NullIo)).unwrap();
        Self { machine }
    }

    pub(crate) fn cpu(&self) -> &Intel386 {
        self.machine.cpu()
    }

    pub(crate) fn cpu_mut(&mut self) -> &mut Intel386 {
        self.machine.cpu_mut()
    }

    pub(crate) fn lines(&self) -> Arc<InterruptLines> {
        self.machine.lines()
    }

    pub(crate) fn load_rom(&mut self, base: u32, data: Vec<u8>) {
        self.machine.load_rom(base, data).unwrap();
    }

    fn ram(&mut self) -> &mut [u8] {
        self.machine.cpu_mut().bus_mut().memory_mut().ram_mut()
    }

    pub(crate) fn poke_bytes(&mut self, address: u32, bytes: &[u8]) {
        let start = address as usize;
        self.ram()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn poke_u8(&mut self, address: u32, value: u8) {
        self.poke_bytes(address, &[value]);
    }

    pub(crate) fn poke_u16(&mut self, address: u32, value: u16) {
        self.poke_bytes(address, &value.to_le_bytes());
    }

    pub(crate) fn poke_u32(&mut self, address: u32, value: u32) {
        self.poke_bytes(address, &value.to_le_bytes());
    }

    pub(crate) fn peek_u8(&self, address: u32) -> u8 {
        self.machine.cpu().bus().memory().ram()[address as usize]
    }

    pub(crate) fn peek_u16(&self, address: u32) -> u16 {
        u16::from_le_bytes([self.peek_u8(address), self.peek_u8(address + 1)])
    }

    pub(crate) fn peek_u32(&self, address: u32) -> u32 {
        self.peek_u16(address) as u32 | (self.peek_u16(address + 2) as u32) << 16
    }

    /// Write a segment or system descriptor into the table at `table`. `flags` holds the G and
    /// D/B bits of byte 6.
    pub(crate) fn poke_descriptor(&mut self, table: u32, index: u32, base: u32, limit: u32, access: u8, flags: u8) {
        let bytes = [
            limit as u8,
            (limit >> 8) as u8,
            base as u8,
            (base >> 8) as u8,
            (base >> 16) as u8,
            access,
            (flags & 0xF0) | ((limit >> 16) as u8 & 0x0F),
            (base >> 24) as u8,
        ];
        self.poke_bytes(table + index * 8, &bytes);
    }

    /// Copy a program to `address` and point CS:IP at it, in real mode with segment 0.
    pub(crate) fn load_program(&mut self, address: u32, bytes: &[u8]) {
        self.poke_bytes(address, bytes);
        let cpu = self.machine.cpu_mut();
        cpu.load_segment_real(Segment::CS, 0);
        cpu.set_eip(address);
    }

    pub(crate) fn step(&mut self) -> (StepResult, u32) {
        self.machine.step().unwrap()
    }

    /// Run `steps` steps and return the cycles they took.
    pub(crate) fn run(&mut self, steps: usize) -> u64 {
        (0..steps).map(|_| self.step().1 as u64).sum()
    }
}
