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

    benches::cpu_bench.rs

    Benchmarks for the CPU

*/

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use martyat_core::{
    bus::NullIo,
    config::CoreConfig,
    cpu_common::CpuType,
    machine::Machine,
};

const STEPS_PER_ITER: usize = 1000;

/// Build a machine whose reset vector jumps to 0000:`entry`, with `blocks` copied into RAM.
fn machine_at(cpu_type: CpuType, entry: u16, blocks: &[(usize, &[u8])]) -> Machine {
    let mut config = CoreConfig::default();
    config.cpu_type = cpu_type;
    let mut machine = Machine::new(config, Box::new(NullIo)).unwrap();

    let mut rom = vec![0xF4; 0x10000];
    let [lo, hi] = entry.to_le_bytes();
    rom[0xFFF0..0xFFF5].copy_from_slice(&[0xEA, lo, hi, 0x00, 0x00]);
    machine.load_rom(0xFF_0000, rom).unwrap();

    let ram = machine.cpu_mut().bus_mut().memory_mut().ram_mut();
    for (address, bytes) in blocks {
        ram[*address..*address + bytes.len()].copy_from_slice(bytes);
    }
    machine
}

/// add ax,cx; inc bx; loop; jmp back
const REAL_LOOP: [u8; 7] = [0x01, 0xC8, 0x43, 0xE2, 0xFB, 0xEB, 0xF9];

/// Enter protected mode through LMSW and loop over a store and a segment register load.
const PMODE_ENTRY: [u8; 31] = [
    0x0F, 0x01, 0x16, 0x00, 0x0F, // lgdt [0F00]
    0xB8, 0x01, 0x00, // mov ax,1
    0x0F, 0x01, 0xF0, // lmsw ax
    0xEA, 0x10, 0x10, 0x08, 0x00, // jmp 0008:1010
    0xB8, 0x10, 0x00, // mov ax,10h
    0x8E, 0xD8, // mov ds,ax
    0x8E, 0xD0, // mov ss,ax
    0xA3, 0x00, 0x80, // l: mov [8000],ax
    0x43, // inc bx
    0x8E, 0xC0, // mov es,ax
    0xEB, 0xF8, // jmp l
];

/// GDT pointer at 0F00 and the GDT at 0F08: null, flat code, flat data.
const PMODE_GDT: [u8; 32] = [
    0x17, 0x00, 0x08, 0x0F, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0xFF, 0xFF, 0x00, 0x00, 0x00, 0x9A, 0x00, 0x00, //
    0xFF, 0xFF, 0x00, 0x00, 0x00, 0x92, 0x00, 0x00,
];

fn run_steps(machine: &mut Machine) -> u64 {
    let mut cycles = 0u64;
    for _ in 0..STEPS_PER_ITER {
        let (_, step_cycles) = machine.step().unwrap();
        cycles += step_cycles as u64;
    }
    cycles
}

pub fn cpu_real_mode_loop(c: &mut Criterion) {
    for cpu_type in [CpuType::Intel80286, CpuType::Intel80386SX] {
        let mut machine = machine_at(cpu_type, 0x2000, &[(0x2000, &REAL_LOOP[..])]);
        c.bench_function(&format!("cpu_real_mode_loop_{}", cpu_type), |b| {
            b.iter(|| black_box(run_steps(&mut machine)));
        });
    }
}

pub fn cpu_pmode_loop(c: &mut Criterion) {
    for cpu_type in [CpuType::Intel80286, CpuType::Intel80386SX] {
        let mut machine = machine_at(cpu_type, 0x1000, &[(0x0F00, &PMODE_GDT[..]), (0x1000, &PMODE_ENTRY[..])]);
        // Get through the mode switch before measuring.
        for _ in 0..8 {
            machine.step().unwrap();
        }
        c.bench_function(&format!("cpu_pmode_loop_{}", cpu_type), |b| {
            b.iter(|| black_box(run_steps(&mut machine)));
        });
    }
}

pub fn cpu_decode_bench(c: &mut Criterion) {
    use martyat_core::{bytequeue::SliceQueue, cpu_386::Intel386};

    let stream: [&[u8]; 6] = [
        &[0x01, 0xC8],
        &[0x66, 0x8B, 0x84, 0x24, 0x10, 0x00, 0x00, 0x00],
        &[0xF3, 0xA5],
        &[0x0F, 0xB6, 0x46, 0x08],
        &[0xEA, 0x00, 0x10, 0x08, 0x00],
        &[0x8E, 0xD8],
    ];
    c.bench_function("cpu_decode_bench", |b| {
        b.iter(|| {
            for bytes in stream {
                let mut q = SliceQueue::new(bytes);
                let _ = black_box(Intel386::decode(&mut q, CpuType::Intel80386SX, false));
            }
        });
    });
}

criterion_group!(benches, cpu_real_mode_loop, cpu_pmode_loop, cpu_decode_bench);
criterion_main!(benches);
