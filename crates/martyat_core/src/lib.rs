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

    lib.rs

    Main emulator core

*/
//! The `martyat_core` crate implements a cycle-counted Intel 80286 / 80386SX processor core,
//! together with its paging unit and the physical memory bus it runs against.
//!
//! Devices live outside of the core. They attach through [bus::MemoryMappedDevice] mappings,
//! the [bus::IoBus] port dispatch trait, and the [machine::InterruptLines] signal handle.

#![allow(dead_code)]

#[macro_use]
pub mod cpu_common;

pub mod bus;
pub mod bytequeue;
pub mod config;
pub mod cpu_386;
pub mod machine;

#[cfg(test)]
pub(crate) mod testutil;
