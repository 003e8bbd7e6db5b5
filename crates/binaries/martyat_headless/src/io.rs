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

    io.rs

    A minimal AT port board for headless runs. Records BIOS POST codes written to port
    80h and collects text written to the E9h debug port.

*/
use std::{cell::RefCell, rc::Rc};

use martyat_core::bus::IoBus;

pub const POST_CODE_PORT: u16 = 0x80;
pub const DEBUG_PORT: u16 = 0xE9;

/// What the guest reported through the diagnostic ports.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub post_codes: Vec<u8>,
    pub debug_text: String,
    pub shutdowns: u32,
}

/// The board keeps a shared handle to the diagnostics so the runner can read them while the
/// machine owns the board.
#[derive(Default)]
pub struct HeadlessIo {
    diag: Rc<RefCell<Diagnostics>>,
    line: String,
}

impl HeadlessIo {
    pub fn new() -> (Self, Rc<RefCell<Diagnostics>>) {
        let diag = Rc::new(RefCell::new(Diagnostics::default()));
        (
            Self {
                diag: diag.clone(),
                line: String::new(),
            },
            diag,
        )
    }
}

impl IoBus for HeadlessIo {
    fn io_read_u8(&mut self, port: u16) -> u8 {
        match port {
            // Bochs-style port E9 detection.
            DEBUG_PORT => 0xE9,
            _ => 0xFF,
        }
    }

    fn io_write_u8(&mut self, port: u16, data: u8) {
        match port {
            POST_CODE_PORT => {
                log::debug!("POST code: {:02X}", data);
                self.diag.borrow_mut().post_codes.push(data);
            }
            DEBUG_PORT => {
                self.diag.borrow_mut().debug_text.push(data as char);
                if data == b'\n' {
                    log::info!("guest: {}", self.line);
                    self.line.clear();
                }
                else {
                    self.line.push(data as char);
                }
            }
            _ => log::trace!("Unhandled write to port {:04X}: {:02X}", port, data),
        }
    }

    fn io_wait_states(&self, _port: u16) -> u32 {
        // ISA bus cycles are slow relative to the CPU.
        4
    }

    fn shutdown(&mut self) {
        self.diag.borrow_mut().shutdowns += 1;
    }
}
