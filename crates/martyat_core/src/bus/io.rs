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

    bus::io.rs

    Port I/O dispatch. The board behind the CPU implements IoBus; the core only
    checks permission to perform the access.

*/
pub const OPEN_BUS_IO: u8 = 0xFF;

pub trait IoBus {
    fn io_read_u8(&mut self, _port: u16) -> u8 {
        OPEN_BUS_IO
    }
    fn io_read_u16(&mut self, port: u16) -> u16 {
        u16::from_le_bytes([self.io_read_u8(port), self.io_read_u8(port.wrapping_add(1))])
    }
    fn io_read_u32(&mut self, port: u16) -> u32 {
        self.io_read_u16(port) as u32 | (self.io_read_u16(port.wrapping_add(2)) as u32) << 16
    }

    fn io_write_u8(&mut self, _port: u16, _data: u8) {}
    fn io_write_u16(&mut self, port: u16, data: u16) {
        let bytes = data.to_le_bytes();
        self.io_write_u8(port, bytes[0]);
        self.io_write_u8(port.wrapping_add(1), bytes[1]);
    }
    fn io_write_u32(&mut self, port: u16, data: u32) {
        self.io_write_u16(port, data as u16);
        self.io_write_u16(port.wrapping_add(2), (data >> 16) as u16);
    }

    /// Interrupt acknowledge cycle. Returns the vector of the highest priority pending
    /// interrupt, as the 8259 PIC does.
    fn acknowledge_interrupt(&mut self) -> u8 {
        0x08
    }

    /// Wait states for an I/O access to the given port.
    fn io_wait_states(&self, _port: u16) -> u32 {
        0
    }

    /// The board latched a processor shutdown cycle.
    fn shutdown(&mut self) {}
}

/// A board with nothing attached.
#[derive(Default)]
pub struct NullIo;

impl IoBus for NullIo {}
