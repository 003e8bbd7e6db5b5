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

    cpu_386::execute::io.rs

    IN and OUT.

*/
use crate::cpu_common::InstructionWidth;

use super::{super::*, ExecResult};

impl Intel386 {
    fn port_in(&mut self, port: u16, width: InstructionWidth) -> ExecResult {
        self.io_check(port, width.bytes())?;
        let value = self.bus.io_read(port, width);
        trace_print!(self, "IN {:04X} -> {:X}", port, value);
        self.set_reg(width, REG_EAX as u8, value);
        Ok(())
    }

    fn port_out(&mut self, port: u16, width: InstructionWidth) -> ExecResult {
        self.io_check(port, width.bytes())?;
        let value = self.reg(width, REG_EAX as u8);
        trace_print!(self, "OUT {:04X} <- {:X}", port, value);
        self.bus.io_write(port, width, value);
        Ok(())
    }

    pub(crate) fn in_imm(&mut self, width: InstructionWidth) -> ExecResult {
        let port = (self.i.imm & 0xFF) as u16;
        self.port_in(port, width)
    }

    pub(crate) fn in_dx(&mut self, width: InstructionWidth) -> ExecResult {
        let port = self.reg16(REG_EDX as u8);
        self.port_in(port, width)
    }

    pub(crate) fn out_imm(&mut self, width: InstructionWidth) -> ExecResult {
        let port = (self.i.imm & 0xFF) as u16;
        self.port_out(port, width)
    }

    pub(crate) fn out_dx(&mut self, width: InstructionWidth) -> ExecResult {
        let port = self.reg16(REG_EDX as u8);
        self.port_out(port, width)
    }
}
