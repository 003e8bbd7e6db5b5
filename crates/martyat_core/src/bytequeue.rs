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

    bytequeue.rs

    Implements the ByteQueue trait. ByteQueue is implemented by the CPU, which
    fetches through its prefetch queue and may fault, and by SliceQueue, which decodes
    from a plain byte slice for disassembly and tests.

*/
use crate::cpu_common::CpuException;

pub trait ByteQueue {
    /// Number of bytes consumed since the start of the current instruction.
    fn tell(&self) -> usize;

    fn q_read_u8(&mut self) -> Result<u8, CpuException>;

    fn q_read_i8(&mut self) -> Result<i8, CpuException> {
        Ok(self.q_read_u8()? as i8)
    }

    fn q_read_u16(&mut self) -> Result<u16, CpuException> {
        let lo = self.q_read_u8()?;
        let hi = self.q_read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn q_read_u32(&mut self) -> Result<u32, CpuException> {
        let lo = self.q_read_u16()?;
        let hi = self.q_read_u16()?;
        Ok(lo as u32 | (hi as u32) << 16)
    }
}

/// A ByteQueue over a byte slice. Reading past the end returns open-bus bytes.
pub struct SliceQueue<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> SliceQueue<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }
}

impl ByteQueue for SliceQueue<'_> {
    fn tell(&self) -> usize {
        self.cursor
    }

    fn q_read_u8(&mut self) -> Result<u8, CpuException> {
        let b = self.bytes.get(self.cursor).copied().unwrap_or(0xFF);
        self.cursor += 1;
        Ok(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_queue() {
        let bytes = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let mut q = SliceQueue::new(&bytes);
        assert_eq!(q.q_read_u16().unwrap(), 0x1234);
        assert_eq!(q.q_read_u32().unwrap(), 0x12345678);
        assert_eq!(q.tell(), 6);
        assert_eq!(q.q_read_u8().unwrap(), 0xFF);
    }
}
