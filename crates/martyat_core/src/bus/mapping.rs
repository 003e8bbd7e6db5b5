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

    bus::mapping.rs

    Memory mapping registrations: the device trait, mapping flags and the
    built-in ROM device.

*/
use std::fmt;

/// Index of a mapping in the mapping table. Stable for the lifetime of the mapping.
pub type MappingId = usize;

// Mapping flags, passed to add_mapping().
pub const MAP_READ: u8 = 0b0000_0001;
pub const MAP_WRITE: u8 = 0b0000_0010;
pub const MAP_RW: u8 = MAP_READ | MAP_WRITE;
/// The mapping is on the system board (RAM, shadow RAM). Without it, the mapping is an
/// external (I/O channel) device.
pub const MAP_INTERNAL: u8 = 0b0000_0100;

// Per-block visibility masks, set with Memory::set_visibility().
pub const MEM_READ_DISABLED: u8 = 0b0000;
pub const MEM_READ_EXTERNAL: u8 = 0b0001;
pub const MEM_READ_INTERNAL: u8 = 0b0010;
pub const MEM_READ_ANY: u8 = MEM_READ_EXTERNAL | MEM_READ_INTERNAL;
pub const MEM_WRITE_DISABLED: u8 = 0b0000;
pub const MEM_WRITE_EXTERNAL: u8 = 0b0100;
pub const MEM_WRITE_INTERNAL: u8 = 0b1000;
pub const MEM_WRITE_ANY: u8 = MEM_WRITE_EXTERNAL | MEM_WRITE_INTERNAL;
pub const MEM_ANY: u8 = MEM_READ_ANY | MEM_WRITE_ANY;

pub const CYCLES_BYTE: usize = 0;
pub const CYCLES_WORD: usize = 1;
pub const CYCLES_DWORD: usize = 2;

/// A device that responds to physical memory accesses.
///
/// Only byte handlers are mandatory. A device returns `None` (or `false` for writes) from a wider
/// handler it does not implement natively, and the bus synthesizes the access from narrower ones.
/// Addresses are absolute physical addresses.
pub trait MemoryMappedDevice {
    fn mmio_read_u8(&mut self, address: u32) -> u8;
    fn mmio_read_u16(&mut self, _address: u32) -> Option<u16> {
        None
    }
    fn mmio_read_u32(&mut self, _address: u32) -> Option<u32> {
        None
    }

    fn mmio_write_u8(&mut self, address: u32, data: u8);
    fn mmio_write_u16(&mut self, _address: u32, _data: u16) -> bool {
        false
    }
    fn mmio_write_u32(&mut self, _address: u32, _data: u32) -> bool {
        false
    }

    /// Side-effect free read for debuggers and disassembly.
    fn mmio_peek_u8(&self, _address: u32) -> u8 {
        0xFF
    }
}

pub(crate) enum MappingTarget {
    /// Backed by the system RAM buffer, indexed by physical address.
    Ram,
    Device(Box<dyn MemoryMappedDevice>),
}

pub struct MemoryMapping {
    pub base: u32,
    pub size: u32,
    pub flags: u8,
    pub enabled: bool,
    /// Wait cycles for byte, word and dword accesses.
    pub cycles: [u32; 3],
    pub(crate) target: MappingTarget,
}

impl fmt::Debug for MemoryMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMapping")
            .field("base", &format_args!("{:06X}", self.base))
            .field("size", &format_args!("{:06X}", self.size))
            .field("flags", &self.flags)
            .field("enabled", &self.enabled)
            .field("cycles", &self.cycles)
            .field("ram", &matches!(self.target, MappingTarget::Ram))
            .finish()
    }
}

impl MemoryMapping {
    #[inline]
    pub fn contains(&self, address: u32) -> bool {
        address >= self.base && (address - self.base) < self.size
    }

    #[inline]
    pub fn is_internal(&self) -> bool {
        self.flags & MAP_INTERNAL != 0
    }

    /// Whether this mapping may own reads or writes of a block with the given visibility mask.
    pub(crate) fn visible_for_read(&self, mask: u8) -> bool {
        if self.flags & MAP_READ == 0 {
            return false;
        }
        if self.is_internal() {
            mask & MEM_READ_INTERNAL != 0
        }
        else {
            mask & MEM_READ_EXTERNAL != 0
        }
    }

    pub(crate) fn visible_for_write(&self, mask: u8) -> bool {
        if self.flags & MAP_WRITE == 0 {
            return false;
        }
        if self.is_internal() {
            mask & MEM_WRITE_INTERNAL != 0
        }
        else {
            mask & MEM_WRITE_EXTERNAL != 0
        }
    }
}

/// A read-only memory image. Writes are ignored.
pub struct RomDevice {
    base: u32,
    data: Vec<u8>,
}

impl RomDevice {
    pub fn new(base: u32, data: Vec<u8>) -> Self {
        Self { base, data }
    }

    #[inline]
    fn byte(&self, address: u32) -> u8 {
        let offset = address.wrapping_sub(self.base) as usize;
        self.data.get(offset).copied().unwrap_or(0xFF)
    }
}

impl MemoryMappedDevice for RomDevice {
    fn mmio_read_u8(&mut self, address: u32) -> u8 {
        self.byte(address)
    }

    fn mmio_read_u16(&mut self, address: u32) -> Option<u16> {
        Some(u16::from_le_bytes([self.byte(address), self.byte(address.wrapping_add(1))]))
    }

    fn mmio_write_u8(&mut self, _address: u32, _data: u8) {}

    fn mmio_write_u16(&mut self, _address: u32, _data: u16) -> bool {
        true
    }

    fn mmio_peek_u8(&self, address: u32) -> u8 {
        self.byte(address)
    }
}
