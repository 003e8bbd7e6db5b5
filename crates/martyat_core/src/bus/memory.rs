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

    bus::memory.rs

    Physical address space. Owns system RAM and the mapping table, and
    dispatches physical accesses to the mapping that owns each 4K block.

*/
use super::mapping::*;
use crate::cpu_common::CpuError;

pub const ADDRESS_SPACE: usize = 0x100_0000;
pub const ADDRESS_MASK: u32 = (ADDRESS_SPACE - 1) as u32;
pub const MEM_BLOCK_SHIFT: u32 = 12;
pub const MEM_BLOCK_SIZE: u32 = 1 << MEM_BLOCK_SHIFT;
pub const MEM_BLOCKS: usize = ADDRESS_SPACE >> MEM_BLOCK_SHIFT;
pub const OPEN_BUS_BYTE: u8 = 0xFF;

const A20_BIT: u32 = 1 << 20;

pub struct Memory {
    ram: Vec<u8>,
    mappings: Vec<Option<MemoryMapping>>,
    read_map: Vec<Option<MappingId>>,
    write_map: Vec<Option<MappingId>>,
    visibility: Vec<u8>,
    a20_mask: u32,
}

impl Memory {
    /// Create the address space with `ram_size` bytes of RAM. RAM is not mapped until
    /// add_ram_mapping() is called.
    pub fn new(ram_size: usize) -> Self {
        Self {
            ram: vec![0; ram_size],
            mappings: Vec::new(),
            read_map: vec![None; MEM_BLOCKS],
            write_map: vec![None; MEM_BLOCKS],
            visibility: vec![MEM_ANY; MEM_BLOCKS],
            a20_mask: ADDRESS_MASK,
        }
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    /// Map system RAM over [base, base+size). The window must lie inside the RAM buffer.
    pub fn add_ram_mapping(&mut self, base: u32, size: u32, wait_states: u32) -> Result<MappingId, CpuError> {
        if (base as usize + size as usize) > self.ram.len() {
            return Err(CpuError::MappingError(format!(
                "RAM window {:06X}+{:06X} exceeds RAM size {:06X}",
                base,
                size,
                self.ram.len()
            )));
        }
        let id = self.insert_mapping(MemoryMapping {
            base,
            size,
            flags: MAP_RW | MAP_INTERNAL,
            enabled: true,
            cycles: [wait_states, wait_states, wait_states * 2],
            target: MappingTarget::Ram,
        })?;
        Ok(id)
    }

    /// Register a device window.
    pub fn add_mapping(
        &mut self,
        base: u32,
        size: u32,
        flags: u8,
        device: Box<dyn MemoryMappedDevice>,
    ) -> Result<MappingId, CpuError> {
        self.insert_mapping(MemoryMapping {
            base,
            size,
            flags,
            enabled: true,
            cycles: [0, 0, 0],
            target: MappingTarget::Device(device),
        })
    }

    fn insert_mapping(&mut self, mapping: MemoryMapping) -> Result<MappingId, CpuError> {
        Self::check_range(mapping.base, mapping.size)?;
        let (base, size) = (mapping.base, mapping.size);
        log::debug!("add_mapping(): {:?}", mapping);
        let id = match self.mappings.iter().position(|m| m.is_none()) {
            Some(slot) => {
                self.mappings[slot] = Some(mapping);
                slot
            }
            None => {
                self.mappings.push(Some(mapping));
                self.mappings.len() - 1
            }
        };
        self.remap(base, size);
        Ok(id)
    }

    fn check_range(base: u32, size: u32) -> Result<(), CpuError> {
        if size == 0
            || base % MEM_BLOCK_SIZE != 0
            || size % MEM_BLOCK_SIZE != 0
            || base as usize + size as usize > ADDRESS_SPACE
        {
            return Err(CpuError::MappingError(format!(
                "mapping {:06X}+{:06X} must be 4K aligned and inside the address space",
                base, size
            )));
        }
        Ok(())
    }

    fn mapping_mut(&mut self, id: MappingId) -> Result<&mut MemoryMapping, CpuError> {
        self.mappings
            .get_mut(id)
            .and_then(|m| m.as_mut())
            .ok_or_else(|| CpuError::MappingError(format!("no mapping with id {}", id)))
    }

    pub fn mapping(&self, id: MappingId) -> Option<&MemoryMapping> {
        self.mappings.get(id).and_then(|m| m.as_ref())
    }

    pub fn resize_mapping(&mut self, id: MappingId, base: u32, size: u32) -> Result<(), CpuError> {
        Self::check_range(base, size)?;
        let mapping = self.mapping_mut(id)?;
        if matches!(mapping.target, MappingTarget::Ram) && base as usize + size as usize > self.ram.len() {
            return Err(CpuError::MappingError("RAM window exceeds RAM size".to_string()));
        }
        let mapping = self.mapping_mut(id)?;
        let (old_base, old_size) = (mapping.base, mapping.size);
        mapping.base = base;
        mapping.size = size;
        self.remap(old_base, old_size);
        self.remap(base, size);
        Ok(())
    }

    pub fn enable_mapping(&mut self, id: MappingId, enabled: bool) -> Result<(), CpuError> {
        let mapping = self.mapping_mut(id)?;
        if mapping.enabled != enabled {
            mapping.enabled = enabled;
            let (base, size) = (mapping.base, mapping.size);
            self.remap(base, size);
        }
        Ok(())
    }

    pub fn remove_mapping(&mut self, id: MappingId) -> Result<(), CpuError> {
        let mapping = self
            .mappings
            .get_mut(id)
            .and_then(|m| m.take())
            .ok_or_else(|| CpuError::MappingError(format!("no mapping with id {}", id)))?;
        self.remap(mapping.base, mapping.size);
        Ok(())
    }

    pub fn set_mapping_cycles(&mut self, id: MappingId, cycles: [u32; 3]) -> Result<(), CpuError> {
        self.mapping_mut(id)?.cycles = cycles;
        Ok(())
    }

    /// Restrict which mapping origins are visible in [base, base+size).
    pub fn set_visibility(&mut self, base: u32, size: u32, mask: u8) -> Result<(), CpuError> {
        Self::check_range(base, size)?;
        let first = (base >> MEM_BLOCK_SHIFT) as usize;
        let last = ((base + size) >> MEM_BLOCK_SHIFT) as usize;
        for block in &mut self.visibility[first..last] {
            *block = mask;
        }
        self.remap(base, size);
        Ok(())
    }

    pub fn visibility(&self, address: u32) -> u8 {
        self.visibility[((address & ADDRESS_MASK) >> MEM_BLOCK_SHIFT) as usize]
    }

    /// Rebuild block ownership for [base, base+size). The most recently added enabled mapping
    /// that is visible for the block wins.
    fn remap(&mut self, base: u32, size: u32) {
        let first = (base >> MEM_BLOCK_SHIFT) as usize;
        let last = (((base as usize + size as usize) >> MEM_BLOCK_SHIFT) as usize).min(MEM_BLOCKS);
        for block in first..last {
            let address = (block as u32) << MEM_BLOCK_SHIFT;
            let mask = self.visibility[block];
            let mut read_owner = None;
            let mut write_owner = None;
            for (id, mapping) in self.mappings.iter().enumerate() {
                if let Some(m) = mapping {
                    if !m.enabled || !m.contains(address) {
                        continue;
                    }
                    if m.visible_for_read(mask) {
                        read_owner = Some(id);
                    }
                    if m.visible_for_write(mask) {
                        write_owner = Some(id);
                    }
                }
            }
            self.read_map[block] = read_owner;
            self.write_map[block] = write_owner;
        }
    }

    /// Enable or disable the A20 address line. Returns true if the state changed.
    pub fn set_a20(&mut self, enabled: bool) -> bool {
        let new_mask = if enabled { ADDRESS_MASK } else { ADDRESS_MASK & !A20_BIT };
        let changed = new_mask != self.a20_mask;
        self.a20_mask = new_mask;
        changed
    }

    pub fn a20_enabled(&self) -> bool {
        self.a20_mask & A20_BIT != 0
    }

    #[inline]
    fn decode_address(&self, address: u32) -> (u32, usize) {
        let address = address & self.a20_mask;
        (address, (address >> MEM_BLOCK_SHIFT) as usize)
    }

    /* ---------------------------- Byte accesses ---------------------------- */

    pub fn read_u8(&mut self, address: u32, cycles: &mut u32) -> u8 {
        let (address, block) = self.decode_address(address);
        let Some(id) = self.read_map[block]
        else {
            return OPEN_BUS_BYTE;
        };
        let Memory { ram, mappings, .. } = self;
        match mappings[id].as_mut() {
            Some(mapping) => {
                *cycles += mapping.cycles[CYCLES_BYTE];
                match &mut mapping.target {
                    MappingTarget::Ram => ram.get(address as usize).copied().unwrap_or(OPEN_BUS_BYTE),
                    MappingTarget::Device(device) => device.mmio_read_u8(address),
                }
            }
            None => OPEN_BUS_BYTE,
        }
    }

    pub fn write_u8(&mut self, address: u32, data: u8, cycles: &mut u32) {
        let (address, block) = self.decode_address(address);
        let Some(id) = self.write_map[block]
        else {
            return;
        };
        let Memory { ram, mappings, .. } = self;
        if let Some(mapping) = mappings[id].as_mut() {
            *cycles += mapping.cycles[CYCLES_BYTE];
            match &mut mapping.target {
                MappingTarget::Ram => {
                    if let Some(b) = ram.get_mut(address as usize) {
                        *b = data;
                    }
                }
                MappingTarget::Device(device) => device.mmio_write_u8(address, data),
            }
        }
    }

    /* ---------------------------- Word accesses ---------------------------- */

    /// Read a word. Unaligned words are split into two byte cycles, as the 16-bit bus does.
    pub fn read_u16(&mut self, address: u32, cycles: &mut u32) -> u16 {
        if address & 1 != 0 {
            let lo = self.read_u8(address, cycles);
            let hi = self.read_u8(address.wrapping_add(1), cycles);
            return u16::from_le_bytes([lo, hi]);
        }
        let (address, block) = self.decode_address(address);
        let Some(id) = self.read_map[block]
        else {
            return 0xFFFF;
        };
        let native = {
            let Memory { ram, mappings, .. } = self;
            match mappings[id].as_mut() {
                Some(mapping) => {
                    let word = match &mut mapping.target {
                        MappingTarget::Ram => {
                            let a = address as usize;
                            match ram.get(a..a + 2) {
                                Some(b) => Some(u16::from_le_bytes([b[0], b[1]])),
                                None => Some(0xFFFF),
                            }
                        }
                        MappingTarget::Device(device) => device.mmio_read_u16(address),
                    };
                    if word.is_some() {
                        *cycles += mapping.cycles[CYCLES_WORD];
                    }
                    word
                }
                None => Some(0xFFFF),
            }
        };
        match native {
            Some(word) => word,
            None => {
                let lo = self.read_u8(address, cycles);
                let hi = self.read_u8(address + 1, cycles);
                u16::from_le_bytes([lo, hi])
            }
        }
    }

    pub fn write_u16(&mut self, address: u32, data: u16, cycles: &mut u32) {
        let bytes = data.to_le_bytes();
        if address & 1 != 0 {
            self.write_u8(address, bytes[0], cycles);
            self.write_u8(address.wrapping_add(1), bytes[1], cycles);
            return;
        }
        let (address, block) = self.decode_address(address);
        let Some(id) = self.write_map[block]
        else {
            return;
        };
        let handled = {
            let Memory { ram, mappings, .. } = self;
            match mappings[id].as_mut() {
                Some(mapping) => {
                    let handled = match &mut mapping.target {
                        MappingTarget::Ram => {
                            let a = address as usize;
                            if let Some(b) = ram.get_mut(a..a + 2) {
                                b.copy_from_slice(&bytes);
                            }
                            true
                        }
                        MappingTarget::Device(device) => device.mmio_write_u16(address, data),
                    };
                    if handled {
                        *cycles += mapping.cycles[CYCLES_WORD];
                    }
                    handled
                }
                None => true,
            }
        };
        if !handled {
            self.write_u8(address, bytes[0], cycles);
            self.write_u8(address + 1, bytes[1], cycles);
        }
    }

    /* ---------------------------- Dword accesses --------------------------- */

    pub fn read_u32(&mut self, address: u32, cycles: &mut u32) -> u32 {
        if address & 1 != 0 {
            // byte, word, byte on the 16-bit bus
            let b0 = self.read_u8(address, cycles) as u32;
            let w = self.read_u16(address.wrapping_add(1), cycles) as u32;
            let b3 = self.read_u8(address.wrapping_add(3), cycles) as u32;
            return b0 | (w << 8) | (b3 << 24);
        }
        if address & 3 == 0 {
            let (a, block) = self.decode_address(address);
            if let Some(id) = self.read_map[block] {
                if let Some(mapping) = self.mappings[id].as_mut() {
                    if let MappingTarget::Device(device) = &mut mapping.target {
                        if let Some(dword) = device.mmio_read_u32(a) {
                            *cycles += mapping.cycles[CYCLES_DWORD];
                            return dword;
                        }
                    }
                }
            }
        }
        let lo = self.read_u16(address, cycles) as u32;
        let hi = self.read_u16(address.wrapping_add(2), cycles) as u32;
        lo | (hi << 16)
    }

    pub fn write_u32(&mut self, address: u32, data: u32, cycles: &mut u32) {
        if address & 1 != 0 {
            self.write_u8(address, data as u8, cycles);
            self.write_u16(address.wrapping_add(1), (data >> 8) as u16, cycles);
            self.write_u8(address.wrapping_add(3), (data >> 24) as u8, cycles);
            return;
        }
        if address & 3 == 0 {
            let (a, block) = self.decode_address(address);
            if let Some(id) = self.write_map[block] {
                if let Some(mapping) = self.mappings[id].as_mut() {
                    if let MappingTarget::Device(device) = &mut mapping.target {
                        if device.mmio_write_u32(a, data) {
                            *cycles += mapping.cycles[CYCLES_DWORD];
                            return;
                        }
                    }
                }
            }
        }
        self.write_u16(address, data as u16, cycles);
        self.write_u16(address.wrapping_add(2), (data >> 16) as u16, cycles);
    }

    /// Side-effect free read of a byte. Devices may answer with 0xFF.
    pub fn peek_u8(&self, address: u32) -> u8 {
        let address = address & self.a20_mask;
        match self.read_map[(address >> MEM_BLOCK_SHIFT) as usize].and_then(|id| self.mappings[id].as_ref()) {
            Some(mapping) => match &mapping.target {
                MappingTarget::Ram => self.ram.get(address as usize).copied().unwrap_or(OPEN_BUS_BYTE),
                MappingTarget::Device(device) => device.mmio_peek_u8(address),
            },
            None => OPEN_BUS_BYTE,
        }
    }

    /// Cost in wait cycles of a word access at this address, used to price instruction fetches.
    pub fn word_cycles(&self, address: u32) -> u32 {
        let address = address & self.a20_mask;
        self.read_map[(address >> MEM_BLOCK_SHIFT) as usize]
            .and_then(|id| self.mappings[id].as_ref())
            .map(|m| m.cycles[CYCLES_WORD])
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestDevice {
        base: u32,
        data: Vec<u8>,
        byte_reads: u32,
    }

    impl MemoryMappedDevice for TestDevice {
        fn mmio_read_u8(&mut self, address: u32) -> u8 {
            self.byte_reads += 1;
            self.data[(address - self.base) as usize]
        }
        fn mmio_write_u8(&mut self, address: u32, data: u8) {
            self.data[(address - self.base) as usize] = data;
        }
    }

    fn test_device(base: u32) -> Box<TestDevice> {
        Box::new(TestDevice {
            base,
            data: (0..0x1000).map(|i| i as u8).collect(),
            byte_reads: 0,
        })
    }

    #[test]
    fn test_open_bus() {
        let mut mem = Memory::new(0x10000);
        let mut cycles = 0;
        assert_eq!(mem.read_u8(0x5000, &mut cycles), 0xFF);
        assert_eq!(mem.read_u16(0x5000, &mut cycles), 0xFFFF);
        assert_eq!(mem.read_u32(0x5001, &mut cycles), 0xFFFF_FFFF);
        mem.write_u8(0x5000, 0x12, &mut cycles);
        assert_eq!(cycles, 0);
    }

    #[test]
    fn test_ram_mapping() {
        let mut mem = Memory::new(0x10000);
        mem.add_ram_mapping(0, 0x10000, 1).unwrap();
        let mut cycles = 0;
        mem.write_u16(0x100, 0xBEEF, &mut cycles);
        assert_eq!(cycles, 1);
        assert_eq!(mem.read_u8(0x100, &mut cycles), 0xEF);
        assert_eq!(mem.read_u8(0x101, &mut cycles), 0xBE);
        cycles = 0;
        // Unaligned word: two byte cycles.
        assert_eq!(mem.read_u16(0xFF, &mut cycles), 0xEF00);
        assert_eq!(cycles, 2);
        cycles = 0;
        mem.write_u32(0x200, 0x12345678, &mut cycles);
        assert_eq!(mem.read_u32(0x200, &mut cycles), 0x12345678);
        assert_eq!(cycles, 4);
    }

    #[test]
    fn test_synthesized_word_double_counts() {
        let mut mem = Memory::new(0x1000);
        let id = mem.add_mapping(0xA0000, 0x1000, MAP_RW, test_device(0xA0000)).unwrap();
        mem.set_mapping_cycles(id, [3, 5, 8]).unwrap();
        let mut cycles = 0;
        assert_eq!(mem.read_u16(0xA0010, &mut cycles), 0x1110);
        assert_eq!(cycles, 6);
        cycles = 0;
        assert_eq!(mem.read_u32(0xA0010, &mut cycles), 0x13121110);
        assert_eq!(cycles, 12);
    }

    #[test]
    fn test_mapping_precedence_and_removal() {
        let mut mem = Memory::new(0x100000);
        mem.add_ram_mapping(0, 0x100000, 0).unwrap();
        mem.ram_mut()[0xC0010] = 0x42;
        let rom = mem
            .add_mapping(0xC0000, 0x1000, MAP_READ, Box::new(RomDevice::new(0xC0000, vec![0x99; 0x1000])))
            .unwrap();
        let mut cycles = 0;
        assert_eq!(mem.read_u8(0xC0010, &mut cycles), 0x99);
        // Writes still go to RAM underneath the read-only mapping.
        mem.write_u8(0xC0010, 0x43, &mut cycles);
        assert_eq!(mem.ram()[0xC0010], 0x43);

        mem.enable_mapping(rom, false).unwrap();
        assert_eq!(mem.read_u8(0xC0010, &mut cycles), 0x43);
        mem.enable_mapping(rom, true).unwrap();
        assert_eq!(mem.read_u8(0xC0010, &mut cycles), 0x99);
        mem.remove_mapping(rom).unwrap();
        assert_eq!(mem.read_u8(0xC0010, &mut cycles), 0x43);
        assert!(mem.remove_mapping(rom).is_err());
    }

    #[test]
    fn test_resize_mapping() {
        let mut mem = Memory::new(0x1000);
        let id = mem.add_mapping(0xA0000, 0x1000, MAP_RW, test_device(0xA0000)).unwrap();
        let mut cycles = 0;
        assert_eq!(mem.read_u8(0xA0001, &mut cycles), 0x01);
        mem.resize_mapping(id, 0xB0000, 0x1000).unwrap();
        assert_eq!(mem.read_u8(0xA0001, &mut cycles), 0xFF);
        assert!(mem.resize_mapping(id, 0xB0001, 0x1000).is_err());
    }

    #[test]
    fn test_visibility_mask() {
        let mut mem = Memory::new(0x100000);
        mem.add_ram_mapping(0, 0x100000, 0).unwrap();
        mem.ram_mut()[0xE0000] = 0x11;
        mem.add_mapping(0xE0000, 0x10000, MAP_READ, Box::new(RomDevice::new(0xE0000, vec![0x22; 0x10000])))
            .unwrap();
        let mut cycles = 0;
        assert_eq!(mem.read_u8(0xE0000, &mut cycles), 0x22);
        // Shadow RAM: internal reads only, external (ROM) hidden.
        mem.set_visibility(0xE0000, 0x10000, MEM_READ_INTERNAL | MEM_WRITE_INTERNAL)
            .unwrap();
        assert_eq!(mem.read_u8(0xE0000, &mut cycles), 0x11);
        // Writes disabled: dropped silently.
        mem.set_visibility(0xE0000, 0x10000, MEM_READ_INTERNAL).unwrap();
        mem.write_u8(0xE0000, 0x33, &mut cycles);
        assert_eq!(mem.read_u8(0xE0000, &mut cycles), 0x11);
        mem.set_visibility(0xE0000, 0x10000, MEM_READ_DISABLED | MEM_WRITE_DISABLED)
            .unwrap();
        assert_eq!(mem.read_u8(0xE0000, &mut cycles), 0xFF);
    }

    #[test]
    fn test_a20() {
        let mut mem = Memory::new(0x200000);
        mem.add_ram_mapping(0, 0x200000, 0).unwrap();
        let mut cycles = 0;
        mem.write_u8(0x100000, 0xAA, &mut cycles);
        mem.write_u8(0x000000, 0x55, &mut cycles);
        assert!(mem.set_a20(false));
        assert_eq!(mem.read_u8(0x100000, &mut cycles), 0x55);
        assert!(!mem.set_a20(false));
        mem.set_a20(true);
        assert_eq!(mem.read_u8(0x100000, &mut cycles), 0xAA);
    }
}
