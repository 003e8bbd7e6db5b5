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

    cpu_386::mmu.rs

    Implements the paging unit: a two level page walk backed by a direct mapped
    software TLB.

*/
use crate::cpu_common::{CpuException, InstructionWidth};

use super::*;

pub const TLB_SIZE: usize = 1024;
pub const PAGE_SIZE: u32 = 0x1000;
pub const PAGE_OFFSET_MASK: u32 = 0xFFF;
pub const PAGE_FRAME_MASK: u32 = 0xFFFF_F000;

pub const PTE_PRESENT: u32 = 0x001;
pub const PTE_WRITABLE: u32 = 0x002;
pub const PTE_USER: u32 = 0x004;
pub const PTE_ACCESSED: u32 = 0x020;
pub const PTE_DIRTY: u32 = 0x040;

pub const PF_PRESENT: u16 = 0x1;
pub const PF_WRITE: u16 = 0x2;
pub const PF_USER: u16 = 0x4;

const RIGHT_SYS_READ: u8 = 0x1;
const RIGHT_SYS_WRITE: u8 = 0x2;
const RIGHT_USER_READ: u8 = 0x4;
const RIGHT_USER_WRITE: u8 = 0x8;

#[derive(Copy, Clone, Debug, Default)]
struct TlbEntry {
    /// Linear page number plus one. Zero marks an empty entry.
    tag: u32,
    frame: u32,
    rights: u8,
}

pub struct Tlb {
    entries: Vec<TlbEntry>,
    hits: u64,
    misses: u64,
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb {
    pub fn new() -> Self {
        Self {
            entries: vec![TlbEntry::default(); TLB_SIZE],
            hits: 0,
            misses: 0,
        }
    }

    /// Invalidate every entry.
    pub fn flush(&mut self) {
        self.entries.fill(TlbEntry::default());
    }

    #[inline]
    fn slot(linear: u32) -> usize {
        (linear >> 12) as usize & (TLB_SIZE - 1)
    }

    #[inline]
    fn find(&self, linear: u32) -> Option<&TlbEntry> {
        let entry = &self.entries[Self::slot(linear)];
        (entry.tag == (linear >> 12) + 1).then_some(entry)
    }

    fn insert(&mut self, linear: u32, frame: u32, rights: u8) {
        self.entries[Self::slot(linear)] = TlbEntry {
            tag: (linear >> 12) + 1,
            frame,
            rights,
        };
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[inline]
fn required_right(user: bool, write: bool) -> u8 {
    match (user, write) {
        (false, false) => RIGHT_SYS_READ,
        (false, true) => RIGHT_SYS_WRITE,
        (true, false) => RIGHT_USER_READ,
        (true, true) => RIGHT_USER_WRITE,
    }
}

impl Intel386 {
    #[inline]
    pub fn paging_enabled(&self) -> bool {
        self.cr[0] & CR0_PG != 0
    }

    /// Translate a linear address to physical, walking the page tables when paging is on.
    #[inline]
    pub(crate) fn translate(&mut self, linear: u32, user: bool, write: bool) -> Result<u32, CpuException> {
        if !self.paging_enabled() {
            return Ok(linear);
        }
        self.tlb_lookup(linear, 1, user, write)
    }

    /// Translate `len` bytes at `linear`. When the range crosses into the next page both pages
    /// are translated, so that a fault on either is raised before any byte is transferred.
    /// Returns the physical address of the first byte.
    pub(crate) fn tlb_lookup(&mut self, linear: u32, len: u32, user: bool, write: bool) -> Result<u32, CpuException> {
        let phys = self.tlb_translate_page(linear, user, write)?;
        if (linear & PAGE_OFFSET_MASK) + len > PAGE_SIZE {
            self.tlb_translate_page(linear.wrapping_add(len - 1) & PAGE_FRAME_MASK, user, write)?;
        }
        Ok(phys)
    }

    #[inline]
    fn tlb_translate_page(&mut self, linear: u32, user: bool, write: bool) -> Result<u32, CpuException> {
        if let Some(entry) = self.tlb.find(linear) {
            if entry.rights & required_right(user, write) != 0 {
                let frame = entry.frame;
                self.tlb.hits += 1;
                return Ok(frame | (linear & PAGE_OFFSET_MASK));
            }
        }
        self.tlb_miss(linear, user, write)
    }

    /// Walk the page directory and page table for `linear`, update the accessed and dirty bits,
    /// and refill the TLB entry.
    pub(crate) fn tlb_miss(&mut self, linear: u32, user: bool, write: bool) -> Result<u32, CpuException> {
        self.tlb.misses += 1;
        let error_bits = if write { PF_WRITE } else { 0 } | if user { PF_USER } else { 0 };

        let pde_addr = (self.cr[3] & PAGE_FRAME_MASK) | ((linear >> 22) << 2);
        let pde = self.bus.read_system(pde_addr, InstructionWidth::Dword);
        if pde & PTE_PRESENT == 0 {
            return Err(self.page_fault(linear, error_bits));
        }

        let pte_addr = (pde & PAGE_FRAME_MASK) | (((linear >> 12) & 0x3FF) << 2);
        let mut pte = self.bus.read_system(pte_addr, InstructionWidth::Dword);
        if pte & PTE_PRESENT == 0 {
            return Err(self.page_fault(linear, error_bits));
        }

        // Supervisor accesses always pass; user accesses need U in both levels, and W in both
        // levels to write.
        let combined = pde & pte;
        if user && (combined & PTE_USER == 0 || (write && combined & PTE_WRITABLE == 0)) {
            return Err(self.page_fault(linear, error_bits | PF_PRESENT));
        }

        if pde & PTE_ACCESSED == 0 {
            self.bus.write_system(pde_addr, InstructionWidth::Dword, pde | PTE_ACCESSED);
        }
        let mut new_pte = pte | PTE_ACCESSED;
        if write {
            new_pte |= PTE_DIRTY;
        }
        if new_pte != pte {
            self.bus.write_system(pte_addr, InstructionWidth::Dword, new_pte);
            pte = new_pte;
        }

        // Writes are only cached once the page is dirty, so the first write always walks.
        let dirty = pte & PTE_DIRTY != 0;
        let mut rights = RIGHT_SYS_READ;
        if dirty {
            rights |= RIGHT_SYS_WRITE;
        }
        if combined & PTE_USER != 0 {
            rights |= RIGHT_USER_READ;
            if combined & PTE_WRITABLE != 0 && dirty {
                rights |= RIGHT_USER_WRITE;
            }
        }

        let frame = pte & PAGE_FRAME_MASK;
        self.tlb.insert(linear, frame, rights);
        Ok(frame | (linear & PAGE_OFFSET_MASK))
    }

    /// Flush the whole TLB. There is no per-page invalidation.
    #[inline]
    pub fn tlb_flush(&mut self) {
        self.tlb.flush();
    }

    fn page_fault(&mut self, linear: u32, code: u16) -> CpuException {
        self.cr[2] = linear;
        log::trace!("Page fault at {:08X} code {:X}", linear, code);
        CpuException::PageFault(code)
    }
}

#[cfg(test)]
mod tests {
    use crate::{cpu_common::CpuType, testutil::TestMachine};

    use super::*;

    const PD: u32 = 0x1000;
    const PT: u32 = 0x2000;

    /// Identity map the first 4MB with the given PTE flags.
    fn setup_paging(m: &mut TestMachine, pte_flags: u32) {
        m.poke_u32(PD, PT | 0x7);
        for i in 0..1024u32 {
            m.poke_u32(PT + i * 4, (i << 12) | pte_flags);
        }
        let cpu = m.cpu_mut();
        cpu.cr[3] = PD;
        cpu.cr[0] |= CR0_PE | CR0_PG;
        cpu.tlb_flush();
    }

    #[test]
    fn test_user_write_to_read_only_page() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup_paging(&mut m, PTE_PRESENT | PTE_USER);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.translate(0x8123, true, false), Ok(0x8123));
        assert_eq!(cpu.translate(0x8123, true, true), Err(CpuException::PageFault(7)));
        assert_eq!(cpu.cr[2], 0x8123);
        // Supervisor writes ignore W.
        assert_eq!(cpu.translate(0x8123, false, true), Ok(0x8123));
    }

    #[test]
    fn test_not_present() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup_paging(&mut m, PTE_PRESENT | PTE_USER | PTE_WRITABLE);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.translate(0x0040_0000, false, true), Err(CpuException::PageFault(2)));
        assert_eq!(cpu.cr[2], 0x0040_0000);
    }

    #[test]
    fn test_accessed_and_dirty() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup_paging(&mut m, PTE_PRESENT | PTE_WRITABLE);
        m.cpu_mut().translate(0x3004, false, false).unwrap();
        assert_eq!(m.peek_u32(PT + 3 * 4) & (PTE_ACCESSED | PTE_DIRTY), PTE_ACCESSED);
        assert_eq!(m.peek_u32(PD) & PTE_ACCESSED, PTE_ACCESSED);
        m.cpu_mut().translate(0x3004, false, true).unwrap();
        assert_eq!(m.peek_u32(PT + 3 * 4) & PTE_DIRTY, PTE_DIRTY);
    }

    #[test]
    fn test_stale_translation_until_flush() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup_paging(&mut m, PTE_PRESENT | PTE_WRITABLE);
        let before = m.cpu_mut().translate(0x7010, false, false).unwrap();
        // Unchanged tables give the same answer after a flush.
        m.cpu_mut().tlb_flush();
        assert_eq!(m.cpu_mut().translate(0x7010, false, false).unwrap(), before);

        m.poke_u32(PT + 7 * 4, 0x9000 | PTE_PRESENT | PTE_WRITABLE);
        assert_eq!(m.cpu_mut().translate(0x7010, false, false).unwrap(), 0x7010);
        m.cpu_mut().tlb_flush();
        assert_eq!(m.cpu_mut().translate(0x7010, false, false).unwrap(), 0x9010);
    }

    #[test]
    fn test_page_crossing_faults_first() {
        let mut m = TestMachine::new(CpuType::Intel80386SX);
        setup_paging(&mut m, PTE_PRESENT | PTE_WRITABLE | PTE_USER);
        m.poke_u32(PT + 0x11 * 4, 0);
        let cpu = m.cpu_mut();
        assert_eq!(cpu.tlb_lookup(0x10FFE, 4, false, false), Err(CpuException::PageFault(0)));
        assert_eq!(cpu.cr[2], 0x11000);
    }
}
