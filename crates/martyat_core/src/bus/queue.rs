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

    bus::queue.rs

    Implements the processor instruction prefetch queue. The queue holds real
    instruction bytes, keyed by the linear address of the byte at its head.

*/
use std::fmt::Display;

pub const QUEUE_MAX: usize = 16;

pub struct PrefetchQueue {
    size: usize,
    len: usize,
    back: usize,
    front: usize,
    q: [u8; QUEUE_MAX],
    /// Linear address of the byte at the back (next to pop).
    head_address: u32,
    /// Physical address of the next prefetch, while it stays in the same page.
    fetch_phys: Option<u32>,
    /// Last linear address (inclusive) prefetching may read, from the CS limit.
    fetch_limit: u32,
}

impl Default for PrefetchQueue {
    fn default() -> Self {
        Self {
            size: QUEUE_MAX,
            len: 0,
            back: 0,
            front: 0,
            q: [0; QUEUE_MAX],
            head_address: 0,
            fetch_phys: None,
            fetch_limit: 0,
        }
    }
}

impl Display for PrefetchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut base_str = "".to_string();
        for i in 0..self.len {
            base_str.push_str(&format!("{:02X}", self.q[(self.back + i) % self.size]));
        }
        write!(f, "{}", base_str)
    }
}

impl PrefetchQueue {
    pub fn new(size: usize) -> Self {
        assert!(size <= QUEUE_MAX);
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A word fetch needs two free bytes.
    #[inline]
    pub fn has_room_for_fetch(&self) -> bool {
        self.len + 2 <= self.size
    }

    #[inline]
    pub fn head_address(&self) -> u32 {
        self.head_address
    }

    /// Linear address of the next byte the prefetcher will push.
    #[inline]
    pub fn tail_address(&self) -> u32 {
        self.head_address.wrapping_add(self.len as u32)
    }

    #[inline]
    pub fn fetch_phys(&self) -> Option<u32> {
        self.fetch_phys
    }

    #[inline]
    pub fn set_fetch_phys(&mut self, phys: Option<u32>) {
        self.fetch_phys = phys;
    }

    #[inline]
    pub fn fetch_limit(&self) -> u32 {
        self.fetch_limit
    }

    #[inline]
    pub fn set_fetch_limit(&mut self, limit: u32) {
        self.fetch_limit = limit;
    }

    #[inline]
    pub fn push8(&mut self, byte: u8) {
        if self.len < self.size {
            self.q[self.front] = byte;
            self.front = (self.front + 1) % self.size;
            self.len += 1;
        }
        else {
            log::error!("Prefetch queue overrun!");
        }
    }

    #[inline]
    pub fn pop(&mut self) -> Option<u8> {
        if self.len > 0 {
            let byte = self.q[self.back];
            self.back = (self.back + 1) % self.size;
            self.len -= 1;
            self.head_address = self.head_address.wrapping_add(1);
            return Some(byte);
        }
        None
    }

    /// Flush the queue and restart prefetching at the given linear address.
    pub fn flush(&mut self, address: u32) {
        self.len = 0;
        self.back = 0;
        self.front = 0;
        self.head_address = address;
        self.fetch_phys = None;
    }

    /// Copy the queue contents in order into a slice of at least len() bytes.
    pub fn to_slice(&self, slice: &mut [u8]) {
        for (i, b) in slice.iter_mut().enumerate().take(self.len) {
            *b = self.q[(self.back + i) % self.size];
        }
    }

    /// Rebuild the queue from saved contents.
    pub fn restore(&mut self, head_address: u32, bytes: &[u8]) {
        self.flush(head_address);
        for b in bytes.iter().take(self.size) {
            self.push8(*b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_push_pop() {
        let mut q = PrefetchQueue::new(6);
        q.flush(0x1000);
        for b in 0..6u8 {
            q.push8(b);
        }
        assert!(!q.has_room_for_fetch());
        assert_eq!(q.tail_address(), 0x1006);
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.head_address(), 0x1001);
        assert_eq!(q.len(), 5);
        assert!(!q.has_room_for_fetch());
        assert_eq!(q.pop(), Some(1));
        assert!(q.has_room_for_fetch());
        let mut s = [0u8; 4];
        q.to_slice(&mut s);
        assert_eq!(s, [2, 3, 4, 5]);
    }

    #[test]
    fn test_queue_flush_restore() {
        let mut q = PrefetchQueue::new(16);
        q.restore(0x2000, &[0x90, 0x90, 0xEB]);
        assert_eq!(q.len(), 3);
        assert_eq!(q.to_string(), "9090EB");
        q.flush(0x3000);
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
        assert_eq!(q.head_address(), 0x3000);
    }
}
