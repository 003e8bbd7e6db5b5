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

    cpu_386::exception.rs

    Exception delivery with double fault promotion and shutdown.

*/
use crate::cpu_common::{CpuException, ExceptionClass};

use super::{interrupt::IntSource, *};

/// Delivery nesting beyond this depth can only be a loop of faults.
const MAX_EXCEPTION_DEPTH: u32 = 3;

/// The processor could not deliver a double fault and has entered the shutdown state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Shutdown;

impl Intel386 {
    /// Deliver `exc`. A contributory or page fault raised while delivering another becomes a
    /// double fault, and a fault while delivering a double fault shuts the processor down.
    pub(crate) fn exception(&mut self, exc: CpuException) -> Result<(), Shutdown> {
        let class = exc.class();
        let mut exc = exc;
        if let Some(curr) = self.curr_exception {
            if curr == ExceptionClass::DoubleFault {
                log::warn!("{} while delivering #DF, shutting down", exc);
                return Err(Shutdown);
            }
            if !curr.can_deliver(class) {
                log::debug!("{} during delivery of a {:?} exception: double fault", exc, curr);
                exc = CpuException::DoubleFault;
            }
        }
        self.exception_depth += 1;
        if self.exception_depth > MAX_EXCEPTION_DEPTH {
            log::warn!("Exception nesting limit reached at {}, shutting down", exc);
            return Err(Shutdown);
        }

        let nested = self.curr_exception.is_some();
        self.curr_exception = Some(exc.class());

        let source = if exc.is_trap() || exc == CpuException::Debug {
            IntSource::Exception
        }
        else {
            IntSource::Fault
        };
        // EXT only exists in selector error codes. #DF always pushes 0 and bit 0 of a #PF code is P.
        let error_code = match exc {
            CpuException::InvalidTss(code)
            | CpuException::SegmentNotPresent(code)
            | CpuException::StackFault(code)
            | CpuException::GeneralProtection(code)
                if nested || self.ext =>
            {
                Some(code | 1)
            }
            _ => exc.error_code(),
        };

        trace_print!(
            self,
            "Exception {} at {:04X}:{:08X}",
            exc,
            self.sregs[Segment::CS.index()].value(),
            self.eip
        );

        match self.interrupt(exc.vector(), source, error_code) {
            Ok(()) => {
                self.curr_exception = None;
                self.exception_depth = 0;
                self.ext = false;
                Ok(())
            }
            Err(next) => self.exception(next),
        }
    }
}
