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

    cpu_common::mod.rs

    Types shared between the CPU, the bus and the machine.

*/
pub mod alu;
pub mod error;

use std::fmt::Display;

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};

pub use error::CpuError;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, EnumString, StrumDisplay)]
pub enum CpuType {
    #[default]
    #[strum(serialize = "Intel80286", serialize = "286")]
    Intel80286,
    #[strum(serialize = "Intel80386SX", serialize = "386sx", serialize = "386SX")]
    Intel80386SX,
}

impl CpuType {
    #[inline]
    pub fn is_386(&self) -> bool {
        matches!(self, CpuType::Intel80386SX)
    }

    /// Depth of the instruction prefetch queue in bytes.
    pub fn queue_size(&self) -> usize {
        match self {
            CpuType::Intel80286 => 6,
            CpuType::Intel80386SX => 16,
        }
    }

    /// Architectural instruction length limit. Longer instructions raise #GP(0).
    pub fn max_instruction_len(&self) -> usize {
        match self {
            CpuType::Intel80286 => 10,
            CpuType::Intel80386SX => 15,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum InstructionWidth {
    #[default]
    Byte,
    Word,
    Dword,
}

impl InstructionWidth {
    #[inline]
    pub fn bytes(&self) -> u32 {
        match self {
            InstructionWidth::Byte => 1,
            InstructionWidth::Word => 2,
            InstructionWidth::Dword => 4,
        }
    }
    #[inline]
    pub fn bits(&self) -> u32 {
        self.bytes() * 8
    }
    #[inline]
    pub fn mask(&self) -> u32 {
        match self {
            InstructionWidth::Byte => 0xFF,
            InstructionWidth::Word => 0xFFFF,
            InstructionWidth::Dword => 0xFFFF_FFFF,
        }
    }
    #[inline]
    pub fn sign_bit(&self) -> u32 {
        1 << (self.bits() - 1)
    }
    /// Sign extend a value of this width to 32 bits.
    #[inline]
    pub fn sign_extend(&self, value: u32) -> u32 {
        match self {
            InstructionWidth::Byte => value as u8 as i8 as i32 as u32,
            InstructionWidth::Word => value as u16 as i16 as i32 as u32,
            InstructionWidth::Dword => value,
        }
    }
}

/// Exceptions the processor raises. These are guest-visible events and are delivered through the
/// IVT or IDT; they are never surfaced to the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuException {
    DivideError,
    Debug,
    Nmi,
    Breakpoint,
    Overflow,
    BoundRange,
    InvalidOpcode,
    DeviceNotAvailable,
    DoubleFault,
    CoprocessorOverrun,
    InvalidTss(u16),
    SegmentNotPresent(u16),
    StackFault(u16),
    GeneralProtection(u16),
    PageFault(u16),
    MathFault,
}

/// Exception classes used to decide whether a second fault becomes a double fault.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ExceptionClass {
    #[default]
    Benign,
    Contributory,
    PageFault,
    DoubleFault,
}

impl ExceptionClass {
    /// Returns true when `second`, raised while delivering an exception of class `self`,
    /// can be delivered on its own. False means the pair is a double fault.
    pub fn can_deliver(&self, second: ExceptionClass) -> bool {
        use ExceptionClass::*;
        match (self, second) {
            (Benign, _) => true,
            (_, Benign) => true,
            (Contributory, Contributory) => false,
            (Contributory, PageFault) => true,
            (PageFault, Contributory | PageFault) => false,
            // A fault while delivering #DF is handled by the caller as a shutdown.
            (DoubleFault, _) => false,
            (_, DoubleFault) => false,
        }
    }
}

impl CpuException {
    pub fn vector(&self) -> u8 {
        match self {
            CpuException::DivideError => 0,
            CpuException::Debug => 1,
            CpuException::Nmi => 2,
            CpuException::Breakpoint => 3,
            CpuException::Overflow => 4,
            CpuException::BoundRange => 5,
            CpuException::InvalidOpcode => 6,
            CpuException::DeviceNotAvailable => 7,
            CpuException::DoubleFault => 8,
            CpuException::CoprocessorOverrun => 9,
            CpuException::InvalidTss(_) => 10,
            CpuException::SegmentNotPresent(_) => 11,
            CpuException::StackFault(_) => 12,
            CpuException::GeneralProtection(_) => 13,
            CpuException::PageFault(_) => 14,
            CpuException::MathFault => 16,
        }
    }

    pub fn error_code(&self) -> Option<u16> {
        match *self {
            CpuException::DoubleFault => Some(0),
            CpuException::InvalidTss(code)
            | CpuException::SegmentNotPresent(code)
            | CpuException::StackFault(code)
            | CpuException::GeneralProtection(code)
            | CpuException::PageFault(code) => Some(code),
            _ => None,
        }
    }

    pub fn class(&self) -> ExceptionClass {
        match self {
            CpuException::DivideError
            | CpuException::InvalidTss(_)
            | CpuException::SegmentNotPresent(_)
            | CpuException::StackFault(_)
            | CpuException::GeneralProtection(_) => ExceptionClass::Contributory,
            CpuException::PageFault(_) => ExceptionClass::PageFault,
            CpuException::DoubleFault => ExceptionClass::DoubleFault,
            _ => ExceptionClass::Benign,
        }
    }

    /// Traps report the address of the following instruction. Everything else is restartable.
    pub fn is_trap(&self) -> bool {
        matches!(self, CpuException::Breakpoint | CpuException::Overflow)
    }

    /// Build the exception for a vector number, as used by tests and the IDT dispatcher.
    pub fn from_vector(vector: u8, error_code: u16) -> Option<CpuException> {
        Some(match vector {
            0 => CpuException::DivideError,
            1 => CpuException::Debug,
            2 => CpuException::Nmi,
            3 => CpuException::Breakpoint,
            4 => CpuException::Overflow,
            5 => CpuException::BoundRange,
            6 => CpuException::InvalidOpcode,
            7 => CpuException::DeviceNotAvailable,
            8 => CpuException::DoubleFault,
            9 => CpuException::CoprocessorOverrun,
            10 => CpuException::InvalidTss(error_code),
            11 => CpuException::SegmentNotPresent(error_code),
            12 => CpuException::StackFault(error_code),
            13 => CpuException::GeneralProtection(error_code),
            14 => CpuException::PageFault(error_code),
            16 => CpuException::MathFault,
            _ => return None,
        })
    }
}

impl Display for CpuException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CpuException::DivideError => "#DE",
            CpuException::Debug => "#DB",
            CpuException::Nmi => "NMI",
            CpuException::Breakpoint => "#BP",
            CpuException::Overflow => "#OF",
            CpuException::BoundRange => "#BR",
            CpuException::InvalidOpcode => "#UD",
            CpuException::DeviceNotAvailable => "#NM",
            CpuException::DoubleFault => "#DF",
            CpuException::CoprocessorOverrun => "#MP",
            CpuException::InvalidTss(_) => "#TS",
            CpuException::SegmentNotPresent(_) => "#NP",
            CpuException::StackFault(_) => "#SS",
            CpuException::GeneralProtection(_) => "#GP",
            CpuException::PageFault(_) => "#PF",
            CpuException::MathFault => "#MF",
        };
        match self.error_code() {
            Some(code) => write!(f, "{}({:04X})", name, code),
            None => write!(f, "{}", name),
        }
    }
}

/// Processor activity states.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ActivityState {
    #[default]
    Active,
    Halt,
    Shutdown,
    PowerOff,
}

impl ActivityState {
    pub fn to_u8(self) -> u8 {
        match self {
            ActivityState::Active => 0,
            ActivityState::Halt => 1,
            ActivityState::Shutdown => 2,
            ActivityState::PowerOff => 3,
        }
    }
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ActivityState::Active),
            1 => Some(ActivityState::Halt),
            2 => Some(ActivityState::Shutdown),
            3 => Some(ActivityState::PowerOff),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// An instruction was executed, or an event delivered.
    Normal,
    /// The CPU is halted and waiting for an interrupt.
    Halted,
    /// The CPU is in the shutdown state after an unrecoverable fault.
    Shutdown,
    /// HRQ is asserted and the CPU has granted the bus.
    BusHold,
    /// The CPU is powered off.
    PowerOff,
}

/// Add a fixed number of cycles to the current instruction's execution unit count.
macro_rules! cycles {
    ($self:ident, $n:expr) => {
        $self.cycles.extra += $n as u32
    };
}

/// Add a model-dependent protected mode penalty.
macro_rules! cycles_pmode {
    ($self:ident, $c286:expr, $c386:expr) => {
        $self.cycles.pmode += if $self.cpu_type.is_386() { $c386 } else { $c286 }
    };
}

/// Trace comments. Only built with the `cpu_trace_comments` feature, and then only logged when
/// tracing is enabled at runtime.
#[cfg(feature = "cpu_trace_comments")]
macro_rules! trace_print {
    ($self:ident, $($t:tt)*) => {
        if $self.trace_enabled {
            log::trace!($($t)*);
        }
    };
}

#[cfg(not(feature = "cpu_trace_comments"))]
macro_rules! trace_print {
    ($self:ident, $($t:tt)*) => {};
}
