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

    cpu_386::execute::mod.rs

    Instruction dispatch. Every handler is listed once here with its base
    cycle counts; the macro derives the Op enum, the handler table and the timing table from
    the list.

*/
mod alu;
mod bits;
mod branch;
mod io;
mod misc;
mod mov;
mod muldiv;
mod operands;
mod shift;
mod stack;
mod string;
mod system;

use strum_macros::IntoStaticStr;

use crate::cpu_common::{alu::Xi, CpuException, InstructionWidth};

use super::{Intel386, Segment};

pub use shift::ShiftCount;
pub use bits::BitOp;

pub type ExecResult = Result<(), CpuException>;
pub(crate) type ExecFn = fn(&mut Intel386) -> ExecResult;

pub(crate) const W8: InstructionWidth = InstructionWidth::Byte;
pub(crate) const W16: InstructionWidth = InstructionWidth::Word;
pub(crate) const W32: InstructionWidth = InstructionWidth::Dword;

/// Columns of a timing row.
pub(crate) const T_286_REG: usize = 0;
pub(crate) const T_286_MEM: usize = 1;
pub(crate) const T_386_REG: usize = 2;
pub(crate) const T_386_MEM: usize = 3;

macro_rules! handlers {
    ($($name:ident: [$r2:expr, $m2:expr, $r3:expr, $m3:expr] => $method:ident($($arg:expr),*);)*) => {
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoStaticStr)]
        #[repr(u16)]
        pub enum Op {
            #[default]
            Invalid,
            $($name,)*
        }

        /// Handlers indexed by `Op`.
        pub(crate) static EXEC_TABLE: &[ExecFn] = &[
            {
                fn handler(cpu: &mut Intel386) -> ExecResult {
                    cpu.invalid()
                }
                handler as ExecFn
            },
            $(
                {
                    fn handler(cpu: &mut Intel386) -> ExecResult {
                        cpu.$method($($arg),*)
                    }
                    handler as ExecFn
                },
            )*
        ];

        /// Base cycles indexed by `Op`: 286 register form, 286 memory form, 386 register form,
        /// 386 memory form.
        pub(crate) static TIMINGS: &[[u16; 4]] = &[
            [0, 0, 0, 0],
            $([$r2, $m2, $r3, $m3],)*
        ];
    };
}

handlers! {
    // Arithmetic and logic
    AddEbGb: [2, 7, 2, 7] => alu_e_g(Xi::Add, W8);
    AddEwGw: [2, 7, 2, 7] => alu_e_g(Xi::Add, W16);
    AddEdGd: [2, 7, 2, 7] => alu_e_g(Xi::Add, W32);
    AddGbEb: [2, 7, 2, 6] => alu_g_e(Xi::Add, W8);
    AddGwEw: [2, 7, 2, 6] => alu_g_e(Xi::Add, W16);
    AddGdEd: [2, 7, 2, 6] => alu_g_e(Xi::Add, W32);
    AddAlIb: [3, 3, 2, 2] => alu_a_i(Xi::Add, W8);
    AddAxIw: [3, 3, 2, 2] => alu_a_i(Xi::Add, W16);
    AddEaxId: [3, 3, 2, 2] => alu_a_i(Xi::Add, W32);
    AddEbIb: [3, 7, 2, 7] => alu_e_i(Xi::Add, W8);
    AddEwIw: [3, 7, 2, 7] => alu_e_i(Xi::Add, W16);
    AddEdId: [3, 7, 2, 7] => alu_e_i(Xi::Add, W32);
    OrEbGb: [2, 7, 2, 7] => alu_e_g(Xi::Or, W8);
    OrEwGw: [2, 7, 2, 7] => alu_e_g(Xi::Or, W16);
    OrEdGd: [2, 7, 2, 7] => alu_e_g(Xi::Or, W32);
    OrGbEb: [2, 7, 2, 6] => alu_g_e(Xi::Or, W8);
    OrGwEw: [2, 7, 2, 6] => alu_g_e(Xi::Or, W16);
    OrGdEd: [2, 7, 2, 6] => alu_g_e(Xi::Or, W32);
    OrAlIb: [3, 3, 2, 2] => alu_a_i(Xi::Or, W8);
    OrAxIw: [3, 3, 2, 2] => alu_a_i(Xi::Or, W16);
    OrEaxId: [3, 3, 2, 2] => alu_a_i(Xi::Or, W32);
    OrEbIb: [3, 7, 2, 7] => alu_e_i(Xi::Or, W8);
    OrEwIw: [3, 7, 2, 7] => alu_e_i(Xi::Or, W16);
    OrEdId: [3, 7, 2, 7] => alu_e_i(Xi::Or, W32);
    AdcEbGb: [2, 7, 2, 7] => alu_e_g(Xi::Adc, W8);
    AdcEwGw: [2, 7, 2, 7] => alu_e_g(Xi::Adc, W16);
    AdcEdGd: [2, 7, 2, 7] => alu_e_g(Xi::Adc, W32);
    AdcGbEb: [2, 7, 2, 6] => alu_g_e(Xi::Adc, W8);
    AdcGwEw: [2, 7, 2, 6] => alu_g_e(Xi::Adc, W16);
    AdcGdEd: [2, 7, 2, 6] => alu_g_e(Xi::Adc, W32);
    AdcAlIb: [3, 3, 2, 2] => alu_a_i(Xi::Adc, W8);
    AdcAxIw: [3, 3, 2, 2] => alu_a_i(Xi::Adc, W16);
    AdcEaxId: [3, 3, 2, 2] => alu_a_i(Xi::Adc, W32);
    AdcEbIb: [3, 7, 2, 7] => alu_e_i(Xi::Adc, W8);
    AdcEwIw: [3, 7, 2, 7] => alu_e_i(Xi::Adc, W16);
    AdcEdId: [3, 7, 2, 7] => alu_e_i(Xi::Adc, W32);
    SbbEbGb: [2, 7, 2, 7] => alu_e_g(Xi::Sbb, W8);
    SbbEwGw: [2, 7, 2, 7] => alu_e_g(Xi::Sbb, W16);
    SbbEdGd: [2, 7, 2, 7] => alu_e_g(Xi::Sbb, W32);
    SbbGbEb: [2, 7, 2, 6] => alu_g_e(Xi::Sbb, W8);
    SbbGwEw: [2, 7, 2, 6] => alu_g_e(Xi::Sbb, W16);
    SbbGdEd: [2, 7, 2, 6] => alu_g_e(Xi::Sbb, W32);
    SbbAlIb: [3, 3, 2, 2] => alu_a_i(Xi::Sbb, W8);
    SbbAxIw: [3, 3, 2, 2] => alu_a_i(Xi::Sbb, W16);
    SbbEaxId: [3, 3, 2, 2] => alu_a_i(Xi::Sbb, W32);
    SbbEbIb: [3, 7, 2, 7] => alu_e_i(Xi::Sbb, W8);
    SbbEwIw: [3, 7, 2, 7] => alu_e_i(Xi::Sbb, W16);
    SbbEdId: [3, 7, 2, 7] => alu_e_i(Xi::Sbb, W32);
    AndEbGb: [2, 7, 2, 7] => alu_e_g(Xi::And, W8);
    AndEwGw: [2, 7, 2, 7] => alu_e_g(Xi::And, W16);
    AndEdGd: [2, 7, 2, 7] => alu_e_g(Xi::And, W32);
    AndGbEb: [2, 7, 2, 6] => alu_g_e(Xi::And, W8);
    AndGwEw: [2, 7, 2, 6] => alu_g_e(Xi::And, W16);
    AndGdEd: [2, 7, 2, 6] => alu_g_e(Xi::And, W32);
    AndAlIb: [3, 3, 2, 2] => alu_a_i(Xi::And, W8);
    AndAxIw: [3, 3, 2, 2] => alu_a_i(Xi::And, W16);
    AndEaxId: [3, 3, 2, 2] => alu_a_i(Xi::And, W32);
    AndEbIb: [3, 7, 2, 7] => alu_e_i(Xi::And, W8);
    AndEwIw: [3, 7, 2, 7] => alu_e_i(Xi::And, W16);
    AndEdId: [3, 7, 2, 7] => alu_e_i(Xi::And, W32);
    SubEbGb: [2, 7, 2, 7] => alu_e_g(Xi::Sub, W8);
    SubEwGw: [2, 7, 2, 7] => alu_e_g(Xi::Sub, W16);
    SubEdGd: [2, 7, 2, 7] => alu_e_g(Xi::Sub, W32);
    SubGbEb: [2, 7, 2, 6] => alu_g_e(Xi::Sub, W8);
    SubGwEw: [2, 7, 2, 6] => alu_g_e(Xi::Sub, W16);
    SubGdEd: [2, 7, 2, 6] => alu_g_e(Xi::Sub, W32);
    SubAlIb: [3, 3, 2, 2] => alu_a_i(Xi::Sub, W8);
    SubAxIw: [3, 3, 2, 2] => alu_a_i(Xi::Sub, W16);
    SubEaxId: [3, 3, 2, 2] => alu_a_i(Xi::Sub, W32);
    SubEbIb: [3, 7, 2, 7] => alu_e_i(Xi::Sub, W8);
    SubEwIw: [3, 7, 2, 7] => alu_e_i(Xi::Sub, W16);
    SubEdId: [3, 7, 2, 7] => alu_e_i(Xi::Sub, W32);
    XorEbGb: [2, 7, 2, 7] => alu_e_g(Xi::Xor, W8);
    XorEwGw: [2, 7, 2, 7] => alu_e_g(Xi::Xor, W16);
    XorEdGd: [2, 7, 2, 7] => alu_e_g(Xi::Xor, W32);
    XorGbEb: [2, 7, 2, 6] => alu_g_e(Xi::Xor, W8);
    XorGwEw: [2, 7, 2, 6] => alu_g_e(Xi::Xor, W16);
    XorGdEd: [2, 7, 2, 6] => alu_g_e(Xi::Xor, W32);
    XorAlIb: [3, 3, 2, 2] => alu_a_i(Xi::Xor, W8);
    XorAxIw: [3, 3, 2, 2] => alu_a_i(Xi::Xor, W16);
    XorEaxId: [3, 3, 2, 2] => alu_a_i(Xi::Xor, W32);
    XorEbIb: [3, 7, 2, 7] => alu_e_i(Xi::Xor, W8);
    XorEwIw: [3, 7, 2, 7] => alu_e_i(Xi::Xor, W16);
    XorEdId: [3, 7, 2, 7] => alu_e_i(Xi::Xor, W32);
    CmpEbGb: [2, 6, 2, 5] => alu_e_g(Xi::Cmp, W8);
    CmpEwGw: [2, 6, 2, 5] => alu_e_g(Xi::Cmp, W16);
    CmpEdGd: [2, 6, 2, 5] => alu_e_g(Xi::Cmp, W32);
    CmpGbEb: [2, 6, 2, 6] => alu_g_e(Xi::Cmp, W8);
    CmpGwEw: [2, 6, 2, 6] => alu_g_e(Xi::Cmp, W16);
    CmpGdEd: [2, 6, 2, 6] => alu_g_e(Xi::Cmp, W32);
    CmpAlIb: [3, 3, 2, 2] => alu_a_i(Xi::Cmp, W8);
    CmpAxIw: [3, 3, 2, 2] => alu_a_i(Xi::Cmp, W16);
    CmpEaxId: [3, 3, 2, 2] => alu_a_i(Xi::Cmp, W32);
    CmpEbIb: [3, 6, 2, 5] => alu_e_i(Xi::Cmp, W8);
    CmpEwIw: [3, 6, 2, 5] => alu_e_i(Xi::Cmp, W16);
    CmpEdId: [3, 6, 2, 5] => alu_e_i(Xi::Cmp, W32);
    TestEbGb: [2, 6, 2, 5] => test_e_g(W8);
    TestEwGw: [2, 6, 2, 5] => test_e_g(W16);
    TestEdGd: [2, 6, 2, 5] => test_e_g(W32);
    TestAlIb: [3, 3, 2, 2] => test_a_i(W8);
    TestAxIw: [3, 3, 2, 2] => test_a_i(W16);
    TestEaxId: [3, 3, 2, 2] => test_a_i(W32);
    TestEbIb: [3, 6, 2, 5] => test_e_i(W8);
    TestEwIw: [3, 6, 2, 5] => test_e_i(W16);
    TestEdId: [3, 6, 2, 5] => test_e_i(W32);
    IncRw: [2, 2, 2, 2] => inc_reg(W16);
    IncRd: [2, 2, 2, 2] => inc_reg(W32);
    DecRw: [2, 2, 2, 2] => dec_reg(W16);
    DecRd: [2, 2, 2, 2] => dec_reg(W32);
    IncEb: [2, 7, 2, 6] => inc_e(W8);
    IncEw: [2, 7, 2, 6] => inc_e(W16);
    IncEd: [2, 7, 2, 6] => inc_e(W32);
    DecEb: [2, 7, 2, 6] => dec_e(W8);
    DecEw: [2, 7, 2, 6] => dec_e(W16);
    DecEd: [2, 7, 2, 6] => dec_e(W32);
    NotEb: [2, 7, 2, 6] => not_e(W8);
    NotEw: [2, 7, 2, 6] => not_e(W16);
    NotEd: [2, 7, 2, 6] => not_e(W32);
    NegEb: [2, 7, 2, 6] => neg_e(W8);
    NegEw: [2, 7, 2, 6] => neg_e(W16);
    NegEd: [2, 7, 2, 6] => neg_e(W32);
    Daa: [3, 3, 4, 4] => daa();
    Das: [3, 3, 4, 4] => das();
    Aaa: [3, 3, 4, 4] => aaa();
    Aas: [3, 3, 4, 4] => aas();
    Aam: [16, 16, 17, 17] => aam();
    Aad: [14, 14, 19, 19] => aad();
    Salc: [2, 2, 2, 2] => salc();

    // Multiply and divide
    MulEb: [13, 16, 12, 15] => mul_e(W8);
    MulEw: [21, 24, 17, 20] => mul_e(W16);
    MulEd: [0, 0, 25, 28] => mul_e(W32);
    ImulEb: [13, 16, 12, 15] => imul_e(W8);
    ImulEw: [21, 24, 17, 20] => imul_e(W16);
    ImulEd: [0, 0, 25, 28] => imul_e(W32);
    DivEb: [14, 17, 14, 17] => div_e(W8);
    DivEw: [22, 25, 22, 25] => div_e(W16);
    DivEd: [0, 0, 38, 41] => div_e(W32);
    IdivEb: [17, 20, 19, 22] => idiv_e(W8);
    IdivEw: [25, 28, 27, 30] => idiv_e(W16);
    IdivEd: [0, 0, 43, 46] => idiv_e(W32);
    ImulGwEwIw: [21, 24, 22, 25] => imul_g_e_i(W16);
    ImulGdEdId: [0, 0, 22, 25] => imul_g_e_i(W32);
    ImulGwEw: [0, 0, 12, 15] => imul_g_e(W16);
    ImulGdEd: [0, 0, 12, 15] => imul_g_e(W32);

    // Shifts and rotates
    ShiftEb1: [2, 7, 3, 7] => shift_e(W8, ShiftCount::One);
    ShiftEw1: [2, 7, 3, 7] => shift_e(W16, ShiftCount::One);
    ShiftEd1: [2, 7, 3, 7] => shift_e(W32, ShiftCount::One);
    ShiftEbCl: [5, 8, 3, 7] => shift_e(W8, ShiftCount::Cl);
    ShiftEwCl: [5, 8, 3, 7] => shift_e(W16, ShiftCount::Cl);
    ShiftEdCl: [5, 8, 3, 7] => shift_e(W32, ShiftCount::Cl);
    ShiftEbIb: [5, 8, 3, 7] => shift_e(W8, ShiftCount::Imm);
    ShiftEwIb: [5, 8, 3, 7] => shift_e(W16, ShiftCount::Imm);
    ShiftEdIb: [5, 8, 3, 7] => shift_e(W32, ShiftCount::Imm);
    ShldEwGwIb: [0, 0, 3, 7] => shld(W16, ShiftCount::Imm);
    ShldEdGdIb: [0, 0, 3, 7] => shld(W32, ShiftCount::Imm);
    ShldEwGwCl: [0, 0, 3, 7] => shld(W16, ShiftCount::Cl);
    ShldEdGdCl: [0, 0, 3, 7] => shld(W32, ShiftCount::Cl);
    ShrdEwGwIb: [0, 0, 3, 7] => shrd(W16, ShiftCount::Imm);
    ShrdEdGdIb: [0, 0, 3, 7] => shrd(W32, ShiftCount::Imm);
    ShrdEwGwCl: [0, 0, 3, 7] => shrd(W16, ShiftCount::Cl);
    ShrdEdGdCl: [0, 0, 3, 7] => shrd(W32, ShiftCount::Cl);

    // Bit operations
    BtEwGw: [0, 0, 3, 12] => bt_e_g(BitOp::Test, W16);
    BtEdGd: [0, 0, 3, 12] => bt_e_g(BitOp::Test, W32);
    BtsEwGw: [0, 0, 6, 13] => bt_e_g(BitOp::Set, W16);
    BtsEdGd: [0, 0, 6, 13] => bt_e_g(BitOp::Set, W32);
    BtrEwGw: [0, 0, 6, 13] => bt_e_g(BitOp::Reset, W16);
    BtrEdGd: [0, 0, 6, 13] => bt_e_g(BitOp::Reset, W32);
    BtcEwGw: [0, 0, 6, 13] => bt_e_g(BitOp::Complement, W16);
    BtcEdGd: [0, 0, 6, 13] => bt_e_g(BitOp::Complement, W32);
    BtEwIb: [0, 0, 3, 6] => bt_e_i(BitOp::Test, W16);
    BtEdIb: [0, 0, 3, 6] => bt_e_i(BitOp::Test, W32);
    BtsEwIb: [0, 0, 6, 8] => bt_e_i(BitOp::Set, W16);
    BtsEdIb: [0, 0, 6, 8] => bt_e_i(BitOp::Set, W32);
    BtrEwIb: [0, 0, 6, 8] => bt_e_i(BitOp::Reset, W16);
    BtrEdIb: [0, 0, 6, 8] => bt_e_i(BitOp::Reset, W32);
    BtcEwIb: [0, 0, 6, 8] => bt_e_i(BitOp::Complement, W16);
    BtcEdIb: [0, 0, 6, 8] => bt_e_i(BitOp::Complement, W32);
    BsfGwEw: [0, 0, 10, 10] => bsf(W16);
    BsfGdEd: [0, 0, 10, 10] => bsf(W32);
    BsrGwEw: [0, 0, 10, 10] => bsr(W16);
    BsrGdEd: [0, 0, 10, 10] => bsr(W32);
    Seto: [0, 0, 4, 5] => setcc(0x0);
    Setno: [0, 0, 4, 5] => setcc(0x1);
    Setb: [0, 0, 4, 5] => setcc(0x2);
    Setnb: [0, 0, 4, 5] => setcc(0x3);
    Setz: [0, 0, 4, 5] => setcc(0x4);
    Setnz: [0, 0, 4, 5] => setcc(0x5);
    Setbe: [0, 0, 4, 5] => setcc(0x6);
    Setnbe: [0, 0, 4, 5] => setcc(0x7);
    Sets: [0, 0, 4, 5] => setcc(0x8);
    Setns: [0, 0, 4, 5] => setcc(0x9);
    Setp: [0, 0, 4, 5] => setcc(0xA);
    Setnp: [0, 0, 4, 5] => setcc(0xB);
    Setl: [0, 0, 4, 5] => setcc(0xC);
    Setnl: [0, 0, 4, 5] => setcc(0xD);
    Setle: [0, 0, 4, 5] => setcc(0xE);
    Setnle: [0, 0, 4, 5] => setcc(0xF);
    MovzxGwEb: [0, 0, 3, 6] => movzx(W16, W8);
    MovzxGdEb: [0, 0, 3, 6] => movzx(W32, W8);
    MovzxGdEw: [0, 0, 3, 6] => movzx(W32, W16);
    MovsxGwEb: [0, 0, 3, 6] => movsx(W16, W8);
    MovsxGdEb: [0, 0, 3, 6] => movsx(W32, W8);
    MovsxGdEw: [0, 0, 3, 6] => movsx(W32, W16);

    // Data movement
    MovEbGb: [2, 3, 2, 2] => mov_e_g(W8);
    MovEwGw: [2, 3, 2, 2] => mov_e_g(W16);
    MovEdGd: [2, 3, 2, 2] => mov_e_g(W32);
    MovGbEb: [2, 5, 2, 4] => mov_g_e(W8);
    MovGwEw: [2, 5, 2, 4] => mov_g_e(W16);
    MovGdEd: [2, 5, 2, 4] => mov_g_e(W32);
    MovEbIb: [2, 3, 2, 2] => mov_e_i(W8);
    MovEwIw: [2, 3, 2, 2] => mov_e_i(W16);
    MovEdId: [2, 3, 2, 2] => mov_e_i(W32);
    MovRbIb: [2, 2, 2, 2] => mov_reg_i(W8);
    MovRwIw: [2, 2, 2, 2] => mov_reg_i(W16);
    MovRdId: [2, 2, 2, 2] => mov_reg_i(W32);
    MovEwSw: [2, 3, 2, 2] => mov_e_sreg();
    MovSwEw: [2, 5, 2, 5] => mov_sreg_e();
    MovAlOb: [5, 5, 4, 4] => mov_a_moffs(W8);
    MovAxOw: [5, 5, 4, 4] => mov_a_moffs(W16);
    MovEaxOd: [5, 5, 4, 4] => mov_a_moffs(W32);
    MovObAl: [3, 3, 2, 2] => mov_moffs_a(W8);
    MovOwAx: [3, 3, 2, 2] => mov_moffs_a(W16);
    MovOdEax: [3, 3, 2, 2] => mov_moffs_a(W32);
    LeaGwM: [3, 3, 2, 2] => lea(W16);
    LeaGdM: [3, 3, 2, 2] => lea(W32);
    XchgEbGb: [3, 5, 3, 5] => xchg_e_g(W8);
    XchgEwGw: [3, 5, 3, 5] => xchg_e_g(W16);
    XchgEdGd: [3, 5, 3, 5] => xchg_e_g(W32);
    XchgAxRw: [3, 3, 3, 3] => xchg_a_reg(W16);
    XchgEaxRd: [3, 3, 3, 3] => xchg_a_reg(W32);
    LesGwMp: [7, 7, 7, 7] => load_far_ptr(Segment::ES, W16);
    LesGdMp: [7, 7, 7, 7] => load_far_ptr(Segment::ES, W32);
    LdsGwMp: [7, 7, 7, 7] => load_far_ptr(Segment::DS, W16);
    LdsGdMp: [7, 7, 7, 7] => load_far_ptr(Segment::DS, W32);
    LssGwMp: [0, 0, 7, 7] => load_far_ptr(Segment::SS, W16);
    LssGdMp: [0, 0, 7, 7] => load_far_ptr(Segment::SS, W32);
    LfsGwMp: [0, 0, 7, 7] => load_far_ptr(Segment::FS, W16);
    LfsGdMp: [0, 0, 7, 7] => load_far_ptr(Segment::FS, W32);
    LgsGwMp: [0, 0, 7, 7] => load_far_ptr(Segment::GS, W16);
    LgsGdMp: [0, 0, 7, 7] => load_far_ptr(Segment::GS, W32);
    Xlat: [5, 5, 5, 5] => xlat();
    Cbw: [2, 2, 3, 3] => cbw();
    Cwde: [0, 0, 3, 3] => cwde();
    Cwd: [2, 2, 2, 2] => cwd();
    Cdq: [0, 0, 2, 2] => cdq();
    Lahf: [2, 2, 2, 2] => lahf();
    Sahf: [2, 2, 3, 3] => sahf();
    BoundGwMa: [13, 13, 10, 10] => bound(W16);
    BoundGdMa: [0, 0, 10, 10] => bound(W32);
    Nop: [3, 3, 3, 3] => nop();

    // Stack
    PushRw: [3, 3, 2, 2] => push_reg(W16);
    PushRd: [3, 3, 2, 2] => push_reg(W32);
    PopRw: [5, 5, 4, 4] => pop_reg(W16);
    PopRd: [5, 5, 4, 4] => pop_reg(W32);
    PushEs: [3, 3, 2, 2] => push_sreg(Segment::ES);
    PushCs: [3, 3, 2, 2] => push_sreg(Segment::CS);
    PushSs: [3, 3, 2, 2] => push_sreg(Segment::SS);
    PushDs: [3, 3, 2, 2] => push_sreg(Segment::DS);
    PushFs: [0, 0, 2, 2] => push_sreg(Segment::FS);
    PushGs: [0, 0, 2, 2] => push_sreg(Segment::GS);
    PopEs: [5, 5, 7, 7] => pop_sreg(Segment::ES);
    PopSs: [5, 5, 7, 7] => pop_sreg(Segment::SS);
    PopDs: [5, 5, 7, 7] => pop_sreg(Segment::DS);
    PopFs: [0, 0, 7, 7] => pop_sreg(Segment::FS);
    PopGs: [0, 0, 7, 7] => pop_sreg(Segment::GS);
    PushIw: [3, 3, 2, 2] => push_imm(W16);
    PushId: [0, 0, 2, 2] => push_imm(W32);
    PushEw: [3, 5, 2, 5] => push_e(W16);
    PushEd: [0, 0, 2, 5] => push_e(W32);
    PopEw: [5, 5, 5, 5] => pop_e(W16);
    PopEd: [0, 0, 5, 5] => pop_e(W32);
    Pusha: [17, 17, 18, 18] => pusha(W16);
    Pushad: [0, 0, 18, 18] => pusha(W32);
    Popa: [19, 19, 24, 24] => popa(W16);
    Popad: [0, 0, 24, 24] => popa(W32);
    Pushf: [3, 3, 4, 4] => pushf(W16);
    Pushfd: [0, 0, 4, 4] => pushf(W32);
    Popf: [5, 5, 5, 5] => popf(W16);
    Popfd: [0, 0, 5, 5] => popf(W32);
    Enter: [11, 11, 10, 10] => enter();
    Leave: [5, 5, 4, 4] => leave();

    // Control transfer
    Jo: [3, 3, 3, 3] => jcc(0x0);
    Jno: [3, 3, 3, 3] => jcc(0x1);
    Jb: [3, 3, 3, 3] => jcc(0x2);
    Jnb: [3, 3, 3, 3] => jcc(0x3);
    Jz: [3, 3, 3, 3] => jcc(0x4);
    Jnz: [3, 3, 3, 3] => jcc(0x5);
    Jbe: [3, 3, 3, 3] => jcc(0x6);
    Jnbe: [3, 3, 3, 3] => jcc(0x7);
    Js: [3, 3, 3, 3] => jcc(0x8);
    Jns: [3, 3, 3, 3] => jcc(0x9);
    Jp: [3, 3, 3, 3] => jcc(0xA);
    Jnp: [3, 3, 3, 3] => jcc(0xB);
    Jl: [3, 3, 3, 3] => jcc(0xC);
    Jnl: [3, 3, 3, 3] => jcc(0xD);
    Jle: [3, 3, 3, 3] => jcc(0xE);
    Jnle: [3, 3, 3, 3] => jcc(0xF);
    JmpRel: [7, 7, 7, 7] => jmp_rel();
    CallRel: [7, 7, 7, 7] => call_rel();
    JmpEw: [7, 11, 7, 10] => jmp_e(W16);
    JmpEd: [0, 0, 7, 10] => jmp_e(W32);
    CallEw: [7, 11, 7, 10] => call_e(W16);
    CallEd: [0, 0, 7, 10] => call_e(W32);
    JmpFarAp: [11, 11, 12, 12] => jmp_far_imm();
    CallFarAp: [13, 13, 17, 17] => call_far_imm();
    JmpFarMw: [15, 15, 17, 17] => jmp_far_m(W16);
    JmpFarMd: [0, 0, 17, 17] => jmp_far_m(W32);
    CallFarMw: [16, 16, 22, 22] => call_far_m(W16);
    CallFarMd: [0, 0, 22, 22] => call_far_m(W32);
    RetNear: [11, 11, 10, 10] => ret_near(false);
    RetNearIw: [11, 11, 10, 10] => ret_near(true);
    RetFar: [15, 15, 18, 18] => ret_far(false);
    RetFarIw: [15, 15, 18, 18] => ret_far(true);
    Loopne: [4, 4, 11, 11] => loop_cx(LoopKind::WhileNotZero);
    Loope: [4, 4, 11, 11] => loop_cx(LoopKind::WhileZero);
    Loop: [4, 4, 11, 11] => loop_cx(LoopKind::Always);
    Jcxz: [4, 4, 5, 5] => jcxz();
    Int3: [23, 23, 33, 33] => int3();
    IntIb: [23, 23, 37, 37] => int_n();
    Into: [3, 3, 3, 3] => into_overflow();
    Int1: [0, 0, 33, 33] => int1();
    Iret: [17, 17, 22, 22] => iret(W16);
    Iretd: [0, 0, 22, 22] => iret(W32);

    // Strings
    Movsb: [5, 5, 7, 7] => movs(W8);
    Movsw: [5, 5, 7, 7] => movs(W16);
    Movsd: [0, 0, 7, 7] => movs(W32);
    Cmpsb: [8, 8, 10, 10] => cmps(W8);
    Cmpsw: [8, 8, 10, 10] => cmps(W16);
    Cmpsd: [0, 0, 10, 10] => cmps(W32);
    Stosb: [3, 3, 4, 4] => stos(W8);
    Stosw: [3, 3, 4, 4] => stos(W16);
    Stosd: [0, 0, 4, 4] => stos(W32);
    Lodsb: [5, 5, 5, 5] => lods(W8);
    Lodsw: [5, 5, 5, 5] => lods(W16);
    Lodsd: [0, 0, 5, 5] => lods(W32);
    Scasb: [7, 7, 7, 7] => scas(W8);
    Scasw: [7, 7, 7, 7] => scas(W16);
    Scasd: [0, 0, 7, 7] => scas(W32);
    Insb: [5, 5, 15, 15] => ins(W8);
    Insw: [5, 5, 15, 15] => ins(W16);
    Insd: [0, 0, 15, 15] => ins(W32);
    Outsb: [5, 5, 14, 14] => outs(W8);
    Outsw: [5, 5, 14, 14] => outs(W16);
    Outsd: [0, 0, 14, 14] => outs(W32);

    // Port I/O
    InAlIb: [5, 5, 12, 12] => in_imm(W8);
    InAxIb: [5, 5, 12, 12] => in_imm(W16);
    InEaxIb: [0, 0, 12, 12] => in_imm(W32);
    OutIbAl: [3, 3, 10, 10] => out_imm(W8);
    OutIbAx: [3, 3, 10, 10] => out_imm(W16);
    OutIbEax: [0, 0, 10, 10] => out_imm(W32);
    InAlDx: [5, 5, 13, 13] => in_dx(W8);
    InAxDx: [5, 5, 13, 13] => in_dx(W16);
    InEaxDx: [0, 0, 13, 13] => in_dx(W32);
    OutDxAl: [3, 3, 11, 11] => out_dx(W8);
    OutDxAx: [3, 3, 11, 11] => out_dx(W16);
    OutDxEax: [0, 0, 11, 11] => out_dx(W32);

    // Flags and processor control
    Clc: [2, 2, 2, 2] => clc();
    Stc: [2, 2, 2, 2] => stc();
    Cmc: [2, 2, 2, 2] => cmc();
    Cld: [2, 2, 2, 2] => cld();
    Std: [2, 2, 2, 2] => std();
    Cli: [3, 3, 3, 3] => cli();
    Sti: [2, 2, 3, 3] => sti();
    Hlt: [2, 2, 5, 5] => hlt();
    Wait: [3, 3, 6, 6] => wait();
    Esc: [2, 9, 2, 9] => esc();

    // System
    Sldt: [2, 3, 2, 2] => sldt();
    Str: [2, 3, 2, 2] => store_task_register();
    Lldt: [17, 19, 20, 20] => lldt();
    Ltr: [17, 19, 23, 27] => ltr();
    Verr: [14, 16, 10, 11] => verify(false);
    Verw: [14, 16, 15, 16] => verify(true);
    Sgdt: [11, 11, 9, 9] => store_table(false);
    Sidt: [12, 12, 9, 9] => store_table(true);
    Lgdt: [11, 11, 11, 11] => load_table(false);
    Lidt: [12, 12, 11, 11] => load_table(true);
    Smsw: [2, 3, 2, 3] => smsw();
    Lmsw: [3, 6, 10, 13] => lmsw();
    LarGwEw: [14, 16, 15, 16] => lar(W16);
    LarGdEw: [0, 0, 15, 16] => lar(W32);
    LslGwEw: [14, 16, 20, 21] => lsl(W16);
    LslGdEw: [0, 0, 20, 21] => lsl(W32);
    Arpl: [10, 11, 20, 21] => arpl();
    Clts: [2, 2, 5, 5] => clts();
    Loadall: [195, 195, 0, 0] => loadall();
    MovRdCd: [0, 0, 6, 6] => mov_r_cr();
    MovCdRd: [0, 0, 10, 10] => mov_cr_r();
    MovRdDd: [0, 0, 22, 22] => mov_r_dr();
    MovDdRd: [0, 0, 22, 22] => mov_dr_r();
    MovRdTd: [0, 0, 12, 12] => mov_r_tr();
    MovTdRd: [0, 0, 12, 12] => mov_tr_r();
}

/// Loop instruction termination conditions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoopKind {
    Always,
    WhileZero,
    WhileNotZero,
}

impl Op {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Base execution cycles for the CPU and operand form.
    #[inline]
    pub fn base_cycles(self, is_386: bool, memory_form: bool) -> u32 {
        let column = match (is_386, memory_form) {
            (false, false) => T_286_REG,
            (false, true) => T_286_MEM,
            (true, false) => T_386_REG,
            (true, true) => T_386_MEM,
        };
        TIMINGS[self.index()][column] as u32
    }

    /// Software interrupts clear TF themselves, so no single step trap follows them.
    #[inline]
    pub fn is_software_interrupt(self) -> bool {
        matches!(self, Op::Int3 | Op::IntIb | Op::Into | Op::Int1)
    }
}

impl Intel386 {
    /// Run the handler of the decoded instruction.
    #[inline]
    pub(crate) fn execute(&mut self) -> ExecResult {
        let handler = EXEC_TABLE[self.i.op.index()];
        handler(self)
    }
}
