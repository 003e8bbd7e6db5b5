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

    cpu_386::decode::tables.rs

    Opcode tables. Index 0x000-0x0FF is the primary map and 0x100-0x1FF is
    the 0F map. One table is built for each operand size.

*/
use crate::cpu_386::{execute::Op, instruction::Imm};

pub(crate) const F_MODRM: u8 = 0x01;
/// Not present on the 80286.
pub(crate) const F_386: u8 = 0x02;
/// Removed on the 80386.
pub(crate) const F_286: u8 = 0x04;

/// Opcode groups whose operation is selected by the reg field of the ModR/M byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Group {
    None,
    Alu8,
    AluV,
    Unary8,
    UnaryV,
    IncDec8,
    IncDecV,
    Pop,
    Mov8,
    MovV,
    System0F00,
    System0F01,
    BitTest,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct OpcodeEntry {
    pub op: Op,
    pub imm: Imm,
    pub flags: u8,
    pub group: Group,
}

const EMPTY: OpcodeEntry = OpcodeEntry {
    op: Op::Invalid,
    imm: Imm::None,
    flags: 0,
    group: Group::None,
};

const fn n(op: Op) -> OpcodeEntry {
    OpcodeEntry { op, ..EMPTY }
}

const fn ni(op: Op, imm: Imm) -> OpcodeEntry {
    OpcodeEntry { op, imm, ..EMPTY }
}

const fn m(op: Op) -> OpcodeEntry {
    OpcodeEntry {
        op,
        flags: F_MODRM,
        ..EMPTY
    }
}

const fn mi(op: Op, imm: Imm) -> OpcodeEntry {
    OpcodeEntry {
        op,
        imm,
        flags: F_MODRM,
        ..EMPTY
    }
}

const fn g(group: Group, imm: Imm) -> OpcodeEntry {
    OpcodeEntry {
        op: Op::Invalid,
        imm,
        flags: F_MODRM,
        group,
    }
}

const fn x(mut entry: OpcodeEntry) -> OpcodeEntry {
    entry.flags |= F_386;
    entry
}

const JCC: [Op; 16] = [
    Op::Jo,
    Op::Jno,
    Op::Jb,
    Op::Jnb,
    Op::Jz,
    Op::Jnz,
    Op::Jbe,
    Op::Jnbe,
    Op::Js,
    Op::Jns,
    Op::Jp,
    Op::Jnp,
    Op::Jl,
    Op::Jnl,
    Op::Jle,
    Op::Jnle,
];

const SETCC: [Op; 16] = [
    Op::Seto,
    Op::Setno,
    Op::Setb,
    Op::Setnb,
    Op::Setz,
    Op::Setnz,
    Op::Setbe,
    Op::Setnbe,
    Op::Sets,
    Op::Setns,
    Op::Setp,
    Op::Setnp,
    Op::Setl,
    Op::Setnl,
    Op::Setle,
    Op::Setnle,
];

/// ALU opcodes 00-3F in the order Eb,Gb / Ev,Gv / Gb,Eb / Gv,Ev / AL,Ib / eAX,Iv, for
/// 16-bit then 32-bit operand size.
const ALU_FORMS: [[Op; 6]; 16] = [
    [Op::AddEbGb, Op::AddEwGw, Op::AddGbEb, Op::AddGwEw, Op::AddAlIb, Op::AddAxIw],
    [Op::OrEbGb, Op::OrEwGw, Op::OrGbEb, Op::OrGwEw, Op::OrAlIb, Op::OrAxIw],
    [Op::AdcEbGb, Op::AdcEwGw, Op::AdcGbEb, Op::AdcGwEw, Op::AdcAlIb, Op::AdcAxIw],
    [Op::SbbEbGb, Op::SbbEwGw, Op::SbbGbEb, Op::SbbGwEw, Op::SbbAlIb, Op::SbbAxIw],
    [Op::AndEbGb, Op::AndEwGw, Op::AndGbEb, Op::AndGwEw, Op::AndAlIb, Op::AndAxIw],
    [Op::SubEbGb, Op::SubEwGw, Op::SubGbEb, Op::SubGwEw, Op::SubAlIb, Op::SubAxIw],
    [Op::XorEbGb, Op::XorEwGw, Op::XorGbEb, Op::XorGwEw, Op::XorAlIb, Op::XorAxIw],
    [Op::CmpEbGb, Op::CmpEwGw, Op::CmpGbEb, Op::CmpGwEw, Op::CmpAlIb, Op::CmpAxIw],
    [Op::AddEbGb, Op::AddEdGd, Op::AddGbEb, Op::AddGdEd, Op::AddAlIb, Op::AddEaxId],
    [Op::OrEbGb, Op::OrEdGd, Op::OrGbEb, Op::OrGdEd, Op::OrAlIb, Op::OrEaxId],
    [Op::AdcEbGb, Op::AdcEdGd, Op::AdcGbEb, Op::AdcGdEd, Op::AdcAlIb, Op::AdcEaxId],
    [Op::SbbEbGb, Op::SbbEdGd, Op::SbbGbEb, Op::SbbGdEd, Op::SbbAlIb, Op::SbbEaxId],
    [Op::AndEbGb, Op::AndEdGd, Op::AndGbEb, Op::AndGdEd, Op::AndAlIb, Op::AndEaxId],
    [Op::SubEbGb, Op::SubEdGd, Op::SubGbEb, Op::SubGdEd, Op::SubAlIb, Op::SubEaxId],
    [Op::XorEbGb, Op::XorEdGd, Op::XorGbEb, Op::XorGdEd, Op::XorAlIb, Op::XorEaxId],
    [Op::CmpEbGb, Op::CmpEdGd, Op::CmpGbEb, Op::CmpGdEd, Op::CmpAlIb, Op::CmpEaxId],
];

const fn entry(index: u16, op32: bool) -> OpcodeEntry {
    macro_rules! v {
        ($w:ident, $d:ident) => {
            if op32 {
                Op::$d
            }
            else {
                Op::$w
            }
        };
    }

    match index {
        // ALU block. Columns 6 and 7 of each row are handled below.
        0x00..=0x3F if index & 0x07 < 6 => {
            let row = (index >> 3) as usize + if op32 { 8 } else { 0 };
            let form = (index & 0x07) as usize;
            let op = ALU_FORMS[row][form];
            match form {
                0..=3 => m(op),
                4 => ni(op, Imm::Ib),
                _ => ni(op, Imm::Iv),
            }
        }
        0x06 => n(Op::PushEs),
        0x07 => n(Op::PopEs),
        0x0E => n(Op::PushCs),
        0x16 => n(Op::PushSs),
        0x17 => n(Op::PopSs),
        0x1E => n(Op::PushDs),
        0x1F => n(Op::PopDs),
        0x27 => n(Op::Daa),
        0x2F => n(Op::Das),
        0x37 => n(Op::Aaa),
        0x3F => n(Op::Aas),
        0x40..=0x47 => n(v!(IncRw, IncRd)),
        0x48..=0x4F => n(v!(DecRw, DecRd)),
        0x50..=0x57 => n(v!(PushRw, PushRd)),
        0x58..=0x5F => n(v!(PopRw, PopRd)),
        0x60 => n(v!(Pusha, Pushad)),
        0x61 => n(v!(Popa, Popad)),
        0x62 => m(v!(BoundGwMa, BoundGdMa)),
        0x63 => m(Op::Arpl),
        0x68 => ni(v!(PushIw, PushId), Imm::Iv),
        0x69 => mi(v!(ImulGwEwIw, ImulGdEdId), Imm::Iv),
        0x6A => ni(v!(PushIw, PushId), Imm::Ibs),
        0x6B => mi(v!(ImulGwEwIw, ImulGdEdId), Imm::Ibs),
        0x6C => n(Op::Insb),
        0x6D => n(v!(Insw, Insd)),
        0x6E => n(Op::Outsb),
        0x6F => n(v!(Outsw, Outsd)),
        0x70..=0x7F => ni(JCC[(index & 0x0F) as usize], Imm::Jb),
        0x80 | 0x82 => g(Group::Alu8, Imm::Ib),
        0x81 => g(Group::AluV, Imm::Iv),
        0x83 => g(Group::AluV, Imm::Ibs),
        0x84 => m(Op::TestEbGb),
        0x85 => m(v!(TestEwGw, TestEdGd)),
        0x86 => m(Op::XchgEbGb),
        0x87 => m(v!(XchgEwGw, XchgEdGd)),
        0x88 => m(Op::MovEbGb),
        0x89 => m(v!(MovEwGw, MovEdGd)),
        0x8A => m(Op::MovGbEb),
        0x8B => m(v!(MovGwEw, MovGdEd)),
        0x8C => m(Op::MovEwSw),
        0x8D => m(v!(LeaGwM, LeaGdM)),
        0x8E => m(Op::MovSwEw),
        0x8F => g(Group::Pop, Imm::None),
        0x90 => n(Op::Nop),
        0x91..=0x97 => n(v!(XchgAxRw, XchgEaxRd)),
        0x98 => n(v!(Cbw, Cwde)),
        0x99 => n(v!(Cwd, Cdq)),
        0x9A => ni(Op::CallFarAp, Imm::Ap),
        0x9B => n(Op::Wait),
        0x9C => n(v!(Pushf, Pushfd)),
        0x9D => n(v!(Popf, Popfd)),
        0x9E => n(Op::Sahf),
        0x9F => n(Op::Lahf),
        0xA0 => ni(Op::MovAlOb, Imm::O),
        0xA1 => ni(v!(MovAxOw, MovEaxOd), Imm::O),
        0xA2 => ni(Op::MovObAl, Imm::O),
        0xA3 => ni(v!(MovOwAx, MovOdEax), Imm::O),
        0xA4 => n(Op::Movsb),
        0xA5 => n(v!(Movsw, Movsd)),
        0xA6 => n(Op::Cmpsb),
        0xA7 => n(v!(Cmpsw, Cmpsd)),
        0xA8 => ni(Op::TestAlIb, Imm::Ib),
        0xA9 => ni(v!(TestAxIw, TestEaxId), Imm::Iv),
        0xAA => n(Op::Stosb),
        0xAB => n(v!(Stosw, Stosd)),
        0xAC => n(Op::Lodsb),
        0xAD => n(v!(Lodsw, Lodsd)),
        0xAE => n(Op::Scasb),
        0xAF => n(v!(Scasw, Scasd)),
        0xB0..=0xB7 => ni(Op::MovRbIb, Imm::Ib),
        0xB8..=0xBF => ni(v!(MovRwIw, MovRdId), Imm::Iv),
        0xC0 => mi(Op::ShiftEbIb, Imm::Ib),
        0xC1 => mi(v!(ShiftEwIb, ShiftEdIb), Imm::Ib),
        0xC2 => ni(Op::RetNearIw, Imm::Iw),
        0xC3 => n(Op::RetNear),
        0xC4 => m(v!(LesGwMp, LesGdMp)),
        0xC5 => m(v!(LdsGwMp, LdsGdMp)),
        0xC6 => g(Group::Mov8, Imm::Ib),
        0xC7 => g(Group::MovV, Imm::Iv),
        0xC8 => ni(Op::Enter, Imm::IwIb),
        0xC9 => n(Op::Leave),
        0xCA => ni(Op::RetFarIw, Imm::Iw),
        0xCB => n(Op::RetFar),
        0xCC => n(Op::Int3),
        0xCD => ni(Op::IntIb, Imm::Ib),
        0xCE => n(Op::Into),
        0xCF => n(v!(Iret, Iretd)),
        0xD0 => m(Op::ShiftEb1),
        0xD1 => m(v!(ShiftEw1, ShiftEd1)),
        0xD2 => m(Op::ShiftEbCl),
        0xD3 => m(v!(ShiftEwCl, ShiftEdCl)),
        0xD4 => ni(Op::Aam, Imm::Ib),
        0xD5 => ni(Op::Aad, Imm::Ib),
        0xD6 => n(Op::Salc),
        0xD7 => n(Op::Xlat),
        0xD8..=0xDF => m(Op::Esc),
        0xE0 => ni(Op::Loopne, Imm::Jb),
        0xE1 => ni(Op::Loope, Imm::Jb),
        0xE2 => ni(Op::Loop, Imm::Jb),
        0xE3 => ni(Op::Jcxz, Imm::Jb),
        0xE4 => ni(Op::InAlIb, Imm::Ib),
        0xE5 => ni(v!(InAxIb, InEaxIb), Imm::Ib),
        0xE6 => ni(Op::OutIbAl, Imm::Ib),
        0xE7 => ni(v!(OutIbAx, OutIbEax), Imm::Ib),
        0xE8 => ni(Op::CallRel, Imm::Jv),
        0xE9 => ni(Op::JmpRel, Imm::Jv),
        0xEA => ni(Op::JmpFarAp, Imm::Ap),
        0xEB => ni(Op::JmpRel, Imm::Jb),
        0xEC => n(Op::InAlDx),
        0xED => n(v!(InAxDx, InEaxDx)),
        0xEE => n(Op::OutDxAl),
        0xEF => n(v!(OutDxAx, OutDxEax)),
        0xF1 => x(n(Op::Int1)),
        0xF4 => n(Op::Hlt),
        0xF5 => n(Op::Cmc),
        0xF6 => g(Group::Unary8, Imm::None),
        0xF7 => g(Group::UnaryV, Imm::None),
        0xF8 => n(Op::Clc),
        0xF9 => n(Op::Stc),
        0xFA => n(Op::Cli),
        0xFB => n(Op::Sti),
        0xFC => n(Op::Cld),
        0xFD => n(Op::Std),
        0xFE => g(Group::IncDec8, Imm::None),
        0xFF => g(Group::IncDecV, Imm::None),

        // 0F map
        0x100 => g(Group::System0F00, Imm::None),
        0x101 => g(Group::System0F01, Imm::None),
        0x102 => m(v!(LarGwEw, LarGdEw)),
        0x103 => m(v!(LslGwEw, LslGdEw)),
        0x105 => OpcodeEntry {
            flags: F_286,
            ..n(Op::Loadall)
        },
        0x106 => n(Op::Clts),
        0x120 => x(m(Op::MovRdCd)),
        0x121 => x(m(Op::MovRdDd)),
        0x122 => x(m(Op::MovCdRd)),
        0x123 => x(m(Op::MovDdRd)),
        0x124 => x(m(Op::MovRdTd)),
        0x126 => x(m(Op::MovTdRd)),
        0x180..=0x18F => x(ni(JCC[(index & 0x0F) as usize], Imm::Jv)),
        0x190..=0x19F => x(m(SETCC[(index & 0x0F) as usize])),
        0x1A0 => x(n(Op::PushFs)),
        0x1A1 => x(n(Op::PopFs)),
        0x1A3 => x(m(v!(BtEwGw, BtEdGd))),
        0x1A4 => x(mi(v!(ShldEwGwIb, ShldEdGdIb), Imm::Ib)),
        0x1A5 => x(m(v!(ShldEwGwCl, ShldEdGdCl))),
        0x1A8 => x(n(Op::PushGs)),
        0x1A9 => x(n(Op::PopGs)),
        0x1AB => x(m(v!(BtsEwGw, BtsEdGd))),
        0x1AC => x(mi(v!(ShrdEwGwIb, ShrdEdGdIb), Imm::Ib)),
        0x1AD => x(m(v!(ShrdEwGwCl, ShrdEdGdCl))),
        0x1AF => x(m(v!(ImulGwEw, ImulGdEd))),
        0x1B2 => x(m(v!(LssGwMp, LssGdMp))),
        0x1B3 => x(m(v!(BtrEwGw, BtrEdGd))),
        0x1B4 => x(m(v!(LfsGwMp, LfsGdMp))),
        0x1B5 => x(m(v!(LgsGwMp, LgsGdMp))),
        0x1B6 => x(m(v!(MovzxGwEb, MovzxGdEb))),
        0x1B7 => x(m(v!(MovGwEw, MovzxGdEw))),
        0x1BA => x(g(Group::BitTest, Imm::Ib)),
        0x1BB => x(m(v!(BtcEwGw, BtcEdGd))),
        0x1BC => x(m(v!(BsfGwEw, BsfGdEd))),
        0x1BD => x(m(v!(BsrGwEw, BsrGdEd))),
        0x1BE => x(m(v!(MovsxGwEb, MovsxGdEb))),
        0x1BF => x(m(v!(MovGwEw, MovsxGdEw))),
        _ => EMPTY,
    }
}

const fn build_table(op32: bool) -> [OpcodeEntry; 512] {
    let mut table = [EMPTY; 512];
    let mut i = 0;
    while i < 512 {
        table[i] = entry(i as u16, op32);
        i += 1;
    }
    table
}

pub(crate) static DECODE_16: [OpcodeEntry; 512] = build_table(false);
pub(crate) static DECODE_32: [OpcodeEntry; 512] = build_table(true);

/// Resolve a group opcode by its ModR/M reg field. Returns the operation and, for the unary
/// group's TEST, the immediate it carries.
pub(crate) fn group_op(group: Group, reg: u8, op32: bool, imm: Imm) -> (Op, Imm) {
    let v = |w: Op, d: Op| if op32 { d } else { w };
    let op = match (group, reg) {
        (Group::Alu8, _) => [
            Op::AddEbIb,
            Op::OrEbIb,
            Op::AdcEbIb,
            Op::SbbEbIb,
            Op::AndEbIb,
            Op::SubEbIb,
            Op::XorEbIb,
            Op::CmpEbIb,
        ][reg as usize & 7],
        (Group::AluV, _) if op32 => [
            Op::AddEdId,
            Op::OrEdId,
            Op::AdcEdId,
            Op::SbbEdId,
            Op::AndEdId,
            Op::SubEdId,
            Op::XorEdId,
            Op::CmpEdId,
        ][reg as usize & 7],
        (Group::AluV, _) => [
            Op::AddEwIw,
            Op::OrEwIw,
            Op::AdcEwIw,
            Op::SbbEwIw,
            Op::AndEwIw,
            Op::SubEwIw,
            Op::XorEwIw,
            Op::CmpEwIw,
        ][reg as usize & 7],
        (Group::Unary8, 0 | 1) => return (Op::TestEbIb, Imm::Ib),
        (Group::Unary8, 2) => Op::NotEb,
        (Group::Unary8, 3) => Op::NegEb,
        (Group::Unary8, 4) => Op::MulEb,
        (Group::Unary8, 5) => Op::ImulEb,
        (Group::Unary8, 6) => Op::DivEb,
        (Group::Unary8, _) => Op::IdivEb,
        (Group::UnaryV, 0 | 1) => return (v(Op::TestEwIw, Op::TestEdId), Imm::Iv),
        (Group::UnaryV, 2) => v(Op::NotEw, Op::NotEd),
        (Group::UnaryV, 3) => v(Op::NegEw, Op::NegEd),
        (Group::UnaryV, 4) => v(Op::MulEw, Op::MulEd),
        (Group::UnaryV, 5) => v(Op::ImulEw, Op::ImulEd),
        (Group::UnaryV, 6) => v(Op::DivEw, Op::DivEd),
        (Group::UnaryV, _) => v(Op::IdivEw, Op::IdivEd),
        (Group::IncDec8, 0) => Op::IncEb,
        (Group::IncDec8, 1) => Op::DecEb,
        (Group::IncDecV, 0) => v(Op::IncEw, Op::IncEd),
        (Group::IncDecV, 1) => v(Op::DecEw, Op::DecEd),
        (Group::IncDecV, 2) => v(Op::CallEw, Op::CallEd),
        (Group::IncDecV, 3) => v(Op::CallFarMw, Op::CallFarMd),
        (Group::IncDecV, 4) => v(Op::JmpEw, Op::JmpEd),
        (Group::IncDecV, 5) => v(Op::JmpFarMw, Op::JmpFarMd),
        (Group::IncDecV, 6) => v(Op::PushEw, Op::PushEd),
        (Group::Pop, 0) => v(Op::PopEw, Op::PopEd),
        (Group::Mov8, 0) => Op::MovEbIb,
        (Group::MovV, 0) => v(Op::MovEwIw, Op::MovEdId),
        (Group::System0F00, 0) => Op::Sldt,
        (Group::System0F00, 1) => Op::Str,
        (Group::System0F00, 2) => Op::Lldt,
        (Group::System0F00, 3) => Op::Ltr,
        (Group::System0F00, 4) => Op::Verr,
        (Group::System0F00, 5) => Op::Verw,
        (Group::System0F01, 0) => Op::Sgdt,
        (Group::System0F01, 1) => Op::Sidt,
        (Group::System0F01, 2) => Op::Lgdt,
        (Group::System0F01, 3) => Op::Lidt,
        (Group::System0F01, 4) => Op::Smsw,
        (Group::System0F01, 6) => Op::Lmsw,
        (Group::BitTest, 4) => v(Op::BtEwIb, Op::BtEdIb),
        (Group::BitTest, 5) => v(Op::BtsEwIb, Op::BtsEdIb),
        (Group::BitTest, 6) => v(Op::BtrEwIb, Op::BtrEdIb),
        (Group::BitTest, 7) => v(Op::BtcEwIb, Op::BtcEdIb),
        _ => Op::Invalid,
    };
    (op, imm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_size_tables_differ() {
        assert_eq!(DECODE_16[0x01].op, Op::AddEwGw);
        assert_eq!(DECODE_32[0x01].op, Op::AddEdGd);
        assert_eq!(DECODE_16[0x3D].op, Op::CmpAxIw);
        assert_eq!(DECODE_32[0x3D].op, Op::CmpEaxId);
        assert_eq!(DECODE_16[0x98].op, Op::Cbw);
        assert_eq!(DECODE_32[0x98].op, Op::Cwde);
        assert_eq!(DECODE_16[0x06].op, Op::PushEs);
        assert_eq!(DECODE_16[0x26].op, Op::Invalid);
        assert_eq!(DECODE_16[0x184].op, Op::Jz);
        assert_ne!(DECODE_16[0x184].flags & F_386, 0);
    }

    #[test]
    fn test_group_resolution() {
        assert_eq!(group_op(Group::AluV, 7, true, Imm::Ibs), (Op::CmpEdId, Imm::Ibs));
        assert_eq!(group_op(Group::Unary8, 1, false, Imm::None), (Op::TestEbIb, Imm::Ib));
        assert_eq!(group_op(Group::IncDecV, 7, false, Imm::None).0, Op::Invalid);
        assert_eq!(group_op(Group::System0F01, 5, false, Imm::None).0, Op::Invalid);
    }
}
