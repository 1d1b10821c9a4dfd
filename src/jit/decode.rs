//! Decoder for the instruction subset the emitter produces.
//!
//! Used to print listings and by the simulator. Words outside the subset
//! decode to `None`.

use std::fmt;

use super::aarch64::{Cond, decode_bitmask, expand_fp_imm};

/// Width and register file of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemSize {
    /// 64-bit general-purpose.
    X,
    /// 32-bit general-purpose.
    W,
    /// 64-bit floating point.
    D,
}

impl MemSize {
    pub fn bytes(self) -> i64 {
        match self {
            MemSize::X | MemSize::D => 8,
            MemSize::W => 4,
        }
    }

    fn reg(self, n: u8) -> RegName {
        match self {
            MemSize::X => RegName::X(n),
            MemSize::W => RegName::W(n),
            MemSize::D => RegName::D(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// One decoded instruction. Branch and literal offsets are in bytes,
/// relative to the instruction itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inst {
    /// ORR Xd, XZR, Xm
    MovReg { rd: u8, rm: u8 },
    /// ADD/SUB (immediate); register 31 is SP.
    AddImm { rd: u8, rn: u8, imm: u64 },
    SubImm { rd: u8, rn: u8, imm: u64 },
    AddReg { rd: u8, rn: u8, rm: u8 },
    SubReg { rd: u8, rn: u8, rm: u8 },
    /// SUBS XZR/WZR, Rn, Rm
    CmpReg { rn: u8, rm: u8, wide: bool },
    CmpImm { rn: u8, imm: u64, wide: bool },
    Movz { rd: u8, imm16: u16, shift: u32, wide: bool },
    Movk { rd: u8, imm16: u16, shift: u32, wide: bool },
    AndImm { rd: u8, rn: u8, imm: u64 },
    Load { size: MemSize, rt: u8, rn: u8, offset: i64 },
    Store { size: MemSize, rt: u8, rn: u8, offset: i64 },
    LoadPair { size: MemSize, rt1: u8, rt2: u8, rn: u8, offset: i64 },
    StorePair { size: MemSize, rt1: u8, rt2: u8, rn: u8, offset: i64 },
    LoadLiteral { size: MemSize, rt: u8, offset: i64 },
    B { offset: i64 },
    Bl { offset: i64 },
    BCond { cond: Cond, offset: i64 },
    Cbz { rt: u8, offset: i64 },
    Cbnz { rt: u8, offset: i64 },
    Br { rn: u8 },
    Blr { rn: u8 },
    Ret,
    FmovReg { rd: u8, rn: u8 },
    /// FMOV Dd, Xn
    FmovToVec { rd: u8, rn: u8 },
    /// FMOV Xd, Dn
    FmovToGp { rd: u8, rn: u8 },
    FmovImm { rd: u8, bits: u64 },
    MoviZero { rd: u8 },
    FArith { op: FpOp, rd: u8, rn: u8, rm: u8 },
    Fneg { rd: u8, rn: u8 },
    Fcmp { rn: u8, rm: u8 },
    FcmpZero { rn: u8 },
    Nop,
}

fn field(word: u32, lo: u32, bits: u32) -> u32 {
    (word >> lo) & ((1 << bits) - 1)
}

fn reg(word: u32, lo: u32) -> u8 {
    field(word, lo, 5) as u8
}

fn sign_extend(value: u32, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value as i64) << shift) >> shift
}

/// Decode one instruction word.
pub fn decode(word: u32) -> Option<Inst> {
    let rd = reg(word, 0);
    let rn = reg(word, 5);
    let rm = reg(word, 16);

    if word == 0xD503_201F {
        return Some(Inst::Nop);
    }
    if word == 0xD65F_03C0 {
        return Some(Inst::Ret);
    }
    match word & 0xFFFF_FC1F {
        0xD61F_0000 => return Some(Inst::Br { rn }),
        0xD63F_0000 => return Some(Inst::Blr { rn }),
        0x1E60_2008 if rm == 0 => return Some(Inst::FcmpZero { rn }),
        _ => {}
    }
    if word & 0xFFE0_FFE0 == 0xAA00_03E0 {
        return Some(Inst::MovReg { rd, rm });
    }
    match word & 0xFFE0_FC1F {
        0xEB00_001F => return Some(Inst::CmpReg { rn, rm, wide: true }),
        0x6B00_001F => return Some(Inst::CmpReg { rn, rm, wide: false }),
        0x1E60_2000 => return Some(Inst::Fcmp { rn, rm }),
        _ => {}
    }
    match word & 0xFFE0_FC00 {
        0x8B00_0000 => return Some(Inst::AddReg { rd, rn, rm }),
        0xCB00_0000 => return Some(Inst::SubReg { rd, rn, rm }),
        0x1E60_2800 => return Some(Inst::FArith { op: FpOp::Add, rd, rn, rm }),
        0x1E60_3800 => return Some(Inst::FArith { op: FpOp::Sub, rd, rn, rm }),
        0x1E60_0800 => return Some(Inst::FArith { op: FpOp::Mul, rd, rn, rm }),
        0x1E60_1800 => return Some(Inst::FArith { op: FpOp::Div, rd, rn, rm }),
        _ => {}
    }
    match word & 0xFFFF_FC00 {
        0x1E60_4000 => return Some(Inst::FmovReg { rd, rn }),
        0x1E61_4000 => return Some(Inst::Fneg { rd, rn }),
        0x9E67_0000 => return Some(Inst::FmovToVec { rd, rn }),
        0x9E66_0000 => return Some(Inst::FmovToGp { rd, rn }),
        _ => {}
    }
    if word & 0xFFFF_FFE0 == 0x2F00_E400 {
        return Some(Inst::MoviZero { rd });
    }
    if word & 0xFFE0_1FE0 == 0x1E60_1000 {
        let imm8 = field(word, 13, 8) as u8;
        return Some(Inst::FmovImm { rd, bits: expand_fp_imm(imm8) });
    }

    // Add/subtract immediate, compare immediate.
    let shifted_imm = || {
        let imm = field(word, 10, 12) as u64;
        if field(word, 22, 1) == 1 { imm << 12 } else { imm }
    };
    if word & 0xFF80_001F == 0xF100_001F {
        return Some(Inst::CmpImm { rn, imm: shifted_imm(), wide: true });
    }
    if word & 0xFF80_001F == 0x7100_001F {
        return Some(Inst::CmpImm { rn, imm: shifted_imm(), wide: false });
    }
    match word & 0xFF80_0000 {
        0x9100_0000 => return Some(Inst::AddImm { rd, rn, imm: shifted_imm() }),
        0xD100_0000 => return Some(Inst::SubImm { rd, rn, imm: shifted_imm() }),
        0x9200_0000 => {
            let imm = decode_bitmask(field(word, 22, 1), field(word, 16, 6), field(word, 10, 6))?;
            return Some(Inst::AndImm { rd, rn, imm });
        }
        _ => {}
    }

    // Move wide.
    let imm16 = field(word, 5, 16) as u16;
    let shift = field(word, 21, 2) * 16;
    match word & 0xFF80_0000 {
        0xD280_0000 => return Some(Inst::Movz { rd, imm16, shift, wide: true }),
        0x5280_0000 => return Some(Inst::Movz { rd, imm16, shift, wide: false }),
        0xF280_0000 => return Some(Inst::Movk { rd, imm16, shift, wide: true }),
        0x7280_0000 => return Some(Inst::Movk { rd, imm16, shift, wide: false }),
        _ => {}
    }

    // Loads and stores, unsigned scaled offset.
    let scaled = |size: MemSize| field(word, 10, 12) as i64 * size.bytes();
    match word & 0xFFC0_0000 {
        0xF940_0000 => return Some(Inst::Load { size: MemSize::X, rt: rd, rn, offset: scaled(MemSize::X) }),
        0xF900_0000 => return Some(Inst::Store { size: MemSize::X, rt: rd, rn, offset: scaled(MemSize::X) }),
        0xB940_0000 => return Some(Inst::Load { size: MemSize::W, rt: rd, rn, offset: scaled(MemSize::W) }),
        0xB900_0000 => return Some(Inst::Store { size: MemSize::W, rt: rd, rn, offset: scaled(MemSize::W) }),
        0xFD40_0000 => return Some(Inst::Load { size: MemSize::D, rt: rd, rn, offset: scaled(MemSize::D) }),
        0xFD00_0000 => return Some(Inst::Store { size: MemSize::D, rt: rd, rn, offset: scaled(MemSize::D) }),
        _ => {}
    }

    // Unscaled signed offset.
    let unscaled = sign_extend(field(word, 12, 9), 9);
    match word & 0xFFE0_0C00 {
        0xF840_0000 => return Some(Inst::Load { size: MemSize::X, rt: rd, rn, offset: unscaled }),
        0xF800_0000 => return Some(Inst::Store { size: MemSize::X, rt: rd, rn, offset: unscaled }),
        0xB840_0000 => return Some(Inst::Load { size: MemSize::W, rt: rd, rn, offset: unscaled }),
        0xB800_0000 => return Some(Inst::Store { size: MemSize::W, rt: rd, rn, offset: unscaled }),
        0xFC40_0000 => return Some(Inst::Load { size: MemSize::D, rt: rd, rn, offset: unscaled }),
        0xFC00_0000 => return Some(Inst::Store { size: MemSize::D, rt: rd, rn, offset: unscaled }),
        _ => {}
    }

    // Pairs, signed offset.
    let rt2 = reg(word, 10);
    let pair = sign_extend(field(word, 15, 7), 7) * 8;
    match word & 0xFFC0_0000 {
        0xA900_0000 => return Some(Inst::StorePair { size: MemSize::X, rt1: rd, rt2, rn, offset: pair }),
        0xA940_0000 => return Some(Inst::LoadPair { size: MemSize::X, rt1: rd, rt2, rn, offset: pair }),
        0x6D00_0000 => return Some(Inst::StorePair { size: MemSize::D, rt1: rd, rt2, rn, offset: pair }),
        0x6D40_0000 => return Some(Inst::LoadPair { size: MemSize::D, rt1: rd, rt2, rn, offset: pair }),
        _ => {}
    }

    // PC-relative.
    let imm19 = sign_extend(field(word, 5, 19), 19) * 4;
    match word & 0xFF00_0000 {
        0x5800_0000 => return Some(Inst::LoadLiteral { size: MemSize::X, rt: rd, offset: imm19 }),
        0x5C00_0000 => return Some(Inst::LoadLiteral { size: MemSize::D, rt: rd, offset: imm19 }),
        0x3400_0000 => return Some(Inst::Cbz { rt: rd, offset: imm19 }),
        0x3500_0000 => return Some(Inst::Cbnz { rt: rd, offset: imm19 }),
        0x5400_0000 if word & 0x10 == 0 => {
            return Some(Inst::BCond { cond: Cond::from_bits(word), offset: imm19 });
        }
        _ => {}
    }
    let imm26 = sign_extend(field(word, 0, 26), 26) * 4;
    match word & 0xFC00_0000 {
        0x1400_0000 => Some(Inst::B { offset: imm26 }),
        0x9400_0000 => Some(Inst::Bl { offset: imm26 }),
        _ => None,
    }
}

/// A register name as printed in listings.
#[derive(Clone, Copy)]
enum RegName {
    X(u8),
    W(u8),
    D(u8),
    /// X register where 31 means SP.
    XSp(u8),
}

impl fmt::Display for RegName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RegName::X(31) => write!(f, "xzr"),
            RegName::W(31) => write!(f, "wzr"),
            RegName::XSp(31) => write!(f, "sp"),
            RegName::X(n) | RegName::XSp(n) => write!(f, "x{n}"),
            RegName::W(n) => write!(f, "w{n}"),
            RegName::D(n) => write!(f, "d{n}"),
        }
    }
}

fn target(offset: i64) -> String {
    if offset >= 0 {
        format!(".+{offset}")
    } else {
        format!(".-{}", -offset)
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RegName::{D, W, X, XSp};
        match *self {
            Inst::MovReg { rd, rm } => write!(f, "mov {}, {}", X(rd), X(rm)),
            Inst::AddImm { rd, rn: 31, imm: 0 } => write!(f, "mov {}, sp", XSp(rd)),
            Inst::AddImm { rd, rn, imm } => write!(f, "add {}, {}, #{imm:#x}", XSp(rd), XSp(rn)),
            Inst::SubImm { rd, rn, imm } => write!(f, "sub {}, {}, #{imm:#x}", XSp(rd), XSp(rn)),
            Inst::AddReg { rd, rn, rm } => write!(f, "add {}, {}, {}", X(rd), X(rn), X(rm)),
            Inst::SubReg { rd, rn, rm } => write!(f, "sub {}, {}, {}", X(rd), X(rn), X(rm)),
            Inst::CmpReg { rn, rm, wide: true } => write!(f, "cmp {}, {}", X(rn), X(rm)),
            Inst::CmpReg { rn, rm, wide: false } => write!(f, "cmp {}, {}", W(rn), W(rm)),
            Inst::CmpImm { rn, imm, wide: true } => write!(f, "cmp {}, #{imm:#x}", X(rn)),
            Inst::CmpImm { rn, imm, wide: false } => write!(f, "cmp {}, #{imm:#x}", W(rn)),
            Inst::Movz { rd, imm16, shift, wide } | Inst::Movk { rd, imm16, shift, wide } => {
                let name = if matches!(self, Inst::Movz { .. }) { "movz" } else { "movk" };
                let r = if wide { X(rd) } else { W(rd) };
                write!(f, "{name} {r}, #{imm16:#x}")?;
                if shift != 0 {
                    write!(f, ", lsl #{shift}")?;
                }
                Ok(())
            }
            Inst::AndImm { rd, rn, imm } => write!(f, "and {}, {}, #{imm:#x}", X(rd), X(rn)),
            Inst::Load { size, rt, rn, offset } | Inst::Store { size, rt, rn, offset } => {
                let load = matches!(self, Inst::Load { .. });
                let unscaled = offset < 0 || offset % size.bytes() != 0;
                let name = match (load, unscaled) {
                    (true, false) => "ldr",
                    (true, true) => "ldur",
                    (false, false) => "str",
                    (false, true) => "stur",
                };
                write!(f, "{name} {}, [{}, #{offset}]", size.reg(rt), XSp(rn))
            }
            Inst::LoadPair { size, rt1, rt2, rn, offset } | Inst::StorePair { size, rt1, rt2, rn, offset } => {
                let name = if matches!(self, Inst::LoadPair { .. }) { "ldp" } else { "stp" };
                write!(f, "{name} {}, {}, [{}, #{offset}]", size.reg(rt1), size.reg(rt2), XSp(rn))
            }
            Inst::LoadLiteral { size, rt, offset } => write!(f, "ldr {}, {}", size.reg(rt), target(offset)),
            Inst::B { offset } => write!(f, "b {}", target(offset)),
            Inst::Bl { offset } => write!(f, "bl {}", target(offset)),
            Inst::BCond { cond, offset } => write!(f, "b.{} {}", cond.name(), target(offset)),
            Inst::Cbz { rt, offset } => write!(f, "cbz {}, {}", W(rt), target(offset)),
            Inst::Cbnz { rt, offset } => write!(f, "cbnz {}, {}", W(rt), target(offset)),
            Inst::Br { rn } => write!(f, "br {}", X(rn)),
            Inst::Blr { rn } => write!(f, "blr {}", X(rn)),
            Inst::Ret => write!(f, "ret"),
            Inst::FmovReg { rd, rn } => write!(f, "fmov {}, {}", D(rd), D(rn)),
            Inst::FmovToVec { rd, rn } => write!(f, "fmov {}, {}", D(rd), X(rn)),
            Inst::FmovToGp { rd, rn } => write!(f, "fmov {}, {}", X(rd), D(rn)),
            Inst::FmovImm { rd, bits } => write!(f, "fmov {}, #{}", D(rd), f64::from_bits(bits)),
            Inst::MoviZero { rd } => write!(f, "movi {}, #0", D(rd)),
            Inst::FArith { op, rd, rn, rm } => {
                let name = match op {
                    FpOp::Add => "fadd",
                    FpOp::Sub => "fsub",
                    FpOp::Mul => "fmul",
                    FpOp::Div => "fdiv",
                };
                write!(f, "{name} {}, {}, {}", D(rd), D(rn), D(rm))
            }
            Inst::Fneg { rd, rn } => write!(f, "fneg {}, {}", D(rd), D(rn)),
            Inst::Fcmp { rn, rm } => write!(f, "fcmp {}, {}", D(rn), D(rm)),
            Inst::FcmpZero { rn } => write!(f, "fcmp {}, #0.0", D(rn)),
            Inst::Nop => write!(f, "nop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::aarch64::{AArch64Assembler, GpX, VecD};
    use crate::jit::codebuf::CodeBuffer;

    fn assemble(f: impl FnOnce(&mut AArch64Assembler)) -> Vec<Inst> {
        let mut buf = CodeBuffer::new();
        f(&mut AArch64Assembler::new(&mut buf));
        buf.code()
            .chunks(4)
            .map(|w| decode(u32::from_le_bytes([w[0], w[1], w[2], w[3]])).unwrap())
            .collect()
    }

    #[test]
    fn test_decode_frame_accesses() {
        let fp = GpX::new(19);
        let insts = assemble(|a| {
            a.ldur(GpX::X1, fp, -32).unwrap();
            a.str_d(VecD::new(17), fp, 24).unwrap();
            a.stp(GpX::new(19), GpX::new(20), GpX::SP, 32).unwrap();
        });
        assert_eq!(insts[0], Inst::Load { size: MemSize::X, rt: 1, rn: 19, offset: -32 });
        assert_eq!(insts[1], Inst::Store { size: MemSize::D, rt: 17, rn: 19, offset: 24 });
        assert_eq!(insts[2].to_string(), "stp x19, x20, [sp, #32]");
    }

    #[test]
    fn test_decode_immediates() {
        let insts = assemble(|a| {
            a.movz(GpX::new(21), 0xFFF9, 3);
            a.and_imm(GpX::X0, GpX::X0, 0x0000_FFFF_FFFF_FFFF).unwrap();
            a.fmov_imm(VecD::new(16), -0.5).unwrap();
            a.sub_imm(GpX::SP, GpX::SP, 96).unwrap();
        });
        assert_eq!(insts[0].to_string(), "movz x21, #0xfff9, lsl #48");
        assert_eq!(insts[1], Inst::AndImm { rd: 0, rn: 0, imm: 0x0000_FFFF_FFFF_FFFF });
        assert_eq!(insts[2], Inst::FmovImm { rd: 16, bits: (-0.5f64).to_bits() });
        assert_eq!(insts[3].to_string(), "sub sp, sp, #0x60");
    }

    #[test]
    fn test_decode_fp_and_compare() {
        let insts = assemble(|a| {
            a.fadd(VecD::new(16), VecD::new(17), VecD::new(18));
            a.fcmp_zero(VecD::new(8));
            a.cmp(GpX::X1, GpX::new(21));
            a.fmov_to_gp(GpX::X0, VecD::D0);
        });
        assert_eq!(insts[0].to_string(), "fadd d16, d17, d18");
        assert_eq!(insts[1], Inst::FcmpZero { rn: 8 });
        assert_eq!(insts[2], Inst::CmpReg { rn: 1, rm: 21, wide: true });
        assert_eq!(insts[3], Inst::FmovToGp { rd: 0, rn: 0 });
    }

    #[test]
    fn test_decode_branches() {
        assert_eq!(decode(0x1400_0002), Some(Inst::B { offset: 8 }));
        assert_eq!(decode(0x54FF_FFE3), Some(Inst::BCond { cond: Cond::Lo, offset: -4 }));
        assert_eq!(decode(0xD61F_0200), Some(Inst::Br { rn: 16 }));
        assert_eq!(decode(0x0000_0000), None);
    }
}
