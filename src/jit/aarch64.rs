/// AArch64 instruction encoding for JIT compilation.
///
/// Only the forms the emitter needs are covered. Forms with a limited
/// immediate or displacement range validate before emitting anything and
/// return an [`EncodeError`], so a caller can retry with a longer sequence.
use thiserror::Error;

use super::codebuf::{CodeBuffer, FixupKind, Label};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("immediate out of range for instruction")]
    InvalidImmediate,
    #[error("memory displacement out of range")]
    InvalidDisplacement,
    #[error("branch target out of range")]
    BranchOutOfRange,
    #[error("branch to unbound label")]
    UnboundLabel,
}

/// A 64-bit general-purpose register. Code 31 is SP or XZR by context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpX(u8);

/// The 32-bit view of a general-purpose register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpW(u8);

/// The 64-bit scalar view of a SIMD/FP register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VecD(u8);

impl GpX {
    pub const X0: GpX = GpX(0);
    pub const X1: GpX = GpX(1);
    pub const X2: GpX = GpX(2);
    pub const X3: GpX = GpX(3);
    pub const X4: GpX = GpX(4);
    pub const X16: GpX = GpX(16);
    pub const FP: GpX = GpX(29);
    pub const LR: GpX = GpX(30);
    pub const SP: GpX = GpX(31);
    pub const XZR: GpX = GpX(31);

    pub const fn new(n: u8) -> Self {
        assert!(n < 32);
        GpX(n)
    }

    pub const fn code(self) -> u32 {
        self.0 as u32
    }

    pub const fn w(self) -> GpW {
        GpW(self.0)
    }
}

impl GpW {
    pub const fn new(n: u8) -> Self {
        assert!(n < 32);
        GpW(n)
    }

    pub const fn code(self) -> u32 {
        self.0 as u32
    }

    pub const fn x(self) -> GpX {
        GpX(self.0)
    }
}

impl VecD {
    pub const D0: VecD = VecD(0);

    pub const fn new(n: u8) -> Self {
        assert!(n < 32);
        VecD(n)
    }

    pub const fn code(self) -> u32 {
        self.0 as u32
    }
}

/// AArch64 condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    Eq = 0b0000,
    Ne = 0b0001,
    Hs = 0b0010, // carry set / unsigned higher or same
    Lo = 0b0011, // carry clear / unsigned lower
    Mi = 0b0100,
    Pl = 0b0101,
    Vs = 0b0110,
    Vc = 0b0111,
    Hi = 0b1000,
    Ls = 0b1001,
    Ge = 0b1010,
    Lt = 0b1011,
    Gt = 0b1100,
    Le = 0b1101,
    Al = 0b1110,
}

impl Cond {
    pub fn from_bits(bits: u32) -> Cond {
        match bits & 0xF {
            0b0000 => Cond::Eq,
            0b0001 => Cond::Ne,
            0b0010 => Cond::Hs,
            0b0011 => Cond::Lo,
            0b0100 => Cond::Mi,
            0b0101 => Cond::Pl,
            0b0110 => Cond::Vs,
            0b0111 => Cond::Vc,
            0b1000 => Cond::Hi,
            0b1001 => Cond::Ls,
            0b1010 => Cond::Ge,
            0b1011 => Cond::Lt,
            0b1100 => Cond::Gt,
            0b1101 => Cond::Le,
            _ => Cond::Al,
        }
    }

    /// The condition that holds exactly when `self` does not.
    pub fn invert(self) -> Cond {
        debug_assert!(self != Cond::Al);
        Cond::from_bits(self as u32 ^ 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Hs => "hs",
            Cond::Lo => "lo",
            Cond::Mi => "mi",
            Cond::Pl => "pl",
            Cond::Vs => "vs",
            Cond::Vc => "vc",
            Cond::Hi => "hi",
            Cond::Ls => "ls",
            Cond::Ge => "ge",
            Cond::Lt => "lt",
            Cond::Gt => "gt",
            Cond::Le => "le",
            Cond::Al => "al",
        }
    }
}

/// Encode `value` as a logical-immediate bitmask, returning `N:immr:imms`
/// packed into 13 bits.
pub fn encode_bitmask(value: u64) -> Option<u32> {
    if value == 0 || value == u64::MAX {
        return None;
    }
    // Smallest repeating element.
    let mut size = 64u32;
    while size > 2 {
        let half = size / 2;
        let mask = (1u64 << half) - 1;
        if value & mask != (value >> half) & mask {
            break;
        }
        size = half;
    }
    let mask = if size == 64 { u64::MAX } else { (1u64 << size) - 1 };
    let elem = value & mask;
    let ones = elem.count_ones();
    let run = (1u64 << ones) - 1;
    // Find the left rotation that turns the element into a low run of ones.
    let immr = (0..size).find(|&r| {
        let rotated = if r == 0 {
            elem
        } else {
            ((elem << r) | (elem >> (size - r))) & mask
        };
        rotated == run
    })?;
    let n = u32::from(size == 64);
    let imms = ((!((size << 1) - 1)) & 0x3F) | (ones - 1);
    Some((n << 12) | (immr << 6) | imms)
}

/// Inverse of [`encode_bitmask`].
pub fn decode_bitmask(n: u32, immr: u32, imms: u32) -> Option<u64> {
    let combined = (n << 6) | (!imms & 0x3F);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if len < 1 {
        return None;
    }
    let size = 1u32 << len;
    let levels = size - 1;
    let s = imms & levels;
    let r = immr & levels;
    if s == levels {
        return None;
    }
    let mask = if size == 64 { u64::MAX } else { (1u64 << size) - 1 };
    let welem = (1u64 << (s + 1)) - 1;
    let elem = if r == 0 {
        welem
    } else {
        ((welem >> r) | (welem << (size - r))) & mask
    };
    let mut value = elem;
    let mut width = size;
    while width < 64 {
        value |= value << width;
        width *= 2;
    }
    Some(value)
}

/// The 8-bit FMOV immediate for the double with these bits, if any.
pub fn encode_fp_imm(bits: u64) -> Option<u8> {
    if bits & 0x0000_FFFF_FFFF_FFFF != 0 {
        return None;
    }
    let b = (bits >> 54) & 1;
    let expected = if b == 1 { 0xFF } else { 0 };
    if (bits >> 54) & 0xFF != expected {
        return None;
    }
    if (bits >> 62) & 1 == b {
        return None;
    }
    let sign = (bits >> 63) & 1;
    let cd = (bits >> 52) & 3;
    let efgh = (bits >> 48) & 0xF;
    Some(((sign << 7) | (b << 6) | (cd << 4) | efgh) as u8)
}

/// Expand an 8-bit FMOV immediate into double bits.
pub fn expand_fp_imm(imm8: u8) -> u64 {
    let imm = imm8 as u64;
    let sign = imm >> 7;
    let b = (imm >> 6) & 1;
    let replicated: u64 = if b == 1 { 0xFF } else { 0 };
    let exp = ((b ^ 1) << 10) | (replicated << 2) | ((imm >> 4) & 3);
    (sign << 63) | (exp << 52) | ((imm & 0xF) << 48)
}

/// Number of non-zero 16-bit halves of `value`.
pub fn nonzero_halves(value: u64) -> usize {
    (0..4).filter(|&i| (value >> (i * 16)) & 0xFFFF != 0).count()
}

/// Whether `value` can be built with at most two MOVZ/MOVK instructions.
pub fn is_cheap_imm(value: u64) -> bool {
    nonzero_halves(value) <= 2
}

fn imm12(imm: u64) -> Result<u32, EncodeError> {
    if imm < 0x1000 {
        Ok((imm as u32) << 10)
    } else if imm & 0xFFF == 0 && imm < 0x100_0000 {
        Ok((1 << 22) | (((imm >> 12) as u32) << 10))
    } else {
        Err(EncodeError::InvalidImmediate)
    }
}

fn scaled_offset(offset: i64, size: i64) -> Result<u32, EncodeError> {
    if offset < 0 || offset % size != 0 || offset / size >= 0x1000 {
        return Err(EncodeError::InvalidDisplacement);
    }
    Ok(((offset / size) as u32) << 10)
}

fn unscaled_offset(offset: i64) -> Result<u32, EncodeError> {
    if !(-256..=255).contains(&offset) {
        return Err(EncodeError::InvalidDisplacement);
    }
    Ok(((offset as u32) & 0x1FF) << 12)
}

fn pair_offset(offset: i64) -> Result<u32, EncodeError> {
    if offset % 8 != 0 || !(-512..=504).contains(&offset) {
        return Err(EncodeError::InvalidDisplacement);
    }
    Ok((((offset / 8) as u32) & 0x7F) << 15)
}

/// AArch64 assembler.
pub struct AArch64Assembler<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> AArch64Assembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    /// Emit a raw 32-bit instruction.
    pub fn emit_raw(&mut self, inst: u32) {
        self.buf.emit_u32(inst);
    }

    // ==================== Data Processing ====================

    /// MOV Xd, Xm (ORR Xd, XZR, Xm). Neither operand may be SP.
    pub fn mov(&mut self, rd: GpX, rm: GpX) {
        self.emit_raw(0xAA00_03E0 | (rm.code() << 16) | rd.code());
    }

    /// MOV Xd, SP (ADD Xd, SP, #0)
    pub fn mov_from_sp(&mut self, rd: GpX) {
        self.emit_raw(0x9100_0000 | (GpX::SP.code() << 5) | rd.code());
    }

    /// ADD Xd, Xn, Xm
    pub fn add(&mut self, rd: GpX, rn: GpX, rm: GpX) {
        self.emit_raw(0x8B00_0000 | (rm.code() << 16) | (rn.code() << 5) | rd.code());
    }

    /// SUB Xd, Xn, Xm
    pub fn sub(&mut self, rd: GpX, rn: GpX, rm: GpX) {
        self.emit_raw(0xCB00_0000 | (rm.code() << 16) | (rn.code() << 5) | rd.code());
    }

    /// ADD Xd|SP, Xn|SP, #imm (optionally LSL #12)
    pub fn add_imm(&mut self, rd: GpX, rn: GpX, imm: u64) -> Result<(), EncodeError> {
        let imm = imm12(imm)?;
        self.emit_raw(0x9100_0000 | imm | (rn.code() << 5) | rd.code());
        Ok(())
    }

    /// SUB Xd|SP, Xn|SP, #imm (optionally LSL #12)
    pub fn sub_imm(&mut self, rd: GpX, rn: GpX, imm: u64) -> Result<(), EncodeError> {
        let imm = imm12(imm)?;
        self.emit_raw(0xD100_0000 | imm | (rn.code() << 5) | rd.code());
        Ok(())
    }

    /// AND Xd, Xn, #bitmask
    pub fn and_imm(&mut self, rd: GpX, rn: GpX, imm: u64) -> Result<(), EncodeError> {
        let fields = encode_bitmask(imm).ok_or(EncodeError::InvalidImmediate)?;
        self.emit_raw(0x9200_0000 | (fields << 10) | (rn.code() << 5) | rd.code());
        Ok(())
    }

    /// MOVZ Xd, #imm16, LSL #(16 * hw)
    pub fn movz(&mut self, rd: GpX, imm16: u16, hw: u32) {
        debug_assert!(hw < 4);
        self.emit_raw(0xD280_0000 | (hw << 21) | ((imm16 as u32) << 5) | rd.code());
    }

    /// MOVK Xd, #imm16, LSL #(16 * hw)
    pub fn movk(&mut self, rd: GpX, imm16: u16, hw: u32) {
        debug_assert!(hw < 4);
        self.emit_raw(0xF280_0000 | (hw << 21) | ((imm16 as u32) << 5) | rd.code());
    }

    /// MOV Xd, #value, using at most two MOVZ/MOVK.
    pub fn mov_imm(&mut self, rd: GpX, value: u64) -> Result<(), EncodeError> {
        if !is_cheap_imm(value) {
            return Err(EncodeError::InvalidImmediate);
        }
        self.mov_imm_wide(rd, value);
        Ok(())
    }

    /// MOV Xd, #value with as many MOVK as needed.
    pub fn mov_imm_wide(&mut self, rd: GpX, value: u64) {
        let mut first = true;
        for hw in 0..4 {
            let half = ((value >> (hw * 16)) & 0xFFFF) as u16;
            if half == 0 {
                continue;
            }
            if first {
                self.movz(rd, half, hw);
                first = false;
            } else {
                self.movk(rd, half, hw);
            }
        }
        if first {
            self.movz(rd, 0, 0);
        }
    }

    /// MOV Wd, #value
    pub fn mov_imm_w(&mut self, rd: GpW, value: u32) {
        let lo = value & 0xFFFF;
        let hi = value >> 16;
        if lo != 0 || hi == 0 {
            self.emit_raw(0x5280_0000 | (lo << 5) | rd.code());
            if hi != 0 {
                self.emit_raw(0x72A0_0000 | (hi << 5) | rd.code());
            }
        } else {
            self.emit_raw(0x52A0_0000 | (hi << 5) | rd.code());
        }
    }

    // ==================== Comparison ====================

    /// CMP Xn, Xm
    pub fn cmp(&mut self, rn: GpX, rm: GpX) {
        self.emit_raw(0xEB00_001F | (rm.code() << 16) | (rn.code() << 5));
    }

    /// CMP Wn, Wm
    pub fn cmp_w(&mut self, rn: GpW, rm: GpW) {
        self.emit_raw(0x6B00_001F | (rm.code() << 16) | (rn.code() << 5));
    }

    /// CMP Xn, #imm
    pub fn cmp_imm(&mut self, rn: GpX, imm: u64) -> Result<(), EncodeError> {
        let imm = imm12(imm)?;
        self.emit_raw(0xF100_001F | imm | (rn.code() << 5));
        Ok(())
    }

    /// CMP Wn, #imm
    pub fn cmp_imm_w(&mut self, rn: GpW, imm: u32) -> Result<(), EncodeError> {
        let imm = imm12(imm as u64)?;
        self.emit_raw(0x7100_001F | imm | (rn.code() << 5));
        Ok(())
    }

    // ==================== Loads and Stores ====================

    fn ldst_scaled(&mut self, op: u32, size: i64, rt: u32, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        let imm = scaled_offset(offset, size)?;
        self.emit_raw(op | imm | (rn.code() << 5) | rt);
        Ok(())
    }

    fn ldst_unscaled(&mut self, op: u32, rt: u32, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        let imm = unscaled_offset(offset)?;
        self.emit_raw(op | imm | (rn.code() << 5) | rt);
        Ok(())
    }

    /// LDR Xt, [Xn|SP, #offset] (unsigned, scaled by 8)
    pub fn ldr(&mut self, rt: GpX, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_scaled(0xF940_0000, 8, rt.code(), rn, offset)
    }

    /// STR Xt, [Xn|SP, #offset]
    pub fn str(&mut self, rt: GpX, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_scaled(0xF900_0000, 8, rt.code(), rn, offset)
    }

    /// LDR Wt, [Xn|SP, #offset] (scaled by 4)
    pub fn ldr_w(&mut self, rt: GpW, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_scaled(0xB940_0000, 4, rt.code(), rn, offset)
    }

    /// STR Wt, [Xn|SP, #offset]
    pub fn str_w(&mut self, rt: GpW, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_scaled(0xB900_0000, 4, rt.code(), rn, offset)
    }

    /// LDR Dt, [Xn|SP, #offset]
    pub fn ldr_d(&mut self, rt: VecD, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_scaled(0xFD40_0000, 8, rt.code(), rn, offset)
    }

    /// STR Dt, [Xn|SP, #offset]
    pub fn str_d(&mut self, rt: VecD, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_scaled(0xFD00_0000, 8, rt.code(), rn, offset)
    }

    /// LDUR Xt, [Xn|SP, #simm9]
    pub fn ldur(&mut self, rt: GpX, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_unscaled(0xF840_0000, rt.code(), rn, offset)
    }

    /// STUR Xt, [Xn|SP, #simm9]
    pub fn stur(&mut self, rt: GpX, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_unscaled(0xF800_0000, rt.code(), rn, offset)
    }

    /// LDUR Wt, [Xn|SP, #simm9]
    pub fn ldur_w(&mut self, rt: GpW, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_unscaled(0xB840_0000, rt.code(), rn, offset)
    }

    /// STUR Wt, [Xn|SP, #simm9]
    pub fn stur_w(&mut self, rt: GpW, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_unscaled(0xB800_0000, rt.code(), rn, offset)
    }

    /// LDUR Dt, [Xn|SP, #simm9]
    pub fn ldur_d(&mut self, rt: VecD, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_unscaled(0xFC40_0000, rt.code(), rn, offset)
    }

    /// STUR Dt, [Xn|SP, #simm9]
    pub fn stur_d(&mut self, rt: VecD, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.ldst_unscaled(0xFC00_0000, rt.code(), rn, offset)
    }

    fn pair(&mut self, op: u32, rt1: u32, rt2: u32, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        let imm = pair_offset(offset)?;
        self.emit_raw(op | imm | (rt2 << 10) | (rn.code() << 5) | rt1);
        Ok(())
    }

    /// STP Xt1, Xt2, [Xn|SP, #offset]
    pub fn stp(&mut self, rt1: GpX, rt2: GpX, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.pair(0xA900_0000, rt1.code(), rt2.code(), rn, offset)
    }

    /// LDP Xt1, Xt2, [Xn|SP, #offset]
    pub fn ldp(&mut self, rt1: GpX, rt2: GpX, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.pair(0xA940_0000, rt1.code(), rt2.code(), rn, offset)
    }

    /// STP Dt1, Dt2, [Xn|SP, #offset]
    pub fn stp_d(&mut self, rt1: VecD, rt2: VecD, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.pair(0x6D00_0000, rt1.code(), rt2.code(), rn, offset)
    }

    /// LDP Dt1, Dt2, [Xn|SP, #offset]
    pub fn ldp_d(&mut self, rt1: VecD, rt2: VecD, rn: GpX, offset: i64) -> Result<(), EncodeError> {
        self.pair(0x6D40_0000, rt1.code(), rt2.code(), rn, offset)
    }

    /// LDR Xt, label + addend (PC-relative literal)
    pub fn ldr_literal(&mut self, rt: GpX, label: Label, addend: i64) {
        self.buf
            .emit_with_fixup(0x5800_0000 | rt.code(), label, addend, FixupKind::Imm19);
    }

    /// LDR Dt, label + addend (PC-relative literal)
    pub fn ldr_literal_d(&mut self, rt: VecD, label: Label, addend: i64) {
        self.buf
            .emit_with_fixup(0x5C00_0000 | rt.code(), label, addend, FixupKind::Imm19);
    }

    // ==================== Branches ====================

    /// B label
    pub fn b(&mut self, label: Label) {
        self.buf.emit_with_fixup(0x1400_0000, label, 0, FixupKind::Imm26);
    }

    /// BL label
    pub fn bl(&mut self, label: Label) {
        self.buf.emit_with_fixup(0x9400_0000, label, 0, FixupKind::Imm26);
    }

    /// B.cond label
    pub fn b_cond(&mut self, cond: Cond, label: Label) {
        self.buf
            .emit_with_fixup(0x5400_0000 | cond as u32, label, 0, FixupKind::Imm19);
    }

    /// CBZ Wt, label
    pub fn cbz_w(&mut self, rt: GpW, label: Label) {
        self.buf
            .emit_with_fixup(0x3400_0000 | rt.code(), label, 0, FixupKind::Imm19);
    }

    /// CBNZ Wt, label
    pub fn cbnz_w(&mut self, rt: GpW, label: Label) {
        self.buf
            .emit_with_fixup(0x3500_0000 | rt.code(), label, 0, FixupKind::Imm19);
    }

    /// BR Xn
    pub fn br(&mut self, rn: GpX) {
        self.emit_raw(0xD61F_0000 | (rn.code() << 5));
    }

    /// BLR Xn
    pub fn blr(&mut self, rn: GpX) {
        self.emit_raw(0xD63F_0000 | (rn.code() << 5));
    }

    /// RET (to X30)
    pub fn ret(&mut self) {
        self.emit_raw(0xD65F_03C0);
    }

    // ==================== Floating point ====================

    /// FMOV Dd, Dn
    pub fn fmov(&mut self, rd: VecD, rn: VecD) {
        self.emit_raw(0x1E60_4000 | (rn.code() << 5) | rd.code());
    }

    /// FMOV Dd, Xn
    pub fn fmov_from_gp(&mut self, rd: VecD, rn: GpX) {
        self.emit_raw(0x9E67_0000 | (rn.code() << 5) | rd.code());
    }

    /// FMOV Xd, Dn
    pub fn fmov_to_gp(&mut self, rd: GpX, rn: VecD) {
        self.emit_raw(0x9E66_0000 | (rn.code() << 5) | rd.code());
    }

    /// FMOV Dd, #imm
    pub fn fmov_imm(&mut self, rd: VecD, value: f64) -> Result<(), EncodeError> {
        let imm8 = encode_fp_imm(value.to_bits()).ok_or(EncodeError::InvalidImmediate)?;
        self.emit_raw(0x1E60_1000 | ((imm8 as u32) << 13) | rd.code());
        Ok(())
    }

    /// MOVI Dd, #0
    pub fn movi_zero(&mut self, rd: VecD) {
        self.emit_raw(0x2F00_E400 | rd.code());
    }

    fn fp3(&mut self, op: u32, rd: VecD, rn: VecD, rm: VecD) {
        self.emit_raw(op | (rm.code() << 16) | (rn.code() << 5) | rd.code());
    }

    pub fn fadd(&mut self, rd: VecD, rn: VecD, rm: VecD) {
        self.fp3(0x1E60_2800, rd, rn, rm);
    }

    pub fn fsub(&mut self, rd: VecD, rn: VecD, rm: VecD) {
        self.fp3(0x1E60_3800, rd, rn, rm);
    }

    pub fn fmul(&mut self, rd: VecD, rn: VecD, rm: VecD) {
        self.fp3(0x1E60_0800, rd, rn, rm);
    }

    pub fn fdiv(&mut self, rd: VecD, rn: VecD, rm: VecD) {
        self.fp3(0x1E60_1800, rd, rn, rm);
    }

    pub fn fneg(&mut self, rd: VecD, rn: VecD) {
        self.emit_raw(0x1E61_4000 | (rn.code() << 5) | rd.code());
    }

    /// FCMP Dn, Dm
    pub fn fcmp(&mut self, rn: VecD, rm: VecD) {
        self.emit_raw(0x1E60_2000 | (rm.code() << 16) | (rn.code() << 5));
    }

    /// FCMP Dn, #0.0
    pub fn fcmp_zero(&mut self, rn: VecD) {
        self.emit_raw(0x1E60_2008 | (rn.code() << 5));
    }

    pub fn nop(&mut self) {
        self.emit_raw(0xD503_201F);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut AArch64Assembler)) -> u32 {
        let mut buf = CodeBuffer::new();
        f(&mut AArch64Assembler::new(&mut buf));
        buf.read_u32(0)
    }

    #[test]
    fn test_add() {
        assert_eq!(encode(|a| a.add(GpX::X0, GpX::X1, GpX::X2)), 0x8B02_0020);
    }

    #[test]
    fn test_mov_register() {
        // mov x22, x0
        assert_eq!(encode(|a| a.mov(GpX::new(22), GpX::X0)), 0xAA00_03F6);
        // mov x1, sp
        assert_eq!(encode(|a| a.mov_from_sp(GpX::X1)), 0x9100_03E1);
    }

    #[test]
    fn test_double_limit_is_one_movz() {
        let mut buf = CodeBuffer::new();
        AArch64Assembler::new(&mut buf)
            .mov_imm(GpX::new(21), 0xFFF9_0000_0000_0000)
            .unwrap();
        assert_eq!(buf.len(), 4);
        // movz x21, #0xfff9, lsl #48
        assert_eq!(buf.read_u32(0), 0xD2FF_FF35);
    }

    #[test]
    fn test_mov_imm_rejects_expensive_values() {
        let mut buf = CodeBuffer::new();
        let mut a = AArch64Assembler::new(&mut buf);
        assert_eq!(
            a.mov_imm(GpX::X0, 0x1234_5678_9ABC),
            Err(EncodeError::InvalidImmediate)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_imm12_range() {
        let mut buf = CodeBuffer::new();
        let mut a = AArch64Assembler::new(&mut buf);
        assert!(a.cmp_imm_w(GpW::new(1), 4095).is_ok());
        assert_eq!(a.cmp_imm_w(GpW::new(1), 4097), Err(EncodeError::InvalidImmediate));
        assert!(a.add_imm(GpX::X1, GpX::new(19), 0x5000).is_ok());
        assert_eq!(buf.read_u32(0), 0x713F_FC3F);
        // add x1, x19, #5, lsl #12
        assert_eq!(buf.read_u32(4), 0x9140_1661);
    }

    #[test]
    fn test_load_store_displacements() {
        let mut buf = CodeBuffer::new();
        let mut a = AArch64Assembler::new(&mut buf);
        let fp = GpX::new(19);
        a.ldr(GpX::X0, fp, 16).unwrap();
        a.ldur(GpX::X0, fp, -48).unwrap();
        assert_eq!(a.ldr(GpX::X0, fp, -8), Err(EncodeError::InvalidDisplacement));
        assert_eq!(a.ldr(GpX::X0, fp, 12), Err(EncodeError::InvalidDisplacement));
        assert_eq!(a.ldur(GpX::X0, fp, -264), Err(EncodeError::InvalidDisplacement));
        assert_eq!(buf.read_u32(0), 0xF940_0A60);
        assert_eq!(buf.read_u32(4), 0xF85D_0260);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_pairs() {
        let mut buf = CodeBuffer::new();
        let mut a = AArch64Assembler::new(&mut buf);
        // stp x29, x30, [sp, #48]
        a.stp(GpX::FP, GpX::LR, GpX::SP, 48).unwrap();
        assert_eq!(buf.read_u32(0), 0xA903_7BFD);
    }

    #[test]
    fn test_bitmask_data_mask() {
        let fields = encode_bitmask(0x0000_FFFF_FFFF_FFFF).unwrap();
        assert_eq!(fields >> 12, 1);
        assert_eq!((fields >> 6) & 0x3F, 0);
        assert_eq!(fields & 0x3F, 47);
        let word = encode(|a| a.and_imm(GpX::X0, GpX::X0, 0x0000_FFFF_FFFF_FFFF).unwrap());
        assert_eq!(word, 0x9240_BC00);
    }

    #[test]
    fn test_bitmask_inverse() {
        for value in [
            0x0000_FFFF_FFFF_FFFF,
            0xFFFF_0000_0000_0000,
            0x5555_5555_5555_5555,
            0x00FF_00FF_00FF_00FF,
            0x8000_0000_0000_0001,
            0x0000_0000_0000_00F0,
        ] {
            let fields = encode_bitmask(value).unwrap();
            let decoded = decode_bitmask(fields >> 12, (fields >> 6) & 0x3F, fields & 0x3F);
            assert_eq!(decoded, Some(value), "{value:#x}");
        }
        assert_eq!(encode_bitmask(0), None);
        assert_eq!(encode_bitmask(u64::MAX), None);
        assert_eq!(encode_bitmask(0x1234), None);
    }

    #[test]
    fn test_fp_immediates() {
        assert_eq!(encode_fp_imm(1.0f64.to_bits()), Some(0x70));
        assert_eq!(encode_fp_imm(2.0f64.to_bits()), Some(0x00));
        assert_eq!(encode_fp_imm((-0.5f64).to_bits()), Some(0xE0));
        assert_eq!(encode_fp_imm(0.0f64.to_bits()), None);
        assert_eq!(encode_fp_imm(0.1f64.to_bits()), None);
        for imm in [0x70u8, 0x00, 0xE0, 0x7F, 0x10] {
            assert_eq!(encode_fp_imm(expand_fp_imm(imm)), Some(imm));
        }
        assert_eq!(encode(|a| a.fmov_imm(VecD::new(16), 1.0).unwrap()), 0x1E6E_1010);
    }

    #[test]
    fn test_cond_invert() {
        assert_eq!(Cond::Mi.invert(), Cond::Pl);
        assert_eq!(Cond::Ls.invert(), Cond::Hi);
        assert_eq!(Cond::Gt.invert(), Cond::Le);
        assert_eq!(Cond::Hs.invert(), Cond::Lo);
    }

    #[test]
    fn test_ret() {
        assert_eq!(encode(|a| a.ret()), 0xD65F_03C0);
    }
}
