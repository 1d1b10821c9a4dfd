//! Architectural state and the floating-point rules shared by the
//! simulator and the toy runtime's generic arithmetic.

use crate::jit::aarch64::Cond;
use crate::jit::decode::FpOp;

const SIGN_BIT: u64 = 1 << 63;
const QUIET_BIT: u64 = 1 << 51;
/// The default NaN produced by invalid operations.
pub const DEFAULT_NAN: u64 = 0x7FF8_0000_0000_0000;

fn is_nan(bits: u64) -> bool {
    f64::from_bits(bits).is_nan()
}

fn is_signaling(bits: u64) -> bool {
    is_nan(bits) && bits & QUIET_BIT == 0
}

/// Result of a double-precision arithmetic instruction with default
/// NaN handling disabled: a signalling operand wins over a quiet one, the
/// first operand wins over the second, and the chosen NaN is quieted.
/// Invalid operations produce [`DEFAULT_NAN`].
pub fn fp_arith(op: FpOp, a: u64, b: u64) -> u64 {
    for bits in [a, b] {
        if is_signaling(bits) {
            return bits | QUIET_BIT;
        }
    }
    for bits in [a, b] {
        if is_nan(bits) {
            return bits;
        }
    }
    let (x, y) = (f64::from_bits(a), f64::from_bits(b));
    let r = match op {
        FpOp::Add => x + y,
        FpOp::Sub => x - y,
        FpOp::Mul => x * y,
        FpOp::Div => x / y,
    };
    if r.is_nan() { DEFAULT_NAN } else { r.to_bits() }
}

/// FNEG only flips the sign, NaN or not.
pub fn fp_neg(a: u64) -> u64 {
    a ^ SIGN_BIT
}

#[derive(Debug, Clone)]
pub struct Cpu {
    /// x0..x30. Index 31 is never stored; it reads as zero.
    pub x: [u64; 32],
    pub sp: u64,
    pub pc: u64,
    /// Low 64 bits of v0..v31.
    pub d: [u64; 32],
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self {
            x: [0; 32],
            sp: 0,
            pc: 0,
            d: [0; 32],
            n: false,
            z: false,
            c: false,
            v: false,
        }
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n`, with 31 as XZR.
    pub fn reg(&self, n: u8) -> u64 {
        if n == 31 { 0 } else { self.x[n as usize] }
    }

    /// Register `n`, with 31 as SP.
    pub fn reg_or_sp(&self, n: u8) -> u64 {
        if n == 31 { self.sp } else { self.x[n as usize] }
    }

    pub fn set_reg(&mut self, n: u8, value: u64) {
        if n != 31 {
            self.x[n as usize] = value;
        }
    }

    pub fn set_reg_or_sp(&mut self, n: u8, value: u64) {
        if n == 31 {
            self.sp = value;
        } else {
            self.x[n as usize] = value;
        }
    }

    pub fn nzcv(&self) -> u8 {
        (self.n as u8) << 3 | (self.z as u8) << 2 | (self.c as u8) << 1 | self.v as u8
    }

    fn set_nzcv(&mut self, nzcv: u8) {
        self.n = nzcv & 8 != 0;
        self.z = nzcv & 4 != 0;
        self.c = nzcv & 2 != 0;
        self.v = nzcv & 1 != 0;
    }

    /// Flags of `a - b` (SUBS), 64- or 32-bit.
    pub fn flags_sub(&mut self, a: u64, b: u64, wide: bool) {
        if wide {
            let r = a.wrapping_sub(b);
            self.n = r >> 63 != 0;
            self.z = r == 0;
            self.c = a >= b;
            self.v = ((a ^ b) & (a ^ r)) >> 63 != 0;
        } else {
            let (a, b) = (a as u32, b as u32);
            let r = a.wrapping_sub(b);
            self.n = r >> 31 != 0;
            self.z = r == 0;
            self.c = a >= b;
            self.v = ((a ^ b) & (a ^ r)) >> 31 != 0;
        }
    }

    /// Flags of FCMP: equal 0110, less 1000, greater 0010, unordered 0011.
    pub fn flags_fcmp(&mut self, a: u64, b: u64) {
        let (x, y) = (f64::from_bits(a), f64::from_bits(b));
        let nzcv = if x.is_nan() || y.is_nan() {
            0b0011
        } else if x == y {
            0b0110
        } else if x < y {
            0b1000
        } else {
            0b0010
        };
        self.set_nzcv(nzcv);
    }

    pub fn cond_holds(&self, cond: Cond) -> bool {
        match cond {
            Cond::Eq => self.z,
            Cond::Ne => !self.z,
            Cond::Hs => self.c,
            Cond::Lo => !self.c,
            Cond::Mi => self.n,
            Cond::Pl => !self.n,
            Cond::Vs => self.v,
            Cond::Vc => !self.v,
            Cond::Hi => self.c && !self.z,
            Cond::Ls => !self.c || self.z,
            Cond::Ge => self.n == self.v,
            Cond::Lt => self.n != self.v,
            Cond::Gt => !self.z && self.n == self.v,
            Cond::Le => self.z || self.n != self.v,
            Cond::Al => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_operations_give_default_nan() {
        let inf = f64::INFINITY.to_bits();
        assert_eq!(fp_arith(FpOp::Sub, inf, inf), DEFAULT_NAN);
        assert_eq!(fp_arith(FpOp::Div, 0, 0), DEFAULT_NAN);
        assert_eq!(fp_arith(FpOp::Mul, 0, inf), DEFAULT_NAN);
    }

    #[test]
    fn test_nan_operands_propagate_quieted() {
        let snan = 0x7FF0_0000_0000_0001;
        let qnan = 0xFFF8_0000_0000_0002;
        let one = 1.0f64.to_bits();
        assert_eq!(fp_arith(FpOp::Add, one, snan), snan | QUIET_BIT);
        assert_eq!(fp_arith(FpOp::Add, qnan, snan), snan | QUIET_BIT);
        assert_eq!(fp_arith(FpOp::Mul, qnan, one), qnan);
    }

    #[test]
    fn test_fcmp_conditions() {
        let mut cpu = Cpu::new();
        let nan = DEFAULT_NAN;
        cpu.flags_fcmp(nan, 0);
        assert!(!cpu.cond_holds(Cond::Mi));
        assert!(!cpu.cond_holds(Cond::Ls));
        assert!(!cpu.cond_holds(Cond::Gt));
        assert!(!cpu.cond_holds(Cond::Ge));
        assert!(cpu.cond_holds(Cond::Ne));
        assert!(cpu.cond_holds(Cond::Vs));

        cpu.flags_fcmp((-0.0f64).to_bits(), 0);
        assert!(cpu.cond_holds(Cond::Eq));
        cpu.flags_fcmp(1.0f64.to_bits(), 2.0f64.to_bits());
        assert!(cpu.cond_holds(Cond::Mi) && cpu.cond_holds(Cond::Ls));
    }

    #[test]
    fn test_unsigned_compare_against_double_limit() {
        let mut cpu = Cpu::new();
        let lim = 0xFFF9u64 << 48;
        cpu.flags_sub(0xFFFA_0000_0000_0000, lim, true);
        assert!(cpu.cond_holds(Cond::Hs));
        cpu.flags_sub(1.5f64.to_bits(), lim, true);
        assert!(cpu.cond_holds(Cond::Lo));
        cpu.flags_sub(2, 3, false);
        assert!(cpu.cond_holds(Cond::Lo));
    }
}
