//! Physical registers and their partition into fixed, pinned and temporary
//! pools.

use std::fmt;

use super::aarch64::{GpX, VecD};

/// Register class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegClass {
    Gp,
    Vec,
}

/// A physical register of either class. General-purpose registers use
/// indices 0..32, vector registers 32..64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HwReg(u8);

impl HwReg {
    pub const COUNT: usize = 64;

    pub const fn gp(n: u8) -> Self {
        assert!(n < 32);
        HwReg(n)
    }

    pub const fn vec(n: u8) -> Self {
        assert!(n < 32);
        HwReg(32 + n)
    }

    pub fn in_class(class: RegClass, n: u8) -> Self {
        match class {
            RegClass::Gp => HwReg::gp(n),
            RegClass::Vec => HwReg::vec(n),
        }
    }

    pub const fn combined_index(self) -> usize {
        self.0 as usize
    }

    pub const fn index_in_class(self) -> u8 {
        self.0 & 31
    }

    pub const fn class(self) -> RegClass {
        if self.0 < 32 { RegClass::Gp } else { RegClass::Vec }
    }

    pub const fn is_gp(self) -> bool {
        self.0 < 32
    }

    pub const fn is_vec(self) -> bool {
        self.0 >= 32
    }

    pub fn x(self) -> GpX {
        debug_assert!(self.is_gp(), "{self} is not a GP register");
        GpX::new(self.index_in_class())
    }

    pub fn d(self) -> VecD {
        debug_assert!(self.is_vec(), "{self} is not a vector register");
        VecD::new(self.index_in_class())
    }
}

impl fmt::Display for HwReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class() {
            RegClass::Gp => write!(f, "x{}", self.index_in_class()),
            RegClass::Vec => write!(f, "d{}", self.index_in_class()),
        }
    }
}

/// Interpreter frame base.
pub const X_FRAME: GpX = GpX::new(19);
/// Runtime context, first argument of every helper.
pub const X_RUNTIME: GpX = GpX::new(20);
/// Tagged-double limit, for single-compare number checks.
pub const X_DOUBLE_LIM: GpX = GpX::new(21);
/// Holds the return value on the way to the shared epilogue.
pub const X_RETURN: GpX = GpX::new(22);
/// Scratch for thunks and long address computations. Never allocated.
pub const X_SCRATCH: GpX = GpX::X16;

/// An inclusive range of register indices within one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegRange {
    pub first: u8,
    pub last: u8,
}

impl RegRange {
    pub const fn len(self) -> usize {
        (self.last - self.first + 1) as usize
    }

    pub fn contains(self, n: u8) -> bool {
        (self.first..=self.last).contains(&n)
    }
}

/// Callee-saved GP registers available for pinning. x22 comes first and is
/// always saved since it carries the return value.
pub const GP_SAVED: RegRange = RegRange { first: 22, last: 28 };
/// Callee-saved vector registers available for pinning.
pub const VEC_SAVED: RegRange = RegRange { first: 8, last: 15 };
/// Temporary GP registers (caller-saved).
pub const GP_TEMP: RegRange = RegRange { first: 0, last: 15 };
/// Temporary vector registers (caller-saved).
pub const VEC_TEMP: RegRange = RegRange { first: 16, last: 31 };

/// The temporary range of `class`, narrowed to its first `count` registers.
pub fn temp_range(class: RegClass, count: u8) -> RegRange {
    let full = match class {
        RegClass::Gp => GP_TEMP,
        RegClass::Vec => VEC_TEMP,
    };
    let count = (count as usize).clamp(1, full.len()) as u8;
    RegRange {
        first: full.first,
        last: full.first + count - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_index() {
        assert_eq!(HwReg::gp(3).combined_index(), 3);
        assert_eq!(HwReg::vec(3).combined_index(), 35);
        assert_eq!(HwReg::vec(3).index_in_class(), 3);
        assert_eq!(HwReg::vec(17).to_string(), "d17");
        assert!(HwReg::gp(31).is_gp());
    }

    #[test]
    fn test_pools_do_not_overlap_fixed_registers() {
        for fixed in [X_FRAME, X_RUNTIME, X_DOUBLE_LIM, X_SCRATCH] {
            let n = fixed.code() as u8;
            assert!(!GP_TEMP.contains(n));
            assert!(!GP_SAVED.contains(n));
        }
        assert!(GP_SAVED.contains(X_RETURN.code() as u8));
        assert_eq!(temp_range(RegClass::Vec, 4), RegRange { first: 16, last: 19 });
        assert_eq!(temp_range(RegClass::Gp, 40), GP_TEMP);
    }
}
