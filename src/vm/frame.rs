//! Interpreter frame model.
//!
//! A frame is an array of 8-byte tagged values. `FrameReg(n)` lives at
//! `frame_base + n * 8`. The call header sits immediately below register 0:
//!
//! ```text
//!   r0 - 1   previous frame
//!   r0 - 2   saved IP
//!   r0 - 3   saved code block
//!   r0 - 4   argument count (excluding `this`)
//!   r0 - 5   new.target
//!   r0 - 6   callee closure
//!   r0 - 7   this            (parameter 0)
//!   r0 - 7-p parameter p
//! ```
//!
//! A caller with `n` frame registers builds the callee frame so that the
//! callee's register 0 is the caller's register `n`; the outgoing header and
//! arguments therefore occupy the caller's highest registers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of one frame slot in bytes.
pub const SLOT_SIZE: i32 = 8;

/// Frame header offsets, in slots, relative to a frame's register 0.
pub mod layout {
    pub const PREVIOUS_FRAME: i32 = -1;
    pub const SAVED_IP: i32 = -2;
    pub const SAVED_CODE_BLOCK: i32 = -3;
    pub const ARG_COUNT: i32 = -4;
    pub const NEW_TARGET: i32 = -5;
    pub const CALLEE_CLOSURE: i32 = -6;
    pub const THIS_ARG: i32 = -7;

    /// Number of header slots, `this` included.
    pub const HEADER_SLOTS: u32 = 7;
}

/// Index of a virtual value slot in the interpreter frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameReg(pub u32);

impl FrameReg {
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Byte offset of this register from the frame base.
    pub const fn byte_offset(self) -> u64 {
        self.0 as u64 * SLOT_SIZE as u64
    }

    /// The caller register holding outgoing header slot `slot` (one of the
    /// negative [`layout`] offsets) for a caller with `num_regs` registers.
    pub fn outgoing(num_regs: u32, slot: i32) -> FrameReg {
        let index = num_regs as i64 + slot as i64;
        assert!(
            index >= 0,
            "outgoing slot {slot} below frame of {num_regs} registers"
        );
        FrameReg(index as u32)
    }

    /// The caller register holding outgoing argument `i` (0 is `this`).
    pub fn outgoing_arg(num_regs: u32, i: u32) -> FrameReg {
        FrameReg::outgoing(num_regs, layout::THIS_ARG - i as i32)
    }
}

impl fmt::Display for FrameReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Byte offset of parameter `p` relative to the frame base (always negative).
pub fn param_offset(p: u32) -> i64 {
    (layout::THIS_ARG as i64 - p as i64) * SLOT_SIZE as i64
}

/// Speculative type of a frame register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrType {
    #[default]
    Unknown,
    Number,
    Bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_slots() {
        // 16 registers: callee frame starts at r16.
        assert_eq!(FrameReg::outgoing(16, layout::CALLEE_CLOSURE), FrameReg(10));
        assert_eq!(FrameReg::outgoing(16, layout::NEW_TARGET), FrameReg(11));
        assert_eq!(FrameReg::outgoing_arg(16, 0), FrameReg(9));
        assert_eq!(FrameReg::outgoing_arg(16, 2), FrameReg(7));
    }

    #[test]
    fn test_param_offset() {
        assert_eq!(param_offset(0), -56);
        assert_eq!(param_offset(1), -64);
    }
}
