//! Out-of-line code for the uncommon side of speculative operations.
//!
//! A fast path that guards on its operands being numbers records a
//! [`SlowPath`] and branches to its entry when a guard fails. Slow paths are
//! emitted after the main body, in the order they were recorded, and each
//! branches back to its continuation label when done. Operands are read from
//! their frame slots, so the fast path syncs them before guarding.

use crate::vm::{FrameReg, Helper, Value};

use super::aarch64::GpX;
use super::codebuf::Label;
use super::emitter::Emitter;
use super::hwreg::{HwReg, X_RUNTIME};

#[derive(Debug, Clone, Copy)]
pub(super) enum SlowPathKind {
    /// Parameter index beyond the passed argument count.
    UndefinedParam { hw_res: HwReg },
    ToNumber { input: FrameReg, hw_res: HwReg },
    Unary { input: FrameReg, hw_res: HwReg, helper: Helper },
    Binary { left: FrameReg, right: FrameReg, hw_res: HwReg, helper: Helper },
    /// Generic comparison feeding a conditional branch.
    CondJump { left: FrameReg, right: FrameReg, target: Label, invert: bool, helper: Helper },
}

#[derive(Debug, Clone, Copy)]
pub(super) struct SlowPath {
    pub entry: Label,
    pub cont: Label,
    pub op_name: &'static str,
    pub kind: SlowPathKind,
}

impl Emitter<'_> {
    /// Entry and continuation labels for a slow path about to be guarded.
    pub(super) fn new_slow_labels(&mut self) -> (Label, Label) {
        (self.buf.new_label(None), self.buf.new_label(None))
    }

    /// Queue a slow path. Its code is emitted after the main body.
    pub(super) fn add_slow_path(&mut self, entry: Label, cont: Label, op_name: &'static str, kind: SlowPathKind) {
        self.slow_paths.push(SlowPath { entry, cont, op_name, kind });
    }

    /// `bl` to the thunk for `helper`.
    pub(super) fn call_helper(&mut self, helper: Helper) {
        let thunk = self.thunk(helper);
        self.asm().bl(thunk);
        self.counters.helper_calls += 1;
    }

    pub(super) fn emit_slow_paths(&mut self) {
        let paths = std::mem::take(&mut self.slow_paths);
        for path in &paths {
            self.buf.bind(path.entry);
            self.comment(|| format!("slow path: {}", path.op_name));
            self.emit_slow_path(path.kind);
            self.asm().b(path.cont);
        }
        self.slow_paths = paths;
    }

    fn emit_slow_path(&mut self, kind: SlowPathKind) {
        match kind {
            SlowPathKind::UndefinedParam { hw_res } => {
                self.load_bits(hw_res, Value::UNDEFINED.raw());
            }
            SlowPathKind::ToNumber { input, hw_res } => {
                self.asm().mov(GpX::X0, X_RUNTIME);
                self.frame_addr(GpX::X1, input);
                self.call_helper(Helper::ToDouble);
                self.mov_hw(hw_res, HwReg::vec(0));
            }
            SlowPathKind::Unary { input, hw_res, helper } => {
                self.asm().mov(GpX::X0, X_RUNTIME);
                self.frame_addr(GpX::X1, input);
                self.call_helper(helper);
                self.mov_hw(hw_res, HwReg::gp(0));
            }
            SlowPathKind::Binary { left, right, hw_res, helper } => {
                self.asm().mov(GpX::X0, X_RUNTIME);
                self.frame_addr(GpX::X1, left);
                self.frame_addr(GpX::X2, right);
                self.call_helper(helper);
                self.mov_hw(hw_res, HwReg::gp(0));
            }
            SlowPathKind::CondJump { left, right, target, invert, helper } => {
                self.asm().mov(GpX::X0, X_RUNTIME);
                self.frame_addr(GpX::X1, left);
                self.frame_addr(GpX::X2, right);
                self.call_helper(helper);
                if invert {
                    self.asm().cbz_w(GpX::X0.w(), target);
                } else {
                    self.asm().cbnz_w(GpX::X0.w(), target);
                }
            }
        }
    }
}
