//! Native frame setup and teardown.
//!
//! Native frame, from `sp` upwards:
//!
//! ```text
//!   sp + 0            locals header (GC root count at +8)
//!   sp + 32           saved x19, x20, x21, x22.. (pairs)
//!   ...               saved d8.. (pairs)
//!   sp + fp_offset    saved x29, x30
//! ```

use tracing::debug;

use crate::vm::{DOUBLE_LIM, Helper, SLOT_SIZE, Value, frame_layout, layout, param_offset};

use super::aarch64::{GpW, GpX, VecD};
use super::emitter::Emitter;
use super::hwreg::{GP_SAVED, HwReg, VEC_SAVED, X_DOUBLE_LIM, X_FRAME, X_RETURN, X_RUNTIME};

/// Registers saved by the prologue and the resulting frame size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pub gp_saved: Vec<GpX>,
    pub vec_saved: Vec<VecD>,
    pub size: u32,
    pub gp_offset: u32,
    pub vec_offset: u32,
    pub fp_offset: u32,
}

fn round2(n: u32) -> u32 {
    (n + 1) & !1
}

impl FrameLayout {
    /// Layout for a function pinning `gp_pinned` GP and `vec_pinned` vector
    /// registers. The return register is saved even when nothing is pinned.
    pub fn new(gp_pinned: u32, vec_pinned: u32) -> Self {
        let mut gp_saved = vec![X_FRAME, X_RUNTIME, X_DOUBLE_LIM];
        let gp_first = GP_SAVED.first as u32;
        gp_saved.extend((0..gp_pinned.max(1)).map(|i| GpX::new((gp_first + i) as u8)));
        let vec_first = VEC_SAVED.first as u32;
        let vec_saved: Vec<VecD> = (0..vec_pinned).map(|i| VecD::new((vec_first + i) as u8)).collect();

        let gp_offset = layout::LOCALS_SIZE;
        let vec_offset = gp_offset + round2(gp_saved.len() as u32) * 8;
        let fp_offset = vec_offset + round2(vec_saved.len() as u32) * 8;
        Self {
            gp_saved,
            vec_saved,
            size: fp_offset + 16,
            gp_offset,
            vec_offset,
            fp_offset,
        }
    }
}

impl Emitter<'_> {
    pub(super) fn frame_layout(&self) -> FrameLayout {
        FrameLayout::new(self.gp_pinned, self.vec_pinned)
    }

    pub(super) fn emit_prologue(&mut self) {
        let fl = self.frame_layout();
        debug!(
            function = %self.func.name,
            frame_size = fl.size,
            gp_pinned = self.gp_pinned,
            vec_pinned = self.vec_pinned,
            "prologue"
        );
        self.comment(|| "prologue".to_string());
        self.encode(|a| a.sub_imm(GpX::SP, GpX::SP, fl.size as u64));
        self.encode(|a| {
            for (i, pair) in fl.gp_saved.chunks(2).enumerate() {
                let ofs = (fl.gp_offset + i as u32 * 16) as i64;
                match pair {
                    [r1, r2] => a.stp(*r1, *r2, GpX::SP, ofs)?,
                    [r1] => a.str(*r1, GpX::SP, ofs)?,
                    _ => {}
                }
            }
            for (i, pair) in fl.vec_saved.chunks(2).enumerate() {
                let ofs = (fl.vec_offset + i as u32 * 16) as i64;
                match pair {
                    [r1, r2] => a.stp_d(*r1, *r2, GpX::SP, ofs)?,
                    [r1] => a.str_d(*r1, GpX::SP, ofs)?,
                    _ => {}
                }
            }
            a.stp(GpX::FP, GpX::LR, GpX::SP, fl.fp_offset as i64)?;
            a.add_imm(GpX::FP, GpX::SP, fl.fp_offset as u64)
        });

        let mut a = self.asm();
        a.movz(X_DOUBLE_LIM, (DOUBLE_LIM >> 48) as u16, 3);
        a.mov(X_RUNTIME, GpX::X0);
        self.call_helper(Helper::CheckNativeStackOverflow);

        let nregs = self.num_frame_regs();
        let mut a = self.asm();
        a.mov(GpX::X0, X_RUNTIME);
        a.mov_from_sp(GpX::X1);
        a.mov_imm_w(GpX::X2.w(), nregs);
        self.call_helper(Helper::Enter);
        self.asm().mov(X_FRAME, GpX::X0);

        self.asm().mov_imm_w(GpX::X1.w(), 0);
        self.encode(|a| a.str_w(GpX::X1.w(), GpX::SP, layout::LOCALS_COUNT as i64));

        for i in 0..self.frs.len() {
            if let Some(global) = self.frs[i].global_reg {
                self.load_bits(global, Value::UNDEFINED.raw());
            }
        }
    }

    pub(super) fn emit_epilogue(&mut self) {
        let fl = self.frame_layout();
        self.buf.bind(self.return_label);
        self.comment(|| "epilogue".to_string());
        let mut a = self.asm();
        a.mov(GpX::X0, X_RUNTIME);
        a.mov_from_sp(GpX::X1);
        a.mov(GpX::X2, X_FRAME);
        self.call_helper(Helper::Leave);
        self.asm().mov(GpX::X0, X_RETURN);

        self.encode(|a| {
            a.ldp(GpX::FP, GpX::LR, GpX::SP, fl.fp_offset as i64)?;
            for (i, pair) in fl.vec_saved.chunks(2).enumerate().rev() {
                let ofs = (fl.vec_offset + i as u32 * 16) as i64;
                match pair {
                    [r1, r2] => a.ldp_d(*r1, *r2, GpX::SP, ofs)?,
                    [r1] => a.ldr_d(*r1, GpX::SP, ofs)?,
                    _ => {}
                }
            }
            for (i, pair) in fl.gp_saved.chunks(2).enumerate().rev() {
                let ofs = (fl.gp_offset + i as u32 * 16) as i64;
                match pair {
                    [r1, r2] => a.ldp(*r1, *r2, GpX::SP, ofs)?,
                    [r1] => a.ldr(*r1, GpX::SP, ofs)?,
                    _ => {}
                }
            }
            a.add_imm(GpX::SP, GpX::SP, fl.size as u64)
        });
        self.asm().ret();
    }

    /// Load parameter `index` from the caller-built frame header.
    pub(super) fn load_param(&mut self, hw: HwReg, index: u32) {
        self.load_frame_at(hw, param_offset(index));
    }

    /// `ldur wd, [x_frame, #arg_count]`
    pub(super) fn load_arg_count(&mut self, wd: GpW) {
        let ofs = frame_layout::ARG_COUNT as i64 * SLOT_SIZE as i64;
        self.encode(|a| a.ldur_w(wd, X_FRAME, ofs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_without_pinning() {
        let fl = FrameLayout::new(0, 0);
        // x19, x20, x21, x22
        assert_eq!(fl.gp_saved.len(), 4);
        assert!(fl.vec_saved.is_empty());
        assert_eq!(fl.fp_offset, 64);
        assert_eq!(fl.size, 80);
    }

    #[test]
    fn test_layout_rounds_to_pairs() {
        let fl = FrameLayout::new(2, 3);
        assert_eq!(fl.gp_saved.len(), 5);
        assert_eq!(fl.vec_offset, 32 + 48);
        assert_eq!(fl.fp_offset, 32 + 48 + 32);
        assert_eq!(fl.size % 16, 0);
        assert_eq!(fl.vec_saved.last(), Some(&VecD::new(10)));
    }
}
