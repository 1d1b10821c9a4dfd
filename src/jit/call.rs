//! Calls from generated code into runtime helpers.

use crate::vm::{FrameReg, Helper, layout};

use super::aarch64::GpX;
use super::emitter::Emitter;
use super::hwreg::{HwReg, X_RUNTIME};

/// One helper argument after the runtime context. Argument `i` is passed in
/// `x(i + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Arg {
    /// Address of the frame slot, synced before the call.
    FrameAddr(FrameReg),
    /// The tagged value itself.
    Value(FrameReg),
    U32(u32),
    U64(u64),
    Null,
    /// Pointer to read property cache entry `n`.
    ReadCache(u8),
    /// Pointer to write property cache entry `n`.
    WriteCache(u8),
}

impl Arg {
    fn frame_reg(self) -> Option<FrameReg> {
        match self {
            Arg::FrameAddr(fr) | Arg::Value(fr) => Some(fr),
            _ => None,
        }
    }
}

impl Emitter<'_> {
    /// Call `helper` with the runtime context and `args`, then bind its
    /// `x0` result to `res`.
    ///
    /// Every temporary is written back before the call and none survives it:
    /// helpers may read any frame slot and clobber all caller-saved
    /// registers.
    pub(super) fn emit_helper_call(&mut self, helper: Helper, args: &[Arg], res: Option<FrameReg>) {
        debug_assert!(args.len() < 8, "too many helper arguments");
        self.comment(|| format!("call {helper}"));

        for arg in args {
            if let Arg::FrameAddr(fr) = *arg {
                self.sync_to_mem(fr);
            }
        }
        for n in 0..=args.len() {
            self.sync_and_free_temp(HwReg::gp(n as u8));
        }
        let res_is_input = res.is_some_and(|r| args.iter().any(|a| a.frame_reg() == Some(r)));
        self.sync_all_temps_except(if res_is_input { None } else { res });

        for (i, arg) in args.iter().enumerate() {
            if let Arg::Value(fr) = *arg {
                self.mov_hw_from_fr(HwReg::gp(i as u8 + 1), fr);
            }
        }
        self.free_all_temps();

        self.asm().mov(GpX::X0, X_RUNTIME);
        for (i, arg) in args.iter().enumerate() {
            let x = GpX::new(i as u8 + 1);
            match *arg {
                Arg::FrameAddr(fr) => self.frame_addr(x, fr),
                Arg::Value(_) => {}
                Arg::U32(v) => self.asm().mov_imm_w(x.w(), v),
                Arg::U64(v) => self.load_bits_gp(x, v),
                Arg::Null => self.asm().mov(x, GpX::XZR),
                Arg::ReadCache(index) => self.load_cache_ptr(x, self.func.read_property_cache, index),
                Arg::WriteCache(index) => self.load_cache_ptr(x, self.func.write_property_cache, index),
            }
        }
        self.call_helper(helper);

        if let Some(res) = res {
            let hw = self.fr_in_any(res, false, Some(HwReg::gp(0)));
            self.mov_hw(hw, HwReg::gp(0));
            self.fr_updated(res, hw, None);
        }
    }

    /// Address of a property cache entry, or null when caching is off for
    /// this site.
    fn load_cache_ptr(&mut self, xd: GpX, base: u64, index: u8) {
        if !self.config.property_caching || index == layout::PROPERTY_CACHING_DISABLED || base == 0 {
            self.asm().mov(xd, GpX::XZR);
            return;
        }
        self.load_bits_gp(xd, base);
        let offset = index as u64 * layout::PROPERTY_CACHE_ENTRY_SIZE as u64;
        if offset != 0 {
            self.encode(|a| a.add_imm(xd, xd, offset));
        }
    }
}
