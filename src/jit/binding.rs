//! Binding of frame registers to hardware registers.
//!
//! A frame register (FR) always has a home slot in the interpreter frame. It
//! may additionally be pinned to a callee-saved "global" register for the
//! whole function, and may have at most one temporary "local" register per
//! class. The state below records which copies hold the current value:
//!
//! - a local register is always current;
//! - the global register is current when `global_reg_up_to_date` is set,
//!   and otherwise some local holds the newer value;
//! - the frame slot is current when `frame_up_to_date` is set.
//!
//! Only the frame slot can be read by runtime helpers, so every path that
//! hands the address of an FR to the runtime calls [`Emitter::sync_to_mem`]
//! first. At basic block boundaries all temporaries are written back and
//! released, so every block starts with values in their global registers or
//! in the frame.

use tracing::trace;

use crate::vm::{FrType, FrameReg};

use super::codebuf::Label;
use super::emitter::Emitter;
use super::fatal;
use super::hwreg::{HwReg, RegClass};
use super::temp_alloc::TempRegAlloc;

#[derive(Debug, Clone, Copy)]
pub(super) struct FrState {
    /// Callee-saved register pinned to this FR for the whole function.
    pub global_reg: Option<HwReg>,
    pub global_reg_up_to_date: bool,
    pub local_gp: Option<HwReg>,
    pub local_vec: Option<HwReg>,
    pub frame_up_to_date: bool,
    /// Type that holds at every basic block boundary.
    pub global_type: FrType,
    /// Type known at the current point of the block.
    pub local_type: FrType,
}

impl Default for FrState {
    fn default() -> Self {
        Self {
            global_reg: None,
            global_reg_up_to_date: false,
            local_gp: None,
            local_vec: None,
            frame_up_to_date: true,
            global_type: FrType::Unknown,
            local_type: FrType::Unknown,
        }
    }
}

impl FrState {
    fn local(&self, class: RegClass) -> Option<HwReg> {
        match class {
            RegClass::Gp => self.local_gp,
            RegClass::Vec => self.local_vec,
        }
    }

    fn local_mut(&mut self, class: RegClass) -> &mut Option<HwReg> {
        match class {
            RegClass::Gp => &mut self.local_gp,
            RegClass::Vec => &mut self.local_vec,
        }
    }

    fn any_local(&self) -> Option<HwReg> {
        self.local_gp.or(self.local_vec)
    }
}

/// Which FR, if any, a temporary register currently holds.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct HwState {
    pub owner: Option<FrameReg>,
}

fn other(class: RegClass) -> RegClass {
    match class {
        RegClass::Gp => RegClass::Vec,
        RegClass::Vec => RegClass::Gp,
    }
}

impl Emitter<'_> {
    fn temps(&mut self, class: RegClass) -> &mut TempRegAlloc {
        match class {
            RegClass::Gp => &mut self.gp_temps,
            RegClass::Vec => &mut self.vec_temps,
        }
    }

    pub(super) fn is_temp(&self, hw: HwReg) -> bool {
        match hw.class() {
            RegClass::Gp => self.gp_temps.contains(hw.index_in_class()),
            RegClass::Vec => self.vec_temps.contains(hw.index_in_class()),
        }
    }

    fn is_allocated_temp(&self, hw: HwReg) -> bool {
        let pool = match hw.class() {
            RegClass::Gp => &self.gp_temps,
            RegClass::Vec => &self.vec_temps,
        };
        pool.contains(hw.index_in_class()) && !pool.is_free(hw.index_in_class())
    }

    /// Allocated temporaries of both classes, in register order.
    fn live_temps(&self) -> Vec<HwReg> {
        let mut regs = Vec::new();
        for (class, pool) in [(RegClass::Gp, &self.gp_temps), (RegClass::Vec, &self.vec_temps)] {
            let range = pool.range();
            for n in range.first..=range.last {
                if !pool.is_free(n) {
                    regs.push(HwReg::in_class(class, n));
                }
            }
        }
        regs
    }

    pub(super) fn fr_state(&self, fr: FrameReg) -> &FrState {
        &self.frs[fr.index()]
    }

    fn fr_state_mut(&mut self, fr: FrameReg) -> &mut FrState {
        &mut self.frs[fr.index()]
    }

    pub(super) fn local_type(&self, fr: FrameReg) -> FrType {
        self.fr_state(fr).local_type
    }

    pub(super) fn owner(&self, hw: HwReg) -> Option<FrameReg> {
        self.hw[hw.combined_index()].owner
    }

    /// Mark a temporary as most recently used.
    fn use_reg(&mut self, hw: HwReg) {
        if self.is_temp(hw) {
            let n = hw.index_in_class();
            self.temps(hw.class()).touch(n);
        }
    }

    fn assign_local(&mut self, fr: FrameReg, hw: HwReg) {
        debug_assert!(self.owner(hw).is_none(), "{hw} already holds a frame register");
        *self.fr_state_mut(fr).local_mut(hw.class()) = Some(hw);
        self.hw[hw.combined_index()].owner = Some(fr);
    }

    // ==================== Temporary allocation ====================

    /// Allocate a temporary of `class`, taking `preferred` if possible. When
    /// the pool is exhausted, `preferred` (or else the least recently used
    /// temporary) is written back and reused.
    pub(super) fn alloc_temp(&mut self, class: RegClass, preferred: Option<HwReg>) -> HwReg {
        let preferred = preferred.filter(|p| p.class() == class);
        let pref_index = preferred.map(HwReg::index_in_class);
        if let Some(n) = self.temps(class).alloc(pref_index) {
            let hw = HwReg::in_class(class, n);
            trace!(%hw, "allocated temporary");
            return hw;
        }

        let victim = match preferred {
            Some(p) if self.is_temp(p) && self.owner(p).is_some() => Some(p),
            _ => {
                let pool = match class {
                    RegClass::Gp => &self.gp_temps,
                    RegClass::Vec => &self.vec_temps,
                };
                pool.lru_order()
                    .map(|n| HwReg::in_class(class, n))
                    .find(|&hw| self.hw[hw.combined_index()].owner.is_some())
            }
        };
        let Some(victim) = victim else {
            fatal(format_args!(
                "no evictable {class:?} temporary in {}",
                self.func.name
            ))
        };
        trace!(%victim, "evicting temporary");
        if self.spill_temp(victim) {
            self.counters.spills += 1;
        }
        match self.temps(class).alloc(pref_index) {
            Some(n) => HwReg::in_class(class, n),
            None => fatal("temporary pool still full after eviction"),
        }
    }

    /// A temporary not bound to any FR. Release with [`Emitter::free_reg`].
    pub(super) fn alloc_scratch(&mut self, class: RegClass) -> HwReg {
        self.alloc_temp(class, None)
    }

    /// Release a temporary, dropping its binding without writing it back.
    pub(super) fn free_reg(&mut self, hw: HwReg) {
        debug_assert!(self.is_temp(hw), "{hw} is not a temporary");
        if let Some(fr) = self.hw[hw.combined_index()].owner.take() {
            let state = self.fr_state_mut(fr);
            let slot = state.local_mut(hw.class());
            debug_assert_eq!(*slot, Some(hw));
            *slot = None;
        }
        let n = hw.index_in_class();
        self.temps(hw.class()).free(n);
    }

    /// Write a temporary back to its FR's global register or frame slot,
    /// then release it. Returns whether anything was written.
    pub(super) fn spill_temp(&mut self, hw: HwReg) -> bool {
        let written = match self.owner(hw) {
            Some(fr) => self.write_back(fr, hw),
            None => false,
        };
        self.free_reg(hw);
        written
    }

    /// Write back and release `hw` if it is an allocated temporary. Used to
    /// clear argument registers before a call.
    pub(super) fn sync_and_free_temp(&mut self, hw: HwReg) {
        if self.is_allocated_temp(hw) && self.spill_temp(hw) {
            self.counters.syncs += 1;
        }
    }

    /// Propagate the value in `hw`, a local of `fr`, to where it survives the
    /// end of the block. Returns false when that copy was already current.
    fn write_back(&mut self, fr: FrameReg, hw: HwReg) -> bool {
        let state = *self.fr_state(fr);
        if let Some(global) = state.global_reg {
            if state.global_reg_up_to_date {
                return false;
            }
            self.comment(|| format!("sync {hw} -> {global} ({fr})"));
            self.mov_hw(global, hw);
            self.fr_state_mut(fr).global_reg_up_to_date = true;
        } else {
            if state.frame_up_to_date {
                return false;
            }
            self.comment(|| format!("write back {hw} ({fr})"));
            self.store_frame(fr, hw);
            self.fr_state_mut(fr).frame_up_to_date = true;
        }
        true
    }

    /// Write back every temporary except those bound to `except`.
    pub(super) fn sync_all_temps_except(&mut self, except: Option<FrameReg>) {
        for hw in self.live_temps() {
            match self.owner(hw) {
                Some(fr) if Some(fr) != except => {
                    if self.write_back(fr, hw) {
                        self.counters.syncs += 1;
                    }
                }
                _ => {}
            }
        }
    }

    /// Release every temporary except those bound to `except`, without
    /// writing anything back.
    pub(super) fn free_all_temps_except(&mut self, except: Option<FrameReg>) {
        for hw in self.live_temps() {
            if except.is_none() || self.owner(hw) != except {
                self.free_reg(hw);
            }
        }
    }

    pub(super) fn free_all_temps(&mut self) {
        self.free_all_temps_except(None);
    }

    /// Drop the temporaries of `fr` without writing them back.
    pub(super) fn free_fr_temps(&mut self, fr: FrameReg) {
        let state = *self.fr_state(fr);
        for hw in [state.local_gp, state.local_vec].into_iter().flatten() {
            self.free_reg(hw);
        }
    }

    /// Make the frame slot of `fr` current.
    pub(super) fn sync_to_mem(&mut self, fr: FrameReg) {
        let state = *self.fr_state(fr);
        if state.frame_up_to_date {
            return;
        }
        let src = match state.global_reg {
            Some(global) => {
                if !state.global_reg_up_to_date {
                    let Some(local) = state.any_local() else {
                        fatal(format_args!("{fr}: stale global register without a local"))
                    };
                    self.mov_hw(global, local);
                    self.fr_state_mut(fr).global_reg_up_to_date = true;
                }
                global
            }
            None => match state.any_local() {
                Some(local) => local,
                None => fatal(format_args!("{fr}: frame slot stale but no register holds it")),
            },
        };
        self.comment(|| format!("sync {src} -> frame ({fr})"));
        self.store_frame(fr, src);
        self.fr_state_mut(fr).frame_up_to_date = true;
        self.counters.syncs += 1;
    }

    // ==================== FR lookup ====================

    /// The register currently holding `fr`, preferring locals.
    pub(super) fn fr_in_register(&mut self, fr: FrameReg) -> Option<HwReg> {
        let state = *self.fr_state(fr);
        if let Some(hw) = state.any_local() {
            self.use_reg(hw);
            return Some(hw);
        }
        state.global_reg
    }

    /// A register of `class` holding `fr` (when `load` is set) or ready to
    /// receive a new value of `fr`.
    pub(super) fn fr_in_class(&mut self, fr: FrameReg, class: RegClass, load: bool) -> HwReg {
        let state = *self.fr_state(fr);
        if let Some(hw) = state.local(class) {
            self.use_reg(hw);
            return hw;
        }
        if let Some(global) = state.global_reg.filter(|g| g.class() == class) {
            if load && !state.global_reg_up_to_date {
                if let Some(local) = state.local(other(class)) {
                    self.mov_hw(global, local);
                }
                self.fr_state_mut(fr).global_reg_up_to_date = true;
            }
            return global;
        }

        let hw = self.alloc_temp(class, None);
        self.assign_local(fr, hw);
        if load {
            let state = *self.fr_state(fr);
            if let Some(local) = state.local(other(class)) {
                self.mov_hw(hw, local);
            } else if let Some(global) = state.global_reg.filter(|_| state.global_reg_up_to_date) {
                self.mov_hw(hw, global);
            } else {
                debug_assert!(state.frame_up_to_date, "{fr}: no current copy to load");
                self.load_frame(hw, fr);
                self.fr_state_mut(fr).frame_up_to_date = true;
            }
        }
        hw
    }

    pub(super) fn fr_in_gp(&mut self, fr: FrameReg, load: bool) -> HwReg {
        self.fr_in_class(fr, RegClass::Gp, load)
    }

    pub(super) fn fr_in_vec(&mut self, fr: FrameReg, load: bool) -> HwReg {
        self.fr_in_class(fr, RegClass::Vec, load)
    }

    /// A register of any class for `fr`. A new temporary is taken from the
    /// class of `preferred`, or the vector class for known numbers.
    pub(super) fn fr_in_any(&mut self, fr: FrameReg, load: bool, preferred: Option<HwReg>) -> HwReg {
        if let Some(hw) = self.fr_in_register(fr) {
            return hw;
        }
        let class = match preferred {
            Some(p) => p.class(),
            None if self.local_type(fr) == FrType::Number => RegClass::Vec,
            None => RegClass::Gp,
        };
        let hw = self.alloc_temp(class, preferred);
        self.assign_local(fr, hw);
        if load {
            self.load_frame(hw, fr);
        }
        hw
    }

    // ==================== FR updates ====================

    /// Record that `hw`, the global register or a local of `fr`, now holds
    /// the newest value of `fr`. `ty` of `None` means the FR's global type.
    pub(super) fn fr_updated(&mut self, fr: FrameReg, hw: HwReg, ty: Option<FrType>) {
        let state = *self.fr_state(fr);
        if state.global_reg == Some(hw) {
            for local in [state.local_gp, state.local_vec].into_iter().flatten() {
                self.free_reg(local);
            }
            self.fr_state_mut(fr).global_reg_up_to_date = true;
        } else {
            debug_assert!(
                state.local(hw.class()) == Some(hw),
                "{hw} is not bound to {fr}"
            );
            if let Some(stale) = state.local(other(hw.class())) {
                self.free_reg(stale);
            }
            self.fr_state_mut(fr).global_reg_up_to_date = false;
        }
        let state = self.fr_state_mut(fr);
        state.frame_up_to_date = false;
        state.local_type = ty.unwrap_or(state.global_type);
    }

    /// Copy `fr` into `dst`, from a register if it has one.
    pub(super) fn mov_hw_from_fr(&mut self, dst: HwReg, fr: FrameReg) {
        match self.fr_in_register(fr) {
            Some(src) => self.mov_hw(dst, src),
            None => self.load_frame(dst, fr),
        }
    }

    /// Assign `src` to `fr`, into a register it already has or else
    /// straight to its frame slot.
    pub(super) fn mov_fr_from_hw(&mut self, fr: FrameReg, src: HwReg, ty: Option<FrType>) {
        let state = *self.fr_state(fr);
        if let Some(dst) = state.any_local().or(state.global_reg) {
            self.mov_hw(dst, src);
            self.fr_updated(fr, dst, ty);
        } else {
            self.store_frame(fr, src);
            let state = self.fr_state_mut(fr);
            state.frame_up_to_date = true;
            state.local_type = ty.unwrap_or(state.global_type);
        }
    }

    // ==================== Blocks ====================

    /// End the current block and bind `label`. All temporaries are written
    /// back and released; local types revert to global types.
    pub(super) fn new_basic_block(&mut self, label: Label) {
        self.sync_all_temps_except(None);
        self.free_all_temps();
        for (i, state) in self.frs.iter_mut().enumerate() {
            state.local_type = state.global_type;
            if state.global_reg.is_some() {
                debug_assert!(state.global_reg_up_to_date, "r{i}: stale global at block end");
                state.frame_up_to_date = false;
            } else {
                debug_assert!(state.frame_up_to_date, "r{i}: stale frame slot at block end");
            }
        }
        self.buf.bind(label);
    }
}

#[cfg(test)]
impl Emitter<'_> {
    /// Panics unless the two binding tables agree: an owned register is the
    /// local of its owner in that class, and every local is an allocated
    /// temporary owned by its FR.
    pub(super) fn check_bindings(&self) {
        for class in [RegClass::Gp, RegClass::Vec] {
            for n in 0..32 {
                let hw = HwReg::in_class(class, n);
                let Some(fr) = self.owner(hw) else { continue };
                assert!(self.is_allocated_temp(hw), "{hw} holds {fr} but is not allocated");
                assert_eq!(self.fr_state(fr).local(class), Some(hw), "{hw} holds {fr}");
            }
        }
        for (i, state) in self.frs.iter().enumerate() {
            let fr = FrameReg(i as u32);
            for (class, local) in [(RegClass::Gp, state.local_gp), (RegClass::Vec, state.local_vec)] {
                let Some(hw) = local else { continue };
                assert_eq!(hw.class(), class, "{fr}: {hw} in the wrong class");
                assert_eq!(self.owner(hw), Some(fr), "{fr}: local {hw} owned elsewhere");
            }
            if let Some(global) = state.global_reg {
                assert!(!self.is_temp(global), "{fr}: pinned to temporary {global}");
                if !state.global_reg_up_to_date {
                    assert!(state.any_local().is_some(), "{fr}: stale global without a local");
                }
            }
        }
    }
}
