//! Per-function code generation state.
//!
//! The [`Emitter`] owns everything one compilation needs: the code buffer,
//! the frame/hardware register binding tables, the slow-path queue and the
//! read-only data pool. The binding manager, slow paths, read-only data,
//! prologue and operation emitters each add their own `impl Emitter` block.

use std::collections::BTreeMap;

use crate::config::JitConfig;
use crate::vm::{FrType, FrameReg, Function, HelperTable, LabelId, SLOT_SIZE};

use super::aarch64::{AArch64Assembler, EncodeError, GpX};
use super::binding::{FrState, HwState};
use super::codebuf::{CodeBuffer, Label};
use super::fatal;
use super::hwreg::{self, GP_SAVED, HwReg, RegClass, VEC_SAVED, X_FRAME, X_SCRATCH};
use super::rodata::RoData;
use super::slow_path::SlowPath;
use super::temp_alloc::TempRegAlloc;

/// Counters reported with the compiled code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct EmitCounters {
    /// Temporaries written back because their register was needed.
    pub spills: u32,
    /// Write-backs at block ends, before calls and before helpers read a
    /// frame slot.
    pub syncs: u32,
    pub helper_calls: u32,
}

pub(super) struct Emitter<'a> {
    pub(super) buf: CodeBuffer,
    pub(super) config: &'a JitConfig,
    pub(super) helpers: &'a HelperTable,
    pub(super) func: &'a Function,

    pub(super) frs: Vec<FrState>,
    pub(super) hw: [HwState; HwReg::COUNT],
    pub(super) gp_temps: TempRegAlloc,
    pub(super) vec_temps: TempRegAlloc,

    pub(super) slow_paths: Vec<SlowPath>,
    pub(super) ro: RoData,
    pub(super) ro_label: Label,
    pub(super) return_label: Label,
    pub(super) block_labels: BTreeMap<LabelId, Label>,

    /// Pinned registers in use, per class.
    pub(super) gp_pinned: u32,
    pub(super) vec_pinned: u32,

    pub(super) counters: EmitCounters,
}

impl<'a> Emitter<'a> {
    pub(super) fn new(func: &'a Function, helpers: &'a HelperTable, config: &'a JitConfig) -> Self {
        let mut buf = CodeBuffer::with_capacity(func.ops.len() * 32);
        buf.set_record_comments(config.dump_code);
        let ro_label = buf.new_label(Some("RO_DATA"));
        let return_label = buf.new_label(Some("RETURN"));

        let num_regs = func.num_frame_regs as usize;
        let mut frs = vec![FrState::default(); num_regs];
        let num_count = (func.num_count as usize).min(num_regs);
        let np_end = (num_count + func.np_count as usize).min(num_regs);
        for state in &mut frs[..num_count] {
            state.global_type = FrType::Number;
            state.local_type = FrType::Number;
        }

        let mut next_gp = GP_SAVED.first;
        let mut next_vec = VEC_SAVED.first;
        if config.pin_registers {
            let mut take = |first: RegClass| -> Option<HwReg> {
                let order = match first {
                    RegClass::Vec => [RegClass::Vec, RegClass::Gp],
                    RegClass::Gp => [RegClass::Gp, RegClass::Vec],
                };
                for class in order {
                    match class {
                        RegClass::Gp if next_gp <= GP_SAVED.last => {
                            next_gp += 1;
                            return Some(HwReg::gp(next_gp - 1));
                        }
                        RegClass::Vec if next_vec <= VEC_SAVED.last => {
                            next_vec += 1;
                            return Some(HwReg::vec(next_vec - 1));
                        }
                        _ => {}
                    }
                }
                None
            };
            for (i, state) in frs[..np_end].iter_mut().enumerate() {
                let preferred = if i < num_count { RegClass::Vec } else { RegClass::Gp };
                let Some(reg) = take(preferred) else { break };
                state.global_reg = Some(reg);
                state.global_reg_up_to_date = true;
            }
        }

        Self {
            buf,
            config,
            helpers,
            func,
            frs,
            hw: [HwState::default(); HwReg::COUNT],
            gp_temps: TempRegAlloc::new(hwreg::temp_range(RegClass::Gp, config.gp_temp_count)),
            vec_temps: TempRegAlloc::new(hwreg::temp_range(RegClass::Vec, config.vec_temp_count)),
            slow_paths: Vec::new(),
            ro: RoData::new(),
            ro_label,
            return_label,
            block_labels: BTreeMap::new(),
            gp_pinned: (next_gp - GP_SAVED.first) as u32,
            vec_pinned: (next_vec - VEC_SAVED.first) as u32,
            counters: EmitCounters::default(),
        }
    }

    pub(super) fn num_frame_regs(&self) -> u32 {
        self.frs.len() as u32
    }

    pub(super) fn asm(&mut self) -> AArch64Assembler<'_> {
        AArch64Assembler::new(&mut self.buf)
    }

    pub(super) fn comment(&mut self, text: impl FnOnce() -> String) {
        if self.buf.records_comments() {
            self.buf.comment(text());
        }
    }

    /// Run one encoding attempt. Returns `false` if it failed with
    /// `expected`; any other failure is fatal.
    pub(super) fn try_encode(
        &mut self,
        expected: EncodeError,
        f: impl FnOnce(&mut AArch64Assembler<'_>) -> Result<(), EncodeError>,
    ) -> bool {
        match f(&mut self.asm()) {
            Ok(()) => true,
            Err(e) if e == expected => false,
            Err(e) => fatal(format_args!("unexpected encoding failure: {e}")),
        }
    }

    /// Run an encoding that must not fail.
    pub(super) fn encode(&mut self, f: impl FnOnce(&mut AArch64Assembler<'_>) -> Result<(), EncodeError>) {
        if let Err(e) = f(&mut self.asm()) {
            fatal(format_args!("encoding failure: {e}"));
        }
    }

    /// The code label bound by `Op::Label { id }`.
    pub(super) fn block_label(&mut self, id: LabelId) -> Label {
        if let Some(&label) = self.block_labels.get(&id) {
            return label;
        }
        let name = format!("L{}", id.0);
        let label = self.buf.new_label(Some(&name));
        self.block_labels.insert(id, label);
        label
    }

    // ==================== Frame memory ====================

    /// Compute `x_frame + offset` into `xd`.
    pub(super) fn frame_addr_at(&mut self, xd: GpX, offset: i64) {
        let ok = if offset >= 0 {
            self.try_encode(EncodeError::InvalidImmediate, |a| a.add_imm(xd, X_FRAME, offset as u64))
        } else {
            self.try_encode(EncodeError::InvalidImmediate, |a| a.sub_imm(xd, X_FRAME, offset.unsigned_abs()))
        };
        if !ok {
            let mut a = self.asm();
            a.mov_imm_wide(X_SCRATCH, offset.unsigned_abs());
            if offset >= 0 {
                a.add(xd, X_FRAME, X_SCRATCH);
            } else {
                a.sub(xd, X_FRAME, X_SCRATCH);
            }
        }
    }

    /// Address of `fr` in the interpreter frame, into `xd`.
    pub(super) fn frame_addr(&mut self, xd: GpX, fr: FrameReg) {
        self.frame_addr_at(xd, fr.byte_offset() as i64);
    }

    /// Base register and displacement for a frame slot, computing the
    /// address into the scratch register when the displacement is too wide
    /// for a single load or store.
    fn frame_slot(&mut self, offset: i64) -> (GpX, i64) {
        let direct = if offset >= 0 {
            offset % SLOT_SIZE as i64 == 0 && offset / SLOT_SIZE as i64 <= 0xFFF
        } else {
            offset >= -256
        };
        if direct {
            (X_FRAME, offset)
        } else {
            self.frame_addr_at(X_SCRATCH, offset);
            (X_SCRATCH, 0)
        }
    }

    /// Load the frame slot at `offset` into `hw`.
    pub(super) fn load_frame_at(&mut self, hw: HwReg, offset: i64) {
        let (base, ofs) = self.frame_slot(offset);
        self.encode(|a| match (hw.class(), ofs < 0) {
            (RegClass::Gp, false) => a.ldr(hw.x(), base, ofs),
            (RegClass::Gp, true) => a.ldur(hw.x(), base, ofs),
            (RegClass::Vec, false) => a.ldr_d(hw.d(), base, ofs),
            (RegClass::Vec, true) => a.ldur_d(hw.d(), base, ofs),
        });
    }

    pub(super) fn load_frame(&mut self, hw: HwReg, fr: FrameReg) {
        self.load_frame_at(hw, fr.byte_offset() as i64);
    }

    pub(super) fn store_frame(&mut self, fr: FrameReg, hw: HwReg) {
        let (base, ofs) = self.frame_slot(fr.byte_offset() as i64);
        self.encode(|a| match hw.class() {
            RegClass::Gp => a.str(hw.x(), base, ofs),
            RegClass::Vec => a.str_d(hw.d(), base, ofs),
        });
    }

    // ==================== Register moves and constants ====================

    /// Copy `src` into `dst`, across classes if needed.
    pub(super) fn mov_hw(&mut self, dst: HwReg, src: HwReg) {
        if dst == src {
            return;
        }
        let mut a = self.asm();
        match (dst.class(), src.class()) {
            (RegClass::Gp, RegClass::Gp) => a.mov(dst.x(), src.x()),
            (RegClass::Vec, RegClass::Vec) => a.fmov(dst.d(), src.d()),
            (RegClass::Vec, RegClass::Gp) => a.fmov_from_gp(dst.d(), src.x()),
            (RegClass::Gp, RegClass::Vec) => a.fmov_to_gp(dst.x(), src.d()),
        }
    }

    /// Materialize 64 bits into a GP register.
    pub(super) fn load_bits_gp(&mut self, xd: GpX, bits: u64) {
        if !self.try_encode(EncodeError::InvalidImmediate, |a| a.mov_imm(xd, bits)) {
            let offset = self.intern_constant(bits);
            let ro = self.ro_label;
            self.asm().ldr_literal(xd, ro, offset as i64);
        }
    }

    /// Materialize 64 bits into a register of either class.
    pub(super) fn load_bits(&mut self, hw: HwReg, bits: u64) {
        match hw.class() {
            RegClass::Gp => self.load_bits_gp(hw.x(), bits),
            RegClass::Vec => self.load_bits_vec(hw, bits),
        }
    }

    /// Materialize double bits into a vector register: `movi` for +0.0, the
    /// FP immediate, MOVZ/MOVK through the scratch register, or the pool.
    pub(super) fn load_bits_vec(&mut self, hw: HwReg, bits: u64) {
        let d = hw.d();
        if bits == 0 {
            self.asm().movi_zero(d);
        } else if self.try_encode(EncodeError::InvalidImmediate, |a| a.fmov_imm(d, f64::from_bits(bits))) {
        } else if self.try_encode(EncodeError::InvalidImmediate, |a| a.mov_imm(X_SCRATCH, bits)) {
            self.asm().fmov_from_gp(d, X_SCRATCH);
        } else {
            let offset = self.intern_constant(bits);
            let ro = self.ro_label;
            self.asm().ldr_literal_d(d, ro, offset as i64);
        }
    }
}
