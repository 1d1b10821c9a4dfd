//! One emitter per virtual operation.

use crate::vm::{
    BinaryOp, CmpOp, DATA_MASK, FrType, FrameReg, Helper, LabelId, Op, PutMode, SLOT_SIZE, Tag,
    UnaryOp, Value, frame_layout, layout,
};

use super::aarch64::{Cond, EncodeError, GpX};
use super::call::Arg;
use super::codebuf::Label;
use super::emitter::Emitter;
use super::hwreg::{HwReg, RegClass, X_DOUBLE_LIM, X_FRAME, X_RETURN, X_RUNTIME, X_SCRATCH};
use super::slow_path::SlowPathKind;

fn binary_helper(kind: BinaryOp) -> Helper {
    match kind {
        BinaryOp::Add => Helper::Add,
        BinaryOp::Sub => Helper::Sub,
        BinaryOp::Mul => Helper::Mul,
        BinaryOp::Div => Helper::Div,
    }
}

fn unary_helper(kind: UnaryOp) -> Helper {
    match kind {
        UnaryOp::Negate => Helper::Negate,
        UnaryOp::Inc => Helper::Inc,
        UnaryOp::Dec => Helper::Dec,
    }
}

fn compare_helper(kind: CmpOp) -> Helper {
    match kind {
        CmpOp::Less => Helper::Less,
        CmpOp::LessEqual => Helper::LessEqual,
        CmpOp::Greater => Helper::Greater,
        CmpOp::GreaterEqual => Helper::GreaterEqual,
        CmpOp::Equal => Helper::Equal,
        CmpOp::NotEqual => Helper::NotEqual,
        CmpOp::StrictEqual => Helper::StrictEqual,
        CmpOp::StrictNotEqual => Helper::StrictNotEqual,
    }
}

/// Condition after `fcmp` for a comparison of two numbers. Unordered
/// operands satisfy only the not-equal conditions.
fn compare_cond(kind: CmpOp) -> Cond {
    match kind {
        CmpOp::Less => Cond::Mi,
        CmpOp::LessEqual => Cond::Ls,
        CmpOp::Greater => Cond::Gt,
        CmpOp::GreaterEqual => Cond::Ge,
        CmpOp::Equal | CmpOp::StrictEqual => Cond::Eq,
        CmpOp::NotEqual | CmpOp::StrictNotEqual => Cond::Ne,
    }
}

impl Emitter<'_> {
    pub(super) fn emit_op(&mut self, op: &Op) {
        self.comment(|| format!("; {op:?}"));
        match *op {
            Op::Label { id } => {
                let label = self.block_label(id);
                self.new_basic_block(label);
            }
            Op::LoadParam { dst, index } => self.emit_load_param(dst, index),
            Op::LoadConstDouble { dst, value } => self.emit_load_const_double(dst, value),
            Op::LoadConstBits { dst, bits, ty } => self.emit_load_const_bits(dst, bits, ty),
            Op::LoadConstUndefined { dst } => {
                self.emit_load_const_bits(dst, Value::UNDEFINED.raw(), FrType::Unknown)
            }
            Op::LoadConstNull { dst } => self.emit_load_const_bits(dst, Value::NULL.raw(), FrType::Unknown),
            Op::LoadConstBool { dst, value } => {
                self.emit_load_const_bits(dst, Value::bool(value).raw(), FrType::Bool)
            }
            Op::LoadConstString { dst, string_id } => self.emit_helper_call(
                Helper::GetBytecodeString,
                &[Arg::U64(self.func.runtime_module), Arg::U32(string_id)],
                Some(dst),
            ),
            Op::Mov { dst, src } => self.emit_mov(dst, src),
            Op::ToNumber { dst, src } => self.emit_to_number(dst, src),
            Op::Unary { kind, dst, src, assume_number } => self.emit_unary(kind, dst, src, assume_number),
            Op::Binary { kind, dst, left, right, assume_number } => {
                self.emit_binary(kind, dst, left, right, assume_number)
            }
            Op::JumpCompare { kind, target, left, right, invert, assume_number } => {
                self.emit_jump_compare(kind, target, left, right, invert, assume_number)
            }
            Op::Jump { target } => {
                let label = self.block_label(target);
                self.sync_all_temps_except(None);
                self.asm().b(label);
            }
            Op::JumpTrue { target, cond } => self.emit_jump_truthy(target, cond, true),
            Op::JumpFalse { target, cond } => self.emit_jump_truthy(target, cond, false),

            Op::GetGlobalObject { dst } => {
                let hw = self.fr_in_gp(dst, false);
                self.encode(|a| a.ldr(hw.x(), X_RUNTIME, layout::RUNTIME_GLOBAL_OBJECT as i64));
                self.fr_updated(dst, hw, None);
            }
            Op::DeclareGlobalVar { symbol } => {
                self.emit_helper_call(Helper::DeclareGlobalVar, &[Arg::U32(symbol)], None)
            }
            Op::CreateTopLevelEnvironment { dst, size } => {
                self.emit_helper_call(Helper::CreateEnvironment, &[Arg::Null, Arg::U32(size)], Some(dst))
            }
            Op::GetParentEnvironment { dst, level } => self.emit_get_parent_environment(dst, level),
            Op::LoadFromEnvironment { dst, env, slot } => self.emit_load_from_environment(dst, env, slot),
            Op::StoreToEnvironment { env, slot, value, non_pointer } => {
                let helper = if non_pointer { Helper::StoreNpToEnv } else { Helper::StoreToEnv };
                self.emit_helper_call(helper, &[Arg::Value(env), Arg::Value(value), Arg::U32(slot)], None);
            }
            Op::CreateClosure { dst, env, function_id } => self.emit_helper_call(
                Helper::CreateClosure,
                &[Arg::FrameAddr(env), Arg::U64(self.func.runtime_module), Arg::U32(function_id)],
                Some(dst),
            ),

            Op::GetById { dst, source, symbol, cache_index } => self.emit_helper_call(
                Helper::GetById,
                &[Arg::FrameAddr(source), Arg::U32(symbol), Arg::ReadCache(cache_index)],
                Some(dst),
            ),
            Op::TryGetById { dst, source, symbol, cache_index } => self.emit_helper_call(
                Helper::TryGetById,
                &[Arg::FrameAddr(source), Arg::U32(symbol), Arg::ReadCache(cache_index)],
                Some(dst),
            ),
            Op::PutById { target, symbol, value, cache_index, mode } => {
                let helper = match mode {
                    PutMode::Strict => Helper::PutByIdStrict,
                    PutMode::Loose => Helper::PutByIdLoose,
                };
                self.emit_put_by_id(helper, target, symbol, value, cache_index);
            }
            Op::TryPutById { target, symbol, value, cache_index, mode } => {
                let helper = match mode {
                    PutMode::Strict => Helper::TryPutByIdStrict,
                    PutMode::Loose => Helper::TryPutByIdLoose,
                };
                self.emit_put_by_id(helper, target, symbol, value, cache_index);
            }
            Op::GetByVal { dst, source, key } => self.emit_helper_call(
                Helper::GetByVal,
                &[Arg::FrameAddr(source), Arg::FrameAddr(key)],
                Some(dst),
            ),
            Op::PutByVal { target, key, value, mode } => {
                let helper = match mode {
                    PutMode::Strict => Helper::PutByValStrict,
                    PutMode::Loose => Helper::PutByValLoose,
                };
                self.emit_helper_call(
                    helper,
                    &[Arg::FrameAddr(target), Arg::FrameAddr(key), Arg::FrameAddr(value)],
                    None,
                );
            }
            Op::GetByIndex { dst, source, index } => self.emit_helper_call(
                Helper::GetByIndex,
                &[Arg::FrameAddr(source), Arg::U32(index as u32)],
                Some(dst),
            ),
            Op::IsIn { dst, left, right } => self.emit_helper_call(
                Helper::IsIn,
                &[Arg::FrameAddr(left), Arg::FrameAddr(right)],
                Some(dst),
            ),

            Op::Call { dst, callee, argc } => {
                self.place_callee(callee);
                self.place_new_target(None);
                self.emit_frame_call(dst, argc, None);
            }
            Op::CallN { dst, callee, ref args } => self.emit_call_n(dst, callee, args),
            Op::CallWithNewTarget { dst, callee, new_target, argc } => {
                self.place_callee(callee);
                self.place_new_target(Some(new_target));
                self.emit_frame_call(dst, argc, None);
            }
            Op::CallBuiltin { dst, builtin, argc } => {
                for i in 1..argc {
                    let slot = FrameReg::outgoing_arg(self.num_frame_regs(), i);
                    self.sync_to_mem(slot);
                }
                self.emit_frame_call(dst, argc, Some(builtin));
            }
            Op::GetBuiltinClosure { dst, builtin } => {
                self.emit_helper_call(Helper::GetBuiltinClosure, &[Arg::U32(builtin)], Some(dst))
            }

            Op::Ret { value } => {
                self.mov_hw_from_fr(HwReg::gp(X_RETURN.code() as u8), value);
                let ret = self.return_label;
                self.asm().b(ret);
            }
        }
    }

    // ==================== Guards ====================

    /// Branch to `slow` unless the value in `x` is a double.
    fn emit_number_guard(&mut self, x: GpX, slow: Label) {
        if self.config.always_slow_path {
            self.asm().b(slow);
            return;
        }
        let mut a = self.asm();
        a.cmp(x, X_DOUBLE_LIM);
        a.b_cond(Cond::Hs, slow);
    }

    /// `fr` in a vector register, guarded unless it is known to be a number.
    fn number_operand(&mut self, fr: FrameReg, known: bool, slow: Label) -> HwReg {
        if !known {
            let hw = self.fr_in_gp(fr, true);
            self.emit_number_guard(hw.x(), slow);
        }
        self.fr_in_vec(fr, true)
    }

    fn is_number(&self, fr: FrameReg, assume_number: bool) -> bool {
        assume_number || self.local_type(fr) == FrType::Number
    }

    // ==================== Loads and moves ====================

    fn emit_load_param(&mut self, dst: FrameReg, index: u32) {
        let tmp = self.alloc_scratch(RegClass::Gp);
        let hw_res = self.fr_in_any(dst, false, None);

        // `this` is always passed.
        let cont = if index > 0 {
            let (slow, cont) = self.new_slow_labels();
            let w = tmp.x().w();
            self.load_arg_count(w);
            if !self.try_encode(EncodeError::InvalidImmediate, |a| a.cmp_imm_w(w, index)) {
                let tmp2 = self.alloc_scratch(RegClass::Gp);
                let mut a = self.asm();
                a.mov_imm_w(tmp2.x().w(), index);
                a.cmp_w(w, tmp2.x().w());
                self.free_reg(tmp2);
            }
            self.asm().b_cond(Cond::Lo, slow);
            self.add_slow_path(slow, cont, "LoadParam", SlowPathKind::UndefinedParam { hw_res });
            Some(cont)
        } else {
            None
        };

        self.load_param(hw_res, index);
        self.free_reg(tmp);
        self.fr_updated(dst, hw_res, None);
        if let Some(cont) = cont {
            self.buf.bind(cont);
        }
    }

    fn emit_load_const_double(&mut self, dst: FrameReg, value: f64) {
        let hw = self.fr_in_vec(dst, false);
        self.load_bits_vec(hw, Value::number(value).raw());
        self.fr_updated(dst, hw, Some(FrType::Number));
    }

    fn emit_load_const_bits(&mut self, dst: FrameReg, bits: u64, ty: FrType) {
        let hw = if ty == FrType::Number {
            self.fr_in_vec(dst, false)
        } else {
            self.fr_in_gp(dst, false)
        };
        self.load_bits(hw, bits);
        self.fr_updated(dst, hw, Some(ty));
    }

    fn emit_mov(&mut self, dst: FrameReg, src: FrameReg) {
        if dst == src {
            return;
        }
        let hw_src = self.fr_in_any(src, true, None);
        let ty = self.local_type(src);
        let hw_dst = self.fr_in_class(dst, hw_src.class(), false);
        self.mov_hw(hw_dst, hw_src);
        self.fr_updated(dst, hw_dst, Some(ty));
    }

    fn emit_to_number(&mut self, dst: FrameReg, src: FrameReg) {
        if self.local_type(src) == FrType::Number {
            let hw_src = self.fr_in_vec(src, true);
            let hw_dst = self.fr_in_vec(dst, false);
            self.mov_hw(hw_dst, hw_src);
            self.fr_updated(dst, hw_dst, Some(FrType::Number));
            return;
        }

        self.sync_all_temps_except(if dst == src { None } else { Some(dst) });
        self.sync_to_mem(src);
        let (slow, cont) = self.new_slow_labels();
        let hw_in = self.fr_in_gp(src, true);
        self.emit_number_guard(hw_in.x(), slow);
        let hw_res = self.fr_in_vec(dst, false);
        self.mov_hw(hw_res, hw_in);
        self.add_slow_path(slow, cont, "ToNumber", SlowPathKind::ToNumber { input: src, hw_res });
        self.fr_updated(dst, hw_res, Some(FrType::Number));
        self.free_all_temps_except(Some(dst));
        self.buf.bind(cont);
    }

    // ==================== Arithmetic ====================

    fn emit_unary(&mut self, kind: UnaryOp, dst: FrameReg, src: FrameReg, assume_number: bool) {
        let known = self.is_number(src, assume_number);
        if !known {
            self.sync_all_temps_except(if dst == src { None } else { Some(dst) });
            self.sync_to_mem(src);
        }
        let (slow, cont) = self.new_slow_labels();
        let hw_in = self.number_operand(src, known, slow);
        let hw_res = self.fr_in_vec(dst, false);
        match kind {
            UnaryOp::Negate => self.asm().fneg(hw_res.d(), hw_in.d()),
            UnaryOp::Inc | UnaryOp::Dec => {
                let one = self.alloc_scratch(RegClass::Vec);
                self.encode(|a| a.fmov_imm(one.d(), 1.0));
                let mut a = self.asm();
                if kind == UnaryOp::Inc {
                    a.fadd(hw_res.d(), hw_in.d(), one.d());
                } else {
                    a.fsub(hw_res.d(), hw_in.d(), one.d());
                }
                self.free_reg(one);
            }
        }

        if known {
            self.fr_updated(dst, hw_res, Some(FrType::Number));
            return;
        }
        let helper = unary_helper(kind);
        self.add_slow_path(slow, cont, "Unary", SlowPathKind::Unary { input: src, hw_res, helper });
        self.fr_updated(dst, hw_res, None);
        self.free_all_temps_except(Some(dst));
        self.buf.bind(cont);
    }

    fn emit_binary(&mut self, kind: BinaryOp, dst: FrameReg, left: FrameReg, right: FrameReg, assume_number: bool) {
        let left_known = self.is_number(left, assume_number);
        let right_known = self.is_number(right, assume_number);
        let fast_only = left_known && right_known;
        if !fast_only {
            let res_is_input = dst == left || dst == right;
            self.sync_all_temps_except(if res_is_input { None } else { Some(dst) });
            self.sync_to_mem(left);
            self.sync_to_mem(right);
        }

        let (slow, cont) = self.new_slow_labels();
        let hw_left = self.number_operand(left, left_known, slow);
        let hw_right = if right == left {
            hw_left
        } else {
            self.number_operand(right, right_known, slow)
        };
        let hw_res = self.fr_in_vec(dst, false);
        let (d, n, m) = (hw_res.d(), hw_left.d(), hw_right.d());
        let mut a = self.asm();
        match kind {
            BinaryOp::Add => a.fadd(d, n, m),
            BinaryOp::Sub => a.fsub(d, n, m),
            BinaryOp::Mul => a.fmul(d, n, m),
            BinaryOp::Div => a.fdiv(d, n, m),
        }

        if fast_only {
            self.fr_updated(dst, hw_res, Some(FrType::Number));
            return;
        }
        let helper = binary_helper(kind);
        self.add_slow_path(
            slow,
            cont,
            "Binary",
            SlowPathKind::Binary { left, right, hw_res, helper },
        );
        self.fr_updated(dst, hw_res, None);
        self.free_all_temps_except(Some(dst));
        self.buf.bind(cont);
    }

    // ==================== Branches ====================

    fn emit_jump_compare(
        &mut self,
        kind: CmpOp,
        target: LabelId,
        left: FrameReg,
        right: FrameReg,
        invert: bool,
        assume_number: bool,
    ) {
        let target = self.block_label(target);
        let left_known = self.is_number(left, assume_number);
        let right_known = self.is_number(right, assume_number);
        let fast_only = left_known && right_known;

        self.sync_all_temps_except(None);
        if !fast_only {
            self.sync_to_mem(left);
            self.sync_to_mem(right);
        }
        let (slow, cont) = self.new_slow_labels();
        let hw_left = self.number_operand(left, left_known, slow);
        let hw_right = self.number_operand(right, right_known, slow);
        let cond = compare_cond(kind);
        let cond = if invert { cond.invert() } else { cond };
        let mut a = self.asm();
        a.fcmp(hw_left.d(), hw_right.d());
        a.b_cond(cond, target);

        if !fast_only {
            let helper = compare_helper(kind);
            self.add_slow_path(
                slow,
                cont,
                "JumpCompare",
                SlowPathKind::CondJump { left, right, target, invert, helper },
            );
        }
        self.free_all_temps();
        if !fast_only {
            self.buf.bind(cont);
        }
    }

    /// JumpTrue (`on_true`) or JumpFalse.
    fn emit_jump_truthy(&mut self, target: LabelId, cond: FrameReg, on_true: bool) {
        let target = self.block_label(target);
        match self.local_type(cond) {
            FrType::Number => {
                self.sync_all_temps_except(None);
                let hw = self.fr_in_vec(cond, true);
                let mut a = self.asm();
                a.fcmp_zero(hw.d());
                if on_true {
                    // Non-zero and not NaN.
                    a.b_cond(Cond::Mi, target);
                    a.b_cond(Cond::Gt, target);
                } else {
                    a.b_cond(Cond::Eq, target);
                    a.b_cond(Cond::Vs, target);
                }
            }
            FrType::Bool => {
                self.sync_all_temps_except(None);
                let w = self.fr_in_gp(cond, true).x().w();
                if on_true {
                    self.asm().cbnz_w(w, target);
                } else {
                    self.asm().cbz_w(w, target);
                }
            }
            FrType::Unknown => {
                self.emit_helper_call(Helper::ToBoolean, &[Arg::Value(cond)], None);
                let w = GpX::X0.w();
                if on_true {
                    self.asm().cbnz_w(w, target);
                } else {
                    self.asm().cbz_w(w, target);
                }
            }
        }
        self.free_all_temps();
    }

    // ==================== Environments ====================

    fn emit_get_parent_environment(&mut self, dst: FrameReg, level: u32) {
        let hw = self.fr_in_gp(dst, false);
        let x = hw.x();
        let closure = frame_layout::CALLEE_CLOSURE as i64 * SLOT_SIZE as i64;
        self.encode(|a| {
            a.ldur(x, X_FRAME, closure)?;
            a.and_imm(x, x, DATA_MASK)?;
            a.ldr(x, x, layout::CALLABLE_ENVIRONMENT as i64)?;
            for _ in 0..level {
                a.ldr(x, x, layout::ENVIRONMENT_PARENT as i64)?;
            }
            Ok(())
        });
        self.asm().movk(x, Tag::Object as u16, 3);
        self.fr_updated(dst, hw, None);
    }

    fn emit_load_from_environment(&mut self, dst: FrameReg, env: FrameReg, slot: u32) {
        let hw_env = self.fr_in_gp(env, true);
        let hw_res = self.fr_in_gp(dst, false);
        let x = hw_res.x();
        self.encode(|a| a.and_imm(x, hw_env.x(), DATA_MASK));
        let offset = layout::environment_slot_offset(slot);
        if !self.try_encode(EncodeError::InvalidDisplacement, |a| a.ldr(x, x, offset as i64)) {
            let mut a = self.asm();
            a.mov_imm_wide(X_SCRATCH, offset);
            a.add(x, x, X_SCRATCH);
            self.encode(|a| a.ldr(x, x, 0));
        }
        self.fr_updated(dst, hw_res, None);
    }

    // ==================== Properties ====================

    fn emit_put_by_id(&mut self, helper: Helper, target: FrameReg, symbol: u32, value: FrameReg, cache_index: u8) {
        self.emit_helper_call(
            helper,
            &[
                Arg::FrameAddr(target),
                Arg::U32(symbol),
                Arg::FrameAddr(value),
                Arg::WriteCache(cache_index),
            ],
            None,
        );
    }

    // ==================== Calls ====================

    /// Copy `value` into outgoing slot `slot` unless it is already there.
    fn place_outgoing(&mut self, slot: FrameReg, value: FrameReg) {
        if value == slot {
            return;
        }
        self.free_fr_temps(slot);
        let hw = self.fr_in_any(value, true, None);
        let ty = self.local_type(value);
        self.mov_fr_from_hw(slot, hw, Some(ty));
    }

    fn place_callee(&mut self, callee: FrameReg) {
        let slot = FrameReg::outgoing(self.num_frame_regs(), frame_layout::CALLEE_CLOSURE);
        self.place_outgoing(slot, callee);
    }

    /// Fill the outgoing new.target slot from `new_target`, or with
    /// `undefined` for a plain call.
    fn place_new_target(&mut self, new_target: Option<FrameReg>) {
        let slot = FrameReg::outgoing(self.num_frame_regs(), frame_layout::NEW_TARGET);
        match new_target {
            Some(fr) => self.place_outgoing(slot, fr),
            None => {
                self.free_fr_temps(slot);
                let tmp = self.alloc_scratch(RegClass::Gp);
                self.load_bits_gp(tmp.x(), Value::UNDEFINED.raw());
                self.mov_fr_from_hw(slot, tmp, Some(FrType::Unknown));
                self.free_reg(tmp);
            }
        }
    }

    fn emit_call_n(&mut self, dst: FrameReg, callee: FrameReg, args: &[FrameReg]) {
        let n = self.num_frame_regs();
        let argc = args.len() as u32;
        if argc > 0 {
            let lowest = FrameReg::outgoing_arg(n, argc - 1);
            debug_assert!(
                args.iter()
                    .enumerate()
                    .all(|(i, &a)| a < lowest || a == FrameReg::outgoing_arg(n, i as u32)),
                "call arguments overlap the outgoing area"
            );
        }
        for (i, &arg) in args.iter().enumerate() {
            let slot = FrameReg::outgoing_arg(n, i as u32);
            self.place_outgoing(slot, arg);
            self.sync_to_mem(slot);
        }
        self.place_callee(callee);
        self.place_new_target(None);
        self.emit_frame_call(dst, argc, None);
    }

    /// Common tail of every call: the outgoing frame is fully in memory
    /// before `call` (or `call_builtin`) runs.
    fn emit_frame_call(&mut self, dst: FrameReg, argc: u32, builtin: Option<u32>) {
        debug_assert!(argc >= 1, "argument count must include `this`");
        let n = self.num_frame_regs();
        if builtin.is_none() {
            for slot in [frame_layout::CALLEE_CLOSURE, frame_layout::NEW_TARGET] {
                self.sync_to_mem(FrameReg::outgoing(n, slot));
            }
            for i in 0..argc {
                self.sync_to_mem(FrameReg::outgoing_arg(n, i));
            }
        }
        self.sync_all_temps_except(None);
        self.free_all_temps();

        let mut a = self.asm();
        a.mov(GpX::X0, X_RUNTIME);
        a.mov(GpX::X1, X_FRAME);
        a.mov_imm_w(GpX::X2.w(), argc.saturating_sub(1));
        match builtin {
            Some(index) => {
                a.mov_imm_w(GpX::X3.w(), index);
                self.call_helper(Helper::CallBuiltin);
            }
            None => self.call_helper(Helper::Call),
        }

        let hw = self.fr_in_any(dst, false, Some(HwReg::gp(0)));
        self.mov_hw(hw, HwReg::gp(0));
        self.fr_updated(dst, hw, None);
    }
}
