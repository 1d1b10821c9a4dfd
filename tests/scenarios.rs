mod common;

use common::*;
use framejit::config::JitConfig;
use framejit::sim::{Machine, Native, READ_CACHE_BASE, WRITE_CACHE_BASE};
use framejit::vm::{BinaryOp, CmpOp, FrameReg, Function, Helper, LabelId, Op, PutMode, UnaryOp, Value};

fn config(f: impl FnOnce(&mut JitConfig)) -> JitConfig {
    let mut config = JitConfig::default();
    f(&mut config);
    config
}

#[test]
fn test_numeric_add_stays_inline() {
    let func = Function::new(
        "add",
        4,
        vec![
            load_double(1, 2.0),
            load_double(2, 3.0),
            binary(BinaryOp::Add, 3, 1, 2),
            ret(3),
        ],
    );
    let (result, machine) = run(&func, &[]);
    assert_eq!(result, num(5.0));
    assert_eq!(machine.runtime.count(Helper::Add), 0);
    assert_eq!(machine.runtime.count(Helper::Enter), 1);
    assert_eq!(machine.runtime.count(Helper::Leave), 1);
}

fn poly_add() -> Function {
    Function::new(
        "poly_add",
        3,
        vec![param(0, 1), param(1, 2), binary(BinaryOp::Add, 2, 0, 1), ret(2)],
    )
}

#[test]
fn test_polymorphic_add_numbers() {
    let (result, machine) = run(&poly_add(), &[num(1.25), num(2.25)]);
    assert_eq!(result, num(3.5));
    assert_eq!(machine.runtime.count(Helper::Add), 0);
}

#[test]
fn test_polymorphic_add_string_takes_slow_path() {
    let code = compile_with(&poly_add(), &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    let s = machine.runtime.new_string("n=");
    let result = machine.run(&code, &[s, num(3.0)]).unwrap();
    assert_eq!(machine.runtime.string(result), Some("n=3"));
    assert_eq!(machine.runtime.count(Helper::Add), 1);
}

#[test]
fn test_missing_param_is_undefined() {
    let (result, machine) = run(&poly_add(), &[num(1.0)]);
    assert!(result.as_number().unwrap().is_nan());
    assert_eq!(machine.runtime.count(Helper::Add), 1);
    assert_eq!(machine.runtime.last_frame()[1], Value::UNDEFINED);
}

#[test]
fn test_number_ops_fast_and_slow_agree() {
    let func = Function::new(
        "mixed",
        12,
        vec![
            param(0, 1),
            param(1, 2),
            binary(BinaryOp::Add, 2, 0, 1),
            binary(BinaryOp::Sub, 3, 0, 1),
            binary(BinaryOp::Mul, 4, 2, 3),
            binary(BinaryOp::Div, 5, 4, 1),
            unary(UnaryOp::Negate, 6, 5),
            unary(UnaryOp::Inc, 7, 6),
            unary(UnaryOp::Dec, 8, 0),
            Op::ToNumber { dst: r(9), src: r(1) },
            jump_compare(CmpOp::Less, 0, 0, 1),
            load_double(10, 1.0),
            jump(1),
            label(0),
            load_double(10, 2.0),
            label(1),
            binary(BinaryOp::Add, 11, 7, 10),
            label(2),
            ret(11),
        ],
    );
    let inputs = [
        (1.5, 2.0),
        (-0.0, 0.0),
        (f64::INFINITY, f64::NEG_INFINITY),
        (f64::NAN, 3.0),
        (1e308, 1e-308),
        (0.0, 0.0),
        (-7.25, 0.5),
    ];
    let fast = JitConfig::default();
    let slow = config(|c| c.always_slow_path = true);
    for (a, b) in inputs {
        let args = [num(a), num(b)];
        let (r_fast, m_fast) = run_with(&func, &fast, &args);
        let (r_slow, m_slow) = run_with(&func, &slow, &args);
        assert_eq!(r_fast.raw(), r_slow.raw(), "result for ({a}, {b})");
        assert_eq!(m_fast.runtime.last_frame(), m_slow.runtime.last_frame(), "frame for ({a}, {b})");
        assert_eq!(m_fast.runtime.count(Helper::Add), 0);
        assert!(m_slow.runtime.count(Helper::Add) >= 2);
        assert!(m_slow.runtime.count(Helper::Less) == 1);
    }
}

#[test]
fn test_negate_keeps_nan_payload() {
    let func = Function::new("neg", 2, vec![param(0, 1), unary(UnaryOp::Negate, 1, 0), ret(1)]);
    let (result, _) = run(&func, &[num(0.0)]);
    assert_eq!(result.raw(), (-0.0f64).to_bits());
    let (result, _) = run(&func, &[num(f64::NAN)]);
    assert_eq!(result.raw(), Value::number(f64::NAN).raw() | (1 << 63));
}

#[test]
fn test_spilled_values_survive() {
    let mut ops: Vec<Op> = (0..6).map(|i| load_double(i, (i + 1) as f64)).collect();
    for i in 0..5 {
        ops.push(binary(BinaryOp::Add, 6 + i, i, i + 1));
    }
    ops.push(label(0));
    ops.push(ret(10));
    let func = Function::new("spill", 12, ops);

    let small = config(|c| {
        c.gp_temp_count = 4;
        c.vec_temp_count = 4;
        c.pin_registers = false;
    });
    let large = config(|c| c.pin_registers = false);

    let small_code = compile_with(&func, &small);
    let large_code = compile_with(&func, &large);
    assert!(small_code.stats.spills > 0);
    assert_eq!(large_code.stats.spills, 0);

    let (r_small, m_small) = run_with(&func, &small, &[]);
    let (r_large, m_large) = run_with(&func, &large, &[]);
    assert_eq!(r_small, num(11.0));
    assert_eq!(r_large, num(11.0));
    assert_eq!(m_small.runtime.last_frame(), m_large.runtime.last_frame());

    let frame = m_small.runtime.last_frame();
    assert_eq!(frame[0], num(1.0));
    assert_eq!(frame[6], num(3.0));
    assert_eq!(frame[10], num(11.0));
    assert_eq!(frame[11], Value::UNDEFINED);
}

fn sum_loop() -> Function {
    let mut func = Function::new(
        "sum_loop",
        4,
        vec![
            load_double(0, 0.0),
            load_double(1, 1.0),
            param(2, 1),
            label(0),
            jump_compare(CmpOp::Greater, 1, 1, 2),
            binary(BinaryOp::Add, 0, 0, 1),
            unary(UnaryOp::Inc, 1, 1),
            jump(0),
            label(1),
            ret(0),
        ],
    );
    func.num_count = 2;
    func.np_count = 1;
    func
}

#[test]
fn test_loop_with_pinned_registers() {
    let func = sum_loop();
    let pinned = compile_with(&func, &JitConfig::default());
    assert_eq!(pinned.stats.vec_pinned, 2);
    assert_eq!(pinned.stats.gp_pinned, 1);

    let unpinned = config(|c| c.pin_registers = false);
    for n in [0.0, 1.0, 10.0, 100.0] {
        let expected = num(n * (n + 1.0) / 2.0);
        let (r_pinned, machine) = run(&func, &[num(n)]);
        let (r_unpinned, _) = run_with(&func, &unpinned, &[num(n)]);
        assert_eq!(r_pinned, expected);
        assert_eq!(r_unpinned, expected);
        assert_eq!(machine.runtime.count(Helper::Greater), 0);
    }
}

#[test]
fn test_loop_compares_generically_with_string_bound() {
    let mut func = sum_loop();
    func.np_count = 0;
    let code = compile_with(&func, &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    let bound = machine.runtime.new_string("3");
    let result = machine.run(&code, &[bound]).unwrap();
    assert_eq!(result, num(6.0));
    assert_eq!(machine.runtime.count(Helper::Greater), 4);
}

fn truthy() -> Function {
    Function::new(
        "truthy",
        2,
        vec![
            param(0, 1),
            Op::JumpTrue { target: LabelId(0), cond: r(0) },
            load_double(1, 0.0),
            jump(1),
            label(0),
            load_double(1, 1.0),
            label(1),
            ret(1),
        ],
    )
}

#[test]
fn test_jump_true_on_unknown_values() {
    let code = compile_with(&truthy(), &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    let empty = machine.runtime.new_string("");
    let text = machine.runtime.new_string("x");
    let cases = [
        (num(0.0), 0.0),
        (num(5.0), 1.0),
        (num(f64::NAN), 0.0),
        (empty, 0.0),
        (text, 1.0),
        (Value::NULL, 0.0),
        (Value::TRUE, 1.0),
    ];
    for (arg, expected) in cases {
        assert_eq!(machine.run(&code, &[arg]).unwrap(), num(expected), "{arg}");
    }
    assert_eq!(machine.runtime.count(Helper::ToBoolean), cases.len() as u32);
}

#[test]
fn test_jump_on_known_types_needs_no_helper() {
    let mut func = Function::new(
        "known",
        3,
        vec![
            load_double(0, -0.0),
            Op::LoadConstBool { dst: r(1), value: false },
            load_double(2, 1.0),
            Op::JumpFalse { target: LabelId(0), cond: r(1) },
            load_double(2, 2.0),
            label(0),
            Op::JumpTrue { target: LabelId(1), cond: r(0) },
            binary(BinaryOp::Add, 2, 2, 2),
            label(1),
            ret(2),
        ],
    );
    func.num_count = 1;
    for config in [JitConfig::default(), config(|c| c.pin_registers = false)] {
        let (result, machine) = run_with(&func, &config, &[]);
        assert_eq!(result, num(2.0));
        assert_eq!(machine.runtime.count(Helper::ToBoolean), 0);
        assert_eq!(machine.runtime.count(Helper::Add), 0);
    }
}

#[test]
fn test_inverted_compare_with_nan() {
    let func = Function::new(
        "inverted",
        3,
        vec![
            param(0, 1),
            param(1, 2),
            Op::JumpCompare {
                kind: CmpOp::Less,
                target: LabelId(0),
                left: r(0),
                right: r(1),
                invert: true,
                assume_number: false,
            },
            load_double(2, 1.0),
            ret(2),
            label(0),
            load_double(2, 2.0),
            ret(2),
        ],
    );
    let slow = config(|c| c.always_slow_path = true);
    for (a, b, expected) in [(1.0, 2.0, 1.0), (2.0, 1.0, 2.0), (f64::NAN, 1.0, 2.0)] {
        let (fast, _) = run(&func, &[num(a), num(b)]);
        let (generic, _) = run_with(&func, &slow, &[num(a), num(b)]);
        assert_eq!(fast, num(expected));
        assert_eq!(generic, num(expected));
    }
}

#[test]
fn test_call_n_passes_this_and_args() {
    let func = Function::new(
        "call_sum",
        16,
        vec![
            param(0, 1),
            Op::LoadConstUndefined { dst: r(1) },
            load_double(2, 1.0),
            load_double(3, 2.0),
            Op::CallN { dst: r(4), callee: r(0), args: vec![r(1), r(2), r(3)] },
            ret(4),
        ],
    );
    let code = compile_with(&func, &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    let sum = machine.runtime.new_closure(&mut machine.sim.mem, None, Native::Sum).unwrap();
    let result = machine.run(&code, &[sum]).unwrap();
    assert_eq!(result, num(3.0));

    let calls = machine.runtime.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].callee, sum);
    assert_eq!(calls[0].this, Value::UNDEFINED);
    assert_eq!(calls[0].args, vec![num(1.0), num(2.0)]);
    assert_eq!(calls[0].new_target, Value::UNDEFINED);
    assert_eq!(calls[0].builtin, None);
}

#[test]
fn test_call_with_new_target() {
    let n = 12;
    let this_slot = FrameReg::outgoing_arg(n, 0).0;
    let func = Function::new(
        "construct",
        n,
        vec![
            param(0, 1),
            load_double(1, 42.0),
            load_double(this_slot, 7.0),
            Op::CallWithNewTarget { dst: r(2), callee: r(0), new_target: r(1), argc: 1 },
            ret(2),
        ],
    );
    let code = compile_with(&func, &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    let callee = machine.runtime.new_closure(&mut machine.sim.mem, None, Native::NewTarget).unwrap();
    let result = machine.run(&code, &[callee]).unwrap();
    assert_eq!(result, num(42.0));
    let call = &machine.runtime.calls()[0];
    assert_eq!(call.this, num(7.0));
    assert!(call.args.is_empty());
}

#[test]
fn test_call_builtin_and_builtin_closure() {
    let n = 14;
    let arg = |i| FrameReg::outgoing_arg(n, i).0;
    let func = Function::new(
        "builtins",
        n,
        vec![
            load_double(arg(1), 4.0),
            load_double(arg(2), 5.0),
            Op::CallBuiltin { dst: r(0), builtin: 7, argc: 3 },
            Op::GetBuiltinClosure { dst: r(1), builtin: 1 },
            Op::LoadConstUndefined { dst: r(arg(0)) },
            load_double(arg(1), 10.0),
            load_double(arg(2), 20.0),
            Op::Call { dst: r(2), callee: r(1), argc: 3 },
            binary(BinaryOp::Add, 3, 0, 2),
            ret(3),
        ],
    );
    let code = compile_with(&func, &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    machine.runtime.define_builtin(7, Native::ArgCount);
    machine.runtime.define_builtin(1, Native::Sum);
    let result = machine.run(&code, &[]).unwrap();
    assert_eq!(result, num(32.0));

    let calls = machine.runtime.calls();
    assert_eq!(calls[0].builtin, Some(7));
    assert_eq!(calls[0].args, vec![num(4.0), num(5.0)]);
    assert_eq!(calls[1].builtin, None);
    assert_eq!(calls[1].args, vec![num(10.0), num(20.0)]);
}

#[test]
fn test_call_keeps_pinned_values() {
    let n = 16;
    let mut func = Function::new(
        "pinned_call",
        n,
        vec![
            load_double(0, 1.5),
            param(1, 1),
            Op::LoadConstUndefined { dst: r(2) },
            Op::CallN { dst: r(3), callee: r(1), args: vec![r(2), r(0)] },
            binary(BinaryOp::Add, 4, 0, 3),
            ret(4),
        ],
    );
    func.num_count = 1;
    let code = compile_with(&func, &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    let callee = machine
        .runtime
        .new_closure(&mut machine.sim.mem, None, Native::Constant(num(2.0)))
        .unwrap();
    assert_eq!(machine.run(&code, &[callee]).unwrap(), num(3.5));
}

#[test]
fn test_environments() {
    let func = Function::new(
        "envs",
        8,
        vec![
            Op::CreateTopLevelEnvironment { dst: r(0), size: 2 },
            load_double(1, 7.0),
            Op::StoreToEnvironment { env: r(0), slot: 1, value: r(1), non_pointer: true },
            Op::LoadFromEnvironment { dst: r(2), env: r(0), slot: 1 },
            Op::GetParentEnvironment { dst: r(3), level: 0 },
            Op::LoadFromEnvironment { dst: r(4), env: r(3), slot: 0 },
            Op::GetParentEnvironment { dst: r(5), level: 1 },
            Op::LoadFromEnvironment { dst: r(6), env: r(5), slot: 0 },
            binary(BinaryOp::Add, 7, 2, 4),
            binary(BinaryOp::Add, 7, 7, 6),
            label(0),
            ret(7),
        ],
    );
    let code = compile_with(&func, &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    let mem = &mut machine.sim.mem;
    let outer = machine.runtime.new_environment(mem, None, 1).unwrap();
    let inner = machine.runtime.new_environment(mem, Some(outer), 1).unwrap();
    machine.runtime.set_environment_slot(mem, outer, 0, num(100.0)).unwrap();
    machine.runtime.set_environment_slot(mem, inner, 0, num(5.0)).unwrap();
    let callee = machine.runtime.new_closure(mem, Some(inner), Native::Undefined).unwrap();

    let result = machine.call(&code, callee, Value::UNDEFINED, &[]).unwrap();
    assert_eq!(result, num(112.0));

    let frame = machine.runtime.last_frame();
    assert_eq!(frame[3], inner);
    assert_eq!(frame[5], outer);
    let created = frame[0];
    assert!(created.is_object());
    assert_eq!(machine.runtime.environment_slot(&machine.sim.mem, created, 1).unwrap(), num(7.0));
    assert_eq!(machine.runtime.environment_slot(&machine.sim.mem, created, 0).unwrap(), Value::UNDEFINED);
    assert_eq!(machine.runtime.count(Helper::StoreNpToEnv), 1);
}

#[test]
fn test_create_closure_and_strings() {
    let n = 12;
    let func = Function::new(
        "closures",
        n,
        vec![
            Op::CreateTopLevelEnvironment { dst: r(0), size: 0 },
            Op::CreateClosure { dst: r(1), env: r(0), function_id: 3 },
            Op::LoadConstUndefined { dst: r(2) },
            Op::CallN { dst: r(3), callee: r(1), args: vec![r(2)] },
            Op::LoadConstString { dst: r(4), string_id: 1 },
            binary(BinaryOp::Add, 4, 4, 3),
            ret(4),
        ],
    );
    let code = compile_with(&func, &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    machine.runtime.define_function(3, Native::Constant(num(9.0)));
    machine.runtime.set_bytecode_strings(vec!["a".into(), "b".into()]);
    let result = machine.run(&code, &[]).unwrap();
    assert_eq!(machine.runtime.string(result), Some("b9"));
}

fn property_function(read_cache: u64, write_cache: u64) -> Function {
    let mut func = Function::new(
        "props",
        4,
        vec![
            Op::GetGlobalObject { dst: r(0) },
            load_double(1, 4.0),
            Op::PutById { target: r(0), symbol: 3, value: r(1), cache_index: 2, mode: PutMode::Strict },
            Op::GetById { dst: r(2), source: r(0), symbol: 3, cache_index: 5 },
            Op::GetById { dst: r(3), source: r(0), symbol: 3, cache_index: 255 },
            binary(BinaryOp::Add, 2, 2, 3),
            ret(2),
        ],
    );
    func.read_property_cache = read_cache;
    func.write_property_cache = write_cache;
    func
}

#[test]
fn test_property_cache_pointers() {
    let func = property_function(READ_CACHE_BASE, WRITE_CACHE_BASE);
    let (result, machine) = run(&func, &[]);
    assert_eq!(result, num(8.0));
    assert_eq!(
        machine.runtime.cache_log(),
        &[
            (Helper::PutByIdStrict, WRITE_CACHE_BASE + 32),
            (Helper::GetById, READ_CACHE_BASE + 80),
            (Helper::GetById, 0),
        ]
    );
    let global = machine.runtime.global_object().unwrap();
    assert_eq!(machine.runtime.get_property(global, 3), Some(num(4.0)));
}

#[test]
fn test_property_caching_disabled() {
    let func = property_function(READ_CACHE_BASE, WRITE_CACHE_BASE);
    let off = config(|c| c.property_caching = false);
    let (result, machine) = run_with(&func, &off, &[]);
    assert_eq!(result, num(8.0));
    assert!(machine.runtime.cache_log().iter().all(|&(_, ptr)| ptr == 0));
}

#[test]
fn test_keyed_property_access() {
    let func = Function::new(
        "keyed",
        8,
        vec![
            Op::GetGlobalObject { dst: r(0) },
            Op::DeclareGlobalVar { symbol: 9 },
            Op::TryGetById { dst: r(1), source: r(0), symbol: 9, cache_index: 255 },
            load_double(2, 3.0),
            load_double(3, 8.0),
            Op::PutByVal { target: r(0), key: r(2), value: r(3), mode: PutMode::Loose },
            Op::GetByIndex { dst: r(4), source: r(0), index: 3 },
            Op::IsIn { dst: r(5), left: r(2), right: r(0) },
            Op::GetByVal { dst: r(6), source: r(0), key: r(2) },
            Op::TryPutById { target: r(0), symbol: 9, value: r(6), cache_index: 255, mode: PutMode::Loose },
            binary(BinaryOp::Add, 7, 4, 6),
            label(0),
            ret(7),
        ],
    );
    let (result, machine) = run(&func, &[]);
    assert_eq!(result, num(16.0));
    let frame = machine.runtime.last_frame();
    assert_eq!(frame[1], Value::UNDEFINED);
    assert_eq!(frame[5], Value::TRUE);
    let global = machine.runtime.global_object().unwrap();
    assert_eq!(machine.runtime.get_property(global, 9), Some(num(8.0)));
}

#[test]
fn test_try_get_undeclared_global_fails() {
    let func = Function::new(
        "undeclared",
        2,
        vec![
            Op::GetGlobalObject { dst: r(0) },
            Op::TryGetById { dst: r(1), source: r(0), symbol: 1, cache_index: 0 },
            ret(1),
        ],
    );
    let code = compile_with(&func, &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    assert!(machine.run(&code, &[]).is_err());
}

#[test]
fn test_falling_off_the_end_returns_undefined() {
    let func = Function::new("empty", 1, vec![load_double(0, 1.0)]);
    let (result, _) = run(&func, &[]);
    assert_eq!(result, Value::UNDEFINED);
}

#[test]
fn test_mov_between_classes() {
    let func = Function::new(
        "mov",
        4,
        vec![
            param(0, 1),
            Op::Mov { dst: r(1), src: r(0) },
            load_double(2, 0.5),
            Op::Mov { dst: r(3), src: r(2) },
            label(0),
            binary(BinaryOp::Add, 3, 3, 1),
            ret(3),
        ],
    );
    let (result, machine) = run(&func, &[num(2.0)]);
    assert_eq!(result, num(2.5));
    assert_eq!(machine.runtime.last_frame()[1], num(2.0));
}

#[test]
fn test_param_zero_is_this() {
    let func = Function::new("this", 2, vec![param(0, 0), param(1, 1), ret(0)]);
    let code = compile_with(&func, &JitConfig::default());
    let mut machine = Machine::new().unwrap();
    let result = machine.call(&code, Value::NULL, num(11.0), &[]).unwrap();
    assert_eq!(result, num(11.0));
}
