#![allow(dead_code)]

use framejit::config::JitConfig;
use framejit::sim::{self, Machine};
use framejit::vm::{BinaryOp, CmpOp, FrameReg, Function, LabelId, Op, UnaryOp, Value};
use framejit::{CompiledCode, compile};

pub fn r(n: u32) -> FrameReg {
    FrameReg(n)
}

pub fn num(n: f64) -> Value {
    Value::number(n)
}

pub fn compile_with(func: &Function, config: &JitConfig) -> CompiledCode {
    compile(func, &sim::helper_table(), config)
}

/// Compile `func` and run it with `args`, returning the result and the
/// machine for inspection.
pub fn run_with(func: &Function, config: &JitConfig, args: &[Value]) -> (Value, Machine) {
    let code = compile_with(func, config);
    let mut machine = Machine::new().unwrap();
    let result = machine
        .run(&code, args)
        .unwrap_or_else(|e| panic!("{} failed: {e}", func.name));
    (result, machine)
}

pub fn run(func: &Function, args: &[Value]) -> (Value, Machine) {
    run_with(func, &JitConfig::default(), args)
}

pub fn load_double(dst: u32, value: f64) -> Op {
    Op::LoadConstDouble { dst: r(dst), value }
}

pub fn param(dst: u32, index: u32) -> Op {
    Op::LoadParam { dst: r(dst), index }
}

pub fn binary(kind: BinaryOp, dst: u32, left: u32, right: u32) -> Op {
    Op::Binary {
        kind,
        dst: r(dst),
        left: r(left),
        right: r(right),
        assume_number: false,
    }
}

pub fn unary(kind: UnaryOp, dst: u32, src: u32) -> Op {
    Op::Unary {
        kind,
        dst: r(dst),
        src: r(src),
        assume_number: false,
    }
}

pub fn jump_compare(kind: CmpOp, target: u32, left: u32, right: u32) -> Op {
    Op::JumpCompare {
        kind,
        target: LabelId(target),
        left: r(left),
        right: r(right),
        invert: false,
        assume_number: false,
    }
}

pub fn label(id: u32) -> Op {
    Op::Label { id: LabelId(id) }
}

pub fn jump(target: u32) -> Op {
    Op::Jump { target: LabelId(target) }
}

pub fn ret(value: u32) -> Op {
    Op::Ret { value: r(value) }
}
