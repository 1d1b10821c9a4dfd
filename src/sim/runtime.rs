//! A toy runtime implementing every helper over simulated memory.
//!
//! Just enough of a dynamic language runtime to execute generated code:
//! interpreter frames on a register stack, environments and closures on a
//! bump heap, a side table of object properties, a string table and the
//! generic arithmetic and comparison rules. Every helper invocation is
//! counted; calls and cache pointers are logged for inspection.

use std::collections::HashMap;

use tracing::trace;

use crate::jit::decode::FpOp;
use crate::vm::{
    FrameReg, Helper, SLOT_SIZE, Tag, Value, frame_layout, layout, param_offset,
};

use super::cpu::{Cpu, DEFAULT_NAN, fp_arith, fp_neg};
use super::memory::Memory;
use super::{HelperHost, STACK_SIZE, STACK_TOP, SimError};

pub const RUNTIME_BASE: u64 = 0x0020_0000;
const RUNTIME_SIZE: usize = 0x100;
pub const REGISTER_STACK_BASE: u64 = 0x0030_0000;
const REGISTER_STACK_SIZE: usize = 0x1_0000;
pub const HEAP_BASE: u64 = 0x0040_0000;
const HEAP_SIZE: usize = 0x10_0000;
pub const READ_CACHE_BASE: u64 = 0x0060_0000;
pub const WRITE_CACHE_BASE: u64 = 0x0061_0000;
const CACHE_SIZE: usize = 0x1000;
/// Native stack the generated code must leave untouched.
const STACK_RESERVE: u64 = 0x400;

/// Behaviour of a callable created through the runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Native {
    /// Returns `undefined`.
    Undefined,
    Constant(Value),
    /// Sum of the arguments converted to numbers.
    Sum,
    This,
    ArgCount,
    NewTarget,
}

/// One call made by generated code through `call` or `call_builtin`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub builtin: Option<u32>,
    pub callee: Value,
    pub new_target: Value,
    pub this: Value,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PropKey {
    Symbol(u32),
    Index(u64),
    Name(String),
}

#[derive(Debug, Clone, Copy)]
struct FrameRecord {
    base: u64,
    nregs: u32,
    locals: u64,
}

#[derive(Debug, Default)]
pub struct ToyRuntime {
    heap_top: u64,
    global: Option<Value>,
    strings: Vec<String>,
    bytecode_strings: Vec<String>,
    props: HashMap<(u64, PropKey), Value>,
    closures: HashMap<u64, Native>,
    functions: HashMap<u32, Native>,
    builtins: HashMap<u32, Native>,
    pending_frame: Option<u64>,
    frames: Vec<FrameRecord>,
    last_frame: Vec<Value>,
    calls: Vec<CallRecord>,
    cache_log: Vec<(Helper, u64)>,
    counts: HashMap<Helper, u32>,
}

fn runtime_error(msg: impl Into<String>) -> SimError {
    SimError::Runtime(msg.into())
}

fn read_value(mem: &Memory, addr: u64) -> Result<Value, SimError> {
    mem.read_u64(addr).map(Value::from_raw)
}

fn slot_addr(base: u64, slot: i32) -> u64 {
    base.wrapping_add_signed(slot as i64 * SLOT_SIZE as i64)
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl ToyRuntime {
    pub fn new() -> Self {
        Self {
            heap_top: HEAP_BASE,
            ..Self::default()
        }
    }

    /// Map the runtime's memory and create the global object.
    pub fn install(&mut self, mem: &mut Memory) -> Result<(), SimError> {
        mem.map(RUNTIME_BASE, RUNTIME_SIZE);
        mem.map(REGISTER_STACK_BASE, REGISTER_STACK_SIZE);
        mem.map(HEAP_BASE, HEAP_SIZE);
        mem.map(READ_CACHE_BASE, CACHE_SIZE);
        mem.map(WRITE_CACHE_BASE, CACHE_SIZE);
        self.heap_top = HEAP_BASE;
        let global = self.new_object()?;
        mem.write_u64(RUNTIME_BASE + layout::RUNTIME_GLOBAL_OBJECT as u64, global.raw())?;
        self.global = Some(global);
        Ok(())
    }

    pub fn global_object(&self) -> Option<Value> {
        self.global
    }

    /// Set the string table `get_bytecode_string` reads from.
    pub fn set_bytecode_strings(&mut self, strings: Vec<String>) {
        self.bytecode_strings = strings;
    }

    /// Behaviour of closures created for function `id`.
    pub fn define_function(&mut self, id: u32, native: Native) {
        self.functions.insert(id, native);
    }

    pub fn define_builtin(&mut self, id: u32, native: Native) {
        self.builtins.insert(id, native);
    }

    // ==================== Heap ====================

    fn alloc(&mut self, size: u64) -> Result<u64, SimError> {
        let addr = self.heap_top;
        let end = addr + ((size + 15) & !15);
        if end > HEAP_BASE + HEAP_SIZE as u64 {
            return Err(runtime_error("heap exhausted"));
        }
        self.heap_top = end;
        Ok(addr)
    }

    pub fn new_object(&mut self) -> Result<Value, SimError> {
        self.alloc(16).map(Value::object)
    }

    /// An environment with `size` slots set to `undefined`.
    pub fn new_environment(&mut self, mem: &mut Memory, parent: Option<Value>, size: u32) -> Result<Value, SimError> {
        let addr = self.alloc(layout::environment_slot_offset(size))?;
        let parent = parent.map_or(0, Value::payload);
        mem.write_u64(addr + layout::ENVIRONMENT_PARENT as u64, parent)?;
        for slot in 0..size {
            mem.write_u64(addr + layout::environment_slot_offset(slot), Value::UNDEFINED.raw())?;
        }
        Ok(Value::object(addr))
    }

    pub fn new_closure(&mut self, mem: &mut Memory, env: Option<Value>, native: Native) -> Result<Value, SimError> {
        let addr = self.alloc(16)?;
        mem.write_u64(addr + layout::CALLABLE_ENVIRONMENT as u64, env.map_or(0, Value::payload))?;
        self.closures.insert(addr, native);
        Ok(Value::object(addr))
    }

    pub fn environment_slot(&self, mem: &Memory, env: Value, slot: u32) -> Result<Value, SimError> {
        read_value(mem, env.payload() + layout::environment_slot_offset(slot))
    }

    pub fn set_environment_slot(&self, mem: &mut Memory, env: Value, slot: u32, value: Value) -> Result<(), SimError> {
        mem.write_u64(env.payload() + layout::environment_slot_offset(slot), value.raw())
    }

    pub fn new_string(&mut self, s: impl Into<String>) -> Value {
        self.strings.push(s.into());
        Value::string(self.strings.len() as u64 - 1)
    }

    pub fn string(&self, v: Value) -> Option<&str> {
        if !v.is_string() {
            return None;
        }
        self.strings.get(v.payload() as usize).map(String::as_str)
    }

    // ==================== Properties ====================

    pub fn get_property(&self, object: Value, symbol: u32) -> Option<Value> {
        self.props.get(&(object.payload(), PropKey::Symbol(symbol))).copied()
    }

    pub fn set_property(&mut self, object: Value, symbol: u32, value: Value) {
        self.props.insert((object.payload(), PropKey::Symbol(symbol)), value);
    }

    pub fn set_element(&mut self, object: Value, index: u64, value: Value) {
        self.props.insert((object.payload(), PropKey::Index(index)), value);
    }

    fn key_of(&self, v: Value) -> PropKey {
        if let Some(n) = v.as_number() {
            if n >= 0.0 && n.fract() == 0.0 && n < u64::MAX as f64 {
                return PropKey::Index(n as u64);
            }
        }
        PropKey::Name(self.display(v))
    }

    fn expect_object(&self, v: Value, what: &str) -> Result<u64, SimError> {
        if v.is_object() {
            Ok(v.payload())
        } else {
            Err(runtime_error(format!("{what} on non-object {v}")))
        }
    }

    // ==================== Frames ====================

    /// Build the caller side of the outermost frame: header, `this` and
    /// `args`. The next `enter` returns it.
    pub fn prepare_entry(&mut self, mem: &mut Memory, callee: Value, this: Value, args: &[Value]) -> Result<(), SimError> {
        let base = REGISTER_STACK_BASE
            + (frame_layout::HEADER_SLOTS as u64 + args.len() as u64 + 1) * SLOT_SIZE as u64;
        mem.write_u64(slot_addr(base, frame_layout::PREVIOUS_FRAME), 0)?;
        mem.write_u64(slot_addr(base, frame_layout::SAVED_IP), 0)?;
        mem.write_u64(slot_addr(base, frame_layout::SAVED_CODE_BLOCK), 0)?;
        mem.write_u64(slot_addr(base, frame_layout::ARG_COUNT), args.len() as u64)?;
        mem.write_u64(slot_addr(base, frame_layout::NEW_TARGET), Value::UNDEFINED.raw())?;
        mem.write_u64(slot_addr(base, frame_layout::CALLEE_CLOSURE), callee.raw())?;
        mem.write_u64(base.wrapping_add_signed(param_offset(0)), this.raw())?;
        for (i, arg) in args.iter().enumerate() {
            mem.write_u64(base.wrapping_add_signed(param_offset(i as u32 + 1)), arg.raw())?;
        }
        self.pending_frame = Some(base);
        Ok(())
    }

    /// Frame registers of the last function that returned, as they were
    /// when it left.
    pub fn last_frame(&self) -> &[Value] {
        &self.last_frame
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    /// Cache entry pointers passed to property helpers, in call order.
    pub fn cache_log(&self) -> &[(Helper, u64)] {
        &self.cache_log
    }

    /// How many times `helper` ran.
    pub fn count(&self, helper: Helper) -> u32 {
        self.counts.get(&helper).copied().unwrap_or(0)
    }

    fn enter(&mut self, mem: &mut Memory, locals: u64, nregs: u32) -> Result<u64, SimError> {
        let base = self
            .pending_frame
            .take()
            .ok_or_else(|| runtime_error("enter without a prepared frame"))?;
        for i in 0..nregs {
            mem.write_u64(base + FrameReg(i).byte_offset(), Value::UNDEFINED.raw())?;
        }
        self.frames.push(FrameRecord { base, nregs, locals });
        Ok(base)
    }

    fn leave(&mut self, mem: &Memory, locals: u64, frame: u64) -> Result<(), SimError> {
        let record = self.frames.pop().ok_or_else(|| runtime_error("leave without enter"))?;
        if record.base != frame || record.locals != locals {
            return Err(runtime_error(format!(
                "leave({locals:#x}, {frame:#x}) does not match enter({:#x}, {:#x})",
                record.locals, record.base
            )));
        }
        self.last_frame = (0..record.nregs)
            .map(|i| read_value(mem, frame + FrameReg(i).byte_offset()))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn current_frame(&self, frame: u64) -> Result<FrameRecord, SimError> {
        match self.frames.last() {
            Some(record) if record.base == frame => Ok(*record),
            _ => Err(runtime_error(format!("call from unknown frame {frame:#x}"))),
        }
    }

    fn outgoing_call(
        &mut self,
        mem: &Memory,
        frame: u64,
        argc: u32,
        builtin: Option<u32>,
    ) -> Result<Value, SimError> {
        let record = self.current_frame(frame)?;
        let callee_base = frame + FrameReg(record.nregs).byte_offset();
        let this = read_value(mem, callee_base.wrapping_add_signed(param_offset(0)))?;
        let args = (1..=argc)
            .map(|i| read_value(mem, callee_base.wrapping_add_signed(param_offset(i))))
            .collect::<Result<Vec<_>, _>>()?;
        let (callee, new_target, native) = match builtin {
            Some(id) => {
                let native = *self
                    .builtins
                    .get(&id)
                    .ok_or_else(|| runtime_error(format!("unknown builtin {id}")))?;
                (Value::UNDEFINED, Value::UNDEFINED, native)
            }
            None => {
                let callee = read_value(mem, slot_addr(callee_base, frame_layout::CALLEE_CLOSURE))?;
                let new_target = read_value(mem, slot_addr(callee_base, frame_layout::NEW_TARGET))?;
                let native = callee
                    .is_object()
                    .then(|| self.closures.get(&callee.payload()).copied())
                    .flatten()
                    .ok_or_else(|| runtime_error(format!("{callee} is not callable")))?;
                (callee, new_target, native)
            }
        };
        let result = match native {
            Native::Undefined => Value::UNDEFINED,
            Native::Constant(v) => v,
            Native::Sum => Value::from_raw(
                args.iter()
                    .fold(0, |acc, &v| fp_arith(FpOp::Add, acc, self.to_number(v))),
            ),
            Native::This => this,
            Native::ArgCount => Value::number(argc as f64),
            Native::NewTarget => new_target,
        };
        trace!(?builtin, %callee, argc, %result, "call");
        self.calls.push(CallRecord {
            builtin,
            callee,
            new_target,
            this,
            args,
        });
        Ok(result)
    }

    // ==================== Conversions ====================

    /// Number conversion, as raw double bits.
    pub fn to_number(&self, v: Value) -> u64 {
        match v.tag() {
            None => v.raw(),
            Some(Tag::Bool) => (if v.raw() as u32 != 0 { 1.0f64 } else { 0.0 }).to_bits(),
            Some(Tag::Null) => 0,
            Some(Tag::Str) => {
                let s = self.string(v).unwrap_or("").trim();
                if s.is_empty() {
                    0
                } else {
                    s.parse::<f64>().map_or(DEFAULT_NAN, |n| Value::number(n).raw())
                }
            }
            _ => DEFAULT_NAN,
        }
    }

    pub fn to_boolean(&self, v: Value) -> bool {
        match v.tag() {
            None => {
                let n = f64::from_bits(v.raw());
                n != 0.0 && !n.is_nan()
            }
            Some(Tag::Bool) => v.raw() as u32 != 0,
            Some(Tag::Undefined | Tag::Null | Tag::Empty) => false,
            Some(Tag::Str) => !self.string(v).unwrap_or("").is_empty(),
            Some(Tag::Symbol | Tag::Object) => true,
        }
    }

    fn display(&self, v: Value) -> String {
        match v.tag() {
            None => format_number(f64::from_bits(v.raw())),
            Some(Tag::Str) => self.string(v).unwrap_or("").to_string(),
            Some(Tag::Object) => "[object Object]".to_string(),
            _ => v.to_string(),
        }
    }

    // ==================== Generic operators ====================

    fn arith(&mut self, op: FpOp, l: Value, r: Value) -> Value {
        if op == FpOp::Add && (l.is_string() || r.is_string()) {
            let s = self.display(l) + &self.display(r);
            return self.new_string(s);
        }
        Value::from_raw(fp_arith(op, self.to_number(l), self.to_number(r)))
    }

    fn strict_equal(&self, l: Value, r: Value) -> bool {
        match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => a == b,
            (None, None) if l.is_string() && r.is_string() => self.string(l) == self.string(r),
            _ => l == r,
        }
    }

    fn loose_equal(&self, l: Value, r: Value) -> bool {
        let nullish = |v: Value| v.is_undefined() || v.is_null();
        if nullish(l) || nullish(r) {
            return nullish(l) && nullish(r);
        }
        if l.is_object() || r.is_object() || l.tag() == r.tag() {
            return self.strict_equal(l, r);
        }
        f64::from_bits(self.to_number(l)) == f64::from_bits(self.to_number(r))
    }

    fn less(&self, l: Value, r: Value) -> Option<bool> {
        if let (Some(a), Some(b)) = (self.string(l), self.string(r)) {
            return Some(a < b);
        }
        let (a, b) = (f64::from_bits(self.to_number(l)), f64::from_bits(self.to_number(r)));
        a.partial_cmp(&b).map(|o| o.is_lt())
    }

    fn compare(&self, helper: Helper, l: Value, r: Value) -> bool {
        match helper {
            Helper::Less => self.less(l, r) == Some(true),
            Helper::Greater => self.less(r, l) == Some(true),
            Helper::LessEqual => self.less(r, l) == Some(false),
            Helper::GreaterEqual => self.less(l, r) == Some(false),
            Helper::Equal => self.loose_equal(l, r),
            Helper::NotEqual => !self.loose_equal(l, r),
            Helper::StrictEqual => self.strict_equal(l, r),
            _ => !self.strict_equal(l, r),
        }
    }
}

impl HelperHost for ToyRuntime {
    fn call(&mut self, helper: Helper, cpu: &mut Cpu, mem: &mut Memory) -> Result<(), SimError> {
        *self.counts.entry(helper).or_default() += 1;
        let x = cpu.x;
        let u32_arg = |i: usize| x[i] as u32;
        let value_at = |i: usize| read_value(mem, x[i]);
        let mut result = None;

        match helper {
            Helper::CheckNativeStackOverflow => {
                if cpu.sp < STACK_TOP - STACK_SIZE as u64 + STACK_RESERVE {
                    return Err(runtime_error("native stack overflow"));
                }
            }
            Helper::Enter => result = Some(Value::from_raw(self.enter(mem, x[1], u32_arg(2))?)),
            Helper::Leave => self.leave(mem, x[1], x[2])?,
            Helper::GetBytecodeString => {
                let id = u32_arg(2);
                let s = self
                    .bytecode_strings
                    .get(id as usize)
                    .cloned()
                    .ok_or_else(|| runtime_error(format!("no bytecode string {id}")))?;
                result = Some(self.new_string(s));
            }
            Helper::ToDouble => {
                let v = value_at(1)?;
                cpu.d[0] = self.to_number(v);
            }
            Helper::ToBoolean => cpu.x[0] = self.to_boolean(Value::from_raw(x[1])) as u64,
            Helper::DeclareGlobalVar => {
                let global = self.global.ok_or_else(|| runtime_error("runtime not installed"))?;
                self.props
                    .entry((global.payload(), PropKey::Symbol(u32_arg(1))))
                    .or_insert(Value::UNDEFINED);
            }
            Helper::CreateEnvironment => {
                let parent = if x[1] == 0 { None } else { Some(value_at(1)?) };
                result = Some(self.new_environment(mem, parent, u32_arg(2))?);
            }
            Helper::StoreToEnv | Helper::StoreNpToEnv => {
                let env = Value::from_raw(x[1]);
                let addr = self.expect_object(env, "store_to_env")? + layout::environment_slot_offset(u32_arg(3));
                mem.write_u64(addr, x[2])?;
            }
            Helper::CreateClosure => {
                let env = value_at(1)?;
                let native = self.functions.get(&u32_arg(3)).copied().unwrap_or(Native::Undefined);
                result = Some(self.new_closure(mem, Some(env), native)?);
            }
            Helper::GetById | Helper::TryGetById => {
                self.cache_log.push((helper, x[3]));
                let object = self.expect_object(value_at(1)?, helper.name())?;
                let symbol = u32_arg(2);
                let found = self.props.get(&(object, PropKey::Symbol(symbol))).copied();
                result = Some(match found {
                    Some(v) => v,
                    None if helper == Helper::TryGetById => {
                        return Err(runtime_error(format!("symbol {symbol} is not defined")));
                    }
                    None => Value::UNDEFINED,
                });
            }
            Helper::PutByIdStrict | Helper::PutByIdLoose | Helper::TryPutByIdStrict | Helper::TryPutByIdLoose => {
                self.cache_log.push((helper, x[4]));
                let target = value_at(1)?;
                let value = value_at(3)?;
                let strict = matches!(helper, Helper::PutByIdStrict | Helper::TryPutByIdStrict);
                if !target.is_object() {
                    if strict {
                        return Err(runtime_error(format!("cannot set property on {target}")));
                    }
                } else {
                    let key = (target.payload(), PropKey::Symbol(u32_arg(2)));
                    if helper == Helper::TryPutByIdStrict && !self.props.contains_key(&key) {
                        return Err(runtime_error(format!("symbol {} is not defined", u32_arg(2))));
                    }
                    self.props.insert(key, value);
                }
            }
            Helper::GetByVal => {
                let object = self.expect_object(value_at(1)?, "get_by_val")?;
                let key = self.key_of(value_at(2)?);
                result = Some(self.props.get(&(object, key)).copied().unwrap_or(Value::UNDEFINED));
            }
            Helper::PutByValStrict | Helper::PutByValLoose => {
                let target = value_at(1)?;
                if target.is_object() {
                    let key = self.key_of(value_at(2)?);
                    self.props.insert((target.payload(), key), value_at(3)?);
                } else if helper == Helper::PutByValStrict {
                    return Err(runtime_error(format!("cannot set property on {target}")));
                }
            }
            Helper::GetByIndex => {
                let object = self.expect_object(value_at(1)?, "get_by_index")?;
                let key = PropKey::Index(u32_arg(2) as u64);
                result = Some(self.props.get(&(object, key)).copied().unwrap_or(Value::UNDEFINED));
            }
            Helper::IsIn => {
                let key = self.key_of(value_at(1)?);
                let object = self.expect_object(value_at(2)?, "in")?;
                result = Some(Value::bool(self.props.contains_key(&(object, key))));
            }
            Helper::Call => result = Some(self.outgoing_call(mem, x[1], u32_arg(2), None)?),
            Helper::CallBuiltin => {
                result = Some(self.outgoing_call(mem, x[1], u32_arg(2), Some(u32_arg(3)))?)
            }
            Helper::GetBuiltinClosure => {
                let id = u32_arg(1);
                let native = *self
                    .builtins
                    .get(&id)
                    .ok_or_else(|| runtime_error(format!("unknown builtin {id}")))?;
                result = Some(self.new_closure(mem, None, native)?);
            }
            Helper::Add | Helper::Sub | Helper::Mul | Helper::Div => {
                let op = match helper {
                    Helper::Add => FpOp::Add,
                    Helper::Sub => FpOp::Sub,
                    Helper::Mul => FpOp::Mul,
                    _ => FpOp::Div,
                };
                let (l, r) = (value_at(1)?, value_at(2)?);
                result = Some(self.arith(op, l, r));
            }
            Helper::Negate => result = Some(Value::from_raw(fp_neg(self.to_number(value_at(1)?)))),
            Helper::Inc | Helper::Dec => {
                let op = if helper == Helper::Inc { FpOp::Add } else { FpOp::Sub };
                let n = self.to_number(value_at(1)?);
                result = Some(Value::from_raw(fp_arith(op, n, 1.0f64.to_bits())));
            }
            Helper::Less
            | Helper::LessEqual
            | Helper::Greater
            | Helper::GreaterEqual
            | Helper::Equal
            | Helper::NotEqual
            | Helper::StrictEqual
            | Helper::StrictNotEqual => {
                let (l, r) = (value_at(1)?, value_at(2)?);
                cpu.x[0] = self.compare(helper, l, r) as u64;
            }
        }

        if let Some(v) = result {
            cpu.x[0] = v.raw();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_add_concatenates_strings() {
        let mut rt = ToyRuntime::new();
        let s = rt.new_string("n=");
        let v = rt.arith(FpOp::Add, s, Value::number(3.0));
        assert_eq!(rt.string(v), Some("n=3"));
        let v = rt.arith(FpOp::Add, Value::TRUE, Value::number(1.5));
        assert_eq!(v.as_number(), Some(2.5));
    }

    #[test]
    fn test_undefined_converts_to_nan() {
        let rt = ToyRuntime::new();
        assert_eq!(rt.to_number(Value::UNDEFINED), DEFAULT_NAN);
        assert_eq!(rt.to_number(Value::NULL), 0);
    }

    #[test]
    fn test_comparisons() {
        let mut rt = ToyRuntime::new();
        let one = Value::number(1.0);
        let s = rt.new_string("1");
        assert!(rt.compare(Helper::Equal, one, s));
        assert!(!rt.compare(Helper::StrictEqual, one, s));
        assert!(rt.compare(Helper::Equal, Value::NULL, Value::UNDEFINED));
        let nan = Value::from_raw(DEFAULT_NAN);
        assert!(!rt.compare(Helper::LessEqual, nan, one));
        assert!(!rt.compare(Helper::GreaterEqual, nan, one));
        assert!(rt.compare(Helper::LessEqual, one, one));
    }

    #[test]
    fn test_truthiness() {
        let mut rt = ToyRuntime::new();
        let empty = rt.new_string("");
        assert!(!rt.to_boolean(empty));
        assert!(!rt.to_boolean(Value::from_raw(DEFAULT_NAN)));
        assert!(!rt.to_boolean(Value::number(-0.0)));
        assert!(rt.to_boolean(Value::object(0x10)));
    }

    #[test]
    fn test_environment_layout() {
        let mut mem = Memory::new();
        let mut rt = ToyRuntime::new();
        rt.install(&mut mem).unwrap();
        let outer = rt.new_environment(&mut mem, None, 1).unwrap();
        let inner = rt.new_environment(&mut mem, Some(outer), 2).unwrap();
        let parent = mem.read_u64(inner.payload() + layout::ENVIRONMENT_PARENT as u64).unwrap();
        assert_eq!(parent, outer.payload());
        assert_eq!(rt.environment_slot(&mem, inner, 1).unwrap(), Value::UNDEFINED);
        let global = mem.read_u64(RUNTIME_BASE + layout::RUNTIME_GLOBAL_OBJECT as u64).unwrap();
        assert_eq!(Some(Value::from_raw(global)), rt.global_object());
    }
}
