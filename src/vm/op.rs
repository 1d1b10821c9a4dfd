//! Virtual operations consumed by the code generator.
//!
//! Each operation names its frame-register operands by index plus whatever
//! immediates it needs. Basic blocks are delimited by [`Op::Label`].

use serde::{Deserialize, Serialize};

use super::frame::{FrType, FrameReg};

/// A branch target. Bound by [`Op::Label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Negate,
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutMode {
    Strict,
    Loose,
}

/// One virtual operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Start a new basic block.
    Label { id: LabelId },

    LoadParam { dst: FrameReg, index: u32 },
    LoadConstDouble { dst: FrameReg, value: f64 },
    LoadConstBits { dst: FrameReg, bits: u64, #[serde(default)] ty: FrType },
    LoadConstUndefined { dst: FrameReg },
    LoadConstNull { dst: FrameReg },
    LoadConstBool { dst: FrameReg, value: bool },
    LoadConstString { dst: FrameReg, string_id: u32 },
    Mov { dst: FrameReg, src: FrameReg },
    ToNumber { dst: FrameReg, src: FrameReg },

    /// `assume_number` trusts the caller that the operand is already known to
    /// be a number, and skips the tag check.
    Unary {
        kind: UnaryOp,
        dst: FrameReg,
        src: FrameReg,
        #[serde(default)]
        assume_number: bool,
    },
    Binary {
        kind: BinaryOp,
        dst: FrameReg,
        left: FrameReg,
        right: FrameReg,
        #[serde(default)]
        assume_number: bool,
    },
    /// Jump to `target` when `left <kind> right` holds (or does not hold,
    /// when `invert` is set).
    JumpCompare {
        kind: CmpOp,
        target: LabelId,
        left: FrameReg,
        right: FrameReg,
        #[serde(default)]
        invert: bool,
        #[serde(default)]
        assume_number: bool,
    },
    Jump { target: LabelId },
    JumpTrue { target: LabelId, cond: FrameReg },
    JumpFalse { target: LabelId, cond: FrameReg },

    GetGlobalObject { dst: FrameReg },
    DeclareGlobalVar { symbol: u32 },
    CreateTopLevelEnvironment { dst: FrameReg, size: u32 },
    GetParentEnvironment { dst: FrameReg, level: u32 },
    LoadFromEnvironment { dst: FrameReg, env: FrameReg, slot: u32 },
    /// `non_pointer` selects the store that skips the write barrier.
    StoreToEnvironment {
        env: FrameReg,
        slot: u32,
        value: FrameReg,
        #[serde(default)]
        non_pointer: bool,
    },
    CreateClosure { dst: FrameReg, env: FrameReg, function_id: u32 },

    GetById { dst: FrameReg, source: FrameReg, symbol: u32, cache_index: u8 },
    TryGetById { dst: FrameReg, source: FrameReg, symbol: u32, cache_index: u8 },
    PutById {
        target: FrameReg,
        symbol: u32,
        value: FrameReg,
        cache_index: u8,
        mode: PutMode,
    },
    TryPutById {
        target: FrameReg,
        symbol: u32,
        value: FrameReg,
        cache_index: u8,
        mode: PutMode,
    },
    GetByVal { dst: FrameReg, source: FrameReg, key: FrameReg },
    PutByVal { target: FrameReg, key: FrameReg, value: FrameReg, mode: PutMode },
    GetByIndex { dst: FrameReg, source: FrameReg, index: u8 },
    IsIn { dst: FrameReg, left: FrameReg, right: FrameReg },

    /// Call with arguments already in the outgoing slots. `argc` counts
    /// `this`.
    Call { dst: FrameReg, callee: FrameReg, argc: u32 },
    /// Call with explicit argument registers, `this` first.
    CallN { dst: FrameReg, callee: FrameReg, args: Vec<FrameReg> },
    CallWithNewTarget { dst: FrameReg, callee: FrameReg, new_target: FrameReg, argc: u32 },
    CallBuiltin { dst: FrameReg, builtin: u32, argc: u32 },
    GetBuiltinClosure { dst: FrameReg, builtin: u32 },

    Ret { value: FrameReg },
}

impl Op {
    /// Short name used in listings and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Label { .. } => "Label",
            Op::LoadParam { .. } => "LoadParam",
            Op::LoadConstDouble { .. } => "LoadConstDouble",
            Op::LoadConstBits { .. } => "LoadConstBits",
            Op::LoadConstUndefined { .. } => "LoadConstUndefined",
            Op::LoadConstNull { .. } => "LoadConstNull",
            Op::LoadConstBool { .. } => "LoadConstBool",
            Op::LoadConstString { .. } => "LoadConstString",
            Op::Mov { .. } => "Mov",
            Op::ToNumber { .. } => "ToNumber",
            Op::Unary { .. } => "Unary",
            Op::Binary { .. } => "Binary",
            Op::JumpCompare { .. } => "JumpCompare",
            Op::Jump { .. } => "Jump",
            Op::JumpTrue { .. } => "JumpTrue",
            Op::JumpFalse { .. } => "JumpFalse",
            Op::GetGlobalObject { .. } => "GetGlobalObject",
            Op::DeclareGlobalVar { .. } => "DeclareGlobalVar",
            Op::CreateTopLevelEnvironment { .. } => "CreateTopLevelEnvironment",
            Op::GetParentEnvironment { .. } => "GetParentEnvironment",
            Op::LoadFromEnvironment { .. } => "LoadFromEnvironment",
            Op::StoreToEnvironment { .. } => "StoreToEnvironment",
            Op::CreateClosure { .. } => "CreateClosure",
            Op::GetById { .. } => "GetById",
            Op::TryGetById { .. } => "TryGetById",
            Op::PutById { .. } => "PutById",
            Op::TryPutById { .. } => "TryPutById",
            Op::GetByVal { .. } => "GetByVal",
            Op::PutByVal { .. } => "PutByVal",
            Op::GetByIndex { .. } => "GetByIndex",
            Op::IsIn { .. } => "IsIn",
            Op::Call { .. } => "Call",
            Op::CallN { .. } => "CallN",
            Op::CallWithNewTarget { .. } => "CallWithNewTarget",
            Op::CallBuiltin { .. } => "CallBuiltin",
            Op::GetBuiltinClosure { .. } => "GetBuiltinClosure",
            Op::Ret { .. } => "Ret",
        }
    }
}

/// A function ready for native code generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Total number of frame registers, outgoing call area included.
    pub num_frame_regs: u32,
    /// Registers `[0, num_count)` hold numbers for their whole lifetime.
    #[serde(default)]
    pub num_count: u32,
    /// Registers `[num_count, num_count + np_count)` never hold pointers.
    #[serde(default)]
    pub np_count: u32,
    /// Opaque handle of the module owning the function's strings and code.
    #[serde(default)]
    pub runtime_module: u64,
    /// Base address of the read property cache.
    #[serde(default)]
    pub read_property_cache: u64,
    /// Base address of the write property cache.
    #[serde(default)]
    pub write_property_cache: u64,
    pub ops: Vec<Op>,
}

impl Function {
    pub fn new(name: impl Into<String>, num_frame_regs: u32, ops: Vec<Op>) -> Self {
        Self {
            name: name.into(),
            num_frame_regs,
            num_count: 0,
            np_count: 0,
            runtime_module: 0,
            read_property_cache: 0,
            write_property_cache: 0,
            ops,
        }
    }
}
