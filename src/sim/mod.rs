//! A small AArch64 simulator for generated code.
//!
//! Executes exactly the instruction subset the emitter produces, so compiled
//! functions can be run and inspected on any host. Runtime helpers live at
//! fake addresses; branching to one hands control to a [`HelperHost`].

mod cpu;
mod memory;
mod runtime;

use thiserror::Error;
use tracing::trace;

use crate::jit::CompiledCode;
use crate::jit::decode::{Inst, MemSize, decode};
use crate::vm::{Helper, HelperTable, Value};

pub use cpu::{Cpu, DEFAULT_NAN, fp_arith, fp_neg};
pub use memory::Memory;
pub use runtime::{
    CallRecord, HEAP_BASE, Native, READ_CACHE_BASE, REGISTER_STACK_BASE, RUNTIME_BASE, ToyRuntime,
    WRITE_CACHE_BASE,
};

/// Where compiled code is loaded.
pub const CODE_BASE: u64 = 0x0010_0000;
/// Fake helper addresses, 16 bytes apart. Never mapped.
pub const HELPER_BASE: u64 = 0x000F_0000;
/// Return address of the outermost call. Never mapped.
pub const RETURN_ADDRESS: u64 = 0x0DEA_D000;
pub const STACK_TOP: u64 = 0x0080_0000;
pub const STACK_SIZE: usize = 0x1_0000;

const DEFAULT_STEP_LIMIT: u64 = 1_000_000;
/// Written to caller-saved registers after every helper call.
const CLOBBER: u64 = 0xBAD0_BAD0_BAD0_BAD0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("access to unmapped address {addr:#x}")]
    Unmapped { addr: u64 },
    #[error("undecodable instruction {word:#010x} at {pc:#x}")]
    Undecodable { pc: u64, word: u32 },
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
    #[error("callee-saved register {0} not restored")]
    NotRestored(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// The helper address table matching the simulator's dispatch.
pub fn helper_table() -> HelperTable {
    HelperTable::new(|h| HELPER_BASE + h as u64 * 16)
}

/// Implements the runtime helpers for simulated code.
pub trait HelperHost {
    /// Run `helper` with its arguments in `cpu` and leave its result in `x0`
    /// (or `d0`).
    fn call(&mut self, helper: Helper, cpu: &mut Cpu, mem: &mut Memory) -> Result<(), SimError>;
}

enum Step {
    Continue,
    Exit,
}

pub struct Simulator {
    pub cpu: Cpu,
    pub mem: Memory,
    helpers: HelperTable,
    step_limit: u64,
    steps: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        let mut mem = Memory::new();
        mem.map(STACK_TOP - STACK_SIZE as u64, STACK_SIZE);
        Self {
            cpu: Cpu::new(),
            mem,
            helpers: helper_table(),
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Instructions executed by the last [`run`](Self::run).
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Map `code` at [`CODE_BASE`] and return the entry address.
    pub fn load(&mut self, code: &CompiledCode) -> u64 {
        self.mem.map_bytes(CODE_BASE, &code.code);
        CODE_BASE + code.entry as u64
    }

    /// Call the function at `entry` with `x0 = runtime` and return `x0`.
    /// Fails if the function does not restore sp and the callee-saved
    /// registers.
    pub fn run(&mut self, entry: u64, runtime: u64, host: &mut dyn HelperHost) -> Result<u64, SimError> {
        let saved_x: Vec<u64> = (19..=28).map(|n| 0x5A5A_0000_0000_0000 | n).collect();
        let saved_d: Vec<u64> = (8..=15).map(|n| 0x4000_0000_0000_0000 | n).collect();
        for (i, &v) in saved_x.iter().enumerate() {
            self.cpu.x[19 + i] = v;
        }
        for (i, &v) in saved_d.iter().enumerate() {
            self.cpu.d[8 + i] = v;
        }
        self.cpu.x[0] = runtime;
        self.cpu.x[29] = 0;
        self.cpu.x[30] = RETURN_ADDRESS;
        self.cpu.sp = STACK_TOP;
        self.cpu.pc = entry;
        self.steps = 0;

        loop {
            if self.steps >= self.step_limit {
                return Err(SimError::StepLimit(self.step_limit));
            }
            self.steps += 1;
            match self.step(host)? {
                Step::Continue => {}
                Step::Exit => break,
            }
        }

        if self.cpu.sp != STACK_TOP {
            return Err(SimError::NotRestored("sp".to_string()));
        }
        for (i, &v) in saved_x.iter().enumerate() {
            if self.cpu.x[19 + i] != v {
                return Err(SimError::NotRestored(format!("x{}", 19 + i)));
            }
        }
        for (i, &v) in saved_d.iter().enumerate() {
            if self.cpu.d[8 + i] != v {
                return Err(SimError::NotRestored(format!("d{}", 8 + i)));
            }
        }
        Ok(self.cpu.x[0])
    }

    fn step(&mut self, host: &mut dyn HelperHost) -> Result<Step, SimError> {
        let pc = self.cpu.pc;
        if pc == RETURN_ADDRESS {
            return Ok(Step::Exit);
        }
        if let Some(helper) = self.helpers.lookup(pc) {
            trace!(%helper, "helper call");
            host.call(helper, &mut self.cpu, &mut self.mem)?;
            for n in 1..=17 {
                self.cpu.x[n] = CLOBBER;
            }
            for n in (1..=7).chain(16..=31) {
                self.cpu.d[n] = CLOBBER;
            }
            self.cpu.pc = self.cpu.x[30];
            return Ok(Step::Continue);
        }

        let word = self.mem.read_u32(pc)?;
        let inst = decode(word).ok_or(SimError::Undecodable { pc, word })?;
        self.execute(inst)?;
        Ok(Step::Continue)
    }

    fn read_mem(&self, size: MemSize, addr: u64) -> Result<u64, SimError> {
        match size {
            MemSize::X | MemSize::D => self.mem.read_u64(addr),
            MemSize::W => self.mem.read_u32(addr).map(u64::from),
        }
    }

    fn set_target(&mut self, size: MemSize, rt: u8, value: u64) {
        match size {
            MemSize::X | MemSize::W => self.cpu.set_reg(rt, value),
            MemSize::D => self.cpu.d[rt as usize] = value,
        }
    }

    fn source(&self, size: MemSize, rt: u8) -> u64 {
        match size {
            MemSize::X | MemSize::W => self.cpu.reg(rt),
            MemSize::D => self.cpu.d[rt as usize],
        }
    }

    fn write_mem(&mut self, size: MemSize, addr: u64, value: u64) -> Result<(), SimError> {
        match size {
            MemSize::X | MemSize::D => self.mem.write_u64(addr, value),
            MemSize::W => self.mem.write_u32(addr, value as u32),
        }
    }

    fn execute(&mut self, inst: Inst) -> Result<(), SimError> {
        let cpu = &mut self.cpu;
        let pc = cpu.pc;
        let mut next = pc.wrapping_add(4);
        let branch = |offset: i64| pc.wrapping_add_signed(offset);

        match inst {
            Inst::MovReg { rd, rm } => {
                let v = cpu.reg(rm);
                cpu.set_reg(rd, v);
            }
            Inst::AddImm { rd, rn, imm } => {
                let v = cpu.reg_or_sp(rn).wrapping_add(imm);
                cpu.set_reg_or_sp(rd, v);
            }
            Inst::SubImm { rd, rn, imm } => {
                let v = cpu.reg_or_sp(rn).wrapping_sub(imm);
                cpu.set_reg_or_sp(rd, v);
            }
            Inst::AddReg { rd, rn, rm } => {
                let v = cpu.reg(rn).wrapping_add(cpu.reg(rm));
                cpu.set_reg(rd, v);
            }
            Inst::SubReg { rd, rn, rm } => {
                let v = cpu.reg(rn).wrapping_sub(cpu.reg(rm));
                cpu.set_reg(rd, v);
            }
            Inst::CmpReg { rn, rm, wide } => {
                let (a, b) = (cpu.reg(rn), cpu.reg(rm));
                cpu.flags_sub(a, b, wide);
            }
            Inst::CmpImm { rn, imm, wide } => {
                let a = cpu.reg_or_sp(rn);
                cpu.flags_sub(a, imm, wide);
            }
            Inst::Movz { rd, imm16, shift, .. } => cpu.set_reg(rd, (imm16 as u64) << shift),
            Inst::Movk { rd, imm16, shift, wide } => {
                let mut v = (cpu.reg(rd) & !(0xFFFF << shift)) | (imm16 as u64) << shift;
                if !wide {
                    v &= 0xFFFF_FFFF;
                }
                cpu.set_reg(rd, v);
            }
            Inst::AndImm { rd, rn, imm } => {
                let v = cpu.reg(rn) & imm;
                cpu.set_reg_or_sp(rd, v);
            }
            Inst::Load { size, rt, rn, offset } => {
                let addr = self.cpu.reg_or_sp(rn).wrapping_add_signed(offset);
                let v = self.read_mem(size, addr)?;
                self.set_target(size, rt, v);
            }
            Inst::Store { size, rt, rn, offset } => {
                let addr = self.cpu.reg_or_sp(rn).wrapping_add_signed(offset);
                self.write_mem(size, addr, self.source(size, rt))?;
            }
            Inst::LoadPair { size, rt1, rt2, rn, offset } => {
                let addr = self.cpu.reg_or_sp(rn).wrapping_add_signed(offset);
                let v1 = self.read_mem(size, addr)?;
                let v2 = self.read_mem(size, addr + size.bytes() as u64)?;
                self.set_target(size, rt1, v1);
                self.set_target(size, rt2, v2);
            }
            Inst::StorePair { size, rt1, rt2, rn, offset } => {
                let addr = self.cpu.reg_or_sp(rn).wrapping_add_signed(offset);
                self.write_mem(size, addr, self.source(size, rt1))?;
                self.write_mem(size, addr + size.bytes() as u64, self.source(size, rt2))?;
            }
            Inst::LoadLiteral { size, rt, offset } => {
                let v = self.read_mem(size, branch(offset))?;
                self.set_target(size, rt, v);
            }
            Inst::B { offset } => next = branch(offset),
            Inst::Bl { offset } => {
                cpu.x[30] = next;
                next = branch(offset);
            }
            Inst::BCond { cond, offset } => {
                if cpu.cond_holds(cond) {
                    next = branch(offset);
                }
            }
            Inst::Cbz { rt, offset } => {
                if cpu.reg(rt) as u32 == 0 {
                    next = branch(offset);
                }
            }
            Inst::Cbnz { rt, offset } => {
                if cpu.reg(rt) as u32 != 0 {
                    next = branch(offset);
                }
            }
            Inst::Br { rn } => next = cpu.reg(rn),
            Inst::Blr { rn } => {
                let target = cpu.reg(rn);
                cpu.x[30] = next;
                next = target;
            }
            Inst::Ret => next = cpu.x[30],
            Inst::FmovReg { rd, rn } => cpu.d[rd as usize] = cpu.d[rn as usize],
            Inst::FmovToVec { rd, rn } => cpu.d[rd as usize] = cpu.reg(rn),
            Inst::FmovToGp { rd, rn } => {
                let v = cpu.d[rn as usize];
                cpu.set_reg(rd, v);
            }
            Inst::FmovImm { rd, bits } => cpu.d[rd as usize] = bits,
            Inst::MoviZero { rd } => cpu.d[rd as usize] = 0,
            Inst::FArith { op, rd, rn, rm } => {
                cpu.d[rd as usize] = fp_arith(op, cpu.d[rn as usize], cpu.d[rm as usize]);
            }
            Inst::Fneg { rd, rn } => cpu.d[rd as usize] = fp_neg(cpu.d[rn as usize]),
            Inst::Fcmp { rn, rm } => {
                let (a, b) = (cpu.d[rn as usize], cpu.d[rm as usize]);
                cpu.flags_fcmp(a, b);
            }
            Inst::FcmpZero { rn } => {
                let a = cpu.d[rn as usize];
                cpu.flags_fcmp(a, 0);
            }
            Inst::Nop => {}
        }
        self.cpu.pc = next;
        Ok(())
    }
}

/// A simulator with a [`ToyRuntime`] installed in its memory.
pub struct Machine {
    pub sim: Simulator,
    pub runtime: ToyRuntime,
}

impl Machine {
    pub fn new() -> Result<Self, SimError> {
        let mut sim = Simulator::new();
        let mut runtime = ToyRuntime::new();
        runtime.install(&mut sim.mem)?;
        Ok(Self { sim, runtime })
    }

    /// Run `code` as the outermost function, called as `callee` with `this`
    /// and `args`.
    pub fn call(&mut self, code: &CompiledCode, callee: Value, this: Value, args: &[Value]) -> Result<Value, SimError> {
        let entry = self.sim.load(code);
        self.runtime.prepare_entry(&mut self.sim.mem, callee, this, args)?;
        self.sim
            .run(entry, RUNTIME_BASE, &mut self.runtime)
            .map(Value::from_raw)
    }

    /// [`call`](Self::call) with an undefined callee and `this`.
    pub fn run(&mut self, code: &CompiledCode, args: &[Value]) -> Result<Value, SimError> {
        self.call(code, Value::UNDEFINED, Value::UNDEFINED, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::aarch64::{AArch64Assembler, Cond, GpX, VecD};
    use crate::jit::codebuf::CodeBuffer;

    struct NoHelpers;

    impl HelperHost for NoHelpers {
        fn call(&mut self, helper: Helper, _: &mut Cpu, _: &mut Memory) -> Result<(), SimError> {
            Err(SimError::Runtime(format!("unexpected call to {helper}")))
        }
    }

    fn run_buf(buf: CodeBuffer) -> Result<u64, SimError> {
        let code = CompiledCode {
            name: "asm".to_string(),
            code: buf.into_code(),
            entry: 0,
            ro_data: 0,
            listing: None,
            stats: Default::default(),
        };
        let mut sim = Simulator::new().with_step_limit(100);
        let entry = sim.load(&code);
        sim.run(entry, 0, &mut NoHelpers)
    }

    fn run_asm(f: impl FnOnce(&mut AArch64Assembler<'_>)) -> Result<u64, SimError> {
        let mut buf = CodeBuffer::new();
        f(&mut AArch64Assembler::new(&mut buf));
        run_buf(buf)
    }

    #[test]
    fn test_arithmetic_and_return() {
        let result = run_asm(|a| {
            a.mov_imm(GpX::X1, 40).unwrap();
            a.add_imm(GpX::X0, GpX::X1, 2).unwrap();
            a.ret();
        });
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn test_fp_round_trip_through_stack() {
        let result = run_asm(|a| {
            a.sub_imm(GpX::SP, GpX::SP, 16).unwrap();
            a.fmov_imm(VecD::new(16), 1.5).unwrap();
            a.fadd(VecD::new(17), VecD::new(16), VecD::new(16));
            a.str_d(VecD::new(17), GpX::SP, 8).unwrap();
            a.ldr(GpX::X0, GpX::SP, 8).unwrap();
            a.add_imm(GpX::SP, GpX::SP, 16).unwrap();
            a.ret();
        });
        assert_eq!(result, Ok(3.0f64.to_bits()));
    }

    #[test]
    fn test_conditional_branch() {
        let mut buf = CodeBuffer::new();
        let done = buf.new_label(None);
        let mut a = AArch64Assembler::new(&mut buf);
        a.mov_imm(GpX::X0, 1).unwrap();
        a.cmp_imm(GpX::X0, 1).unwrap();
        a.b_cond(Cond::Eq, done);
        a.mov_imm(GpX::X0, 7).unwrap();
        buf.bind(done);
        AArch64Assembler::new(&mut buf).ret();
        buf.resolve().unwrap();
        assert_eq!(run_buf(buf), Ok(1));
    }

    #[test]
    fn test_clobbered_callee_saved_register_is_reported() {
        let result = run_asm(|a| {
            a.mov(GpX::new(19), GpX::XZR);
            a.ret();
        });
        assert_eq!(result, Err(SimError::NotRestored("x19".to_string())));
    }

    #[test]
    fn test_step_limit() {
        let mut buf = CodeBuffer::new();
        // b .
        AArch64Assembler::new(&mut buf).emit_raw(0x1400_0000);
        assert_eq!(run_buf(buf), Err(SimError::StepLimit(100)));
    }
}
