//! framejit - an AArch64 baseline JIT for frame-register bytecode
//!
//! This library turns a function's virtual operations into native code that
//! keeps interpreter frame registers in hardware registers, with out-of-line
//! slow paths for the non-numeric cases. The `sim` module runs the output on
//! any host.

pub mod config;
pub mod jit;
pub mod sim;
pub mod vm;

// Re-export commonly used types
pub use config::JitConfig;
pub use jit::{CompileStats, CompiledCode, JitFunction, JitRuntime, compile};
pub use vm::{FrameReg, Function, Helper, HelperTable, Op, Value};
