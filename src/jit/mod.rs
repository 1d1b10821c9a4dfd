//! AArch64 code generation for frame-register operations.
//!
//! - Instruction encoding and decoding
//! - Code buffer with labels and fixups
//! - Frame register to hardware register binding
//! - Slow paths, read-only data and helper thunks
//! - Prologue/epilogue and per-operation emitters
//! - Executable memory and function registration

use std::fmt;

use crate::vm::{DOUBLE_LIM, VALUE_FORMAT_VERSION};

pub mod aarch64;
mod binding;
mod call;
pub mod codebuf;
mod compile;
pub mod decode;
mod emitter;
pub mod hwreg;
mod memory;
mod ops;
mod prologue;
mod rodata;
mod runtime;
mod slow_path;
mod temp_alloc;

pub use compile::{CompileStats, CompiledCode, compile};
pub use memory::{ExecutableMemory, MemoryError};
pub use prologue::FrameLayout;
pub use rodata::RO_DATA_LIMIT;
pub use runtime::{JitFunction, JitRuntime};

// The number guard compares against x21 loaded with a single MOVZ.
const _: () = assert!(VALUE_FORMAT_VERSION == 1 && DOUBLE_LIM == 0xFFF9 << 48);

/// Abort the process after logging `msg`.
#[cold]
pub fn fatal(msg: impl fmt::Display) -> ! {
    tracing::error!("fatal JIT error: {msg}");
    std::process::abort()
}
