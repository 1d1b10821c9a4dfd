//! Registration of compiled code in executable memory.

use std::sync::{Arc, Mutex};

use tracing::debug;

use super::compile::{CompileStats, CompiledCode};
use super::fatal;
use super::memory::ExecutableMemory;

/// A compiled function installed in executable memory.
pub struct JitFunction {
    name: String,
    memory: ExecutableMemory,
    entry: usize,
    stats: CompileStats,
}

impl JitFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    pub fn entry_address(&self) -> *const u8 {
        self.memory.as_ptr().wrapping_add(self.entry)
    }

    /// Run the function with `runtime` as its context and return the raw
    /// tagged result.
    ///
    /// # Safety
    /// `runtime` must be the context the helper table used at compile time
    /// expects, and every helper address must be callable.
    #[cfg(target_arch = "aarch64")]
    pub unsafe fn call(&self, runtime: *mut std::ffi::c_void) -> u64 {
        type Entry = unsafe extern "C" fn(*mut std::ffi::c_void) -> u64;
        // SAFETY: the entry point follows the C calling convention with the
        // runtime context as the only argument.
        unsafe {
            let f: Entry = std::mem::transmute(self.entry_address());
            f(runtime)
        }
    }
}

/// Owner of every installed function. Thread-safe.
///
/// Installed code stays mapped for the lifetime of the runtime, which keeps
/// one reference to each function. Code is unmapped once the runtime and
/// every handle returned by [`JitRuntime::add`] are dropped. Functions are
/// never removed individually.
#[derive(Default)]
pub struct JitRuntime {
    functions: Mutex<Vec<Arc<JitFunction>>>,
}

impl JitRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `code` into executable memory. Failure is fatal.
    pub fn add(&self, code: CompiledCode) -> Arc<JitFunction> {
        let memory = match ExecutableMemory::with_code(&code.code) {
            Ok(memory) => memory,
            Err(err) => fatal(format_args!("cannot install {}: {err}", code.name)),
        };
        let func = Arc::new(JitFunction {
            name: code.name,
            memory,
            entry: code.entry,
            stats: code.stats,
        });
        debug!(function = %func.name, address = ?func.entry_address(), "installed");
        match self.functions.lock() {
            Ok(mut functions) => functions.push(Arc::clone(&func)),
            Err(poisoned) => poisoned.into_inner().push(Arc::clone(&func)),
        }
        func
    }

    pub fn len(&self) -> usize {
        self.functions.lock().map_or_else(|p| p.into_inner().len(), |f| f.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
