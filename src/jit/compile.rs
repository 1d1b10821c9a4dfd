//! Compilation driver: one [`Function`] in, finished code out.

use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::config::JitConfig;
use crate::vm::{Function, HelperTable, Op, Value};

use super::codebuf::CodeBuffer;
use super::decode::decode;
use super::emitter::Emitter;
use super::fatal;
use super::hwreg::{HwReg, X_RETURN};
use super::rodata::RoData;

/// Figures reported for one compiled function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileStats {
    pub ops: usize,
    /// Bytes of instructions, thunks included.
    pub code_size: usize,
    pub ro_data_size: usize,
    pub slow_paths: usize,
    pub thunks: usize,
    pub constants: usize,
    pub frame_size: u32,
    pub gp_pinned: u32,
    pub vec_pinned: u32,
    pub spills: u32,
    pub syncs: u32,
    pub helper_calls: u32,
}

/// Finished machine code for one function, not yet executable.
#[derive(Debug, Clone)]
pub struct CompiledCode {
    pub name: String,
    /// Instructions followed by the read-only data.
    pub code: Vec<u8>,
    /// Offset of the entry point.
    pub entry: usize,
    /// Offset of the read-only data.
    pub ro_data: usize,
    pub listing: Option<String>,
    pub stats: CompileStats,
}

/// Generate code for `func`. Helper calls are bound to the addresses in
/// `helpers`. Unrecoverable failures abort the process.
pub fn compile(func: &Function, helpers: &HelperTable, config: &JitConfig) -> CompiledCode {
    let mut e = Emitter::new(func, helpers, config);
    e.emit_prologue();
    for op in &func.ops {
        e.emit_op(op);
    }
    if !matches!(func.ops.last(), Some(Op::Ret { .. } | Op::Jump { .. })) {
        // Falling off the end returns undefined.
        e.sync_all_temps_except(None);
        e.free_all_temps();
        e.load_bits(HwReg::gp(X_RETURN.code() as u8), Value::UNDEFINED.raw());
    }
    e.emit_epilogue();
    e.emit_slow_paths();
    e.emit_thunks();
    let code_size = e.buf.offset();
    e.emit_ro_data();
    if let Err(err) = e.buf.resolve() {
        fatal(format_args!("{}: {err}", func.name));
    }

    let stats = CompileStats {
        ops: func.ops.len(),
        code_size,
        ro_data_size: e.ro.len() as usize,
        slow_paths: e.slow_paths.len(),
        thunks: e.ro.thunk_count(),
        constants: e.ro.entries().iter().filter(|c| c.helper.is_none()).count(),
        frame_size: e.frame_layout().size,
        gp_pinned: e.gp_pinned,
        vec_pinned: e.vec_pinned,
        spills: e.counters.spills,
        syncs: e.counters.syncs,
        helper_calls: e.counters.helper_calls,
    };
    debug!(
        function = %func.name,
        code_size = stats.code_size,
        slow_paths = stats.slow_paths,
        thunks = stats.thunks,
        constants = stats.constants,
        "compiled"
    );

    let ro_data = e.buf.label_offset(e.ro_label).unwrap_or(code_size);
    let listing = config
        .dump_code
        .then(|| render_listing(&e.buf, code_size, ro_data, &e.ro));
    CompiledCode {
        name: func.name.clone(),
        code: e.buf.into_code(),
        entry: 0,
        ro_data,
        listing,
        stats,
    }
}

fn render_listing(buf: &CodeBuffer, code_size: usize, ro_data: usize, ro: &RoData) -> String {
    let mut out = String::new();
    let mut comments = buf.comments().iter().peekable();
    for offset in (0..code_size).step_by(4) {
        while let Some((_, text)) = comments.next_if(|(at, _)| *at <= offset) {
            let _ = writeln!(out, "        {text}");
        }
        for name in buf.names_at(offset) {
            let _ = writeln!(out, "{name}:");
        }
        let word = buf.read_u32(offset);
        match decode(word) {
            Some(inst) => {
                let _ = writeln!(out, "  {offset:06x}:  {word:08x}  {inst}");
            }
            None => {
                let _ = writeln!(out, "  {offset:06x}:  {word:08x}  .word");
            }
        }
    }
    let _ = writeln!(out, "RO_DATA:");
    for entry in ro.entries() {
        let at = ro_data + entry.offset as usize;
        match entry.helper {
            Some(helper) => {
                let _ = writeln!(out, "  {at:06x}:  {:016x}  ; {helper}", entry.bits);
            }
            None => {
                let _ = writeln!(out, "  {at:06x}:  {:016x}", entry.bits);
            }
        }
    }
    out
}
