//! Code buffer for building JIT code.
//!
//! Instructions are appended as little-endian words. Branches and PC-relative
//! literal loads name a [`Label`]; their displacement is patched in by
//! [`CodeBuffer::resolve`] once every label is bound.

use super::aarch64::EncodeError;

/// A position in the code buffer, possibly not bound yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

/// Which instruction field a fixup patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// B/BL: bits 25:0, in words.
    Imm26,
    /// B.cond, CBZ/CBNZ, LDR literal: bits 23:5, in words.
    Imm19,
}

#[derive(Debug, Clone)]
struct Fixup {
    at: usize,
    label: Label,
    addend: i64,
    kind: FixupKind,
}

#[derive(Debug, Clone)]
struct LabelInfo {
    offset: Option<usize>,
    name: Option<String>,
}

/// A buffer for building machine code.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
    labels: Vec<LabelInfo>,
    fixups: Vec<Fixup>,
    /// Listing commentary, keyed by the code offset it precedes.
    comments: Vec<(usize, String)>,
    record_comments: bool,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Keep comments passed to [`CodeBuffer::comment`]. Off by default.
    pub fn set_record_comments(&mut self, on: bool) {
        self.record_comments = on;
    }

    pub fn records_comments(&self) -> bool {
        self.record_comments
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Current offset, where the next instruction goes.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a 32-bit value (little-endian).
    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Pad with zero bytes up to `alignment`, a power of two.
    pub fn align(&mut self, alignment: usize) {
        debug_assert!(alignment.is_power_of_two());
        let aligned = (self.code.len() + alignment - 1) & !(alignment - 1);
        self.code.resize(aligned, 0);
    }

    pub fn new_label(&mut self, name: Option<&str>) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(LabelInfo {
            offset: None,
            name: name.map(str::to_string),
        });
        Label(id)
    }

    /// Bind `label` to the current offset.
    pub fn bind(&mut self, label: Label) {
        let info = &mut self.labels[label.0 as usize];
        assert!(info.offset.is_none(), "label {:?} bound twice", label);
        info.offset = Some(self.code.len());
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels[label.0 as usize].offset
    }

    pub fn label_name(&self, label: Label) -> Option<&str> {
        self.labels[label.0 as usize].name.as_deref()
    }

    /// Names of the labels bound at `offset`.
    pub fn names_at(&self, offset: usize) -> impl Iterator<Item = &str> {
        self.labels
            .iter()
            .filter(move |l| l.offset == Some(offset))
            .filter_map(|l| l.name.as_deref())
    }

    /// Emit `inst` with a displacement field to be patched to `label + addend`.
    pub fn emit_with_fixup(&mut self, inst: u32, label: Label, addend: i64, kind: FixupKind) {
        self.fixups.push(Fixup {
            at: self.code.len(),
            label,
            addend,
            kind,
        });
        self.emit_u32(inst);
    }

    /// Patch every pending fixup.
    pub fn resolve(&mut self) -> Result<(), EncodeError> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self
                .label_offset(fixup.label)
                .ok_or(EncodeError::UnboundLabel)?;
            let delta = target as i64 + fixup.addend - fixup.at as i64;
            if delta % 4 != 0 {
                return Err(EncodeError::BranchOutOfRange);
            }
            let words = delta / 4;
            let current = self.read_u32(fixup.at);
            let patched = match fixup.kind {
                FixupKind::Imm26 => {
                    if !(-(1 << 25)..(1 << 25)).contains(&words) {
                        return Err(EncodeError::BranchOutOfRange);
                    }
                    (current & 0xFC00_0000) | (words as u32 & 0x03FF_FFFF)
                }
                FixupKind::Imm19 => {
                    if !(-(1 << 18)..(1 << 18)).contains(&words) {
                        return Err(EncodeError::BranchOutOfRange);
                    }
                    (current & 0xFF00_001F) | ((words as u32 & 0x7FFFF) << 5)
                }
            };
            self.code[fixup.at..fixup.at + 4].copy_from_slice(&patched.to_le_bytes());
        }
        Ok(())
    }

    pub fn read_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes([
            self.code[at],
            self.code[at + 1],
            self.code[at + 2],
            self.code[at + 3],
        ])
    }

    /// Attach a listing comment to the current offset.
    pub fn comment(&mut self, text: impl Into<String>) {
        if self.record_comments {
            self.comments.push((self.code.len(), text.into()));
        }
    }

    pub fn comments(&self) -> &[(usize, String)] {
        &self.comments
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Consume the buffer and return the raw code bytes.
    /// Fixups are not patched; call [`CodeBuffer::resolve`] first.
    pub fn into_code(self) -> Vec<u8> {
        self.code
    }
}
