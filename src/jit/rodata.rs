//! Read-only data pool and helper thunks.
//!
//! Constants that do not fit an instruction immediate are placed after the
//! code and loaded PC-relative. Helpers are reached through small thunks,
//! one per distinct address:
//!
//! ```text
//!   thunk:  ldr x16, <pool slot holding the address>
//!           br  x16
//! ```

use std::collections::HashMap;

use crate::vm::Helper;

use super::codebuf::Label;
use super::emitter::Emitter;
use super::fatal;
use super::hwreg::X_SCRATCH;

/// Largest pool size reachable by every PC-relative load in the function.
pub const RO_DATA_LIMIT: usize = 64 * 1024;

/// One 8-byte pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoEntry {
    pub offset: u32,
    pub bits: u64,
    /// Helper whose address this entry holds, if it backs a thunk.
    pub helper: Option<Helper>,
}

#[derive(Debug, Clone, Copy)]
struct Thunk {
    label: Label,
    slot: u32,
}

#[derive(Debug, Default)]
pub struct RoData {
    entries: Vec<RoEntry>,
    by_bits: HashMap<u64, u32>,
    thunks: Vec<Thunk>,
    thunk_by_addr: HashMap<u64, usize>,
}

impl RoData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool offset of `bits`, adding it if absent. `None` once the pool is
    /// full.
    pub fn intern(&mut self, bits: u64) -> Option<u32> {
        if let Some(&offset) = self.by_bits.get(&bits) {
            return Some(offset);
        }
        let offset = self.len();
        if offset as usize + 8 > RO_DATA_LIMIT {
            return None;
        }
        self.entries.push(RoEntry {
            offset,
            bits,
            helper: None,
        });
        self.by_bits.insert(bits, offset);
        Some(offset)
    }

    pub fn len(&self) -> u32 {
        self.entries.len() as u32 * 8
    }

    pub fn entries(&self) -> &[RoEntry] {
        &self.entries
    }

    pub fn thunk_count(&self) -> usize {
        self.thunks.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.entries
            .iter()
            .flat_map(|e| e.bits.to_le_bytes())
            .collect()
    }

    fn tag_helper(&mut self, offset: u32, helper: Helper) {
        if let Some(entry) = self.entries.get_mut(offset as usize / 8) {
            entry.helper.get_or_insert(helper);
        }
    }
}

impl Emitter<'_> {
    /// Pool offset of a 64-bit constant.
    pub(super) fn intern_constant(&mut self, bits: u64) -> u32 {
        match self.ro.intern(bits) {
            Some(offset) => offset,
            None => fatal(format_args!(
                "read-only data exceeds {} bytes in {}",
                RO_DATA_LIMIT, self.func.name
            )),
        }
    }

    /// The thunk that jumps to `helper`, created on first use.
    pub(super) fn thunk(&mut self, helper: Helper) -> Label {
        let addr = self.helpers.address(helper);
        if let Some(&index) = self.ro.thunk_by_addr.get(&addr) {
            return self.ro.thunks[index].label;
        }
        let slot = self.intern_constant(addr);
        self.ro.tag_helper(slot, helper);
        let label = self.buf.new_label(Some(helper.name()));
        self.ro.thunk_by_addr.insert(addr, self.ro.thunks.len());
        self.ro.thunks.push(Thunk { label, slot });
        label
    }

    pub(super) fn emit_thunks(&mut self) {
        let ro = self.ro_label;
        for Thunk { label, slot } in self.ro.thunks.clone() {
            self.buf.bind(label);
            let mut a = self.asm();
            a.ldr_literal(X_SCRATCH, ro, slot as i64);
            a.br(X_SCRATCH);
        }
    }

    pub(super) fn emit_ro_data(&mut self) {
        self.buf.align(8);
        self.buf.bind(self.ro_label);
        let bytes = self.ro.to_bytes();
        self.buf.emit_bytes(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JitConfig;
    use crate::vm::{Function, HelperTable};

    fn helper_entries(ro: &RoData) -> Vec<Helper> {
        ro.entries().iter().filter_map(|e| e.helper).collect()
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let mut ro = RoData::new();
        assert_eq!(ro.intern(0x1234_5678_9abc_def0), Some(0));
        assert_eq!(ro.intern(42), Some(8));
        assert_eq!(ro.intern(0x1234_5678_9abc_def0), Some(0));
        assert_eq!(ro.len(), 16);
        assert_eq!(&ro.to_bytes()[8..16], &42u64.to_le_bytes());
    }

    #[test]
    fn test_pool_limit() {
        let mut ro = RoData::new();
        for i in 0..(RO_DATA_LIMIT / 8) as u64 {
            assert!(ro.intern(i).is_some());
        }
        assert_eq!(ro.intern(u64::MAX), None);
        // Existing entries remain reachable.
        assert_eq!(ro.intern(7), Some(56));
    }

    #[test]
    fn test_thunk_is_shared_per_helper() {
        let f = Function::new("thunks", 1, Vec::new());
        let helpers = HelperTable::new(|h| 0x1000 + h as u64 * 16);
        let config = JitConfig::default();
        let mut e = Emitter::new(&f, &helpers, &config);

        let add = e.thunk(Helper::Add);
        assert_eq!(e.thunk(Helper::Add), add);
        assert_eq!(e.ro.thunk_count(), 1);
        assert_eq!(helper_entries(&e.ro), vec![Helper::Add]);

        let sub = e.thunk(Helper::Sub);
        assert_ne!(sub, add);
        assert_eq!(e.ro.thunk_count(), 2);
        assert_eq!(e.ro.entries().len(), 2);
    }

    #[test]
    fn test_helpers_at_one_address_share_a_thunk() {
        let f = Function::new("thunks", 1, Vec::new());
        let helpers = HelperTable::new(|h| match h {
            Helper::Add | Helper::Sub => 0x2000,
            _ => 0x1000 + h as u64 * 16,
        });
        let config = JitConfig::default();
        let mut e = Emitter::new(&f, &helpers, &config);

        let add = e.thunk(Helper::Add);
        assert_eq!(e.thunk(Helper::Sub), add);
        assert_eq!(e.ro.thunk_count(), 1);
        // The entry keeps the name of the first helper that used it.
        assert_eq!(helper_entries(&e.ro), vec![Helper::Add]);
        assert_eq!(e.ro.entries()[0].bits, 0x2000);
        // A constant with the same bits reuses the entry.
        assert_eq!(e.intern_constant(0x2000), 0);
    }
}
