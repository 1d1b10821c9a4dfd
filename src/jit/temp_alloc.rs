//! Allocation of temporary registers within one register class.

use super::hwreg::RegRange;

/// A pool of temporary registers with least-recently-used tracking.
///
/// Registers are identified by their index within the class.
#[derive(Debug, Clone)]
pub struct TempRegAlloc {
    range: RegRange,
    /// Bit `n` set means register `n` is free.
    free: u32,
    /// Allocated registers, least recently used first.
    lru: Vec<u8>,
}

impl TempRegAlloc {
    pub fn new(range: RegRange) -> Self {
        let mut free = 0u32;
        for n in range.first..=range.last {
            free |= 1 << n;
        }
        Self {
            range,
            free,
            lru: Vec::with_capacity(range.len()),
        }
    }

    pub fn range(&self) -> RegRange {
        self.range
    }

    pub fn contains(&self, n: u8) -> bool {
        self.range.contains(n)
    }

    pub fn is_free(&self, n: u8) -> bool {
        self.free & (1 << n) != 0
    }

    #[cfg(test)]
    fn free_count(&self) -> usize {
        self.free.count_ones() as usize
    }

    /// Take `preferred` if it is free, otherwise the lowest free register.
    pub fn alloc(&mut self, preferred: Option<u8>) -> Option<u8> {
        let n = match preferred {
            Some(p) if self.contains(p) && self.is_free(p) => p,
            _ => {
                if self.free == 0 {
                    return None;
                }
                self.free.trailing_zeros() as u8
            }
        };
        self.free &= !(1 << n);
        self.lru.push(n);
        Some(n)
    }

    pub fn free(&mut self, n: u8) {
        debug_assert!(self.contains(n), "register {n} outside pool");
        debug_assert!(!self.is_free(n), "register {n} freed twice");
        self.free |= 1 << n;
        self.lru.retain(|&r| r != n);
    }

    /// Mark `n` as most recently used.
    pub fn touch(&mut self, n: u8) {
        if let Some(pos) = self.lru.iter().position(|&r| r == n) {
            self.lru.remove(pos);
            self.lru.push(n);
        }
    }

    /// Allocated registers, least recently used first.
    pub fn lru_order(&self) -> impl Iterator<Item = u8> + '_ {
        self.lru.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> TempRegAlloc {
        TempRegAlloc::new(RegRange { first: 16, last: 19 })
    }

    #[test]
    fn test_alloc_lowest_then_preferred() {
        let mut ra = pool();
        assert_eq!(ra.alloc(None), Some(16));
        assert_eq!(ra.alloc(Some(18)), Some(18));
        // Taken preferred falls back to the lowest free.
        assert_eq!(ra.alloc(Some(18)), Some(17));
        // Out-of-pool preferred is ignored.
        assert_eq!(ra.alloc(Some(3)), Some(19));
        assert_eq!(ra.alloc(None), None);
    }

    #[test]
    fn test_lru_order_follows_use() {
        let mut ra = pool();
        for _ in 0..4 {
            ra.alloc(None);
        }
        ra.touch(16);
        ra.touch(18);
        assert_eq!(ra.lru_order().collect::<Vec<_>>(), vec![17, 19, 16, 18]);
        ra.free(19);
        assert_eq!(ra.lru_order().next(), Some(17));
        assert_eq!(ra.free_count(), 1);
        assert_eq!(ra.alloc(None), Some(19));
        assert_eq!(ra.lru_order().last(), Some(19));
    }
}
