//! Sparse little-endian memory made of mapped regions.

use super::SimError;

#[derive(Debug, Clone)]
struct Region {
    base: u64,
    data: Vec<u8>,
}

impl Region {
    fn contains(&self, addr: u64, len: u64) -> bool {
        addr >= self.base && addr.saturating_add(len) <= self.base + self.data.len() as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct Memory {
    regions: Vec<Region>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `size` zeroed bytes at `base`, replacing any region starting
    /// there.
    pub fn map(&mut self, base: u64, size: usize) {
        self.regions.retain(|r| r.base != base);
        self.regions.push(Region {
            base,
            data: vec![0; size],
        });
    }

    /// Map a copy of `bytes` at `base`.
    pub fn map_bytes(&mut self, base: u64, bytes: &[u8]) {
        self.regions.retain(|r| r.base != base);
        self.regions.push(Region {
            base,
            data: bytes.to_vec(),
        });
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.regions.iter().any(|r| r.contains(addr, 1))
    }

    fn slice(&self, addr: u64, len: usize) -> Result<&[u8], SimError> {
        let region = self
            .regions
            .iter()
            .find(|r| r.contains(addr, len as u64))
            .ok_or(SimError::Unmapped { addr })?;
        let start = (addr - region.base) as usize;
        Ok(&region.data[start..start + len])
    }

    fn slice_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], SimError> {
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.contains(addr, len as u64))
            .ok_or(SimError::Unmapped { addr })?;
        let start = (addr - region.base) as usize;
        Ok(&mut region.data[start..start + len])
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, SimError> {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(self.slice(addr, 8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, SimError> {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(self.slice(addr, 4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), SimError> {
        self.slice_mut(addr, 8)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), SimError> {
        self.slice_mut(addr, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_within_region() {
        let mut mem = Memory::new();
        mem.map(0x1000, 16);
        mem.write_u64(0x1008, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mem.read_u32(0x1008).unwrap(), 0x5566_7788);
        assert_eq!(mem.read_u32(0x100C).unwrap(), 0x1122_3344);
    }

    #[test]
    fn test_accesses_outside_regions_fault() {
        let mut mem = Memory::new();
        mem.map(0x1000, 16);
        assert_eq!(mem.read_u64(0x100C), Err(SimError::Unmapped { addr: 0x100C }));
        assert!(mem.write_u32(0x2000, 1).is_err());
        assert!(!mem.is_mapped(0x1010));
    }
}
