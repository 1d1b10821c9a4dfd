//! Executable memory management using mmap.
//!
//! Memory is mapped read-write, filled, then flipped to read-execute. It is
//! never writable and executable at the same time.

use std::ptr::NonNull;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory allocation failed")]
    AllocationFailed,
    #[error("memory protection change failed")]
    ProtectionFailed,
    #[error("invalid memory size {0}")]
    InvalidSize(usize),
    #[error("write to executable memory")]
    Sealed,
}

/// A block of memory that can be written and then executed.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    executable: bool,
}

impl ExecutableMemory {
    /// Map `size` bytes (rounded up to pages), writable and not executable.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize(size));
        }
        let page_size = page_size();
        let aligned_size = size.div_ceil(page_size) * page_size;
        let ptr = mmap_alloc(aligned_size)?;
        Ok(Self {
            ptr,
            size: aligned_size,
            executable: false,
        })
    }

    /// Map a block holding `code` and make it executable.
    pub fn with_code(code: &[u8]) -> Result<Self, MemoryError> {
        let mut mem = Self::new(code.len())?;
        mem.write(0, code)?;
        mem.make_executable()?;
        Ok(mem)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        if self.executable {
            return Err(MemoryError::Sealed);
        }
        if offset.checked_add(data.len()).is_none_or(|end| end > self.size) {
            return Err(MemoryError::InvalidSize(offset.saturating_add(data.len())));
        }
        // SAFETY: the range was checked against the mapping above.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Flip the mapping to read-execute and flush the instruction cache.
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        if self.executable {
            return Ok(());
        }
        // SAFETY: ptr/size describe a live mapping owned by self.
        let result = unsafe {
            libc::mprotect(
                self.ptr.as_ptr() as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if result != 0 {
            return Err(MemoryError::ProtectionFailed);
        }
        flush_icache(self.ptr.as_ptr(), self.size);
        self.executable = true;
        Ok(())
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by mmap_alloc with this size.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

// SAFETY: the mapping is owned exclusively and only mutated through &mut.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

fn mmap_alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
    // SAFETY: anonymous private mapping, no file descriptor involved.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(MemoryError::AllocationFailed);
    }
    NonNull::new(ptr as *mut u8).ok_or(MemoryError::AllocationFailed)
}

#[cfg(target_arch = "aarch64")]
fn flush_icache(start: *mut u8, size: usize) {
    unsafe extern "C" {
        fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
    }
    // SAFETY: the range lies within one live mapping.
    unsafe {
        __clear_cache(start as *mut libc::c_char, start.add(size) as *mut libc::c_char);
    }
}

#[cfg(not(target_arch = "aarch64"))]
fn flush_icache(_start: *mut u8, _size: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_memory() {
        let mem = ExecutableMemory::new(100).unwrap();
        assert!(mem.size() >= 100);
        assert!(!mem.is_executable());
        assert!(matches!(ExecutableMemory::new(0), Err(MemoryError::InvalidSize(0))));
    }

    #[test]
    fn test_write_bounds() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.write(0, &[0x1F, 0x20, 0x03, 0xD5]).unwrap();
        let end = mem.size();
        assert_eq!(mem.write(end - 2, &[0; 4]), Err(MemoryError::InvalidSize(end + 2)));
        assert_eq!(mem.write(usize::MAX, &[0; 4]), Err(MemoryError::InvalidSize(usize::MAX)));
    }

    #[test]
    fn test_cannot_write_after_executable() {
        let mut mem = ExecutableMemory::with_code(&[0x1F, 0x20, 0x03, 0xD5]).unwrap();
        assert!(mem.is_executable());
        assert_eq!(mem.write(0, &[0]), Err(MemoryError::Sealed));
    }
}
