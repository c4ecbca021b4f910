//! Shared linear memory and module image handles.
//!
//! Both are cheap `Arc` handles. Cloning one and giving it to another thread
//! shares the same region; nothing is copied. Every engine instance, on the
//! host and on each worker, attaches to the same [`SharedMemory`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::MemoryError;

/// Linear memory page size in bytes.
pub const PAGE_SIZE: usize = 64 * 1024;

// =============================================================================
// SHARED MEMORY
// =============================================================================

/// Handle to a linear memory region shared by every engine instance.
#[derive(Clone)]
pub struct SharedMemory {
    bytes: Arc<[AtomicU8]>,
}

impl SharedMemory {
    /// Allocate a zeroed region of `pages` pages.
    pub fn new(pages: u32) -> Result<Self, MemoryError> {
        if pages == 0 {
            return Err(MemoryError::InvalidSize);
        }
        let size = pages as usize * PAGE_SIZE;
        Ok(Self {
            bytes: (0..size).map(|_| AtomicU8::new(0)).collect(),
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn pages(&self) -> u32 {
        (self.size() / PAGE_SIZE) as u32
    }

    /// True when both handles name the same region.
    pub fn same_region(&self, other: &SharedMemory) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Copy `data` into the region at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        let region = self.range(offset, data.len())?;
        for (slot, &byte) in region.iter().zip(data) {
            slot.store(byte, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy `len` bytes out of the region starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, MemoryError> {
        let region = self.range(offset, len)?;
        Ok(region.iter().map(|slot| slot.load(Ordering::Relaxed)).collect())
    }

    fn range(&self, offset: usize, len: usize) -> Result<&[AtomicU8], MemoryError> {
        let size = self.size();
        offset
            .checked_add(len)
            .filter(|&end| end <= size)
            .map(|end| &self.bytes[offset..end])
            .ok_or(MemoryError::OutOfBounds { offset, len, size })
    }
}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory")
            .field("pages", &self.pages())
            .field("size", &self.size())
            .finish()
    }
}

// =============================================================================
// MODULE IMAGE
// =============================================================================

/// Handle to the compiled engine image every instance is created from.
///
/// The bytes are opaque here; validating and compiling them is the
/// [`Instantiate`](crate::engine::Instantiate) implementation's job.
#[derive(Clone)]
pub struct ModuleImage {
    name: Arc<str>,
    bytes: Arc<[u8]>,
}

impl ModuleImage {
    pub fn new(name: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn same_image(&self, other: &ModuleImage) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for ModuleImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleImage")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}
