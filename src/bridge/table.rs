//! Buffer table
//!
//! Acquired buffers are addressed by opaque handles. Each buffer moves
//! through acquire → lock → unlock → release; any call out of that order is
//! rejected with a [`BufferError`] instead of touching memory.

use crate::bridge::buffer::{DirectMemory, HardwareBuffer, MemoryRegion};
use crate::error::{BufferError, Result};
use crate::id::{Handle, HandleTable};

struct Entry {
    buffer: Box<dyn HardwareBuffer>,
    locked: Option<MemoryRegion>,
}

/// Acquired buffers by handle
#[derive(Default)]
pub struct BufferTable {
    entries: HandleTable<Entry>,
}

impl BufferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw memory region
    pub fn acquire(&mut self, addr: i64, len: i64) -> Result<Handle> {
        let region = MemoryRegion::new(addr, len)?;
        self.acquire_hardware(Box::new(DirectMemory(region)))
    }

    /// Register a platform buffer
    pub fn acquire_hardware(&mut self, buffer: Box<dyn HardwareBuffer>) -> Result<Handle> {
        let handle = self
            .entries
            .insert(Entry {
                buffer,
                locked: None,
            })
            .ok_or(BufferError::LockFailed)?;
        tracing::trace!(buffer = %handle, "Buffer acquired");
        Ok(handle)
    }

    /// Lock for reading, returning the mapped address
    pub fn lock(&mut self, id: Handle) -> Result<usize> {
        let entry = self.entry(id)?;
        if entry.locked.is_some() {
            return Err(BufferError::AlreadyLocked(id.get()).into());
        }
        let region = entry.buffer.lock().ok_or(BufferError::LockFailed)?;
        entry.locked = Some(region);
        Ok(region.addr())
    }

    pub fn unlock(&mut self, id: Handle) -> Result<()> {
        let entry = self.entry(id)?;
        if entry.locked.take().is_none() {
            return Err(BufferError::NotLocked(id.get()).into());
        }
        entry.buffer.unlock();
        Ok(())
    }

    /// Forget a buffer. It must not be locked.
    pub fn release(&mut self, id: Handle) -> Result<()> {
        if self.entry(id)?.locked.is_some() {
            return Err(BufferError::StillLocked(id.get()).into());
        }
        self.entries.remove(id);
        tracing::trace!(buffer = %id, "Buffer released");
        Ok(())
    }

    pub fn is_locked(&self, id: Handle) -> bool {
        self.entries
            .get(id)
            .map(|entry| entry.locked.is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow a buffer for reading.
    ///
    /// A buffer the caller already locked is read under that lock. Otherwise
    /// it is locked here and unlocked again when the [`BufferRef`] drops.
    pub fn borrow(&mut self, id: Handle) -> Result<BufferRef<'_>> {
        let locked = self.entry(id)?.locked;
        let (region, owns_lock) = match locked {
            Some(region) => (region, false),
            None => {
                self.lock(id)?;
                let region = self.entry(id)?.locked.ok_or(BufferError::LockFailed)?;
                (region, true)
            }
        };
        Ok(BufferRef {
            table: self,
            id,
            region,
            owns_lock,
        })
    }

    fn entry(&mut self, id: Handle) -> Result<&mut Entry> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| BufferError::UnknownBuffer(id.get()).into())
    }
}

/// A locked buffer, unlocked on drop if the lock was taken by
/// [`BufferTable::borrow`]
pub struct BufferRef<'a> {
    table: &'a mut BufferTable,
    id: Handle,
    region: MemoryRegion,
    owns_lock: bool,
}

impl BufferRef<'_> {
    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    /// Read `len` bytes at `offset` inside the locked region
    pub fn read(&self, offset: i64, len: i64) -> Result<&[u8]> {
        let sub = self.region.slice(offset, len)?;
        // The buffer stays locked while `self` is borrowed
        Ok(unsafe { sub.as_slice() })
    }
}

impl Drop for BufferRef<'_> {
    fn drop(&mut self) {
        if self.owns_lock {
            if let Err(err) = self.table.unlock(self.id) {
                tracing::warn!(buffer = %self.id, error = %err, "Failed to unlock buffer");
            }
        }
    }
}
