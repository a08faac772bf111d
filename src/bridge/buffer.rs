//! Borrowed memory regions
//!
//! The core never owns the memory it reads on the zero-copy path. A
//! [`MemoryRegion`] is a validated (address, length) pair; reading it is only
//! sound while the owner keeps the memory alive and unchanged, which the
//! lock/unlock discipline of [`BufferTable`](super::BufferTable) and the
//! synchronous send path guarantee.

use bytes::Bytes;

use crate::error::{BufferError, Result};

/// Caller-owned memory: start address and length in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    addr: usize,
    len: usize,
}

impl MemoryRegion {
    /// Validate a region handed over as raw integers.
    ///
    /// Zero or negative addresses and non-positive lengths are rejected
    /// before anything is dereferenced.
    pub fn new(addr: i64, len: i64) -> Result<Self> {
        if addr <= 0 {
            return Err(BufferError::NullAddress.into());
        }
        if len <= 0 {
            return Err(BufferError::InvalidLength(len).into());
        }
        let addr = usize::try_from(addr).map_err(|_| BufferError::NullAddress)?;
        let len = usize::try_from(len).map_err(|_| BufferError::InvalidLength(len))?;
        if addr.checked_add(len).is_none() {
            return Err(BufferError::OutOfBounds {
                offset: 0,
                len,
                size: usize::MAX - addr,
            }
            .into());
        }
        Ok(Self { addr, len })
    }

    /// `size` bytes starting `offset` bytes past `addr`, as handed over by
    /// the zero-copy send calls
    pub fn at_offset(addr: i64, offset: i64, size: i64) -> Result<Self> {
        if addr <= 0 {
            return Err(BufferError::NullAddress.into());
        }
        if size <= 0 {
            return Err(BufferError::InvalidLength(size).into());
        }
        if offset < 0 {
            return Err(BufferError::InvalidOffset(offset).into());
        }
        let start = addr
            .checked_add(offset)
            .ok_or(BufferError::InvalidOffset(offset))?;
        Self::new(start, size)
    }

    /// Region for a pointer the caller has already validated
    pub fn from_ptr(ptr: *const u8, len: usize) -> Result<Self> {
        if ptr.is_null() {
            return Err(BufferError::NullAddress.into());
        }
        let len_i64 = i64::try_from(len).map_err(|_| BufferError::InvalidLength(i64::MAX))?;
        Self::new(ptr as usize as i64, len_i64)
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Narrow to `[offset, offset + len)`, staying inside the region
    pub fn slice(&self, offset: i64, len: i64) -> Result<Self> {
        if offset < 0 {
            return Err(BufferError::InvalidOffset(offset).into());
        }
        if len <= 0 {
            return Err(BufferError::InvalidLength(len).into());
        }
        let (offset, sub_len) = (offset as usize, len as usize);
        match offset.checked_add(sub_len) {
            Some(end) if end <= self.len => Ok(Self {
                addr: self.addr + offset,
                len: sub_len,
            }),
            _ => Err(BufferError::OutOfBounds {
                offset,
                len: sub_len,
                size: self.len,
            }
            .into()),
        }
    }

    /// View the region as a byte slice.
    ///
    /// # Safety
    /// The memory must be readable for `len` bytes and must not be freed or
    /// written to for the lifetime of the returned slice.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        unsafe { std::slice::from_raw_parts(self.addr as *const u8, self.len) }
    }

    /// Copy the region into an owned buffer.
    ///
    /// # Safety
    /// Same contract as [`MemoryRegion::as_slice`], for the duration of the call.
    pub unsafe fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(unsafe { self.as_slice() })
    }
}

/// A platform buffer (hardware frame, direct byte buffer) the core may lock
/// for CPU reads.
///
/// Allocation and destruction stay with the platform; the core only locks,
/// reads and unlocks.
pub trait HardwareBuffer: Send {
    /// Map the buffer for reading. `None` means the platform refused.
    fn lock(&mut self) -> Option<MemoryRegion>;

    /// Undo a successful [`lock`](HardwareBuffer::lock)
    fn unlock(&mut self);
}

/// Plain memory that needs no platform locking
#[derive(Debug, Clone, Copy)]
pub struct DirectMemory(pub MemoryRegion);

impl HardwareBuffer for DirectMemory {
    fn lock(&mut self) -> Option<MemoryRegion> {
        Some(self.0)
    }

    fn unlock(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{code, Error};

    fn region_of(data: &[u8]) -> MemoryRegion {
        MemoryRegion::from_ptr(data.as_ptr(), data.len()).unwrap()
    }

    #[test]
    fn test_rejects_null_and_negative() {
        let err = MemoryRegion::new(0, 16).unwrap_err();
        assert_eq!(err.code(), code::BUFFER_ERROR);
        assert!(matches!(err, Error::Buffer(BufferError::NullAddress)));

        assert!(MemoryRegion::new(-8, 16).is_err());
        assert!(matches!(
            MemoryRegion::new(0x1000, 0),
            Err(Error::Buffer(BufferError::InvalidLength(0)))
        ));
        assert!(MemoryRegion::new(0x1000, -1).is_err());
        assert!(MemoryRegion::from_ptr(std::ptr::null(), 4).is_err());
    }

    #[test]
    fn test_slice_bounds() {
        let data = [1u8, 2, 3, 4, 5, 6];
        let region = region_of(&data);

        let sub = region.slice(2, 3).unwrap();
        assert_eq!(unsafe { sub.as_slice() }, &[3, 4, 5]);

        assert!(region.slice(4, 3).is_err());
        assert!(region.slice(-1, 2).is_err());
        assert!(region.slice(0, 0).is_err());
        assert!(region.slice(0, 6).is_ok());
    }

    #[test]
    fn test_at_offset() {
        let data = [10u8, 11, 12, 13, 14];
        let addr = data.as_ptr() as i64;

        let region = MemoryRegion::at_offset(addr, 3, 2).unwrap();
        assert_eq!(unsafe { region.as_slice() }, &[13, 14]);

        assert!(matches!(
            MemoryRegion::at_offset(0, 0, 4),
            Err(Error::Buffer(BufferError::NullAddress))
        ));
        assert!(matches!(
            MemoryRegion::at_offset(addr, 0, 0),
            Err(Error::Buffer(BufferError::InvalidLength(0)))
        ));
        assert!(matches!(
            MemoryRegion::at_offset(addr, -1, 2),
            Err(Error::Buffer(BufferError::InvalidOffset(-1)))
        ));
        assert!(MemoryRegion::at_offset(i64::MAX, 1, 1).is_err());
    }

    #[test]
    fn test_to_bytes_copies() {
        let data = vec![9u8; 32];
        let bytes = unsafe { region_of(&data).to_bytes() };
        drop(data);
        assert_eq!(bytes.len(), 32);
        assert!(bytes.iter().all(|b| *b == 9));
    }

    #[test]
    fn test_direct_memory_locks() {
        let data = [7u8; 4];
        let mut direct = DirectMemory(region_of(&data));
        let region = direct.lock().unwrap();
        assert_eq!(region.len(), 4);
        direct.unlock();
    }
}
