//! Opaque handles
//!
//! Sessions and borrowed buffers are referenced across the call boundary by
//! 64-bit handles, never by pointer. A handle packs the slab slot and the
//! generation the slot had when the entry was inserted:
//!
//! ```text
//! handle = generation << 32 | (slot + 1)
//! ```
//!
//! Zero is never a valid handle, and a handle stays invalid after its entry
//! is removed even once the slot is reused.

use std::num::NonZeroU64;

/// Opaque handle into a [`HandleTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    fn new(slot: usize, generation: u32) -> Option<Self> {
        let index = u32::try_from(slot.checked_add(1)?).ok()?;
        NonZeroU64::new((generation as u64) << 32 | index as u64).map(Handle)
    }

    fn slot(self) -> usize {
        ((self.0.get() & 0xFFFF_FFFF) - 1) as usize
    }

    fn generation(self) -> u32 {
        (self.0.get() >> 32) as u32
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl TryFrom<i64> for Handle {
    type Error = ();

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let raw = u64::try_from(value).map_err(|_| ())?;
        let handle = NonZeroU64::new(raw).map(Handle).ok_or(())?;
        // The slot part must be non-zero too
        if raw & 0xFFFF_FFFF == 0 {
            return Err(());
        }
        Ok(handle)
    }
}

impl From<Handle> for i64 {
    fn from(handle: Handle) -> Self {
        handle.0.get() as i64
    }
}

struct Entry<T> {
    generation: u32,
    value: T,
}

/// Slab of values addressed by generation-checked handles
pub struct HandleTable<T> {
    slab: slab::Slab<Entry<T>>,
    next_generation: u32,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slab: slab::Slab::new(),
            // Generation 0 is skipped so a handle never looks like a bare slot
            next_generation: 1,
        }
    }

    /// Insert a value, returning `None` if the table cannot address more slots
    pub fn insert(&mut self, value: T) -> Option<Handle> {
        let generation = self.next_generation;
        let handle = Handle::new(self.slab.vacant_key(), generation)?;

        // 31 bits keep the handle positive as an i64
        self.next_generation = (self.next_generation.wrapping_add(1) & 0x7FFF_FFFF).max(1);
        self.slab.insert(Entry { generation, value });
        Some(handle)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slab
            .get(handle.slot())
            .filter(|entry| entry.generation == handle.generation())
            .map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slab
            .get_mut(handle.slot())
            .filter(|entry| entry.generation == handle.generation())
            .map(|entry| &mut entry.value)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        self.get(handle)?;
        self.slab.try_remove(handle.slot()).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    /// Remove every entry
    pub fn drain(&mut self) -> Vec<T> {
        self.slab.drain().map(|entry| entry.value).collect()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
