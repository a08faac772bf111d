//! Buffer bridge
//!
//! Zero-copy access to memory owned by the caller: raw regions validated
//! before use, platform buffers behind [`HardwareBuffer`], and a handle table
//! enforcing the acquire → lock → unlock → release order.

pub mod buffer;
pub mod table;

pub use buffer::{DirectMemory, HardwareBuffer, MemoryRegion};
pub use table::{BufferRef, BufferTable};
