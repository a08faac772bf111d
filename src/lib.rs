//! # rtmp-push
//!
//! Native RTMP publishing core for mobile encoders.
//!
//! Takes encoded H.264 and AAC frames (copied or borrowed zero-copy),
//! packages them into RTMP messages and streams them to an ingest server
//! while tracking network health.
//!
//! ## Concepts
//!
//! - **Session**: one connection publishing one stream, referenced by an
//!   opaque `i64` handle
//! - **Metadata**: stream description sent as `onMetaData` before any media
//! - **Buffer**: caller-owned memory registered for zero-copy reads
//! - **Stats**: bytes sent, smoothed round-trip time and a loss estimate
//!
//! ## Error handling
//!
//! Every error maps onto a stable negative code (see [`error::code`]). A
//! full send queue fails fast with `QueueFull` rather than blocking.
//!
//! ## Example
//!
//! ```no_run
//! use rtmp_push::media::Metadata;
//! use rtmp_push::session::SessionManager;
//!
//! # fn example(keyframe: &[u8], aac: &[u8]) -> rtmp_push::error::Result<()> {
//! let manager = SessionManager::global()?;
//! let handle = manager.open("rtmp://localhost/live/stream_key")?;
//! manager.set_metadata(handle, Metadata::from_raw(1280, 720, 2_000_000, 30, 44100, 2)?)?;
//!
//! manager.send_video(handle, keyframe, 0, true)?;
//! manager.send_audio(handle, aac, 0)?;
//!
//! let stats = manager.stats(handle)?;
//! println!("{} bytes sent, {} ms", stats.bytes_sent, stats.latency_ms);
//! manager.close(handle)?;
//! # Ok(())
//! # }
//! ```

pub mod amf;
pub mod bridge;
pub mod client;
pub mod error;
pub mod ffi;
pub mod id;
pub mod logging;
pub mod media;
pub mod protocol;
pub mod session;
pub mod stats;

pub use client::{ClientConfig, Publisher, RtmpUrl};
pub use error::{Error, Result};
pub use media::Metadata;
pub use session::{ConnectionState, SessionManager};
pub use stats::NetworkStats;
