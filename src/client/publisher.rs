//! RTMP stream publisher
//!
//! Safe, owning wrapper over one session handle for Rust callers.

use crate::error::Result;
use crate::media::Metadata;
use crate::session::{ConnectionState, SessionManager};
use crate::stats::NetworkStats;

/// One published stream, closed on drop
///
/// # Example
/// ```no_run
/// use rtmp_push::client::Publisher;
/// use rtmp_push::media::Metadata;
/// use rtmp_push::session::SessionManager;
///
/// # fn example(frame: &[u8]) -> rtmp_push::error::Result<()> {
/// let manager = SessionManager::global()?;
/// let publisher = Publisher::open(manager, "rtmp://localhost/live/stream_key")?;
/// publisher.set_metadata(Metadata::from_raw(1280, 720, 2_000_000, 30, 44100, 2)?)?;
/// publisher.send_video(frame, 0, true)?;
/// publisher.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Publisher<'a> {
    manager: &'a SessionManager,
    handle: i64,
    closed: bool,
}

impl<'a> Publisher<'a> {
    /// Connect and start publishing
    pub fn open(manager: &'a SessionManager, url: &str) -> Result<Self> {
        let handle = manager.open(url)?;
        Ok(Self {
            manager,
            handle,
            closed: false,
        })
    }

    pub fn handle(&self) -> i64 {
        self.handle
    }

    pub fn set_metadata(&self, metadata: Metadata) -> Result<()> {
        self.manager.set_metadata(self.handle, metadata)
    }

    /// Send an H.264 access unit. `timestamp_us` is in microseconds.
    pub fn send_video(&self, data: &[u8], timestamp_us: i64, keyframe: bool) -> Result<()> {
        self.manager
            .send_video(self.handle, data, timestamp_us, keyframe)
    }

    /// Send an AAC frame (raw or ADTS). `timestamp_us` is in microseconds.
    pub fn send_audio(&self, data: &[u8], timestamp_us: i64) -> Result<()> {
        self.manager.send_audio(self.handle, data, timestamp_us)
    }

    pub fn stats(&self) -> Result<NetworkStats> {
        self.manager.stats(self.handle)
    }

    pub fn state(&self) -> Result<ConnectionState> {
        self.manager.state(self.handle)
    }

    /// Stop publishing, waiting a bounded time for queued data
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.manager.close(self.handle)
    }
}

impl Drop for Publisher<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.manager.close(self.handle) {
            tracing::debug!(handle = self.handle, error = %err, "Close on drop failed");
        }
    }
}
