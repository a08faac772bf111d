//! Session manager
//!
//! Maps opaque handles to publishing sessions. Every call is synchronous and
//! may come from any thread; network I/O happens on a shared tokio runtime,
//! in one worker task per session.
//!
//! Send calls packetize on the caller's thread and hand the result to the
//! worker through a bounded queue. A full queue fails the call with
//! [`Error::QueueFull`] instead of blocking. Payload bytes are always copied
//! before the call returns, so borrowed memory is never read after that.

use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Runtime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Permit};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::state::ConnectionState;
use super::worker::{self, Outgoing, Shared};
use crate::bridge::MemoryRegion;
use crate::client::{connector, ClientConfig, RtmpUrl};
use crate::error::{Error, Result};
use crate::id::{Handle, HandleTable};
use crate::media::{Metadata, Packet, Packetized, Packetizer};
use crate::stats::NetworkStats;

static GLOBAL: LazyLock<Result<SessionManager>> =
    LazyLock::new(|| SessionManager::new(ClientConfig::default()));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every open session
pub struct SessionManager {
    runtime: Runtime,
    config: ClientConfig,
    sessions: Mutex<HandleTable<Arc<Session>>>,
}

struct Session {
    url: RtmpUrl,
    stream_id: u32,
    shared: Arc<Shared>,
    inner: Mutex<Inner>,
}

struct Inner {
    metadata: Option<Metadata>,
    packetizer: Option<Packetizer>,
    tx: mpsc::Sender<Outgoing>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("rtmp-push")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            config,
            sessions: Mutex::new(HandleTable::new()),
        })
    }

    /// Process-wide manager with the default configuration
    pub fn global() -> Result<&'static SessionManager> {
        GLOBAL.as_ref().map_err(Clone::clone)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to `url` and start publishing.
    ///
    /// Blocks until the server acknowledged `publish`, or the setup failed.
    /// Must not be called from inside an async context.
    pub fn open(&self, url: &str) -> Result<i64> {
        let url = RtmpUrl::parse(url)?;
        let shared = Arc::new(Shared::default());
        shared.state.transition(ConnectionState::Handshaking);

        let conn = match self
            .runtime
            .block_on(connector::connect(&url, &self.config, shared.stats.clone()))
        {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(url = %url.tc_url, error = %err, "Failed to open session");
                shared.state.fail(err.clone());
                return Err(err);
            }
        };
        shared.state.transition(ConnectionState::MetadataPending);

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let session = Arc::new(Session {
            stream_id: conn.stream_id(),
            url,
            shared: shared.clone(),
            inner: Mutex::new(Inner {
                metadata: None,
                packetizer: None,
                tx,
                shutdown: Some(shutdown_tx),
                task: None,
            }),
        });

        let handle = lock(&self.sessions)
            .insert(session.clone())
            .ok_or_else(|| Error::InvalidArgument("too many open sessions".into()))?;

        let span = tracing::info_span!("session", handle = %handle);
        let task = self
            .runtime
            .spawn(worker::run(conn, rx, shutdown_rx, shared).instrument(span));
        lock(&session.inner).task = Some(task);

        tracing::info!(
            handle = %handle,
            app = %session.url.app,
            stream_id = session.stream_id,
            "Session opened"
        );
        Ok(handle.into())
    }

    /// Accept the stream metadata and send `onMetaData`.
    ///
    /// Repeating the same metadata is a no-op; different metadata is refused.
    pub fn set_metadata(&self, handle: i64, metadata: Metadata) -> Result<()> {
        metadata.validate()?;
        let session = self.session(handle)?;
        let mut guard = lock(&session.inner);
        let inner = &mut *guard;

        if let Some(current) = inner.metadata {
            session.shared.state.require(ConnectionState::Streaming)?;
            if current == metadata {
                return Ok(());
            }
            return Err(Error::InvalidArgument("metadata already set".into()));
        }
        session
            .shared
            .state
            .require(ConnectionState::MetadataPending)?;

        let permit = session.reserve(&inner.tx)?;
        let message = metadata.to_message().to_raw(session.stream_id);
        permit.send(Outgoing {
            packets: vec![Packet {
                message,
                sync: true,
            }],
        });
        session.shared.stats.queue_push(1);

        inner.metadata = Some(metadata);
        inner.packetizer = Some(Packetizer::new(&metadata, session.stream_id));
        session.shared.state.transition(ConnectionState::Streaming);
        tracing::debug!(
            handle = handle,
            width = metadata.width,
            height = metadata.height,
            "Metadata queued"
        );
        Ok(())
    }

    /// Queue one H.264 access unit (copied before returning)
    pub fn send_video(&self, handle: i64, data: &[u8], timestamp_us: i64, keyframe: bool) -> Result<()> {
        self.session(handle)?
            .enqueue(|packetizer| packetizer.video(data, timestamp_us, keyframe))
    }

    /// Queue one AAC frame (raw or ADTS, copied before returning)
    pub fn send_audio(&self, handle: i64, data: &[u8], timestamp_us: i64) -> Result<()> {
        self.session(handle)?
            .enqueue(|packetizer| packetizer.audio(data, timestamp_us))
    }

    /// [`send_video`](Self::send_video) reading `size` bytes at `addr + offset`.
    ///
    /// The region is validated before anything is read.
    ///
    /// # Safety
    /// The memory must stay readable and unchanged until the call returns.
    pub unsafe fn send_video_zero_copy(
        &self,
        handle: i64,
        addr: i64,
        offset: i64,
        size: i64,
        timestamp_us: i64,
        keyframe: bool,
    ) -> Result<()> {
        let region = MemoryRegion::at_offset(addr, offset, size)?;
        let session = self.session(handle)?;
        session.enqueue(|packetizer| {
            packetizer.video(unsafe { region.as_slice() }, timestamp_us, keyframe)
        })
    }

    /// [`send_audio`](Self::send_audio) reading `size` bytes at `addr + offset`.
    ///
    /// # Safety
    /// The memory must stay readable and unchanged until the call returns.
    pub unsafe fn send_audio_zero_copy(
        &self,
        handle: i64,
        addr: i64,
        offset: i64,
        size: i64,
        timestamp_us: i64,
    ) -> Result<()> {
        let region = MemoryRegion::at_offset(addr, offset, size)?;
        let session = self.session(handle)?;
        session.enqueue(|packetizer| packetizer.audio(unsafe { region.as_slice() }, timestamp_us))
    }

    /// Latest statistics; never waits for the worker
    pub fn stats(&self, handle: i64) -> Result<NetworkStats> {
        Ok(self.session(handle)?.shared.stats.snapshot())
    }

    pub fn state(&self, handle: i64) -> Result<ConnectionState> {
        Ok(self.session(handle)?.shared.state.get())
    }

    /// Stop publishing and release the session.
    ///
    /// Queued messages get `shutdown_timeout` to drain before the worker is
    /// aborted. The handle is invalid afterwards; closing it again returns
    /// [`Error::InvalidHandle`].
    pub fn close(&self, handle: i64) -> Result<()> {
        let id = parse_handle(handle)?;
        let session = lock(&self.sessions)
            .remove(id)
            .ok_or(Error::InvalidHandle(handle))?;

        session.shared.state.transition(ConnectionState::Closing);
        let task = {
            let mut inner = lock(&session.inner);
            if let Some(shutdown) = inner.shutdown.take() {
                let _ = shutdown.send(());
            }
            inner.packetizer = None;
            inner.task.take()
        };

        if let Some(mut task) = task {
            let limit = self.config.shutdown_timeout;
            let finished = self
                .runtime
                .block_on(async { tokio::time::timeout(limit, &mut task).await.is_ok() });
            if !finished {
                tracing::warn!(handle = handle, "Session did not drain in time, aborting");
                task.abort();
            }
        }
        session.shared.state.transition(ConnectionState::Closed);

        tracing::info!(handle = handle, "Session released");
        Ok(())
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn session(&self, handle: i64) -> Result<Arc<Session>> {
        let id = parse_handle(handle)?;
        lock(&self.sessions)
            .get(id)
            .cloned()
            .ok_or(Error::InvalidHandle(handle))
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let sessions = lock(&self.sessions).drain();
        for session in sessions {
            if let Some(shutdown) = lock(&session.inner).shutdown.take() {
                let _ = shutdown.send(());
            }
        }
    }
}

fn parse_handle(handle: i64) -> Result<Handle> {
    Handle::try_from(handle).map_err(|_| Error::InvalidHandle(handle))
}

impl Session {
    /// Reserve a queue slot, or fail fast
    fn reserve<'a>(&self, tx: &'a mpsc::Sender<Outgoing>) -> Result<Permit<'a, Outgoing>> {
        match tx.try_reserve() {
            Ok(permit) => Ok(permit),
            Err(TrySendError::Full(())) => {
                self.shared.stats.record_rejected();
                tracing::warn!(stream_id = self.stream_id, "Send queue full");
                Err(Error::QueueFull {
                    capacity: tx.max_capacity(),
                })
            }
            Err(TrySendError::Closed(())) => {
                Err(self.shared.state.failure().unwrap_or(Error::Closed))
            }
        }
    }

    /// Packetize on the caller's thread and queue the result.
    ///
    /// The queue slot is reserved first so a full queue leaves the
    /// packetizer untouched.
    fn enqueue<F>(&self, packetize: F) -> Result<()>
    where
        F: FnOnce(&mut Packetizer) -> Result<Packetized>,
    {
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        self.shared.state.require(ConnectionState::Streaming)?;
        let packetizer = inner
            .packetizer
            .as_mut()
            .ok_or(Error::NotConnected(ConnectionState::MetadataPending.name()))?;

        let permit = self.reserve(&inner.tx)?;
        let packetized = packetize(packetizer)?;
        if packetized.dropped {
            self.shared.stats.record_dropped();
            tracing::warn!(stream_id = self.stream_id, "Dropping video frame before SPS/PPS");
        }
        if packetized.packets.is_empty() {
            return Ok(());
        }

        permit.send(Outgoing {
            packets: packetized.packets,
        });
        self.shared.stats.queue_push(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;

    fn manager() -> SessionManager {
        SessionManager::new(ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_unknown_handles() {
        let manager = manager();
        for handle in [0, -1, 1, 1 << 32, i64::MAX] {
            assert_eq!(manager.stats(handle).unwrap_err().code(), code::INVALID_HANDLE);
            assert_eq!(manager.close(handle).unwrap_err().code(), code::INVALID_HANDLE);
            assert_eq!(
                manager.send_video(handle, &[0, 0, 0, 1, 0x65], 0, true).unwrap_err().code(),
                code::INVALID_HANDLE
            );
        }
        assert!(manager.is_empty());
    }

    #[test]
    fn test_zero_copy_validates_before_lookup() {
        let manager = manager();
        let err = unsafe { manager.send_video_zero_copy(1, 0, 0, 16, 0, true) }.unwrap_err();
        assert_eq!(err.code(), code::BUFFER_ERROR);
        let err = unsafe { manager.send_audio_zero_copy(1, 0x1000, 0, 0, 0) }.unwrap_err();
        assert_eq!(err.code(), code::BUFFER_ERROR);
    }

    #[test]
    fn test_open_rejects_bad_url() {
        let manager = manager();
        assert_eq!(manager.open("http://host/app/key").unwrap_err().code(), code::INVALID_ARGUMENT);
        assert_eq!(manager.open("rtmp://host").unwrap_err().code(), code::INVALID_ARGUMENT);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_open_unreachable_server() {
        let manager = SessionManager::new(
            ClientConfig::default().setup_timeout(std::time::Duration::from_millis(500)),
        )
        .unwrap();
        // Nothing listens on the discard port of localhost
        let err = manager.open("rtmp://127.0.0.1:9/live/key").unwrap_err();
        assert_eq!(err.code(), code::HANDSHAKE_FAILED);
        assert!(manager.is_empty());
    }
}
