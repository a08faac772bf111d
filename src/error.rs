//! Error types for the publishing core
//!
//! Every error maps onto one stable, negative status code so it can cross the
//! handle-based call boundary. The codes are part of the public contract:
//!
//! ```text
//! -1  InvalidHandle    unknown, closed or stale handle
//! -2  NotConnected     media or metadata sent in the wrong state
//! -3  HandshakeFailed  TCP connect, handshake or command setup failed
//! -4  ServerRejected   _error / failing onStatus from the server
//! -5  BufferError      null address, bad length, lock misuse
//! -6  QueueFull        send queue at capacity
//! -7  TransportError   I/O failure after the connection was established
//! -8  InvalidArgument  malformed URL or metadata
//! -9  Panic            panic caught at the foreign-call boundary
//! ```

use std::io;
use std::sync::Arc;

/// Stable status codes returned across the foreign-call boundary
pub mod code {
    pub const OK: i32 = 0;
    pub const INVALID_HANDLE: i32 = -1;
    pub const NOT_CONNECTED: i32 = -2;
    pub const HANDSHAKE_FAILED: i32 = -3;
    pub const SERVER_REJECTED: i32 = -4;
    pub const BUFFER_ERROR: i32 = -5;
    pub const QUEUE_FULL: i32 = -6;
    pub const TRANSPORT_ERROR: i32 = -7;
    pub const INVALID_ARGUMENT: i32 = -8;
    pub const PANIC: i32 = -9;
}

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid handle {0}")]
    InvalidHandle(i64),

    #[error("not connected (session is {0})")]
    NotConnected(&'static str),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("connection setup failed: {0}")]
    Setup(Arc<Error>),

    #[error("server rejected {command}: {code}")]
    ServerRejected { command: String, code: String },

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("send queue full ({capacity} entries)")]
    QueueFull { capacity: usize },

    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("amf error: {0}")]
    Amf(#[from] AmfError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("session closed")]
    Closed,

    #[error("panic")]
    Panic,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    /// Status code for this error
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidHandle(_) => code::INVALID_HANDLE,
            Error::NotConnected(_) => code::NOT_CONNECTED,
            Error::Handshake(_) | Error::Setup(_) => code::HANDSHAKE_FAILED,
            Error::ServerRejected { .. } => code::SERVER_REJECTED,
            Error::Buffer(_) => code::BUFFER_ERROR,
            Error::QueueFull { .. } => code::QUEUE_FULL,
            Error::Io(_) | Error::Timeout(_) | Error::Protocol(_) | Error::Amf(_) | Error::Closed => {
                code::TRANSPORT_ERROR
            }
            Error::Media(_) | Error::Url(_) | Error::InvalidArgument(_) => code::INVALID_ARGUMENT,
            Error::Panic => code::PANIC,
        }
    }

    /// Classify an error raised while a connection is being set up.
    ///
    /// Rejections and argument errors keep their identity; everything else
    /// (I/O, protocol, AMF, timeouts) is reported as a failed handshake.
    pub fn into_setup(self) -> Error {
        match self {
            Error::ServerRejected { .. }
            | Error::Handshake(_)
            | Error::Setup(_)
            | Error::Url(_)
            | Error::InvalidArgument(_) => self,
            other => Error::Setup(Arc::new(other)),
        }
    }

    /// Whether a failed write may succeed if attempted again
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            Error::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Handshake errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandshakeError {
    #[error("unsupported RTMP version {0}")]
    InvalidVersion(u8),

    #[error("peer closed the connection during the handshake")]
    ConnectionClosed,

    #[error("handshake out of sequence")]
    OutOfSequence,
}

/// Chunk and message level protocol errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),

    #[error("message of {0} bytes exceeds the limit")]
    MessageTooLarge(u32),

    #[error("continuation chunk on unknown chunk stream {0}")]
    UnknownChunkStream(u32),

    #[error("chunk stream {csid} announced {length} bytes after {received} were received")]
    LengthMismatch { csid: u32, length: u32, received: usize },

    #[error("truncated {0} message")]
    Truncated(&'static str),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
}

/// AMF0 encoding/decoding errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AmfError {
    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("unknown type marker 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("invalid utf-8 string")]
    InvalidUtf8,

    #[error("missing object end marker")]
    InvalidObjectEnd,

    #[error("invalid reference index {0}")]
    InvalidReference(u16),

    #[error("nesting too deep")]
    NestingTooDeep,
}

/// Media parsing/packetizing errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MediaError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("invalid AVC configuration")]
    InvalidAvcConfig,

    #[error("invalid AAC configuration")]
    InvalidAacConfig,

    #[error("invalid metadata: {0}")]
    InvalidMetadata(&'static str),
}

/// Borrowed-memory errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BufferError {
    #[error("null address")]
    NullAddress,

    #[error("invalid length {0}")]
    InvalidLength(i64),

    #[error("invalid offset {0}")]
    InvalidOffset(i64),

    #[error("range {offset}+{len} exceeds buffer of {size} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("unknown buffer {0}")]
    UnknownBuffer(u64),

    #[error("buffer {0} is not locked")]
    NotLocked(u64),

    #[error("buffer {0} is already locked")]
    AlreadyLocked(u64),

    #[error("buffer {0} is still locked")]
    StillLocked(u64),

    #[error("platform lock failed")]
    LockFailed,
}
