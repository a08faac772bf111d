//! RTMP wire protocol
//!
//! Handshake, chunk stream framing and the typed messages a publisher
//! exchanges with an ingest server.

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;
pub mod writer;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use handshake::{Handshake, HandshakeRole};
pub use message::{Command, RtmpMessage, UserControlEvent};
pub use writer::{ChunkWriter, WriteReport};
