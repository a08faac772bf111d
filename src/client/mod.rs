//! RTMP publishing client
//!
//! Configuration, URL parsing and the connection that performs the
//! handshake and publish sequence against an ingest server.

pub mod config;
pub mod connector;
pub mod publisher;

pub use config::{ClientConfig, RtmpUrl};
pub use connector::Connection;
pub use publisher::Publisher;
