//! Media handling for RTMP publishing
//!
//! This module provides:
//! - FLV audio/video tag headers
//! - H.264 Annex-B to AVCC conversion and the AVC decoder configuration
//! - AAC AudioSpecificConfig and ADTS stripping
//! - Stream metadata (`onMetaData`)
//! - The per-stream packetizer tying these together

pub mod aac;
pub mod flv;
pub mod h264;
pub mod metadata;
pub mod packetizer;

pub use aac::AudioSpecificConfig;
pub use flv::{AacPacketType, AvcPacketType, SoundRate, VideoFrameType};
pub use h264::{AvcConfig, NaluType};
pub use metadata::Metadata;
pub use packetizer::{rtmp_timestamp, Packet, Packetized, Packetizer};
