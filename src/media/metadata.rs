//! Stream metadata and the `onMetaData` message
//!
//! The metadata is sent once, as an AMF0 data message:
//!
//! ```text
//! "@setDataFrame"  "onMetaData"  ECMA array {
//!     width, height, videocodecid, videodatarate, framerate,
//!     audiocodecid, audiodatarate, audiosamplerate, audiosamplesize,
//!     audiochannels, stereo, duration, filesize
//! }
//! ```
//!
//! Key names and their order are fixed; ingest servers and players match on
//! them.

use crate::amf::{AmfObject, AmfValue};
use crate::error::{MediaError, Result};
use crate::protocol::constants::{CMD_ON_METADATA, CMD_SET_DATA_FRAME};
use crate::protocol::RtmpMessage;

/// FLV codec id announced for H.264
const VIDEO_CODEC_ID_AVC: u32 = 7;

/// FLV sound format announced for AAC
const AUDIO_CODEC_ID_AAC: u32 = 10;

/// Nominal AAC bitrate announced in kbps
const AUDIO_DATA_RATE_KBPS: u32 = 64;

const AUDIO_SAMPLE_SIZE: u32 = 16;

/// Immutable description of the published stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    /// Video bitrate in bits per second
    pub video_bitrate: u32,
    pub frame_rate: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
}

impl Metadata {
    /// Validate values coming from the foreign-call surface
    pub fn from_raw(
        width: i32,
        height: i32,
        video_bitrate: i32,
        frame_rate: i32,
        audio_sample_rate: i32,
        audio_channels: i32,
    ) -> Result<Self> {
        let positive = |v: i32, what: &'static str| {
            u32::try_from(v)
                .ok()
                .filter(|v| *v > 0)
                .ok_or(MediaError::InvalidMetadata(what))
        };

        let metadata = Metadata {
            width: positive(width, "width")?,
            height: positive(height, "height")?,
            video_bitrate: u32::try_from(video_bitrate)
                .map_err(|_| MediaError::InvalidMetadata("video bitrate"))?,
            frame_rate: positive(frame_rate, "frame rate")?,
            audio_sample_rate: positive(audio_sample_rate, "audio sample rate")?,
            audio_channels: u8::try_from(audio_channels)
                .map_err(|_| MediaError::InvalidMetadata("audio channels"))?,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MediaError::InvalidMetadata("dimensions").into());
        }
        if self.frame_rate == 0 {
            return Err(MediaError::InvalidMetadata("frame rate").into());
        }
        if self.audio_sample_rate == 0 {
            return Err(MediaError::InvalidMetadata("audio sample rate").into());
        }
        if !(1..=7).contains(&self.audio_channels) {
            return Err(MediaError::InvalidMetadata("audio channels").into());
        }
        Ok(())
    }

    /// The `onMetaData` properties in wire order
    pub fn to_amf(&self) -> AmfObject {
        AmfObject::new()
            .with("width", self.width)
            .with("height", self.height)
            .with("videocodecid", VIDEO_CODEC_ID_AVC)
            .with("videodatarate", self.video_bitrate as f64 / 1000.0)
            .with("framerate", self.frame_rate)
            .with("audiocodecid", AUDIO_CODEC_ID_AAC)
            .with("audiodatarate", AUDIO_DATA_RATE_KBPS)
            .with("audiosamplerate", self.audio_sample_rate)
            .with("audiosamplesize", AUDIO_SAMPLE_SIZE)
            .with("audiochannels", self.audio_channels as u32)
            .with("stereo", self.audio_channels > 1)
            .with("duration", 0u32)
            .with("filesize", 0u32)
    }

    /// `@setDataFrame` data message carrying the metadata
    pub fn to_message(&self) -> RtmpMessage {
        RtmpMessage::Data(vec![
            AmfValue::from(CMD_SET_DATA_FRAME),
            AmfValue::from(CMD_ON_METADATA),
            AmfValue::EcmaArray(self.to_amf()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::amf0;

    fn hd() -> Metadata {
        Metadata::from_raw(1280, 720, 2_000_000, 30, 44100, 2).unwrap()
    }

    #[test]
    fn test_key_order() {
        let keys: Vec<_> = hd().to_amf().keys().map(str::to_string).collect();
        assert_eq!(
            keys,
            vec![
                "width",
                "height",
                "videocodecid",
                "videodatarate",
                "framerate",
                "audiocodecid",
                "audiodatarate",
                "audiosamplerate",
                "audiosamplesize",
                "audiochannels",
                "stereo",
                "duration",
                "filesize",
            ]
        );
    }

    #[test]
    fn test_values() {
        let obj = hd().to_amf();
        assert_eq!(obj.get("width"), Some(&AmfValue::Number(1280.0)));
        assert_eq!(obj.get("videodatarate"), Some(&AmfValue::Number(2000.0)));
        assert_eq!(obj.get("framerate"), Some(&AmfValue::Number(30.0)));
        assert_eq!(obj.get("audiosamplerate"), Some(&AmfValue::Number(44100.0)));
        assert_eq!(obj.get("stereo"), Some(&AmfValue::Boolean(true)));
    }

    #[test]
    fn test_message_roundtrip() {
        let message = hd().to_message();
        let raw = message.to_raw(1);
        let decoded = amf0::decode_all(&raw.payload).unwrap();

        assert_eq!(decoded[0].as_str(), Some("@setDataFrame"));
        assert_eq!(decoded[1].as_str(), Some("onMetaData"));
        assert_eq!(decoded[2], AmfValue::EcmaArray(hd().to_amf()));
    }

    #[test]
    fn test_invalid_values() {
        assert!(Metadata::from_raw(0, 720, 2_000_000, 30, 44100, 2).is_err());
        assert!(Metadata::from_raw(1280, -1, 2_000_000, 30, 44100, 2).is_err());
        assert!(Metadata::from_raw(1280, 720, -5, 30, 44100, 2).is_err());
        assert!(Metadata::from_raw(1280, 720, 2_000_000, 0, 44100, 2).is_err());
        assert!(Metadata::from_raw(1280, 720, 2_000_000, 30, 0, 2).is_err());
        assert!(Metadata::from_raw(1280, 720, 2_000_000, 30, 44100, 0).is_err());
        assert!(Metadata::from_raw(1280, 720, 2_000_000, 30, 44100, 9).is_err());
    }

    #[test]
    fn test_mono_is_not_stereo() {
        let mono = Metadata::from_raw(640, 480, 800_000, 25, 48000, 1).unwrap();
        assert_eq!(mono.to_amf().get("stereo"), Some(&AmfValue::Boolean(false)));
    }
}
