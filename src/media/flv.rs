//! FLV tag headers
//!
//! An RTMP audio/video message body is an FLV tag body: a codec header
//! followed by codec data.
//!
//! RTMP Video Data (AVC):
//! ```text
//! +-----------+---------+------------+-----------------+---------
//! | FrameType | CodecID | PacketType | CompositionTime | Data...
//! | (4 bits)  | (4 bits)| (1 byte)   | (3 bytes, SI24) |
//! +-----------+---------+------------+-----------------+---------
//! ```
//!
//! RTMP Audio Data (AAC):
//! ```text
//! +-------------+-----------+-----------+-----------+------------+---------
//! | SoundFormat | SoundRate | SoundSize | SoundType | PacketType | Data...
//! | (4 bits)    | (2 bits)  | (1 bit)   | (1 bit)   | (1 byte)   |
//! +-------------+-----------+-----------+-----------+------------+---------
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Codec id of AVC/H.264 in the video header
pub const CODEC_AVC: u8 = 7;

/// Sound format of AAC in the audio header
pub const SOUND_FORMAT_AAC: u8 = 10;

/// Size of the AVC video tag header
pub const VIDEO_HEADER_LEN: usize = 5;

/// Size of the AAC audio tag header
pub const AUDIO_HEADER_LEN: usize = 2;

/// Video frame type (upper 4 bits of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Seekable frame (IDR for AVC)
    Keyframe = 1,
    InterFrame = 2,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b >> 4 {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            _ => None,
        }
    }
}

/// AVC packet type (second byte of an AVC video tag)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// AVCDecoderConfigurationRecord
    SequenceHeader = 0,
    /// One or more length-prefixed NAL units
    Nalu = 1,
    EndOfSequence = 2,
}

/// AAC packet type (second byte of an AAC audio tag)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// AudioSpecificConfig
    SequenceHeader = 0,
    Raw = 1,
}

/// Sound rate field.
///
/// For AAC the field is informational (decoders read the real rate from the
/// AudioSpecificConfig) but servers and players still look at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundRate {
    Rate5512 = 0,
    Rate11025 = 1,
    Rate22050 = 2,
    Rate44100 = 3,
}

impl SoundRate {
    pub fn from_byte(b: u8) -> Self {
        match (b >> 2) & 0x03 {
            0 => SoundRate::Rate5512,
            1 => SoundRate::Rate11025,
            2 => SoundRate::Rate22050,
            _ => SoundRate::Rate44100,
        }
    }

    pub fn to_hz(self) -> u32 {
        match self {
            SoundRate::Rate5512 => 5512,
            SoundRate::Rate11025 => 11025,
            SoundRate::Rate22050 => 22050,
            SoundRate::Rate44100 => 44100,
        }
    }
}

/// Header of an AVC video tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTagHeader {
    pub frame_type: VideoFrameType,
    pub packet_type: AvcPacketType,
    /// Presentation minus decode time in milliseconds
    pub composition_time: i32,
}

impl VideoTagHeader {
    pub fn sequence_header() -> Self {
        Self {
            frame_type: VideoFrameType::Keyframe,
            packet_type: AvcPacketType::SequenceHeader,
            composition_time: 0,
        }
    }

    pub fn nalu(keyframe: bool, composition_time: i32) -> Self {
        Self {
            frame_type: if keyframe {
                VideoFrameType::Keyframe
            } else {
                VideoFrameType::InterFrame
            },
            packet_type: AvcPacketType::Nalu,
            composition_time,
        }
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8((self.frame_type as u8) << 4 | CODEC_AVC);
        buf.put_u8(self.packet_type as u8);
        let cts = self.composition_time.clamp(-0x80_0000, 0x7F_FFFF) as u32;
        buf.put_u8((cts >> 16) as u8);
        buf.put_u8((cts >> 8) as u8);
        buf.put_u8(cts as u8);
    }

    /// Parse the first five bytes of an AVC video tag
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < VIDEO_HEADER_LEN || data[0] & 0x0F != CODEC_AVC {
            return None;
        }
        let frame_type = VideoFrameType::from_byte(data[0])?;
        let packet_type = match data[1] {
            0 => AvcPacketType::SequenceHeader,
            1 => AvcPacketType::Nalu,
            2 => AvcPacketType::EndOfSequence,
            _ => return None,
        };
        // Sign-extend the 24-bit field
        let raw = (data[2] as i32) << 16 | (data[3] as i32) << 8 | data[4] as i32;
        let composition_time = (raw << 8) >> 8;
        Some(Self {
            frame_type,
            packet_type,
            composition_time,
        })
    }
}

/// Header of an AAC audio tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTagHeader {
    pub sound_rate: SoundRate,
    pub stereo: bool,
    pub packet_type: AacPacketType,
}

impl AudioTagHeader {
    /// First byte: format, rate, 16-bit samples, channel layout
    pub fn flags(&self) -> u8 {
        SOUND_FORMAT_AAC << 4 | (self.sound_rate as u8) << 2 | 1 << 1 | self.stereo as u8
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.packet_type as u8);
    }

    /// Parse the first two bytes of an AAC audio tag
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < AUDIO_HEADER_LEN || data[0] >> 4 != SOUND_FORMAT_AAC {
            return None;
        }
        let packet_type = match data[1] {
            0 => AacPacketType::SequenceHeader,
            1 => AacPacketType::Raw,
            _ => return None,
        };
        Some(Self {
            sound_rate: SoundRate::from_byte(data[0]),
            stereo: data[0] & 0x01 == 1,
            packet_type,
        })
    }
}

/// Build a complete video tag body
pub fn video_tag(header: VideoTagHeader, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(VIDEO_HEADER_LEN + body.len());
    header.write(&mut buf);
    buf.put_slice(body);
    buf.freeze()
}

/// Build a complete audio tag body
pub fn audio_tag(header: AudioTagHeader, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(AUDIO_HEADER_LEN + body.len());
    header.write(&mut buf);
    buf.put_slice(body);
    buf.freeze()
}
