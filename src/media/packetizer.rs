//! Media packetizer
//!
//! Turns encoder output into RTMP media messages for one published stream:
//! H.264 frames become AVC video tags (with an AVC sequence header sent
//! before the first frame and whenever SPS/PPS change), AAC frames become
//! AAC audio tags (with an AAC sequence header before the first frame).
//!
//! Timestamps arrive in microseconds and leave as 32-bit milliseconds.
//! Key frames and sequence headers are flagged as sync points so the chunk
//! writer sends them with a full header.

use bytes::{BufMut, Bytes, BytesMut};

use super::aac::{strip_adts, AdtsHeader, AudioSpecificConfig};
use super::flv::{self, AacPacketType, AudioTagHeader, VideoTagHeader, VIDEO_HEADER_LEN};
use super::h264::{write_avcc, AvcConfig};
use super::metadata::Metadata;
use crate::error::{MediaError, Result};
use crate::protocol::constants::{CSID_AUDIO, CSID_VIDEO, MSG_AUDIO, MSG_VIDEO};
use crate::protocol::RawMessage;

/// Convert a microsecond presentation time to an RTMP timestamp.
///
/// Negative times clamp to zero; the result wraps at 2^32 ms.
pub fn rtmp_timestamp(timestamp_us: i64) -> u32 {
    (timestamp_us.max(0) / 1000) as u32
}

/// A message ready for the chunk writer
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub message: RawMessage,
    /// Send with a full (fmt 0) chunk header
    pub sync: bool,
}

impl Packet {
    /// Whether this carries a media frame (not a sequence header or data)
    pub fn is_frame(&self) -> bool {
        matches!(self.message.message_type, MSG_AUDIO | MSG_VIDEO) && !is_sequence_header(&self.message)
    }
}

/// Result of packetizing one frame
#[derive(Debug, Default, PartialEq)]
pub struct Packetized {
    pub packets: Vec<Packet>,
    /// The frame could not be sent (video before any SPS/PPS)
    pub dropped: bool,
}

impl Packetized {
    /// Number of media frames (sequence headers excluded) produced
    pub fn frames(&self) -> usize {
        self.packets.len() - self.headers()
    }

    fn headers(&self) -> usize {
        self.packets
            .iter()
            .filter(|p| is_sequence_header(&p.message))
            .count()
    }
}

fn is_sequence_header(msg: &RawMessage) -> bool {
    msg.payload.len() >= 2 && msg.payload[1] == 0
}

/// Per-stream packetizing state
#[derive(Debug)]
pub struct Packetizer {
    stream_id: u32,
    avc: Option<AvcConfig>,
    video_header_pending: bool,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    audio: AudioSpecificConfig,
    audio_header_sent: bool,
}

impl Packetizer {
    pub fn new(metadata: &Metadata, stream_id: u32) -> Self {
        Self {
            stream_id,
            avc: None,
            video_header_pending: false,
            sps: None,
            pps: None,
            audio: AudioSpecificConfig::lc(metadata.audio_sample_rate, metadata.audio_channels),
            audio_header_sent: false,
        }
    }

    pub fn avc_config(&self) -> Option<&AvcConfig> {
        self.avc.as_ref()
    }

    pub fn audio_config(&self) -> &AudioSpecificConfig {
        &self.audio
    }

    /// Packetize one H.264 access unit (Annex-B, AVCC or a bare NAL unit)
    pub fn video(&mut self, data: &[u8], timestamp_us: i64, keyframe: bool) -> Result<Packetized> {
        if data.is_empty() {
            return Err(MediaError::EmptyFrame.into());
        }
        let timestamp = rtmp_timestamp(timestamp_us);

        // Tag header is filled in once the frame type is known
        let mut body = BytesMut::with_capacity(VIDEO_HEADER_LEN + data.len() + 16);
        body.put_bytes(0, VIDEO_HEADER_LEN);
        let found = write_avcc(data, &mut body);

        if let Some(sps) = found.sps {
            self.sps = Some(sps);
        }
        if let Some(pps) = found.pps {
            self.pps = Some(pps);
        }
        self.update_avc_config()?;

        let mut out = Packetized::default();
        if found.written == 0 {
            // Parameter sets only
            if let Some(header) = self.take_video_header(timestamp) {
                out.packets.push(header);
            }
            return Ok(out);
        }

        if self.avc.is_none() {
            tracing::debug!(timestamp = timestamp, "Dropping video frame received before SPS/PPS");
            out.dropped = true;
            return Ok(out);
        }
        if let Some(header) = self.take_video_header(timestamp) {
            out.packets.push(header);
        }

        let keyframe = keyframe || found.has_idr;
        let mut header = BytesMut::with_capacity(VIDEO_HEADER_LEN);
        VideoTagHeader::nalu(keyframe, 0).write(&mut header);
        body[..VIDEO_HEADER_LEN].copy_from_slice(&header);
        out.packets.push(Packet {
            message: RawMessage::new(CSID_VIDEO, timestamp, MSG_VIDEO, self.stream_id, body.freeze()),
            sync: keyframe,
        });
        Ok(out)
    }

    /// Packetize one AAC frame, raw or ADTS-framed
    pub fn audio(&mut self, data: &[u8], timestamp_us: i64) -> Result<Packetized> {
        if data.is_empty() {
            return Err(MediaError::EmptyFrame.into());
        }
        let timestamp = rtmp_timestamp(timestamp_us);

        if !self.audio_header_sent {
            if let Some(adts) = AdtsHeader::parse(data) {
                if adts.config != self.audio {
                    tracing::debug!(config = ?adts.config, "Using AudioSpecificConfig from ADTS header");
                }
                self.audio = adts.config;
            }
        }

        let raw = strip_adts(data);
        if raw.is_empty() {
            return Err(MediaError::EmptyFrame.into());
        }

        let mut out = Packetized::default();
        if !self.audio_header_sent {
            self.audio_header_sent = true;
            let header = self.audio_header(AacPacketType::SequenceHeader);
            out.packets.push(Packet {
                message: self.audio_message(timestamp, flv::audio_tag(header, &self.audio.to_bytes())),
                sync: true,
            });
        }

        let header = self.audio_header(AacPacketType::Raw);
        out.packets.push(Packet {
            message: self.audio_message(timestamp, flv::audio_tag(header, raw)),
            sync: false,
        });
        Ok(out)
    }

    fn update_avc_config(&mut self) -> Result<()> {
        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return Ok(());
        };
        let changed = match &self.avc {
            Some(current) => current.sps != *sps || current.pps != *pps,
            None => true,
        };
        if changed {
            let config = AvcConfig::new(sps.clone(), pps.clone())?;
            tracing::debug!(
                profile = config.profile,
                level = config.level,
                "AVC decoder configuration updated"
            );
            self.avc = Some(config);
            self.video_header_pending = true;
        }
        Ok(())
    }

    fn take_video_header(&mut self, timestamp: u32) -> Option<Packet> {
        if !self.video_header_pending {
            return None;
        }
        let config = self.avc.as_ref()?;
        self.video_header_pending = false;

        let payload = flv::video_tag(VideoTagHeader::sequence_header(), &config.to_record());
        Some(Packet {
            message: RawMessage::new(CSID_VIDEO, timestamp, MSG_VIDEO, self.stream_id, payload),
            sync: true,
        })
    }

    fn audio_header(&self, packet_type: AacPacketType) -> AudioTagHeader {
        AudioTagHeader {
            sound_rate: self.audio.sound_rate(),
            stereo: self.audio.is_stereo(),
            packet_type,
        }
    }

    fn audio_message(&self, timestamp: u32, payload: Bytes) -> RawMessage {
        RawMessage::new(CSID_AUDIO, timestamp, MSG_AUDIO, self.stream_id, payload)
    }
}
