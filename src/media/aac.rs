//! AAC framing
//!
//! RTMP carries raw AAC access units. Encoders often produce ADTS streams,
//! where every frame starts with a 7-byte header (9 with CRC) that has to be
//! removed; the decoder parameters travel once, as an AudioSpecificConfig in
//! the AAC sequence header.
//!
//! AudioSpecificConfig (the two-byte form used for AAC-LC):
//! ```text
//! audioObjectType (5 bits) | samplingFrequencyIndex (4 bits)
//! | channelConfiguration (4 bits) | frameLength/dependsOnCore/extension (3 bits)
//! ```

use crate::error::{MediaError, Result};
use crate::media::flv::SoundRate;

/// Sampling frequencies by index (ISO 14496-3 table 1.18)
const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Index used when a rate is not in the table (44.1 kHz)
const DEFAULT_FREQUENCY_INDEX: u8 = 4;

/// Audio object type of AAC-LC
pub const OBJECT_TYPE_AAC_LC: u8 = 2;

/// Table index of an exact sampling rate
pub fn sampling_frequency_index(hz: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&f| f == hz)
        .map(|i| i as u8)
}

/// AudioSpecificConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    /// 1 = mono, 2 = stereo, ...
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    /// AAC-LC config for a sample rate and channel count.
    ///
    /// Rates outside the standard table fall back to 44.1 kHz.
    pub fn lc(sample_rate: u32, channels: u8) -> Self {
        Self {
            audio_object_type: OBJECT_TYPE_AAC_LC,
            sampling_frequency_index: sampling_frequency_index(sample_rate)
                .unwrap_or(DEFAULT_FREQUENCY_INDEX),
            channel_configuration: channels.min(7),
        }
    }

    /// Parse the first two bytes of an AudioSpecificConfig
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacConfig.into());
        }
        let audio_object_type = data[0] >> 3;
        let sampling_frequency_index = (data[0] & 0x07) << 1 | data[1] >> 7;
        if audio_object_type == 0 || sampling_frequency_index as usize >= SAMPLING_FREQUENCIES.len() {
            return Err(MediaError::InvalidAacConfig.into());
        }
        Ok(Self {
            audio_object_type,
            sampling_frequency_index,
            channel_configuration: (data[1] >> 3) & 0x0F,
        })
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [
            self.audio_object_type << 3 | self.sampling_frequency_index >> 1,
            (self.sampling_frequency_index & 0x01) << 7 | self.channel_configuration << 3,
        ]
    }

    pub fn sampling_frequency(&self) -> u32 {
        SAMPLING_FREQUENCIES
            .get(self.sampling_frequency_index as usize)
            .copied()
            .unwrap_or(44100)
    }

    /// Rate code for the FLV audio header: 44 kHz down to 32 kHz, 22 kHz below
    pub fn sound_rate(&self) -> SoundRate {
        if self.sampling_frequency_index >= 6 {
            SoundRate::Rate22050
        } else {
            SoundRate::Rate44100
        }
    }

    pub fn is_stereo(&self) -> bool {
        self.channel_configuration > 1
    }
}

/// Fixed part of an ADTS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// 7, or 9 when a CRC follows
    pub header_len: usize,
    pub config: AudioSpecificConfig,
}

impl AdtsHeader {
    /// Parse the ADTS header at the start of `data`, if there is one
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 7 || data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return None;
        }
        let protection_absent = data[1] & 0x01 == 1;
        let profile = data[2] >> 6;
        let sampling_frequency_index = (data[2] >> 2) & 0x0F;
        let channel_configuration = (data[2] & 0x01) << 2 | data[3] >> 6;

        Some(Self {
            header_len: if protection_absent { 7 } else { 9 },
            config: AudioSpecificConfig {
                audio_object_type: profile + 1,
                sampling_frequency_index,
                channel_configuration,
            },
        })
    }
}

/// Raw AAC payload of `data`, with any ADTS header removed
pub fn strip_adts(data: &[u8]) -> &[u8] {
    match AdtsHeader::parse(data) {
        Some(header) if data.len() >= header.header_len => &data[header.header_len..],
        _ => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adts(payload: &[u8]) -> Vec<u8> {
        // AAC-LC, 44.1 kHz, stereo, no CRC
        let frame_len = payload.len() + 7;
        let mut out = vec![
            0xFF,
            0xF1,
            (1 << 6) | (4 << 2),
            (2 << 6) | ((frame_len >> 11) & 0x03) as u8,
            ((frame_len >> 3) & 0xFF) as u8,
            (((frame_len & 0x07) << 5) | 0x1F) as u8,
            0xFC,
        ];
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_lc_stereo_44100() {
        let asc = AudioSpecificConfig::lc(44100, 2);
        assert_eq!(asc.to_bytes(), [0x12, 0x10]);
        assert_eq!(asc.sound_rate(), SoundRate::Rate44100);
        assert!(asc.is_stereo());
    }

    #[test]
    fn test_lc_mono_48000() {
        let asc = AudioSpecificConfig::lc(48000, 1);
        assert_eq!(asc.to_bytes(), [0x11, 0x88]);
        assert!(!asc.is_stereo());
    }

    #[test]
    fn test_unknown_rate_falls_back() {
        let asc = AudioSpecificConfig::lc(45000, 2);
        assert_eq!(asc.sampling_frequency(), 44100);
    }

    #[test]
    fn test_low_rates_use_22k_code() {
        assert_eq!(AudioSpecificConfig::lc(32000, 1).sound_rate(), SoundRate::Rate44100);
        assert_eq!(AudioSpecificConfig::lc(24000, 1).sound_rate(), SoundRate::Rate22050);
        assert_eq!(AudioSpecificConfig::lc(8000, 1).sound_rate(), SoundRate::Rate22050);
    }

    #[test]
    fn test_parse_roundtrip() {
        let asc = AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap();
        assert_eq!(asc.audio_object_type, OBJECT_TYPE_AAC_LC);
        assert_eq!(asc.sampling_frequency(), 44100);
        assert_eq!(asc.channel_configuration, 2);

        assert!(AudioSpecificConfig::parse(&[0x12]).is_err());
        assert!(AudioSpecificConfig::parse(&[0x17, 0x90]).is_err());
    }

    #[test]
    fn test_adts_header_parse() {
        let frame = adts(&[1, 2, 3]);
        let header = AdtsHeader::parse(&frame).unwrap();
        assert_eq!(header.header_len, 7);
        assert_eq!(header.config, AudioSpecificConfig::lc(44100, 2));
    }

    #[test]
    fn test_strip_adts() {
        let frame = adts(&[0x21, 0x10, 0x05]);
        assert_eq!(strip_adts(&frame), &[0x21, 0x10, 0x05]);

        let raw = [0x21, 0x10, 0x05];
        assert_eq!(strip_adts(&raw), &raw);
    }

    #[test]
    fn test_strip_adts_with_crc() {
        let mut frame = adts(&[0, 0, 0xAA]);
        frame[1] = 0xF0;
        assert_eq!(strip_adts(&frame), &[0xAA]);
    }

    #[test]
    fn test_sampling_frequency_index() {
        assert_eq!(sampling_frequency_index(96000), Some(0));
        assert_eq!(sampling_frequency_index(44100), Some(4));
        assert_eq!(sampling_frequency_index(7350), Some(12));
        assert_eq!(sampling_frequency_index(12345), None);
    }
}
