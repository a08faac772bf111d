//! H.264/AVC framing
//!
//! Encoders hand us Annex-B byte streams (NAL units separated by
//! `00 00 01` / `00 00 00 01` start codes); RTMP wants AVCC (every NAL unit
//! prefixed by its 4-byte big-endian length) plus a separate
//! AVCDecoderConfigurationRecord carrying SPS and PPS:
//!
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | 0xFC | lengthSizeMinusOne (2 bits)
//! | 0xE0 | numOfSPS (5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// NAL unit types the publisher cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    Slice = 1,
    Idr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    Aud = 9,
    Other = 0,
}

impl NaluType {
    /// Type from the first byte of a NAL unit
    pub fn from_byte(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            _ => NaluType::Other,
        }
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// Whether `data` starts with an Annex-B start code
pub fn is_annex_b(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

/// Iterator over the NAL units of an Annex-B byte stream
pub struct AnnexBIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AnnexBIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let pos = find_start_code(data, 0).map(|(_, end)| end).unwrap_or(data.len());
        Self { data, pos }
    }
}

impl<'a> Iterator for AnnexBIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.data.len() {
            let start = self.pos;
            let (end, next) = match find_start_code(self.data, start) {
                Some((code_start, code_end)) => (code_start, code_end),
                None => (self.data.len(), self.data.len()),
            };
            self.pos = next;

            // Trailing zero bytes belong to the next start code
            let mut nal = &self.data[start..end];
            while let [rest @ .., 0] = nal {
                nal = rest;
            }
            if !nal.is_empty() {
                return Some(nal);
            }
        }
        None
    }
}

/// Find the next `00 00 01` at or after `from`, returning (start, end)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some((i, i + 3));
        }
        i += 1;
    }
    None
}

/// Iterator over the NAL units of an AVCC buffer with 4-byte lengths
pub struct AvccIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AvccIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for AvccIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.data.get(self.offset..self.offset + 4)?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let start = self.offset + 4;
        let nal = self.data.get(start..start.checked_add(len)?)?;
        self.offset = start + len;
        Some(nal)
    }
}

/// Whether `data` is a well-formed sequence of 4-byte length-prefixed NAL units
fn is_avcc(data: &[u8]) -> bool {
    let mut iter = AvccIter::new(data);
    let mut count = 0;
    while iter.next().is_some() {
        count += 1;
    }
    count > 0 && iter.offset == data.len()
}

/// What [`write_avcc`] found in a frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameNals {
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
    /// NAL units written (parameter sets excluded)
    pub written: usize,
    pub has_idr: bool,
}

/// Convert a frame to AVCC, appending it to `out`.
///
/// SPS and PPS are pulled out of the stream and returned instead of being
/// written; they travel in the sequence header. Input that parses as AVCC is
/// taken as AVCC, input with start codes as Annex-B, anything else as one
/// bare NAL unit.
pub fn write_avcc(data: &[u8], out: &mut BytesMut) -> FrameNals {
    let mut found = FrameNals::default();
    out.reserve(data.len() + 16);

    let mut emit = |nal: &[u8]| match NaluType::from_byte(nal[0]) {
        NaluType::Sps => found.sps = Some(Bytes::copy_from_slice(nal)),
        NaluType::Pps => found.pps = Some(Bytes::copy_from_slice(nal)),
        kind => {
            out.put_u32(nal.len() as u32);
            out.put_slice(nal);
            found.written += 1;
            found.has_idr |= kind == NaluType::Idr;
        }
    };

    if is_avcc(data) {
        AvccIter::new(data).filter(|nal| !nal.is_empty()).for_each(&mut emit);
    } else if is_annex_b(data) {
        AnnexBIter::new(data).for_each(&mut emit);
    } else if !data.is_empty() {
        emit(data);
    }

    found
}

/// AVC decoder configuration built from one SPS and one PPS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, ...)
    pub profile: u8,
    pub compatibility: u8,
    /// AVC level times ten (31 = 3.1)
    pub level: u8,
    pub sps: Bytes,
    pub pps: Bytes,
}

impl AvcConfig {
    pub fn new(sps: Bytes, pps: Bytes) -> Result<Self> {
        if sps.len() < 4 || pps.is_empty() || NaluType::from_byte(sps[0]) != NaluType::Sps {
            return Err(MediaError::InvalidAvcConfig.into());
        }
        Ok(Self {
            profile: sps[1],
            compatibility: sps[2],
            level: sps[3],
            sps,
            pps,
        })
    }

    /// Serialize as an AVCDecoderConfigurationRecord with 4-byte NAL lengths
    pub fn to_record(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(11 + self.sps.len() + self.pps.len());
        buf.put_u8(1);
        buf.put_u8(self.profile);
        buf.put_u8(self.compatibility);
        buf.put_u8(self.level);
        buf.put_u8(0xFC | 3);
        buf.put_u8(0xE0 | 1);
        buf.put_u16(self.sps.len() as u16);
        buf.put_slice(&self.sps);
        buf.put_u8(1);
        buf.put_u16(self.pps.len() as u16);
        buf.put_slice(&self.pps);
        buf.freeze()
    }

    /// Parse an AVCDecoderConfigurationRecord (first SPS and PPS only)
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 7 || data[0] != 1 {
            return Err(MediaError::InvalidAvcConfig.into());
        }
        data.advance(5);

        let num_sps = data.get_u8() & 0x1F;
        let sps = read_parameter_set(&mut data, num_sps)?;
        if data.is_empty() {
            return Err(MediaError::InvalidAvcConfig.into());
        }
        let num_pps = data.get_u8();
        let pps = read_parameter_set(&mut data, num_pps)?;

        Self::new(sps, pps)
    }
}

fn read_parameter_set(data: &mut Bytes, count: u8) -> Result<Bytes> {
    let mut first = None;
    for _ in 0..count {
        if data.remaining() < 2 {
            return Err(MediaError::InvalidAvcConfig.into());
        }
        let len = data.get_u16() as usize;
        if data.remaining() < len {
            return Err(MediaError::InvalidAvcConfig.into());
        }
        let set = data.split_to(len);
        first.get_or_insert(set);
    }
    first.ok_or_else(|| MediaError::InvalidAvcConfig.into())
}
