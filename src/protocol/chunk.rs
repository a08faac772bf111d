//! RTMP chunk stream framing
//!
//! Messages are split into chunks no larger than the negotiated chunk size.
//! Each chunk starts with a basic header (format + chunk stream id) followed
//! by a message header whose size depends on the format:
//!
//! ```text
//! fmt 0  11 bytes  timestamp(3) length(3) type(1) stream id(4, little-endian)
//! fmt 1   7 bytes  timestamp delta(3) length(3) type(1)
//! fmt 2   3 bytes  timestamp delta(3)
//! fmt 3   0 bytes  continuation of the previous header
//! ```
//!
//! A timestamp field of 0xFFFFFF means a 4-byte extended timestamp follows
//! the message header, and is repeated on every fmt 3 chunk of that message.
//!
//! The encoder only produces fmt 0 (first message on a chunk stream, stream
//! switch, timestamp going backwards, forced sync points) and fmt 1 (delta
//! from the previous message), plus fmt 3 continuations. The decoder accepts
//! all four formats.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::{DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE};
use crate::error::{ProtocolError, Result};

/// A complete, unchunked RTMP message
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Chunk stream the message travels on
    pub csid: u32,
    /// Absolute timestamp in milliseconds
    pub timestamp: u32,
    /// Message type id
    pub message_type: u8,
    /// Message stream id (0 for connection-level messages)
    pub stream_id: u32,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(csid: u32, timestamp: u32, message_type: u8, stream_id: u32, payload: Bytes) -> Self {
        Self {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload,
        }
    }
}

/// Last header sent on one chunk stream
#[derive(Debug, Clone, Copy)]
struct OutgoingHeader {
    timestamp: u32,
    stream_id: u32,
}

/// Splits messages into chunks
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, OutgoingHeader>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Outgoing chunk size in effect
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Switch to a new outgoing chunk size.
    ///
    /// Must only be called after the Set Chunk Size message announcing it
    /// has been encoded.
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Encode `msg`, picking the most compact header the receiver can
    /// reconstruct.
    pub fn encode(&mut self, msg: &RawMessage, buf: &mut BytesMut) {
        self.encode_inner(msg, false, buf)
    }

    /// Encode `msg` with a full fmt 0 header, resynchronising the chunk
    /// stream on an absolute timestamp (used for key frames).
    pub fn encode_sync(&mut self, msg: &RawMessage, buf: &mut BytesMut) {
        self.encode_inner(msg, true, buf)
    }

    fn encode_inner(&mut self, msg: &RawMessage, force_full: bool, buf: &mut BytesMut) {
        let length = msg.payload.len() as u32;
        let previous = self.streams.get(&msg.csid).copied();

        let (fmt, ts_field) = match previous {
            Some(prev)
                if !force_full
                    && prev.stream_id == msg.stream_id
                    && msg.timestamp >= prev.timestamp =>
            {
                (1u8, msg.timestamp - prev.timestamp)
            }
            _ => (0u8, msg.timestamp),
        };
        let extended = ts_field >= EXTENDED_TIMESTAMP;

        buf.reserve(msg.payload.len() + 18);
        write_basic_header(buf, fmt, msg.csid);
        put_u24(buf, ts_field.min(EXTENDED_TIMESTAMP));
        put_u24(buf, length);
        buf.put_u8(msg.message_type);
        if fmt == 0 {
            buf.put_u32_le(msg.stream_id);
        }
        if extended {
            buf.put_u32(ts_field);
        }

        let chunk_size = self.chunk_size as usize;
        let mut chunks = msg.payload.chunks(chunk_size.max(1));
        if let Some(first) = chunks.next() {
            buf.put_slice(first);
        }
        for chunk in chunks {
            write_basic_header(buf, 3, msg.csid);
            if extended {
                buf.put_u32(ts_field);
            }
            buf.put_slice(chunk);
        }

        self.streams.insert(
            msg.csid,
            OutgoingHeader {
                timestamp: msg.timestamp,
                stream_id: msg.stream_id,
            },
        );
    }

    /// Forget header state for every chunk stream.
    pub fn reset(&mut self) {
        self.streams.clear();
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) {
    let fmt = fmt << 6;
    match csid {
        0..=63 => buf.put_u8(fmt | csid as u8),
        64..=319 => {
            buf.put_u8(fmt);
            buf.put_u8((csid - 64) as u8);
        }
        _ => {
            let id = csid - 64;
            buf.put_u8(fmt | 1);
            buf.put_u8((id & 0xFF) as u8);
            buf.put_u8(((id >> 8) & 0xFF) as u8);
        }
    }
}

fn put_u24(buf: &mut BytesMut, v: u32) {
    buf.put_u8((v >> 16) as u8);
    buf.put_u8((v >> 8) as u8);
    buf.put_u8(v as u8);
}

fn read_u24(b: &[u8]) -> u32 {
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

/// Reassembly state of one incoming chunk stream
#[derive(Debug, Default)]
struct IncomingStream {
    timestamp: u32,
    delta: u32,
    length: u32,
    message_type: u8,
    stream_id: u32,
    extended: bool,
    payload: BytesMut,
}

/// Reassembles chunks into messages
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, IncomingStream>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Apply a Set Chunk Size received from the peer
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Drop a partially received message (Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(stream) = self.streams.get_mut(&csid) {
            stream.payload.clear();
        }
    }

    /// Consume chunks from `buf` until one message is complete.
    ///
    /// Returns `Ok(None)` when more bytes are needed; bytes of an incomplete
    /// chunk are left in `buf` untouched.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        loop {
            match self.decode_chunk(buf)? {
                ChunkOutcome::NeedMore => return Ok(None),
                ChunkOutcome::Partial => continue,
                ChunkOutcome::Complete(msg) => return Ok(Some(msg)),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<ChunkOutcome> {
        let data = &buf[..];
        if data.is_empty() {
            return Ok(ChunkOutcome::NeedMore);
        }

        let fmt = data[0] >> 6;
        let (csid, mut pos) = match data[0] & 0x3F {
            0 if data.len() >= 2 => (data[1] as u32 + 64, 2),
            1 if data.len() >= 3 => (u16::from_le_bytes([data[1], data[2]]) as u32 + 64, 3),
            0 | 1 => return Ok(ChunkOutcome::NeedMore),
            id => (id as u32, 1),
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if data.len() < pos + header_len {
            return Ok(ChunkOutcome::NeedMore);
        }

        if fmt != 0 && !self.streams.contains_key(&csid) {
            return Err(ProtocolError::UnknownChunkStream(csid).into());
        }
        let stream = self.streams.entry(csid).or_default();
        let header = &data[pos..pos + header_len];
        pos += header_len;

        // Parse into locals first so a short read leaves the state untouched
        let mut timestamp = stream.timestamp;
        let mut delta = stream.delta;
        let mut length = stream.length;
        let mut message_type = stream.message_type;
        let mut stream_id = stream.stream_id;
        let mut extended = stream.extended;
        let starting = stream.payload.is_empty();

        if fmt <= 2 {
            let ts_field = read_u24(&header[0..3]);
            extended = ts_field == EXTENDED_TIMESTAMP;
            if fmt == 0 {
                timestamp = ts_field;
                delta = 0;
            } else {
                delta = ts_field;
            }
            if fmt <= 1 {
                length = read_u24(&header[3..6]);
                message_type = header[6];
            }
            if fmt == 0 {
                stream_id = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
            }
        }

        if extended {
            if data.len() < pos + 4 {
                return Ok(ChunkOutcome::NeedMore);
            }
            let ext = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            pos += 4;
            if fmt == 0 {
                timestamp = ext;
            } else if fmt != 3 {
                delta = ext;
            }
        }

        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length).into());
        }

        let received = if starting { 0 } else { stream.payload.len() };
        let remaining = (length as usize)
            .checked_sub(received)
            .ok_or(ProtocolError::LengthMismatch {
                csid,
                length,
                received,
            })?;
        let take = remaining.min(self.chunk_size as usize);
        if data.len() < pos + take {
            return Ok(ChunkOutcome::NeedMore);
        }

        if starting && fmt != 0 {
            timestamp = timestamp.wrapping_add(delta);
        }

        stream.timestamp = timestamp;
        stream.delta = delta;
        stream.length = length;
        stream.message_type = message_type;
        stream.stream_id = stream_id;
        stream.extended = extended;

        buf.advance(pos);
        let body = buf.split_to(take);
        stream.payload.extend_from_slice(&body);

        if stream.payload.len() < length as usize {
            return Ok(ChunkOutcome::Partial);
        }

        let payload = stream.payload.split().freeze();
        Ok(ChunkOutcome::Complete(RawMessage {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload,
        }))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

enum ChunkOutcome {
    NeedMore,
    Partial,
    Complete(RawMessage),
}
