//! Typed RTMP messages
//!
//! [`RtmpMessage`] is the typed view of a [`RawMessage`]. Parsing is used on
//! everything the server sends; encoding assigns each message to the chunk
//! stream a publisher conventionally uses for it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::chunk::RawMessage;
use super::constants::*;
use crate::amf::{amf0, AmfObject, AmfValue};
use crate::error::{ProtocolError, Result};

/// Protocol, command, data and media messages
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize(u32),
    Abort(u32),
    Acknowledgement(u32),
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio { timestamp: u32, payload: Bytes },
    Video { timestamp: u32, payload: Bytes },
    /// AMF0 data message (`@setDataFrame`, `onMetaData`, ...)
    Data(Vec<AmfValue>),
    Command(Command),
    Unknown { message_type: u8, payload: Bytes },
}

/// User control events (message type 4)
#[derive(Debug, Clone, PartialEq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

impl RtmpMessage {
    /// Parse a reassembled message
    pub fn from_raw(raw: &RawMessage) -> Result<Self> {
        let mut p = raw.payload.clone();
        let msg = match raw.message_type {
            MSG_SET_CHUNK_SIZE => RtmpMessage::SetChunkSize(read_u32(&mut p, "set chunk size")? & 0x7FFF_FFFF),
            MSG_ABORT => RtmpMessage::Abort(read_u32(&mut p, "abort")?),
            MSG_ACKNOWLEDGEMENT => RtmpMessage::Acknowledgement(read_u32(&mut p, "acknowledgement")?),
            MSG_WINDOW_ACK_SIZE => RtmpMessage::WindowAckSize(read_u32(&mut p, "window ack size")?),
            MSG_SET_PEER_BANDWIDTH => {
                let size = read_u32(&mut p, "set peer bandwidth")?;
                if p.is_empty() {
                    return Err(ProtocolError::Truncated("set peer bandwidth").into());
                }
                RtmpMessage::SetPeerBandwidth {
                    size,
                    limit_type: p.get_u8(),
                }
            }
            MSG_USER_CONTROL => RtmpMessage::UserControl(UserControlEvent::parse(p)?),
            MSG_AUDIO => RtmpMessage::Audio {
                timestamp: raw.timestamp,
                payload: p,
            },
            MSG_VIDEO => RtmpMessage::Video {
                timestamp: raw.timestamp,
                payload: p,
            },
            MSG_DATA_AMF0 => RtmpMessage::Data(amf0::decode_all(&p)?),
            MSG_COMMAND_AMF0 => RtmpMessage::Command(Command::from_values(amf0::decode_all(&p)?)?),
            MSG_COMMAND_AMF3 if !p.is_empty() => {
                // AMF3 commands carry a format byte, then AMF0 values
                p.advance(1);
                RtmpMessage::Command(Command::from_values(amf0::decode_all(&p)?)?)
            }
            message_type => RtmpMessage::Unknown {
                message_type,
                payload: p,
            },
        };
        Ok(msg)
    }

    /// Encode onto the chunk stream this message conventionally uses.
    ///
    /// `stream_id` is the message stream (0 for connection-level messages,
    /// the published stream for media, metadata and stream commands).
    pub fn to_raw(&self, stream_id: u32) -> RawMessage {
        let (csid, timestamp, message_type, payload) = match self {
            RtmpMessage::SetChunkSize(size) => (CSID_PROTOCOL_CONTROL, 0, MSG_SET_CHUNK_SIZE, u32_payload(*size & 0x7FFF_FFFF)),
            RtmpMessage::Abort(csid) => (CSID_PROTOCOL_CONTROL, 0, MSG_ABORT, u32_payload(*csid)),
            RtmpMessage::Acknowledgement(seq) => (CSID_PROTOCOL_CONTROL, 0, MSG_ACKNOWLEDGEMENT, u32_payload(*seq)),
            RtmpMessage::WindowAckSize(size) => (CSID_PROTOCOL_CONTROL, 0, MSG_WINDOW_ACK_SIZE, u32_payload(*size)),
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (CSID_PROTOCOL_CONTROL, 0, MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }
            RtmpMessage::UserControl(event) => (CSID_PROTOCOL_CONTROL, 0, MSG_USER_CONTROL, event.encode()),
            RtmpMessage::Audio { timestamp, payload } => (CSID_AUDIO, *timestamp, MSG_AUDIO, payload.clone()),
            RtmpMessage::Video { timestamp, payload } => (CSID_VIDEO, *timestamp, MSG_VIDEO, payload.clone()),
            RtmpMessage::Data(values) => (CSID_DATA, 0, MSG_DATA_AMF0, amf0::encode_all(values)),
            RtmpMessage::Command(cmd) => (CSID_COMMAND, 0, MSG_COMMAND_AMF0, cmd.encode()),
            RtmpMessage::Unknown { message_type, payload } => (CSID_COMMAND, 0, *message_type, payload.clone()),
        };

        let stream_id = match self {
            RtmpMessage::Audio { .. } | RtmpMessage::Video { .. } | RtmpMessage::Data(_) | RtmpMessage::Command(_) => stream_id,
            _ => 0,
        };
        RawMessage::new(csid, timestamp, message_type, stream_id, payload)
    }
}

impl UserControlEvent {
    fn parse(mut p: Bytes) -> Result<Self> {
        if p.remaining() < 2 {
            return Err(ProtocolError::Truncated("user control").into());
        }
        let event_type = p.get_u16();
        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(read_u32(&mut p, "stream begin")?),
            UC_STREAM_EOF => UserControlEvent::StreamEof(read_u32(&mut p, "stream eof")?),
            UC_STREAM_DRY => UserControlEvent::StreamDry(read_u32(&mut p, "stream dry")?),
            UC_SET_BUFFER_LENGTH => UserControlEvent::SetBufferLength {
                stream_id: read_u32(&mut p, "set buffer length")?,
                buffer_ms: read_u32(&mut p, "set buffer length")?,
            },
            UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(read_u32(&mut p, "stream is recorded")?),
            UC_PING_REQUEST => UserControlEvent::PingRequest(read_u32(&mut p, "ping request")?),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(read_u32(&mut p, "ping response")?),
            _ => UserControlEvent::Unknown { event_type, data: p },
        };
        Ok(event)
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(10);
        match self {
            UserControlEvent::StreamBegin(v) => put_event(&mut buf, UC_STREAM_BEGIN, *v),
            UserControlEvent::StreamEof(v) => put_event(&mut buf, UC_STREAM_EOF, *v),
            UserControlEvent::StreamDry(v) => put_event(&mut buf, UC_STREAM_DRY, *v),
            UserControlEvent::SetBufferLength { stream_id, buffer_ms } => {
                put_event(&mut buf, UC_SET_BUFFER_LENGTH, *stream_id);
                buf.put_u32(*buffer_ms);
            }
            UserControlEvent::StreamIsRecorded(v) => put_event(&mut buf, UC_STREAM_IS_RECORDED, *v),
            UserControlEvent::PingRequest(v) => put_event(&mut buf, UC_PING_REQUEST, *v),
            UserControlEvent::PingResponse(v) => put_event(&mut buf, UC_PING_RESPONSE, *v),
            UserControlEvent::Unknown { event_type, data } => {
                buf.put_u16(*event_type);
                buf.put_slice(data);
            }
        }
        buf.freeze()
    }
}

fn put_event(buf: &mut BytesMut, event_type: u16, value: u32) {
    buf.put_u16(event_type);
    buf.put_u32(value);
}

fn read_u32(p: &mut Bytes, what: &'static str) -> Result<u32> {
    if p.remaining() < 4 {
        return Err(ProtocolError::Truncated(what).into());
    }
    Ok(p.get_u32())
}

fn u32_payload(v: u32) -> Bytes {
    Bytes::copy_from_slice(&v.to_be_bytes())
}

/// AMF0 command: name, transaction id, command object, arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
}

impl Command {
    pub fn new(name: &str, transaction_id: f64) -> Self {
        Self {
            name: name.to_string(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: Vec::new(),
        }
    }

    pub fn with_object(mut self, object: AmfValue) -> Self {
        self.command_object = object;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<AmfValue>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// `connect` announcing an FMLE-style publisher
    pub fn connect(transaction_id: f64, app: &str, tc_url: &str, flash_ver: &str) -> Self {
        let object = AmfObject::new()
            .with("app", app)
            .with("type", "nonprivate")
            .with("flashVer", flash_ver)
            .with("tcUrl", tc_url)
            .with("fpad", false)
            .with("capabilities", 15u32)
            .with("audioCodecs", 0x0400u32)
            .with("videoCodecs", 0x0080u32)
            .with("videoFunction", 1u32)
            .with("objectEncoding", 0u32);
        Command::new(CMD_CONNECT, transaction_id).with_object(AmfValue::Object(object))
    }

    pub fn release_stream(transaction_id: f64, stream_key: &str) -> Self {
        Command::new(CMD_RELEASE_STREAM, transaction_id).with_arg(stream_key)
    }

    pub fn fc_publish(transaction_id: f64, stream_key: &str) -> Self {
        Command::new(CMD_FC_PUBLISH, transaction_id).with_arg(stream_key)
    }

    pub fn fc_unpublish(transaction_id: f64, stream_key: &str) -> Self {
        Command::new(CMD_FC_UNPUBLISH, transaction_id).with_arg(stream_key)
    }

    pub fn create_stream(transaction_id: f64) -> Self {
        Command::new(CMD_CREATE_STREAM, transaction_id)
    }

    /// `publish(name, "live")`, sent on the created message stream
    pub fn publish(transaction_id: f64, stream_key: &str) -> Self {
        Command::new(CMD_PUBLISH, transaction_id)
            .with_arg(stream_key)
            .with_arg("live")
    }

    pub fn delete_stream(transaction_id: f64, stream_id: u32) -> Self {
        Command::new(CMD_DELETE_STREAM, transaction_id).with_arg(stream_id)
    }

    /// Build from decoded AMF values
    pub fn from_values(values: Vec<AmfValue>) -> Result<Self> {
        let mut iter = values.into_iter();
        let name = match iter.next() {
            Some(AmfValue::String(name)) => name,
            _ => return Err(ProtocolError::UnexpectedMessage("command without a name".into()).into()),
        };
        let transaction_id = iter.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        let command_object = iter.next().unwrap_or(AmfValue::Null);
        Ok(Command {
            name,
            transaction_id,
            command_object,
            arguments: iter.collect(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut encoder = amf0::Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode(&AmfValue::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        encoder.encode_all(&self.arguments);
        encoder.finish()
    }

    /// Info object of an `onStatus` / `_error`, or of a `_result` to `connect`
    pub fn info(&self) -> Option<&AmfValue> {
        self.arguments
            .iter()
            .chain(std::iter::once(&self.command_object))
            .find(|v| v.get("code").is_some())
    }

    /// `code` of the info object (`NetStream.Publish.Start`, ...)
    pub fn status_code(&self) -> Option<&str> {
        self.info()?.get_string("code")
    }

    /// Whether this reply reports a failure
    pub fn is_error(&self) -> bool {
        if self.name == CMD_ERROR {
            return true;
        }
        self.info()
            .and_then(|info| info.get_string("level"))
            .map(|level| level == "error")
            .unwrap_or(false)
    }
}
