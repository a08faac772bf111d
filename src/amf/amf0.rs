//! AMF0 encoder and decoder
//!
//! Reference: AMF0 File Format Specification.
//!
//! Type markers handled here:
//! ```text
//! 0x00 - Number (IEEE 754 double, big-endian)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x00 0x00 0x09)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x07 - Reference (16-bit index)         decode only
//! 0x08 - ECMA Array (u32 count + pairs + 0x00 0x00 0x09)
//! 0x0A - Strict Array (u32 count + values)
//! 0x0B - Date (double + i16 timezone)      decode only, read as Number
//! 0x0C - Long String (32-bit length)
//! 0x0F - XML Document                      decode only, read as String
//! 0x10 - Typed Object                      decode only, read as Object
//! ```
//!
//! The encoder is what goes on the wire; the decoder exists to read server
//! replies (`_result`, `onStatus`) and is lenient about encoder quirks.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// AMF0 encoder
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Take the encoded bytes, leaving the encoder empty
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a single value
    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(*b as u8);
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::String(s) => {
                if s.len() > u16::MAX as usize {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props);
            }
            AmfValue::Array(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem);
                }
            }
        }
    }

    /// Encode a sequence of values back to back
    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    fn write_properties(&mut self, props: &AmfObject) {
        for (key, val) in props.iter() {
            self.write_utf8(key);
            self.encode(val);
        }
        // Empty key followed by the end marker
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    /// Property name: 16-bit length prefix, no type marker
    fn write_utf8(&mut self, s: &str) {
        let mut len = s.len().min(u16::MAX as usize);
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// AMF0 decoder with lenient parsing mode
pub struct Amf0Decoder {
    /// Complex values seen so far, addressable by reference markers
    references: Vec<AmfValue>,
    lenient: bool,
    depth: usize,
}

impl Amf0Decoder {
    /// Create a lenient decoder
    pub fn new() -> Self {
        Self::with_lenient(true)
    }

    pub fn with_lenient(lenient: bool) -> Self {
        Self {
            references: Vec::new(),
            lenient,
            depth: 0,
        }
    }

    /// Reset decoder state (call between messages)
    pub fn reset(&mut self) {
        self.references.clear();
        self.depth = 0;
    }

    /// Decode a single value from the buffer
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        let marker = buf.get_u8();
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode values until the buffer is exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => Ok(AmfValue::Number(read_f64(buf)?)),
            MARKER_BOOLEAN => {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
            MARKER_LONG_STRING | MARKER_XML_DOCUMENT => Ok(AmfValue::String(read_utf8_long(buf)?)),
            MARKER_OBJECT => self.decode_object(buf, false),
            MARKER_TYPED_OBJECT => {
                let _class_name = read_utf8(buf)?;
                self.decode_object(buf, false)
            }
            MARKER_ECMA_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                // Count is only a hint; the end marker terminates the array
                let _count = buf.get_u32();
                self.decode_object(buf, true)
            }
            MARKER_STRICT_ARRAY => self.decode_strict_array(buf),
            MARKER_DATE => {
                let millis = read_f64(buf)?;
                if buf.remaining() < 2 {
                    return Err(AmfError::UnexpectedEof);
                }
                let _timezone = buf.get_i16();
                Ok(AmfValue::Number(millis))
            }
            MARKER_REFERENCE => {
                if buf.remaining() < 2 {
                    return Err(AmfError::UnexpectedEof);
                }
                let index = buf.get_u16();
                self.references
                    .get(index as usize)
                    .cloned()
                    .ok_or(AmfError::InvalidReference(index))
            }
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            _ if self.lenient => Ok(AmfValue::Undefined),
            _ => Err(AmfError::UnknownMarker(marker)),
        }
    }

    fn decode_object(&mut self, buf: &mut Bytes, ecma: bool) -> Result<AmfValue, AmfError> {
        let index = self.references.len();
        self.references.push(AmfValue::Null);

        let mut properties = AmfObject::new();
        loop {
            let key = read_utf8(buf)?;
            if key.is_empty() {
                match buf.first() {
                    Some(&MARKER_OBJECT_END) => {
                        buf.advance(1);
                        break;
                    }
                    // Some encoders drop the end marker entirely
                    _ if self.lenient => break,
                    None => return Err(AmfError::UnexpectedEof),
                    Some(_) => return Err(AmfError::InvalidObjectEnd),
                }
            }
            let value = self.decode(buf)?;
            properties.insert(key, value);
        }

        let value = if ecma {
            AmfValue::EcmaArray(properties)
        } else {
            AmfValue::Object(properties)
        };
        self.references[index] = value.clone();
        Ok(value)
    }

    fn decode_strict_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 4 {
            return Err(AmfError::UnexpectedEof);
        }
        let count = buf.get_u32() as usize;

        let index = self.references.len();
        self.references.push(AmfValue::Null);

        let mut elements = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            elements.push(self.decode(buf)?);
        }

        let value = AmfValue::Array(elements);
        self.references[index] = value.clone();
        Ok(value)
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn read_f64(buf: &mut Bytes) -> Result<f64, AmfError> {
    if buf.remaining() < 8 {
        return Err(AmfError::UnexpectedEof);
    }
    Ok(buf.get_f64())
}

fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    read_utf8_bytes(buf, len)
}

fn read_utf8_long(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 4 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u32() as usize;
    read_utf8_bytes(buf, len)
}

fn read_utf8_bytes(buf: &mut Bytes, len: usize) -> Result<String, AmfError> {
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// Encode a single value
pub fn encode(value: &AmfValue) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value);
    encoder.finish()
}

/// Encode several values back to back (command name, transaction id, ...)
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

/// Decode a single value
pub fn decode(data: &[u8]) -> Result<AmfValue, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode(&mut buf)
}

/// Decode every value in `data`
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode_all(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_layout() {
        let encoded = encode(&AmfValue::Number(1.0));
        assert_eq!(
            &encoded[..],
            &[0x00, 0x3F, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_string_layout() {
        let encoded = encode(&AmfValue::from("connect"));
        assert_eq!(&encoded[..3], &[0x02, 0x00, 0x07]);
        assert_eq!(&encoded[3..], b"connect");
    }

    #[test]
    fn test_boolean_and_null_layout() {
        assert_eq!(&encode(&AmfValue::Boolean(true))[..], &[0x01, 0x01]);
        assert_eq!(&encode(&AmfValue::Boolean(false))[..], &[0x01, 0x00]);
        assert_eq!(&encode(&AmfValue::Null)[..], &[0x05]);
        assert_eq!(&encode(&AmfValue::Undefined)[..], &[0x06]);
    }

    #[test]
    fn test_object_layout_preserves_order() {
        let obj = AmfObject::new().with("b", true).with("a", AmfValue::Null);
        let encoded = encode(&AmfValue::Object(obj));

        assert_eq!(
            &encoded[..],
            &[
                0x03, // object
                0x00, 0x01, b'b', 0x01, 0x01, // b: true
                0x00, 0x01, b'a', 0x05, // a: null
                0x00, 0x00, 0x09, // end
            ]
        );
    }

    #[test]
    fn test_ecma_array_layout() {
        let obj = AmfObject::new().with("x", 2u32);
        let encoded = encode(&AmfValue::EcmaArray(obj));

        assert_eq!(&encoded[..5], &[0x08, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&encoded[5..8], &[0x00, 0x01, b'x']);
        assert_eq!(encoded[8], MARKER_NUMBER);
        assert_eq!(&encoded[encoded.len() - 3..], &[0x00, 0x00, 0x09]);
    }

    #[test]
    fn test_object_roundtrip_keeps_order() {
        let obj = AmfObject::new()
            .with("width", 1920u32)
            .with("height", 1080u32)
            .with("codec", "h264")
            .with("stereo", true);
        let value = AmfValue::EcmaArray(obj);

        let decoded = decode(&encode(&value)).unwrap();
        assert_eq!(decoded, value);

        let keys: Vec<_> = decoded.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["width", "height", "codec", "stereo"]);
    }

    #[test]
    fn test_array_roundtrip() {
        let value = AmfValue::Array(vec![
            AmfValue::Number(1.0),
            AmfValue::String("two".into()),
            AmfValue::Boolean(true),
        ]);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn test_multiple_values() {
        let values = vec![
            AmfValue::String("createStream".into()),
            AmfValue::Number(4.0),
            AmfValue::Null,
        ];

        let decoded = decode_all(&encode_all(&values)).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_long_string() {
        let long_str = "x".repeat(70000);
        let encoded = encode(&AmfValue::String(long_str.clone()));
        assert_eq!(encoded[0], MARKER_LONG_STRING);
        assert_eq!(decode(&encoded).unwrap(), AmfValue::String(long_str));
    }

    #[test]
    fn test_nested_objects() {
        let inner = AmfObject::new().with("key", "value");
        let outer = AmfObject::new()
            .with("inner", AmfValue::Object(inner))
            .with("count", 5u32);

        let decoded = decode(&encode(&AmfValue::Object(outer))).unwrap();

        if let Some(AmfValue::Object(inner)) = decoded.get("inner") {
            assert_eq!(inner.get("key").and_then(|v| v.as_str()), Some("value"));
        } else {
            panic!("Expected inner object");
        }
        assert_eq!(decoded.get_number("count"), Some(5.0));
    }

    #[test]
    fn test_decode_date_as_number() {
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_DATE);
        buf.put_f64(1_700_000_000_000.0);
        buf.put_i16(0);

        assert_eq!(
            decode(&buf).unwrap(),
            AmfValue::Number(1_700_000_000_000.0)
        );
    }

    #[test]
    fn test_decode_typed_object_as_object() {
        let mut buf = BytesMut::new();
        buf.put_u8(MARKER_TYPED_OBJECT);
        buf.put_u16(5);
        buf.put_slice(b"Point");
        buf.put_u16(1);
        buf.put_slice(b"x");
        buf.put_u8(MARKER_NUMBER);
        buf.put_f64(100.0);
        buf.put_slice(&[0x00, 0x00, 0x09]);

        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.get_number("x"), Some(100.0));
    }

    #[test]
    fn test_decode_reference() {
        let obj = AmfObject::new().with("level", "status");
        let mut buf = BytesMut::new();
        buf.put_slice(&encode(&AmfValue::Object(obj.clone())));
        buf.put_slice(&[MARKER_REFERENCE, 0x00, 0x00]);

        let values = decode_all(&buf).unwrap();
        assert_eq!(values[1], AmfValue::Object(obj));

        let bad = [MARKER_REFERENCE, 0x00, 0x03];
        assert!(matches!(
            decode(&bad),
            Err(AmfError::InvalidReference(3))
        ));
    }

    #[test]
    fn test_decode_empty_buffer() {
        assert!(matches!(decode(&[]), Err(AmfError::UnexpectedEof)));
    }

    #[test]
    fn test_decode_truncated_number() {
        let data = [0x00, 0x40, 0x45];
        assert!(matches!(decode(&data), Err(AmfError::UnexpectedEof)));
    }

    #[test]
    fn test_decode_truncated_string() {
        let data = [0x02, 0x00, 0x10];
        assert!(matches!(decode(&data), Err(AmfError::UnexpectedEof)));
    }

    #[test]
    fn test_lenient_mode_unknown_marker() {
        assert_eq!(decode(&[0xFF]).unwrap(), AmfValue::Undefined);
    }

    #[test]
    fn test_strict_mode_unknown_marker() {
        let mut decoder = Amf0Decoder::with_lenient(false);
        let mut buf = Bytes::from_static(&[0xFF]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(AmfError::UnknownMarker(0xFF))
        ));
    }

    #[test]
    fn test_strict_mode_missing_object_end() {
        let mut decoder = Amf0Decoder::with_lenient(false);
        let mut buf = Bytes::from_static(&[0x03, 0x00, 0x00, 0x05]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(AmfError::InvalidObjectEnd)
        ));
    }

    #[test]
    fn test_nesting_depth_limit() {
        let mut value = AmfValue::Object(AmfObject::new());
        for _ in 0..70 {
            value = AmfValue::Object(AmfObject::new().with("nested", value));
        }

        let result = decode(&encode(&value));
        assert!(matches!(result, Err(AmfError::NestingTooDeep)));
    }

    #[test]
    fn test_encoder_finish_resets() {
        let mut encoder = Amf0Encoder::with_capacity(64);
        assert!(encoder.is_empty());

        encoder.encode(&AmfValue::Null);
        assert_eq!(encoder.len(), 1);

        let out = encoder.finish();
        assert_eq!(&out[..], &[MARKER_NULL]);
        assert!(encoder.is_empty());
    }

    #[test]
    fn test_on_status_reply() {
        let info = AmfObject::new()
            .with("level", "status")
            .with("code", "NetStream.Publish.Start")
            .with("description", "Start publishing");
        let values = vec![
            AmfValue::from("onStatus"),
            AmfValue::Number(0.0),
            AmfValue::Null,
            AmfValue::Object(info),
        ];

        let decoded = decode_all(&encode_all(&values)).unwrap();
        assert_eq!(decoded[0].as_str(), Some("onStatus"));
        assert_eq!(
            decoded[3].get_string("code"),
            Some("NetStream.Publish.Start")
        );
    }
}
