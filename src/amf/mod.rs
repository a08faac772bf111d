//! AMF0 serialization
//!
//! RTMP commands and stream metadata are carried as sequences of AMF0
//! values. Only AMF0 is spoken: the publisher announces
//! `objectEncoding = 0` in its connect command.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::{AmfObject, AmfValue};
