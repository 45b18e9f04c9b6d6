//! AMF0 values, as used by RTMP command messages.
//!
//! Only the markers a publisher exchanges are modelled:
//!
//! ```text
//! 0x00 Number     (IEEE 754 double)
//! 0x01 Boolean
//! 0x02 String     (u16 length prefix)
//! 0x03 Object     (key/value pairs until 00 00 09)
//! 0x05 Null
//! 0x06 Undefined
//! 0x08 ECMA Array (u32 count hint, then as Object)
//! 0x0A Strict Array
//! 0x0C Long String (u32 length prefix)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_LONG_STRING: u8 = 0x0C;

const MAX_NESTING_DEPTH: usize = 32;

/// An AMF0 value. Object properties keep their wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, AmfValue)>),
    Null,
    Undefined,
    EcmaArray(Vec<(String, AmfValue)>),
    StrictArray(Vec<AmfValue>),
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Property lookup on objects and ECMA arrays.
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        match self {
            AmfValue::Object(props) | AmfValue::EcmaArray(props) => {
                props.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            AmfValue::Number(n) => {
                buf.put_u8(MARKER_NUMBER);
                buf.put_f64(*n);
            }
            AmfValue::Boolean(b) => {
                buf.put_u8(MARKER_BOOLEAN);
                buf.put_u8(u8::from(*b));
            }
            AmfValue::String(s) => match u16::try_from(s.len()) {
                Ok(len) => {
                    buf.put_u8(MARKER_STRING);
                    buf.put_u16(len);
                    buf.put_slice(s.as_bytes());
                }
                Err(_) => {
                    buf.put_u8(MARKER_LONG_STRING);
                    buf.put_u32(s.len() as u32);
                    buf.put_slice(s.as_bytes());
                }
            },
            AmfValue::Object(props) => {
                buf.put_u8(MARKER_OBJECT);
                encode_properties(props, buf);
            }
            AmfValue::Null => buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => buf.put_u8(MARKER_UNDEFINED),
            AmfValue::EcmaArray(props) => {
                buf.put_u8(MARKER_ECMA_ARRAY);
                buf.put_u32(props.len() as u32);
                encode_properties(props, buf);
            }
            AmfValue::StrictArray(items) => {
                buf.put_u8(MARKER_STRICT_ARRAY);
                buf.put_u32(items.len() as u32);
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<AmfValue> {
        decode_value(buf, 0)
    }

    /// Decode values until the buffer is exhausted.
    pub fn decode_all(buf: &mut Bytes) -> Result<Vec<AmfValue>> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(decode_value(buf, 0)?);
        }
        Ok(values)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

fn write_key(key: &str, buf: &mut BytesMut) {
    let bytes = &key.as_bytes()[..key.len().min(u16::MAX as usize)];
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

fn encode_properties(props: &[(String, AmfValue)], buf: &mut BytesMut) {
    for (key, value) in props {
        write_key(key, buf);
        value.encode(buf);
    }
    buf.put_u16(0);
    buf.put_u8(MARKER_OBJECT_END);
}

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::Amf("unexpected end of data"));
    }
    Ok(())
}

fn read_string(buf: &mut Bytes, len: usize) -> Result<String> {
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::Amf("invalid UTF-8 string"))
}

fn read_short_string(buf: &mut Bytes) -> Result<String> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    read_string(buf, len)
}

fn decode_properties(buf: &mut Bytes, depth: usize) -> Result<Vec<(String, AmfValue)>> {
    let mut props = Vec::new();
    loop {
        let key = read_short_string(buf)?;
        if key.is_empty() {
            // Some peers drop the end marker on the last object.
            if buf.has_remaining() && buf[0] == MARKER_OBJECT_END {
                buf.advance(1);
            }
            return Ok(props);
        }
        let value = decode_value(buf, depth + 1)?;
        props.push((key, value));
    }
}

fn decode_value(buf: &mut Bytes, depth: usize) -> Result<AmfValue> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::Amf("nesting too deep"));
    }
    need(buf, 1)?;
    match buf.get_u8() {
        MARKER_NUMBER => {
            need(buf, 8)?;
            Ok(AmfValue::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            need(buf, 1)?;
            Ok(AmfValue::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(AmfValue::String(read_short_string(buf)?)),
        MARKER_LONG_STRING => {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            Ok(AmfValue::String(read_string(buf, len)?))
        }
        MARKER_OBJECT => Ok(AmfValue::Object(decode_properties(buf, depth)?)),
        MARKER_NULL => Ok(AmfValue::Null),
        MARKER_UNDEFINED => Ok(AmfValue::Undefined),
        MARKER_ECMA_ARRAY => {
            need(buf, 4)?;
            let _count = buf.get_u32();
            Ok(AmfValue::EcmaArray(decode_properties(buf, depth)?))
        }
        MARKER_STRICT_ARRAY => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            let mut items = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                items.push(decode_value(buf, depth + 1)?);
            }
            Ok(AmfValue::StrictArray(items))
        }
        _ => Err(Error::Amf("unsupported AMF0 marker")),
    }
}

/// Encode a command message body: name, transaction id, then arguments.
pub fn encode_command(name: &str, transaction_id: f64, args: &[AmfValue]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    AmfValue::from(name).encode(&mut buf);
    AmfValue::Number(transaction_id).encode(&mut buf);
    for arg in args {
        arg.encode(&mut buf);
    }
    buf.freeze()
}

/// A decoded command message.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Command object followed by the remaining arguments.
    pub args: Vec<AmfValue>,
}

impl Command {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(payload);
        let mut values = AmfValue::decode_all(&mut buf)?.into_iter();
        let name = match values.next() {
            Some(AmfValue::String(name)) => name,
            _ => return Err(Error::Amf("command without a name")),
        };
        let transaction_id = values.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        Ok(Self {
            name,
            transaction_id,
            args: values.collect(),
        })
    }

    /// `code` of the info object carried by `onStatus` / `_error`.
    pub fn status_code(&self) -> Option<&str> {
        self.args.iter().find_map(|v| v.get_str("code"))
    }
}
