//! RTMP chunk stream codec.
//!
//! ```text
//! +--------------+------------------+--------------------+------------+
//! | Basic header | Message header   | Extended timestamp | Chunk data |
//! | 1-3 bytes    | 11 / 7 / 3 / 0   | 0 or 4 bytes       | <= chunk   |
//! +--------------+------------------+--------------------+------------+
//!
//! fmt 0: timestamp(3) length(3) type(1) stream id(4, little-endian)
//! fmt 1: delta(3) length(3) type(1)
//! fmt 2: delta(3)
//! fmt 3: nothing, everything comes from the previous chunk
//! ```
//!
//! A timestamp field of `0xFFFFFF` means the real value follows as a 4-byte
//! extended timestamp, repeated on every fmt 3 continuation chunk.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE};
use crate::error::{Error, Result};

const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;
const MESSAGE_HEADER_LEN: [usize; 4] = [11, 7, 3, 0];

/// One complete RTMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpMessage {
    pub csid: u32,
    pub timestamp: u32,
    pub message_type: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
struct ChunkStreamState {
    started: bool,
    timestamp: u32,
    delta: u32,
    length: u32,
    message_type: u8,
    stream_id: u32,
    extended: bool,
    partial: BytesMut,
}

fn read_u24(b: &[u8]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

fn put_u24(value: u32, out: &mut BytesMut) {
    out.put_slice(&value.to_be_bytes()[1..]);
}

/// Returns `(fmt, csid, basic header length)`, or `None` if incomplete.
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let first = *buf.first()?;
    let fmt = first >> 6;
    match first & 0x3F {
        0 => Some((fmt, 64 + u32::from(*buf.get(1)?), 2)),
        1 => {
            let lo = u32::from(*buf.get(1)?);
            let hi = u32::from(*buf.get(2)?);
            Some((fmt, 64 + lo + hi * 256, 3))
        }
        csid => Some((fmt, u32::from(csid), 1)),
    }
}

fn write_basic_header(fmt: u8, csid: u32, out: &mut BytesMut) {
    match csid {
        0..=63 => out.put_u8((fmt << 6) | csid as u8),
        64..=319 => {
            out.put_u8(fmt << 6);
            out.put_u8((csid - 64) as u8);
        }
        _ => {
            out.put_u8((fmt << 6) | 1);
            let id = csid - 64;
            out.put_u8((id & 0xFF) as u8);
            out.put_u8(((id >> 8) & 0xFF) as u8);
        }
    }
}

/// Reassembles messages from incoming chunks.
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Apply a peer's SetChunkSize.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Consume chunks from `buf` until a message completes.
    ///
    /// Returns `Ok(None)` when more bytes are needed; a partially received
    /// chunk is left in `buf` untouched.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpMessage>> {
        let chunk_size = self.chunk_size as usize;
        loop {
            let Some((fmt, csid, basic_len)) = parse_basic_header(buf) else {
                return Ok(None);
            };
            let header_len = MESSAGE_HEADER_LEN[usize::from(fmt)];
            if buf.len() < basic_len + header_len {
                return Ok(None);
            }

            let state = self.streams.entry(csid).or_default();
            if fmt != 0 && !state.started {
                return Err(Error::Protocol(format!(
                    "chunk stream {csid} starts with fmt {fmt}"
                )));
            }

            let header = &buf[basic_len..basic_len + header_len];
            let ts_field = if fmt < 3 { read_u24(&header[0..3]) } else { 0 };
            let (length, message_type, stream_id) = match fmt {
                0 => (
                    read_u24(&header[3..6]),
                    header[6],
                    u32::from_le_bytes([header[7], header[8], header[9], header[10]]),
                ),
                1 => (read_u24(&header[3..6]), header[6], state.stream_id),
                _ => (state.length, state.message_type, state.stream_id),
            };
            let extended = if fmt < 3 {
                ts_field == EXTENDED_TIMESTAMP
            } else {
                state.extended
            };

            let mut pos = basic_len + header_len;
            let field = if extended {
                if buf.len() < pos + 4 {
                    return Ok(None);
                }
                let ext = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
                pos += 4;
                ext
            } else {
                ts_field
            };

            if length > MAX_MESSAGE_SIZE {
                return Err(Error::Protocol(format!("message of {length} bytes too large")));
            }

            let starting = state.partial.is_empty();
            let remaining = if starting {
                length as usize
            } else {
                state.length as usize - state.partial.len()
            };
            let data_len = remaining.min(chunk_size);
            if buf.len() < pos + data_len {
                return Ok(None);
            }

            if starting {
                match fmt {
                    0 => {
                        state.timestamp = field;
                        state.delta = field;
                    }
                    1 | 2 => {
                        state.delta = field;
                        state.timestamp = state.timestamp.wrapping_add(field);
                    }
                    _ => state.timestamp = state.timestamp.wrapping_add(state.delta),
                }
                state.length = length;
                state.message_type = message_type;
                state.stream_id = stream_id;
                state.extended = extended;
                state.started = true;
            }

            buf.advance(pos);
            state.partial.extend_from_slice(&buf[..data_len]);
            buf.advance(data_len);

            if state.partial.len() >= state.length as usize {
                return Ok(Some(RtmpMessage {
                    csid,
                    timestamp: state.timestamp,
                    message_type: state.message_type,
                    stream_id: state.stream_id,
                    payload: state.partial.split().freeze(),
                }));
            }
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits outgoing messages into chunks, compressing headers per chunk
/// stream where the previous message allows it.
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Takes effect for the next message; announce it with SetChunkSize first.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn encode(
        &mut self,
        csid: u32,
        timestamp: u32,
        message_type: u8,
        stream_id: u32,
        payload: &[u8],
        out: &mut BytesMut,
    ) {
        let state = self.streams.entry(csid).or_default();
        let length = payload.len() as u32;

        let fmt: u8 = if !state.started
            || state.stream_id != stream_id
            || timestamp < state.timestamp
        {
            0
        } else if state.length == length && state.message_type == message_type {
            2
        } else {
            1
        };
        let field = if fmt == 0 {
            timestamp
        } else {
            timestamp - state.timestamp
        };
        let extended = field >= EXTENDED_TIMESTAMP;
        let header_field = field.min(EXTENDED_TIMESTAMP);

        state.started = true;
        state.timestamp = timestamp;
        state.delta = field;
        state.length = length;
        state.message_type = message_type;
        state.stream_id = stream_id;
        state.extended = extended;

        out.reserve(payload.len() + 18);
        write_basic_header(fmt, csid, out);
        put_u24(header_field, out);
        if fmt <= 1 {
            put_u24(length, out);
            out.put_u8(message_type);
        }
        if fmt == 0 {
            out.put_u32_le(stream_id);
        }
        if extended {
            out.put_u32(field);
        }

        let mut chunks = payload.chunks(self.chunk_size as usize);
        if let Some(first) = chunks.next() {
            out.put_slice(first);
        }
        for chunk in chunks {
            write_basic_header(3, csid, out);
            if extended {
                out.put_u32(field);
            }
            out.put_slice(chunk);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}
