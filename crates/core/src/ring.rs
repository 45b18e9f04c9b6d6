//! Fixed-capacity circular byte buffer carrying framed records.
//!
//! Every producer/consumer path that crosses a thread boundary (RTMP push,
//! file writers) stages data here. A record is a [`RecordHeader`] followed by
//! its payload:
//!
//! ```text
//! +----------------+----------------+------+-------+------------------+
//! | length (u32 BE)| timestamp (u64 BE)    | kind  | payload ...      |
//! +----------------+----------------+------+-------+------------------+
//!        4                   8                 1       `length` bytes
//! ```
//!
//! Pushes are all-or-nothing: a record that does not fit is rejected and the
//! buffer is left untouched. The buffer is not synchronized; callers hold one
//! lock around it.

/// Serialized size of [`RecordHeader`].
pub const RECORD_HEADER_LEN: usize = 13;

/// Metadata prefix of one framed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Payload length in bytes (header excluded).
    pub len: u32,
    /// Producer timestamp in milliseconds.
    pub timestamp: u64,
    /// Application-defined record type.
    pub kind: u8,
}

impl RecordHeader {
    pub fn new(len: usize, timestamp: u64, kind: u8) -> Self {
        Self {
            len: len as u32,
            timestamp,
            kind,
        }
    }

    fn to_bytes(self) -> [u8; RECORD_HEADER_LEN] {
        let mut out = [0u8; RECORD_HEADER_LEN];
        out[0..4].copy_from_slice(&self.len.to_be_bytes());
        out[4..12].copy_from_slice(&self.timestamp.to_be_bytes());
        out[12] = self.kind;
        out
    }

    fn from_bytes(raw: &[u8; RECORD_HEADER_LEN]) -> Self {
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&raw[4..12]);
        Self {
            len: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            timestamp: u64::from_be_bytes(ts),
            kind: raw[12],
        }
    }

    /// Header plus payload size.
    pub fn record_len(&self) -> usize {
        RECORD_HEADER_LEN + self.len as usize
    }
}

#[derive(Debug)]
pub struct RingStreamBuffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
    used: usize,
}

impl RingStreamBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Append one record. Returns `false`, leaving the buffer unchanged, when
    /// the header plus payload exceed [`remaining`](Self::remaining).
    pub fn push(&mut self, header: RecordHeader, payload: &[u8]) -> bool {
        debug_assert_eq!(header.len as usize, payload.len());
        let total = RECORD_HEADER_LEN + payload.len();
        if total > self.remaining() {
            return false;
        }
        self.write_bytes(&header.to_bytes());
        self.write_bytes(payload);
        true
    }

    /// Header of the oldest record, if one is fully present.
    pub fn peek_header(&self) -> Option<RecordHeader> {
        if self.used < RECORD_HEADER_LEN {
            return None;
        }
        let mut raw = [0u8; RECORD_HEADER_LEN];
        self.copy_out(self.read, &mut raw);
        let header = RecordHeader::from_bytes(&raw);
        if self.used < header.record_len() {
            return None;
        }
        Some(header)
    }

    /// Remove `len` bytes from the read side. Fails without consuming anything
    /// when fewer than `len` bytes are buffered.
    pub fn pop(&mut self, len: usize) -> bool {
        if len > self.used {
            return false;
        }
        self.advance_read(len);
        true
    }

    /// Remove the oldest complete record, copying its payload into `out`.
    pub fn pop_record(&mut self, out: &mut Vec<u8>) -> Option<RecordHeader> {
        let header = self.peek_header()?;
        out.clear();
        out.resize(header.len as usize, 0);
        let start = (self.read + RECORD_HEADER_LEN) % self.capacity();
        self.copy_out(start, out);
        self.advance_read(header.record_len());
        Some(header)
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.used = 0;
    }

    fn write_bytes(&mut self, src: &[u8]) {
        let cap = self.capacity();
        let first = src.len().min(cap - self.write);
        self.data[self.write..self.write + first].copy_from_slice(&src[..first]);
        let rest = src.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&src[first..]);
        }
        self.write = (self.write + src.len()) % cap;
        self.used += src.len();
    }

    fn copy_out(&self, start: usize, dst: &mut [u8]) {
        let cap = self.capacity();
        let first = dst.len().min(cap - start);
        dst[..first].copy_from_slice(&self.data[start..start + first]);
        let rest = dst.len() - first;
        if rest > 0 {
            dst[first..].copy_from_slice(&self.data[..rest]);
        }
    }

    fn advance_read(&mut self, len: usize) {
        self.read = (self.read + len) % self.capacity();
        self.used -= len;
        if self.used == 0 {
            self.read = 0;
            self.write = 0;
        }
    }
}
