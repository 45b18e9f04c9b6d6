use rand::Rng;

use crate::error::{Error, Result};
use crate::writer::ByteWriter;

/// Size of the RTP fixed header.
pub const RTP_HEADER_LEN: usize = 12;

/// Inline room for the fixed header plus the largest codec sub-header
/// (RFC 2435 main + restart + two 8-bit quantization tables).
pub const SCRATCH_CAPACITY: usize = RTP_HEADER_LEN + 8 + 4 + 4 + 2 * 64;

/// Maximum number of borrowed payload spans per packet.
pub const MAX_SPANS: usize = 4;

/// One outgoing RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The fixed header and any codec sub-header (FU indicator, AU header,
/// JPEG header) live in an inline scratch array; the media payload is
/// referenced from the source frame so large NAL units are not copied
/// until the transport flattens the packet onto the wire.
#[derive(Debug, Clone)]
pub struct RtpPacket<'a> {
    scratch: [u8; SCRATCH_CAPACITY],
    scratch_len: usize,
    spans: [&'a [u8]; MAX_SPANS],
    span_count: usize,
}

impl<'a> RtpPacket<'a> {
    fn with_header(header: [u8; RTP_HEADER_LEN]) -> Self {
        let mut scratch = [0u8; SCRATCH_CAPACITY];
        scratch[..RTP_HEADER_LEN].copy_from_slice(&header);
        Self {
            scratch,
            scratch_len: RTP_HEADER_LEN,
            spans: [&[] as &[u8]; MAX_SPANS],
            span_count: 0,
        }
    }

    /// Append codec sub-header bytes after the fixed header.
    pub fn put_header<F>(&mut self, write: F) -> Result<()>
    where
        F: FnOnce(&mut ByteWriter<'_>) -> Result<()>,
    {
        let mut writer = ByteWriter::new(&mut self.scratch[self.scratch_len..]);
        write(&mut writer)?;
        self.scratch_len += writer.position();
        Ok(())
    }

    /// Reference a payload span. Spans are emitted in push order.
    pub fn push_span(&mut self, span: &'a [u8]) -> Result<()> {
        if self.span_count == MAX_SPANS {
            return Err(Error::BufferOverflow {
                needed: 1,
                remaining: 0,
            });
        }
        self.spans[self.span_count] = span;
        self.span_count += 1;
        Ok(())
    }

    /// Fixed header plus sub-header bytes.
    pub fn header_bytes(&self) -> &[u8] {
        &self.scratch[..self.scratch_len]
    }

    pub fn spans(&self) -> &[&'a [u8]] {
        &self.spans[..self.span_count]
    }

    pub fn len(&self) -> usize {
        self.scratch_len + self.spans().iter().map(|s| s.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the flattened packet to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.reserve(self.len());
        out.extend_from_slice(self.header_bytes());
        for span in self.spans() {
            out.extend_from_slice(span);
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        self.write_to(&mut out);
        out
    }

    pub fn marker(&self) -> bool {
        self.scratch[1] & 0x80 != 0
    }

    pub fn payload_type(&self) -> u8 {
        self.scratch[1] & 0x7f
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.scratch[2], self.scratch[3]])
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([
            self.scratch[4],
            self.scratch[5],
            self.scratch[6],
            self.scratch[7],
        ])
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([
            self.scratch[8],
            self.scratch[9],
            self.scratch[10],
            self.scratch[11],
        ])
    }
}

/// Per-stream RTP header state.
///
/// The payload type is fixed at construction. Sequence number and SSRC start
/// from random seeds (RFC 3550 §5.1, §8.1) and wrap modulo 2^16 / 2^32; the
/// wraparound is normal RTP behaviour, not an error. Version is always 2;
/// padding, extension and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpSerializer {
    pt: u8,
    ssrc: u32,
    sequence: u16,
    last_timestamp: u32,
}

impl RtpSerializer {
    pub fn new(pt: u8, ssrc: u32, initial_sequence: u16) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            initial_sequence,
            "RTP serializer created"
        );
        Self {
            pt: pt & 0x7f,
            ssrc,
            sequence: initial_sequence,
            last_timestamp: 0,
        }
    }

    /// Create with random SSRC and initial sequence number.
    pub fn with_random_seed(pt: u8) -> Self {
        let mut rng = rand::rng();
        let ssrc = rng.random::<u32>();
        let sequence = rng.random::<u16>();
        Self::new(pt, ssrc, sequence)
    }

    pub fn payload_type(&self) -> u8 {
        self.pt
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// RTP timestamp of the most recent packet.
    pub fn last_timestamp(&self) -> u32 {
        self.last_timestamp
    }

    /// Start a packet with the fixed header filled in and advance the
    /// sequence number.
    pub fn start_packet<'a>(&mut self, marker: bool, timestamp: u32) -> RtpPacket<'a> {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | self.pt;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        self.last_timestamp = timestamp;
        RtpPacket::with_header(header)
    }
}

/// Convert a millisecond timestamp to an RTP media clock value (wrapping).
pub fn media_timestamp(timestamp_ms: u64, clock_rate: u32) -> u32 {
    (timestamp_ms.wrapping_mul(clock_rate as u64) / 1000) as u32
}
