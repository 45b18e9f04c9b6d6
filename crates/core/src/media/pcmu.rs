//! G.711 µ-law RTP packetizer: RFC 3551 §4.5.14.
//!
//! Static payload type 0, 8 kHz clock. Every audio unit is sent as one
//! packet with the marker bit set.

use super::rtp::{RTP_HEADER_LEN, RtpSerializer, media_timestamp};
use super::{MAX_PACKET_LEN, Packetizer, send_packet};
use crate::error::{Error, Result};
use crate::stream::{Frame, FrameKind};
use crate::transport::RtpTransport;

pub const PCMU_PAYLOAD_TYPE: u8 = 0;
pub const PCMU_CLOCK_RATE: u32 = 8000;

#[derive(Debug)]
pub struct PcmuPacketizer {
    serializer: RtpSerializer,
    max_packet_len: usize,
}

impl PcmuPacketizer {
    pub fn new(ssrc: u32, initial_sequence: u16) -> Self {
        Self {
            serializer: RtpSerializer::new(PCMU_PAYLOAD_TYPE, ssrc, initial_sequence),
            max_packet_len: MAX_PACKET_LEN,
        }
    }

    pub fn with_random_seed() -> Self {
        Self {
            serializer: RtpSerializer::with_random_seed(PCMU_PAYLOAD_TYPE),
            max_packet_len: MAX_PACKET_LEN,
        }
    }

    pub fn set_max_packet_len(&mut self, len: usize) {
        self.max_packet_len = len.max(RTP_HEADER_LEN + 1);
    }

    fn send_samples(
        &mut self,
        samples: &[u8],
        timestamp: u32,
        transport: &mut dyn RtpTransport,
    ) -> Result<()> {
        let max_payload = self.max_packet_len - RTP_HEADER_LEN;
        if samples.is_empty() || samples.len() > max_payload {
            return Err(Error::BufferOverflow {
                needed: samples.len(),
                remaining: max_payload,
            });
        }
        let mut packet = self.serializer.start_packet(true, timestamp);
        packet.push_span(samples)?;
        send_packet(transport, &packet)
    }
}

impl Packetizer for PcmuPacketizer {
    fn serialize(&mut self, frame: &Frame, transport: &mut dyn RtpTransport) -> bool {
        if frame.kind != FrameKind::Audio {
            return false;
        }
        for unit in &frame.units {
            let timestamp = media_timestamp(unit.timestamp_ms, PCMU_CLOCK_RATE);
            if let Err(e) = self.send_samples(&unit.data, timestamp, transport) {
                tracing::debug!(error = %e, "PCMU frame dropped");
                return false;
            }
        }
        true
    }

    fn codec_name(&self) -> &'static str {
        "PCMU"
    }

    fn clock_rate(&self) -> u32 {
        PCMU_CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        PCMU_PAYLOAD_TYPE
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![format!("a=rtpmap:{PCMU_PAYLOAD_TYPE} PCMU/{PCMU_CLOCK_RATE}")]
    }

    fn next_sequence(&self) -> u16 {
        self.serializer.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.serializer.last_timestamp()
    }
}
